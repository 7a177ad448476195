//! 相關性分析模組
//!
//! 提供排名後段的分散化工具：相關性矩陣計算、過度相關剔除、
//! 貪婪分散選擇與群集偵測。

pub mod analyzer;
pub mod matrix;

pub use analyzer::{
    CorrelationAnalyzer, CorrelationConfig, DEFAULT_MIN_PERIODS, DEFAULT_THRESHOLD,
};
pub use matrix::{
    compute_matrix, CorrelationError, CorrelationMatrix, CorrelationMethod, CorrelationResult,
};
