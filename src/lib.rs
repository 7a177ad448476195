// 模組定義
pub mod backtest;
pub mod config;
pub mod consolidate;
pub mod correlation;
pub mod pipeline;
pub mod ranking;
pub mod store;
