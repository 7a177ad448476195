//! 結果整併模組
//!
//! 把 worker 回傳的異質結果紀錄攤平成欄位統一的整併表，
//! 並在排名前做結構就緒檢查。

pub mod report;
pub mod table;

// 重新導出常用組件
pub use report::{compare_by_metric, validate_for_ranking, MetricComparison, ReadinessReport};
pub use table::{
    collect_return_history, consolidate, strategy_key, ConsolidateError, ConsolidateResult,
    MetricColumn, ResultsTable, ReturnHistory,
};
