//! 結果儲存模組
//!
//! 批次結果的檔案持久化（JSON + 內存快取）與表格匯出（CSV / JSON）。

pub mod export;
pub mod repository;

pub use export::{read_ranking_csv, read_results_csv, write_frame_csv, write_frame_json};
pub use repository::{FileResultStore, ResultRepository, StoreError, StoreResult};
