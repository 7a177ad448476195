//! 回測批次執行模組
//!
//! 此模組負責把一批回測任務扇出到受限的 worker 池、隔離單一任務的失敗、
//! 套用逾時並按完成順序回收結果。包含任務模型、執行邊界、批次引擎與
//! 進度監控。

pub mod engine;
pub mod executor;
pub mod progress;
pub mod results;
pub mod task;

// 重新導出主要類型和結構
pub use engine::{BatchEngine, EngineConfig, EngineError, EngineResult};
pub use executor::{execute_job, JobError, StrategyExecutor, SyntheticExecutor};
pub use progress::BatchProgress;
pub use results::{
    BatchOutcome, FailedJob, JobResult, JobStatus, MetricKey, MetricsError, StrategyMetrics,
};
pub use task::{demo_batch, BacktestJob, JobBatch, ParamValue, TaskError, TaskResult};
