//! Worker 執行邊界
//!
//! 策略／回測引擎是外部協作者，經 `StrategyExecutor` 特徵接入。
//! `execute_job` 是唯一的包裝點：任何錯誤或 panic 都在此轉為失敗結果，
//! 協調器永遠不會看到 worker 拋出的原始例外。

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

use super::results::{JobResult, MetricKey, MetricsError, StrategyMetrics};
use super::task::BacktestJob;

/// 單一任務執行錯誤
///
/// 一律在協調器邊界內回收為失敗紀錄，不向外傳播。
#[derive(Debug, Error)]
pub enum JobError {
    /// 策略執行失敗
    #[error("策略執行失敗: {0}")]
    StrategyFailed(String),

    /// 歷史資料缺失
    #[error("歷史資料缺失: {0}")]
    DataUnavailable(String),

    /// 任務逾時
    #[error("任務逾時: 超過 {limit_secs} 秒")]
    Timeout { limit_secs: u64 },

    /// 策略程式 panic
    #[error("策略程式 panic: {0}")]
    Panicked(String),

    /// 回傳指標不完整
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// 策略執行器特徵
///
/// 實作者針對一個任務執行回測並回傳績效指標；
/// 失敗以 `JobError` 表達，不應 panic（panic 仍會被邊界攔截）。
#[cfg_attr(test, mockall::automock)]
pub trait StrategyExecutor: Send + Sync {
    /// 執行一個回測任務
    fn run(&self, job: &BacktestJob) -> Result<StrategyMetrics, JobError>;
}

/// 執行一個任務並將結果分類
///
/// 契約：`execute(job) -> ResultRecord`，絕不讓例外越過邊界。
/// 策略錯誤與 panic 都轉為攜帶錯誤文字的失敗結果。
pub fn execute_job(executor: &dyn StrategyExecutor, job: &BacktestJob) -> JobResult {
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| executor.run(job)));
    let elapsed = started.elapsed().as_secs_f64();

    match outcome {
        Ok(Ok(metrics)) => {
            debug!("任務 {} 執行成功 ({:.3}s)", job.job_id, elapsed);
            JobResult::success(job, metrics, elapsed)
        }
        Ok(Err(err)) => {
            debug!("任務 {} 執行失敗: {}", job.job_id, err);
            JobResult::failure(job, err.to_string(), elapsed)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            debug!("任務 {} 發生 panic: {}", job.job_id, message);
            JobResult::failure(job, JobError::Panicked(message).to_string(), elapsed)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "未知的 panic".to_string()
    }
}

/// 合成策略執行器
///
/// 以種子決定的偽隨機指標模擬外部回測引擎，
/// 供示範、基準測試與端到端測試使用；可設定失敗率注入失敗。
#[derive(Clone, Debug)]
pub struct SyntheticExecutor {
    seed: u64,
    failure_rate: f64,
    periods: usize,
}

impl SyntheticExecutor {
    /// 建立合成執行器
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            failure_rate: 0.0,
            periods: 120,
        }
    }

    /// 設定失敗率（0.0 ~ 1.0）
    pub fn with_failure_rate(mut self, failure_rate: f64) -> Self {
        self.failure_rate = failure_rate.clamp(0.0, 1.0);
        self
    }

    /// 設定報酬序列期數
    pub fn with_periods(mut self, periods: usize) -> Self {
        self.periods = periods;
        self
    }

    /// 任務專屬種子：同一 (種子, 任務ID) 必得同一結果
    fn job_seed(&self, job: &BacktestJob) -> u64 {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(job.job_id.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(bytes)
    }
}

impl StrategyExecutor for SyntheticExecutor {
    fn run(&self, job: &BacktestJob) -> Result<StrategyMetrics, JobError> {
        let mut rng = StdRng::seed_from_u64(self.job_seed(job));

        if rng.random::<f64>() < self.failure_rate {
            return Err(JobError::StrategyFailed(format!(
                "合成失敗注入 (任務 {})",
                job.job_id
            )));
        }

        let sharpe_ratio = rng.random_range(-0.5..3.0);
        let total_return = rng.random_range(-0.2..0.6);
        let max_drawdown = -rng.random_range(0.03..0.35);
        let win_rate = rng.random_range(0.35..0.65);
        let trade_count = rng.random_range(10..250) as f64;

        let mut raw = HashMap::new();
        raw.insert(MetricKey::SHARPE_RATIO.to_string(), sharpe_ratio);
        raw.insert(MetricKey::TOTAL_RETURN.to_string(), total_return);
        raw.insert(MetricKey::MAX_DRAWDOWN.to_string(), max_drawdown);
        raw.insert(MetricKey::WIN_RATE.to_string(), win_rate);
        raw.insert(MetricKey::TRADE_COUNT.to_string(), trade_count);
        raw.insert("profit_factor".to_string(), rng.random_range(0.8..2.5));
        raw.insert("volatility".to_string(), rng.random_range(0.1..0.4));
        raw.insert("avg_trade".to_string(), total_return / trade_count);

        let mean_return = total_return / self.periods.max(1) as f64;
        let returns: Vec<f64> = (0..self.periods)
            .map(|_| mean_return + rng.random_range(-0.02..0.02))
            .collect();

        Ok(StrategyMetrics::from_map(&raw)?.with_returns(returns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::results::JobStatus;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn create_test_job(job_id: &str) -> BacktestJob {
        BacktestJob {
            job_id: job_id.to_string(),
            symbol: "2330.TW".to_string(),
            strategy_path: "strategies/mean_revert.rs".to_string(),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
            strategy_params: BTreeMap::new(),
            batch_id: "batch-001".to_string(),
        }
    }

    struct PanickingExecutor;

    impl StrategyExecutor for PanickingExecutor {
        fn run(&self, _job: &BacktestJob) -> Result<StrategyMetrics, JobError> {
            panic!("策略內部爆炸");
        }
    }

    #[test]
    fn test_execute_job_converts_error_to_failure_record() {
        let mut mock = MockStrategyExecutor::new();
        mock.expect_run()
            .returning(|_| Err(JobError::DataUnavailable("缺 2024-03 分鐘線".into())));

        let result = execute_job(&mock, &create_test_job("j1"));
        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.error.as_deref().unwrap().contains("歷史資料缺失"));
        assert!(result.metrics.is_none());
    }

    #[test]
    fn test_execute_job_catches_panic() {
        let result = execute_job(&PanickingExecutor, &create_test_job("j1"));
        assert_eq!(result.status, JobStatus::Failed);
        assert!(result.error.as_deref().unwrap().contains("策略內部爆炸"));
    }

    #[test]
    fn test_synthetic_executor_is_deterministic() {
        let executor = SyntheticExecutor::new(42);
        let job = create_test_job("j1");
        let a = executor.run(&job).unwrap();
        let b = executor.run(&job).unwrap();
        assert_eq!(a.sharpe_ratio, b.sharpe_ratio);
        assert_eq!(a.trade_count, b.trade_count);
        assert_eq!(a.returns, b.returns);
    }

    #[test]
    fn test_synthetic_executor_failure_injection() {
        let executor = SyntheticExecutor::new(7).with_failure_rate(1.0);
        let err = executor.run(&create_test_job("j1")).unwrap_err();
        assert!(matches!(err, JobError::StrategyFailed(_)));
    }

    #[test]
    fn test_synthetic_executor_metrics_are_complete() {
        let executor = SyntheticExecutor::new(1).with_periods(60);
        let metrics = executor.run(&create_test_job("j9")).unwrap();
        assert!(metrics.trade_count >= 10);
        assert!(metrics.max_drawdown < 0.0);
        assert_eq!(metrics.returns.len(), 60);
        assert!(metrics.extra("profit_factor").is_some());
    }
}
