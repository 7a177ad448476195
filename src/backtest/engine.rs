//! 並行批次協調器
//!
//! 把一個批次的任務扇出到大小受限的 worker 池，按完成順序回收結果，
//! 逐任務套用逾時，並保證輸入任務集被完整、無重複地分割為成功與失敗
//! 兩組。單一任務失敗不影響同批次其他任務。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{info, warn};

use super::executor::{execute_job, JobError, StrategyExecutor};
use super::progress::BatchProgress;
use super::results::{BatchOutcome, FailedJob, JobResult};
use super::task::{BacktestJob, JobBatch, TaskError};

/// 協調器錯誤
#[derive(Debug, Error)]
pub enum EngineError {
    /// 批次結構不合法（重複任務 ID、日期範圍錯誤）
    #[error(transparent)]
    Task(#[from] TaskError),
}

/// 協調器結果類型
pub type EngineResult<T> = Result<T, EngineError>;

/// 協調器設定
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// worker 池上限；實際池大小取 min(max_workers, CPU 核心數)
    pub max_workers: usize,
    /// 單一任務逾時秒數；0 表示不設逾時
    pub job_timeout_secs: u64,
    /// 進度回報間隔秒數
    pub progress_interval_secs: u64,
    /// 建議最低成功率（協調器只警告；是否接受由呼叫端決定）
    pub min_success_rate: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_workers: num_cpus::get(),
            job_timeout_secs: 300,
            progress_interval_secs: 5,
            min_success_rate: 0.5,
        }
    }
}

impl EngineConfig {
    /// 設定 worker 池上限
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// 設定單一任務逾時秒數（0 表示不設逾時）
    pub fn with_job_timeout_secs(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    /// 設定進度回報間隔秒數
    pub fn with_progress_interval_secs(mut self, secs: u64) -> Self {
        self.progress_interval_secs = secs;
        self
    }

    /// 設定建議最低成功率
    pub fn with_min_success_rate(mut self, rate: f64) -> Self {
        self.min_success_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// 實際 worker 數：受 CPU 平行度約束，至少為 1
    pub fn effective_workers(&self) -> usize {
        self.max_workers.min(num_cpus::get()).max(1)
    }

    /// 單一任務逾時
    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_timeout_secs > 0).then(|| Duration::from_secs(self.job_timeout_secs))
    }

    fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs.max(1))
    }
}

/// 批次執行引擎
pub struct BatchEngine {
    config: EngineConfig,
    executor: Arc<dyn StrategyExecutor>,
}

impl BatchEngine {
    /// 以設定與策略執行器建立引擎
    pub fn new(config: EngineConfig, executor: Arc<dyn StrategyExecutor>) -> Self {
        Self { config, executor }
    }

    /// 以具體執行器建立引擎
    pub fn with_executor<E>(config: EngineConfig, executor: E) -> Self
    where
        E: StrategyExecutor + 'static,
    {
        Self::new(config, Arc::new(executor))
    }

    /// 引擎設定
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 執行整個批次
    ///
    /// 語意：
    /// - 有界並行（semaphore 容量 = 實際 worker 數），任務體跑在阻塞執行緒池上
    /// - 按完成順序回收（`join_next`），不等待特定任務
    /// - 逾時任務記為失敗並釋放 worker 名額，不阻塞其餘任務的回收
    /// - 部分失敗不中止批次；空批次回傳空結果
    /// - 回傳的成功／失敗分割涵蓋全部輸入任務，無遺漏、無重複
    pub async fn run(&self, batch: JobBatch) -> EngineResult<BatchOutcome> {
        batch.validate()?;

        let batch_id = batch.batch_id.clone();
        let total = batch.len();
        if total == 0 {
            info!("批次 {} 為空, 直接回傳空結果", batch_id);
            return Ok(BatchOutcome::empty(batch_id));
        }

        let workers = self.config.effective_workers();
        info!("批次 {} 啟動: {} 個任務, {} 個 worker", batch_id, total, workers);

        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(workers));
        let progress = Arc::new(BatchProgress::new(total, self.config.progress_interval()));
        let timeout = self.config.job_timeout();

        // 待辦帳本：完成者逐一銷帳，殘留者一律補記失敗，保證無任務被靜默丟棄
        let mut pending: HashMap<String, BacktestJob> = batch
            .jobs
            .iter()
            .map(|job| (job.job_id.clone(), job.clone()))
            .collect();

        let mut tasks = JoinSet::new();
        for job in batch.jobs {
            let semaphore = semaphore.clone();
            let executor = self.executor.clone();
            let progress = progress.clone();
            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let result = JobResult::failure(&job, "worker 池已關閉", 0.0);
                        progress.record_failure();
                        return result;
                    }
                };
                let result = run_one(executor, job, timeout).await;
                if result.is_success() {
                    progress.record_success();
                } else {
                    progress.record_failure();
                }
                result
            });
        }

        let mut collected = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => collected.push(result),
                Err(join_err) => {
                    // 帳本會把對應任務補記為失敗
                    warn!("worker 任務異常結束: {}", describe_join_error(&join_err));
                }
            }
        }

        let mut outcome = BatchOutcome::empty(&batch_id);
        for result in collected {
            match pending.remove(&result.job_id) {
                Some(job) => {
                    if result.is_success() {
                        outcome.successes.push(result);
                    } else {
                        let error = result
                            .error
                            .clone()
                            .unwrap_or_else(|| "未知錯誤".to_string());
                        outcome.failures.push(FailedJob { job, error });
                    }
                }
                None => warn!("收到無法歸屬的結果, 忽略: {}", result.job_id),
            }
        }
        for (job_id, job) in pending {
            warn!("任務 {} 沒有結果, 補記為失敗", job_id);
            outcome.failures.push(FailedJob {
                job,
                error: "worker 任務異常結束".to_string(),
            });
        }
        outcome.elapsed_secs = started.elapsed().as_secs_f64();

        info!("{}", outcome.summary_line());
        for (job_id, reason) in outcome.failed_jobs_with_reasons() {
            warn!("失敗任務 {}: {}", job_id, reason);
        }
        if outcome.success_rate() < self.config.min_success_rate {
            warn!(
                "批次 {} 成功率 {:.1}% 低於建議下限 {:.1}%",
                batch_id,
                outcome.success_rate() * 100.0,
                self.config.min_success_rate * 100.0
            );
        }

        Ok(outcome)
    }
}

/// 執行單一任務：阻塞池 + 逾時
async fn run_one(
    executor: Arc<dyn StrategyExecutor>,
    job: BacktestJob,
    timeout: Option<Duration>,
) -> JobResult {
    let job_ref = job.clone();
    let mut handle = tokio::task::spawn_blocking(move || execute_job(executor.as_ref(), &job));

    match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => classify_join(joined, &job_ref),
            Err(_) => {
                // 逾時只釋放 worker 名額並記為失敗；已在執行的阻塞閉包不被強殺
                handle.abort();
                let error = JobError::Timeout {
                    limit_secs: limit.as_secs(),
                };
                JobResult::failure(&job_ref, error.to_string(), limit.as_secs_f64())
            }
        },
        None => classify_join(handle.await, &job_ref),
    }
}

fn classify_join(joined: Result<JobResult, JoinError>, job: &BacktestJob) -> JobResult {
    match joined {
        Ok(result) => result,
        Err(join_err) => JobResult::failure(job, describe_join_error(&join_err), 0.0),
    }
}

fn describe_join_error(join_err: &JoinError) -> String {
    if join_err.is_cancelled() {
        "worker 任務被取消".to_string()
    } else {
        format!("worker 任務 panic: {}", join_err)
    }
}
