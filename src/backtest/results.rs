use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use super::task::BacktestJob;

/// 績效指標鍵名
pub struct MetricKey;

impl MetricKey {
    pub const SHARPE_RATIO: &'static str = "sharpe_ratio";
    pub const TOTAL_RETURN: &'static str = "total_return";
    pub const MAX_DRAWDOWN: &'static str = "max_drawdown";
    pub const WIN_RATE: &'static str = "win_rate";
    pub const TRADE_COUNT: &'static str = "trade_count";
    pub const TOTAL_TRADES: &'static str = "total_trades";
}

/// 績效指標建構錯誤
#[derive(Debug, Error)]
pub enum MetricsError {
    /// 成功結果必須攜帶全部必要指標
    #[error("成功結果缺少必要指標: {0}")]
    MissingMetric(String),
}

/// 策略績效指標
///
/// 五個必要指標以具型別欄位承載（建構時即保證存在）；
/// 其餘選配指標放在開放的 extras 映射中，容納異質策略的輸出。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StrategyMetrics {
    /// 夏普比率
    pub sharpe_ratio: f64,
    /// 總報酬率
    pub total_return: f64,
    /// 最大回撤
    pub max_drawdown: f64,
    /// 勝率
    pub win_rate: f64,
    /// 交易次數
    pub trade_count: u64,
    /// 選配指標（profit_factor、volatility、sortino_ratio 等）
    #[serde(default)]
    pub extras: HashMap<String, f64>,
    /// 每期策略報酬序列（可為空；供一致性評分與相關性分析使用）
    #[serde(default)]
    pub returns: Vec<f64>,
}

impl StrategyMetrics {
    /// 從原始指標映射建構
    ///
    /// 強制「成功結果攜帶全部五個必要指標」的不變量；
    /// 交易次數接受 `trade_count` 或其同義鍵 `total_trades`，
    /// 兩者皆缺時視為指標不完整。其餘鍵全數落入 extras。
    pub fn from_map(raw: &HashMap<String, f64>) -> Result<Self, MetricsError> {
        let required = |key: &str| {
            raw.get(key)
                .copied()
                .ok_or_else(|| MetricsError::MissingMetric(key.to_string()))
        };
        let trade_count = raw
            .get(MetricKey::TRADE_COUNT)
            .or_else(|| raw.get(MetricKey::TOTAL_TRADES))
            .copied()
            .ok_or_else(|| MetricsError::MissingMetric(MetricKey::TRADE_COUNT.to_string()))?;

        let mut extras = HashMap::new();
        for (key, value) in raw {
            match key.as_str() {
                MetricKey::SHARPE_RATIO
                | MetricKey::TOTAL_RETURN
                | MetricKey::MAX_DRAWDOWN
                | MetricKey::WIN_RATE
                | MetricKey::TRADE_COUNT
                | MetricKey::TOTAL_TRADES => {}
                _ => {
                    extras.insert(key.clone(), *value);
                }
            }
        }

        Ok(Self {
            sharpe_ratio: required(MetricKey::SHARPE_RATIO)?,
            total_return: required(MetricKey::TOTAL_RETURN)?,
            max_drawdown: required(MetricKey::MAX_DRAWDOWN)?,
            win_rate: required(MetricKey::WIN_RATE)?,
            trade_count: trade_count.max(0.0) as u64,
            extras,
            returns: Vec::new(),
        })
    }

    /// 附加每期報酬序列
    pub fn with_returns(mut self, returns: Vec<f64>) -> Self {
        self.returns = returns;
        self
    }

    /// 讀取選配指標
    pub fn extra(&self, key: &str) -> Option<f64> {
        self.extras.get(key).copied()
    }
}

/// 任務執行狀態
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// 執行成功
    Success,
    /// 執行失敗
    Failed,
}

/// 單一任務的執行結果
///
/// 由 worker 建立一次、不再變更，經整併器消費。
/// 不變量：status 決定 payload 形狀，成功必有 metrics、失敗必有 error。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobResult {
    /// 任務ID
    pub job_id: String,
    /// 批次ID
    pub batch_id: String,
    /// 商品代碼
    pub symbol: String,
    /// 策略名稱
    pub strategy: String,
    /// 執行狀態
    pub status: JobStatus,
    /// 績效指標（成功時存在）
    pub metrics: Option<StrategyMetrics>,
    /// 錯誤訊息（失敗時存在）
    pub error: Option<String>,
    /// 執行完成時間
    pub executed_at: DateTime<Utc>,
    /// 執行耗時（秒）
    pub execution_secs: f64,
}

impl JobResult {
    /// 建立成功結果
    pub fn success(job: &BacktestJob, metrics: StrategyMetrics, execution_secs: f64) -> Self {
        Self {
            job_id: job.job_id.clone(),
            batch_id: job.batch_id.clone(),
            symbol: job.symbol.clone(),
            strategy: job.strategy_name(),
            status: JobStatus::Success,
            metrics: Some(metrics),
            error: None,
            executed_at: Utc::now(),
            execution_secs,
        }
    }

    /// 建立失敗結果
    pub fn failure(job: &BacktestJob, error: impl Into<String>, execution_secs: f64) -> Self {
        Self {
            job_id: job.job_id.clone(),
            batch_id: job.batch_id.clone(),
            symbol: job.symbol.clone(),
            strategy: job.strategy_name(),
            status: JobStatus::Failed,
            metrics: None,
            error: Some(error.into()),
            executed_at: Utc::now(),
            execution_secs,
        }
    }

    /// 是否為成功結果
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}

/// 失敗任務紀錄：原任務與失敗原因成對保留
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FailedJob {
    /// 原始任務
    pub job: BacktestJob,
    /// 失敗原因
    pub error: String,
}

/// 批次執行的合併結果
///
/// successes 與 failures 構成輸入任務集的完整、無重複分割；
/// 排程不保證任務間順序，結果僅能以 job_id 歸屬。
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// 批次ID
    pub batch_id: String,
    /// 成功結果
    pub successes: Vec<JobResult>,
    /// 失敗任務與原因
    pub failures: Vec<FailedJob>,
    /// 批次總耗時（秒）
    pub elapsed_secs: f64,
}

impl BatchOutcome {
    /// 建立空批次結果
    pub fn empty(batch_id: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            ..Default::default()
        }
    }

    /// 已分類的結果總數
    pub fn total(&self) -> usize {
        self.successes.len() + self.failures.len()
    }

    /// 成功率；空批次視為 1.0（無事可敗）
    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            return 1.0;
        }
        self.successes.len() as f64 / self.total() as f64
    }

    /// 失敗任務的 ID 與原因清單（供呼叫端逐一檢視）
    pub fn failed_jobs_with_reasons(&self) -> Vec<(&str, &str)> {
        self.failures
            .iter()
            .map(|f| (f.job.job_id.as_str(), f.error.as_str()))
            .collect()
    }

    /// 合併結果的單行摘要
    pub fn summary_line(&self) -> String {
        format!(
            "批次 {} 完成: {} 成功 / {} 失敗 (成功率 {:.1}%)",
            self.batch_id,
            self.successes.len(),
            self.failures.len(),
            self.success_rate() * 100.0
        )
    }
}
