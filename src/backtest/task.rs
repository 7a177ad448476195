use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

/// 任務模型錯誤
#[derive(Debug, Error)]
pub enum TaskError {
    /// 批次內任務 ID 重複
    #[error("批次內任務ID重複: {0}")]
    DuplicateJobId(String),

    /// 任務日期範圍無效
    #[error("任務 {job_id} 日期範圍無效: {start} 晚於 {end}")]
    InvalidDateRange {
        job_id: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    /// 任務檔案讀寫失敗
    #[error("任務檔案讀寫失敗: {0}")]
    Io(#[from] std::io::Error),

    /// 任務 JSON 解析失敗
    #[error("任務JSON解析失敗: {0}")]
    Json(#[from] serde_json::Error),
}

/// 任務模組結果類型
pub type TaskResult<T> = Result<T, TaskError>;

/// 策略參數值
///
/// 策略是異質且可擴展的，參數以開放的字串鍵值映射表示，
/// 在策略消費參數的邊界處才做鍵名驗證。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// 整數參數
    Int(i64),
    /// 浮點參數
    Float(f64),
    /// 布林參數
    Bool(bool),
    /// 字串參數
    String(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::String(v) => write!(f, "{}", v),
        }
    }
}

impl ParamValue {
    /// 以浮點數讀取參數值（整數自動升格）
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// 回測任務
///
/// 一個 (策略, 商品, 參數集, 日期區間) 組合的不可變描述，
/// 由批次產生步驟建立，恰好被一個 worker 消費一次。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BacktestJob {
    /// 任務ID（批次內唯一）
    pub job_id: String,
    /// 商品代碼
    pub symbol: String,
    /// 策略路徑或名稱
    pub strategy_path: String,
    /// 回測開始日期
    pub start_date: NaiveDate,
    /// 回測結束日期
    pub end_date: NaiveDate,
    /// 策略參數覆寫（BTreeMap 保證序列化順序確定）
    #[serde(default)]
    pub strategy_params: BTreeMap<String, ParamValue>,
    /// 批次ID
    pub batch_id: String,
}

impl BacktestJob {
    /// 由策略路徑取出策略名稱（檔名去副檔名）
    pub fn strategy_name(&self) -> String {
        Path::new(&self.strategy_path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.strategy_path.clone())
    }

    /// 參數集的確定性摘要（SHA-256 前 8 bytes 十六進位）
    ///
    /// 用於結果檔命名與快取鍵；相同參數集必得相同摘要。
    pub fn params_digest(&self) -> String {
        let canonical =
            serde_json::to_vec(&self.strategy_params).unwrap_or_else(|_| Vec::new());
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        let digest = hasher.finalize();
        hex::encode(&digest[..8])
    }

    /// 驗證單一任務的結構不變量
    pub fn validate(&self) -> TaskResult<()> {
        if self.start_date > self.end_date {
            return Err(TaskError::InvalidDateRange {
                job_id: self.job_id.clone(),
                start: self.start_date,
                end: self.end_date,
            });
        }
        Ok(())
    }
}

/// 任務批次
///
/// 一組同時提交、共享 batch_id 的任務。不變量：任務 ID 在批次內唯一。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobBatch {
    /// 批次ID
    pub batch_id: String,
    /// 批次內的任務
    pub jobs: Vec<BacktestJob>,
}

impl JobBatch {
    /// 建立批次並驗證不變量
    pub fn new(batch_id: impl Into<String>, jobs: Vec<BacktestJob>) -> TaskResult<Self> {
        let batch = Self {
            batch_id: batch_id.into(),
            jobs,
        };
        batch.validate()?;
        Ok(batch)
    }

    /// 由任務清單建立批次
    ///
    /// 批次 ID 取第一個任務攜帶的 batch_id；任務清單為空時改用隨機 UUID。
    pub fn from_jobs(jobs: Vec<BacktestJob>) -> TaskResult<Self> {
        let batch_id = jobs
            .first()
            .map(|j| j.batch_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self::new(batch_id, jobs)
    }

    /// 批次內任務數
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// 批次是否為空
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// 驗證批次不變量：任務 ID 唯一、日期範圍合法
    pub fn validate(&self) -> TaskResult<()> {
        let mut seen = HashSet::with_capacity(self.jobs.len());
        for job in &self.jobs {
            if !seen.insert(job.job_id.as_str()) {
                return Err(TaskError::DuplicateJobId(job.job_id.clone()));
            }
            job.validate()?;
        }
        Ok(())
    }

    /// 從 JSON 檔載入批次
    ///
    /// 接受兩種形狀：完整的批次物件，或裸任務陣列（批次 ID 由任務推導）。
    pub fn from_json_file(path: impl AsRef<Path>) -> TaskResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// 從 JSON 字串載入批次
    pub fn from_json_str(content: &str) -> TaskResult<Self> {
        let value: serde_json::Value = serde_json::from_str(content)?;
        let batch = if value.is_array() {
            let jobs: Vec<BacktestJob> = serde_json::from_value(value)?;
            Self::from_jobs(jobs)?
        } else {
            let batch: JobBatch = serde_json::from_value(value)?;
            batch.validate()?;
            batch
        };
        Ok(batch)
    }

    /// 將批次寫入 JSON 檔
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> TaskResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// 示範與整合測試用的合成批次
///
/// 商品、策略與參數按固定輪替產生，確定性且互不重複。
pub fn demo_batch(batch_id: &str, size: usize) -> TaskResult<JobBatch> {
    const SYMBOLS: [&str; 6] = [
        "2330.TW", "2317.TW", "2454.TW", "2412.TW", "2882.TW", "1301.TW",
    ];
    const STRATEGIES: [&str; 4] = [
        "strategies/momentum_breakout.rs",
        "strategies/mean_reversion.rs",
        "strategies/pairs_spread.rs",
        "strategies/volatility_target.rs",
    ];

    let jobs: Vec<BacktestJob> = (0..size)
        .map(|i| {
            let mut params = BTreeMap::new();
            params.insert(
                "lookback".to_string(),
                ParamValue::Int(10 + (i % 5) as i64 * 5),
            );
            params.insert(
                "entry_z".to_string(),
                ParamValue::Float(1.0 + (i % 3) as f64 * 0.5),
            );
            BacktestJob {
                job_id: format!("{batch_id}-job-{i:04}"),
                symbol: SYMBOLS[i % SYMBOLS.len()].to_string(),
                strategy_path: STRATEGIES[i % STRATEGIES.len()].to_string(),
                start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
                strategy_params: params,
                batch_id: batch_id.to_string(),
            }
        })
        .collect();
    JobBatch::new(batch_id, jobs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_job(job_id: &str, symbol: &str) -> BacktestJob {
        let mut params = BTreeMap::new();
        params.insert("fast_period".to_string(), ParamValue::Int(10));
        params.insert("threshold".to_string(), ParamValue::Float(1.5));
        BacktestJob {
            job_id: job_id.to_string(),
            symbol: symbol.to_string(),
            strategy_path: "strategies/momentum_breakout.rs".to_string(),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
            strategy_params: params,
            batch_id: "batch-001".to_string(),
        }
    }

    #[test]
    fn test_batch_rejects_duplicate_job_ids() {
        let jobs = vec![create_test_job("j1", "2330.TW"), create_test_job("j1", "2317.TW")];
        let err = JobBatch::new("batch-001", jobs).unwrap_err();
        assert!(matches!(err, TaskError::DuplicateJobId(id) if id == "j1"));
    }

    #[test]
    fn test_batch_rejects_invalid_date_range() {
        let mut job = create_test_job("j1", "2330.TW");
        job.start_date = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        job.end_date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let err = JobBatch::new("batch-001", vec![job]).unwrap_err();
        assert!(matches!(err, TaskError::InvalidDateRange { .. }));
    }

    #[test]
    fn test_params_digest_is_deterministic() {
        let job_a = create_test_job("j1", "2330.TW");
        let mut job_b = create_test_job("j2", "2330.TW");
        // BTreeMap 保證插入順序不影響序列化
        job_b.strategy_params.clear();
        job_b
            .strategy_params
            .insert("threshold".to_string(), ParamValue::Float(1.5));
        job_b
            .strategy_params
            .insert("fast_period".to_string(), ParamValue::Int(10));
        assert_eq!(job_a.params_digest(), job_b.params_digest());
        assert_eq!(job_a.params_digest().len(), 16);
    }

    #[test]
    fn test_strategy_name_from_path() {
        let job = create_test_job("j1", "2330.TW");
        assert_eq!(job.strategy_name(), "momentum_breakout");
    }

    #[test]
    fn test_param_value_untagged_deserialization() {
        let raw = r#"{"fast": 10, "ratio": 0.5, "enabled": true, "mode": "close"}"#;
        let params: BTreeMap<String, ParamValue> = serde_json::from_str(raw).unwrap();
        assert_eq!(params["fast"], ParamValue::Int(10));
        assert_eq!(params["ratio"], ParamValue::Float(0.5));
        assert_eq!(params["enabled"], ParamValue::Bool(true));
        assert_eq!(params["mode"], ParamValue::String("close".to_string()));
    }

    #[test]
    fn test_batch_from_bare_job_array() {
        let raw = serde_json::to_string(&vec![
            create_test_job("j1", "2330.TW"),
            create_test_job("j2", "2317.TW"),
        ])
        .unwrap();
        let batch = JobBatch::from_json_str(&raw).unwrap();
        assert_eq!(batch.batch_id, "batch-001");
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_batch_json_round_trip() {
        let batch =
            JobBatch::new("batch-001", vec![create_test_job("j1", "2330.TW")]).unwrap();
        let json = serde_json::to_string(&batch).unwrap();
        let restored = JobBatch::from_json_str(&json).unwrap();
        assert_eq!(restored.batch_id, batch.batch_id);
        assert_eq!(restored.jobs[0].job_id, "j1");
        assert_eq!(restored.jobs[0].strategy_params, batch.jobs[0].strategy_params);
    }
}
