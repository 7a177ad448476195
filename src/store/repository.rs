//! 批次結果儲存庫
//!
//! 以 JSON 檔案持久化批次結果，檔名即批次ID。讀取路徑掛一層
//! moka 內存快取，以檔案修改時間判斷快取是否仍然有效。

use async_trait::async_trait;
use moka::future::Cache;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info};

use crate::backtest::BatchOutcome;

/// 儲存層錯誤
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO 錯誤
    #[error("IO 錯誤: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化錯誤
    #[error("JSON 序列化錯誤: {0}")]
    Serde(#[from] serde_json::Error),

    /// 資料框讀寫錯誤
    #[error("資料框讀寫錯誤: {0}")]
    Frame(#[from] polars::prelude::PolarsError),

    /// 搜尋樣式不合法
    #[error("搜尋樣式不合法: {0}")]
    Pattern(#[from] glob::PatternError),

    /// 批次ID不可作為檔名
    #[error("批次ID '{0}' 不可作為檔名")]
    InvalidBatchId(String),
}

/// 儲存層結果類型
pub type StoreResult<T> = Result<T, StoreError>;

/// 批次結果儲存庫特徵
#[async_trait]
pub trait ResultRepository: Send + Sync {
    /// 持久化批次結果，回傳寫入路徑
    async fn save_outcome(&self, outcome: &BatchOutcome) -> StoreResult<PathBuf>;

    /// 讀取批次結果；不存在時回傳 None
    async fn load_outcome(&self, batch_id: &str) -> StoreResult<Option<BatchOutcome>>;

    /// 列出已持久化的批次ID（排序後）
    async fn list_batches(&self) -> StoreResult<Vec<String>>;

    /// 刪除批次結果；回傳是否確實存在
    async fn delete_outcome(&self, batch_id: &str) -> StoreResult<bool>;
}

type CachedOutcome = (Arc<BatchOutcome>, SystemTime);

/// 檔案系統儲存庫實現
pub struct FileResultStore {
    root: PathBuf,
    cache: Cache<String, CachedOutcome>,
}

impl FileResultStore {
    /// 預設快取容量
    pub const DEFAULT_CACHE_CAPACITY: u64 = 256;
    /// 預設快取存活秒數
    pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

    /// 建立儲存庫，掛上內存快取
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_cache(
            root,
            Self::DEFAULT_CACHE_CAPACITY,
            Self::DEFAULT_CACHE_TTL_SECS,
        )
    }

    /// 指定快取容量與 TTL
    pub fn with_cache(root: impl Into<PathBuf>, capacity: u64, ttl_secs: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();
        Self {
            root: root.into(),
            cache,
        }
    }

    /// 儲存根目錄
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 批次結果的檔案路徑
    pub fn outcome_path(&self, batch_id: &str) -> StoreResult<PathBuf> {
        if batch_id.is_empty()
            || batch_id
                .chars()
                .any(|c| matches!(c, '/' | '\\' | '*' | '?' | '[' | ']'))
        {
            return Err(StoreError::InvalidBatchId(batch_id.to_string()));
        }
        Ok(self.root.join(format!("{batch_id}.json")))
    }

    async fn file_mtime(path: &Path) -> StoreResult<Option<SystemTime>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(meta.modified()?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ResultRepository for FileResultStore {
    async fn save_outcome(&self, outcome: &BatchOutcome) -> StoreResult<PathBuf> {
        let path = self.outcome_path(&outcome.batch_id)?;
        tokio::fs::create_dir_all(&self.root).await?;

        let payload = serde_json::to_vec_pretty(outcome)?;
        tokio::fs::write(&path, payload).await?;

        if let Some(mtime) = Self::file_mtime(&path).await? {
            self.cache
                .insert(outcome.batch_id.clone(), (Arc::new(outcome.clone()), mtime))
                .await;
        }
        info!("批次結果已持久化: {} -> {}", outcome.batch_id, path.display());
        Ok(path)
    }

    async fn load_outcome(&self, batch_id: &str) -> StoreResult<Option<BatchOutcome>> {
        let path = self.outcome_path(batch_id)?;
        let Some(mtime) = Self::file_mtime(&path).await? else {
            self.cache.invalidate(batch_id).await;
            return Ok(None);
        };

        if let Some((cached, cached_mtime)) = self.cache.get(batch_id).await {
            if cached_mtime == mtime {
                debug!("批次結果快取命中: {}", batch_id);
                return Ok(Some((*cached).clone()));
            }
            // 檔案已被改寫, 快取作廢
            self.cache.invalidate(batch_id).await;
        }

        let payload = tokio::fs::read(&path).await?;
        let outcome: BatchOutcome = serde_json::from_slice(&payload)?;
        self.cache
            .insert(batch_id.to_string(), (Arc::new(outcome.clone()), mtime))
            .await;
        Ok(Some(outcome))
    }

    async fn list_batches(&self) -> StoreResult<Vec<String>> {
        let pattern = self.root.join("*.json");
        let pattern = pattern.to_string_lossy().to_string();

        let mut batch_ids = Vec::new();
        for entry in glob::glob(&pattern)? {
            let path = match entry {
                Ok(path) => path,
                // 掃描途中被移走的檔案直接略過
                Err(_) => continue,
            };
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                batch_ids.push(stem.to_string());
            }
        }
        batch_ids.sort();
        Ok(batch_ids)
    }

    async fn delete_outcome(&self, batch_id: &str) -> StoreResult<bool> {
        let path = self.outcome_path(batch_id)?;
        self.cache.invalidate(batch_id).await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{BacktestJob, JobResult, StrategyMetrics};
    use chrono::NaiveDate;
    use std::collections::{BTreeMap, HashMap};

    fn sample_outcome(batch_id: &str) -> BatchOutcome {
        let job = BacktestJob {
            job_id: "job-1".to_string(),
            symbol: "2330.TW".to_string(),
            strategy_path: "strategies/momentum_breakout.rs".to_string(),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
            strategy_params: BTreeMap::new(),
            batch_id: batch_id.to_string(),
        };
        let mut raw = HashMap::new();
        raw.insert("sharpe_ratio".to_string(), 1.3);
        raw.insert("total_return".to_string(), 0.21);
        raw.insert("max_drawdown".to_string(), -0.08);
        raw.insert("win_rate".to_string(), 0.55);
        raw.insert("trade_count".to_string(), 42.0);
        let metrics = StrategyMetrics::from_map(&raw).unwrap();

        let mut outcome = BatchOutcome::empty(batch_id);
        outcome.successes.push(JobResult::success(&job, metrics, 0.5));
        outcome.elapsed_secs = 0.5;
        outcome
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::new(dir.path());

        let outcome = sample_outcome("batch-rt");
        let path = store.save_outcome(&outcome).await.unwrap();
        assert!(path.exists());

        let loaded = store.load_outcome("batch-rt").await.unwrap().unwrap();
        assert_eq!(loaded.batch_id, "batch-rt");
        assert_eq!(loaded.successes.len(), 1);
        assert_eq!(loaded.successes[0].job_id, "job-1");
    }

    #[tokio::test]
    async fn test_load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::new(dir.path());
        assert!(store.load_outcome("no-such-batch").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_batches_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::new(dir.path());

        store.save_outcome(&sample_outcome("zeta")).await.unwrap();
        store.save_outcome(&sample_outcome("alpha")).await.unwrap();

        let batches = store.list_batches().await.unwrap();
        assert_eq!(batches, vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::new(dir.path());

        store.save_outcome(&sample_outcome("gone")).await.unwrap();
        assert!(store.delete_outcome("gone").await.unwrap());
        assert!(!store.delete_outcome("gone").await.unwrap());
        assert!(store.load_outcome("gone").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_like_batch_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResultStore::new(dir.path());
        let err = store.load_outcome("../escape").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidBatchId(_)));
    }
}
