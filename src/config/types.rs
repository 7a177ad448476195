use crate::config::validation::{ValidationError, ValidationUtils, Validator};
use serde::{Deserialize, Serialize};

use crate::backtest::EngineConfig;
use crate::correlation::{CorrelationConfig, CorrelationMethod, CorrelationResult};
use crate::ranking::{RankWeights, ScoreConfig};

/// 應用程序配置結構
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub ranking: RankingSettings,
    #[serde(default)]
    pub correlation: CorrelationSettings,
    #[serde(default)]
    pub store: StoreSettings,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            engine: EngineSettings::default(),
            ranking: RankingSettings::default(),
            correlation: CorrelationSettings::default(),
            store: StoreSettings::default(),
        }
    }
}

impl Validator for ApplicationConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        // 驗證各個部分的配置
        self.log.validate()?;
        self.engine.validate()?;
        self.ranking.validate()?;
        self.correlation.validate()?;
        self.store.validate()?;

        Ok(())
    }
}

/// 日誌配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Validator for LogConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        // 驗證日誌級別
        ValidationUtils::one_of(
            &self.level.to_lowercase(),
            &["trace", "debug", "info", "warn", "error"]
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<String>>(),
            "log.level",
        )?;

        // 驗證日誌格式
        ValidationUtils::one_of(
            &self.format.to_lowercase(),
            &["pretty", "json"]
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<String>>(),
            "log.format",
        )?;

        Ok(())
    }
}

/// 回測引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// 平行 worker 數上限（實際數取與 CPU 核心數的較小者）
    pub max_workers: u32,
    /// 單任務超時秒數；0 表示不設超時
    pub job_timeout_secs: u64,
    /// 進度回報間隔（秒）
    pub progress_interval_secs: u64,
    /// 批次最低可接受成功率
    pub min_success_rate: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_workers: num_cpus::get() as u32,
            job_timeout_secs: 300,
            progress_interval_secs: 5,
            min_success_rate: 0.5,
        }
    }
}

impl Validator for EngineSettings {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::in_range(self.max_workers, 1, 256, "engine.max_workers")?;
        ValidationUtils::fraction(self.min_success_rate, "engine.min_success_rate")?;

        Ok(())
    }
}

impl EngineSettings {
    /// 轉為引擎執行配置
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig::default()
            .with_max_workers(self.max_workers as usize)
            .with_job_timeout_secs(self.job_timeout_secs)
            .with_progress_interval_secs(self.progress_interval_secs)
            .with_min_success_rate(self.min_success_rate)
    }
}

/// 排名配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingSettings {
    /// 夏普比率權重
    pub weight_sharpe: f64,
    /// 一致性權重
    pub weight_consistency: f64,
    /// 回撤權重
    pub weight_drawdown: f64,
    /// 交易頻率權重
    pub weight_frequency: f64,
    /// 獲利效率權重
    pub weight_efficiency: f64,
    /// 頻率評分的理想交易次數
    pub optimal_trades: f64,
    /// 一致性評分的滾動視窗長度
    pub rolling_window: u32,
    /// 報表顯示的前 N 名
    pub top_n: u32,
}

impl Default for RankingSettings {
    fn default() -> Self {
        let weights = RankWeights::default();
        Self {
            weight_sharpe: weights.sharpe,
            weight_consistency: weights.consistency,
            weight_drawdown: weights.drawdown,
            weight_frequency: weights.frequency,
            weight_efficiency: weights.efficiency,
            optimal_trades: 100.0,
            rolling_window: 20,
            top_n: 10,
        }
    }
}

impl Validator for RankingSettings {
    fn validate(&self) -> Result<(), ValidationError> {
        for (value, field) in [
            (self.weight_sharpe, "ranking.weight_sharpe"),
            (self.weight_consistency, "ranking.weight_consistency"),
            (self.weight_drawdown, "ranking.weight_drawdown"),
            (self.weight_frequency, "ranking.weight_frequency"),
            (self.weight_efficiency, "ranking.weight_efficiency"),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ValidationError::InvalidValue(format!(
                    "{field} 的值 {value} 必須為非負有限數"
                )));
            }
        }
        ValidationUtils::in_range(self.optimal_trades, 1.0, 1_000_000.0, "ranking.optimal_trades")?;
        ValidationUtils::in_range(self.rolling_window, 2, 10_000, "ranking.rolling_window")?;
        ValidationUtils::in_range(self.top_n, 1, 10_000, "ranking.top_n")?;

        Ok(())
    }
}

impl RankingSettings {
    /// 轉為排名權重
    pub fn to_weights(&self) -> RankWeights {
        RankWeights {
            sharpe: self.weight_sharpe,
            consistency: self.weight_consistency,
            drawdown: self.weight_drawdown,
            frequency: self.weight_frequency,
            efficiency: self.weight_efficiency,
        }
    }

    /// 轉為評分配置
    pub fn to_score_config(&self) -> ScoreConfig {
        ScoreConfig {
            optimal_trades: self.optimal_trades,
            rolling_window: self.rolling_window as usize,
            ..ScoreConfig::default()
        }
    }
}

/// 相關性分析配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationSettings {
    /// 相關性方法名稱（pearson | spearman | kendall）
    pub method: String,
    /// 剔除門檻
    pub threshold: f64,
    /// 成對最少觀測數
    pub min_periods: u32,
    /// 分群門檻
    pub cluster_threshold: f64,
    /// 分散選擇的入選上限
    pub max_selections: u32,
}

impl Default for CorrelationSettings {
    fn default() -> Self {
        Self {
            method: "pearson".to_string(),
            threshold: 0.7,
            min_periods: 30,
            cluster_threshold: 0.7,
            max_selections: 10,
        }
    }
}

impl Validator for CorrelationSettings {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::one_of(
            &self.method.to_lowercase(),
            &["pearson", "spearman", "kendall"]
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<String>>(),
            "correlation.method",
        )?;
        ValidationUtils::fraction(self.threshold, "correlation.threshold")?;
        ValidationUtils::fraction(self.cluster_threshold, "correlation.cluster_threshold")?;
        ValidationUtils::in_range(self.min_periods, 2, 100_000, "correlation.min_periods")?;
        ValidationUtils::in_range(self.max_selections, 1, 10_000, "correlation.max_selections")?;

        Ok(())
    }
}

impl CorrelationSettings {
    /// 轉為分析器配置；方法名稱不合法時回傳 InvalidMethod
    pub fn to_correlation_config(&self) -> CorrelationResult<CorrelationConfig> {
        let method: CorrelationMethod = self.method.parse()?;
        Ok(CorrelationConfig {
            method,
            threshold: self.threshold,
            min_periods: self.min_periods as usize,
            cluster_threshold: self.cluster_threshold,
        })
    }
}

/// 結果儲存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// 批次結果根目錄
    pub results_dir: String,
    /// 表格匯出目錄
    pub export_dir: String,
    /// 內存快取容量
    pub cache_capacity: u64,
    /// 內存快取存活秒數
    pub cache_ttl_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            results_dir: "data/results".to_string(),
            export_dir: "data/exports".to_string(),
            cache_capacity: 256,
            cache_ttl_secs: 300,
        }
    }
}

impl Validator for StoreSettings {
    fn validate(&self) -> Result<(), ValidationError> {
        ValidationUtils::not_empty(&self.results_dir, "store.results_dir")?;
        ValidationUtils::not_empty(&self.export_dir, "store.export_dir")?;
        ValidationUtils::in_range(self.cache_capacity, 1, 1_000_000, "store.cache_capacity")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ApplicationConfig::default().validate().is_ok());
    }

    #[test]
    fn test_engine_settings_rejects_bad_success_rate() {
        let settings = EngineSettings {
            min_success_rate: 1.3,
            ..EngineSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_ranking_settings_to_weights() {
        let settings = RankingSettings {
            weight_sharpe: 50.0,
            weight_consistency: 20.0,
            weight_drawdown: 15.0,
            weight_frequency: 10.0,
            weight_efficiency: 5.0,
            ..RankingSettings::default()
        };
        let weights = settings.to_weights();
        assert_eq!(weights.sharpe, 50.0);
        assert_eq!(weights.total(), 100.0);
    }

    #[test]
    fn test_correlation_settings_method_parse() {
        let settings = CorrelationSettings {
            method: "spearman".to_string(),
            ..CorrelationSettings::default()
        };
        let config = settings.to_correlation_config().unwrap();
        assert_eq!(config.method, CorrelationMethod::Spearman);

        let bad = CorrelationSettings {
            method: "cosine".to_string(),
            ..CorrelationSettings::default()
        };
        assert!(bad.validate().is_err());
        assert!(bad.to_correlation_config().is_err());
    }
}
