//! 研究管線
//!
//! 把批次回測、結果整併、排名、相關性分析串成單一入口：
//! 執行 -> 整併 -> 就緒檢查 -> 排名 -> 相關性 -> 分散選擇 -> 持久化。
//! 引擎對成功率只警告；是否中止由這裡依最低成功率門檻決定。

use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::backtest::{
    BatchEngine, BatchOutcome, EngineError, JobBatch, StrategyExecutor,
};
use crate::config::ApplicationConfig;
use crate::consolidate::{
    collect_return_history, consolidate, validate_for_ranking, ConsolidateError, ReadinessReport,
    ResultsTable, ReturnHistory,
};
use crate::correlation::{CorrelationAnalyzer, CorrelationError, CorrelationMatrix};
use crate::ranking::{
    summarize, RankingError, RankingSummary, RankingTable, StrategyRanker,
};
use crate::store::{ResultRepository, StoreError};

/// 管線錯誤
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 批次結構不合法
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// 批次成功率低於可接受下限
    #[error("批次成功率 {actual:.1}% 低於最低要求 {required:.1}%")]
    SuccessRateBelowMinimum { actual: f64, required: f64 },

    /// 整併表缺少排名必要欄位
    #[error(transparent)]
    Consolidate(#[from] ConsolidateError),

    /// 排名失敗
    #[error(transparent)]
    Ranking(#[from] RankingError),

    /// 相關性分析失敗
    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    /// 結果持久化失敗
    #[error("結果持久化失敗: {0}")]
    Store(#[from] StoreError),
}

/// 管線結果類型
pub type PipelineResult<T> = Result<T, PipelineError>;

/// 單次管線執行的完整產出
pub struct PipelineReport {
    /// 批次執行結果
    pub outcome: BatchOutcome,
    /// 整併後的指標表
    pub table: ResultsTable,
    /// 就緒檢查報告
    pub readiness: ReadinessReport,
    /// 完整排名表
    pub rankings: RankingTable,
    /// 剔除過度相關後的排名表
    pub filtered: RankingTable,
    /// 相關性矩陣
    pub matrix: CorrelationMatrix,
    /// 相關性群集
    pub clusters: Vec<Vec<String>>,
    /// 分散選擇的入選策略鍵
    pub selected: Vec<String>,
    /// 入選組合的分散化分數
    pub diversification_score: f64,
    /// 分數分佈摘要
    pub summary: RankingSummary,
}

impl PipelineReport {
    /// 多行文字報告（CLI 輸出用）
    pub fn format_report(&self, top_n: usize) -> String {
        let mut lines = Vec::new();
        lines.push(self.outcome.summary_line());
        lines.push(format!(
            "整併表: {} 列 ({} 個策略, {} 個商品)",
            self.readiness.total_rows,
            self.readiness.unique_strategies,
            self.readiness.unique_symbols
        ));
        lines.push(self.summary.format_summary());
        lines.push(format!(
            "相關性: {} 階矩陣, {} 個群集, 過濾後剩 {} 列",
            self.matrix.len(),
            self.clusters.len(),
            self.filtered.height()
        ));
        lines.push(format!(
            "分散選擇 (上限 {}): {} 檔, 分散化分數 {:.3}",
            top_n.max(self.selected.len()),
            self.selected.len(),
            self.diversification_score
        ));
        for (i, key) in self.selected.iter().enumerate() {
            lines.push(format!("  {}. {}", i + 1, key));
        }
        lines.join("\n")
    }
}

/// 研究管線
pub struct ResearchPipeline {
    engine: BatchEngine,
    ranker: StrategyRanker,
    analyzer: CorrelationAnalyzer,
    store: Option<Arc<dyn ResultRepository>>,
    max_selections: usize,
    min_success_rate: f64,
}

impl ResearchPipeline {
    /// 以應用配置與策略執行器組裝管線
    ///
    /// 權重與相關性設定在這裡一次驗證完；之後的 run 不會再因
    /// 設定問題中途失敗。
    pub fn from_config(
        config: &ApplicationConfig,
        executor: Arc<dyn StrategyExecutor>,
    ) -> PipelineResult<Self> {
        let engine_config = config.engine.to_engine_config();
        let min_success_rate = engine_config.min_success_rate;
        let engine = BatchEngine::new(engine_config, executor);

        let ranker = StrategyRanker::new(
            config.ranking.to_weights(),
            config.ranking.to_score_config(),
        )?;
        let analyzer = CorrelationAnalyzer::new(config.correlation.to_correlation_config()?)?;

        Ok(Self {
            engine,
            ranker,
            analyzer,
            store: None,
            max_selections: config.correlation.max_selections as usize,
            min_success_rate,
        })
    }

    /// 以預設配置組裝管線
    pub fn with_defaults(executor: Arc<dyn StrategyExecutor>) -> Self {
        Self {
            engine: BatchEngine::new(Default::default(), executor),
            ranker: StrategyRanker::with_defaults(),
            analyzer: CorrelationAnalyzer::with_defaults(),
            store: None,
            max_selections: 10,
            min_success_rate: 0.5,
        }
    }

    /// 掛上批次結果儲存庫
    pub fn with_store(mut self, store: Arc<dyn ResultRepository>) -> Self {
        self.store = Some(store);
        self
    }

    /// 覆寫分散選擇上限
    pub fn with_max_selections(mut self, max_selections: usize) -> Self {
        self.max_selections = max_selections;
        self
    }

    /// 執行完整管線
    ///
    /// 批次結果先持久化再套用成功率門檻，低於門檻時中止但
    /// 失敗紀錄仍可事後檢視。空批次視為通過（成功率 1.0）。
    pub async fn run(&self, batch: JobBatch) -> PipelineResult<PipelineReport> {
        let outcome = self.engine.run(batch).await?;

        if let Some(store) = &self.store {
            store.save_outcome(&outcome).await?;
        }

        let success_rate = outcome.success_rate();
        if success_rate < self.min_success_rate {
            return Err(PipelineError::SuccessRateBelowMinimum {
                actual: success_rate * 100.0,
                required: self.min_success_rate * 100.0,
            });
        }

        let history = collect_return_history(&outcome.successes);
        self.analyze_outcome(outcome, history)
    }

    /// 對既有批次結果重跑分析段（不重新執行回測）
    pub fn analyze_outcome(
        &self,
        outcome: BatchOutcome,
        history: ReturnHistory,
    ) -> PipelineResult<PipelineReport> {
        let table = consolidate(&outcome.successes)?;
        let readiness = validate_for_ranking(&table)?;
        if !readiness.is_clean() {
            warn!("整併表含無效值:\n{}", readiness.format_report());
        }

        let rankings = self.ranker.rank(&table, &history)?;
        let summary = summarize(&rankings)?;

        let matrix = self.analyzer.correlation_matrix(&rankings, &history)?;
        let clusters = self.analyzer.find_clusters(&matrix);
        let filtered = self.analyzer.filter_correlated(&rankings, &matrix)?;
        let selected =
            self.analyzer
                .greedy_diversity_selection(&filtered, &matrix, self.max_selections)?;
        let diversification_score = self.analyzer.diversification_score(&selected, &matrix);

        info!(
            "管線完成: 排名 {} 列, 入選 {} 檔, 分散化 {:.3}",
            rankings.height(),
            selected.len(),
            diversification_score
        );

        Ok(PipelineReport {
            outcome,
            table,
            readiness,
            rankings,
            filtered,
            matrix,
            clusters,
            selected,
            diversification_score,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{demo_batch, SyntheticExecutor};

    #[tokio::test]
    async fn test_pipeline_end_to_end() {
        let executor = Arc::new(SyntheticExecutor::new(7));
        let pipeline = ResearchPipeline::with_defaults(executor);

        let batch = demo_batch("batch-pipeline", 12).unwrap();
        let report = pipeline.run(batch).await.unwrap();
        assert_eq!(report.outcome.total(), 12);
        assert_eq!(report.rankings.height(), report.outcome.successes.len());
        assert!(report.selected.len() <= 10);
        assert!(!report.format_report(10).is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_rejects_low_success_rate() {
        let executor = Arc::new(SyntheticExecutor::new(11).with_failure_rate(1.0));
        let pipeline = ResearchPipeline::with_defaults(executor);

        let batch = demo_batch("batch-allfail", 8).unwrap();
        let err = pipeline.run(batch).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::SuccessRateBelowMinimum { actual, .. } if actual < 1.0
        ));
    }

    #[tokio::test]
    async fn test_pipeline_empty_batch_is_soft() {
        let executor = Arc::new(SyntheticExecutor::new(3));
        let pipeline = ResearchPipeline::with_defaults(executor);

        let report = pipeline
            .run(JobBatch::new("batch-empty", Vec::new()).unwrap())
            .await
            .unwrap();
        assert_eq!(report.outcome.total(), 0);
        assert!(report.rankings.is_empty());
        assert!(report.selected.is_empty());
        assert_eq!(report.diversification_score, 0.0);
    }
}
