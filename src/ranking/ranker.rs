//! 加權綜合排名
//!
//! 對整併表計算五個子分數的加權綜合分數並給出全序：
//! 綜合分數遞減、名次 1..N 連續無缺口、同分以先見列優先。

use polars::prelude::*;
use std::cmp::Ordering;
use thiserror::Error;
use tracing::{debug, warn};

use crate::consolidate::{
    validate_for_ranking, ConsolidateError, MetricColumn, ResultsTable, ReturnHistory,
};

use super::scores::{
    consistency_scores, frequency_scores, inverted_min_max_scores, min_max_scores, ScoreConfig,
};

/// 排名錯誤
#[derive(Debug, Error)]
pub enum RankingError {
    /// 權重設定不合法
    #[error("排名權重不合法: {0}")]
    InvalidWeights(String),

    /// 整併表未通過就緒檢查
    #[error(transparent)]
    NotReady(#[from] ConsolidateError),

    /// 資料框操作失敗
    #[error("資料框操作失敗: {0}")]
    Frame(#[from] PolarsError),
}

/// 排名模組結果類型
pub type RankingResult<T> = Result<T, RankingError>;

/// 排名表欄名定義
pub struct RankColumn;

impl RankColumn {
    pub const SHARPE_SCORE: &'static str = "sharpe_score";
    pub const CONSISTENCY_SCORE: &'static str = "consistency_score";
    pub const DRAWDOWN_SCORE: &'static str = "drawdown_score";
    pub const FREQUENCY_SCORE: &'static str = "frequency_score";
    pub const EFFICIENCY_SCORE: &'static str = "efficiency_score";
    pub const COMPOSITE_SCORE: &'static str = "composite_score";
    pub const RANK: &'static str = "rank";
}

/// 子分數百分比權重
///
/// 慣例上五項權重和為 100（預設 40/20/20/10/10），但綜合分數
/// 不假設總和恰為 100；權重健全性由呼叫端負責，偏離只發警告。
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RankWeights {
    /// 風險調整報酬（夏普）權重
    pub sharpe: f64,
    /// 報酬一致性權重
    pub consistency: f64,
    /// 回撤控制權重
    pub drawdown: f64,
    /// 交易頻率權重
    pub frequency: f64,
    /// 資金效率權重
    pub efficiency: f64,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self {
            sharpe: 40.0,
            consistency: 20.0,
            drawdown: 20.0,
            frequency: 10.0,
            efficiency: 10.0,
        }
    }
}

impl RankWeights {
    /// 權重總和
    pub fn total(&self) -> f64 {
        self.sharpe + self.consistency + self.drawdown + self.frequency + self.efficiency
    }

    /// 驗證權重：不得為負、不得全零；總和偏離 100 只警告不拒絕
    pub fn validate(&self) -> RankingResult<()> {
        let entries = [
            ("sharpe", self.sharpe),
            ("consistency", self.consistency),
            ("drawdown", self.drawdown),
            ("frequency", self.frequency),
            ("efficiency", self.efficiency),
        ];
        for (name, value) in entries {
            if !value.is_finite() || value < 0.0 {
                return Err(RankingError::InvalidWeights(format!(
                    "{} 權重不合法: {}",
                    name, value
                )));
            }
        }
        if self.total() <= 0.0 {
            return Err(RankingError::InvalidWeights("權重不得全為零".to_string()));
        }
        if (self.total() - 100.0).abs() > 1e-9 {
            warn!("排名權重總和為 {:.2}, 偏離慣例值 100", self.total());
        }
        Ok(())
    }
}

/// 排名表（依名次排序的 polars DataFrame 包裝）
#[derive(Clone, Debug)]
pub struct RankingTable {
    df: DataFrame,
}

impl RankingTable {
    /// 包裝既有的資料框（例如自 CSV 重新載入）
    pub fn from_dataframe(df: DataFrame) -> Self {
        Self { df }
    }

    /// 底層資料框
    pub fn frame(&self) -> &DataFrame {
        &self.df
    }

    /// 取出底層資料框
    pub fn into_frame(self) -> DataFrame {
        self.df
    }

    /// 列數
    pub fn height(&self) -> usize {
        self.df.height()
    }

    /// 是否為空表
    pub fn is_empty(&self) -> bool {
        self.df.height() == 0
    }

    /// 名次最前的 n 列；n 超過列數時回傳全表
    pub fn top_n(&self, n: usize) -> RankingTable {
        RankingTable {
            df: self.df.head(Some(n)),
        }
    }

    /// 綜合分數欄（依列順序）
    pub fn composite_scores(&self) -> RankingResult<Vec<f64>> {
        let casted = self
            .df
            .column(RankColumn::COMPOSITE_SCORE)?
            .cast(&DataType::Float64)?;
        let ca = casted.f64()?;
        Ok(ca.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }

    /// 名次欄（依列順序）
    pub fn ranks(&self) -> RankingResult<Vec<u32>> {
        let casted = self.df.column(RankColumn::RANK)?.cast(&DataType::UInt32)?;
        let ca = casted.u32()?;
        Ok(ca.iter().map(|v| v.unwrap_or(0)).collect())
    }

    /// 全表列鍵（依名次順序）
    pub fn row_keys(&self) -> RankingResult<Vec<String>> {
        let table = ResultsTable::from_dataframe(self.df.clone());
        Ok(table.row_keys()?)
    }

    /// 名次第一的 (策略, 商品)
    pub fn top_identity(&self) -> RankingResult<Option<(String, String)>> {
        if self.is_empty() {
            return Ok(None);
        }
        let table = ResultsTable::from_dataframe(self.df.clone());
        let strategies = table.str_values(MetricColumn::STRATEGY)?;
        let symbols = table.str_values(MetricColumn::SYMBOL)?;
        Ok(strategies
            .into_iter()
            .next()
            .zip(symbols.into_iter().next()))
    }

    /// 排名摘要
    pub fn summary(&self) -> RankingResult<super::summary::RankingSummary> {
        super::summary::summarize(self)
    }
}

/// 策略排名器
pub struct StrategyRanker {
    weights: RankWeights,
    score_config: ScoreConfig,
}

impl StrategyRanker {
    /// 以權重與評分設定建立排名器；權重不合法時建構即失敗
    pub fn new(weights: RankWeights, score_config: ScoreConfig) -> RankingResult<Self> {
        weights.validate()?;
        Ok(Self {
            weights,
            score_config,
        })
    }

    /// 以預設權重（40/20/20/10/10）建立排名器
    pub fn with_defaults() -> Self {
        Self {
            weights: RankWeights::default(),
            score_config: ScoreConfig::default(),
        }
    }

    /// 排名權重
    pub fn weights(&self) -> &RankWeights {
        &self.weights
    }

    /// 對整併表計算排名
    ///
    /// 就緒檢查失敗（結構缺欄）時以 `NotReady` 拒絕；
    /// 空表是軟性情況，回傳零列、欄位齊全的排名表。
    pub fn rank(
        &self,
        table: &ResultsTable,
        history: &ReturnHistory,
    ) -> RankingResult<RankingTable> {
        let report = validate_for_ranking(table)?;
        if !report.is_clean() {
            debug!("就緒檢查發現無效值:\n{}", report.format_report());
        }

        let sharpe = table.numeric_values(MetricColumn::SHARPE_RATIO)?;
        let drawdown = table.numeric_values(MetricColumn::MAX_DRAWDOWN)?;
        let trades = table.numeric_values(MetricColumn::TOTAL_TRADES)?;
        let keys = table.row_keys()?;
        // profit_factor 欄可在外部表缺席，缺席時以中性值參與效率評分
        let profit_factor = if table.has_column(MetricColumn::PROFIT_FACTOR) {
            table.numeric_values(MetricColumn::PROFIT_FACTOR)?
        } else {
            vec![MetricColumn::neutral_default(MetricColumn::PROFIT_FACTOR); table.height()]
        };

        let neutral = self.score_config.neutral_score;
        let sharpe_scores = min_max_scores(&sharpe, neutral);
        let drawdown_scores = inverted_min_max_scores(&drawdown, neutral);
        let frequency_scores_v =
            frequency_scores(&trades, self.score_config.optimal_trades, neutral);
        let efficiency_scores = min_max_scores(&profit_factor, neutral);
        let consistency_scores_v = consistency_scores(&keys, history, &self.score_config);

        let n = table.height();
        let mut composite = Vec::with_capacity(n);
        for i in 0..n {
            let score = sharpe_scores[i] * self.weights.sharpe / 100.0
                + consistency_scores_v[i] * self.weights.consistency / 100.0
                + drawdown_scores[i] * self.weights.drawdown / 100.0
                + frequency_scores_v[i] * self.weights.frequency / 100.0
                + efficiency_scores[i] * self.weights.efficiency / 100.0;
            composite.push(score);
        }

        // 綜合分數遞減排序；stable sort 保證同分時先見列名次在前
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            composite[b]
                .partial_cmp(&composite[a])
                .unwrap_or(Ordering::Equal)
        });

        let reorder = |values: &[f64]| -> Vec<f64> {
            order.iter().map(|&i| values[i]).collect()
        };
        let indices: IdxCa = IdxCa::from_vec(
            "idx".into(),
            order.iter().map(|&i| i as IdxSize).collect(),
        );

        let mut df = table.frame().take(&indices)?;
        df.with_column(Column::new(
            RankColumn::SHARPE_SCORE.into(),
            reorder(&sharpe_scores),
        ))?;
        df.with_column(Column::new(
            RankColumn::CONSISTENCY_SCORE.into(),
            reorder(&consistency_scores_v),
        ))?;
        df.with_column(Column::new(
            RankColumn::DRAWDOWN_SCORE.into(),
            reorder(&drawdown_scores),
        ))?;
        df.with_column(Column::new(
            RankColumn::FREQUENCY_SCORE.into(),
            reorder(&frequency_scores_v),
        ))?;
        df.with_column(Column::new(
            RankColumn::EFFICIENCY_SCORE.into(),
            reorder(&efficiency_scores),
        ))?;
        df.with_column(Column::new(
            RankColumn::COMPOSITE_SCORE.into(),
            reorder(&composite),
        ))?;
        let ranks: Vec<u32> = (1..=n as u32).collect();
        df.with_column(Column::new(RankColumn::RANK.into(), ranks))?;

        debug!("排名完成: {} 列", n);
        Ok(RankingTable::from_dataframe(df))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::results::{JobResult, StrategyMetrics};
    use crate::backtest::task::BacktestJob;
    use crate::consolidate::consolidate;
    use chrono::NaiveDate;
    use std::collections::{BTreeMap, HashMap};

    fn success(job_id: &str, symbol: &str, strategy: &str, sharpe: f64) -> JobResult {
        let job = BacktestJob {
            job_id: job_id.to_string(),
            symbol: symbol.to_string(),
            strategy_path: format!("strategies/{}.rs", strategy),
            start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
            strategy_params: BTreeMap::new(),
            batch_id: "batch-test".to_string(),
        };
        let metrics = StrategyMetrics {
            sharpe_ratio: sharpe,
            total_return: 0.2,
            max_drawdown: -0.1,
            win_rate: 0.55,
            trade_count: 40,
            extras: HashMap::new(),
            returns: Vec::new(),
        };
        JobResult::success(&job, metrics, 0.4)
    }

    fn four_strategy_table() -> ResultsTable {
        // 夏普 [1.5, 2.1, 0.8, 1.9], 其他指標全同
        let results = vec![
            success("j1", "AAA", "s1", 1.5),
            success("j2", "BBB", "s2", 2.1),
            success("j3", "CCC", "s3", 0.8),
            success("j4", "DDD", "s4", 1.9),
        ];
        consolidate(&results).unwrap()
    }

    #[test]
    fn test_rank_orders_by_sharpe_when_others_tie() {
        let ranker = StrategyRanker::with_defaults();
        let ranking = ranker
            .rank(&four_strategy_table(), &ReturnHistory::new())
            .unwrap();

        let table = ResultsTable::from_dataframe(ranking.frame().clone());
        let strategies = table.str_values(MetricColumn::STRATEGY).unwrap();
        assert_eq!(strategies[0], "s2"); // 夏普 2.1 者居首

        let sharpe_scores = table.numeric_values(RankColumn::SHARPE_SCORE).unwrap();
        assert_eq!(sharpe_scores[0], 100.0);
        assert_eq!(sharpe_scores[3], 0.0); // 夏普 0.8 者墊底
        assert_eq!(ranking.ranks().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_rank_is_total_order() {
        let ranker = StrategyRanker::with_defaults();
        let ranking = ranker
            .rank(&four_strategy_table(), &ReturnHistory::new())
            .unwrap();

        let scores = ranking.composite_scores().unwrap();
        for pair in scores.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
        let ranks = ranking.ranks().unwrap();
        assert_eq!(ranks, (1..=4).collect::<Vec<u32>>());
    }

    #[test]
    fn test_rank_stable_ties_first_seen_wins() {
        // 全部指標相同 → 綜合分數全同分, 名次應維持輸入順序
        let results = vec![
            success("j1", "AAA", "s1", 1.0),
            success("j2", "BBB", "s2", 1.0),
            success("j3", "CCC", "s3", 1.0),
        ];
        let table = consolidate(&results).unwrap();
        let ranker = StrategyRanker::with_defaults();
        let ranking = ranker.rank(&table, &ReturnHistory::new()).unwrap();

        let wrapped = ResultsTable::from_dataframe(ranking.frame().clone());
        assert_eq!(
            wrapped.str_values(MetricColumn::STRATEGY).unwrap(),
            vec!["s1".to_string(), "s2".to_string(), "s3".to_string()]
        );
    }

    #[test]
    fn test_rank_empty_table_is_soft() {
        let ranker = StrategyRanker::with_defaults();
        let ranking = ranker
            .rank(&ResultsTable::empty().unwrap(), &ReturnHistory::new())
            .unwrap();
        assert!(ranking.is_empty());
        assert!(ranking.frame().schema().contains(RankColumn::COMPOSITE_SCORE));
    }

    #[test]
    fn test_rank_refuses_structurally_missing_columns() {
        let df = polars::df!(
            MetricColumn::STRATEGY => ["a"],
            MetricColumn::SYMBOL => ["x"],
            MetricColumn::SHARPE_RATIO => [1.0],
        )
        .unwrap();
        let ranker = StrategyRanker::with_defaults();
        let err = ranker
            .rank(&ResultsTable::from_dataframe(df), &ReturnHistory::new())
            .unwrap_err();
        assert!(matches!(
            err,
            RankingError::NotReady(ConsolidateError::MissingFields(_))
        ));
    }

    #[test]
    fn test_top_n_clamps_to_height() {
        let ranker = StrategyRanker::with_defaults();
        let ranking = ranker
            .rank(&four_strategy_table(), &ReturnHistory::new())
            .unwrap();
        assert_eq!(ranking.top_n(2).height(), 2);
        assert_eq!(ranking.top_n(99).height(), 4);
        assert_eq!(ranking.top_n(2).ranks().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_weights_validation() {
        let negative = RankWeights {
            sharpe: -1.0,
            ..RankWeights::default()
        };
        assert!(matches!(
            negative.validate(),
            Err(RankingError::InvalidWeights(_))
        ));

        let zeros = RankWeights {
            sharpe: 0.0,
            consistency: 0.0,
            drawdown: 0.0,
            frequency: 0.0,
            efficiency: 0.0,
        };
        assert!(zeros.validate().is_err());

        // 總和偏離 100 合法, 只發警告
        let skewed = RankWeights {
            sharpe: 70.0,
            ..RankWeights::default()
        };
        assert!(skewed.validate().is_ok());
    }

    #[test]
    fn test_consistency_uses_history_when_available() {
        let results = vec![
            success("j1", "AAA", "s1", 1.0),
            success("j2", "BBB", "s2", 1.0),
        ];
        let table = consolidate(&results).unwrap();

        let mut history = ReturnHistory::new();
        history.insert("s1__AAA", vec![0.01; 40]); // 全視窗獲利 → 100
        // s2__BBB 無歷史 → 後備 75

        let ranker = StrategyRanker::with_defaults();
        let ranking = ranker.rank(&table, &history).unwrap();
        let wrapped = ResultsTable::from_dataframe(ranking.frame().clone());
        let consistency = wrapped
            .numeric_values(RankColumn::CONSISTENCY_SCORE)
            .unwrap();
        assert_eq!(consistency[0], 100.0);
        assert_eq!(consistency[1], 75.0);
    }
}
