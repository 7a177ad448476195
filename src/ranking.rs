//! 策略排名模組
//!
//! 對整併表計算五個獨立正規化的子分數（風險調整報酬、一致性、回撤控制、
//! 交易頻率、資金效率），以可設定的百分比權重加權成綜合分數並給出全序。

pub mod ranker;
pub mod scores;
pub mod summary;

// 重新導出常用組件
pub use ranker::{
    RankColumn, RankWeights, RankingError, RankingResult, RankingTable, StrategyRanker,
};
pub use scores::ScoreConfig;
pub use summary::{summarize, RankingSummary, ScoreDistribution};
