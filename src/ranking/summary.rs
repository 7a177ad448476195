use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Distribution, Max, Min, OrderStatistics};

use super::ranker::{RankingResult, RankingTable};

/// 綜合分數分布統計
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoreDistribution {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub lower_quartile: f64,
    pub median: f64,
    pub upper_quartile: f64,
}

/// 排名摘要
///
/// 空表得到空摘要（零列、無首位、無分布），不拋錯。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RankingSummary {
    /// 排名列數
    pub total_rows: usize,
    /// 名次第一的策略
    pub top_strategy: Option<String>,
    /// 名次第一的商品
    pub top_symbol: Option<String>,
    /// 綜合分數分布
    pub distribution: Option<ScoreDistribution>,
}

impl RankingSummary {
    /// 產生人類可讀的摘要文字
    pub fn format_summary(&self) -> String {
        let mut lines = Vec::new();
        lines.push("=== 排名摘要 ===".to_string());
        lines.push(format!("列數: {}", self.total_rows));
        match (&self.top_strategy, &self.top_symbol) {
            (Some(strategy), Some(symbol)) => {
                lines.push(format!("首位: {} ({})", strategy, symbol));
            }
            _ => lines.push("首位: (無)".to_string()),
        }
        if let Some(dist) = &self.distribution {
            lines.push(format!(
                "綜合分數: min {:.2} / Q1 {:.2} / 中位 {:.2} / Q3 {:.2} / max {:.2} / 平均 {:.2}",
                dist.min, dist.lower_quartile, dist.median, dist.upper_quartile, dist.max, dist.mean
            ));
        }
        lines.join("\n")
    }
}

/// 計算排名摘要
pub fn summarize(table: &RankingTable) -> RankingResult<RankingSummary> {
    if table.is_empty() {
        return Ok(RankingSummary {
            total_rows: 0,
            top_strategy: None,
            top_symbol: None,
            distribution: None,
        });
    }

    let (top_strategy, top_symbol) = match table.top_identity()? {
        Some((strategy, symbol)) => (Some(strategy), Some(symbol)),
        None => (None, None),
    };

    let scores: Vec<f64> = table
        .composite_scores()?
        .into_iter()
        .filter(|v| v.is_finite())
        .collect();
    let distribution = if scores.is_empty() {
        None
    } else {
        let mut data = Data::new(scores);
        Some(ScoreDistribution {
            min: data.min(),
            max: data.max(),
            mean: data.mean().unwrap_or(f64::NAN),
            lower_quartile: data.lower_quartile(),
            median: data.median(),
            upper_quartile: data.upper_quartile(),
        })
    };

    Ok(RankingSummary {
        total_rows: table.height(),
        top_strategy,
        top_symbol,
        distribution,
    })
}
