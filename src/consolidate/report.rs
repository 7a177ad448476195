use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::table::{ConsolidateError, ConsolidateResult, MetricColumn, ResultsTable};

/// 排名就緒檢查報告
///
/// 必要欄位存在時產出；記錄每個必要欄位的無效值（null 或 NaN）數量
/// 與策略／商品的去重計數。無效值不會被剔除，只會拉低對應列的分數。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReadinessReport {
    /// 表格列數
    pub total_rows: usize,
    /// 每個必要欄位的無效值數（null 或 NaN）
    pub invalid_counts: HashMap<String, usize>,
    /// 去重後的策略數
    pub unique_strategies: usize,
    /// 去重後的商品數
    pub unique_symbols: usize,
}

impl ReadinessReport {
    /// 必要欄位是否全數乾淨（沒有任何無效值）
    pub fn is_clean(&self) -> bool {
        self.invalid_counts.values().all(|&count| count == 0)
    }

    /// 產生人類可讀的報告文字
    pub fn format_report(&self) -> String {
        let mut lines = Vec::new();
        lines.push("=== 排名就緒檢查 ===".to_string());
        lines.push(format!("列數: {}", self.total_rows));
        lines.push(format!(
            "策略數: {} / 商品數: {}",
            self.unique_strategies, self.unique_symbols
        ));
        let mut fields: Vec<&String> = self.invalid_counts.keys().collect();
        fields.sort();
        for field in fields {
            lines.push(format!(
                "欄位 {}: {} 個無效值",
                field, self.invalid_counts[field]
            ));
        }
        lines.join("\n")
    }
}

/// 排名前的就緒檢查
///
/// 任何必要欄位在結構上缺失時回傳 `MissingFields`（一次列出全部缺失欄位），
/// 排名器必須拒絕繼續；欄位存在但含 null/NaN 屬合法狀態，僅入帳回報。
pub fn validate_for_ranking(table: &ResultsTable) -> ConsolidateResult<ReadinessReport> {
    let missing: Vec<String> = MetricColumn::REQUIRED_FOR_RANKING
        .iter()
        .filter(|&&name| !table.has_column(name))
        .map(|&name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ConsolidateError::MissingFields(missing));
    }

    let mut invalid_counts = HashMap::new();
    for &name in MetricColumn::REQUIRED_FOR_RANKING.iter() {
        let invalid = table
            .numeric_values(name)?
            .iter()
            .filter(|v| v.is_nan())
            .count();
        invalid_counts.insert(name.to_string(), invalid);
    }

    let unique_strategies = if table.has_column(MetricColumn::STRATEGY) {
        unique_count(table, MetricColumn::STRATEGY)?
    } else {
        0
    };
    let unique_symbols = if table.has_column(MetricColumn::SYMBOL) {
        unique_count(table, MetricColumn::SYMBOL)?
    } else {
        0
    };

    let report = ReadinessReport {
        total_rows: table.height(),
        invalid_counts,
        unique_strategies,
        unique_symbols,
    };
    debug!("就緒檢查完成: {} 列, 乾淨={}", report.total_rows, report.is_clean());
    Ok(report)
}

fn unique_count(table: &ResultsTable, column: &str) -> ConsolidateResult<usize> {
    let values = table.str_values(column)?;
    let unique: HashSet<&String> = values.iter().collect();
    Ok(unique.len())
}

/// 單一指標的跨策略比較
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricComparison {
    /// 比較的指標名稱
    pub metric: String,
    /// 每列的 (策略鍵, 指標值)
    pub rows: Vec<(String, f64)>,
    /// 勝出者（NaN 列不參與評選；全為 NaN 或空表時為 None）
    pub winner: Option<(String, f64)>,
}

impl MetricComparison {
    /// 產生對齊的文字表格
    pub fn format_table(&self) -> String {
        let key_width = self
            .rows
            .iter()
            .map(|(key, _)| key.chars().count())
            .max()
            .unwrap_or(8)
            .max(8);

        let mut lines = Vec::new();
        lines.push(format!("=== 指標比較: {} ===", self.metric));
        for (key, value) in &self.rows {
            let marker = match &self.winner {
                Some((winner_key, _)) if winner_key == key => " <- 勝出",
                _ => "",
            };
            lines.push(format!("{key:<key_width$}  {value:>12.6}{marker}"));
        }
        if self.winner.is_none() {
            lines.push("(無可評選的值)".to_string());
        }
        lines.join("\n")
    }
}

/// 依指定指標比較整併表中的所有列
///
/// 指標欄位不存在時回傳 `MissingFields`。max_drawdown 取絕對值較小者
/// 勝出，其餘指標取值較大者勝出。
pub fn compare_by_metric(
    table: &ResultsTable,
    metric: &str,
) -> ConsolidateResult<MetricComparison> {
    if !table.has_column(metric) {
        return Err(ConsolidateError::MissingFields(vec![metric.to_string()]));
    }

    let keys = table.row_keys()?;
    let values = table.numeric_values(metric)?;
    let rows: Vec<(String, f64)> = keys.into_iter().zip(values).collect();

    let smaller_magnitude_wins = metric == MetricColumn::MAX_DRAWDOWN;
    let mut winner: Option<(String, f64)> = None;
    for (key, value) in &rows {
        if value.is_nan() {
            continue;
        }
        let better = match &winner {
            None => true,
            Some((_, best)) => {
                if smaller_magnitude_wins {
                    value.abs() < best.abs()
                } else {
                    value > best
                }
            }
        };
        if better {
            winner = Some((key.clone(), *value));
        }
    }

    Ok(MetricComparison {
        metric: metric.to_string(),
        rows,
        winner,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn table_with_columns(columns: Vec<Column>) -> ResultsTable {
        ResultsTable::from_dataframe(DataFrame::new(columns).unwrap())
    }

    #[test]
    fn test_validate_reports_all_missing_fields_at_once() {
        let table = table_with_columns(vec![
            Column::new(MetricColumn::STRATEGY.into(), vec!["a".to_string()]),
            Column::new(MetricColumn::SYMBOL.into(), vec!["x".to_string()]),
            Column::new(MetricColumn::SHARPE_RATIO.into(), vec![1.0]),
        ]);

        let err = validate_for_ranking(&table).unwrap_err();
        match err {
            ConsolidateError::MissingFields(fields) => {
                assert_eq!(
                    fields,
                    vec![
                        MetricColumn::MAX_DRAWDOWN.to_string(),
                        MetricColumn::WIN_RATE.to_string(),
                        MetricColumn::TOTAL_TRADES.to_string(),
                    ]
                );
            }
            other => panic!("非預期錯誤: {:?}", other),
        }
    }

    #[test]
    fn test_validate_counts_nan_without_rejecting() {
        let table = table_with_columns(vec![
            Column::new(
                MetricColumn::STRATEGY.into(),
                vec!["a".to_string(), "b".to_string()],
            ),
            Column::new(
                MetricColumn::SYMBOL.into(),
                vec!["x".to_string(), "x".to_string()],
            ),
            Column::new(MetricColumn::SHARPE_RATIO.into(), vec![1.0, f64::NAN]),
            Column::new(MetricColumn::MAX_DRAWDOWN.into(), vec![-0.1, -0.2]),
            Column::new(MetricColumn::WIN_RATE.into(), vec![0.5, 0.6]),
            Column::new(MetricColumn::TOTAL_TRADES.into(), vec![30i64, 50]),
        ]);

        let report = validate_for_ranking(&table).unwrap();
        assert_eq!(report.total_rows, 2);
        assert_eq!(report.invalid_counts[MetricColumn::SHARPE_RATIO], 1);
        assert_eq!(report.invalid_counts[MetricColumn::TOTAL_TRADES], 0);
        assert_eq!(report.unique_strategies, 2);
        assert_eq!(report.unique_symbols, 1);
        assert!(!report.is_clean());
    }

    #[test]
    fn test_validate_empty_table_is_ready() {
        let table = ResultsTable::empty().unwrap();
        let report = validate_for_ranking(&table).unwrap();
        assert_eq!(report.total_rows, 0);
        assert!(report.is_clean());
    }

    #[test]
    fn test_compare_larger_wins_by_default() {
        let table = table_with_columns(vec![
            Column::new(
                MetricColumn::STRATEGY.into(),
                vec!["momentum".to_string(), "reversal".to_string()],
            ),
            Column::new(
                MetricColumn::SYMBOL.into(),
                vec!["x".to_string(), "x".to_string()],
            ),
            Column::new(MetricColumn::SHARPE_RATIO.into(), vec![1.2, 1.9]),
        ]);

        let comparison = compare_by_metric(&table, MetricColumn::SHARPE_RATIO).unwrap();
        let (winner_key, winner_value) = comparison.winner.unwrap();
        assert_eq!(winner_key, "reversal__x");
        assert!((winner_value - 1.9).abs() < 1e-12);
        assert!(comparison.format_table().contains("勝出"));
    }

    #[test]
    fn test_compare_drawdown_smaller_magnitude_wins() {
        let table = table_with_columns(vec![
            Column::new(
                MetricColumn::STRATEGY.into(),
                vec!["deep".to_string(), "shallow".to_string()],
            ),
            Column::new(
                MetricColumn::SYMBOL.into(),
                vec!["x".to_string(), "x".to_string()],
            ),
            Column::new(MetricColumn::MAX_DRAWDOWN.into(), vec![-0.30, -0.08]),
        ]);

        let comparison = compare_by_metric(&table, MetricColumn::MAX_DRAWDOWN).unwrap();
        assert_eq!(comparison.winner.unwrap().0, "shallow__x");
    }

    #[test]
    fn test_compare_missing_metric_rejected() {
        let table = table_with_columns(vec![
            Column::new(MetricColumn::STRATEGY.into(), vec!["a".to_string()]),
            Column::new(MetricColumn::SYMBOL.into(), vec!["x".to_string()]),
        ]);
        let err = compare_by_metric(&table, "sortino_ratio").unwrap_err();
        assert!(matches!(err, ConsolidateError::MissingFields(fields) if fields == vec!["sortino_ratio".to_string()]));
    }

    #[test]
    fn test_compare_all_nan_has_no_winner() {
        let table = table_with_columns(vec![
            Column::new(MetricColumn::STRATEGY.into(), vec!["a".to_string()]),
            Column::new(MetricColumn::SYMBOL.into(), vec!["x".to_string()]),
            Column::new(MetricColumn::SHARPE_RATIO.into(), vec![f64::NAN]),
        ]);
        let comparison = compare_by_metric(&table, MetricColumn::SHARPE_RATIO).unwrap();
        assert!(comparison.winner.is_none());
    }
}
