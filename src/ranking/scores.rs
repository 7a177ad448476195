//! 子分數正規化
//!
//! 五個子分數各自獨立正規化到 [0, 100]，對整個列集計算。
//! 規約：輸入為 NaN 的列一律得 0 分（無效值拉低分數、不剔除列）；
//! min-max 退化（全列同值）時回退到可設定的中性分數。

use serde::{Deserialize, Serialize};

use crate::consolidate::ReturnHistory;

/// 評分設定
///
/// `neutral_score` 與 `consistency_fallback` 是文件化的慣例值
/// （50.0 / 75.0），不是推導常數，保留為可設定欄位。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScoreConfig {
    /// min-max 退化時的中性分數
    pub neutral_score: f64,
    /// 一致性歷史不足時的後備分數
    pub consistency_fallback: f64,
    /// 每期最適交易次數上限（頻率分數的天花板）
    pub optimal_trades: f64,
    /// 一致性滾動視窗長度
    pub rolling_window: usize,
    /// 一致性評分所需的最少期數
    pub min_periods: usize,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            neutral_score: 50.0,
            consistency_fallback: 75.0,
            optimal_trades: 100.0,
            rolling_window: 20,
            min_periods: 10,
        }
    }
}

impl ScoreConfig {
    /// 設定最適交易次數上限
    pub fn with_optimal_trades(mut self, optimal_trades: f64) -> Self {
        self.optimal_trades = optimal_trades;
        self
    }

    /// 設定一致性滾動視窗
    pub fn with_rolling_window(mut self, window: usize, min_periods: usize) -> Self {
        self.rolling_window = window;
        self.min_periods = min_periods;
        self
    }
}

fn finite_span(values: &[f64]) -> Option<(f64, f64)> {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in values {
        if v.is_finite() {
            min = min.min(v);
            max = max.max(v);
        }
    }
    (min <= max).then_some((min, max))
}

/// 線性 min-max 正規化：批次最大值得 100、最小值得 0
///
/// 全列同值（含單列）時回退中性分數；NaN 得 0。
pub fn min_max_scores(values: &[f64], neutral: f64) -> Vec<f64> {
    let span = finite_span(values);
    values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                return 0.0;
            }
            match span {
                Some((min, max)) if max > min => (100.0 * (v - min) / (max - min)).clamp(0.0, 100.0),
                _ => neutral,
            }
        })
        .collect()
}

/// 反向 min-max 正規化，作用在回撤幅度上
///
/// 回撤可能以負值或正幅度表示；取絕對值後，幅度最小者得 100。
pub fn inverted_min_max_scores(values: &[f64], neutral: f64) -> Vec<f64> {
    let magnitudes: Vec<f64> = values
        .iter()
        .map(|&v| if v.is_finite() { v.abs() } else { f64::NAN })
        .collect();
    let span = finite_span(&magnitudes);
    magnitudes
        .iter()
        .map(|&m| {
            if !m.is_finite() {
                return 0.0;
            }
            match span {
                Some((min, max)) if max > min => (100.0 * (max - m) / (max - min)).clamp(0.0, 100.0),
                _ => neutral,
            }
        })
        .collect()
}

/// 交易頻率分數：線性爬升到最適次數後封頂
///
/// `100 * min(trades, optimal) / optimal`；單調非遞減、超過上限不加分
/// 也不扣分。上限設定無效（<= 0）時整欄回退中性分數。
pub fn frequency_scores(values: &[f64], optimal: f64, neutral: f64) -> Vec<f64> {
    values
        .iter()
        .map(|&v| {
            if !v.is_finite() {
                0.0
            } else if optimal <= 0.0 {
                neutral
            } else {
                (100.0 * v.clamp(0.0, optimal) / optimal).clamp(0.0, 100.0)
            }
        })
        .collect()
}

/// 單一報酬序列的滾動一致性
///
/// 取長度為 `window` 的滾動視窗，計算累積報酬非負的視窗占比（×100）。
/// 序列長度不足（短於 `min_periods` 或視窗）時回傳 None，由呼叫端套用後備分數。
pub fn consistency_from_returns(returns: &[f64], window: usize, min_periods: usize) -> Option<f64> {
    let needed = window.max(min_periods).max(1);
    if returns.len() < needed || window == 0 {
        return None;
    }
    let windows = returns.windows(window);
    let total = windows.len();
    if total == 0 {
        return None;
    }
    let non_negative = returns
        .windows(window)
        .filter(|w| w.iter().sum::<f64>() >= 0.0)
        .count();
    Some(100.0 * non_negative as f64 / total as f64)
}

/// 整個列集的一致性分數
///
/// 依列鍵查報酬歷史；查無序列或歷史不足時使用後備分數。
pub fn consistency_scores(keys: &[String], history: &ReturnHistory, config: &ScoreConfig) -> Vec<f64> {
    keys.iter()
        .map(|key| {
            history
                .get(key)
                .and_then(|returns| {
                    consistency_from_returns(returns, config.rolling_window, config.min_periods)
                })
                .unwrap_or(config.consistency_fallback)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_min_max_extremes() {
        let scores = min_max_scores(&[1.5, 2.1, 0.8, 1.9], 50.0);
        assert_eq!(scores[1], 100.0);
        assert_eq!(scores[2], 0.0);
        assert!(scores[0] > 0.0 && scores[0] < 100.0);
    }

    #[test]
    fn test_min_max_degenerate_uses_neutral() {
        assert_eq!(min_max_scores(&[1.2, 1.2, 1.2], 50.0), vec![50.0, 50.0, 50.0]);
        assert_eq!(min_max_scores(&[3.3], 50.0), vec![50.0]);
    }

    #[test]
    fn test_min_max_nan_scores_zero() {
        let scores = min_max_scores(&[1.0, f64::NAN, 2.0], 50.0);
        assert_eq!(scores[1], 0.0);
        assert_eq!(scores[2], 100.0);
    }

    #[test]
    fn test_inverted_prefers_small_magnitude() {
        // 回撤以負值表示: -0.05 幅度最小應得 100
        let scores = inverted_min_max_scores(&[-0.30, -0.05, -0.18], 50.0);
        assert_eq!(scores[1], 100.0);
        assert_eq!(scores[0], 0.0);
    }

    #[test]
    fn test_inverted_accepts_positive_magnitudes() {
        let negative = inverted_min_max_scores(&[-0.30, -0.05], 50.0);
        let positive = inverted_min_max_scores(&[0.30, 0.05], 50.0);
        assert_eq!(negative, positive);
    }

    #[rstest]
    #[case(0.0, 0.0)]
    #[case(50.0, 50.0)]
    #[case(100.0, 100.0)]
    #[case(250.0, 100.0)]
    fn test_frequency_clamps_at_optimal(#[case] trades: f64, #[case] expected: f64) {
        let scores = frequency_scores(&[trades], 100.0, 50.0);
        assert_eq!(scores[0], expected);
    }

    #[test]
    fn test_frequency_is_monotonic() {
        let trades: Vec<f64> = (0..300).map(|t| t as f64).collect();
        let scores = frequency_scores(&trades, 100.0, 50.0);
        for pair in scores.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn test_consistency_insufficient_history_falls_back() {
        let config = ScoreConfig::default();
        let mut history = ReturnHistory::new();
        history.insert("a__x", vec![0.01; 5]); // 低於 min_periods
        let scores = consistency_scores(&["a__x".to_string(), "b__y".to_string()], &history, &config);
        assert_eq!(scores, vec![75.0, 75.0]);
    }

    #[test]
    fn test_consistency_counts_non_negative_windows() {
        // 視窗 2、每個視窗累積報酬: [0.02, -0.005, 0.03] → 三個視窗中兩個非負
        let value = consistency_from_returns(&[0.01, 0.01, -0.015, 0.045], 2, 2).unwrap();
        assert!((value - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_consistency_all_profitable_scores_100() {
        let returns = vec![0.01; 40];
        let value = consistency_from_returns(&returns, 20, 10).unwrap();
        assert_eq!(value, 100.0);
    }
}
