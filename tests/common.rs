//! 整合測試共用的建構輔助

use backtest_pipeline::backtest::{BacktestJob, JobResult, StrategyMetrics};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

/// 創建測試用回測任務
pub fn create_test_job(job_id: &str, symbol: &str, strategy_path: &str) -> BacktestJob {
    BacktestJob {
        job_id: job_id.to_string(),
        symbol: symbol.to_string(),
        strategy_path: strategy_path.to_string(),
        start_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        end_date: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
        strategy_params: BTreeMap::new(),
        batch_id: "test-batch".to_string(),
    }
}

/// 創建帶指定核心指標的績效結果
pub fn create_test_metrics(
    sharpe: f64,
    drawdown: f64,
    win_rate: f64,
    trades: f64,
) -> StrategyMetrics {
    let mut raw = HashMap::new();
    raw.insert("sharpe_ratio".to_string(), sharpe);
    raw.insert("total_return".to_string(), 0.25);
    raw.insert("max_drawdown".to_string(), drawdown);
    raw.insert("win_rate".to_string(), win_rate);
    raw.insert("trade_count".to_string(), trades);
    raw.insert("profit_factor".to_string(), 1.4);
    StrategyMetrics::from_map(&raw).unwrap()
}

/// 創建一組僅夏普值不同的成功結果（其餘指標完全相同）
///
/// 策略名為 strat_0、strat_1...，商品固定 2330.TW，
/// 因此列鍵為 `strat_{i}__2330.TW`。
pub fn results_with_sharpes(sharpes: &[f64]) -> Vec<JobResult> {
    sharpes
        .iter()
        .enumerate()
        .map(|(i, &sharpe)| {
            let job = create_test_job(
                &format!("job-{i:03}"),
                "2330.TW",
                &format!("strategies/strat_{i}.rs"),
            );
            JobResult::success(&job, create_test_metrics(sharpe, -0.12, 0.55, 90.0), 0.2)
        })
        .collect()
}
