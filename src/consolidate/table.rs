//! 結果整併表
//!
//! 把異質的單任務結果攤平成一張欄位統一的表，供排名器消費。

use polars::prelude::*;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

use crate::backtest::results::JobResult;

/// 整併錯誤
#[derive(Debug, Error)]
pub enum ConsolidateError {
    /// 排名必要欄位在結構上缺失
    #[error("整併表缺少排名必要欄位: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    /// 資料框操作失敗
    #[error("資料框操作失敗: {0}")]
    Frame(#[from] PolarsError),
}

/// 整併模組結果類型
pub type ConsolidateResult<T> = Result<T, ConsolidateError>;

/// 標準欄名定義
pub struct MetricColumn;

impl MetricColumn {
    pub const STRATEGY: &'static str = "strategy"; // 策略名稱
    pub const SYMBOL: &'static str = "symbol"; // 商品代碼
    pub const SHARPE_RATIO: &'static str = "sharpe_ratio"; // 夏普比率
    pub const MAX_DRAWDOWN: &'static str = "max_drawdown"; // 最大回撤
    pub const WIN_RATE: &'static str = "win_rate"; // 勝率
    pub const TOTAL_TRADES: &'static str = "total_trades"; // 交易次數
    pub const PROFIT_FACTOR: &'static str = "profit_factor"; // 獲利因子
    pub const TOTAL_RETURN: &'static str = "total_return"; // 總報酬率
    pub const VOLATILITY: &'static str = "volatility"; // 波動率
    pub const AVG_TRADE: &'static str = "avg_trade"; // 平均單筆損益

    // 選配指標
    pub const SORTINO_RATIO: &'static str = "sortino_ratio"; // 索提諾比率
    pub const ANNUAL_RETURN: &'static str = "annual_return"; // 年化報酬率
    pub const CALMAR_RATIO: &'static str = "calmar_ratio"; // 卡瑪比率
    pub const ALPHA: &'static str = "alpha"; // 超額報酬
    pub const BETA: &'static str = "beta"; // 市場敏感度

    /// 排名前必須在結構上存在的欄位
    pub const REQUIRED_FOR_RANKING: [&'static str; 4] = [
        Self::SHARPE_RATIO,
        Self::MAX_DRAWDOWN,
        Self::WIN_RATE,
        Self::TOTAL_TRADES,
    ];

    /// 由 extras 映射補值的浮點欄位（依固定順序建表）
    pub const FLOAT_EXTRAS: [&'static str; 7] = [
        Self::PROFIT_FACTOR,
        Self::VOLATILITY,
        Self::AVG_TRADE,
        Self::SORTINO_RATIO,
        Self::ANNUAL_RETURN,
        Self::CALMAR_RATIO,
        Self::ALPHA,
    ];

    /// 欄位缺值時的中性預設
    ///
    /// profit_factor 與 beta 的中性值是 1.0 而非 0.0：
    /// 0.0 的獲利因子會被誤讀成「全部虧損」，0.0 的 beta 會被誤讀成與市場無關。
    pub fn neutral_default(column: &str) -> f64 {
        match column {
            Self::PROFIT_FACTOR | Self::BETA => 1.0,
            _ => 0.0,
        }
    }
}

/// (策略, 商品) 的複合列鍵
pub fn strategy_key(strategy: &str, symbol: &str) -> String {
    format!("{}__{}", strategy, symbol)
}

/// 各策略的每期報酬序列，以列鍵索引
///
/// 供一致性評分與相關性矩陣使用；同鍵重複時保留先見者。
#[derive(Clone, Debug, Default)]
pub struct ReturnHistory {
    series: HashMap<String, Vec<f64>>,
}

impl ReturnHistory {
    /// 建立空的報酬歷史
    pub fn new() -> Self {
        Self::default()
    }

    /// 寫入一條報酬序列；同鍵重複時保留先見者
    pub fn insert(&mut self, key: impl Into<String>, returns: Vec<f64>) {
        self.series.entry(key.into()).or_insert(returns);
    }

    /// 讀取指定鍵的報酬序列
    pub fn get(&self, key: &str) -> Option<&[f64]> {
        self.series.get(key).map(|v| v.as_slice())
    }

    /// 序列數
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// 是否沒有任何序列
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// 依字典序排序的鍵清單（矩陣標籤的確定性來源）
    pub fn sorted_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.series.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// 整併後的結果表（polars DataFrame 包裝）
#[derive(Clone, Debug)]
pub struct ResultsTable {
    df: DataFrame,
}

impl ResultsTable {
    /// 包裝既有的資料框（外部表，不保證欄位齊全）
    pub fn from_dataframe(df: DataFrame) -> Self {
        Self { df }
    }

    /// 建立零列、完整欄位的空表
    pub fn empty() -> ConsolidateResult<Self> {
        build_table(&[])
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

    /// 欄位是否存在
    pub fn has_column(&self, name: &str) -> bool {
        self.df.schema().contains(name)
    }

    /// 以浮點數讀出一整欄；null 以 NaN 表示，整數欄自動升格
    pub fn numeric_values(&self, name: &str) -> ConsolidateResult<Vec<f64>> {
        let column = self.df.column(name)?;
        let casted = column.cast(&DataType::Float64)?;
        let ca = casted.f64()?;
        Ok(ca.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    }

    /// 讀出一整欄字串；null 以空字串表示
    pub fn str_values(&self, name: &str) -> ConsolidateResult<Vec<String>> {
        let column = self.df.column(name)?;
        let ca = column.str()?;
        Ok(ca.iter().map(|v| v.unwrap_or("").to_string()).collect())
    }

    /// 全表的 (策略, 商品) 複合列鍵，依列順序
    pub fn row_keys(&self) -> ConsolidateResult<Vec<String>> {
        let strategies = self.str_values(MetricColumn::STRATEGY)?;
        let symbols = self.str_values(MetricColumn::SYMBOL)?;
        Ok(strategies
            .iter()
            .zip(symbols.iter())
            .map(|(s, y)| strategy_key(s, y))
            .collect())
    }
}

/// 整併成功結果為標準表
///
/// 規則：
/// - 失敗紀錄完全排除，不留占位列
/// - 必要指標來自結果的具型別欄位（同義鍵 `trade_count`/`total_trades`
///   已在 worker 邊界正規化）
/// - 選配指標缺值時以 `MetricColumn::neutral_default` 補中性值；
///   指標值本身是 NaN 時原樣保留，交由就緒檢查計數
pub fn consolidate(results: &[JobResult]) -> ConsolidateResult<ResultsTable> {
    let successes: Vec<&JobResult> = results.iter().filter(|r| r.is_success()).collect();
    debug!(
        "整併 {} 筆結果, 其中 {} 筆成功",
        results.len(),
        successes.len()
    );
    build_table(&successes)
}

fn build_table(successes: &[&JobResult]) -> ConsolidateResult<ResultsTable> {
    let capacity = successes.len();
    let mut strategies: Vec<String> = Vec::with_capacity(capacity);
    let mut symbols: Vec<String> = Vec::with_capacity(capacity);
    let mut sharpe: Vec<f64> = Vec::with_capacity(capacity);
    let mut drawdown: Vec<f64> = Vec::with_capacity(capacity);
    let mut win_rate: Vec<f64> = Vec::with_capacity(capacity);
    let mut trades: Vec<i64> = Vec::with_capacity(capacity);
    let mut total_return: Vec<f64> = Vec::with_capacity(capacity);
    let mut beta: Vec<f64> = Vec::with_capacity(capacity);
    let mut float_extras: HashMap<&str, Vec<f64>> = MetricColumn::FLOAT_EXTRAS
        .iter()
        .map(|&name| (name, Vec::with_capacity(capacity)))
        .collect();

    for result in successes {
        let metrics = match result.metrics.as_ref() {
            Some(metrics) => metrics,
            None => {
                // 成功卻無指標違反結果不變量，按失敗紀錄的方式排除
                warn!("成功結果 {} 缺少指標, 自整併表排除", result.job_id);
                continue;
            }
        };

        strategies.push(result.strategy.clone());
        symbols.push(result.symbol.clone());
        sharpe.push(metrics.sharpe_ratio);
        drawdown.push(metrics.max_drawdown);
        win_rate.push(metrics.win_rate);
        trades.push(metrics.trade_count as i64);
        total_return.push(metrics.total_return);
        beta.push(
            metrics
                .extra(MetricColumn::BETA)
                .unwrap_or_else(|| MetricColumn::neutral_default(MetricColumn::BETA)),
        );
        for &name in MetricColumn::FLOAT_EXTRAS.iter() {
            let value = metrics
                .extra(name)
                .unwrap_or_else(|| MetricColumn::neutral_default(name));
            if let Some(values) = float_extras.get_mut(name) {
                values.push(value);
            }
        }
    }

    let mut columns: Vec<Column> = vec![
        Column::new(MetricColumn::STRATEGY.into(), strategies),
        Column::new(MetricColumn::SYMBOL.into(), symbols),
        Column::new(MetricColumn::SHARPE_RATIO.into(), sharpe),
        Column::new(MetricColumn::MAX_DRAWDOWN.into(), drawdown),
        Column::new(MetricColumn::WIN_RATE.into(), win_rate),
        Column::new(MetricColumn::TOTAL_TRADES.into(), trades),
        Column::new(MetricColumn::TOTAL_RETURN.into(), total_return),
    ];
    for &name in MetricColumn::FLOAT_EXTRAS.iter() {
        if let Some(values) = float_extras.remove(name) {
            columns.push(Column::new(name.into(), values));
        }
    }
    columns.push(Column::new(MetricColumn::BETA.into(), beta));

    let df = DataFrame::new(columns)?;
    Ok(ResultsTable::from_dataframe(df))
}

/// 自成功結果收集各策略的報酬序列
pub fn collect_return_history(results: &[JobResult]) -> ReturnHistory {
    let mut history = ReturnHistory::new();
    for result in results.iter().filter(|r| r.is_success()) {
        if let Some(metrics) = result.metrics.as_ref() {
            if !metrics.returns.is_empty() {
                history.insert(
                    strategy_key(&result.strategy, &result.symbol),
                    metrics.returns.clone(),
                );
            }
        }
    }
    history
}
