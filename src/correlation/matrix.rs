//! 相關性矩陣
//!
//! 以 ndarray 承載的方形對稱矩陣，對角線恆為 1.0、非對角值落在 [-1, 1]。
//! 支援 Pearson / Spearman / Kendall 三種方法；成對觀測數不足的儲存格
//! 視為不相關（0.0）而不是以不足的資料硬算。

use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use crate::consolidate::ReturnHistory;
use crate::ranking::RankingError;

/// 相關性分析錯誤
#[derive(Debug, Error)]
pub enum CorrelationError {
    /// 不支援的相關性方法
    #[error("無效的相關性方法: {0} (支援 pearson | spearman | kendall)")]
    InvalidMethod(String),

    /// 建構期設定不合法
    #[error("無效的相關性設定: {0}")]
    InvalidConfig(String),

    /// 矩陣形狀不合法
    #[error("矩陣形狀不合法: {0}")]
    InvalidShape(String),

    /// 排名表讀取失敗
    #[error(transparent)]
    Table(#[from] RankingError),

    /// 資料框操作失敗
    #[error("資料框操作失敗: {0}")]
    Frame(#[from] polars::prelude::PolarsError),

    /// 矩陣匯出失敗
    #[error("矩陣匯出失敗: {0}")]
    Export(#[from] csv::Error),

    /// IO 錯誤
    #[error("IO 錯誤: {0}")]
    Io(#[from] std::io::Error),
}

/// 相關性模組結果類型
pub type CorrelationResult<T> = Result<T, CorrelationError>;

/// 相關性方法
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    /// 皮爾森線性相關
    Pearson,
    /// 斯皮爾曼等級相關（同值取平均等級）
    Spearman,
    /// 肯德爾 tau-b（含同值修正）
    Kendall,
}

impl FromStr for CorrelationMethod {
    type Err = CorrelationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pearson" => Ok(CorrelationMethod::Pearson),
            "spearman" => Ok(CorrelationMethod::Spearman),
            "kendall" => Ok(CorrelationMethod::Kendall),
            other => Err(CorrelationError::InvalidMethod(other.to_string())),
        }
    }
}

impl fmt::Display for CorrelationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationMethod::Pearson => write!(f, "pearson"),
            CorrelationMethod::Spearman => write!(f, "spearman"),
            CorrelationMethod::Kendall => write!(f, "kendall"),
        }
    }
}

/// 相關性矩陣
#[derive(Clone, Debug)]
pub struct CorrelationMatrix {
    labels: Vec<String>,
    values: Array2<f64>,
}

impl CorrelationMatrix {
    /// 建立空矩陣
    pub fn empty() -> Self {
        Self {
            labels: Vec::new(),
            values: Array2::zeros((0, 0)),
        }
    }

    /// 以標籤建立單位矩陣（退化的中性矩陣：自相關 1、互相關 0）
    pub fn identity(labels: Vec<String>) -> Self {
        let n = labels.len();
        Self {
            labels,
            values: Array2::eye(n),
        }
    }

    /// 包裝既有的方形矩陣；形狀與標籤數不一致時拒絕
    pub fn new(labels: Vec<String>, values: Array2<f64>) -> CorrelationResult<Self> {
        if values.nrows() != values.ncols() {
            return Err(CorrelationError::InvalidShape(format!(
                "{}x{} 不是方形",
                values.nrows(),
                values.ncols()
            )));
        }
        if values.nrows() != labels.len() {
            return Err(CorrelationError::InvalidShape(format!(
                "標籤數 {} 與矩陣階 {} 不符",
                labels.len(),
                values.nrows()
            )));
        }
        Ok(Self { labels, values })
    }

    /// 矩陣階（標籤數）
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// 是否為空矩陣
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// 列標籤
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// 以索引讀取相關係數
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[[i, j]]
    }

    /// 標籤的矩陣索引
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// 以標籤讀取相關係數
    pub fn by_label(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.index_of(a)?;
        let j = self.index_of(b)?;
        Some(self.values[[i, j]])
    }

    /// 底層矩陣
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// 寫出帶列欄標籤的方形 CSV
    pub fn write_csv<W: Write>(&self, writer: W) -> CorrelationResult<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        let mut header = Vec::with_capacity(self.len() + 1);
        header.push(String::new());
        header.extend(self.labels.iter().cloned());
        csv_writer.write_record(&header)?;

        for (i, label) in self.labels.iter().enumerate() {
            let mut record = Vec::with_capacity(self.len() + 1);
            record.push(label.clone());
            for j in 0..self.len() {
                record.push(format!("{}", self.values[[i, j]]));
            }
            csv_writer.write_record(&record)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// 寫出矩陣 CSV 檔
    pub fn to_csv_file(&self, path: impl AsRef<Path>) -> CorrelationResult<()> {
        let file = std::fs::File::create(path)?;
        self.write_csv(file)
    }
}

/// 自報酬歷史計算相關性矩陣
///
/// 標籤取排序後的列鍵以保證確定性；逐對計算並平行化。
/// 成對有效觀測（兩邊皆為有限值）少於 `min_periods` 的儲存格記 0.0。
pub fn compute_matrix(
    history: &ReturnHistory,
    method: CorrelationMethod,
    min_periods: usize,
) -> CorrelationMatrix {
    let labels = history.sorted_keys();
    let n = labels.len();
    if n == 0 {
        return CorrelationMatrix::empty();
    }

    let series: Vec<&[f64]> = labels
        .iter()
        .map(|key| history.get(key).unwrap_or(&[]))
        .collect();

    let pairs: Vec<(usize, usize)> = (0..n)
        .flat_map(|i| ((i + 1)..n).map(move |j| (i, j)))
        .collect();
    let computed: Vec<((usize, usize), f64)> = pairs
        .par_iter()
        .map(|&(i, j)| {
            let value = pairwise_correlation(series[i], series[j], method, min_periods);
            ((i, j), value)
        })
        .collect();

    let mut values = Array2::eye(n);
    for ((i, j), value) in computed {
        values[[i, j]] = value;
        values[[j, i]] = value;
    }

    debug!("相關性矩陣計算完成: {} 階, 方法 {}", n, method);
    CorrelationMatrix { labels, values }
}

/// 單一儲存格：對齊、過濾無效觀測、套用最少期數門檻
fn pairwise_correlation(
    a: &[f64],
    b: &[f64],
    method: CorrelationMethod,
    min_periods: usize,
) -> f64 {
    let overlap = a.len().min(b.len());
    let mut paired_a = Vec::with_capacity(overlap);
    let mut paired_b = Vec::with_capacity(overlap);
    for k in 0..overlap {
        if a[k].is_finite() && b[k].is_finite() {
            paired_a.push(a[k]);
            paired_b.push(b[k]);
        }
    }
    if paired_a.len() < min_periods.max(2) {
        return 0.0;
    }
    match method {
        CorrelationMethod::Pearson => pearson(&paired_a, &paired_b),
        CorrelationMethod::Spearman => spearman(&paired_a, &paired_b),
        CorrelationMethod::Kendall => kendall(&paired_a, &paired_b),
    }
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for k in 0..a.len() {
        let da = a[k] - mean_a;
        let db = b[k] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let std_a = (var_a / (n - 1.0)).sqrt();
    let std_b = (var_b / (n - 1.0)).sqrt();
    if std_a > 1e-10 && std_b > 1e-10 {
        ((cov / (n - 1.0)) / (std_a * std_b)).clamp(-1.0, 1.0)
    } else {
        // 常數序列沒有可定義的相關性
        0.0
    }
}

fn spearman(a: &[f64], b: &[f64]) -> f64 {
    let ranks_a = average_ranks(a);
    let ranks_b = average_ranks(b);
    pearson(&ranks_a, &ranks_b)
}

/// 平均等級：同值群取等級平均（1-based）
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| values[i].partial_cmp(&values[j]).unwrap_or(Ordering::Equal));

    let mut ranks = vec![0.0; n];
    let mut pos = 0;
    while pos < n {
        let mut end = pos;
        while end + 1 < n && values[order[end + 1]] == values[order[pos]] {
            end += 1;
        }
        let avg_rank = (pos + end) as f64 / 2.0 + 1.0;
        for k in pos..=end {
            ranks[order[k]] = avg_rank;
        }
        pos = end + 1;
    }
    ranks
}

/// Kendall tau-b：同值修正的秩相關
fn kendall(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len();
    let mut concordant = 0i64;
    let mut discordant = 0i64;
    let mut tied_a = 0i64;
    let mut tied_b = 0i64;

    for i in 0..n {
        for j in (i + 1)..n {
            let sa = (a[i] - a[j]).partial_cmp(&0.0).unwrap_or(Ordering::Equal);
            let sb = (b[i] - b[j]).partial_cmp(&0.0).unwrap_or(Ordering::Equal);
            if sa == Ordering::Equal {
                tied_a += 1;
            }
            if sb == Ordering::Equal {
                tied_b += 1;
            }
            if sa != Ordering::Equal && sb != Ordering::Equal {
                if sa == sb {
                    concordant += 1;
                } else {
                    discordant += 1;
                }
            }
        }
    }

    let n0 = (n * (n - 1) / 2) as f64;
    let denom = ((n0 - tied_a as f64) * (n0 - tied_b as f64)).sqrt();
    if denom > 1e-10 {
        (((concordant - discordant) as f64) / denom).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}
