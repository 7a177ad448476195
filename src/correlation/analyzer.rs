//! 相關性分析器
//!
//! 在排名完成後負責三件事：剔除與高分者過度相關的策略、挑選分散度
//! 最好的組合、以及回報整體分散化分數。門檻與方法皆在建構期驗證，
//! 之後的批次分析不會再因設定問題中途失敗。

use polars::prelude::BooleanChunked;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::consolidate::ReturnHistory;
use crate::ranking::RankingTable;

use super::matrix::{
    compute_matrix, CorrelationError, CorrelationMatrix, CorrelationMethod, CorrelationResult,
};

/// 預設剔除門檻
pub const DEFAULT_THRESHOLD: f64 = 0.7;
/// 預設成對最少觀測數
pub const DEFAULT_MIN_PERIODS: usize = 30;

/// 相關性分析設定
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// 相關性方法
    pub method: CorrelationMethod,
    /// 剔除門檻：與已保留者相關係數超過此值即剔除
    pub threshold: f64,
    /// 成對最少觀測數，不足時該儲存格視為不相關
    pub min_periods: usize,
    /// 分群門檻：相關係數達此值視為同群
    pub cluster_threshold: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            method: CorrelationMethod::Pearson,
            threshold: DEFAULT_THRESHOLD,
            min_periods: DEFAULT_MIN_PERIODS,
            cluster_threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl CorrelationConfig {
    /// 指定方法
    pub fn with_method(mut self, method: CorrelationMethod) -> Self {
        self.method = method;
        self
    }

    /// 指定剔除門檻
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// 檢查設定；門檻必須落在 [0, 1]，最少觀測數至少 2
    pub fn validate(&self) -> CorrelationResult<()> {
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(CorrelationError::InvalidConfig(format!(
                "剔除門檻 {} 必須落在 [0, 1]",
                self.threshold
            )));
        }
        if !self.cluster_threshold.is_finite() || !(0.0..=1.0).contains(&self.cluster_threshold) {
            return Err(CorrelationError::InvalidConfig(format!(
                "分群門檻 {} 必須落在 [0, 1]",
                self.cluster_threshold
            )));
        }
        if self.min_periods < 2 {
            return Err(CorrelationError::InvalidConfig(format!(
                "最少觀測數 {} 不足以計算相關性",
                self.min_periods
            )));
        }
        Ok(())
    }
}

/// 相關性分析器
pub struct CorrelationAnalyzer {
    config: CorrelationConfig,
}

impl CorrelationAnalyzer {
    /// 建立分析器；設定不合法時立即拒絕
    pub fn new(config: CorrelationConfig) -> CorrelationResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// 以預設設定建立
    pub fn with_defaults() -> Self {
        Self {
            config: CorrelationConfig::default(),
        }
    }

    /// 目前設定
    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// 自報酬歷史計算矩陣
    pub fn matrix_from_returns(&self, history: &ReturnHistory) -> CorrelationMatrix {
        compute_matrix(history, self.config.method, self.config.min_periods)
    }

    /// 報酬歷史缺席時的退化矩陣：以排名表的列鍵建單位矩陣
    pub fn matrix_from_rankings(
        &self,
        rankings: &RankingTable,
    ) -> CorrelationResult<CorrelationMatrix> {
        let keys = rankings.row_keys()?;
        Ok(CorrelationMatrix::identity(keys))
    }

    /// 計算相關性矩陣：有報酬歷史用報酬，沒有就退化成單位矩陣
    pub fn correlation_matrix(
        &self,
        rankings: &RankingTable,
        history: &ReturnHistory,
    ) -> CorrelationResult<CorrelationMatrix> {
        if history.is_empty() {
            debug!("報酬歷史為空, 退化為單位矩陣");
            return self.matrix_from_rankings(rankings);
        }
        Ok(self.matrix_from_returns(history))
    }

    /// 剔除與已保留者過度相關的策略
    ///
    /// 依排名順序走訪：第一名必留，之後每列只要與任何已保留列的
    /// 相關係數超過門檻便剔除。不在矩陣中的列視為不相關而保留。
    /// 輸出保留原有的 rank 欄位值以便追溯。
    pub fn filter_correlated(
        &self,
        rankings: &RankingTable,
        matrix: &CorrelationMatrix,
    ) -> CorrelationResult<RankingTable> {
        let keys = rankings.row_keys()?;
        if keys.is_empty() {
            return Ok(RankingTable::from_dataframe(rankings.frame().clone()));
        }

        let mut kept_indices: Vec<usize> = Vec::new();
        let mut keep_flags: Vec<bool> = Vec::with_capacity(keys.len());
        for key in &keys {
            let keep = match matrix.index_of(key) {
                Some(idx) => {
                    let pass = kept_indices
                        .iter()
                        .all(|&kept| matrix.get(idx, kept) <= self.config.threshold);
                    if pass {
                        kept_indices.push(idx);
                    }
                    pass
                }
                // 沒有相關性資料的策略視為不相關
                None => true,
            };
            keep_flags.push(keep);
        }

        let removed = keep_flags.iter().filter(|&&keep| !keep).count();
        if removed > 0 {
            info!(
                "相關性過濾: 剔除 {} / {} (門檻 {})",
                removed,
                keys.len(),
                self.config.threshold
            );
        }

        let mask = BooleanChunked::from_slice("keep".into(), &keep_flags);
        let filtered = rankings.frame().filter(&mask)?;
        Ok(RankingTable::from_dataframe(filtered))
    }

    /// 貪婪分散選擇
    ///
    /// 先鎖定綜合分數最高者，之後每輪挑「與已入選者的最大相關係數
    /// 最小」的候選；同值時取分數較高者（排名在前者先見先贏）。
    pub fn greedy_diversity_selection(
        &self,
        rankings: &RankingTable,
        matrix: &CorrelationMatrix,
        max_select: usize,
    ) -> CorrelationResult<Vec<String>> {
        let keys = rankings.row_keys()?;
        if keys.is_empty() || max_select == 0 {
            return Ok(Vec::new());
        }

        let mut selected: Vec<String> = vec![keys[0].clone()];
        let mut selected_indices: Vec<usize> = matrix.index_of(&keys[0]).into_iter().collect();
        let mut remaining: Vec<String> = keys[1..].to_vec();

        while selected.len() < max_select && !remaining.is_empty() {
            let mut best_pos = 0;
            let mut best_corr = f64::INFINITY;
            for (pos, candidate) in remaining.iter().enumerate() {
                let max_corr = match matrix.index_of(candidate) {
                    Some(idx) => selected_indices
                        .iter()
                        .map(|&kept| matrix.get(idx, kept))
                        .fold(f64::NEG_INFINITY, f64::max),
                    None => 0.0,
                };
                let max_corr = if max_corr.is_finite() { max_corr } else { 0.0 };
                // 嚴格小於: 同值時保留排名較前的候選
                if max_corr < best_corr {
                    best_corr = max_corr;
                    best_pos = pos;
                }
            }

            let chosen = remaining.remove(best_pos);
            if let Some(idx) = matrix.index_of(&chosen) {
                selected_indices.push(idx);
            }
            selected.push(chosen);
        }

        debug!("貪婪分散選擇完成: 入選 {} / 上限 {}", selected.len(), max_select);
        Ok(selected)
    }

    /// 以連通分量找出相關性群集
    ///
    /// 相關係數達分群門檻的兩列視為同群；單列自成一群。輸出會
    /// 涵蓋矩陣全部標籤且互不重疊，群內標籤按字典序排列。
    pub fn find_clusters(&self, matrix: &CorrelationMatrix) -> Vec<Vec<String>> {
        let n = matrix.len();
        let mut assigned = vec![false; n];
        let mut clusters: Vec<Vec<String>> = Vec::new();

        for seed in 0..n {
            if assigned[seed] {
                continue;
            }
            let mut members = Vec::new();
            let mut queue = vec![seed];
            assigned[seed] = true;
            while let Some(node) = queue.pop() {
                members.push(matrix.labels()[node].clone());
                for other in 0..n {
                    if !assigned[other]
                        && matrix.get(node, other) >= self.config.cluster_threshold
                    {
                        assigned[other] = true;
                        queue.push(other);
                    }
                }
            }
            members.sort();
            clusters.push(members);
        }
        clusters
    }

    /// 入選組合的分散化分數
    ///
    /// 取所有入選對的平均相關係數, 分數為 (1 - 平均) 夾在 [0, 1]。
    /// 入選不足兩個時沒有分散可言, 回傳 0.0；矩陣缺資料的對視為
    /// 不相關。
    pub fn diversification_score(
        &self,
        selected: &[String],
        matrix: &CorrelationMatrix,
    ) -> f64 {
        if selected.len() <= 1 {
            return 0.0;
        }

        let mut sum = 0.0;
        let mut pair_count = 0usize;
        for i in 0..selected.len() {
            for j in (i + 1)..selected.len() {
                let value = matrix
                    .by_label(&selected[i], &selected[j])
                    .unwrap_or(0.0);
                sum += if value.is_finite() { value } else { 0.0 };
                pair_count += 1;
            }
        }
        let average = sum / pair_count as f64;
        (1.0 - average).clamp(0.0, 1.0)
    }
}
