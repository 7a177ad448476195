//! 表格匯出與回讀
//!
//! 整併表與排名表的 CSV / JSON 落地。CSV 不設精度截斷，
//! 回讀後的重新排名必須與原表一致。

use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::consolidate::ResultsTable;
use crate::ranking::RankingTable;

use super::repository::StoreResult;

fn ensure_parent(path: &Path) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// 將資料框寫成 CSV 檔
pub fn write_frame_csv(df: &DataFrame, path: impl AsRef<Path>) -> StoreResult<PathBuf> {
    let path = path.as_ref();
    ensure_parent(path)?;

    let mut out = df.clone();
    let file = File::create(path)?;
    CsvWriter::new(file).include_header(true).finish(&mut out)?;
    info!("表格已匯出 CSV: {} ({} 列)", path.display(), df.height());
    Ok(path.to_path_buf())
}

/// 將資料框寫成 JSON 檔（列導向）
pub fn write_frame_json(df: &DataFrame, path: impl AsRef<Path>) -> StoreResult<PathBuf> {
    let path = path.as_ref();
    ensure_parent(path)?;

    let mut out = df.clone();
    let file = File::create(path)?;
    JsonWriter::new(file)
        .with_json_format(JsonFormat::Json)
        .finish(&mut out)?;
    info!("表格已匯出 JSON: {} ({} 列)", path.display(), df.height());
    Ok(path.to_path_buf())
}

fn read_frame_csv(path: &Path) -> StoreResult<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

/// 自 CSV 回讀整併表
pub fn read_results_csv(path: impl AsRef<Path>) -> StoreResult<ResultsTable> {
    Ok(ResultsTable::from_dataframe(read_frame_csv(path.as_ref())?))
}

/// 自 CSV 回讀排名表
pub fn read_ranking_csv(path: impl AsRef<Path>) -> StoreResult<RankingTable> {
    Ok(RankingTable::from_dataframe(read_frame_csv(path.as_ref())?))
}
