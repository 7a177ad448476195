//! 研究管線示範
//!
//! 用合成執行器跑一個小批次, 展示從批次執行到排名與
//! 分散選擇的完整流程。執行: cargo run --example pipeline_demo

use backtest_pipeline::backtest::{demo_batch, SyntheticExecutor};
use backtest_pipeline::pipeline::ResearchPipeline;
use std::error::Error;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // 初始化日誌
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("啟動研究管線示範...");

    let executor = SyntheticExecutor::new(2024).with_failure_rate(0.08);
    let pipeline = ResearchPipeline::with_defaults(Arc::new(executor));

    let batch = demo_batch("demo", 48)?;
    info!("提交批次: {} 個任務", batch.len());

    let report = pipeline.run(batch).await?;

    info!("=== 管線報告 ===");
    for line in report.format_report(10).lines() {
        info!("{}", line);
    }

    info!("=== 相關性群集 ===");
    for (i, cluster) in report.clusters.iter().enumerate() {
        info!("群集 {}: {}", i + 1, cluster.join(", "));
    }

    Ok(())
}
