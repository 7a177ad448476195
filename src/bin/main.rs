use anyhow::{Context, Result};
use backtest_pipeline::backtest::{demo_batch, BatchOutcome, SyntheticExecutor};
use backtest_pipeline::config;
use backtest_pipeline::consolidate::{compare_by_metric, consolidate};
use backtest_pipeline::pipeline::{PipelineReport, ResearchPipeline};
use backtest_pipeline::store::{self, FileResultStore};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "backtest_pipeline", about = "平行回測協調與策略排名管線")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 以合成批次執行完整管線並輸出排名工件
    Demo {
        /// 批次任務數
        #[arg(short = 'n', long, default_value_t = 60)]
        jobs: usize,

        /// 合成失敗率 (0.0 ~ 1.0)
        #[arg(long, default_value_t = 0.1)]
        failure_rate: f64,

        /// worker 數上限（預設取配置值）
        #[arg(short, long)]
        workers: Option<u32>,

        /// 合成執行器的隨機種子
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// 工件輸出目錄（預設取配置的 export_dir）
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// 整併既有批次結果檔並輸出排名工件
    Rank {
        /// 批次結果 JSON 檔（至少一個）
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// 工件輸出目錄（預設取配置的 export_dir）
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// 依指定指標比較多個批次結果檔
    Compare {
        /// 批次結果 JSON 檔（至少一個）
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// 指標欄位名稱
        #[arg(short, long, default_value = "sharpe_ratio")]
        metric: String,

        /// 比較表輸出 CSV 路徑（可選）
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 初始化配置；配置文件缺失時 get_config 會退回內建預設值
    if let Err(e) = config::init_config() {
        eprintln!("無法加載配置文件, 使用內建預設值: {e}");
    }
    let app_config = config::get_config();

    // 初始化日誌系統
    init_logging(&app_config.log)?;

    match cli.command {
        Commands::Demo {
            jobs,
            failure_rate,
            workers,
            seed,
            output,
        } => run_demo(app_config, jobs, failure_rate, workers, seed, output).await,
        Commands::Rank { files, output } => run_rank(app_config, &files, output).await,
        Commands::Compare {
            files,
            metric,
            output,
        } => run_compare(&files, &metric, output),
    }
}

// 初始化日誌系統
fn init_logging(log_config: &config::LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("backtest_pipeline={}", log_config.level.to_lowercase()))
    });

    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).context("設置日誌系統失敗")?;
    Ok(())
}

async fn run_demo(
    app_config: &config::ApplicationConfig,
    jobs: usize,
    failure_rate: f64,
    workers: Option<u32>,
    seed: u64,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut pipeline_config = app_config.clone();
    if let Some(workers) = workers {
        pipeline_config.engine.max_workers = workers;
    }

    let executor = Arc::new(SyntheticExecutor::new(seed).with_failure_rate(failure_rate));
    let result_store = Arc::new(FileResultStore::with_cache(
        &app_config.store.results_dir,
        app_config.store.cache_capacity,
        app_config.store.cache_ttl_secs,
    ));
    let pipeline =
        ResearchPipeline::from_config(&pipeline_config, executor)?.with_store(result_store);

    let batch_id = format!("demo-{}", chrono::Utc::now().format("%Y%m%d%H%M%S"));
    let batch = demo_batch(&batch_id, jobs)?;
    info!("示範批次 {} 啟動: {} 個任務, 失敗率 {}", batch_id, jobs, failure_rate);

    let report = pipeline.run(batch).await?;
    println!("{}", report.format_report(app_config.ranking.top_n as usize));

    let out_dir = output.unwrap_or_else(|| PathBuf::from(&app_config.store.export_dir));
    export_artifacts(&report, &out_dir)?;
    Ok(())
}

async fn run_rank(
    app_config: &config::ApplicationConfig,
    files: &[PathBuf],
    output: Option<PathBuf>,
) -> Result<()> {
    let merged = merge_outcomes(load_outcomes(files)?);
    let history = backtest_pipeline::consolidate::collect_return_history(&merged.successes);

    // 分析段不執行回測, 執行器僅供管線組裝
    let executor = Arc::new(SyntheticExecutor::new(0));
    let pipeline = ResearchPipeline::from_config(app_config, executor)?;
    let report = pipeline.analyze_outcome(merged, history)?;
    println!("{}", report.format_report(app_config.ranking.top_n as usize));

    let out_dir = output.unwrap_or_else(|| PathBuf::from(&app_config.store.export_dir));
    export_artifacts(&report, &out_dir)?;
    Ok(())
}

fn run_compare(files: &[PathBuf], metric: &str, output: Option<PathBuf>) -> Result<()> {
    let merged = merge_outcomes(load_outcomes(files)?);
    let table = consolidate(&merged.successes)?;
    let comparison = compare_by_metric(&table, metric)?;
    println!("{}", comparison.format_table());

    if let Some(path) = output {
        let keys: Vec<String> = comparison.rows.iter().map(|(k, _)| k.clone()).collect();
        let values: Vec<f64> = comparison.rows.iter().map(|(_, v)| *v).collect();
        let frame = polars::df!("strategy" => keys, metric => values)?;
        store::write_frame_csv(&frame, &path)?;
        println!("比較表已寫入 {}", path.display());
    }
    Ok(())
}

fn load_outcomes(files: &[PathBuf]) -> Result<Vec<BatchOutcome>> {
    files
        .iter()
        .map(|path| {
            let payload = std::fs::read(path)
                .with_context(|| format!("無法讀取結果檔 {}", path.display()))?;
            serde_json::from_slice::<BatchOutcome>(&payload)
                .with_context(|| format!("結果檔格式不正確: {}", path.display()))
        })
        .collect()
}

fn merge_outcomes(outcomes: Vec<BatchOutcome>) -> BatchOutcome {
    let batch_ids: Vec<String> = outcomes.iter().map(|o| o.batch_id.clone()).collect();
    let mut merged = BatchOutcome::empty(batch_ids.join("+"));
    for outcome in outcomes {
        merged.successes.extend(outcome.successes);
        merged.failures.extend(outcome.failures);
        merged.elapsed_secs += outcome.elapsed_secs;
    }
    merged
}

#[derive(Serialize)]
struct SelectionArtifact<'a> {
    selected: &'a [String],
    diversification_score: f64,
    clusters: &'a [Vec<String>],
}

fn export_artifacts(report: &PipelineReport, out_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("無法建立輸出目錄 {}", out_dir.display()))?;

    store::write_frame_csv(report.table.frame(), out_dir.join("consolidated.csv"))?;
    store::write_frame_csv(report.rankings.frame(), out_dir.join("ranking.csv"))?;
    store::write_frame_json(report.rankings.frame(), out_dir.join("ranking.json"))?;
    report
        .matrix
        .to_csv_file(out_dir.join("correlation_matrix.csv"))?;

    let selection = SelectionArtifact {
        selected: &report.selected,
        diversification_score: report.diversification_score,
        clusters: &report.clusters,
    };
    let selection_path = out_dir.join("selection.json");
    std::fs::write(&selection_path, serde_json::to_vec_pretty(&selection)?)
        .with_context(|| format!("無法寫入 {}", selection_path.display()))?;

    info!("工件已輸出至 {}", out_dir.display());
    Ok(())
}
