use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use optmodel_core::{Delta, EntityType, LoadState, ModelId};
use optmodel_optional::{optional_model, BothBound, Branch};
use optmodel_schema::SchemaRegistry;
use optmodel_store::{spawn_ingest, MainRepository, ObservableModel};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "optmodelctl", version, about = "Inspect model completeness and selector results")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Args, Debug)]
struct Target {
    /// Entity type, e.g. "user"
    model_type: String,
    /// Entity id
    id: String,
    /// Schema registry file (JSON)
    #[arg(long = "schema")]
    schema: PathBuf,
    /// Delta fixture file (JSON array) applied before evaluating
    #[arg(long = "deltas")]
    deltas: Option<PathBuf>,
    /// Use the link-following completeness check
    #[arg(long = "deep", action = ArgAction::SetTrue)]
    deep: bool,
}

#[derive(Args, Debug)]
struct Projection {
    /// Field rendered when the model is full
    #[arg(long = "field")]
    field: String,
    /// Prefix rendered (with the id) while the model is a stub
    #[arg(long = "loading", default_value = "loading")]
    loading: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Report whether a model is complete, and which required fields are missing
    Check {
        #[command(flatten)]
        target: Target,
    },
    /// Evaluate a two-branch selector once
    Select {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        projection: Projection,
    },
    /// Feed deltas through the ingest loop one by one and print the selector after each epoch
    Replay {
        #[command(flatten)]
        target: Target,
        #[command(flatten)]
        projection: Projection,
        /// Ingest queue capacity
        #[arg(long = "queue-cap", env = "OPTMODEL_QUEUE_CAP", default_value_t = 2048)]
        queue_cap: usize,
    },
}

#[derive(Debug, Serialize)]
struct CheckReport {
    model_type: String,
    id: String,
    complete: bool,
    load: LoadState,
    missing: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SelectReport {
    model_type: String,
    id: String,
    branch: &'static str,
    value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    epoch: Option<u64>,
}

fn init_tracing() {
    let env = std::env::var("OPTMODEL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("OPTMODEL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid OPTMODEL_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_deltas(path: &Path) -> Result<Vec<Delta>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading deltas file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing deltas file {}", path.display()))
}

fn open_repo(target: &Target) -> Result<Arc<MainRepository>> {
    let registry = SchemaRegistry::load(&target.schema)?;
    Ok(Arc::new(MainRepository::new(registry)))
}

fn render(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

type TextSelector = BothBound<ObservableModel, String, String>;

fn build_selector(repo: &Arc<MainRepository>, target: &Target, projection: &Projection) -> Result<TextSelector> {
    let base = optional_model(repo, EntityType::new(target.model_type.clone()), ModelId::new(target.id.clone()))?;
    let base = if target.deep { base.deep() } else { base };
    let loading = projection.loading.clone();
    let field = projection.field.clone();
    Ok(base
        .on_empty(move |stub| format!("{}:{}", loading, stub.id))
        .on_full(move |full| full.get(&field).map(render).unwrap_or_default()))
}

fn select_report(target: &Target, sel: &TextSelector, epoch: Option<u64>) -> Result<SelectReport> {
    let (branch, value) = match sel.result()? {
        Branch::Empty(v) => ("empty", v),
        Branch::Full(v) => ("full", v),
    };
    Ok(SelectReport { model_type: target.model_type.clone(), id: target.id.clone(), branch, value, epoch })
}

fn print_select(output: Output, report: &SelectReport) -> Result<()> {
    match output {
        Output::Human => match report.epoch {
            Some(epoch) => println!("epoch {:<4} {:<5} {}", epoch, report.branch, report.value),
            None => println!("{:<5} {}", report.branch, report.value),
        },
        Output::Json => println!("{}", serde_json::to_string(report)?),
    }
    Ok(())
}

fn run_check(output: Output, target: &Target) -> Result<()> {
    let repo = open_repo(target)?;
    if let Some(path) = target.deltas.as_deref() {
        repo.apply(load_deltas(path)?);
    }
    let sel = optional_model(&repo, EntityType::new(target.model_type.clone()), ModelId::new(target.id.clone()))?;
    let sel = if target.deep { sel.deep() } else { sel };
    let complete = sel.is_complete()?;
    let state = sel.model().peek();
    let meta = repo.metadata(sel.model_type())?;
    let report = CheckReport {
        model_type: target.model_type.clone(),
        id: target.id.clone(),
        complete,
        load: state.load.clone(),
        missing: meta.missing_fields(&state.record).into_iter().map(str::to_string).collect(),
    };
    match output {
        Output::Human => {
            let verdict = if report.complete { "full" } else { "stub" };
            println!("{}/{} • {} • load={:?}", report.model_type, report.id, verdict, report.load);
            if !report.missing.is_empty() {
                println!("missing: {}", report.missing.join(", "));
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn run_select(output: Output, target: &Target, projection: &Projection) -> Result<()> {
    let repo = open_repo(target)?;
    if let Some(path) = target.deltas.as_deref() {
        repo.apply(load_deltas(path)?);
    }
    let sel = build_selector(&repo, target, projection)?;
    print_select(output, &select_report(target, &sel, None)?)
}

async fn run_replay(output: Output, target: &Target, projection: &Projection, queue_cap: usize) -> Result<()> {
    let repo = open_repo(target)?;
    let deltas = match target.deltas.as_deref() {
        Some(path) => load_deltas(path)?,
        None => anyhow::bail!("replay needs --deltas"),
    };
    let sel = build_selector(&repo, target, projection)?;
    let (tx, handle) = spawn_ingest(Arc::clone(&repo), queue_cap);
    let mut rx = handle.subscribe_epoch();

    print_select(output, &select_report(target, &sel, Some(handle.current_epoch()))?)?;
    for d in deltas {
        let before = *rx.borrow();
        tx.send(d).await.context("ingest loop closed")?;
        // one delta per epoch so every step is visible
        while *rx.borrow() == before {
            match tokio::time::timeout(Duration::from_secs(2), rx.changed()).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => anyhow::bail!("ingest loop stopped"),
                Err(_) => {
                    warn!("timed out waiting for ingest epoch");
                    break;
                }
            }
        }
        print_select(output, &select_report(target, &sel, Some(*rx.borrow()))?)?;
    }
    drop(tx);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Check { target } => {
            info!(model_type = %target.model_type, id = %target.id, deep = target.deep, "check invoked");
            run_check(cli.output, target)
        }
        Commands::Select { target, projection } => {
            info!(model_type = %target.model_type, id = %target.id, field = %projection.field, "select invoked");
            run_select(cli.output, target, projection)
        }
        Commands::Replay { target, projection, queue_cap } => {
            info!(model_type = %target.model_type, id = %target.id, queue_cap, "replay invoked");
            run_replay(cli.output, target, projection, *queue_cap).await
        }
    }
}
