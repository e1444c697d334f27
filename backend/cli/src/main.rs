mod api;
mod runtime;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cadence_config::CadenceConfig;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use api::AppState;
use runtime::Runtime;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(about = "Cadence: recurring automation scheduler")]
#[command(version)]
struct Cli {
    /// Path to the config file (defaults to <config dir>/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server and the periodic ticker
    Serve {
        /// Port to bind the HTTP server to
        #[arg(short, long)]
        port: Option<u16>,
        /// Serve the API only; fan-out and drain run on request
        #[arg(long)]
        no_ticker: bool,
    },
    /// Run one trigger pass over every tenant
    FanOut,
    /// Run one trigger pass for a single tenant
    RunTenant { tenant_id: String },
    /// Attempt every pending task whose backoff has elapsed
    Drain,
    /// Validate the config file and list the env vars it references
    CheckConfig,
    /// Show whether a local server is running
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cadence_config::config_file_path(&cadence_config::config_dir()));

    if let Commands::CheckConfig = cli.command {
        return check_config(&config_path).await;
    }

    let config = cadence_config::load_and_prepare(&config_path).await?;
    let log_dir = config
        .log_dir()
        .map(PathBuf::from)
        .unwrap_or_else(|| cadence_config::config_dir().join("logs"));
    cadence_logging::init_logger(&log_dir, &config.log_level());

    match cli.command {
        Commands::Serve { port, no_ticker } => {
            run_server(config, port, !no_ticker).await?;
        }
        Commands::FanOut => {
            let runtime = Runtime::open(&config)?;
            let report = runtime.fan_out.run(Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::RunTenant { tenant_id } => {
            let runtime = Runtime::open(&config)?;
            let pass = runtime.trigger.run_tenant(&tenant_id, Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&pass)?);
        }
        Commands::Drain => {
            let runtime = Runtime::open(&config)?;
            let report = runtime.worker.drain(Utc::now()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Status => {
            let addr = config.server_addr();
            println!("Cadence status: checking {addr}...");
            let client = reqwest::Client::new();
            match client.get(format!("http://{addr}/api/health")).send().await {
                Ok(resp) => {
                    let body: serde_json::Value = resp.json().await?;
                    println!("{}", serde_json::to_string_pretty(&body)?);
                }
                Err(_) => {
                    println!("Cadence is not running on {addr}");
                }
            }
        }
        Commands::CheckConfig => check_config(&config_path).await?,
    }

    Ok(())
}

async fn check_config(path: &std::path::Path) -> Result<()> {
    let (_, report) = cadence_config::load_with_report(path).await?;
    let raw = cadence_config::load_raw_config(path).await?;

    println!("Config: {}", path.display());
    for warning in &report.warnings {
        println!("  warning  {}: {}", warning.path, warning.message);
    }
    for err in &report.errors {
        println!("  error    {}: {}", err.path, err.message);
    }
    let vars = cadence_config::collect_referenced_vars(&raw);
    if !vars.is_empty() {
        println!("Referenced env vars: {}", vars.join(", "));
    }

    if report.is_valid() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("{} config error(s)", report.errors.len())
    }
}

async fn run_server(config: CadenceConfig, port: Option<u16>, ticker: bool) -> Result<()> {
    let runtime = Arc::new(Runtime::open(&config)?);

    let addr = match port {
        Some(port) => {
            let bind = config
                .server
                .as_ref()
                .and_then(|s| s.bind.clone())
                .unwrap_or_else(|| cadence_config::defaults::DEFAULT_BIND.to_string());
            format!("{bind}:{port}")
        }
        None => config.server_addr(),
    };
    info!(addr = %addr, db = %config.db_path(), ticker, "Starting Cadence");

    if ticker {
        let runtime = Arc::clone(&runtime);
        let interval = config.scheduler().poll_interval();
        tokio::spawn(async move {
            run_ticker(runtime, interval).await;
        });
    }

    let state = Arc::new(AppState { runtime });
    let app = api::build_router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(addr = %addr, "Cadence HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

/// Fan out over tenants, then drain due retries, once per poll interval.
async fn run_ticker(runtime: Arc<Runtime>, every: std::time::Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Ticker stopping");
                return;
            }
        }

        match runtime.fan_out.run(Utc::now()).await {
            Ok(report) => info!(
                tenants = report.tenants,
                fired = report.fired(),
                failures = report.failures.len(),
                "Fan-out pass finished"
            ),
            Err(e) => error!(error = %e, "Fan-out pass failed"),
        }

        match runtime.worker.drain(Utc::now()).await {
            Ok(report) => info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                exhausted = report.exhausted,
                "Queue drain finished"
            ),
            Err(e) => error!(error = %e, "Queue drain failed"),
        }
    }
}
