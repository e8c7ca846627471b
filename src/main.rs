use anyhow::Context;
use plc_runtime::{JsonlSummaryLog, MemoryPersistence, Persistence, Runtime, RuntimeConfig};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("plc_runtime=info"))
        .context("invalid log filter")?;

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(std::env::var_os("PLC_LOG_JSON").is_some())?;

    info!("PLC runtime v{} starting", plc_runtime::VERSION);

    let Some(config_path) = std::env::args().nth(1) else {
        error!("Usage: plc-runtime <config.yaml>");
        std::process::exit(1);
    };

    let config = RuntimeConfig::from_file(&config_path)
        .with_context(|| format!("loading {}", config_path))?;
    info!(
        "Loaded {} tags, {} alarms, {} machines",
        config.tags.len(),
        config.alarms.len(),
        config.machines.len()
    );

    let persistence: Arc<dyn Persistence> = match &config.summary_log {
        Some(path) => Arc::new(
            JsonlSummaryLog::open(path)
                .with_context(|| format!("opening summary log {}", path.display()))?,
        ),
        None => Arc::new(MemoryPersistence::new()),
    };

    let runtime = Runtime::new(config, persistence);
    runtime.reload()?;
    runtime.load_config()?;
    runtime.start()?;

    signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("Received shutdown signal");
    runtime.shutdown();

    for name in runtime.scheduler().machine_names() {
        if let Some(stats) = runtime.scheduler().stats(&name) {
            info!(
                "Machine '{}': {} cycles, {} overruns, {} errors, {} panics",
                name, stats.cycles, stats.overruns, stats.errors, stats.panics
            );
        }
    }
    let dropped = runtime.alarms().dropped_notifications();
    if dropped > 0 {
        warn!("{} alarm notifications dropped on full queue", dropped);
    }
    info!("Runtime stopped normally");

    Ok(())
}
