//! csynd - concatenative synthesis engine
//!
//! Loads a pre-analyzed corpus, boots the DSP bridge, and runs the
//! harness loop that turns live analysis into playing voices.

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use clap::Parser;

use csyn_bridge::OscBridge;
use csyn_core::EngineConfig;
use csyn_engine::{Engine, Harness};
use csyn_index::DescriptorIndex;

/// Run the concatenative synthesis engine against a pre-analyzed corpus.
#[derive(Debug, Parser)]
#[command(name = "csynd", version, about)]
struct Cli {
    /// Path to the corpus analysis JSON.
    analysis_path: PathBuf,

    /// Config file (JSON) overriding the built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// DSP server host, overriding config/defaults.
    #[arg(long)]
    server_host: Option<String>,

    /// DSP server port, overriding config/defaults.
    #[arg(long)]
    server_port: Option<u16>,
}

fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            let mut config: EngineConfig = serde_json::from_str(&text)?;
            config.analysis_path = cli.analysis_path.clone();
            config
        }
        None => EngineConfig::new(cli.analysis_path.clone()),
    };
    if let Some(host) = &cli.server_host {
        config.server_host = host.clone();
    }
    if let Some(port) = cli.server_port {
        config.server_port = port;
    }
    Ok(config)
}

fn init_logging(config: &EngineConfig) {
    match &config.log_level {
        Some(level) => env_logger::Builder::new().parse_filters(level).init(),
        None => env_logger::init(),
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(&config);

    log::info!("loading corpus from {}", config.analysis_path.display());
    let index = Arc::new(DescriptorIndex::load(&config)?);
    log::info!("indexed {} partitions", index.len());

    let bridge = Arc::new(OscBridge::new(&config.server_host, config.server_port)?);
    let engine = Engine::new(config, bridge, index);
    let harness = Rc::new(Harness::new(engine));

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, harness.run())?;

    Ok(())
}
