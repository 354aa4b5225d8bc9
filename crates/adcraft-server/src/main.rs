use adcraft_core::Config;
use adcraft_server::Service;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "adcraft-server", about = "Adcraft preview, render and export service")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 8320)]
    port: u16,

    /// Address to bind.
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Config file (default: ~/.config/adcraft/config.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Templates root, overriding the config file.
    #[arg(long)]
    templates: Option<PathBuf>,

    /// Public URL of this service, used as the base for rendered documents.
    #[arg(long)]
    public_url: Option<String>,

    /// Browser backend: playwright or mock.
    #[arg(long)]
    backend: Option<String>,

    /// Render, export and DPA requests served at once (default from config).
    #[arg(long)]
    max_jobs: Option<usize>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("ADCRAFT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(msg) = run(cli) {
        error!("{msg}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    }
    .map_err(|e| e.to_string())?;
    if let Some(templates) = cli.templates {
        config.templates_root = templates;
    }
    if let Some(public_url) = cli.public_url {
        config.public_base_url = Some(public_url);
    }
    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(max_jobs) = cli.max_jobs {
        config.max_concurrent_jobs = max_jobs;
    }

    let addr = format!("{}:{}", cli.bind, cli.port);
    info!("starting adcraft-server on {addr}");
    info!("templates root: {}", config.templates_root.display());
    info!("job limit: {}", config.job_limit());

    let service = Arc::new(Service::from_config(&config).map_err(|e| e.to_string())?);
    adcraft_server::run_server(&service, &addr).map_err(|e| format!("cannot serve on {addr}: {e}"))
}
