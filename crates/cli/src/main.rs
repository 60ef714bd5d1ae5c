use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

mod render;
mod run;
mod workers;

#[derive(Parser, Debug)]
#[command(name = "istio-smi", version, about = "Translate SMI traffic policy into Istio objects")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace to watch (default: all namespaces)
    #[arg(long = "ns", global = true, env = "ISTIO_SMI_NAMESPACE")]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch SMI objects in the cluster and keep Istio objects in step
    Run,
    /// Translate SMI manifests offline and print the generated objects
    Render {
        /// YAML file with one or more SMI documents
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },
}

fn init_tracing() {
    let env = std::env::var("ISTIO_SMI_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("ISTIO_SMI_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid ISTIO_SMI_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => run::run(cli.namespace).await,
        Commands::Render { file } => render::render_file(&file, cli.namespace.as_deref(), cli.output).await,
    }
}
