use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uptime_k8s::client::{HttpMonitoringApi, MonitoringApi};
use uptime_k8s::controller::{self, OperatorConfig};
use uptime_k8s::Error;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the operator
    Run(RunArgs),
    /// Show version and build information
    Version,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Namespace to watch (all namespaces when omitted)
    #[arg(long, env = "OPERATOR_NAMESPACE")]
    namespace: Option<String>,

    /// Base URL of the monitoring API
    #[arg(long, env = "UPTIME_API_URL")]
    api_url: String,

    /// API key sent as a bearer token
    #[arg(long, env = "UPTIME_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Timeout for each monitoring API request, in seconds
    #[arg(long, env = "UPTIME_API_TIMEOUT_SECS", default_value_t = 30)]
    api_timeout_secs: u64,

    /// Give up on external cleanup after this many seconds and release the finalizer
    #[arg(long, env = "CLEANUP_TIMEOUT_SECS", default_value_t = 600)]
    cleanup_timeout_secs: u64,

    /// Re-sync interval for healthy resources, in seconds
    #[arg(long, env = "RESYNC_INTERVAL_SECS", default_value_t = 300)]
    resync_interval_secs: u64,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Port for the health and metrics server
    #[cfg(feature = "rest-api")]
    #[arg(long, env = "HTTP_PORT", default_value_t = uptime_k8s::rest_api::DEFAULT_PORT)]
    http_port: u16,
}

impl RunArgs {
    fn operator_config(&self) -> Result<OperatorConfig, Error> {
        if self.cleanup_timeout_secs == 0 {
            return Err(Error::ConfigError(
                "--cleanup-timeout-secs must be greater than zero".to_string(),
            ));
        }
        if self.resync_interval_secs == 0 {
            return Err(Error::ConfigError(
                "--resync-interval-secs must be greater than zero".to_string(),
            ));
        }
        Ok(OperatorConfig {
            namespace: self.namespace.clone().filter(|ns| !ns.is_empty()),
            cleanup_timeout: Duration::from_secs(self.cleanup_timeout_secs),
            resync_interval: Duration::from_secs(self.resync_interval_secs),
            ..Default::default()
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    match args.command {
        Commands::Version => {
            println!("uptime-k8s Operator v{}", env!("CARGO_PKG_VERSION"));
            println!("Build Date: {}", env!("BUILD_DATE"));
            println!("Git SHA: {}", env!("GIT_SHA"));
            println!("Rust Version: {}", env!("RUST_VERSION"));
            Ok(())
        }
        Commands::Run(run_args) => run_operator(run_args).await,
    }
}

async fn run_operator(args: RunArgs) -> Result<(), Error> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let (json_layer, text_layer) = match args.log_format {
        LogFormat::Json => (Some(fmt::layer().json().with_target(true)), None),
        LogFormat::Text => (None, Some(fmt::layer().with_target(true))),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer);

    // Only enable OTEL if an endpoint is provided
    let otel_layer = uptime_k8s::telemetry::init_telemetry(&registry);
    let otel_enabled = otel_layer.is_some();
    registry.with(otel_layer).init();
    if otel_enabled {
        info!("OpenTelemetry tracing initialized");
    } else {
        info!("OpenTelemetry tracing disabled (OTEL_EXPORTER_OTLP_ENDPOINT not set)");
    }

    info!("Starting uptime-k8s Operator v{}", env!("CARGO_PKG_VERSION"));

    let config = args.operator_config()?;

    let client = kube::Client::try_default()
        .await
        .map_err(Error::KubeError)?;
    info!("Connected to Kubernetes cluster");

    let http_api = HttpMonitoringApi::new(
        &args.api_url,
        &args.api_key,
        Duration::from_secs(args.api_timeout_secs),
    )?;
    let api: Arc<dyn MonitoringApi> = Arc::new(http_api);
    #[cfg(feature = "metrics")]
    let api: Arc<dyn MonitoringApi> = Arc::new(controller::metrics::MeteredMonitoringApi::new(api));

    let state = Arc::new(controller::ControllerState {
        client,
        api,
        config,
    });

    #[cfg(feature = "rest-api")]
    {
        let port = args.http_port;
        tokio::spawn(async move {
            if let Err(e) = uptime_k8s::rest_api::run_server(port).await {
                tracing::error!("REST API server error: {:?}", e);
            }
        });
    }

    // Run the main controller loop
    let result = controller::run_controller(state).await;

    // Flush any remaining traces
    uptime_k8s::telemetry::shutdown_telemetry();

    result
}
