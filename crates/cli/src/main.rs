use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use fuxi_provisioner::cinder::{CinderClient, CinderVolumePlugin};
use fuxi_provisioner::{PluginRegistry, Service, Settings};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fuxi-provisioner", version, about = "Dynamic Cinder volume provisioner for Kubernetes")]
struct Cli {
    /// YAML settings file; flags below override its values
    #[arg(long, env = "FUXI_CONFIG")]
    config: Option<PathBuf>,

    /// Server-side watch timeout in seconds
    #[arg(long, env = "FUXI_WATCH_TIMEOUT")]
    watch_timeout: Option<u32>,

    #[arg(long, env = "FUXI_CREATE_PV_RETRY_COUNT")]
    create_pv_retry_count: Option<u32>,

    /// Seconds between PV create attempts
    #[arg(long, env = "FUXI_CREATE_PV_RETRY_INTERVAL")]
    create_pv_retry_interval: Option<u64>,

    /// Seconds between full relists (0 disables)
    #[arg(long, env = "FUXI_RESYNC_PERIOD")]
    resync_period: Option<u64>,

    /// Provisioner name StorageClasses use to select the Cinder plugin
    #[arg(long, env = "FUXI_PLUGIN_NAME")]
    plugin_name: Option<String>,

    /// Block Storage v3 endpoint, including the project id
    #[arg(long, env = "FUXI_CINDER_ENDPOINT")]
    cinder_endpoint: String,

    #[arg(long, env = "FUXI_CINDER_TOKEN", hide_env_values = true)]
    cinder_token: String,

    /// Per-request timeout for Cinder calls, in seconds
    #[arg(long, env = "FUXI_CINDER_TIMEOUT", default_value_t = 30)]
    cinder_timeout: u64,

    /// How long to wait for in-flight work after a shutdown signal
    #[arg(long, env = "FUXI_SHUTDOWN_GRACE", default_value_t = 10)]
    shutdown_grace: u64,

    /// Log filter directives, e.g. `info,fuxi_kubehub=debug`
    #[arg(long, env = "FUXI_LOG", default_value = "info")]
    log: String,

    /// Serve Prometheus metrics on this host:port
    #[arg(long, env = "FUXI_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let mut s = match &self.config {
            Some(path) => Settings::from_yaml_file(path).with_context(|| format!("loading {}", path.display()))?,
            None => Settings::default(),
        };
        if let Some(v) = self.watch_timeout {
            s.watch_timeout_secs = v;
        }
        if let Some(v) = self.create_pv_retry_count {
            s.create_pv_retry_count = v;
        }
        if let Some(v) = self.create_pv_retry_interval {
            s.create_pv_retry_interval_secs = v;
        }
        if let Some(v) = self.resync_period {
            s.resync_period_secs = v;
        }
        if let Some(v) = &self.plugin_name {
            s.plugin_name = v.clone();
        }
        Ok(s)
    }
}

/// Install the fmt subscriber. A filter that does not parse falls back to
/// `info` and is reported once the subscriber is up.
fn init_tracing(directives: &str) {
    let (filter, rejected) = match EnvFilter::try_new(directives) {
        Ok(f) => (f, None),
        Err(e) => (EnvFilter::new("info"), Some(e)),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
    match rejected {
        Some(e) => warn!(filter = %directives, error = %e, "bad log filter; using info"),
        None => info!(filter = %directives, "logging initialised"),
    }
}

fn init_metrics(addr: Option<SocketAddr>) -> Result<()> {
    let Some(addr) = addr else {
        info!("metrics exporter disabled");
        return Ok(());
    };
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .with_context(|| format!("installing metrics exporter on {addr}"))?;
    info!(%addr, "Prometheus metrics exporter listening");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log);
    init_metrics(cli.metrics_addr)?;
    let settings = cli.settings()?;
    info!(?settings, "settings loaded");

    let client = kube::Client::try_default().await.context("building kubernetes client")?;
    let cinder = CinderClient::new(&cli.cinder_endpoint, &cli.cinder_token, Duration::from_secs(cli.cinder_timeout))
        .context("building cinder client")?;
    info!(endpoint = %cinder.endpoint(), plugin = %settings.plugin_name, "cinder plugin registered");
    let plugins = PluginRegistry::new()
        .with(settings.plugin_name.clone(), Arc::new(CinderVolumePlugin::new(Arc::new(cinder))));

    let mut service = Service::new(client, plugins, &settings);
    service.start();

    signal::ctrl_c().await.context("listening for ctrl-c")?;
    info!("shutdown requested");
    service.stop();
    let grace = Duration::from_secs(cli.shutdown_grace);
    if tokio::time::timeout(grace, service.join()).await.is_err() {
        warn!(grace_secs = cli.shutdown_grace, "controllers still busy after grace period; exiting");
    }
    Ok(())
}
