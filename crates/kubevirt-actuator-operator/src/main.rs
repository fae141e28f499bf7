//! KubeVirt machine actuator - reconciles Machines against KubeVirt VMs

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use kube::Client;

use kubevirt_actuator_client::KubeconfigClientBuilder;
use kubevirt_actuator_common::config::{
    DEFAULT_DELETE_GRACE_PERIOD, DEFAULT_REQUEUE_AFTER, DEFAULT_REQUEUE_AFTER_FATAL,
    DEFAULT_RESYNC_INTERVAL,
};
use kubevirt_actuator_common::telemetry::{init_telemetry, TelemetryConfig};
use kubevirt_actuator_common::ActuatorConfig;
use kubevirt_actuator_operator::controller::Context;
use kubevirt_actuator_operator::{run_controller, WatchScope};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

/// Machine actuator for KubeVirt virtual machines
#[derive(Parser, Debug)]
#[command(name = "kubevirt-actuator", version, about, long_about = None)]
struct Cli {
    /// Only watch Machines in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Only watch Machines matching this label selector
    #[arg(long, env = "MACHINE_LABEL_SELECTOR")]
    label_selector: Option<String>,

    /// Seconds before re-checking a VM that is not ready yet
    #[arg(long, env = "REQUEUE_AFTER_SECONDS", default_value_t = DEFAULT_REQUEUE_AFTER.as_secs())]
    requeue_after: u64,

    /// Seconds before retrying a machine that looks stuck
    #[arg(
        long,
        env = "REQUEUE_AFTER_FATAL_SECONDS",
        default_value_t = DEFAULT_REQUEUE_AFTER_FATAL.as_secs()
    )]
    requeue_after_fatal: u64,

    /// Grace period, in seconds, for VM deletion
    #[arg(
        long,
        env = "DELETE_GRACE_PERIOD_SECONDS",
        default_value_t = DEFAULT_DELETE_GRACE_PERIOD.as_secs()
    )]
    delete_grace_period: u64,

    /// Seconds after the last status change during which a missing VM is
    /// still expected to appear (defaults to the requeue delay)
    #[arg(long, env = "EVENTUAL_CONSISTENCY_WINDOW_SECONDS")]
    eventual_consistency_window: Option<u64>,

    /// Seconds between resyncs of settled machines
    #[arg(long, env = "RESYNC_INTERVAL_SECONDS", default_value_t = DEFAULT_RESYNC_INTERVAL.as_secs())]
    resync_interval: u64,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

impl Cli {
    fn actuator_config(&self) -> ActuatorConfig {
        let requeue_after = Duration::from_secs(self.requeue_after);
        ActuatorConfig {
            requeue_after,
            requeue_after_fatal: Duration::from_secs(self.requeue_after_fatal),
            delete_grace_period: Duration::from_secs(self.delete_grace_period),
            eventual_consistency_window: self
                .eventual_consistency_window
                .map(Duration::from_secs)
                .unwrap_or(requeue_after),
            resync_interval: Duration::from_secs(self.resync_interval),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::ring::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install rustls crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        service_name: "kubevirt-actuator".to_string(),
        json: matches!(cli.log_format, LogFormat::Json),
    })?;

    let config = cli.actuator_config();
    tracing::info!(?config, "actuator configuration");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create kube client: {}", e))?;
    let ctx = Arc::new(Context::new(
        client.clone(),
        KubeconfigClientBuilder::default(),
        config,
    ));

    run_controller(
        client,
        ctx,
        WatchScope {
            namespace: cli.namespace,
            label_selector: cli.label_selector,
        },
    )
    .await;

    tracing::info!("controller stopped");
    Ok(())
}
