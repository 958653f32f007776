//! Resilience Harness
//!
//! Runs the stop-scheduler scenario against a Kubernetes cluster, or against
//! an in-process cluster with `--standalone`, and exits non-zero when the
//! scenario fails.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use resilience_harness::{
    load_dir, register_builtin, AppSpecFactory, ClusterApiRef, DriverRegistry, Error,
    InMemoryCluster, K8sDriver, KubeClusterClient, KubeClusterConfig, Result, SchedulerDriver,
    SshServiceConfig, SshServiceController, StopSchedulerConfig, StopSchedulerScenario,
    WaitOptions,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Resilience Harness - schedule apps, stop the scheduler on their nodes, check they survive
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scheduler driver to use
    #[arg(long, env = "HARNESS_DRIVER", default_value = "k8s")]
    driver: String,

    /// Test name; instance IDs are `{test-name}-{i}`
    #[arg(long, env = "HARNESS_TEST_NAME", default_value = "stopscheduler")]
    test_name: String,

    /// Instances to schedule per app
    #[arg(long, env = "HARNESS_SCALE_FACTOR", default_value = "1")]
    scale_factor: usize,

    /// App to schedule (repeatable); all registered apps when omitted
    #[arg(long = "app", env = "HARNESS_APPS", value_delimiter = ',')]
    apps: Vec<String>,

    /// Directory of additional app manifests (*.yaml, *.yml)
    #[arg(long, env = "HARNESS_SPEC_DIR")]
    spec_dir: Option<PathBuf>,

    /// Seconds to wait after stopping the scheduler service
    #[arg(long, env = "HARNESS_SETTLE_SECS", default_value = "360")]
    settle_secs: u64,

    /// Deadline for each validation in seconds
    #[arg(long, env = "HARNESS_VALIDATE_TIMEOUT_SECS", default_value = "600")]
    validate_timeout_secs: u64,

    /// Initial readiness poll interval in seconds
    #[arg(long, env = "HARNESS_POLL_INTERVAL_SECS", default_value = "5")]
    poll_interval_secs: u64,

    /// SSH user for node service control
    #[arg(long, env = "HARNESS_SSH_USER", default_value = "root")]
    ssh_user: String,

    /// systemd unit of the scheduling service
    #[arg(long, env = "HARNESS_SCHED_SERVICE", default_value = "kubelet")]
    sched_service: String,

    /// Run against an in-process cluster (no Kubernetes)
    #[arg(long, env = "STANDALONE")]
    standalone: bool,

    /// Write the JSON report to this file instead of stdout
    #[arg(long, env = "HARNESS_REPORT")]
    report: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = init_logging(&args) {
        eprintln!("{}", e);
        std::process::exit(2);
    }

    match run(args).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{}", e);
            std::process::exit(2);
        }
    }
}

async fn run(args: Args) -> Result<bool> {
    info!("Starting Resilience Harness");
    info!("  Version: {}", resilience_harness::VERSION);
    info!("  Driver: {}", args.driver);
    info!("  Scale factor: {}", args.scale_factor);
    info!("  Standalone mode: {}", args.standalone);

    // App specs are fixed before any driver is built
    let mut factory = AppSpecFactory::new();
    register_builtin(&mut factory)?;
    if let Some(dir) = &args.spec_dir {
        let loaded = load_dir(&mut factory, dir)?;
        info!("Loaded {} app specs from {}", loaded, dir.display());
    }
    let factory = Arc::new(factory);

    let client = cluster_client(&args).await?;

    let mut registry = DriverRegistry::new();
    let k8s = K8sDriver::new(client, factory);
    registry.register(k8s.name().to_string(), Arc::new(k8s));

    let driver = registry.get(&args.driver)?;
    driver.init().await?;
    info!("Driver {} initialized with {} nodes", driver.name(), driver.nodes().len());

    let poll_interval = Duration::from_secs(args.poll_interval_secs);
    let config = StopSchedulerConfig {
        test_name: args.test_name.clone(),
        scale_factor: args.scale_factor,
        app_keys: args.apps.clone(),
        settle: Duration::from_secs(args.settle_secs),
        wait: WaitOptions {
            poll_interval,
            ..WaitOptions::with_timeout(Duration::from_secs(args.validate_timeout_secs))
        },
    };

    let report = StopSchedulerScenario::new(driver, config).run().await;
    let json = report.to_json()?;
    match &args.report {
        Some(path) => {
            tokio::fs::write(path, json).await?;
            info!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(report.passed)
}

async fn cluster_client(args: &Args) -> Result<ClusterApiRef> {
    if args.standalone {
        info!("Using in-memory cluster");
        return Ok(Arc::new(
            InMemoryCluster::new()
                .with_master("master-0", "10.0.0.10")
                .with_worker("worker-0", "10.0.0.20")
                .with_worker("worker-1", "10.0.0.21")
                .with_worker("worker-2", "10.0.0.22"),
        ));
    }

    let services = Arc::new(SshServiceController::new(SshServiceConfig {
        user: args.ssh_user.clone(),
        service: args.sched_service.clone(),
        ..Default::default()
    }));
    let config = KubeClusterConfig {
        validate_timeout: Duration::from_secs(args.validate_timeout_secs),
        poll_interval: Duration::from_secs(args.poll_interval_secs),
        ..Default::default()
    };
    Ok(Arc::new(KubeClusterClient::try_default(config, services).await?))
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn"] {
        filter = filter.add_directive(
            directive
                .parse()
                .map_err(|e| Error::Configuration(format!("Invalid log directive: {}", e)))?,
        );
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}
