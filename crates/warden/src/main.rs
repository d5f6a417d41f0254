//! Warden - main entry point
//!
//! Certificate-lifecycle bootstrap and renewal orchestrator for a
//! reverse-proxied deployment.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use warden::{
    ComposeProxyHandle, ComposeRuntime, ContainerRuntime, GateSettings, HttpChallengeProbe,
    Orchestrator, OrchestratorSettings, ProfileSwitcher, ReadinessProbe, RenderContext,
    RenewalDaemon, ServiceHealth, TcpProbe,
};
use warden_acme::{AcmeLibCa, CertificateAuthority, ChallengePublisher, DirectoryEndpoint};
use warden_common::gate;
use warden_config::{AcmeDirectory, WardenConfig};

/// Warden - certificate-lifecycle orchestrator
#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "WARDEN_CONFIG")]
    config: Option<String>,

    /// Test configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration file and exit
    Test {
        /// Configuration file to test
        #[arg(short = 'c', long = "config")]
        config: Option<String>,
    },
    /// Run the renewal daemon (default)
    Run {
        /// Configuration file path
        #[arg(short = 'c', long = "config")]
        config: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.test {
        return test_config(cli.config.as_deref());
    }

    match cli.command {
        Some(Commands::Test { config }) => {
            test_config(config.as_deref().or(cli.config.as_deref()))
        }
        Some(Commands::Run { config }) => run_daemon(config.or(cli.config), cli.verbose),
        None => run_daemon(cli.config, cli.verbose),
    }
}

/// Load a configuration, failing with collected errors if invalid.
fn load_config(config_path: Option<&str>) -> Result<WardenConfig> {
    let Some(path) = config_path else {
        bail!("no configuration specified (use --config or WARDEN_CONFIG)");
    };

    let config = WardenConfig::from_file(path).context("Failed to load configuration file")?;

    let result = config.validate();
    for warning in &result.warnings {
        warn!("configuration: {warning}");
    }
    if !result.is_valid() {
        for error in &result.errors {
            tracing::error!("configuration: {error}");
        }
        bail!(
            "configuration validation failed with {} error(s)",
            result.errors.len()
        );
    }

    Ok(config)
}

/// Test configuration file and exit
fn test_config(config_path: Option<&str>) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let config = load_config(config_path)?;
    let domains = config
        .domain_set()
        .context("Failed to assemble domain set")?;

    info!("Configuration test successful:");
    info!("  - contact: {}", config.contact_email);
    info!("  - domains: {}", domains);
    info!(
        "  - renewal threshold: {} day(s)",
        config.certificates.renewal_threshold_days
    );
    info!(
        "  - check interval: {} hour(s)",
        config.daemon.check_interval_hours
    );

    println!(
        "warden: configuration file {} test is successful",
        config_path.unwrap_or("(none)")
    );

    Ok(())
}

/// Run the renewal daemon
fn run_daemon(config_path: Option<String>, verbose: bool) -> Result<()> {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let effective_config_path = config_path.or_else(|| std::env::var("WARDEN_CONFIG").ok());
    match &effective_config_path {
        Some(path) => info!("Loading configuration from: {}", path),
        None => info!("No configuration specified"),
    }

    let config = load_config(effective_config_path.as_deref())?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(build_and_run(config))
}

async fn build_and_run(config: WardenConfig) -> Result<()> {
    let domains = config
        .domain_set()
        .context("Failed to assemble domain set")?;

    let store = warden::CertificateStore::new(&config.certificates.storage_path)
        .context("Failed to open certificate store")?;
    let challenges = ChallengePublisher::new(&config.proxy.webroot)
        .context("Failed to prepare challenge webroot")?;

    let endpoint = match &config.certificates.directory {
        AcmeDirectory::Production => DirectoryEndpoint::LetsEncrypt,
        AcmeDirectory::Staging => DirectoryEndpoint::LetsEncryptStaging,
        AcmeDirectory::Custom(url) => DirectoryEndpoint::Custom(url.clone()),
    };
    let ca = AcmeLibCa::new(
        endpoint,
        store.account_dir().context("Failed to prepare account directory")?,
    )
    .with_rate_limit_holdoff(Duration::from_secs(
        config.certificates.rate_limit_holdoff_secs,
    ));

    let compose = Arc::new(ComposeRuntime::new(
        &config.runtime.project_dir,
        config.runtime.compose_file.clone(),
    ));
    let proxy_handle = Arc::new(ComposeProxyHandle::new(
        Arc::clone(&compose),
        config.runtime.proxy_service.clone(),
    ));

    let (cert_path, key_path) = store.certificate_paths(&domains);
    let context = RenderContext {
        domains: domains.clone(),
        webroot: config.proxy.webroot.clone(),
        frontend_addr: config.proxy.frontend_addr.clone(),
        backend_addr: config.proxy.backend_addr.clone(),
        cert_path,
        key_path,
    };
    let switcher = ProfileSwitcher::new(&config.proxy.config_dir, context, proxy_handle);

    let probe = Arc::new(HttpChallengeProbe::new(
        challenges.clone(),
        config.readiness.probe_url.clone(),
    ));

    preflight(&compose, &config).await;

    let settings = OrchestratorSettings {
        domains,
        contact_email: config.contact_email.clone(),
        renewal_threshold_days: config.certificates.renewal_threshold_days,
        gate: GateSettings {
            timeout: config.readiness.timeout(),
            poll_interval: config.readiness.poll_interval(),
        },
        retry: config.retry.to_policy(),
    };

    let orchestrator = Orchestrator::new(
        settings,
        store,
        switcher,
        Arc::new(ca) as Arc<dyn CertificateAuthority>,
        challenges,
        probe as Arc<dyn ReadinessProbe>,
    );

    let daemon = RenewalDaemon::new(orchestrator)
        .with_interval(config.daemon.check_interval())
        .with_tick_deadline(config.daemon.tick_deadline())
        .with_startup_delay(config.daemon.startup_delay());

    info!("Warden started");
    daemon.run().await;

    Ok(())
}

/// Best-effort startup checks: make sure the proxy service is up and the
/// backend answers. Failures are logged and tolerated - the orchestrator
/// gates every CA call on its own readiness check anyway.
async fn preflight(compose: &Arc<ComposeRuntime>, config: &WardenConfig) {
    let proxy_service = &config.runtime.proxy_service;

    if let Err(e) = compose.start(proxy_service).await {
        warn!(service = %proxy_service, error = %e, "Could not start proxy service");
    }

    let health_wait = gate::wait_until_ready(
        || async move {
            matches!(
                compose.service_health(proxy_service).await,
                Ok(ServiceHealth::Healthy)
            )
        },
        config.readiness.timeout(),
        config.readiness.poll_interval(),
    )
    .await;
    if health_wait.is_err() {
        warn!(service = %proxy_service, "Proxy service not healthy after startup wait");
    }

    let backend_probe = TcpProbe::new(
        config.proxy.backend_addr.clone(),
        Duration::from_secs(2),
    );
    let backend_wait = gate::wait_until_ready(
        || backend_probe.is_ready(),
        config.readiness.timeout(),
        config.readiness.poll_interval(),
    )
    .await;
    if backend_wait.is_err() {
        warn!(
            address = %config.proxy.backend_addr,
            "Backend not reachable after startup wait"
        );
    }
}
