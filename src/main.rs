//! Farm runner binary.
//!
//! Validates the command line, admits every requested device, waits for the
//! test runs to finish (or for a shutdown signal), then tears everything down.

use clap::Parser;
use farm_runner::config::parse_device_list;
use farm_runner::{
    AdbBridge, CliOverrides, CommandLauncher, FarmConfig, FileConfig, HttpDeviceFarm,
    Orchestrator, RunConfig, RunError,
};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "farm-runner",
    version,
    about = "Run a test suite in parallel on devices leased from a device farm"
)]
struct Cli {
    /// Device farm auth token
    #[arg(short = 't', long = "farm-auth-token")]
    farm_auth_token: Option<String>,
    /// Device farm address (http:// or https://)
    #[arg(short = 'a', long = "farm-address")]
    farm_address: Option<String>,
    /// Test artifact passed to `java -jar`
    #[arg(short = 'f', long = "testfile")]
    testfile: Option<PathBuf>,
    /// JSON config file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
    /// Output directory; overrides `outputPath` from the config file
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
    /// Comma separated device serials; overrides `devicesList`
    #[arg(short = 'd', long = "devices-list")]
    devices_list: Option<String>,
    /// APK handed to the test runner
    #[arg(short = 'p', long = "apk-file")]
    apk_file: Option<String>,
    /// Accept self-signed certificates from the farm
    #[arg(long = "accept-selfsigned")]
    accept_selfsigned: bool,
}

/// Command-line values that must be present before anything runs.
#[derive(Debug)]
struct Required {
    farm: FarmConfig,
    test_artifact: PathBuf,
}

impl Cli {
    fn required(&self) -> Result<Required, &'static str> {
        let auth_token = self
            .farm_auth_token
            .clone()
            .ok_or("Missing device farm auth token (-t)")?;
        let address = self
            .farm_address
            .clone()
            .ok_or("Missing device farm address (-a)")?;
        let test_artifact = self.testfile.clone().ok_or("Missing test file (-f)")?;
        Ok(Required {
            farm: FarmConfig {
                address,
                auth_token,
                accept_self_signed: self.accept_selfsigned,
            },
            test_artifact,
        })
    }

    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            output_path: self.output.clone(),
            devices: self
                .devices_list
                .as_deref()
                .map(parse_device_list)
                .unwrap_or_default(),
            apk_path: self.apk_file.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("farm_runner=info")),
        )
        .init();

    let cli = Cli::parse();
    let required = match cli.required() {
        Ok(required) => required,
        Err(message) => {
            eprintln!("{}", message);
            std::process::exit(1);
        }
    };

    let config = match build_config(&cli, required) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(error = %e, "Run aborted");
            return Ok(());
        }
    };

    let farm = Arc::new(HttpDeviceFarm::new(&config.farm)?);
    let bridge = Arc::new(AdbBridge::new(config.adb_path.clone()));
    let launcher = Arc::new(CommandLauncher::new(config.launch.clone()));
    let orchestrator = Orchestrator::new(config, farm, bridge, launcher);

    // Installed before admission so a signal at any point still tears down
    let shutdown = Arc::new(Notify::new());
    match shutdown_signal() {
        Ok(signal) => {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                signal.await;
                info!("Shutdown signal received");
                shutdown.notify_one();
            });
        }
        Err(e) => error!(error = %e, "Shutdown signal handler failed"),
    }

    let admitted = tokio::select! {
        result = orchestrator.run() => Some(result),
        _ = shutdown.notified() => None,
    };

    match admitted {
        Some(Ok(report)) => {
            info!(
                session = %report.session_dir.display(),
                running = report.registered().count(),
                skipped = report.skipped().count(),
                "All devices admitted"
            );
            tokio::select! {
                _ = orchestrator.wait_for_completion() => info!("All test runs finished"),
                _ = shutdown.notified() => {}
            }
        }
        Some(Err(e)) => error!(error = %e, policy = ?e.policy(), "Run aborted"),
        None => info!("Admission interrupted"),
    }

    orchestrator.teardown().await;
    Ok(())
}

fn build_config(cli: &Cli, required: Required) -> Result<RunConfig, RunError> {
    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    Ok(RunConfig::resolve(
        required.farm,
        required.test_artifact,
        file,
        cli.overrides(),
    ))
}

/// Register the shutdown signal handlers now. The returned future resolves on
/// the first SIGTERM, SIGINT, SIGQUIT or Ctrl-C.
fn shutdown_signal() -> anyhow::Result<impl Future<Output = ()>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;
        Ok(async move {
            tokio::select! {
                _ = sigterm.recv() => {},
                _ = sigint.recv() => {},
                _ = sigquit.recv() => {},
                _ = tokio::signal::ctrl_c() => {},
            }
        })
    }

    #[cfg(not(unix))]
    {
        Ok(async {
            let _ = tokio::signal::ctrl_c().await;
        })
    }
}
