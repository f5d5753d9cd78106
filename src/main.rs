use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use rtqueue::config::{ReturnServiceConfig, WatchdogConfig};
use rtqueue::delivery::ReturnService;
use rtqueue::logging::init_logging;
use rtqueue::scheduler::Watchdog;
use rtqueue::supervisor::{shutdown_on_signal, Supervisor};

/// Grace period for blocking work still running once the supervisor is done.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "rtqueue")]
#[command(version)]
#[command(about = "Filesystem-queue scheduler and DICOM return service for AI segmentation")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Activate ready jobs one at a time and launch inference on them
    Watchdog(DaemonArgs),

    /// Deliver inferred results and error placeholders, expire handled jobs
    ReturnService(DaemonArgs),
}

#[derive(Parser, Debug)]
struct DaemonArgs {
    /// Path to the YAML configuration file
    #[arg(long, short = 'c')]
    config: PathBuf,
}

async fn run_watchdog(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = WatchdogConfig::load(config_path)?;
    let _guard = init_logging("watchdog", &config.daemon.logging)?;

    tracing::info!(
        scan_directory = %config.daemon.scan_directory.display(),
        interval = ?config.daemon.scan_interval(),
        command = %config.inference_command.display(),
        dry_run = config.dry_run,
        "Starting watchdog"
    );

    let shutdown = shutdown_on_signal("watchdog")?;
    let factory_config = config.clone();
    let supervisor = Supervisor::new(
        "watchdog",
        move || Watchdog::from_config(&factory_config),
        config.daemon.scan_interval(),
        config.daemon.restart_policy(),
        config.daemon.shutdown_timeout(),
    );
    supervisor.run(shutdown).await?;

    tracing::info!("Watchdog stopped");
    Ok(())
}

async fn run_return_service(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = ReturnServiceConfig::load(config_path)?;
    let _guard = init_logging("return-service", &config.daemon.logging)?;

    tracing::info!(
        scan_directory = %config.daemon.scan_directory.display(),
        interval = ?config.daemon.scan_interval(),
        ae_title = %config.ae_title,
        archive = ?config.archive(),
        days_before_deletion = config.days_before_deletion,
        "Starting return service"
    );

    let shutdown = shutdown_on_signal("return-service")?;
    let factory_config = config.clone();
    let supervisor = Supervisor::new(
        "return-service",
        move || ReturnService::from_config(&factory_config),
        config.daemon.scan_interval(),
        config.daemon.restart_policy(),
        config.daemon.shutdown_timeout(),
    );
    supervisor.run(shutdown).await?;

    tracing::info!("Return service stopped");
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // A cycle aborted on shutdown may still occupy a blocking thread; do not
    // wait for it when the runtime goes away.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(async {
        match args.command {
            Commands::Watchdog(daemon) => run_watchdog(&daemon.config).await,
            Commands::ReturnService(daemon) => run_return_service(&daemon.config).await,
        }
    });
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);

    result
}
