#[cfg(not(unix))]
compile_error!("Only unix platforms are currently supported");

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use postern::{Arguments, Postern, controller::defaults};

/// Run the Postern mail transfer agent
#[derive(Parser, Debug)]
#[command(name = "postern")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file, instead of searching POSTERN_CONFIG,
    /// ~/.postern/postern.toml and /etc/postern/postern.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stay attached to the terminal even if the configuration asks for a
    /// daemon
    #[arg(short, long)]
    attached: bool,

    /// Write the process id here, overriding the configured pid_file
    #[arg(long)]
    pid_file: Option<PathBuf>,

    /// Run the task-queue worker for celery queues, configured from the
    /// process.postern-worker section
    #[arg(long)]
    worker: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let program = if cli.worker {
        defaults::WORKER_PROGRAM
    } else {
        defaults::PROGRAM
    };

    let postern = Postern::new(
        program,
        Arguments {
            config: cli.config,
            attached: cli.attached,
            pid_file: cli.pid_file,
        },
    );

    // Forking is only safe while the process has a single thread, so every
    // step up to daemonize happens before the runtime exists.
    postern.load_configuration()?;
    postern.drop_privileges()?;
    postern.redirect_streams()?;
    postern.daemonize()?;
    postern.setup_logging()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Unable to start the async runtime")?;

    runtime.block_on(async {
        if cli.worker {
            postern.start_celery_queues().await?;
            postern.start_edges().await?;
            postern.run_worker_loop().await
        } else {
            postern.start_edges().await?;
            postern.run_service_loop().await
        }
    })?;

    Ok(())
}
