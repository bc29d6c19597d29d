//! tsmuxd - MPEG-TS stream multiplexing daemon.

use std::path::PathBuf;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tsmux_pipeline::{Config, StreamPipeline};

/// Command-line arguments for the daemon.
#[derive(Parser, Debug)]
#[command(name = "tsmuxd")]
#[command(version)]
#[command(about = "MPEG-TS stream multiplexing daemon")]
#[command(long_about = "tsmuxd ingests MPEG transport streams over datagram or file-like \n\
    endpoints, schedules them fairly across inputs, re-clocks the mux to a \n\
    configured bitrate, and emits constant-bitrate output to its sinks.\n\n\
    SIGNALS:\n    \
    SIGINT/SIGTERM  graceful shutdown\n    \
    SIGHUP          reload configuration")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "tsmuxd.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let mut config = Config::load(&args.config)?;
    info!(
        path = %args.config.display(),
        inputs = config.inputs.len(),
        output = %config.output.destination(),
        "configuration loaded"
    );

    let mut pipeline = StreamPipeline::from_config(&config)?;
    pipeline.start().await?;

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    error!(error = %err, "signal handler failed");
                }
                info!("SIGINT received, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down");
                break;
            }
            _ = sighup.recv() => {
                info!("SIGHUP received, reloading configuration");
                let next = match Config::load(&args.config) {
                    Ok(next) => next,
                    Err(err) => {
                        warn!(error = %err, "reload failed, keeping current configuration");
                        continue;
                    }
                };

                // PLL and DWRR state survive the reload only when their
                // parameters are unchanged; endpoints are always rebuilt.
                let pll_state = (next.pll == config.pll).then(|| pipeline.pll_snapshot());
                let scheduler = (next.dwrr == config.dwrr).then(|| pipeline.scheduler());
                pipeline.shutdown().await;

                let mut rebuilt = match StreamPipeline::from_config(&next) {
                    Ok(rebuilt) => rebuilt,
                    Err(err) => {
                        error!(error = %err, "pipeline rebuild failed");
                        return Err(err.into());
                    }
                };
                if let Some(snapshot) = pll_state {
                    rebuilt = rebuilt.with_pll_state(snapshot);
                }
                if let Some(scheduler) = scheduler {
                    rebuilt = rebuilt.with_scheduler(scheduler);
                }
                rebuilt.start().await?;

                pipeline = rebuilt;
                config = next;
                info!("pipeline reloaded");
            }
        }
    }

    pipeline.shutdown().await;
    let stats = pipeline.stats();
    info!(
        packets_in = stats.packets_in,
        packets_out = stats.packets_out,
        nulls_stuffed = stats.nulls_stuffed,
        invalid_dropped = stats.invalid_dropped,
        "shutdown complete"
    );
    Ok(())
}
