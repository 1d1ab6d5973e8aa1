use clap::Parser;
use screenshot_queue::{setup_logging, Cli, CliRunner, PrometheusExporter};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    setup_logging(args.verbose)?;

    info!("Starting screenshot-queue v{}", env!("CARGO_PKG_VERSION"));

    // The recorder must exist before the service registers its handles.
    if let Some(port) = args.metrics_port {
        PrometheusExporter::new(port).start()?;
    }

    let config = args.load_config().await?;
    let runner = CliRunner::new(config)?;

    let result = tokio::select! {
        result = runner.run(args.command) => result,
        signal = shutdown_signal() => {
            match signal {
                Ok(name) => info!("Received {}", name),
                Err(e) => error!("Signal handler failed: {}", e),
            }
            Ok(())
        }
    };

    runner.service.shutdown().await;

    if let Err(e) = result {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }

    info!("screenshot-queue stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => Ok("SIGINT"),
        _ = sigterm.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl-C")
}
