use anyhow::Result;
use tracing::{Instrument, error, info, warn};

use atools::config::NavConfig;
use atools::connect_handler::{
    ConnectHandler, SyntheticConfig, SyntheticHandler, select_handler,
};
use atools::data_reader::{DataReader, ReaderEvent};
use atools::nav_server::NavServer;

pub async fn handle_serve(config: NavConfig) -> Result<()> {
    info!("Starting server with config {:?}", config);

    if let Some(metrics_port) = config.metrics_port {
        info!("Starting metrics server on port {}", metrics_port);
        tokio::spawn(
            async move {
                if let Err(e) = atools::metrics::start_metrics_server(metrics_port).await {
                    error!("Metrics server stopped: {:#}", e);
                }
            }
            .instrument(tracing::info_span!("metrics_server")),
        );
    }

    let handler = if config.load_replay.is_some() {
        None
    } else {
        let candidates: Vec<Box<dyn ConnectHandler>> =
            vec![Box::new(SyntheticHandler::new(SyntheticConfig::default()))];
        select_handler(candidates)
    };

    let mut reader = DataReader::new(config.reader_config(), handler);
    let mut server =
        NavServer::start(config.port, reader.packet_sender(), reader.weather_slot()).await?;

    // Log connection state changes until the reader goes away
    let events = reader.events();
    tokio::spawn(
        async move {
            while let Ok(event) = events.recv_async().await {
                match event {
                    ReaderEvent::Connecting => info!("Waiting for simulator..."),
                    ReaderEvent::Connected { name } => info!("Connected to {}", name),
                    ReaderEvent::Disconnected => info!("Disconnected"),
                    ReaderEvent::Error { message } => warn!("Data reader error: {}", message),
                }
            }
        }
        .instrument(tracing::info_span!("reader_events")),
    );

    reader.start();

    wait_for_shutdown().await;

    info!("Shutting down...");
    reader.terminate().await;
    server.stop().await;
    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to register signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT (Ctrl+C)");
            }
        }
    }

    #[cfg(not(unix))]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT (Ctrl+C)"),
            Err(err) => error!("Failed to listen for SIGINT signal: {}", err),
        }
    }
}
