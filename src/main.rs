use anyhow::Context;
use claimsqa::{api, config, logging, processing::ClaimsService};
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Claims QA HTTP server.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Port to listen on; overrides `SERVER_PORT`.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init_tracing();
    let config = config::init_config().context("Failed to load config from environment")?;
    let service =
        Arc::new(ClaimsService::from_config(config).context("Failed to build claims service")?);
    let app = api::create_router(service, config.max_upload_bytes);

    let (listener, port) = bind_listener(args.port.or(config.server_port))
        .await
        .context("Failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.context("Server terminated")?;
    Ok(())
}

async fn bind_listener(port: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    if let Some(port) = port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 8000..=8099;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 8000-8099",
    ))
}
