use crate::config::WebSocketConfig;
use crate::error::Error;
use crate::handshake::accept_async_with_config;
use crate::service::Service;
use log::{debug, error, info};
use std::sync::Arc;
use tokio::net::TcpListener;

/// A ready to use websockets server.
///
/// Binds the given port and runs the accept loop, performing the handshake
/// and spawning a connection engine for every client. The service receives
/// `connected`, `received` and `disconnected` callbacks for all of them;
/// per-connection failures are logged and never take the server down.
///
/// The call only returns if the listener itself fails, so callers that need
/// to do other work should `tokio::spawn` it.
pub async fn start_server<S: Service>(port: u16, service: Arc<S>) -> Result<(), Error> {
    start_server_with_config(port, service, None).await
}

pub async fn start_server_with_config<S: Service>(
    port: u16,
    service: Arc<S>,
    config: Option<WebSocketConfig>,
) -> Result<(), Error> {
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("listening on port {}", port);

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let service = service.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    debug!("accepted connection from {}", peer);
                    if let Err(err) = accept_async_with_config(stream, service, config).await {
                        error!("handshake with {} failed: {}", peer, err);
                    }
                });
            }
            Err(error) => {
                error!("failed to accept an incoming connection: {}", error);
                continue;
            }
        }
    }
}
