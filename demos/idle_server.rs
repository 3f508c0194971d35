use log::*;
use socket_pulse::close::CloseReason;
use socket_pulse::connection::ConnectionHandle;
use socket_pulse::message::Message;
use socket_pulse::server::start_server;
use socket_pulse::service::Service;
use std::sync::Arc;

// Demonstrates the heartbeat: with a 20 second connection timeout the engine
// pings a quiet client every 10 seconds and drops it after a missed pong.
struct IdleAwareService;

impl Service for IdleAwareService {
    fn connected(&self, connection: &ConnectionHandle) {
        info!("client {} connected", connection.id());
    }

    fn disconnected(&self, connection: &ConnectionHandle, reason: CloseReason) {
        info!("client {} went away: {:?}", connection.id(), reason);
    }

    fn received(&self, connection: &ConnectionHandle, message: Message) {
        connection.send(message);
    }

    fn connection_timeout(&self) -> Option<u64> {
        Some(20)
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(err) = start_server(9002, Arc::new(IdleAwareService)).await {
        error!("server stopped: {}", err);
    }
}
