use log::*;
use socket_pulse::close::CloseReason;
use socket_pulse::connection::ConnectionHandle;
use socket_pulse::message::Message;
use socket_pulse::server::start_server;
use socket_pulse::service::Service;
use std::sync::Arc;

struct EchoService;

impl Service for EchoService {
    fn connected(&self, connection: &ConnectionHandle) {
        info!("client {} connected", connection.id());
    }

    fn disconnected(&self, connection: &ConnectionHandle, reason: CloseReason) {
        info!("client {} disconnected: {:?}", connection.id(), reason);
    }

    fn received(&self, connection: &ConnectionHandle, message: Message) {
        connection.send(message);
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(err) = start_server(9002, Arc::new(EchoService)).await {
        error!("server stopped: {}", err);
    }
}
