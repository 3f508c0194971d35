use log::*;
use socket_pulse::config::WebSocketConfig;
use socket_pulse::connection::ConnectionHandle;
use socket_pulse::message::Message;
use socket_pulse::server::start_server_with_config;
use socket_pulse::service::Service;
use std::sync::Arc;

// Echo server tuned for the Autobahn test suite, which drives frames and
// messages up to 16MB through the connection.
struct AutobahnService;

impl Service for AutobahnService {
    fn received(&self, connection: &ConnectionHandle, message: Message) {
        connection.send(message);
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = WebSocketConfig {
        max_frame_size: Some(64 << 20),
        max_message_size: Some(64 << 20),
    };

    if let Err(err) = start_server_with_config(9002, Arc::new(AutobahnService), Some(config)).await
    {
        error!("server stopped: {}", err);
    }
}
