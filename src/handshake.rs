use crate::config::WebSocketConfig;
use crate::connection::{attach, ConnectionHandle};
use crate::error::Error;
use crate::request::HttpRequest;
use crate::service::Service;
use crate::utils::generate_websocket_accept_value;
use std::sync::Arc;
use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

const HTTP_ACCEPT_RESPONSE: &str = "HTTP/1.1 101 Switching Protocols\r\n\
        Connection: Upgrade\r\n\
        Upgrade: websocket\r\n\
        Sec-WebSocket-Accept: {}\r\n\
        \r\n";

/// Upgrades an incoming stream and hands it to the connection engine.
///
/// The stream can be anything that reads and writes bytes, a plain
/// `TcpStream` or one already wrapped by a TLS acceptor upstream. On success
/// the connection runs on its own tasks and the returned handle can be used
/// to push frames to the client; the service's callbacks do the rest.
pub async fn accept_async<T, S>(stream: T, service: Arc<S>) -> Result<ConnectionHandle, Error>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    S: Service,
{
    accept_async_with_config(stream, service, None).await
}

pub async fn accept_async_with_config<T, S>(
    stream: T,
    service: Arc<S>,
    config: Option<WebSocketConfig>,
) -> Result<ConnectionHandle, Error>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    S: Service,
{
    let (read_half, mut write_half) = split(stream);
    let mut buf_reader = BufReader::new(read_half);

    let request = HttpRequest::parse(&mut buf_reader).await?;
    let key = validate_upgrade(&request)?;

    let accept_value = generate_websocket_accept_value(key);
    let response = HTTP_ACCEPT_RESPONSE.replace("{}", &accept_value);
    write_half.write_all(response.as_bytes()).await?;

    // No Sec-WebSocket-Extensions in the response: this server implements
    // none, so it accepts none.
    Ok(attach(
        buf_reader,
        write_half,
        request,
        service,
        config.unwrap_or_default(),
    ))
}

/// Checks the upgrade preconditions and returns the client's key.
fn validate_upgrade(request: &HttpRequest) -> Result<&str, Error> {
    if request.method != "GET" || request.version != 1 {
        return Err(Error::InvalidHTTPHandshake);
    }

    // The Connection header is a list, and clients are allowed to send
    // something like "keep-alive, Upgrade"
    let connection = request
        .header("connection")
        .ok_or(Error::NoConnectionHeaderPresent)?;
    if !connection.to_ascii_lowercase().contains("upgrade") {
        return Err(Error::NoConnectionHeaderPresent);
    }

    let upgrade = request
        .header("upgrade")
        .ok_or(Error::NoUpgradeHeaderPresent)?;
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(Error::NoUpgradeHeaderPresent);
    }

    request.header("host").ok_or(Error::NoHostHeaderPresent)?;

    request
        .header("sec-websocket-key")
        .ok_or(Error::NoSecWebsocketKey)
}
