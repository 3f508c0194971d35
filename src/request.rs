use crate::error::Error;
use std::collections::HashMap;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, ReadHalf};
use tokio::time::{timeout, Duration};

const HTTP_REQUEST_DELIMITER: &str = "\r\n\r\n";
const MAX_HEADERS: usize = 32;
const MAX_REQUEST_SIZE: usize = 1024 * 16; // 16 kilobytes

/// Immutable snapshot of the HTTP request that upgraded the connection.
///
/// The engine keeps it around for the lifetime of the connection, since the
/// extension offer in its headers decides how RSV bits are validated.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    /// HTTP minor version, `1` for HTTP/1.1
    pub version: u8,
    /// Header names lowercased on parse
    pub headers: HashMap<String, String>,
}

impl HttpRequest {
    /// Reads and parses the upgrade request from the start of the stream.
    ///
    /// Lines are consumed through the blank line only, so any frame bytes a
    /// client pipelines right behind the handshake stay buffered in the
    /// `BufReader` for the frame decoder.
    ///
    /// A timeout guards the whole read, since some attackers only open the
    /// TCP connection, and freeze without ever sending the HTTP handshake.
    pub async fn parse<T: AsyncRead>(
        reader: &mut BufReader<ReadHalf<T>>,
    ) -> Result<HttpRequest, Error> {
        let mut buffer = String::new();

        timeout(Duration::from_secs(5), async {
            loop {
                let bytes_read = reader.read_line(&mut buffer).await?;
                if bytes_read == 0
                    || buffer.ends_with(HTTP_REQUEST_DELIMITER)
                    || buffer.len() > MAX_REQUEST_SIZE
                {
                    break Ok::<(), std::io::Error>(());
                }
            }
        })
        .await??;

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);

        match request.parse(buffer.as_bytes())? {
            httparse::Status::Complete(_) => {}
            httparse::Status::Partial => return Err(Error::IncompleteHTTPRequest),
        }

        let method = request
            .method
            .ok_or(Error::IncompleteHTTPRequest)?
            .to_string();
        let uri = request.path.ok_or(Error::IncompleteHTTPRequest)?.to_string();
        let version = request.version.ok_or(Error::IncompleteHTTPRequest)?;

        let mut header_map = HashMap::new();
        for header in request.headers.iter() {
            header_map.insert(
                header.name.to_lowercase(),
                String::from_utf8_lossy(header.value).trim().to_string(),
            );
        }

        Ok(HttpRequest {
            method,
            uri,
            version,
            headers: header_map,
        })
    }

    /// Looks a header up by its lowercase name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}
