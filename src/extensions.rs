const PERMESSAGE_DEFLATE: &str = "permessage-deflate";

/// What the client offered in `Sec-WebSocket-Extensions`.
///
/// This engine implements no extension. It only remembers whether
/// permessage-deflate was offered, because that changes which RSV bits a
/// frame is allowed to carry: a negotiated compression extension owns RSV1,
/// everything else must stay zero.
#[derive(Debug, Clone, Default)]
pub struct Extensions {
    pub permessage_deflate: bool,
}

/// Parses a `Sec-WebSocket-Extensions` header value.
///
/// Extension parameters after the first `;` (window bits, context takeover)
/// only matter to an actual compressor, so they are ignored here. Returns
/// `None` when the leading token is not permessage-deflate.
pub fn parse_extensions(extensions_header_value: &str) -> Option<Extensions> {
    let first_token = extensions_header_value.split(';').next()?.trim();

    if first_token == PERMESSAGE_DEFLATE {
        Some(Extensions {
            permessage_deflate: true,
        })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::parse_extensions;

    #[test]
    fn test_parse_extensions() {
        assert!(parse_extensions("permessage-deflate").is_some());
        assert!(parse_extensions(" permessage-deflate ").is_some());
        assert!(
            parse_extensions("permessage-deflate; client_max_window_bits; server_max_window_bits=10")
                .is_some()
        );
    }

    #[test]
    fn test_parse_extensions_rejects_other_offers() {
        // Only a leading permessage-deflate token counts as an offer
        assert!(parse_extensions("").is_none());
        assert!(parse_extensions("x-webkit-deflate-frame").is_none());
        assert!(parse_extensions("client_max_window_bits; permessage-deflate").is_none());
    }
}
