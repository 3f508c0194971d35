use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha1::{Digest, Sha1};
use uuid::Uuid;

pub(crate) const UUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

pub(crate) fn generate_websocket_accept_value(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(UUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

// Used for generating a new UUID, every time a new client connects the server.
// We are using UUID, which is more flexible, and secure than incrementing IDs.
pub(crate) fn generate_connection_id() -> Uuid {
    let mut rng = StdRng::from_rng(&mut rand::rng());
    let buf = rng.random::<[u8; 16]>();

    Uuid::new_v8(buf)
}
