#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Largest single frame the decoder will accept.
    pub max_frame_size: Option<usize>,
    /// Largest reassembled message, summed across continuation fragments.
    pub max_message_size: Option<usize>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            max_message_size: Some(64 << 20),
            max_frame_size: Some(16 << 20),
        }
    }
}
