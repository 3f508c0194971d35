use crate::close::CloseReason;
use crate::connection::ConnectionHandle;
use crate::message::Message;

/// The application side of a WebSocket endpoint.
///
/// One service instance typically serves many connections; the handle passed
/// into every callback identifies the connection and is the way to talk
/// back to it. Callbacks run on the connection's own task, one at a time and
/// in protocol order, so a slow callback delays that connection only. A
/// service that needs to do real work should hand the message off to its own
/// task and return.
///
/// The service does not own its connections and a connection does not own
/// the service beyond a shared reference, dropping every handle never leaks
/// a task.
pub trait Service: Send + Sync + 'static {
    /// A connection finished its upgrade and is ready for traffic.
    fn connected(&self, _connection: &ConnectionHandle) {}

    /// The connection is gone, with the closest reason the engine could
    /// determine. Called exactly once per connection that was `connected`.
    fn disconnected(&self, _connection: &ConnectionHandle, _reason: CloseReason) {}

    /// A complete text or binary message arrived. Fragmented messages are
    /// reassembled before delivery, a service never sees partial payloads.
    fn received(&self, connection: &ConnectionHandle, message: Message);

    /// When set, the connection pings an idle peer every half of this many
    /// seconds, and drops it after a ping goes unanswered for another half.
    fn connection_timeout(&self) -> Option<u64> {
        None
    }
}
