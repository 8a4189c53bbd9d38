/// Events delivered by a WebSocket connection to its adapter, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum WsEvent {
    /// Handshake completed (initial connect or reconnect)
    Connected,
    /// One text frame
    Message(String),
    /// Connection closed by either side
    Disconnected,
    /// Connect or read failure
    Error(String),
}
