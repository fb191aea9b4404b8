//! Channel traits consumed by the protocol engine and the pairing roles.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use url::Url;

/// One frame on the reliable channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelMessage {
    Text(String),
    Binary(Bytes),
}

impl ChannelMessage {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ChannelMessage::Text(text) => text.as_bytes(),
            ChannelMessage::Binary(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// Reliable channel errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Channel disconnected")]
    Disconnected,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

/// Write outcome reported by the chunked (MTU-limited) transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportFault {
    /// The transport cannot take more data until it signals readiness.
    #[error("Transport is applying backpressure")]
    Backpressure,

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Peer disconnected")]
    Disconnected,
}

/// WebSocket-shaped, connection-oriented, in-order message channel.
#[async_trait]
pub trait ReliableChannel: Send {
    /// Send one frame.
    async fn send(&mut self, message: ChannelMessage) -> Result<(), ChannelError>;

    /// Next inbound frame, `None` once the peer closed the channel.
    async fn recv(&mut self) -> Option<Result<ChannelMessage, ChannelError>>;

    /// Close with a human-readable reason. Closing twice is a no-op.
    async fn close(&mut self, reason: &str) -> Result<(), ChannelError>;
}

/// Opens reliable channels.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Box<dyn ReliableChannel>, ChannelError>;
}

/// Parse an endpoint, mapping parse failures to [`ChannelError::InvalidEndpoint`].
pub fn parse_endpoint(raw: &str) -> Result<Url, ChannelError> {
    let url = Url::parse(raw).map_err(|e| ChannelError::InvalidEndpoint(format!("{raw}: {e}")))?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(ChannelError::InvalidEndpoint(format!("{raw}: missing host")));
    }
    Ok(url)
}

/// Append `path` to a base endpoint, keeping exactly one slash between them.
pub fn join_endpoint(base: &str, path: &str) -> Result<Url, ChannelError> {
    let joined = format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    parse_endpoint(&joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_endpoint() {
        let url = join_endpoint("wss://verifier.example/", "/authenticate/").unwrap();
        assert_eq!(url.as_str(), "wss://verifier.example/authenticate/");

        let url = join_endpoint("https://api.example/v1", "register").unwrap();
        assert_eq!(url.as_str(), "https://api.example/v1/register");
    }

    #[test]
    fn test_invalid_endpoints() {
        assert!(matches!(
            parse_endpoint("not a url"),
            Err(ChannelError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            parse_endpoint("mailto:someone"),
            Err(ChannelError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            join_endpoint("", "authenticate/"),
            Err(ChannelError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_message_bytes() {
        assert_eq!(ChannelMessage::Text("hi".into()).as_bytes(), b"hi");
        assert!(ChannelMessage::Binary(Bytes::new()).is_empty());
    }
}
