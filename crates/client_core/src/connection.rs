//! Channel lifecycle states and the transport seam used by both live channels.

use std::fmt;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closed => "CLOSED",
        };
        f.write_str(label)
    }
}

/// Frames read from a channel. Binary and ping traffic is filtered out by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Closed,
}

#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait FrameSource: Send {
    /// `None` once the peer is gone; transport failures are returned as `Err`.
    async fn next_frame(&mut self) -> Option<Result<InboundFrame>>;
}

pub struct ChannelHalves {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<ChannelHalves>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport backed by tokio-tungstenite.
pub struct WsConnector;

struct WsSink(SplitSink<WsStream, Message>);

struct WsSource(SplitStream<WsStream>);

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn connect(&self, url: &Url) -> Result<ChannelHalves> {
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {}", redact_token(url)))?;
        let (writer, reader) = ws_stream.split();
        Ok(ChannelHalves {
            sink: Box::new(WsSink(writer)),
            source: Box::new(WsSource(reader)),
        })
    }
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.0
            .send(Message::Text(text))
            .await
            .context("websocket send failed")
    }

    async fn close(&mut self) -> Result<()> {
        self.0.close().await.context("websocket close failed")
    }
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Option<Result<InboundFrame>> {
        loop {
            match self.0.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(InboundFrame::Text(text))),
                Ok(Message::Close(_)) => return Some(Ok(InboundFrame::Closed)),
                Ok(_) => continue,
                Err(err) => {
                    return Some(Err(anyhow::Error::new(err).context("websocket receive failed")))
                }
            }
        }
    }
}

/// Copy of `url` safe to log: the bearer token in the query string is masked.
pub fn redact_token(url: &Url) -> String {
    let mut redacted = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let value = if k == "token" { "***".to_string() } else { v.into_owned() };
            (k.into_owned(), value)
        })
        .collect();
    if pairs.is_empty() {
        return redacted.to_string();
    }
    redacted.query_pairs_mut().clear().extend_pairs(pairs);
    redacted.to_string()
}
