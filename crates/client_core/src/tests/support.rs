//! In-memory transport for frame-exact assertions.

use std::{
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use crate::connection::{ChannelConnector, ChannelHalves, FrameSink, FrameSource, InboundFrame};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TransportEvent {
    Connected { conn: usize, url: String },
    Sent { conn: usize, text: String },
    Closed { conn: usize },
}

/// Server side of one in-memory connection.
pub(crate) struct MemoryPeer {
    pub url: Url,
    frames: mpsc::UnboundedSender<InboundFrame>,
}

impl MemoryPeer {
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.frames.send(InboundFrame::Text(text.into()));
    }

    pub fn push_json(&self, value: serde_json::Value) {
        self.push(value.to_string());
    }

    pub fn close(&self) {
        let _ = self.frames.send(InboundFrame::Closed);
    }
}

pub(crate) struct MemoryConnector {
    log: Arc<StdMutex<Vec<TransportEvent>>>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
    refuse: AtomicBool,
    reject_writes: Arc<AtomicBool>,
}

impl MemoryConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, accepted) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            log: Arc::new(StdMutex::new(Vec::new())),
            peers,
            refuse: AtomicBool::new(false),
            reject_writes: Arc::new(AtomicBool::new(false)),
        });
        (connector, accepted)
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Makes every open and future sink fail its writes.
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<TransportEvent> {
        self.log.lock().expect("transport log").clone()
    }

    pub fn sent_actions(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TransportEvent::Sent { text, .. } => serde_json::from_str::<serde_json::Value>(&text)
                    .ok()
                    .and_then(|value| value["action"].as_str().map(str::to_string)),
                _ => None,
            })
            .collect()
    }

    pub fn sent_frames(&self) -> Vec<serde_json::Value> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TransportEvent::Sent { text, .. } => serde_json::from_str(&text).ok(),
                _ => None,
            })
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, TransportEvent::Closed { .. }))
            .count()
    }

    pub fn connection_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, TransportEvent::Connected { .. }))
            .count()
    }
}

#[async_trait]
impl ChannelConnector for MemoryConnector {
    async fn connect(&self, url: &Url) -> Result<ChannelHalves> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        let conn = {
            let mut log = self.log.lock().expect("transport log");
            let conn = log
                .iter()
                .filter(|event| matches!(event, TransportEvent::Connected { .. }))
                .count();
            log.push(TransportEvent::Connected {
                conn,
                url: url.to_string(),
            });
            conn
        };
        let (frames, inbound) = mpsc::unbounded_channel();
        let _ = self.peers.send(MemoryPeer {
            url: url.clone(),
            frames,
        });
        Ok(ChannelHalves {
            sink: Box::new(MemorySink {
                conn,
                log: Arc::clone(&self.log),
                reject: Arc::clone(&self.reject_writes),
            }),
            source: Box::new(MemorySource(inbound)),
        })
    }
}

struct MemorySink {
    conn: usize,
    log: Arc<StdMutex<Vec<TransportEvent>>>,
    reject: Arc<AtomicBool>,
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(anyhow!("broken pipe"));
        }
        self.log
            .lock()
            .map_err(|_| anyhow!("transport log poisoned"))?
            .push(TransportEvent::Sent {
                conn: self.conn,
                text,
            });
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.log
            .lock()
            .map_err(|_| anyhow!("transport log poisoned"))?
            .push(TransportEvent::Closed { conn: self.conn });
        Ok(())
    }
}

struct MemorySource(mpsc::UnboundedReceiver<InboundFrame>);

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_frame(&mut self) -> Option<Result<InboundFrame>> {
        self.0.recv().await.map(Ok)
    }
}

/// Polls `check` until it holds or two seconds pass.
pub(crate) async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Async flavour of [`eventually`] for checks that need to await client state.
pub(crate) async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..400 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
