//! Message-port contract. A peer receives [`Delivery`] records from its
//! endpoint and replies through the delivery's `source` port; payloads are
//! deep-copied JSON values, so no memory is ever shared across the channel.

use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("{0}")]
    SendFailed(String),
}

/// An inbound message: the payload, the port of the sending peer (for
/// replies), and the sender's origin.
#[derive(Debug)]
pub struct Delivery {
    pub data: Value,
    pub source: PeerPort,
    pub origin: String,
}

struct PortInner {
    /// Queue feeding the target peer.
    to: mpsc::UnboundedSender<Delivery>,
    to_origin: String,
    /// Queue feeding the sending peer, used to build reply `source` ports.
    from: mpsc::UnboundedSender<Delivery>,
    from_origin: String,
    /// Fault injection for this port's direction.
    faults: FaultSwitch,
    /// Fault injection for the reply direction.
    reply_faults: FaultSwitch,
}

/// A handle for posting messages to one specific peer.
#[derive(Clone)]
pub struct PeerPort {
    inner: Arc<PortInner>,
}

impl std::fmt::Debug for PeerPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerPort")
            .field("target_origin", &self.inner.to_origin)
            .finish()
    }
}

impl PeerPort {
    pub(crate) fn new(
        to: mpsc::UnboundedSender<Delivery>,
        to_origin: String,
        from: mpsc::UnboundedSender<Delivery>,
        from_origin: String,
        faults: FaultSwitch,
        reply_faults: FaultSwitch,
    ) -> Self {
        PeerPort {
            inner: Arc::new(PortInner {
                to,
                to_origin,
                from,
                from_origin,
                faults,
                reply_faults,
            }),
        }
    }

    /// The origin of the peer this port reaches.
    pub fn peer_origin(&self) -> &str {
        &self.inner.to_origin
    }

    /// Post a payload. The payload is cloned (the channel's copy
    /// semantics); delivery only happens when `target_origin` is `"*"` or
    /// matches the receiving peer's origin, mirroring how a mismatched
    /// target origin suppresses delivery rather than erroring.
    pub fn post(&self, data: &Value, target_origin: &str) -> Result<(), TransportError> {
        if let Some(message) = self.inner.faults.current() {
            return Err(TransportError::SendFailed(message));
        }
        if target_origin != "*" && target_origin != self.inner.to_origin {
            tracing::debug!(
                "dropping post: target origin {} does not match peer origin {}",
                target_origin,
                self.inner.to_origin
            );
            return Ok(());
        }
        let delivery = Delivery {
            data: data.clone(),
            source: self.reply_port(),
            origin: self.inner.from_origin.clone(),
        };
        self.inner
            .to
            .send(delivery)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// The port a receiver of this post would use to reply.
    pub fn reply_port(&self) -> PeerPort {
        PeerPort::new(
            self.inner.from.clone(),
            self.inner.from_origin.clone(),
            self.inner.to.clone(),
            self.inner.to_origin.clone(),
            self.inner.reply_faults.clone(),
            self.inner.faults.clone(),
        )
    }
}

/// One side of a channel: a receiver of deliveries plus the port of the
/// peer reachable at construction time (the "parent" in a nested-context
/// topology).
pub struct Endpoint {
    pub rx: mpsc::UnboundedReceiver<Delivery>,
    pub link: PeerPort,
    pub local_origin: String,
}

impl Endpoint {
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }
}

#[derive(Debug, Clone, Default)]
enum FaultMode {
    #[default]
    None,
    Once(String),
    Always(String),
}

/// Injectable send failure, shared by every port of one channel direction.
#[derive(Clone, Default)]
pub struct FaultSwitch {
    mode: Arc<Mutex<FaultMode>>,
}

impl FaultSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent post fail with the given message.
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.mode.lock().expect("fault switch poisoned") = FaultMode::Always(message.into());
    }

    /// Make only the next post fail with the given message.
    pub fn fail_next(&self, message: impl Into<String>) {
        *self.mode.lock().expect("fault switch poisoned") = FaultMode::Once(message.into());
    }

    pub fn clear(&self) {
        *self.mode.lock().expect("fault switch poisoned") = FaultMode::None;
    }

    fn current(&self) -> Option<String> {
        let mut mode = self.mode.lock().expect("fault switch poisoned");
        match &*mode {
            FaultMode::None => None,
            FaultMode::Always(msg) => Some(msg.clone()),
            FaultMode::Once(msg) => {
                let msg = msg.clone();
                *mode = FaultMode::None;
                Some(msg)
            }
        }
    }
}
