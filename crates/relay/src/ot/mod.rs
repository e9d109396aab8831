// Seam to the operational-transform engine.
//
// Every connection gets one duplex relay: frames the client sends go into
// the engine, frames the engine produces for that client come back out.
// Dropping the inbound half is the end-of-stream signal.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::OtStoreConfig;

pub trait OtEngine: Send + Sync + 'static {
    /// Opens the relay for one connection. Must be called inside a tokio
    /// runtime.
    fn open(&self, session_id: Uuid) -> OtRelay;
}

/// Connection-side handle of an engine relay.
#[derive(Debug)]
pub struct OtRelay {
    inbound: Option<mpsc::UnboundedSender<String>>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl OtRelay {
    pub fn new(
        inbound: mpsc::UnboundedSender<String>,
        outbound: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        Self { inbound: Some(inbound), outbound }
    }

    /// Forwards a raw client frame into the engine. Returns false once the
    /// stream has ended or the engine stopped reading.
    pub fn forward(&self, frame: String) -> bool {
        self.inbound.as_ref().is_some_and(|inbound| inbound.send(frame).is_ok())
    }

    /// Next frame the engine addressed to this connection; `None` when the
    /// engine closed its side.
    pub async fn recv(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Signals end-of-stream so the engine can release this connection.
    pub fn end(&mut self) {
        self.inbound = None;
    }

    pub fn is_ended(&self) -> bool {
        self.inbound.is_none()
    }
}

/// Reference engine that fans each inbound frame out to every other open
/// relay. It performs no transformation; it lets the relay run standalone
/// and gives tests an observable engine.
#[derive(Clone)]
pub struct LoopbackEngine {
    inner: Arc<LoopbackInner>,
}

struct LoopbackInner {
    streams: Mutex<HashMap<Uuid, mpsc::UnboundedSender<String>>>,
    frames_relayed: AtomicU64,
}

impl LoopbackEngine {
    /// Keeps nothing durable; `store` is only logged.
    pub fn new(store: &OtStoreConfig) -> Self {
        info!(store = %store, "loopback OT engine ready");
        Self {
            inner: Arc::new(LoopbackInner {
                streams: Mutex::new(HashMap::new()),
                frames_relayed: AtomicU64::new(0),
            }),
        }
    }

    /// Relays whose inbound stream has not ended yet.
    pub fn open_streams(&self) -> usize {
        self.inner.streams().len()
    }

    pub fn frames_relayed(&self) -> u64 {
        self.inner.frames_relayed.load(Ordering::Relaxed)
    }
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new(&OtStoreConfig::default())
    }
}

impl LoopbackInner {
    fn streams(&self) -> MutexGuard<'_, HashMap<Uuid, mpsc::UnboundedSender<String>>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fan_out(&self, from: Uuid, frame: &str) {
        self.frames_relayed.fetch_add(1, Ordering::Relaxed);
        let streams = self.streams();
        for (session_id, sender) in streams.iter() {
            if *session_id != from {
                let _ = sender.send(frame.to_owned());
            }
        }
    }
}

impl OtEngine for LoopbackEngine {
    fn open(&self, session_id: Uuid) -> OtRelay {
        let (inbound_sender, mut inbound_receiver) = mpsc::unbounded_channel::<String>();
        let (outbound_sender, outbound_receiver) = mpsc::unbounded_channel::<String>();
        self.inner.streams().insert(session_id, outbound_sender);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            while let Some(frame) = inbound_receiver.recv().await {
                inner.fan_out(session_id, &frame);
            }
            inner.streams().remove(&session_id);
            debug!(session_id = %session_id, "OT relay stream ended");
        });

        OtRelay::new(inbound_sender, outbound_receiver)
    }
}
