//! Cross-window / worker message channel.
//!
//! One source serves many peers. Every inbound event is checked against the
//! current [`WindowSettings`] before it reaches the dispatcher, so a peer that
//! was admitted earlier is refused as soon as the channel is disabled or its
//! origin drops off the allow-list. Each peer gets its own ordered queue;
//! peers never wait on each other.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{RemoteSource, SourceKind};
use crate::dispatcher::{CommandSource, Dispatcher};
use crate::error::RelayError;
use crate::manager::RemoteCommandManager;
use crate::protocol::{decode_request, encode, ErrorResponse, Request, Response};
use crate::settings::WindowSettings;

// ── Peers and events ────────────────────────────────────────────

/// Identity of a peer on the message channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

impl PeerId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer#{}", self.0)
    }
}

/// A window, frame or worker that can receive posted messages.
pub trait MessagePeer: Send + Sync {
    fn peer_id(&self) -> PeerId;

    fn post_message(&self, data: String) -> Result<(), RelayError>;
}

/// Peer backed by an in-process channel.
#[derive(Debug)]
pub struct ChannelPeer {
    id: PeerId,
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelPeer {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                id: PeerId::next(),
                tx,
            }),
            rx,
        )
    }
}

impl MessagePeer for ChannelPeer {
    fn peer_id(&self) -> PeerId {
        self.id
    }

    fn post_message(&self, data: String) -> Result<(), RelayError> {
        self.tx
            .send(data)
            .map_err(|_| RelayError::PeerClosed(self.id.to_string()))
    }
}

/// One received message event. `source` is absent when the sender cannot
/// be replied to.
#[derive(Clone)]
pub struct MessageEvent {
    pub source: Option<Arc<dyn MessagePeer>>,
    pub origin: String,
    pub data: String,
}

impl fmt::Debug for MessageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageEvent")
            .field("source", &self.source.as_ref().map(|p| p.peer_id()))
            .field("origin", &self.origin)
            .field("data", &self.data)
            .finish()
    }
}

/// Fan-out of message events, the equivalent of a page's `message` event
/// target. Every subscriber has its own unbounded queue, so a listener that
/// has not run yet still sees every event posted after it subscribed.
#[derive(Debug, Clone, Default)]
pub struct MessageEvents {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<MessageEvent>>>>,
}

impl MessageEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every listener. Returns how many received it.
    pub fn post(&self, event: MessageEvent) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        subscribers.len()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<MessageEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }
}

// ── Admission ───────────────────────────────────────────────────

/// Whether a message from `origin` may be dispatched. Nothing is admitted
/// unless the channel is enabled.
pub fn is_trusted_origin(settings: &WindowSettings, own_origin: &str, origin: &str) -> bool {
    if !settings.enabled {
        return false;
    }
    if settings.allow_same_origin && origin == own_origin {
        return true;
    }
    settings.allowed_origins.iter().any(|o| o == origin)
}

// ── Source ──────────────────────────────────────────────────────

type Job = (Request, Arc<dyn MessagePeer>);

#[derive(Default)]
struct WindowState {
    peers: IndexMap<PeerId, Arc<dyn MessagePeer>>,
    workers: HashMap<PeerId, mpsc::UnboundedSender<Job>>,
    listener: Option<JoinHandle<()>>,
}

pub struct WindowCommandSource {
    dispatcher: Dispatcher,
    own_origin: String,
    settings: watch::Receiver<WindowSettings>,
    events: MessageEvents,
    state: Mutex<WindowState>,
    settings_watch: Mutex<Option<JoinHandle<()>>>,
}

impl WindowCommandSource {
    /// Create the source. Must be called from within a tokio runtime: a
    /// background task follows `settings` and stops listening as soon as
    /// the channel is disabled.
    pub fn new(
        manager: Arc<RemoteCommandManager>,
        own_origin: &str,
        settings: watch::Receiver<WindowSettings>,
        events: MessageEvents,
    ) -> Arc<Self> {
        let source = Arc::new(Self {
            dispatcher: Dispatcher::new(manager),
            own_origin: own_origin.to_string(),
            settings: settings.clone(),
            events,
            state: Mutex::new(WindowState::default()),
            settings_watch: Mutex::new(None),
        });

        let weak = Arc::downgrade(&source);
        let mut changes = settings;
        let watcher = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let Some(source) = weak.upgrade() else { break };
                let enabled = changes.borrow_and_update().enabled;
                if !enabled && source.is_listening() {
                    info!("Window channel disabled, dropping peers");
                    source.stop();
                }
            }
        });
        *source.settings_watch.lock() = Some(watcher);

        source
    }

    fn current_settings(&self) -> WindowSettings {
        self.settings.borrow().clone()
    }

    /// Admit `peer` if `origin` passes the admission check. The first
    /// admitted peer starts the listener.
    pub fn add_source(self: &Arc<Self>, peer: Arc<dyn MessagePeer>, origin: &str) -> bool {
        let settings = self.current_settings();
        if !is_trusted_origin(&settings, &self.own_origin, origin) {
            warn!(%origin, peer = %peer.peer_id(), "Refused peer from untrusted origin");
            return false;
        }

        let mut state = self.state.lock();
        info!(%origin, peer = %peer.peer_id(), "Admitted peer");
        state.peers.insert(peer.peer_id(), peer);
        if state.listener.is_none() {
            let events = self.events.subscribe();
            let weak = Arc::downgrade(self);
            state.listener = Some(tokio::spawn(listen(weak, events)));
        }
        true
    }

    /// Forget a peer. Removing the last peer stops the listener.
    pub fn remove_source(&self, peer_id: PeerId) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let removed = state.peers.shift_remove(&peer_id).is_some();
            state.workers.remove(&peer_id);
            removed
        };
        if self.peer_count() == 0 {
            self.stop();
        }
        removed
    }

    pub fn peer_count(&self) -> usize {
        self.state.lock().peers.len()
    }

    pub fn is_listening(&self) -> bool {
        self.state.lock().listener.is_some()
    }

    /// Stop listening and drop every peer and queue.
    pub fn stop(&self) {
        if let Some(listener) = self.reset() {
            listener.abort();
        }
    }

    fn reset(&self) -> Option<JoinHandle<()>> {
        let mut state = self.state.lock();
        state.peers.clear();
        state.workers.clear();
        state.listener.take()
    }

    /// Returns `false` once the listener should exit.
    fn on_event(self: &Arc<Self>, event: MessageEvent) -> bool {
        let settings = self.current_settings();
        if !settings.enabled {
            info!("Window channel disabled, dropping peers");
            // Called from the listener itself; it exits on return.
            drop(self.reset());
            return false;
        }

        let Some(peer) = event.source else {
            debug!(origin = %event.origin, "Ignoring message without a source");
            return true;
        };
        if !is_trusted_origin(&settings, &self.own_origin, &event.origin) {
            debug!(origin = %event.origin, peer = %peer.peer_id(), "Ignoring message from untrusted origin");
            return true;
        }

        let request = match decode_request(&event.data) {
            Ok(request) => request,
            Err(e) => {
                warn!(origin = %event.origin, error = %e, "Discarding undecodable message");
                return true;
            }
        };

        self.enqueue(request, peer);
        true
    }

    /// Queue a request on the sender's worker, starting one if the sender
    /// has none. A worker retires as soon as its queue is empty.
    fn enqueue(self: &Arc<Self>, request: Request, peer: Arc<dyn MessagePeer>) {
        let peer_id = peer.peer_id();
        let mut state = self.state.lock();
        let worker = state.workers.entry(peer_id).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(work(Arc::downgrade(self), peer_id, rx));
            tx
        });
        if worker.send((request, peer)).is_err() {
            warn!(peer = %peer_id, "Peer queue closed, dropping request");
        }
    }

    #[cfg(test)]
    fn worker_count(&self) -> usize {
        self.state.lock().workers.len()
    }
}

impl Drop for WindowCommandSource {
    fn drop(&mut self) {
        if let Some(watcher) = self.settings_watch.get_mut().take() {
            watcher.abort();
        }
        if let Some(listener) = self.state.get_mut().listener.take() {
            listener.abort();
        }
    }
}

async fn listen(weak: Weak<WindowCommandSource>, mut events: mpsc::UnboundedReceiver<MessageEvent>) {
    while let Some(event) = events.recv().await {
        let Some(source) = weak.upgrade() else { break };
        if !source.on_event(event) {
            break;
        }
    }
    debug!("Message listener stopped");
}

async fn work(weak: Weak<WindowCommandSource>, peer_id: PeerId, mut jobs: mpsc::UnboundedReceiver<Job>) {
    let Some(mut job) = jobs.recv().await else { return };
    loop {
        let Some(source) = weak.upgrade() else { return };
        let (request, peer) = job;
        source.dispatcher.handle(source.as_ref(), request, &peer).await;

        // Senders only push while holding the state lock, so an empty queue
        // seen under the lock is final and the entry is still this worker's.
        // A disconnected queue means the entry was already removed.
        let next = {
            let mut state = source.state.lock();
            match jobs.try_recv() {
                Ok(next) => Some(next),
                Err(TryRecvError::Empty) => {
                    state.workers.remove(&peer_id);
                    None
                }
                Err(TryRecvError::Disconnected) => None,
            }
        };
        match next {
            Some(next) => job = next,
            None => return,
        }
    }
}

#[async_trait]
impl CommandSource for WindowCommandSource {
    type Peer = Arc<dyn MessagePeer>;

    async fn ready(&self) {
        self.dispatcher.manager().wait_ready().await;
    }

    async fn send_response(&self, response: Response, peer: &Self::Peer) -> Result<(), RelayError> {
        peer.post_message(encode(&response)?)
    }

    async fn send_error(&self, error: ErrorResponse, peer: &Self::Peer) -> Result<(), RelayError> {
        peer.post_message(encode(&error)?)
    }
}

impl RemoteSource for WindowCommandSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Window
    }

    fn close(&self) {
        self.stop();
        if let Some(watcher) = self.settings_watch.lock().take() {
            watcher.abort();
        }
    }
}
