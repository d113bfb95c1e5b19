//! Server-side state of one connected client.
//!
//! A [`Peer`] owns its signaling transport and, from the first negotiation
//! on, one media binding. It also carries the negotiation coordinator: the
//! answer path for client offers and the lock-serialized offer path used
//! for server-initiated renegotiation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionMonitor, ConnectionState, ConnectionStatus};
use crate::error::{Error, Result};
use crate::media::{
    same_sink, MediaBinding, MediaEngine, MediaEvent, MediaEventReceiver, MediaSink, SdpKind,
    SessionDescription, StreamParams,
};
use crate::relay;
use crate::room::Room;
use crate::signaling::SignalMessage;
use crate::transport::Transport;

pub struct Peer {
    identity: String,
    display_name: String,
    transport: Arc<dyn Transport>,
    engine: Arc<dyn MediaEngine>,
    binding: RwLock<Option<Arc<dyn MediaBinding>>>,
    /// Sinks feeding this peer, keyed by source identity.
    outbound_sinks: RwLock<HashMap<String, Arc<dyn MediaSink>>>,
    /// Serializes create-offer / set-local / gather / send.
    negotiation: tokio::sync::Mutex<()>,
    offer_outstanding: AtomicBool,
    /// Stream this peer is currently publishing, tagged with its generation.
    published: Mutex<Option<(u64, StreamParams)>>,
    stream_generation: AtomicU64,
    closed: AtomicBool,
    room: Mutex<Weak<Room>>,
    monitor: ConnectionMonitor,
}

impl Peer {
    pub fn new(
        identity: String,
        display_name: String,
        transport: Arc<dyn Transport>,
        engine: Arc<dyn MediaEngine>,
    ) -> Arc<Self> {
        Arc::new(Self {
            identity,
            display_name,
            transport,
            engine,
            binding: RwLock::new(None),
            outbound_sinks: RwLock::new(HashMap::new()),
            negotiation: tokio::sync::Mutex::new(()),
            offer_outstanding: AtomicBool::new(false),
            published: Mutex::new(None),
            stream_generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            room: Mutex::new(Weak::new()),
            monitor: ConnectionMonitor::new(),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn state(&self) -> ConnectionState {
        self.monitor.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.monitor.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn room(&self) -> Option<Arc<Room>> {
        self.room.lock().upgrade()
    }

    pub(crate) fn set_room(&self, room: &Arc<Room>) {
        *self.room.lock() = Arc::downgrade(room);
    }

    pub(crate) fn clear_room(&self) {
        *self.room.lock() = Weak::new();
    }

    pub fn binding(&self) -> Option<Arc<dyn MediaBinding>> {
        self.binding.read().clone()
    }

    pub(crate) async fn recv(&self) -> Result<Option<String>> {
        self.transport.recv().await
    }

    pub async fn send(&self, msg: &SignalMessage) -> Result<()> {
        self.transport.send(msg.to_json()?).await
    }

    // --- outbound sinks ---------------------------------------------------

    /// Registers `sink` for `source`, returning the stale sink it replaced.
    pub fn install_sink(&self, source: &str, sink: Arc<dyn MediaSink>) -> Option<Arc<dyn MediaSink>> {
        self.outbound_sinks.write().insert(source.to_owned(), sink)
    }

    pub fn sink_for(&self, source: &str) -> Option<Arc<dyn MediaSink>> {
        self.outbound_sinks.read().get(source).cloned()
    }

    /// Removes the sink for `source` only if it is still `sink`.
    pub fn remove_sink_if(&self, source: &str, sink: &Arc<dyn MediaSink>) -> bool {
        let mut sinks = self.outbound_sinks.write();
        match sinks.get(source) {
            Some(current) if same_sink(current, sink) => {
                sinks.remove(source);
                true
            }
            _ => false,
        }
    }

    pub fn sink_count(&self) -> usize {
        self.outbound_sinks.read().len()
    }

    pub(crate) fn remove_sink(&self, source: &str) -> Option<Arc<dyn MediaSink>> {
        self.outbound_sinks.write().remove(source)
    }

    // --- published stream -------------------------------------------------

    /// Records `params` as this peer's live stream and returns its generation.
    pub(crate) fn begin_publishing(&self, params: StreamParams) -> u64 {
        let generation = self.stream_generation.fetch_add(1, Ordering::AcqRel) + 1;
        *self.published.lock() = Some((generation, params));
        generation
    }

    /// Clears the live stream if it is still `generation`. Returns whether
    /// it was.
    pub(crate) fn end_publishing(&self, generation: u64) -> bool {
        let mut published = self.published.lock();
        match published.as_ref() {
            Some((current, _)) if *current == generation => {
                *published = None;
                true
            }
            _ => false,
        }
    }

    pub fn published_params(&self) -> Option<StreamParams> {
        self.published.lock().as_ref().map(|(_, params)| params.clone())
    }

    // --- negotiation ------------------------------------------------------

    async fn ensure_binding(self: &Arc<Self>) -> Result<Arc<dyn MediaBinding>> {
        if let Some(binding) = self.binding() {
            return Ok(binding);
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let created = self.engine.create_binding(&self.identity, events_tx).await?;

        // The closed check sits under the slot lock: teardown either sees the
        // stored binding or this path sees the flag, never both.
        let outcome = {
            let mut slot = self.binding.write();
            if self.is_closed() {
                Err(Error::TransportClosed)
            } else if let Some(existing) = slot.as_ref() {
                Ok(Some(Arc::clone(existing)))
            } else {
                *slot = Some(Arc::clone(&created));
                Ok(None)
            }
        };
        match outcome {
            Ok(None) => {}
            Ok(Some(existing)) => {
                let _ = created.close().await;
                return Ok(existing);
            }
            Err(e) => {
                let _ = created.close().await;
                return Err(e);
            }
        }

        debug!(peer = %self.identity, "media binding created");
        tokio::spawn(run_media_events(Arc::downgrade(self), events_rx));
        Ok(created)
    }

    /// Answer path: applies a client offer and sends back the answer once
    /// candidate gathering has finished. Any error is fatal to the peer.
    pub async fn answer_offer(self: &Arc<Self>, offer_sdp: &str) -> Result<()> {
        self.monitor.update_state(ConnectionState::Negotiating);
        let first = self.binding().is_none();
        let result = self.answer_offer_inner(offer_sdp).await;
        match &result {
            Ok(()) => {
                self.monitor.negotiation_completed();
                if first {
                    relay::attach_active_sources(self).await;
                }
            }
            Err(e) => {
                error!(peer = %self.identity, error = %e, "answering offer failed");
                self.monitor.set_error(e.to_string());
            }
        }
        result
    }

    async fn answer_offer_inner(self: &Arc<Self>, offer_sdp: &str) -> Result<()> {
        let binding = self.ensure_binding().await?;
        binding
            .set_remote_description(SessionDescription::offer(offer_sdp))
            .await?;
        let answer = binding.create_answer().await?;
        binding.set_local_description(answer.clone()).await?;
        binding.gathering_complete().await;

        let local = binding.local_description().await.unwrap_or(answer);
        self.send(&SignalMessage::description(&local)).await?;
        debug!(peer = %self.identity, "answer sent");
        Ok(())
    }

    /// Offer path, fire-and-forget flavor: failures are logged and only
    /// abandon this attempt.
    pub async fn negotiate(&self) {
        if let Err(e) = self.try_negotiate().await {
            warn!(peer = %self.identity, error = %e, "renegotiation abandoned");
            self.monitor.set_error(e.to_string());
            if !self.is_closed() && self.state() == ConnectionState::Negotiating {
                self.monitor.update_state(ConnectionState::Active);
            }
        }
    }

    /// Offer path: one server-originated offer cycle under the negotiation
    /// lock. Never two cycles in flight for the same peer.
    pub async fn try_negotiate(&self) -> Result<()> {
        let binding = match self.binding() {
            Some(binding) => binding,
            None => {
                debug!(peer = %self.identity, "no media binding, skipping renegotiation");
                return Ok(());
            }
        };
        let _guard = self.negotiation.lock().await;
        if self.is_closed() {
            return Err(Error::TransportClosed);
        }
        self.monitor.update_state(ConnectionState::Negotiating);

        let offer = binding.create_offer().await?;
        binding.set_local_description(offer.clone()).await?;
        binding.gathering_complete().await;

        let local = binding.local_description().await.unwrap_or(offer);
        if local.kind != SdpKind::Offer {
            return Err(Error::Negotiation(format!(
                "local description is an {} after creating an offer",
                local.kind
            )));
        }
        self.offer_outstanding.store(true, Ordering::Release);
        self.send(&SignalMessage::description(&local)).await?;
        debug!(peer = %self.identity, "renegotiation offer sent");
        Ok(())
    }

    /// Applies a client answer to the outstanding server offer. Never fatal.
    pub async fn apply_answer(&self, answer_sdp: &str) {
        let binding = match self.binding() {
            Some(binding) => binding,
            None => {
                debug!(peer = %self.identity, "answer before any media binding, ignored");
                return;
            }
        };
        if !self.offer_outstanding.load(Ordering::Acquire) {
            warn!(peer = %self.identity, "answer without an outstanding offer, ignored");
            return;
        }
        // The offer stays outstanding until an answer is accepted.
        match binding
            .set_remote_description(SessionDescription::answer(answer_sdp))
            .await
        {
            Ok(()) => {
                self.offer_outstanding.store(false, Ordering::Release);
                self.monitor.negotiation_completed();
            }
            Err(e) => warn!(peer = %self.identity, error = %e, "rejected client answer"),
        }
    }

    /// Hands a client network candidate to the binding. Never fatal.
    pub async fn add_remote_candidate(&self, candidate: Option<Value>) {
        let binding = match self.binding() {
            Some(binding) => binding,
            None => {
                debug!(peer = %self.identity, "candidate before any media binding, ignored");
                return;
            }
        };
        let candidate = match candidate {
            Some(candidate) => candidate,
            None => {
                debug!(peer = %self.identity, "candidate message without payload");
                return;
            }
        };
        if let Err(e) = binding.add_remote_candidate(candidate).await {
            warn!(peer = %self.identity, error = %e, "skipping remote candidate");
        }
    }

    // --- teardown ---------------------------------------------------------

    /// Leaves the room, closes the binding, closes the transport. The body
    /// runs once no matter how many triggers race here.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(peer = %self.identity, "closing peer");
        if let Some(room) = self.room() {
            room.remove_member(self);
        }
        let binding = self.binding();
        if let Some(binding) = binding {
            if let Err(e) = binding.close().await {
                debug!(peer = %self.identity, error = %e, "media binding close failed");
            }
        }
        self.transport.close().await;
        self.monitor.update_state(ConnectionState::Closed);
    }
}

async fn run_media_events(peer: Weak<Peer>, mut events: MediaEventReceiver) {
    while let Some(event) = events.recv().await {
        let peer = match peer.upgrade() {
            Some(peer) if !peer.is_closed() => peer,
            _ => break,
        };
        match event {
            MediaEvent::LocalCandidate(candidate) => {
                if let Err(e) = peer.send(&SignalMessage::candidate_from_server(candidate)).await {
                    debug!(peer = %peer.identity(), error = %e, "could not send local candidate");
                }
            }
            MediaEvent::IncomingStream(stream) => {
                tokio::spawn(relay::relay_stream(peer, stream));
            }
        }
    }
}
