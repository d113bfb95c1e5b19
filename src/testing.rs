//! In-memory collaborators for unit tests.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use webrtc::rtp::header::Header;
use webrtc::rtp::packet::Packet;

use crate::auth::{AuthError, AuthResult, CredentialValidator, Profile, ProfileDirectory};
use crate::error::{Error, Result};
use crate::media::{
    IncomingStream, MediaBinding, MediaEngine, MediaEvent, MediaEventSender, MediaSink, SdpKind,
    SessionDescription, StreamParams,
};
use crate::peer::Peer;
use crate::signaling::SignalMessage;
use crate::transport::Transport;

const WAIT: Duration = Duration::from_secs(2);

/// Polls `cond` until it holds or two seconds pass.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

pub fn rtp(sequence_number: u16) -> Packet {
    Packet {
        header: Header {
            version: 2,
            payload_type: 111,
            sequence_number,
            ..Default::default()
        },
        payload: Bytes::from_static(&[0xf8, 0xff, 0xfe]),
    }
}

pub fn test_peer(identity: &str) -> (Arc<Peer>, ClientEnd) {
    test_peer_with(identity, MockEngine::new())
}

pub fn test_peer_with(identity: &str, engine: Arc<MockEngine>) -> (Arc<Peer>, ClientEnd) {
    let (transport, client) = channel_transport();
    let peer = Peer::new(identity.to_owned(), identity.to_uppercase(), transport, engine);
    (peer, client)
}

// --- transport ------------------------------------------------------------

pub struct ChannelTransport {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    outbound: mpsc::UnboundedSender<String>,
    closed: watch::Sender<bool>,
    close_calls: Arc<AtomicUsize>,
}

/// The client's side of a [`ChannelTransport`].
pub struct ClientEnd {
    to_server: Option<mpsc::UnboundedSender<String>>,
    from_server: mpsc::UnboundedReceiver<String>,
    closed: watch::Receiver<bool>,
    close_calls: Arc<AtomicUsize>,
}

pub fn channel_transport() -> (Arc<ChannelTransport>, ClientEnd) {
    let (to_server, inbound) = mpsc::unbounded_channel();
    let (outbound, from_server) = mpsc::unbounded_channel();
    let (closed_tx, closed_rx) = watch::channel(false);
    let close_calls = Arc::new(AtomicUsize::new(0));
    let transport = Arc::new(ChannelTransport {
        inbound: tokio::sync::Mutex::new(inbound),
        outbound,
        closed: closed_tx,
        close_calls: Arc::clone(&close_calls),
    });
    let client = ClientEnd {
        to_server: Some(to_server),
        from_server,
        closed: closed_rx,
        close_calls,
    };
    (transport, client)
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn recv(&self) -> Result<Option<String>> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Ok(None);
        }
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            msg = inbound.recv() => Ok(msg),
            _ = closed.changed() => Ok(None),
        }
    }

    async fn send(&self, text: String) -> Result<()> {
        if *self.closed.borrow() {
            return Err(Error::TransportClosed);
        }
        self.outbound.send(text).map_err(|_| Error::TransportClosed)
    }

    async fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.send_replace(true);
    }
}

impl ClientEnd {
    pub fn send(&self, msg: &SignalMessage) {
        self.send_raw(msg.to_json().unwrap());
    }

    pub fn send_raw(&self, raw: String) {
        if let Some(tx) = &self.to_server {
            let _ = tx.send(raw);
        }
    }

    /// Simulates the client dropping the connection.
    pub fn hang_up(&mut self) {
        self.to_server = None;
    }

    pub async fn next_message(&mut self) -> Option<SignalMessage> {
        let raw = tokio::time::timeout(WAIT, self.from_server.recv()).await.ok()??;
        Some(serde_json::from_str(&raw).unwrap())
    }

    pub fn try_next(&mut self) -> Option<SignalMessage> {
        let raw = self.from_server.try_recv().ok()?;
        Some(serde_json::from_str(&raw).unwrap())
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

// --- media ----------------------------------------------------------------

#[derive(Default)]
pub struct MockEngine {
    bindings: Mutex<HashMap<String, Arc<MockBinding>>>,
    fail_answers: AtomicBool,
    gather_delay: Mutex<Duration>,
    create_delay: Mutex<Duration>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn binding_for(&self, owner: &str) -> Option<Arc<MockBinding>> {
        self.bindings.lock().get(owner).cloned()
    }

    pub fn fail_answers(&self, fail: bool) {
        self.fail_answers.store(fail, Ordering::SeqCst);
    }

    pub fn set_gather_delay(&self, delay: Duration) {
        *self.gather_delay.lock() = delay;
    }

    /// Delays every `create_binding` call by `delay`.
    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock() = delay;
    }
}

#[async_trait]
impl MediaEngine for MockEngine {
    async fn create_binding(
        &self,
        owner: &str,
        events: MediaEventSender,
    ) -> Result<Arc<dyn MediaBinding>> {
        let delay = *self.create_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let binding = Arc::new(MockBinding {
            events,
            fail_answers: self.fail_answers.load(Ordering::SeqCst),
            gather_delay: *self.gather_delay.lock(),
            ..Default::default()
        });
        self.bindings
            .lock()
            .insert(owner.to_owned(), Arc::clone(&binding));
        Ok(binding)
    }
}

pub struct MockBinding {
    events: MediaEventSender,
    fail_answers: bool,
    fail_offers: AtomicBool,
    fail_attach: AtomicBool,
    reject_candidates: AtomicBool,
    reject_remote: AtomicBool,
    gather_delay: Duration,
    remote: Mutex<Vec<SessionDescription>>,
    local: Mutex<Option<SessionDescription>>,
    candidates: Mutex<Vec<Value>>,
    sinks: Mutex<Vec<Arc<MockSink>>>,
    attached: AtomicUsize,
    offers_created: AtomicUsize,
    offers_in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    close_calls: AtomicUsize,
}

impl Default for MockBinding {
    fn default() -> Self {
        let (events, _) = mpsc::unbounded_channel();
        Self {
            events,
            fail_answers: false,
            fail_offers: AtomicBool::new(false),
            fail_attach: AtomicBool::new(false),
            reject_candidates: AtomicBool::new(false),
            reject_remote: AtomicBool::new(false),
            gather_delay: Duration::ZERO,
            remote: Mutex::new(Vec::new()),
            local: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
            sinks: Mutex::new(Vec::new()),
            attached: AtomicUsize::new(0),
            offers_created: AtomicUsize::new(0),
            offers_in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
        }
    }
}

impl MockBinding {
    pub fn emit(&self, event: MediaEvent) {
        self.events.send(event).unwrap();
    }

    pub fn fail_offers(&self, fail: bool) {
        self.fail_offers.store(fail, Ordering::SeqCst);
    }

    pub fn fail_attach(&self, fail: bool) {
        self.fail_attach.store(fail, Ordering::SeqCst);
    }

    /// Makes `set_remote_description` refuse every description.
    pub fn reject_remote(&self, reject: bool) {
        self.reject_remote.store(reject, Ordering::SeqCst);
    }

    pub fn reject_candidates(&self, reject: bool) {
        self.reject_candidates.store(reject, Ordering::SeqCst);
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn candidates(&self) -> Vec<Value> {
        self.candidates.lock().clone()
    }

    pub fn sink(&self, index: usize) -> Arc<MockSink> {
        Arc::clone(&self.sinks.lock()[index])
    }

    pub fn attached_sinks(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }

    pub fn offers_created(&self) -> usize {
        self.offers_created.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_offers(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaBinding for MockBinding {
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        if self.reject_remote.load(Ordering::SeqCst) {
            return Err(Error::Negotiation("mock rejected remote description".into()));
        }
        self.remote.lock().push(desc);
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        if self.fail_answers {
            return Err(Error::Negotiation("mock answer failure".into()));
        }
        Ok(SessionDescription::answer("v=0 mock-answer"))
    }

    async fn create_offer(&self) -> Result<SessionDescription> {
        if self.fail_offers.load(Ordering::SeqCst) {
            return Err(Error::Negotiation("mock offer failure".into()));
        }
        self.offers_created.fetch_add(1, Ordering::SeqCst);
        let now = self.offers_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Ok(SessionDescription::offer("v=0 mock-offer"))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        *self.local.lock() = Some(desc);
        Ok(())
    }

    async fn gathering_complete(&self) {
        if !self.gather_delay.is_zero() {
            tokio::time::sleep(self.gather_delay).await;
        }
        let is_offer = matches!(self.local.lock().as_ref(), Some(d) if d.kind == SdpKind::Offer);
        if is_offer {
            self.offers_in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    async fn add_remote_candidate(&self, candidate: Value) -> Result<()> {
        if self.reject_candidates.load(Ordering::SeqCst) || !candidate.is_object() {
            return Err(Error::Negotiation("unusable candidate".into()));
        }
        self.candidates.lock().push(candidate);
        Ok(())
    }

    async fn create_sink(&self, source: &str, _params: &StreamParams) -> Result<Arc<dyn MediaSink>> {
        let sink = MockSink::new(source);
        self.sinks.lock().push(Arc::clone(&sink));
        Ok(sink)
    }

    async fn attach_sink(&self, _sink: Arc<dyn MediaSink>) -> Result<()> {
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(Error::Negotiation("mock attach failure".into()));
        }
        self.attached.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockSink {
    source: String,
    written: Mutex<Vec<u16>>,
    fail: AtomicBool,
}

impl MockSink {
    pub fn new(source: &str) -> Arc<Self> {
        Arc::new(Self {
            source: source.to_owned(),
            written: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    /// Sequence numbers of the packets written so far.
    pub fn written(&self) -> Vec<u16> {
        self.written.lock().clone()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaSink for MockSink {
    fn source(&self) -> &str {
        &self.source
    }

    async fn write(&self, packet: &Packet) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Negotiation("mock write failure".into()));
        }
        self.written.lock().push(packet.header.sequence_number);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Stream fed by the test; dropping the feed ends the stream.
pub struct MockStream {
    packets: tokio::sync::Mutex<mpsc::UnboundedReceiver<Packet>>,
}

impl MockStream {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedSender<Packet>) {
        let (feed, packets) = mpsc::unbounded_channel();
        let stream = Arc::new(Self {
            packets: tokio::sync::Mutex::new(packets),
        });
        (stream, feed)
    }
}

#[async_trait]
impl IncomingStream for MockStream {
    fn params(&self) -> StreamParams {
        StreamParams {
            mime_type: "audio/opus".to_owned(),
            clock_rate: 48000,
            channels: 2,
            ..Default::default()
        }
    }

    async fn read_packet(&self) -> Result<Packet> {
        self.packets.lock().await.recv().await.ok_or(Error::EndOfStream)
    }
}

// --- accounts -------------------------------------------------------------

/// Fixed token → account → profile tables.
#[derive(Default)]
pub struct StaticAccounts {
    tokens: HashMap<String, String>,
    profiles: HashMap<String, Profile>,
}

impl StaticAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, token: &str, identity: &str, display_name: &str) -> Self {
        self.tokens.insert(token.to_owned(), identity.to_owned());
        self.profiles.insert(
            identity.to_owned(),
            Profile {
                id: identity.to_owned(),
                display_name: display_name.to_owned(),
            },
        );
        self
    }

    /// A valid token whose account has no profile.
    pub fn with_token_only(mut self, token: &str, identity: &str) -> Self {
        self.tokens.insert(token.to_owned(), identity.to_owned());
        self
    }
}

#[async_trait]
impl CredentialValidator for StaticAccounts {
    async fn validate_token(&self, token: &str) -> AuthResult<String> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| AuthError::InvalidToken("unknown token".into()))
    }
}

#[async_trait]
impl ProfileDirectory for StaticAccounts {
    async fn lookup_profile(&self, identity: &str) -> AuthResult<Profile> {
        self.profiles
            .get(identity)
            .cloned()
            .ok_or_else(|| AuthError::ProfileNotFound(identity.to_owned()))
    }
}
