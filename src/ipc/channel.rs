//! Message channels
//!
//! A [`Channel`] is a message-oriented, bidirectional endpoint in one of two
//! roles:
//!
//! - [`ChannelRole::Rendezvous`]: request/reply. The connected side sends a
//!   request and reads the reply; the bound side answers each request it
//!   reads with exactly one [`send`](Channel::send).
//! - [`ChannelRole::Session`]: a full-duplex pair. Both sides send freely and
//!   each direction is FIFO.
//!
//! Every peer stream gets a reader task and a writer task. Readers validate
//! each frame and drop invalid ones with a log line. Only validated messages
//! reach [`recv`](Channel::recv). Peer lifecycle and inbound messages arrive on
//! one event queue that only the channel owner drains, so the channel itself
//! needs no locking.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::address::{ChannelAddress, Protocol};
use super::frame::{self, DEFAULT_MAX_FRAME_BYTES};
use super::inproc::InprocHub;
use super::message::Message;
use super::registry::{AddressRegistry, ClaimKind};
use super::schema::MessageValidator;
use crate::{Error, Result};

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

type PeerId = u64;

/// Socket role of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelRole {
    /// One-shot request/reply, used for registration
    Rendezvous,
    /// Long-lived pair, used for all post-registration traffic
    Session,
}

/// Lifecycle state of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Bound,
    Connected,
}

/// Shared collaborators and limits for channels
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Uniqueness registry for session addresses
    pub addresses: Arc<AddressRegistry>,
    /// Name table for in-process endpoints
    pub inproc: Arc<InprocHub>,
    /// Validator applied to every inbound frame and outbound message
    pub validator: &'static MessageValidator,
    /// Largest frame payload accepted or sent
    pub max_frame_bytes: usize,
    /// Fail duplicate bind/connect calls instead of logging them
    pub strict: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            addresses: AddressRegistry::global(),
            inproc: InprocHub::global(),
            validator: MessageValidator::global(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            strict: false,
        }
    }
}

impl ChannelOptions {
    /// Options with private registries, for tests and embedding
    #[must_use]
    pub fn isolated() -> Self {
        Self {
            addresses: Arc::new(AddressRegistry::new()),
            inproc: Arc::new(InprocHub::new()),
            ..Self::default()
        }
    }
}

enum ChannelEvent {
    PeerConnected(Peer),
    Message(PeerId, Message),
    PeerClosed(PeerId),
}

/// One connected stream: the sending half of its writer queue plus its tasks
struct Peer {
    id: PeerId,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    reader: JoinHandle<()>,
}

impl Drop for Peer {
    fn drop(&mut self) {
        // The writer drains its queue and exits once `outbound` is dropped
        self.reader.abort();
    }
}

#[derive(Clone)]
struct PeerContext {
    channel: Arc<str>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    validator: &'static MessageValidator,
    max_frame_bytes: usize,
}

fn spawn_peer<S>(stream: S, ctx: PeerContext) -> Peer
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let id = NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed);
    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let writer_channel = Arc::clone(&ctx.channel);
    tokio::spawn(async move {
        while let Some(payload) = outbound_rx.recv().await {
            if let Err(e) = frame::write_frame(&mut write_half, &payload).await {
                tracing::warn!(channel = %writer_channel, peer = id, error = %e, "send failed, dropping peer writer");
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    let reader = tokio::spawn(async move {
        loop {
            match frame::read_frame(&mut read_half, ctx.max_frame_bytes).await {
                Ok(Some(bytes)) => match ctx.validator.validate(&bytes) {
                    Ok(message) => {
                        if ctx.events.send(ChannelEvent::Message(id, message)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            channel = %ctx.channel,
                            peer = id,
                            kind = ?e.kind(),
                            error = %e,
                            "dropping invalid message"
                        );
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(channel = %ctx.channel, peer = id, error = %e, "peer stream failed");
                    break;
                }
            }
        }
        let _ = ctx.events.send(ChannelEvent::PeerClosed(id));
    });

    Peer {
        id,
        outbound,
        reader,
    }
}

/// Message channel bound or connected to one or more addresses
pub struct Channel {
    name: Arc<str>,
    role: ChannelRole,
    options: ChannelOptions,
    state: ChannelState,
    address: Option<ChannelAddress>,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    events_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    backlog: VecDeque<(PeerId, Message)>,
    peers: HashMap<PeerId, Peer>,
    current_peer: Option<PeerId>,
    reply_to: Option<PeerId>,
    acceptors: Vec<JoinHandle<()>>,
    claims: Vec<(ClaimKind, ChannelAddress)>,
    inproc_bindings: Vec<(String, u64)>,
    socket_files: Vec<PathBuf>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("address", &self.address)
            .field("peers", &self.peers.len())
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Create an idle channel
    #[must_use]
    pub fn new(name: impl Into<String>, role: ChannelRole, options: ChannelOptions) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            name: Arc::from(name.into()),
            role,
            options,
            state: ChannelState::Idle,
            address: None,
            events_tx,
            events_rx,
            backlog: VecDeque::new(),
            peers: HashMap::new(),
            current_peer: None,
            reply_to: None,
            acceptors: Vec::new(),
            claims: Vec::new(),
            inproc_bindings: Vec::new(),
            socket_files: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn role(&self) -> ChannelRole {
        self.role
    }

    #[must_use]
    pub const fn state(&self) -> ChannelState {
        self.state
    }

    /// Address of the most recent bind or connect
    #[must_use]
    pub const fn address(&self) -> Option<&ChannelAddress> {
        self.address.as_ref()
    }

    /// Number of live peer streams, after applying queued connection events
    pub fn peer_count(&mut self) -> usize {
        self.pump();
        self.peers.len()
    }

    fn peer_context(&self) -> PeerContext {
        PeerContext {
            channel: Arc::clone(&self.name),
            events: self.events_tx.clone(),
            validator: self.options.validator,
            max_frame_bytes: self.options.max_frame_bytes,
        }
    }

    /// Report a bind/connect from a non-idle state
    fn check_idle(&self, operation: &str, address: &ChannelAddress) -> Result<()> {
        if self.state == ChannelState::Idle {
            return Ok(());
        }
        let message = format!(
            "{operation} {address} on channel '{}' which is already {:?}",
            self.name, self.state
        );
        if self.options.strict {
            return Err(Error::Channel(message));
        }
        tracing::error!(channel = %self.name, %address, state = ?self.state, "{operation} called on a channel that is not idle");
        Ok(())
    }

    /// Claim a session address, returning whether the claim is owned
    fn claim(&self, kind: ClaimKind, address: &ChannelAddress) -> Result<bool> {
        if self.role != ChannelRole::Session {
            return Ok(false);
        }
        if self.options.addresses.claim(kind, address) {
            return Ok(true);
        }
        let side = match kind {
            ClaimKind::Bound => "bound",
            ClaimKind::Connected => "connected",
        };
        if self.options.strict {
            return Err(Error::Channel(format!("address {address} is already {side}")));
        }
        tracing::error!(channel = %self.name, %address, "address is already {side}");
        Ok(false)
    }

    fn release_on_failure(&self, owned: bool, kind: ClaimKind, address: &ChannelAddress) {
        if owned {
            self.options.addresses.release(kind, address);
        }
    }

    /// Bind to `address` and start accepting peers
    ///
    /// For `ipc` addresses a stale socket file left by a crashed process is
    /// removed first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the endpoint cannot be bound, and
    /// [`Error::Channel`] for duplicate binds in strict mode
    pub fn bind(&mut self, address: &ChannelAddress) -> Result<()> {
        self.check_idle("bind", address)?;
        let owned = self.claim(ClaimKind::Bound, address)?;

        let acceptor = match self.spawn_acceptor(address) {
            Ok(acceptor) => acceptor,
            Err(e) => {
                self.release_on_failure(owned, ClaimKind::Bound, address);
                return Err(e);
            }
        };

        self.acceptors.push(acceptor);
        if owned {
            self.claims.push((ClaimKind::Bound, address.clone()));
        }
        self.state = ChannelState::Bound;
        self.address = Some(address.clone());
        tracing::debug!(channel = %self.name, %address, role = ?self.role, "channel bound");
        Ok(())
    }

    fn spawn_acceptor(&mut self, address: &ChannelAddress) -> Result<JoinHandle<()>> {
        let ctx = self.peer_context();
        match address.protocol() {
            Protocol::Inproc => {
                let (token, mut listener) = self.options.inproc.bind(address.location());
                self.inproc_bindings
                    .push((address.location().to_string(), token));
                Ok(tokio::spawn(async move {
                    while let Some(stream) = listener.recv().await {
                        let peer = spawn_peer(stream, ctx.clone());
                        if ctx.events.send(ChannelEvent::PeerConnected(peer)).is_err() {
                            break;
                        }
                    }
                }))
            }
            Protocol::Ipc => {
                let acceptor = spawn_ipc_acceptor(address, ctx)?;
                self.socket_files
                    .extend(address.socket_path().map(PathBuf::from));
                Ok(acceptor)
            }
        }
    }

    /// Connect to the endpoint bound at `address`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the endpoint cannot be reached, and
    /// [`Error::Channel`] for duplicate connects in strict mode
    pub fn connect(&mut self, address: &ChannelAddress) -> Result<()> {
        self.check_idle("connect", address)?;
        let owned = self.claim(ClaimKind::Connected, address)?;

        let ctx = self.peer_context();
        let peer = match address.protocol() {
            Protocol::Inproc => self
                .options
                .inproc
                .connect(address.location())
                .map(|stream| spawn_peer(stream, ctx)),
            Protocol::Ipc => connect_ipc(address, ctx),
        };
        let peer = match peer {
            Ok(peer) => peer,
            Err(e) => {
                self.release_on_failure(owned, ClaimKind::Connected, address);
                return Err(e);
            }
        };

        self.current_peer = Some(peer.id);
        self.peers.insert(peer.id, peer);
        if owned {
            self.claims.push((ClaimKind::Connected, address.clone()));
        }
        self.state = ChannelState::Connected;
        self.address = Some(address.clone());
        tracing::debug!(channel = %self.name, %address, role = ?self.role, "channel connected");
        Ok(())
    }

    /// Queue a message for the current peer
    ///
    /// On a bound rendezvous channel this is the reply to the most recently
    /// received request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Channel`] if there is no peer to send to, the peer
    /// has gone away or the encoded message exceeds `max_frame_bytes`,
    /// [`Error::Validation`] if the message does not match its schema, and
    /// [`Error::Serialization`] if it cannot be encoded
    pub fn send(&mut self, message: &Message) -> Result<()> {
        self.pump();

        let target = if self.role == ChannelRole::Rendezvous && self.state == ChannelState::Bound {
            self.reply_to.take().ok_or_else(|| {
                Error::Channel(format!("channel '{}' has no request to reply to", self.name))
            })?
        } else {
            self.current_peer
                .ok_or_else(|| Error::Channel(format!("channel '{}' has no peer", self.name)))?
        };

        let peer = self
            .peers
            .get(&target)
            .ok_or_else(|| Error::Channel(format!("peer of channel '{}' disconnected", self.name)))?;

        self.options.validator.validate_message(message)?;
        let payload = message.to_bytes()?;
        if payload.len() > self.options.max_frame_bytes {
            return Err(Error::Channel(format!(
                "{} of {} bytes exceeds the frame limit of {}",
                message.type_name(),
                payload.len(),
                self.options.max_frame_bytes
            )));
        }
        peer.outbound
            .send(payload)
            .map_err(|_| Error::Channel(format!("peer of channel '{}' disconnected", self.name)))?;

        tracing::trace!(channel = %self.name, message_type = %message.type_name(), "message queued");
        Ok(())
    }

    /// Next validated inbound message
    ///
    /// Returns `None` once the channel is closed, or when the peer of a
    /// connected channel has disconnected. Cancel-safe.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            if let Some((peer, message)) = self.backlog.pop_front() {
                if self.role == ChannelRole::Rendezvous && self.state == ChannelState::Bound {
                    self.reply_to = Some(peer);
                }
                return Some(message);
            }
            if self.state == ChannelState::Idle
                || (self.state == ChannelState::Connected && self.peers.is_empty())
            {
                return None;
            }
            let event = self.events_rx.recv().await?;
            self.apply(event);
        }
    }

    /// Apply every event that is already queued
    fn pump(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.apply(event);
        }
    }

    fn apply(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::PeerConnected(peer) => {
                tracing::debug!(channel = %self.name, peer = peer.id, "peer connected");
                self.current_peer = Some(peer.id);
                self.peers.insert(peer.id, peer);
            }
            ChannelEvent::Message(peer, message) => self.backlog.push_back((peer, message)),
            ChannelEvent::PeerClosed(id) => {
                if self.peers.remove(&id).is_some() {
                    tracing::debug!(channel = %self.name, peer = id, "peer disconnected");
                }
                if self.current_peer == Some(id) {
                    self.current_peer = self.peers.keys().max().copied();
                }
            }
        }
    }

    /// Tear down all endpoints and peers and release address claims
    ///
    /// Queued outbound frames are still flushed. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.state == ChannelState::Idle && self.peers.is_empty() && self.acceptors.is_empty() {
            return;
        }

        for acceptor in self.acceptors.drain(..) {
            acceptor.abort();
        }
        for (name, token) in self.inproc_bindings.drain(..) {
            self.options.inproc.unbind(&name, token);
        }
        for (kind, address) in self.claims.drain(..) {
            self.options.addresses.release(kind, &address);
        }
        for path in self.socket_files.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!(path = %path.display(), "removed socket file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove socket file"),
            }
        }
        self.peers.clear();
        self.backlog.clear();
        self.current_peer = None;
        self.reply_to = None;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.events_tx = events_tx;
        self.events_rx = events_rx;

        tracing::debug!(channel = %self.name, address = ?self.address.as_ref().map(ToString::to_string), "channel closed");
        self.state = ChannelState::Idle;
        self.address = None;
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(unix)]
fn spawn_ipc_acceptor(address: &ChannelAddress, ctx: PeerContext) -> Result<JoinHandle<()>> {
    let Some(path) = address.socket_path() else {
        return Err(Error::Transport(format!("{address} has no socket path")));
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| Error::Transport(format!("cannot create {}: {e}", parent.display())))?;
    }

    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "removed stale socket file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove stale socket file"),
    }

    let listener = tokio::net::UnixListener::bind(path)
        .map_err(|e| Error::Transport(format!("cannot bind {address}: {e}")))?;

    Ok(tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let peer = spawn_peer(stream, ctx.clone());
                    if ctx.events.send(ChannelEvent::PeerConnected(peer)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(channel = %ctx.channel, error = %e, "accept failed");
                }
            }
        }
    }))
}

#[cfg(not(unix))]
fn spawn_ipc_acceptor(address: &ChannelAddress, _ctx: PeerContext) -> Result<JoinHandle<()>> {
    Err(Error::Transport(format!("{address}: ipc sockets require a Unix platform")))
}

#[cfg(unix)]
fn connect_ipc(address: &ChannelAddress, ctx: PeerContext) -> Result<Peer> {
    let Some(path) = address.socket_path() else {
        return Err(Error::Transport(format!("{address} has no socket path")));
    };
    let stream = std::os::unix::net::UnixStream::connect(path)
        .map_err(|e| Error::Transport(format!("cannot connect {address}: {e}")))?;
    stream
        .set_nonblocking(true)
        .map_err(|e| Error::Transport(format!("cannot configure {address}: {e}")))?;
    let stream = tokio::net::UnixStream::from_std(stream)
        .map_err(|e| Error::Transport(format!("cannot register {address}: {e}")))?;
    Ok(spawn_peer(stream, ctx))
}

#[cfg(not(unix))]
fn connect_ipc(address: &ChannelAddress, _ctx: PeerContext) -> Result<Peer> {
    Err(Error::Transport(format!("{address}: ipc sockets require a Unix platform")))
}
