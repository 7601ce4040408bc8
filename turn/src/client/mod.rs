#[cfg(test)]
mod client_test;

pub(crate) mod permission;

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use shared::error::{Error, Result};
use shared::TransportProtocol;

use stun::attributes::ATTR_NONCE;
use stun::error_code::{ErrorCodeAttribute, CODE_ALLOCATION_MISMATCH, CODE_STALE_NONCE, CODE_UNAUTHORIZED};
use stun::fingerprint::FINGERPRINT;
use stun::integrity::MessageIntegrity;
use stun::message::{
    Getter, Message, MessageType, Setter, TransactionId, CLASS_ERROR_RESPONSE, CLASS_INDICATION,
    CLASS_REQUEST, CLASS_SUCCESS_RESPONSE, METHOD_ALLOCATE, METHOD_CHANNEL_BIND,
    METHOD_CREATE_PERMISSION, METHOD_DATA, METHOD_REFRESH, METHOD_SEND,
};
use stun::textattrs::{self, TextAttribute};
use stun::transaction::{TransactionEvent, TransactionPool, TransactionResult, Transmit};

use crate::proto::chandata::ChannelData;
use crate::proto::channum::{ChannelNumber, MAX_CHANNEL_NUMBER, MIN_CHANNEL_NUMBER};
use crate::proto::data::Data;
use crate::proto::lifetime::{Lifetime, DEFAULT_LIFETIME};
use crate::proto::peeraddr::PeerAddress;
use crate::proto::relayaddr::RelayedAddress;
use crate::proto::reqtrans::RequestedTransport;
use crate::proto::chandata::CHANNEL_DATA_HEADER_SIZE;

use permission::{PermState, Permission, PermissionMap};

const PERM_REFRESH_INTERVAL: Duration = Duration::from_secs(120);
/// Datagrams queued per peer while its permission round-trips.
const MAX_PENDING_PER_PEER: usize = 64;
const MAX_STALE_NONCE_RETRIES: u16 = 3;

/// Configuration for a TURN [Client].
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    pub protocol: TransportProtocol,
    pub username: String,
    pub password: String,
    pub realm: String,
    pub software: String,
}

/// Events surfaced by the client.
#[derive(Debug, PartialEq, Eq)]
pub enum Event {
    /// The allocation is live. `mapped` is the reflexive address the server
    /// saw, when it sent one.
    Allocated {
        relayed: SocketAddr,
        mapped: Option<SocketAddr>,
        lifetime: Duration,
    },
    /// The allocation could not be established. `mismatch` marks error 437,
    /// which a caller with a private socket recovers from by rebinding.
    AllocateFailed { mismatch: bool },
    /// Application data relayed from a peer, via Data indication or
    /// ChannelData.
    Data { peer: SocketAddr, data: BytesMut },
    /// A channel bind completed; sends to the peer now use ChannelData.
    ChannelBound {
        peer: SocketAddr,
        number: ChannelNumber,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum AllocState {
    Idle,
    Probing,
    Authenticating,
    Active,
    Failed,
    Closed,
}

#[derive(Debug, Clone)]
enum TransactionKind {
    /// The unauthenticated first Allocate, expected to draw a 401.
    AllocateProbe,
    Allocate {
        retries: u16,
    },
    Refresh {
        lifetime: Duration,
        retries: u16,
    },
    CreatePermission {
        peers: Vec<SocketAddr>,
        retries: u16,
    },
    ChannelBind {
        peer: SocketAddr,
        number: u16,
        retries: u16,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum BindState {
    Requested,
    Ready,
}

#[derive(Debug, Copy, Clone)]
struct ChannelBinding {
    number: u16,
    state: BindState,
}

/// Sans-IO TURN allocation client: drives Allocate, Refresh,
/// CreatePermission and ChannelBind against one server and frames relayed
/// application data. The owner moves datagrams between the socket and
/// `handle_read` / `poll_transmit`, and drives time through `poll_timeout`
/// / `handle_timeout`.
pub struct Client {
    server_addr: SocketAddr,
    protocol: TransportProtocol,
    username: String,
    password: String,
    realm: String,
    nonce: String,
    software: String,
    integrity: Option<MessageIntegrity>,

    state: AllocState,
    relayed_addr: Option<SocketAddr>,
    mapped_addr: Option<SocketAddr>,
    lifetime: Duration,
    refresh_alloc_at: Option<Instant>,
    refresh_perms_at: Option<Instant>,

    pool: TransactionPool,
    kinds: HashMap<TransactionId, TransactionKind>,
    perms: PermissionMap,
    pending_sends: HashMap<SocketAddr, VecDeque<Vec<u8>>>,
    channels: HashMap<SocketAddr, ChannelBinding>,
    numbers: HashMap<u16, SocketAddr>,
    next_number: u16,

    transmits: VecDeque<Transmit>,
    events: VecDeque<Event>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Client {
            server_addr: config.server_addr,
            protocol: config.protocol,
            username: config.username,
            password: config.password,
            realm: config.realm,
            nonce: String::new(),
            software: config.software,
            integrity: None,

            state: AllocState::Idle,
            relayed_addr: None,
            mapped_addr: None,
            lifetime: DEFAULT_LIFETIME,
            refresh_alloc_at: None,
            refresh_perms_at: None,

            pool: TransactionPool::new(),
            kinds: HashMap::new(),
            perms: PermissionMap::new(),
            pending_sends: HashMap::new(),
            channels: HashMap::new(),
            numbers: HashMap::new(),
            next_number: MIN_CHANNEL_NUMBER,

            transmits: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn relayed_addr(&self) -> Option<SocketAddr> {
        self.relayed_addr
    }

    pub fn mapped_addr(&self) -> Option<SocketAddr> {
        self.mapped_addr
    }

    pub fn is_active(&self) -> bool {
        self.state == AllocState::Active
    }

    /// Whether the allocation is still being established or serving.
    pub fn is_alive(&self) -> bool {
        !matches!(self.state, AllocState::Failed | AllocState::Closed)
    }

    /// Kicks off the allocation: an unauthenticated Allocate that the
    /// server answers with 401 plus the realm/nonce to authenticate with.
    pub fn allocate(&mut self, now: Instant) -> Result<()> {
        if self.state != AllocState::Idle {
            return Err(Error::ErrAllocationExists);
        }
        self.state = AllocState::Probing;

        let msg = self.build_allocate(false)?;
        self.perform(msg, TransactionKind::AllocateProbe, now)
    }

    /// Releases the allocation with a zero-lifetime Refresh (best effort,
    /// fire and forget) and drops all client state.
    pub fn close(&mut self, now: Instant) {
        if self.state == AllocState::Active {
            if let Ok(msg) = self.build_refresh(Duration::ZERO) {
                self.transmits.push_back(Transmit {
                    now,
                    remote: self.server_addr,
                    payload: BytesMut::from(&msg.raw[..]),
                });
            }
        }

        self.state = AllocState::Closed;
        self.relayed_addr = None;
        self.mapped_addr = None;
        self.refresh_alloc_at = None;
        self.refresh_perms_at = None;
        self.pool.clear();
        self.kinds.clear();
        self.perms.clear();
        self.pending_sends.clear();
        self.channels.clear();
        self.numbers.clear();
    }

    /// Sends application data to `peer` through the relay: ChannelData when
    /// a channel is bound, a Send indication when only a permission is in
    /// place, and a bounded per-peer queue while the permission round-trips.
    pub fn send_to(&mut self, data: &[u8], peer: SocketAddr, now: Instant) -> Result<()> {
        if self.state != AllocState::Active {
            return Err(Error::ErrNoAllocation);
        }

        if let Some(binding) = self.channels.get(&peer) {
            if binding.state == BindState::Ready {
                return self.send_channel_data(data, binding.number, now);
            }
        }

        match self.perms.get(&peer).map(|p| p.state()) {
            Some(PermState::Permitted) => self.send_indication(data, peer, now),
            _ => {
                self.ensure_permission(peer, now)?;
                let queue = self.pending_sends.entry(peer).or_default();
                if queue.len() >= MAX_PENDING_PER_PEER {
                    queue.pop_front();
                    log::warn!("pending queue for {peer} full, dropping oldest datagram");
                }
                queue.push_back(data.to_vec());
                Ok(())
            }
        }
    }

    /// Binds a TURN channel to `peer`. The bind installs a permission as a
    /// side effect; once the server confirms, sends switch to the 4-byte
    /// ChannelData framing.
    pub fn add_channel_peer(&mut self, peer: SocketAddr, now: Instant) -> Result<()> {
        if self.state != AllocState::Active {
            return Err(Error::ErrNoAllocation);
        }
        if self.channels.contains_key(&peer) {
            return Ok(());
        }

        if self.next_number > MAX_CHANNEL_NUMBER {
            return Err(Error::ErrChannelNumbersExhausted);
        }
        let number = self.next_number;
        self.next_number += 1;

        self.channels.insert(
            peer,
            ChannelBinding {
                number,
                state: BindState::Requested,
            },
        );
        self.numbers.insert(number, peer);

        let msg = self.build_channel_bind(peer, number)?;
        self.perform(
            msg,
            TransactionKind::ChannelBind {
                peer,
                number,
                retries: 0,
            },
            now,
        )
    }

    /// Offers an incoming packet to the client. Consumes STUN traffic for
    /// its transactions, Data indications and ChannelData; returns false
    /// for anything that is not TURN traffic from the server.
    pub fn handle_read(&mut self, buf: &[u8], from: SocketAddr, now: Instant) -> Result<bool> {
        if from != self.server_addr {
            return Ok(false);
        }

        if ChannelData::is_channel_data(buf) {
            let mut ch_data = ChannelData {
                raw: buf.to_vec(),
                ..Default::default()
            };
            ch_data.decode()?;
            match self.numbers.get(&ch_data.number.0) {
                Some(peer) => {
                    self.events.push_back(Event::Data {
                        peer: *peer,
                        data: BytesMut::from(&ch_data.data[..]),
                    });
                }
                None => {
                    log::debug!("ChannelData for unbound channel {}", ch_data.number);
                }
            }
            return Ok(true);
        }

        if !stun::is_message(buf) {
            // Not STUN, not ChannelData; from the server that is noise.
            log::trace!("ignoring non-STUN packet from relay server");
            return Ok(true);
        }

        if self.pool.handle_read(buf, from)? {
            while let Some(ev) = self.pool.poll_event() {
                self.process_transaction_event(ev, now);
            }
            return Ok(true);
        }

        let mut msg = Message::new();
        msg.raw = buf.to_vec();
        msg.decode()?;

        if msg.typ.class == CLASS_INDICATION && msg.typ.method == METHOD_DATA {
            let mut peer_addr = PeerAddress::default();
            peer_addr.get_from(&msg)?;
            let mut data = Data::default();
            data.get_from(&msg)?;
            self.events.push_back(Event::Data {
                peer: SocketAddr::new(peer_addr.ip, peer_addr.port),
                data: BytesMut::from(&data.0[..]),
            });
        } else if msg.typ.class == CLASS_REQUEST {
            log::debug!("unexpected STUN request from relay server: {msg}");
        } else {
            log::debug!("ignoring unmatched STUN message from relay server: {msg}");
        }

        Ok(true)
    }

    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        while let Some(t) = self.pool.poll_transmit() {
            self.transmits.push_back(t);
        }
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        let mut eto = self.pool.poll_timeout();
        for t in [self.refresh_alloc_at, self.refresh_perms_at].into_iter().flatten() {
            if eto.map_or(true, |e| t < e) {
                eto = Some(t);
            }
        }
        eto
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        self.pool.handle_timeout(now);
        while let Some(ev) = self.pool.poll_event() {
            self.process_transaction_event(ev, now);
        }

        if self.state != AllocState::Active {
            return;
        }

        if self.refresh_alloc_at.is_some_and(|t| t <= now) {
            self.refresh_alloc_at = Some(now + self.lifetime / 2);
            let lifetime = self.lifetime;
            if let Err(err) = self.send_refresh(lifetime, 0, now) {
                log::warn!("refresh allocation: {err}");
            }
        }

        if self.refresh_perms_at.is_some_and(|t| t <= now) {
            self.refresh_perms_at = Some(now + PERM_REFRESH_INTERVAL);
            let addrs = self.perms.addrs();
            if !addrs.is_empty() {
                if let Err(err) = self.send_create_permission(addrs, 0, now) {
                    log::warn!("refresh permissions: {err}");
                }
            }
        }
    }

    fn process_transaction_event(&mut self, ev: TransactionEvent, now: Instant) {
        let Some(kind) = self.kinds.remove(&ev.id) else {
            return;
        };

        match kind {
            TransactionKind::AllocateProbe => match ev.result {
                TransactionResult::Timeout => self.fail_allocate(false),
                TransactionResult::Response(msg) => {
                    if msg.typ.class == CLASS_SUCCESS_RESPONSE {
                        // Server without auth; unusual but legal.
                        self.finish_allocate(&msg, now);
                    } else {
                        self.handle_probe_rejection(&msg, now);
                    }
                }
            },
            TransactionKind::Allocate { retries } => match ev.result {
                TransactionResult::Timeout => self.fail_allocate(false),
                TransactionResult::Response(msg) => {
                    if msg.typ.class == CLASS_SUCCESS_RESPONSE {
                        self.finish_allocate(&msg, now);
                    } else {
                        match self.error_code(&msg) {
                            Some(CODE_STALE_NONCE) if retries < MAX_STALE_NONCE_RETRIES => {
                                if self.update_nonce(&msg) {
                                    if let Err(err) = self.send_allocate(retries + 1, now) {
                                        log::warn!("allocate retry: {err}");
                                        self.fail_allocate(false);
                                    }
                                } else {
                                    self.fail_allocate(false);
                                }
                            }
                            code => self.fail_allocate(code == Some(CODE_ALLOCATION_MISMATCH)),
                        }
                    }
                }
            },
            TransactionKind::Refresh { lifetime, retries } => match ev.result {
                TransactionResult::Timeout => {
                    // The relay may have died on us; keep serving the paths
                    // that still work.
                    log::warn!("allocation refresh timed out");
                }
                TransactionResult::Response(msg) => {
                    if msg.typ.class == CLASS_SUCCESS_RESPONSE {
                        let mut granted = Lifetime::default();
                        if granted.get_from(&msg).is_ok() {
                            self.lifetime = granted.0;
                        }
                    } else if self.error_code(&msg) == Some(CODE_STALE_NONCE)
                        && retries < MAX_STALE_NONCE_RETRIES
                        && self.update_nonce(&msg)
                    {
                        if let Err(err) = self.send_refresh(lifetime, retries + 1, now) {
                            log::warn!("refresh retry: {err}");
                        }
                    } else {
                        log::warn!("allocation refresh rejected: {msg}");
                    }
                }
            },
            TransactionKind::CreatePermission { peers, retries } => match ev.result {
                TransactionResult::Response(msg) if msg.typ.class == CLASS_SUCCESS_RESPONSE => {
                    for peer in &peers {
                        if let Some(perm) = self.perms.get_mut(peer) {
                            perm.set_state(PermState::Permitted);
                        }
                    }
                    for peer in peers {
                        self.flush_pending(peer, now);
                    }
                }
                TransactionResult::Response(msg)
                    if self.error_code(&msg) == Some(CODE_STALE_NONCE)
                        && retries < MAX_STALE_NONCE_RETRIES
                        && self.update_nonce(&msg) =>
                {
                    if let Err(err) = self.send_create_permission(peers, retries + 1, now) {
                        log::warn!("create permission retry: {err}");
                    }
                }
                _ => {
                    log::warn!("create permission failed for {peers:?}");
                    for peer in peers {
                        self.perms.delete(&peer);
                        self.pending_sends.remove(&peer);
                    }
                }
            },
            TransactionKind::ChannelBind {
                peer,
                number,
                retries,
            } => match ev.result {
                TransactionResult::Response(msg) if msg.typ.class == CLASS_SUCCESS_RESPONSE => {
                    if let Some(binding) = self.channels.get_mut(&peer) {
                        binding.state = BindState::Ready;
                    }
                    // A channel bind installs a permission for the peer too.
                    let mut perm = Permission::default();
                    perm.set_state(PermState::Permitted);
                    self.perms.insert(peer, perm);

                    self.events.push_back(Event::ChannelBound {
                        peer,
                        number: ChannelNumber(number),
                    });
                    self.flush_pending(peer, now);
                }
                TransactionResult::Response(msg)
                    if self.error_code(&msg) == Some(CODE_STALE_NONCE)
                        && retries < MAX_STALE_NONCE_RETRIES
                        && self.update_nonce(&msg) =>
                {
                    match self.build_channel_bind(peer, number) {
                        Ok(out) => {
                            if let Err(err) = self.perform(
                                out,
                                TransactionKind::ChannelBind {
                                    peer,
                                    number,
                                    retries: retries + 1,
                                },
                                now,
                            ) {
                                log::warn!("channel bind retry: {err}");
                            }
                        }
                        Err(err) => log::warn!("channel bind retry: {err}"),
                    }
                }
                _ => {
                    log::warn!("channel bind to {peer} failed, falling back to indications");
                    self.channels.remove(&peer);
                    self.numbers.remove(&number);
                }
            },
        }
    }

    fn handle_probe_rejection(&mut self, msg: &Message, now: Instant) {
        match self.error_code(msg) {
            Some(CODE_UNAUTHORIZED) => {
                if let Ok(realm) = TextAttribute::get_from_as(msg, stun::attributes::ATTR_REALM) {
                    self.realm = realm.text;
                }
                if !self.update_nonce(msg) {
                    self.fail_allocate(false);
                    return;
                }
                self.integrity = Some(MessageIntegrity::new_long_term_integrity(
                    self.username.clone(),
                    self.realm.clone(),
                    self.password.clone(),
                ));
                self.state = AllocState::Authenticating;
                if let Err(err) = self.send_allocate(0, now) {
                    log::warn!("authenticated allocate: {err}");
                    self.fail_allocate(false);
                }
            }
            code => self.fail_allocate(code == Some(CODE_ALLOCATION_MISMATCH)),
        }
    }

    fn finish_allocate(&mut self, msg: &Message, now: Instant) {
        let mut relayed = RelayedAddress::default();
        if relayed.get_from(msg).is_err() {
            log::warn!("allocate success without XOR-RELAYED-ADDRESS");
            self.fail_allocate(false);
            return;
        }

        let mut mapped = stun::xoraddr::XorMappedAddress::default();
        self.mapped_addr = mapped
            .get_from(msg)
            .ok()
            .map(|_| SocketAddr::new(mapped.ip, mapped.port));

        let mut lifetime = Lifetime(DEFAULT_LIFETIME);
        let _ = lifetime.get_from(msg);
        self.lifetime = lifetime.0;

        let relayed = SocketAddr::new(relayed.ip, relayed.port);
        self.relayed_addr = Some(relayed);
        self.state = AllocState::Active;
        self.refresh_alloc_at = Some(now + self.lifetime / 2);
        self.refresh_perms_at = Some(now + PERM_REFRESH_INTERVAL);

        log::debug!(
            "allocation live: relayed {relayed}, lifetime {}s",
            self.lifetime.as_secs()
        );
        self.events.push_back(Event::Allocated {
            relayed,
            mapped: self.mapped_addr,
            lifetime: self.lifetime,
        });
    }

    fn fail_allocate(&mut self, mismatch: bool) {
        self.state = AllocState::Failed;
        self.events.push_back(Event::AllocateFailed { mismatch });
    }

    fn ensure_permission(&mut self, peer: SocketAddr, now: Instant) -> Result<()> {
        let state = self.perms.get(&peer).map(|p| p.state());
        if state.is_none() || state == Some(PermState::Idle) {
            let mut perm = Permission::default();
            perm.set_state(PermState::Requested);
            self.perms.insert(peer, perm);
            self.send_create_permission(vec![peer], 0, now)?;
        }
        Ok(())
    }

    fn flush_pending(&mut self, peer: SocketAddr, now: Instant) {
        let Some(queue) = self.pending_sends.remove(&peer) else {
            return;
        };
        for data in queue {
            if let Err(err) = self.send_to(&data, peer, now) {
                log::warn!("flushing queued datagram to {peer}: {err}");
            }
        }
    }

    fn send_channel_data(&mut self, data: &[u8], number: u16, now: Instant) -> Result<()> {
        let mut ch_data = ChannelData {
            number: ChannelNumber(number),
            data: data.to_vec(),
            raw: Vec::with_capacity(CHANNEL_DATA_HEADER_SIZE + data.len()),
        };
        if self.protocol == TransportProtocol::Tcp {
            ch_data.encode_padded()?;
        } else {
            ch_data.encode()?;
        }
        self.transmits.push_back(Transmit {
            now,
            remote: self.server_addr,
            payload: BytesMut::from(&ch_data.raw[..]),
        });
        Ok(())
    }

    fn send_indication(&mut self, data: &[u8], peer: SocketAddr, now: Instant) -> Result<()> {
        let mut msg = Message::new();
        msg.build(&[
            Box::new(TransactionId::new()),
            Box::new(MessageType::new(METHOD_SEND, CLASS_INDICATION)),
            Box::new(PeerAddress::from(peer)),
            Box::new(Data(data.to_vec())),
            Box::new(FINGERPRINT),
        ])?;
        self.transmits.push_back(Transmit {
            now,
            remote: self.server_addr,
            payload: BytesMut::from(&msg.raw[..]),
        });
        Ok(())
    }

    fn send_allocate(&mut self, retries: u16, now: Instant) -> Result<()> {
        let msg = self.build_allocate(true)?;
        self.perform(msg, TransactionKind::Allocate { retries }, now)
    }

    fn send_refresh(&mut self, lifetime: Duration, retries: u16, now: Instant) -> Result<()> {
        let msg = self.build_refresh(lifetime)?;
        self.perform(msg, TransactionKind::Refresh { lifetime, retries }, now)
    }

    fn send_create_permission(
        &mut self,
        peers: Vec<SocketAddr>,
        retries: u16,
        now: Instant,
    ) -> Result<()> {
        let msg = self.build_create_permission(&peers)?;
        self.perform(msg, TransactionKind::CreatePermission { peers, retries }, now)
    }

    fn perform(&mut self, msg: Message, kind: TransactionKind, now: Instant) -> Result<()> {
        let id = msg.transaction_id;
        let raw = BytesMut::from(&msg.raw[..]);
        if self.protocol == TransportProtocol::Tcp {
            self.pool.start_reliable(id, raw, self.server_addr, now)?;
        } else {
            self.pool.start(id, raw, self.server_addr, now)?;
        }
        self.kinds.insert(id, kind);
        Ok(())
    }

    fn build_allocate(&self, authenticated: bool) -> Result<Message> {
        let mut setters: Vec<Box<dyn Setter>> = vec![
            Box::new(TransactionId::new()),
            Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_REQUEST)),
            Box::new(RequestedTransport::default()),
        ];
        if !self.software.is_empty() {
            setters.push(Box::new(textattrs::software(self.software.clone())));
        }
        if authenticated {
            self.push_auth(&mut setters)?;
        }
        setters.push(Box::new(FINGERPRINT));

        let mut msg = Message::new();
        msg.build(&setters)?;
        Ok(msg)
    }

    fn build_refresh(&self, lifetime: Duration) -> Result<Message> {
        let mut setters: Vec<Box<dyn Setter>> = vec![
            Box::new(TransactionId::new()),
            Box::new(MessageType::new(METHOD_REFRESH, CLASS_REQUEST)),
            Box::new(Lifetime(lifetime)),
        ];
        self.push_auth(&mut setters)?;
        setters.push(Box::new(FINGERPRINT));

        let mut msg = Message::new();
        msg.build(&setters)?;
        Ok(msg)
    }

    fn build_create_permission(&self, peers: &[SocketAddr]) -> Result<Message> {
        let mut setters: Vec<Box<dyn Setter>> = vec![
            Box::new(TransactionId::new()),
            Box::new(MessageType::new(METHOD_CREATE_PERMISSION, CLASS_REQUEST)),
        ];
        for peer in peers {
            setters.push(Box::new(PeerAddress::from(*peer)));
        }
        self.push_auth(&mut setters)?;
        setters.push(Box::new(FINGERPRINT));

        let mut msg = Message::new();
        msg.build(&setters)?;
        Ok(msg)
    }

    fn build_channel_bind(&self, peer: SocketAddr, number: u16) -> Result<Message> {
        let mut setters: Vec<Box<dyn Setter>> = vec![
            Box::new(TransactionId::new()),
            Box::new(MessageType::new(METHOD_CHANNEL_BIND, CLASS_REQUEST)),
            Box::new(ChannelNumber(number)),
            Box::new(PeerAddress::from(peer)),
        ];
        self.push_auth(&mut setters)?;
        setters.push(Box::new(FINGERPRINT));

        let mut msg = Message::new();
        msg.build(&setters)?;
        Ok(msg)
    }

    fn push_auth(&self, setters: &mut Vec<Box<dyn Setter>>) -> Result<()> {
        let integrity = self
            .integrity
            .clone()
            .ok_or(Error::ErrNoAllocation)?;
        setters.push(Box::new(textattrs::username(self.username.clone())));
        setters.push(Box::new(textattrs::realm(self.realm.clone())));
        setters.push(Box::new(textattrs::nonce(self.nonce.clone())));
        setters.push(Box::new(integrity));
        Ok(())
    }

    fn error_code(&self, msg: &Message) -> Option<u16> {
        if msg.typ.class != CLASS_ERROR_RESPONSE {
            return None;
        }
        let mut code = ErrorCodeAttribute::default();
        code.get_from(msg).ok().map(|_| code.code)
    }

    fn update_nonce(&mut self, msg: &Message) -> bool {
        match TextAttribute::get_from_as(msg, ATTR_NONCE) {
            Ok(n) => {
                self.nonce = n.text;
                true
            }
            Err(_) => {
                log::warn!("error response without NONCE");
                false
            }
        }
    }
}
