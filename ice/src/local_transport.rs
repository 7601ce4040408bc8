
use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::Instant;

use bytes::BytesMut;
use shared::error::{Error, Result};
use shared::TransportProtocol;
use stun::binding::{BindingOutcome, BindingTransaction};
use stun::transaction::TransactionPool;
use turn::client::{Client as TurnClient, ClientConfig as TurnClientConfig, Event as TurnEvent};

use crate::transport::{Datagram, TransportError, TransportEvent, PATH_DIRECT, PATH_RELAYED};
use crate::RECEIVE_MTU;

/// Sockets we bound ourselves may be rebound this many times on an
/// allocation mismatch before giving up.
const MAX_BIND_RETRIES: u32 = 3;

/// One bound UDP socket on one local address, multiplexing application
/// data, STUN Binding traffic and TURN relay traffic.
///
/// Exposes two paths: 0 sends and receives directly on the socket, 1 goes
/// through the TURN allocation when one is live. Inbound datagrams from the
/// configured servers are fed to the Binding transaction or the TURN
/// client; everything else queues on path 0.
pub struct LocalUdpTransport {
    socket: Option<UdpSocket>,
    /// Adopted sockets are never rebound and are handed back on teardown.
    external_socket: bool,
    local_addr: Option<SocketAddr>,

    stun_bind_addr: Option<SocketAddr>,
    stun_relay_addr: Option<SocketAddr>,
    relay_username: String,
    relay_password: String,
    client_software: String,

    pool: TransactionPool,
    binding: Option<BindingTransaction>,
    turn: Option<TurnClient>,
    turn_activated: bool,

    ref_addr: Option<SocketAddr>,
    ref_addr_source: Option<IpAddr>,
    rel_addr: Option<SocketAddr>,

    in_direct: VecDeque<Datagram>,
    in_relayed: VecDeque<Datagram>,
    events: VecDeque<TransportEvent>,

    retry_count: u32,
    stopping: bool,
}

impl Default for LocalUdpTransport {
    fn default() -> Self {
        LocalUdpTransport::new()
    }
}

impl LocalUdpTransport {
    pub fn new() -> Self {
        LocalUdpTransport {
            socket: None,
            external_socket: false,
            local_addr: None,
            stun_bind_addr: None,
            stun_relay_addr: None,
            relay_username: String::new(),
            relay_password: String::new(),
            client_software: String::new(),
            pool: TransactionPool::new(),
            binding: None,
            turn: None,
            turn_activated: false,
            ref_addr: None,
            ref_addr_source: None,
            rel_addr: None,
            in_direct: VecDeque::new(),
            in_relayed: VecDeque::new(),
            events: VecDeque::new(),
            retry_count: 0,
            stopping: false,
        }
    }

    /// Adopts an already-bound socket. Adopted sockets get no rebind
    /// recovery on allocation mismatch.
    pub fn start_with_socket(&mut self, socket: UdpSocket) -> Result<()> {
        if self.socket.is_some() {
            return Err(Error::Other("transport already started".to_owned()));
        }
        socket.set_nonblocking(true)?;
        self.local_addr = Some(socket.local_addr()?);
        self.socket = Some(socket);
        self.external_socket = true;
        self.events.push_back(TransportEvent::Started);
        Ok(())
    }

    /// Binds a fresh socket on a random port of `ip`.
    pub fn start(&mut self, ip: IpAddr) -> Result<()> {
        if self.socket.is_some() {
            return Err(Error::Other("transport already started".to_owned()));
        }
        match bind_random(ip) {
            Ok(socket) => {
                self.local_addr = Some(socket.local_addr()?);
                self.socket = Some(socket);
                self.external_socket = false;
                self.events.push_back(TransportEvent::Started);
                Ok(())
            }
            Err(err) => {
                log::debug!("unable to bind to random port on {ip}: {err}");
                self.events.push_back(TransportEvent::Error(TransportError::Bind));
                Err(err.into())
            }
        }
    }

    /// Configure the STUN Binding server. Only before `stun_start`.
    pub fn set_stun_bind_service(&mut self, addr: SocketAddr) {
        self.stun_bind_addr = Some(addr);
    }

    /// Configure the TURN server and credentials. Only before `stun_start`.
    pub fn set_stun_relay_service(
        &mut self,
        addr: SocketAddr,
        user: impl Into<String>,
        pass: impl Into<String>,
    ) {
        self.stun_relay_addr = Some(addr);
        self.relay_username = user.into();
        self.relay_password = pass.into();
    }

    pub fn set_client_software(&mut self, s: impl Into<String>) {
        self.client_software = s.into();
    }

    /// Kicks off reflexive discovery and the TURN allocation, whichever are
    /// configured.
    pub fn stun_start(&mut self, now: Instant) {
        if let Some(addr) = self.stun_bind_addr {
            let mut binding = BindingTransaction::new();
            if !self.client_software.is_empty() {
                binding.set_software(self.client_software.clone());
            }
            if let Err(err) = binding.start(&mut self.pool, addr, now) {
                log::warn!("binding start: {err}");
                self.events.push_back(TransportEvent::Error(TransportError::Stun));
            } else {
                self.binding = Some(binding);
            }
        }

        if self.stun_relay_addr.is_some() {
            self.start_turn(now);
        }

        self.flush_transmits();
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn server_reflexive_addr(&self) -> Option<SocketAddr> {
        self.ref_addr
    }

    /// Which server reported the reflexive address.
    pub fn reflexive_addr_source(&self) -> Option<IpAddr> {
        self.ref_addr_source
    }

    pub fn relayed_addr(&self) -> Option<SocketAddr> {
        self.rel_addr
    }

    pub fn stun_bind_service_addr(&self) -> Option<SocketAddr> {
        self.stun_bind_addr
    }

    pub fn stun_relay_service_addr(&self) -> Option<SocketAddr> {
        self.stun_relay_addr
    }

    /// Whether the Binding transaction is still in flight.
    pub fn is_stun_alive(&self) -> bool {
        self.binding.is_some()
    }

    /// Whether the TURN side is still allocating or serving.
    pub fn is_turn_alive(&self) -> bool {
        self.turn.as_ref().is_some_and(|t| t.is_alive())
    }

    /// Installs a TURN channel for `peer` so path-1 sends use the 4-byte
    /// ChannelData framing instead of Send indications.
    pub fn add_channel_peer(&mut self, peer: SocketAddr, now: Instant) -> Result<()> {
        let turn = self.turn.as_mut().ok_or(Error::ErrRelayNotActive)?;
        turn.add_channel_peer(peer, now)?;
        self.flush_transmits();
        Ok(())
    }

    pub fn has_pending_datagrams(&self, path: usize) -> bool {
        match path {
            PATH_DIRECT => !self.in_direct.is_empty(),
            PATH_RELAYED => !self.in_relayed.is_empty(),
            _ => false,
        }
    }

    pub fn read_datagram(&mut self, path: usize) -> Option<Datagram> {
        match path {
            PATH_DIRECT => self.in_direct.pop_front(),
            PATH_RELAYED => self.in_relayed.pop_front(),
            _ => None,
        }
    }

    pub fn write_datagram(
        &mut self,
        path: usize,
        buf: &[u8],
        peer: SocketAddr,
        now: Instant,
    ) -> Result<()> {
        match path {
            PATH_DIRECT => {
                let socket = self.socket.as_ref().ok_or(Error::ErrTransportNotStarted)?;
                match socket.send_to(buf, peer) {
                    Ok(_) => Ok(()),
                    // Datagram semantics: a full send buffer drops.
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(()),
                    Err(err) => Err(err.into()),
                }
            }
            PATH_RELAYED => {
                if !self.turn_activated {
                    return Err(Error::ErrRelayNotActive);
                }
                let turn = self.turn.as_mut().ok_or(Error::ErrRelayNotActive)?;
                turn.send_to(buf, peer, now)?;
                self.flush_transmits();
                Ok(())
            }
            _ => Err(Error::ErrInvalidPath),
        }
    }

    /// Drains the socket, classifying each datagram as STUN/TURN traffic
    /// from the configured servers or application data on path 0.
    pub fn read(&mut self, now: Instant) {
        let mut packets = vec![];
        if let Some(socket) = self.socket.as_ref() {
            let mut buf = [0u8; RECEIVE_MTU];
            loop {
                match socket.recv_from(&mut buf) {
                    Ok((n, from)) => packets.push((from, buf[..n].to_vec())),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) => {
                        log::warn!("socket recv: {err}");
                        break;
                    }
                }
            }
        }

        for (from, data) in packets {
            if Some(from) == self.stun_bind_addr || Some(from) == self.stun_relay_addr {
                self.process_incoming_stun(&data, from, now);
            } else {
                self.in_direct.push_back(Datagram {
                    addr: from,
                    buf: BytesMut::from(&data[..]),
                });
            }
        }

        self.flush_transmits();
    }

    pub fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        let mut eto = self.pool.poll_timeout();
        if let Some(t) = self.turn.as_ref().and_then(|t| t.poll_timeout()) {
            if eto.map_or(true, |e| t < e) {
                eto = Some(t);
            }
        }
        eto
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        self.pool.handle_timeout(now);
        self.process_pool_events();
        if let Some(turn) = self.turn.as_mut() {
            turn.handle_timeout(now);
        }
        self.process_turn_events(now);
        self.flush_transmits();
    }

    /// Tears the transport down. A live allocation is released with a
    /// zero-lifetime Refresh, best effort.
    pub fn stop(&mut self, now: Instant) {
        if self.stopping {
            log::debug!("local transport {:?} is already stopping", self.local_addr);
            return;
        }
        self.stopping = true;

        if let Some(turn) = self.turn.as_mut() {
            turn.close(now);
        }
        self.flush_transmits();
        self.turn = None;
        self.turn_activated = false;
        self.binding = None;
        self.pool.clear();

        self.events.push_back(TransportEvent::Stopped);
    }

    /// Releases the socket, e.g. for returning a borrowed one to the port
    /// reserver.
    pub fn take_socket(&mut self) -> Option<UdpSocket> {
        self.socket.take()
    }

    fn process_incoming_stun(&mut self, buf: &[u8], from: SocketAddr, now: Instant) {
        match self.pool.handle_read(buf, from) {
            Ok(true) => {
                self.process_pool_events();
                return;
            }
            Ok(false) => {}
            Err(err) => {
                log::trace!("discarding packet from {from}: {err}");
                return;
            }
        }

        let consumed = match self.turn.as_mut() {
            Some(turn) => match turn.handle_read(buf, from, now) {
                Ok(consumed) => consumed,
                Err(err) => {
                    log::trace!("discarding packet from {from}: {err}");
                    return;
                }
            },
            None => false,
        };

        if consumed {
            self.process_turn_events(now);
        } else {
            log::debug!("server sent something that is neither STUN nor data, skipping");
        }
    }

    fn process_pool_events(&mut self) {
        while let Some(ev) = self.pool.poll_event() {
            let outcome = self.binding.as_mut().and_then(|b| b.handle_event(&ev));
            let Some(outcome) = outcome else { continue };
            self.binding = None;

            match outcome {
                BindingOutcome::Success(addr) => {
                    self.ref_addr = Some(addr);
                    self.ref_addr_source = self.stun_bind_addr.map(|a| a.ip());
                    self.events.push_back(TransportEvent::AddressesChanged);
                }
                BindingOutcome::Failed(err) => {
                    log::debug!("binding failed: {err:?}");
                    self.events.push_back(TransportEvent::Error(TransportError::Stun));
                }
            }
        }
    }

    fn process_turn_events(&mut self, now: Instant) {
        let mut turn_events = vec![];
        if let Some(turn) = self.turn.as_mut() {
            while let Some(ev) = turn.poll_event() {
                turn_events.push(ev);
            }
        }

        for ev in turn_events {
            match ev {
                TurnEvent::Allocated {
                    relayed, mapped, ..
                } => {
                    // The allocate-derived reflexive address only counts
                    // when no separate STUN server is in play.
                    if self.stun_bind_addr.is_none() || self.stun_bind_addr == self.stun_relay_addr
                    {
                        if let Some(mapped) = mapped {
                            self.ref_addr = Some(mapped);
                            self.ref_addr_source = self.stun_relay_addr.map(|a| a.ip());
                        }
                    }
                    self.rel_addr = Some(relayed);
                    self.turn_activated = true;
                    self.events.push_back(TransportEvent::AddressesChanged);
                }
                TurnEvent::AllocateFailed { mismatch } => {
                    let was_activated = self.turn_activated;
                    self.turn = None;
                    self.turn_activated = false;

                    if mismatch && !self.external_socket && self.handle_retry(now) {
                        continue;
                    }
                    // An already-activated relay dying is not an error the
                    // gathering cares about; the other paths keep working.
                    if was_activated {
                        continue;
                    }
                    self.events.push_back(TransportEvent::Error(TransportError::Turn));
                }
                TurnEvent::Data { peer, data } => {
                    self.in_relayed.push_back(Datagram {
                        addr: peer,
                        buf: data,
                    });
                }
                TurnEvent::ChannelBound { peer, number } => {
                    log::debug!("channel {number} bound to {peer}");
                }
            }
        }
    }

    /// Allocation mismatch recovery: rebind on a fresh random port and
    /// restart TURN. Returns true when a retry is underway (or a bind error
    /// was already signalled), false when the caller should error out.
    fn handle_retry(&mut self, now: Instant) -> bool {
        if self.turn_activated || self.stopping {
            return false;
        }

        self.retry_count += 1;
        if self.retry_count >= MAX_BIND_RETRIES {
            return false;
        }
        log::debug!("allocation mismatch, retrying on a fresh port");

        let Some(ip) = self.local_addr.map(|a| a.ip()) else {
            return false;
        };
        let socket = match bind_random(ip) {
            Ok(socket) => socket,
            Err(err) => {
                log::debug!("rebind failed: {err}");
                self.events.push_back(TransportEvent::Error(TransportError::Bind));
                return true;
            }
        };
        match socket.local_addr() {
            Ok(addr) => self.local_addr = Some(addr),
            Err(err) => {
                log::debug!("rebind failed: {err}");
                self.events.push_back(TransportEvent::Error(TransportError::Bind));
                return true;
            }
        }
        self.socket = Some(socket);

        self.ref_addr = None;
        self.ref_addr_source = None;
        self.rel_addr = None;

        self.start_turn(now);
        self.flush_transmits();

        // The local address changed and the reflexive one is gone.
        self.events.push_back(TransportEvent::AddressesChanged);
        true
    }

    fn start_turn(&mut self, now: Instant) {
        let Some(relay) = self.stun_relay_addr else {
            return;
        };
        let mut client = TurnClient::new(TurnClientConfig {
            server_addr: relay,
            protocol: TransportProtocol::Udp,
            username: self.relay_username.clone(),
            password: self.relay_password.clone(),
            realm: String::new(),
            software: self.client_software.clone(),
        });
        if let Err(err) = client.allocate(now) {
            log::warn!("allocate: {err}");
        }
        self.turn = Some(client);
    }

    fn flush_transmits(&mut self) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        while let Some(t) = self.pool.poll_transmit() {
            if let Err(err) = socket.send_to(&t.payload, t.remote) {
                log::trace!("send to {}: {err}", t.remote);
            }
        }
        if let Some(turn) = self.turn.as_mut() {
            while let Some(t) = turn.poll_transmit() {
                if let Err(err) = socket.send_to(&t.payload, t.remote) {
                    log::trace!("send to {}: {err}", t.remote);
                }
            }
        }
    }
}

fn bind_random(ip: IpAddr) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind((ip, 0))?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}
