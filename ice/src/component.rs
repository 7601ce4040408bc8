
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::Instant;

use shared::error::{Error, Result};
use shared::TransportProtocol;

use crate::candidate::{
    addr_eq, default_priority, foundation, strip_zone, unspecified_addr, Candidate, CandidateInfo,
    CandidateType, ExternalAddress, LocalAddress, TransportRef,
};
use crate::local_transport::LocalUdpTransport;
use crate::tcp_turn_transport::TcpTurnTransport;
use crate::transport::{Datagram, TransportError, TransportEvent, PATH_DIRECT, PATH_RELAYED};

/// Events the component queues for the surrounding agent.
#[derive(Debug)]
pub enum Event {
    CandidateAdded(Candidate),
    CandidateRemoved(Candidate),
    /// Every local transport has started (or none exist).
    LocalFinished,
    /// No further host/srflx/relayed candidates will be emitted.
    GatheringComplete,
    /// Teardown finished; all children acknowledged.
    Stopped,
    /// Nothing left to gather with; follows with `Stopped`.
    Error(Error),
    /// A socket borrowed from the port reserver is handed back.
    ReturnSocket(UdpSocket),
    DebugLine(String),
}

#[derive(Debug, Default, Clone)]
struct Config {
    local_addrs: Vec<LocalAddress>,
    ext_addrs: Vec<ExternalAddress>,
    stun_bind_addr: Option<SocketAddr>,
    stun_relay_udp_addr: Option<SocketAddr>,
    stun_relay_udp_user: String,
    stun_relay_udp_pass: String,
    stun_relay_tcp_addr: Option<SocketAddr>,
    stun_relay_tcp_user: String,
    stun_relay_tcp_pass: String,
}

/// Book-keeping for one local UDP transport. The slot index is the
/// transport handle; handles are never reused, a destroyed transport
/// leaves a tombstone.
struct TransportSlot {
    sock: Option<LocalUdpTransport>,
    addr: IpAddr,
    network: i32,
    is_vpn: bool,
    started: bool,
    stun_started: bool,
    stun_finished: bool,
    turn_finished: bool,
    ext_addr: Option<IpAddr>,
    ext_finished: bool,
    borrowed: bool,
}

/// Per-component candidate gathering engine.
///
/// Owns one UDP transport per installed local address plus optionally one
/// TCP-TURN transport, synthesizes candidates as their addresses become
/// known, eliminates redundant ones, reports gathering completion and
/// routes datagrams by candidate.
pub struct Component {
    id: u16,
    client_software: String,

    pending: Config,
    config: Config,
    use_local: bool,
    use_stun_bind: bool,
    use_stun_relay_udp: bool,
    use_stun_relay_tcp: bool,

    transports: Vec<TransportSlot>,
    tcp_turn: Option<TcpTurnTransport>,
    local_candidates: Vec<Candidate>,
    channel_peers: HashMap<usize, HashSet<SocketAddr>>,

    updated: bool,
    local_finished: bool,
    gathering_complete: bool,
    stopping: bool,
    failed: bool,

    events: VecDeque<Event>,
}

impl Component {
    pub fn new(id: u16) -> Result<Self> {
        if !(1..=256).contains(&id) {
            return Err(Error::ErrInvalidComponentId);
        }
        Ok(Component {
            id,
            client_software: String::new(),
            pending: Config::default(),
            config: Config::default(),
            use_local: true,
            use_stun_bind: true,
            use_stun_relay_udp: true,
            use_stun_relay_tcp: true,
            transports: vec![],
            tcp_turn: None,
            local_candidates: vec![],
            channel_peers: HashMap::new(),
            updated: false,
            local_finished: false,
            gathering_complete: false,
            stopping: false,
            failed: false,
            events: VecDeque::new(),
        })
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn is_gathering_complete(&self) -> bool {
        self.gathering_complete
    }

    pub fn local_candidates(&self) -> &[Candidate] {
        &self.local_candidates
    }

    pub fn set_client_software(&mut self, s: impl Into<String>) {
        self.client_software = s.into();
    }

    pub fn set_local_addresses(&mut self, addrs: Vec<LocalAddress>) {
        self.pending.local_addrs = addrs;
    }

    pub fn set_external_addresses(&mut self, addrs: Vec<ExternalAddress>) {
        self.pending.ext_addrs = addrs;
    }

    pub fn set_stun_bind_service(&mut self, addr: SocketAddr) {
        self.pending.stun_bind_addr = Some(addr);
    }

    pub fn set_stun_relay_udp_service(
        &mut self,
        addr: SocketAddr,
        user: impl Into<String>,
        pass: impl Into<String>,
    ) {
        self.pending.stun_relay_udp_addr = Some(addr);
        self.pending.stun_relay_udp_user = user.into();
        self.pending.stun_relay_udp_pass = pass.into();
    }

    pub fn set_stun_relay_tcp_service(
        &mut self,
        addr: SocketAddr,
        user: impl Into<String>,
        pass: impl Into<String>,
    ) {
        self.pending.stun_relay_tcp_addr = Some(addr);
        self.pending.stun_relay_tcp_user = user.into();
        self.pending.stun_relay_tcp_pass = pass.into();
    }

    pub fn set_use_local(&mut self, enabled: bool) {
        self.use_local = enabled;
    }

    pub fn set_use_stun_bind(&mut self, enabled: bool) {
        self.use_stun_bind = enabled;
    }

    pub fn set_use_stun_relay_udp(&mut self, enabled: bool) {
        self.use_stun_relay_udp = enabled;
    }

    pub fn set_use_stun_relay_tcp(&mut self, enabled: bool) {
        self.use_stun_relay_tcp = enabled;
    }

    /// Promotes pending configuration to active, each field exactly once,
    /// and spins up transports for newly installed local addresses.
    /// `socket_list` offers pre-bound sockets to borrow; whatever is taken
    /// comes back through [Event::ReturnSocket] on teardown.
    pub fn update(&mut self, mut socket_list: Option<&mut Vec<UdpSocket>>, now: Instant) {
        if self.stopping {
            return;
        }
        self.updated = true;

        self.promote_stun_config();

        // Local addresses install on the first update that carries any.
        if self.config.local_addrs.is_empty() && !self.pending.local_addrs.is_empty() {
            let addrs = self.pending.local_addrs.clone();
            for la in addrs {
                if self.find_local_addr(la.addr).is_some() {
                    continue;
                }

                let mut taken = None;
                if self.use_local {
                    if let Some(list) = socket_list.as_mut() {
                        taken = take_from_socket_list(list, la.addr);
                    }
                }
                let borrowed = taken.is_some();
                let socket = match taken {
                    Some(socket) => socket,
                    None => match UdpSocket::bind((la.addr, 0)) {
                        Ok(socket) => socket,
                        Err(err) => {
                            self.debug_line(format!(
                                "Warning: unable to bind to random port on {}: {err}",
                                la.addr
                            ));
                            continue;
                        }
                    },
                };
                let port = socket.local_addr().map(|a| a.port()).unwrap_or(0);

                self.config.local_addrs.push(la);

                let mut transport = LocalUdpTransport::new();
                if la.addr.is_ipv4() {
                    transport.set_client_software(self.client_software.clone());
                    if self.use_stun_bind {
                        if let Some(addr) = self.config.stun_bind_addr {
                            transport.set_stun_bind_service(addr);
                        }
                    }
                    if self.use_stun_relay_udp && !self.config.stun_relay_udp_user.is_empty() {
                        if let Some(addr) = self.config.stun_relay_udp_addr {
                            transport.set_stun_relay_service(
                                addr,
                                self.config.stun_relay_udp_user.clone(),
                                self.config.stun_relay_udp_pass.clone(),
                            );
                        }
                    }
                }

                if let Err(err) = transport.start_with_socket(socket) {
                    self.debug_line(format!(
                        "Warning: unable to start transport on {}: {err}",
                        la.addr
                    ));
                    continue;
                }

                self.transports.push(TransportSlot {
                    sock: Some(transport),
                    addr: la.addr,
                    network: la.network,
                    is_vpn: la.is_vpn,
                    started: false,
                    stun_started: false,
                    stun_finished: false,
                    turn_finished: false,
                    ext_addr: None,
                    ext_finished: false,
                    borrowed,
                });

                self.debug_line(format!(
                    "starting transport {};{port} for component {}",
                    la.addr, self.id
                ));
            }
        }

        // External addresses install on the first update that carries any.
        if self.config.ext_addrs.is_empty() && !self.pending.ext_addrs.is_empty() {
            self.config.ext_addrs = self.pending.ext_addrs.clone();

            for i in 0..self.transports.len() {
                if self.transports[i].ext_addr.is_some() {
                    continue;
                }
                let laddr = match self.transports[i].sock.as_ref().and_then(|t| t.local_addr()) {
                    Some(a) if a.is_ipv4() => a,
                    _ => continue,
                };

                let mapped = self
                    .config
                    .ext_addrs
                    .iter()
                    .find(|ea| {
                        ea.base == laddr.ip()
                            && (ea.port_base == -1 || ea.port_base == laddr.port() as i32)
                    })
                    .map(|ea| ea.addr);

                if let Some(ext_ip) = mapped {
                    self.transports[i].ext_addr = Some(ext_ip);
                    if self.transports[i].started {
                        self.ensure_ext(i);
                    }
                }
            }
        }

        if self.use_stun_relay_tcp
            && self.tcp_turn.is_none()
            && !self.config.stun_relay_tcp_user.is_empty()
        {
            if let Some(addr) = self.config.stun_relay_tcp_addr {
                let mut tcp_turn = TcpTurnTransport::new(
                    addr,
                    self.config.stun_relay_tcp_user.clone(),
                    self.config.stun_relay_tcp_pass.clone(),
                    self.client_software.clone(),
                );
                match tcp_turn.start(now) {
                    Ok(()) => {
                        self.tcp_turn = Some(tcp_turn);
                        self.debug_line(format!(
                            "starting TURN transport with server {addr} for component {}",
                            self.id
                        ));
                    }
                    Err(err) => {
                        self.debug_line(format!("TURN transport failed to start: {err}"));
                    }
                }
            }
        }

        if !self.local_finished && self.transports.iter().all(|s| s.sock.is_none()) {
            // Nothing to gather.
            self.local_finished = true;
            self.events.push_back(Event::LocalFinished);
        }

        self.process_children(now);
    }

    /// Drains every child socket and processes what came in.
    pub fn read(&mut self, now: Instant) {
        for slot in &mut self.transports {
            if let Some(t) = slot.sock.as_mut() {
                t.read(now);
            }
        }
        if let Some(tt) = self.tcp_turn.as_mut() {
            tt.read(now);
        }
        self.process_children(now);
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        let mut eto = None;
        for slot in &self.transports {
            if let Some(t) = slot.sock.as_ref().and_then(|t| t.poll_timeout()) {
                if eto.map_or(true, |e| t < e) {
                    eto = Some(t);
                }
            }
        }
        if let Some(t) = self.tcp_turn.as_ref().and_then(|tt| tt.poll_timeout()) {
            if eto.map_or(true, |e| t < e) {
                eto = Some(t);
            }
        }
        eto
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        for slot in &mut self.transports {
            if let Some(t) = slot.sock.as_mut() {
                t.handle_timeout(now);
            }
        }
        if let Some(tt) = self.tcp_turn.as_mut() {
            tt.handle_timeout(now);
        }
        self.process_children(now);
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Whether any path of any transport holds readable datagrams.
    pub fn has_pending_data(&self) -> bool {
        self.transports.iter().any(|s| {
            s.sock.as_ref().is_some_and(|t| {
                t.has_pending_datagrams(PATH_DIRECT) || t.has_pending_datagrams(PATH_RELAYED)
            })
        }) || self.tcp_turn.as_ref().is_some_and(|tt| tt.has_pending_datagrams())
    }

    /// Pops the next received datagram across all transports and paths.
    pub fn incoming(&mut self) -> Option<(TransportRef, usize, Datagram)> {
        for (i, slot) in self.transports.iter_mut().enumerate() {
            if let Some(t) = slot.sock.as_mut() {
                if let Some(d) = t.read_datagram(PATH_DIRECT) {
                    return Some((TransportRef::Local(i), PATH_DIRECT, d));
                }
                if let Some(d) = t.read_datagram(PATH_RELAYED) {
                    return Some((TransportRef::Local(i), PATH_RELAYED, d));
                }
            }
        }
        if let Some(tt) = self.tcp_turn.as_mut() {
            if let Some(d) = tt.read_datagram() {
                return Some((TransportRef::TcpTurn, PATH_DIRECT, d));
            }
        }
        None
    }

    /// Sends on the transport and path that back the candidate.
    pub fn write_datagram(
        &mut self,
        candidate_id: usize,
        buf: &[u8],
        peer: SocketAddr,
        now: Instant,
    ) -> Result<()> {
        let c = self
            .local_candidates
            .iter()
            .find(|c| c.id == candidate_id)
            .ok_or(Error::ErrCandidateNotFound)?;
        let (transport, path) = (c.transport, c.path);

        match transport {
            TransportRef::Local(h) => self
                .transports
                .get_mut(h)
                .and_then(|s| s.sock.as_mut())
                .ok_or(Error::ErrTransportNotStarted)?
                .write_datagram(path, buf, peer, now),
            TransportRef::TcpTurn => self
                .tcp_turn
                .as_mut()
                .ok_or(Error::ErrTransportNotStarted)?
                .write_datagram(buf, peer, now),
        }
    }

    /// Priority a peer-reflexive candidate discovered on this transport and
    /// path would get: below host and srflx of the same transport, with the
    /// TCP relay ranked like the last interface.
    pub fn peer_reflexive_priority(&self, transport: TransportRef, path: usize) -> u32 {
        let addr_at: u32 = match transport {
            TransportRef::Local(h) => {
                let at = self
                    .transports
                    .get(h)
                    .and_then(|s| self.find_local_addr(s.addr))
                    .unwrap_or(0) as u32;
                if path == PATH_RELAYED {
                    // Lower than the direct paths, but not as far down as
                    // the TCP relay transport.
                    at + 512
                } else {
                    at
                }
            }
            TransportRef::TcpTurn => 1024,
        };
        default_priority(CandidateType::PeerReflexive, 65535 - addr_at, false, self.id)
    }

    /// Installs a local peer-reflexive candidate discovered by the check
    /// layer, sharing transport and path with the host candidate whose base
    /// matches `base`.
    pub fn add_local_peer_reflexive_candidate(
        &mut self,
        addr: SocketAddr,
        base: &CandidateInfo,
        priority: u32,
    ) -> Result<()> {
        let base_cand = self
            .local_candidates
            .iter()
            .find(|c| addr_eq(c.info.base, base.base) && c.info.typ == CandidateType::Host)
            .cloned()
            .ok_or(Error::ErrNoHostCandidateForBase)?;

        let info = CandidateInfo {
            addr: strip_zone(addr),
            base: base.addr,
            related: base.addr,
            typ: CandidateType::PeerReflexive,
            priority,
            foundation: foundation(
                CandidateType::PeerReflexive,
                base.addr.ip(),
                None,
                TransportProtocol::Udp,
            ),
            component_id: base.component_id,
            network: base.network,
        };

        let c = Candidate {
            id: self.get_id(),
            info,
            transport: base_cand.transport,
            path: PATH_DIRECT,
        };
        self.local_candidates.push(c.clone());
        self.events.push_back(Event::CandidateAdded(c));
        Ok(())
    }

    /// Installs a TURN channel binding towards `addr` for the candidate, so
    /// its relayed sends use the 4-byte ChannelData header.
    pub fn flag_path_as_low_overhead(
        &mut self,
        candidate_id: usize,
        addr: SocketAddr,
        now: Instant,
    ) -> Result<()> {
        let c = self
            .local_candidates
            .iter()
            .find(|c| c.id == candidate_id)
            .cloned()
            .ok_or(Error::ErrCandidateNotFound)?;

        let peers = self.channel_peers.entry(candidate_id).or_default();
        if !peers.insert(addr) {
            return Ok(());
        }

        match c.transport {
            TransportRef::Local(h) => {
                if let Some(t) = self.transports.get_mut(h).and_then(|s| s.sock.as_mut()) {
                    t.add_channel_peer(addr, now)?;
                }
            }
            TransportRef::TcpTurn => {
                if let Some(tt) = self.tcp_turn.as_mut() {
                    tt.add_channel_peer(addr, now)?;
                }
            }
        }
        Ok(())
    }

    /// Tears everything down; [Event::Stopped] fires once every child has
    /// acknowledged and borrowed sockets are on their way back.
    pub fn stop(&mut self, now: Instant) {
        if self.stopping {
            return;
        }
        self.stopping = true;

        if self.all_stopped() {
            self.stopping = false;
            self.events.push_back(Event::Stopped);
            return;
        }

        for slot in &mut self.transports {
            if let Some(t) = slot.sock.as_mut() {
                t.stop(now);
            }
        }
        if let Some(tt) = self.tcp_turn.as_mut() {
            tt.stop(now);
        }
        self.process_children(now);
    }

    fn promote_stun_config(&mut self) {
        // Each coordinate field is writable only while still unset.
        if self.config.stun_bind_addr.is_none() {
            self.config.stun_bind_addr = self.pending.stun_bind_addr;
        }
        if self.config.stun_relay_udp_addr.is_none() {
            if let Some(addr) = self.pending.stun_relay_udp_addr {
                self.config.stun_relay_udp_addr = Some(addr);
                self.config.stun_relay_udp_user = self.pending.stun_relay_udp_user.clone();
                self.config.stun_relay_udp_pass = self.pending.stun_relay_udp_pass.clone();
            }
        }
        if self.config.stun_relay_tcp_addr.is_none() {
            if let Some(addr) = self.pending.stun_relay_tcp_addr {
                self.config.stun_relay_tcp_addr = Some(addr);
                self.config.stun_relay_tcp_user = self.pending.stun_relay_tcp_user.clone();
                self.config.stun_relay_tcp_pass = self.pending.stun_relay_tcp_pass.clone();
            }
        }
    }

    fn process_children(&mut self, now: Instant) {
        for i in 0..self.transports.len() {
            loop {
                let Some(ev) = self.transports[i].sock.as_mut().and_then(|t| t.poll_event())
                else {
                    break;
                };
                match ev {
                    TransportEvent::Started => self.on_transport_started(i, now),
                    TransportEvent::AddressesChanged => self.on_addresses_changed(i),
                    TransportEvent::Error(TransportError::Stun) => {
                        self.transports[i].stun_finished = true;
                    }
                    TransportEvent::Error(TransportError::Turn) => {
                        self.transports[i].turn_finished = true;
                    }
                    TransportEvent::Error(TransportError::Bind) => {
                        self.erase_local_transport(i);
                        break;
                    }
                    TransportEvent::Stopped => {
                        self.erase_local_transport(i);
                        self.try_stopped();
                        break;
                    }
                }
            }
        }

        let mut tt_events = vec![];
        if let Some(tt) = self.tcp_turn.as_mut() {
            while let Some(ev) = tt.poll_event() {
                tt_events.push(ev);
            }
        }
        for ev in tt_events {
            match ev {
                TransportEvent::Started => self.on_tcp_turn_started(),
                TransportEvent::Error(_) => {
                    self.remove_candidates_for(TransportRef::TcpTurn);
                    self.tcp_turn = None;
                    self.check_all_dead();
                }
                TransportEvent::Stopped => {
                    if self.tcp_turn.is_some() {
                        self.remove_candidates_for(TransportRef::TcpTurn);
                        self.tcp_turn = None;
                    }
                    self.try_stopped();
                }
                TransportEvent::AddressesChanged => {}
            }
        }

        if !self.stopping {
            self.try_gathering_complete();
        }
    }

    fn on_transport_started(&mut self, i: usize, now: Instant) {
        self.transports[i].started = true;

        if self.use_local {
            if let Some(laddr) = self.transports[i].sock.as_ref().and_then(|t| t.local_addr()) {
                let addr_at = self.find_local_addr(self.transports[i].addr).unwrap_or(0);
                let slot = &self.transports[i];
                let info = CandidateInfo {
                    addr: laddr,
                    base: laddr,
                    related: unspecified_addr(),
                    typ: CandidateType::Host,
                    priority: default_priority(
                        CandidateType::Host,
                        65535 - addr_at as u32,
                        slot.is_vpn,
                        self.id,
                    ),
                    foundation: foundation(
                        CandidateType::Host,
                        laddr.ip(),
                        None,
                        TransportProtocol::Udp,
                    ),
                    component_id: self.id,
                    network: slot.network,
                };
                let c = Candidate {
                    id: self.get_id(),
                    info,
                    transport: TransportRef::Local(i),
                    path: PATH_DIRECT,
                };
                self.local_candidates.push(c.clone());
                self.events.push_back(Event::CandidateAdded(c));

                self.ensure_ext(i);
            }
        }

        if !self.transports[i].stun_started {
            self.transports[i].stun_started = true;
            let has_services = self.transports[i].sock.as_ref().is_some_and(|t| {
                t.stun_bind_service_addr().is_some() || t.stun_relay_service_addr().is_some()
            });
            if has_services {
                if let Some(t) = self.transports[i].sock.as_mut() {
                    t.stun_start(now);
                }
            } else {
                self.transports[i].stun_finished = true;
                self.transports[i].turn_finished = true;
            }
        }

        if !self.local_finished {
            let all_started = self
                .transports
                .iter()
                .filter(|s| s.sock.is_some())
                .all(|s| s.started);
            if all_started {
                self.local_finished = true;
                self.events.push_back(Event::LocalFinished);
            }
        }
    }

    fn on_addresses_changed(&mut self, i: usize) {
        let Some(addr_at) = self.find_local_addr(self.transports[i].addr) else {
            return;
        };

        let (srflx, laddr, relayed, ref_src, relay_service, stun_alive, turn_alive) = {
            let Some(t) = self.transports[i].sock.as_ref() else {
                return;
            };
            (
                t.server_reflexive_addr(),
                t.local_addr(),
                t.relayed_addr(),
                t.reflexive_addr_source(),
                t.stun_relay_service_addr(),
                t.is_stun_alive(),
                t.is_turn_alive(),
            )
        };
        let Some(laddr) = laddr else {
            return;
        };

        if self.use_stun_bind && srflx.is_some() && !self.transports[i].stun_finished {
            let srflx = srflx.unwrap_or_else(unspecified_addr);

            // Other transports on the exact same local address inherit the
            // discovered mapping, collapsing redundant STUN probes.
            for j in 0..self.transports.len() {
                if j == i || self.transports[j].ext_addr.is_some() {
                    continue;
                }
                let same_addr = self.transports[j]
                    .sock
                    .as_ref()
                    .and_then(|t| t.local_addr())
                    .is_some_and(|a| addr_eq(a, laddr));
                if same_addr {
                    self.transports[j].ext_addr = Some(srflx.ip());
                    if self.transports[j].started {
                        self.ensure_ext(j);
                    }
                }
            }

            let slot = &self.transports[i];
            let info = CandidateInfo {
                addr: strip_zone(srflx),
                base: laddr,
                related: laddr,
                typ: CandidateType::ServerReflexive,
                priority: default_priority(
                    CandidateType::ServerReflexive,
                    65535 - addr_at as u32,
                    slot.is_vpn,
                    self.id,
                ),
                foundation: foundation(
                    CandidateType::ServerReflexive,
                    laddr.ip(),
                    ref_src,
                    TransportProtocol::Udp,
                ),
                component_id: self.id,
                network: slot.network,
            };
            let c = Candidate {
                id: self.get_id(),
                info,
                transport: TransportRef::Local(i),
                path: PATH_DIRECT,
            };
            self.transports[i].stun_finished = true;
            self.store_non_redundant(c);
        } else if self.use_stun_bind && !stun_alive && !self.transports[i].stun_finished {
            self.transports[i].stun_finished = true;
        }

        if let Some(relayed) = relayed {
            if !self.transports[i].turn_finished {
                let slot = &self.transports[i];
                let info = CandidateInfo {
                    addr: relayed,
                    base: relayed,
                    related: srflx.unwrap_or_else(unspecified_addr),
                    typ: CandidateType::Relayed,
                    priority: default_priority(
                        CandidateType::Relayed,
                        65535 - addr_at as u32,
                        slot.is_vpn,
                        self.id,
                    ),
                    foundation: foundation(
                        CandidateType::Relayed,
                        relayed.ip(),
                        relay_service.map(|a| a.ip()),
                        TransportProtocol::Udp,
                    ),
                    component_id: self.id,
                    network: slot.network,
                };
                let c = Candidate {
                    id: self.get_id(),
                    info,
                    transport: TransportRef::Local(i),
                    path: PATH_RELAYED,
                };
                self.transports[i].turn_finished = true;
                self.store_non_redundant(c);
            }
        } else if !turn_alive && !self.transports[i].turn_finished {
            self.transports[i].turn_finished = true;
        }
    }

    fn on_tcp_turn_started(&mut self) {
        let Some(tt) = self.tcp_turn.as_ref() else {
            return;
        };
        let Some(relayed) = tt.relayed_addr() else {
            return;
        };

        // Ranked like the very last interface.
        let addr_at: u32 = 1024;
        let info = CandidateInfo {
            addr: relayed,
            base: relayed,
            related: tt.reflexive_addr().unwrap_or_else(unspecified_addr),
            typ: CandidateType::Relayed,
            priority: default_priority(CandidateType::Relayed, 65535 - addr_at, false, self.id),
            foundation: foundation(
                CandidateType::Relayed,
                relayed.ip(),
                Some(tt.server_addr().ip()),
                TransportProtocol::Tcp,
            ),
            component_id: self.id,
            network: 0,
        };
        let c = Candidate {
            id: self.get_id(),
            info,
            transport: TransportRef::TcpTurn,
            path: PATH_DIRECT,
        };
        self.local_candidates.push(c.clone());
        self.events.push_back(Event::CandidateAdded(c));
    }

    /// Emits the manual-mapping srflx candidate for the transport if one is
    /// due: the mapped ip with the socket's own port.
    fn ensure_ext(&mut self, i: usize) {
        if self.transports[i].ext_finished {
            return;
        }
        let Some(ext_ip) = self.transports[i].ext_addr else {
            return;
        };
        let Some(laddr) = self.transports[i].sock.as_ref().and_then(|t| t.local_addr()) else {
            return;
        };
        let Some(addr_at) = self.find_local_addr(self.transports[i].addr) else {
            return;
        };

        let slot = &self.transports[i];
        let info = CandidateInfo {
            addr: SocketAddr::new(ext_ip, laddr.port()),
            base: laddr,
            related: laddr,
            typ: CandidateType::ServerReflexive,
            priority: default_priority(
                CandidateType::ServerReflexive,
                65535 - addr_at as u32,
                slot.is_vpn,
                self.id,
            ),
            foundation: foundation(
                CandidateType::ServerReflexive,
                laddr.ip(),
                None,
                TransportProtocol::Udp,
            ),
            component_id: self.id,
            network: slot.network,
        };
        let c = Candidate {
            id: self.get_id(),
            info,
            transport: TransportRef::Local(i),
            path: PATH_DIRECT,
        };

        self.transports[i].ext_finished = true;
        self.store_non_redundant(c);
    }

    /// RFC 8445 §5.1.3: a newcomer whose advertised and base addresses are
    /// both covered by a stored candidate of equal or higher priority is
    /// dropped silently. A stored candidate is never replaced.
    fn store_non_redundant(&mut self, c: Candidate) {
        let redundant = self.local_candidates.iter().any(|cc| {
            addr_eq(cc.info.addr, c.info.addr)
                && addr_eq(cc.info.base, c.info.base)
                && cc.info.priority >= c.info.priority
        });
        if redundant {
            log::debug!("dropping redundant candidate {}", c.info);
            return;
        }
        self.local_candidates.push(c.clone());
        self.events.push_back(Event::CandidateAdded(c));
    }

    fn try_gathering_complete(&mut self) {
        if self.gathering_complete || !self.updated || self.failed {
            return;
        }
        if self.tcp_turn.as_ref().is_some_and(|tt| !tt.is_started()) {
            return;
        }
        // Transports that all died (as opposed to never having existed)
        // never complete; that path ends in the fatal error instead.
        if !self.transports.is_empty() && self.transports.iter().all(|s| s.sock.is_none()) {
            return;
        }

        let all_finished = self.transports.iter().all(|s| {
            let Some(t) = s.sock.as_ref() else {
                return true;
            };
            s.started
                && (t.stun_bind_service_addr().is_none() || s.stun_finished)
                && (t.stun_relay_service_addr().is_none() || s.turn_finished)
        });

        if all_finished {
            self.gathering_complete = true;
            self.events.push_back(Event::GatheringComplete);
        }
    }

    fn erase_local_transport(&mut self, i: usize) {
        let Some(mut t) = self.transports[i].sock.take() else {
            return;
        };
        self.debug_line(format!("stopping local transport {:?}", t.local_addr()));

        self.remove_candidates_for(TransportRef::Local(i));

        if self.transports[i].borrowed {
            if let Some(socket) = t.take_socket() {
                self.events.push_back(Event::ReturnSocket(socket));
            }
        }

        self.check_all_dead();
    }

    fn remove_candidates_for(&mut self, transport: TransportRef) {
        let mut n = 0;
        while n < self.local_candidates.len() {
            if self.local_candidates[n].transport == transport {
                let c = self.local_candidates.remove(n);
                self.channel_peers.remove(&c.id);
                self.events.push_back(Event::CandidateRemoved(c));
            } else {
                n += 1;
            }
        }
    }

    /// Running out of transports before producing anything is the one
    /// fatal gathering failure.
    fn check_all_dead(&mut self) {
        if self.stopping || self.failed || self.gathering_complete {
            return;
        }
        if self.transports.iter().all(|s| s.sock.is_none())
            && self.tcp_turn.is_none()
            && self.local_candidates.is_empty()
        {
            self.failed = true;
            self.events.push_back(Event::Error(Error::Other(
                "no gathering transports remain".to_owned(),
            )));
            self.events.push_back(Event::Stopped);
        }
    }

    fn all_stopped(&self) -> bool {
        self.transports.iter().all(|s| s.sock.is_none()) && self.tcp_turn.is_none()
    }

    fn try_stopped(&mut self) {
        if self.stopping && self.all_stopped() {
            self.stopping = false;
            self.events.push_back(Event::Stopped);
        }
    }

    /// Lowest id not taken by a live candidate; freed ids are reused.
    fn get_id(&self) -> usize {
        let mut n = 0;
        loop {
            if !self.local_candidates.iter().any(|c| c.id == n) {
                return n;
            }
            n += 1;
        }
    }

    fn find_local_addr(&self, addr: IpAddr) -> Option<usize> {
        self.config.local_addrs.iter().position(|la| la.addr == addr)
    }

    fn debug_line(&mut self, line: String) {
        log::debug!("{line}");
        self.events.push_back(Event::DebugLine(line));
    }
}

fn take_from_socket_list(list: &mut Vec<UdpSocket>, addr: IpAddr) -> Option<UdpSocket> {
    let at = list
        .iter()
        .position(|s| s.local_addr().map_or(false, |a| a.ip() == addr))?;
    Some(list.remove(at))
}
