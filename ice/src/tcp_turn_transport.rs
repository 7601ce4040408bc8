
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use shared::error::{Error, Result};
use shared::TransportProtocol;
use socket2::{Domain, Socket, Type};
use turn::client::{Client as TurnClient, ClientConfig as TurnClientConfig, Event as TurnEvent};

use crate::transport::{Datagram, TransportError, TransportEvent};
use crate::RECEIVE_MTU;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// EINPROGRESS: the non-blocking connect is underway.
const EINPROGRESS: i32 = 115;

/// A TURN allocation tunnelled through a single TCP connection, for hosts
/// where UDP is blocked. Presents the same datagram surface as the UDP
/// transport, restricted to one relayed path (path 0).
pub struct TcpTurnTransport {
    server_addr: SocketAddr,
    stream: Option<TcpStream>,
    connected: bool,
    connect_deadline: Option<Instant>,

    turn: TurnClient,
    read_buf: Vec<u8>,
    out_buf: Vec<u8>,

    rel_addr: Option<SocketAddr>,
    ref_addr: Option<SocketAddr>,

    in_queue: VecDeque<Datagram>,
    events: VecDeque<TransportEvent>,

    started: bool,
    stopping: bool,
}

impl TcpTurnTransport {
    pub fn new(
        server_addr: SocketAddr,
        username: impl Into<String>,
        password: impl Into<String>,
        software: impl Into<String>,
    ) -> Self {
        TcpTurnTransport {
            server_addr,
            stream: None,
            connected: false,
            connect_deadline: None,
            turn: TurnClient::new(TurnClientConfig {
                server_addr,
                protocol: TransportProtocol::Tcp,
                username: username.into(),
                password: password.into(),
                realm: String::new(),
                software: software.into(),
            }),
            read_buf: Vec::new(),
            out_buf: Vec::new(),
            rel_addr: None,
            ref_addr: None,
            in_queue: VecDeque::new(),
            events: VecDeque::new(),
            started: false,
            stopping: false,
        }
    }

    /// Starts the non-blocking connect to the TURN server. The allocation
    /// begins once the connection completes.
    pub fn start(&mut self, now: Instant) -> Result<()> {
        if self.stream.is_some() {
            return Err(Error::Other("transport already started".to_owned()));
        }

        let domain = if self.server_addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::STREAM, None)?;
        socket.set_nonblocking(true)?;
        match socket.connect(&self.server_addr.into()) {
            Ok(()) => self.connected = true,
            Err(err)
                if err.raw_os_error() == Some(EINPROGRESS)
                    || err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => return Err(err.into()),
        }

        self.stream = Some(socket.into());
        self.connect_deadline = Some(now + CONNECT_TIMEOUT);

        if self.connected {
            self.on_connected(now);
        }
        Ok(())
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn relayed_addr(&self) -> Option<SocketAddr> {
        self.rel_addr
    }

    pub fn reflexive_addr(&self) -> Option<SocketAddr> {
        self.ref_addr
    }

    /// Whether the relayed candidate is usable.
    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn add_channel_peer(&mut self, peer: SocketAddr, now: Instant) -> Result<()> {
        self.turn.add_channel_peer(peer, now)?;
        self.pump_out(now);
        Ok(())
    }

    pub fn has_pending_datagrams(&self) -> bool {
        !self.in_queue.is_empty()
    }

    pub fn read_datagram(&mut self) -> Option<Datagram> {
        self.in_queue.pop_front()
    }

    pub fn write_datagram(&mut self, buf: &[u8], peer: SocketAddr, now: Instant) -> Result<()> {
        self.turn.send_to(buf, peer, now)?;
        self.pump_out(now);
        Ok(())
    }

    /// Drains the connection: completes the pending connect, then splits
    /// the stream into STUN messages and padded ChannelData frames for the
    /// TURN client.
    pub fn read(&mut self, now: Instant) {
        if self.stream.is_none() || self.stopping {
            return;
        }

        if !self.connected && !self.check_connected(now) {
            return;
        }

        let mut disconnected = false;
        if let Some(stream) = self.stream.as_mut() {
            let mut buf = [0u8; RECEIVE_MTU];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) => {
                        disconnected = true;
                        break;
                    }
                    Ok(n) => self.read_buf.extend_from_slice(&buf[..n]),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) => {
                        log::debug!("relay connection read: {err}");
                        disconnected = true;
                        break;
                    }
                }
            }
        }

        if disconnected {
            self.fail(now);
            return;
        }

        self.extract_frames(now);
        self.pump_out(now);
    }

    pub fn poll_event(&mut self) -> Option<TransportEvent> {
        self.events.pop_front()
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        let mut eto = self.turn.poll_timeout();
        if !self.connected {
            if let Some(deadline) = self.connect_deadline {
                if eto.map_or(true, |e| deadline < e) {
                    eto = Some(deadline);
                }
            }
        }
        eto
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        if !self.connected {
            if self.connect_deadline.is_some_and(|d| d <= now) && !self.check_connected(now) {
                log::debug!("relay connection timed out");
                self.fail(now);
            }
            return;
        }

        self.turn.handle_timeout(now);
        self.process_turn_events(now);
        self.pump_out(now);
    }

    /// Tears the connection down, releasing the allocation best effort.
    pub fn stop(&mut self, now: Instant) {
        if self.stopping {
            return;
        }
        self.turn.close(now);
        self.pump_out(now);
        self.stopping = true;
        self.stream = None;
        self.events.push_back(TransportEvent::Stopped);
    }

    fn check_connected(&mut self, now: Instant) -> bool {
        let Some(stream) = self.stream.as_ref() else {
            return false;
        };
        match stream.peer_addr() {
            Ok(_) => {
                self.connected = true;
                self.on_connected(now);
                true
            }
            Err(err) if err.kind() == io::ErrorKind::NotConnected => {
                // Still connecting; a refused connect surfaces here too.
                if let Ok(Some(sock_err)) = stream.take_error() {
                    log::debug!("relay connection failed: {sock_err}");
                    self.fail(now);
                }
                false
            }
            Err(err) => {
                log::debug!("relay connection failed: {err}");
                self.fail(now);
                false
            }
        }
    }

    fn on_connected(&mut self, now: Instant) {
        log::debug!("connected to relay {}", self.server_addr);
        if let Err(err) = self.turn.allocate(now) {
            log::warn!("allocate: {err}");
        }
        self.pump_out(now);
    }

    fn fail(&mut self, _now: Instant) {
        let was_started = self.started;
        self.stream = None;
        self.connected = false;
        self.started = false;
        self.events.push_back(TransportEvent::Error(TransportError::Turn));
        if was_started {
            self.events.push_back(TransportEvent::Stopped);
        }
    }

    fn extract_frames(&mut self, now: Instant) {
        loop {
            if self.read_buf.len() < 4 {
                return;
            }

            let first = self.read_buf[0];
            let len = u16::from_be_bytes([self.read_buf[2], self.read_buf[3]]) as usize;
            let total = if first & 0xc0 == 0x40 {
                // ChannelData, padded to 4 bytes on stream transports.
                4 + ((len + 3) & !3)
            } else if first & 0xc0 == 0 {
                20 + len
            } else {
                log::debug!("relay stream desynchronized");
                self.fail(now);
                return;
            };

            if self.read_buf.len() < total {
                return;
            }

            let frame: Vec<u8> = self.read_buf.drain(..total).collect();
            match self.turn.handle_read(&frame, self.server_addr, now) {
                Ok(_) => self.process_turn_events(now),
                Err(err) => log::debug!("relay frame: {err}"),
            }
        }
    }

    fn process_turn_events(&mut self, now: Instant) {
        while let Some(ev) = self.turn.poll_event() {
            match ev {
                TurnEvent::Allocated {
                    relayed, mapped, ..
                } => {
                    self.rel_addr = Some(relayed);
                    self.ref_addr = mapped;
                    self.started = true;
                    self.events.push_back(TransportEvent::Started);
                }
                TurnEvent::AllocateFailed { .. } => {
                    self.fail(now);
                }
                TurnEvent::Data { peer, data } => {
                    self.in_queue.push_back(Datagram {
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

    /// Moves pending TURN transmits into the stream, keeping what the
    /// kernel would not take for the next pump.
    fn pump_out(&mut self, _now: Instant) {
        while let Some(t) = self.turn.poll_transmit() {
            self.out_buf.extend_from_slice(&t.payload);
        }
        if !self.connected {
            return;
        }

        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        while !self.out_buf.is_empty() {
            match stream.write(&self.out_buf) {
                Ok(0) => break,
                Ok(n) => {
                    self.out_buf.drain(..n);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    log::debug!("relay connection write: {err}");
                    break;
                }
            }
        }
    }
}
