use std::net::SocketAddr;

use bytes::BytesMut;

/// Path index for the direct UDP socket.
pub const PATH_DIRECT: usize = 0;
/// Path index for traffic relayed through a TURN allocation.
pub const PATH_RELAYED: usize = 1;

/// A received application datagram and the peer it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub addr: SocketAddr,
    pub buf: BytesMut,
}

/// Which part of a transport failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Could not bind (or rebind) the local socket.
    Bind,
    /// The STUN Binding side gave up.
    Stun,
    /// The TURN allocation side gave up.
    Turn,
}

/// Events a gathering transport queues for its owner.
#[derive(Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The socket is bound (or the relay connection is allocated) and the
    /// transport carries traffic.
    Started,
    /// Teardown finished.
    Stopped,
    /// A server-reflexive or relayed address appeared, changed or vanished.
    AddressesChanged,
    Error(TransportError),
}
