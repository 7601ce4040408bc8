#![warn(rust_2018_idioms)]

pub mod candidate;
pub mod component;
pub mod local_transport;
pub mod tcp_turn_transport;
pub mod transport;

pub use candidate::{
    Candidate, CandidateInfo, CandidateType, ExternalAddress, LocalAddress, TransportRef,
};
pub use component::{Component, Event};
pub use local_transport::LocalUdpTransport;
pub use tcp_turn_transport::TcpTurnTransport;
pub use transport::{Datagram, TransportError, TransportEvent, PATH_DIRECT, PATH_RELAYED};

/// Largest datagram the transports will read in one go.
pub(crate) const RECEIVE_MTU: usize = 8192;
