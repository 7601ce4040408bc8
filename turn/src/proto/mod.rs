#[cfg(test)]
mod proto_test;

pub mod chandata;
pub mod channum;
pub mod data;
pub mod lifetime;
pub mod peeraddr;
pub mod relayaddr;
pub mod reqtrans;
