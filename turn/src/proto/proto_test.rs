use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use shared::error::Result;

use stun::message::{Getter as _, Message, MessageType, TransactionId, CLASS_REQUEST, METHOD_ALLOCATE};

use super::chandata::ChannelData;
use super::channum::{ChannelNumber, MAX_CHANNEL_NUMBER, MIN_CHANNEL_NUMBER};
use super::lifetime::Lifetime;
use super::peeraddr::PeerAddress;
use super::relayaddr::RelayedAddress;
use super::reqtrans::{RequestedTransport, PROTO_UDP};

#[test]
fn test_channel_data_roundtrip() -> Result<()> {
    let mut ch_data = ChannelData {
        number: ChannelNumber(0x4000),
        data: vec![1, 2, 3],
        ..Default::default()
    };
    ch_data.encode()?;

    // chnum || htons(len) || payload, no padding on datagram transports.
    assert_eq!(ch_data.raw, vec![0x40, 0x00, 0x00, 0x03, 1, 2, 3]);

    let mut decoded = ChannelData {
        raw: ch_data.raw.clone(),
        ..Default::default()
    };
    decoded.decode()?;
    assert_eq!(decoded.number, ChannelNumber(0x4000));
    assert_eq!(decoded.data, vec![1, 2, 3]);
    Ok(())
}

#[test]
fn test_channel_data_padded_on_stream() -> Result<()> {
    let mut ch_data = ChannelData {
        number: ChannelNumber(0x4001),
        data: vec![0xaa; 5],
        ..Default::default()
    };
    ch_data.encode_padded()?;

    assert_eq!(ch_data.raw.len(), 12);
    assert_eq!(&ch_data.raw[9..], &[0, 0, 0]);

    // The parser recovers the unpadded payload from the length field.
    let mut decoded = ChannelData {
        raw: ch_data.raw.clone(),
        ..Default::default()
    };
    decoded.decode()?;
    assert_eq!(decoded.data, vec![0xaa; 5]);
    Ok(())
}

#[test]
fn test_is_channel_data_bounds() {
    let frame = |number: u16| {
        let mut b = vec![0u8; 4];
        b[..2].copy_from_slice(&number.to_be_bytes());
        b
    };

    assert!(!ChannelData::is_channel_data(&frame(MIN_CHANNEL_NUMBER - 1)));
    assert!(ChannelData::is_channel_data(&frame(MIN_CHANNEL_NUMBER)));
    assert!(ChannelData::is_channel_data(&frame(MAX_CHANNEL_NUMBER)));
    assert!(!ChannelData::is_channel_data(&frame(MAX_CHANNEL_NUMBER + 1)));
    assert!(!ChannelData::is_channel_data(&[0x40]));
}

#[test]
fn test_channel_data_truncated() {
    let mut ch_data = ChannelData {
        // Length larger than the remaining buffer.
        raw: vec![0x40, 0x00, 0x00, 0x09, 1, 2],
        ..Default::default()
    };
    assert!(ch_data.decode().is_err());
}

#[test]
fn test_allocate_attributes_roundtrip() -> Result<()> {
    let relayed = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 50)), 50000);
    let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 8)), 9);

    let mut m = Message::new();
    m.build(&[
        Box::new(TransactionId::new()),
        Box::new(MessageType::new(METHOD_ALLOCATE, CLASS_REQUEST)),
        Box::new(RequestedTransport::default()),
        Box::new(Lifetime(Duration::from_secs(600))),
        Box::new(RelayedAddress::from(relayed)),
        Box::new(PeerAddress::from(peer)),
        Box::new(ChannelNumber(0x4004)),
    ])?;

    let mut decoded = Message::new();
    decoded.raw = m.raw.clone();
    decoded.decode()?;

    let mut reqtrans = RequestedTransport { protocol: 0 };
    reqtrans.get_from(&decoded)?;
    assert_eq!(reqtrans.protocol, PROTO_UDP);

    let mut lifetime = Lifetime::default();
    lifetime.get_from(&decoded)?;
    assert_eq!(lifetime.0, Duration::from_secs(600));

    let mut got_relayed = RelayedAddress::default();
    got_relayed.get_from(&decoded)?;
    assert_eq!((got_relayed.ip, got_relayed.port), (relayed.ip(), relayed.port()));

    let mut got_peer = PeerAddress::default();
    got_peer.get_from(&decoded)?;
    assert_eq!((got_peer.ip, got_peer.port), (peer.ip(), peer.port()));

    let mut number = ChannelNumber::default();
    number.get_from(&decoded)?;
    assert_eq!(number, ChannelNumber(0x4004));

    Ok(())
}

#[test]
fn test_channel_number_range_enforced() {
    let mut m = Message::new();
    assert!(stun::message::Setter::add_to(&ChannelNumber(0x3fff), &mut m).is_err());
    assert!(stun::message::Setter::add_to(&ChannelNumber(0x7fff), &mut m).is_err());
}
