use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use shared::error::Result;

use super::*;
use crate::message::{Message, TransactionId, BINDING_REQUEST, BINDING_SUCCESS};

fn server_addr() -> SocketAddr {
    "198.51.100.1:3478".parse().unwrap()
}

fn request() -> Message {
    let mut m = Message::new();
    m.build(&[Box::new(TransactionId::new()), Box::new(BINDING_REQUEST)])
        .unwrap();
    m
}

#[test]
fn test_retransmit_schedule() -> Result<()> {
    let mut pool = TransactionPool::new();
    let req = request();
    let now = Instant::now();

    pool.start(
        req.transaction_id,
        BytesMut::from(&req.raw[..]),
        server_addr(),
        now,
    )?;

    let mut transmits = 0;
    while pool.poll_transmit().is_some() {
        transmits += 1;
    }
    assert_eq!(transmits, 1);

    // Deadlines follow RTO, 2*RTO, ... capped by the Rc'th transmit, then
    // one final wait of Rm * RTO.
    let expected = [500u64, 1500, 3500, 7500, 15500, 31500, 39500];
    for (i, at) in expected.iter().enumerate() {
        let deadline = pool.poll_timeout().expect("deadline");
        assert_eq!(deadline, now + Duration::from_millis(*at), "deadline #{i}");

        pool.handle_timeout(deadline);
        while pool.poll_transmit().is_some() {
            transmits += 1;
        }
    }

    // Rc transmits in total, then a timeout event.
    assert_eq!(transmits, DEFAULT_RC);
    let ev = pool.poll_event().expect("timeout event");
    assert_eq!(ev.id, req.transaction_id);
    assert!(matches!(ev.result, TransactionResult::Timeout));
    assert!(pool.is_empty());

    Ok(())
}

#[test]
fn test_response_routing() -> Result<()> {
    let mut pool = TransactionPool::new();
    let req = request();
    let other = request();
    let now = Instant::now();

    pool.start(
        req.transaction_id,
        BytesMut::from(&req.raw[..]),
        server_addr(),
        now,
    )?;

    // A response for an unknown transaction is left alone.
    let mut stray = Message::new();
    stray.build(&[Box::new(other.transaction_id), Box::new(BINDING_SUCCESS)])?;
    assert!(!pool.handle_read(&stray.raw, server_addr())?);
    assert!(pool.poll_event().is_none());

    // A response from the wrong source is left alone too.
    let mut resp = Message::new();
    resp.build(&[Box::new(req.transaction_id), Box::new(BINDING_SUCCESS)])?;
    let spoofer: SocketAddr = "203.0.113.77:9".parse().unwrap();
    assert!(!pool.handle_read(&resp.raw, spoofer)?);

    // The real response is consumed and routed to the one transaction.
    assert!(pool.handle_read(&resp.raw, server_addr())?);
    let ev = pool.poll_event().expect("response event");
    assert_eq!(ev.id, req.transaction_id);
    assert!(matches!(ev.result, TransactionResult::Response(_)));
    assert!(pool.is_empty());

    Ok(())
}

#[test]
fn test_cancel_swallows_response() -> Result<()> {
    let mut pool = TransactionPool::new();
    let req = request();
    let now = Instant::now();

    pool.start(
        req.transaction_id,
        BytesMut::from(&req.raw[..]),
        server_addr(),
        now,
    )?;
    pool.cancel(req.transaction_id);

    let mut resp = Message::new();
    resp.build(&[Box::new(req.transaction_id), Box::new(BINDING_SUCCESS)])?;
    assert!(!pool.handle_read(&resp.raw, server_addr())?);
    assert!(pool.poll_event().is_none());
    assert!(pool.poll_timeout().is_none());

    Ok(())
}

#[test]
fn test_reliable_single_deadline() -> Result<()> {
    let mut pool = TransactionPool::new();
    let req = request();
    let now = Instant::now();

    pool.start_reliable(
        req.transaction_id,
        BytesMut::from(&req.raw[..]),
        server_addr(),
        now,
    )?;

    let mut transmits = 0;
    while pool.poll_transmit().is_some() {
        transmits += 1;
    }
    assert_eq!(transmits, 1);

    let deadline = pool.poll_timeout().expect("deadline");
    assert_eq!(deadline, now + DEFAULT_TI);

    pool.handle_timeout(deadline);
    assert!(pool.poll_transmit().is_none());
    let ev = pool.poll_event().expect("timeout event");
    assert!(matches!(ev.result, TransactionResult::Timeout));

    Ok(())
}
