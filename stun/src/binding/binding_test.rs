use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Instant;

use shared::error::Result;

use super::*;
use crate::error_code::CODE_UNAUTHORIZED;
use crate::message::{BINDING_ERROR, BINDING_SUCCESS};

fn server_addr() -> SocketAddr {
    "74.125.1.1:3478".parse().unwrap()
}

/// Drains the pool transmit queue and decodes the request it carried.
fn sent_request(pool: &mut TransactionPool) -> Message {
    let transmit = pool.poll_transmit().expect("request transmit");
    assert!(pool.poll_transmit().is_none());
    let mut m = Message::new();
    m.raw = transmit.payload.to_vec();
    m.decode().expect("decode request");
    m
}

#[test]
fn test_binding_success() -> Result<()> {
    let mut pool = TransactionPool::new();
    let mut binding = BindingTransaction::new();
    binding.start(&mut pool, server_addr(), Instant::now())?;

    let req = sent_request(&mut pool);
    assert_eq!(req.typ, BINDING_REQUEST);

    let mapped = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)), 40001);
    let mut resp = Message::new();
    resp.build(&[
        Box::new(req.transaction_id),
        Box::new(BINDING_SUCCESS),
        Box::new(XorMappedAddress {
            ip: mapped.ip(),
            port: mapped.port(),
        }),
        Box::new(FINGERPRINT),
    ])?;

    assert!(pool.handle_read(&resp.raw, server_addr())?);
    let ev = pool.poll_event().expect("event");
    let outcome = binding.handle_event(&ev).expect("outcome");
    assert_eq!(outcome, BindingOutcome::Success(mapped));
    assert!(!binding.is_started());

    Ok(())
}

#[test]
fn test_binding_request_carries_ice_attributes() -> Result<()> {
    let mut pool = TransactionPool::new();
    let mut binding = BindingTransaction::new();
    binding.set_short_term_credentials("remote:local", "pass");
    binding.set_priority(0x6e7f_1eff);
    binding.set_use_candidate(true);
    binding.set_ice_controlling(0x1234_5678_9abc_def0);
    binding.start(&mut pool, server_addr(), Instant::now())?;

    let req = sent_request(&mut pool);
    assert!(req.contains(ATTR_PRIORITY));
    assert!(req.contains(ATTR_USE_CANDIDATE));
    assert!(req.contains(ATTR_ICE_CONTROLLING));
    assert!(!req.contains(ATTR_ICE_CONTROLLED));
    MessageIntegrity::new_short_term_integrity("pass".to_owned()).check(&req)?;
    FINGERPRINT.check(&req)?;

    Ok(())
}

#[test]
fn test_controlled_clears_controlling() -> Result<()> {
    let mut pool = TransactionPool::new();
    let mut binding = BindingTransaction::new();
    binding.set_ice_controlling(1);
    binding.set_ice_controlled(2);
    binding.start(&mut pool, server_addr(), Instant::now())?;

    let req = sent_request(&mut pool);
    assert!(req.contains(ATTR_ICE_CONTROLLED));
    assert!(!req.contains(ATTR_ICE_CONTROLLING));
    Ok(())
}

#[test]
fn test_binding_role_conflict() -> Result<()> {
    let mut pool = TransactionPool::new();
    let mut binding = BindingTransaction::new();
    binding.start(&mut pool, server_addr(), Instant::now())?;
    let req = sent_request(&mut pool);

    let mut resp = Message::new();
    resp.build(&[
        Box::new(req.transaction_id),
        Box::new(BINDING_ERROR),
        Box::new(ErrorCodeAttribute::new(CODE_ROLE_CONFLICT, "Role Conflict")),
    ])?;

    assert!(pool.handle_read(&resp.raw, server_addr())?);
    let ev = pool.poll_event().expect("event");
    assert_eq!(
        binding.handle_event(&ev),
        Some(BindingOutcome::Failed(BindingError::Conflict))
    );
    Ok(())
}

#[test]
fn test_binding_rejected() -> Result<()> {
    let mut pool = TransactionPool::new();
    let mut binding = BindingTransaction::new();
    binding.start(&mut pool, server_addr(), Instant::now())?;
    let req = sent_request(&mut pool);

    let mut resp = Message::new();
    resp.build(&[
        Box::new(req.transaction_id),
        Box::new(BINDING_ERROR),
        Box::new(ErrorCodeAttribute::new(CODE_UNAUTHORIZED, "Unauthorized")),
    ])?;

    assert!(pool.handle_read(&resp.raw, server_addr())?);
    let ev = pool.poll_event().expect("event");
    assert_eq!(
        binding.handle_event(&ev),
        Some(BindingOutcome::Failed(BindingError::Rejected {
            code: CODE_UNAUTHORIZED,
            reason: "Unauthorized".to_owned(),
        }))
    );
    Ok(())
}

#[test]
fn test_binding_timeout() -> Result<()> {
    let mut pool = TransactionPool::new();
    let mut binding = BindingTransaction::new();
    let now = Instant::now();
    binding.start(&mut pool, server_addr(), now)?;
    let _ = sent_request(&mut pool);

    // Run the full schedule dry.
    while let Some(deadline) = pool.poll_timeout() {
        pool.handle_timeout(deadline);
        while pool.poll_transmit().is_some() {}
    }

    let ev = pool.poll_event().expect("timeout event");
    assert_eq!(
        binding.handle_event(&ev),
        Some(BindingOutcome::Failed(BindingError::Timeout))
    );
    Ok(())
}

#[test]
fn test_cancel_emits_nothing() -> Result<()> {
    let mut pool = TransactionPool::new();
    let mut binding = BindingTransaction::new();
    binding.start(&mut pool, server_addr(), Instant::now())?;
    let req = sent_request(&mut pool);

    binding.cancel(&mut pool);
    assert!(!binding.is_started());

    let mut resp = Message::new();
    resp.build(&[Box::new(req.transaction_id), Box::new(BINDING_SUCCESS)])?;
    assert!(!pool.handle_read(&resp.raw, server_addr())?);
    assert!(pool.poll_event().is_none());
    Ok(())
}
