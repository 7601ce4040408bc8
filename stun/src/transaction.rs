#[cfg(test)]
mod transaction_test;

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use shared::error::{Error, Result};

use crate::message::{Message, TransactionId, CLASS_ERROR_RESPONSE, CLASS_SUCCESS_RESPONSE};

/// Retransmission defaults from RFC 5389 §7.2.1.
pub const DEFAULT_RTO: Duration = Duration::from_millis(500);
/// Total number of transmits before giving up.
pub const DEFAULT_RC: u32 = 7;
/// The final wait is `RM * RTO` after the last transmit.
pub const DEFAULT_RM: u32 = 16;
/// Transaction timeout on reliable transports (RFC 5389 §7.2.2).
pub const DEFAULT_TI: Duration = Duration::from_millis(39_500);

/// An outgoing datagram produced by the pool.
#[derive(Debug)]
pub struct Transmit {
    pub now: Instant,
    pub remote: SocketAddr,
    pub payload: BytesMut,
}

#[derive(Debug)]
pub enum TransactionResult {
    /// A success or error response arrived from the expected source.
    Response(Message),
    /// All transmits and the final wait elapsed without a response.
    Timeout,
}

#[derive(Debug)]
pub struct TransactionEvent {
    pub id: TransactionId,
    pub result: TransactionResult,
}

struct Transaction {
    id: TransactionId,
    raw: BytesMut,
    to: SocketAddr,
    /// Reliable transports never retransmit; the transport does.
    reliable: bool,
    tries: u32,
    interval: Duration,
    last_interval: Duration,
    deadline: Instant,
}

/// Keeps every in-flight request of one transport, retransmitting on the
/// RFC 5389 schedule and routing responses back by transaction id.
pub struct TransactionPool {
    rto: Duration,
    rc: u32,
    transactions: HashMap<TransactionId, Transaction>,
    transmits: VecDeque<Transmit>,
    events: VecDeque<TransactionEvent>,
}

impl Default for TransactionPool {
    fn default() -> Self {
        TransactionPool::new()
    }
}

impl TransactionPool {
    pub fn new() -> Self {
        TransactionPool {
            rto: DEFAULT_RTO,
            rc: DEFAULT_RC,
            transactions: HashMap::new(),
            transmits: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    /// Overrides the initial retransmission timeout.
    pub fn with_rto(mut self, rto: Duration) -> Self {
        self.rto = rto;
        self
    }

    /// Starts an unreliable-transport transaction: transmits now and
    /// retransmits with doubling intervals until `DEFAULT_RC` transmits,
    /// then waits `DEFAULT_RM * RTO` before reporting a timeout.
    pub fn start(
        &mut self,
        id: TransactionId,
        raw: BytesMut,
        to: SocketAddr,
        now: Instant,
    ) -> Result<()> {
        if self.transactions.contains_key(&id) {
            return Err(Error::ErrTransactionExists);
        }

        self.transmits.push_back(Transmit {
            now,
            remote: to,
            payload: raw.clone(),
        });

        self.transactions.insert(
            id,
            Transaction {
                id,
                raw,
                to,
                reliable: false,
                tries: 1,
                interval: self.rto * 2,
                last_interval: self.rto * DEFAULT_RM,
                deadline: now + self.rto,
            },
        );

        Ok(())
    }

    /// Starts a reliable-transport transaction: a single transmit with a
    /// flat `DEFAULT_TI` deadline.
    pub fn start_reliable(
        &mut self,
        id: TransactionId,
        raw: BytesMut,
        to: SocketAddr,
        now: Instant,
    ) -> Result<()> {
        if self.transactions.contains_key(&id) {
            return Err(Error::ErrTransactionExists);
        }

        self.transmits.push_back(Transmit {
            now,
            remote: to,
            payload: raw.clone(),
        });

        self.transactions.insert(
            id,
            Transaction {
                id,
                raw,
                to,
                reliable: true,
                tries: 1,
                interval: Duration::ZERO,
                last_interval: Duration::ZERO,
                deadline: now + DEFAULT_TI,
            },
        );

        Ok(())
    }

    /// Aborts a transaction without emitting anything. A late response for
    /// the id is silently swallowed by `handle_read` returning false.
    pub fn cancel(&mut self, id: TransactionId) {
        self.transactions.remove(&id);
    }

    pub fn has(&self, id: TransactionId) -> bool {
        self.transactions.contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Drops every in-flight transaction.
    pub fn clear(&mut self) {
        self.transactions.clear();
    }

    pub fn poll_transmit(&mut self) -> Option<Transmit> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<TransactionEvent> {
        self.events.pop_front()
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        self.transactions.values().map(|t| t.deadline).min()
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        let mut expired = vec![];
        for t in self.transactions.values_mut() {
            if t.deadline > now {
                continue;
            }
            if t.reliable || t.tries >= self.rc {
                expired.push(t.id);
                continue;
            }

            t.tries += 1;
            if t.tries == self.rc {
                t.deadline = now + t.last_interval;
            } else {
                t.deadline = now + t.interval;
                t.interval *= 2;
            }

            log::trace!("stun transaction {} to {} retransmit #{}", t.id, t.to, t.tries);
            self.transmits.push_back(Transmit {
                now,
                remote: t.to,
                payload: t.raw.clone(),
            });
        }

        for id in expired {
            self.transactions.remove(&id);
            self.events.push_back(TransactionEvent {
                id,
                result: TransactionResult::Timeout,
            });
        }
    }

    /// Offers an incoming datagram to the pool. Returns true when it was a
    /// response for an in-flight transaction from the expected source and
    /// has been consumed; any other packet is left for the caller.
    pub fn handle_read(&mut self, buf: &[u8], from: SocketAddr) -> Result<bool> {
        if !crate::is_message(buf) {
            return Ok(false);
        }

        let mut msg = Message::new();
        msg.raw = buf.to_vec();
        msg.decode()?;

        if msg.typ.class != CLASS_SUCCESS_RESPONSE && msg.typ.class != CLASS_ERROR_RESPONSE {
            return Ok(false);
        }

        match self.transactions.get(&msg.transaction_id) {
            Some(t) if t.to == from => {}
            _ => return Ok(false),
        }

        let id = msg.transaction_id;
        self.transactions.remove(&id);
        self.events.push_back(TransactionEvent {
            id,
            result: TransactionResult::Response(msg),
        });
        Ok(true)
    }
}
