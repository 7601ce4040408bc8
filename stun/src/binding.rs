#[cfg(test)]
mod binding_test;

use std::net::SocketAddr;
use std::time::Instant;

use bytes::BytesMut;
use shared::error::{Error, Result};

use crate::attributes::{
    FlagAttribute, U32Attribute, U64Attribute, ATTR_ICE_CONTROLLED, ATTR_ICE_CONTROLLING,
    ATTR_PRIORITY, ATTR_USE_CANDIDATE,
};
use crate::error_code::{ErrorCodeAttribute, CODE_ROLE_CONFLICT};
use crate::fingerprint::FINGERPRINT;
use crate::integrity::MessageIntegrity;
use crate::message::{
    Getter, Message, Setter, TransactionId, BINDING_REQUEST, CLASS_ERROR_RESPONSE,
};
use crate::textattrs::{software, username};
use crate::transaction::{TransactionEvent, TransactionPool, TransactionResult};
use crate::xoraddr::{MappedAddress, XorMappedAddress};

/// How a Binding transaction failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    /// Could not even build or send the request.
    Generic,
    /// No response within the full retransmission schedule.
    Timeout,
    /// The server answered with an error response.
    Rejected { code: u16, reason: String },
    /// The response failed validation or could not be parsed.
    Protocol,
    /// Error 487: our ICE role disagrees with the peer; the caller should
    /// switch roles and retry.
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingOutcome {
    /// The mapped address the server saw.
    Success(SocketAddr),
    Failed(BindingError),
}

/// A short-lived STUN Binding client over a caller-supplied
/// [TransactionPool]: discovers the reflexive address of the socket and
/// doubles as the probe for ICE connectivity checks.
#[derive(Debug, Default)]
pub struct BindingTransaction {
    st_username: String,
    st_password: String,
    fingerprint_required: bool,
    ice_controlling: Option<u64>,
    ice_controlled: Option<u64>,
    use_candidate: bool,
    priority: Option<u32>,
    client_software: String,

    id: Option<TransactionId>,
}

impl BindingTransaction {
    pub fn new() -> Self {
        BindingTransaction::default()
    }

    /// Short-term credentials; the password keys MESSAGE-INTEGRITY.
    pub fn set_short_term_credentials(&mut self, user: impl Into<String>, pass: impl Into<String>) {
        self.st_username = user.into();
        self.st_password = pass.into();
    }

    pub fn set_fingerprint_required(&mut self, required: bool) {
        self.fingerprint_required = required;
    }

    /// Marks us the controlling agent; clears any controlled tiebreaker.
    pub fn set_ice_controlling(&mut self, tiebreak: u64) {
        self.ice_controlling = Some(tiebreak);
        self.ice_controlled = None;
    }

    /// Marks us the controlled agent; clears any controlling tiebreaker.
    pub fn set_ice_controlled(&mut self, tiebreak: u64) {
        self.ice_controlled = Some(tiebreak);
        self.ice_controlling = None;
    }

    pub fn set_use_candidate(&mut self, enabled: bool) {
        self.use_candidate = enabled;
    }

    pub fn set_priority(&mut self, priority: u32) {
        self.priority = Some(priority);
    }

    pub fn set_software(&mut self, s: impl Into<String>) {
        self.client_software = s.into();
    }

    pub fn is_started(&self) -> bool {
        self.id.is_some()
    }

    pub fn owns(&self, id: TransactionId) -> bool {
        self.id == Some(id)
    }

    /// Builds the Binding request and hands it to the pool. `addr` is the
    /// STUN server for reflexive discovery, or the pinned peer address when
    /// used as an ICE connectivity check.
    pub fn start(
        &mut self,
        pool: &mut TransactionPool,
        addr: SocketAddr,
        now: Instant,
    ) -> Result<()> {
        if self.id.is_some() {
            return Err(Error::ErrBindingStarted);
        }

        let id = TransactionId::new();
        let mut setters: Vec<Box<dyn Setter>> = vec![Box::new(id), Box::new(BINDING_REQUEST)];

        if !self.client_software.is_empty() {
            setters.push(Box::new(software(self.client_software.clone())));
        }
        if let Some(p) = self.priority {
            setters.push(Box::new(U32Attribute::new(ATTR_PRIORITY, p)));
        }
        if self.use_candidate {
            setters.push(Box::new(FlagAttribute {
                typ: ATTR_USE_CANDIDATE,
            }));
        }
        if let Some(t) = self.ice_controlling {
            setters.push(Box::new(U64Attribute::new(ATTR_ICE_CONTROLLING, t)));
        }
        if let Some(t) = self.ice_controlled {
            setters.push(Box::new(U64Attribute::new(ATTR_ICE_CONTROLLED, t)));
        }
        if !self.st_username.is_empty() {
            setters.push(Box::new(username(self.st_username.clone())));
            setters.push(Box::new(MessageIntegrity::new_short_term_integrity(
                self.st_password.clone(),
            )));
        }
        setters.push(Box::new(FINGERPRINT));

        let mut msg = Message::new();
        msg.build(&setters)?;

        pool.start(id, BytesMut::from(&msg.raw[..]), addr, now)?;
        self.id = Some(id);
        Ok(())
    }

    /// Aborts the transaction; a late response is swallowed by the pool.
    pub fn cancel(&mut self, pool: &mut TransactionPool) {
        if let Some(id) = self.id.take() {
            pool.cancel(id);
        }
    }

    /// Offers a pool event to this transaction. Returns the outcome when
    /// the event belongs to it, None otherwise.
    pub fn handle_event(&mut self, ev: &TransactionEvent) -> Option<BindingOutcome> {
        if self.id != Some(ev.id) {
            return None;
        }
        self.id = None;

        let msg = match &ev.result {
            TransactionResult::Timeout => {
                return Some(BindingOutcome::Failed(BindingError::Timeout));
            }
            TransactionResult::Response(msg) => msg,
        };

        Some(self.process_response(msg))
    }

    fn process_response(&self, msg: &Message) -> BindingOutcome {
        if self.fingerprint_required && FINGERPRINT.check(msg).is_err() {
            return BindingOutcome::Failed(BindingError::Protocol);
        }

        if msg.typ.class == CLASS_ERROR_RESPONSE {
            let mut code = ErrorCodeAttribute::default();
            if code.get_from(msg).is_err() {
                return BindingOutcome::Failed(BindingError::Protocol);
            }
            if code.code == CODE_ROLE_CONFLICT {
                return BindingOutcome::Failed(BindingError::Conflict);
            }
            return BindingOutcome::Failed(BindingError::Rejected {
                code: code.code,
                reason: code.reason,
            });
        }

        if !self.st_password.is_empty() {
            let integrity = MessageIntegrity::new_short_term_integrity(self.st_password.clone());
            if integrity.check(msg).is_err() {
                return BindingOutcome::Failed(BindingError::Protocol);
            }
        }

        let mut xor_addr = XorMappedAddress::default();
        if xor_addr.get_from(msg).is_ok() {
            return BindingOutcome::Success(SocketAddr::new(xor_addr.ip, xor_addr.port));
        }

        // Pre-RFC-5389 servers answer with plain MAPPED-ADDRESS.
        let mut addr = MappedAddress::default();
        if addr.get_from(msg).is_ok() {
            return BindingOutcome::Success(SocketAddr::new(addr.ip, addr.port));
        }

        BindingOutcome::Failed(BindingError::Protocol)
    }
}
