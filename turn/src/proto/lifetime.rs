use std::time::Duration;

use shared::error::{Error, Result};

use stun::attributes::ATTR_LIFETIME;
use stun::message::{Getter, Message, Setter};

/// The lifetime a server grants when the request carries none.
pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(600);

/// LIFETIME attribute (RFC 8656 §18.6), whole seconds on the wire.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Lifetime(pub Duration);

impl Setter for Lifetime {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(ATTR_LIFETIME, &(self.0.as_secs() as u32).to_be_bytes());
        Ok(())
    }
}

impl Getter for Lifetime {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        let v = m.get(ATTR_LIFETIME)?;
        if v.len() != 4 {
            return Err(Error::ErrAttributeSizeInvalid);
        }
        self.0 = Duration::from_secs(u32::from_be_bytes([v[0], v[1], v[2], v[3]]) as u64);
        Ok(())
    }
}
