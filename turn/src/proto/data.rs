use shared::error::Result;

use stun::attributes::ATTR_DATA;
use stun::message::{Getter, Message, Setter};

/// DATA attribute (RFC 8656 §18.5): the application payload carried by
/// Send and Data indications.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Data(pub Vec<u8>);

impl Setter for Data {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        m.add(ATTR_DATA, &self.0);
        Ok(())
    }
}

impl Getter for Data {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        self.0 = m.get(ATTR_DATA)?;
        Ok(())
    }
}
