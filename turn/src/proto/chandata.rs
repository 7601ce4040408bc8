use shared::error::{Error, Result};

use super::channum::{ChannelNumber, MAX_CHANNEL_NUMBER, MIN_CHANNEL_NUMBER};

/// ChannelData header: 2-byte channel number plus 2-byte payload length.
pub const CHANNEL_DATA_HEADER_SIZE: usize = 4;

/// The length field must leave room for the header in a 16-bit datagram.
pub const MAX_CHANNEL_DATA_LENGTH: usize = u16::MAX as usize - CHANNEL_DATA_HEADER_SIZE;

/// A ChannelData message (RFC 8656 §12.4): the 4-byte framing used once a
/// channel is bound, replacing the 36-byte Send/Data indication overhead.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChannelData {
    pub number: ChannelNumber,
    pub data: Vec<u8>,
    pub raw: Vec<u8>,
}

impl ChannelData {
    /// Whether the buffer starts like a ChannelData message: the first two
    /// bits are 0b01, i.e. the first byte falls in the channel range.
    pub fn is_channel_data(buf: &[u8]) -> bool {
        if buf.len() < CHANNEL_DATA_HEADER_SIZE {
            return false;
        }
        let number = u16::from_be_bytes([buf[0], buf[1]]);
        (MIN_CHANNEL_NUMBER..=MAX_CHANNEL_NUMBER).contains(&number)
    }

    /// Encodes without padding, the datagram-transport form.
    pub fn encode(&mut self) -> Result<()> {
        if self.data.len() > MAX_CHANNEL_DATA_LENGTH {
            return Err(Error::ErrInvalidChannelDataLength);
        }
        if !self.number.valid() {
            return Err(Error::ErrChannelNumberOutOfRange);
        }
        self.raw.clear();
        self.raw.extend_from_slice(&self.number.0.to_be_bytes());
        self.raw
            .extend_from_slice(&(self.data.len() as u16).to_be_bytes());
        self.raw.extend_from_slice(&self.data);
        Ok(())
    }

    /// Encodes with the payload padded to a 4-byte boundary, as required on
    /// stream transports.
    pub fn encode_padded(&mut self) -> Result<()> {
        self.encode()?;
        while self.raw.len() % 4 != 0 {
            self.raw.push(0);
        }
        Ok(())
    }

    /// Parses `raw`; tolerates trailing padding after the payload.
    pub fn decode(&mut self) -> Result<()> {
        if self.raw.len() < CHANNEL_DATA_HEADER_SIZE {
            return Err(Error::ErrInvalidChannelDataLength);
        }
        let number = ChannelNumber(u16::from_be_bytes([self.raw[0], self.raw[1]]));
        if !number.valid() {
            return Err(Error::ErrChannelNumberOutOfRange);
        }
        let len = u16::from_be_bytes([self.raw[2], self.raw[3]]) as usize;
        if CHANNEL_DATA_HEADER_SIZE + len > self.raw.len() {
            return Err(Error::ErrInvalidChannelDataLength);
        }
        self.number = number;
        self.data = self.raw[CHANNEL_DATA_HEADER_SIZE..CHANNEL_DATA_HEADER_SIZE + len].to_vec();
        Ok(())
    }
}
