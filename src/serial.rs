//! Random certificate serial numbers.
//!
//! Serials are 160-bit values drawn from the thread-local CSPRNG, so every
//! value lies in `[0, 2^160)`. Nothing is persisted; uniqueness rests on the
//! size of the space.

use std::fmt;

use der::{Decode, Encode, asn1::UintRef};
use rand::RngCore;
use x509_cert::serial_number::SerialNumber;

use crate::error::Result;

/// A certificate serial number, stored as 20 big-endian bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Serial([u8; Serial::LEN]);

impl Serial {
    pub const LEN: usize = 20;

    pub fn from_bytes(bytes: [u8; Serial::LEN]) -> Self {
        Serial(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Serial::LEN] {
        &self.0
    }

    /// Encodes the serial as a non-negative DER INTEGER.
    ///
    /// Values with the top bit set need a leading zero octet, giving 21
    /// content octets. `SerialNumber::new` refuses those, so the value is
    /// routed through the decoder, which accepts them.
    pub fn to_serial_number(&self) -> Result<SerialNumber> {
        let encoded = UintRef::new(&self.0)?.to_der()?;
        Ok(SerialNumber::from_der(&encoded)?)
    }
}

impl fmt::Display for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex(&self.0))
    }
}

/// Lowercase hex, as serials and key identifiers appear in logs.
pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Draws a fresh serial number.
pub fn next_serial() -> Serial {
    let mut bytes = [0u8; Serial::LEN];
    rand::rng().fill_bytes(&mut bytes);
    Serial(bytes)
}
