//! The closed command set carried in the first payload byte of every frame,
//! plus the field widths of the later protocol revision (48-byte ECDH
//! publics, 32-byte wire PIN field, 48-byte feature blob). Earlier-revision
//! sizes fail the length checks and are rejected.

use crate::crypto::{ECDH_PUBLIC_LEN, IV_LEN};

/// Car identifier carried in `UNLOCK_CAR` and stored per device.
pub const CAR_ID_LEN: usize = 16;
/// Car-unlock secret transferred during pairing and presented on unlock.
pub const CAR_SECRET_LEN: usize = 16;
/// PIN field as transported on the wire (28-byte hash padded to 32).
pub const WIRE_PIN_LEN: usize = 32;
/// Stored PIN field: the first 16 bytes of the wire field.
pub const STORED_PIN_LEN: usize = 16;
/// Encrypted feature package from the host tooling.
pub const FEATURE_BLOB_LEN: usize = 48;
/// Feature numbers select bits 0..=2 of the feature bitfield.
pub const NUM_FEATURES: u8 = 3;

/// Full payload of `NEW_ECDH`: command, public point, session IV.
pub const NEW_ECDH_LEN: usize = 1 + ECDH_PUBLIC_LEN + IV_LEN;
/// Full payload of `RETURN_ECDH`: command, public point.
pub const RETURN_ECDH_LEN: usize = 1 + ECDH_PUBLIC_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Handshake open: initiator's public point and the session IV.
    NewEcdh = 0xAB,
    /// Handshake close: responder's public point.
    ReturnEcdh = 0xE0,
    /// Host asks a paired fob to accept the pairing transaction.
    PairPairedEnter = 0x4D,
    /// Host hands an unpaired fob the hashed PIN; the fob drives the rest.
    PairUnpairedStart = 0x50,
    /// Unpaired fob presents the PIN field to the paired fob.
    GetSecret = 0x47,
    /// Paired fob releases the car secret after a PIN match.
    ReturnSecret = 0x52,
    /// Host delivers an encrypted feature package to a paired fob.
    EnableFeature = 0x45,
    /// Fob presents the car secret and feature bitfield to the car.
    UnlockCar = 0x55,
    Ack = 0x41,
    Nack = 0xAA,
}

impl Command {
    pub fn from_byte(byte: u8) -> Option<Command> {
        Some(match byte {
            0xAB => Command::NewEcdh,
            0xE0 => Command::ReturnEcdh,
            0x4D => Command::PairPairedEnter,
            0x50 => Command::PairUnpairedStart,
            0x47 => Command::GetSecret,
            0x52 => Command::ReturnSecret,
            0x45 => Command::EnableFeature,
            0x55 => Command::UnlockCar,
            0x41 => Command::Ack,
            0xAA => Command::Nack,
            _ => return None,
        })
    }

    /// The two handshake commands travel in cleartext and are exempt from
    /// the pad-to-16 rule; everything else is encrypted.
    pub fn is_handshake(self) -> bool {
        matches!(self, Command::NewEcdh | Command::ReturnEcdh)
    }
}
