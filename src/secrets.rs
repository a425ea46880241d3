//! Factory-provisioned per-device constants. The deployment tooling
//! rewrites this file when building a real car/fob pair; the values below
//! are bench-test placeholders.

use crate::command::{CAR_ID_LEN, CAR_SECRET_LEN, STORED_PIN_LEN};

/// 16-byte car identifier shared between a car and its paired fobs.
pub const CAR_ID: [u8; CAR_ID_LEN] = [
    0x55, 0x4E, 0x48, 0x2D, 0x43, 0x41, 0x52, 0x2D, 0x30, 0x30, 0x30, 0x31, 0x00, 0x00, 0x00, 0x00,
];

/// Stored form of the pairing PIN (first 16 bytes of the encrypted PIN
/// field) for factory-paired fob builds.
pub const PAIR_PIN: [u8; STORED_PIN_LEN] = [
    0x8A, 0x13, 0x77, 0x02, 0xC4, 0x5E, 0x21, 0xB9, 0x0D, 0x66, 0xF0, 0x3B, 0x94, 0xE7, 0x58, 0x2C,
];

/// Car-unlock secret for factory-paired fob builds.
pub const CAR_SECRET: [u8; CAR_SECRET_LEN] = [
    0x3F, 0xA2, 0x19, 0x8B, 0x60, 0xDD, 0x04, 0x71, 0xCE, 0x52, 0xB8, 0x27, 0x9A, 0x45, 0xE3, 0x16,
];
