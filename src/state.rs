//! Persistent device state: the fob's flash-backed pairing record and the
//! car's EEPROM layout.

use crate::command::{CAR_SECRET_LEN, STORED_PIN_LEN};

/// Flash address of the fob state page.
pub const FOB_STATE_PTR: u32 = 0x3FC00;

/// Raw image: paired flag, stored PIN, car secret, feature bitfield, padded
/// up to a word multiple for the flash programmer.
pub const FOB_IMAGE_LEN: usize = 36;

pub const PAIRED_MAGIC: u8 = 0xAB;
pub const UNPAIRED_MAGIC: u8 = 0xFF;

// Car EEPROM layout. The unlock banner sits in the last 64 bytes; feature
// banners are stacked directly below it, highest feature first.
pub const UNLOCK_EEPROM_LOC: u32 = 0x7C0;
pub const BANNER_LEN: usize = 64;
// The two AES keys provisioned at the bottom of EEPROM, loaded into
// contexts at boot.
pub const FEATURE_KEY_LOC: u32 = 0x00;
pub const PIN_KEY_LOC: u32 = 0x20;

/// EEPROM offset of the banner for feature bit `i`.
pub fn feature_banner_loc(feature: u8) -> u32 {
    UNLOCK_EEPROM_LOC - (feature as u32 + 1) * BANNER_LEN as u32
}

/// The fob's pairing record as held in RAM and mirrored to flash on commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FobState {
    paired: bool,
    pub encrypted_pin: [u8; STORED_PIN_LEN],
    pub car_secret: [u8; CAR_SECRET_LEN],
    pub feature_bitfield: u8,
}

impl FobState {
    pub fn is_paired(&self) -> bool {
        self.paired
    }

    /// Mark the record paired; callers install the PIN and secret first.
    pub fn set_paired(&mut self) {
        self.paired = true;
    }

    /// Decode a flash image. Erased flash (all `0xFF`) decodes to an
    /// unpaired record with the `0xFF` feature bitfield the first-boot
    /// remap turns into 0.
    pub fn from_image(image: &[u8; FOB_IMAGE_LEN]) -> Self {
        let mut encrypted_pin = [0u8; STORED_PIN_LEN];
        let mut car_secret = [0u8; CAR_SECRET_LEN];
        encrypted_pin.copy_from_slice(&image[1..1 + STORED_PIN_LEN]);
        car_secret.copy_from_slice(&image[17..17 + CAR_SECRET_LEN]);
        FobState {
            paired: image[0] == PAIRED_MAGIC,
            encrypted_pin,
            car_secret,
            feature_bitfield: image[33],
        }
    }

    pub fn to_image(&self) -> [u8; FOB_IMAGE_LEN] {
        let mut image = [0u8; FOB_IMAGE_LEN];
        image[0] = if self.paired {
            PAIRED_MAGIC
        } else {
            UNPAIRED_MAGIC
        };
        image[1..1 + STORED_PIN_LEN].copy_from_slice(&self.encrypted_pin);
        image[17..17 + CAR_SECRET_LEN].copy_from_slice(&self.car_secret);
        image[33] = self.feature_bitfield;
        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erased_flash_reads_as_unpaired() {
        let state = FobState::from_image(&[0xFF; FOB_IMAGE_LEN]);
        assert!(!state.is_paired());
        assert_eq!(state.feature_bitfield, 0xFF);
    }

    #[test]
    fn image_round_trip() {
        let mut state = FobState::from_image(&[0xFF; FOB_IMAGE_LEN]);
        state.set_paired();
        state.encrypted_pin = [0x51; STORED_PIN_LEN];
        state.car_secret = [0xC5; CAR_SECRET_LEN];
        state.feature_bitfield = 0b101;

        let image = state.to_image();
        assert_eq!(image[0], PAIRED_MAGIC);
        assert_eq!(FobState::from_image(&image), state);
    }

    #[test]
    fn feature_banners_stack_below_the_unlock_banner() {
        assert_eq!(feature_banner_loc(0), 0x780);
        assert_eq!(feature_banner_loc(1), 0x740);
        assert_eq!(feature_banner_loc(2), 0x700);
    }
}
