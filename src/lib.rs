#![cfg_attr(not(test), no_std)]

//! Car key-fob access-control firmware core: framed, CRC-checked UART
//! messaging with a per-link ECDH + AES-192-CBC session layer, and the
//! pair / enable-feature / unlock transactions on top of it.
//!
//! The protocol core is hardware-free and tests on the host; the `board`
//! feature pulls in the TM4C123 LaunchPad layer and the `car`/`fob`
//! binaries.

pub mod car;
pub mod command;
pub mod crypto;
pub mod fob;
pub mod framing;
pub mod hal;
pub mod link;
pub mod secrets;
pub mod state;

#[cfg(feature = "board")]
pub mod driverlib;
#[cfg(feature = "board")]
pub mod tiva;

#[cfg(feature = "board")]
pub use tiva::board::Board;

/// Sets up the LaunchPad board. This includes setting up all the
/// peripherals we use: EEPROM, the two UARTs, flash, and GPIO.
#[cfg(feature = "board")]
pub fn setup_board() -> Board {
    let board = Board::new();
    driverlib::init_system();
    board
}

/// Converts an array of u8 to an array of u32
pub fn bytes_to_words(bytes: &[u8], words: &mut [u32]) {
    assert!(bytes.len() % 4 == 0 && words.len() * 4 == bytes.len());
    for i in 0..words.len() {
        words[i] = u32::from_ne_bytes(bytes[i * 4..(i + 1) * 4].try_into().unwrap());
    }
}

/// Converts an array of u32 to an array of u8
pub fn words_to_bytes(words: &[u32], bytes: &mut [u8]) {
    assert!(bytes.len() % 4 == 0 && words.len() * 4 == bytes.len());
    for i in 0..words.len() {
        bytes[i * 4..(i + 1) * 4].copy_from_slice(&words[i].to_ne_bytes());
    }
}

/// Pass directly to hprintln if we are in a debug firmware build.
/// Otherwise, do nothing.
#[macro_export]
macro_rules! log {
    ($($arg:tt)*) => {
        #[cfg(feature = "board")]
        if cfg!(debug_assertions) {
            use cortex_m_semihosting::hprintln;
            hprintln!($($arg)*).unwrap();
        }
    }
}

/// Hashes a message using SHA-256.
#[cfg(feature = "board")]
pub fn sha256(message: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hash = Sha256::new();
    hash.update(message);
    hash.finalize().into()
}

/// Reads all of SRAM and hashes it to get a 32-byte entropy value.
#[cfg(feature = "board")]
pub fn get_ram_entropy() -> [u8; 32] {
    let memory: &[u8];
    unsafe {
        memory = core::slice::from_raw_parts(0x2000_0000 as *const u8, 0x0000_8000);
    }
    sha256(memory)
}

/// Gets 1024 rounds of temperature-sensor samples and hashes them to get a
/// 32-byte entropy value.
#[cfg(feature = "board")]
pub fn get_temp_entropy() -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut samples = [0u32; 8];
    let mut hash = Sha256::new();
    for _ in 0..1024 {
        driverlib::get_temp_samples(&mut samples);
        hash.update(samples.map(|x| x as u8));
    }
    hash.finalize().into()
}

/// Gets 128 samples from the tick timer and hashes them to get a 32-byte
/// entropy value.
#[cfg(feature = "board")]
pub fn get_timer_entropy() -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hash = Sha256::new();
    for _ in 0..128 {
        hash.update(driverlib::get_tick_timer().to_ne_bytes())
    }
    hash.finalize().into()
}

/// Combines the entropy from the RAM, temperature sensor, and tick timer
/// into the 32-byte seed for the session RNG.
#[cfg(feature = "board")]
pub fn get_combined_entropy() -> [u8; 32] {
    let ram_entropy = get_ram_entropy();
    let temp_entropy = get_temp_entropy();
    let timer_entropy = get_timer_entropy();
    core::array::from_fn(|i| ram_entropy[i] ^ temp_entropy[i] ^ timer_entropy[i])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_conversions_round_trip() {
        let bytes = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let mut words = [0u32; 2];
        bytes_to_words(&bytes, &mut words);
        let mut back = [0u8; 8];
        words_to_bytes(&words, &mut back);
        assert_eq!(bytes, back);
    }
}
