//! Car-side dispatch: the board link accepts exactly one operation,
//! `UNLOCK_CAR`, and the host link is write-only (banner output and the
//! textual refusal). Anything else on an established board session is
//! permissively ACKed and the session ends.

use rand_chacha::rand_core::{CryptoRng, RngCore};

use crate::command::{Command, CAR_ID_LEN};
use crate::crypto::BLOCK_LEN;
use crate::framing::MAX_FRAME;
use crate::hal::{Eeprom, Uart};
use crate::link::{Error, Link};
use crate::state::{feature_banner_loc, BANNER_LEN, UNLOCK_EEPROM_LOC};

/// Emitted on the host link when the presented unlock token does not match
/// this car.
pub const HOST_REFUSAL: &[u8] = b"Car is not happy :(\n";

pub struct Car<H: Uart, B: Uart, E: Eeprom, R: RngCore + CryptoRng> {
    host: Link<H>,
    board: Link<B>,
    eeprom: E,
    rng: R,
    car_id: [u8; CAR_ID_LEN],
}

impl<H: Uart, B: Uart, E: Eeprom, R: RngCore + CryptoRng> Car<H, B, E, R> {
    pub fn new(host: H, board: B, eeprom: E, rng: R, car_id: [u8; CAR_ID_LEN]) -> Self {
        Car {
            host: Link::new(host),
            board: Link::new(board),
            eeprom,
            rng,
            car_id,
        }
    }

    /// Feed at most one board-link byte. `Some` reports the outcome of a
    /// completed command for the caller's status LEDs.
    pub fn poll_board(&mut self) -> Option<Result<(), Error>> {
        let mut scratch = [0u8; MAX_FRAME];
        let len = self.board.poll(&mut scratch)?;
        self.on_board_frame(&mut scratch[..len])
    }

    fn on_board_frame(&mut self, payload: &mut [u8]) -> Option<Result<(), Error>> {
        if !self.board.established() {
            // Only a handshake open is meaningful here; anything else,
            // a stray NACK included, gets one NACK back.
            let result = match Command::from_byte(payload[0]) {
                Some(Command::NewEcdh) => {
                    let r = self.board.respond_handshake(payload, &mut self.rng);
                    if r.is_err() {
                        self.board.send_nack(&mut self.rng);
                    }
                    r
                }
                _ => {
                    self.board.send_nack(&mut self.rng);
                    Err(Error::UnexpectedCommand)
                }
            };
            return Some(result);
        }

        if payload.len() % BLOCK_LEN != 0 {
            return None;
        }
        if self.board.decrypt(payload).is_err() {
            return None;
        }
        Some(self.dispatch(payload))
    }

    fn dispatch(&mut self, payload: &[u8]) -> Result<(), Error> {
        match Command::from_byte(payload[0]) {
            Some(Command::UnlockCar) => self.unlock(payload),
            _ => {
                // Reference behavior: everything else, NACK included, gets
                // an ACK for diagnostic responsiveness and the session ends.
                self.board.send_ack(&mut self.rng);
                self.board.teardown();
                Ok(())
            }
        }
    }

    /// Validate the unlock token and dump the banner plus one feature
    /// banner per set bit, in bit order, to the host. One-shot: the session
    /// ends whatever the outcome.
    fn unlock(&mut self, payload: &[u8]) -> Result<(), Error> {
        if payload.len() < 1 + CAR_ID_LEN + 1 {
            self.board.send_nack(&mut self.rng);
            return Err(Error::WrongSizeForCommand);
        }
        if payload[1..1 + CAR_ID_LEN] != self.car_id {
            self.host.uart.write(HOST_REFUSAL);
            self.board.teardown();
            return Err(Error::CarIdMismatch);
        }

        let feature_bits = payload[1 + CAR_ID_LEN];
        let mut banner = [0u8; BANNER_LEN];
        self.eeprom.read(&mut banner, UNLOCK_EEPROM_LOC);
        self.host.uart.write(&banner);
        for feature in 0..crate::command::NUM_FEATURES {
            if feature_bits & (1 << feature) != 0 {
                self.eeprom.read(&mut banner, feature_banner_loc(feature));
                self.host.uart.write(&banner);
            }
        }
        self.board.teardown();
        Ok(())
    }
}
