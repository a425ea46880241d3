//! Fob-side command dispatch and the cross-link transaction coordinator.
//!
//! A fob owns two links. The host link is responder-only and carries the
//! three host commands; the board link is either the initiator side of a
//! fob-initiated handshake (pairing continuation, unlock) or the responder
//! side when a peer fob starts pairing. `MessageState` is the single
//! sequencing point between the two: a board-link response is only
//! meaningful relative to the host command that set the state, and the
//! stashed PIN travels inside the pairing variant.

use rand_chacha::rand_core::{CryptoRng, RngCore};

use crate::command::{
    Command, CAR_ID_LEN, CAR_SECRET_LEN, FEATURE_BLOB_LEN, NUM_FEATURES, STORED_PIN_LEN,
    WIRE_PIN_LEN,
};
use crate::crypto::{cbc_decrypt, BLOCK_LEN, IV_LEN, KEY_LEN};
use crate::framing::MAX_FRAME;
use crate::hal::{Eeprom, FlashStore, Uart};
use crate::link::{Error, Link};
use crate::state::{FobState, FEATURE_KEY_LOC, PIN_KEY_LOC};

/// Decrypted feature-package layout: car-ID prefix, PIN field, feature
/// number. The package is encrypted under the feature key with a zero IV.
const BLOB_CAR_ID_LEN: usize = 6;
const BLOB_PIN_OFFSET: usize = 6;
const BLOB_FEATURE_OFFSET: usize = BLOB_PIN_OFFSET + STORED_PIN_LEN;
const BLOB_IV: [u8; IV_LEN] = [0; IV_LEN];

/// Compile-time provisioning for one fob image.
pub struct FobConfig {
    pub car_id: [u8; CAR_ID_LEN],
    pub pair_pin: [u8; STORED_PIN_LEN],
    pub car_secret: [u8; CAR_SECRET_LEN],
    /// Factory-paired build: install the ROM defaults on first boot.
    pub factory_paired: bool,
}

/// Sequencing state for the three multi-hop transactions. Set when this fob
/// initiates a board-link handshake, cleared on completion, on any NACK, and
/// on every terminal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageState {
    Idle,
    /// Pairing in progress on the unpaired side; the PIN field from
    /// `PAIR_UNPAIRED_START` rides along until `RETURN_SECRET` lands.
    WaitingForPairedEcdh { pin: [u8; WIRE_PIN_LEN] },
    /// Unlock in progress; waiting for the car's handshake reply.
    WaitingForCarEcdh,
}

pub struct Fob<H: Uart, B: Uart, F: FlashStore, R: RngCore + CryptoRng> {
    host: Link<H>,
    board: Link<B>,
    flash: F,
    rng: R,
    state: FobState,
    message_state: MessageState,
    feature_key: [u8; KEY_LEN],
    pin_key: [u8; KEY_LEN],
    car_id: [u8; CAR_ID_LEN],
}

impl<H: Uart, B: Uart, F: FlashStore, R: RngCore + CryptoRng> Fob<H, B, F, R> {
    /// Boot path: load the two AES key slots from EEPROM, restore the flash
    /// state, install the factory defaults on a first paired-build boot,
    /// and remap the unprovisioned `0xFF` feature bitfield to zero.
    pub fn new(
        host: H,
        board: B,
        mut flash: F,
        eeprom: &mut impl Eeprom,
        rng: R,
        config: FobConfig,
    ) -> Self {
        let mut feature_key = [0u8; KEY_LEN];
        eeprom.read(&mut feature_key, FEATURE_KEY_LOC);
        let mut pin_key = [0u8; KEY_LEN];
        eeprom.read(&mut pin_key, PIN_KEY_LOC);

        let mut state = FobState::from_image(&flash.load());
        if config.factory_paired && !state.is_paired() {
            state.encrypted_pin = config.pair_pin;
            state.car_secret = config.car_secret;
            state.set_paired();
            let _ = flash.commit(&state.to_image());
        }
        if state.feature_bitfield == 0xFF {
            state.feature_bitfield = 0;
            let _ = flash.commit(&state.to_image());
        }

        Fob {
            host: Link::new(host),
            board: Link::new(board),
            flash,
            rng,
            state,
            message_state: MessageState::Idle,
            feature_key,
            pin_key,
            car_id: config.car_id,
        }
    }

    pub fn persistent(&self) -> &FobState {
        &self.state
    }

    pub fn message_state(&self) -> &MessageState {
        &self.message_state
    }

    /// The PIN-encryption key slot, loaded at boot alongside the feature
    /// key. The host tooling encrypts PINs under it; no on-device operation
    /// consumes it.
    pub fn pin_key(&self) -> &[u8; KEY_LEN] {
        &self.pin_key
    }

    /// Feed at most one host-link byte. `Some` reports the outcome of a
    /// completed command for the caller's status LEDs.
    pub fn poll_host(&mut self) -> Option<Result<(), Error>> {
        let mut scratch = [0u8; MAX_FRAME];
        let len = self.host.poll(&mut scratch)?;
        self.on_host_frame(&mut scratch[..len])
    }

    /// Feed at most one board-link byte.
    pub fn poll_board(&mut self) -> Option<Result<(), Error>> {
        let mut scratch = [0u8; MAX_FRAME];
        let len = self.board.poll(&mut scratch)?;
        self.on_board_frame(&mut scratch[..len])
    }

    /// Debounced unlock-button press: start the car handshake (T3). Ignored
    /// unless the fob is paired and no transaction is in flight.
    pub fn button_pressed(&mut self) {
        if !self.state.is_paired() {
            return;
        }
        if self.message_state != MessageState::Idle {
            return;
        }
        self.board.start_handshake(&mut self.rng);
        self.message_state = MessageState::WaitingForCarEcdh;
    }

    fn commit(&mut self, next: FobState) -> Result<(), Error> {
        if !self.flash.commit(&next.to_image()) {
            return Err(Error::StateCommit);
        }
        self.state = next;
        Ok(())
    }

    /// Clear a pending transaction; if it was host-initiated, the failure
    /// propagates as one NACK toward the host.
    fn fail_transaction(&mut self) {
        if matches!(self.message_state, MessageState::WaitingForPairedEcdh { .. }) {
            self.host.send_nack(&mut self.rng);
        }
        self.message_state = MessageState::Idle;
    }

    // --- Host link ---------------------------------------------------------

    fn on_host_frame(&mut self, payload: &mut [u8]) -> Option<Result<(), Error>> {
        if !self.host.established() {
            // Responder-only: the fob never initiates toward the host, so
            // cleartext traffic is either a handshake open or a rejection;
            // any other command here, a stray NACK included, is NACKed.
            let result = match Command::from_byte(payload[0]) {
                Some(Command::NewEcdh) => {
                    let r = self.host.respond_handshake(payload, &mut self.rng);
                    if r.is_err() {
                        self.host.send_nack(&mut self.rng);
                    }
                    r
                }
                _ => {
                    self.host.send_nack(&mut self.rng);
                    Err(Error::UnexpectedCommand)
                }
            };
            return Some(result);
        }

        if payload.len() % BLOCK_LEN != 0 {
            return None;
        }
        if self.host.decrypt(payload).is_err() {
            return None;
        }
        Some(self.dispatch_host(payload))
    }

    fn dispatch_host(&mut self, payload: &[u8]) -> Result<(), Error> {
        match Command::from_byte(payload[0]) {
            Some(Command::PairPairedEnter) => {
                let result = self.handle_pair_enter();
                if result.is_err() {
                    self.host.send_nack(&mut self.rng);
                }
                result
            }
            Some(Command::PairUnpairedStart) => {
                let result = self.handle_pair_start(payload);
                if result.is_err() {
                    self.host.send_nack(&mut self.rng);
                }
                result
            }
            Some(Command::EnableFeature) => {
                let result = self.handle_enable_feature(payload);
                match result {
                    Ok(()) => self.host.send_ack(&mut self.rng),
                    Err(_) => self.host.send_nack(&mut self.rng),
                }
                result
            }
            _ => {
                // Everything outside the host-link command set NACKs,
                // NACK itself included.
                self.host.send_nack(&mut self.rng);
                Err(Error::UnexpectedCommand)
            }
        }
    }

    /// T1 step 1, paired side: confirm this fob can serve a pairing.
    fn handle_pair_enter(&mut self) -> Result<(), Error> {
        if !self.state.is_paired() {
            return Err(Error::RoleMismatch);
        }
        self.host.send_ack(&mut self.rng);
        Ok(())
    }

    /// T1 step 2, unpaired side: stash the PIN field and open the board-link
    /// handshake toward the paired fob.
    fn handle_pair_start(&mut self, payload: &[u8]) -> Result<(), Error> {
        if self.state.is_paired() {
            return Err(Error::RoleMismatch);
        }
        if payload.len() < 1 + WIRE_PIN_LEN {
            return Err(Error::WrongSizeForCommand);
        }
        let mut pin = [0u8; WIRE_PIN_LEN];
        pin.copy_from_slice(&payload[1..1 + WIRE_PIN_LEN]);
        self.board.start_handshake(&mut self.rng);
        self.message_state = MessageState::WaitingForPairedEcdh { pin };
        Ok(())
    }

    /// T2: decrypt the feature package, check the car-ID prefix and the PIN
    /// field, and set the requested bit.
    fn handle_enable_feature(&mut self, payload: &[u8]) -> Result<(), Error> {
        if !self.state.is_paired() {
            return Err(Error::RoleMismatch);
        }
        if payload.len() < 1 + FEATURE_BLOB_LEN {
            return Err(Error::WrongSizeForCommand);
        }
        let mut blob = [0u8; FEATURE_BLOB_LEN];
        blob.copy_from_slice(&payload[1..1 + FEATURE_BLOB_LEN]);
        cbc_decrypt(&self.feature_key, &BLOB_IV, &mut blob);

        if blob[..BLOB_CAR_ID_LEN] != self.car_id[..BLOB_CAR_ID_LEN] {
            return Err(Error::CarIdMismatch);
        }
        if blob[BLOB_PIN_OFFSET..BLOB_PIN_OFFSET + STORED_PIN_LEN] != self.state.encrypted_pin {
            return Err(Error::PinMismatch);
        }
        let feature = blob[BLOB_FEATURE_OFFSET];
        if feature >= NUM_FEATURES {
            return Err(Error::WrongSizeForCommand);
        }

        let mut next = self.state.clone();
        next.feature_bitfield |= 1 << feature;
        self.commit(next)
    }

    // --- Board link --------------------------------------------------------

    fn on_board_frame(&mut self, payload: &mut [u8]) -> Option<Result<(), Error>> {
        if !self.board.established() {
            return Some(self.board_session_setup(payload));
        }
        if payload.len() % BLOCK_LEN != 0 {
            return None;
        }
        if self.board.decrypt(payload).is_err() {
            return None;
        }
        Some(self.dispatch_board(payload))
    }

    /// Cleartext traffic on an unestablished board link: a peer's handshake
    /// open, the reply to our own, or junk that earns a NACK.
    fn board_session_setup(&mut self, payload: &[u8]) -> Result<(), Error> {
        match Command::from_byte(payload[0]) {
            Some(Command::NewEcdh) => {
                // An inbound handshake stomps whatever we had in flight;
                // fail that transaction toward the host before responding.
                if self.message_state != MessageState::Idle {
                    self.fail_transaction();
                }
                let result = self.board.respond_handshake(payload, &mut self.rng);
                if result.is_err() {
                    self.board.send_nack(&mut self.rng);
                }
                result
            }
            Some(Command::ReturnEcdh) if self.board.handshaking() => {
                let result = self
                    .board
                    .complete_handshake(payload)
                    .and_then(|()| self.continue_transaction());
                if result.is_err() {
                    self.board.send_nack(&mut self.rng);
                    self.fail_transaction();
                }
                result
            }
            _ => {
                // Anything else before establishment, a stray NACK
                // included, is NACKed; a pending transaction dies with it.
                self.board.send_nack(&mut self.rng);
                if self.message_state != MessageState::Idle {
                    self.fail_transaction();
                }
                Err(Error::UnexpectedCommand)
            }
        }
    }

    /// The board session just came up with us as initiator; emit the step
    /// the pending transaction was waiting to send.
    fn continue_transaction(&mut self) -> Result<(), Error> {
        match core::mem::replace(&mut self.message_state, MessageState::Idle) {
            MessageState::WaitingForPairedEcdh { pin } => {
                self.board
                    .send_secure(Command::GetSecret, &pin, &mut self.rng)?;
                // Still waiting for RETURN_SECRET; the PIN stays stashed.
                self.message_state = MessageState::WaitingForPairedEcdh { pin };
                Ok(())
            }
            MessageState::WaitingForCarEcdh => {
                let mut token = [0u8; CAR_SECRET_LEN + 1];
                token[..CAR_SECRET_LEN].copy_from_slice(&self.state.car_secret);
                token[CAR_SECRET_LEN] = self.state.feature_bitfield;
                self.board
                    .send_secure(Command::UnlockCar, &token, &mut self.rng)?;
                // Fire and forget: the fob does not wait for the car.
                self.board.teardown();
                Ok(())
            }
            MessageState::Idle => Err(Error::UnexpectedCommand),
        }
    }

    fn dispatch_board(&mut self, payload: &[u8]) -> Result<(), Error> {
        match Command::from_byte(payload[0]) {
            Some(Command::GetSecret) => {
                let result = self.handle_get_secret(payload);
                if result.is_err() {
                    self.board.send_nack(&mut self.rng);
                }
                result
            }
            Some(Command::ReturnSecret) => self.handle_return_secret(payload),
            Some(Command::Nack) => {
                self.board.teardown();
                self.fail_transaction();
                Ok(())
            }
            _ => {
                self.board.send_nack(&mut self.rng);
                if self.message_state != MessageState::Idle {
                    self.fail_transaction();
                }
                Err(Error::UnexpectedCommand)
            }
        }
    }

    /// T1 step 4, paired side: release the car secret only on an exact
    /// stored-PIN match, then end the one-shot session.
    fn handle_get_secret(&mut self, payload: &[u8]) -> Result<(), Error> {
        if payload.len() < 1 + WIRE_PIN_LEN {
            return Err(Error::WrongSizeForCommand);
        }
        if !self.state.is_paired() {
            return Err(Error::RoleMismatch);
        }
        if payload[1..1 + STORED_PIN_LEN] != self.state.encrypted_pin {
            return Err(Error::PinMismatch);
        }
        let secret = self.state.car_secret;
        self.board
            .send_secure(Command::ReturnSecret, &secret, &mut self.rng)?;
        self.board.teardown();
        Ok(())
    }

    /// T1 step 5, unpaired side: persist the new pairing and report the
    /// outcome to the host. The board session ends with this message.
    fn handle_return_secret(&mut self, payload: &[u8]) -> Result<(), Error> {
        let was_pairing = matches!(self.message_state, MessageState::WaitingForPairedEcdh { .. });
        let result = self.accept_secret(payload);
        self.message_state = MessageState::Idle;
        match result {
            Ok(()) => {
                self.board.teardown();
                self.host.send_ack(&mut self.rng);
            }
            Err(_) => {
                self.board.send_nack(&mut self.rng);
                if was_pairing {
                    self.host.send_nack(&mut self.rng);
                }
            }
        }
        result
    }

    fn accept_secret(&mut self, payload: &[u8]) -> Result<(), Error> {
        if payload.len() < 1 + CAR_SECRET_LEN {
            return Err(Error::WrongSizeForCommand);
        }
        if self.state.is_paired() {
            return Err(Error::RoleMismatch);
        }
        let pin = match &self.message_state {
            MessageState::WaitingForPairedEcdh { pin } => *pin,
            _ => return Err(Error::UnexpectedCommand),
        };

        let mut next = self.state.clone();
        next.encrypted_pin.copy_from_slice(&pin[..STORED_PIN_LEN]);
        next.car_secret.copy_from_slice(&payload[1..1 + CAR_SECRET_LEN]);
        next.set_paired();
        self.commit(next)
    }
}
