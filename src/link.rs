//! Per-link session layer: one ephemeral ECDH agreement per session, an
//! AES-192-CBC context derived from it, and the encrypted send path.
//!
//! Each device owns two links (host and board). A link is `Idle` until a
//! handshake starts, `Handshaking` while its `NEW_ECDH` is in flight, and
//! `Established` once the shared key exists; the key is only reachable in
//! the `Established` variant, so an uninitialized cipher cannot be used.
//! Any NACK sent or received tears the session down.

use rand_chacha::rand_core::{CryptoRng, RngCore};

use crate::command::{Command, NEW_ECDH_LEN, RETURN_ECDH_LEN};
use crate::crypto::{
    cbc_decrypt, cbc_encrypt, EphemeralKey, BLOCK_LEN, ECDH_PUBLIC_LEN, IV_LEN, KEY_LEN,
};
use crate::framing::{write_frame, FrameReceiver, MAX_FRAME};
use crate::hal::Uart;

/// Command-level protocol failures. Each one costs the offending link
/// exactly one NACK and its session; framing-level problems never surface
/// here (the receiver resets silently).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    UnexpectedCommand,
    WrongSizeForCommand,
    /// Peer public bytes that do not decode to a curve point.
    BadPeerKey,
    /// Operation requires a role the device does not have (e.g. a secret
    /// request to an unpaired fob).
    RoleMismatch,
    PinMismatch,
    CarIdMismatch,
    SessionNotEstablished,
    /// Flash commit reported failure; the transaction is NACKed rather
    /// than acknowledged with unsaved state.
    StateCommit,
}

pub enum Session {
    Idle,
    Handshaking {
        key: EphemeralKey,
        iv: [u8; IV_LEN],
    },
    Established {
        key: [u8; KEY_LEN],
        iv: [u8; IV_LEN],
    },
}

/// Scratch large enough for the biggest frame a device transmits
/// (`NEW_ECDH` at 65 bytes, or a padded `GET_SECRET` at 48).
const TX_BUF: usize = 80;

pub struct Link<U: Uart> {
    pub uart: U,
    rx: FrameReceiver,
    session: Session,
}

impl<U: Uart> Link<U> {
    pub fn new(uart: U) -> Self {
        Link {
            uart,
            rx: FrameReceiver::new(),
            session: Session::Idle,
        }
    }

    pub fn established(&self) -> bool {
        matches!(self.session, Session::Established { .. })
    }

    /// Whether this link has a handshake of its own in flight.
    pub fn handshaking(&self) -> bool {
        matches!(self.session, Session::Handshaking { .. })
    }

    /// Discard the session; the derived key is unreachable afterwards.
    pub fn teardown(&mut self) {
        self.session = Session::Idle;
    }

    /// Feed at most one received byte into the framer. Returns the payload
    /// length when that byte completes a valid frame, copied into `scratch`.
    pub fn poll(&mut self, scratch: &mut [u8; MAX_FRAME]) -> Option<usize> {
        if !self.uart.avail() {
            return None;
        }
        let byte = self.uart.read_byte();
        let payload = self.rx.push_byte(byte)?;
        scratch[..payload.len()].copy_from_slice(payload);
        Some(payload.len())
    }

    /// Initiator side: fresh key pair and IV, `NEW_ECDH` on the wire, then
    /// wait for the peer's `RETURN_ECDH`.
    pub fn start_handshake(&mut self, rng: &mut (impl RngCore + CryptoRng)) {
        let key = EphemeralKey::generate(rng);
        let mut iv = [0u8; IV_LEN];
        rng.fill_bytes(&mut iv);

        let mut msg = [0u8; NEW_ECDH_LEN];
        msg[0] = Command::NewEcdh as u8;
        msg[1..1 + ECDH_PUBLIC_LEN].copy_from_slice(&key.public_bytes());
        msg[1 + ECDH_PUBLIC_LEN..].copy_from_slice(&iv);
        write_frame(&mut self.uart, &msg);

        self.session = Session::Handshaking { key, iv };
    }

    /// Responder side: validate the exact `NEW_ECDH` size, adopt the
    /// initiator's IV, derive the key and answer with `RETURN_ECDH`. Any
    /// failure leaves the session torn down for the caller to NACK.
    pub fn respond_handshake(
        &mut self,
        payload: &[u8],
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<(), Error> {
        self.session = Session::Idle;
        if payload.len() != NEW_ECDH_LEN {
            return Err(Error::WrongSizeForCommand);
        }
        let mut peer_public = [0u8; ECDH_PUBLIC_LEN];
        peer_public.copy_from_slice(&payload[1..1 + ECDH_PUBLIC_LEN]);
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&payload[1 + ECDH_PUBLIC_LEN..NEW_ECDH_LEN]);

        let local = EphemeralKey::generate(rng);
        let key = local.agree(&peer_public).ok_or(Error::BadPeerKey)?;

        let mut msg = [0u8; RETURN_ECDH_LEN];
        msg[0] = Command::ReturnEcdh as u8;
        msg[1..].copy_from_slice(&local.public_bytes());
        write_frame(&mut self.uart, &msg);

        self.session = Session::Established { key, iv };
        Ok(())
    }

    /// Initiator side, second half: a `RETURN_ECDH` payload completes the
    /// handshake started on this link. Any failure tears the session down.
    pub fn complete_handshake(&mut self, payload: &[u8]) -> Result<(), Error> {
        match core::mem::replace(&mut self.session, Session::Idle) {
            Session::Handshaking { key, iv } => {
                if payload.len() != RETURN_ECDH_LEN {
                    return Err(Error::WrongSizeForCommand);
                }
                let mut peer_public = [0u8; ECDH_PUBLIC_LEN];
                peer_public.copy_from_slice(&payload[1..RETURN_ECDH_LEN]);
                let key = key.agree(&peer_public).ok_or(Error::BadPeerKey)?;
                self.session = Session::Established { key, iv };
                Ok(())
            }
            _ => Err(Error::SessionNotEstablished),
        }
    }

    /// Decrypt a received payload in place with the session cipher. The
    /// caller has already checked the block-multiple length.
    pub fn decrypt(&mut self, payload: &mut [u8]) -> Result<(), Error> {
        match &self.session {
            Session::Established { key, iv } => {
                cbc_decrypt(key, iv, payload);
                Ok(())
            }
            _ => Err(Error::SessionNotEstablished),
        }
    }

    /// Encrypted transmit path: command byte, data, random padding up to the
    /// next block multiple, CBC under the session key, then framed out.
    pub fn send_secure(
        &mut self,
        cmd: Command,
        data: &[u8],
        rng: &mut (impl RngCore + CryptoRng),
    ) -> Result<(), Error> {
        debug_assert!(!cmd.is_handshake());
        let (key, iv) = match &self.session {
            Session::Established { key, iv } => (*key, *iv),
            _ => return Err(Error::SessionNotEstablished),
        };

        let mut buf = [0u8; TX_BUF];
        buf[0] = cmd as u8;
        buf[1..1 + data.len()].copy_from_slice(data);
        let len = 1 + data.len();
        let padded = len.next_multiple_of(BLOCK_LEN);
        rng.fill_bytes(&mut buf[len..padded]);

        cbc_encrypt(&key, &iv, &mut buf[..padded]);
        write_frame(&mut self.uart, &buf[..padded]);
        Ok(())
    }

    /// One ACK on this link, encrypted when a session exists.
    pub fn send_ack(&mut self, rng: &mut (impl RngCore + CryptoRng)) {
        if self.established() {
            let _ = self.send_secure(Command::Ack, &[], rng);
        } else {
            write_frame(&mut self.uart, &[Command::Ack as u8]);
        }
    }

    /// One NACK on this link, then teardown. A NACK for a failed handshake
    /// necessarily leaves in cleartext; an established peer that receives
    /// it decrypts garbage and tears down through its unexpected-command
    /// path, so both sides still converge.
    pub fn send_nack(&mut self, rng: &mut (impl RngCore + CryptoRng)) {
        if self.established() {
            let _ = self.send_secure(Command::Nack, &[], rng);
        } else {
            write_frame(&mut self.uart, &[Command::Nack as u8]);
        }
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::testutil::{pipe, Endpoint};
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaChaRng;

    fn pump(link: &mut Link<Endpoint>, scratch: &mut [u8; MAX_FRAME]) -> Option<usize> {
        for _ in 0..MAX_FRAME + 1 {
            if let Some(len) = link.poll(scratch) {
                return Some(len);
            }
        }
        None
    }

    fn established_pair() -> (Link<Endpoint>, Link<Endpoint>, ChaChaRng) {
        let (a, b) = pipe();
        let mut initiator = Link::new(a);
        let mut responder = Link::new(b);
        let mut rng = ChaChaRng::from_seed([9; 32]);
        let mut scratch = [0u8; MAX_FRAME];

        initiator.start_handshake(&mut rng);
        assert!(initiator.handshaking());

        let len = pump(&mut responder, &mut scratch).unwrap();
        responder
            .respond_handshake(&scratch[..len], &mut rng)
            .unwrap();
        assert!(responder.established());

        let len = pump(&mut initiator, &mut scratch).unwrap();
        initiator.complete_handshake(&scratch[..len]).unwrap();
        assert!(initiator.established());

        (initiator, responder, rng)
    }

    #[test]
    fn handshake_then_secure_round_trip() {
        let (mut initiator, mut responder, mut rng) = established_pair();
        let mut scratch = [0u8; MAX_FRAME];

        let secret = [0xC5u8; 16];
        initiator
            .send_secure(Command::ReturnSecret, &secret, &mut rng)
            .unwrap();

        let len = pump(&mut responder, &mut scratch).unwrap();
        assert_eq!(len % BLOCK_LEN, 0);
        responder.decrypt(&mut scratch[..len]).unwrap();
        assert_eq!(scratch[0], Command::ReturnSecret as u8);
        assert_eq!(&scratch[1..17], &secret);
    }

    #[test]
    fn ciphertext_hides_the_command_byte() {
        let (mut initiator, mut responder, mut rng) = established_pair();
        let mut scratch = [0u8; MAX_FRAME];

        initiator
            .send_secure(Command::GetSecret, &[0u8; 32], &mut rng)
            .unwrap();
        let len = pump(&mut responder, &mut scratch).unwrap();
        let mut plain = [0u8; 48];
        plain[0] = Command::GetSecret as u8;
        assert_ne!(&scratch[..len], &plain[..]);
    }

    #[test]
    fn responder_rejects_wrong_handshake_size() {
        let (a, _b) = pipe();
        let mut link = Link::new(a);
        let mut rng = ChaChaRng::from_seed([3; 32]);

        // Earlier-revision 16-byte public keys must be rejected.
        let short = [Command::NewEcdh as u8; 1 + 16 + 2];
        assert_eq!(
            link.respond_handshake(&short, &mut rng),
            Err(Error::WrongSizeForCommand)
        );
        assert!(!link.established());
    }

    #[test]
    fn responder_rejects_off_curve_public() {
        let (a, _b) = pipe();
        let mut link = Link::new(a);
        let mut rng = ChaChaRng::from_seed([4; 32]);

        let mut msg = [0xFFu8; NEW_ECDH_LEN];
        msg[0] = Command::NewEcdh as u8;
        assert_eq!(
            link.respond_handshake(&msg, &mut rng),
            Err(Error::BadPeerKey)
        );
        assert!(!link.established());
    }

    #[test]
    fn complete_requires_a_pending_handshake() {
        let (a, _b) = pipe();
        let mut link = Link::new(a);
        let payload = [Command::ReturnEcdh as u8; RETURN_ECDH_LEN];
        assert_eq!(
            link.complete_handshake(&payload),
            Err(Error::SessionNotEstablished)
        );
    }

    #[test]
    fn send_secure_requires_a_session() {
        let (a, _b) = pipe();
        let mut link = Link::new(a);
        let mut rng = ChaChaRng::from_seed([5; 32]);
        assert_eq!(
            link.send_secure(Command::Ack, &[], &mut rng),
            Err(Error::SessionNotEstablished)
        );
    }

    #[test]
    fn nack_tears_the_session_down() {
        let (mut initiator, _responder, mut rng) = established_pair();
        assert!(initiator.established());
        initiator.send_nack(&mut rng);
        assert!(!initiator.established());
    }

    #[test]
    fn padding_is_randomized() {
        // Two identical one-byte messages on links keyed identically must
        // still differ on the wire because the pad bytes come from the RNG.
        let (mut initiator, mut responder, mut rng) = established_pair();
        let mut scratch = [0u8; MAX_FRAME];
        let mut first = [0u8; MAX_FRAME];

        initiator.send_secure(Command::Ack, &[], &mut rng).unwrap();
        let len = pump(&mut responder, &mut scratch).unwrap();
        first[..len].copy_from_slice(&scratch[..len]);

        initiator.send_secure(Command::Ack, &[], &mut rng).unwrap();
        let len2 = pump(&mut responder, &mut scratch).unwrap();
        assert_eq!(len, len2);
        assert_ne!(&first[..len], &scratch[..len2]);
    }
}
