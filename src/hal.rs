//! Hardware seams the protocol core is written against.
//!
//! Firmware binaries implement these over the driverwrapper FFI; tests
//! implement them over in-memory fakes. Everything here is blocking and
//! single-context, matching the polling main loops.

use crate::state::FOB_IMAGE_LEN;

/// One serial port: byte-level read/write plus a non-blocking availability
/// check. Reads block until a byte arrives.
pub trait Uart {
    fn avail(&mut self) -> bool;
    fn read_byte(&mut self) -> u8;
    fn write_byte(&mut self, byte: u8);

    fn write(&mut self, data: &[u8]) {
        for &byte in data {
            self.write_byte(byte);
        }
    }
}

/// Blocking EEPROM read. `addr` and `buf.len()` must be multiples of 4, as
/// the underlying peripheral is word-oriented.
pub trait Eeprom {
    fn read(&mut self, buf: &mut [u8], addr: u32);
}

/// The fob's flash-backed state page. `commit` is erase-then-program of the
/// whole image; a crash in between leaves the page erased (reads as
/// unpaired), which the pairing tooling recovers from.
pub trait FlashStore {
    fn load(&mut self) -> [u8; FOB_IMAGE_LEN];
    /// Returns false if the program operation reports failure.
    fn commit(&mut self, image: &[u8; FOB_IMAGE_LEN]) -> bool;
}

#[cfg(test)]
pub mod testutil {
    //! In-memory fakes wiring protocol cores together for the scenario
    //! tests: a bidirectional byte pipe standing in for a UART link, a
    //! RAM-backed flash page, and a fixed-content EEPROM.

    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::{Eeprom, FlashStore, Uart};
    use crate::state::FOB_IMAGE_LEN;

    #[derive(Default)]
    pub struct Wire {
        a_to_b: VecDeque<u8>,
        b_to_a: VecDeque<u8>,
    }

    /// One end of a byte pipe. Created in pairs by [`pipe`].
    pub struct Endpoint {
        wire: Rc<RefCell<Wire>>,
        is_a: bool,
    }

    pub fn pipe() -> (Endpoint, Endpoint) {
        let wire = Rc::new(RefCell::new(Wire::default()));
        (
            Endpoint {
                wire: wire.clone(),
                is_a: true,
            },
            Endpoint { wire, is_a: false },
        )
    }

    impl Uart for Endpoint {
        fn avail(&mut self) -> bool {
            let wire = self.wire.borrow();
            if self.is_a {
                !wire.b_to_a.is_empty()
            } else {
                !wire.a_to_b.is_empty()
            }
        }

        fn read_byte(&mut self) -> u8 {
            let mut wire = self.wire.borrow_mut();
            let queue = if self.is_a {
                &mut wire.b_to_a
            } else {
                &mut wire.a_to_b
            };
            queue.pop_front().expect("read from empty pipe")
        }

        fn write_byte(&mut self, byte: u8) {
            let mut wire = self.wire.borrow_mut();
            let queue = if self.is_a {
                &mut wire.a_to_b
            } else {
                &mut wire.b_to_a
            };
            queue.push_back(byte);
        }
    }

    /// RAM-backed fob state page, observable from the test after the device
    /// takes ownership of a handle.
    #[derive(Clone)]
    pub struct RamFlash {
        pub image: Rc<RefCell<[u8; FOB_IMAGE_LEN]>>,
        pub fail_commits: Rc<RefCell<bool>>,
    }

    impl RamFlash {
        pub fn erased() -> Self {
            RamFlash {
                image: Rc::new(RefCell::new([0xFF; FOB_IMAGE_LEN])),
                fail_commits: Rc::new(RefCell::new(false)),
            }
        }
    }

    impl FlashStore for RamFlash {
        fn load(&mut self) -> [u8; FOB_IMAGE_LEN] {
            *self.image.borrow()
        }

        fn commit(&mut self, image: &[u8; FOB_IMAGE_LEN]) -> bool {
            if *self.fail_commits.borrow() {
                return false;
            }
            *self.image.borrow_mut() = *image;
            true
        }
    }

    /// Fixed 2K EEPROM image.
    pub struct RamEeprom(pub [u8; 0x800]);

    impl RamEeprom {
        pub fn zeroed() -> Self {
            RamEeprom([0; 0x800])
        }

        pub fn set(&mut self, addr: usize, data: &[u8]) {
            self.0[addr..addr + data.len()].copy_from_slice(data);
        }
    }

    impl Eeprom for RamEeprom {
        fn read(&mut self, buf: &mut [u8], addr: u32) {
            let addr = addr as usize;
            buf.copy_from_slice(&self.0[addr..addr + buf.len()]);
        }
    }

    use crate::command::{Command, NEW_ECDH_LEN, RETURN_ECDH_LEN};
    use crate::crypto::{
        cbc_decrypt, cbc_encrypt, EphemeralKey, BLOCK_LEN, ECDH_PUBLIC_LEN, IV_LEN, KEY_LEN,
    };
    use crate::framing::{write_frame, FrameReceiver};
    use rand_chacha::rand_core::{RngCore, SeedableRng};
    use rand_chacha::ChaChaRng;

    /// Stand-in for the host PC tooling: speaks the frame format, drives the
    /// handshake from the initiator side and encrypts/decrypts with the
    /// derived session key.
    pub struct TestHost {
        uart: Endpoint,
        rx: FrameReceiver,
        session: Option<([u8; KEY_LEN], [u8; IV_LEN])>,
        rng: ChaChaRng,
    }

    impl TestHost {
        pub fn new(uart: Endpoint, seed: u8) -> Self {
            TestHost {
                uart,
                rx: FrameReceiver::new(),
                session: None,
                rng: ChaChaRng::from_seed([seed; 32]),
            }
        }

        /// Drain the wire into the framer; returns the next frame's payload,
        /// decrypted when a session exists and the length is block-aligned.
        pub fn read_frame(&mut self) -> Option<Vec<u8>> {
            while self.uart.avail() {
                let byte = self.uart.read_byte();
                if let Some(payload) = self.rx.push_byte(byte) {
                    let mut payload = payload.to_vec();
                    if let Some((key, iv)) = &self.session {
                        if payload.len() % BLOCK_LEN == 0 {
                            cbc_decrypt(key, iv, &mut payload);
                        }
                    }
                    return Some(payload);
                }
            }
            None
        }

        /// Initiate the handshake with the device at the other end; `pump`
        /// runs the device's poll loop in between.
        pub fn handshake(&mut self, mut pump: impl FnMut()) {
            let key = EphemeralKey::generate(&mut self.rng);
            let mut iv = [0u8; IV_LEN];
            self.rng.fill_bytes(&mut iv);

            let mut msg = [0u8; NEW_ECDH_LEN];
            msg[0] = Command::NewEcdh as u8;
            msg[1..1 + ECDH_PUBLIC_LEN].copy_from_slice(&key.public_bytes());
            msg[1 + ECDH_PUBLIC_LEN..].copy_from_slice(&iv);
            write_frame(&mut self.uart, &msg);
            pump();

            let reply = self.read_frame().expect("no handshake reply");
            assert_eq!(reply[0], Command::ReturnEcdh as u8);
            assert_eq!(reply.len(), RETURN_ECDH_LEN);
            let mut peer = [0u8; ECDH_PUBLIC_LEN];
            peer.copy_from_slice(&reply[1..]);
            let shared = key.agree(&peer).expect("device sent an invalid point");
            self.session = Some((shared, iv));
        }

        /// Pad, encrypt and frame one command toward the device.
        pub fn send(&mut self, cmd: Command, data: &[u8]) {
            let (key, iv) = self.session.expect("no session established");
            let mut buf = vec![cmd as u8];
            buf.extend_from_slice(data);
            buf.resize(buf.len().next_multiple_of(BLOCK_LEN), 0);
            cbc_encrypt(&key, &iv, &mut buf);
            write_frame(&mut self.uart, &buf);
        }
    }
}
