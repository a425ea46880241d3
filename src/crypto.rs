//! Facade over the session-setup primitives: AES-192-CBC for frame
//! confidentiality, ephemeral ECDH on secp192r1 for key agreement, and the
//! BLAKE2 PIN hash.
//!
//! The shared-secret x-coordinate is 24 bytes and is used directly as the
//! AES-192 key; the session symmetric cipher must match that width.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes::Aes192;
use blake2::digest::{Update, VariableOutput};
use blake2::Blake2sVar;
use elliptic_curve::ecdh::diffie_hellman;
use elliptic_curve::sec1::{EncodedPoint, FromEncodedPoint, ToEncodedPoint};
use elliptic_curve::{NonZeroScalar, PublicKey};
use p192::NistP192;
use rand_chacha::rand_core::{CryptoRng, RngCore};

/// AES block size; every encrypted payload is a multiple of this.
pub const BLOCK_LEN: usize = 16;
/// AES-192 key width, equal to the secp192r1 shared-secret width.
pub const KEY_LEN: usize = 24;
/// CBC IV width.
pub const IV_LEN: usize = 16;
/// Untagged secp192r1 public point (x || y).
pub const ECDH_PUBLIC_LEN: usize = 48;
/// BLAKE2 PIN digest width.
pub const PIN_HASH_LEN: usize = 28;

type CbcEnc = cbc::Encryptor<Aes192>;
type CbcDec = cbc::Decryptor<Aes192>;

/// CBC-encrypt `buf` in place. The length must already be padded to a block
/// multiple.
pub fn cbc_encrypt(key: &[u8; KEY_LEN], iv: &[u8; IV_LEN], buf: &mut [u8]) {
    debug_assert!(buf.len() % BLOCK_LEN == 0);
    let mut cipher = CbcEnc::new(key.into(), iv.into());
    for block in buf.chunks_exact_mut(BLOCK_LEN) {
        cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

/// CBC-decrypt `buf` in place. The length must be a block multiple.
pub fn cbc_decrypt(key: &[u8; KEY_LEN], iv: &[u8; IV_LEN], buf: &mut [u8]) {
    debug_assert!(buf.len() % BLOCK_LEN == 0);
    let mut cipher = CbcDec::new(key.into(), iv.into());
    for block in buf.chunks_exact_mut(BLOCK_LEN) {
        cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
    }
}

/// One side's ephemeral ECDH key pair, generated fresh per handshake and
/// discarded with the session.
pub struct EphemeralKey {
    secret: NonZeroScalar<NistP192>,
}

impl EphemeralKey {
    pub fn generate(rng: &mut (impl RngCore + CryptoRng)) -> Self {
        EphemeralKey {
            secret: NonZeroScalar::random(rng),
        }
    }

    /// The public point in the 48-byte untagged form carried on the wire.
    pub fn public_bytes(&self) -> [u8; ECDH_PUBLIC_LEN] {
        let public = PublicKey::from_secret_scalar(&self.secret);
        let point = public.to_encoded_point(false);
        let mut out = [0u8; ECDH_PUBLIC_LEN];
        // Skip the 0x04 uncompressed-point tag.
        out.copy_from_slice(&point.as_bytes()[1..]);
        out
    }

    /// Derive the 24-byte session key from a peer's untagged public point.
    /// Returns `None` when the bytes do not decode to a curve point.
    pub fn agree(&self, peer_public: &[u8; ECDH_PUBLIC_LEN]) -> Option<[u8; KEY_LEN]> {
        let point =
            EncodedPoint::<NistP192>::from_untagged_bytes(GenericArray::from_slice(peer_public));
        let peer: Option<PublicKey<NistP192>> = PublicKey::from_encoded_point(&point).into();
        let peer = peer?;
        let shared = diffie_hellman(&self.secret, peer.as_affine());
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(shared.raw_secret_bytes());
        Some(key)
    }
}

/// Hash a 6-digit ASCII PIN into the 28-byte digest the pairing tooling
/// transports (padded to 32 and encrypted under the PIN key host-side).
pub fn pin_hash(pin: &[u8]) -> [u8; PIN_HASH_LEN] {
    let mut hasher = Blake2sVar::new(PIN_HASH_LEN).unwrap();
    hasher.update(pin);
    let mut out = [0u8; PIN_HASH_LEN];
    hasher.finalize_variable(&mut out).unwrap();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::rand_core::SeedableRng;
    use rand_chacha::ChaChaRng;

    #[test]
    fn cbc_round_trip() {
        let key = [0x42u8; KEY_LEN];
        let iv = [0x07u8; IV_LEN];
        let mut buf = [0u8; 48];
        for (i, b) in buf.iter_mut().enumerate() {
            *b = i as u8;
        }
        let plain = buf;

        cbc_encrypt(&key, &iv, &mut buf);
        assert_ne!(buf, plain);
        cbc_decrypt(&key, &iv, &mut buf);
        assert_eq!(buf, plain);
    }

    #[test]
    fn cbc_chains_across_blocks() {
        // Identical plaintext blocks must not produce identical ciphertext
        // blocks under CBC.
        let key = [0x11u8; KEY_LEN];
        let iv = [0x22u8; IV_LEN];
        let mut buf = [0x33u8; 32];
        cbc_encrypt(&key, &iv, &mut buf);
        assert_ne!(buf[..16], buf[16..]);
    }

    #[test]
    fn ecdh_both_sides_derive_the_same_key() {
        let mut rng = ChaChaRng::from_seed([1; 32]);
        let alice = EphemeralKey::generate(&mut rng);
        let bob = EphemeralKey::generate(&mut rng);

        let k1 = alice.agree(&bob.public_bytes()).unwrap();
        let k2 = bob.agree(&alice.public_bytes()).unwrap();
        assert_eq!(k1, k2);

        let carol = EphemeralKey::generate(&mut rng);
        assert_ne!(alice.agree(&carol.public_bytes()).unwrap(), k1);
    }

    #[test]
    fn ecdh_rejects_bytes_off_the_curve() {
        let mut rng = ChaChaRng::from_seed([2; 32]);
        let key = EphemeralKey::generate(&mut rng);
        assert!(key.agree(&[0xFF; ECDH_PUBLIC_LEN]).is_none());
    }

    #[test]
    fn pin_hash_is_stable_and_pin_sensitive() {
        let a = pin_hash(b"123456");
        assert_eq!(a, pin_hash(b"123456"));
        assert_ne!(a, pin_hash(b"123457"));
    }
}
