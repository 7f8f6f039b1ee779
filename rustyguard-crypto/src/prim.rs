//! Noise primitives: BLAKE2s hash/MAC/HKDF and the handshake transcript state (`hash`, `chain`).
//!
//! Kept separate from `lib.rs` the way the teacher crate separates its message-level logic from
//! the raw primitive operations, so the transcript math can be tested in isolation from wire
//! framing.
use blake2::digest::generic_array::GenericArray;
use blake2::digest::{Digest, Output};
use blake2::Blake2s256;
use chacha20poly1305::consts::U16;
use chacha20poly1305::Nonce;
use hkdf::hmac::SimpleHmac;
use rustyguard_types::Tag;
use x25519_dalek::{PublicKey, StaticSecret};
use zerocopy::AsBytes;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::CryptoError;

/// A bare 32-byte symmetric key, shared by the chaining key, the hash, and every derived
/// transport/PSK key.
pub type Key = chacha20poly1305::Key;
pub type Mac = [u8; 16];

pub(crate) const LABEL_MAC1: [u8; 8] = *b"mac1----";
pub(crate) const LABEL_COOKIE: [u8; 8] = *b"cookie--";

/// Construction: b"Noise_IKpsk2_25519_ChaChaPoly_BLAKE2s"
/// Identifier: b"WireGuard v1 zx2c4 Jason@zx2c4.com"
/// Ci := Hash(Construction); Hi := Hash(Ci || Identifier)
const CONSTRUCTION_HASH: [u8; 32] = [
    96, 226, 109, 174, 243, 39, 239, 192, 46, 195, 53, 226, 160, 37, 210, 208, 22, 235, 66, 6, 248,
    114, 119, 245, 45, 56, 209, 152, 139, 120, 205, 54,
];
const IDENTIFIER_HASH: [u8; 32] = [
    34, 17, 179, 97, 8, 26, 197, 102, 105, 18, 67, 219, 69, 138, 213, 50, 45, 156, 108, 102, 34,
    147, 232, 183, 14, 225, 156, 101, 186, 7, 158, 243,
];

pub(crate) fn nonce(counter: u64) -> Nonce {
    let mut n = Nonce::default();
    n[4..].copy_from_slice(&u64::to_le_bytes(counter));
    n
}

pub(crate) fn hash<const M: usize>(msg: [&[u8]; M]) -> Output<Blake2s256> {
    let mut digest = Blake2s256::default();
    for msg in msg {
        digest.update(msg);
    }
    digest.finalize()
}

pub(crate) fn mac<const M: usize>(key: &[u8], msg: [&[u8]; M]) -> Mac {
    use blake2::digest::Mac as _;
    let mut mac = blake2::Blake2sMac::<U16>::new_from_slice(key).unwrap();
    for msg in msg {
        mac.update(msg);
    }
    mac.finalize().into_bytes().into()
}

fn hmac<const M: usize>(key: &Key, msg: [&[u8]; M]) -> Output<Blake2s256> {
    use hkdf::hmac::Mac;
    let mut hmac = <SimpleHmac<Blake2s256> as Mac>::new_from_slice(key).unwrap();
    for msg in msg {
        hmac.update(msg);
    }
    hmac.finalize().into_bytes()
}

pub(crate) fn hkdf<const N: usize, const M: usize>(
    key: &Key,
    msg: [&[u8]; M],
) -> [Output<Blake2s256>; N] {
    assert!(N <= 255);

    let mut output = [Output::<Blake2s256>::default(); N];
    if N == 0 {
        return output;
    }

    let t0 = hmac(key, msg);
    let mut ti = hmac(&t0, [&[1]]);
    output[0] = ti;
    for i in 1..N as u8 {
        ti = hmac(&t0, [&ti, &[i + 1]]);
        output[i as usize] = ti;
    }

    output
}

/// The rolling Noise transcript: `hash` (`h`) and `chain` (`ck`), each `NOISE_HASH_LEN` = 32
/// bytes (§3). Zeroed on drop and on `split`, since both are derived from DH secrets.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct HandshakeState {
    hash: Key,
    chain: Key,
}

impl Default for HandshakeState {
    fn default() -> Self {
        Self {
            chain: GenericArray::from(CONSTRUCTION_HASH),
            hash: GenericArray::from(IDENTIFIER_HASH),
        }
    }
}

impl HandshakeState {
    pub fn mix_chain(&mut self, b: &[u8]) {
        let [c] = hkdf(&self.chain, [b]);
        self.chain = c;
    }

    pub fn mix_dh(&mut self, sk: &StaticSecret, pk: &PublicKey) {
        let prk = sk.diffie_hellman(pk);
        let [c] = hkdf(&self.chain, [prk.as_bytes()]);
        self.chain = c;
    }

    pub fn mix_key_dh(&mut self, sk: &StaticSecret, pk: &PublicKey) -> Key {
        let prk = sk.diffie_hellman(pk);
        let [c, k] = hkdf(&self.chain, [prk.as_bytes()]);
        self.chain = c;
        k
    }

    /// Noise's `MixKeyAndHash`: mixes the pre-shared key into both the chain and the hash and
    /// returns the derived key.
    pub fn mix_key_and_hash(&mut self, b: &[u8]) -> Key {
        let [c, t, k] = hkdf(&self.chain, [b]);
        self.chain = c;
        self.mix_hash(&t);
        k
    }

    pub fn mix_hash(&mut self, b: &[u8]) {
        self.hash = hash([&self.hash, b]);
    }

    pub(crate) fn aad(&self) -> Key {
        self.hash
    }

    /// `begin_session`'s key split: returns `(k1, k2)` and zeroes the transcript.
    pub fn split(&mut self) -> (Key, Key) {
        let [k1, k2] = hkdf(&self.chain, []);
        self.zeroize();
        (k1, k2)
    }
}

macro_rules! encrypted_msg {
    ($decrypt:ident, $encrypt:ident, $ty:ty, $n:expr) => {
        pub(crate) fn $decrypt(
            e: &mut $ty,
            state: &mut HandshakeState,
            key: &Key,
        ) -> Result<[u8; $n], CryptoError> {
            use chacha20poly1305::{AeadInPlace, ChaCha20Poly1305, KeyInit};

            let aad = state.aad();
            state.mix_hash(e.as_bytes());

            let tag = chacha20poly1305::Tag::clone_from_slice(&e.tag.0);
            ChaCha20Poly1305::new(key)
                .decrypt_in_place_detached(&nonce(0), &aad, &mut e.msg, &tag)
                .map_err(|_| CryptoError::DecryptionError)?;
            Ok(e.msg)
        }

        pub(crate) fn $encrypt(mut msg: [u8; $n], state: &mut HandshakeState, key: &Key) -> $ty {
            use chacha20poly1305::{AeadInPlace, ChaCha20Poly1305, KeyInit};

            let aad = state.aad();
            let tag = ChaCha20Poly1305::new(key)
                .encrypt_in_place_detached(&nonce(0), &aad, &mut msg)
                .expect("message should not be larger than max message size");

            let out = <$ty>::new(msg, Tag(tag.into()));
            state.mix_hash(out.as_bytes());
            out
        }
    };
}

encrypted_msg!(
    decrypt_public_key,
    encrypt_public_key,
    rustyguard_types::EncryptedPublicKey,
    32
);
encrypted_msg!(
    decrypt_timestamp,
    encrypt_timestamp,
    rustyguard_types::EncryptedTimestamp,
    12
);
encrypted_msg!(
    decrypt_empty,
    encrypt_empty,
    rustyguard_types::EncryptedEmpty,
    0
);
