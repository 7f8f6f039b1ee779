//! Noise IK(psk2) handshake primitives, MAC/cookie protection, and transport-data encryption
//! (§4.1, §4.3, §6). This crate owns the cryptography; session/peer state and the policy that
//! drives it (rate limiting, rekey timing, keypair rotation) live in `rustyguard-core`.
#![no_std]

#[cfg(any(test, rustyguard_unsafe_logging))]
extern crate std;

use core::ops::ControlFlow;

use rand_core::{CryptoRng, RngCore};
use rustyguard_types::{
    Cookie, CookieReply, EncryptedCookie, HandshakeInit, HandshakeResp, Tag, MSG_FIRST, MSG_SECOND,
};
use tai64::Tai64N;
use x25519_dalek::{PublicKey, StaticSecret};
use zerocopy::{little_endian, AsBytes, FromBytes};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub mod consts;
mod prim;
mod session;

pub use prim::{HandshakeState, Key, Mac};
pub use session::{DecryptionKey, EncryptionKey, ReplayCounter, COUNTER_BITS_TOTAL};

/// Only `cfg(test)` or an explicit opt-in may print handshake-adjacent values: by default doing
/// so would leak secret-derived material to a log sink.
macro_rules! unsafe_log {
    ($($t:tt)*) => {
        match core::format_args!($($t)*) {
            #[cfg(any(test, rustyguard_unsafe_logging))]
            args => std::eprintln!("{args}"),
            #[cfg(not(any(test, rustyguard_unsafe_logging)))]
            _ => {}
        };
    }
}
pub(crate) use unsafe_log;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// MAC, AEAD, or DH validation failed.
    DecryptionError,
    /// The message was structurally rejected before any decryption was attempted.
    Rejected,
}

fn mac1_key(spk: &PublicKey) -> Key {
    prim::hash([&prim::LABEL_MAC1, spk.as_bytes()]).into()
}

fn cookie_key(spk: &PublicKey) -> Key {
    prim::hash([&prim::LABEL_COOKIE, spk.as_bytes()]).into()
}

/// Everything we precompute about a single remote peer's static identity (§3, "Static identity").
pub struct StaticPeerConfig {
    pub key: PublicKey,
    pub preshared_key: Key,
    pub mac1_key: Key,
    pub cookie_key: Key,
}

/// Our own static identity, plus the per-identity keys derived from it (§3).
pub struct StaticInitiatorConfig {
    pub private_key: StaticSecret,
    pub public_key: PublicKey,
    pub mac1_key: Key,
    pub cookie_key: Key,
}

impl StaticPeerConfig {
    pub fn new(key: PublicKey, preshared_key: Option<Key>) -> Self {
        Self {
            mac1_key: mac1_key(&key),
            cookie_key: cookie_key(&key),
            key,
            preshared_key: preshared_key.unwrap_or_default(),
        }
    }
}

impl StaticInitiatorConfig {
    pub fn new(key: StaticSecret) -> Self {
        let public_key = PublicKey::from(&key);
        Self {
            mac1_key: mac1_key(&public_key),
            cookie_key: cookie_key(&public_key),
            public_key,
            private_key: key,
        }
    }
}

/// Generates and stores the per-device cookie secret (§4.1's cookie-reply collaborator).
#[derive(Zeroize, ZeroizeOnDrop, Default)]
pub struct CookieState {
    key: Key,
}

impl CookieState {
    pub fn generate(&mut self, rng: &mut (impl CryptoRng + RngCore)) {
        rng.fill_bytes(&mut self.key);
    }

    /// Derives the per-source-address cookie used to rate-limit handshake initiations. There is
    /// no specified encoding for the input beyond "contains the address and port".
    pub fn new_cookie(&self, addr: core::net::SocketAddr) -> Cookie {
        let mut a = [0u8; 20];
        match addr.ip() {
            core::net::IpAddr::V4(ip) => a[..4].copy_from_slice(&ip.octets()),
            core::net::IpAddr::V6(ip) => a[..16].copy_from_slice(&ip.octets()),
        }
        a[16..].copy_from_slice(&addr.port().to_le_bytes());
        Cookie(prim::mac(&self.key, [&a]))
    }
}

/// Messages protected by MAC1 (always checked) and MAC2 (checked only under load, §4.1).
///
/// MAC1 rules out garbage cheaply; MAC2, checked only when the device is overloaded, costs the
/// sender a round trip through the cookie reply before their handshake is processed.
pub trait HasMac: FromBytes + AsBytes + Sized {
    fn verify<'m>(
        &'m mut self,
        config: &StaticInitiatorConfig,
        overloaded: bool,
        cookie: &CookieState,
        addr: core::net::SocketAddr,
    ) -> Result<ControlFlow<Cookie, &'m mut Self>, CryptoError> {
        self.verify_mac1(&config.mac1_key)?;

        if overloaded {
            let cookie = cookie.new_cookie(addr);
            if self.verify_mac2(&cookie).is_err() {
                return Ok(ControlFlow::Break(cookie));
            }
        }

        Ok(ControlFlow::Continue(self))
    }

    fn verify_mac1(&self, mac1_key: &Key) -> Result<(), CryptoError> {
        let actual = self.compute_mac1(mac1_key);
        if &actual != self.get_mac1() {
            unsafe_log!("invalid mac1");
            Err(CryptoError::Rejected)
        } else {
            Ok(())
        }
    }

    fn verify_mac2(&self, cookie: &Cookie) -> Result<(), CryptoError> {
        let actual = self.compute_mac2(cookie);
        if &actual != self.get_mac2() {
            unsafe_log!("invalid mac2");
            Err(CryptoError::Rejected)
        } else {
            Ok(())
        }
    }

    fn compute_mac1(&self, mac1_key: &Key) -> Mac;
    fn compute_mac2(&self, cookie: &Cookie) -> Mac;
    fn get_mac1(&self) -> &Mac;
    fn get_mac2(&self) -> &Mac;
}

macro_rules! mac_protected {
    ($ty:ident) => {
        impl HasMac for $ty {
            fn compute_mac1(&self, mac1_key: &Key) -> Mac {
                let offset = core::mem::offset_of!($ty, mac1);
                prim::mac(mac1_key, [&self.as_bytes()[..offset]])
            }

            fn compute_mac2(&self, cookie: &Cookie) -> Mac {
                let offset = core::mem::offset_of!($ty, mac2);
                prim::mac(&cookie.0, [&self.as_bytes()[..offset]])
            }

            fn get_mac1(&self) -> &Mac {
                &self.mac1
            }

            fn get_mac2(&self) -> &Mac {
                &self.mac2
            }
        }
    };
}

mac_protected!(HandshakeInit);
mac_protected!(HandshakeResp);

/// Builds a cookie-reply message (§6, 64 bytes) in answer to `sender`'s unvalidated MAC2.
pub fn create_cookie_reply(
    receiver: u32,
    cookie: Cookie,
    cookie_key: &Key,
    mac1: &Mac,
    rng: &mut (impl CryptoRng + RngCore),
) -> CookieReply {
    let mut nonce = [0u8; 24];
    rng.fill_bytes(&mut nonce);

    use chacha20poly1305::{AeadInPlace, KeyInit, XChaCha20Poly1305, XNonce};
    let mut msg = cookie;
    let tag = XChaCha20Poly1305::new(cookie_key)
        .encrypt_in_place_detached(XNonce::from_slice(&nonce), mac1, &mut msg.0)
        .expect("cookie message should not be larger than max message size");

    CookieReply {
        _type: little_endian::U32::new(rustyguard_types::MSG_COOKIE_REPLY),
        receiver: little_endian::U32::new(receiver),
        nonce,
        cookie: EncryptedCookie::new(msg, Tag(tag.into())),
    }
}

/// Recovers the cookie carried in a cookie-reply message, authenticated against the sender's own
/// MAC1 (the `aad` they used when encrypting the cookie).
pub fn open_cookie_reply(
    reply: &CookieReply,
    cookie_key: &Key,
    mac1: &Mac,
) -> Result<Cookie, CryptoError> {
    use chacha20poly1305::{AeadInPlace, KeyInit, XChaCha20Poly1305, XNonce};
    let mut msg = reply.cookie.msg;
    let tag = chacha20poly1305::Tag::clone_from_slice(&reply.cookie.tag.0);
    XChaCha20Poly1305::new(cookie_key)
        .decrypt_in_place_detached(XNonce::from_slice(&reply.nonce), mac1, &mut msg.0, &tag)
        .map_err(|_| CryptoError::DecryptionError)?;
    Ok(msg)
}

/// The caller's view of a decrypted, authenticated handshake initiation (§4.1): the originator's
/// ephemeral and static public keys, their claimed TAI64N timestamp, and their session index —
/// all now safe to read, and all `encrypt_handshake_resp` needs to build message 2.
pub struct DecryptedHandshakeInit {
    pub sender: u32,
    pub ephemeral_key: PublicKey,
    pub static_key: PublicKey,
    pub timestamp: Tai64N,
}

/// `create_initiation` (§4.1): builds message 1 of the handshake. `sender` is a freshly allocated
/// local session index; `esk_i` a freshly generated ephemeral secret; both are supplied by the
/// caller so that index allocation and RNG use stay centralised in `rustyguard-core`.
pub fn encrypt_handshake_init(
    hs: &mut HandshakeState,
    initiator: &StaticInitiatorConfig,
    peer: &StaticPeerConfig,
    esk_i: &StaticSecret,
    now: Tai64N,
    sender: u32,
    cookie: Option<&Cookie>,
) -> HandshakeInit {
    // IKpsk2: <- s  -> e, es, s, ss
    let epk_i = PublicKey::from(esk_i);
    hs.mix_hash(peer.key.as_bytes());

    hs.mix_chain(epk_i.as_bytes());
    hs.mix_hash(epk_i.as_bytes());

    let k = hs.mix_key_dh(esk_i, &peer.key);
    let static_key = prim::encrypt_public_key(initiator.public_key.to_bytes(), hs, &k);

    let k = hs.mix_key_dh(&initiator.private_key, &peer.key);
    let timestamp = prim::encrypt_timestamp(now.to_bytes(), hs, &k);

    let mut msg = HandshakeInit {
        _type: little_endian::U32::new(MSG_FIRST),
        sender: little_endian::U32::new(sender),
        ephemeral_key: epk_i.to_bytes(),
        static_key,
        timestamp,
        mac1: [0; 16],
        mac2: [0; 16],
    };
    msg.mac1 = msg.compute_mac1(&peer.mac1_key);
    if let Some(cookie) = cookie {
        msg.mac2 = msg.compute_mac2(cookie);
    }
    msg
}

/// The decrypt half of `consume_initiation` (§4.1). Does not resolve or validate the sender
/// against a peer table: that's `rustyguard-core`'s job, since it owns the peer-by-public-key
/// index (§4.5).
pub fn decrypt_handshake_init(
    init: &HandshakeInit,
    hs: &mut HandshakeState,
    receiver: &StaticInitiatorConfig,
) -> Result<DecryptedHandshakeInit, CryptoError> {
    let mut init = *init;

    hs.mix_hash(receiver.public_key.as_bytes());

    hs.mix_chain(&init.ephemeral_key);
    hs.mix_hash(&init.ephemeral_key);

    let epk_i = PublicKey::from(init.ephemeral_key);
    let k = hs.mix_key_dh(&receiver.private_key, &epk_i);

    unsafe_log!("decrypting static key");
    let spk_i = prim::decrypt_public_key(&mut init.static_key, hs, &k)?;
    let spk_i = PublicKey::from(spk_i);
    unsafe_log!("decrypted public key {spk_i:?}");

    let k = hs.mix_key_dh(&receiver.private_key, &spk_i);

    unsafe_log!("decrypting timestamp");
    let timestamp = prim::decrypt_timestamp(&mut init.timestamp, hs, &k)?;

    Ok(DecryptedHandshakeInit {
        sender: init.sender.get(),
        ephemeral_key: epk_i,
        static_key: spk_i,
        timestamp: Tai64N::from_slice(&timestamp).map_err(|_| CryptoError::Rejected)?,
    })
}

/// `create_response` (§4.1): builds message 2. `esk_r` is a freshly generated ephemeral secret.
pub fn encrypt_handshake_resp(
    hs: &mut HandshakeState,
    init: &DecryptedHandshakeInit,
    esk_r: &StaticSecret,
    peer: &StaticPeerConfig,
    sender: u32,
    cookie: Option<&Cookie>,
) -> HandshakeResp {
    // IKpsk2: <- e, ee, se, psk
    let epk_r = PublicKey::from(esk_r);
    hs.mix_chain(epk_r.as_bytes());
    hs.mix_hash(epk_r.as_bytes());

    hs.mix_dh(esk_r, &init.ephemeral_key);
    hs.mix_dh(esk_r, &init.static_key);

    let k = hs.mix_key_and_hash(&peer.preshared_key);
    let empty = prim::encrypt_empty([], hs, &k);

    let mut msg = HandshakeResp {
        _type: little_endian::U32::new(MSG_SECOND),
        sender: little_endian::U32::new(sender),
        receiver: little_endian::U32::new(init.sender),
        ephemeral_key: epk_r.to_bytes(),
        empty,
        mac1: [0; 16],
        mac2: [0; 16],
    };
    msg.mac1 = msg.compute_mac1(&peer.mac1_key);
    if let Some(cookie) = cookie {
        msg.mac2 = msg.compute_mac2(cookie);
    }
    msg
}

/// The decrypt half of `consume_response` (§4.1): authenticates the transcript by opening the
/// empty payload. Returns nothing on success; the handshake's own transcript state now holds the
/// material `begin_session` needs.
pub fn decrypt_handshake_resp(
    resp: &HandshakeResp,
    hs: &mut HandshakeState,
    initiator: &StaticInitiatorConfig,
    peer: &StaticPeerConfig,
    esk_i: &StaticSecret,
) -> Result<(), CryptoError> {
    let mut resp = *resp;

    let epk_r = PublicKey::from(resp.ephemeral_key);
    hs.mix_chain(epk_r.as_bytes());
    hs.mix_hash(epk_r.as_bytes());

    hs.mix_dh(esk_i, &epk_r);
    hs.mix_dh(&initiator.private_key, &epk_r);

    let k = hs.mix_key_and_hash(&peer.preshared_key);

    unsafe_log!("decrypting payload");
    prim::decrypt_empty(&mut resp.empty, hs, &k)?;
    Ok(())
}

/// `begin_session`'s final key derivation (§4.1): splits the chaining key into a send/receive
/// pair, oriented by which side initiated. Zeroes the handshake transcript as a side effect of
/// `HandshakeState::split`.
pub fn derive_session_keys(hs: &mut HandshakeState, is_initiator: bool) -> (Key, Key) {
    let (k1, k2) = hs.split();
    if is_initiator {
        (k1, k2)
    } else {
        (k2, k1)
    }
}

/// Generates a fresh X25519 ephemeral keypair for one handshake message.
pub fn generate_ephemeral(rng: &mut (impl CryptoRng + RngCore)) -> StaticSecret {
    StaticSecret::random_from_rng(rng)
}

#[cfg(test)]
mod tests {
    use blake2::Digest;
    use rand::rngs::OsRng;

    use super::*;

    #[test]
    fn construction_identifier_hashes_are_stable() {
        let c = blake2::Blake2s256::default()
            .chain_update(b"Noise_IKpsk2_25519_ChaChaPoly_BLAKE2s")
            .finalize();
        let h = blake2::Blake2s256::default()
            .chain_update(c)
            .chain_update(b"WireGuard v1 zx2c4 Jason@zx2c4.com")
            .finalize();
        assert_eq!(c.len(), 32);
        assert_eq!(h.len(), 32);
    }

    #[test]
    fn message_sizes_match_wire_format() {
        assert_eq!(core::mem::size_of::<HandshakeInit>(), 148);
        assert_eq!(core::mem::size_of::<HandshakeResp>(), 92);
    }

    /// §8, scenario "Handshake happy path": both sides derive matching session keys.
    #[test]
    fn full_handshake_derives_matching_keys() {
        let init_sk = StaticSecret::random_from_rng(OsRng);
        let resp_sk = StaticSecret::random_from_rng(OsRng);
        let init_pk = PublicKey::from(&init_sk);
        let resp_pk = PublicKey::from(&resp_sk);

        let initiator_cfg = StaticInitiatorConfig::new(init_sk);
        let responder_cfg = StaticInitiatorConfig::new(resp_sk);
        let peer_of_responder = StaticPeerConfig::new(resp_pk, None);
        let peer_of_initiator = StaticPeerConfig::new(init_pk, None);

        // -> msg1
        let mut hs_i = HandshakeState::default();
        let esk_i = generate_ephemeral(&mut OsRng);
        let msg1 = encrypt_handshake_init(
            &mut hs_i,
            &initiator_cfg,
            &peer_of_responder,
            &esk_i,
            Tai64N::now(),
            1,
            None,
        );

        // responder consumes msg1
        let mut hs_r = HandshakeState::default();
        let decrypted = decrypt_handshake_init(&msg1, &mut hs_r, &responder_cfg).unwrap();
        assert_eq!(decrypted.static_key.as_bytes(), init_pk.as_bytes());

        // <- msg2
        let esk_r = generate_ephemeral(&mut OsRng);
        let msg2 = encrypt_handshake_resp(
            &mut hs_r,
            &decrypted,
            &esk_r,
            &peer_of_initiator,
            2,
            None,
        );

        // initiator consumes msg2
        decrypt_handshake_resp(&msg2, &mut hs_i, &initiator_cfg, &peer_of_responder, &esk_i).unwrap();

        // begin_session on both sides
        let (i_send, i_recv) = derive_session_keys(&mut hs_i, true);
        let (r_send, r_recv) = derive_session_keys(&mut hs_r, false);

        assert_eq!(i_send, r_recv);
        assert_eq!(i_recv, r_send);
    }

    #[test]
    fn rejects_tampered_initiation() {
        let init_sk = StaticSecret::random_from_rng(OsRng);
        let resp_sk = StaticSecret::random_from_rng(OsRng);
        let resp_pk = PublicKey::from(&resp_sk);

        let initiator_cfg = StaticInitiatorConfig::new(init_sk);
        let responder_cfg = StaticInitiatorConfig::new(resp_sk);
        let peer_of_responder = StaticPeerConfig::new(resp_pk, None);

        let mut hs_i = HandshakeState::default();
        let esk_i = generate_ephemeral(&mut OsRng);
        let mut msg1 = encrypt_handshake_init(
            &mut hs_i,
            &initiator_cfg,
            &peer_of_responder,
            &esk_i,
            Tai64N::now(),
            1,
            None,
        );
        msg1.static_key.msg[0] ^= 1;

        let mut hs_r = HandshakeState::default();
        assert!(decrypt_handshake_init(&msg1, &mut hs_r, &responder_cfg).is_err());
    }
}
