//! A single remote peer's identity, handshake state, and transport keypairs (§3).
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rustyguard_crypto::{CookieState, Key, StaticPeerConfig};
use x25519_dalek::PublicKey;

use crate::handshake::Handshake;
use crate::keypair::{Keypair, KeypairSet};

/// A configured remote peer: precomputed static identity, transient handshake state, and the
/// rotating transport keypairs that identity has negotiated (§3).
pub struct Peer {
    pub static_config: StaticPeerConfig,
    pub handshake: RwLock<Handshake>,
    pub keypairs: KeypairSet,
    pub cookie: CookieState,
    pub endpoint: Mutex<Option<SocketAddr>>,
    pub internal_id: u64,
    is_dead: AtomicBool,
}

impl Peer {
    pub fn new(key: PublicKey, preshared_key: Option<Key>, internal_id: u64) -> Self {
        Self {
            static_config: StaticPeerConfig::new(key, preshared_key),
            handshake: RwLock::new(Handshake::new()),
            keypairs: KeypairSet::new(),
            cookie: CookieState::default(),
            endpoint: Mutex::new(None),
            internal_id,
            is_dead: AtomicBool::new(false),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.static_config.key
    }

    pub fn mark_dead(&self) {
        self.is_dead.store(true, Ordering::Release);
    }

    pub fn is_dead(&self) -> bool {
        self.is_dead.load(Ordering::Acquire)
    }

    /// Confirms a responder-side handshake, promoting `next` to `current` on the first data
    /// packet received under it (§4.2).
    pub fn received_with_keypair(&self, received: &Arc<Keypair>) -> bool {
        self.keypairs.received_with_keypair(received)
    }

    pub fn set_endpoint(&self, addr: SocketAddr) {
        *self.endpoint.lock() = Some(addr);
    }

    pub fn endpoint(&self) -> Option<SocketAddr> {
        *self.endpoint.lock()
    }
}
