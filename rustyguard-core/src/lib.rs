//! Device-level object graph (§3, §4.5): the peer table, session-index table, and cryptokey
//! routing trie for one WireGuard-style endpoint, built on `rustyguard-crypto`'s handshake
//! primitives and `rustyguard-utils`' trie.

mod handshake;
mod keypair;
mod peer;

pub use handshake::{Handshake, HandshakeError, SessionKeys};
pub use keypair::{Keypair, KeypairSet, ReceivingKey, SendingKey};
pub use peer::Peer;
pub use rustyguard_crypto::consts;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustyguard_crypto::{
    CryptoError, DecryptionKey, EncryptionKey, HasMac, Key, StaticInitiatorConfig,
};
use rustyguard_types::{DataHeader, HandshakeInit, HandshakeResp, Tag};
use rustyguard_utils::{CryptoKeyRouting, IndexAllocator};
use x25519_dalek::{PublicKey, StaticSecret};

type PeerMap = std::collections::HashMap<[u8; 32], Arc<Peer>, ahash::RandomState>;
type SessionMap = std::collections::HashMap<u32, SessionIndexEntry, ahash::RandomState>;

/// What a session index currently names (§4.5): either a handshake in flight, or a completed
/// keypair. The handshake variant holds the peer weakly so a dropped peer can't be kept alive by
/// a stale session-table entry. The keypair variant keeps the owning peer alongside it so a
/// received data packet can be resolved back to a peer without a second table lookup.
enum SessionIndexEntry {
    Handshake(Weak<Peer>),
    Keypair(Arc<Peer>, Arc<Keypair>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    UnknownPeer,
    Handshake(HandshakeError),
    Crypto(CryptoError),
    /// No cryptokey route matches the packet's destination (outbound) or the decrypted packet's
    /// claimed source doesn't route back to the peer it arrived under (inbound, §4.4).
    NoRoute,
    /// The `receiver` index on a data message doesn't name a live keypair.
    NoKeypair,
    /// The keypair named by a data message's `receiver` index is past `REJECT_AFTER_TIME_SECS`.
    KeypairExpired,
    /// The keypair's send counter has exhausted `REJECT_AFTER_MESSAGES`; a rekey is required.
    SendExhausted,
}

impl From<HandshakeError> for DeviceError {
    fn from(e: HandshakeError) -> Self {
        Self::Handshake(e)
    }
}

impl From<CryptoError> for DeviceError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

/// The whole local endpoint: static identity, peer table, session-index table, and the
/// cryptokey-routing trie (§3, §4.5).
pub struct Device {
    static_identity: RwLock<StaticInitiatorConfig>,
    peers_by_pubkey: RwLock<PeerMap>,
    sessions: RwLock<SessionMap>,
    pub routing: RwLock<CryptoKeyRouting<Arc<Peer>>>,
    indices: Mutex<IndexAllocator>,
    rng: Mutex<StdRng>,
    next_internal_id: AtomicU64,
}

impl Device {
    pub fn new(private_key: StaticSecret) -> Self {
        Self {
            static_identity: RwLock::new(StaticInitiatorConfig::new(private_key)),
            peers_by_pubkey: RwLock::new(PeerMap::default()),
            sessions: RwLock::new(SessionMap::default()),
            routing: RwLock::new(CryptoKeyRouting::new()),
            indices: Mutex::new(IndexAllocator::new()),
            rng: Mutex::new(StdRng::from_entropy()),
            next_internal_id: AtomicU64::new(0),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.static_identity.read().public_key
    }

    fn next_internal_id(&self) -> u64 {
        self.next_internal_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a new peer (§4.5's configuration surface; there is no parsed file format, only
    /// direct calls — persisted configuration is out of scope).
    pub fn add_peer(&self, key: PublicKey, preshared_key: Option<Key>) -> Arc<Peer> {
        let peer = Arc::new(Peer::new(key, preshared_key, self.next_internal_id()));
        self.peers_by_pubkey
            .write()
            .insert(key.to_bytes(), peer.clone());
        peer
    }

    /// Adds a cryptokey route (§4.4): inbound packets whose source and outbound packets whose
    /// destination fall in `addr/cidr` are associated with `peer`.
    pub fn add_allowed_ip(&self, peer: &Arc<Peer>, addr: IpAddr, cidr: u8) {
        let mut routing = self.routing.write();
        match addr {
            IpAddr::V4(a) => routing.insert_v4(a, cidr, peer.clone()),
            IpAddr::V6(a) => routing.insert_v6(a, cidr, peer.clone()),
        }
    }

    pub fn peer_by_pubkey(&self, key: &PublicKey) -> Option<Arc<Peer>> {
        self.peers_by_pubkey.read().get(&key.to_bytes()).cloned()
    }

    /// `wg_whitelist_lookup_dst`/`_src` (§4.4): the peer this address routes to, if any.
    pub fn route(&self, addr: IpAddr) -> Option<Arc<Peer>> {
        self.routing.read().lookup(addr).cloned()
    }

    fn alloc_index(&self, entry: SessionIndexEntry) -> u32 {
        let mut sessions = self.sessions.write();
        let mut indices = self.indices.lock();
        let mut rng = self.rng.lock();
        let index = indices.allocate(&mut *rng);
        sessions.insert(index, entry);
        index
    }

    /// `create_initiation` (§4.1): allocates a session index and builds message 1.
    pub fn create_initiation(&self, peer: &Arc<Peer>) -> HandshakeInit {
        let local_index = self.alloc_index(SessionIndexEntry::Handshake(Arc::downgrade(peer)));
        let initiator = self.static_identity.read();
        let mut handshake = peer.handshake.write();
        handshake.create_initiation(
            &initiator,
            &peer.static_config,
            local_index,
            &mut *self.rng.lock(),
        )
    }

    /// The decrypt half of `consume_initiation` (§4.1): since the IK pattern hides the
    /// initiator's identity until its static key is decrypted, the sender is resolved by trying
    /// every live peer in turn, the same way wireguard-go does it.
    pub fn consume_initiation(&self, msg: &HandshakeInit) -> Result<Arc<Peer>, DeviceError> {
        let initiator = self.static_identity.read();

        // MAC1 is keyed on our own static identity, not the (still unknown) sender's, so it's
        // checked once up front rather than per candidate peer below. This rejects garbage
        // before paying for a trial AEAD decryption against every live peer (§4.1's DoS note).
        msg.verify_mac1(&initiator.mac1_key)?;

        for peer in self.peers_by_pubkey.read().values() {
            if peer.is_dead() {
                continue;
            }
            let mut handshake = peer.handshake.write();
            match handshake.consume_initiation(msg, &initiator) {
                Ok(()) => return Ok(peer.clone()),
                Err(HandshakeError::Crypto(_)) => continue,
                Err(other) => return Err(other.into()),
            }
        }
        Err(DeviceError::UnknownPeer)
    }

    /// `create_response` (§4.1): builds message 2 and installs the resulting keypair as `next`
    /// on the peer (§4.2, responder side).
    pub fn create_response(&self, peer: &Arc<Peer>) -> Result<HandshakeResp, DeviceError> {
        let local_index = self.alloc_index(SessionIndexEntry::Handshake(Arc::downgrade(peer)));
        let (msg, keys) = {
            let mut handshake = peer.handshake.write();
            handshake.create_response(&peer.static_config, local_index, &mut *self.rng.lock())?
        };

        let keypair = self.install_keypair(peer, keys);
        peer.keypairs.install_as_responder(keypair);
        Ok(msg)
    }

    /// `consume_response` + `begin_session` (§4.1): on success, installs the new keypair as
    /// `current` (§4.2, initiator side).
    pub fn consume_response(
        &self,
        msg: &HandshakeResp,
        peer: &Arc<Peer>,
    ) -> Result<(), DeviceError> {
        let keys = {
            let initiator = self.static_identity.read();
            msg.verify_mac1(&initiator.mac1_key)?;
            let mut handshake = peer.handshake.write();
            handshake.consume_response(msg, &initiator, &peer.static_config)?
        };

        let keypair = self.install_keypair(peer, keys);
        peer.keypairs.install_as_initiator(keypair);
        Ok(())
    }

    fn install_keypair(&self, peer: &Arc<Peer>, keys: SessionKeys) -> Arc<Keypair> {
        let keypair = Arc::new(Keypair::new(
            EncryptionKey::new(keys.send),
            DecryptionKey::new(keys.recv),
            keys.local_index,
            keys.remote_index,
            keys.is_initiator,
            peer.internal_id,
        ));
        self.sessions.write().insert(
            keys.local_index,
            SessionIndexEntry::Keypair(peer.clone(), keypair.clone()),
        );
        keypair
    }

    /// Looks up the keypair a data message's `receiver` index names.
    pub fn keypair_by_local_index(&self, local_index: u32) -> Option<Arc<Keypair>> {
        self.session_by_local_index(local_index).map(|(_, kp)| kp)
    }

    fn session_by_local_index(&self, local_index: u32) -> Option<(Arc<Peer>, Arc<Keypair>)> {
        match self.sessions.read().get(&local_index)? {
            SessionIndexEntry::Keypair(peer, kp) => Some((peer.clone(), kp.clone())),
            SessionIndexEntry::Handshake(_) => None,
        }
    }

    /// `tunnel -> trie lookup (destination) -> peer -> current keypair -> encrypt -> datagram`
    /// (§2): seals `buf` in place under `dest`'s peer's current keypair, padding it to a multiple
    /// of 16 bytes first, and appends the authentication tag. Returns the header to prefix onto
    /// the ciphertext plus whether the keypair should be rekeyed (§6).
    pub fn encrypt_data(&self, dest: IpAddr, buf: &mut Vec<u8>) -> Result<(DataHeader, bool), DeviceError> {
        let peer = self.route(dest).ok_or(DeviceError::NoRoute)?;
        let (_, current, _) = peer.keypairs.snapshot();
        let keypair = current.ok_or(DeviceError::NoKeypair)?;
        if keypair.is_expired() {
            return Err(DeviceError::KeypairExpired);
        }

        let unpadded = buf.len();
        buf.resize(unpadded.next_multiple_of(16), 0);
        let (counter, tag) = keypair.send.seal(buf).ok_or(DeviceError::SendExhausted)?;
        buf.extend_from_slice(&tag.0);

        Ok((
            DataHeader::new(keypair.remote_index, counter),
            keypair.should_rekey(),
        ))
    }

    /// `datagram -> session-index table -> keypair -> decrypt -> replay-check -> trie lookup
    /// (source, to validate) -> tunnel` (§2): opens `buf` in place under the keypair `header`
    /// names, confirms the responder side of a pending handshake if this is its first packet
    /// (§4.2), and checks that the decrypted packet's own source address still routes back to
    /// the peer it arrived under — rejecting a peer that sends traffic spoofing another peer's
    /// allowed IPs. Returns the resolved peer on success.
    pub fn decrypt_data(
        &self,
        header: &DataHeader,
        buf: &mut [u8],
        tag: &Tag,
    ) -> Result<Arc<Peer>, DeviceError> {
        let (peer, keypair) = self
            .session_by_local_index(header.receiver.get())
            .ok_or(DeviceError::NoKeypair)?;
        if keypair.is_expired() {
            return Err(DeviceError::KeypairExpired);
        }

        keypair.recv.open(header.counter.get(), buf, tag)?;
        peer.received_with_keypair(&keypair);

        let src = packet_source_addr(buf).ok_or(DeviceError::NoRoute)?;
        if !self.route(src).is_some_and(|routed| Arc::ptr_eq(&routed, &peer)) {
            return Err(DeviceError::NoRoute);
        }

        Ok(peer)
    }

    /// §3's removal lifecycle: marks the peer dead, drops its session-table entries and
    /// keypairs, releases their indices back to the allocator, and removes its routes.
    pub fn remove_peer(&self, key: &PublicKey) {
        let Some(peer) = self.peers_by_pubkey.write().remove(&key.to_bytes()) else {
            return;
        };
        peer.mark_dead();
        peer.keypairs.clear();
        peer.handshake.write().clear();
        self.routing.write().remove_by(|p| Arc::ptr_eq(p, &peer));

        let mut freed_indices = Vec::new();
        self.sessions.write().retain(|&index, entry| {
            let keep = match entry {
                SessionIndexEntry::Handshake(weak) => weak
                    .upgrade()
                    .is_some_and(|p| !Arc::ptr_eq(&p, &peer)),
                SessionIndexEntry::Keypair(p, _) => !Arc::ptr_eq(p, &peer),
            };
            if !keep {
                freed_indices.push(index);
            }
            keep
        });

        let mut indices = self.indices.lock();
        for index in freed_indices {
            indices.free(index);
        }
    }
}

/// Extracts the source address from a decrypted transport payload by reading the IP version
/// nibble and the fixed source-address offset of the corresponding header (§2's source-routing
/// validation step). Returns `None` for anything that isn't a well-formed IPv4/IPv6 header.
fn packet_source_addr(buf: &[u8]) -> Option<IpAddr> {
    match buf.first()? >> 4 {
        4 if buf.len() >= 20 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&buf[12..16]);
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        6 if buf.len() >= 40 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[8..24]);
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}
