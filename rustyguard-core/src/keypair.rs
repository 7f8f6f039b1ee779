//! Keypair lifecycle (§3, §4.2): the per-session transport keys derived from a completed
//! handshake, and the three-slot rotation rule that keeps at most one previous/current/next
//! keypair alive per peer.
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rustyguard_crypto::{consts, CryptoError, DecryptionKey, EncryptionKey, ReplayCounter};
use rustyguard_types::Tag;

/// Outbound half of a keypair: an atomic send counter checked against `REJECT_AFTER_MESSAGES`,
/// plus an `is_valid` flag set by `KeypairSet::expire_current` (§4.2). Expiry only ever turns
/// this flag off; it never destroys `key`, so a `ReceivingKey` built from the same handshake can
/// keep decrypting packets already in flight.
pub struct SendingKey {
    key: EncryptionKey,
    counter: AtomicU64,
    valid: AtomicBool,
}

impl SendingKey {
    fn new(key: EncryptionKey) -> Self {
        Self {
            key,
            counter: AtomicU64::new(0),
            valid: AtomicBool::new(true),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    fn invalidate(&self) {
        self.valid.store(false, Ordering::Release);
    }

    /// Reserves the next counter value and seals `buf` under it. Returns `None` if the key has
    /// been invalidated (§4.2's `expire_current`) or once the keypair's message budget
    /// (`REJECT_AFTER_MESSAGES`, §4.2/§6) is exhausted; either way the caller must rekey before
    /// sending again.
    pub fn seal(&self, buf: &mut [u8]) -> Option<(u64, Tag)> {
        if !self.is_valid() {
            return None;
        }
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        if counter >= consts::REJECT_AFTER_MESSAGES {
            self.invalidate();
            return None;
        }
        Some((counter, self.key.seal_in_place(counter, buf)))
    }
}

/// Inbound half of a keypair: the replay window behind a lock, since packets for one keypair can
/// be processed from more than one worker.
pub struct ReceivingKey {
    key: DecryptionKey,
    window: Mutex<ReplayCounter>,
}

impl ReceivingKey {
    fn new(key: DecryptionKey) -> Self {
        Self {
            key,
            window: Mutex::new(ReplayCounter::default()),
        }
    }

    /// Runs the §4.3 replay-window check and, only if accepted, opens `buf` in place.
    pub fn open(&self, counter: u64, buf: &mut [u8], tag: &Tag) -> Result<(), CryptoError> {
        if !self.window.lock().accept(counter) {
            return Err(CryptoError::Rejected);
        }
        self.key.open_in_place(counter, buf, tag)
    }
}

/// One completed handshake's transport keys (§3, §4.1's `begin_session`).
pub struct Keypair {
    pub send: SendingKey,
    pub recv: ReceivingKey,
    pub local_index: u32,
    pub remote_index: u32,
    pub is_initiator: bool,
    pub internal_id: u64,
    birth: Instant,
}

impl Keypair {
    pub fn new(
        send: EncryptionKey,
        recv: DecryptionKey,
        local_index: u32,
        remote_index: u32,
        is_initiator: bool,
        internal_id: u64,
    ) -> Self {
        Self {
            send: SendingKey::new(send),
            recv: ReceivingKey::new(recv),
            local_index,
            remote_index,
            is_initiator,
            internal_id,
            birth: Instant::now(),
        }
    }

    /// Whether a rekey should be attempted (§6, `REKEY_AFTER_TIME_SECS`).
    pub fn should_rekey(&self) -> bool {
        self.birth.elapsed().as_secs() >= consts::REKEY_AFTER_TIME_SECS
    }

    /// Whether the keypair is past its hard expiry (§6, `REJECT_AFTER_TIME_SECS`) and must no
    /// longer be used in either direction.
    pub fn is_expired(&self) -> bool {
        self.birth.elapsed().as_secs() >= consts::REJECT_AFTER_TIME_SECS
    }
}

#[derive(Default)]
struct Slots {
    previous: Option<Arc<Keypair>>,
    current: Option<Arc<Keypair>>,
    next: Option<Arc<Keypair>>,
}

/// The three-slot rotation rule of §4.2. A plain mutex, not a `RwLock`: every access either
/// mutates a slot or clones an `Arc` out from under the lock, so there is no reader path worth
/// serving concurrently.
#[derive(Default)]
pub struct KeypairSet {
    slots: Mutex<Slots>,
}

impl KeypairSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a keypair created as the initiator: becomes `current` immediately, since the
    /// initiator already knows the handshake succeeded once it has decrypted message 2.
    pub fn install_as_initiator(&self, new: Arc<Keypair>) {
        let mut slots = self.slots.lock();
        slots.previous = slots.current.take();
        slots.current = Some(new);
        slots.next = None;
    }

    /// Installs a keypair created as the responder: becomes `next`, pending confirmation that the
    /// initiator actually received message 2.
    pub fn install_as_responder(&self, new: Arc<Keypair>) {
        self.slots.lock().next = Some(new);
    }

    /// Called on receiving a data packet under `received`: promotes `next` to `current` iff they
    /// are the same keypair, confirming the responder side of a handshake.
    pub fn received_with_keypair(&self, received: &Arc<Keypair>) -> bool {
        let mut slots = self.slots.lock();
        let Some(next) = &slots.next else {
            return false;
        };
        if !Arc::ptr_eq(next, received) {
            return false;
        }
        slots.previous = slots.current.take();
        slots.current = slots.next.take();
        true
    }

    /// §4.2: marks the sending half of all three slots invalid, so no further packets are sent
    /// under any of them. Receiving halves are left untouched and the slots themselves are not
    /// cleared, so packets already in flight under `previous`/`current` keep decrypting.
    pub fn expire_current(&self) {
        let slots = self.slots.lock();
        for kp in [&slots.previous, &slots.current, &slots.next]
            .into_iter()
            .flatten()
        {
            kp.send.invalidate();
        }
    }

    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        slots.previous = None;
        slots.current = None;
        slots.next = None;
    }

    /// A consistent snapshot of all three slots, cloned out from under the lock so the caller
    /// never holds this lock during an encrypt/decrypt call.
    pub fn snapshot(&self) -> (Option<Arc<Keypair>>, Option<Arc<Keypair>>, Option<Arc<Keypair>>) {
        let slots = self.slots.lock();
        (
            slots.previous.clone(),
            slots.current.clone(),
            slots.next.clone(),
        )
    }

    pub fn find_by_remote_index(&self, remote_index: u32) -> Option<Arc<Keypair>> {
        let slots = self.slots.lock();
        [&slots.previous, &slots.current, &slots.next]
            .into_iter()
            .flatten()
            .find(|kp| kp.remote_index == remote_index)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_keypair(remote_index: u32) -> Arc<Keypair> {
        let key = rustyguard_crypto::Key::default();
        Arc::new(Keypair::new(
            EncryptionKey::new(key),
            DecryptionKey::new(key),
            1,
            remote_index,
            true,
            0,
        ))
    }

    /// §8/§4.2: installing as initiator makes the new keypair `current` right away.
    #[test]
    fn install_as_initiator_is_immediate() {
        let set = KeypairSet::new();
        let kp = dummy_keypair(1);
        set.install_as_initiator(kp.clone());
        let (_, current, _) = set.snapshot();
        assert!(current.is_some_and(|c| Arc::ptr_eq(&c, &kp)));
    }

    /// §8/§4.2: a responder keypair only becomes `current` after `received_with_keypair`
    /// confirms it.
    #[test]
    fn install_as_responder_waits_for_confirmation() {
        let set = KeypairSet::new();
        let kp = dummy_keypair(1);
        set.install_as_responder(kp.clone());

        let (_, current, next) = set.snapshot();
        assert!(current.is_none());
        assert!(next.is_some_and(|n| Arc::ptr_eq(&n, &kp)));

        assert!(set.received_with_keypair(&kp));
        let (previous, current, next) = set.snapshot();
        assert!(current.is_some_and(|c| Arc::ptr_eq(&c, &kp)));
        assert!(next.is_none());
        assert!(previous.is_none());
    }

    #[test]
    fn received_with_keypair_rejects_mismatch() {
        let set = KeypairSet::new();
        let kp = dummy_keypair(1);
        let other = dummy_keypair(2);
        set.install_as_responder(kp);
        assert!(!set.received_with_keypair(&other));
    }

    /// §4.2: `expire_current` invalidates sending on every slot without clearing any of them, so
    /// a packet already in flight under `previous` can still be decrypted afterwards.
    #[test]
    fn expire_current_invalidates_sending_but_keeps_slots() {
        let set = KeypairSet::new();
        let first = dummy_keypair(1);
        let second = dummy_keypair(2);
        set.install_as_initiator(first.clone());
        set.install_as_initiator(second.clone());

        let (previous, current, _) = set.snapshot();
        assert!(previous.is_some_and(|p| Arc::ptr_eq(&p, &first)));
        assert!(current.is_some_and(|c| Arc::ptr_eq(&c, &second)));

        set.expire_current();

        let (previous, current, _) = set.snapshot();
        assert!(previous.is_some());
        assert!(current.is_some());
        assert!(!first.send.is_valid());
        assert!(!second.send.is_valid());
    }

    #[test]
    fn seal_returns_none_once_invalidated() {
        let kp = dummy_keypair(1);
        let mut buf = [0u8; 16];
        assert!(kp.send.seal(&mut buf).is_some());
        kp.send.invalidate();
        assert!(kp.send.seal(&mut buf).is_none());
    }
}
