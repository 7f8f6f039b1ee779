//! Transport-data encryption and the receive-side replay window (§4.3, §6).
//!
//! Deliberately synchronization-free: this crate is a leaf (§2 — "the replay counter and the
//! trie... have no dependency on other core components") and stays `no_std`. The caller
//! (`rustyguard-core`) supplies whatever lock or atomic wraps these values; see DESIGN.md.
use chacha20poly1305::{AeadInPlace, ChaCha20Poly1305, KeyInit};
use rustyguard_types::Tag;

use crate::prim::{nonce, Key};
use crate::CryptoError;

/// Width of the receive replay window, in bits (§4.3).
pub const COUNTER_BITS_TOTAL: usize = 2048;
const COUNTER_WORDS: usize = COUNTER_BITS_TOTAL / 64;

/// A sliding bitmap of the last `COUNTER_BITS_TOTAL` received counters (§4.3).
#[derive(Default, Clone)]
pub struct ReplayCounter {
    last: u64,
    window: [u64; COUNTER_WORDS],
}

impl ReplayCounter {
    fn word_and_bit(counter: u64) -> (usize, u64) {
        let word = (counter / 64) as usize % COUNTER_WORDS;
        let bit = 1u64 << (counter % 64);
        (word, bit)
    }

    fn test_bit(&self, counter: u64) -> bool {
        let (word, bit) = Self::word_and_bit(counter);
        self.window[word] & bit != 0
    }

    fn set_bit(&mut self, counter: u64) {
        let (word, bit) = Self::word_and_bit(counter);
        self.window[word] |= bit;
    }

    /// Clears the words that the window is about to slide into, so stale accept-bits from the
    /// previous cycle around this same word don't linger. Uses non-modular (cardinal) word
    /// indices for `old`/`new` so the number of words cleared is exactly the number of word
    /// boundaries crossed, not one more than that.
    fn slide(&mut self, delta: u64) {
        if delta as usize >= COUNTER_BITS_TOTAL {
            self.window = [0; COUNTER_WORDS];
            return;
        }
        let old_index = self.last / 64;
        let new_index = (self.last + delta) / 64;
        let words_to_clear = (new_index - old_index).min(COUNTER_WORDS as u64);
        for i in 1..=words_to_clear {
            let word = ((old_index + i) % COUNTER_WORDS as u64) as usize;
            self.window[word] = 0;
        }
    }

    /// Implements the four-step accept rule of §4.3. Returns `true` iff `counter` is accepted,
    /// in which case its bit is now recorded as seen.
    #[must_use]
    pub fn accept(&mut self, counter: u64) -> bool {
        const REJECT_AFTER: u64 = u64::MAX - COUNTER_BITS_TOTAL as u64 - 1;
        if counter >= REJECT_AFTER {
            return false;
        }
        if counter + COUNTER_BITS_TOTAL as u64 < self.last {
            return false;
        }
        if counter > self.last {
            self.slide(counter - self.last);
            self.last = counter;
            self.set_bit(counter);
            true
        } else if self.test_bit(counter) {
            false
        } else {
            self.set_bit(counter);
            true
        }
    }

    pub fn last(&self) -> u64 {
        self.last
    }
}

/// A one-directional transport key used only to seal outbound data packets.
pub struct EncryptionKey(Key);

impl EncryptionKey {
    pub fn new(key: Key) -> Self {
        Self(key)
    }

    /// Encrypts `buf` in place (plaintext padded to a multiple of 16 bytes per §6) and returns
    /// the detached tag.
    pub fn seal_in_place(&self, counter: u64, buf: &mut [u8]) -> Tag {
        let tag = ChaCha20Poly1305::new(&self.0)
            .encrypt_in_place_detached(&nonce(counter), &[], buf)
            .expect("message should not be larger than max message size");
        Tag(tag.into())
    }
}

/// A one-directional transport key used only to open inbound data packets.
pub struct DecryptionKey(Key);

impl DecryptionKey {
    pub fn new(key: Key) -> Self {
        Self(key)
    }

    pub fn open_in_place(&self, counter: u64, buf: &mut [u8], tag: &Tag) -> Result<(), CryptoError> {
        let tag = chacha20poly1305::Tag::clone_from_slice(&tag.0);
        ChaCha20Poly1305::new(&self.0)
            .decrypt_in_place_detached(&nonce(counter), &[], buf, &tag)
            .map_err(|_| CryptoError::DecryptionError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_window_basic() {
        let mut c = ReplayCounter::default();
        assert!(c.accept(0));
        assert!(c.accept(1));
        assert!(c.accept(2));
        assert!(c.accept(5));

        assert!(!c.accept(1)); // duplicate
        assert!(c.accept(3));
        assert!(c.accept(4));
        assert!(!c.accept(5)); // duplicate
    }

    #[test]
    fn replay_window_slide() {
        let mut c = ReplayCounter::default();
        assert!(c.accept(4096));
        assert!(!c.accept(2048));
        assert!(c.accept(2049));
    }

    /// A slide that lands exactly on a word boundary (`last % 64 == 0`) must clear only the
    /// words actually vacated, not one extra — otherwise a still-in-window accepted counter gets
    /// wiped and can be replayed.
    #[test]
    fn slide_on_word_boundary_does_not_erase_in_window_bit() {
        let mut c = ReplayCounter::default();
        assert!(c.accept(2048)); // last = 2048, word 32 % 32 = word 0
        assert!(c.accept(150)); // word 2, still within the 2048-wide window
        assert!(c.accept(2112)); // delta = 64, crosses exactly one word boundary (word 1)
        assert!(!c.accept(150)); // must still be rejected as a replay
    }

    #[test]
    fn transport_round_trip() {
        let key = Key::default();
        let enc = EncryptionKey::new(key);
        let dec = DecryptionKey::new(key);

        let mut buf = *b"hello, world!!!!"; // 16 bytes, already block aligned
        let tag = enc.seal_in_place(7, &mut buf);
        dec.open_in_place(7, &mut buf, &tag).unwrap();
        assert_eq!(&buf, b"hello, world!!!!");
    }
}
