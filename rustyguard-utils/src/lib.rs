//! Supporting data structures shared by `rustyguard-core`: cryptokey routing (§5) and session
//! index allocation (§4.4). Like `rustyguard-crypto`, this crate has no dependency on the rest of
//! the workspace and carries no synchronization of its own — locking is added where these types
//! are embedded in `rustyguard-core`.

pub mod index;
pub mod trie;

pub use index::IndexAllocator;
pub use trie::{CryptoKeyRouting, RadixTrie};
