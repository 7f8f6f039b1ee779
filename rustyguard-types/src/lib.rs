//! Fixed-size wire-format structs for the four WireGuard message kinds (§6).
//!
//! Every struct here is `#[repr(C)]` and derives `zerocopy`'s `FromBytes`/`FromZeroes`/`AsBytes`
//! so a received datagram can be reinterpreted in place without a copy, and so `compute_mac1`
//! (in `rustyguard-crypto`) can hash a struct's leading bytes by offset. This crate has no
//! crypto dependency: it only describes layout.
#![no_std]

use zerocopy::{little_endian, AsBytes, FromBytes, FromZeroes};

/// Type-field value for a handshake initiation message.
pub const MSG_FIRST: u32 = 1;
/// Type-field value for a handshake response message.
pub const MSG_SECOND: u32 = 2;
/// Type-field value for a cookie reply message.
pub const MSG_COOKIE_REPLY: u32 = 3;
/// Type-field value for a transport data message.
pub const MSG_DATA: u32 = 4;

/// A detached Poly1305 authentication tag.
#[derive(Clone, Copy, Default, PartialEq, Eq, FromBytes, FromZeroes, AsBytes)]
#[repr(transparent)]
pub struct Tag(pub [u8; 16]);

/// An opaque cookie-reply token, MAC'd over the sender's source address (§4.1's cookie-reply
/// collaborator; cryptography not re-specified, see spec.md §1).
#[derive(Clone, Copy, Default, PartialEq, Eq, FromBytes, FromZeroes, AsBytes)]
#[repr(transparent)]
pub struct Cookie(pub [u8; 16]);

macro_rules! encrypted {
    ($name:ident, $n:literal) => {
        #[doc = concat!("An encrypted, authenticated ", stringify!($n), "-byte payload plus its 16-byte tag.")]
        #[derive(Clone, Copy, FromBytes, FromZeroes, AsBytes)]
        #[repr(C)]
        pub struct $name {
            pub msg: [u8; $n],
            pub tag: Tag,
        }

        impl $name {
            pub fn new(msg: [u8; $n], tag: Tag) -> Self {
                Self { msg, tag }
            }
        }
    };
}

encrypted!(EncryptedEmpty, 0);
encrypted!(EncryptedTimestamp, 12);
encrypted!(EncryptedPublicKey, 32);

/// Cookie, encrypted under XChaCha20-Poly1305 with a detached 24-byte nonce (see
/// `CookieReply::nonce`).
#[derive(Clone, Copy, FromBytes, FromZeroes, AsBytes)]
#[repr(C)]
pub struct EncryptedCookie {
    pub msg: Cookie,
    pub tag: Tag,
}

impl EncryptedCookie {
    pub fn new(msg: Cookie, tag: Tag) -> Self {
        Self { msg, tag }
    }
}

/// Message 1 of the Noise IK(psk2) handshake (§6, 148 bytes).
#[derive(Clone, Copy, FromBytes, FromZeroes, AsBytes)]
#[repr(C)]
pub struct HandshakeInit {
    pub _type: little_endian::U32,
    pub sender: little_endian::U32,
    pub ephemeral_key: [u8; 32],
    pub static_key: EncryptedPublicKey,
    pub timestamp: EncryptedTimestamp,
    pub mac1: [u8; 16],
    pub mac2: [u8; 16],
}

/// Message 2 of the Noise IK(psk2) handshake (§6, 92 bytes).
#[derive(Clone, Copy, FromBytes, FromZeroes, AsBytes)]
#[repr(C)]
pub struct HandshakeResp {
    pub _type: little_endian::U32,
    pub sender: little_endian::U32,
    pub receiver: little_endian::U32,
    pub ephemeral_key: [u8; 32],
    pub empty: EncryptedEmpty,
    pub mac1: [u8; 16],
    pub mac2: [u8; 16],
}

/// Cookie reply (§6, 64 bytes). Sent instead of a handshake response when the responder is
/// overloaded and the initiator's MAC2 did not validate.
#[derive(Clone, Copy, FromBytes, FromZeroes, AsBytes)]
#[repr(C)]
pub struct CookieReply {
    pub _type: little_endian::U32,
    pub receiver: little_endian::U32,
    pub nonce: [u8; 24],
    pub cookie: EncryptedCookie,
}

/// Fixed 16-byte header in front of a transport data message (§6). The ciphertext (plaintext
/// packet, zero-padded to a multiple of 16 bytes) plus its 16-byte tag follow immediately after.
#[derive(Clone, Copy, FromBytes, FromZeroes, AsBytes)]
#[repr(C)]
pub struct DataHeader {
    pub _type: little_endian::U32,
    pub receiver: little_endian::U32,
    pub counter: little_endian::U64,
}

impl DataHeader {
    pub fn new(receiver: u32, counter: u64) -> Self {
        Self {
            _type: little_endian::U32::new(MSG_DATA),
            receiver: little_endian::U32::new(receiver),
            counter: little_endian::U64::new(counter),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_sizes_match_wire_format() {
        assert_eq!(core::mem::size_of::<HandshakeInit>(), 148);
        assert_eq!(core::mem::size_of::<HandshakeResp>(), 92);
        assert_eq!(core::mem::size_of::<CookieReply>(), 64);
        assert_eq!(core::mem::size_of::<DataHeader>(), 16);
    }

    #[test]
    fn message_alignment_is_four() {
        assert_eq!(core::mem::align_of::<HandshakeInit>(), 4);
        assert_eq!(core::mem::align_of::<HandshakeResp>(), 4);
        assert_eq!(core::mem::align_of::<CookieReply>(), 4);
        assert_eq!(core::mem::align_of::<DataHeader>(), 4);
    }
}
