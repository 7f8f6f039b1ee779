//! The per-peer handshake state machine (§3, §4.1): `Zeroed -> CreatedInitiation -> Zeroed` on the
//! initiator side, `Zeroed -> ConsumedInitiation -> Zeroed` on the responder side, layered over
//! `rustyguard-crypto`'s pure transcript functions.
use std::time::{Duration, Instant};

use rand_core::{CryptoRng, RngCore};
use rustyguard_crypto::{
    consts, decrypt_handshake_init, decrypt_handshake_resp, derive_session_keys,
    encrypt_handshake_init, encrypt_handshake_resp, generate_ephemeral, CryptoError,
    DecryptedHandshakeInit, HandshakeState, Key, StaticInitiatorConfig, StaticPeerConfig,
};
use rustyguard_types::{HandshakeInit, HandshakeResp};
use tai64::Tai64N;
use x25519_dalek::StaticSecret;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    Crypto(CryptoError),
    /// The peer's claimed timestamp did not advance past the last one we accepted (§3/§8: the
    /// replay defense against initiation replay).
    StaleTimestamp,
    /// More initiations arrived from this peer than `INITIATIONS_PER_SECOND` allows (§6).
    RateLimited,
    /// No handshake is in flight, or the message doesn't match the stage it's being applied to.
    WrongStage,
}

impl From<CryptoError> for HandshakeError {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

enum Stage {
    Zeroed,
    CreatedInitiation {
        transcript: HandshakeState,
        esk_i: StaticSecret,
        local_index: u32,
    },
    ConsumedInitiation {
        transcript: HandshakeState,
        decrypted: DecryptedHandshakeInit,
    },
}

/// Keys derived by `begin_session`, handed to the caller (`Device`) to build a `Keypair`.
pub struct SessionKeys {
    pub send: Key,
    pub recv: Key,
    pub local_index: u32,
    pub remote_index: u32,
    pub is_initiator: bool,
}

/// Per-peer handshake state (§3's "per-peer transient handshake state").
pub struct Handshake {
    stage: Stage,
    latest_timestamp: Option<Tai64N>,
    last_initiation_consumption: Option<Instant>,
}

impl Default for Handshake {
    fn default() -> Self {
        Self {
            stage: Stage::Zeroed,
            latest_timestamp: None,
            last_initiation_consumption: None,
        }
    }
}

impl Handshake {
    pub fn new() -> Self {
        Self::default()
    }

    /// `create_initiation` (§4.1).
    pub fn create_initiation(
        &mut self,
        initiator: &StaticInitiatorConfig,
        peer: &StaticPeerConfig,
        local_index: u32,
        rng: &mut (impl CryptoRng + RngCore),
    ) -> HandshakeInit {
        let mut transcript = HandshakeState::default();
        let esk_i = generate_ephemeral(rng);
        let msg = encrypt_handshake_init(
            &mut transcript,
            initiator,
            peer,
            &esk_i,
            Tai64N::now(),
            local_index,
            None,
        );
        self.stage = Stage::CreatedInitiation {
            transcript,
            esk_i,
            local_index,
        };
        msg
    }

    /// The decrypt half of `consume_initiation` (§4.1): authenticates `msg`, enforces the
    /// `INITIATIONS_PER_SECOND` flood gate and the timestamp-monotonicity replay defense (§8),
    /// and moves this handshake to `ConsumedInitiation`. Peer lookup itself is `Device`'s job,
    /// since it owns the peer table this handshake is reached through.
    pub fn consume_initiation(
        &mut self,
        msg: &HandshakeInit,
        receiver: &StaticInitiatorConfig,
    ) -> Result<(), HandshakeError> {
        let mut transcript = HandshakeState::default();
        let decrypted = decrypt_handshake_init(msg, &mut transcript, receiver)?;

        let min_interval = Duration::from_secs(1) / consts::INITIATIONS_PER_SECOND;
        if let Some(last) = self.last_initiation_consumption {
            if last.elapsed() < min_interval {
                return Err(HandshakeError::RateLimited);
            }
        }

        if let Some(latest) = self.latest_timestamp {
            if decrypted.timestamp <= latest {
                return Err(HandshakeError::StaleTimestamp);
            }
        }

        self.latest_timestamp = Some(decrypted.timestamp);
        self.last_initiation_consumption = Some(Instant::now());
        self.stage = Stage::ConsumedInitiation {
            transcript,
            decrypted,
        };
        Ok(())
    }

    /// `create_response` (§4.1): builds message 2 and immediately derives this side's session
    /// keys, since the responder has everything it needs as soon as message 2 is built.
    pub fn create_response(
        &mut self,
        peer: &StaticPeerConfig,
        local_index: u32,
        rng: &mut (impl CryptoRng + RngCore),
    ) -> Result<(HandshakeResp, SessionKeys), HandshakeError> {
        let Stage::ConsumedInitiation {
            mut transcript,
            decrypted,
        } = core::mem::replace(&mut self.stage, Stage::Zeroed)
        else {
            return Err(HandshakeError::WrongStage);
        };

        let esk_r = generate_ephemeral(rng);
        let msg =
            encrypt_handshake_resp(&mut transcript, &decrypted, &esk_r, peer, local_index, None);
        let (send, recv) = derive_session_keys(&mut transcript, false);

        Ok((
            msg,
            SessionKeys {
                send,
                recv,
                local_index,
                remote_index: decrypted.sender,
                is_initiator: false,
            },
        ))
    }

    /// The decrypt half of `consume_response` (§4.1) plus `begin_session`'s key derivation: on
    /// success this handshake is complete and resets to `Zeroed`.
    pub fn consume_response(
        &mut self,
        msg: &HandshakeResp,
        initiator: &StaticInitiatorConfig,
        peer: &StaticPeerConfig,
    ) -> Result<SessionKeys, HandshakeError> {
        let Stage::CreatedInitiation {
            mut transcript,
            esk_i,
            local_index,
        } = core::mem::replace(&mut self.stage, Stage::Zeroed)
        else {
            return Err(HandshakeError::WrongStage);
        };

        decrypt_handshake_resp(msg, &mut transcript, initiator, peer, &esk_i)?;
        let (send, recv) = derive_session_keys(&mut transcript, true);

        Ok(SessionKeys {
            send,
            recv,
            local_index,
            remote_index: msg.sender.get(),
            is_initiator: true,
        })
    }

    pub fn is_in_progress(&self) -> bool {
        !matches!(self.stage, Stage::Zeroed)
    }

    pub fn clear(&mut self) {
        self.stage = Stage::Zeroed;
    }
}
