//! HomeKit pair-verify, accessory side (M1-M4).
//!
//! Each verify attempt is an explicit [`VerifyState`] value threaded through
//! [`transition`]. Ephemeral key material lives only inside
//! [`VerifyState::AwaitingFinish`] and is dropped once M3 is handled.
//!
//! ```text
//! Start --M1--> AwaitingFinish --M3 ok--> Success
//!                     |
//!                     +--M3 bad--> Failed
//! ```
//!
//! A fresh M1 is accepted from any state and replaces the attempt in flight.

use crate::traits::IdentityStore;
use hap_core::error::{Error, PairingError, Result};
use hap_crypto::{
    chacha::{self, labels, Nonce12},
    curve25519::EcdhKeyPair,
    ed25519,
    keys::{EncryptionKey, SessionKeys, SharedSecret},
    tlv::{Tlv8, TlvError, TlvType},
};
use rand::{CryptoRng, RngCore};
use tracing::{debug, info, warn};

/// Ephemeral material held between M2 and M3.
pub struct PendingVerify {
    accessory_public: [u8; 32],
    controller_public: [u8; 32],
    shared_secret: SharedSecret,
    handshake_key: EncryptionKey,
}

impl std::fmt::Debug for PendingVerify {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingVerify")
            .field("accessory_public", &hex::encode(self.accessory_public))
            .field("controller_public", &hex::encode(self.controller_public))
            .finish_non_exhaustive()
    }
}

/// Per-connection verify state.
#[derive(Debug, Default)]
pub enum VerifyState {
    #[default]
    Start,
    AwaitingFinish(PendingVerify),
    Success,
    Failed,
}

impl VerifyState {
    pub fn name(&self) -> &'static str {
        match self {
            VerifyState::Start => "start",
            VerifyState::AwaitingFinish(_) => "awaiting-finish",
            VerifyState::Success => "success",
            VerifyState::Failed => "failed",
        }
    }
}

/// Result of handling one verify request.
#[derive(Debug)]
pub enum VerifyOutcome {
    /// Reply and wait for the next message.
    Continue(Vec<u8>),
    /// Reply with `{state=4}`, then install the record layer.
    Established {
        response: Vec<u8>,
        keys: SessionKeys,
        controller_id: String,
    },
    /// Reply with an error TLV. The attempt is over.
    Rejected { response: Vec<u8>, reason: Error },
}

impl VerifyOutcome {
    /// Body to send back to the controller.
    pub fn response(&self) -> &[u8] {
        match self {
            VerifyOutcome::Continue(response)
            | VerifyOutcome::Established { response, .. }
            | VerifyOutcome::Rejected { response, .. } => response,
        }
    }
}

/// Next state plus what to tell the caller.
///
/// When `outcome` is an error the returned state equals the input state,
/// except for local failures after M1 was accepted.
#[derive(Debug)]
pub struct Transition {
    pub state: VerifyState,
    pub outcome: Result<VerifyOutcome>,
}

impl Transition {
    fn unchanged(state: VerifyState, error: impl Into<Error>) -> Self {
        Self {
            state,
            outcome: Err(error.into()),
        }
    }
}

/// Advance the pair-verify state machine by one request body.
pub fn transition<S, R>(state: VerifyState, body: &[u8], store: &S, rng: &mut R) -> Transition
where
    S: IdentityStore + ?Sized,
    R: RngCore + CryptoRng,
{
    let tlv = match Tlv8::parse(body) {
        Ok(tlv) => tlv,
        Err(e) => return Transition::unchanged(state, e),
    };

    let Some(message_state) = tlv.state() else {
        return Transition::unchanged(state, PairingError::MissingTlv(TlvType::State as u8));
    };

    match (message_state, state) {
        (1, state) => handle_start(state, &tlv, store, rng),
        (3, VerifyState::AwaitingFinish(pending)) => handle_finish(pending, &tlv, store),
        (3, state) => {
            debug!(state = state.name(), "Pair-verify M3 without a pending M1");
            Transition::unchanged(
                state,
                PairingError::UnexpectedState {
                    expected: "M1",
                    actual: 3,
                },
            )
        }
        (other, state) => {
            debug!(message_state = other, "Unexpected pair-verify state");
            Transition::unchanged(
                state,
                PairingError::UnexpectedState {
                    expected: "M1 or M3",
                    actual: other,
                },
            )
        }
    }
}

fn handle_start<S, R>(previous: VerifyState, tlv: &Tlv8, store: &S, rng: &mut R) -> Transition
where
    S: IdentityStore + ?Sized,
    R: RngCore + CryptoRng,
{
    let controller_public = match tlv.require_array::<32>(TlvType::PublicKey) {
        Ok(pk) => pk,
        Err(e) => return Transition::unchanged(previous, e),
    };

    if matches!(previous, VerifyState::AwaitingFinish(_)) {
        debug!("Pair-verify M1 replaces attempt in flight");
    }

    let ephemeral = EcdhKeyPair::generate(rng);
    let accessory_public = ephemeral.public_key();

    let shared = match ephemeral.diffie_hellman(&controller_public) {
        Ok(shared) => SharedSecret::new(shared.to_vec()),
        Err(e) => {
            warn!("Pair-verify M1 carried an unusable public key");
            return Transition {
                state: VerifyState::Failed,
                outcome: Ok(VerifyOutcome::Rejected {
                    response: error_response(2),
                    reason: e.into(),
                }),
            };
        }
    };

    match build_m2(store, &shared, &accessory_public, &controller_public) {
        Ok((response, handshake_key)) => {
            debug!("Pair-verify M2 sent");
            Transition {
                state: VerifyState::AwaitingFinish(PendingVerify {
                    accessory_public,
                    controller_public,
                    shared_secret: shared,
                    handshake_key,
                }),
                outcome: Ok(VerifyOutcome::Continue(response)),
            }
        }
        Err(e) => Transition {
            state: VerifyState::Failed,
            outcome: Err(e),
        },
    }
}

fn build_m2<S>(
    store: &S,
    shared: &SharedSecret,
    accessory_public: &[u8; 32],
    controller_public: &[u8; 32],
) -> Result<(Vec<u8>, EncryptionKey)>
where
    S: IdentityStore + ?Sized,
{
    let handshake_key = SessionKeys::derive_pair_verify_key(shared)?;

    let accessory_id = store.accessory_id();
    let keypair = store.accessory_keypair();

    let mut info = Vec::with_capacity(64 + accessory_id.len());
    info.extend_from_slice(accessory_public);
    info.extend_from_slice(accessory_id.as_bytes());
    info.extend_from_slice(controller_public);
    let signature = keypair.sign(&info);

    let sub_tlv = Tlv8::new()
        .with(TlvType::Identifier, accessory_id.as_bytes())
        .with(TlvType::Signature, signature.as_slice())
        .encode();

    let encrypted = chacha::seal(
        handshake_key.as_bytes(),
        &Nonce12::from_label(labels::PV_MSG02),
        &sub_tlv,
        &[],
    )?;

    let response = Tlv8::new()
        .with_state(2)
        .with(TlvType::PublicKey, accessory_public.as_slice())
        .with(TlvType::EncryptedData, encrypted)
        .encode();

    Ok((response, handshake_key))
}

fn handle_finish<S>(pending: PendingVerify, tlv: &Tlv8, store: &S) -> Transition
where
    S: IdentityStore + ?Sized,
{
    let encrypted = match tlv.require(TlvType::EncryptedData) {
        Ok(data) => data,
        Err(e) => return Transition::unchanged(VerifyState::AwaitingFinish(pending), e),
    };

    let plaintext = match chacha::open(
        pending.handshake_key.as_bytes(),
        &Nonce12::from_label(labels::PV_MSG03),
        encrypted,
        &[],
    ) {
        Ok(plaintext) => plaintext,
        Err(e) => {
            warn!("Pair-verify M3 failed authentication");
            return reject(e.into());
        }
    };

    let (controller_id, signature) = match parse_m3_payload(&plaintext) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, "Pair-verify M3 payload is unusable");
            return reject(e);
        }
    };

    // Lookup by identifier only. A missing key always yields the error TLV.
    let Some(controller_ltpk) = store.lookup_controller(&controller_id) else {
        warn!(controller = %controller_id, "Pair-verify from unknown controller");
        return reject(PairingError::UnknownController(controller_id).into());
    };

    let mut info = Vec::with_capacity(64 + controller_id.len());
    info.extend_from_slice(&pending.controller_public);
    info.extend_from_slice(controller_id.as_bytes());
    info.extend_from_slice(&pending.accessory_public);

    if ed25519::verify(&controller_ltpk, &info, &signature).is_err() {
        warn!(controller = %controller_id, "Pair-verify M3 signature invalid");
        return reject(PairingError::SignatureInvalid.into());
    }

    match SessionKeys::derive(&pending.shared_secret) {
        Ok(keys) => {
            info!(controller = %controller_id, "Pair-verify complete");
            Transition {
                state: VerifyState::Success,
                outcome: Ok(VerifyOutcome::Established {
                    response: Tlv8::new().with_state(4).encode(),
                    keys,
                    controller_id,
                }),
            }
        }
        Err(e) => Transition {
            state: VerifyState::Failed,
            outcome: Err(e.into()),
        },
    }
}

fn parse_m3_payload(plaintext: &[u8]) -> Result<(String, [u8; 64])> {
    let sub_tlv = Tlv8::parse(plaintext)?;
    let identifier = sub_tlv.require(TlvType::Identifier)?;
    let signature = sub_tlv.require_array::<64>(TlvType::Signature)?;
    let controller_id = String::from_utf8(identifier.to_vec())
        .map_err(|_| PairingError::Protocol("controller identifier is not UTF-8".to_string()))?;
    Ok((controller_id, signature))
}

fn reject(reason: Error) -> Transition {
    Transition {
        state: VerifyState::Failed,
        outcome: Ok(VerifyOutcome::Rejected {
            response: error_response(4),
            reason,
        }),
    }
}

fn error_response(state: u8) -> Vec<u8> {
    Tlv8::new()
        .with_state(state)
        .with_error(TlvError::Authentication)
        .encode()
}

/// Owns the verify state for one connection.
#[derive(Debug, Default)]
pub struct PairVerify {
    state: VerifyState,
}

impl PairVerify {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one `/pair-verify` body.
    pub fn handle<S, R>(&mut self, body: &[u8], store: &S, rng: &mut R) -> Result<VerifyOutcome>
    where
        S: IdentityStore + ?Sized,
        R: RngCore + CryptoRng,
    {
        let state = std::mem::take(&mut self.state);
        let Transition { state, outcome } = transition(state, body, store, rng);
        self.state = state;
        outcome
    }

    pub fn state(&self) -> &VerifyState {
        &self.state
    }

    pub fn is_established(&self) -> bool {
        matches!(self.state, VerifyState::Success)
    }
}
