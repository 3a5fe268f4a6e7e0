//! HomeKit pair-setup, accessory side (M1-M6).
//!
//! SRP-6a proves knowledge of the setup code. The M5/M6 exchange then
//! swaps long-term Ed25519 keys under a key derived from the SRP session key.

use crate::traits::IdentityStore;
use hap_core::error::{Error, PairingError, Result};
use hap_crypto::{
    chacha::{self, labels, Nonce12},
    ed25519, hkdf,
    keys::{SessionKeys, SharedSecret},
    srp::{SrpServer, SrpVerifier, PAIR_SETUP_USERNAME, SALT_LEN},
    tlv::{Tlv8, TlvError, TlvType},
};
use rand::{CryptoRng, RngCore};
use tracing::{debug, info, warn};

/// Pair-setup methods accepted at M1.
const METHOD_PAIR_SETUP: u8 = 0;
const METHOD_PAIR_SETUP_WITH_AUTH: u8 = 1;

/// SRP session key held between M4 and M5.
pub struct PendingExchange {
    session_key: SharedSecret,
}

/// Per-connection setup state.
#[derive(Default)]
pub enum SetupState {
    #[default]
    Idle,
    AwaitingProof(Box<SrpServer>),
    AwaitingExchange(PendingExchange),
    Paired,
    Failed,
}

impl SetupState {
    pub fn name(&self) -> &'static str {
        match self {
            SetupState::Idle => "idle",
            SetupState::AwaitingProof(_) => "awaiting-proof",
            SetupState::AwaitingExchange(_) => "awaiting-exchange",
            SetupState::Paired => "paired",
            SetupState::Failed => "failed",
        }
    }
}

impl std::fmt::Debug for SetupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of handling one setup request.
#[derive(Debug)]
pub enum SetupOutcome {
    Continue(Vec<u8>),
    /// M6 sent. The controller is now stored.
    Paired {
        response: Vec<u8>,
        controller_id: String,
    },
    Rejected {
        response: Vec<u8>,
        reason: Error,
    },
}

impl SetupOutcome {
    pub fn response(&self) -> &[u8] {
        match self {
            SetupOutcome::Continue(response)
            | SetupOutcome::Paired { response, .. }
            | SetupOutcome::Rejected { response, .. } => response,
        }
    }
}

#[derive(Debug)]
pub struct SetupTransition {
    pub state: SetupState,
    pub outcome: Result<SetupOutcome>,
}

impl SetupTransition {
    fn unchanged(state: SetupState, error: impl Into<Error>) -> Self {
        Self {
            state,
            outcome: Err(error.into()),
        }
    }

    fn reject(state: SetupState, message_state: u8, code: TlvError, reason: Error) -> Self {
        debug!(message_state, code = code.name(), "Pair-setup error response");
        Self {
            state,
            outcome: Ok(SetupOutcome::Rejected {
                response: Tlv8::new()
                    .with_state(message_state)
                    .with_error(code)
                    .encode(),
                reason,
            }),
        }
    }
}

/// Advance the pair-setup state machine by one request body.
pub fn transition<S, R>(
    state: SetupState,
    body: &[u8],
    store: &S,
    setup_code: &str,
    rng: &mut R,
) -> SetupTransition
where
    S: IdentityStore + ?Sized,
    R: RngCore + CryptoRng,
{
    let tlv = match Tlv8::parse(body) {
        Ok(tlv) => tlv,
        Err(e) => return SetupTransition::unchanged(state, e),
    };

    let Some(message_state) = tlv.state() else {
        return SetupTransition::unchanged(state, PairingError::MissingTlv(TlvType::State as u8));
    };

    match (message_state, state) {
        (1, state) => handle_start(state, &tlv, store, setup_code, rng),
        (3, SetupState::AwaitingProof(server)) => handle_verify(server, &tlv),
        (5, SetupState::AwaitingExchange(pending)) => handle_exchange(pending, &tlv, store),
        (other, state) => {
            debug!(message_state = other, state = state.name(), "Unexpected pair-setup state");
            let expected = match state {
                SetupState::AwaitingProof(_) => "M3",
                SetupState::AwaitingExchange(_) => "M5",
                _ => "M1",
            };
            SetupTransition::unchanged(
                state,
                PairingError::UnexpectedState {
                    expected,
                    actual: other,
                },
            )
        }
    }
}

fn handle_start<S, R>(
    previous: SetupState,
    tlv: &Tlv8,
    store: &S,
    setup_code: &str,
    rng: &mut R,
) -> SetupTransition
where
    S: IdentityStore + ?Sized,
    R: RngCore + CryptoRng,
{
    let method = match tlv.require(TlvType::Method) {
        Ok([method]) => *method,
        Ok(other) => {
            return SetupTransition::unchanged(
                previous,
                hap_core::error::ParseError::InvalidLength {
                    field: "method",
                    expected: 1,
                    actual: other.len(),
                },
            )
        }
        Err(e) => return SetupTransition::unchanged(previous, e),
    };

    if method != METHOD_PAIR_SETUP && method != METHOD_PAIR_SETUP_WITH_AUTH {
        warn!(method, "Unsupported pair-setup method");
        return SetupTransition::reject(
            SetupState::Idle,
            2,
            TlvError::Unknown,
            PairingError::UnsupportedMethod(method).into(),
        );
    }

    let paired = match store.has_controllers() {
        Ok(paired) => paired,
        Err(e) => {
            warn!(error = %e, "Pair-setup could not read identity store");
            return SetupTransition::unchanged(previous, e);
        }
    };
    if paired {
        info!("Pair-setup refused, accessory already paired");
        return SetupTransition::reject(
            SetupState::Idle,
            2,
            TlvError::Unavailable,
            PairingError::Unavailable.into(),
        );
    }

    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);
    let verifier = SrpVerifier::generate(PAIR_SETUP_USERNAME, setup_code.as_bytes(), salt);
    let server = SrpServer::new(verifier, rng);

    let response = Tlv8::new()
        .with_state(2)
        .with(TlvType::Salt, salt.as_slice())
        .with(TlvType::PublicKey, server.public_key())
        .encode();

    debug!(method, "Pair-setup M2 sent");
    SetupTransition {
        state: SetupState::AwaitingProof(Box::new(server)),
        outcome: Ok(SetupOutcome::Continue(response)),
    }
}

fn handle_verify(server: Box<SrpServer>, tlv: &Tlv8) -> SetupTransition {
    let fields = tlv
        .require(TlvType::PublicKey)
        .and_then(|a| tlv.require(TlvType::Proof).map(|m1| (a, m1)));
    let (client_public, client_proof) = match fields {
        Ok(fields) => fields,
        Err(e) => return SetupTransition::unchanged(SetupState::AwaitingProof(server), e),
    };

    match server.verify_client(client_public, client_proof) {
        Ok(session) => {
            debug!("Pair-setup SRP proof accepted");
            let response = Tlv8::new()
                .with_state(4)
                .with(TlvType::Proof, session.server_proof.as_slice())
                .encode();
            SetupTransition {
                state: SetupState::AwaitingExchange(PendingExchange {
                    session_key: SharedSecret::new(session.shared_secret.clone()),
                }),
                outcome: Ok(SetupOutcome::Continue(response)),
            }
        }
        Err(e) => {
            warn!(error = %e, "Pair-setup SRP verification failed");
            SetupTransition::reject(
                SetupState::Failed,
                4,
                TlvError::Authentication,
                PairingError::SrpVerificationFailed.into(),
            )
        }
    }
}

fn handle_exchange<S>(pending: PendingExchange, tlv: &Tlv8, store: &S) -> SetupTransition
where
    S: IdentityStore + ?Sized,
{
    let encrypted = match tlv.require(TlvType::EncryptedData) {
        Ok(data) => data.to_vec(),
        Err(e) => return SetupTransition::unchanged(SetupState::AwaitingExchange(pending), e),
    };

    match exchange(&pending.session_key, &encrypted, store) {
        Ok((response, controller_id)) => {
            info!(controller = %controller_id, "Pair-setup complete");
            SetupTransition {
                state: SetupState::Paired,
                outcome: Ok(SetupOutcome::Paired {
                    response,
                    controller_id,
                }),
            }
        }
        Err(e) => {
            warn!(error = %e, "Pair-setup M5 rejected");
            SetupTransition::reject(SetupState::Failed, 6, TlvError::Authentication, e)
        }
    }
}

/// Verify the controller's M5 identity, store it, and build M6.
fn exchange<S>(session_key: &SharedSecret, encrypted: &[u8], store: &S) -> Result<(Vec<u8>, String)>
where
    S: IdentityStore + ?Sized,
{
    let key = SessionKeys::derive_pair_setup_key(session_key)?;

    let plaintext = chacha::open(
        key.as_bytes(),
        &Nonce12::from_label(labels::PS_MSG05),
        encrypted,
        &[],
    )?;

    let sub_tlv = Tlv8::parse(&plaintext)?;
    let identifier = sub_tlv.require(TlvType::Identifier)?;
    let controller_ltpk = sub_tlv.require_array::<32>(TlvType::PublicKey)?;
    let signature = sub_tlv.require_array::<64>(TlvType::Signature)?;
    let controller_id = String::from_utf8(identifier.to_vec())
        .map_err(|_| PairingError::Protocol("controller identifier is not UTF-8".to_string()))?;

    let controller_x = hkdf::derive_controller_sign_key(session_key.as_bytes())?;
    let mut info = Vec::with_capacity(32 + identifier.len() + 32);
    info.extend_from_slice(&controller_x);
    info.extend_from_slice(identifier);
    info.extend_from_slice(&controller_ltpk);
    ed25519::verify(&controller_ltpk, &info, &signature)
        .map_err(|_| PairingError::SignatureInvalid)?;

    store.add_controller(&controller_id, controller_ltpk, true)?;

    let accessory_id = store.accessory_id();
    let keypair = store.accessory_keypair();
    let accessory_ltpk = keypair.public_key();

    let accessory_x = hkdf::derive_accessory_sign_key(session_key.as_bytes())?;
    let mut info = Vec::with_capacity(32 + accessory_id.len() + 32);
    info.extend_from_slice(&accessory_x);
    info.extend_from_slice(accessory_id.as_bytes());
    info.extend_from_slice(&accessory_ltpk);
    let accessory_signature = keypair.sign(&info);

    let sub_tlv = Tlv8::new()
        .with(TlvType::Identifier, accessory_id.as_bytes())
        .with(TlvType::PublicKey, accessory_ltpk.as_slice())
        .with(TlvType::Signature, accessory_signature.as_slice())
        .encode();

    let encrypted = chacha::seal(
        key.as_bytes(),
        &Nonce12::from_label(labels::PS_MSG06),
        &sub_tlv,
        &[],
    )?;

    let response = Tlv8::new()
        .with_state(6)
        .with(TlvType::EncryptedData, encrypted)
        .encode();

    Ok((response, controller_id))
}

/// Owns the setup state for one connection.
#[derive(Debug, Default)]
pub struct PairSetup {
    state: SetupState,
}

impl PairSetup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one `/pair-setup` body.
    pub fn handle<S, R>(
        &mut self,
        body: &[u8],
        store: &S,
        setup_code: &str,
        rng: &mut R,
    ) -> Result<SetupOutcome>
    where
        S: IdentityStore + ?Sized,
        R: RngCore + CryptoRng,
    {
        let state = std::mem::take(&mut self.state);
        let SetupTransition { state, outcome } = transition(state, body, store, setup_code, rng);
        self.state = state;
        outcome
    }

    pub fn state(&self) -> &SetupState {
        &self.state
    }
}
