//! Per-connection pairing session.
//!
//! One `PairingSession` lives as long as one TCP connection. It routes
//! `/pair-setup` and `/pair-verify` bodies to their state machines and owns
//! the record layer once verify succeeds.

use crate::channel::EncryptedChannel;
use crate::pair_setup::{PairSetup, SetupOutcome};
use crate::pair_verify::{PairVerify, VerifyOutcome};
use crate::traits::IdentityStore;
use hap_core::error::Result;
use hap_crypto::keys::SessionKeys;
use rand::{CryptoRng, RngCore};
use std::sync::Arc;
use tracing::debug;

/// Reply to a pairing request.
#[derive(Debug)]
pub struct Response {
    /// TLV8 body for `application/pairing+tlv8`.
    pub body: Vec<u8>,
    /// Set when this reply completes pair-verify.
    pub established: Option<SessionKeys>,
}

impl Response {
    fn plain(body: Vec<u8>) -> Self {
        Self {
            body,
            established: None,
        }
    }
}

pub struct PairingSession<S: ?Sized, R> {
    store: Arc<S>,
    rng: R,
    setup_code: String,
    verify: PairVerify,
    setup: PairSetup,
    channel: Option<EncryptedChannel>,
    controller_id: Option<String>,
}

impl<S, R> PairingSession<S, R>
where
    S: IdentityStore + ?Sized,
    R: RngCore + CryptoRng,
{
    pub fn new(store: Arc<S>, setup_code: impl Into<String>, rng: R) -> Self {
        Self {
            store,
            rng,
            setup_code: setup_code.into(),
            verify: PairVerify::new(),
            setup: PairSetup::new(),
            channel: None,
            controller_id: None,
        }
    }

    /// Handle a `/pair-verify` body.
    ///
    /// On success the record layer is installed. The returned body must
    /// still be sent in plaintext.
    pub fn handle_pair_verify(&mut self, body: &[u8]) -> Result<Response> {
        match self.verify.handle(body, &*self.store, &mut self.rng)? {
            VerifyOutcome::Continue(body) => Ok(Response::plain(body)),
            VerifyOutcome::Established {
                response,
                keys,
                controller_id,
            } => {
                self.channel = Some(EncryptedChannel::new(keys.clone()));
                self.controller_id = Some(controller_id);
                Ok(Response {
                    body: response,
                    established: Some(keys),
                })
            }
            VerifyOutcome::Rejected { response, reason } => {
                debug!(kind = ?reason.kind(), "Pair-verify rejected: {}", reason);
                Ok(Response::plain(response))
            }
        }
    }

    /// Handle a `/pair-setup` body.
    pub fn handle_pair_setup(&mut self, body: &[u8]) -> Result<Response> {
        let outcome = self
            .setup
            .handle(body, &*self.store, &self.setup_code, &mut self.rng)?;
        if let SetupOutcome::Rejected { reason, .. } = &outcome {
            debug!(kind = ?reason.kind(), "Pair-setup rejected: {}", reason);
        }
        let body = match outcome {
            SetupOutcome::Continue(body)
            | SetupOutcome::Paired { response: body, .. }
            | SetupOutcome::Rejected { response: body, .. } => body,
        };
        Ok(Response::plain(body))
    }

    /// Whether the record layer is active.
    pub fn is_secure(&self) -> bool {
        self.channel.is_some()
    }

    pub fn channel_mut(&mut self) -> Option<&mut EncryptedChannel> {
        self.channel.as_mut()
    }

    /// Hand the record layer to the caller, e.g. to wrap the socket.
    pub fn take_channel(&mut self) -> Option<EncryptedChannel> {
        self.channel.take()
    }

    /// Controller authenticated by the last successful pair-verify.
    pub fn controller_id(&self) -> Option<&str> {
        self.controller_id.as_deref()
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}
