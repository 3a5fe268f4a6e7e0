//! # hap-pairing
//!
//! Accessory side of HomeKit pairing.
//!
//! This crate implements:
//! - pair-setup (SRP-6a, M1-M6)
//! - pair-verify (Curve25519 + Ed25519, M1-M4)
//! - the encrypted record layer used after verify
//! - identity stores (in-memory and JSON file)
//! - Bonjour TXT record fields

pub mod advertise;
mod channel;
mod connection;
pub mod pair_setup;
pub mod pair_verify;
mod session;
mod store;
mod traits;

pub use channel::{EncryptedChannel, MAX_FRAME_PAYLOAD};
pub use connection::SecureStream;
pub use pair_setup::{PairSetup, SetupOutcome, SetupState};
pub use pair_verify::{PairVerify, VerifyOutcome, VerifyState};
pub use session::{PairingSession, Response};
pub use store::{ControllerRecord, FileStore, MemoryStore};
pub use traits::IdentityStore;
