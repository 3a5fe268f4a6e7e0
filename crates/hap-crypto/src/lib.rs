//! # hap-crypto
//!
//! Cryptographic primitives for HomeKit accessory pairing.
//!
//! This crate provides:
//! - TLV8 encoding for pairing messages
//! - SRP-6a (3072-bit) for pair-setup
//! - Curve25519 ECDH for pair-verify key agreement
//! - Ed25519 for long-term identity signatures
//! - ChaCha20-Poly1305 for AEAD encryption
//! - HKDF-SHA512 for key derivation
//!
//! Secret material is zeroized on drop. Every function that needs fresh
//! randomness takes the generator as an argument.

pub mod chacha;
pub mod curve25519;
pub mod ed25519;
pub mod hkdf;
pub mod keys;
pub mod srp;
pub mod tlv;

pub use chacha::{FrameCipher, Nonce12};
pub use keys::{EncryptionKey, SessionKeys, SharedSecret};
pub use tlv::{Tlv8, TlvError, TlvType};
