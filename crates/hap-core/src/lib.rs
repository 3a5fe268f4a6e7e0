//! # hap-core
//!
//! Error definitions and configuration shared across the accessory crates.

pub mod config;
pub mod error;

pub use config::{AccessoryConfig, AccessoryConfigBuilder};
pub use error::{
    CryptoError, Error, ErrorKind, PairingError, ParseError, Result, SessionError, StoreError,
};
