//! Error types for the accessory pairing stack.

use thiserror::Error;

/// Primary error type for all accessory operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Identity store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Operation timed out")]
    Timeout,
}

/// Coarse classification used by transports to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Undecodable input. Fatal to the message or connection.
    MalformedMessage,
    /// Tag, signature or proof rejected, or the peer is unknown.
    AuthenticationFailure,
    /// Message arrived out of order. No state was mutated.
    UnexpectedState,
    /// Transport failure.
    Io,
    /// Local failure unrelated to peer input.
    Internal,
}

/// Errors during pair-setup and pair-verify.
#[derive(Error, Debug)]
pub enum PairingError {
    #[error("Unknown controller: {0}")]
    UnknownController(String),

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("SRP verification failed")]
    SrpVerificationFailed,

    #[error("Unexpected pairing state: expected {expected}, got {actual}")]
    UnexpectedState { expected: &'static str, actual: u8 },

    #[error("Unsupported pairing method: {0}")]
    UnsupportedMethod(u8),

    #[error("Accessory is already paired")]
    Unavailable,

    #[error("Missing required TLV type: {0:#04x}")]
    MissingTlv(u8),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Cryptographic operation errors.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid public key")]
    InvalidPublicKey,

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("SRP proof mismatch")]
    ProofMismatch,

    #[error("Authentication tag mismatch")]
    AuthTagMismatch,
}

/// Parsing errors for wire formats.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("TLV8: truncated header at offset {offset}")]
    TruncatedHeader { offset: usize },

    #[error("TLV8: truncated value (expected {expected} bytes, got {available})")]
    TruncatedValue { expected: usize, available: usize },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid length for {field}: expected {expected}, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Record layer errors.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Frame length {0} exceeds maximum of 1024 bytes")]
    FrameTooLarge(usize),

    #[error("Empty frame")]
    EmptyFrame,

    #[error("Nonce counter exhausted")]
    CounterExhausted,

    #[error("Session terminated")]
    Terminated,
}

/// Identity store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt store entry: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

impl Error {
    /// Classify this error for transport-level handling.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::Timeout => ErrorKind::Io,
            Error::Parse(_) => ErrorKind::MalformedMessage,
            Error::Crypto(e) => match e {
                CryptoError::AuthTagMismatch
                | CryptoError::SignatureInvalid
                | CryptoError::ProofMismatch
                | CryptoError::InvalidPublicKey => ErrorKind::AuthenticationFailure,
                CryptoError::InvalidKeyLength { .. } => ErrorKind::MalformedMessage,
                CryptoError::Encryption(_) | CryptoError::KeyDerivation(_) => ErrorKind::Internal,
            },
            Error::Pairing(e) => match e {
                PairingError::UnknownController(_)
                | PairingError::SignatureInvalid
                | PairingError::SrpVerificationFailed => ErrorKind::AuthenticationFailure,
                PairingError::UnexpectedState { .. } => ErrorKind::UnexpectedState,
                PairingError::MissingTlv(_)
                | PairingError::UnsupportedMethod(_)
                | PairingError::Protocol(_) => ErrorKind::MalformedMessage,
                PairingError::Unavailable => ErrorKind::Internal,
            },
            Error::Session(e) => match e {
                SessionError::FrameTooLarge(_) | SessionError::EmptyFrame => {
                    ErrorKind::MalformedMessage
                }
                SessionError::Terminated => ErrorKind::AuthenticationFailure,
                SessionError::CounterExhausted => ErrorKind::Internal,
            },
            Error::Store(_) | Error::Config(_) => ErrorKind::Internal,
        }
    }
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats() {
        let err = Error::Pairing(PairingError::UnknownController("ABC".into()));
        assert!(err.to_string().contains("Pairing error"));
        assert!(err.to_string().contains("ABC"));

        let err = Error::Parse(ParseError::TruncatedValue {
            expected: 5,
            available: 2,
        });
        assert!(err.to_string().contains("expected 5 bytes, got 2"));

        let err = Error::Session(SessionError::FrameTooLarge(1025));
        assert!(err.to_string().contains("1025"));

        assert!(Error::Timeout.to_string().contains("timed out"));
    }

    #[test]
    fn error_source_chain() {
        use std::error::Error as StdError;

        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "test");
        let err = Error::Io(io_err);
        assert!(err.source().is_some());

        let err = Error::Crypto(CryptoError::AuthTagMismatch);
        assert!(err.source().is_some());
    }

    #[test]
    fn error_conversions() {
        let err: Error = PairingError::SignatureInvalid.into();
        assert!(matches!(err, Error::Pairing(_)));

        let err: Error = CryptoError::AuthTagMismatch.into();
        assert!(matches!(err, Error::Crypto(_)));

        let err: Error = ParseError::MissingField("state").into();
        assert!(matches!(err, Error::Parse(_)));

        let err: Error = SessionError::Terminated.into();
        assert!(matches!(err, Error::Session(_)));

        let err: Error = StoreError::Poisoned.into();
        assert!(matches!(err, Error::Store(_)));

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    mod kind {
        use super::*;

        #[test]
        fn parse_errors_are_malformed() {
            let err: Error = ParseError::TruncatedHeader { offset: 3 }.into();
            assert_eq!(err.kind(), ErrorKind::MalformedMessage);
            let err: Error = SessionError::FrameTooLarge(2000).into();
            assert_eq!(err.kind(), ErrorKind::MalformedMessage);
        }

        #[test]
        fn auth_failures_are_classified() {
            let cases: Vec<Error> = vec![
                CryptoError::AuthTagMismatch.into(),
                CryptoError::SignatureInvalid.into(),
                CryptoError::ProofMismatch.into(),
                PairingError::UnknownController("x".into()).into(),
                PairingError::SignatureInvalid.into(),
                PairingError::SrpVerificationFailed.into(),
            ];
            for err in cases {
                assert_eq!(err.kind(), ErrorKind::AuthenticationFailure, "{}", err);
            }
        }

        #[test]
        fn ordering_violation_is_unexpected_state() {
            let err: Error = PairingError::UnexpectedState {
                expected: "M1",
                actual: 3,
            }
            .into();
            assert_eq!(err.kind(), ErrorKind::UnexpectedState);
        }

        #[test]
        fn io_and_internal() {
            let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "x");
            assert_eq!(Error::from(io_err).kind(), ErrorKind::Io);
            assert_eq!(Error::Timeout.kind(), ErrorKind::Io);
            let err: Error = SessionError::CounterExhausted.into();
            assert_eq!(err.kind(), ErrorKind::Internal);
        }
    }
}
