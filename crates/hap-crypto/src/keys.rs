//! Session key types and derivation.

use crate::hkdf;
use hap_core::error::CryptoError;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Shared secret from SRP or ECDH.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(pub Vec<u8>);

/// 32-byte encryption key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey(pub [u8; 32]);

/// Directional record-layer keys produced by a successful pair-verify.
#[derive(Clone, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Seals frames the accessory sends.
    pub accessory_to_controller: EncryptionKey,
    /// Opens frames the controller sends.
    pub controller_to_accessory: EncryptionKey,
}

impl SharedSecret {
    /// Create from raw bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl EncryptionKey {
    /// Create from raw bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

impl SessionKeys {
    /// Derive both directional keys from the pair-verify shared secret.
    pub fn derive(shared_secret: &SharedSecret) -> Result<Self, CryptoError> {
        let accessory_to_controller = hkdf::derive_control_read_key(shared_secret.as_bytes())?;
        let controller_to_accessory = hkdf::derive_control_write_key(shared_secret.as_bytes())?;

        Ok(Self {
            accessory_to_controller: EncryptionKey(accessory_to_controller),
            controller_to_accessory: EncryptionKey(controller_to_accessory),
        })
    }

    /// Derive the pair-setup M5/M6 key from the SRP session key.
    pub fn derive_pair_setup_key(shared_secret: &SharedSecret) -> Result<EncryptionKey, CryptoError> {
        let key = hkdf::derive_pair_setup_key(shared_secret.as_bytes())?;
        Ok(EncryptionKey(key))
    }

    /// Derive the pair-verify handshake key from the ECDH shared secret.
    pub fn derive_pair_verify_key(
        shared_secret: &SharedSecret,
    ) -> Result<EncryptionKey, CryptoError> {
        let key = hkdf::derive_pair_verify_key(shared_secret.as_bytes())?;
        Ok(EncryptionKey(key))
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKeys(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod shared_secret {
        use super::*;

        #[test]
        fn new_stores_bytes() {
            let bytes = vec![0x01, 0x02, 0x03, 0x04];
            let secret = SharedSecret::new(bytes.clone());
            assert_eq!(secret.as_bytes(), &bytes);
        }
    }

    mod encryption_key {
        use super::*;

        #[test]
        fn debug_does_not_print_bytes() {
            let key = EncryptionKey::new([0x42u8; 32]);
            assert_eq!(format!("{:?}", key), "EncryptionKey(..)");
        }
    }

    mod session_keys {
        use super::*;

        #[test]
        fn directions_differ() {
            let shared_secret = SharedSecret::new(vec![0xABu8; 32]);
            let keys = SessionKeys::derive(&shared_secret).unwrap();
            assert_ne!(keys.accessory_to_controller, keys.controller_to_accessory);
        }

        #[test]
        fn directions_match_control_labels() {
            let secret = [0xABu8; 32];
            let keys = SessionKeys::derive(&SharedSecret::new(secret.to_vec())).unwrap();
            assert_eq!(
                keys.accessory_to_controller.as_bytes(),
                &hkdf::derive(&secret, b"Control-Salt", b"Control-Read-Encryption-Key").unwrap()
            );
            assert_eq!(
                keys.controller_to_accessory.as_bytes(),
                &hkdf::derive(&secret, b"Control-Salt", b"Control-Write-Encryption-Key").unwrap()
            );
        }

        #[test]
        fn different_secrets_produce_different_keys() {
            let keys1 = SessionKeys::derive(&SharedSecret::new(vec![0x01u8; 32])).unwrap();
            let keys2 = SessionKeys::derive(&SharedSecret::new(vec![0x02u8; 32])).unwrap();
            assert_ne!(keys1.accessory_to_controller, keys2.accessory_to_controller);
            assert_ne!(keys1.controller_to_accessory, keys2.controller_to_accessory);
        }

        #[test]
        fn handshake_keys_differ_from_session_keys() {
            let shared_secret = SharedSecret::new(vec![0xABu8; 32]);
            let setup = SessionKeys::derive_pair_setup_key(&shared_secret).unwrap();
            let verify = SessionKeys::derive_pair_verify_key(&shared_secret).unwrap();
            let session = SessionKeys::derive(&shared_secret).unwrap();

            assert_ne!(setup, verify);
            assert_ne!(verify, session.accessory_to_controller);
            assert_ne!(verify, session.controller_to_accessory);
        }
    }
}
