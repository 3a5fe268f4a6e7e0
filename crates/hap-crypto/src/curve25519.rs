//! Curve25519 ECDH for pair-verify key agreement.

use hap_core::error::CryptoError;
use rand::{CryptoRng, RngCore};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::ZeroizeOnDrop;

/// Ephemeral Curve25519 key pair for ECDH.
#[derive(ZeroizeOnDrop)]
pub struct EcdhKeyPair {
    #[zeroize(skip)]
    public: [u8; 32],
    secret: [u8; 32],
}

impl EcdhKeyPair {
    /// Generate a new key pair from the supplied randomness source.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let secret = StaticSecret::random_from_rng(rng);
        let public = PublicKey::from(&secret);
        Self {
            public: public.to_bytes(),
            secret: secret.to_bytes(),
        }
    }

    /// Create from existing secret key bytes.
    pub fn from_secret(secret: &[u8; 32]) -> Self {
        let static_secret = StaticSecret::from(*secret);
        let public = PublicKey::from(&static_secret);
        Self {
            public: public.to_bytes(),
            secret: *secret,
        }
    }

    /// Get the public key (32 bytes).
    pub fn public_key(&self) -> [u8; 32] {
        self.public
    }

    /// Perform Diffie-Hellman key exchange, consuming the key pair.
    ///
    /// Rejects all-zero peer keys and low-order points (all-zero output).
    pub fn diffie_hellman(self, peer_public: &[u8; 32]) -> Result<[u8; 32], CryptoError> {
        if peer_public.iter().all(|&b| b == 0) {
            return Err(CryptoError::InvalidPublicKey);
        }

        let static_secret = StaticSecret::from(self.secret);
        let their_public = PublicKey::from(*peer_public);
        let shared = static_secret.diffie_hellman(&their_public);

        let shared_bytes = shared.to_bytes();
        if shared_bytes.iter().all(|&b| b == 0) {
            return Err(CryptoError::InvalidPublicKey);
        }

        Ok(shared_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use rand::{rngs::StdRng, SeedableRng};

    fn hex32(s: &str) -> [u8; 32] {
        hex::decode(s).unwrap().try_into().unwrap()
    }

    mod key_generation {
        use super::*;

        #[test]
        fn generate_creates_unique_keys() {
            let kp1 = EcdhKeyPair::generate(&mut OsRng);
            let kp2 = EcdhKeyPair::generate(&mut OsRng);
            assert_ne!(kp1.public_key(), kp2.public_key());
        }

        #[test]
        fn seeded_rng_is_reproducible() {
            let kp1 = EcdhKeyPair::generate(&mut StdRng::seed_from_u64(7));
            let kp2 = EcdhKeyPair::generate(&mut StdRng::seed_from_u64(7));
            assert_eq!(kp1.public_key(), kp2.public_key());
        }

        #[test]
        fn from_secret_is_deterministic() {
            let secret = [0x42u8; 32];
            let kp1 = EcdhKeyPair::from_secret(&secret);
            let kp2 = EcdhKeyPair::from_secret(&secret);
            assert_eq!(kp1.public_key(), kp2.public_key());
        }
    }

    mod diffie_hellman {
        use super::*;

        #[test]
        fn both_parties_derive_same_secret() {
            let alice = EcdhKeyPair::generate(&mut OsRng);
            let bob = EcdhKeyPair::generate(&mut OsRng);

            let alice_public = alice.public_key();
            let bob_public = bob.public_key();

            let shared_a = alice.diffie_hellman(&bob_public).unwrap();
            let shared_b = bob.diffie_hellman(&alice_public).unwrap();

            assert_eq!(shared_a, shared_b);
        }

        #[test]
        fn rejects_low_order_points() {
            // Point of order 8
            let low_order =
                hex32("ecffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff7f");

            let kp = EcdhKeyPair::generate(&mut OsRng);
            let result = kp.diffie_hellman(&low_order);
            assert!(matches!(result, Err(CryptoError::InvalidPublicKey)));
        }

        #[test]
        fn rejects_all_zero_public_key() {
            let kp = EcdhKeyPair::generate(&mut OsRng);
            let result = kp.diffie_hellman(&[0u8; 32]);
            assert!(matches!(result, Err(CryptoError::InvalidPublicKey)));
        }
    }

    mod known_vectors {
        use super::*;

        #[test]
        fn rfc7748_test_vector() {
            // RFC 7748 Section 6.1
            let alice_secret =
                hex32("77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a");
            let alice_public =
                hex32("8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a");
            let bob_secret =
                hex32("5dab087e624a8a4b79e17f8b83800ee66f3bb1292618b6fd1c2f8b27ff88e0eb");
            let bob_public =
                hex32("de9edb7d7b7dc1b4d35b61c2ece435373f8343c85b78674dadfc7e146f882b4f");
            let shared =
                hex32("4a5d9d5ba4ce2de1728e3bf480350f25e07e21c947d19e3376f09b3c1e161742");

            let alice = EcdhKeyPair::from_secret(&alice_secret);
            assert_eq!(alice.public_key(), alice_public);

            let bob = EcdhKeyPair::from_secret(&bob_secret);
            assert_eq!(bob.public_key(), bob_public);

            assert_eq!(alice.diffie_hellman(&bob_public).unwrap(), shared);
        }
    }
}
