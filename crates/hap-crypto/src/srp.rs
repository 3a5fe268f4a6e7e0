//! SRP-6a for HomeKit pair-setup.
//!
//! Uses 3072-bit prime (RFC 5054), generator g=5, SHA-512.
//! [`SrpServer`] is the accessory side. [`SrpClient`] plays the controller
//! in tests and tooling.

use hap_core::error::CryptoError;
use num_bigint::{BigUint, RandBigInt};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// SRP username used by HomeKit pair-setup.
pub const PAIR_SETUP_USERNAME: &[u8] = b"Pair-Setup";

/// N size in bytes (3072 bits = 384 bytes).
pub const N_BYTES: usize = 384;

/// Salt length used for new verifiers.
pub const SALT_LEN: usize = 16;

/// RFC 5054 3072-bit prime N, big-endian.
const RFC5054_N_3072: [u8; N_BYTES] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xc9, 0x0f, 0xda, 0xa2,
    0x21, 0x68, 0xc2, 0x34, 0xc4, 0xc6, 0x62, 0x8b, 0x80, 0xdc, 0x1c, 0xd1,
    0x29, 0x02, 0x4e, 0x08, 0x8a, 0x67, 0xcc, 0x74, 0x02, 0x0b, 0xbe, 0xa6,
    0x3b, 0x13, 0x9b, 0x22, 0x51, 0x4a, 0x08, 0x79, 0x8e, 0x34, 0x04, 0xdd,
    0xef, 0x95, 0x19, 0xb3, 0xcd, 0x3a, 0x43, 0x1b, 0x30, 0x2b, 0x0a, 0x6d,
    0xf2, 0x5f, 0x14, 0x37, 0x4f, 0xe1, 0x35, 0x6d, 0x6d, 0x51, 0xc2, 0x45,
    0xe4, 0x85, 0xb5, 0x76, 0x62, 0x5e, 0x7e, 0xc6, 0xf4, 0x4c, 0x42, 0xe9,
    0xa6, 0x37, 0xed, 0x6b, 0x0b, 0xff, 0x5c, 0xb6, 0xf4, 0x06, 0xb7, 0xed,
    0xee, 0x38, 0x6b, 0xfb, 0x5a, 0x89, 0x9f, 0xa5, 0xae, 0x9f, 0x24, 0x11,
    0x7c, 0x4b, 0x1f, 0xe6, 0x49, 0x28, 0x66, 0x51, 0xec, 0xe4, 0x5b, 0x3d,
    0xc2, 0x00, 0x7c, 0xb8, 0xa1, 0x63, 0xbf, 0x05, 0x98, 0xda, 0x48, 0x36,
    0x1c, 0x55, 0xd3, 0x9a, 0x69, 0x16, 0x3f, 0xa8, 0xfd, 0x24, 0xcf, 0x5f,
    0x83, 0x65, 0x5d, 0x23, 0xdc, 0xa3, 0xad, 0x96, 0x1c, 0x62, 0xf3, 0x56,
    0x20, 0x85, 0x52, 0xbb, 0x9e, 0xd5, 0x29, 0x07, 0x70, 0x96, 0x96, 0x6d,
    0x67, 0x0c, 0x35, 0x4e, 0x4a, 0xbc, 0x98, 0x04, 0xf1, 0x74, 0x6c, 0x08,
    0xca, 0x18, 0x21, 0x7c, 0x32, 0x90, 0x5e, 0x46, 0x2e, 0x36, 0xce, 0x3b,
    0xe3, 0x9e, 0x77, 0x2c, 0x18, 0x0e, 0x86, 0x03, 0x9b, 0x27, 0x83, 0xa2,
    0xec, 0x07, 0xa2, 0x8f, 0xb5, 0xc5, 0x5d, 0xf0, 0x6f, 0x4c, 0x52, 0xc9,
    0xde, 0x2b, 0xcb, 0xf6, 0x95, 0x58, 0x17, 0x18, 0x39, 0x95, 0x49, 0x7c,
    0xea, 0x95, 0x6a, 0xe5, 0x15, 0xd2, 0x26, 0x18, 0x98, 0xfa, 0x05, 0x10,
    0x15, 0x72, 0x8e, 0x5a, 0x8a, 0xaa, 0xc4, 0x2d, 0xad, 0x33, 0x17, 0x0d,
    0x04, 0x50, 0x7a, 0x33, 0xa8, 0x55, 0x21, 0xab, 0xdf, 0x1c, 0xba, 0x64,
    0xec, 0xfb, 0x85, 0x04, 0x58, 0xdb, 0xef, 0x0a, 0x8a, 0xea, 0x71, 0x57,
    0x5d, 0x06, 0x0c, 0x7d, 0xb3, 0x97, 0x0f, 0x85, 0xa6, 0xe1, 0xe4, 0xc7,
    0xab, 0xf5, 0xae, 0x8c, 0xdb, 0x09, 0x33, 0xd7, 0x1e, 0x8c, 0x94, 0xe0,
    0x4a, 0x25, 0x61, 0x9d, 0xce, 0xe3, 0xd2, 0x26, 0x1a, 0xd2, 0xee, 0x6b,
    0xf1, 0x2f, 0xfa, 0x06, 0xd9, 0x8a, 0x08, 0x64, 0xd8, 0x76, 0x02, 0x73,
    0x3e, 0xc8, 0x6a, 0x64, 0x52, 0x1f, 0x2b, 0x18, 0x17, 0x7b, 0x20, 0x0c,
    0xbb, 0xe1, 0x17, 0x57, 0x7a, 0x61, 0x5d, 0x6c, 0x77, 0x09, 0x88, 0xc0,
    0xba, 0xd9, 0x46, 0xe2, 0x08, 0xe2, 0x4f, 0xa0, 0x74, 0xe5, 0xab, 0x31,
    0x43, 0xdb, 0x5b, 0xfc, 0xe0, 0xfd, 0x10, 0x8e, 0x4b, 0x82, 0xd1, 0x20,
    0xa9, 0x3a, 0xd2, 0xca, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
];

/// SRP-6a parameters (3072-bit, RFC 5054).
pub struct SrpParams {
    /// Prime modulus N.
    pub n: BigUint,
    /// Generator g (always 5).
    pub g: BigUint,
}

impl Default for SrpParams {
    fn default() -> Self {
        Self {
            n: BigUint::from_bytes_be(&RFC5054_N_3072),
            g: BigUint::from(5u32),
        }
    }
}

/// Password verifier `v = g^x mod N` together with its salt.
pub struct SrpVerifier {
    identity: Vec<u8>,
    salt: [u8; SALT_LEN],
    verifier: BigUint,
}

impl SrpVerifier {
    /// Compute a verifier for the given identity, password and salt.
    pub fn generate(identity: &[u8], password: &[u8], salt: [u8; SALT_LEN]) -> Self {
        let params = SrpParams::default();
        let x = compute_x(&salt, identity, password);
        let verifier = params.g.modpow(&x, &params.n);
        Self {
            identity: identity.to_vec(),
            salt,
            verifier,
        }
    }

    pub fn salt(&self) -> [u8; SALT_LEN] {
        self.salt
    }
}

/// Server-side SRP state for one pair-setup attempt.
#[derive(ZeroizeOnDrop)]
pub struct SrpServer {
    #[zeroize(skip)]
    params: SrpParams,
    #[zeroize(skip)]
    identity: Vec<u8>,
    #[zeroize(skip)]
    salt: [u8; SALT_LEN],
    #[zeroize(skip)]
    verifier: BigUint,
    private_key: Vec<u8>,
    #[zeroize(skip)]
    public_key: BigUint,
}

/// Result of a successful client proof check.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SrpSession {
    /// Session key K = H(PAD(S)).
    pub shared_secret: Vec<u8>,
    /// Server proof M2 = H(PAD(A) || M1 || K).
    pub server_proof: Vec<u8>,
}

impl SrpServer {
    /// Start an exchange: pick b and compute B = (k*v + g^b) mod N.
    pub fn new<R: RngCore + CryptoRng>(verifier: SrpVerifier, rng: &mut R) -> Self {
        let params = SrpParams::default();
        let b = rng.gen_biguint(256);

        let k = compute_k(&params);
        let g_b = params.g.modpow(&b, &params.n);
        let k_v = (&k * &verifier.verifier) % &params.n;
        let public_key = (&k_v + &g_b) % &params.n;

        Self {
            params,
            identity: verifier.identity.clone(),
            salt: verifier.salt,
            verifier: verifier.verifier.clone(),
            private_key: b.to_bytes_be(),
            public_key,
        }
    }

    /// Server public key B, padded to 384 bytes.
    pub fn public_key(&self) -> Vec<u8> {
        pad_to_n(&self.public_key)
    }

    pub fn salt(&self) -> [u8; SALT_LEN] {
        self.salt
    }

    /// Check the client's public key A and proof M1.
    ///
    /// On success returns the session key and the server proof M2.
    pub fn verify_client(
        &self,
        client_public: &[u8],
        client_proof: &[u8],
    ) -> Result<SrpSession, CryptoError> {
        // A must be a padded group element in 1..N.
        if client_public.len() > N_BYTES {
            return Err(CryptoError::InvalidPublicKey);
        }
        let a = BigUint::from_bytes_be(client_public);
        if a == BigUint::ZERO || a >= self.params.n {
            return Err(CryptoError::InvalidPublicKey);
        }

        let u = compute_u(&a, &self.public_key);
        if u == BigUint::ZERO {
            return Err(CryptoError::InvalidPublicKey);
        }

        // S = (A * v^u)^b mod N
        let b = BigUint::from_bytes_be(&self.private_key);
        let v_u = self.verifier.modpow(&u, &self.params.n);
        let base = (&a * &v_u) % &self.params.n;
        let s = base.modpow(&b, &self.params.n);

        let shared_secret = hash_padded(&s);

        let expected = compute_m1(
            &self.params,
            &self.identity,
            &self.salt,
            &a,
            &self.public_key,
            &shared_secret,
        );
        if !bool::from(expected.as_slice().ct_eq(client_proof)) {
            return Err(CryptoError::ProofMismatch);
        }

        let server_proof = compute_m2(&a, &expected, &shared_secret);
        Ok(SrpSession {
            shared_secret,
            server_proof,
        })
    }
}

/// Client-side SRP state.
#[derive(ZeroizeOnDrop)]
pub struct SrpClient {
    #[zeroize(skip)]
    params: SrpParams,
    identity: Vec<u8>,
    password: Vec<u8>,
    private_key: Vec<u8>,
    #[zeroize(skip)]
    public_key: BigUint,
}

/// Client proof and the values needed to finish the exchange.
pub struct SrpProof {
    pub client_proof: Vec<u8>,
    pub shared_secret: Vec<u8>,
    pub expected_server_proof: Vec<u8>,
}

impl SrpClient {
    /// Create new SRP client with identity and password.
    pub fn new<R: RngCore + CryptoRng>(identity: &[u8], password: &[u8], rng: &mut R) -> Self {
        let params = SrpParams::default();
        let a = rng.gen_biguint(256);
        let public_key = params.g.modpow(&a, &params.n);

        Self {
            params,
            identity: identity.to_vec(),
            password: password.to_vec(),
            private_key: a.to_bytes_be(),
            public_key,
        }
    }

    /// Client public key A (384 bytes).
    pub fn public_key(&self) -> Vec<u8> {
        pad_to_n(&self.public_key)
    }

    /// Process the server's salt and public key B.
    pub fn process_challenge(
        &self,
        salt: &[u8],
        server_public_key: &[u8],
    ) -> Result<SrpProof, CryptoError> {
        if server_public_key.len() > N_BYTES {
            return Err(CryptoError::InvalidPublicKey);
        }
        let b = BigUint::from_bytes_be(server_public_key);
        if b == BigUint::ZERO || b >= self.params.n {
            return Err(CryptoError::InvalidPublicKey);
        }

        let a = BigUint::from_bytes_be(&self.private_key);
        let u = compute_u(&self.public_key, &b);
        if u == BigUint::ZERO {
            return Err(CryptoError::InvalidPublicKey);
        }

        let x = compute_x(salt, &self.identity, &self.password);
        let k = compute_k(&self.params);

        // S = (B - k * g^x)^(a + u*x) mod N
        let g_x = self.params.g.modpow(&x, &self.params.n);
        let k_gx = (&k * &g_x) % &self.params.n;
        let base = if b >= k_gx {
            (&b - &k_gx) % &self.params.n
        } else {
            (&b + &self.params.n - &k_gx) % &self.params.n
        };
        let exponent = &a + &u * &x;
        let s = base.modpow(&exponent, &self.params.n);

        let shared_secret = hash_padded(&s);
        let client_proof = compute_m1(
            &self.params,
            &self.identity,
            salt,
            &self.public_key,
            &b,
            &shared_secret,
        );
        let expected_server_proof = compute_m2(&self.public_key, &client_proof, &shared_secret);

        Ok(SrpProof {
            client_proof,
            shared_secret,
            expected_server_proof,
        })
    }

    /// Verify server's proof M2 in constant time.
    pub fn verify_server_proof(&self, proof: &[u8], expected: &[u8]) -> bool {
        proof.ct_eq(expected).into()
    }
}

/// K = H(PAD(S)).
fn hash_padded(s: &BigUint) -> Vec<u8> {
    Sha512::digest(pad_to_n(s)).to_vec()
}

/// M1 = H(H(N) XOR H(g) || H(I) || salt || PAD(A) || PAD(B) || K)
fn compute_m1(
    params: &SrpParams,
    identity: &[u8],
    salt: &[u8],
    a: &BigUint,
    b: &BigUint,
    k: &[u8],
) -> Vec<u8> {
    let h_n = Sha512::digest(pad_to_n(&params.n));
    // H(g) over the raw generator byte, not PAD(g).
    let h_g = Sha512::digest(params.g.to_bytes_be());

    let mut xor_result = [0u8; 64];
    for (out, (n, g)) in xor_result.iter_mut().zip(h_n.iter().zip(h_g.iter())) {
        *out = n ^ g;
    }

    let h_i = Sha512::digest(identity);

    let mut hasher = Sha512::new();
    hasher.update(xor_result);
    hasher.update(h_i);
    hasher.update(salt);
    hasher.update(pad_to_n(a));
    hasher.update(pad_to_n(b));
    hasher.update(k);
    hasher.finalize().to_vec()
}

/// M2 = H(PAD(A) || M1 || K)
fn compute_m2(a: &BigUint, m1: &[u8], k: &[u8]) -> Vec<u8> {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(a));
    hasher.update(m1);
    hasher.update(k);
    hasher.finalize().to_vec()
}

/// Pad BigUint to N_BYTES with leading zeros.
fn pad_to_n(value: &BigUint) -> Vec<u8> {
    let bytes = value.to_bytes_be();
    if bytes.len() >= N_BYTES {
        bytes[bytes.len() - N_BYTES..].to_vec()
    } else {
        let mut padded = vec![0u8; N_BYTES - bytes.len()];
        padded.extend_from_slice(&bytes);
        padded
    }
}

/// k = SHA512(N || PAD(g)).
fn compute_k(params: &SrpParams) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(&params.n));
    hasher.update(pad_to_n(&params.g));
    BigUint::from_bytes_be(&hasher.finalize())
}

/// u = SHA512(PAD(A) || PAD(B)).
fn compute_u(a: &BigUint, b: &BigUint) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(pad_to_n(a));
    hasher.update(pad_to_n(b));
    BigUint::from_bytes_be(&hasher.finalize())
}

/// x = SHA512(salt || SHA512(identity || ":" || password)).
fn compute_x(salt: &[u8], identity: &[u8], password: &[u8]) -> BigUint {
    let mut hasher = Sha512::new();
    hasher.update(identity);
    hasher.update(b":");
    hasher.update(password);
    let inner_hash = hasher.finalize();

    let mut hasher = Sha512::new();
    hasher.update(salt);
    hasher.update(inner_hash);
    BigUint::from_bytes_be(&hasher.finalize())
}
