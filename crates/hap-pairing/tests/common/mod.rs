//! Controller half of pair-setup and pair-verify, for driving the accessory.

#![allow(dead_code)]

use hap_crypto::{
    chacha::{self, labels, Nonce12},
    curve25519::EcdhKeyPair,
    ed25519::{self, IdentityKeyPair},
    hkdf,
    keys::{SessionKeys, SharedSecret},
    srp::{SrpClient, SrpProof, PAIR_SETUP_USERNAME},
    tlv::{Tlv8, TlvType},
};
use rand::rngs::OsRng;

pub const ACCESSORY_ID: &str = "AA:BB:CC:DD:EE:FF";
pub const SETUP_CODE: &str = "031-45-154";

pub struct Controller {
    pub id: String,
    pub identity: IdentityKeyPair,
    srp: Option<(SrpClient, SrpProof)>,
    ephemeral: Option<EcdhKeyPair>,
    ephemeral_public: [u8; 32],
    verify_key: Option<[u8; 32]>,
    accessory_ephemeral: [u8; 32],
    shared: Option<SharedSecret>,
    pub accessory_ltpk: Option<[u8; 32]>,
}

impl Controller {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            identity: IdentityKeyPair::generate(&mut OsRng),
            srp: None,
            ephemeral: None,
            ephemeral_public: [0u8; 32],
            verify_key: None,
            accessory_ephemeral: [0u8; 32],
            shared: None,
            accessory_ltpk: None,
        }
    }

    pub fn setup_m1(&self) -> Vec<u8> {
        Tlv8::new()
            .with_state(1)
            .with(TlvType::Method, [0u8].as_slice())
            .encode()
    }

    pub fn setup_m3(&mut self, m2: &[u8], code: &str) -> Vec<u8> {
        let tlv = Tlv8::parse(m2).unwrap();
        assert_eq!(tlv.state(), Some(2));
        assert!(tlv.error().is_none(), "M2 carried an error");

        let client = SrpClient::new(PAIR_SETUP_USERNAME, code.as_bytes(), &mut OsRng);
        let proof = client
            .process_challenge(
                tlv.require(TlvType::Salt).unwrap(),
                tlv.require(TlvType::PublicKey).unwrap(),
            )
            .unwrap();

        let m3 = Tlv8::new()
            .with_state(3)
            .with(TlvType::PublicKey, client.public_key())
            .with(TlvType::Proof, proof.client_proof.as_slice())
            .encode();
        self.srp = Some((client, proof));
        m3
    }

    pub fn setup_m5(&mut self, m4: &[u8]) -> Vec<u8> {
        let tlv = Tlv8::parse(m4).unwrap();
        assert_eq!(tlv.state(), Some(4));
        let (client, proof) = self.srp.as_ref().unwrap();
        assert!(client.verify_server_proof(
            tlv.require(TlvType::Proof).unwrap(),
            &proof.expected_server_proof
        ));

        let k = &proof.shared_secret;
        let key = hkdf::derive_pair_setup_key(k).unwrap();
        let controller_x = hkdf::derive_controller_sign_key(k).unwrap();

        let ltpk = self.identity.public_key();
        let mut info = controller_x.to_vec();
        info.extend_from_slice(self.id.as_bytes());
        info.extend_from_slice(&ltpk);
        let signature = self.identity.sign(&info);

        let sub = Tlv8::new()
            .with(TlvType::Identifier, self.id.as_bytes())
            .with(TlvType::PublicKey, ltpk.as_slice())
            .with(TlvType::Signature, signature.as_slice())
            .encode();
        let encrypted =
            chacha::seal(&key, &Nonce12::from_label(labels::PS_MSG05), &sub, &[]).unwrap();

        Tlv8::new()
            .with_state(5)
            .with(TlvType::EncryptedData, encrypted)
            .encode()
    }

    /// Check M6 and remember the accessory's long-term key.
    pub fn setup_finish(&mut self, m6: &[u8]) {
        let tlv = Tlv8::parse(m6).unwrap();
        assert_eq!(tlv.state(), Some(6));
        assert!(tlv.error().is_none(), "M6 carried an error");

        let (_, proof) = self.srp.take().unwrap();
        let k = &proof.shared_secret;
        let key = hkdf::derive_pair_setup_key(k).unwrap();
        let sub = chacha::open(
            &key,
            &Nonce12::from_label(labels::PS_MSG06),
            tlv.require(TlvType::EncryptedData).unwrap(),
            &[],
        )
        .unwrap();
        let sub = Tlv8::parse(&sub).unwrap();

        let accessory_id = sub.require(TlvType::Identifier).unwrap();
        let accessory_ltpk = sub.require_array::<32>(TlvType::PublicKey).unwrap();
        let signature = sub.require_array::<64>(TlvType::Signature).unwrap();

        let accessory_x = hkdf::derive_accessory_sign_key(k).unwrap();
        let mut info = accessory_x.to_vec();
        info.extend_from_slice(accessory_id);
        info.extend_from_slice(&accessory_ltpk);
        ed25519::verify(&accessory_ltpk, &info, &signature).unwrap();

        self.accessory_ltpk = Some(accessory_ltpk);
    }

    pub fn verify_m1(&mut self) -> Vec<u8> {
        let ephemeral = EcdhKeyPair::generate(&mut OsRng);
        self.ephemeral_public = ephemeral.public_key();
        self.ephemeral = Some(ephemeral);
        Tlv8::new()
            .with_state(1)
            .with(TlvType::PublicKey, self.ephemeral_public.as_slice())
            .encode()
    }

    pub fn verify_m3(&mut self, m2: &[u8]) -> Vec<u8> {
        let tlv = Tlv8::parse(m2).unwrap();
        assert_eq!(tlv.state(), Some(2));
        let accessory_public = tlv.require_array::<32>(TlvType::PublicKey).unwrap();

        let shared = self
            .ephemeral
            .take()
            .unwrap()
            .diffie_hellman(&accessory_public)
            .unwrap();
        let shared = SharedSecret::new(shared.to_vec());
        let key = SessionKeys::derive_pair_verify_key(&shared).unwrap();

        let sub = chacha::open(
            key.as_bytes(),
            &Nonce12::from_label(labels::PV_MSG02),
            tlv.require(TlvType::EncryptedData).unwrap(),
            &[],
        )
        .unwrap();
        let sub = Tlv8::parse(&sub).unwrap();
        let accessory_id = sub.require(TlvType::Identifier).unwrap().to_vec();
        let signature = sub.require_array::<64>(TlvType::Signature).unwrap();

        if let Some(ltpk) = self.accessory_ltpk {
            let mut info = accessory_public.to_vec();
            info.extend_from_slice(&accessory_id);
            info.extend_from_slice(&self.ephemeral_public);
            ed25519::verify(&ltpk, &info, &signature).unwrap();
        }

        let mut info = self.ephemeral_public.to_vec();
        info.extend_from_slice(self.id.as_bytes());
        info.extend_from_slice(&accessory_public);
        let signature = self.identity.sign(&info);

        let payload = Tlv8::new()
            .with(TlvType::Identifier, self.id.as_bytes())
            .with(TlvType::Signature, signature.as_slice())
            .encode();
        let encrypted = chacha::seal(
            key.as_bytes(),
            &Nonce12::from_label(labels::PV_MSG03),
            &payload,
            &[],
        )
        .unwrap();

        self.accessory_ephemeral = accessory_public;
        self.verify_key = Some(*key.as_bytes());
        self.shared = Some(shared);

        Tlv8::new()
            .with_state(3)
            .with(TlvType::EncryptedData, encrypted)
            .encode()
    }

    /// Session keys as seen by the controller after M4.
    pub fn session_keys(&self) -> SessionKeys {
        SessionKeys::derive(self.shared.as_ref().unwrap()).unwrap()
    }
}
