//! ChaCha20-Poly1305 AEAD for handshake sub-messages and session frames.

use hap_core::error::CryptoError;
use chacha20poly1305::{
    aead::{Aead, AeadInPlace, KeyInit, Payload},
    ChaCha20Poly1305, Nonce, Tag,
};
use zeroize::ZeroizeOnDrop;

/// Poly1305 tag length.
pub const TAG_LEN: usize = 16;

/// 96-bit ChaCha20 nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Nonce12([u8; 12]);

impl Nonce12 {
    /// Counter nonce: 4 zero bytes followed by the little-endian counter.
    pub fn from_counter(counter: u64) -> Self {
        let mut nonce = [0u8; 12];
        nonce[4..12].copy_from_slice(&counter.to_le_bytes());
        Self(nonce)
    }

    /// Label nonce, right-aligned and left-padded with zeros.
    ///
    /// `"PV-Msg02"` becomes `\x00\x00\x00\x00PV-Msg02`.
    pub fn from_label(label: &[u8]) -> Self {
        let mut nonce = [0u8; 12];
        let len = label.len().min(12);
        nonce[12 - len..].copy_from_slice(&label[..len]);
        Self(nonce)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

/// Handshake nonce labels.
pub mod labels {
    pub const PV_MSG02: &[u8] = b"PV-Msg02";
    pub const PV_MSG03: &[u8] = b"PV-Msg03";
    pub const PS_MSG05: &[u8] = b"PS-Msg05";
    pub const PS_MSG06: &[u8] = b"PS-Msg06";
}

/// Seal plaintext. Returns ciphertext with the 16-byte tag appended.
pub fn seal(
    key: &[u8; 32],
    nonce: &Nonce12,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(
            Nonce::from_slice(nonce.as_bytes()),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::Encryption(format!("Encryption failed: {}", e)))
}

/// Open ciphertext with the 16-byte tag appended.
pub fn open(
    key: &[u8; 32],
    nonce: &Nonce12,
    ciphertext_with_tag: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext_with_tag.len() < TAG_LEN {
        return Err(CryptoError::AuthTagMismatch);
    }
    let (ciphertext, tag) = ciphertext_with_tag.split_at(ciphertext_with_tag.len() - TAG_LEN);
    let mut tag_arr = [0u8; TAG_LEN];
    tag_arr.copy_from_slice(tag);
    open_detached(key, nonce, ciphertext, &tag_arr, aad)
}

/// Open ciphertext with a separately supplied tag.
///
/// No plaintext is returned unless the tag verifies.
pub fn open_detached(
    key: &[u8; 32],
    nonce: &Nonce12,
    ciphertext: &[u8],
    tag: &[u8; TAG_LEN],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    FrameCipher::new(*key).open(nonce, ciphertext, tag, aad)
}

/// Single-direction cipher with the ChaCha20Poly1305 state cached.
///
/// Nonce management belongs to the caller.
#[derive(ZeroizeOnDrop)]
pub struct FrameCipher {
    key: [u8; 32],
    #[zeroize(skip)]
    cipher: ChaCha20Poly1305,
}

impl FrameCipher {
    pub fn new(key: [u8; 32]) -> Self {
        let cipher = ChaCha20Poly1305::new(&key.into());
        Self { key, cipher }
    }

    /// Seal into ciphertext and detached tag.
    pub fn seal(
        &self,
        nonce: &Nonce12,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<(Vec<u8>, [u8; TAG_LEN]), CryptoError> {
        let mut buffer = plaintext.to_vec();
        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(nonce.as_bytes()), aad, &mut buffer)
            .map_err(|e| CryptoError::Encryption(format!("Encryption failed: {}", e)))?;
        let mut tag_arr = [0u8; TAG_LEN];
        tag_arr.copy_from_slice(&tag);
        Ok((buffer, tag_arr))
    }

    /// Verify and decrypt.
    pub fn open(
        &self,
        nonce: &Nonce12,
        ciphertext: &[u8],
        tag: &[u8; TAG_LEN],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut buffer = ciphertext.to_vec();
        self.cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(nonce.as_bytes()),
                aad,
                &mut buffer,
                Tag::from_slice(tag),
            )
            .map_err(|_| CryptoError::AuthTagMismatch)?;
        Ok(buffer)
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }
}
