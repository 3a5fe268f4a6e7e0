//! Encrypted record layer installed after pair-verify.
//!
//! ```text
//! +----------------+------------------+----------+
//! | Length (2 LE)  | Ciphertext (N)   | Tag (16) |
//! +----------------+------------------+----------+
//! ```
//!
//! - Length: plaintext length, 1 to 1024
//! - AAD: the two length bytes
//! - Nonce: per-direction frame counter, starting at 0
//!
//! Any failure while opening a frame terminates the channel.

use hap_core::error::{Result, SessionError};
use hap_crypto::chacha::{FrameCipher, Nonce12, TAG_LEN};
use hap_crypto::keys::SessionKeys;
use tracing::{trace, warn};

/// Largest plaintext carried by one frame.
pub const MAX_FRAME_PAYLOAD: usize = 1024;

const LENGTH_LEN: usize = 2;

/// Bidirectional record layer for one connection.
pub struct EncryptedChannel {
    write_cipher: FrameCipher,
    read_cipher: FrameCipher,
    write_counter: u64,
    read_counter: u64,
    inbound: Vec<u8>,
    terminated: bool,
}

impl EncryptedChannel {
    /// Accessory side: seals with the accessory-to-controller key.
    pub fn new(keys: SessionKeys) -> Self {
        Self::with_keys(
            *keys.accessory_to_controller.as_bytes(),
            *keys.controller_to_accessory.as_bytes(),
        )
    }

    /// Controller side of the same session.
    pub fn controller(keys: SessionKeys) -> Self {
        Self::with_keys(
            *keys.controller_to_accessory.as_bytes(),
            *keys.accessory_to_controller.as_bytes(),
        )
    }

    fn with_keys(write_key: [u8; 32], read_key: [u8; 32]) -> Self {
        Self {
            write_cipher: FrameCipher::new(write_key),
            read_cipher: FrameCipher::new(read_key),
            write_counter: 0,
            read_counter: 0,
            inbound: Vec::new(),
            terminated: false,
        }
    }

    /// Seal one chunk of 1 to 1024 bytes into a frame.
    pub fn seal_frame(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        self.ensure_open()?;
        if chunk.is_empty() {
            return Err(SessionError::EmptyFrame.into());
        }
        if chunk.len() > MAX_FRAME_PAYLOAD {
            return Err(SessionError::FrameTooLarge(chunk.len()).into());
        }
        if self.write_counter == u64::MAX {
            self.terminated = true;
            return Err(SessionError::CounterExhausted.into());
        }

        let length = (chunk.len() as u16).to_le_bytes();
        let nonce = Nonce12::from_counter(self.write_counter);
        let (ciphertext, tag) = match self.write_cipher.seal(&nonce, chunk, &length) {
            Ok(sealed) => sealed,
            Err(e) => {
                self.terminated = true;
                return Err(e.into());
            }
        };
        self.write_counter += 1;

        let mut frame = Vec::with_capacity(LENGTH_LEN + ciphertext.len() + TAG_LEN);
        frame.extend_from_slice(&length);
        frame.extend_from_slice(&ciphertext);
        frame.extend_from_slice(&tag);
        Ok(frame)
    }

    /// Seal arbitrary data, splitting it into as many frames as needed.
    pub fn seal(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let frames = data.len().div_ceil(MAX_FRAME_PAYLOAD);
        let mut out = Vec::with_capacity(data.len() + frames * (LENGTH_LEN + TAG_LEN));
        for chunk in data.chunks(MAX_FRAME_PAYLOAD) {
            out.extend_from_slice(&self.seal_frame(chunk)?);
        }
        Ok(out)
    }

    /// Buffer bytes received from the peer.
    pub fn feed(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.inbound.extend_from_slice(data);
        Ok(())
    }

    /// Open the next buffered frame.
    ///
    /// Returns `Ok(None)` until a whole frame has been fed.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        if self.inbound.len() < LENGTH_LEN {
            return Ok(None);
        }

        let length = u16::from_le_bytes([self.inbound[0], self.inbound[1]]) as usize;
        if length == 0 {
            return Err(self.terminate(SessionError::EmptyFrame));
        }
        if length > MAX_FRAME_PAYLOAD {
            return Err(self.terminate(SessionError::FrameTooLarge(length)));
        }

        let total = LENGTH_LEN + length + TAG_LEN;
        if self.inbound.len() < total {
            return Ok(None);
        }
        if self.read_counter == u64::MAX {
            return Err(self.terminate(SessionError::CounterExhausted));
        }

        let frame: Vec<u8> = self.inbound.drain(..total).collect();
        let (aad, rest) = frame.split_at(LENGTH_LEN);
        let (ciphertext, tag_bytes) = rest.split_at(length);
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(tag_bytes);

        let nonce = Nonce12::from_counter(self.read_counter);
        match self.read_cipher.open(&nonce, ciphertext, &tag, aad) {
            Ok(plaintext) => {
                trace!(counter = self.read_counter, length, "Opened frame");
                self.read_counter += 1;
                Ok(Some(plaintext))
            }
            Err(e) => {
                warn!(counter = self.read_counter, length, "Frame failed authentication");
                self.terminated = true;
                self.inbound.clear();
                Err(e.into())
            }
        }
    }

    /// Open every complete buffered frame and concatenate the plaintext.
    pub fn open_all(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(plaintext) = self.next_frame()? {
            out.extend_from_slice(&plaintext);
        }
        Ok(out)
    }

    /// Number of frames sealed so far.
    pub fn write_counter(&self) -> u64 {
        self.write_counter
    }

    /// Number of frames opened so far.
    pub fn read_counter(&self) -> u64 {
        self.read_counter
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Bytes fed but not yet consumed by a frame.
    pub fn buffered_len(&self) -> usize {
        self.inbound.len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.terminated {
            return Err(SessionError::Terminated.into());
        }
        Ok(())
    }

    fn terminate(&mut self, error: SessionError) -> hap_core::error::Error {
        warn!(error = %error, "Terminating record layer");
        self.terminated = true;
        self.inbound.clear();
        error.into()
    }

    #[cfg(test)]
    pub(crate) fn set_counters(&mut self, write: u64, read: u64) {
        self.write_counter = write;
        self.read_counter = read;
    }
}
