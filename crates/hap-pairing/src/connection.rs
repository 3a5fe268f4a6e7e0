//! Async stream wrapper applying the record layer.

use crate::channel::EncryptedChannel;
use hap_core::error::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const READ_CHUNK: usize = 4096;

/// A connection whose every byte passes through an [`EncryptedChannel`].
pub struct SecureStream<T> {
    inner: T,
    channel: EncryptedChannel,
}

impl<T> SecureStream<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(inner: T, channel: EncryptedChannel) -> Self {
        Self { inner, channel }
    }

    /// Read until at least one frame opens and return its plaintext.
    ///
    /// Every complete frame already buffered is included. Returns `Ok(None)`
    /// when the peer closes cleanly between frames.
    pub async fn read_message(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let plaintext = self.channel.open_all()?;
            if !plaintext.is_empty() {
                return Ok(Some(plaintext));
            }

            let n = self.inner.read(&mut buf).await?;
            if n == 0 {
                if self.channel.buffered_len() == 0 {
                    return Ok(None);
                }
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed mid-frame",
                )));
            }
            self.channel.feed(&buf[..n])?;
        }
    }

    /// Seal `data` and write every resulting frame.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let sealed = self.channel.seal(data)?;
        self.inner.write_all(&sealed).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub fn channel(&self) -> &EncryptedChannel {
        &self.channel
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hap_core::error::SessionError;
    use hap_crypto::keys::{SessionKeys, SharedSecret};
    use tokio::io::duplex;

    fn keys() -> SessionKeys {
        SessionKeys::derive(&SharedSecret::new(vec![0x33u8; 32])).unwrap()
    }

    #[tokio::test]
    async fn messages_cross_in_both_directions() {
        let (a, b) = duplex(8192);
        let mut accessory = SecureStream::new(a, EncryptedChannel::new(keys()));
        let mut controller = SecureStream::new(b, EncryptedChannel::controller(keys()));

        controller.write_all(b"GET /accessories HTTP/1.1\r\n\r\n").await.unwrap();
        let request = accessory.read_message().await.unwrap().unwrap();
        assert_eq!(request, b"GET /accessories HTTP/1.1\r\n\r\n");

        accessory.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").await.unwrap();
        let response = controller.read_message().await.unwrap().unwrap();
        assert_eq!(response, b"HTTP/1.1 204 No Content\r\n\r\n");
    }

    #[tokio::test]
    async fn large_writes_are_framed() {
        let (a, b) = duplex(64 * 1024);
        let mut accessory = SecureStream::new(a, EncryptedChannel::new(keys()));
        let mut controller = SecureStream::new(b, EncryptedChannel::controller(keys()));

        let payload = vec![0xC3u8; 5000];
        accessory.write_all(&payload).await.unwrap();
        assert_eq!(accessory.channel().write_counter(), 5);

        let mut received = Vec::new();
        while received.len() < payload.len() {
            received.extend(controller.read_message().await.unwrap().unwrap());
        }
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn clean_close_returns_none() {
        let (a, b) = duplex(1024);
        let mut accessory = SecureStream::new(a, EncryptedChannel::new(keys()));
        drop(b);

        assert!(accessory.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_mid_frame_is_an_error() {
        let (a, mut b) = duplex(1024);
        let mut accessory = SecureStream::new(a, EncryptedChannel::new(keys()));

        b.write_all(&[10, 0, 1, 2, 3]).await.unwrap();
        drop(b);

        assert!(matches!(
            accessory.read_message().await,
            Err(Error::Io(_))
        ));
    }

    #[tokio::test]
    async fn garbage_terminates_stream() {
        let (a, mut b) = duplex(1024);
        let mut accessory = SecureStream::new(a, EncryptedChannel::new(keys()));

        let mut frame = vec![4, 0];
        frame.extend_from_slice(&[0xEE; 20]);
        b.write_all(&frame).await.unwrap();

        assert!(accessory.read_message().await.is_err());
        assert!(accessory.channel().is_terminated());
        assert!(matches!(
            accessory.write_all(b"anything").await,
            Err(Error::Session(SessionError::Terminated))
        ));
    }
}
