//! TCP accept loop and per-connection request handling.

use crate::http::{Request, Response};
use hap_core::error::{Error, ErrorKind, Result};
use hap_pairing::{IdentityStore, PairingSession, SecureStream};
use rand::rngs::OsRng;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Idle limit while a connection is still unauthenticated.
const HANDSHAKE_IDLE: Duration = Duration::from_secs(30);

const READ_CHUNK: usize = 4096;

type Session = PairingSession<dyn IdentityStore, OsRng>;

/// Accessory HTTP server.
pub struct Server {
    store: Arc<dyn IdentityStore>,
    setup_code: String,
}

impl Server {
    pub fn new(store: Arc<dyn IdentityStore>, setup_code: impl Into<String>) -> Self {
        Self {
            store,
            setup_code: setup_code.into(),
        }
    }

    /// Accept connections forever, one task each.
    pub async fn run(&self, listener: TcpListener) -> Result<()> {
        info!(addr = ?listener.local_addr()?, "Accepting connections");
        loop {
            let (stream, peer) = listener.accept().await?;
            let session = PairingSession::new(self.store.clone(), self.setup_code.clone(), OsRng);
            tokio::spawn(async move {
                debug!(%peer, "Connection opened");
                match handle_connection(stream, session).await {
                    Ok(()) => debug!(%peer, "Connection closed"),
                    Err(e) => warn!(%peer, error = %e, "Connection ended with error"),
                }
            });
        }
    }
}

/// Serve one connection: plaintext pairing first, then the record layer.
pub async fn handle_connection<T>(mut stream: T, mut session: Session) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut pending = Vec::new();
    let mut buf = [0u8; READ_CHUNK];

    loop {
        while let Some((request, consumed)) = Request::parse(&pending)? {
            pending.drain(..consumed);
            let response = route(&mut session, &request);
            stream.write_all(&response.to_bytes()).await?;
            stream.flush().await?;

            if let Some(mut channel) = session.take_channel() {
                info!(controller = session.controller_id().unwrap_or("?"), "Switching to encrypted session");
                // Anything after the verify request is already framed.
                channel.feed(&pending)?;
                return serve_secure(SecureStream::new(stream, channel)).await;
            }
        }

        let n = timeout(HANDSHAKE_IDLE, stream.read(&mut buf))
            .await
            .map_err(|_| Error::Timeout)??;
        if n == 0 {
            return Ok(());
        }
        pending.extend_from_slice(&buf[..n]);
    }
}

async fn serve_secure<T>(mut stream: SecureStream<T>) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut pending = Vec::new();
    loop {
        while let Some((request, consumed)) = Request::parse(&pending)? {
            pending.drain(..consumed);
            let response = route_secure(&request);
            stream.write_all(&response.to_bytes()).await?;
        }

        match stream.read_message().await? {
            Some(plaintext) => pending.extend_from_slice(&plaintext),
            None => return Ok(()),
        }
    }
}

fn route(session: &mut Session, request: &Request) -> Response {
    let result = match (request.method.as_str(), request.path.as_str()) {
        ("POST", "/pair-setup") => session.handle_pair_setup(&request.body),
        ("POST", "/pair-verify") => session.handle_pair_verify(&request.body),
        (_, "/pair-setup") | (_, "/pair-verify") => return Response::empty(405),
        (method, path) => {
            debug!(method, path, "Request before pair-verify");
            return Response::empty(470);
        }
    };

    match result {
        Ok(response) => Response::pairing(response.body),
        Err(e) => error_response(&request.path, &e),
    }
}

/// Requests on a verified connection.
///
/// The accessory object model is not served, so every resource is missing.
fn route_secure(request: &Request) -> Response {
    debug!(method = %request.method, path = %request.path, "Encrypted request");
    Response::empty(404)
}

fn error_response(path: &str, error: &Error) -> Response {
    let status = match error.kind() {
        ErrorKind::UnexpectedState => 404,
        ErrorKind::MalformedMessage | ErrorKind::AuthenticationFailure => 400,
        ErrorKind::Io | ErrorKind::Internal => 500,
    };
    debug!(path, status, error = %error, "Pairing request failed");
    Response::empty(status)
}

/// Bind the listener used by [`Server::run`].
pub async fn bind(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    Ok(TcpListener::bind(addr).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hap_crypto::tlv::{Tlv8, TlvType};
    use hap_pairing::MemoryStore;
    use tokio::io::duplex;

    fn session() -> Session {
        let store: Arc<dyn IdentityStore> =
            Arc::new(MemoryStore::generate("AA:BB:CC:DD:EE:FF", &mut OsRng));
        PairingSession::new(store, "031-45-154", OsRng)
    }

    fn post(path: &str, body: Vec<u8>) -> Request {
        Request {
            method: "POST".to_string(),
            path: path.to_string(),
            headers: Default::default(),
            body,
        }
    }

    mod routing {
        use super::*;

        #[test]
        fn other_paths_need_authorization() {
            let mut session = session();
            let response = route(&mut session, &post("/accessories", Vec::new()));
            assert_eq!(response.status, 470);
        }

        #[test]
        fn wrong_method_is_rejected() {
            let mut session = session();
            let mut request = post("/pair-setup", Vec::new());
            request.method = "GET".to_string();
            assert_eq!(route(&mut session, &request).status, 405);
        }

        #[test]
        fn out_of_order_verify_is_not_found() {
            let mut session = session();
            let body = Tlv8::new()
                .with_state(3)
                .with(TlvType::EncryptedData, vec![0u8; 24])
                .encode();
            assert_eq!(route(&mut session, &post("/pair-verify", body)).status, 404);
        }

        #[test]
        fn malformed_tlv_is_bad_request() {
            let mut session = session();
            let response = route(&mut session, &post("/pair-verify", vec![0x06, 0x05, 0x01]));
            assert_eq!(response.status, 400);
        }

        #[test]
        fn setup_m1_returns_tlv() {
            let mut session = session();
            let body = Tlv8::new()
                .with_state(1)
                .with(TlvType::Method, [0u8].as_slice())
                .encode();

            let response = route(&mut session, &post("/pair-setup", body));
            assert_eq!(response.status, 200);
            assert_eq!(response.content_type, Some(crate::http::PAIRING_CONTENT_TYPE));
            assert_eq!(Tlv8::parse(&response.body).unwrap().state(), Some(2));
        }
    }

    mod connection {
        use super::*;

        #[tokio::test]
        async fn serves_pair_setup_over_stream() {
            let (server_side, mut client) = duplex(64 * 1024);
            let task = tokio::spawn(handle_connection(server_side, session()));

            let body = Tlv8::new()
                .with_state(1)
                .with(TlvType::Method, [0u8].as_slice())
                .encode();
            let mut request = format!(
                "POST /pair-setup HTTP/1.1\r\nContent-Type: application/pairing+tlv8\r\nContent-Length: {}\r\n\r\n",
                body.len()
            )
            .into_bytes();
            request.extend_from_slice(&body);
            client.write_all(&request).await.unwrap();

            let mut received = Vec::new();
            let mut buf = [0u8; 1024];
            while !received.windows(4).any(|w| w == b"\r\n\r\n")
                || received.len() < expected_len(&received)
            {
                let n = client.read(&mut buf).await.unwrap();
                assert!(n > 0, "server closed early");
                received.extend_from_slice(&buf[..n]);
            }

            assert!(received.starts_with(b"HTTP/1.1 200 OK\r\n"));
            drop(client);
            task.await.unwrap().unwrap();
        }

        fn expected_len(data: &[u8]) -> usize {
            let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
                return usize::MAX;
            };
            let head = String::from_utf8_lossy(&data[..end]);
            let length = head
                .lines()
                .find_map(|line| {
                    let (key, value) = line.split_once(':')?;
                    key.eq_ignore_ascii_case("Content-Length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            end + 4 + length
        }

        #[tokio::test]
        async fn garbage_closes_connection() {
            let (server_side, mut client) = duplex(1024);
            let task = tokio::spawn(handle_connection(server_side, session()));

            client.write_all(b"NOT HTTP\r\n\r\n").await.unwrap();
            assert!(task.await.unwrap().is_err());
        }
    }
}
