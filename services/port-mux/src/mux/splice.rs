//! Bidirectional splicing between a client and its backend.
//!
//! The classification byte has already been consumed from the client, so
//! it is written to the backend before anything else. After that, two copy
//! loops run concurrently and the first one to finish ends the splice: both
//! streams are owned by this function and are dropped together when it
//! returns, which is what unblocks and terminates the other loop.

use std::fmt;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::is_benign;

/// Per-direction copy buffer size.
pub const COPY_BUFFER_SIZE: usize = 8192;

/// One direction of a splice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToBackend,
    BackendToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToBackend => f.write_str("client_to_backend"),
            Direction::BackendToClient => f.write_str("backend_to_client"),
        }
    }
}

/// How a splice ended.
#[derive(Debug)]
pub struct SpliceOutcome {
    /// Bytes written to the backend, including the replayed first byte.
    pub bytes_to_backend: u64,
    /// Bytes written back to the client.
    pub bytes_from_backend: u64,
    /// The direction that finished first.
    pub closed_by: Direction,
    /// Set only for errors that are not an ordinary disconnect.
    pub error: Option<io::Error>,
}

impl SpliceOutcome {
    fn new(closed_by: Direction, result: io::Result<()>) -> Self {
        let error = match result {
            Ok(()) => None,
            Err(e) if is_benign(&e) => {
                trace!(direction = %closed_by, error = %e, "Peer disconnected");
                None
            }
            Err(e) => Some(e),
        };

        Self {
            bytes_to_backend: 0,
            bytes_from_backend: 0,
            closed_by,
            error,
        }
    }
}

/// Replay `first_byte` to `backend`, then forward both directions until
/// either one ends.
///
/// Both streams are consumed and closed before this returns.
pub async fn splice<C, B>(client: C, mut backend: B, first_byte: u8) -> SpliceOutcome
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    if let Err(e) = backend.write_all(&[first_byte]).await {
        debug!(error = %e, "Failed to replay classification byte");
        return SpliceOutcome::new(Direction::ClientToBackend, Err(e));
    }

    let mut to_backend = 1u64;
    let mut from_backend = 0u64;

    let (closed_by, result) = {
        let (client_read, client_write) = tokio::io::split(client);
        let (backend_read, backend_write) = tokio::io::split(backend);

        let upstream = pipe(client_read, backend_write, &mut to_backend);
        let downstream = pipe(backend_read, client_write, &mut from_backend);

        tokio::select! {
            result = upstream => (Direction::ClientToBackend, result),
            result = downstream => (Direction::BackendToClient, result),
        }
    };

    let mut outcome = SpliceOutcome::new(closed_by, result);
    outcome.bytes_to_backend = to_backend;
    outcome.bytes_from_backend = from_backend;
    outcome
}

/// Copy `reader` into `writer` until end of stream, then shut `writer` down.
async fn pipe<R, W>(mut reader: R, mut writer: W, total: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        *total += n as u64;
    }
    writer.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;
    use tokio::io::duplex;
    use tokio::time::timeout;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    /// Send `payload` through a splice and return what the backend saw plus
    /// the outcome once the client hangs up.
    async fn roundtrip(
        first: u8,
        payload: Vec<u8>,
        reply: Vec<u8>,
    ) -> (Vec<u8>, Vec<u8>, SpliceOutcome) {
        let (mut client_app, client_mux) = duplex(64 * 1024);
        let (backend_mux, mut backend_app) = duplex(64 * 1024);

        let splice_task = tokio::spawn(splice(client_mux, backend_mux, first));

        let expected_len = payload.len() + 1;
        let send = async {
            client_app.write_all(&payload).await.unwrap();
        };
        let receive = async {
            let mut seen = vec![0u8; expected_len];
            backend_app.read_exact(&mut seen).await.unwrap();
            backend_app.write_all(&reply).await.unwrap();
            seen
        };
        let ((), seen) = tokio::join!(send, receive);

        let mut echoed = vec![0u8; reply.len()];
        client_app.read_exact(&mut echoed).await.unwrap();
        drop(client_app);

        let outcome = timeout(TEST_TIMEOUT, splice_task).await.unwrap().unwrap();
        (seen, echoed, outcome)
    }

    #[tokio::test]
    async fn test_first_byte_is_replayed() {
        let mut payload = vec![0x03, 0x01];
        payload.extend((0..100u8).map(|i| i.wrapping_mul(7)));
        let (seen, echoed, outcome) = roundtrip(0x16, payload.clone(), b"pong".to_vec()).await;

        assert_eq!(seen[0], 0x16);
        assert_eq!(&seen[1..], &payload[..]);
        assert_eq!(echoed, b"pong");
        assert_eq!(outcome.bytes_to_backend, payload.len() as u64 + 1);
        assert_eq!(outcome.bytes_from_backend, 4);
        assert_eq!(outcome.closed_by, Direction::ClientToBackend);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_client_close_closes_backend() {
        let (client_app, client_mux) = duplex(1024);
        let (backend_mux, mut backend_app) = duplex(1024);

        let splice_task = tokio::spawn(splice(client_mux, backend_mux, b'G'));

        let mut first = [0u8; 1];
        backend_app.read_exact(&mut first).await.unwrap();
        assert_eq!(&first, b"G");

        drop(client_app);

        let mut rest = Vec::new();
        timeout(TEST_TIMEOUT, backend_app.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert!(rest.is_empty());

        let outcome = timeout(TEST_TIMEOUT, splice_task).await.unwrap().unwrap();
        assert_eq!(outcome.closed_by, Direction::ClientToBackend);
    }

    #[tokio::test]
    async fn test_backend_close_closes_client() {
        let (mut client_app, client_mux) = duplex(1024);
        let (backend_mux, mut backend_app) = duplex(1024);

        let splice_task = tokio::spawn(splice(client_mux, backend_mux, b'G'));

        let mut first = [0u8; 1];
        backend_app.read_exact(&mut first).await.unwrap();
        let response = b"HTTP/1.1 403 Forbidden\r\n\r\n";
        backend_app.write_all(response).await.unwrap();
        drop(backend_app);

        let mut received = Vec::new();
        timeout(TEST_TIMEOUT, client_app.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, response);

        let outcome = timeout(TEST_TIMEOUT, splice_task).await.unwrap().unwrap();
        assert_eq!(outcome.closed_by, Direction::BackendToClient);
        assert_eq!(outcome.bytes_from_backend, response.len() as u64);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_replay_failure_is_reported() {
        let (_client_app, client_mux) = duplex(1024);
        let backend = tokio_test::io::Builder::new()
            .write_error(io::Error::from(io::ErrorKind::PermissionDenied))
            .build();

        let outcome = splice(client_mux, backend, 0x16).await;
        assert_eq!(outcome.closed_by, Direction::ClientToBackend);
        assert_eq!(outcome.bytes_to_backend, 0);
        let err = outcome.error.expect("non-benign error should surface");
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn test_broken_pipe_is_absorbed() {
        let (_client_app, client_mux) = duplex(1024);
        let backend = tokio_test::io::Builder::new()
            .write_error(io::Error::from(io::ErrorKind::BrokenPipe))
            .build();

        let outcome = splice(client_mux, backend, 0x16).await;
        assert!(outcome.error.is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_backend_sees_client_bytes_in_order(
            first in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..32 * 1024),
            reply in proptest::collection::vec(any::<u8>(), 0..8 * 1024),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let (seen, echoed, outcome) = rt.block_on(roundtrip(first, payload.clone(), reply.clone()));

            prop_assert_eq!(seen[0], first);
            prop_assert_eq!(&seen[1..], &payload[..]);
            prop_assert_eq!(echoed, reply);
            prop_assert_eq!(outcome.bytes_to_backend, payload.len() as u64 + 1);
        }
    }
}
