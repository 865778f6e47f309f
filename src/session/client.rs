//! A single MJPEG client
//!
//! Every write to the socket goes through one async mutex, so multipart
//! records are never interleaved. On top of that the distributor takes a
//! [`SendPermit`] before scheduling a send; a session that still has a send
//! in flight is skipped instead of queueing frames behind a slow socket.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use super::state::{PhaseCell, SessionPhase};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::http::response::{part_header, stream_header, PART_TRAILER};

/// Type-erased socket write half
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A connected stream client
pub struct ClientSession {
    id: u64,
    peer_addr: SocketAddr,
    send_timeout: Duration,
    writer: Mutex<Option<BoxedWriter>>,
    phase: PhaseCell,
    sending: AtomicBool,
    last_frame: StdMutex<Option<Frame>>,
    bytes_sent: AtomicU64,
}

impl ClientSession {
    /// Wrap `writer`; nothing is written until [`send_header`](Self::send_header)
    pub fn new<W>(id: u64, peer_addr: SocketAddr, writer: W, send_timeout: Duration) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            peer_addr,
            send_timeout,
            writer: Mutex::new(Some(Box::new(writer))),
            phase: PhaseCell::new(SessionPhase::NotSent),
            sending: AtomicBool::new(false),
            last_frame: StdMutex::new(None),
            bytes_sent: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase.get()
    }

    /// Whether a send is currently outstanding
    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::Acquire)
    }

    /// Total bytes written, preamble included
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Frame most recently written to this client
    pub fn last_frame(&self) -> Option<Frame> {
        self.last_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Write the MJPEG response preamble
    ///
    /// Allowed exactly once. The session is closed if the write fails.
    pub async fn send_header(&self) -> Result<()> {
        if !self
            .phase
            .transition(SessionPhase::NotSent, SessionPhase::HeaderSent)
        {
            return Err(match self.phase.get() {
                SessionPhase::Closing | SessionPhase::Closed => Error::SessionClosed,
                _ => Error::HeaderAlreadySent,
            });
        }

        let header = stream_header();
        let result = self
            .timed(async {
                let mut writer = self.writer.lock().await;
                let writer = writer.as_mut().ok_or(Error::SessionClosed)?;
                writer.write_all(&header).await?;
                writer.flush().await?;
                Ok(())
            })
            .await;

        match result {
            Ok(()) => {
                self.bytes_sent
                    .fetch_add(header.len() as u64, Ordering::Relaxed);
                tracing::trace!(session_id = self.id, "Stream header sent");
                Ok(())
            }
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    /// Reserve the right to send one frame
    ///
    /// Returns `None` while a previous send is outstanding or once the
    /// session stopped accepting frames.
    pub fn try_begin_send(self: &Arc<Self>) -> Option<SendPermit> {
        if !self.phase.get().is_open() {
            return None;
        }
        self.sending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        Some(SendPermit {
            session: Arc::clone(self),
        })
    }

    /// Send one frame, rejecting the call if a send is already in flight
    pub async fn send_frame(self: &Arc<Self>, frame: &Frame, close_after: bool) -> Result<usize> {
        match self.try_begin_send() {
            Some(permit) => permit.send(frame, close_after).await,
            None if self.phase.get().is_open() => Err(Error::SendInProgress),
            None => Err(Error::SessionClosed),
        }
    }

    /// Send a final frame and close
    ///
    /// Waits for any outstanding send to finish instead of skipping, so the
    /// last thing the client sees is `frame`.
    pub async fn finish(&self, frame: &Frame) -> Result<usize> {
        match self.timed(self.write_part(frame, true)).await {
            Ok((written, writer)) => {
                if writer.is_some() {
                    self.release(writer).await;
                }
                Ok(written)
            }
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    /// Close the socket
    ///
    /// Idempotent: only the first call shuts the writer down.
    pub async fn close(&self) -> bool {
        if !self.phase.begin_close() {
            return false;
        }

        let writer = self.writer.lock().await.take();
        self.release(writer).await;
        true
    }

    async fn release(&self, writer: Option<BoxedWriter>) {
        if let Some(mut writer) = writer {
            match tokio::time::timeout(self.send_timeout, writer.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::trace!(session_id = self.id, error = %e, "Shutdown failed")
                }
                Err(_) => tracing::trace!(session_id = self.id, "Shutdown timed out"),
            }
        }

        self.phase.set(SessionPhase::Closed);
        tracing::debug!(
            session_id = self.id,
            peer = %self.peer_addr,
            bytes_sent = self.bytes_sent(),
            "Client closed"
        );
    }

    /// Write one multipart record
    ///
    /// With `last`, the session enters `Closing` and the writer is handed
    /// back before the lock is released, so nothing can follow this part.
    async fn write_part(&self, frame: &Frame, last: bool) -> Result<(usize, Option<BoxedWriter>)> {
        let header = part_header(frame.len());

        let mut guard = self.writer.lock().await;
        if !self.phase.get().is_open() {
            return Err(Error::SessionClosed);
        }
        let writer = guard.as_mut().ok_or(Error::SessionClosed)?;
        writer.write_all(&header).await?;
        writer.write_all(frame.as_bytes()).await?;
        writer.write_all(PART_TRAILER).await?;
        writer.flush().await?;

        let written = header.len() + frame.len() + PART_TRAILER.len();
        self.bytes_sent.fetch_add(written as u64, Ordering::Relaxed);
        *self
            .last_frame
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(frame.clone());
        self.phase
            .transition(SessionPhase::HeaderSent, SessionPhase::Streaming);

        let taken = if last && self.phase.begin_close() {
            guard.take()
        } else {
            None
        };
        Ok((written, taken))
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.send_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::SendTimeout(self.send_timeout)),
        }
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("phase", &self.phase.get())
            .field("sending", &self.is_sending())
            .finish()
    }
}

/// Exclusive right to send one frame to a session
///
/// Releases the in-flight flag when dropped.
#[derive(Debug)]
pub struct SendPermit {
    session: Arc<ClientSession>,
}

impl SendPermit {
    pub fn session(&self) -> &Arc<ClientSession> {
        &self.session
    }

    /// Write `frame` under the session's send timeout
    ///
    /// Any failure closes the session. Returns the number of bytes written.
    pub async fn send(self, frame: &Frame, close_after: bool) -> Result<usize> {
        let session = &self.session;

        match session.timed(session.write_part(frame, close_after)).await {
            Ok((written, writer)) => {
                tracing::trace!(session_id = session.id, bytes = written, "Frame sent");
                if writer.is_some() {
                    session.release(writer).await;
                }
                Ok(written)
            }
            Err(e) => {
                tracing::debug!(session_id = session.id, error = %e, "Client send failed");
                session.close().await;
                Err(e)
            }
        }
    }
}

impl Drop for SendPermit {
    fn drop(&mut self) {
        self.session.sending.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::BOUNDARY;
    use std::io;
    use std::net::{IpAddr, Ipv4Addr};
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;
    use std::task::{Context, Poll};
    use tokio::io::AsyncReadExt;

    const TIMEOUT: Duration = Duration::from_millis(3000);

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000)
    }

    fn part(frame: &[u8]) -> Vec<u8> {
        let mut bytes = part_header(frame.len()).to_vec();
        bytes.extend_from_slice(frame);
        bytes.extend_from_slice(PART_TRAILER);
        bytes
    }

    /// Accepts `budget` bytes, then never completes another write
    struct StalledWriter {
        budget: usize,
        shutdowns: Arc<AtomicUsize>,
        drops: Arc<AtomicUsize>,
    }

    impl AsyncWrite for StalledWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if self.budget == 0 {
                return Poll::Pending;
            }
            let n = self.budget.min(buf.len());
            self.budget -= n;
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Poll::Ready(Ok(()))
        }
    }

    impl Drop for StalledWriter {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn stalled(budget: usize) -> (StalledWriter, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let drops = Arc::new(AtomicUsize::new(0));
        let writer = StalledWriter {
            budget,
            shutdowns: Arc::clone(&shutdowns),
            drops: Arc::clone(&drops),
        };
        (writer, shutdowns, drops)
    }

    #[tokio::test]
    async fn test_header_and_frame_exact_bytes() {
        let frame = Frame::from_static(&[0xFF, 0xD8, 0x01, 0xFF, 0xD9]);
        let mock = tokio_test::io::Builder::new()
            .write(&stream_header())
            .write(&part(frame.as_bytes()))
            .build();
        let session = Arc::new(ClientSession::new(1, peer(), mock, TIMEOUT));

        session.send_header().await.unwrap();
        assert_eq!(session.phase(), SessionPhase::HeaderSent);

        let written = session.send_frame(&frame, false).await.unwrap();
        assert_eq!(written, part(frame.as_bytes()).len());
        assert_eq!(session.phase(), SessionPhase::Streaming);
        assert_eq!(session.last_frame(), Some(frame));
        assert!(!session.is_sending());
    }

    #[tokio::test]
    async fn test_header_only_once() {
        let mock = tokio_test::io::Builder::new().write(&stream_header()).build();
        let session = ClientSession::new(1, peer(), mock, TIMEOUT);

        session.send_header().await.unwrap();
        assert!(matches!(session.send_header().await, Err(Error::HeaderAlreadySent)));
    }

    #[tokio::test]
    async fn test_frame_before_header_rejected() {
        let mock = tokio_test::io::Builder::new().build();
        let session = Arc::new(ClientSession::new(1, peer(), mock, TIMEOUT));

        assert!(session.try_begin_send().is_none());
        assert!(matches!(
            session.send_frame(&Frame::from_static(b"x"), false).await,
            Err(Error::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_overlapping_send_rejected() {
        let (mut client, server) = tokio::io::duplex(64);
        let session = Arc::new(ClientSession::new(1, peer(), server, TIMEOUT));

        let header_len = stream_header().len();
        let reader = tokio::spawn(async move {
            let mut received = Vec::new();
            client.read_to_end(&mut received).await.unwrap();
            received
        });

        session.send_header().await.unwrap();

        let frame = Frame::new(vec![0xAB; 4096]);
        let permit = session.try_begin_send().unwrap();
        assert!(session.is_sending());

        // A second send while the first is outstanding is refused
        assert!(session.try_begin_send().is_none());
        assert!(matches!(
            session.send_frame(&Frame::from_static(b"late"), false).await,
            Err(Error::SendInProgress)
        ));

        permit.send(&frame, true).await.unwrap();
        assert_eq!(session.phase(), SessionPhase::Closed);

        let received = reader.await.unwrap();
        assert_eq!(&received[header_len..], &part(frame.as_bytes())[..]);
        assert_eq!(
            received.windows(BOUNDARY.len()).filter(|w| *w == BOUNDARY.as_bytes()).count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_timeout_closes_once() {
        let (writer, shutdowns, drops) = stalled(stream_header().len() + 10);
        let session = Arc::new(ClientSession::new(1, peer(), writer, TIMEOUT));
        session.send_header().await.unwrap();

        let started = tokio::time::Instant::now();
        let result = session.send_frame(&Frame::new(vec![0; 1000]), false).await;

        assert!(matches!(result, Err(Error::SendTimeout(t)) if t == TIMEOUT));
        assert!(started.elapsed() < TIMEOUT + Duration::from_millis(50));
        assert_eq!(session.phase(), SessionPhase::Closed);
        assert!(!session.is_sending());

        assert!(!session.close().await);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (writer, shutdowns, drops) = stalled(usize::MAX);
        let session = ClientSession::new(1, peer(), writer, TIMEOUT);

        assert!(session.close().await);
        assert!(!session.close().await);
        assert!(matches!(session.send_header().await, Err(Error::SessionClosed)));

        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_finish_writes_final_frame_and_closes() {
        let notify = Frame::from_static(b"notify");
        let mock = tokio_test::io::Builder::new()
            .write(&stream_header())
            .write(&part(notify.as_bytes()))
            .build();
        let session = ClientSession::new(1, peer(), mock, TIMEOUT);
        session.send_header().await.unwrap();

        session.finish(&notify).await.unwrap();

        assert_eq!(session.phase(), SessionPhase::Closed);
        assert!(matches!(session.finish(&notify).await, Err(Error::SessionClosed)));
    }

    #[tokio::test]
    async fn test_broken_pipe_closes() {
        let mock = tokio_test::io::Builder::new()
            .write(&stream_header())
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let session = Arc::new(ClientSession::new(1, peer(), mock, TIMEOUT));
        session.send_header().await.unwrap();

        let result = session.send_frame(&Frame::from_static(b"x"), false).await;

        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(session.phase(), SessionPhase::Closed);
    }
}
