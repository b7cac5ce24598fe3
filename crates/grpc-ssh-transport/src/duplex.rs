//! Duplex stream over a pair of pipes and a process or session lifecycle
//!
//! A [`DuplexStream`] binds a read pipe and a write pipe obtained from a
//! [`Lifecycle`] into one bidirectional byte stream. Once the backing resource
//! has been started, a watcher task waits for it to exit and then closes the
//! stream. Teardown runs exactly once, whether it is triggered by the watcher,
//! by [`DuplexStream::close`] or by dropping the stream.

use crate::{CloseError, TransportError};
use async_trait::async_trait;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::OnceCell;
use tracing::{debug, trace};
use uuid::Uuid;

/// Read side handed out by a [`Lifecycle`]
pub type PipeReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write side handed out by a [`Lifecycle`]
pub type PipeWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Capabilities a backing process or session exposes to a [`DuplexStream`].
///
/// Pipes are obtained before `start`. After a successful start the lifecycle
/// is shared between the stream and its watcher, so `wait` and `close` take
/// `&self` and must tolerate being called concurrently: `close` is expected to
/// make a pending `wait` return.
#[async_trait]
pub trait Lifecycle: Send + Sync + 'static {
    /// Obtain the pipe carrying the remote side's output
    fn read_pipe(&mut self) -> Result<PipeReader, TransportError>;

    /// Obtain the pipe feeding the remote side's input
    fn write_pipe(&mut self) -> Result<PipeWriter, TransportError>;

    /// Start the backing process or session
    async fn start(&mut self) -> Result<(), TransportError>;

    /// Block until the backing resource exits
    async fn wait(&self) -> Result<(), TransportError>;

    /// Ask the backing resource to terminate
    async fn close(&self) -> Result<(), TransportError>;
}

/// One direction of the stream plus the task parked on it
struct Half<T> {
    pipe: Option<T>,
    waker: Option<Waker>,
}

impl<T> Half<T> {
    fn new(pipe: T) -> Self {
        Self {
            pipe: Some(pipe),
            waker: None,
        }
    }

    /// Take the pipe out and wake whoever is waiting on it
    fn shut(&mut self) -> Option<T> {
        if let Some(waker) = self.waker.take() {
            waker.wake();
        }
        self.pipe.take()
    }
}

struct Shared {
    id: Uuid,
    reader: Mutex<Half<PipeReader>>,
    writer: Mutex<Half<PipeWriter>>,
    lifecycle: Arc<dyn Lifecycle>,
    outcome: OnceCell<Result<(), CloseError>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    async fn close(&self) -> Result<(), CloseError> {
        self.outcome.get_or_init(|| self.teardown()).await.clone()
    }

    async fn teardown(&self) -> Result<(), CloseError> {
        debug!(stream = %self.id, "Closing duplex stream");
        let mut errors = CloseError::default();

        drop(lock(&self.reader).shut());

        let writer = lock(&self.writer).shut();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                errors.push(e);
            }
        }

        if let Err(e) = self.lifecycle.close().await {
            errors.push(e);
        }

        errors.into_result()
    }

    async fn watch(self: Arc<Self>) {
        match self.lifecycle.wait().await {
            Ok(()) => debug!(stream = %self.id, "Backing resource exited, closing"),
            Err(e) => debug!(stream = %self.id, error = %e, "Backing resource exited with error, closing"),
        }

        match self.close().await {
            Ok(()) => debug!(stream = %self.id, "Closed"),
            Err(e) => debug!(stream = %self.id, error = %e, "Closed with errors"),
        }
    }
}

/// Bidirectional byte stream over a started [`Lifecycle`]
///
/// When the backing resource exits, the watcher tears the stream down at
/// once. Output the remote side wrote before exiting but that has not been
/// read yet is discarded, and later reads fail with
/// [`std::io::ErrorKind::NotConnected`]. A peer that needs its last bytes
/// delivered must keep running until the reader has consumed them.
pub struct DuplexStream {
    shared: Arc<Shared>,
}

impl DuplexStream {
    /// Bind the lifecycle's pipes, start it and spawn the exit watcher.
    ///
    /// When `start` fails its error is returned and no watcher is spawned.
    pub async fn open<L: Lifecycle>(lifecycle: L) -> Result<Self, TransportError> {
        Self::open_with_id(Uuid::new_v4(), lifecycle).await
    }

    /// Same as [`DuplexStream::open`] with a caller-chosen identifier for logs
    pub async fn open_with_id<L: Lifecycle>(
        id: Uuid,
        mut lifecycle: L,
    ) -> Result<Self, TransportError> {
        let reader = lifecycle.read_pipe()?;
        let writer = lifecycle.write_pipe()?;
        lifecycle.start().await?;

        let shared = Arc::new(Shared {
            id,
            reader: Mutex::new(Half::new(reader)),
            writer: Mutex::new(Half::new(writer)),
            lifecycle: Arc::new(lifecycle),
            outcome: OnceCell::new(),
        });

        tokio::spawn(Arc::clone(&shared).watch());
        trace!(stream = %id, "Duplex stream started");

        Ok(Self { shared })
    }

    /// Identifier used in log events for this stream
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Close both pipes and terminate the backing resource.
    ///
    /// Teardown happens once; every call returns the outcome of that single
    /// teardown, including all failures it collected.
    pub async fn close(&self) -> Result<(), CloseError> {
        self.shared.close().await
    }

    /// Whether teardown has completed
    pub fn is_closed(&self) -> bool {
        self.shared.outcome.initialized()
    }

    /// Pipes have no local address
    pub fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Pipes have no peer address
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Deadlines are accepted and ignored; pipes have no deadline semantics
    pub fn set_deadline(&self, _deadline: Option<Instant>) -> io::Result<()> {
        Ok(())
    }

    /// See [`DuplexStream::set_deadline`]
    pub fn set_read_deadline(&self, _deadline: Option<Instant>) -> io::Result<()> {
        Ok(())
    }

    /// See [`DuplexStream::set_deadline`]
    pub fn set_write_deadline(&self, _deadline: Option<Instant>) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for DuplexStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuplexStream")
            .field("id", &self.shared.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl AsyncRead for DuplexStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut half = lock(&self.shared.reader);
        let Some(pipe) = half.pipe.as_mut() else {
            return Poll::Ready(Err(TransportError::closed_io()));
        };

        let poll = Pin::new(pipe).poll_read(cx, buf);
        if poll.is_pending() {
            half.waker = Some(cx.waker().clone());
        }
        poll
    }
}

impl DuplexStream {
    fn poll_writer<R>(
        &self,
        cx: &mut Context<'_>,
        f: impl FnOnce(Pin<&mut PipeWriter>, &mut Context<'_>) -> Poll<io::Result<R>>,
    ) -> Poll<io::Result<R>> {
        let mut half = lock(&self.shared.writer);
        let Some(pipe) = half.pipe.as_mut() else {
            return Poll::Ready(Err(TransportError::closed_io()));
        };

        let poll = f(Pin::new(pipe), cx);
        if poll.is_pending() {
            half.waker = Some(cx.waker().clone());
        }
        poll
    }
}

impl AsyncWrite for DuplexStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.poll_writer(cx, |pipe, cx| pipe.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.poll_writer(cx, |pipe, cx| pipe.poll_flush(cx))
    }

    /// Half-close: the write pipe is released once shut down, so the remote
    /// side sees end of input while output can still be read.
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let poll = self.poll_writer(cx, |pipe, cx| pipe.poll_shutdown(cx));
        if let Poll::Ready(Ok(())) = poll {
            drop(lock(&self.shared.writer).pipe.take());
        }
        poll
    }
}

impl Drop for DuplexStream {
    fn drop(&mut self) {
        if self.is_closed() {
            return;
        }

        // Dropped without an explicit close: tear down in the background
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let shared = Arc::clone(&self.shared);
            runtime.spawn(async move {
                if let Err(e) = shared.close().await {
                    debug!(stream = %shared.id, error = %e, "Close on drop failed");
                }
            });
        }
    }
}
