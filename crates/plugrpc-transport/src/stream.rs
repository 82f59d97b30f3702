use std::io::{Read, Write};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::error::{Result, TransportError};

type BoxedWriter = Box<dyn Write + Send>;

/// A connected duplex byte stream implementing `Read` and `Write`.
///
/// This is the physical connection a plugin session runs over. It is either a
/// Unix domain socket or a pair of one-way pipes (child stdio, own stdio).
pub struct IpcStream {
    inner: IpcStreamInner,
}

enum IpcStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    Pipe {
        reader: Box<dyn Read + Send>,
        writer: BoxedWriter,
    },
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.read(buf),
            IpcStreamInner::Pipe { reader, .. } => reader.read(buf),
        }
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.write(buf),
            IpcStreamInner::Pipe { writer, .. } => writer.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.flush(),
            IpcStreamInner::Pipe { writer, .. } => writer.flush(),
        }
    }
}

impl IpcStream {
    #[cfg(unix)]
    pub(crate) fn from_unix(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: IpcStreamInner::Unix(stream),
        }
    }

    /// Create a connected pair of in-process streams.
    #[cfg(unix)]
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::from_unix(left), Self::from_unix(right)))
    }

    /// Build a stream from two one-way pipes.
    pub fn from_pipes(
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
    ) -> Self {
        Self {
            inner: IpcStreamInner::Pipe {
                reader: Box::new(reader),
                writer: Box::new(writer),
            },
        }
    }

    /// Use this process's stdin/stdout as the connection.
    ///
    /// This is how a plugin launched by the core talks back to it.
    pub fn stdio() -> Self {
        Self::from_pipes(std::io::stdin(), std::io::stdout())
    }

    /// Take the piped stdout/stdin of a spawned child process.
    pub fn from_child(child: &mut std::process::Child) -> Result<Self> {
        let stdout = child.stdout.take();
        let stdin = child.stdin.take();
        match (stdout, stdin) {
            (Some(stdout), Some(stdin)) => Ok(Self::from_pipes(stdout, stdin)),
            _ => Err(TransportError::MissingPipe(child.id())),
        }
    }

    /// Transport name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(_) => "unix-domain-socket",
            IpcStreamInner::Pipe { .. } => "pipe",
        }
    }

    /// Split into independently owned read and write halves plus a handle that
    /// can tear the connection down from any thread.
    pub fn into_split(self) -> Result<(ReadHalf, WriteHalf, ShutdownHandle)> {
        let kind = self.kind();
        match self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => {
                let split_err = |source| TransportError::Split { kind, source };
                let reader = stream.try_clone().map_err(split_err)?;
                let control = stream.try_clone().map_err(split_err)?;
                let writer = shared_writer(Box::new(stream));
                Ok((
                    ReadHalf {
                        inner: Box::new(reader),
                    },
                    WriteHalf {
                        inner: Arc::clone(&writer),
                    },
                    ShutdownHandle {
                        kind,
                        writer,
                        socket: Some(control),
                    },
                ))
            }
            IpcStreamInner::Pipe { reader, writer } => {
                let writer = shared_writer(writer);
                Ok((
                    ReadHalf { inner: reader },
                    WriteHalf {
                        inner: Arc::clone(&writer),
                    },
                    ShutdownHandle {
                        kind,
                        writer,
                        #[cfg(unix)]
                        socket: None,
                    },
                ))
            }
        }
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcStream")
            .field("type", &self.kind())
            .finish()
    }
}

fn shared_writer(writer: BoxedWriter) -> Arc<Mutex<Option<BoxedWriter>>> {
    Arc::new(Mutex::new(Some(writer)))
}

/// Read side of a split [`IpcStream`].
pub struct ReadHalf {
    inner: Box<dyn Read + Send>,
}

impl Read for ReadHalf {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

/// Write side of a split [`IpcStream`].
///
/// Writes fail with `BrokenPipe` once the stream has been shut down.
pub struct WriteHalf {
    inner: Arc<Mutex<Option<BoxedWriter>>>,
}

impl WriteHalf {
    fn with_writer<T>(
        &mut self,
        f: impl FnOnce(&mut BoxedWriter) -> std::io::Result<T>,
    ) -> std::io::Result<T> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(writer) => f(writer),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "transport shut down",
            )),
        }
    }
}

impl Write for WriteHalf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.with_writer(|w| w.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.with_writer(|w| w.flush())
    }
}

/// Tears down a split stream from any thread.
///
/// For sockets this unblocks a reader parked in `read`. For pipes the write
/// side is dropped so the peer observes EOF; the local read side ends when
/// the peer closes its end in turn.
pub struct ShutdownHandle {
    kind: &'static str,
    writer: Arc<Mutex<Option<BoxedWriter>>>,
    #[cfg(unix)]
    socket: Option<std::os::unix::net::UnixStream>,
}

impl ShutdownHandle {
    /// Shut down both directions. Calling this more than once is harmless.
    pub fn shutdown(&self) -> Result<()> {
        let dropped = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if dropped.is_some() {
            debug!(kind = self.kind, "shutting down transport");
        }

        #[cfg(unix)]
        if let Some(socket) = &self.socket {
            match socket.shutdown(std::net::Shutdown::Both) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotConnected => {}
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        Ok(())
    }

    /// Whether [`shutdown`](Self::shutdown) has already run.
    pub fn is_shutdown(&self) -> bool {
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl std::fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("type", &self.kind)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::ErrorKind;
    use std::os::unix::net::UnixStream;
    use std::thread;

    use super::*;

    #[test]
    fn pair_is_duplex() {
        let (mut left, mut right) = IpcStream::pair().unwrap();
        left.write_all(b"ping").unwrap();
        let mut buf = [0u8; 4];
        right.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        right.write_all(b"pong").unwrap();
        left.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"pong");
        assert_eq!(left.kind(), "unix-domain-socket");
    }

    #[test]
    fn split_halves_work_from_separate_threads() {
        let (left, mut right) = IpcStream::pair().unwrap();
        let (mut reader, mut writer, _shutdown) = left.into_split().unwrap();

        let echo = thread::spawn(move || {
            let mut buf = [0u8; 5];
            reader.read_exact(&mut buf).unwrap();
            buf
        });

        right.write_all(b"hello").unwrap();
        writer.write_all(b"world").unwrap();

        let mut buf = [0u8; 5];
        right.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"world");
        assert_eq!(&echo.join().unwrap(), b"hello");
    }

    #[test]
    fn shutdown_unblocks_parked_reader() {
        let (left, _right) = IpcStream::pair().unwrap();
        let (mut reader, _writer, shutdown) = left.into_split().unwrap();

        let parked = thread::spawn(move || {
            let mut buf = [0u8; 1];
            reader.read(&mut buf)
        });

        thread::sleep(std::time::Duration::from_millis(20));
        shutdown.shutdown().unwrap();
        assert!(shutdown.is_shutdown());

        let read = parked.join().unwrap().unwrap();
        assert_eq!(read, 0);
    }

    #[test]
    fn write_after_shutdown_is_broken_pipe() {
        let (left, _right) = IpcStream::pair().unwrap();
        let (_reader, mut writer, shutdown) = left.into_split().unwrap();

        shutdown.shutdown().unwrap();
        shutdown.shutdown().unwrap();

        let err = writer.write_all(b"late").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BrokenPipe);
    }

    #[test]
    fn pipe_shutdown_signals_eof_to_peer() {
        let (a, b) = UnixStream::pair().unwrap();
        let stream = IpcStream::from_pipes(a.try_clone().unwrap(), a);
        assert_eq!(stream.kind(), "pipe");

        let (_reader, mut writer, shutdown) = stream.into_split().unwrap();
        writer.write_all(b"x").unwrap();
        shutdown.shutdown().unwrap();

        // The pipe variant only drops its writer; close the socket's last
        // clone held by the read half so the peer sees EOF.
        drop(_reader);

        let mut peer = b;
        let mut out = Vec::new();
        peer.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"x");
    }
}
