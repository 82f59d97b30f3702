use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use tracing::trace;

use crate::codec::{encode_frame, Frame, FrameConfig};
use crate::control::ControlFrame;
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to any `Write` stream.
///
/// Each frame is encoded into one buffer and written out before `send`
/// returns, so a writer shared behind a lock never interleaves two frames.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.stream_id, frame.payload.as_ref())
    }

    /// Send a stream lifecycle message.
    pub fn send_control(&mut self, control: ControlFrame) -> Result<()> {
        trace!(kind = ?control.kind, stream_id = control.stream_id, "control frame");
        self.write_frame(&control.to_frame())
    }

    /// Encode and send a payload on a stream.
    pub fn send(&mut self, stream_id: u32, payload: &[u8]) -> Result<()> {
        if payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_frame(stream_id, payload, &mut self.buf)?;

        let mut written = 0usize;
        while written < self.buf.len() {
            match self.inner.write(&self.buf[written..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::codec::{decode_frame, HEADER_SIZE};
    use crate::stream::CONTROL_STREAM;

    fn frames_in(bytes: Vec<u8>) -> Vec<Frame> {
        let mut wire = BytesMut::from(bytes.as_slice());
        std::iter::from_fn(|| decode_frame(&mut wire, usize::MAX).unwrap()).collect()
    }

    #[test]
    fn send_writes_header_and_payload() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));
        writer.send(4, b"data").unwrap();

        let bytes = writer.into_inner().into_inner();
        assert_eq!(bytes.len(), HEADER_SIZE + 4);
        assert_eq!(frames_in(bytes), vec![Frame::new(4, "data")]);
    }

    #[test]
    fn control_frames_go_to_control_stream() {
        let mut writer = FrameWriter::new(Cursor::new(Vec::new()));
        writer.send_control(ControlFrame::accept(12)).unwrap();
        writer.write_frame(&Frame::new(12, "after")).unwrap();

        let frames = frames_in(writer.into_inner().into_inner());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].stream_id, CONTROL_STREAM);
        assert_eq!(
            ControlFrame::decode(&frames[0].payload).unwrap(),
            ControlFrame::accept(12)
        );
        assert_eq!(frames[1], Frame::new(12, "after"));
    }

    #[test]
    fn oversized_payload_is_refused_without_writing() {
        let config = FrameConfig {
            max_payload_size: 3,
        };
        let mut writer = FrameWriter::with_config(Cursor::new(Vec::new()), config);

        let err = writer.send(1, b"four").unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { size: 4, max: 3 }));
        assert!(writer.get_ref().get_ref().is_empty());
    }

    #[test]
    fn short_writes_are_completed() {
        let mut writer = FrameWriter::new(TwoBytesAtATime::default());
        writer.send(2, b"chunky").unwrap();

        let inner = writer.into_inner();
        assert!(inner.flushed);
        assert_eq!(frames_in(inner.data), vec![Frame::new(2, "chunky")]);
    }

    #[test]
    fn interrupted_write_and_flush_retry() {
        let mut writer = FrameWriter::new(InterruptOnce::default());
        writer.send(1, b"again").unwrap();
        assert_eq!(
            frames_in(writer.into_inner().data),
            vec![Frame::new(1, "again")]
        );
    }

    #[test]
    fn zero_length_write_means_closed() {
        let mut writer = FrameWriter::new(Closed);
        assert!(matches!(
            writer.send(1, b"x"),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn broken_pipe_surfaces_as_io() {
        let mut writer = FrameWriter::new(Broken);
        let err = writer.send(1, b"x").unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::BrokenPipe));
    }

    #[derive(Default)]
    struct TwoBytesAtATime {
        data: Vec<u8>,
        flushed: bool,
    }

    impl Write for TwoBytesAtATime {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let n = buf.len().min(2);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.flushed = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct InterruptOnce {
        write_hit: bool,
        flush_hit: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptOnce {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.write_hit {
                self.write_hit = true;
                return Err(ErrorKind::Interrupted.into());
            }
            self.data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            if !self.flush_hit {
                self.flush_hit = true;
                return Err(ErrorKind::Interrupted.into());
            }
            Ok(())
        }
    }

    struct Closed;

    impl Write for Closed {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
