use std::io::{ErrorKind, Read};

use bytes::BytesMut;

use crate::codec::{decode_frame, Frame, FrameConfig};
use crate::error::{FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete frames from any `Read` stream.
///
/// Partial reads are buffered internally; callers only ever see whole frames.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
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

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` at EOF, including EOF in
    /// the middle of a frame.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if let Some(frame) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                return Ok(frame);
            }

            let read = match self.inner.read(&mut chunk) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };
            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Bytes received but not yet returned as a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
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
    use std::os::unix::net::UnixStream;

    use bytes::BufMut;

    use super::*;
    use crate::codec::encode_frame;
    use crate::control::ControlFrame;
    use crate::stream::CONTROL_STREAM;
    use crate::writer::FrameWriter;

    fn wire(frames: &[(u32, &[u8])]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for (id, payload) in frames {
            encode_frame(*id, payload, &mut buf).unwrap();
        }
        buf.to_vec()
    }

    #[test]
    fn reads_frames_for_different_streams() {
        let bytes = wire(&[(0, b"call"), (3, b"upload"), (0, b"reply")]);
        let mut reader = FrameReader::new(Cursor::new(bytes));

        let got: Vec<(u32, Vec<u8>)> = (0..3)
            .map(|_| {
                let f = reader.read_frame().unwrap();
                (f.stream_id, f.payload.to_vec())
            })
            .collect();

        assert_eq!(
            got,
            vec![
                (0, b"call".to_vec()),
                (3, b"upload".to_vec()),
                (0, b"reply".to_vec()),
            ]
        );
        assert_eq!(reader.buffered(), 0);
    }

    #[test]
    fn payload_larger_than_read_chunk() {
        let payload = vec![0x5A; READ_CHUNK_SIZE * 3 + 17];
        let bytes = wire(&[(11, &payload)]);
        let mut reader = FrameReader::new(Cursor::new(bytes));

        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.stream_id, 11);
        assert_eq!(frame.payload.len(), payload.len());
    }

    #[test]
    fn trickled_bytes_still_form_a_frame() {
        let bytes = wire(&[(2, b"slow")]);
        let mut reader = FrameReader::new(OneByteAtATime { bytes, pos: 0 });

        let frame = reader.read_frame().unwrap();
        assert_eq!((frame.stream_id, frame.payload.as_ref()), (2, b"slow".as_ref()));
    }

    #[test]
    fn eof_before_any_frame() {
        let mut reader = FrameReader::new(Cursor::new(Vec::new()));
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn eof_inside_a_frame() {
        let mut bytes = BytesMut::new();
        bytes.put_u32_le(4);
        bytes.put_u32_le(10);
        bytes.put_slice(b"half");

        let mut reader = FrameReader::new(Cursor::new(bytes.to_vec()));
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::ConnectionClosed)
        ));
    }

    #[test]
    fn configured_limit_applies() {
        let bytes = wire(&[(1, &[0u8; 64])]);
        let config = FrameConfig {
            max_payload_size: 32,
        };
        let mut reader = FrameReader::with_config(Cursor::new(bytes), config);
        assert_eq!(reader.config().max_payload_size, 32);
        assert!(matches!(
            reader.read_frame(),
            Err(FrameError::PayloadTooLarge { size: 64, max: 32 })
        ));
    }

    #[test]
    fn interrupted_reads_are_retried() {
        let bytes = wire(&[(8, b"ok")]);
        let mut reader = FrameReader::new(InterruptFirst {
            interrupted: false,
            inner: Cursor::new(bytes),
        });

        let frame = reader.read_frame().unwrap();
        assert_eq!(frame.stream_id, 8);
    }

    #[test]
    fn other_io_errors_surface() {
        let mut reader = FrameReader::new(AlwaysReset);
        let err = reader.read_frame().unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == ErrorKind::ConnectionReset));
    }

    #[test]
    fn control_and_data_over_socket_pair() {
        let (left, right) = UnixStream::pair().unwrap();
        let mut writer = FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        writer.send_control(ControlFrame::open(5)).unwrap();
        writer.send(5, b"hello").unwrap();

        let control = reader.read_frame().unwrap();
        assert_eq!(control.stream_id, CONTROL_STREAM);
        assert_eq!(
            ControlFrame::decode(&control.payload).unwrap(),
            ControlFrame::open(5)
        );

        let data = reader.read_frame().unwrap();
        assert_eq!((data.stream_id, data.payload.as_ref()), (5, b"hello".as_ref()));
    }

    struct OneByteAtATime {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for OneByteAtATime {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptFirst {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptFirst {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }

    struct AlwaysReset;

    impl Read for AlwaysReset {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::ConnectionReset))
        }
    }
}
