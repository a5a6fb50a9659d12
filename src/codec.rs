use crate::config::Level;
use flate2::{Compress, Crc, FlushCompress, Status};
use std::fmt;
use std::io::{self, Write};

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024; // 8KB output buffer

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const METHOD_DEFLATE: u8 = 0x08;
const OS_UNKNOWN: u8 = 0xff;

/// A streaming gzip encoder that can be reused for many responses.
///
/// The DEFLATE state and the output buffer are allocated once; [`reset`]
/// rewinds them for the next stream. The sink is supplied on every call, so
/// a single encoder can be bound to a different response each time it is
/// leased from the pool.
///
/// [`reset`]: GzipEncoder::reset
pub struct GzipEncoder {
    compress: Compress,
    crc: Crc,
    level: Level,
    output: Box<[u8]>,
    header_written: bool,
    closed: bool,
}

impl GzipEncoder {
    /// Creates an encoder at the given level.
    pub fn new(level: Level) -> Self {
        Self {
            compress: Compress::new(level.into_flate2(), false),
            crc: Crc::new(),
            level,
            output: vec![0u8; OUTPUT_BUFFER_SIZE].into_boxed_slice(),
            header_written: false,
            closed: false,
        }
    }

    /// Returns the level this encoder compresses at.
    pub fn level(&self) -> Level {
        self.level
    }

    /// Returns the number of uncompressed bytes accepted since the last reset.
    pub fn total_in(&self) -> u64 {
        self.compress.total_in()
    }

    /// Returns `true` once the current member has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Prepares the encoder for a new gzip member.
    pub fn reset(&mut self) {
        self.compress.reset();
        self.crc.reset();
        self.header_written = false;
        self.closed = false;
    }

    /// Compresses `input`, writing any produced bytes to `sink`.
    ///
    /// Returns `input.len()` on success; the DEFLATE stream may hold some of
    /// the data back until the next flush or close.
    pub fn write<W: Write + ?Sized>(&mut self, input: &[u8], sink: &mut W) -> io::Result<usize> {
        self.ensure_open()?;
        self.write_header(sink)?;

        let mut consumed = 0;
        while consumed < input.len() {
            let (read, written, status) = self.deflate(&input[consumed..], FlushCompress::None)?;
            sink.write_all(&self.output[..written])?;
            consumed += read;

            // Safety check to prevent infinite loop
            if status == Status::BufError || (read == 0 && written == 0) {
                return Err(io::Error::other("gzip encoder made no progress"));
            }
        }

        self.crc.update(input);
        Ok(input.len())
    }

    /// Pushes all pending compressed data to `sink` and flushes it.
    pub fn flush<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<()> {
        self.ensure_open()?;
        self.write_header(sink)?;

        loop {
            let (_, written, status) = self.deflate(&[], FlushCompress::Sync)?;
            sink.write_all(&self.output[..written])?;
            // BufError here only means there was nothing left to flush.
            if status == Status::BufError || written < self.output.len() {
                break;
            }
        }

        sink.flush()
    }

    /// Finishes the member: remaining DEFLATE data, then CRC32 and ISIZE.
    ///
    /// A member is emitted even when nothing was written. Closing twice is a
    /// no-op.
    pub fn close<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.write_header(sink)?;

        loop {
            let (_, written, status) = self.deflate(&[], FlushCompress::Finish)?;
            sink.write_all(&self.output[..written])?;
            match status {
                Status::StreamEnd => break,
                Status::BufError => return Err(io::Error::other("unexpected BufError")),
                Status::Ok => {}
            }
        }

        let mut footer = [0u8; 8];
        footer[..4].copy_from_slice(&self.crc.sum().to_le_bytes());
        footer[4..].copy_from_slice(&self.crc.amount().to_le_bytes());
        sink.write_all(&footer)?;

        self.closed = true;
        sink.flush()
    }

    fn ensure_open(&self) -> io::Result<()> {
        if self.closed {
            Err(io::Error::other("write to a closed gzip stream"))
        } else {
            Ok(())
        }
    }

    fn write_header<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<()> {
        if self.header_written {
            return Ok(());
        }

        let extra_flags = match self.level.get() {
            9 => 0x02,
            1 => 0x04,
            _ => 0x00,
        };

        let header = [
            GZIP_MAGIC[0],
            GZIP_MAGIC[1],
            METHOD_DEFLATE,
            0,
            0,
            0,
            0,
            0,
            extra_flags,
            OS_UNKNOWN,
        ];

        sink.write_all(&header)?;
        self.header_written = true;
        Ok(())
    }

    fn deflate(
        &mut self,
        input: &[u8],
        flush: FlushCompress,
    ) -> io::Result<(usize, usize, Status)> {
        let prior_in = self.compress.total_in();
        let prior_out = self.compress.total_out();

        let status = self.compress.compress(input, &mut self.output, flush)?;

        let read = (self.compress.total_in() - prior_in) as usize;
        let written = (self.compress.total_out() - prior_out) as usize;

        Ok((read, written, status))
    }
}

impl fmt::Debug for GzipEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GzipEncoder")
            .field("level", &self.level)
            .field("total_in", &self.compress.total_in())
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::{GzDecoder, MultiGzDecoder};
    use flate2::{Decompress, FlushDecompress};
    use std::io::Read;

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_header_bytes() {
        let mut encoder = GzipEncoder::new(Level::BEST);
        let mut out = Vec::new();
        encoder.write(b"x", &mut out).unwrap();

        assert_eq!(&out[..10], &[0x1f, 0x8b, 0x08, 0, 0, 0, 0, 0, 0x02, 0xff]);
    }

    #[test]
    fn test_round_trip_chunks() {
        let mut encoder = GzipEncoder::new(Level::DEFAULT);
        let mut out = Vec::new();
        for chunk in [&b"hello "[..], &b"gzip "[..], &b"world"[..]] {
            assert_eq!(encoder.write(chunk, &mut out).unwrap(), chunk.len());
        }
        encoder.close(&mut out).unwrap();

        assert_eq!(gunzip(&out), b"hello gzip world");
    }

    #[test]
    fn test_large_input_every_level() {
        let input: Vec<u8> = (0..200_000u32).flat_map(|i| (i % 251).to_le_bytes()).collect();

        for level in -1..=9 {
            let mut encoder = GzipEncoder::new(Level::new(level).unwrap());
            let mut out = Vec::new();
            encoder.write(&input, &mut out).unwrap();
            encoder.close(&mut out).unwrap();
            assert_eq!(gunzip(&out), input, "level {level}");
        }
    }

    #[test]
    fn test_empty_member() {
        let mut encoder = GzipEncoder::new(Level::DEFAULT);
        let mut out = Vec::new();
        encoder.close(&mut out).unwrap();

        assert_eq!(&out[..2], &GZIP_MAGIC);
        assert!(gunzip(&out).is_empty());
    }

    #[test]
    fn test_flush_makes_data_decodable() {
        let mut encoder = GzipEncoder::new(Level::DEFAULT);
        let mut out = Vec::new();
        encoder.write(b"event: tick\n\n", &mut out).unwrap();
        encoder.flush(&mut out).unwrap();

        // No trailer yet, but the raw DEFLATE data must already decode fully.
        let mut decompress = Decompress::new(false);
        let mut decoded = Vec::with_capacity(64);
        decompress
            .decompress_vec(&out[10..], &mut decoded, FlushDecompress::Sync)
            .unwrap();
        assert_eq!(decoded, b"event: tick\n\n");
    }

    #[test]
    fn test_reset_reuses_encoder() {
        let mut encoder = GzipEncoder::new(Level::FASTEST);
        let mut first = Vec::new();
        encoder.write(b"first", &mut first).unwrap();
        encoder.close(&mut first).unwrap();
        assert!(encoder.is_closed());

        encoder.reset();
        assert_eq!(encoder.total_in(), 0);

        let mut second = Vec::new();
        encoder.write(b"second", &mut second).unwrap();
        encoder.close(&mut second).unwrap();

        assert_eq!(gunzip(&first), b"first");
        assert_eq!(gunzip(&second), b"second");

        let mut joined = Vec::new();
        MultiGzDecoder::new(&[first, second].concat()[..])
            .read_to_end(&mut joined)
            .unwrap();
        assert_eq!(joined, b"firstsecond");
    }

    #[test]
    fn test_write_after_close_fails() {
        let mut encoder = GzipEncoder::new(Level::DEFAULT);
        let mut out = Vec::new();
        encoder.close(&mut out).unwrap();
        let len = out.len();

        assert!(encoder.write(b"late", &mut out).is_err());
        encoder.close(&mut out).unwrap();
        assert_eq!(out.len(), len);
    }
}
