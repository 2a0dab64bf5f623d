//! Body stream selection, reading and writing entity bodies with the framing of their message.

use std::io::Write;

use flate2::{
    write::{GzDecoder, GzEncoder, ZlibDecoder, ZlibEncoder},
    Compression,
};

use crate::{
    message::{ContentEncoding, Framing},
    Framer, FramingError, HttpError,
};

/// Result of an incremental body operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The framer ran dry before the body ended, refill and call again.
    Pending,
    /// The body has been fully consumed.
    Done,
}

/// Reader of an entity body out of a connection's framer.
pub enum BodyReader {
    Empty,
    Fixed { remaining: u64 },
    Chunked(ChunkedDecoder),
    Encoded(Box<BodyReader>, Decoder),
}

impl BodyReader {
    /// Select the reader for a message's framing.
    ///
    /// Chunked transfer coding takes precedence over a content length if both are present.
    pub fn open(framing: &Framing) -> Result<Self, HttpError> {
        let reader = if framing.chunked {
            BodyReader::Chunked(ChunkedDecoder::default())
        } else {
            match framing.content_length {
                Some(length) if length > 0 => BodyReader::Fixed { remaining: length },
                _ => BodyReader::Empty,
            }
        };

        if let BodyReader::Empty = reader {
            return Ok(reader);
        }

        let reader = match &framing.content_encoding {
            ContentEncoding::Identity => reader,
            ContentEncoding::Gzip => {
                BodyReader::Encoded(Box::new(reader), Decoder::Gzip(GzDecoder::new(Vec::new())))
            }
            ContentEncoding::Deflate => BodyReader::Encoded(
                Box::new(reader),
                Decoder::Deflate(ZlibDecoder::new(Vec::new())),
            ),
            ContentEncoding::Unsupported(value) => {
                return Err(HttpError::UnsupportedEncoding(value.clone()))
            }
        };

        Ok(reader)
    }

    /// Move decoded body bytes available in the framer into `out`.
    pub fn read(&mut self, framer: &mut Framer, out: &mut Vec<u8>) -> Result<Progress, HttpError> {
        self.read_limited(framer, out, usize::MAX)
    }

    /// Like `read`, but fails with `BodyTooLarge` once `out` grows past `limit` bytes.
    ///
    /// Decoding stops shortly after crossing the limit, a small compressed body can't inflate
    /// far beyond it.
    pub fn read_limited(
        &mut self,
        framer: &mut Framer,
        out: &mut Vec<u8>,
        limit: usize,
    ) -> Result<Progress, HttpError> {
        let progress = match self {
            BodyReader::Empty => Progress::Done,
            BodyReader::Fixed { remaining } => {
                let max = usize::try_from(*remaining).unwrap_or(usize::MAX);
                *remaining -= framer.read_bytes(out, max) as u64;

                if *remaining == 0 {
                    Progress::Done
                } else {
                    Progress::Pending
                }
            }
            BodyReader::Chunked(decoder) => decoder.read(framer, out)?,
            BodyReader::Encoded(inner, decoder) => {
                let mut raw = Vec::new();
                let progress = inner.read(framer, &mut raw)?;
                decoder.decode(&raw, out, limit)?;

                if progress == Progress::Done {
                    decoder.finish(out, limit)?;
                }
                progress
            }
        };

        if out.len() > limit {
            return Err(HttpError::BodyTooLarge { limit });
        }

        if progress == Progress::Pending && framer.is_eof() {
            return Err(FramingError::UnexpectedEof.into());
        }

        Ok(progress)
    }

    /// Discard the rest of the body, keeping the connection aligned on the next message.
    pub fn drain(&mut self, framer: &mut Framer) -> Result<Progress, HttpError> {
        // Skip decoding, the content doesn't matter
        if let BodyReader::Encoded(inner, _) = self {
            return inner.drain(framer);
        }

        if let BodyReader::Fixed { remaining } = self {
            let max = usize::try_from(*remaining).unwrap_or(usize::MAX);
            *remaining -= framer.skip(max) as u64;

            if *remaining == 0 {
                return Ok(Progress::Done);
            }
            if framer.is_eof() {
                return Err(FramingError::UnexpectedEof.into());
            }
            return Ok(Progress::Pending);
        }

        let mut scratch = Vec::new();
        self.read(framer, &mut scratch)
    }
}

#[derive(Default)]
enum ChunkPhase {
    #[default]
    Size,
    Data {
        remaining: u64,
    },
    DataEnd,
    Trailers,
    Done,
}

/// Decoder of the chunked transfer coding.
#[derive(Default)]
pub struct ChunkedDecoder {
    phase: ChunkPhase,
}

impl ChunkedDecoder {
    fn read(&mut self, framer: &mut Framer, out: &mut Vec<u8>) -> Result<Progress, HttpError> {
        loop {
            match &mut self.phase {
                ChunkPhase::Size => {
                    let Some(line) = framer.read_line()? else {
                        return Ok(Progress::Pending);
                    };

                    let size = parse_chunk_size(&line)?;
                    self.phase = if size == 0 {
                        ChunkPhase::Trailers
                    } else {
                        ChunkPhase::Data { remaining: size }
                    };
                }
                ChunkPhase::Data { remaining } => {
                    let max = usize::try_from(*remaining).unwrap_or(usize::MAX);
                    *remaining -= framer.read_bytes(out, max) as u64;

                    if *remaining != 0 {
                        return Ok(Progress::Pending);
                    }
                    self.phase = ChunkPhase::DataEnd;
                }
                ChunkPhase::DataEnd => {
                    let Some(line) = framer.read_line()? else {
                        return Ok(Progress::Pending);
                    };

                    if !line.is_empty() {
                        return Err(FramingError::BadChunk.into());
                    }
                    self.phase = ChunkPhase::Size;
                }
                ChunkPhase::Trailers => {
                    // Trailer fields aren't supported, they're read and dropped
                    let Some(line) = framer.read_line()? else {
                        return Ok(Progress::Pending);
                    };

                    if line.is_empty() {
                        self.phase = ChunkPhase::Done;
                    }
                }
                ChunkPhase::Done => return Ok(Progress::Done),
            }
        }
    }
}

fn parse_chunk_size(line: &str) -> Result<u64, HttpError> {
    // Chunk extensions are ignored
    let size = line.split(';').next().unwrap_or("").trim();

    if size.is_empty() || size.len() > 16 {
        return Err(FramingError::BadChunk.into());
    }

    u64::from_str_radix(size, 16).map_err(|_| FramingError::BadChunk.into())
}

/// Streaming decompressor for an encoded body.
pub enum Decoder {
    Gzip(GzDecoder<Vec<u8>>),
    Deflate(ZlibDecoder<Vec<u8>>),
}

/// Input fed to a decoder per step, bounding how far one step can inflate.
const DECODE_STEP: usize = 64;

impl Decoder {
    fn decode(&mut self, data: &[u8], out: &mut Vec<u8>, limit: usize) -> Result<(), HttpError> {
        for step in data.chunks(DECODE_STEP) {
            let decoded = match self {
                Decoder::Gzip(decoder) => {
                    decoder.write_all(step).map_err(bad_encoding)?;
                    decoder.get_mut()
                }
                Decoder::Deflate(decoder) => {
                    decoder.write_all(step).map_err(bad_encoding)?;
                    decoder.get_mut()
                }
            };
            out.append(decoded);

            if out.len() > limit {
                return Err(HttpError::BodyTooLarge { limit });
            }
        }

        Ok(())
    }

    fn finish(&mut self, out: &mut Vec<u8>, limit: usize) -> Result<(), HttpError> {
        let decoded = match self {
            Decoder::Gzip(decoder) => {
                decoder.try_finish().map_err(bad_encoding)?;
                decoder.get_mut()
            }
            Decoder::Deflate(decoder) => {
                decoder.try_finish().map_err(bad_encoding)?;
                decoder.get_mut()
            }
        };
        out.append(decoded);

        if out.len() > limit {
            return Err(HttpError::BodyTooLarge { limit });
        }
        Ok(())
    }
}

/// Corrupt compressed data is the peer's fault, not an i/o failure.
fn bad_encoding(_: std::io::Error) -> HttpError {
    FramingError::BadEncoding.into()
}

/// Writer of an entity body, serializing it with the framing of its message.
pub enum BodyWriter {
    Empty,
    Fixed { remaining: u64 },
    Chunked,
    Encoded(Box<BodyWriter>, Encoder),
}

impl BodyWriter {
    /// Select the writer for a message's framing.
    pub fn open(framing: &Framing) -> Result<Self, HttpError> {
        let writer = if framing.chunked {
            BodyWriter::Chunked
        } else {
            match framing.content_length {
                Some(length) if length > 0 => BodyWriter::Fixed { remaining: length },
                _ => BodyWriter::Empty,
            }
        };

        let level = Compression::default();
        let writer = match &framing.content_encoding {
            ContentEncoding::Identity => writer,
            ContentEncoding::Gzip => {
                BodyWriter::Encoded(Box::new(writer), Encoder::Gzip(GzEncoder::new(Vec::new(), level)))
            }
            ContentEncoding::Deflate => BodyWriter::Encoded(
                Box::new(writer),
                Encoder::Deflate(ZlibEncoder::new(Vec::new(), level)),
            ),
            ContentEncoding::Unsupported(value) => {
                return Err(HttpError::UnsupportedEncoding(value.clone()))
            }
        };

        Ok(writer)
    }

    /// Returns true if this writer emits the chunked transfer coding.
    pub fn is_chunked(&self) -> bool {
        match self {
            BodyWriter::Chunked => true,
            BodyWriter::Encoded(inner, _) => inner.is_chunked(),
            _ => false,
        }
    }

    /// Serialize body data into `out`.
    pub fn write(&mut self, data: &[u8], out: &mut Vec<u8>) -> Result<(), HttpError> {
        if data.is_empty() {
            return Ok(());
        }

        match self {
            BodyWriter::Empty => {
                return Err(HttpError::BodyLength {
                    expected: 0,
                    actual: data.len() as u64,
                });
            }
            BodyWriter::Fixed { remaining } => {
                let length = data.len() as u64;
                if length > *remaining {
                    return Err(HttpError::BodyLength {
                        expected: *remaining,
                        actual: length,
                    });
                }

                *remaining -= length;
                out.extend_from_slice(data);
            }
            BodyWriter::Chunked => {
                write_chunk(data, out);
            }
            BodyWriter::Encoded(inner, encoder) => {
                let encoded = encoder.encode(data)?;
                let result = inner.write(encoded, out);
                encoded.clear();
                result?;
            }
        }

        Ok(())
    }

    /// Finish the body, failing if fewer bytes were written than declared.
    ///
    /// This does not write the chunked terminator, see `write_chunked_terminator`.
    pub fn close(&mut self, out: &mut Vec<u8>) -> Result<(), HttpError> {
        match self {
            BodyWriter::Fixed { remaining } if *remaining > 0 => Err(HttpError::BodyLength {
                expected: *remaining,
                actual: 0,
            }),
            BodyWriter::Encoded(inner, encoder) => {
                let encoded = encoder.finish()?;
                let result = inner.write(encoded, out);
                encoded.clear();
                result?;

                inner.close(out)
            }
            _ => Ok(()),
        }
    }
}

fn write_chunk(data: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(format!("{:x}\r\n", data.len()).as_bytes());
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
}

/// Append the zero-length chunk ending a chunked body.
pub fn write_chunked_terminator(out: &mut Vec<u8>) {
    out.extend_from_slice(b"0\r\n\r\n");
}

/// Streaming compressor for an encoded body.
pub enum Encoder {
    Gzip(GzEncoder<Vec<u8>>),
    Deflate(ZlibEncoder<Vec<u8>>),
}

impl Encoder {
    fn encode(&mut self, data: &[u8]) -> Result<&mut Vec<u8>, HttpError> {
        let encoded = match self {
            Encoder::Gzip(encoder) => {
                encoder.write_all(data)?;
                encoder.get_mut()
            }
            Encoder::Deflate(encoder) => {
                encoder.write_all(data)?;
                encoder.get_mut()
            }
        };

        Ok(encoded)
    }

    fn finish(&mut self) -> Result<&mut Vec<u8>, HttpError> {
        let encoded = match self {
            Encoder::Gzip(encoder) => {
                encoder.try_finish()?;
                encoder.get_mut()
            }
            Encoder::Deflate(encoder) => {
                encoder.try_finish()?;
                encoder.get_mut()
            }
        };

        Ok(encoded)
    }
}
