//! Chunked transfer encoding support
//!
//! Encoding side: the response builder frames each body write as
//! `<hex-size>\r\n<bytes>\r\n` and ends the body with [`LAST_CHUNK`]. The
//! size prefix is formatted on the stack so payload bytes are never copied.
//!
//! Decoding side: [`ChunkedDecoder`] is an incremental state machine used
//! for request bodies sent with `Transfer-Encoding: chunked`.

use super::{Error, Result};

/// Terminating zero-size chunk with an empty trailer
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// `<hex-size>\r\n` prefix of one chunk
#[derive(Debug, Clone, Copy)]
pub struct ChunkHeader {
    buf: [u8; 18],
    len: usize,
}

impl ChunkHeader {
    /// Format the prefix for a chunk of `size` bytes
    pub fn new(size: usize) -> Self {
        const HEX: &[u8; 16] = b"0123456789abcdef";

        let mut digits = [0u8; 16];
        let mut count = 0;
        let mut rest = size;
        loop {
            digits[count] = HEX[rest & 0xf];
            count += 1;
            rest >>= 4;
            if rest == 0 {
                break;
            }
        }

        let mut buf = [0u8; 18];
        for (slot, digit) in buf.iter_mut().zip(digits[..count].iter().rev()) {
            *slot = *digit;
        }
        buf[count] = b'\r';
        buf[count + 1] = b'\n';

        ChunkHeader {
            buf,
            len: count + 2,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// Chunked decoder
///
/// Decodes HTTP chunked transfer encoding format
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: DecoderState,
    chunk_size: usize,
    chunk_read: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DecoderState {
    ChunkSize,
    ChunkData,
    ChunkEnd,
    Trailer,
    Complete,
}

impl ChunkedDecoder {
    /// Create a new chunked decoder
    pub fn new() -> Self {
        ChunkedDecoder {
            state: DecoderState::ChunkSize,
            chunk_size: 0,
            chunk_read: 0,
        }
    }

    /// Decode as much of `input` as possible into `output`
    ///
    /// Returns (bytes_consumed, bytes_decoded, is_complete). Unconsumed
    /// input must be presented again, with more data appended, on the next
    /// call.
    pub fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<(usize, usize, bool)> {
        let mut input_pos = 0;
        let mut output_pos = 0;

        while input_pos < input.len() {
            match self.state {
                DecoderState::ChunkSize => {
                    let Some(crlf_pos) = find_crlf(&input[input_pos..]) else {
                        break;
                    };
                    let line = &input[input_pos..input_pos + crlf_pos];
                    self.chunk_size = parse_chunk_size(line)?;
                    self.chunk_read = 0;
                    input_pos += crlf_pos + 2;

                    self.state = if self.chunk_size == 0 {
                        DecoderState::Trailer
                    } else {
                        DecoderState::ChunkData
                    };
                }

                DecoderState::ChunkData => {
                    let available_output = output.len() - output_pos;
                    if available_output == 0 {
                        break;
                    }

                    let to_copy = (self.chunk_size - self.chunk_read)
                        .min(input.len() - input_pos)
                        .min(available_output);

                    output[output_pos..output_pos + to_copy]
                        .copy_from_slice(&input[input_pos..input_pos + to_copy]);

                    input_pos += to_copy;
                    output_pos += to_copy;
                    self.chunk_read += to_copy;

                    if self.chunk_read == self.chunk_size {
                        self.state = DecoderState::ChunkEnd;
                    }
                }

                DecoderState::ChunkEnd => {
                    if input.len() - input_pos < 2 {
                        break;
                    }
                    if &input[input_pos..input_pos + 2] != b"\r\n" {
                        return Err(Error::Protocol("Expected CRLF after chunk".to_string()));
                    }
                    input_pos += 2;
                    self.state = DecoderState::ChunkSize;
                }

                DecoderState::Trailer => {
                    // Trailer fields are skipped up to the empty line
                    let Some(crlf_pos) = find_crlf(&input[input_pos..]) else {
                        break;
                    };
                    input_pos += crlf_pos + 2;
                    if crlf_pos == 0 {
                        self.state = DecoderState::Complete;
                    }
                }

                DecoderState::Complete => break,
            }
        }

        Ok((input_pos, output_pos, self.is_complete()))
    }

    /// Check if decoding is complete
    pub fn is_complete(&self) -> bool {
        self.state == DecoderState::Complete
    }

    /// Reset the decoder for reuse
    pub fn reset(&mut self) {
        self.state = DecoderState::ChunkSize;
        self.chunk_size = 0;
        self.chunk_read = 0;
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<usize> {
    let line = String::from_utf8_lossy(line);
    // Chunk extensions (after semicolon) are ignored
    let size_str = line.split(';').next().unwrap_or("").trim();
    usize::from_str_radix(size_str, 16).map_err(|_| Error::InvalidChunkSize(size_str.to_string()))
}

/// Find CRLF in buffer
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Decode complete chunked body from bytes
pub fn decode_chunked_body(input: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = ChunkedDecoder::new();
    let mut output = Vec::new();
    let mut scratch = [0u8; 1024];
    let mut input_pos = 0;

    loop {
        let (consumed, decoded, complete) = decoder.decode(&input[input_pos..], &mut scratch)?;
        output.extend_from_slice(&scratch[..decoded]);
        input_pos += consumed;

        if complete {
            return Ok(output);
        }
        if consumed == 0 && decoded == 0 {
            return Err(Error::Protocol("Truncated chunked body".to_string()));
        }
    }
}
