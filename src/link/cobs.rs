//! Consistent Overhead Byte Stuffing.
//!
//! COBS removes every `0x00` from a byte block so that `0x00` can serve
//! as an unambiguous frame delimiter on the wire, at a cost of at most
//! one overhead byte per 254 input bytes. The encoder does **not** append
//! the delimiter; the caller does, after the encoded block.
//!
//! The decoder operates on a raw receive buffer: it scans for the first
//! delimiter, decodes the block before it, and reports how many input
//! bytes it consumed (block + delimiter) so the caller can advance its
//! buffer. Without a delimiter in the input nothing is consumed and
//! [`CobsError::Incomplete`] is returned.

use thiserror::Error;

use crate::core::constants::{COBS_DELIMITER, COBS_MAX_BLOCK_SIZE};

/// Largest value of a COBS code byte: a run of 254 literals, no implied zero.
const COBS_MAX_CODE: u8 = 0xFF;

/// Errors from COBS encoding and decoding.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CobsError {
    /// Encode: input exceeds the 254-byte block limit.
    /// Decode: malformed block (zero code byte, or a code that overruns
    /// the block).
    #[error("invalid cobs input")]
    InvalidInput,

    /// The output buffer is too small for the worst-case result.
    #[error("cobs output buffer too small")]
    OutputTooSmall,

    /// No delimiter in the input yet; nothing was consumed.
    #[error("incomplete cobs frame")]
    Incomplete,
}

/// Result of a successful [`decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    /// Number of decoded bytes written to the output.
    pub len: usize,
    /// Number of input bytes consumed, including the delimiter.
    pub consumed: usize,
}

/// COBS-encode `input` into `output`, returning the encoded length.
///
/// The encoded bytes contain no `0x00`. The caller appends the
/// [`COBS_DELIMITER`] afterwards. Empty input encodes to zero bytes.
pub fn encode(input: &[u8], output: &mut [u8]) -> Result<usize, CobsError> {
    if input.is_empty() {
        return Ok(0);
    }
    if input.len() > COBS_MAX_BLOCK_SIZE {
        return Err(CobsError::InvalidInput);
    }

    // Worst case: one overhead byte per 254 input bytes, plus one.
    let max_encoded = input.len() + input.len() / COBS_MAX_BLOCK_SIZE + 1;
    if output.len() < max_encoded {
        return Err(CobsError::OutputTooSmall);
    }

    let mut write = 1; // Slot 0 is the first code byte.
    let mut code_at = 0;
    let mut code: u8 = 1;

    for &byte in input {
        if byte == COBS_DELIMITER {
            output[code_at] = code;
            code = 1;
            code_at = write;
            write += 1;
        } else {
            output[write] = byte;
            write += 1;
            code += 1;
            if code == COBS_MAX_CODE {
                output[code_at] = code;
                code = 1;
                code_at = write;
                write += 1;
            }
        }
    }

    output[code_at] = code;
    Ok(write)
}

/// Decode the first delimited COBS block in `input`.
///
/// Scans for the first `0x00`. If none is present, returns
/// [`CobsError::Incomplete`] and consumes nothing. A delimiter at
/// position 0 is an empty frame: one byte consumed, zero decoded.
pub fn decode(input: &[u8], output: &mut [u8]) -> Result<Decoded, CobsError> {
    let block_end = input
        .iter()
        .position(|&b| b == COBS_DELIMITER)
        .ok_or(CobsError::Incomplete)?;

    if block_end == 0 {
        return Ok(Decoded {
            len: 0,
            consumed: 1,
        });
    }

    // Decoded data is always shorter than the encoded block.
    if output.len() < block_end {
        return Err(CobsError::OutputTooSmall);
    }

    let mut read = 0;
    let mut write = 0;

    while read < block_end {
        let code = input[read];
        if code == 0 {
            // Unreachable for well-formed input: 0x00 only at block_end.
            return Err(CobsError::InvalidInput);
        }
        read += 1;

        let run = (code - 1) as usize;
        if read + run > block_end {
            return Err(CobsError::InvalidInput);
        }

        output[write..write + run].copy_from_slice(&input[read..read + run]);
        write += run;
        read += run;

        // Each code byte implies a zero, except a maximal run or block end.
        if code < COBS_MAX_CODE && read < block_end {
            output[write] = 0;
            write += 1;
        }
    }

    Ok(Decoded {
        len: write,
        consumed: block_end + 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode, append the delimiter, decode, and compare.
    fn roundtrip(data: &[u8]) {
        let mut encoded = [0u8; 300];
        let len = encode(data, &mut encoded).unwrap();
        assert!(
            encoded[..len].iter().all(|&b| b != 0),
            "encoded output must not contain the delimiter"
        );

        encoded[len] = COBS_DELIMITER;

        let mut decoded = [0u8; 300];
        let result = decode(&encoded[..len + 1], &mut decoded).unwrap();
        assert_eq!(&decoded[..result.len], data);
        assert_eq!(result.consumed, len + 1);
    }

    #[test]
    fn test_roundtrip_simple() {
        roundtrip(b"hello");
        roundtrip(&[0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn test_roundtrip_with_zeros() {
        roundtrip(&[0x00]);
        roundtrip(&[0x00, 0x00]);
        roundtrip(&[0x11, 0x00, 0x22]);
        roundtrip(&[0x00, 0x11, 0x00]);
        roundtrip(&[0x11, 0x22, 0x00, 0x33]);
    }

    #[test]
    fn test_roundtrip_single_byte() {
        roundtrip(&[0x01]);
        roundtrip(&[0xFF]);
    }

    #[test]
    fn test_roundtrip_max_block() {
        let no_zeros: Vec<u8> = (0..254u32).map(|i| (i % 255 + 1) as u8).collect();
        roundtrip(&no_zeros);

        let all_zeros = [0u8; 254];
        roundtrip(&all_zeros);
    }

    #[test]
    fn test_encode_known_vectors() {
        let mut out = [0u8; 16];

        // No zeros: single code byte prefix.
        let n = encode(&[0x11, 0x22, 0x33], &mut out).unwrap();
        assert_eq!(&out[..n], &[0x04, 0x11, 0x22, 0x33]);

        // Zero in the middle splits the run.
        let n = encode(&[0x11, 0x00, 0x22], &mut out).unwrap();
        assert_eq!(&out[..n], &[0x02, 0x11, 0x02, 0x22]);

        // Lone zero.
        let n = encode(&[0x00], &mut out).unwrap();
        assert_eq!(&out[..n], &[0x01, 0x01]);
    }

    #[test]
    fn test_encode_empty_input() {
        let mut out = [0u8; 4];
        assert_eq!(encode(&[], &mut out), Ok(0));
    }

    #[test]
    fn test_encode_input_too_large() {
        let data = [0xAAu8; 255];
        let mut out = [0u8; 300];
        assert_eq!(encode(&data, &mut out), Err(CobsError::InvalidInput));
    }

    #[test]
    fn test_encode_output_too_small() {
        let mut out = [0u8; 3];
        assert_eq!(
            encode(&[0x11, 0x22, 0x33], &mut out),
            Err(CobsError::OutputTooSmall)
        );
    }

    #[test]
    fn test_decode_incomplete_consumes_nothing() {
        let mut out = [0u8; 16];
        assert_eq!(
            decode(&[0x04, 0x11, 0x22, 0x33], &mut out),
            Err(CobsError::Incomplete)
        );
        assert_eq!(decode(&[], &mut out), Err(CobsError::Incomplete));
    }

    #[test]
    fn test_decode_empty_frame() {
        let mut out = [0u8; 16];
        let d = decode(&[0x00, 0x04, 0x11], &mut out).unwrap();
        assert_eq!(d.len, 0);
        assert_eq!(d.consumed, 1);
    }

    #[test]
    fn test_decode_code_overruns_block() {
        // Code byte claims 4 literals but the block ends after 2.
        let mut out = [0u8; 16];
        assert_eq!(
            decode(&[0x05, 0x11, 0x22, 0x00], &mut out),
            Err(CobsError::InvalidInput)
        );
    }

    #[test]
    fn test_decode_stops_at_first_delimiter() {
        // Two frames back to back; only the first is consumed.
        let mut out = [0u8; 16];
        let d = decode(&[0x02, 0x11, 0x00, 0x02, 0x22, 0x00], &mut out).unwrap();
        assert_eq!(&out[..d.len], &[0x11]);
        assert_eq!(d.consumed, 3);
    }

    #[test]
    fn test_decode_output_too_small() {
        let mut out = [0u8; 2];
        assert_eq!(
            decode(&[0x04, 0x11, 0x22, 0x33, 0x00], &mut out),
            Err(CobsError::OutputTooSmall)
        );
    }
}
