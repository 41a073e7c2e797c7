//! Streaming XZ decompression
//!
//! Both the ramdisk archive and the embedded companion payload are xz
//! streams. Decoding uses a fixed 1 MiB output buffer and flushes to the
//! sink after every decoder step, so peak memory stays bounded no matter how
//! large the decoded image is.

use std::io::Write;

use liblzma::stream::{Action, Status, Stream};

use crate::error::{Error, Result};

/// Decoder output buffer size
pub const DECODE_BUF_SIZE: usize = 1 << 20;

/// Decompress an in-memory xz stream into `sink`.
///
/// The loop continues only while the decoder keeps filling the whole output
/// buffer; a stream that runs out of input without reaching end-of-stream is
/// accepted with whatever output was produced, preserving the tolerant
/// posture this runs under (there is nobody to report to at pre-init).
pub fn unxz_to(input: &[u8], sink: &mut dyn Write) -> Result<()> {
    let mut stream = Stream::new_auto_decoder(u64::MAX, 0)?;
    let mut out = vec![0u8; DECODE_BUF_SIZE];
    loop {
        let consumed = stream.total_in() as usize;
        let before = stream.total_out();
        let status = stream.process(&input[consumed..], &mut out, Action::Run)?;
        let produced = (stream.total_out() - before) as usize;
        sink.write_all(&out[..produced])?;
        match status {
            Status::StreamEnd => return Ok(()),
            Status::Ok if produced == out.len() => continue,
            Status::Ok => return Ok(()),
            _ => return Err(Error::InvalidStream),
        }
    }
}

/// Decompress an in-memory xz stream into a fresh buffer.
pub fn unxz(input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    unxz_to(input, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use liblzma::write::XzEncoder;

    fn xz(data: &[u8]) -> Vec<u8> {
        let mut enc = XzEncoder::new(Vec::new(), 6);
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_small_stream() {
        let data = b"boot image contents";
        assert_eq!(unxz(&xz(data)).unwrap(), data);
    }

    #[test]
    fn test_stream_larger_than_decode_buffer() {
        // Forces several fill-flush iterations of the 1 MiB buffer
        let data: Vec<u8> = (0..3 * DECODE_BUF_SIZE).map(|i| (i % 251) as u8).collect();
        assert_eq!(unxz(&xz(&data)).unwrap(), data);
    }

    #[test]
    fn test_garbage_input_is_rejected() {
        assert!(unxz(b"definitely not an xz stream").is_err());
    }

    #[test]
    fn test_truncated_stream_yields_partial_output() {
        // Input exhaustion without end-of-stream is accepted quietly; the
        // decode stops with whatever was recovered
        let data: Vec<u8> = (0..64 * 1024).map(|i| (i % 13) as u8).collect();
        let full = xz(&data);
        let cut = &full[..full.len() / 2];
        let out = unxz(cut).unwrap();
        assert!(out.len() < data.len());
        assert_eq!(out[..], data[..out.len()]);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(unxz(b"").unwrap(), Vec::<u8>::new());
    }
}
