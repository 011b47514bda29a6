//! pkt-line framing for the Smart HTTP protocol (v0).
//!
//! Each line is prefixed by four lowercase hex digits encoding the length of
//! the entire line including the prefix itself; `0000` is the flush packet.
//! The delim/response-end packets of protocol v2 are not used here.

use crate::errors::{GitError, Result};

pub const PKT_FLUSH: &[u8] = b"0000";

/// Length of one pkt-line payload; anything longer must be split by the
/// caller (65520 total minus the 4-byte prefix).
pub const MAX_PKT_PAYLOAD: usize = 65516;

pub fn encode_pkt_line(data: &[u8]) -> Vec<u8> {
    debug_assert!(data.len() <= MAX_PKT_PAYLOAD);
    let mut out = Vec::with_capacity(4 + data.len());
    let len = 4 + data.len();
    out.extend_from_slice(format!("{len:04x}").as_bytes());
    out.extend_from_slice(data);
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pkt {
    Data(Vec<u8>),
    Flush,
}

/// Decode a buffer of pkt-lines. Stops at the end of the buffer; a
/// truncated length or payload is malformed input.
pub fn decode_pkt_lines(mut buf: &[u8]) -> Result<Vec<Pkt>> {
    let mut out = Vec::new();
    while !buf.is_empty() {
        let (pkt, rest) = decode_pkt_line(buf)?;
        out.push(pkt);
        buf = rest;
    }
    Ok(out)
}

/// Decode a single pkt-line, returning it and the remaining bytes.
pub fn decode_pkt_line(buf: &[u8]) -> Result<(Pkt, &[u8])> {
    if buf.len() < 4 {
        return Err(GitError::malformed("truncated pkt-line length"));
    }
    let len_hex = std::str::from_utf8(&buf[..4])
        .map_err(|_| GitError::malformed("pkt-line length is not hex"))?;
    let len = usize::from_str_radix(len_hex, 16)
        .map_err(|_| GitError::malformed("pkt-line length is not hex"))?;
    if len == 0 {
        return Ok((Pkt::Flush, &buf[4..]));
    }
    if len < 4 {
        return Err(GitError::malformed(format!("reserved pkt-line length {len}")));
    }
    if buf.len() < len {
        return Err(GitError::malformed("truncated pkt-line data"));
    }
    Ok((Pkt::Data(buf[4..len].to_vec()), &buf[len..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_pkt_line() {
        let msg = b"hello\n";
        let enc = encode_pkt_line(msg);
        assert_eq!(&enc[..4], b"000a");
        let pkts = decode_pkt_lines(&enc).unwrap();
        assert_eq!(pkts, vec![Pkt::Data(msg.to_vec())]);
    }

    #[test]
    fn length_counts_the_prefix() {
        // Invariant: len == hex(line bytes including the 4-byte length).
        for payload in [&b""[..], b"a", b"0123456789"] {
            let enc = encode_pkt_line(payload);
            let len = usize::from_str_radix(std::str::from_utf8(&enc[..4]).unwrap(), 16).unwrap();
            assert_eq!(len, enc.len());
        }
    }

    #[test]
    fn decode_flush() {
        let mut buf = encode_pkt_line(b"x");
        buf.extend_from_slice(PKT_FLUSH);
        let pkts = decode_pkt_lines(&buf).unwrap();
        assert_eq!(pkts[1], Pkt::Flush);
    }

    #[test]
    fn rejects_truncation_and_reserved_lengths() {
        assert!(decode_pkt_lines(b"00").is_err());
        assert!(decode_pkt_lines(b"0008ab").is_err());
        assert!(decode_pkt_lines(b"0001").is_err());
        assert!(decode_pkt_lines(b"zzzz").is_err());
    }
}
