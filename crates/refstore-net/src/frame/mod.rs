//! Length-prefixed wire framing.
//!
//! A message on the wire is a 4-byte unsigned length in network byte order
//! followed by exactly that many payload bytes. A length of zero is a legal
//! empty message. No checksum, no version field, no multiplexing — frames
//! are transmitted back-to-back on the same stream.
//!
//! All logic here is pure; the socket layer does the actual I/O.

/// Size of the frame header on the wire.
pub const HEADER_LEN: usize = 4;

/// Upper bound on a single frame's payload.
///
/// The wire format itself allows any `u32` length, which would let a hostile
/// peer demand a 4 GiB allocation with four bytes of input. Both the send
/// and receive paths reject anything above this cap before allocating.
pub const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Encodes a payload length as a network-byte-order header.
#[inline]
pub fn encode_header(len: u32) -> [u8; HEADER_LEN] {
    len.to_be_bytes()
}

/// Decodes a network-byte-order header into a payload length.
#[inline]
pub fn decode_header(header: [u8; HEADER_LEN]) -> u32 {
    u32::from_be_bytes(header)
}

/// Validates a payload length against [`MAX_FRAME_LEN`].
///
/// Returns the length as a `u32` if it is representable and within the cap.
#[inline]
pub fn check_len(len: usize) -> Option<u32> {
    u32::try_from(len).ok().filter(|&n| n <= MAX_FRAME_LEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_big_endian() {
        assert_eq!(encode_header(0), [0, 0, 0, 0]);
        assert_eq!(encode_header(4), [0, 0, 0, 4]);
        assert_eq!(encode_header(0x0102_0304), [1, 2, 3, 4]);
        assert_eq!(encode_header(u32::MAX), [0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn decode_inverts_encode() {
        for len in [0u32, 1, 4, 255, 256, 65_535, MAX_FRAME_LEN] {
            assert_eq!(decode_header(encode_header(len)), len);
        }
    }

    #[test]
    fn decode_raw_bytes() {
        assert_eq!(decode_header([0, 0, 0, 0]), 0);
        assert_eq!(decode_header([0, 0, 1, 0]), 256);
        assert_eq!(decode_header([0x80, 0, 0, 0]), 0x8000_0000);
    }

    #[test]
    fn check_len_accepts_up_to_cap() {
        assert_eq!(check_len(0), Some(0));
        assert_eq!(check_len(1), Some(1));
        assert_eq!(check_len(MAX_FRAME_LEN as usize), Some(MAX_FRAME_LEN));
    }

    #[test]
    fn check_len_rejects_above_cap() {
        assert_eq!(check_len(MAX_FRAME_LEN as usize + 1), None);
        assert_eq!(check_len(u32::MAX as usize), None);
        assert_eq!(check_len(usize::MAX), None);
    }
}
