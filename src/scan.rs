//! Byte-scan helpers linked by emitted code.
//!
//! Unanchored find loops skip ahead to a required leading byte instead of
//! retrying the machine at every position. The one-, two- and three-byte
//! forms map directly onto `memchr`.

use memchr::{memchr, memchr2, memchr3};

/// Position at or after `from` of the next occurrence of `b`.
#[inline]
pub fn find_byte(b: u8, haystack: &[u8], from: usize) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    memchr(b, &haystack[from..]).map(|i| from + i)
}

/// Position at or after `from` of the next occurrence of `b1` or `b2`.
#[inline]
pub fn find_byte2(
    b1: u8,
    b2: u8,
    haystack: &[u8],
    from: usize,
) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    memchr2(b1, b2, &haystack[from..]).map(|i| from + i)
}

/// Position at or after `from` of the next occurrence of any of three
/// bytes.
#[inline]
pub fn find_byte3(
    b1: u8,
    b2: u8,
    b3: u8,
    haystack: &[u8],
    from: usize,
) -> Option<usize> {
    if from > haystack.len() {
        return None;
    }
    memchr3(b1, b2, b3, &haystack[from..]).map(|i| from + i)
}

/// The longest prefix of `data` that is valid UTF-8. The streaming runtime
/// feeds machines text one chunk at a time, and a chunk boundary may fall
/// inside a multi-byte sequence; the cut bytes stay in the buffer as
/// leftover.
pub fn utf8_prefix(data: &[u8]) -> &str {
    match std::str::from_utf8(data) {
        Ok(s) => s,
        Err(e) => {
            // valid_up_to is always a character boundary.
            std::str::from_utf8(&data[..e.valid_up_to()]).unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_byte_respects_from() {
        let hay = b"abcabc";
        assert_eq!(find_byte(b'a', hay, 0), Some(0));
        assert_eq!(find_byte(b'a', hay, 1), Some(3));
        assert_eq!(find_byte(b'a', hay, 4), None);
        assert_eq!(find_byte(b'a', hay, 7), None);
    }

    #[test]
    fn multi_byte_needles() {
        let hay = b"xxyxz";
        assert_eq!(find_byte2(b'y', b'z', hay, 0), Some(2));
        assert_eq!(find_byte3(b'q', b'z', b'y', hay, 3), Some(4));
    }

    #[test]
    fn utf8_prefix_cuts_at_split_char() {
        let s = "héllo";
        let bytes = s.as_bytes();
        // Cut inside the two-byte é.
        assert_eq!(utf8_prefix(&bytes[..2]), "h");
        assert_eq!(utf8_prefix(bytes), s);
        assert_eq!(utf8_prefix(b""), "");
    }
}
