//! Binary and encoding detection plus newline normalization.
//!
//! Classification order: BOM probe first (UTF-8/UTF-16 variants), then a NUL
//! scan over the leading window. Anything with a NUL outside a UTF-16 BOM is
//! treated as binary.

use memchr::{memchr, memchr_iter};

use crate::core::file::TextEncoding;

/// Bytes inspected by the NUL heuristic.
const SNIFF_WINDOW: usize = 8192;

/// Probe the byte-order mark and leading bytes.
pub fn detect_encoding(bytes: &[u8]) -> TextEncoding {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return TextEncoding::Utf8Bom;
    }
    if bytes.starts_with(&[0xFF, 0xFE]) {
        return TextEncoding::Utf16Le;
    }
    if bytes.starts_with(&[0xFE, 0xFF]) {
        return TextEncoding::Utf16Be;
    }

    let window = &bytes[..bytes.len().min(SNIFF_WINDOW)];
    if memchr(0, window).is_some() {
        return TextEncoding::Binary;
    }
    TextEncoding::Utf8
}

/// Decode to text according to the detected encoding. `None` means the
/// bytes are not representable as text (invalid sequences included).
pub fn decode(bytes: &[u8], encoding: TextEncoding) -> Option<String> {
    match encoding {
        TextEncoding::Utf8 => String::from_utf8(bytes.to_vec()).ok(),
        TextEncoding::Utf8Bom => String::from_utf8(bytes[3..].to_vec()).ok(),
        TextEncoding::Utf16Le => decode_utf16(&bytes[2..], u16::from_le_bytes),
        TextEncoding::Utf16Be => decode_utf16(&bytes[2..], u16::from_be_bytes),
        TextEncoding::Binary => None,
    }
}

fn decode_utf16(bytes: &[u8], read: fn([u8; 2]) -> u16) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| read([pair[0], pair[1]]))
        .collect();
    char::decode_utf16(units).collect::<Result<String, _>>().ok()
}

/// Normalize `\r\n` and lone `\r` to `\n`.
pub fn normalize_newlines(text: &str) -> String {
    let bytes = text.as_bytes();
    if memchr(b'\r', bytes).is_none() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = memchr(b'\r', rest.as_bytes()) {
        out.push_str(&rest[..pos]);
        out.push('\n');
        let after = &rest[pos + 1..];
        rest = after.strip_prefix('\n').unwrap_or(after);
    }
    out.push_str(rest);
    out
}

/// Truncate UTF-8 text at `max_bytes` on a char boundary.
pub fn truncate_on_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Count lines the way editors do: newline count, plus one when the last
/// line lacks a terminator.
pub fn count_lines(text: &str) -> usize {
    let bytes = text.as_bytes();
    if bytes.is_empty() {
        return 0;
    }
    let nl = memchr_iter(b'\n', bytes).count();
    if bytes.ends_with(b"\n") { nl } else { nl + 1 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bom_detection() {
        assert_eq!(
            detect_encoding(&[0xEF, 0xBB, 0xBF, b'h', b'i']),
            TextEncoding::Utf8Bom
        );
        assert_eq!(detect_encoding(&[0xFF, 0xFE, b'h', 0]), TextEncoding::Utf16Le);
        assert_eq!(detect_encoding(&[0xFE, 0xFF, 0, b'h']), TextEncoding::Utf16Be);
        assert_eq!(detect_encoding(b"plain text"), TextEncoding::Utf8);
        assert_eq!(detect_encoding(b"ab\0cd"), TextEncoding::Binary);
    }

    #[test]
    fn utf16_round_trip() {
        let text = "héllo";
        let mut le = vec![0xFF, 0xFE];
        for unit in text.encode_utf16() {
            le.extend_from_slice(&unit.to_le_bytes());
        }
        assert_eq!(detect_encoding(&le), TextEncoding::Utf16Le);
        assert_eq!(decode(&le, TextEncoding::Utf16Le).as_deref(), Some(text));
    }

    #[test]
    fn newline_normalization() {
        assert_eq!(normalize_newlines("a\r\nb\rc\nd"), "a\nb\nc\nd");
        assert_eq!(normalize_newlines("no carriage returns"), "no carriage returns");
        assert_eq!(normalize_newlines("\r\r\n"), "\n\n");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "aé"; // 'é' is two bytes starting at index 1
        assert_eq!(truncate_on_boundary(text, 2), "a");
        assert_eq!(truncate_on_boundary(text, 3), "aé");
    }

    #[test]
    fn line_counting() {
        assert_eq!(count_lines(""), 0);
        assert_eq!(count_lines("one\n"), 1);
        assert_eq!(count_lines("one\ntwo"), 2);
    }
}
