//! Byte-to-text decoding for document and external-entity input (spec
//! §4.E "load_bytes" collaborator).
//!
//! A DTD's `<!SGML ... CHARSET ...>` declaration can in principle name
//! an arbitrary character set; in practice every document this parser
//! meets is either UTF-8, announces itself with a BOM, or is plain
//! ASCII/Latin-1. `guess_encoding` follows that reduced but realistic
//! rule set instead of modelling ISO 2022-style charset declarations.

use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_8};

/// Sniffs an encoding from a byte-order mark, falling back to UTF-8.
pub fn guess_encoding(input: &[u8]) -> &'static Encoding {
    Encoding::for_bom(input).map(|(enc, _)| enc).unwrap_or(UTF_8)
}

/// Decodes `input` as `known_encoding` (an IANA label) if given,
/// otherwise as the BOM-sniffed encoding. Returns the decoded text,
/// the encoding actually used, and whether any byte was replaced
/// during decoding (spec §4.E "malformed byte sequences are reported,
/// not silently dropped").
pub fn decode<'a>(input: &'a [u8], known_encoding: Option<&str>) -> (Cow<'a, str>, &'static str, bool) {
    let encoding = known_encoding
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or_else(|| guess_encoding(input));
    let (text, enc, had_errors) = encoding.decode(input);
    (text, enc.name(), had_errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_utf8_without_bom() {
        let (text, enc, errors) = decode(b"<a/>", None);
        assert_eq!(text, "<a/>");
        assert_eq!(enc, "UTF-8");
        assert!(!errors);
    }

    #[test]
    fn honours_explicit_label() {
        let (text, enc, errors) = decode(b"\xA4", Some("windows-1252"));
        assert_eq!(text, "\u{a4}");
        assert_eq!(enc, "windows-1252");
        assert!(!errors);
    }

    #[test]
    fn detects_utf8_bom() {
        let (text, enc, _) = decode(b"\xEF\xBB\xBF<a/>", None);
        assert_eq!(text, "<a/>");
        assert_eq!(enc, "UTF-8");
    }
}
