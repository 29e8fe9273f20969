//! Text-level codec: string escaping and inbound payload decoding.
//!
//! # Escaping
//!
//! Browsers are inconsistent about which characters survive inside a
//! JavaScript string literal, so on top of regular JSON escaping every code
//! unit in these ranges is written as a lowercase `\uXXXX` escape:
//!
//! ```text
//! U+0000..001F  U+D800..DFFF  U+200C..200F
//! U+2028..202F  U+2060..206F  U+FFF0..FFFF
//! ```
//!
//! Rust strings can't hold lone surrogates, so the `D800..DFFF` range shows up
//! as characters outside the Basic Multilingual Plane: those are split into
//! their UTF-16 pair and both halves are escaped.
//!
//! # Decoding
//!
//! Clients never send framed data. An inbound payload is either a single
//! JSON string or a JSON array of strings; anything else is rejected.

use std::fmt::Write as _;

use serde::Deserialize;
use serde_json::Value;

use crate::ProtocolError;

/// Appends `input` to `out` with JSON and browser-safety escaping applied.
///
/// Quotes are not added; the caller decides where the literal starts.
pub fn escape_into(out: &mut String, input: &str) {
    for ch in input.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if needs_unicode_escape(c) => push_unicode_escape(out, c as u32),
            c if (c as u32) > 0xFFFF => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    push_unicode_escape(out, u32::from(*unit));
                }
            }
            c => out.push(c),
        }
    }
}

/// Returns `input` as a complete, quoted JSON string literal.
///
/// Used for close reasons and by transports that embed an encoded frame in
/// JavaScript (JSONP callbacks, htmlfile `<script>` blocks).
pub fn quote_json(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 2);
    out.push('"');
    escape_into(&mut out, input);
    out.push('"');
    out
}

/// Decodes an inbound client payload into an ordered batch of messages.
///
/// Accepts `"msg"` (one message) or `["m1","m2"]` (a batch, possibly empty).
///
/// # Errors
/// - [`ProtocolError::Decode`] if `payload` is not valid JSON.
/// - [`ProtocolError::InvalidPayload`] if it is valid JSON of any other shape.
pub fn decode_messages(payload: &str) -> Result<Vec<String>, ProtocolError> {
    let value: Value = serde_json::from_str(payload)?;
    match Inbound::deserialize(value) {
        Ok(Inbound::One(message)) => Ok(vec![message]),
        Ok(Inbound::Batch(messages)) => Ok(messages),
        Err(_) => Err(ProtocolError::InvalidPayload(
            "expected a string or an array of strings".into(),
        )),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Inbound {
    One(String),
    Batch(Vec<String>),
}

fn needs_unicode_escape(c: char) -> bool {
    matches!(
        c as u32,
        0x0000..=0x001F
            | 0x200C..=0x200F
            | 0x2028..=0x202F
            | 0x2060..=0x206F
            | 0xFFF0..=0xFFFF
    )
}

fn push_unicode_escape(out: &mut String, unit: u32) {
    // Writing into a String cannot fail.
    let _ = write!(out, "\\u{unit:04x}");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn escaped(input: &str) -> String {
        let mut out = String::new();
        escape_into(&mut out, input);
        out
    }

    #[test]
    fn test_escape_plain_ascii_unchanged() {
        assert_eq!(escaped("hello world"), "hello world");
    }

    #[test]
    fn test_escape_short_forms() {
        assert_eq!(escaped("\u{08}\u{0C}\n\r\t"), "\\b\\f\\n\\r\\t");
    }

    #[test]
    fn test_escape_other_control_chars_use_lowercase_hex() {
        assert_eq!(escaped("\u{00}"), "\\u0000");
        assert_eq!(escaped("\u{1f}"), "\\u001f");
        assert_eq!(escaped("\u{0b}"), "\\u000b");
    }

    #[test]
    fn test_escape_each_unicode_range_boundary() {
        for (ch, expected) in [
            ('\u{200C}', "\\u200c"),
            ('\u{200F}', "\\u200f"),
            ('\u{2028}', "\\u2028"),
            ('\u{202F}', "\\u202f"),
            ('\u{2060}', "\\u2060"),
            ('\u{206F}', "\\u206f"),
            ('\u{FFF0}', "\\ufff0"),
            ('\u{FFFF}', "\\uffff"),
        ] {
            assert_eq!(escaped(&ch.to_string()), expected, "char {:x}", ch as u32);
        }
    }

    #[test]
    fn test_escape_just_outside_ranges_is_literal() {
        for ch in ['\u{20}', '\u{200B}', '\u{2030}', '\u{2070}', '\u{FFEF}', 'é'] {
            assert_eq!(escaped(&ch.to_string()), ch.to_string());
        }
    }

    #[test]
    fn test_escape_astral_char_becomes_surrogate_pair() {
        // U+1F600 GRINNING FACE = D83D DE00
        assert_eq!(escaped("\u{1F600}"), "\\ud83d\\ude00");
    }

    #[test]
    fn test_quote_json_wraps_in_quotes() {
        assert_eq!(quote_json("a\"b"), "\"a\\\"b\"");
        assert_eq!(quote_json(""), "\"\"");
    }

    #[test]
    fn test_decode_messages_single_string() {
        assert_eq!(decode_messages(r#""hi""#).unwrap(), vec!["hi"]);
    }

    #[test]
    fn test_decode_messages_array() {
        assert_eq!(
            decode_messages(r#"["a","b"]"#).unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_decode_messages_empty_array_is_empty_batch() {
        assert!(decode_messages("[]").unwrap().is_empty());
    }

    #[test]
    fn test_decode_messages_number_is_invalid_payload() {
        assert!(matches!(
            decode_messages("42"),
            Err(ProtocolError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_decode_messages_mixed_array_is_invalid_payload() {
        assert!(matches!(
            decode_messages(r#"["a",1]"#),
            Err(ProtocolError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_decode_messages_object_is_invalid_payload() {
        assert!(matches!(
            decode_messages(r#"{"a":"b"}"#),
            Err(ProtocolError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_decode_messages_broken_json_is_decode_error() {
        assert!(matches!(
            decode_messages("[\"a\""),
            Err(ProtocolError::Decode(_))
        ));
    }
}
