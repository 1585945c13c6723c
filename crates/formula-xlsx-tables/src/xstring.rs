//! The OOXML `ST_Xstring` escape (`_xHHHH_`) for characters XML 1.0 cannot carry.
//!
//! Control characters (and a bare carriage return, which XML parsers normalise away) are
//! written as `_xHHHH_`. A literal `_x` sequence that would read back as an escape gets
//! its underscore escaped as `_x005F_`.

use std::borrow::Cow;

const ESCAPE_LEN: usize = 7;

fn needs_escape(c: char) -> bool {
    matches!(c, '\u{0}'..='\u{8}' | '\u{B}' | '\u{C}' | '\r' | '\u{E}'..='\u{1F}' | '\u{FFFE}' | '\u{FFFF}')
}

/// `_xHHHH_` at the start of `s`, decoded.
fn escape_at(s: &str) -> Option<char> {
    let bytes = s.as_bytes();
    if bytes.len() < ESCAPE_LEN || !s.starts_with("_x") || bytes[6] != b'_' {
        return None;
    }
    let hex = s.get(2..6)?;
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
}

pub(crate) fn escape_xstring(s: &str) -> Cow<'_, str> {
    let clean = !s.chars().any(needs_escape) && !s.match_indices("_x").any(|(i, _)| escape_at(&s[i..]).is_some());
    if clean {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len() + 8);
    for (i, c) in s.char_indices() {
        if needs_escape(c) || (c == '_' && escape_at(&s[i..]).is_some()) {
            out.push_str(&format!("_x{:04X}_", c as u32));
        } else {
            out.push(c);
        }
    }
    Cow::Owned(out)
}

pub(crate) fn unescape_xstring(s: &str) -> Cow<'_, str> {
    if !s.contains("_x") {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find("_x") {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match escape_at(tail) {
            Some(c) => {
                out.push(c);
                rest = &tail[ESCAPE_LEN..];
            }
            None => {
                out.push('_');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn control_characters_are_escaped() {
        assert_eq!(escape_xstring("x\u{1}y"), "x_x0001_y");
        assert_eq!(escape_xstring("a\r\nb"), "a_x000D_\nb");
        assert_eq!(escape_xstring("tab\tkept"), "tab\tkept");
    }

    #[test]
    fn literal_escape_sequences_are_protected() {
        assert_eq!(escape_xstring("_x0041_"), "_x005F_x0041_");
        assert_eq!(escape_xstring("_x41_ and _xZZZZ_"), "_x41_ and _xZZZZ_");
        assert_eq!(unescape_xstring("_x005F_x0041_"), "_x0041_");
    }

    #[test]
    fn unescape_decodes_hex_escapes() {
        assert_eq!(unescape_xstring("x_x0001_y"), "x\u{1}y");
        assert_eq!(unescape_xstring("_x00e9_t_x00E9_"), "été");
        assert_eq!(unescape_xstring("plain_x_text"), "plain_x_text");
        assert!(matches!(unescape_xstring("no escapes"), Cow::Borrowed(_)));
    }

    #[test]
    fn escaped_text_reads_back_unchanged() {
        for text in ["\u{0}\u{1F}", "_x0041_", "a_b_x", "\r", "日本_x3042_"] {
            assert_eq!(unescape_xstring(&escape_xstring(text)), text);
        }
    }
}
