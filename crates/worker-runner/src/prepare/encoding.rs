//! Entry file decoding and coding-declaration handling

use encoding_rs::Encoding;
use once_cell::sync::Lazy;
use regex::Regex;

/// Declaration written at the top of every prepared entry file
pub const CODING_HEADER: &str = "# -*- coding: utf-8 -*-";

/// PEP 263 source encoding declaration
static CODING_DECLARATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ \t\f]*#.*?coding[:=][ \t]*[-\w.]+").expect("valid regex"));

/// Text of a decoded entry file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSource {
    pub text: String,
    pub encoding: &'static Encoding,
    pub bom_stripped: bool,
}

/// Decode `bytes` with the first candidate that accepts them without replacement.
///
/// A byte-order mark is stripped first and its encoding is tried before the
/// candidates.
pub fn decode_source(bytes: &[u8], candidates: &[&'static Encoding]) -> Option<DecodedSource> {
    let (body, bom_encoding) = match Encoding::for_bom(bytes) {
        Some((encoding, bom_len)) => (&bytes[bom_len..], Some(encoding)),
        None => (bytes, None),
    };

    let mut order: Vec<&'static Encoding> = bom_encoding.into_iter().collect();
    for candidate in candidates {
        if !order.contains(candidate) {
            order.push(candidate);
        }
    }

    order.into_iter().find_map(|encoding| {
        encoding
            .decode_without_bom_handling_and_without_replacement(body)
            .map(|text| DecodedSource {
                text: text.into_owned(),
                encoding,
                bom_stripped: bom_encoding.is_some(),
            })
    })
}

/// Split off a leading shebang and drop coding declarations from the first two lines
pub fn take_preamble(lines: &mut Vec<String>) -> Option<String> {
    let shebang = match lines.first() {
        Some(first) if first.starts_with("#!") => Some(lines.remove(0)),
        _ => None,
    };

    let window = if shebang.is_some() { 1 } else { 2 };
    let mut idx = window.min(lines.len());
    while idx > 0 {
        idx -= 1;
        if CODING_DECLARATION.is_match(&lines[idx]) {
            lines.remove(idx);
        }
    }
    shebang
}

/// Drop coding declarations left at the top of the body.
///
/// Removing lines above a declaration can pull it up directly under the
/// header, where the next run would otherwise strip it.
pub fn drop_leading_declarations(lines: &mut Vec<String>) {
    while lines
        .first()
        .is_some_and(|line| CODING_DECLARATION.is_match(line))
    {
        lines.remove(0);
    }
}
