//! GSM 03.38 default alphabet: charset mapping, septet accounting, segment
//! splitting and 7-bit packing.

/// Septets in a single, unconcatenated SMS.
pub const SINGLE_SEGMENT_SEPTETS: usize = 160;
/// Septets per part once a concatenation header is present.
pub const CONCAT_SEGMENT_SEPTETS: usize = 153;

const ESC: u8 = 0x1B;

#[rustfmt::skip]
const BASIC: [char; 128] = [
    '@', '£', '$', '¥', 'è', 'é', 'ù', 'ì', 'ò', 'Ç', '\n', 'Ø', 'ø', '\r', 'Å', 'å',
    'Δ', '_', 'Φ', 'Γ', 'Λ', 'Ω', 'Π', 'Ψ', 'Σ', 'Θ', 'Ξ', '\u{1b}', 'Æ', 'æ', 'ß', 'É',
    ' ', '!', '"', '#', '¤', '%', '&', '\'', '(', ')', '*', '+', ',', '-', '.', '/',
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', ':', ';', '<', '=', '>', '?',
    '¡', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O',
    'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z', 'Ä', 'Ö', 'Ñ', 'Ü', '§',
    '¿', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o',
    'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'ä', 'ö', 'ñ', 'ü', 'à',
];

const EXTENDED: [(char, u8); 10] = [
    ('\u{0c}', 10),
    ('^', 20),
    ('{', 40),
    ('}', 41),
    ('\\', 47),
    ('[', 60),
    ('~', 61),
    (']', 62),
    ('|', 64),
    ('€', 101),
];

fn basic_code(c: char) -> Option<u8> {
    if c == '\u{1b}' {
        return None;
    }
    BASIC.iter().position(|&b| b == c).map(|i| i as u8)
}

fn extended_code(c: char) -> Option<u8> {
    EXTENDED.iter().find(|(e, _)| *e == c).map(|(_, code)| *code)
}

fn transliterate(c: char) -> &'static str {
    match c {
        '‘' | '’' | '`' | '´' => "'",
        '“' | '”' => "\"",
        '–' | '—' | '‐' => "-",
        '…' => "...",
        '\t' | '\u{a0}' => " ",
        'á' | 'â' | 'ã' => "a",
        'Á' | 'Â' | 'Ã' | 'À' => "A",
        'ê' | 'ë' => "e",
        'È' | 'Ê' | 'Ë' => "E",
        'í' | 'î' | 'ï' => "i",
        'Í' | 'Ì' | 'Î' | 'Ï' => "I",
        'ó' | 'ô' | 'õ' => "o",
        'Ó' | 'Ò' | 'Ô' | 'Õ' => "O",
        'ú' | 'û' => "u",
        'Ú' | 'Ù' | 'Û' => "U",
        'ç' => "Ç",
        _ => "?",
    }
}

fn is_encodable(c: char) -> bool {
    basic_code(c).is_some() || extended_code(c).is_some()
}

/// Replace every character the default alphabet cannot carry.
pub fn sanitize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if is_encodable(c) {
            out.push(c);
        } else {
            out.push_str(transliterate(c));
        }
    }
    out
}

fn char_septets(c: char) -> usize {
    if extended_code(c).is_some() { 2 } else { 1 }
}

/// Septets needed to carry `text` once sanitized.
pub fn septet_len(text: &str) -> usize {
    sanitize(text).chars().map(char_septets).sum()
}

/// Longest prefix of the sanitized `text` that fits in `max` septets.
pub fn truncate_to_septets(text: &str, max: usize) -> String {
    let mut used = 0;
    let mut out = String::new();
    for c in sanitize(text).chars() {
        let cost = char_septets(c);
        if used + cost > max {
            break;
        }
        used += cost;
        out.push(c);
    }
    out
}

/// Septet codes for `text`; extension characters become `ESC, code`.
pub fn to_septets(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len());
    for c in sanitize(text).chars() {
        if let Some(code) = basic_code(c) {
            out.push(code);
        } else if let Some(code) = extended_code(c) {
            out.push(ESC);
            out.push(code);
        }
    }
    out
}

/// Split septets into parts of at most `per_segment`, never separating an
/// escape from the character it introduces.
pub fn split_septets(septets: &[u8], per_segment: usize) -> Vec<&[u8]> {
    let mut parts = Vec::new();
    let mut start = 0;
    while start < septets.len() {
        let mut end = (start + per_segment).min(septets.len());
        if end < septets.len() && end - start > 1 && septets[end - 1] == ESC {
            end -= 1;
        }
        parts.push(&septets[start..end]);
        start = end;
    }
    parts
}

/// Number of SMS parts needed for `text`.
pub fn segment_count(text: &str) -> usize {
    let septets = to_septets(text);
    if septets.len() <= SINGLE_SEGMENT_SEPTETS {
        1
    } else {
        split_septets(&septets, CONCAT_SEGMENT_SEPTETS).len()
    }
}

/// Pack septets LSB-first into octets, after `fill_bits` leading zero bits.
pub fn pack_septets(septets: &[u8], fill_bits: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity((septets.len() * 7 + fill_bits).div_ceil(8));
    let mut acc: u32 = 0;
    let mut bits = fill_bits;
    for &s in septets {
        acc |= u32::from(s & 0x7F) << bits;
        bits += 7;
        while bits >= 8 {
            out.push((acc & 0xFF) as u8);
            acc >>= 8;
            bits -= 8;
        }
    }
    if bits > 0 {
        out.push((acc & 0xFF) as u8);
    }
    out
}
