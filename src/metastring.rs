//! Adaptive bit-packed string codec used for class/field/package
//! identifiers in the wire format.
//!
//! Four fixed alphabets are tried in order of how tightly they pack common
//! identifier shapes (`snake_case`, `CamelCase`, `SCREAMING_SNAKE`, mixed
//! digits) before falling back to raw UTF-8 for anything else.

use crate::buffer::Buffer;
use crate::error::{FuryError, FuryResult};

/// Default special characters used when the caller has no reason to
/// choose their own (`LOWER_SPECIAL` doesn't need them at all).
pub const DEFAULT_SPECIAL_CHAR_1: char = '.';
pub const DEFAULT_SPECIAL_CHAR_2: char = '_';

/// One of the four bit-packed alphabets, or the UTF-8 fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    LowerSpecial,
    LowerUpperDigitSpecial,
    FirstToLowerSpecial,
    AllToLowerSpecial,
    Utf8,
}

mod wire {
    pub const LOWER_SPECIAL: u8 = 0;
    pub const LOWER_UPPER_DIGIT_SPECIAL: u8 = 1;
    pub const FIRST_TO_LOWER_SPECIAL: u8 = 2;
    pub const ALL_TO_LOWER_SPECIAL: u8 = 3;
    pub const UTF8: u8 = 4;
}

impl Encoding {
    fn wire_tag(self) -> u8 {
        match self {
            Encoding::LowerSpecial => wire::LOWER_SPECIAL,
            Encoding::LowerUpperDigitSpecial => wire::LOWER_UPPER_DIGIT_SPECIAL,
            Encoding::FirstToLowerSpecial => wire::FIRST_TO_LOWER_SPECIAL,
            Encoding::AllToLowerSpecial => wire::ALL_TO_LOWER_SPECIAL,
            Encoding::Utf8 => wire::UTF8,
        }
    }

    fn from_wire_tag(tag: u8) -> FuryResult<Self> {
        match tag {
            wire::LOWER_SPECIAL => Ok(Encoding::LowerSpecial),
            wire::LOWER_UPPER_DIGIT_SPECIAL => Ok(Encoding::LowerUpperDigitSpecial),
            wire::FIRST_TO_LOWER_SPECIAL => Ok(Encoding::FirstToLowerSpecial),
            wire::ALL_TO_LOWER_SPECIAL => Ok(Encoding::AllToLowerSpecial),
            wire::UTF8 => Ok(Encoding::Utf8),
            other => Err(FuryError::ProtocolMismatch(format!(
                "unrecognized MetaString encoding tag {other}"
            ))),
        }
    }

    fn bits_per_char(self) -> u32 {
        match self {
            Encoding::LowerSpecial
            | Encoding::FirstToLowerSpecial
            | Encoding::AllToLowerSpecial => 5,
            Encoding::LowerUpperDigitSpecial => 6,
            Encoding::Utf8 => 8,
        }
    }
}

const MAX_INPUT_CHARS: usize = 32767;

/// The result of encoding a string, carrying everything needed to decode
/// it back.
#[derive(Debug, Clone)]
pub struct MetaString {
    pub input: String,
    pub encoding: Encoding,
    pub output_bytes: Vec<u8>,
    pub num_chars: usize,
    pub num_bits: usize,
    pub special_char1: char,
    pub special_char2: char,
}

fn lower_special_index(c: char) -> Option<u32> {
    match c {
        'a'..='z' => Some(c as u32 - 'a' as u32),
        '.' => Some(26),
        '_' => Some(27),
        '$' => Some(28),
        '|' => Some(29),
        _ => None,
    }
}

fn lower_special_char(index: u32) -> char {
    match index {
        0..=25 => (b'a' + index as u8) as char,
        26 => '.',
        27 => '_',
        28 => '$',
        29 => '|',
        other => unreachable!("invalid LOWER_SPECIAL index {other}"),
    }
}

fn lower_upper_digit_index(c: char, special1: char, special2: char) -> Option<u32> {
    match c {
        'a'..='z' => Some(c as u32 - 'a' as u32),
        'A'..='Z' => Some(26 + (c as u32 - 'A' as u32)),
        '0'..='9' => Some(52 + (c as u32 - '0' as u32)),
        c if c == special1 => Some(62),
        c if c == special2 => Some(63),
        _ => None,
    }
}

fn lower_upper_digit_char(index: u32, special1: char, special2: char) -> char {
    match index {
        0..=25 => (b'a' + index as u8) as char,
        26..=51 => (b'A' + (index - 26) as u8) as char,
        52..=61 => (b'0' + (index - 52) as u8) as char,
        62 => special1,
        63 => special2,
        other => unreachable!("invalid LOWER_UPPER_DIGIT_SPECIAL index {other}"),
    }
}

/// Deterministically chooses the tightest-packing alphabet for `s`, or
/// `UTF8` if none fits. Pure function of `s` and the two special chars.
pub fn choose_encoding(s: &str, special_char1: char, special_char2: char) -> Encoding {
    let chars: Vec<char> = s.chars().collect();

    if chars.iter().all(|&c| lower_special_index(c).is_some()) {
        return Encoding::LowerSpecial;
    }

    if chars
        .iter()
        .all(|&c| lower_upper_digit_index(c, special_char1, special_char2).is_some())
    {
        let has_digit = chars.iter().any(|c| c.is_ascii_digit());
        if has_digit {
            return Encoding::LowerUpperDigitSpecial;
        }
        let upper_count = chars.iter().filter(|c| c.is_ascii_uppercase()).count();
        let single_leading_upper = upper_count == 1 && chars.first().is_some_and(|c| c.is_ascii_uppercase());
        if single_leading_upper {
            return Encoding::FirstToLowerSpecial;
        }
        let len = chars.len();
        if (len + upper_count) * 5 < len * 6 {
            return Encoding::AllToLowerSpecial;
        }
        return Encoding::LowerUpperDigitSpecial;
    }

    Encoding::Utf8
}

/// Packs `symbols` (each holding `bits` significant low bits) MSB-first
/// into a byte stream.
fn pack_bits(symbols: &[u32], bits: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity((symbols.len() * bits as usize).div_ceil(8));
    let mut current_byte = 0u8;
    let mut bits_in_current = 0u32;
    for &symbol in symbols {
        let mut remaining = bits;
        while remaining > 0 {
            let take = remaining.min(8 - bits_in_current);
            let shift = remaining - take;
            let chunk = (symbol >> shift) & ((1 << take) - 1);
            current_byte |= (chunk as u8) << (8 - bits_in_current - take);
            bits_in_current += take;
            remaining -= take;
            if bits_in_current == 8 {
                out.push(current_byte);
                current_byte = 0;
                bits_in_current = 0;
            }
        }
    }
    if bits_in_current > 0 {
        out.push(current_byte);
    }
    out
}

/// Unpacks `count` `bits`-wide symbols, MSB-first, from `data`.
fn unpack_bits(data: &[u8], bits: u32, count: usize) -> Vec<u32> {
    let mut out = Vec::with_capacity(count);
    let mut bit_pos = 0usize;
    for _ in 0..count {
        let mut value = 0u32;
        for _ in 0..bits {
            let byte_index = bit_pos / 8;
            let bit_index = 7 - (bit_pos % 8);
            let bit = (data[byte_index] >> bit_index) & 1;
            value = (value << 1) | bit as u32;
            bit_pos += 1;
        }
        out.push(value);
    }
    out
}

fn encode_symbols(chars: &[char], encoding: Encoding, special1: char, special2: char) -> Vec<u32> {
    match encoding {
        Encoding::LowerSpecial => chars
            .iter()
            .map(|&c| lower_special_index(c).unwrap_or_else(|| alphabet_violation(c, encoding)))
            .collect(),
        Encoding::FirstToLowerSpecial => chars
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                let c = if i == 0 { c.to_ascii_lowercase() } else { c };
                lower_special_index(c).unwrap_or_else(|| alphabet_violation(c, encoding))
            })
            .collect(),
        Encoding::AllToLowerSpecial => {
            let mut symbols = Vec::with_capacity(chars.len());
            for &c in chars {
                if c.is_ascii_uppercase() {
                    symbols.push(lower_special_index('|').unwrap());
                    symbols.push(
                        lower_special_index(c.to_ascii_lowercase())
                            .unwrap_or_else(|| alphabet_violation(c, encoding)),
                    );
                } else {
                    symbols.push(
                        lower_special_index(c).unwrap_or_else(|| alphabet_violation(c, encoding)),
                    );
                }
            }
            symbols
        }
        Encoding::LowerUpperDigitSpecial => chars
            .iter()
            .map(|&c| {
                lower_upper_digit_index(c, special1, special2)
                    .unwrap_or_else(|| alphabet_violation(c, encoding))
            })
            .collect(),
        Encoding::Utf8 => unreachable!("UTF8 does not go through symbol packing"),
    }
}

/// Encoding any character outside the chosen alphabet is a programmer
/// error in the caller. It is fatal, not a `Result` error.
fn alphabet_violation(c: char, encoding: Encoding) -> ! {
    panic!("AlphabetViolation: character {c:?} is not valid for {encoding:?}");
}

/// Encodes `s` under the explicitly chosen `encoding`, regardless of what
/// [`choose_encoding`] would pick. Panics (`AlphabetViolation`) if `s`
/// contains a character outside `encoding`'s alphabet.
pub fn encode_as(
    s: &str,
    encoding: Encoding,
    special_char1: char,
    special_char2: char,
) -> FuryResult<MetaString> {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > MAX_INPUT_CHARS {
        return Err(FuryError::OversizedString(chars.len()));
    }

    if encoding == Encoding::Utf8 {
        let output_bytes = s.as_bytes().to_vec();
        let num_bits = output_bytes.len() * 8;
        return Ok(MetaString {
            input: s.to_string(),
            encoding,
            output_bytes,
            num_chars: chars.len(),
            num_bits,
            special_char1,
            special_char2,
        });
    }

    let symbols = encode_symbols(&chars, encoding, special_char1, special_char2);
    let bits = encoding.bits_per_char();
    let output_bytes = pack_bits(&symbols, bits);
    let num_bits = symbols.len() * bits as usize;

    Ok(MetaString {
        input: s.to_string(),
        encoding,
        output_bytes,
        num_chars: chars.len(),
        num_bits,
        special_char1,
        special_char2,
    })
}

/// Encodes `s`, choosing the tightest-packing alphabet automatically.
pub fn encode(s: &str, special_char1: char, special_char2: char) -> FuryResult<MetaString> {
    let encoding = choose_encoding(s, special_char1, special_char2);
    encode_as(s, encoding, special_char1, special_char2)
}

/// Decodes `bytes` back to a `String`, given the `encoding` and exact
/// `num_bits` that were written.
pub fn decode(
    bytes: &[u8],
    encoding: Encoding,
    num_bits: usize,
    special_char1: char,
    special_char2: char,
) -> FuryResult<String> {
    if encoding == Encoding::Utf8 {
        let byte_len = num_bits / 8;
        return String::from_utf8(bytes[..byte_len].to_vec())
            .map_err(|e| FuryError::ProtocolMismatch(e.to_string()));
    }

    let bits = encoding.bits_per_char();
    let count = num_bits / bits as usize;
    let symbols = unpack_bits(bytes, bits, count);

    let mut out = String::with_capacity(count);
    match encoding {
        Encoding::LowerSpecial => {
            for &sym in &symbols {
                out.push(lower_special_char(sym));
            }
        }
        Encoding::FirstToLowerSpecial => {
            for (i, &sym) in symbols.iter().enumerate() {
                let c = lower_special_char(sym);
                out.push(if i == 0 { c.to_ascii_uppercase() } else { c });
            }
        }
        Encoding::AllToLowerSpecial => {
            let mut i = 0;
            while i < symbols.len() {
                let c = lower_special_char(symbols[i]);
                if c == '|' {
                    i += 1;
                    let next = lower_special_char(symbols[i]);
                    out.push(next.to_ascii_uppercase());
                } else {
                    out.push(c);
                }
                i += 1;
            }
        }
        Encoding::LowerUpperDigitSpecial => {
            for &sym in &symbols {
                out.push(lower_upper_digit_char(sym, special_char1, special_char2));
            }
        }
        Encoding::Utf8 => unreachable!("handled above"),
    }
    Ok(out)
}

/// Writes the wire form: `u8(encoding)`, `VarUint32(numBits)`, then the
/// packed payload.
pub fn write_meta_string(buf: &mut Buffer, ms: &MetaString) {
    buf.write_u8(ms.encoding.wire_tag());
    buf.write_var_uint32_small7(ms.num_bits as u32);
    buf.write_bytes(&ms.output_bytes);
}

/// Reads the wire form written by [`write_meta_string`], returning the
/// decoded string.
pub fn read_meta_string(
    buf: &mut Buffer,
    special_char1: char,
    special_char2: char,
) -> FuryResult<String> {
    let encoding = Encoding::from_wire_tag(buf.read_u8()?)?;
    let num_bits = buf.read_var_uint32_small7()? as usize;
    let byte_len = num_bits.div_ceil(8);
    let bytes = buf.read_bytes(byte_len)?;
    decode(bytes, encoding, num_bits, special_char1, special_char2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_1_lower_special_roundtrip() {
        let ms = encode_as(
            "abc_def",
            Encoding::LowerSpecial,
            DEFAULT_SPECIAL_CHAR_1,
            DEFAULT_SPECIAL_CHAR_2,
        )
        .unwrap();
        assert_eq!(ms.output_bytes.len(), 5);
        assert_eq!(ms.num_bits, 35);
        let decoded = decode(
            &ms.output_bytes,
            Encoding::LowerSpecial,
            35,
            DEFAULT_SPECIAL_CHAR_1,
            DEFAULT_SPECIAL_CHAR_2,
        )
        .unwrap();
        assert_eq!(decoded, "abc_def");
    }

    #[test]
    fn scenario_2_lower_upper_digit_special() {
        let ms = encode("ExampleInput123", '.', '_').unwrap();
        assert_eq!(ms.encoding, Encoding::LowerUpperDigitSpecial);
        assert_eq!(ms.output_bytes.len(), 12);
        let decoded = decode(&ms.output_bytes, ms.encoding, ms.num_bits, '.', '_').unwrap();
        assert_eq!(decoded, "ExampleInput123");
    }

    #[test]
    fn scenario_3_first_to_lower_special() {
        let ms = encode("Aabcdef", '.', '_').unwrap();
        assert_eq!(ms.encoding, Encoding::FirstToLowerSpecial);
        let decoded = decode(&ms.output_bytes, ms.encoding, ms.num_bits, '.', '_').unwrap();
        assert_eq!(decoded, "Aabcdef");
    }

    #[test]
    fn scenario_4_non_ascii_falls_back_to_utf8() {
        let s = "你好，世界";
        let ms = encode(s, '.', '_').unwrap();
        assert_eq!(ms.encoding, Encoding::Utf8);
        assert_eq!(ms.output_bytes, s.as_bytes());
        let decoded = decode(&ms.output_bytes, ms.encoding, ms.num_bits, '.', '_').unwrap();
        assert_eq!(decoded, s);
    }

    #[test]
    fn all_to_lower_special_packs_uppercase_as_two_symbols() {
        // Few uppercase letters scattered through an otherwise-lowercase
        // identifier: (len + upperCount) * 5 < len * 6 only holds once
        // uppercase letters are a small enough fraction of the string.
        let s = "helloWorldFoo";
        let encoding = choose_encoding(s, '.', '_');
        assert_eq!(encoding, Encoding::AllToLowerSpecial);
        let ms = encode(s, '.', '_').unwrap();
        let decoded = decode(&ms.output_bytes, ms.encoding, ms.num_bits, '.', '_').unwrap();
        assert_eq!(decoded, s);
    }

    #[test]
    fn wire_roundtrip_through_buffer() {
        let ms = encode("some.field_name", '.', '_').unwrap();
        let mut buf = Buffer::new();
        write_meta_string(&mut buf, &ms);
        let mut read_buf = Buffer::from_bytes(buf.into_bytes());
        let decoded = read_meta_string(&mut read_buf, '.', '_').unwrap();
        assert_eq!(decoded, "some.field_name");
    }

    #[test]
    fn oversized_input_is_rejected() {
        let s = "a".repeat(MAX_INPUT_CHARS + 1);
        let err = encode(&s, '.', '_').unwrap_err();
        assert!(matches!(err, FuryError::OversizedString(_)));
    }

    #[test]
    fn choose_encoding_is_a_pure_function_of_input_and_specials() {
        let a = choose_encoding("fooBar1", '.', '_');
        let b = choose_encoding("fooBar1", '.', '_');
        assert_eq!(a, b);
    }

    #[test]
    #[should_panic(expected = "AlphabetViolation")]
    fn forcing_an_incompatible_encoding_panics() {
        let _ = encode_as("UPPER", Encoding::LowerSpecial, '.', '_');
    }
}
