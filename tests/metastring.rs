use fury_core::metastring::{decode, encode, read_meta_string, write_meta_string, Encoding};
use fury_core::Buffer;

const DOT: char = '.';
const UNDERSCORE: char = '_';

/// Identifier-shaped strings a class resolver would actually intern:
/// package names, `snake_case` fields, `CamelCase` type names, and a
/// `SCREAMING_SNAKE` constant, each driving a different alphabet.
#[test]
fn package_and_field_identifiers_round_trip_through_the_wire_form() {
    let identifiers = [
        "org.apache.fury.test",
        "user_id",
        "HttpRequestHandler",
        "MAX_RETRY_COUNT",
        "id",
    ];

    for ident in identifiers {
        let mut buf = Buffer::new();
        let ms = encode(ident, DOT, UNDERSCORE).unwrap();
        write_meta_string(&mut buf, &ms);

        let mut read_buf = Buffer::from_bytes(buf.into_bytes());
        let decoded = read_meta_string(&mut read_buf, DOT, UNDERSCORE).unwrap();
        assert_eq!(decoded, ident, "round trip should be lossless for {ident:?}");
    }
}

/// Several identifiers back-to-back in one buffer, as a class's field
/// names would be written in sequence.
#[test]
fn multiple_meta_strings_pack_sequentially_without_clobbering_each_other() {
    let fields = ["name", "createdAt", "is_active", "RETRY_LIMIT"];
    let mut buf = Buffer::new();
    for field in fields {
        let ms = encode(field, DOT, UNDERSCORE).unwrap();
        write_meta_string(&mut buf, &ms);
    }

    let mut read_buf = Buffer::from_bytes(buf.into_bytes());
    for field in fields {
        let decoded = read_meta_string(&mut read_buf, DOT, UNDERSCORE).unwrap();
        assert_eq!(decoded, field);
    }
    assert_eq!(read_buf.remaining(), 0);
}

/// A dotted, lowercase-only package name never needs anything past
/// `LOWER_SPECIAL`, the tightest of the four alphabets.
#[test]
fn dotted_lowercase_package_name_uses_lower_special() {
    let ms = encode("com.example.service", DOT, UNDERSCORE).unwrap();
    assert_eq!(ms.encoding, Encoding::LowerSpecial);
}

/// Custom special characters (not the `.`/`_` defaults) are threaded
/// through consistently between encode and decode.
#[test]
fn custom_special_characters_are_honored_on_both_sides() {
    let ms = encode("path/to-thing", '/', '-').unwrap();
    let decoded = decode(&ms.output_bytes, ms.encoding, ms.num_bits, '/', '-').unwrap();
    assert_eq!(decoded, "path/to-thing");
}

/// Empty strings are a degenerate but valid input: zero symbols, zero bits.
#[test]
fn empty_string_round_trips() {
    let mut buf = Buffer::new();
    let ms = encode("", DOT, UNDERSCORE).unwrap();
    assert_eq!(ms.num_bits, 0);
    write_meta_string(&mut buf, &ms);

    let mut read_buf = Buffer::from_bytes(buf.into_bytes());
    let decoded = read_meta_string(&mut read_buf, DOT, UNDERSCORE).unwrap();
    assert_eq!(decoded, "");
}
