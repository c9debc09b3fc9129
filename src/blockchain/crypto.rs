use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};

use std::io::{self, Write};

/// JSON formatter for the canonical text form that block hashes and wire
/// messages are computed over.
///
/// The layout is fixed: `", "` between items, `": "` between a key and its
/// value, every character outside printable ASCII escaped as `\uXXXX`, and
/// floats rendered by [`format_float`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CanonicalFormatter;

impl Formatter for CanonicalFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        writer.write_all(b": ")
    }

    fn write_f32<W>(&mut self, writer: &mut W, value: f32) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        self.write_f64(writer, f64::from(value))
    }

    fn write_f64<W>(&mut self, writer: &mut W, value: f64) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        writer.write_all(format_float(value).as_bytes())
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        let mut start = 0;
        for (offset, ch) in fragment.char_indices() {
            if (' '..='~').contains(&ch) {
                continue;
            }
            writer.write_all(fragment[start..offset].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = offset + ch.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

/// Renders a float as the shortest decimal that round-trips, always with a
/// fractional part or an explicit exponent (`50.0`, `1e-05`, `1e+16`).
pub fn format_float(value: f64) -> String {
    let repr = format!("{:?}", value);

    match repr.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => repr,
    }
}

/// Encodes a JSON value in canonical text form
///
/// Objects are written in key order regardless of how the map was built.
/// Values whose maps already iterate in key order are encoded in place.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    if keys_sorted(value) {
        encode(value)
    } else {
        encode(&sort_keys(value.clone()))
    }
}

fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut out, CanonicalFormatter);

    // Values only hold string keys and the sink is a Vec, so this cannot fail
    value
        .serialize(&mut serializer)
        .expect("a JSON value always encodes into memory");

    out
}

/// SHA-256 digest of `data` as 64 lowercase hex characters
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// SHA-256 of the canonical encoding of `value`
pub fn hash_value(value: &Value) -> String {
    sha256_hex(&canonical_bytes(value))
}

fn keys_sorted(value: &Value) -> bool {
    match value {
        Value::Object(map) => {
            map.keys().zip(map.keys().skip(1)).all(|(a, b)| a < b)
                && map.values().all(keys_sorted)
        }
        Value::Array(items) => items.iter().all(keys_sorted),
        _ => true,
    }
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, sort_keys(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(50.0), "50.0");
        assert_eq!(format_float(0.0), "0.0");
        assert_eq!(format_float(-0.0), "-0.0");
        assert_eq!(format_float(12.25), "12.25");
        assert_eq!(format_float(1700000000.5), "1700000000.5");
        assert_eq!(format_float(0.0001), "0.0001");
        assert_eq!(format_float(1e-5), "1e-05");
        assert_eq!(format_float(1.5e-7), "1.5e-07");
        assert_eq!(format_float(9999999999999998.0), "9999999999999998.0");
        assert_eq!(format_float(1e16), "1e+16");
        assert_eq!(format_float(1.7e300), "1.7e+300");
    }

    #[test]
    fn test_canonical_layout() {
        let value = json!({
            "b": [1e-5, 1e16, 0.0001, 123.0, -0.0, 1.5e-7, 9999999999999998.0],
            "a": "x\u{7f}\u{e9}\u{1F600}\n\"",
            "c": {"z": 1, "y": []},
        });

        let encoded = String::from_utf8(canonical_bytes(&value)).unwrap();
        assert_eq!(
            encoded,
            r#"{"a": "x\u007f\u00e9\ud83d\ude00\n\"", "b": [1e-05, 1e+16, 0.0001, 123.0, -0.0, 1.5e-07, 9999999999999998.0], "c": {"y": [], "z": 1}}"#
        );
    }

    #[test]
    fn test_sorted_values_encode_in_place() {
        let value = json!({
            "transactions": [{"valor": 1.5, "id": "a"}],
            "nonce": 7,
            "index": 1,
        });

        assert!(keys_sorted(&value));
        assert_eq!(canonical_bytes(&value), encode(&sort_keys(value.clone())));
        assert_eq!(
            String::from_utf8(canonical_bytes(&value)).unwrap(),
            r#"{"index": 1, "nonce": 7, "transactions": [{"id": "a", "valor": 1.5}]}"#
        );
    }

    #[test]
    fn test_sha256_hex() {
        let hash = sha256_hex(b"");
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
