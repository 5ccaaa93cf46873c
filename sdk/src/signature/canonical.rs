//! JSON canonicalization (RFC 8785 / JCS).
//!
//! Signatures must survive JSON re-formatting in transit, so the MAC is
//! computed over a canonical form rather than the raw bytes:
//! - object keys sorted by UTF-16 code units,
//! - no insignificant whitespace,
//! - array order preserved,
//! - strings with minimal escaping (no `\u` for printable characters, no
//!   escaped slashes),
//! - numbers in serde_json's shortest round-trip form, which matches the
//!   ES6 serialization for JSON-representable values.
//!
//! Bodies that do not parse as JSON pass through verbatim, as does the
//! empty body.

use {serde_json::Value, std::cmp::Ordering};

/// Canonicalize a request body for signing.
pub fn canonicalize(body: &[u8]) -> Vec<u8> {
    if body.is_empty() {
        return Vec::new();
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => {
            let mut out = String::new();
            write_value(&mut out, &value);
            out.into_bytes()
        }
        Err(_) => body.to_vec(),
    }
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| utf16_cmp(a, b));

            out.push('{');
            for (i, (key, item)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, item);
            }
            out.push('}');
        }
    }
}

fn write_string(out: &mut String, s: &str) {
    // serde_json escapes exactly the JCS-required set: quote, backslash and
    // control characters. Slashes and non-ASCII stay literal.
    out.push_str(&serde_json::to_string(s).expect("string serialization is infallible"));
}

fn utf16_cmp(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canon(body: &str) -> String {
        String::from_utf8(canonicalize(body.as_bytes())).unwrap()
    }

    #[test]
    fn sorts_keys_and_strips_whitespace() {
        assert_eq!(
            canon("{ \"foo\" : \"bar\" , \"baz\" : 123 }"),
            r#"{"baz":123,"foo":"bar"}"#
        );
    }

    #[test]
    fn nested_structures_are_canonicalized() {
        assert_eq!(
            canon(r#"{"b": [ {"y": 1, "x": 2}, null ], "a": true}"#),
            r#"{"a":true,"b":[{"x":2,"y":1},null]}"#
        );
    }

    #[test]
    fn array_order_is_preserved() {
        assert_eq!(canon("[3, 2, 1]"), "[3,2,1]");
    }

    #[test]
    fn strings_keep_unicode_and_slashes() {
        assert_eq!(canon(r#"{"a": "p/q", "b": "ü"}"#), "{\"a\":\"p/q\",\"b\":\"ü\"}");
    }

    #[test]
    fn non_json_passes_through() {
        assert_eq!(canonicalize(b"not json"), b"not json".to_vec());
        assert_eq!(canonicalize(b""), Vec::<u8>::new());
    }

    #[test]
    fn equivalent_bodies_canonicalize_identically() {
        let a = canon(r#"{"foo":"bar","baz":123}"#);
        let b = canon("{ \"baz\" : 123 ,\n \"foo\" : \"bar\" }");
        assert_eq!(a, b);
    }

    #[test]
    fn keys_sort_by_utf16_code_units() {
        // U+10000 encodes as a surrogate pair and must sort before U+FFFD.
        let body = "{\"\u{10000}\": 1, \"\u{fffd}\": 2}";
        assert_eq!(canon(body), "{\"\u{10000}\":1,\"\u{fffd}\":2}");
    }
}
