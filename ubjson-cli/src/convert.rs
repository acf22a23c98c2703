//! Conversion between JSON documents and UBJSON values. Member order is
//! preserved in both directions; integers beyond the 64-bit range travel
//! through serde_json's arbitrary-precision numbers without loss.

use serde_json::{Map, Number};
use ubjson::Value;

pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => number_to_value(n),
        serde_json::Value::String(s) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                // single ASCII characters take the two-byte char marker
                (Some(c), None) if c.is_ascii() => Value::Char(c),
                _ => Value::String(s.clone()),
            }
        }
        serde_json::Value::Array(items) => Value::Array(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(members) => Value::Object(
            members
                .iter()
                .map(|(k, v)| (k.as_str().into(), json_to_value(v)))
                .collect(),
        ),
    }
}

fn number_to_value(n: &Number) -> Value {
    if let Some(i) = n.as_i64() {
        return Value::Int(i);
    }
    let text = n.to_string();
    if !text.contains(['.', 'e', 'E']) {
        return Value::HugeInt(text);
    }
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() => Value::Float(f),
        // magnitudes beyond f64 keep their decimal text
        _ => Value::HighPrec(text),
    }
}

pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null | Value::NoOp => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => match Number::from_f64(*f) {
            Some(n) => serde_json::Value::Number(n),
            None => serde_json::Value::Null,
        },
        Value::HugeInt(text) | Value::HighPrec(text) => number_from_text(text),
        Value::Char(c) => serde_json::Value::String(c.to_string()),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => serde_json::Value::String(base64::encode(b)),
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Object(pairs) => {
            let mut map = Map::with_capacity(pairs.len());
            for (key, value) in pairs {
                map.insert(key.to_string(), value_to_json(value));
            }
            serde_json::Value::Object(map)
        }
    }
}

/// High-precision payloads are JSON numbers when their text conforms to
/// the JSON grammar; the `inf`/`nan` forms have no JSON rendering and
/// degrade to null.
fn number_from_text(text: &str) -> serde_json::Value {
    match serde_json::from_str::<Number>(text) {
        Ok(n) => serde_json::Value::Number(n),
        Err(_) => serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::{json_to_value, value_to_json};
    use ubjson::{DecoderConfig, EncoderConfig, Value, decode_from_bytes, encode_to_bytes};

    fn roundtrip(json_text: &str) -> serde_json::Value {
        let json: serde_json::Value = serde_json::from_str(json_text).unwrap();
        let encoded = encode_to_bytes(&json_to_value(&json), &EncoderConfig::default()).unwrap();
        let (value, _) = decode_from_bytes(&encoded, &DecoderConfig::default()).unwrap();
        value_to_json(&value)
    }

    #[test]
    fn json_documents_survive_the_bridge() {
        for doc in [
            "null",
            "true",
            "[1,2.5,\"here is a string\",null,{\"nested\":[]}]",
            "{\"int\":123,\"b\":-100,\"arr\":[1,2,3],\"obj\":{\"deep\":true}}",
        ] {
            let json: serde_json::Value = serde_json::from_str(doc).unwrap();
            assert_eq!(json, roundtrip(doc));
        }
    }

    #[test]
    fn member_order_is_preserved() {
        let out = roundtrip("{\"b\":1,\"a\":2,\"c\":3}");
        let keys: Vec<_> = out.as_object().unwrap().keys().cloned().collect();
        assert_eq!(vec!["b", "a", "c"], keys);
    }

    #[test]
    fn single_ascii_characters_narrow_to_char() {
        let json: serde_json::Value = serde_json::from_str("\"a\"").unwrap();
        assert_eq!(Value::Char('a'), json_to_value(&json));
        let json: serde_json::Value = serde_json::from_str("\"ä\"").unwrap();
        assert_eq!(Value::String("ä".to_string()), json_to_value(&json));
        // and they come back as strings
        assert_eq!(serde_json::Value::String("a".to_string()), value_to_json(&Value::Char('a')));
    }

    #[test]
    fn big_integers_are_lossless() {
        let json: serde_json::Value = serde_json::from_str("123456789012345678901234567890").unwrap();
        let value = json_to_value(&json);
        assert_eq!(Value::HugeInt("123456789012345678901234567890".to_string()), value);
        assert_eq!("123456789012345678901234567890", value_to_json(&value).to_string());
    }

    #[test]
    fn number_classification() {
        let case = |text: &str| json_to_value(&serde_json::from_str(text).unwrap());
        assert_eq!(Value::Int(123), case("123"));
        assert_eq!(Value::Int(i64::MIN), case("-9223372036854775808"));
        assert_eq!(Value::HugeInt("9223372036854775808".to_string()), case("9223372036854775808"));
        assert_eq!(Value::Float(2.5), case("2.5"));
        assert_eq!(Value::HighPrec("1e999".to_string()), case("1e999"));
    }

    #[test]
    fn bytes_render_as_base64() {
        assert_eq!(
            serde_json::Value::String("AQID".to_string()),
            value_to_json(&Value::Bytes(vec![1, 2, 3]))
        );
    }

    #[test]
    fn unrepresentable_numbers_degrade_to_null() {
        assert_eq!(serde_json::Value::Null, value_to_json(&Value::HighPrec("inf".to_string())));
        assert_eq!(serde_json::Value::Null, value_to_json(&Value::Float(f64::NAN)));
        assert_eq!(serde_json::Value::Null, value_to_json(&Value::NoOp));
    }
}
