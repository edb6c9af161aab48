//! Minimal CBOR helpers on top of [`ciborium::Value`].

use std::io::Cursor;

use ciborium::Value;

use crate::error::{AttestError, Result};

/// Decode exactly one CBOR data item. Trailing bytes are an error.
pub(crate) fn decode(bytes: &[u8]) -> Result<Value> {
    let mut cursor = Cursor::new(bytes);
    let value: Value = ciborium::from_reader(&mut cursor)
        .map_err(|e| AttestError::MalformedCbor(e.to_string()))?;

    let consumed = cursor.position() as usize;
    if consumed != bytes.len() {
        return Err(AttestError::MalformedCbor(format!(
            "{} trailing bytes after data item",
            bytes.len() - consumed
        )));
    }
    Ok(value)
}

pub(crate) fn encode(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out)
        .map_err(|e| AttestError::MalformedCbor(e.to_string()))?;
    Ok(out)
}

/// Nesting deeper than this is rejected by [`item_len`].
const MAX_DEPTH: usize = 128;

/// Initial byte of the "break" stop code ending an indefinite-length item.
const BREAK: u8 = 0xff;

/// Read one item head at `offset`: the major type and its argument.
/// The argument is `None` for an indefinite-length item.
pub(crate) fn read_header(bytes: &[u8], offset: &mut usize) -> Result<(u8, Option<u64>)> {
    let initial = take(bytes, offset, 1)?[0];
    let major = initial >> 5;
    let argument = match initial & 0x1f {
        info @ 0..=23 => Some(u64::from(info)),
        24 => Some(u64::from(take(bytes, offset, 1)?[0])),
        25 => Some(be_uint(take(bytes, offset, 2)?)),
        26 => Some(be_uint(take(bytes, offset, 4)?)),
        27 => Some(be_uint(take(bytes, offset, 8)?)),
        31 if matches!(major, 2..=5) => None,
        info => {
            return Err(AttestError::MalformedCbor(format!(
                "reserved additional information {info} for major type {major}"
            )));
        }
    };
    Ok((major, argument))
}

/// Length in bytes of the data item at the start of `bytes`, head included.
///
/// The item is walked as encoded, so non-shortest heads and
/// indefinite-length items keep their exact size.
pub(crate) fn item_len(bytes: &[u8]) -> Result<usize> {
    let mut offset = 0;
    skip_item(bytes, &mut offset, 0)?;
    Ok(offset)
}

fn skip_item(bytes: &[u8], offset: &mut usize, depth: usize) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(AttestError::MalformedCbor("nesting too deep".to_string()));
    }
    match read_header(bytes, offset)? {
        (2 | 3, Some(len)) => {
            take(bytes, offset, to_usize(len)?)?;
        }
        (4, Some(count)) => {
            for _ in 0..count {
                skip_item(bytes, offset, depth + 1)?;
            }
        }
        (5, Some(count)) => {
            for _ in 0..count.saturating_mul(2) {
                skip_item(bytes, offset, depth + 1)?;
            }
        }
        (6, Some(_)) => skip_item(bytes, offset, depth + 1)?,
        (_, Some(_)) => {}
        (_, None) => {
            while bytes.get(*offset) != Some(&BREAK) {
                skip_item(bytes, offset, depth + 1)?;
            }
            *offset += 1;
        }
    }
    Ok(())
}

fn take<'a>(bytes: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = offset
        .checked_add(len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| AttestError::MalformedCbor("unexpected end of input".to_string()))?;
    let slice = &bytes[*offset..end];
    *offset = end;
    Ok(slice)
}

fn be_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0, |acc, b| (acc << 8) | u64::from(*b))
}

fn to_usize(len: u64) -> Result<usize> {
    usize::try_from(len).map_err(|_| AttestError::MalformedCbor(format!("length {len} too large")))
}

/// Read-only view over a text-keyed CBOR map.
///
/// A `null` value is treated the same as an absent key.
pub(crate) struct FieldMap<'a> {
    entries: Vec<(&'a str, &'a Value)>,
}

impl<'a> FieldMap<'a> {
    pub(crate) fn new(entries: &'a [(Value, Value)]) -> Result<Self> {
        let mut fields: Vec<(&'a str, &'a Value)> = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let key = key
                .as_text()
                .ok_or_else(|| AttestError::InvalidPayload("map key is not text".to_string()))?;
            if fields.iter().any(|(k, _)| *k == key) {
                return Err(AttestError::DuplicateField(key.to_string()));
            }
            fields.push((key, value));
        }
        Ok(Self { entries: fields })
    }

    fn get(&self, name: &str) -> Option<&'a Value> {
        self.entries
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| *v)
            .filter(|v| !v.is_null())
    }

    fn required(&self, name: &'static str) -> Result<&'a Value> {
        self.get(name).ok_or(AttestError::MissingField(name))
    }

    pub(crate) fn text(&self, name: &'static str) -> Result<&'a str> {
        self.required(name)?
            .as_text()
            .ok_or(AttestError::InvalidFieldType {
                field: name,
                expected: "text string",
            })
    }

    pub(crate) fn bytes(&self, name: &'static str) -> Result<&'a [u8]> {
        as_bytes(self.required(name)?, name)
    }

    pub(crate) fn optional_bytes(&self, name: &'static str) -> Result<Option<&'a [u8]>> {
        self.get(name).map(|v| as_bytes(v, name)).transpose()
    }

    pub(crate) fn uint(&self, name: &'static str) -> Result<u64> {
        self.required(name)?
            .as_integer()
            .and_then(|i| u64::try_from(i).ok())
            .ok_or(AttestError::InvalidFieldType {
                field: name,
                expected: "unsigned integer",
            })
    }

    pub(crate) fn map(&self, name: &'static str) -> Result<&'a [(Value, Value)]> {
        self.required(name)?
            .as_map()
            .map(Vec::as_slice)
            .ok_or(AttestError::InvalidFieldType {
                field: name,
                expected: "map",
            })
    }

    pub(crate) fn array(&self, name: &'static str) -> Result<&'a [Value]> {
        self.required(name)?
            .as_array()
            .map(Vec::as_slice)
            .ok_or(AttestError::InvalidFieldType {
                field: name,
                expected: "array",
            })
    }
}

pub(crate) fn as_bytes<'a>(value: &'a Value, field: &'static str) -> Result<&'a [u8]> {
    value
        .as_bytes()
        .map(Vec::as_slice)
        .ok_or(AttestError::InvalidFieldType {
            field,
            expected: "byte string",
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn decode_rejects_trailing_bytes() {
        // 0x01 followed by a stray 0x02
        let err = decode(&hex!("0102")).unwrap_err();
        assert!(matches!(err, AttestError::MalformedCbor(_)));
    }

    #[test]
    fn decode_rejects_truncated_input() {
        // byte string announcing 4 bytes but carrying 2
        assert!(matches!(
            decode(&hex!("44aabb")),
            Err(AttestError::MalformedCbor(_))
        ));
    }

    #[test]
    fn encode_then_decode_preserves_value() {
        let value = Value::Tag(18, Box::new(Value::Array(vec![Value::Bytes(vec![1, 2])])));
        let bytes = encode(&value).unwrap();
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn item_len_keeps_encoded_size() {
        // h'a1013822' with a one byte length instead of an inline one
        assert_eq!(item_len(&hex!("5804a1013822ff")).unwrap(), 6);
        // {4: h'00'} with the key spelled 0x18 0x04
        assert_eq!(item_len(&hex!("a118044100")).unwrap(), 5);
        // [_ 1, [2], 2] followed by a trailing byte
        assert_eq!(item_len(&hex!("9f01810202ff00")).unwrap(), 6);
        // 18([]) with a long form tag
        assert_eq!(item_len(&hex!("d81280")).unwrap(), 3);
    }

    #[test]
    fn item_len_rejects_truncated_and_reserved_items() {
        assert!(matches!(
            item_len(&hex!("9f01")),
            Err(AttestError::MalformedCbor(_))
        ));
        assert!(matches!(
            item_len(&hex!("5b00000000000000ff")),
            Err(AttestError::MalformedCbor(_))
        ));
        assert!(matches!(
            item_len(&hex!("1c")),
            Err(AttestError::MalformedCbor(_))
        ));
        assert!(matches!(
            item_len(&[0x81; 200]),
            Err(AttestError::MalformedCbor(_))
        ));
    }

    #[test]
    fn field_map_treats_null_as_absent() {
        let entries = vec![
            (Value::Text("nonce".into()), Value::Null),
            (Value::Text("digest".into()), Value::Text("SHA384".into())),
        ];
        let fields = FieldMap::new(&entries).unwrap();
        assert_eq!(fields.optional_bytes("nonce").unwrap(), None);
        assert_eq!(fields.text("digest").unwrap(), "SHA384");
        assert_eq!(
            fields.bytes("nonce").unwrap_err(),
            AttestError::MissingField("nonce")
        );
    }

    #[test]
    fn field_map_rejects_duplicates_and_non_text_keys() {
        let dup = vec![
            (Value::Text("a".into()), Value::Null),
            (Value::Text("a".into()), Value::Null),
        ];
        assert_eq!(
            FieldMap::new(&dup).err(),
            Some(AttestError::DuplicateField("a".to_string()))
        );

        let int_key = vec![(Value::Integer(1.into()), Value::Null)];
        assert!(matches!(
            FieldMap::new(&int_key),
            Err(AttestError::InvalidPayload(_))
        ));
    }

    #[test]
    fn field_map_reports_wrong_types() {
        let entries = vec![(Value::Text("timestamp".into()), Value::Integer((-1).into()))];
        let fields = FieldMap::new(&entries).unwrap();
        assert_eq!(
            fields.uint("timestamp").unwrap_err(),
            AttestError::InvalidFieldType {
                field: "timestamp",
                expected: "unsigned integer"
            }
        );
    }
}
