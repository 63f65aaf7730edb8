use bson::Bson;

use crate::errors::{Error, Result};

// BSON element tags.
pub const TAG_DOUBLE: u8 = 0x01;
pub const TAG_STRING: u8 = 0x02;
pub const TAG_DOCUMENT: u8 = 0x03;
pub const TAG_ARRAY: u8 = 0x04;
pub const TAG_BINARY: u8 = 0x05;
pub const TAG_UNDEFINED: u8 = 0x06;
pub const TAG_OBJECT_ID: u8 = 0x07;
pub const TAG_BOOL: u8 = 0x08;
pub const TAG_DATETIME: u8 = 0x09;
pub const TAG_NULL: u8 = 0x0A;
pub const TAG_REGEX: u8 = 0x0B;
pub const TAG_DB_POINTER: u8 = 0x0C;
pub const TAG_CODE: u8 = 0x0D;
pub const TAG_SYMBOL: u8 = 0x0E;
pub const TAG_CODE_W_SCOPE: u8 = 0x0F;
pub const TAG_INT32: u8 = 0x10;
pub const TAG_TIMESTAMP: u8 = 0x11;
pub const TAG_INT64: u8 = 0x12;
pub const TAG_DECIMAL128: u8 = 0x13;
pub const TAG_MIN_KEY: u8 = 0xFF;
pub const TAG_MAX_KEY: u8 = 0x7F;

/// Borrowed view over one serialized BSON document.
///
/// Iteration and key probing never allocate; element boundaries come from
/// per-type size rules. Decimal128 is the fixed 16-byte encoding only; a
/// document carrying the legacy length-prefixed form misaligns and surfaces
/// as `Corrupted`.
#[derive(Debug, Clone, Copy)]
pub struct RawDocument<'a> {
    bytes: &'a [u8],
}

/// One element: tag, key bytes (no NUL), and the raw value span.
#[derive(Debug, Clone, Copy)]
pub struct RawElement<'a> {
    pub tag: u8,
    pub key: &'a [u8],
    pub value: &'a [u8],
}

impl<'a> RawDocument<'a> {
    /// Validate the outer framing: length prefix matches the slice and the
    /// document ends with the 0x00 terminator.
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < 5 {
            return Err(Error::corrupted("document shorter than minimal BSON"));
        }
        let declared = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if declared < 5 || declared as usize != bytes.len() {
            return Err(Error::corrupted(format!(
                "document length prefix {declared} does not match slice of {}",
                bytes.len()
            )));
        }
        if bytes[bytes.len() - 1] != 0 {
            return Err(Error::corrupted("document missing terminator"));
        }
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn iter(&self) -> RawElements<'a> {
        RawElements { bytes: self.bytes, pos: 4 }
    }

    /// First-level lookup by exact key bytes.
    pub fn get(&self, key: &[u8]) -> Result<Option<RawElement<'a>>> {
        for element in self.iter() {
            let element = element?;
            if element.key == key {
                return Ok(Some(element));
            }
        }
        Ok(None)
    }

    /// Probe candidate keys in order, returning the first present.
    pub fn get_any(&self, candidates: &[&[u8]]) -> Result<Option<RawElement<'a>>> {
        for element in self.iter() {
            let element = element?;
            if candidates.contains(&element.key) {
                return Ok(Some(element));
            }
        }
        Ok(None)
    }

    /// Copy only the elements whose keys appear in `keys` into a fresh
    /// document byte buffer; everything else is skipped via the size tables.
    pub fn project(&self, keys: &[&[u8]]) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        for element in self.iter() {
            let element = element?;
            if keys.contains(&element.key) {
                body.push(element.tag);
                body.extend_from_slice(element.key);
                body.push(0);
                body.extend_from_slice(element.value);
            }
        }
        let total = 4 + body.len() + 1;
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&(total as i32).to_le_bytes());
        out.extend_from_slice(&body);
        out.push(0);
        Ok(out)
    }
}

pub struct RawElements<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for RawElements<'a> {
    type Item = Result<RawElement<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.bytes.len() {
            return None;
        }
        let tag = self.bytes[self.pos];
        if tag == 0 {
            return None;
        }
        match self.read_element(tag) {
            Ok(el) => Some(Ok(el)),
            Err(e) => {
                // Poison the iterator so a torn document yields one error.
                self.pos = self.bytes.len();
                Some(Err(e))
            }
        }
    }
}

impl<'a> RawElements<'a> {
    fn read_element(&mut self, tag: u8) -> Result<RawElement<'a>> {
        let key_start = self.pos + 1;
        let key_end = self.bytes[key_start..]
            .iter()
            .position(|&b| b == 0)
            .map(|i| key_start + i)
            .ok_or_else(|| Error::corrupted("unterminated element key"))?;
        let key = &self.bytes[key_start..key_end];
        let value_start = key_end + 1;
        let len = value_len(tag, &self.bytes[value_start..])?;
        let value_end = value_start
            .checked_add(len)
            .filter(|&end| end < self.bytes.len())
            .ok_or_else(|| Error::corrupted("element value overruns document"))?;
        self.pos = value_end;
        Ok(RawElement { tag, key, value: &self.bytes[value_start..value_end] })
    }
}

/// Size of an element value given its tag and the bytes starting at the
/// value. Variable-length types read their own prefixes.
pub fn value_len(tag: u8, bytes: &[u8]) -> Result<usize> {
    let need = |n: usize| -> Result<usize> {
        if bytes.len() < n {
            Err(Error::corrupted("element value truncated"))
        } else {
            Ok(n)
        }
    };
    match tag {
        TAG_DOUBLE | TAG_DATETIME | TAG_TIMESTAMP | TAG_INT64 => need(8),
        TAG_INT32 => need(4),
        TAG_BOOL => need(1),
        TAG_NULL | TAG_UNDEFINED | TAG_MIN_KEY | TAG_MAX_KEY => Ok(0),
        TAG_OBJECT_ID => need(12),
        TAG_DECIMAL128 => need(16),
        TAG_STRING | TAG_SYMBOL | TAG_CODE => {
            need(4)?;
            let n = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
            if n < 1 {
                return Err(Error::corrupted("string length must include the NUL"));
            }
            need(4 + n as usize)
        }
        TAG_DOCUMENT | TAG_ARRAY | TAG_CODE_W_SCOPE => {
            need(4)?;
            let n = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
            if n < 5 {
                return Err(Error::corrupted("embedded document length too small"));
            }
            need(n as usize)
        }
        TAG_BINARY => {
            need(5)?;
            let n = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
            if n < 0 {
                return Err(Error::corrupted("negative binary length"));
            }
            need(5 + n as usize)
        }
        TAG_REGEX => {
            let first = bytes
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| Error::corrupted("unterminated regex pattern"))?;
            let second = bytes[first + 1..]
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| Error::corrupted("unterminated regex options"))?;
            Ok(first + 1 + second + 1)
        }
        TAG_DB_POINTER => {
            need(4)?;
            let n = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
            if n < 1 {
                return Err(Error::corrupted("bad dbpointer length"));
            }
            need(4 + n as usize + 12)
        }
        other => Err(Error::corrupted(format!("unknown BSON element tag {other:#04x}"))),
    }
}

/// Decode a single raw element into an owned value. Used for scan-key and
/// `_id` extraction; full document decoding goes through the bson codec.
pub fn element_to_bson(tag: u8, value: &[u8]) -> Result<Bson> {
    Ok(match tag {
        TAG_DOUBLE => Bson::Double(f64::from_le_bytes(value.try_into().map_err(bad_len)?)),
        TAG_INT32 => Bson::Int32(i32::from_le_bytes(value.try_into().map_err(bad_len)?)),
        TAG_INT64 => Bson::Int64(i64::from_le_bytes(value.try_into().map_err(bad_len)?)),
        TAG_BOOL => Bson::Boolean(value.first().copied().unwrap_or(0) != 0),
        TAG_NULL => Bson::Null,
        TAG_MIN_KEY => Bson::MinKey,
        TAG_MAX_KEY => Bson::MaxKey,
        TAG_DATETIME => Bson::DateTime(bson::DateTime::from_millis(i64::from_le_bytes(
            value.try_into().map_err(bad_len)?,
        ))),
        TAG_TIMESTAMP => {
            let raw = u64::from_le_bytes(value.try_into().map_err(bad_len)?);
            Bson::Timestamp(bson::Timestamp {
                increment: (raw & 0xFFFF_FFFF) as u32,
                time: (raw >> 32) as u32,
            })
        }
        TAG_OBJECT_ID => {
            let bytes: [u8; 12] = value.try_into().map_err(bad_len)?;
            Bson::ObjectId(bson::oid::ObjectId::from_bytes(bytes))
        }
        TAG_DECIMAL128 => {
            let bytes: [u8; 16] = value.try_into().map_err(bad_len)?;
            Bson::Decimal128(bson::Decimal128::from_bytes(bytes))
        }
        TAG_STRING => Bson::String(string_from_value(value)?),
        TAG_DOCUMENT => {
            Bson::Document(bson::Document::from_reader(&mut std::io::Cursor::new(value))?)
        }
        TAG_ARRAY => {
            let doc = bson::Document::from_reader(&mut std::io::Cursor::new(value))?;
            Bson::Array(doc.into_iter().map(|(_, v)| v).collect())
        }
        TAG_BINARY => {
            if value.len() < 5 {
                return Err(Error::corrupted("binary element truncated"));
            }
            Bson::Binary(bson::Binary {
                subtype: value[4].into(),
                bytes: value[5..].to_vec(),
            })
        }
        other => {
            return Err(Error::Unsupported(format!(
                "cannot extract a value from element tag {other:#04x}"
            )));
        }
    })
}

/// UTF-8 payload of a BSON string value span (length prefix and trailing NUL
/// stripped), without copying.
pub fn string_bytes(value: &[u8]) -> Result<&[u8]> {
    if value.len() < 5 {
        return Err(Error::corrupted("string element truncated"));
    }
    let n = i32::from_le_bytes(value[0..4].try_into().unwrap());
    if n < 1 || 4 + n as usize != value.len() {
        return Err(Error::corrupted("string element length mismatch"));
    }
    Ok(&value[4..value.len() - 1])
}

fn string_from_value(value: &[u8]) -> Result<String> {
    let bytes = string_bytes(value)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| Error::corrupted("string element is not UTF-8"))
}

fn bad_len<E>(_: E) -> Error {
    Error::corrupted("fixed-width element has wrong length")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn to_bytes(doc: &bson::Document) -> Vec<u8> {
        let mut out = Vec::new();
        doc.to_writer(&mut out).unwrap();
        out
    }

    #[test]
    fn iterates_keys_in_order() {
        let bytes = to_bytes(&doc! { "a": 1, "b": "two", "c": 3.0_f64 });
        let raw = RawDocument::new(&bytes).unwrap();
        let keys: Vec<&[u8]> = raw.iter().map(|e| e.unwrap().key).collect();
        assert_eq!(keys, vec![b"a".as_ref(), b"b".as_ref(), b"c".as_ref()]);
    }

    #[test]
    fn get_finds_value_span() {
        let bytes = to_bytes(&doc! { "n": 42, "s": "hi" });
        let raw = RawDocument::new(&bytes).unwrap();
        let el = raw.get(b"n").unwrap().unwrap();
        assert_eq!(el.tag, TAG_INT32);
        assert_eq!(element_to_bson(el.tag, el.value).unwrap(), Bson::Int32(42));
        let el = raw.get(b"s").unwrap().unwrap();
        assert_eq!(string_bytes(el.value).unwrap(), b"hi");
    }

    #[test]
    fn skips_every_value_type() {
        let bytes = to_bytes(&doc! {
            "d": 1.5_f64,
            "s": "str",
            "doc": { "inner": 1 },
            "arr": [1, 2, 3],
            "bin": bson::Binary { subtype: bson::spec::BinarySubtype::Generic, bytes: vec![1, 2] },
            "oid": bson::oid::ObjectId::from_bytes([5; 12]),
            "b": true,
            "dt": bson::DateTime::from_millis(1_000),
            "nil": Bson::Null,
            "i32": 7_i32,
            "ts": Bson::Timestamp(bson::Timestamp { time: 1, increment: 2 }),
            "i64": 7_i64,
            "last": "end"
        });
        let raw = RawDocument::new(&bytes).unwrap();
        let el = raw.get(b"last").unwrap().unwrap();
        assert_eq!(string_bytes(el.value).unwrap(), b"end");
    }

    #[test]
    fn projection_keeps_only_requested_keys() {
        let bytes = to_bytes(&doc! { "a": 1, "b": 2, "c": 3 });
        let raw = RawDocument::new(&bytes).unwrap();
        let projected = raw.project(&[b"a".as_ref(), b"c".as_ref()]).unwrap();
        let doc = bson::Document::from_reader(&mut std::io::Cursor::new(&projected)).unwrap();
        assert_eq!(doc, doc! { "a": 1, "c": 3 });
    }

    #[test]
    fn length_mismatch_is_corruption() {
        let mut bytes = to_bytes(&doc! { "a": 1 });
        bytes[0] = bytes[0].wrapping_add(1);
        assert!(RawDocument::new(&bytes).is_err());
    }

    #[test]
    fn decimal128_is_fixed_width() {
        let dec: bson::Decimal128 = "1.5".parse().unwrap();
        let bytes = to_bytes(&doc! { "d": dec, "after": 1 });
        let raw = RawDocument::new(&bytes).unwrap();
        let el = raw.get(b"d").unwrap().unwrap();
        assert_eq!(el.value.len(), 16);
        assert!(raw.get(b"after").unwrap().is_some());
    }
}
