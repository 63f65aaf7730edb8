use std::cmp::Ordering;

use bson::Bson;

use crate::errors::{Error, Result};

/// Cross-type rank used for index ordering and predicate comparison:
/// MinKey < Null < numeric < String < Document < Array < Binary < ObjectId <
/// Bool < DateTime < Timestamp < Regex < MaxKey.
fn type_rank(v: &Bson) -> u8 {
    match v {
        Bson::MinKey => 0,
        Bson::Null | Bson::Undefined => 1,
        Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
        Bson::String(_) | Bson::Symbol(_) => 3,
        Bson::Document(_) => 4,
        Bson::Array(_) => 5,
        Bson::Binary(_) => 6,
        Bson::ObjectId(_) => 7,
        Bson::Boolean(_) => 8,
        Bson::DateTime(_) => 9,
        Bson::Timestamp(_) => 10,
        Bson::RegularExpression(_) => 11,
        Bson::MaxKey => 12,
        // Remaining exotic types sort between Regex and MaxKey.
        _ => 13,
    }
}

fn as_f64(v: &Bson) -> f64 {
    match v {
        Bson::Int32(i) => f64::from(*i),
        Bson::Int64(i) => *i as f64,
        Bson::Double(f) => *f,
        Bson::Decimal128(d) => d.to_string().parse::<f64>().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

fn compare_numeric(a: &Bson, b: &Bson) -> Ordering {
    // Integer pairs compare exactly; anything involving a fraction widens.
    match (a, b) {
        (Bson::Int32(x), Bson::Int32(y)) => x.cmp(y),
        (Bson::Int64(x), Bson::Int64(y)) => x.cmp(y),
        (Bson::Int32(x), Bson::Int64(y)) => i64::from(*x).cmp(y),
        (Bson::Int64(x), Bson::Int32(y)) => x.cmp(&i64::from(*y)),
        _ => {
            let (x, y) = (as_f64(a), as_f64(b));
            // IEEE semantics where defined (so -0.0 == 0.0); the total
            // order only breaks ties NaN would otherwise leave unordered.
            x.partial_cmp(&y).unwrap_or_else(|| x.total_cmp(&y))
        }
    }
}

/// Total order over BSON values following the cross-type ranking; values of
/// the same rank compare by their natural ordering.
pub fn compare_values(a: &Bson, b: &Bson) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_), _) => {
            compare_numeric(a, b)
        }
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            x.timestamp_millis().cmp(&y.timestamp_millis())
        }
        (Bson::Timestamp(x), Bson::Timestamp(y)) => {
            (x.time, x.increment).cmp(&(y.time, y.increment))
        }
        (Bson::ObjectId(x), Bson::ObjectId(y)) => x.bytes().cmp(&y.bytes()),
        (Bson::Binary(x), Bson::Binary(y)) => {
            // Length first, then lexicographic.
            x.bytes.len().cmp(&y.bytes.len()).then_with(|| x.bytes.cmp(&y.bytes))
        }
        (Bson::Document(x), Bson::Document(y)) => {
            for ((ka, va), (kb, vb)) in x.iter().zip(y.iter()) {
                let ord = ka.cmp(kb).then_with(|| compare_values(va, vb));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Bson::Array(x), Bson::Array(y)) => {
            for (va, vb) in x.iter().zip(y.iter()) {
                let ord = compare_values(va, vb);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Bson::RegularExpression(x), Bson::RegularExpression(y)) => {
            x.pattern.cmp(&y.pattern).then_with(|| x.options.cmp(&y.options))
        }
        _ => Ordering::Equal,
    }
}

/// Composite index key: an ordered tuple of BSON values. Comparison is
/// lexicographic per value; a shorter key that is a prefix of a longer one
/// sorts first, which is what makes composite prefix scans work.
#[derive(Debug, Clone)]
pub struct IndexKey(pub Vec<Bson>);

impl IndexKey {
    pub fn single(v: Bson) -> Self {
        Self(vec![v])
    }

    /// Range sentinel below every key.
    pub fn min_value() -> Self {
        Self(vec![Bson::MinKey])
    }

    /// Range sentinel above every key.
    pub fn max_value() -> Self {
        Self(vec![Bson::MaxKey])
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            let ord = compare_values(a, b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

// Persistence tags. BSON element tags are reused where they exist.
const KEY_NULL: u8 = 0x0A;
const KEY_INT32: u8 = 0x10;
const KEY_INT64: u8 = 0x12;
const KEY_DOUBLE: u8 = 0x01;
const KEY_DECIMAL: u8 = 0x13;
const KEY_STRING: u8 = 0x02;
const KEY_DOCUMENT: u8 = 0x03;
const KEY_ARRAY: u8 = 0x04;
const KEY_BINARY: u8 = 0x05;
const KEY_OBJECT_ID: u8 = 0x07;
const KEY_BOOL: u8 = 0x08;
const KEY_DATETIME: u8 = 0x09;
const KEY_TIMESTAMP: u8 = 0x11;
const KEY_REGEX: u8 = 0x0B;
const KEY_MIN: u8 = 0xFE;
const KEY_MAX: u8 = 0xFD;

impl IndexKey {
    /// Fixed byte encoding used in Index pages.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.push(u8::try_from(self.0.len()).map_err(|_| {
            Error::InvalidArgument("index key has too many components".into())
        })?);
        for v in &self.0 {
            encode_value(v, &mut out)?;
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let count = *bytes.first().ok_or_else(|| Error::corrupted("empty index key"))?;
        pos += 1;
        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (v, used) = decode_value(&bytes[pos..])?;
            values.push(v);
            pos += used;
        }
        Ok(Self(values))
    }
}

fn encode_value(v: &Bson, out: &mut Vec<u8>) -> Result<()> {
    match v {
        Bson::Null => out.push(KEY_NULL),
        Bson::MinKey => out.push(KEY_MIN),
        Bson::MaxKey => out.push(KEY_MAX),
        Bson::Int32(i) => {
            out.push(KEY_INT32);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Bson::Int64(i) => {
            out.push(KEY_INT64);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Bson::Double(f) => {
            out.push(KEY_DOUBLE);
            out.extend_from_slice(&f.to_le_bytes());
        }
        Bson::Decimal128(d) => {
            out.push(KEY_DECIMAL);
            out.extend_from_slice(&d.bytes());
        }
        Bson::String(s) => {
            out.push(KEY_STRING);
            let bytes = s.as_bytes();
            let len = u16::try_from(bytes.len())
                .map_err(|_| Error::InvalidArgument("index key string too long".into()))?;
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(bytes);
        }
        Bson::Boolean(b) => {
            out.push(KEY_BOOL);
            out.push(u8::from(*b));
        }
        Bson::DateTime(t) => {
            out.push(KEY_DATETIME);
            out.extend_from_slice(&t.timestamp_millis().to_le_bytes());
        }
        Bson::Timestamp(t) => {
            out.push(KEY_TIMESTAMP);
            let raw = (u64::from(t.time) << 32) | u64::from(t.increment);
            out.extend_from_slice(&raw.to_le_bytes());
        }
        Bson::ObjectId(oid) => {
            out.push(KEY_OBJECT_ID);
            out.extend_from_slice(&oid.bytes());
        }
        Bson::Binary(b) => {
            out.push(KEY_BINARY);
            let len = u32::try_from(b.bytes.len())
                .map_err(|_| Error::InvalidArgument("index key binary too long".into()))?;
            out.extend_from_slice(&len.to_le_bytes());
            out.push(u8::from(b.subtype));
            out.extend_from_slice(&b.bytes);
        }
        Bson::Document(d) => {
            out.push(KEY_DOCUMENT);
            d.to_writer(&mut *out)?;
        }
        Bson::Array(a) => {
            out.push(KEY_ARRAY);
            let doc: bson::Document =
                a.iter().enumerate().map(|(i, v)| (i.to_string(), v.clone())).collect();
            doc.to_writer(&mut *out)?;
        }
        Bson::RegularExpression(r) => {
            out.push(KEY_REGEX);
            out.extend_from_slice(r.pattern.as_str().as_bytes());
            out.push(0);
            out.extend_from_slice(r.options.as_str().as_bytes());
            out.push(0);
        }
        other => {
            return Err(Error::InvalidArgument(format!(
                "value of type {:?} cannot be an index key",
                other.element_type()
            )));
        }
    }
    Ok(())
}

fn decode_value(bytes: &[u8]) -> Result<(Bson, usize)> {
    let tag = *bytes.first().ok_or_else(|| Error::corrupted("truncated index key"))?;
    let body = &bytes[1..];
    let need = |n: usize| -> Result<&[u8]> {
        body.get(..n).ok_or_else(|| Error::corrupted("truncated index key value"))
    };
    Ok(match tag {
        KEY_NULL => (Bson::Null, 1),
        KEY_MIN => (Bson::MinKey, 1),
        KEY_MAX => (Bson::MaxKey, 1),
        KEY_INT32 => (Bson::Int32(i32::from_le_bytes(need(4)?.try_into().unwrap())), 5),
        KEY_INT64 => (Bson::Int64(i64::from_le_bytes(need(8)?.try_into().unwrap())), 9),
        KEY_DOUBLE => (Bson::Double(f64::from_le_bytes(need(8)?.try_into().unwrap())), 9),
        KEY_DECIMAL => (
            Bson::Decimal128(bson::Decimal128::from_bytes(need(16)?.try_into().unwrap())),
            17,
        ),
        KEY_DATETIME => (
            Bson::DateTime(bson::DateTime::from_millis(i64::from_le_bytes(
                need(8)?.try_into().unwrap(),
            ))),
            9,
        ),
        KEY_TIMESTAMP => {
            let raw = u64::from_le_bytes(need(8)?.try_into().unwrap());
            (
                Bson::Timestamp(bson::Timestamp {
                    time: (raw >> 32) as u32,
                    increment: (raw & 0xFFFF_FFFF) as u32,
                }),
                9,
            )
        }
        KEY_OBJECT_ID => (
            Bson::ObjectId(bson::oid::ObjectId::from_bytes(need(12)?.try_into().unwrap())),
            13,
        ),
        KEY_BOOL => (Bson::Boolean(need(1)?[0] != 0), 2),
        KEY_STRING => {
            let len = u16::from_le_bytes(need(2)?.try_into().unwrap()) as usize;
            let raw = body.get(2..2 + len).ok_or_else(|| Error::corrupted("truncated key string"))?;
            let s = std::str::from_utf8(raw)
                .map_err(|_| Error::corrupted("index key string is not UTF-8"))?;
            (Bson::String(s.to_string()), 3 + len)
        }
        KEY_BINARY => {
            let len = u32::from_le_bytes(need(4)?.try_into().unwrap()) as usize;
            let subtype = *body.get(4).ok_or_else(|| Error::corrupted("truncated key binary"))?;
            let raw =
                body.get(5..5 + len).ok_or_else(|| Error::corrupted("truncated key binary"))?;
            (
                Bson::Binary(bson::Binary { subtype: subtype.into(), bytes: raw.to_vec() }),
                6 + len,
            )
        }
        KEY_DOCUMENT | KEY_ARRAY => {
            let declared = i32::from_le_bytes(need(4)?.try_into().unwrap());
            if declared < 5 {
                return Err(Error::corrupted("embedded key document too short"));
            }
            let raw = body
                .get(..declared as usize)
                .ok_or_else(|| Error::corrupted("truncated key document"))?;
            let doc = bson::Document::from_reader(&mut std::io::Cursor::new(raw))?;
            let value = if tag == KEY_DOCUMENT {
                Bson::Document(doc)
            } else {
                Bson::Array(doc.into_iter().map(|(_, v)| v).collect())
            };
            (value, 1 + declared as usize)
        }
        KEY_REGEX => {
            let first = body
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| Error::corrupted("unterminated key regex"))?;
            let second = body[first + 1..]
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| Error::corrupted("unterminated key regex options"))?;
            let pattern = std::str::from_utf8(&body[..first])
                .map_err(|_| Error::corrupted("key regex is not UTF-8"))?;
            let options = std::str::from_utf8(&body[first + 1..first + 1 + second])
                .map_err(|_| Error::corrupted("key regex options are not UTF-8"))?;
            (
                Bson::RegularExpression(bson::Regex {
                    pattern: bson::raw::CString::try_from(pattern.to_string())
                        .map_err(|_| Error::corrupted("key regex pattern contains NUL"))?,
                    options: bson::raw::CString::try_from(options.to_string())
                        .map_err(|_| Error::corrupted("key regex options contain NUL"))?,
                }),
                1 + first + 1 + second + 1,
            )
        }
        other => return Err(Error::corrupted(format!("unknown index key tag {other:#04x}"))),
    })
}
