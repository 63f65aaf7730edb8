use std::cmp::Ordering;

use bson::Bson;

use crate::raw::reader::{
    TAG_BOOL, TAG_DATETIME, TAG_DECIMAL128, TAG_DOUBLE, TAG_INT32, TAG_INT64, TAG_NULL,
    TAG_OBJECT_ID, TAG_STRING, TAG_TIMESTAMP, string_bytes,
};

/// Comparison operators the pushdown path understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn holds(self, ord: Ordering) -> bool {
        match self {
            Self::Eq => ord == Ordering::Equal,
            Self::Ne => ord != Ordering::Equal,
            Self::Gt => ord == Ordering::Greater,
            Self::Ge => ord != Ordering::Less,
            Self::Lt => ord == Ordering::Less,
            Self::Le => ord != Ordering::Greater,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i128),
    Float(f64),
}

fn target_num(target: &Bson) -> Option<Num> {
    match target {
        Bson::Int32(v) => Some(Num::Int(i128::from(*v))),
        Bson::Int64(v) => Some(Num::Int(i128::from(*v))),
        Bson::Double(v) => Some(Num::Float(*v)),
        Bson::Decimal128(d) => d.to_string().parse::<f64>().ok().map(Num::Float),
        _ => None,
    }
}

#[allow(clippy::cast_precision_loss)]
fn compare_nums(a: Num, b: Num) -> Option<Ordering> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
        (Num::Int(x), Num::Float(y)) => (x as f64).partial_cmp(&y),
        (Num::Float(x), Num::Int(y)) => x.partial_cmp(&(y as f64)),
        (Num::Float(x), Num::Float(y)) => x.partial_cmp(&y),
    }
}

/// Evaluate `field <op> target` directly on the field's raw value bytes.
///
/// Returns `Some(result)` iff the comparison is defined for this
/// `(field type, op, target)` triple; `None` sends the caller to the
/// document evaluator. All six operators are defined for the numeric types,
/// DateTime, Timestamp and ObjectId; Boolean and String support Eq/Ne; Null
/// follows SQL-ish semantics (null equals only null, null sorts below any
/// non-null value).
pub fn try_evaluate(
    tag: u8,
    value: &[u8],
    op: CompareOp,
    target: &Bson,
    target_utf8: Option<&[u8]>,
) -> Option<bool> {
    match tag {
        TAG_INT32 => {
            let field = i32::from_le_bytes(value.try_into().ok()?);
            let ord = compare_nums(Num::Int(i128::from(field)), target_num(target)?)?;
            Some(op.holds(ord))
        }
        TAG_INT64 => {
            let field = i64::from_le_bytes(value.try_into().ok()?);
            let ord = compare_nums(Num::Int(i128::from(field)), target_num(target)?)?;
            Some(op.holds(ord))
        }
        TAG_DOUBLE => {
            let field = f64::from_le_bytes(value.try_into().ok()?);
            let ord = compare_nums(Num::Float(field), target_num(target)?)?;
            Some(op.holds(ord))
        }
        TAG_DECIMAL128 => {
            let bytes: [u8; 16] = value.try_into().ok()?;
            let field = bson::Decimal128::from_bytes(bytes).to_string().parse::<f64>().ok()?;
            let ord = compare_nums(Num::Float(field), target_num(target)?)?;
            Some(op.holds(ord))
        }
        TAG_DATETIME => {
            let Bson::DateTime(t) = target else { return None };
            let field = i64::from_le_bytes(value.try_into().ok()?);
            Some(op.holds(field.cmp(&t.timestamp_millis())))
        }
        TAG_TIMESTAMP => {
            let Bson::Timestamp(t) = target else { return None };
            let field = u64::from_le_bytes(value.try_into().ok()?);
            let target_raw = (u64::from(t.time) << 32) | u64::from(t.increment);
            Some(op.holds(field.cmp(&target_raw)))
        }
        TAG_OBJECT_ID => {
            let Bson::ObjectId(oid) = target else { return None };
            Some(op.holds(value.cmp(oid.bytes().as_slice())))
        }
        TAG_BOOL => {
            let Bson::Boolean(b) = target else { return None };
            if !matches!(op, CompareOp::Eq | CompareOp::Ne) {
                return None;
            }
            let field = value.first().copied()? != 0;
            Some(op.holds(field.cmp(b)))
        }
        TAG_STRING => {
            let target_bytes = match (target_utf8, target) {
                (Some(b), _) => b,
                (None, Bson::String(s)) => s.as_bytes(),
                _ => return None,
            };
            if !matches!(op, CompareOp::Eq | CompareOp::Ne) {
                return None;
            }
            let field = string_bytes(value).ok()?;
            Some(op.holds(field.cmp(target_bytes)))
        }
        TAG_NULL => {
            let target_is_null = matches!(target, Bson::Null);
            Some(match op {
                CompareOp::Eq => target_is_null,
                CompareOp::Ne => !target_is_null,
                CompareOp::Ge => target_is_null,
                CompareOp::Le => true,
                CompareOp::Lt => !target_is_null,
                CompareOp::Gt => false,
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int32(v: i32) -> Vec<u8> {
        v.to_le_bytes().to_vec()
    }

    #[test]
    fn int_comparisons() {
        let v = int32(42);
        assert_eq!(try_evaluate(TAG_INT32, &v, CompareOp::Eq, &Bson::Int32(42), None), Some(true));
        assert_eq!(try_evaluate(TAG_INT32, &v, CompareOp::Gt, &Bson::Int64(41), None), Some(true));
        assert_eq!(
            try_evaluate(TAG_INT32, &v, CompareOp::Lt, &Bson::Double(42.5), None),
            Some(true)
        );
        assert_eq!(try_evaluate(TAG_INT32, &v, CompareOp::Ne, &Bson::Int32(42), None), Some(false));
    }

    #[test]
    fn cross_width_int_compare_is_exact() {
        let big = (1i64 << 60).to_le_bytes().to_vec();
        assert_eq!(
            try_evaluate(TAG_INT64, &big, CompareOp::Gt, &Bson::Int64((1 << 60) - 1), None),
            Some(true)
        );
    }

    #[test]
    fn string_eq_without_allocation() {
        // "abc" as a BSON string value span: len=4, bytes, NUL.
        let mut v = 4i32.to_le_bytes().to_vec();
        v.extend_from_slice(b"abc\0");
        assert_eq!(
            try_evaluate(TAG_STRING, &v, CompareOp::Eq, &Bson::Null, Some(b"abc")),
            Some(true)
        );
        assert_eq!(
            try_evaluate(TAG_STRING, &v, CompareOp::Ne, &Bson::Null, Some(b"abd")),
            Some(true)
        );
        // Ordering on strings is not a binary-path concern.
        assert_eq!(try_evaluate(TAG_STRING, &v, CompareOp::Lt, &Bson::Null, Some(b"b")), None);
    }

    #[test]
    fn null_semantics() {
        assert_eq!(try_evaluate(TAG_NULL, &[], CompareOp::Eq, &Bson::Null, None), Some(true));
        assert_eq!(try_evaluate(TAG_NULL, &[], CompareOp::Eq, &Bson::Int32(1), None), Some(false));
        assert_eq!(try_evaluate(TAG_NULL, &[], CompareOp::Le, &Bson::Int32(1), None), Some(true));
        assert_eq!(try_evaluate(TAG_NULL, &[], CompareOp::Lt, &Bson::Int32(1), None), Some(true));
        assert_eq!(try_evaluate(TAG_NULL, &[], CompareOp::Lt, &Bson::Null, None), Some(false));
        assert_eq!(try_evaluate(TAG_NULL, &[], CompareOp::Gt, &Bson::Int32(1), None), Some(false));
        assert_eq!(try_evaluate(TAG_NULL, &[], CompareOp::Ge, &Bson::Null, None), Some(true));
    }

    #[test]
    fn mismatched_types_are_indeterminate() {
        let v = int32(1);
        assert_eq!(try_evaluate(TAG_INT32, &v, CompareOp::Eq, &Bson::String("1".into()), None), None);
    }

    #[test]
    fn objectid_orders_lexicographically() {
        let a = [1u8; 12];
        let b = bson::oid::ObjectId::from_bytes([2u8; 12]);
        assert_eq!(
            try_evaluate(TAG_OBJECT_ID, &a, CompareOp::Lt, &Bson::ObjectId(b), None),
            Some(true)
        );
    }
}
