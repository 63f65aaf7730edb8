use std::cmp::Ordering;

use bson::{Bson, Document};
use chrono::{Datelike, TimeZone, Timelike, Utc};

use crate::errors::{Error, Result};
use crate::index::key::compare_values;
use crate::query::expr::{BinaryOp, Expr, TypeName, UnaryOp, member_key_candidates};

/// Interpret a predicate IR against a document. Anything that does not
/// evaluate to boolean true rejects the row.
pub fn evaluate(expr: &Expr, row: &Document) -> Result<bool> {
    Ok(matches!(evaluate_value(expr, Some(row))?, Some(Bson::Boolean(true))))
}

/// Evaluate a parameter-free subtree; used for constant folding.
pub fn evaluate_const(expr: &Expr) -> Result<Option<Bson>> {
    evaluate_value(expr, None)
}

/// Interpret the IR, producing the underlying value. `None` stands for
/// null or missing; a failed conversion also collapses to `None`, which
/// makes the enclosing comparison false.
pub fn evaluate_value(expr: &Expr, row: Option<&Document>) -> Result<Option<Bson>> {
    match expr {
        Expr::Constant(Bson::Null) => Ok(None),
        Expr::Constant(v) => Ok(Some(v.clone())),
        Expr::Parameter(_) => match row {
            Some(doc) => Ok(Some(Bson::Document(doc.clone()))),
            None => Err(Error::Unsupported("row parameter outside a row context".into())),
        },
        Expr::Member { name, target: None } => {
            let Some(doc) = row else {
                return Err(Error::Unsupported("row member outside a row context".into()));
            };
            for key in member_key_candidates(name) {
                match doc.get(&key) {
                    Some(Bson::Null) => return Ok(None),
                    Some(v) => return Ok(Some(v.clone())),
                    None => {}
                }
            }
            Ok(None)
        }
        Expr::Member { name, target: Some(target) } => {
            let Some(value) = evaluate_value(target, row)? else { return Ok(None) };
            member_of(&value, name)
        }
        Expr::Unary { op, operand, result_type } => {
            let value = evaluate_value(operand, row)?;
            match op {
                UnaryOp::Not => Ok(Some(Bson::Boolean(!truthy(value.as_ref())))),
                UnaryOp::Negate => Ok(match value {
                    Some(Bson::Int32(v)) => v.checked_neg().map(Bson::Int32),
                    Some(Bson::Int64(v)) => v.checked_neg().map(Bson::Int64),
                    Some(Bson::Double(v)) => Some(Bson::Double(-v)),
                    _ => None,
                }),
                UnaryOp::ArrayLength => Ok(match value {
                    Some(Bson::Array(a)) => i32::try_from(a.len()).ok().map(Bson::Int32),
                    _ => None,
                }),
                UnaryOp::Convert => {
                    let Some(to) = result_type else {
                        return Err(Error::Unsupported("convert without a target type".into()));
                    };
                    Ok(value.and_then(|v| convert(&v, *to)))
                }
            }
        }
        Expr::Binary { op, left, right } => match op {
            BinaryOp::AndAlso => {
                if !truthy(evaluate_value(left, row)?.as_ref()) {
                    return Ok(Some(Bson::Boolean(false)));
                }
                Ok(Some(Bson::Boolean(truthy(evaluate_value(right, row)?.as_ref()))))
            }
            BinaryOp::OrElse => {
                if truthy(evaluate_value(left, row)?.as_ref()) {
                    return Ok(Some(Bson::Boolean(true)));
                }
                Ok(Some(Bson::Boolean(truthy(evaluate_value(right, row)?.as_ref()))))
            }
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Lt
            | BinaryOp::Le => {
                let a = evaluate_value(left, row)?;
                let b = evaluate_value(right, row)?;
                let ord = compare_nullable(a.as_ref(), b.as_ref());
                let holds = match op {
                    BinaryOp::Eq => ord == Ordering::Equal,
                    BinaryOp::Ne => ord != Ordering::Equal,
                    BinaryOp::Gt => ord == Ordering::Greater,
                    BinaryOp::Ge => ord != Ordering::Less,
                    BinaryOp::Lt => ord == Ordering::Less,
                    BinaryOp::Le => ord != Ordering::Greater,
                    _ => unreachable!(),
                };
                Ok(Some(Bson::Boolean(holds)))
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
                let a = evaluate_value(left, row)?;
                let b = evaluate_value(right, row)?;
                Ok(arithmetic(*op, a, b))
            }
        },
        Expr::Function { name, target, args } => {
            let receiver = match target {
                Some(t) => Some(evaluate_value(t, row)?),
                None => None,
            };
            let mut arg_values = Vec::with_capacity(args.len());
            for a in args {
                arg_values.push(evaluate_value(a, row)?);
            }
            dispatch(name, receiver, &arg_values)
        }
        Expr::Constructor { type_name, args } => {
            let mut arg_values = Vec::with_capacity(args.len());
            for a in args {
                arg_values.push(evaluate_value(a, row)?);
            }
            construct(type_name, &arg_values)
        }
        Expr::MemberInit { bindings, .. } => {
            let mut doc = Document::new();
            for (key, value_expr) in bindings {
                doc.insert(key.clone(), evaluate_value(value_expr, row)?.unwrap_or(Bson::Null));
            }
            Ok(Some(Bson::Document(doc)))
        }
        Expr::Conditional { test, if_true, if_false } => {
            if truthy(evaluate_value(test, row)?.as_ref()) {
                evaluate_value(if_true, row)
            } else {
                evaluate_value(if_false, row)
            }
        }
    }
}

fn truthy(v: Option<&Bson>) -> bool {
    matches!(v, Some(Bson::Boolean(true)))
}

/// Null sorts below every value; two nulls are equal. Non-null pairs follow
/// the cross-type ordering shared with the indexes.
pub fn compare_nullable(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => compare_values(x, y),
    }
}

fn member_of(value: &Bson, name: &str) -> Result<Option<Bson>> {
    Ok(match value {
        Bson::Document(doc) => {
            for key in member_key_candidates(name) {
                match doc.get(&key) {
                    Some(Bson::Null) => return Ok(None),
                    Some(v) => return Ok(Some(v.clone())),
                    None => {}
                }
            }
            None
        }
        Bson::String(s) if name == "Length" => i32::try_from(s.chars().count()).ok().map(Bson::Int32),
        Bson::Array(a) if name == "Length" || name == "Count" => {
            i32::try_from(a.len()).ok().map(Bson::Int32)
        }
        Bson::DateTime(dt) => datetime_property(*dt, name)?,
        _ => None,
    })
}

fn to_chrono(dt: bson::DateTime) -> Option<chrono::DateTime<Utc>> {
    Utc.timestamp_millis_opt(dt.timestamp_millis()).single()
}

fn from_chrono(dt: chrono::DateTime<Utc>) -> Bson {
    Bson::DateTime(bson::DateTime::from_millis(dt.timestamp_millis()))
}

fn datetime_property(dt: bson::DateTime, name: &str) -> Result<Option<Bson>> {
    let Some(t) = to_chrono(dt) else { return Ok(None) };
    Ok(match name {
        "Year" => Some(Bson::Int32(t.year())),
        "Month" => Some(Bson::Int32(t.month() as i32)),
        "Day" => Some(Bson::Int32(t.day() as i32)),
        "Hour" => Some(Bson::Int32(t.hour() as i32)),
        "Minute" => Some(Bson::Int32(t.minute() as i32)),
        "Second" => Some(Bson::Int32(t.second() as i32)),
        "DayOfWeek" => Some(Bson::Int32(t.weekday().num_days_from_sunday() as i32)),
        _ => None,
    })
}

fn as_f64(v: &Bson) -> Option<f64> {
    match v {
        Bson::Int32(i) => Some(f64::from(*i)),
        Bson::Int64(i) => Some(*i as f64),
        Bson::Double(f) => Some(*f),
        Bson::Decimal128(d) => d.to_string().parse().ok(),
        _ => None,
    }
}

fn arithmetic(op: BinaryOp, a: Option<Bson>, b: Option<Bson>) -> Option<Bson> {
    let (a, b) = (a?, b?);
    if op == BinaryOp::Add
        && let (Bson::String(x), Bson::String(y)) = (&a, &b)
    {
        return Some(Bson::String(format!("{x}{y}")));
    }
    // Integer pairs stay integral; anything wider goes through f64.
    if let (Bson::Int32(x), Bson::Int32(y)) = (&a, &b) {
        let (x, y) = (*x, *y);
        return match op {
            BinaryOp::Add => x.checked_add(y).map(Bson::Int32),
            BinaryOp::Sub => x.checked_sub(y).map(Bson::Int32),
            BinaryOp::Mul => x.checked_mul(y).map(Bson::Int32),
            BinaryOp::Div => x.checked_div(y).map(Bson::Int32),
            _ => None,
        };
    }
    if let (Some(x), Some(y)) = (int_of(&a), int_of(&b)) {
        return match op {
            BinaryOp::Add => x.checked_add(y).map(Bson::Int64),
            BinaryOp::Sub => x.checked_sub(y).map(Bson::Int64),
            BinaryOp::Mul => x.checked_mul(y).map(Bson::Int64),
            BinaryOp::Div => x.checked_div(y).map(Bson::Int64),
            _ => None,
        };
    }
    let (x, y) = (as_f64(&a)?, as_f64(&b)?);
    let out = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        _ => return None,
    };
    out.is_finite().then_some(Bson::Double(out))
}

fn int_of(v: &Bson) -> Option<i64> {
    match v {
        Bson::Int32(i) => Some(i64::from(*i)),
        Bson::Int64(i) => Some(*i),
        _ => None,
    }
}

fn convert(v: &Bson, to: TypeName) -> Option<Bson> {
    match to {
        TypeName::Int32 => match v {
            Bson::Int32(i) => Some(Bson::Int32(*i)),
            Bson::Int64(i) => i32::try_from(*i).ok().map(Bson::Int32),
            Bson::Double(f) if f.is_finite() && (f64::from(i32::MIN)..=f64::from(i32::MAX)).contains(f) => {
                Some(Bson::Int32(*f as i32))
            }
            Bson::Decimal128(_) => as_f64(v).and_then(|f| convert(&Bson::Double(f), to)),
            Bson::String(s) => s.trim().parse().ok().map(Bson::Int32),
            Bson::Boolean(b) => Some(Bson::Int32(i32::from(*b))),
            _ => None,
        },
        TypeName::Int64 => match v {
            Bson::Int32(i) => Some(Bson::Int64(i64::from(*i))),
            Bson::Int64(i) => Some(Bson::Int64(*i)),
            Bson::Double(f) if f.is_finite() => Some(Bson::Int64(*f as i64)),
            Bson::Decimal128(_) => as_f64(v).map(|f| Bson::Int64(f as i64)),
            Bson::String(s) => s.trim().parse().ok().map(Bson::Int64),
            Bson::Boolean(b) => Some(Bson::Int64(i64::from(*b))),
            Bson::DateTime(t) => Some(Bson::Int64(t.timestamp_millis())),
            _ => None,
        },
        TypeName::Double => as_f64(v)
            .map(Bson::Double)
            .or_else(|| match v {
                Bson::String(s) => s.trim().parse().ok().map(Bson::Double),
                Bson::Boolean(b) => Some(Bson::Double(f64::from(u8::from(*b)))),
                _ => None,
            }),
        TypeName::Decimal => {
            let text = match v {
                Bson::Decimal128(d) => return Some(Bson::Decimal128(*d)),
                Bson::String(s) => s.trim().to_string(),
                other => as_f64(other)?.to_string(),
            };
            text.parse::<bson::Decimal128>().ok().map(Bson::Decimal128)
        }
        TypeName::String => Some(Bson::String(to_display_string(v))),
        TypeName::Bool => match v {
            Bson::Boolean(b) => Some(Bson::Boolean(*b)),
            Bson::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Some(Bson::Boolean(true)),
                "false" => Some(Bson::Boolean(false)),
                _ => None,
            },
            other => as_f64(other).map(|f| Bson::Boolean(f != 0.0)),
        },
        TypeName::DateTime => match v {
            Bson::DateTime(t) => Some(Bson::DateTime(*t)),
            Bson::Int64(ms) => Some(Bson::DateTime(bson::DateTime::from_millis(*ms))),
            Bson::String(s) => chrono::DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|t| from_chrono(t.with_timezone(&Utc))),
            _ => None,
        },
    }
}

fn to_display_string(v: &Bson) -> String {
    match v {
        Bson::String(s) => s.clone(),
        Bson::Int32(i) => i.to_string(),
        Bson::Int64(i) => i.to_string(),
        Bson::Double(f) => f.to_string(),
        Bson::Boolean(b) => b.to_string(),
        Bson::Decimal128(d) => d.to_string(),
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::DateTime(t) => to_chrono(*t).map(|c| c.to_rfc3339()).unwrap_or_default(),
        other => format!("{other}"),
    }
}

fn expect_str(v: Option<&Option<Bson>>) -> Option<&str> {
    match v {
        Some(Some(Bson::String(s))) => Some(s),
        _ => None,
    }
}

fn expect_int(v: Option<&Option<Bson>>) -> Option<i64> {
    match v {
        Some(Some(b)) => int_of(b),
        _ => None,
    }
}

fn expect_f64(v: Option<&Option<Bson>>) -> Option<f64> {
    match v {
        Some(Some(b)) => as_f64(b),
        _ => None,
    }
}

/// Function dispatch by receiver type; unknown names raise `Unsupported`.
fn dispatch(name: &str, receiver: Option<Option<Bson>>, args: &[Option<Bson>]) -> Result<Option<Bson>> {
    // Statics first: no receiver at all.
    let Some(receiver) = receiver else {
        return static_function(name, args);
    };
    // Universal methods.
    if name == "ToString" {
        return Ok(receiver.map(|v| Bson::String(to_display_string(&v))));
    }
    let Some(receiver) = receiver else { return Ok(None) };
    match &receiver {
        Bson::String(s) => string_method(s, name, args),
        Bson::Array(a) => sequence_method(a, name, args),
        Bson::DateTime(dt) => datetime_method(*dt, name, args),
        _ => Err(Error::Unsupported(format!(
            "no method '{name}' on {:?}",
            receiver.element_type()
        ))),
    }
}

fn string_method(s: &str, name: &str, args: &[Option<Bson>]) -> Result<Option<Bson>> {
    Ok(match name {
        "Contains" => expect_str(args.first()).map(|n| Bson::Boolean(s.contains(n))),
        "StartsWith" => expect_str(args.first()).map(|n| Bson::Boolean(s.starts_with(n))),
        "EndsWith" => expect_str(args.first()).map(|n| Bson::Boolean(s.ends_with(n))),
        "ToLower" => Some(Bson::String(s.to_lowercase())),
        "ToUpper" => Some(Bson::String(s.to_uppercase())),
        "Trim" => Some(Bson::String(s.trim().to_string())),
        "Length" => i32::try_from(s.chars().count()).ok().map(Bson::Int32),
        "Substring" => {
            let Some(start) = expect_int(args.first()).and_then(|i| usize::try_from(i).ok())
            else {
                return Ok(None);
            };
            let chars: Vec<char> = s.chars().collect();
            if start > chars.len() {
                return Ok(None);
            }
            let taken: String = match expect_int(args.get(1)) {
                Some(len) if len >= 0 => chars[start..].iter().take(len as usize).collect(),
                Some(_) => return Ok(None),
                None if args.len() > 1 => return Ok(None),
                None => chars[start..].iter().collect(),
            };
            Some(Bson::String(taken))
        }
        "Replace" => {
            let from = expect_str(args.first());
            let to = expect_str(args.get(1));
            match (from, to) {
                (Some(f), Some(t)) => Some(Bson::String(s.replace(f, t))),
                _ => None,
            }
        }
        other => return Err(Error::Unsupported(format!("no string method '{other}'"))),
    })
}

fn sequence_method(a: &[Bson], name: &str, args: &[Option<Bson>]) -> Result<Option<Bson>> {
    Ok(match name {
        "Contains" => match args.first() {
            Some(Some(needle)) => Some(Bson::Boolean(
                a.iter().any(|v| compare_values(v, needle) == Ordering::Equal),
            )),
            _ => Some(Bson::Boolean(false)),
        },
        "Count" => i32::try_from(a.len()).ok().map(Bson::Int32),
        other => return Err(Error::Unsupported(format!("no sequence method '{other}'"))),
    })
}

fn datetime_method(dt: bson::DateTime, name: &str, args: &[Option<Bson>]) -> Result<Option<Bson>> {
    if let Some(prop) = datetime_property(dt, name)? {
        return Ok(Some(prop));
    }
    let Some(t) = to_chrono(dt) else { return Ok(None) };
    Ok(match name {
        "AddDays" => expect_f64(args.first())
            .and_then(|n| chrono::Duration::try_milliseconds((n * 86_400_000.0) as i64))
            .and_then(|d| t.checked_add_signed(d))
            .map(from_chrono),
        "AddHours" => expect_f64(args.first())
            .and_then(|n| chrono::Duration::try_milliseconds((n * 3_600_000.0) as i64))
            .and_then(|d| t.checked_add_signed(d))
            .map(from_chrono),
        "AddMinutes" => expect_f64(args.first())
            .and_then(|n| chrono::Duration::try_milliseconds((n * 60_000.0) as i64))
            .and_then(|d| t.checked_add_signed(d))
            .map(from_chrono),
        "AddSeconds" => expect_f64(args.first())
            .and_then(|n| chrono::Duration::try_milliseconds((n * 1_000.0) as i64))
            .and_then(|d| t.checked_add_signed(d))
            .map(from_chrono),
        "AddMonths" => expect_int(args.first())
            .and_then(|n| u32::try_from(n.abs()).ok().map(|m| (n >= 0, chrono::Months::new(m))))
            .and_then(|(fwd, m)| {
                if fwd { t.checked_add_months(m) } else { t.checked_sub_months(m) }
            })
            .map(from_chrono),
        "AddYears" => expect_int(args.first())
            .and_then(|n| u32::try_from((n * 12).abs()).ok().map(|m| (n >= 0, chrono::Months::new(m))))
            .and_then(|(fwd, m)| {
                if fwd { t.checked_add_months(m) } else { t.checked_sub_months(m) }
            })
            .map(from_chrono),
        other => return Err(Error::Unsupported(format!("no datetime method '{other}'"))),
    })
}

fn static_function(name: &str, args: &[Option<Bson>]) -> Result<Option<Bson>> {
    Ok(match name {
        "now" => Some(Bson::DateTime(bson::DateTime::from_millis(Utc::now().timestamp_millis()))),
        "Abs" => match args.first() {
            Some(Some(Bson::Int32(v))) => v.checked_abs().map(Bson::Int32),
            Some(Some(Bson::Int64(v))) => v.checked_abs().map(Bson::Int64),
            Some(Some(Bson::Double(v))) => Some(Bson::Double(v.abs())),
            _ => None,
        },
        "Ceiling" => expect_f64(args.first()).map(|v| Bson::Double(v.ceil())),
        "Floor" => expect_f64(args.first()).map(|v| Bson::Double(v.floor())),
        "Round" => {
            let Some(v) = expect_f64(args.first()) else { return Ok(None) };
            match expect_int(args.get(1)) {
                Some(digits) => {
                    let factor = 10f64.powi(digits as i32);
                    Some(Bson::Double((v * factor).round() / factor))
                }
                None => Some(Bson::Double(v.round())),
            }
        }
        "Min" => {
            let (a, b) = (args.first(), args.get(1));
            match (a, b) {
                (Some(Some(x)), Some(Some(y))) => {
                    Some(if compare_values(x, y) == Ordering::Greater { y.clone() } else { x.clone() })
                }
                _ => None,
            }
        }
        "Max" => {
            let (a, b) = (args.first(), args.get(1));
            match (a, b) {
                (Some(Some(x)), Some(Some(y))) => {
                    Some(if compare_values(x, y) == Ordering::Less { y.clone() } else { x.clone() })
                }
                _ => None,
            }
        }
        "Pow" => {
            let (a, b) = (expect_f64(args.first()), expect_f64(args.get(1)));
            match (a, b) {
                (Some(x), Some(y)) => Some(Bson::Double(x.powf(y))),
                _ => None,
            }
        }
        "Sqrt" => expect_f64(args.first()).map(|v| Bson::Double(v.sqrt())),
        other => return Err(Error::Unsupported(format!("no function '{other}'"))),
    })
}

fn construct(type_name: &str, args: &[Option<Bson>]) -> Result<Option<Bson>> {
    match type_name {
        "DateTime" => {
            let y = expect_int(args.first()).unwrap_or(1970) as i32;
            let mo = expect_int(args.get(1)).unwrap_or(1) as u32;
            let d = expect_int(args.get(2)).unwrap_or(1) as u32;
            let h = expect_int(args.get(3)).unwrap_or(0) as u32;
            let mi = expect_int(args.get(4)).unwrap_or(0) as u32;
            let s = expect_int(args.get(5)).unwrap_or(0) as u32;
            Ok(Utc
                .with_ymd_and_hms(y, mo, d, h, mi, s)
                .single()
                .map(from_chrono))
        }
        other => Err(Error::Unsupported(format!("no constructor for '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expr::{field, val};
    use bson::doc;

    #[test]
    fn comparisons_coerce_numerics() {
        let row = doc! { "age": 30_i64, "score": 4.5_f64 };
        assert!(evaluate(&field("age").eq(30), &row).unwrap());
        assert!(evaluate(&field("age").ge(30.0_f64), &row).unwrap());
        assert!(evaluate(&field("score").lt(5), &row).unwrap());
        assert!(!evaluate(&field("score").gt(5), &row).unwrap());
    }

    #[test]
    fn null_comparisons() {
        let row = doc! { "a": Bson::Null, "b": 1 };
        assert!(evaluate(&field("a").eq(Bson::Null), &row).unwrap());
        assert!(evaluate(&field("missing").eq(Bson::Null), &row).unwrap());
        assert!(evaluate(&field("a").lt(0), &row).unwrap());
        assert!(!evaluate(&field("b").eq(Bson::Null), &row).unwrap());
    }

    #[test]
    fn short_circuit_logic() {
        let row = doc! { "x": 1 };
        // The right side would error (unknown function) but is never reached.
        let bad_right = Expr::Function { name: "Nope".into(), target: None, args: vec![] };
        let expr = field("x").eq(99).and(bad_right);
        assert!(!evaluate(&expr, &row).unwrap());
    }

    #[test]
    fn string_methods() {
        let row = doc! { "name": "Charlie" };
        assert!(evaluate(&field("name").method("StartsWith", vec![val("Cha")]), &row).unwrap());
        assert!(evaluate(&field("name").method("Contains", vec![val("arl")]), &row).unwrap());
        let lowered = field("name").method("ToLower", vec![]).eq("charlie");
        assert!(evaluate(&lowered, &row).unwrap());
        let len = field("name").member("Length").eq(7);
        assert!(evaluate(&len, &row).unwrap());
    }

    #[test]
    fn sequence_methods() {
        let row = doc! { "tags": ["a", "b"] };
        assert!(evaluate(&field("tags").method("Contains", vec![val("b")]), &row).unwrap());
        assert!(evaluate(&field("tags").method("Count", vec![]).eq(2), &row).unwrap());
    }

    #[test]
    fn datetime_methods() {
        let base = bson::DateTime::from_millis(0); // 1970-01-01T00:00:00Z
        let row = doc! { "at": base };
        assert!(evaluate(&field("at").member("Year").eq(1970), &row).unwrap());
        let next_day = field("at").method("AddDays", vec![val(1.0_f64)]);
        let expr = next_day.gt(Bson::DateTime(base));
        assert!(evaluate(&expr, &row).unwrap());
    }

    #[test]
    fn failed_conversion_rejects() {
        let row = doc! { "s": "not-a-number" };
        let expr = field("s").convert(TypeName::Int32).eq(3);
        assert!(!evaluate(&expr, &row).unwrap());
    }

    #[test]
    fn unknown_function_errors() {
        let row = doc! { "x": 1 };
        let expr = Expr::Function { name: "Bogus".into(), target: None, args: vec![] };
        assert!(matches!(evaluate(&expr, &row), Err(Error::Unsupported(_))));
    }

    #[test]
    fn byte_arrays_compare_by_length_then_bytes() {
        let row = doc! { "b": bson::Binary { subtype: bson::spec::BinarySubtype::Generic, bytes: vec![1, 2] } };
        let shorter = Bson::Binary(bson::Binary {
            subtype: bson::spec::BinarySubtype::Generic,
            bytes: vec![9],
        });
        assert!(evaluate(&field("b").gt(shorter), &row).unwrap());
    }
}
