use bson::Bson;

use crate::index::store::IndexDescriptor;
use crate::query::expr::{BinaryOp, Expr, member_key_candidates};
use crate::raw::compare::CompareOp;

/// How the executor will satisfy a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    FullTableScan,
    IndexScan,
    IndexSeek,
    PrimaryKeyLookup,
}

/// One `field <op> constant` extracted for an index or the primary key,
/// with `field` already resolved to the index's document key.
#[derive(Debug, Clone)]
pub struct ScanKey {
    pub field: String,
    pub op: CompareOp,
    pub value: Bson,
}

/// The optimizer's output: strategy plus everything the executor needs.
/// The full IR rides along as the residual predicate.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub collection: String,
    pub ir: Option<Expr>,
    pub strategy: Strategy,
    pub use_index: Option<String>,
    pub scan_keys: Vec<ScanKey>,
    /// Original predicate text, kept for the executor's fallback re-parse.
    pub source: Option<String>,
}

impl ExecutionPlan {
    fn full_scan(collection: &str, ir: Option<Expr>, source: Option<String>) -> Self {
        Self {
            collection: collection.to_string(),
            ir,
            strategy: Strategy::FullTableScan,
            use_index: None,
            scan_keys: Vec::new(),
            source,
        }
    }
}

fn compare_op(op: BinaryOp) -> Option<CompareOp> {
    Some(match op {
        BinaryOp::Eq => CompareOp::Eq,
        BinaryOp::Ne => CompareOp::Ne,
        BinaryOp::Gt => CompareOp::Gt,
        BinaryOp::Ge => CompareOp::Ge,
        BinaryOp::Lt => CompareOp::Lt,
        BinaryOp::Le => CompareOp::Le,
        _ => return None,
    })
}

/// Flatten the AND spine: `a && (b && c)` yields `[a, b, c]`. Anything
/// under an OR or NOT stays nested and is invisible to index selection.
pub fn root_conjuncts(expr: &Expr) -> Vec<&Expr> {
    let mut out = Vec::new();
    fn walk<'a>(e: &'a Expr, out: &mut Vec<&'a Expr>) {
        if let Expr::Binary { op: BinaryOp::AndAlso, left, right } = e {
            walk(left, out);
            walk(right, out);
        } else {
            out.push(e);
        }
    }
    walk(expr, &mut out);
    out
}

/// A root-level `member <op> constant` (either orientation), excluding
/// nested member paths.
pub fn as_member_cmp(expr: &Expr) -> Option<(&str, CompareOp, &Bson)> {
    let Expr::Binary { op, left, right } = expr else { return None };
    let op = compare_op(*op)?;
    match (left.as_ref(), right.as_ref()) {
        (Expr::Member { name, target: None }, Expr::Constant(v)) => Some((name, op, v)),
        (Expr::Constant(v), Expr::Member { name, target: None }) => {
            Some((name, flip(op), v))
        }
        _ => None,
    }
}

fn flip(op: CompareOp) -> CompareOp {
    match op {
        CompareOp::Gt => CompareOp::Lt,
        CompareOp::Ge => CompareOp::Le,
        CompareOp::Lt => CompareOp::Gt,
        CompareOp::Le => CompareOp::Ge,
        other => other,
    }
}

fn member_matches(member: &str, document_key: &str) -> bool {
    member_key_candidates(member).iter().any(|c| c == document_key)
}

/// Choose a strategy for `predicate` over `indexes`.
///
/// Scoring: 10 per prefix-matched index field, +5 when unique, +2 per
/// matched field; an unmatched prefix position stops the scan (prefix
/// rule). Ties break toward the smaller index.
pub fn plan(
    collection: &str,
    indexes: &[IndexDescriptor],
    ir: Option<Expr>,
    source: Option<String>,
) -> ExecutionPlan {
    let Some(ir) = ir else {
        return ExecutionPlan::full_scan(collection, None, source);
    };

    let conjuncts = root_conjuncts(&ir);

    // `_id == const` anywhere in the AND spine short-circuits to a
    // primary-key lookup.
    for c in &conjuncts {
        if let Some((member, CompareOp::Eq, value)) = as_member_cmp(c)
            && member_matches(member, "_id")
        {
            return ExecutionPlan {
                collection: collection.to_string(),
                strategy: Strategy::PrimaryKeyLookup,
                use_index: None,
                scan_keys: vec![ScanKey {
                    field: "_id".into(),
                    op: CompareOp::Eq,
                    value: value.clone(),
                }],
                ir: Some(ir),
                source,
            };
        }
    }

    // Ordered (member, op, value) triples usable for seeks and ranges.
    let mut query_fields: Vec<(&str, CompareOp, &Bson)> = Vec::new();
    for c in &conjuncts {
        if let Some((member, op, value)) = as_member_cmp(c)
            && op != CompareOp::Ne
        {
            query_fields.push((member, op, value));
        }
    }
    if query_fields.is_empty() {
        return ExecutionPlan::full_scan(collection, Some(ir), source);
    }

    let mut best: Option<(i64, &IndexDescriptor, usize)> = None;
    for index in indexes {
        let mut matched = 0usize;
        for field in &index.fields {
            if query_fields.iter().any(|(m, _, _)| member_matches(m, field)) {
                matched += 1;
            } else {
                break;
            }
        }
        if matched == 0 {
            continue;
        }
        let mut score = 10 * matched as i64 + 2 * matched as i64;
        if index.unique {
            score += 5;
        }
        let better = match &best {
            None => true,
            Some((best_score, best_index, _)) => {
                score > *best_score
                    || (score == *best_score && index.entry_count < best_index.entry_count)
            }
        };
        if better {
            best = Some((score, index, matched));
        }
    }

    let Some((_, index, matched)) = best else {
        return ExecutionPlan::full_scan(collection, Some(ir), source);
    };

    // Scan keys in index-field order, each taking the field's first
    // (op, value) from the IR.
    let mut scan_keys = Vec::with_capacity(matched);
    for field in index.fields.iter().take(matched) {
        if let Some((_, op, value)) =
            query_fields.iter().find(|(m, _, _)| member_matches(m, field))
        {
            scan_keys.push(ScanKey { field: field.clone(), op: *op, value: (*value).clone() });
        }
    }

    let strategy = if index.unique
        && scan_keys.len() == index.fields.len()
        && scan_keys.iter().all(|k| k.op == CompareOp::Eq)
    {
        Strategy::IndexSeek
    } else {
        Strategy::IndexScan
    };

    ExecutionPlan {
        collection: collection.to_string(),
        strategy,
        use_index: Some(index.name.clone()),
        scan_keys,
        ir: Some(ir),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse::parse;

    fn index(name: &str, fields: &[&str], unique: bool, entries: u64) -> IndexDescriptor {
        IndexDescriptor {
            name: name.to_string(),
            fields: fields.iter().map(|f| (*f).to_string()).collect(),
            unique,
            root_page: 0,
            entry_count: entries,
        }
    }

    #[test]
    fn no_predicate_scans() {
        let p = plan("users", &[], None, None);
        assert_eq!(p.strategy, Strategy::FullTableScan);
    }

    #[test]
    fn id_equality_is_pk_lookup() {
        let ir = parse("_id == 'u2'").unwrap();
        let p = plan("users", &[], Some(ir), None);
        assert_eq!(p.strategy, Strategy::PrimaryKeyLookup);
        assert_eq!(p.scan_keys.len(), 1);
        assert_eq!(p.scan_keys[0].field, "_id");

        let ir = parse("Id == 5 && age > 3").unwrap();
        let p = plan("users", &[], Some(ir), None);
        assert_eq!(p.strategy, Strategy::PrimaryKeyLookup);
    }

    #[test]
    fn prefix_match_picks_composite_index() {
        let ix = vec![index("ix_a_b", &["a", "b"], false, 100), index("ix_b", &["b"], false, 100)];
        let ir = parse("a == 3 && b >= 30 && b < 60").unwrap();
        let p = plan("t", &ix, Some(ir), None);
        assert_eq!(p.strategy, Strategy::IndexScan);
        assert_eq!(p.use_index.as_deref(), Some("ix_a_b"));
        assert_eq!(p.scan_keys.len(), 2);
        assert_eq!(p.scan_keys[0].op, CompareOp::Eq);
        assert_eq!(p.scan_keys[1].op, CompareOp::Ge);
    }

    #[test]
    fn unique_full_equality_is_seek() {
        let ix = vec![index("ix_email", &["email"], true, 10)];
        let ir = parse("email == 'a@x'").unwrap();
        let p = plan("t", &ix, Some(ir), None);
        assert_eq!(p.strategy, Strategy::IndexSeek);
    }

    #[test]
    fn unmatched_prefix_stops_scoring() {
        let ix = vec![index("ix_a_b", &["a", "b"], false, 100)];
        let ir = parse("b == 1").unwrap();
        let p = plan("t", &ix, Some(ir), None);
        assert_eq!(p.strategy, Strategy::FullTableScan);
    }

    #[test]
    fn ties_break_on_smaller_index() {
        let ix = vec![index("big", &["a"], false, 1000), index("small", &["a"], false, 10)];
        let ir = parse("a == 1").unwrap();
        let p = plan("t", &ix, Some(ir), None);
        assert_eq!(p.use_index.as_deref(), Some("small"));
    }

    #[test]
    fn or_predicates_do_not_use_indexes() {
        let ix = vec![index("ix_a", &["a"], false, 10)];
        let ir = parse("a == 1 || a == 2").unwrap();
        let p = plan("t", &ix, Some(ir), None);
        assert_eq!(p.strategy, Strategy::FullTableScan);
    }

    #[test]
    fn flipped_constant_side_normalizes() {
        let ir = parse("30 <= b").unwrap();
        let ix = vec![index("ix_b", &["b"], false, 10)];
        let p = plan("t", &ix, Some(ir), None);
        assert_eq!(p.strategy, Strategy::IndexScan);
        assert_eq!(p.scan_keys[0].op, CompareOp::Ge);
    }
}
