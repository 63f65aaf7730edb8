use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bson::{Bson, Document};

use crate::collection::{Collection, RawScan};
use crate::errors::{Error, Result};
use crate::index::key::IndexKey;
use crate::query::eval;
use crate::query::expr::{Expr, member_key_candidates};
use crate::query::optimizer::{ExecutionPlan, ScanKey, Strategy, as_member_cmp, root_conjuncts};
use crate::query::parse;
use crate::raw::compare::{CompareOp, try_evaluate};
use crate::raw::reader::{RawDocument, TAG_NULL, element_to_bson};
use crate::storage::large_doc;
use crate::transaction::Overlay;

/// A pushed-down `field op constant`: candidate document keys (camelCase,
/// verbatim, `_id` for Id) plus the target value, with the UTF-8 bytes of a
/// string target precomputed so string equality never allocates.
#[derive(Debug, Clone)]
pub struct ScanPredicate {
    pub candidates: Vec<Vec<u8>>,
    pub op: CompareOp,
    pub value: Bson,
    pub target_utf8: Option<Vec<u8>>,
}

impl ScanPredicate {
    fn new(member: &str, op: CompareOp, value: &Bson) -> Self {
        let candidates =
            member_key_candidates(member).into_iter().map(String::into_bytes).collect();
        let target_utf8 = match value {
            Bson::String(s) => Some(s.as_bytes().to_vec()),
            _ => None,
        };
        Self { candidates, op, value: value.clone(), target_utf8 }
    }
}

/// Collect the flat conjunction of root-level `member op constant`
/// predicates. The second value is true when every root conjunct was
/// convertible, which lets the final filter skip rows the byte-level pass
/// already proved.
pub fn build_scan_predicates(ir: &Expr) -> (Vec<ScanPredicate>, bool) {
    let mut preds = Vec::new();
    let mut fully_pushed = true;
    for conjunct in root_conjuncts(ir) {
        match as_member_cmp(conjunct) {
            Some((member, op, value)) => preds.push(ScanPredicate::new(member, op, value)),
            None => fully_pushed = false,
        }
    }
    (preds, fully_pushed)
}

/// Half-open composite range for an index scan.
///
/// Equality prefixes land on both bounds; the first range operator closes
/// the prefix and the max side is padded with the MaxKey sentinel so that
/// longer keys sharing the prefix stay inside the range. Residual filtering
/// removes the false positives this loose upper bound admits.
pub fn scan_range(scan_keys: &[ScanKey]) -> (IndexKey, IndexKey, bool, bool) {
    let mut min = Vec::new();
    let mut max = Vec::new();
    let mut inc_min = true;
    let mut inc_max = true;
    let mut closed = false;
    for key in scan_keys {
        match key.op {
            CompareOp::Eq => {
                min.push(key.value.clone());
                max.push(key.value.clone());
            }
            CompareOp::Gt => {
                min.push(key.value.clone());
                inc_min = false;
                max.push(Bson::MaxKey);
                closed = true;
            }
            CompareOp::Ge => {
                min.push(key.value.clone());
                max.push(Bson::MaxKey);
                closed = true;
            }
            CompareOp::Lt => {
                max.push(key.value.clone());
                inc_max = false;
                max.push(Bson::MaxKey);
                closed = true;
            }
            CompareOp::Le => {
                max.push(key.value.clone());
                max.push(Bson::MaxKey);
                closed = true;
            }
            CompareOp::Ne => {}
        }
        if closed {
            break;
        }
    }
    if !closed {
        max.push(Bson::MaxKey);
    }
    (IndexKey(min), IndexKey(max), inc_min, inc_max)
}

/// Streaming result set; one transition per yielded document.
pub struct FindIter {
    inner: Box<dyn Iterator<Item = Result<Document>> + Send>,
}

impl Iterator for FindIter {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

fn id_key(doc: &Document) -> IndexKey {
    IndexKey::single(doc.get("_id").cloned().unwrap_or(Bson::Null))
}

/// Evaluate the residual IR, treating evaluation errors as a miss. Scans
/// never abort on a single bad row.
fn residual_accepts(ir: Option<&Expr>, doc: &Document) -> bool {
    match ir {
        None => true,
        Some(expr) => match eval::evaluate(expr, doc) {
            Ok(ok) => ok,
            Err(e) => {
                log::warn!("predicate evaluation failed, dropping row: {e}");
                false
            }
        },
    }
}

/// Execute a plan against a collection, merging the transaction overlay.
pub fn execute(
    collection: &Arc<Collection>,
    plan: &ExecutionPlan,
    overlay: Option<Overlay>,
    timeout: Option<Duration>,
) -> Result<FindIter> {
    // A predicate that never parsed reaches the executor as source text
    // only; the fallback re-parse surfaces `Unsupported` to the caller.
    let ir = match (&plan.ir, &plan.source) {
        (Some(ir), _) => Some(ir.clone()),
        (None, Some(source)) => Some(parse::parse(source)?),
        (None, None) => None,
    };
    let deadline = timeout.map(|t| Instant::now() + t);

    match plan.strategy {
        Strategy::PrimaryKeyLookup => {
            let docs = run_pk_lookup(collection, plan, ir.as_ref(), overlay)?;
            Ok(FindIter { inner: Box::new(docs.into_iter().map(Ok)) })
        }
        Strategy::IndexSeek | Strategy::IndexScan => {
            let docs = run_index(collection, plan, ir.as_ref(), overlay)?;
            Ok(FindIter { inner: Box::new(docs.into_iter().map(Ok)) })
        }
        Strategy::FullTableScan => {
            let (preds, fully_pushed) = match &ir {
                Some(expr) => build_scan_predicates(expr),
                None => (Vec::new(), true),
            };
            let scan = TableScan {
                collection: Arc::clone(collection),
                scan: collection.find_all_raw(),
                preds,
                fully_pushed,
                ir,
                overlay,
                seen: BTreeSet::new(),
                tail: None,
                deadline,
                done: false,
            };
            Ok(FindIter { inner: Box::new(scan) })
        }
    }
}

fn run_pk_lookup(
    collection: &Arc<Collection>,
    plan: &ExecutionPlan,
    ir: Option<&Expr>,
    overlay: Option<Overlay>,
) -> Result<Vec<Document>> {
    let Some(ScanKey { value, .. }) = plan.scan_keys.first() else {
        return Err(Error::Unsupported("primary-key plan without a scan key".into()));
    };
    let key = IndexKey::single(value.clone());
    if let Some(overlay) = &overlay
        && let Some(pending) = overlay.get(&key)
    {
        return Ok(match pending {
            None => Vec::new(),
            Some(doc) if residual_accepts(ir, doc) => vec![doc.clone()],
            Some(_) => Vec::new(),
        });
    }
    match collection.find_by_id(value)? {
        Some(doc) if residual_accepts(ir, &doc) => Ok(vec![doc]),
        _ => Ok(Vec::new()),
    }
}

fn run_index(
    collection: &Arc<Collection>,
    plan: &ExecutionPlan,
    ir: Option<&Expr>,
    overlay: Option<Overlay>,
) -> Result<Vec<Document>> {
    let Some(index_name) = &plan.use_index else {
        return Err(Error::Unsupported("index plan without an index".into()));
    };
    let doc_ids = if plan.strategy == Strategy::IndexSeek {
        let key = IndexKey(plan.scan_keys.iter().map(|k| k.value.clone()).collect());
        collection.index_find_exact(index_name, &key)?
    } else {
        let (min, max, inc_min, inc_max) = scan_range(&plan.scan_keys);
        collection.index_find_range(index_name, &min, &max, inc_min, inc_max)?
    };

    let mut out = Vec::new();
    let mut seen: BTreeSet<IndexKey> = BTreeSet::new();
    for doc_id in doc_ids {
        let Some(doc) = collection.get_document(doc_id)? else { continue };
        let key = id_key(&doc);
        if let Some(overlay) = &overlay
            && let Some(pending) = overlay.get(&key)
        {
            seen.insert(key);
            // Deleted in this transaction, or replaced: the overlay image
            // is re-filtered with the full IR.
            if let Some(pending_doc) = pending
                && residual_accepts(ir, pending_doc)
            {
                out.push(pending_doc.clone());
            }
            continue;
        }
        seen.insert(key);
        // The index admits false positives (loose max bound); the full
        // residual IR settles them.
        if residual_accepts(ir, &doc) {
            out.push(doc);
        }
    }
    // Inserts and updates buffered in the transaction are invisible to the
    // on-disk index; append the ones the predicate accepts.
    if let Some(overlay) = &overlay {
        for (key, pending) in overlay {
            if seen.contains(key) {
                continue;
            }
            if let Some(doc) = pending
                && residual_accepts(ir, doc)
            {
                out.push(doc.clone());
            }
        }
    }
    Ok(out)
}

/// Full-scan pipeline: raw slices → byte-level pushdown → large-document
/// resolution → overlay merge → decode → final filter.
struct TableScan {
    collection: Arc<Collection>,
    scan: RawScan,
    preds: Vec<ScanPredicate>,
    fully_pushed: bool,
    ir: Option<Expr>,
    overlay: Option<Overlay>,
    seen: BTreeSet<IndexKey>,
    tail: Option<std::vec::IntoIter<Document>>,
    deadline: Option<Instant>,
    done: bool,
}

enum PushdownVerdict {
    Pass { post_filter: bool },
    Drop,
}

impl TableScan {
    fn pushdown(&self, raw: &RawDocument<'_>) -> Result<PushdownVerdict> {
        let mut post_filter = false;
        for pred in &self.preds {
            let candidates: Vec<&[u8]> = pred.candidates.iter().map(Vec::as_slice).collect();
            let element = raw.get_any(&candidates)?;
            let verdict = match element {
                // Missing fields compare like nulls.
                None => try_evaluate(TAG_NULL, &[], pred.op, &pred.value, None),
                Some(el) => try_evaluate(
                    el.tag,
                    el.value,
                    pred.op,
                    &pred.value,
                    pred.target_utf8.as_deref(),
                ),
            };
            match verdict {
                Some(false) => return Ok(PushdownVerdict::Drop),
                Some(true) => {}
                None => post_filter = true,
            }
        }
        Ok(PushdownVerdict::Pass { post_filter })
    }

    fn overlay_tail(&mut self) -> std::vec::IntoIter<Document> {
        let mut rest = Vec::new();
        if let Some(overlay) = &self.overlay {
            for (key, pending) in overlay {
                if self.seen.contains(key) {
                    continue;
                }
                if let Some(doc) = pending
                    && residual_accepts(self.ir.as_ref(), doc)
                {
                    rest.push(doc.clone());
                }
            }
        }
        rest.into_iter()
    }
}

impl Iterator for TableScan {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some(deadline) = self.deadline
                && Instant::now() > deadline
            {
                self.done = true;
                return Some(Err(Error::Timeout));
            }
            if let Some(tail) = &mut self.tail {
                return tail.next().map(Ok);
            }
            let slice = match self.scan.next() {
                Some(Ok(slice)) => slice,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.tail = Some(self.overlay_tail());
                    continue;
                }
            };
            let mut requires_post_filter = slice.requires_post_filter;

            // (b) byte-level pushdown on inline slices; large documents are
            // opaque at this stage and fall through to the full filter.
            let bytes = if let Some(re) = slice.large {
                requires_post_filter = true;
                match large_doc::read(self.collection.pager(), re.index_page_id) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        log::warn!("skipping unreadable large document: {e}");
                        continue;
                    }
                }
            } else {
                let raw = match RawDocument::new(&slice.bytes) {
                    Ok(raw) => raw,
                    Err(e) => {
                        log::warn!("skipping undecodable document slice: {e}");
                        continue;
                    }
                };
                match self.pushdown(&raw) {
                    Ok(PushdownVerdict::Drop) => continue,
                    Ok(PushdownVerdict::Pass { post_filter }) => {
                        requires_post_filter |= post_filter;
                    }
                    Err(e) => {
                        log::warn!("skipping undecodable document slice: {e}");
                        continue;
                    }
                }
                slice.bytes
            };

            // (d) transaction overlay: pending deletes drop the row, pending
            // updates substitute their image.
            if self.overlay.is_some() {
                let key = match RawDocument::new(&bytes)
                    .and_then(|raw| raw.get(b"_id"))
                    .ok()
                    .flatten()
                {
                    Some(el) => match element_to_bson(el.tag, el.value) {
                        Ok(v) => Some(IndexKey::single(v)),
                        Err(_) => None,
                    },
                    None => None,
                };
                if let Some(key) = key {
                    let pending = self.overlay.as_ref().and_then(|o| o.get(&key).cloned());
                    self.seen.insert(key);
                    if let Some(pending) = pending {
                        match pending {
                            None => continue,
                            Some(doc) => {
                                if residual_accepts(self.ir.as_ref(), &doc) {
                                    return Some(Ok(doc));
                                }
                                continue;
                            }
                        }
                    }
                }
            }

            // (e) decode and apply the final in-memory filter. Fully pushed
            // predicates skip rows the byte-level pass already settled.
            let doc = match Document::from_reader(&mut std::io::Cursor::new(&bytes)) {
                Ok(doc) => doc,
                Err(e) => {
                    log::warn!("skipping undecodable document slice: {e}");
                    continue;
                }
            };
            if self.fully_pushed && !requires_post_filter {
                return Some(Ok(doc));
            }
            if residual_accepts(self.ir.as_ref(), &doc) {
                return Some(Ok(doc));
            }
        }
    }
}
