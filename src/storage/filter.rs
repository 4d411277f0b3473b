//! Filter and sort evaluation over in-memory records

use crate::core::record::{Record, RecordKey};
use crate::core::request::is_truthy;
use crate::core::store::{FilterClause, FilterOp, FilterSpec, SortKey};
use serde_json::Value;
use std::cmp::Ordering;

/// Resolves record keys while walking relation paths
pub trait RecordLookup {
    fn lookup(&self, key: &RecordKey) -> Option<&Record>;
}

/// Every value reachable from `record` along a dotted source path.
///
/// To-many relations fan out, so a path can yield several values; a path
/// that cannot be followed yields none.
pub fn path_values<L: RecordLookup>(lookup: &L, record: &Record, path: &str) -> Vec<Value> {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let mut out = Vec::new();
    collect(lookup, record, &segments, &mut out);
    out
}

fn collect<L: RecordLookup>(lookup: &L, record: &Record, segments: &[&str], out: &mut Vec<Value>) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };

    if let Some(value) = record.attr(head) {
        let mut current = value;
        for segment in rest {
            match current.get(*segment) {
                Some(next) => current = next,
                None => return,
            }
        }
        match current {
            Value::Array(items) => out.extend(items.iter().cloned()),
            other => out.push(other.clone()),
        }
        return;
    }

    if let Some(relation) = record.relation(head) {
        for key in relation.keys() {
            if rest.is_empty() {
                out.push(key.id.to_value());
            } else if let Some(target) = lookup.lookup(key) {
                collect(lookup, target, rest, out);
            }
        }
        return;
    }

    if rest.is_empty() && (*head == "id" || *head == "pk") {
        if let Some(id) = &record.id {
            out.push(id.to_value());
        }
    }
}

/// Whether `record` satisfies every clause and id restriction of `spec`
pub fn matches_spec<L: RecordLookup>(lookup: &L, record: &Record, spec: &FilterSpec) -> bool {
    if let Some(ids) = &spec.ids {
        match &record.id {
            Some(id) if ids.contains(id) => {}
            _ => return false,
        }
    }
    spec.clauses
        .iter()
        .all(|clause| matches_clause(lookup, record, clause))
}

pub fn matches_clause<L: RecordLookup>(lookup: &L, record: &Record, clause: &FilterClause) -> bool {
    let values = path_values(lookup, record, &clause.path);

    let result = match clause.op {
        FilterOp::IsNull => {
            let want_null = clause.values.first().is_none_or(|v| is_truthy(v));
            let is_null = values.iter().all(Value::is_null);
            is_null == want_null
        }
        op => values
            .iter()
            .any(|value| compare(value, op, &clause.values)),
    };

    result != clause.negate
}

fn compare(value: &Value, op: FilterOp, args: &[String]) -> bool {
    let Some(text) = as_text(value) else {
        return false;
    };
    let first = args.first().map(String::as_str).unwrap_or_default();

    match op {
        FilterOp::Eq => text == first,
        FilterOp::In => args.iter().any(|a| *a == text),
        FilterOp::IExact => text.to_lowercase() == first.to_lowercase(),
        FilterOp::Contains => text.contains(first),
        FilterOp::IContains => text.to_lowercase().contains(&first.to_lowercase()),
        FilterOp::StartsWith => text.starts_with(first),
        FilterOp::IStartsWith => text.to_lowercase().starts_with(&first.to_lowercase()),
        FilterOp::Gt => compare_text(&text, first) == Ordering::Greater,
        FilterOp::Gte => compare_text(&text, first) != Ordering::Less,
        FilterOp::Lt => compare_text(&text, first) == Ordering::Less,
        FilterOp::Lte => compare_text(&text, first) != Ordering::Greater,
        FilterOp::IsNull => false,
    }
}

/// String form used when comparing against query parameter values
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Numeric comparison when both sides are numbers, lexicographic otherwise
fn compare_text(left: &str, right: &str) -> Ordering {
    match (left.parse::<f64>(), right.parse::<f64>()) {
        (Ok(l), Ok(r)) => l.partial_cmp(&r).unwrap_or(Ordering::Equal),
        _ => left.cmp(right),
    }
}

fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    match (left, right) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(Value::Number(l)), Some(Value::Number(r))) => l
            .as_f64()
            .partial_cmp(&r.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(l), Some(r)) => as_text(l).cmp(&as_text(r)),
    }
}

/// Stable sort by each key in turn
pub fn sort_records<L: RecordLookup>(lookup: &L, records: &mut [Record], keys: &[SortKey]) {
    if keys.is_empty() {
        return;
    }
    records.sort_by(|a, b| {
        for key in keys {
            let left = path_values(lookup, a, &key.path);
            let right = path_values(lookup, b, &key.path);
            let mut ordering = compare_values(left.first(), right.first());
            if key.descending {
                ordering = ordering.reverse();
            }
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}
