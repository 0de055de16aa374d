//! Mapping parsed verdicts back to the items of a batch.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use tracing::warn;

use crate::items::{Item, ItemId};

use super::parse::{validate_verdict, ParseError};
use super::types::{VerdictError, VerdictOutcome};

/// Per-item outcomes for one successful call.
#[derive(Debug, Clone, Default)]
pub struct Reconciled {
    /// One entry per batch item, in batch order.
    pub outcomes: Vec<(ItemId, VerdictOutcome)>,
    /// Batch items with no entry in the response.
    pub missing: Vec<ItemId>,
    /// Response ids that are not in the batch.
    pub extra: Vec<String>,
}

impl Reconciled {
    pub fn parsed_count(&self) -> usize {
        self.outcomes.len() - self.missing.len()
    }
}

/// Match parsed objects to batch items by id.
///
/// Every matched object is validated; one invalid object fails the whole
/// call. Items without a match get a missing-response verdict. Extra ids are
/// ignored.
pub fn reconcile(
    items: &[Item],
    parsed: &HashMap<String, Map<String, Value>>,
) -> Result<Reconciled, ParseError> {
    let mut out = Reconciled::default();
    let mut batch_keys = HashSet::with_capacity(items.len());

    for item in items {
        let key = item.id.key();
        let outcome = match parsed.get(&key) {
            Some(obj) => VerdictOutcome::Assessed(validate_verdict(&key, obj)?),
            None => {
                out.missing.push(item.id.clone());
                VerdictOutcome::Failed(VerdictError::missing())
            }
        };
        out.outcomes.push((item.id.clone(), outcome));
        batch_keys.insert(key);
    }

    out.extra = parsed
        .keys()
        .filter(|k| !batch_keys.contains(*k))
        .cloned()
        .collect();
    out.extra.sort();

    if !out.missing.is_empty() || !out.extra.is_empty() {
        let missing: Vec<String> = out.missing.iter().map(ItemId::key).collect();
        warn!(
            missing = ?missing,
            extra = ?out.extra,
            "returned ids do not match the batch"
        );
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assess::parse::parse_verdict_array;
    use crate::assess::types::{ErrorKind, MISSING_RESPONSE};

    fn items(ids: &[i64]) -> Vec<Item> {
        ids.iter().map(|&i| Item::new(i, format!("Q{i}"))).collect()
    }

    fn verdict(id: &str) -> String {
        format!(
            r#"{{"questionid": {id}, "change_required": 0, "feedback": {{"question": {{"issue": "", "rewrite": ""}}}}}}"#
        )
    }

    #[test]
    fn missing_item_gets_error_verdict() {
        let raw = format!("[{}, {}]", verdict("1"), verdict("3"));
        let parsed = parse_verdict_array(&raw).unwrap();
        let out = reconcile(&items(&[1, 2, 3]), &parsed).unwrap();

        assert_eq!(out.outcomes.len(), 3);
        assert_eq!(out.parsed_count(), 2);
        assert_eq!(out.missing, vec![ItemId::Int(2)]);
        match &out.outcomes[1].1 {
            VerdictOutcome::Failed(e) => {
                assert_eq!(e.kind, ErrorKind::MissingResponse);
                assert_eq!(e.message, MISSING_RESPONSE);
            }
            other => panic!("expected missing verdict, got {other:?}"),
        }
        assert!(matches!(out.outcomes[0].1, VerdictOutcome::Assessed(_)));
    }

    #[test]
    fn string_ids_match_integer_items() {
        let raw = format!("[{}, {}]", verdict("\"1\""), verdict("\"99\""));
        let parsed = parse_verdict_array(&raw).unwrap();
        let out = reconcile(&items(&[1]), &parsed).unwrap();
        assert!(out.missing.is_empty());
        assert_eq!(out.extra, vec!["99".to_string()]);
    }

    #[test]
    fn one_invalid_verdict_fails_the_call() {
        let raw = format!(
            r#"[{}, {{"questionid": 2, "change_required": 5, "feedback": {{"question": {{}}}}}}]"#,
            verdict("1")
        );
        let parsed = parse_verdict_array(&raw).unwrap();
        assert!(matches!(
            reconcile(&items(&[1, 2]), &parsed),
            Err(ParseError::Schema { .. })
        ));
    }

    #[test]
    fn invalid_extra_is_ignored() {
        let raw = format!(
            r#"[{}, {{"questionid": 9, "change_required": 5}}]"#,
            verdict("1")
        );
        let parsed = parse_verdict_array(&raw).unwrap();
        let out = reconcile(&items(&[1]), &parsed).unwrap();
        assert_eq!(out.parsed_count(), 1);
    }
}
