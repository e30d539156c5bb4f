//! Flattening of a report into fact rows and the cell provenance ledger.
//!
//! Every mapping row is emitted whether or not the input carries it; a missing path
//! becomes an `EMPTY` cell and a `None` fact column, never a zero.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::classify::{classify, SemanticKind};
use crate::normalize::structured_block;
use crate::skeleton::{ACTIVE_DISCLOSURE_KEY, APPLICATION_KEY, LEGAL_PROCEEDING_KEY};
use crate::CoreError;

pub const ACTIVE_DISCLOSURE_TABLE: &str = "active_disclosure";
pub const APPLICATION_TABLE: &str = "application";
pub const LEGAL_PROCEEDING_TABLE: &str = "legal_proceeding";

/// `(input key, category label, [(field, fact column)])`.
pub const ACTIVE_DISCLOSURE_CATEGORIES: [(&str, &str, &[(&str, &str)]); 6] = [
    (
        "regulations",
        "regulations",
        &[("made", "made_count"), ("repealed", "repealed_count"), ("valid", "valid_count")],
    ),
    (
        "normativeDocuments",
        "normative_documents",
        &[("made", "made_count"), ("repealed", "repealed_count"), ("valid", "valid_count")],
    ),
    ("licensing", "licensing", &[("processed", "processed_count")]),
    ("punishment", "punishment", &[("processed", "processed_count")]),
    ("coercion", "coercion", &[("processed", "processed_count")]),
    ("fees", "fees", &[("amount", "amount")]),
];

/// `(path inside tableData, applicant label)`.
pub const APPLICANTS: [(&[&str], &str); 7] = [
    (&["naturalPerson"], "natural_person"),
    (&["legalPerson", "commercial"], "legal_person_commercial"),
    (&["legalPerson", "research"], "legal_person_research"),
    (&["legalPerson", "social"], "legal_person_social"),
    (&["legalPerson", "legal"], "legal_person_legal"),
    (&["legalPerson", "other"], "legal_person_other"),
    (&["total"], "total"),
];

/// `(response key, path inside one applicant column)`.
pub const RESPONSES: [(&str, &[&str]); 25] = [
    ("new_received", &["newReceived"]),
    ("carried_over", &["carriedOver"]),
    ("granted", &["results", "granted"]),
    ("partial_grant", &["results", "partialGrant"]),
    ("denied_state_secret", &["results", "denied", "stateSecret"]),
    ("denied_law_forbidden", &["results", "denied", "lawForbidden"]),
    ("denied_safety_stability", &["results", "denied", "safetyStability"]),
    ("denied_third_party_rights", &["results", "denied", "thirdPartyRights"]),
    ("denied_internal_affairs", &["results", "denied", "internalAffairs"]),
    ("denied_process_info", &["results", "denied", "processInfo"]),
    ("denied_enforcement_case", &["results", "denied", "enforcementCase"]),
    ("denied_admin_query", &["results", "denied", "adminQuery"]),
    ("unable_no_info", &["results", "unableToProvide", "noInfo"]),
    ("unable_need_creation", &["results", "unableToProvide", "needCreation"]),
    ("unable_unclear", &["results", "unableToProvide", "unclear"]),
    ("not_processed_complaint", &["results", "notProcessed", "complaint"]),
    ("not_processed_repeat", &["results", "notProcessed", "repeat"]),
    ("not_processed_publication", &["results", "notProcessed", "publication"]),
    ("not_processed_massive_requests", &["results", "notProcessed", "massiveRequests"]),
    ("not_processed_confirm_info", &["results", "notProcessed", "confirmInfo"]),
    ("other_overdue_correction", &["results", "other", "overdueCorrection"]),
    ("other_overdue_fee", &["results", "other", "overdueFee"]),
    ("other_other_reasons", &["results", "other", "otherReasons"]),
    ("total_processed", &["results", "totalProcessed"]),
    ("carried_forward", &["results", "carriedForward"]),
];

/// `(input key, case label)`.
pub const CASES: [(&str, &str); 3] = [
    ("review", "review"),
    ("litigationDirect", "litigation_direct"),
    ("litigationPostReview", "litigation_post_review"),
];

pub const CASE_RESULTS: [&str; 5] = ["maintain", "correct", "other", "unfinished", "total"];

#[must_use]
pub fn cell_ref(table_id: &str, row_key: &str, col_key: &str) -> String {
    format!("{table_id}:{row_key}:{col_key}")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValueCell {
    pub table_id: String,
    pub row_key: String,
    pub col_key: String,
    pub cell_ref: String,
    pub value_raw: Option<String>,
    pub value_num: Option<f64>,
    pub value_semantic: SemanticKind,
    pub normalized_value: Option<String>,
}

impl ValueCell {
    #[must_use]
    pub fn new(table_id: &str, row_key: &str, col_key: &str, value: Option<&Value>) -> Self {
        let classification = classify(value);
        Self {
            table_id: table_id.to_string(),
            row_key: row_key.to_string(),
            col_key: col_key.to_string(),
            cell_ref: cell_ref(table_id, row_key, col_key),
            value_raw: classification.raw_value,
            value_num: classification.numeric_value,
            value_semantic: classification.kind,
            normalized_value: classification.normalized_value,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActiveDisclosureFact {
    pub category: String,
    pub made_count: Option<f64>,
    pub repealed_count: Option<f64>,
    pub valid_count: Option<f64>,
    pub processed_count: Option<f64>,
    pub amount: Option<f64>,
}

impl ActiveDisclosureFact {
    fn set_column(&mut self, column: &str, value: Option<f64>) {
        match column {
            "made_count" => self.made_count = value,
            "repealed_count" => self.repealed_count = value,
            "valid_count" => self.valid_count = value,
            "processed_count" => self.processed_count = value,
            "amount" => self.amount = value,
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationFact {
    pub applicant_type: String,
    pub response_type: String,
    pub count: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LegalProceedingFact {
    pub case_type: String,
    pub result_type: String,
    pub count: Option<f64>,
}

/// All rows derived from one report version, in insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Flattened {
    pub active_disclosure: Vec<ActiveDisclosureFact>,
    pub application: Vec<ApplicationFact>,
    pub legal_proceeding: Vec<LegalProceedingFact>,
    pub cells: Vec<ValueCell>,
}

impl Flattened {
    #[must_use]
    pub fn fact_count(&self) -> usize {
        self.active_disclosure.len() + self.application.len() + self.legal_proceeding.len()
    }
}

/// Parse a materializer payload: an object, or a string holding a JSON object.
///
/// # Errors
/// Returns [`CoreError::Parse`] when the string is not valid JSON or the payload is
/// not an object.
pub fn parse_payload(payload: &Value) -> Result<Map<String, Value>, CoreError> {
    match payload {
        Value::Object(map) => Ok(map.clone()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(CoreError::Parse("report payload is not a JSON object".to_string())),
            Err(err) => Err(CoreError::Parse(format!("report payload is not valid JSON: {err}"))),
        },
        _ => Err(CoreError::Parse("report payload is not a JSON object".to_string())),
    }
}

fn nested<'a>(root: Option<&'a Value>, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(root?, |node, key| node.get(*key))
}

/// Flatten a canonical (or raw) report into its three fact families and cells.
///
/// Each table is read from the section the normalizer would assign to it, else from
/// the top-level copy. Pass the extraction as received to keep absent values `EMPTY`;
/// a canonical report has already defaulted them to zero.
///
/// # Errors
/// Returns [`CoreError::Parse`] for a non-object payload, see [`parse_payload`].
pub fn flatten_report(payload: &Value) -> Result<Flattened, CoreError> {
    let report = parse_payload(payload)?;
    let mut flattened = Flattened::default();

    let active = structured_block(&report, ACTIVE_DISCLOSURE_KEY);
    for (key, category, fields) in ACTIVE_DISCLOSURE_CATEGORIES {
        let entry = nested(active, &[key]);
        let mut fact = ActiveDisclosureFact { category: category.to_string(), ..Default::default() };
        for (field, column) in fields {
            let cell = ValueCell::new(ACTIVE_DISCLOSURE_TABLE, category, field, nested(entry, &[*field]));
            fact.set_column(column, cell.value_num);
            flattened.cells.push(cell);
        }
        flattened.active_disclosure.push(fact);
    }

    let application = structured_block(&report, APPLICATION_KEY);
    for (applicant_path, applicant) in APPLICANTS {
        let column = nested(application, applicant_path);
        for (response, path) in RESPONSES {
            let cell = ValueCell::new(APPLICATION_TABLE, response, applicant, nested(column, path));
            flattened.application.push(ApplicationFact {
                applicant_type: applicant.to_string(),
                response_type: response.to_string(),
                count: cell.value_num,
            });
            flattened.cells.push(cell);
        }
    }

    let proceedings = structured_block(&report, LEGAL_PROCEEDING_KEY);
    for (key, case) in CASES {
        let entry = nested(proceedings, &[key]);
        for result in CASE_RESULTS {
            let cell = ValueCell::new(LEGAL_PROCEEDING_TABLE, case, result, nested(entry, &[result]));
            flattened.legal_proceeding.push(LegalProceedingFact {
                case_type: case.to_string(),
                result_type: result.to_string(),
                count: cell.value_num,
            });
            flattened.cells.push(cell);
        }
    }

    Ok(flattened)
}

/// Cells of one version keyed by `cell_ref`, the operand source for consistency checks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactSnapshot {
    cells: BTreeMap<String, ValueCell>,
}

impl FactSnapshot {
    #[must_use]
    pub fn get(&self, cell_ref: &str) -> Option<&ValueCell> {
        self.cells.get(cell_ref)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl FromIterator<ValueCell> for FactSnapshot {
    fn from_iter<I: IntoIterator<Item = ValueCell>>(iter: I) -> Self {
        Self { cells: iter.into_iter().map(|cell| (cell.cell_ref.clone(), cell)).collect() }
    }
}

impl From<&Flattened> for FactSnapshot {
    fn from(flattened: &Flattened) -> Self {
        flattened.cells.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::normalize::normalize;

    #[test]
    fn every_mapping_row_is_emitted_for_an_empty_object() -> Result<(), CoreError> {
        let flattened = flatten_report(&json!({}))?;
        assert_eq!(flattened.active_disclosure.len(), 6);
        assert_eq!(flattened.application.len(), 175);
        assert_eq!(flattened.legal_proceeding.len(), 15);
        assert_eq!(flattened.fact_count(), 196);
        assert_eq!(flattened.cells.len(), 200);
        assert!(flattened.cells.iter().all(|cell| cell.value_semantic == SemanticKind::Empty));
        assert!(flattened.application.iter().all(|fact| fact.count.is_none()));
        Ok(())
    }

    #[test]
    fn canonical_defaults_materialize_as_zero() -> Result<(), CoreError> {
        let report = normalize(&Value::Null);
        let flattened = flatten_report(report.as_value())?;
        assert!(flattened.cells.iter().all(|cell| cell.value_semantic == SemanticKind::Zero));
        assert_eq!(flattened.active_disclosure[0].made_count, Some(0.0));
        assert_eq!(flattened.active_disclosure[0].processed_count, None);
        Ok(())
    }

    #[test]
    fn non_object_payloads_are_parse_errors() {
        assert!(matches!(flatten_report(&json!("not json")), Err(CoreError::Parse(_))));
        assert!(matches!(flatten_report(&json!("[1,2]")), Err(CoreError::Parse(_))));
        assert!(matches!(flatten_report(&json!(null)), Err(CoreError::Parse(_))));
        assert!(matches!(flatten_report(&json!(7)), Err(CoreError::Parse(_))));
        assert!(flatten_report(&json!(r#"{"tableData":{}}"#)).is_ok());
    }

    #[test]
    fn blank_and_symbol_cells_never_become_zero_facts() -> Result<(), CoreError> {
        let flattened = flatten_report(&json!({
            "sections": [{
                "type": "table_3",
                "tableData": { "total": { "newReceived": "", "carriedOver": "/", "results": { "granted": "abc" } } }
            }]
        }))?;

        let snapshot = FactSnapshot::from(&flattened);
        let new_received = snapshot.get("application:new_received:total");
        assert_eq!(new_received.map(|cell| cell.value_semantic), Some(SemanticKind::Empty));
        assert_eq!(new_received.and_then(|cell| cell.value_raw.clone()), Some(String::new()));
        let carried = snapshot.get("application:carried_over:total");
        assert_eq!(carried.map(|cell| cell.value_semantic), Some(SemanticKind::Na));
        let granted = snapshot.get("application:granted:total");
        assert_eq!(granted.map(|cell| cell.value_semantic), Some(SemanticKind::Text));

        let total_facts = flattened
            .application
            .iter()
            .filter(|fact| fact.applicant_type == "total")
            .collect::<Vec<_>>();
        assert!(total_facts.iter().all(|fact| fact.count.is_none()));
        Ok(())
    }

    #[test]
    fn section_block_wins_over_top_level_copy() -> Result<(), CoreError> {
        let flattened = flatten_report(&json!({
            "sections": [{ "type": "table_2", "activeDisclosureData": { "fees": { "amount": "12.5" } } }],
            "activeDisclosureData": { "fees": { "amount": 99 } },
            "reviewLitigationData": { "litigationPostReview": { "total": "3" } }
        }))?;

        let fees = flattened.active_disclosure.iter().find(|fact| fact.category == "fees");
        assert_eq!(fees.and_then(|fact| fact.amount), Some(12.5));
        let snapshot = FactSnapshot::from(&flattened);
        let litigation = snapshot.get("legal_proceeding:litigation_post_review:total");
        assert_eq!(litigation.and_then(|cell| cell.value_num), Some(3.0));
        assert_eq!(litigation.map(|cell| cell.value_semantic), Some(SemanticKind::Numeric));
        Ok(())
    }

    #[test]
    fn top_level_tables_survive_normalization() -> Result<(), CoreError> {
        let raw = json!({
            "tableData": { "total": { "carriedOver": 5 } },
            "activeDisclosureData": { "regulations": { "valid": 110 } }
        });
        let canonical = normalize(&raw);
        let flattened = flatten_report(canonical.as_value())?;
        let snapshot = FactSnapshot::from(&flattened);

        let carried = snapshot.get("application:carried_over:total");
        assert_eq!(carried.map(|cell| cell.value_semantic), Some(SemanticKind::Numeric));
        assert_eq!(carried.and_then(|cell| cell.value_num), Some(5.0));
        let valid = snapshot.get("active_disclosure:regulations:valid");
        assert_eq!(valid.and_then(|cell| cell.value_num), Some(110.0));

        // The extraction itself keeps the columns it never carried as EMPTY.
        let from_raw = FactSnapshot::from(&flatten_report(&raw)?);
        assert_eq!(from_raw.get("application:carried_over:total").and_then(|cell| cell.value_num), Some(5.0));
        let forward = from_raw.get("application:carried_forward:total");
        assert_eq!(forward.map(|cell| cell.value_semantic), Some(SemanticKind::Empty));
        assert_eq!(forward.and_then(|cell| cell.value_num), None);
        Ok(())
    }

    #[test]
    fn title_matched_section_is_read_like_the_normalizer_assigns_it() -> Result<(), CoreError> {
        let flattened = flatten_report(&json!({
            "sections": [{
                "title": "四、政府信息公开行政复议、行政诉讼情况",
                "type": "table",
                "reviewLitigationData": { "review": { "maintain": 2, "total": 2 } }
            }],
            "reviewLitigationData": { "review": { "total": 9 } }
        }))?;
        let snapshot = FactSnapshot::from(&flattened);
        assert_eq!(snapshot.get("legal_proceeding:review:total").and_then(|cell| cell.value_num), Some(2.0));
        let unfinished = snapshot.get("legal_proceeding:review:unfinished");
        assert_eq!(unfinished.map(|cell| cell.value_semantic), Some(SemanticKind::Empty));
        Ok(())
    }

    #[test]
    fn cell_refs_are_unique_and_stable() -> Result<(), CoreError> {
        let first = flatten_report(normalize(&json!({})).as_value())?;
        let second = flatten_report(normalize(&json!({})).as_value())?;
        assert_eq!(first, second);

        let snapshot = FactSnapshot::from(&first);
        assert_eq!(snapshot.len(), first.cells.len());
        assert!(snapshot.get("application:carried_forward:legal_person_research").is_some());
        assert!(snapshot.get("active_disclosure:normative_documents:valid").is_some());
        assert_eq!(first.cells[0].cell_ref, "active_disclosure:regulations:made");
        Ok(())
    }
}
