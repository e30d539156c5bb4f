//! Arithmetic reconciliation over materialized cells.
//!
//! A formula compares the sum of its `left` terms (the reported value) with the sum
//! of its `right` terms (the value implied by other cells). An operand that is not
//! ZERO or NUMERIC makes the whole formula UNKNOWN.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::classify::SemanticKind;
use crate::materialize::{
    cell_ref, FactSnapshot, ACTIVE_DISCLOSURE_TABLE, APPLICANTS, APPLICATION_TABLE, CASES,
    CASE_RESULTS, LEGAL_PROCEEDING_TABLE, RESPONSES,
};
use crate::CoreError;

/// Absolute slack added to every tolerance so decimal sums compare cleanly.
const FLOAT_SLACK: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FormulaCategory {
    ActiveDisclosure,
    Application,
    LegalProceeding,
    General,
}

impl FormulaCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ActiveDisclosure => "active_disclosure",
            Self::Application => "application",
            Self::LegalProceeding => "legal_proceeding",
            Self::General => "general",
        }
    }
}

impl Display for FormulaCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueStatus {
    Pass,
    Fail,
    Unknown,
}

impl IssueStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "PASS",
            Self::Fail => "FAIL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Previous,
    Current,
}

impl Side {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Previous => "previous",
            Self::Current => "current",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Term {
    pub negative: bool,
    pub side: Side,
    pub cell_ref: String,
}

impl Term {
    #[must_use]
    pub fn plus(side: Side, cell_ref: String) -> Self {
        Self { negative: false, side, cell_ref }
    }

    #[must_use]
    pub fn minus(side: Side, cell_ref: String) -> Self {
        Self { negative: true, side, cell_ref }
    }

    fn current(cell_ref: String) -> Self {
        Self::plus(Side::Current, cell_ref)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Formula {
    pub id: String,
    pub title: String,
    pub category: FormulaCategory,
    pub left: Vec<Term>,
    pub right: Vec<Term>,
    pub tolerance: f64,
    /// Severity attached to a FAIL of this formula.
    pub severity: Severity,
}

impl Formula {
    /// Human-readable arithmetic, e.g. `current.a:b:c = previous.a:b:d`.
    #[must_use]
    pub fn expression(&self) -> String {
        format!("{} = {}", render_terms(&self.left), render_terms(&self.right))
    }

    /// First 16 hex digits of `sha256("{category}:{id}:{expression}")`.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let input = format!("{}:{}:{}", self.category, self.id, self.expression());
        let digest = format!("{:x}", Sha256::digest(input.as_bytes()));
        digest[..16].to_string()
    }

    /// Cell the issue is pinned to: the first reported operand.
    fn anchor_cell_ref(&self) -> &str {
        self.left.first().map_or("", |term| term.cell_ref.as_str())
    }
}

fn render_terms(terms: &[Term]) -> String {
    let mut rendered = String::new();
    for (index, term) in terms.iter().enumerate() {
        let operand = format!("{}.{}", term.side.as_str(), term.cell_ref);
        match (index, term.negative) {
            (0, false) => rendered.push_str(&operand),
            (0, true) => rendered.push_str(&format!("-{operand}")),
            (_, false) => rendered.push_str(&format!(" + {operand}")),
            (_, true) => rendered.push_str(&format!(" - {operand}")),
        }
    }
    rendered
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceRef {
    pub side: Side,
    pub cell_ref: String,
    /// `None` when the cell does not exist for that version.
    pub semantic_kind: Option<SemanticKind>,
    pub value_raw: Option<String>,
    pub value_num: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsistencyIssue {
    pub formula_id: String,
    pub title: String,
    pub category: FormulaCategory,
    /// Set only when `status` is FAIL.
    pub severity: Option<Severity>,
    pub status: IssueStatus,
    pub left_value: Option<f64>,
    pub right_value: Option<f64>,
    pub delta: Option<f64>,
    pub tolerance: f64,
    pub cell_ref: String,
    pub expression: String,
    pub fingerprint: String,
    pub evidence: Vec<EvidenceRef>,
}

const APPLICANT_NAMES: [(&str, &str); 7] = [
    ("natural_person", "自然人"),
    ("legal_person_commercial", "商业企业"),
    ("legal_person_research", "科研机构"),
    ("legal_person_social", "社会公益组织"),
    ("legal_person_legal", "法律服务机构"),
    ("legal_person_other", "其他"),
    ("total", "总计"),
];

fn applicant_name(label: &str) -> &str {
    APPLICANT_NAMES.iter().find(|(key, _)| *key == label).map_or(label, |(_, name)| *name)
}

fn application_ref(response: &str, applicant: &str) -> String {
    cell_ref(APPLICATION_TABLE, response, applicant)
}

fn applicant_labels() -> impl Iterator<Item = &'static str> {
    APPLICANTS.into_iter().map(|(_, label)| label)
}

/// Response keys summed into `total_processed`.
fn processed_result_keys() -> impl Iterator<Item = &'static str> {
    RESPONSES.into_iter().map(|(key, _)| key).filter(|key| {
        !matches!(*key, "new_received" | "carried_over" | "total_processed" | "carried_forward")
    })
}

/// Formulas evaluated inside one version.
#[must_use]
pub fn within_year_formulas() -> Vec<Formula> {
    let mut formulas = Vec::new();

    for applicant in applicant_labels() {
        let name = applicant_name(applicant);
        formulas.push(Formula {
            id: format!("application.balance.{applicant}"),
            title: format!("表三：本年新收+上年结转=办理结果总计+结转下年度继续办理（{name}）"),
            category: FormulaCategory::Application,
            left: vec![
                Term::current(application_ref("new_received", applicant)),
                Term::current(application_ref("carried_over", applicant)),
            ],
            right: vec![
                Term::current(application_ref("total_processed", applicant)),
                Term::current(application_ref("carried_forward", applicant)),
            ],
            tolerance: 0.0,
            severity: Severity::Error,
        });
        formulas.push(Formula {
            id: format!("application.result_total.{applicant}"),
            title: format!("表三：各办理结果之和=办理结果总计（{name}）"),
            category: FormulaCategory::Application,
            left: vec![Term::current(application_ref("total_processed", applicant))],
            right: processed_result_keys()
                .map(|response| Term::current(application_ref(response, applicant)))
                .collect(),
            tolerance: 0.0,
            severity: Severity::Error,
        });
    }

    for (response, _) in RESPONSES {
        formulas.push(Formula {
            id: format!("application.column_sum.{response}"),
            title: format!("表三：自然人+各类法人或其他组织=总计（{response}）"),
            category: FormulaCategory::Application,
            left: vec![Term::current(application_ref(response, "total"))],
            right: applicant_labels()
                .filter(|applicant| *applicant != "total")
                .map(|applicant| Term::current(application_ref(response, applicant)))
                .collect(),
            tolerance: 0.0,
            severity: Severity::Error,
        });
    }

    for (_, case) in CASES {
        formulas.push(Formula {
            id: format!("legal_proceeding.total.{case}"),
            title: format!("表四：维持+纠正+其他结果+尚未审结=总计（{case}）"),
            category: FormulaCategory::LegalProceeding,
            left: vec![Term::current(cell_ref(LEGAL_PROCEEDING_TABLE, case, "total"))],
            right: CASE_RESULTS
                .iter()
                .filter(|result| **result != "total")
                .map(|result| Term::current(cell_ref(LEGAL_PROCEEDING_TABLE, case, result)))
                .collect(),
            tolerance: 0.0,
            severity: Severity::Warning,
        });
    }

    formulas
}

/// Formulas linking a version to the previous report-year of the same organization.
#[must_use]
pub fn cross_year_formulas() -> Vec<Formula> {
    let mut formulas = Vec::new();

    for applicant in applicant_labels() {
        formulas.push(Formula {
            id: format!("cross_year.carry_forward.{applicant}"),
            title: format!(
                "跨年：本年上年结转=上年结转下年度继续办理（{}）",
                applicant_name(applicant)
            ),
            category: FormulaCategory::Application,
            left: vec![Term::current(application_ref("carried_over", applicant))],
            right: vec![Term::plus(Side::Previous, application_ref("carried_forward", applicant))],
            tolerance: 0.0,
            severity: if applicant == "total" { Severity::Error } else { Severity::Warning },
        });
    }

    for (category, name) in [("regulations", "规章"), ("normative_documents", "规范性文件")] {
        let current = |field: &str| cell_ref(ACTIVE_DISCLOSURE_TABLE, category, field);
        formulas.push(Formula {
            id: format!("cross_year.stock.{category}"),
            title: format!("跨年：现行有效件数=上年现行有效+本年制发-本年废止（{name}）"),
            category: FormulaCategory::ActiveDisclosure,
            left: vec![Term::current(current("valid"))],
            right: vec![
                Term::plus(Side::Previous, current("valid")),
                Term::current(current("made")),
                Term::minus(Side::Current, current("repealed")),
            ],
            tolerance: 0.0,
            severity: Severity::Error,
        });
    }

    formulas
}

/// Reject formula sets that cannot be evaluated deterministically.
///
/// # Errors
/// Returns [`CoreError::Validation`] for duplicate ids, an empty side, or a
/// negative or non-finite tolerance.
pub fn validate_formulas(formulas: &[Formula]) -> Result<(), CoreError> {
    let mut seen = BTreeSet::new();
    for formula in formulas {
        if formula.id.trim().is_empty() {
            return Err(CoreError::Validation("formula id must not be empty".to_string()));
        }
        if !seen.insert(formula.id.as_str()) {
            return Err(CoreError::Validation(format!("duplicate formula id: {}", formula.id)));
        }
        if formula.left.is_empty() || formula.right.is_empty() {
            return Err(CoreError::Validation(format!(
                "formula {} must have operands on both sides",
                formula.id
            )));
        }
        if !formula.tolerance.is_finite() || formula.tolerance < 0.0 {
            return Err(CoreError::Validation(format!(
                "formula {} has invalid tolerance {}",
                formula.id, formula.tolerance
            )));
        }
    }
    Ok(())
}

/// Replace the tolerance of named formulas.
///
/// # Errors
/// Returns [`CoreError::Validation`] when an override names no formula in the set or
/// carries an invalid tolerance.
pub fn apply_tolerance_overrides(
    formulas: &mut [Formula],
    overrides: &BTreeMap<String, f64>,
) -> Result<(), CoreError> {
    for (formula_id, tolerance) in overrides {
        let formula = formulas
            .iter_mut()
            .find(|formula| &formula.id == formula_id)
            .ok_or_else(|| CoreError::Validation(format!("unknown formula id: {formula_id}")))?;
        formula.tolerance = *tolerance;
    }
    validate_formulas(formulas)
}

/// Evaluate formulas against one version's cells.
///
/// # Errors
/// Returns [`CoreError::Validation`] when the formula set is invalid.
pub fn check_within_year(
    current: &FactSnapshot,
    formulas: &[Formula],
) -> Result<Vec<ConsistencyIssue>, CoreError> {
    check_cross_year(None, current, formulas)
}

/// Evaluate formulas against the previous and current versions' cells. A missing
/// previous version makes every formula with a previous-side operand UNKNOWN.
///
/// # Errors
/// Returns [`CoreError::Validation`] when the formula set is invalid.
pub fn check_cross_year(
    previous: Option<&FactSnapshot>,
    current: &FactSnapshot,
    formulas: &[Formula],
) -> Result<Vec<ConsistencyIssue>, CoreError> {
    validate_formulas(formulas)?;
    let mut issues = formulas
        .iter()
        .map(|formula| evaluate(formula, previous, current))
        .collect::<Vec<_>>();
    sort_issues(&mut issues);
    Ok(issues)
}

fn evaluate(
    formula: &Formula,
    previous: Option<&FactSnapshot>,
    current: &FactSnapshot,
) -> ConsistencyIssue {
    let mut evidence = Vec::with_capacity(formula.left.len() + formula.right.len());
    let left_value = sum_terms(&formula.left, previous, current, &mut evidence);
    let right_value = sum_terms(&formula.right, previous, current, &mut evidence);

    let (status, delta) = match (left_value, right_value) {
        (Some(left), Some(right)) => {
            let delta = left - right;
            let status = if delta.abs() > formula.tolerance + FLOAT_SLACK {
                IssueStatus::Fail
            } else {
                IssueStatus::Pass
            };
            (status, Some(delta))
        }
        _ => (IssueStatus::Unknown, None),
    };

    ConsistencyIssue {
        formula_id: formula.id.clone(),
        title: formula.title.clone(),
        category: formula.category,
        severity: (status == IssueStatus::Fail).then_some(formula.severity),
        status,
        left_value,
        right_value,
        delta,
        tolerance: formula.tolerance,
        cell_ref: formula.anchor_cell_ref().to_string(),
        expression: formula.expression(),
        fingerprint: formula.fingerprint(),
        evidence,
    }
}

/// Signed sum of the terms, `None` unless every operand is ZERO or NUMERIC.
fn sum_terms(
    terms: &[Term],
    previous: Option<&FactSnapshot>,
    current: &FactSnapshot,
    evidence: &mut Vec<EvidenceRef>,
) -> Option<f64> {
    let mut total = Some(0.0);
    for term in terms {
        let snapshot = match term.side {
            Side::Previous => previous,
            Side::Current => Some(current),
        };
        let cell = snapshot.and_then(|snapshot| snapshot.get(&term.cell_ref));
        evidence.push(EvidenceRef {
            side: term.side,
            cell_ref: term.cell_ref.clone(),
            semantic_kind: cell.map(|cell| cell.value_semantic),
            value_raw: cell.and_then(|cell| cell.value_raw.clone()),
            value_num: cell.and_then(|cell| cell.value_num),
        });

        let value = cell
            .filter(|cell| cell.value_semantic.is_numeric())
            .and_then(|cell| cell.value_num);
        total = match (total, value) {
            (Some(sum), Some(value)) if term.negative => Some(sum - value),
            (Some(sum), Some(value)) => Some(sum + value),
            _ => None,
        };
    }
    total
}

/// Order by severity (most severe first, unset last), category, formula id, cell ref.
pub fn sort_issues(issues: &mut [ConsistencyIssue]) {
    issues.sort_by(|a, b| {
        (Reverse(a.severity), a.category, &a.formula_id, &a.cell_ref).cmp(&(
            Reverse(b.severity),
            b.category,
            &b.formula_id,
            &b.cell_ref,
        ))
    });
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CheckBadge {
    /// Nothing was evaluated.
    NotAssessed,
    Normal,
    Abnormal,
    /// Formulas were evaluated but every one was UNKNOWN.
    Indeterminate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckSummary {
    pub total: usize,
    pub pass: usize,
    pub fail: usize,
    pub unknown: usize,
    pub badge: CheckBadge,
    pub failing_categories: Vec<FormulaCategory>,
}

#[must_use]
pub fn summarize(issues: &[ConsistencyIssue]) -> CheckSummary {
    let count = |status: IssueStatus| issues.iter().filter(|issue| issue.status == status).count();
    let pass = count(IssueStatus::Pass);
    let fail = count(IssueStatus::Fail);
    let unknown = count(IssueStatus::Unknown);

    let failing_categories = issues
        .iter()
        .filter(|issue| issue.status == IssueStatus::Fail)
        .map(|issue| issue.category)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();

    let badge = if issues.is_empty() {
        CheckBadge::NotAssessed
    } else if fail > 0 {
        CheckBadge::Abnormal
    } else if pass > 0 {
        CheckBadge::Normal
    } else {
        CheckBadge::Indeterminate
    };

    CheckSummary { total: issues.len(), pass, fail, unknown, badge, failing_categories }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::materialize::flatten_report;
    use crate::normalize::normalize;

    fn raw_snapshot(report: &Value) -> Result<FactSnapshot, CoreError> {
        Ok(FactSnapshot::from(&flatten_report(report)?))
    }

    fn canonical_snapshot(report: &Value) -> Result<FactSnapshot, CoreError> {
        raw_snapshot(normalize(report).as_value())
    }

    fn find<'a>(issues: &'a [ConsistencyIssue], formula_id: &str) -> &'a ConsistencyIssue {
        issues
            .iter()
            .find(|issue| issue.formula_id == formula_id)
            .unwrap_or_else(|| panic!("missing issue {formula_id}"))
    }

    fn regulations(made: i64, repealed: i64, valid: i64) -> Value {
        json!({ "activeDisclosureData": { "regulations": { "made": made, "repealed": repealed, "valid": valid } } })
    }

    #[test]
    fn built_in_formula_sets_are_valid_and_sized() -> Result<(), CoreError> {
        let within = within_year_formulas();
        let cross = cross_year_formulas();
        validate_formulas(&within)?;
        validate_formulas(&cross)?;
        assert_eq!(within.len(), 7 + 7 + 25 + 3);
        assert_eq!(cross.len(), 7 + 2);
        assert_eq!(find_formula(&within, "application.result_total.total").right.len(), 21);
        Ok(())
    }

    fn find_formula<'a>(formulas: &'a [Formula], id: &str) -> &'a Formula {
        formulas
            .iter()
            .find(|formula| formula.id == id)
            .unwrap_or_else(|| panic!("missing formula {id}"))
    }

    #[test]
    fn absent_previous_carry_forward_is_unknown() -> Result<(), CoreError> {
        let previous = raw_snapshot(&json!({ "tableData": { "total": { "newReceived": 3 } } }))?;
        let current = canonical_snapshot(&json!({ "tableData": { "total": { "carriedOver": 5 } } }))?;
        let issues = check_cross_year(Some(&previous), &current, &cross_year_formulas())?;

        let issue = find(&issues, "cross_year.carry_forward.total");
        assert_eq!(issue.status, IssueStatus::Unknown);
        assert_eq!(issue.severity, None);
        assert_eq!(issue.delta, None);
        assert_eq!(issue.left_value, Some(5.0));
        assert_eq!(issue.right_value, None);
        let previous_evidence = issue
            .evidence
            .iter()
            .find(|evidence| evidence.side == Side::Previous)
            .unwrap_or_else(|| panic!("missing previous-side evidence"));
        assert_eq!(previous_evidence.semantic_kind, Some(SemanticKind::Empty));
        Ok(())
    }

    #[test]
    fn stock_balance_passes_and_fails_with_signed_delta() -> Result<(), CoreError> {
        let previous = canonical_snapshot(&regulations(10, 2, 100))?;
        let formulas = cross_year_formulas();

        let matching = canonical_snapshot(&regulations(12, 2, 110))?;
        let issues = check_cross_year(Some(&previous), &matching, &formulas)?;
        let issue = find(&issues, "cross_year.stock.regulations");
        assert_eq!(issue.status, IssueStatus::Pass);
        assert_eq!(issue.left_value, Some(110.0));
        assert_eq!(issue.right_value, Some(110.0));

        let drifted = canonical_snapshot(&regulations(12, 2, 108))?;
        let issues = check_cross_year(Some(&previous), &drifted, &formulas)?;
        let issue = find(&issues, "cross_year.stock.regulations");
        assert_eq!(issue.status, IssueStatus::Fail);
        assert_eq!(issue.delta, Some(-2.0));
        assert_eq!(issue.severity, Some(Severity::Error));
        assert_eq!(issue.category, FormulaCategory::ActiveDisclosure);
        assert_eq!(issue.cell_ref, "active_disclosure:regulations:valid");
        assert_eq!(issues[0].formula_id, "cross_year.stock.regulations");
        Ok(())
    }

    #[test]
    fn missing_previous_version_makes_cross_year_formulas_unknown() -> Result<(), CoreError> {
        let current = canonical_snapshot(&regulations(12, 2, 110))?;
        let issues = check_cross_year(None, &current, &cross_year_formulas())?;
        assert!(issues.iter().all(|issue| issue.status == IssueStatus::Unknown));
        assert_eq!(summarize(&issues).badge, CheckBadge::Indeterminate);
        Ok(())
    }

    #[test]
    fn default_report_reconciles_within_year() -> Result<(), CoreError> {
        let current = canonical_snapshot(&Value::Null)?;
        let issues = check_within_year(&current, &within_year_formulas())?;
        assert!(issues.iter().all(|issue| issue.status == IssueStatus::Pass));
        let summary = summarize(&issues);
        assert_eq!(summary.badge, CheckBadge::Normal);
        assert_eq!(summary.pass, 42);
        Ok(())
    }

    #[test]
    fn within_year_detects_column_sum_and_balance_breaks() -> Result<(), CoreError> {
        let current = canonical_snapshot(&json!({
            "tableData": {
                "naturalPerson": { "newReceived": 10, "results": { "granted": 10, "totalProcessed": 10 } },
                "total": { "newReceived": 12, "results": { "granted": 10, "totalProcessed": 10 } }
            },
            "reviewLitigationData": { "review": { "maintain": 1, "correct": "/", "total": 1 } }
        }))?;
        let issues = check_within_year(&current, &within_year_formulas())?;

        let column = find(&issues, "application.column_sum.new_received");
        assert_eq!(column.status, IssueStatus::Fail);
        assert_eq!(column.delta, Some(2.0));
        let balance = find(&issues, "application.balance.total");
        assert_eq!(balance.status, IssueStatus::Fail);
        assert_eq!(find(&issues, "application.balance.natural_person").status, IssueStatus::Pass);
        assert_eq!(find(&issues, "legal_proceeding.total.review").status, IssueStatus::Unknown);

        let summary = summarize(&issues);
        assert_eq!(summary.badge, CheckBadge::Abnormal);
        assert_eq!(summary.failing_categories, vec![FormulaCategory::Application]);
        assert_eq!(summary.unknown, 1);
        Ok(())
    }

    #[test]
    fn issues_sort_by_severity_then_category_then_id() -> Result<(), CoreError> {
        let previous = canonical_snapshot(&json!({
            "activeDisclosureData": { "regulations": { "valid": 1 } },
            "tableData": { "naturalPerson": { "results": { "carriedForward": 3 } } }
        }))?;
        let current = canonical_snapshot(&Value::Null)?;
        let issues = check_cross_year(Some(&previous), &current, &cross_year_formulas())?;

        let order = issues.iter().map(|issue| issue.formula_id.as_str()).collect::<Vec<_>>();
        assert_eq!(order[0], "cross_year.stock.regulations");
        assert_eq!(order[1], "cross_year.carry_forward.natural_person");
        assert_eq!(issues[1].severity, Some(Severity::Warning));
        assert!(issues[2..].iter().all(|issue| issue.severity.is_none()));
        let tail = &order[2..];
        assert_eq!(tail.len(), 7);
        assert!(tail.windows(2).all(|pair| {
            let category = |id: &str| if id.contains("stock") { 0 } else { 1 };
            (category(pair[0]), pair[0]) <= (category(pair[1]), pair[1])
        }));
        Ok(())
    }

    #[test]
    fn fingerprints_are_stable_and_distinct() {
        let formulas = cross_year_formulas();
        let first = formulas.iter().map(Formula::fingerprint).collect::<Vec<_>>();
        let second = cross_year_formulas().iter().map(Formula::fingerprint).collect::<Vec<_>>();
        assert_eq!(first, second);
        assert!(first.iter().all(|fingerprint| fingerprint.len() == 16));
        assert_eq!(first.iter().collect::<BTreeSet<_>>().len(), first.len());
    }

    #[test]
    fn expressions_render_signed_operands() {
        let formulas = cross_year_formulas();
        let stock = find_formula(&formulas, "cross_year.stock.regulations");
        assert_eq!(
            stock.expression(),
            "current.active_disclosure:regulations:valid = previous.active_disclosure:regulations:valid \
             + current.active_disclosure:regulations:made - current.active_disclosure:regulations:repealed"
        );
    }

    #[test]
    fn invalid_formula_sets_are_rejected() {
        let mut formulas = cross_year_formulas();
        formulas.push(formulas[0].clone());
        assert!(matches!(validate_formulas(&formulas), Err(CoreError::Validation(_))));

        let mut formulas = within_year_formulas();
        formulas[0].right.clear();
        assert!(matches!(validate_formulas(&formulas), Err(CoreError::Validation(_))));

        let mut formulas = within_year_formulas();
        formulas[0].tolerance = f64::NAN;
        assert!(check_within_year(&FactSnapshot::default(), &formulas).is_err());
    }

    #[test]
    fn tolerance_overrides_apply_and_reject_unknown_ids() -> Result<(), CoreError> {
        let mut formulas = cross_year_formulas();
        let overrides = BTreeMap::from([("cross_year.stock.regulations".to_string(), 2.0)]);
        apply_tolerance_overrides(&mut formulas, &overrides)?;
        let previous = canonical_snapshot(&regulations(10, 2, 100))?;
        let current = canonical_snapshot(&regulations(12, 2, 108))?;
        let issues = check_cross_year(Some(&previous), &current, &formulas)?;
        assert_eq!(find(&issues, "cross_year.stock.regulations").status, IssueStatus::Pass);

        let unknown = BTreeMap::from([("no.such.formula".to_string(), 1.0)]);
        assert!(apply_tolerance_overrides(&mut formulas, &unknown).is_err());
        let negative = BTreeMap::from([("cross_year.stock.regulations".to_string(), -1.0)]);
        assert!(apply_tolerance_overrides(&mut formulas, &negative).is_err());
        Ok(())
    }

    #[test]
    fn summary_of_nothing_is_not_assessed() {
        let summary = summarize(&[]);
        assert_eq!(summary.badge, CheckBadge::NotAssessed);
        assert_eq!(summary.total, 0);
    }
}
