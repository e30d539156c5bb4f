use std::borrow::Cow;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::classify::classify;
use crate::skeleton::{report_template, section_templates, SectionTemplate, Template, SECTIONS_KEY};

/// Fully-shaped report: every skeleton path exists, extra content is kept.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CanonicalReport(Value);

impl CanonicalReport {
    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }

    #[must_use]
    pub fn sections(&self) -> &[Value] {
        self.0.get(SECTIONS_KEY).and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default()
    }

    /// First section of the given `type`.
    #[must_use]
    pub fn section(&self, section_type: &str) -> Option<&Value> {
        self.sections().iter().find(|section| section_type_of(section) == Some(section_type))
    }
}

/// Coerce any extraction payload into the canonical report shape. Never fails:
/// unparseable or non-object input is treated as `{}`.
#[must_use]
pub fn normalize(raw: &Value) -> CanonicalReport {
    let input = extraction_object(raw);
    let template = report_template();
    let Template::Object(fields) = &template else {
        return CanonicalReport(template.default_value());
    };

    let mut output = Map::new();
    for (key, field_template) in fields {
        let value = if key == SECTIONS_KEY {
            normalize_sections(input.get(key), &input)
        } else {
            merge(field_template, input.get(key))
        };
        output.insert(key.clone(), value);
    }
    for (key, value) in &input {
        if !output.contains_key(key) {
            output.insert(key.clone(), value.clone());
        }
    }

    CanonicalReport(Value::Object(output))
}

/// The object behind an extraction payload. A JSON string is parsed (at most twice,
/// extraction output is sometimes encoded twice); anything that does not end up as an
/// object is treated as `{}`.
#[must_use]
pub fn extraction_object(raw: &Value) -> Map<String, Value> {
    let mut current = raw.clone();
    for _ in 0..2 {
        match current {
            Value::Object(map) => return map,
            Value::String(text) => match serde_json::from_str::<Value>(&text) {
                Ok(parsed) => current = parsed,
                Err(err) => {
                    tracing::warn!(error = %err, "extraction payload is not valid JSON; using empty report");
                    return Map::new();
                }
            },
            Value::Null => return Map::new(),
            other => {
                tracing::warn!(kind = json_kind(&other), "extraction payload is not an object; using empty report");
                return Map::new();
            }
        }
    }
    match current {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Merge one candidate value against its template.
///
/// A numeric leaf becomes `0` only when the candidate is structurally absent; a
/// present value that does not classify as a number is kept verbatim so the
/// cell-level classifier still sees it as EMPTY, NA or TEXT.
#[must_use]
pub fn merge(template: &Template, candidate: Option<&Value>) -> Value {
    match template {
        Template::Number => match candidate {
            None => Value::from(0),
            Some(value) => classify(Some(value)).numeric_value.map_or_else(|| value.clone(), number_value),
        },
        Template::Text(default) => {
            candidate.cloned().unwrap_or_else(|| Value::String(default.clone()))
        }
        Template::Array { item } => match candidate {
            Some(Value::Array(items)) if !items.is_empty() => match item {
                Some(item_template) => Value::Array(
                    items.iter().map(|value| merge(item_template, Some(value))).collect(),
                ),
                None => Value::Array(items.clone()),
            },
            _ => template.default_value(),
        },
        Template::Object(fields) => {
            let empty = Map::new();
            let object = candidate.and_then(Value::as_object).unwrap_or(&empty);
            let mut output = Map::new();
            for (key, field_template) in fields {
                output.insert(key.clone(), merge(field_template, object.get(key)));
            }
            for (key, value) in object {
                if !output.contains_key(key) {
                    output.insert(key.clone(), value.clone());
                }
            }
            Value::Object(output)
        }
    }
}

fn number_value(number: f64) -> Value {
    const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;
    if number.fract() == 0.0 && number.abs() <= MAX_SAFE_INTEGER {
        #[allow(clippy::cast_possible_truncation)]
        return Value::from(number as i64);
    }
    Value::from(number)
}

fn section_type_of(section: &Value) -> Option<&str> {
    section.get("type").and_then(Value::as_str)
}

fn section_title_of(section: &Value) -> Option<&str> {
    section.get("title").and_then(Value::as_str)
}

/// Assign incoming sections to template slots.
///
/// Three passes over all templates: exact type and title, then type, then title.
/// An incoming section is used at most once. The type pass never takes a section
/// whose title is another template's canonical title, so that section can still be
/// claimed by its own slot or kept as an extra.
fn assign_sections(templates: &[SectionTemplate], incoming: &[Value]) -> Vec<Option<usize>> {
    let mut consumed = vec![false; incoming.len()];
    let mut assignment: Vec<Option<usize>> = vec![None; templates.len()];
    let canonical_titles = templates.iter().map(|template| template.title).collect::<Vec<_>>();

    claim_pass(templates, incoming, &mut consumed, &mut assignment, |template, section| {
        section_type_of(section) == Some(template.section_type)
            && section_title_of(section) == Some(template.title)
    });
    claim_pass(templates, incoming, &mut consumed, &mut assignment, |template, section| {
        let owned_elsewhere = section_title_of(section)
            .is_some_and(|title| title != template.title && canonical_titles.contains(&title));
        section_type_of(section) == Some(template.section_type) && !owned_elsewhere
    });
    claim_pass(templates, incoming, &mut consumed, &mut assignment, |template, section| {
        section_title_of(section) == Some(template.title)
    });

    assignment
}

fn claim_pass(
    templates: &[SectionTemplate],
    incoming: &[Value],
    consumed: &mut [bool],
    assignment: &mut [Option<usize>],
    matches: impl Fn(&SectionTemplate, &Value) -> bool,
) {
    for (slot, template) in templates.iter().enumerate() {
        if assignment[slot].is_some() {
            continue;
        }
        let found = incoming
            .iter()
            .enumerate()
            .position(|(index, section)| !consumed[index] && matches(template, section));
        if let Some(index) = found {
            consumed[index] = true;
            assignment[slot] = Some(index);
        }
    }
}

fn sections_of(report: &Map<String, Value>) -> &[Value] {
    report.get(SECTIONS_KEY).and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default()
}

fn top_level_block<'a>(report: &'a Map<String, Value>, data_key: &str) -> Option<&'a Value> {
    report.get(data_key).filter(|block| block.is_object())
}

/// The structured table block stored under `data_key`: the one inside the section
/// assigned to that table's slot, else the top-level copy.
pub(crate) fn structured_block<'a>(report: &'a Map<String, Value>, data_key: &str) -> Option<&'a Value> {
    let incoming = sections_of(report);
    let templates = section_templates();
    let assignment = assign_sections(&templates, incoming);

    let mut from_section = None;
    for (template, matched) in templates.iter().zip(assignment) {
        if template.data_key == Some(data_key) {
            from_section = matched.and_then(|index| incoming[index].get(data_key));
            break;
        }
    }
    from_section.filter(|block| block.is_object()).or_else(|| top_level_block(report, data_key))
}

/// Candidate for one canonical slot. A structured slot whose section brought no table
/// block takes the top-level copy of that block, so tables extracted outside the
/// section list still land in their section.
fn slot_candidate<'a>(
    template: &SectionTemplate,
    matched: Option<&'a Value>,
    report: &Map<String, Value>,
) -> Option<Cow<'a, Value>> {
    let Some(data_key) = template.data_key else {
        return matched.map(Cow::Borrowed);
    };
    let has_block = matched.and_then(|section| section.get(data_key)).is_some_and(Value::is_object);
    let top_level = if has_block { None } else { top_level_block(report, data_key) };
    let Some(block) = top_level else {
        return matched.map(Cow::Borrowed);
    };

    let mut seeded = matched.and_then(Value::as_object).cloned().unwrap_or_default();
    seeded.insert(data_key.to_string(), block.clone());
    Some(Cow::Owned(Value::Object(seeded)))
}

fn normalize_sections(incoming: Option<&Value>, report: &Map<String, Value>) -> Value {
    let incoming: &[Value] = match incoming {
        Some(Value::Array(items)) => items,
        _ => &[],
    };
    let templates = section_templates();
    let assignment = assign_sections(&templates, incoming);

    let mut output = Vec::with_capacity(templates.len() + incoming.len());
    for (template, matched) in templates.iter().zip(&assignment) {
        if let Some(index) = matched {
            tracing::debug!(
                section = template.title,
                incoming_index = index,
                "matched extracted section to canonical slot"
            );
        }
        let candidate = slot_candidate(template, matched.map(|index| &incoming[index]), report);
        output.push(merge(&template.template, candidate.as_deref()));
    }

    for (index, section) in incoming.iter().enumerate() {
        if section.is_null() || assignment.contains(&Some(index)) {
            continue;
        }
        output.push(section.clone());
    }

    Value::Array(output)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;
    use crate::skeleton::default_report;

    fn titles(report: &CanonicalReport) -> Vec<String> {
        report
            .sections()
            .iter()
            .map(|section| section_title_of(section).unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn null_and_garbage_inputs_yield_the_default_report() {
        let expected = default_report();
        assert_eq!(normalize(&Value::Null).into_value(), expected);
        assert_eq!(normalize(&json!("not json")).into_value(), expected);
        assert_eq!(normalize(&json!([1, 2, 3])).into_value(), expected);
        assert_eq!(normalize(&json!(42)).into_value(), expected);
        assert_eq!(normalize(&json!({})).into_value(), expected);
    }

    #[test]
    fn json_encoded_strings_are_parsed() {
        let report = normalize(&json!(r#"{"activeDisclosureData":{"fees":{"amount":"3"}}}"#));
        assert_eq!(report.as_value()["activeDisclosureData"]["fees"]["amount"], json!(3));
    }

    #[test]
    fn numeric_leaves_distinguish_absent_from_blank() {
        let report = normalize(&json!({
            "tableData": {
                "total": {
                    "newReceived": "",
                    "carriedOver": "/",
                    "results": { "granted": "12", "partialGrant": "abc", "totalProcessed": null }
                }
            }
        }));
        let total = &report.as_value()["tableData"]["total"];
        assert_eq!(total["newReceived"], json!(""));
        assert_eq!(total["carriedOver"], json!("/"));
        assert_eq!(total["results"]["granted"], json!(12));
        assert_eq!(total["results"]["partialGrant"], json!("abc"));
        assert_eq!(total["results"]["totalProcessed"], Value::Null);
        // structurally absent
        assert_eq!(total["results"]["carriedForward"], json!(0));
        assert_eq!(total["results"]["denied"]["stateSecret"], json!(0));
    }

    #[test]
    fn top_level_tables_seed_their_sections() {
        let report = normalize(&json!({
            "sections": [
                { "title": "三、收到和处理政府信息公开申请情况", "type": "table_3", "note": "scanned" }
            ],
            "tableData": { "total": { "carriedOver": 5 } },
            "activeDisclosureData": { "regulations": { "valid": "110" } }
        }));
        let sections = report.sections();
        assert_eq!(sections[1]["activeDisclosureData"]["regulations"]["valid"], json!(110));
        assert_eq!(sections[2]["tableData"]["total"]["carriedOver"], json!(5));
        assert_eq!(sections[2]["note"], json!("scanned"));
        assert_eq!(sections[3]["reviewLitigationData"]["review"]["total"], json!(0));
        assert_eq!(normalize(report.as_value()), report);
    }

    #[test]
    fn section_table_block_wins_over_top_level_copy() {
        let report = normalize(&json!({
            "sections": [{ "type": "table_2", "activeDisclosureData": { "fees": { "amount": 1 } } }],
            "activeDisclosureData": { "fees": { "amount": 99 } }
        }));
        assert_eq!(report.sections()[1]["activeDisclosureData"]["fees"]["amount"], json!(1));
        assert_eq!(report.as_value()["activeDisclosureData"]["fees"]["amount"], json!(99));
    }

    #[test]
    fn unknown_keys_are_copied_through() {
        let report = normalize(&json!({
            "visual_audit": { "border_missing": true },
            "activeDisclosureData": { "regulations": { "made": 1, "note": "draft" }, "extraTable": [1] }
        }));
        let value = report.as_value();
        assert_eq!(value["visual_audit"]["border_missing"], json!(true));
        assert_eq!(value["activeDisclosureData"]["regulations"]["note"], json!("draft"));
        assert_eq!(value["activeDisclosureData"]["extraTable"], json!([1]));
        assert_eq!(value["activeDisclosureData"]["regulations"]["valid"], json!(0));
    }

    #[test]
    fn sections_match_by_type_then_title_and_keep_extras() {
        let report = normalize(&json!({
            "sections": [
                { "title": "附件", "type": "appendix", "content": "见附件" },
                { "title": "总体", "type": "text", "content": "概述" },
                { "title": "四、政府信息公开行政复议、行政诉讼情况", "type": "table",
                  "reviewLitigationData": { "review": { "total": 3 } } },
                { "title": "二、主动公开", "type": "table_2",
                  "activeDisclosureData": { "regulations": { "valid": "7" } } },
                null
            ]
        }));

        let sections = report.sections();
        assert_eq!(sections.len(), 10);
        assert_eq!(sections[0]["content"], json!("概述"));
        assert_eq!(sections[0]["title"], json!("总体"));
        assert_eq!(sections[1]["activeDisclosureData"]["regulations"]["valid"], json!(7));
        assert_eq!(sections[3]["reviewLitigationData"]["review"]["total"], json!(3));
        assert_eq!(sections[3]["reviewLitigationData"]["review"]["maintain"], json!(0));
        assert_eq!(sections[4]["content"], json!(""));
        assert_eq!(sections[9]["title"], json!("附件"));
    }

    #[test]
    fn text_sections_are_not_claimed_twice() {
        let report = normalize(&json!({
            "sections": [
                { "title": "一、总体情况", "type": "text", "content": "A" },
                { "title": "五、存在的主要问题及改进情况", "type": "text", "content": "B" },
                { "title": "未知章节", "type": "text", "content": "C" }
            ]
        }));
        let sections = report.sections();
        assert_eq!(sections[0]["content"], json!("A"));
        assert_eq!(sections[4]["content"], json!("B"));
        assert_eq!(sections[5]["content"], json!("C"));
        assert_eq!(sections.len(), 9);
    }

    #[test]
    fn duplicated_sections_are_kept_as_extras() {
        let report = normalize(&json!({
            "sections": [
                { "title": "五、存在的主要问题及改进情况", "type": "text", "content": "first" },
                { "title": "五、存在的主要问题及改进情况", "type": "text", "content": "second" }
            ]
        }));
        let all_titles = titles(&report);
        assert_eq!(all_titles.len(), 10);
        assert_eq!(report.sections()[4]["content"], json!("first"));
        assert_eq!(report.sections()[9]["content"], json!("second"));
        assert_eq!(report.sections()[0]["content"], json!(""));
    }

    #[test]
    fn non_empty_free_tables_are_kept_and_empty_ones_default() {
        let report = normalize(&json!({
            "sections": [
                { "title": "七、表6", "type": "table_6", "content": [{ "row": 1 }] },
                { "title": "八、表7", "type": "table_7", "content": "oops" }
            ]
        }));
        assert_eq!(report.sections()[6]["content"], json!([{ "row": 1 }]));
        assert_eq!(report.sections()[7]["content"], json!([]));
    }

    #[test]
    fn normalize_is_idempotent_on_a_populated_report() {
        let once = normalize(&json!({
            "sections": [
                { "title": "一、总体情况", "type": "text", "content": "本年度共主动公开政府信息1000条" },
                { "type": "table_3", "tableData": {
                    "total": { "newReceived": 10, "carriedOver": "2", "results": { "carriedForward": "—" } },
                    "legalPerson": { "other": { "newReceived": "1,200" } }
                } }
            ],
            "tableData": { "naturalPerson": { "newReceived": 4 } },
            "meta": { "year": 2023 }
        }));
        let twice = normalize(once.as_value());
        assert_eq!(once, twice);
        assert_eq!(
            once.as_value()["sections"][2]["tableData"]["legalPerson"]["other"]["newReceived"],
            json!(1200)
        );
    }

    fn arb_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| json!(n)),
            (-1.0e6_f64..1.0e6).prop_map(|n| json!(n)),
            prop::sample::select(vec![
                "", "/", "—", "0", "12", "1,5", "abc", "text", "table_2", "table_3",
                "一、总体情况", "五、存在的主要问题及改进情况", "三、收到和处理政府信息公开申请情况",
            ])
            .prop_map(|s| Value::String(s.to_string())),
        ]
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let keys = prop::sample::select(vec![
            "sections", "type", "title", "content", "tableData", "activeDisclosureData",
            "reviewLitigationData", "total", "newReceived", "results", "regulations", "made",
            "review", "x",
        ])
        .prop_map(str::to_string);
        arb_leaf().prop_recursive(4, 48, 5, move |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
                prop::collection::btree_map(keys.clone(), inner, 0..5)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn property_normalize_is_idempotent(value in arb_json()) {
            let once = normalize(&value);
            let twice = normalize(once.as_value());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn property_normalize_always_has_nine_canonical_slots(value in arb_json()) {
            let report = normalize(&value);
            prop_assert!(report.sections().len() >= 9);
            prop_assert!(report.as_value()["reviewLitigationData"]["review"].is_object());
        }
    }
}
