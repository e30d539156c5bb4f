//! Canonical shapes for one annual report.
//!
//! Every builder returns a freshly allocated template; nothing here is cached in a
//! shared static, so callers may mutate what they receive.

use serde_json::{Map, Value};

pub const SECTION_TEXT: &str = "text";
pub const SECTION_ACTIVE_DISCLOSURE: &str = "table_2";
pub const SECTION_APPLICATION: &str = "table_3";
pub const SECTION_LEGAL_PROCEEDING: &str = "table_4";

pub const ACTIVE_DISCLOSURE_KEY: &str = "activeDisclosureData";
pub const APPLICATION_KEY: &str = "tableData";
pub const LEGAL_PROCEEDING_KEY: &str = "reviewLitigationData";
pub const SECTIONS_KEY: &str = "sections";

/// Merge strategy for one path of the canonical shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    /// Numeric scalar, `0` when structurally absent.
    Number,
    /// String leaf with its default.
    Text(String),
    /// Homogeneous array; `item` is the template every incoming element merges against.
    Array { item: Option<Box<Template>> },
    /// Nested object with its keys in canonical order.
    Object(Vec<(String, Template)>),
}

impl Template {
    fn object<const N: usize>(fields: [(&str, Template); N]) -> Self {
        Self::Object(fields.into_iter().map(|(key, template)| (key.to_string(), template)).collect())
    }

    fn numbers<const N: usize>(keys: [&str; N]) -> Self {
        Self::Object(keys.into_iter().map(|key| (key.to_string(), Self::Number)).collect())
    }

    /// The fully-defaulted value for this template.
    #[must_use]
    pub fn default_value(&self) -> Value {
        match self {
            Self::Number => Value::from(0),
            Self::Text(default) => Value::String(default.clone()),
            Self::Array { .. } => Value::Array(Vec::new()),
            Self::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(key, template)| (key.clone(), template.default_value()))
                    .collect::<Map<_, _>>(),
            ),
        }
    }

    /// Child template for `key` when this is an object template.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Template> {
        match self {
            Self::Object(fields) => {
                fields.iter().find(|(name, _)| name == key).map(|(_, template)| template)
            }
            _ => None,
        }
    }
}

/// One entry of the canonical section list.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionTemplate {
    pub section_type: &'static str,
    pub title: &'static str,
    /// Key of the structured table block this section carries, if any.
    pub data_key: Option<&'static str>,
    pub template: Template,
}

#[must_use]
pub fn active_disclosure_template() -> Template {
    Template::object([
        ("regulations", Template::numbers(["made", "repealed", "valid"])),
        ("normativeDocuments", Template::numbers(["made", "repealed", "valid"])),
        ("licensing", Template::numbers(["processed"])),
        ("punishment", Template::numbers(["processed"])),
        ("coercion", Template::numbers(["processed"])),
        ("fees", Template::numbers(["amount"])),
    ])
}

fn application_results_template() -> Template {
    Template::object([
        ("granted", Template::Number),
        ("partialGrant", Template::Number),
        (
            "denied",
            Template::numbers([
                "stateSecret",
                "lawForbidden",
                "safetyStability",
                "thirdPartyRights",
                "internalAffairs",
                "processInfo",
                "enforcementCase",
                "adminQuery",
            ]),
        ),
        ("unableToProvide", Template::numbers(["noInfo", "needCreation", "unclear"])),
        (
            "notProcessed",
            Template::numbers([
                "complaint",
                "repeat",
                "publication",
                "massiveRequests",
                "confirmInfo",
            ]),
        ),
        ("other", Template::numbers(["overdueCorrection", "overdueFee", "otherReasons"])),
        ("totalProcessed", Template::Number),
        ("carriedForward", Template::Number),
    ])
}

fn applicant_template() -> Template {
    Template::object([
        ("newReceived", Template::Number),
        ("carriedOver", Template::Number),
        ("results", application_results_template()),
    ])
}

#[must_use]
pub fn application_template() -> Template {
    Template::object([
        ("naturalPerson", applicant_template()),
        (
            "legalPerson",
            Template::object([
                ("commercial", applicant_template()),
                ("research", applicant_template()),
                ("social", applicant_template()),
                ("legal", applicant_template()),
                ("other", applicant_template()),
            ]),
        ),
        ("total", applicant_template()),
    ])
}

fn proceeding_outcomes_template() -> Template {
    Template::numbers(["maintain", "correct", "other", "unfinished", "total"])
}

#[must_use]
pub fn review_litigation_template() -> Template {
    Template::object([
        ("review", proceeding_outcomes_template()),
        ("litigationDirect", proceeding_outcomes_template()),
        ("litigationPostReview", proceeding_outcomes_template()),
    ])
}

fn text_section(title: &'static str) -> SectionTemplate {
    SectionTemplate {
        section_type: SECTION_TEXT,
        title,
        data_key: None,
        template: Template::object([
            ("title", Template::Text(title.to_string())),
            ("type", Template::Text(SECTION_TEXT.to_string())),
            ("content", Template::Text(String::new())),
        ]),
    }
}

fn data_section(
    section_type: &'static str,
    title: &'static str,
    data_key: &'static str,
    data: Template,
) -> SectionTemplate {
    SectionTemplate {
        section_type,
        title,
        data_key: Some(data_key),
        template: Template::object([
            ("title", Template::Text(title.to_string())),
            ("type", Template::Text(section_type.to_string())),
            (data_key, data),
        ]),
    }
}

fn free_table_section(section_type: &'static str, title: &'static str) -> SectionTemplate {
    SectionTemplate {
        section_type,
        title,
        data_key: None,
        template: Template::object([
            ("title", Template::Text(title.to_string())),
            ("type", Template::Text(section_type.to_string())),
            ("content", Template::Array { item: None }),
        ]),
    }
}

/// The nine canonical sections, in report order.
#[must_use]
pub fn section_templates() -> Vec<SectionTemplate> {
    vec![
        text_section("一、总体情况"),
        data_section(
            SECTION_ACTIVE_DISCLOSURE,
            "二、主动公开政府信息情况",
            ACTIVE_DISCLOSURE_KEY,
            active_disclosure_template(),
        ),
        data_section(
            SECTION_APPLICATION,
            "三、收到和处理政府信息公开申请情况",
            APPLICATION_KEY,
            application_template(),
        ),
        data_section(
            SECTION_LEGAL_PROCEEDING,
            "四、政府信息公开行政复议、行政诉讼情况",
            LEGAL_PROCEEDING_KEY,
            review_litigation_template(),
        ),
        text_section("五、存在的主要问题及改进情况"),
        text_section("六、其他需要报告的事项"),
        free_table_section("table_6", "七、表6"),
        free_table_section("table_7", "八、表7"),
        free_table_section("table_8", "九、表8"),
    ]
}

/// Envelope template for the top-level copies of the three structured tables.
///
/// `sections` is listed so key order is stable; the section list itself is merged
/// by [`crate::normalize`], not through this template.
#[must_use]
pub fn report_template() -> Template {
    Template::object([
        (SECTIONS_KEY, Template::Array { item: None }),
        (ACTIVE_DISCLOSURE_KEY, active_disclosure_template()),
        (APPLICATION_KEY, application_template()),
        (LEGAL_PROCEEDING_KEY, review_litigation_template()),
    ])
}

/// The all-default canonical report.
#[must_use]
pub fn default_report() -> Value {
    let mut report = report_template().default_value();
    if let Value::Object(map) = &mut report {
        map.insert(
            SECTIONS_KEY.to_string(),
            Value::Array(
                section_templates()
                    .iter()
                    .map(|section| section.template.default_value())
                    .collect(),
            ),
        );
    }
    report
}
