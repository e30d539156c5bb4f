use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tag persisted next to every materialized version so rows produced by an older
/// coercion rule can be told apart from rows produced by this classifier.
pub const CLASSIFIER_REVISION: &str = "semantic-v2";

const NOT_APPLICABLE_SYMBOLS: [&str; 3] = ["/", "-", "—"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SemanticKind {
    Zero,
    Empty,
    Na,
    Text,
    Numeric,
}

impl SemanticKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Zero => "ZERO",
            Self::Empty => "EMPTY",
            Self::Na => "NA",
            Self::Text => "TEXT",
            Self::Numeric => "NUMERIC",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ZERO" => Some(Self::Zero),
            "EMPTY" => Some(Self::Empty),
            "NA" => Some(Self::Na),
            "TEXT" => Some(Self::Text),
            "NUMERIC" => Some(Self::Numeric),
            _ => None,
        }
    }

    /// `true` for the two kinds that carry a numeric value.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Zero | Self::Numeric)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Classification {
    pub kind: SemanticKind,
    pub raw_value: Option<String>,
    pub numeric_value: Option<f64>,
    pub normalized_value: Option<String>,
}

impl Classification {
    fn empty(raw_value: Option<String>) -> Self {
        Self { kind: SemanticKind::Empty, raw_value, numeric_value: None, normalized_value: None }
    }

    fn number(raw_value: String, number: f64) -> Self {
        // -0 collapses onto 0 so ZERO cells always store the same value.
        let number = if number == 0.0 { 0.0 } else { number };
        let kind = if number == 0.0 { SemanticKind::Zero } else { SemanticKind::Numeric };
        Self {
            kind,
            raw_value: Some(raw_value),
            numeric_value: Some(number),
            normalized_value: Some(number.to_string()),
        }
    }

    fn text(raw_value: String, normalized: String) -> Self {
        Self {
            kind: SemanticKind::Text,
            raw_value: Some(raw_value),
            numeric_value: None,
            normalized_value: Some(normalized),
        }
    }
}

/// Classify one raw cell value. Total: every JSON value maps to exactly one kind.
///
/// Rules apply in order: blank, not-applicable symbol, finite number, text.
#[must_use]
pub fn classify(raw: Option<&Value>) -> Classification {
    match raw {
        None | Some(Value::Null) => Classification::empty(None),
        Some(Value::String(text)) => classify_str(text),
        Some(Value::Number(number)) => match number.as_f64() {
            Some(value) if value.is_finite() => Classification::number(number.to_string(), value),
            _ => Classification::text(number.to_string(), number.to_string()),
        },
        Some(Value::Bool(flag)) => Classification::text(flag.to_string(), flag.to_string()),
        Some(other) => {
            let rendered = other.to_string();
            Classification::text(rendered.clone(), rendered)
        }
    }
}

fn classify_str(text: &str) -> Classification {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Classification::empty(Some(text.to_string()));
    }

    if NOT_APPLICABLE_SYMBOLS.contains(&trimmed) {
        return Classification {
            kind: SemanticKind::Na,
            raw_value: Some(text.to_string()),
            numeric_value: None,
            normalized_value: Some(trimmed.to_string()),
        };
    }

    match parse_finite(trimmed) {
        Some(value) => Classification::number(text.to_string(), value),
        None => Classification::text(text.to_string(), trimmed.to_string()),
    }
}

/// Parse a trimmed string as a finite decimal, accepting `,`/`，` thousands
/// separators only when they sit between two ASCII digits.
fn parse_finite(trimmed: &str) -> Option<f64> {
    let chars = trimmed.chars().collect::<Vec<_>>();
    let mut cleaned = String::with_capacity(trimmed.len());
    for (index, ch) in chars.iter().enumerate() {
        if matches!(ch, ',' | '，') {
            let before = index.checked_sub(1).and_then(|i| chars.get(i));
            let after = chars.get(index + 1);
            let between_digits = before.is_some_and(char::is_ascii_digit)
                && after.is_some_and(char::is_ascii_digit);
            if !between_digits {
                return None;
            }
            continue;
        }
        cleaned.push(*ch);
    }

    // `f64::from_str` also accepts "inf"/"nan" spellings; only finite values count.
    let looks_numeric = cleaned
        .chars()
        .all(|ch| ch.is_ascii_digit() || matches!(ch, '.' | '+' | '-' | 'e' | 'E'));
    if !looks_numeric {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Numeric value of a JSON value under classifier rules, `None` unless the value is
/// ZERO or NUMERIC.
#[must_use]
pub fn numeric_value(raw: Option<&Value>) -> Option<f64> {
    classify(raw).numeric_value
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn kind_of(value: &Value) -> SemanticKind {
        classify(Some(value)).kind
    }

    #[test]
    fn classify_covers_every_listed_input_with_one_kind() {
        let cases = [
            (json!(null), SemanticKind::Empty),
            (json!(""), SemanticKind::Empty),
            (json!("/"), SemanticKind::Na),
            (json!("-"), SemanticKind::Na),
            (json!("—"), SemanticKind::Na),
            (json!("0"), SemanticKind::Zero),
            (json!(0), SemanticKind::Zero),
            (json!("5"), SemanticKind::Numeric),
            (json!(5), SemanticKind::Numeric),
            (json!("abc"), SemanticKind::Text),
            (json!("NaN"), SemanticKind::Text),
            (json!("Infinity"), SemanticKind::Text),
            (json!("-Infinity"), SemanticKind::Text),
        ];

        for (input, expected) in cases {
            let result = classify(Some(&input));
            assert_eq!(result.kind, expected, "input {input}");
            assert_eq!(result.numeric_value.is_some(), expected.is_numeric(), "input {input}");
        }
        assert_eq!(classify(None).kind, SemanticKind::Empty);
    }

    #[test]
    fn not_applicable_symbols_are_trimmed_and_kept_as_normalized_value() {
        let result = classify(Some(&json!("  — ")));
        assert_eq!(result.kind, SemanticKind::Na);
        assert_eq!(result.normalized_value.as_deref(), Some("—"));
        assert_eq!(result.raw_value.as_deref(), Some("  — "));
        assert_eq!(result.numeric_value, None);
    }

    #[test]
    fn numeric_strings_are_trimmed_and_normalized() {
        let result = classify(Some(&json!(" 12.50 ")));
        assert_eq!(result.kind, SemanticKind::Numeric);
        assert_eq!(result.numeric_value, Some(12.5));
        assert_eq!(result.normalized_value.as_deref(), Some("12.5"));

        let zero = classify(Some(&json!("0.00")));
        assert_eq!(zero.kind, SemanticKind::Zero);
        assert_eq!(zero.normalized_value.as_deref(), Some("0"));

        let negative_zero = classify(Some(&json!("-0")));
        assert_eq!(negative_zero.kind, SemanticKind::Zero);
        assert_eq!(negative_zero.numeric_value, Some(0.0));
    }

    #[test]
    fn thousands_separators_only_count_between_digits() {
        assert_eq!(classify(Some(&json!("1,200"))).numeric_value, Some(1200.0));
        assert_eq!(classify(Some(&json!("1，200，300"))).numeric_value, Some(1_200_300.0));
        assert_eq!(kind_of(&json!(",200")), SemanticKind::Text);
        assert_eq!(kind_of(&json!("12,")), SemanticKind::Text);
    }

    #[test]
    fn whitespace_only_strings_are_blank_not_zero() {
        let result = classify(Some(&json!("   ")));
        assert_eq!(result.kind, SemanticKind::Empty);
        assert_eq!(result.raw_value.as_deref(), Some("   "));
    }

    #[test]
    fn non_scalar_values_are_text() {
        assert_eq!(kind_of(&json!(true)), SemanticKind::Text);
        assert_eq!(kind_of(&json!([1, 2])), SemanticKind::Text);
        assert_eq!(kind_of(&json!({"a": 1})), SemanticKind::Text);
        assert_eq!(kind_of(&json!("12件")), SemanticKind::Text);
        assert_eq!(kind_of(&json!("inf")), SemanticKind::Text);
    }

    #[test]
    fn semantic_kind_round_trips_through_storage_labels() {
        for kind in [
            SemanticKind::Zero,
            SemanticKind::Empty,
            SemanticKind::Na,
            SemanticKind::Text,
            SemanticKind::Numeric,
        ] {
            assert_eq!(SemanticKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(SemanticKind::parse("zero"), None);
    }

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            (-1.0e12_f64..1.0e12).prop_map(|n| json!(n)),
            ".{0,12}".prop_map(Value::String),
            prop_oneof![Just("/"), Just("-"), Just("—"), Just("0"), Just(" 7 "), Just("1,000")]
                .prop_map(|s| Value::String(s.to_string())),
        ];
        leaf.prop_recursive(2, 8, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..3).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,4}", inner, 0..3)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn property_classify_is_total_and_numeric_iff_zero_or_numeric(value in arb_json()) {
            let result = classify(Some(&value));
            prop_assert_eq!(result.numeric_value.is_some(), result.kind.is_numeric());
            if let Some(number) = result.numeric_value {
                prop_assert!(number.is_finite());
                prop_assert_eq!(number == 0.0, result.kind == SemanticKind::Zero);
            }
        }
    }
}
