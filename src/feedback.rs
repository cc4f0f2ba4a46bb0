//! Feedback items and their presentation.
//!
//! The worker ships raw [`FeedbackItem`]s exactly as the engine produced
//! them. [`present`] maps each one onto a small closed vocabulary the UI can
//! render: a [`FeedbackKind`], a [`ResultKind`], a reason and a stable code.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw feedback as produced by the engine and collected by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FeedbackItem {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            result: None,
            reason: None,
            extra: Map::new(),
        }
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// A parse-error item for an atom that failed to convert.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new("error")
            .with_result("error")
            .with_reason("parse error")
            .with_extra("message", Value::String(message.into()))
    }
}

/// What part of checking produced the feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Scoping,
    Inference,
    Instantiation,
    Algebra,
    Error,
}

/// Outcome shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Valid,
    Invalid,
    Indeterminate,
    Error,
}

impl ResultKind {
    fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("valid") => ResultKind::Valid,
            Some("invalid") => ResultKind::Invalid,
            Some("error") => ResultKind::Error,
            _ => ResultKind::Indeterminate,
        }
    }
}

impl std::fmt::Display for ResultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultKind::Valid => write!(f, "valid"),
            ResultKind::Invalid => write!(f, "invalid"),
            ResultKind::Indeterminate => write!(f, "indeterminate"),
            ResultKind::Error => write!(f, "error"),
        }
    }
}

/// A feedback item in presentable form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presentation {
    #[serde(rename = "type")]
    pub kind: FeedbackKind,
    pub result: ResultKind,
    pub reason: String,
    pub code: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Map one raw item onto the presentable vocabulary.
///
/// Returns `None` for item types outside the closed set; callers skip those.
pub fn present(item: &FeedbackItem) -> Option<Presentation> {
    let result = ResultKind::parse(item.result.as_deref());
    let (kind, result, reason, code) = match item.kind.as_str() {
        "scoping" => {
            let (reason, code) = match item.reason.as_deref() {
                Some("redeclared") => ("redeclared variable", "scoping.redeclared"),
                Some("undeclared") => ("undeclared variable", "scoping.undeclared"),
                _ => ("scoping error", "scoping"),
            };
            (FeedbackKind::Scoping, ResultKind::Invalid, reason.to_string(), code)
        }
        "propositional" | "inference" => (
            FeedbackKind::Inference,
            result,
            reason_or(item, inference_reason(result)),
            "inference",
        ),
        "BIH" | "instantiation" => (
            FeedbackKind::Instantiation,
            result,
            reason_or(item, "instantiation hint"),
            "instantiation",
        ),
        "CAS" | "algebra" => (
            FeedbackKind::Algebra,
            result,
            reason_or(item, "algebraic check"),
            "algebra",
        ),
        "error" => (
            FeedbackKind::Error,
            ResultKind::Error,
            reason_or(item, "error"),
            "error",
        ),
        _ => return None,
    };

    Some(Presentation {
        kind,
        result,
        reason,
        code: code.to_string(),
        extra: item.extra.clone(),
    })
}

fn reason_or(item: &FeedbackItem, fallback: &str) -> String {
    item.reason.clone().unwrap_or_else(|| fallback.to_string())
}

fn inference_reason(result: ResultKind) -> &'static str {
    match result {
        ResultKind::Valid => "follows from the premises",
        ResultKind::Invalid => "does not follow from the premises",
        ResultKind::Indeterminate => "could not be checked",
        ResultKind::Error => "checking failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scoping_items_split_by_reason() {
        let redeclared = FeedbackItem::new("scoping")
            .with_reason("redeclared")
            .with_extra("redeclared", json!(["x"]));
        let p = present(&redeclared).unwrap();
        assert_eq!(p.kind, FeedbackKind::Scoping);
        assert_eq!(p.result, ResultKind::Invalid);
        assert_eq!(p.code, "scoping.redeclared");
        assert_eq!(p.extra.get("redeclared"), Some(&json!(["x"])));

        let undeclared = FeedbackItem::new("scoping").with_reason("undeclared");
        assert_eq!(present(&undeclared).unwrap().code, "scoping.undeclared");
    }

    #[test]
    fn propositional_keeps_engine_result() {
        let item = FeedbackItem::new("propositional").with_result("valid");
        let p = present(&item).unwrap();
        assert_eq!(p.kind, FeedbackKind::Inference);
        assert_eq!(p.result, ResultKind::Valid);
        assert_eq!(p.reason, "follows from the premises");
    }

    #[test]
    fn aliases_map_to_the_same_kind() {
        let bih = present(&FeedbackItem::new("BIH").with_result("invalid")).unwrap();
        let inst = present(&FeedbackItem::new("instantiation").with_result("invalid")).unwrap();
        assert_eq!(bih.kind, inst.kind);
        assert_eq!(
            present(&FeedbackItem::new("CAS")).unwrap().kind,
            FeedbackKind::Algebra
        );
    }

    #[test]
    fn unknown_result_is_indeterminate() {
        let item = FeedbackItem::new("algebra").with_result("maybe");
        assert_eq!(present(&item).unwrap().result, ResultKind::Indeterminate);
    }

    #[test]
    fn parse_errors_present_as_errors() {
        let p = present(&FeedbackItem::parse_error("unexpected ')'")).unwrap();
        assert_eq!(p.kind, FeedbackKind::Error);
        assert_eq!(p.result, ResultKind::Error);
        assert_eq!(p.reason, "parse error");
    }

    #[test]
    fn unrecognized_types_yield_nothing() {
        assert!(present(&FeedbackItem::new("telepathy")).is_none());
    }

    #[test]
    fn item_round_trips_extra_fields() {
        let raw = json!({"type": "propositional", "result": "invalid", "premises": [1, 2]});
        let item: FeedbackItem = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(item.extra.get("premises"), Some(&json!([1, 2])));
        assert_eq!(serde_json::to_value(&item).unwrap(), raw);
    }
}
