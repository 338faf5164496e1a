//! PATCH flavours accepted by the resource store.

use crate::store::error::StoreError;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchType {
    /// RFC 7386 JSON merge patch
    Merge,
    /// RFC 6902 JSON patch
    Json,
    /// Applied as a merge patch; list merge keys are not honoured
    StrategicMerge,
    /// Server-side apply, applied as a merge patch without field ownership
    Apply,
}

impl PatchType {
    pub const MERGE: &'static str = "application/merge-patch+json";
    pub const JSON: &'static str = "application/json-patch+json";
    pub const STRATEGIC_MERGE: &'static str = "application/strategic-merge-patch+json";
    pub const APPLY_YAML: &'static str = "application/apply-patch+yaml";

    /// Patch type for a request `Content-Type` (without parameters).
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type {
            Self::MERGE => Some(PatchType::Merge),
            Self::JSON => Some(PatchType::Json),
            Self::STRATEGIC_MERGE => Some(PatchType::StrategicMerge),
            Self::APPLY_YAML | "application/apply-patch+json" => Some(PatchType::Apply),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            PatchType::Merge => Self::MERGE,
            PatchType::Json => Self::JSON,
            PatchType::StrategicMerge => Self::STRATEGIC_MERGE,
            PatchType::Apply => Self::APPLY_YAML,
        }
    }
}

/// Apply `patch` to a copy of `target`.
pub fn apply_patch(target: &Value, patch_type: PatchType, patch: &Value) -> Result<Value, StoreError> {
    let mut doc = target.clone();
    match patch_type {
        PatchType::Json => {
            let operations: json_patch::Patch = serde_json::from_value(patch.clone())
                .map_err(|e| StoreError::BadRequest(format!("invalid JSON patch: {e}")))?;
            json_patch::patch(&mut doc, &operations.0)
                .map_err(|e| StoreError::Invalid(format!("JSON patch could not be applied: {e}")))?;
        }
        PatchType::Merge | PatchType::StrategicMerge | PatchType::Apply => {
            if !patch.is_object() {
                return Err(StoreError::BadRequest(
                    "merge patch body must be a JSON object".to_string(),
                ));
            }
            json_patch::merge(&mut doc, patch);
        }
    }
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("application/merge-patch+json", Some(PatchType::Merge))]
    #[case("application/json-patch+json", Some(PatchType::Json))]
    #[case("application/strategic-merge-patch+json", Some(PatchType::StrategicMerge))]
    #[case("application/apply-patch+yaml", Some(PatchType::Apply))]
    #[case("application/json", None)]
    fn test_from_content_type(#[case] content_type: &str, #[case] expected: Option<PatchType>) {
        assert_eq!(PatchType::from_content_type(content_type), expected);
    }

    #[rstest]
    fn test_merge_patch_sets_and_removes() {
        let target = json!({"metadata": {"labels": {"a": "1", "b": "2"}}, "spec": {"replicas": 1}});
        let patched = apply_patch(
            &target,
            PatchType::Merge,
            &json!({"metadata": {"labels": {"b": null, "c": "3"}}, "spec": {"replicas": 3}}),
        )
        .unwrap();
        assert_eq!(
            patched,
            json!({"metadata": {"labels": {"a": "1", "c": "3"}}, "spec": {"replicas": 3}})
        );
    }

    #[rstest]
    fn test_json_patch_operations() {
        let target = json!({"metadata": {"name": "a"}, "spec": {"ports": [80]}});
        let patched = apply_patch(
            &target,
            PatchType::Json,
            &json!([
                {"op": "add", "path": "/spec/ports/-", "value": 443},
                {"op": "replace", "path": "/metadata/name", "value": "a"},
                {"op": "add", "path": "/metadata/annotations", "value": {"x": "y"}}
            ]),
        )
        .unwrap();
        assert_eq!(patched["spec"]["ports"], json!([80, 443]));
        assert_eq!(patched["metadata"]["annotations"]["x"], "y");
    }

    #[rstest]
    fn test_json_patch_failed_test_is_invalid() {
        let target = json!({"spec": {"replicas": 1}});
        let result = apply_patch(
            &target,
            PatchType::Json,
            &json!([{"op": "test", "path": "/spec/replicas", "value": 2}]),
        );
        assert!(matches!(result, Err(StoreError::Invalid(_))));
    }

    #[rstest]
    #[case(PatchType::Json, json!({"op": "add"}))]
    #[case(PatchType::Merge, json!([1, 2]))]
    fn test_malformed_patch_is_bad_request(#[case] patch_type: PatchType, #[case] patch: Value) {
        let result = apply_patch(&json!({}), patch_type, &patch);
        assert!(matches!(result, Err(StoreError::BadRequest(_))));
    }
}
