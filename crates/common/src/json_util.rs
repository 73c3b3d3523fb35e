//! Raw JSON document surgery.
//!
//! The scanner locates and removes nested members of a JSON byte buffer
//! without decoding the values it walks past: each traversed level is split
//! into `key -> raw bytes` pairs, so unrelated members are written back
//! verbatim and in their original order.

use std::borrow::Cow;

use error_stack::{Report, ResultExt};
use indexmap::IndexMap;
use serde::de::IgnoredAny;
use serde_json::value::RawValue;
use serde_json::{json, Map, Value};

use crate::error::PipelineError;

type RawObject = IndexMap<String, Box<RawValue>>;

/// Result of [`find_and_drop`].
#[derive(Debug)]
pub struct Dropped<'a> {
    /// The document with the member removed, or the input untouched when the
    /// path did not exist.
    pub document: Cow<'a, [u8]>,
    /// The raw bytes that lived at the path.
    pub removed: Option<Box<RawValue>>,
}

impl Dropped<'_> {
    /// Removed bytes, empty when nothing was found at the path.
    #[must_use]
    pub fn removed_bytes(&self) -> &[u8] {
        self.removed
            .as_deref()
            .map_or(&[][..], |raw| raw.get().as_bytes())
    }
}

/// Removes the member at `path` and returns it with the pruned document.
///
/// Intermediate members that are not objects end the walk as "not found".
///
/// # Errors
///
/// Returns [`PipelineError::Parse`] if any traversed level is not valid JSON.
pub fn find_and_drop<'a>(
    document: &'a [u8],
    path: &[&str],
) -> Result<Dropped<'a>, Report<PipelineError>> {
    match drop_path(document, path)? {
        Some((pruned, removed)) => Ok(Dropped {
            document: Cow::Owned(pruned.into_bytes()),
            removed: Some(removed),
        }),
        None => Ok(Dropped {
            document: Cow::Borrowed(document),
            removed: None,
        }),
    }
}

/// Returns the raw bytes at `path` without modifying the document.
///
/// # Errors
///
/// Returns [`PipelineError::Parse`] if any traversed level is not valid JSON.
pub fn find_element(
    document: &[u8],
    path: &[&str],
) -> Result<Option<Box<RawValue>>, Report<PipelineError>> {
    let Some((head, rest)) = path.split_first() else {
        return Ok(None);
    };
    let Some(mut object) = parse_object(document)? else {
        return Ok(None);
    };
    let Some(child) = object.swap_remove(*head) else {
        return Ok(None);
    };
    if rest.is_empty() {
        return Ok(Some(child));
    }
    find_element(child.get().as_bytes(), rest)
}

fn drop_path(
    document: &[u8],
    path: &[&str],
) -> Result<Option<(String, Box<RawValue>)>, Report<PipelineError>> {
    let Some((head, rest)) = path.split_first() else {
        return Ok(None);
    };
    let Some(mut object) = parse_object(document)? else {
        return Ok(None);
    };

    if rest.is_empty() {
        let Some(removed) = object.shift_remove(*head) else {
            return Ok(None);
        };
        return Ok(Some((encode_object(&object)?, removed)));
    }

    let Some(child) = object.get_mut(*head) else {
        return Ok(None);
    };
    let Some((pruned_child, removed)) = drop_path(child.get().as_bytes(), rest)? else {
        return Ok(None);
    };
    *child = RawValue::from_string(pruned_child).change_context(PipelineError::Parse {
        message: format!("Failed to splice pruned member '{head}'"),
    })?;

    Ok(Some((encode_object(&object)?, removed)))
}

/// Splits a JSON object into raw members. Valid non-object JSON yields `None`.
fn parse_object(document: &[u8]) -> Result<Option<RawObject>, Report<PipelineError>> {
    let first = document
        .iter()
        .copied()
        .find(|byte| !byte.is_ascii_whitespace());

    if first == Some(b'{') {
        let object = serde_json::from_slice::<RawObject>(document).change_context(
            PipelineError::Parse {
                message: "Invalid JSON object".to_string(),
            },
        )?;
        return Ok(Some(object));
    }

    serde_json::from_slice::<IgnoredAny>(document).change_context(PipelineError::Parse {
        message: "Invalid JSON value".to_string(),
    })?;
    Ok(None)
}

fn encode_object(object: &RawObject) -> Result<String, Report<PipelineError>> {
    serde_json::to_string(object).change_context(PipelineError::Parse {
        message: "Failed to re-encode JSON object".to_string(),
    })
}

/// Applies a JSON merge-patch (RFC 7396) onto `target` in place.
///
/// Object members merge recursively, `null` members delete the target key and
/// every other patch value replaces the target value wholesale.
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Builds the `{"ext":{"data": <captured>}}` patch that re-homes extracted
/// first-party data.
///
/// # Errors
///
/// Returns [`PipelineError::Merge`] if the captured bytes are not valid JSON.
pub fn build_ext_data(captured: &RawValue) -> Result<Value, Report<PipelineError>> {
    let data: Value =
        serde_json::from_str(captured.get()).change_context(PipelineError::Merge {
            message: "Captured first-party data is not valid JSON".to_string(),
        })?;
    Ok(json!({ "ext": { "data": data } }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_value(bytes: &[u8]) -> Value {
        serde_json::from_slice(bytes).expect("should be valid JSON")
    }

    #[test]
    fn test_find_and_drop_nested_member() {
        let doc = br#"{"id":"1","site":{"page":"p","data":{"k":"v"},"name":"n"},"tmax":10}"#;
        let dropped = find_and_drop(doc, &["site", "data"]).expect("should scan");

        assert_eq!(dropped.removed_bytes(), br#"{"k":"v"}"#);
        assert_eq!(
            dropped.document.as_ref(),
            br#"{"id":"1","site":{"page":"p","name":"n"},"tmax":10}"#
        );
    }

    #[test]
    fn test_find_and_drop_keeps_unrelated_bytes_verbatim() {
        let doc = br#"{"imp":[ {"id" : "1"} ],"site":{"data":1}}"#;
        let dropped = find_and_drop(doc, &["site", "data"]).expect("should scan");

        assert_eq!(
            dropped.document.as_ref(),
            br#"{"imp":[ {"id" : "1"} ],"site":{}}"#
        );
    }

    #[test]
    fn test_find_and_drop_missing_path_borrows_input() {
        let doc = br#"{"site":{"page":"p"}}"#;
        let dropped = find_and_drop(doc, &["site", "data"]).expect("should scan");

        assert!(dropped.removed.is_none());
        assert!(dropped.removed_bytes().is_empty());
        assert!(matches!(dropped.document, Cow::Borrowed(_)));

        let dropped = find_and_drop(doc, &["app", "data"]).expect("should scan");
        assert!(dropped.removed.is_none());
    }

    #[test]
    fn test_find_and_drop_through_non_object_is_not_found() {
        let doc = br#"{"site":"not-an-object"}"#;
        let dropped = find_and_drop(doc, &["site", "data"]).expect("should scan");
        assert!(dropped.removed.is_none());
    }

    #[test]
    fn test_find_and_drop_rejects_invalid_json() {
        let err = find_and_drop(br#"{"site":{"data":}"#, &["site", "data"])
            .expect_err("should fail");
        assert!(matches!(
            err.current_context(),
            PipelineError::Parse { .. }
        ));

        let err = find_and_drop(b"nope", &["site"]).expect_err("should fail");
        assert!(matches!(
            err.current_context(),
            PipelineError::Parse { .. }
        ));
    }

    #[test]
    fn test_find_element_does_not_modify() {
        let doc = br#"{"user":{"data":[{"id":"1"}]}}"#;
        let found = find_element(doc, &["user", "data"])
            .expect("should scan")
            .expect("should find");
        assert_eq!(found.get(), r#"[{"id":"1"}]"#);
    }

    #[test]
    fn test_find_and_drop_top_level() {
        let doc = br#"{"a":1,"b":2}"#;
        let dropped = find_and_drop(doc, &["a"]).expect("should scan");
        assert_eq!(dropped.removed_bytes(), b"1");
        assert_eq!(as_value(&dropped.document), json!({"b": 2}));
    }

    #[test]
    fn test_merge_patch_rfc7396_semantics() {
        let mut target = json!({
            "a": "b",
            "c": {"d": "e", "f": "g"},
            "list": [1, 2, 3]
        });
        let patch = json!({
            "a": "z",
            "c": {"f": null, "h": "i"},
            "list": [4]
        });
        merge_patch(&mut target, &patch);

        assert_eq!(
            target,
            json!({
                "a": "z",
                "c": {"d": "e", "h": "i"},
                "list": [4]
            })
        );
    }

    #[test]
    fn test_merge_patch_replaces_scalar_with_object() {
        let mut target = json!({"ext": "scalar"});
        merge_patch(&mut target, &json!({"ext": {"data": {"k": null, "x": 1}}}));
        assert_eq!(target, json!({"ext": {"data": {"x": 1}}}));
    }

    #[test]
    fn test_build_ext_data() {
        let raw = RawValue::from_string(r#"{"customKey":"customValue"}"#.to_string())
            .expect("valid raw value");
        let patch = build_ext_data(&raw).expect("should build");
        assert_eq!(
            patch,
            json!({"ext": {"data": {"customKey": "customValue"}}})
        );
    }
}
