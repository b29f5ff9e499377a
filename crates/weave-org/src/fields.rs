//! Field-level application of proposal evolutions to entities.
//!
//! Evolutions address entity fields by path (`name`, `purpose`, ...).
//! A `remove` change clears optional fields; required fields reject it.

use crate::OrgError;
use weave_types::{
    ChangeKind, Circle, CircleId, CircleType, DecisionModel, EntityStatus, Role,
};

fn required_string(field: &str, value: Option<&serde_json::Value>) -> Result<String, OrgError> {
    match value.and_then(|v| v.as_str()) {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(OrgError::InvalidValue {
            field: field.to_string(),
            reason: "expected a non-empty string".to_string(),
        }),
    }
}

fn optional_string(
    field: &str,
    value: Option<&serde_json::Value>,
    kind: ChangeKind,
) -> Result<Option<String>, OrgError> {
    if kind == ChangeKind::Remove {
        return Ok(None);
    }
    match value {
        Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
        Some(serde_json::Value::Null) | None => Ok(None),
        Some(_) => Err(OrgError::InvalidValue {
            field: field.to_string(),
            reason: "expected a string".to_string(),
        }),
    }
}

fn parse_enum<T: serde::de::DeserializeOwned>(
    field: &str,
    value: Option<&serde_json::Value>,
) -> Result<T, OrgError> {
    let value = value.ok_or_else(|| OrgError::InvalidValue {
        field: field.to_string(),
        reason: "missing value".to_string(),
    })?;
    serde_json::from_value(value.clone()).map_err(|e| OrgError::InvalidValue {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

/// Apply one evolution to a circle. Returns true when the name changed,
/// so the caller can regenerate the slug.
pub(crate) fn apply_circle_field(
    circle: &mut Circle,
    field_path: &str,
    after: Option<&serde_json::Value>,
    kind: ChangeKind,
) -> Result<bool, OrgError> {
    match field_path {
        "name" => {
            if kind == ChangeKind::Remove {
                return Err(OrgError::InvalidValue {
                    field: "name".to_string(),
                    reason: "name is required".to_string(),
                });
            }
            circle.name = required_string("name", after)?;
            Ok(true)
        }
        "purpose" => {
            circle.purpose = optional_string("purpose", after, kind)?;
            Ok(false)
        }
        "parent_circle_id" => {
            circle.parent_circle_id = if kind == ChangeKind::Remove {
                None
            } else {
                Some(CircleId::new(required_string("parent_circle_id", after)?))
            };
            Ok(false)
        }
        "circle_type" => {
            circle.circle_type = if kind == ChangeKind::Remove {
                None
            } else {
                Some(parse_enum::<CircleType>("circle_type", after)?)
            };
            Ok(false)
        }
        "decision_model" => {
            circle.decision_model = if kind == ChangeKind::Remove {
                None
            } else {
                Some(parse_enum::<DecisionModel>("decision_model", after)?)
            };
            Ok(false)
        }
        "status" => {
            circle.status = parse_enum::<EntityStatus>("status", after)?;
            Ok(false)
        }
        other => Err(OrgError::UnknownField(other.to_string())),
    }
}

/// Apply one evolution to a role.
pub(crate) fn apply_role_field(
    role: &mut Role,
    field_path: &str,
    after: Option<&serde_json::Value>,
    kind: ChangeKind,
) -> Result<(), OrgError> {
    match field_path {
        "name" => {
            if kind == ChangeKind::Remove {
                return Err(OrgError::InvalidValue {
                    field: "name".to_string(),
                    reason: "name is required".to_string(),
                });
            }
            role.name = required_string("name", after)?;
            Ok(())
        }
        "purpose" => {
            role.purpose = optional_string("purpose", after, kind)?;
            Ok(())
        }
        "is_hiring" => {
            role.is_hiring = after.and_then(|v| v.as_bool()).ok_or_else(|| {
                OrgError::InvalidValue {
                    field: "is_hiring".to_string(),
                    reason: "expected a boolean".to_string(),
                }
            })?;
            Ok(())
        }
        "status" => {
            role.status = parse_enum::<EntityStatus>("status", after)?;
            Ok(())
        }
        other => Err(OrgError::UnknownField(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weave_types::{PersonId, WorkspaceId};

    fn circle() -> Circle {
        let now = chrono::Utc::now();
        Circle {
            id: CircleId::generate(),
            workspace_id: WorkspaceId::generate(),
            name: "Ops".to_string(),
            slug: "ops".to_string(),
            purpose: Some("keep things running".to_string()),
            parent_circle_id: None,
            status: EntityStatus::Active,
            circle_type: None,
            decision_model: None,
            version: 1,
            created_by: PersonId::generate(),
            created_at: now,
            updated_at: now,
            updated_by: None,
            archived_at: None,
            archived_by: None,
        }
    }

    #[test]
    fn rename_reports_name_change() {
        let mut c = circle();
        let changed = apply_circle_field(
            &mut c,
            "name",
            Some(&json!("Operations")),
            ChangeKind::Update,
        )
        .unwrap();
        assert!(changed);
        assert_eq!(c.name, "Operations");
    }

    #[test]
    fn remove_clears_optional_field() {
        let mut c = circle();
        apply_circle_field(&mut c, "purpose", None, ChangeKind::Remove).unwrap();
        assert_eq!(c.purpose, None);
    }

    #[test]
    fn remove_of_required_field_rejected() {
        let mut c = circle();
        let err = apply_circle_field(&mut c, "name", None, ChangeKind::Remove).unwrap_err();
        assert!(matches!(err, OrgError::InvalidValue { .. }));
    }

    #[test]
    fn enum_fields_parse_snake_case() {
        let mut c = circle();
        apply_circle_field(
            &mut c,
            "decision_model",
            Some(&json!("consent")),
            ChangeKind::Add,
        )
        .unwrap();
        assert_eq!(c.decision_model, Some(DecisionModel::Consent));
    }

    #[test]
    fn unknown_field_rejected() {
        let mut c = circle();
        let err =
            apply_circle_field(&mut c, "budget", Some(&json!(1)), ChangeKind::Add).unwrap_err();
        assert!(matches!(err, OrgError::UnknownField(_)));
    }
}
