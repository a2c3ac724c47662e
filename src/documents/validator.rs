//! Metadata validation and normalization.
//!
//! Turns a decoded metadata mapping into a [`DocumentMetadata`]. Pure: no I/O,
//! and the clock used for defaulted timestamps is an explicit argument of
//! [`MetadataValidator::validate_at`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;

use super::config::TaxonomyConfig;
use super::error::ValidationError;
use super::id::{HierarchicalId, is_valid_id};
use super::types::DocumentMetadata;

/// Decoded metadata block, in source order.
pub type RawMetadata = IndexMap<String, Value>;

/// Canonical field names and the aliases used by older spec files.
const ID: &str = "id";
const TITLE: &str = "title";
const DOCUMENT_TYPE: (&str, &str) = ("documentType", "type");
const STATUS: &str = "status";
const PRIORITY: &str = "priority";
const CREATED_AT: (&str, &str) = ("createdAt", "created");
const UPDATED_AT: (&str, &str) = ("updatedAt", "updated");
const PARENT_ID: (&str, &str) = ("parentId", "parent");
const DEPENDENCY_IDS: (&str, &str) = ("dependencyIds", "dependencies");

/// Validates metadata against a configured taxonomy.
#[derive(Debug, Clone, Default)]
pub struct MetadataValidator {
    taxonomy: TaxonomyConfig,
}

impl MetadataValidator {
    pub fn new(taxonomy: TaxonomyConfig) -> Self {
        Self { taxonomy }
    }

    pub fn taxonomy(&self) -> &TaxonomyConfig {
        &self.taxonomy
    }

    /// Validate using the current time for defaulted timestamps.
    pub fn validate(&self, raw: RawMetadata) -> Result<DocumentMetadata, ValidationError> {
        self.validate_at(raw, Utc::now())
    }

    /// Validate, defaulting absent timestamps to `now`.
    pub fn validate_at(
        &self,
        mut raw: RawMetadata,
        now: DateTime<Utc>,
    ) -> Result<DocumentMetadata, ValidationError> {
        let id = take(&mut raw, ID, None)
            .map(|v| scalar_string(v, ID))
            .transpose()?
            .ok_or(ValidationError::MissingField { field: ID })?;
        let title = take(&mut raw, TITLE, None)
            .map(|v| scalar_string(v, TITLE))
            .transpose()?
            .filter(|t| !t.trim().is_empty())
            .ok_or(ValidationError::MissingField { field: TITLE })?;
        let document_type = take(&mut raw, DOCUMENT_TYPE.0, Some(DOCUMENT_TYPE.1))
            .map(|v| scalar_string(v, DOCUMENT_TYPE.0))
            .transpose()?
            .ok_or(ValidationError::MissingField {
                field: DOCUMENT_TYPE.0,
            })?;

        if !is_valid_id(&id) {
            return Err(ValidationError::InvalidIdFormat {
                field: ID,
                value: id,
            });
        }

        let document_type = normalize_enum(&document_type);
        if !self.taxonomy.has_type(&document_type) {
            return Err(ValidationError::InvalidEnumValue {
                field: DOCUMENT_TYPE.0,
                value: document_type,
            });
        }
        self.check_level(&id, &document_type)?;

        let status = self.enum_field(
            take(&mut raw, STATUS, None),
            STATUS,
            &self.taxonomy.statuses,
            &self.taxonomy.default_status,
        )?;
        let priority = self.enum_field(
            take(&mut raw, PRIORITY, None),
            PRIORITY,
            &self.taxonomy.priorities,
            &self.taxonomy.default_priority,
        )?;

        let created_at = take(&mut raw, CREATED_AT.0, Some(CREATED_AT.1))
            .map(|v| timestamp(v, CREATED_AT.0))
            .transpose()?
            .unwrap_or(now);
        let updated_at = take(&mut raw, UPDATED_AT.0, Some(UPDATED_AT.1))
            .map(|v| timestamp(v, UPDATED_AT.0))
            .transpose()?
            .unwrap_or(now);

        let parent_id = match take(&mut raw, PARENT_ID.0, Some(PARENT_ID.1)) {
            Some(value) => {
                let parent = scalar_string(value, PARENT_ID.0)?;
                if !is_valid_id(&parent) {
                    return Err(ValidationError::InvalidIdFormat {
                        field: PARENT_ID.0,
                        value: parent,
                    });
                }
                Some(parent)
            }
            None => HierarchicalId::parse(&id)
                .and_then(|hid| hid.parent())
                .map(|p| p.as_str().to_string()),
        };

        let dependency_ids = take(&mut raw, DEPENDENCY_IDS.0, Some(DEPENDENCY_IDS.1))
            .map(dependency_list)
            .transpose()?
            .unwrap_or_default();

        Ok(DocumentMetadata {
            id,
            title,
            document_type,
            status,
            priority,
            created_at,
            updated_at,
            parent_id,
            dependency_ids,
            extra: raw,
        })
    }

    /// Ensure the declared type matches the level implied by the id prefix.
    fn check_level(&self, id: &str, document_type: &str) -> Result<(), ValidationError> {
        let implied = HierarchicalId::parse(id)
            .and_then(|hid| hid.level_prefix())
            .and_then(|prefix| self.taxonomy.type_for_prefix(prefix));

        match implied {
            Some(implied) if implied != document_type => Err(ValidationError::InconsistentType {
                id: id.to_string(),
                declared: document_type.to_string(),
                implied: implied.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn enum_field(
        &self,
        value: Option<Value>,
        field: &'static str,
        allowed: &[String],
        default: &str,
    ) -> Result<String, ValidationError> {
        let Some(value) = value else {
            return Ok(default.to_string());
        };
        let normalized = normalize_enum(&scalar_string(value, field)?);
        if allowed.iter().any(|a| *a == normalized) {
            Ok(normalized)
        } else {
            Err(ValidationError::InvalidEnumValue {
                field,
                value: normalized,
            })
        }
    }
}

/// Remove a field by canonical name, falling back to its alias.
///
/// When both are present the canonical key wins and the alias stays in the
/// map as a pass-through field. Explicit nulls count as absent, so a null
/// canonical key still falls back to the alias.
fn take(raw: &mut RawMetadata, canonical: &str, alias: Option<&str>) -> Option<Value> {
    if let Some(value) = raw.shift_remove(canonical).filter(|v| !v.is_null()) {
        return Some(value);
    }
    alias
        .and_then(|a| raw.shift_remove(a))
        .filter(|v| !v.is_null())
}

/// Lowercase, trim, and unify separators: `In_Progress` -> `in-progress`.
fn normalize_enum(value: &str) -> String {
    value
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '_' || c == ' ' { '-' } else { c })
        .collect()
}

fn scalar_string(value: Value, field: &'static str) -> Result<String, ValidationError> {
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(ValidationError::InvalidFieldType {
            field,
            expected: "a string",
        }),
    }
}

fn dependency_list(value: Value) -> Result<Vec<String>, ValidationError> {
    let Value::Array(items) = value else {
        return Err(ValidationError::InvalidFieldType {
            field: DEPENDENCY_IDS.0,
            expected: "a list of ids",
        });
    };

    items
        .into_iter()
        .map(|item| {
            let dep = scalar_string(item, DEPENDENCY_IDS.0)?;
            if is_valid_id(&dep) {
                Ok(dep)
            } else {
                Err(ValidationError::InvalidIdFormat {
                    field: DEPENDENCY_IDS.0,
                    value: dep,
                })
            }
        })
        .collect()
}

fn timestamp(value: Value, field: &'static str) -> Result<DateTime<Utc>, ValidationError> {
    let invalid = ValidationError::InvalidFieldType {
        field,
        expected: "an RFC 3339 timestamp or YYYY-MM-DD date",
    };
    match value {
        Value::String(s) => parse_timestamp(s.trim()).ok_or(invalid),
        _ => Err(invalid),
    }
}

/// Accepts RFC 3339, naive date-times (taken as UTC) and plain dates.
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
}
