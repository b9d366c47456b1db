use crate::core::error::{Error, Result};
use crate::core::types::FieldValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Declared type of a field. Range scorer selection keys off this, never off
/// the shape of the query literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Keyword,
    Long,
    Double,
    Bool,
    Date,
}

impl FieldType {
    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Keyword => "keyword",
            FieldType::Long => "long",
            FieldType::Double => "double",
            FieldType::Bool => "bool",
            FieldType::Date => "date",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FieldType::Long | FieldType::Double | FieldType::Bool | FieldType::Date
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInfo {
    pub name: String,
    pub field_type: FieldType,
    pub indexed: bool,
    pub doc_values: bool,
}

/// Index mapping: field declarations plus a version that is bumped only on
/// mapping changes (a refresh is not a version bump). The plan cache keys
/// invalidation off this version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mapping {
    pub fields: BTreeMap<String, FieldInfo>,
    pub version: u64,
}

impl Mapping {
    pub fn new() -> Self {
        Mapping {
            fields: BTreeMap::new(),
            version: 0,
        }
    }

    pub fn with_field(mut self, name: &str, field_type: FieldType) -> Self {
        let doc_values = field_type != FieldType::Text;
        self.fields.insert(
            name.to_string(),
            FieldInfo {
                name: name.to_string(),
                field_type,
                indexed: true,
                doc_values,
            },
        );
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.get(name)
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields.get(name).map(|f| f.field_type)
    }

    pub fn require_field(&self, name: &str) -> Result<&FieldInfo> {
        self.fields
            .get(name)
            .ok_or_else(|| Error::type_mismatch(name, "a mapped field", "unmapped"))
    }

    /// Validate a document value against the declared field type.
    pub fn check_value(&self, field: &str, value: &FieldValue) -> Result<()> {
        let info = self.require_field(field)?;
        let ok = matches!(
            (info.field_type, value),
            (FieldType::Text, FieldValue::Text(_))
                | (FieldType::Keyword, FieldValue::Keyword(_))
                | (FieldType::Long, FieldValue::Long(_))
                | (FieldType::Double, FieldValue::Double(_))
                | (FieldType::Bool, FieldValue::Bool(_))
                | (FieldType::Date, FieldValue::Date(_))
        );
        if ok {
            Ok(())
        } else {
            Err(Error::type_mismatch(
                field,
                info.field_type.name(),
                value.type_name(),
            ))
        }
    }

    pub fn bump_version(&mut self) {
        self.version += 1;
    }
}

impl Default for Mapping {
    fn default() -> Self {
        Self::new()
    }
}
