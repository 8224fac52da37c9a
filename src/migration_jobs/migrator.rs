use crate::job_store::MigrationStrategy;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Fields every work item must carry unless configured otherwise.
pub const DEFAULT_REQUIRED_FIELDS: &[&str] = &["id", "title"];

/// Why a single work item could not be migrated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ItemError {
    #[error("item is not an object")]
    NotAnObject,

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("{0}")]
    Rejected(String),
}

/// Transform applied to each work item of an execution.
///
/// Implementations must not assume anything about ordering between items;
/// a failure only affects the item it was raised for.
pub trait ItemMigrator: Send + Sync {
    fn migrate(&self, item: &JsonValue, strategy: MigrationStrategy) -> Result<(), ItemError>;
}

/// Accepts any JSON object whose required fields are present and non-empty.
#[derive(Debug, Clone)]
pub struct RequiredFieldsMigrator {
    required_fields: Vec<String>,
}

impl RequiredFieldsMigrator {
    pub fn new(required_fields: Vec<String>) -> Self {
        Self { required_fields }
    }

    pub fn required_fields(&self) -> &[String] {
        &self.required_fields
    }
}

impl Default for RequiredFieldsMigrator {
    fn default() -> Self {
        Self::new(DEFAULT_REQUIRED_FIELDS.iter().map(|f| f.to_string()).collect())
    }
}

impl ItemMigrator for RequiredFieldsMigrator {
    fn migrate(&self, item: &JsonValue, _strategy: MigrationStrategy) -> Result<(), ItemError> {
        let object = item.as_object().ok_or(ItemError::NotAnObject)?;

        for field in &self.required_fields {
            let present = match object.get(field) {
                None | Some(JsonValue::Null) => false,
                Some(JsonValue::String(s)) => !s.is_empty(),
                Some(_) => true,
            };
            if !present {
                return Err(ItemError::MissingField(field.clone()));
            }
        }
        Ok(())
    }
}
