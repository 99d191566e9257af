use jsonschema::{validator_for, Validator};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum SchemaValidationError {
    #[error("Schema compile error: {0}")]
    SchemaCompile(String),
    #[error("{0}")]
    ValidationFailed(String),
}

/// A tool input schema compiled once at registration (draft 2020-12).
pub struct CompiledSchema {
    validator: Validator,
}

impl CompiledSchema {
    pub fn compile(schema: &Value) -> Result<Self, SchemaValidationError> {
        let validator =
            validator_for(schema).map_err(|e| SchemaValidationError::SchemaCompile(e.to_string()))?;
        Ok(Self { validator })
    }

    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validator.is_valid(instance)
    }

    /// Ok(()) if `instance` conforms, otherwise the first violation.
    pub fn validate(&self, instance: &Value) -> Result<(), SchemaValidationError> {
        self.validator
            .validate(instance)
            .map_err(|e| SchemaValidationError::ValidationFailed(e.to_string()))
    }
}

impl std::fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledSchema").finish_non_exhaustive()
    }
}
