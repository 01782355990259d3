//! Parameter checking against tool schemas.
//!
//! The service wraps a pluggable [`SchemaValidator`]. With the `jsonschema`
//! feature the full validator compiles and caches schemas; without it the
//! [`RequiredFieldsValidator`] fallback enforces only object type and
//! `required` keys.

use crate::traits::Tool;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use toolwright_core::{EventBus, EventKind, ToolError};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn into_result(self) -> Result<(), ToolError> {
        if self.valid {
            Ok(())
        } else {
            Err(ToolError::Validation(self.errors))
        }
    }
}

pub trait SchemaValidator: Send + Sync {
    /// Returns one message per violation; empty means valid.
    fn validate(&self, value: &Value, schema: &Value) -> Vec<String>;

    fn clear_cache(&self) {}
}

/// Minimal contract: object type and presence of every `required` key.
pub struct RequiredFieldsValidator;

impl SchemaValidator for RequiredFieldsValidator {
    fn validate(&self, value: &Value, schema: &Value) -> Vec<String> {
        if schema.get("type").and_then(Value::as_str) != Some("object") {
            return Vec::new();
        }

        let empty = serde_json::Map::new();
        let object = match value {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => return vec![format!("Expected object, got {}", json_type(other))],
        };

        schema
            .get("required")
            .and_then(Value::as_array)
            .map(|required| {
                required
                    .iter()
                    .filter_map(Value::as_str)
                    .filter(|key| !object.contains_key(*key))
                    .map(|key| format!("Missing required field: {key}"))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(feature = "jsonschema")]
pub use full::JsonSchemaValidator;

#[cfg(feature = "jsonschema")]
mod full {
    use super::SchemaValidator;
    use jsonschema::JSONSchema;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Full JSON Schema validation with a compiled-schema cache.
    #[derive(Default)]
    pub struct JsonSchemaValidator {
        cache: Mutex<HashMap<String, Arc<JSONSchema>>>,
    }

    impl JsonSchemaValidator {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn cached_schemas(&self) -> usize {
            self.cache.lock().len()
        }

        fn compiled(&self, schema: &Value) -> Result<Arc<JSONSchema>, String> {
            let key = schema.to_string();
            if let Some(compiled) = self.cache.lock().get(&key) {
                return Ok(Arc::clone(compiled));
            }
            let compiled = JSONSchema::compile(schema)
                .map(Arc::new)
                .map_err(|e| format!("Invalid schema: {e}"))?;
            self.cache.lock().insert(key, Arc::clone(&compiled));
            Ok(compiled)
        }
    }

    impl SchemaValidator for JsonSchemaValidator {
        fn validate(&self, value: &Value, schema: &Value) -> Vec<String> {
            let compiled = match self.compiled(schema) {
                Ok(compiled) => compiled,
                Err(e) => return vec![e],
            };
            // Absent arguments are validated as an empty object.
            let empty = Value::Object(serde_json::Map::new());
            let instance = if value.is_null() { &empty } else { value };
            let errors: Vec<String> = match compiled.validate(instance) {
                Ok(()) => Vec::new(),
                Err(errors) => errors
                    .map(|e| {
                        let path = e.instance_path.to_string();
                        if path.is_empty() {
                            e.to_string()
                        } else {
                            format!("{path}: {e}")
                        }
                    })
                    .collect(),
            };
            errors
        }

        fn clear_cache(&self) {
            self.cache.lock().clear();
        }
    }
}

pub type CustomValidator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

pub struct ValidationService {
    validator: Box<dyn SchemaValidator>,
    custom: RwLock<HashMap<String, CustomValidator>>,
    events: Option<EventBus>,
}

impl ValidationService {
    /// Uses the full validator when compiled in, the fallback otherwise.
    pub fn new() -> Self {
        #[cfg(feature = "jsonschema")]
        let validator: Box<dyn SchemaValidator> = Box::new(JsonSchemaValidator::new());
        #[cfg(not(feature = "jsonschema"))]
        let validator: Box<dyn SchemaValidator> = Box::new(RequiredFieldsValidator);
        Self::with_validator(validator)
    }

    pub fn with_validator(validator: Box<dyn SchemaValidator>) -> Self {
        Self {
            validator,
            custom: RwLock::new(HashMap::new()),
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn validate_against_schema(&self, value: &Value, schema: &Value) -> ValidationResult {
        let mut errors = self.validator.validate(value, schema);
        errors.extend(self.check_custom_formats(value, schema));
        ValidationResult::from_errors(errors)
    }

    /// Schema, custom formats and the tool's own checks. Publishes
    /// `validation.failed` when anything is wrong.
    pub fn validate_tool_params(&self, tool: &dyn Tool, params: &Value) -> ValidationResult {
        let mut result = self.validate_against_schema(params, &tool.schema());
        if result.valid {
            if let Err(e) = tool.validate_params(params) {
                result = ValidationResult::from_errors(vec![e]);
            }
        }

        if !result.valid {
            debug!("Validation failed for {}: {:?}", tool.name(), result.errors);
            if let Some(events) = &self.events {
                events.publish(EventKind::ValidationFailed {
                    tool: tool.name().to_string(),
                    errors: result.errors.clone(),
                });
            }
        }
        result
    }

    /// Register a rule applied to every property declaring `"format": name`.
    pub fn add_custom_validator<F>(&self, name: impl Into<String>, validator: F)
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.custom.write().insert(name.into(), Arc::new(validator));
    }

    pub fn remove_custom_validator(&self, name: &str) -> bool {
        self.custom.write().remove(name).is_some()
    }

    pub fn clear_cache(&self) {
        self.validator.clear_cache();
    }

    fn check_custom_formats(&self, value: &Value, schema: &Value) -> Vec<String> {
        let custom = self.custom.read();
        if custom.is_empty() {
            return Vec::new();
        }
        let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
            return Vec::new();
        };

        let mut errors = Vec::new();
        for (key, property) in properties {
            let Some(format) = property.get("format").and_then(Value::as_str) else {
                continue;
            };
            let (Some(check), Some(field)) = (custom.get(format), value.get(key)) else {
                continue;
            };
            if let Err(e) = check(field) {
                errors.push(format!("{key}: {e}"));
            }
        }
        errors
    }
}

impl Default for ValidationService {
    fn default() -> Self {
        Self::new()
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::EchoTool;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "content": {"type": "string"}
            },
            "required": ["path", "content"]
        })
    }

    #[test]
    fn test_fallback_reports_each_missing_key() {
        let service = ValidationService::with_validator(Box::new(RequiredFieldsValidator));
        let result = service.validate_against_schema(&json!({}), &schema());
        assert!(!result.valid);
        assert_eq!(
            result.errors,
            vec![
                "Missing required field: path".to_string(),
                "Missing required field: content".to_string()
            ]
        );
    }

    #[test]
    fn test_fallback_accepts_complete_object() {
        let service = ValidationService::with_validator(Box::new(RequiredFieldsValidator));
        let result = service.validate_against_schema(&json!({"path": "a", "content": "b"}), &schema());
        assert_eq!(result, ValidationResult::ok());
    }

    #[test]
    fn test_fallback_rejects_non_object() {
        let service = ValidationService::with_validator(Box::new(RequiredFieldsValidator));
        let result = service.validate_against_schema(&json!("nope"), &schema());
        assert_eq!(result.errors, vec!["Expected object, got string".to_string()]);
    }

    #[test]
    fn test_fallback_ignores_non_object_schema() {
        let service = ValidationService::with_validator(Box::new(RequiredFieldsValidator));
        let result = service.validate_against_schema(&json!(42), &json!({"type": "integer"}));
        assert!(result.valid);
    }

    #[cfg(feature = "jsonschema")]
    #[test]
    fn test_full_validator_checks_types_and_caches() {
        let validator = JsonSchemaValidator::new();
        let errors = validator.validate(&json!({"path": 1, "content": "x"}), &schema());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("/path"));
        assert_eq!(validator.cached_schemas(), 1);

        validator.validate(&json!({"path": "a", "content": "x"}), &schema());
        assert_eq!(validator.cached_schemas(), 1);

        validator.clear_cache();
        assert_eq!(validator.cached_schemas(), 0);
    }

    #[test]
    fn test_custom_format_validator() {
        let service = ValidationService::new();
        service.add_custom_validator("relative-path", |v| match v.as_str() {
            Some(p) if !p.starts_with('/') => Ok(()),
            _ => Err("must be a relative path".to_string()),
        });
        let schema = json!({
            "type": "object",
            "properties": {"path": {"type": "string", "format": "relative-path"}},
            "required": ["path"]
        });

        assert!(service.validate_against_schema(&json!({"path": "a.txt"}), &schema).valid);
        let result = service.validate_against_schema(&json!({"path": "/etc/passwd"}), &schema);
        assert_eq!(result.errors, vec!["path: must be a relative path".to_string()]);
    }

    #[test]
    fn test_tool_validation_publishes_event() {
        let bus = EventBus::new();
        let (_sub, mut rx) = bus.subscribe_channel("validation.failed");
        let service = ValidationService::new().with_events(bus);

        let result = service.validate_tool_params(&EchoTool, &json!({}));
        assert!(!result.valid);

        let event = rx.try_recv().unwrap();
        match event.kind {
            EventKind::ValidationFailed { tool, errors } => {
                assert_eq!(tool, "echo");
                assert!(!errors.is_empty());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_into_result_maps_to_tool_error() {
        let err = ValidationResult::from_errors(vec!["bad".into()])
            .into_result()
            .unwrap_err();
        assert_eq!(err, ToolError::Validation(vec!["bad".into()]));
    }
}
