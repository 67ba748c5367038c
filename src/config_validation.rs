//! Field-path-tracking validation context, plus a handful of standalone
//! validators the loader's projection step can call into.
//!
//! This module predates `loader.rs`; it was originally written for a
//! different config surface, but the `ValidationContext` field-path idiom
//! (enter/exit/current_path) generalizes directly to scenario projection
//! (§4.1's "every failure is reported with a precise dotted path").

use thiserror::Error;

/// Validation error with context about which field failed.
#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("Field '{field}': {message}")]
    FieldError { field: String, message: String },

    #[error("Field '{field}' is required but not provided")]
    RequiredField { field: String },

    #[error("Field '{field}': value {value} is out of range ({min} to {max})")]
    OutOfRange {
        field: String,
        value: String,
        min: String,
        max: String,
    },

    #[error("Field '{field}': invalid format - {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}': invalid enum value '{value}'. Expected one of: {expected}")]
    InvalidEnum {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Multiple validation errors: {0}")]
    Multiple(String),
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation context for building error messages: a field-path stack plus
/// an accumulator, so a deeply nested projection failure can be reported
/// with a dotted path like `steps[2].configuration.method`.
pub struct ValidationContext {
    field_path: Vec<String>,
    errors: Vec<ValidationError>,
}

impl ValidationContext {
    pub fn new() -> Self {
        Self {
            field_path: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn enter(&mut self, field: &str) {
        self.field_path.push(field.to_string());
    }

    pub fn exit(&mut self) {
        self.field_path.pop();
    }

    pub fn current_path(&self) -> String {
        self.field_path.join(".")
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn field_error(&mut self, message: String) {
        self.add_error(ValidationError::FieldError {
            field: self.current_path(),
            message,
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            let messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
            Err(ValidationError::Multiple(messages.join("; ")))
        }
    }
}

impl Default for ValidationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Validator for URLs — the same absolute-http(s) rule `Step::validate`
/// applies inline to HttpApi steps, available standalone for other callers.
pub struct UrlValidator;

impl UrlValidator {
    pub fn validate(url: &str) -> ValidationResult<()> {
        if url.is_empty() {
            return Err(ValidationError::InvalidFormat {
                field: "url".to_string(),
                message: "URL cannot be empty".to_string(),
            });
        }

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ValidationError::InvalidFormat {
                field: "url".to_string(),
                message: format!("URL must start with http:// or https://, got: {}", url),
            });
        }

        if url.contains(' ') {
            return Err(ValidationError::InvalidFormat {
                field: "url".to_string(),
                message: "URL cannot contain spaces".to_string(),
            });
        }

        Ok(())
    }
}

/// Validator for numeric ranges.
pub struct RangeValidator;

impl RangeValidator {
    pub fn validate_u64(value: u64, min: u64, max: u64, field: &str) -> ValidationResult<()> {
        if value < min || value > max {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                value: value.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        Ok(())
    }

    pub fn validate_f64(value: f64, min: f64, max: f64, field: &str) -> ValidationResult<()> {
        if value < min || value > max {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                value: value.to_string(),
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        Ok(())
    }

    pub fn validate_positive_u64(value: u64, field: &str) -> ValidationResult<()> {
        if value == 0 {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                value: "0".to_string(),
                min: "1".to_string(),
                max: "unlimited".to_string(),
            });
        }
        Ok(())
    }

    pub fn validate_positive_f64(value: f64, field: &str) -> ValidationResult<()> {
        if value <= 0.0 {
            return Err(ValidationError::OutOfRange {
                field: field.to_string(),
                value: value.to_string(),
                min: "0.0 (exclusive)".to_string(),
                max: "unlimited".to_string(),
            });
        }
        Ok(())
    }
}

/// Validator for HTTP methods.
pub struct HttpMethodValidator;

impl HttpMethodValidator {
    const VALID_METHODS: &'static [&'static str] =
        &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

    pub fn validate(method: &str) -> ValidationResult<()> {
        let method_upper = method.to_uppercase();
        if !Self::VALID_METHODS.contains(&method_upper.as_str()) {
            return Err(ValidationError::InvalidEnum {
                field: "method".to_string(),
                value: method.to_string(),
                expected: Self::VALID_METHODS.join(", "),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_validator_valid() {
        assert!(UrlValidator::validate("https://example.com").is_ok());
        assert!(UrlValidator::validate("http://localhost:8080").is_ok());
    }

    #[test]
    fn test_url_validator_invalid() {
        assert!(UrlValidator::validate("").is_err());
        assert!(UrlValidator::validate("example.com").is_err());
        assert!(UrlValidator::validate("ftp://example.com").is_err());
    }

    #[test]
    fn test_range_validator_u64() {
        assert!(RangeValidator::validate_u64(50, 1, 100, "test").is_ok());
        assert!(RangeValidator::validate_u64(0, 1, 100, "test").is_err());
        assert!(RangeValidator::validate_u64(101, 1, 100, "test").is_err());
    }

    #[test]
    fn test_range_validator_positive() {
        assert!(RangeValidator::validate_positive_u64(1, "test").is_ok());
        assert!(RangeValidator::validate_positive_u64(0, "test").is_err());
    }

    #[test]
    fn test_http_method_validator() {
        assert!(HttpMethodValidator::validate("GET").is_ok());
        assert!(HttpMethodValidator::validate("get").is_ok());
        assert!(HttpMethodValidator::validate("INVALID").is_err());
    }

    #[test]
    fn test_validation_context() {
        let mut ctx = ValidationContext::new();

        ctx.enter("config");
        ctx.enter("baseUrl");
        assert_eq!(ctx.current_path(), "config.baseUrl");

        ctx.field_error("Invalid URL".to_string());
        assert!(ctx.has_errors());

        ctx.exit();
        ctx.exit();
        assert_eq!(ctx.current_path(), "");
    }
}
