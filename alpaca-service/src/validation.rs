//! Validation Traits
//!
//! Input checks shared by the services.

use crate::error::{ServiceError, ServiceResult};

/// Trait for validating non-empty strings.
pub trait ValidateNonEmpty {
    /// Fails with a `ValidationFailed` naming `field_name` when the value is
    /// empty or whitespace-only.
    fn validate_non_empty(&self, field_name: &str) -> ServiceResult<()>;
}

impl ValidateNonEmpty for str {
    fn validate_non_empty(&self, field_name: &str) -> ServiceResult<()> {
        if self.trim().is_empty() {
            return Err(ServiceError::missing_field(field_name));
        }
        Ok(())
    }
}

impl ValidateNonEmpty for String {
    fn validate_non_empty(&self, field_name: &str) -> ServiceResult<()> {
        self.as_str().validate_non_empty(field_name)
    }
}

/// An absent optional field is fine; a present one must be non-empty.
impl<T: ValidateNonEmpty> ValidateNonEmpty for Option<T> {
    fn validate_non_empty(&self, field_name: &str) -> ServiceResult<()> {
        match self {
            Some(value) => value.validate_non_empty(field_name),
            None => Ok(()),
        }
    }
}

/// Trait for validating page sizes.
pub trait ValidatePage {
    /// Fails unless `1 <= self <= max`.
    fn validate_page_size(&self, field_name: &str, max: u64) -> ServiceResult<()>;
}

impl ValidatePage for u64 {
    fn validate_page_size(&self, field_name: &str, max: u64) -> ServiceResult<()> {
        if *self == 0 || *self > max {
            return Err(ServiceError::validation_failed(format!(
                "Field '{}' must be between 1 and {}",
                field_name, max
            )));
        }
        Ok(())
    }
}
