//! Validation utilities

use crate::types::*;

/// Validate that an account ID is valid
pub fn validate_account_id(account_id: &str) -> PipelineResult<()> {
    if account_id.trim().is_empty() {
        return Err(ImportError::Validation(
            "Account ID cannot be empty".to_string(),
        ));
    }

    if account_id.len() > 50 {
        return Err(ImportError::Validation(
            "Account ID cannot exceed 50 characters".to_string(),
        ));
    }

    // Check for valid characters (alphanumeric, dashes, underscores)
    if !account_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ImportError::Validation(
            "Account ID can only contain alphanumeric characters, dashes, and underscores"
                .to_string(),
        ));
    }

    Ok(())
}

/// Validate that a source descriptor names a format
pub fn validate_source(source: &SourceDescriptor) -> PipelineResult<()> {
    if source.format.trim().is_empty() {
        return Err(ImportError::Validation(
            "Source format cannot be empty".to_string(),
        ));
    }

    if source.name.len() > 500 {
        return Err(ImportError::Validation(
            "Source name cannot exceed 500 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate an import request before any stage runs
pub fn validate_request(request: &ImportRequest) -> PipelineResult<()> {
    validate_account_id(&request.account_id)?;
    validate_source(&request.source)?;
    Ok(())
}
