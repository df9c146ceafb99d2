//! Configuration validation

use crate::schema::{RawConfig, RawResource};
use labpool_api::ResourceKind;
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Resource '{resource_id}': {message}")]
    ResourceError {
        resource_id: String,
        message: String,
    },

    #[error("Duplicate resource ID: {0}")]
    DuplicateResourceId(String),

    #[error("Duplicate resource name: {0}")]
    DuplicateResourceName(String),

    #[error("Duplicate resource address: {0}")]
    DuplicateResourceAddress(String),

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let mut seen_ids = HashSet::new();
    let mut seen_names = HashSet::new();
    let mut seen_addresses = HashSet::new();
    for resource in &config.resources {
        if !seen_ids.insert(&resource.id) {
            errors.push(ValidationError::DuplicateResourceId(resource.id.clone()));
        }
        if !seen_names.insert(&resource.name) {
            errors.push(ValidationError::DuplicateResourceName(resource.name.clone()));
        }
        if !seen_addresses.insert(&resource.address) {
            errors.push(ValidationError::DuplicateResourceAddress(
                resource.address.clone(),
            ));
        }
    }

    for resource in &config.resources {
        errors.extend(validate_resource(resource));
    }

    if config.defaults.session_minutes == Some(0) {
        errors.push(ValidationError::GlobalError(
            "defaults.session_minutes must be greater than zero".into(),
        ));
    }
    if config.defaults.extension_minutes == Some(0) {
        errors.push(ValidationError::GlobalError(
            "defaults.extension_minutes must be greater than zero".into(),
        ));
    }
    if config.service.scan_interval_seconds == Some(0) {
        errors.push(ValidationError::GlobalError(
            "service.scan_interval_seconds must be greater than zero".into(),
        ));
    }

    errors
}

fn validate_resource(resource: &RawResource) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if resource.id.is_empty() {
        errors.push(ValidationError::ResourceError {
            resource_id: resource.id.clone(),
            message: "id cannot be empty".into(),
        });
    }

    if resource.name.trim().is_empty() {
        errors.push(ValidationError::ResourceError {
            resource_id: resource.id.clone(),
            message: "name cannot be empty".into(),
        });
    }

    if resource.address.trim().is_empty() {
        errors.push(ValidationError::ResourceError {
            resource_id: resource.id.clone(),
            message: "address cannot be empty".into(),
        });
    }

    if ResourceKind::parse(&resource.kind).is_none() {
        errors.push(ValidationError::ResourceError {
            resource_id: resource.id.clone(),
            message: format!(
                "unknown kind '{}' (expected windows, ubuntu, linux, or macos)",
                resource.kind
            ),
        });
    }

    errors
}
