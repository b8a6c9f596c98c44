use std::sync::Arc;

use serde::Serialize;

use super::evaluator::AccessEvaluator;
use super::principal::Principal;
use crate::errors::{AppError, AppResult};
use crate::registry::Registry;

/// Structured denial carrying the resolved names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessDenied {
    pub permission: String,
    pub resource: String,
}

impl From<AccessDenied> for AppError {
    fn from(denied: AccessDenied) -> Self {
        AppError::access_denied(denied.permission, denied.resource)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AccessDecision {
    Allowed { permission: String, resource: String },
    Denied(AccessDenied),
}

/// Checks a protected operation before its handler runs.
#[derive(Clone)]
pub struct Guard {
    registry: Arc<Registry>,
    evaluator: Arc<dyn AccessEvaluator>,
}

impl Guard {
    pub fn new(registry: Arc<Registry>, evaluator: Arc<dyn AccessEvaluator>) -> Self {
        Self { registry, evaluator }
    }

    /// Resolves the permission for `operation` on `resource` and evaluates it.
    ///
    /// The permission must be part of the descriptor's required set and held by one
    /// of the principal's roles. Unregistered resources are `NotFound`.
    pub async fn authorize(
        &self,
        principal: Option<&Principal>,
        resource: &str,
        operation: &str,
    ) -> AppResult<AccessDecision> {
        let descriptor = self
            .registry
            .descriptor(resource)
            .ok_or_else(|| AppError::not_found(format!("resource {resource} is not registered")))?;

        let permission = descriptor.permission_for(operation);
        let allowed = descriptor.required_permissions().contains(&permission)
            && self.evaluator.has_access(principal, &permission, resource).await?;

        if allowed {
            return Ok(AccessDecision::Allowed {
                permission,
                resource: resource.to_string(),
            });
        }

        tracing::warn!("Access is Denied for: {} on: {}", permission, resource);
        Ok(AccessDecision::Denied(AccessDenied {
            permission,
            resource: resource.to_string(),
        }))
    }

    /// Like [`Guard::authorize`], turning a denial into `AppError::AccessDenied`.
    pub async fn require(
        &self,
        principal: Option<&Principal>,
        resource: &str,
        operation: &str,
    ) -> AppResult<()> {
        match self.authorize(principal, resource, operation).await? {
            AccessDecision::Allowed { .. } => Ok(()),
            AccessDecision::Denied(denied) => Err(denied.into()),
        }
    }
}
