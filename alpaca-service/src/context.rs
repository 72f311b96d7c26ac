//! Per-request context: who is calling, and when to give up.
//!
//! Every repository call made by a service runs through
//! [`RequestContext::run`], which races it against the request's
//! cancellation token and deadline. A call that loses the race is dropped
//! before its result is observed.

use std::future::Future;
use std::time::Duration;

use alpaca_core::{AlpacaResult, Role, UserId};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ServiceError, ServiceResult};

/// Authenticated identity of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    pub username: String,
    pub role: Role,
}

impl Caller {
    pub fn user(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            role: Role::User,
        }
    }

    pub fn admin(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

/// Caller identity plus cancellation and deadline for one request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    caller: Option<Caller>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// A request with no authenticated caller.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_caller(caller: Caller) -> Self {
        Self {
            caller: Some(caller),
            ..Self::default()
        }
    }

    /// Share cancellation with an outer scope (e.g. a connection).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Absolute deadline `timeout` from now, covering every call of the request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn caller(&self) -> Option<&Caller> {
        self.caller.as_ref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn require_caller(&self) -> ServiceResult<&Caller> {
        self.caller.as_ref().ok_or_else(ServiceError::not_authorized)
    }

    pub fn require_admin(&self) -> ServiceResult<&Caller> {
        let caller = self.require_caller()?;
        if !caller.is_admin() {
            return Err(ServiceError::permission_deny(
                "Administrator role required",
            ));
        }
        Ok(caller)
    }

    /// Run one repository call under this request's cancellation and deadline.
    ///
    /// Without an explicit deadline the call gets `default_timeout` on its own.
    pub async fn run<T, F>(
        &self,
        operation: &str,
        default_timeout: Duration,
        fut: F,
    ) -> ServiceResult<T>
    where
        F: Future<Output = AlpacaResult<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(ServiceError::cancelled(operation));
        }
        let deadline = self
            .deadline
            .unwrap_or_else(|| Instant::now() + default_timeout);

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::debug!(operation, "operation cancelled");
                Err(ServiceError::cancelled(operation))
            }
            result = tokio::time::timeout_at(deadline, fut) => match result {
                Ok(inner) => inner.map_err(ServiceError::from),
                Err(_) => {
                    tracing::warn!(operation, "operation timed out");
                    Err(ServiceError::timeout(operation))
                }
            },
        }
    }
}
