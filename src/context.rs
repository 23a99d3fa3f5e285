//! Per-call context shared by every step of a method's chain.
//!
//! A `CallContext` is created fresh by the service for each incoming call
//! and dropped when the call completes. Steps read and replace
//! [`CallContext::response`]; the terminal handler takes the request.

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::message::{Request, Response};
use crate::{Error, Result};

/// Generate a new call ID: `"call-<uuid-v4>"`.
#[must_use]
pub fn generate_call_id() -> String {
    format!("call-{}", Uuid::new_v4())
}

/// Mutable state of a single call.
#[derive(Debug)]
pub struct CallContext {
    /// Method being served
    method: String,
    /// Unique ID for log correlation
    call_id: String,
    /// Inbound payload, taken by the terminal handler
    pub request: Option<Request>,
    /// Outbound payload, absent until a handler sets it
    pub response: Option<Response>,
    /// Cancelled when the host aborts the call
    cancellation: CancellationToken,
}

impl CallContext {
    /// Create a context for `method` carrying `request`.
    pub fn new(method: impl Into<String>, request: Request) -> Self {
        Self::with_cancellation(method, request, CancellationToken::new())
    }

    /// Create a context that observes an externally owned cancellation token.
    pub fn with_cancellation(
        method: impl Into<String>,
        request: Request,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            method: method.into(),
            call_id: generate_call_id(),
            request: Some(request),
            response: None,
            cancellation,
        }
    }

    /// Method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Call ID.
    #[must_use]
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    /// Take the request out of the context.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if an earlier step already took it.
    pub fn take_request(&mut self) -> Result<Request> {
        self.request.take().ok_or_else(|| {
            Error::Protocol(format!("request for '{}' already consumed", self.method))
        })
    }

    /// Replace the response.
    pub fn set_response(&mut self, response: impl Into<Response>) {
        self.response = Some(response.into());
    }

    /// Take the response out of the context.
    pub fn take_response(&mut self) -> Option<Response> {
        self.response.take()
    }

    /// Token cancelled when the call is aborted.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Abort the call.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Returns `true` once the call has been aborted.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Fail with [`Error::Cancelled`] if the call has been aborted.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled(format!(
                "{} ({})",
                self.method, self.call_id
            )));
        }
        Ok(())
    }
}
