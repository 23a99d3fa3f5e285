//! Response transform interceptor.
//!
//! Installed ahead of a method's terminal handler, the interceptor waits for
//! the rest of the chain to finish, then looks up a configured zero-argument
//! operation on the response and, if the response exposes it, replaces the
//! response with the operation's result.
//!
//! ```text
//! AWAIT_DOWNSTREAM ──▶ RESPONSE_SET ──┬──▶ TRANSFORM_INVOKED ──▶ DONE
//!        │                            │            │
//!        │                            └──▶ TRANSFORM_ABSENT ───▶ DONE
//!        └──(error / cancelled)──────────────────▶ FAILED ◀──────┘
//! ```
//!
//! A response without the operation passes through untouched. A failing
//! operation fails the call and leaves the response as the handler set it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::context::CallContext;
use crate::pipeline::{Middleware, Next};
use crate::{Error, Result};

/// What the interceptor did for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The operation was found and its result replaced the response
    Invoked,
    /// The response does not expose the operation; left unchanged
    Absent,
    /// Nothing downstream set a response
    NoResponse,
}

impl Outcome {
    /// Stable label for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invoked => "invoked",
            Self::Absent => "absent",
            Self::NoResponse => "no_response",
        }
    }
}

/// Interceptor replacing the response with the result of a named operation.
///
/// Holds only the operation name, so one instance may be installed on any
/// number of chains and run concurrently.
#[derive(Debug, Clone)]
pub struct TransformInterceptor {
    operation: Arc<str>,
}

impl TransformInterceptor {
    /// Create an interceptor for `operation`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `operation` is empty or whitespace.
    pub fn new(operation: &str) -> Result<Self> {
        if operation.trim().is_empty() {
            return Err(Error::Config(
                "transform operation name must be a non-empty string".to_string(),
            ));
        }
        debug!(operation, "Created transform interceptor");
        Ok(Self {
            operation: Arc::from(operation),
        })
    }

    /// Configured operation name.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Transform the response currently in `ctx`.
    ///
    /// Called after downstream steps have completed; [`Middleware::handle`]
    /// does this automatically.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransformExecution`] if the operation fails. The
    /// response is not modified in that case.
    pub async fn apply(&self, ctx: &mut CallContext) -> Result<Outcome> {
        let Some(response) = ctx.response.as_ref() else {
            return Ok(Outcome::NoResponse);
        };
        let Some(operation) = response.operation(&self.operation) else {
            debug!(
                method = ctx.method(),
                operation = %self.operation,
                kind = response.kind(),
                "Response does not expose transform, passing through"
            );
            return Ok(Outcome::Absent);
        };

        let transformed = match operation.invoke().await {
            Ok(transformed) => transformed,
            Err(e) => {
                warn!(
                    method = ctx.method(),
                    call_id = ctx.call_id(),
                    operation = %self.operation,
                    error = %e,
                    "Transform failed"
                );
                return Err(Error::transform(&*self.operation, ctx.method(), e));
            }
        };

        debug!(
            method = ctx.method(),
            operation = %self.operation,
            kind = transformed.kind(),
            "Transformed response"
        );
        ctx.response = Some(transformed);
        Ok(Outcome::Invoked)
    }
}

#[async_trait]
impl Middleware for TransformInterceptor {
    fn name(&self) -> &str {
        "transform"
    }

    async fn handle(&self, ctx: &mut CallContext, next: Next<'_>) -> Result<()> {
        next.run(ctx).await?;
        ctx.ensure_active()?;
        let outcome = self.apply(ctx).await?;
        trace!(
            method = ctx.method(),
            call_id = ctx.call_id(),
            outcome = outcome.as_str(),
            "Transform step done"
        );
        Ok(())
    }
}

/// Build a transform interceptor ready to install on a chain.
///
/// ```rust
/// use rpc_transform::interceptor::transform;
/// use rpc_transform::pipeline::Chain;
/// use serde_json::Value;
///
/// # fn main() -> rpc_transform::Result<()> {
/// async fn echo(req: rpc_transform::message::Request) -> rpc_transform::Result<Value> {
///     req.into_unary()
/// }
///
/// let chain = Chain::builder("do2")
///     .step(transform("xform")?)
///     .handler(echo)
///     .build();
/// assert_eq!(chain.step_names(), vec!["transform", "handler"]);
/// assert!(transform("").is_err());
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns [`Error::Config`] if `operation` is empty or whitespace.
pub fn transform(operation: &str) -> Result<Arc<dyn Middleware>> {
    Ok(Arc::new(TransformInterceptor::new(operation)?))
}
