//! Ordered middleware chains.
//!
//! Every method owns a [`Chain`] of steps. A step receives the call context
//! and a [`Next`] continuation; it may act before and after calling
//! `next.run(ctx).await`, or return early to short-circuit the rest of the
//! chain.
//!
//! ```text
//! Service::call ──▶ step 1 ──▶ step 2 ──▶ ... ──▶ terminal handler
//!                     ▲          ▲                       │
//!                     └──────────┴──── unwinds ◀─────────┘
//! ```
//!
//! Steps see the response set by later steps once `next.run` returns,
//! mirroring the tower/onion middleware model.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::trace;

use crate::Result;
use crate::context::CallContext;
use crate::message::{Request, Response};

// ============================================================================
// Middleware trait
// ============================================================================

/// A single step of a method's chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Step name for logs.
    fn name(&self) -> &str {
        "middleware"
    }

    /// Process the call. Call `next.run(ctx).await` to continue the chain.
    async fn handle(&self, ctx: &mut CallContext, next: Next<'_>) -> Result<()>;
}

/// The steps remaining after the current one.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    steps: &'a [Arc<dyn Middleware>],
}

impl Next<'_> {
    /// Run the remaining steps. Running past the last step is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Cancelled`] without starting the next step if
    /// the call has been aborted, otherwise whatever the next step returns.
    pub async fn run(self, ctx: &mut CallContext) -> Result<()> {
        ctx.ensure_active()?;
        let Some((step, rest)) = self.steps.split_first() else {
            return Ok(());
        };
        trace!(method = ctx.method(), step = step.name(), "Entering step");
        step.handle(ctx, Next { steps: rest }).await
    }
}

// ============================================================================
// Terminal handlers
// ============================================================================

type HandlerFuture = BoxFuture<'static, Result<Response>>;

/// Terminal step wrapping a handler function.
///
/// Takes the request out of the context, runs the function and stores what
/// it returns as the response. It does not call `next`.
pub struct HandlerFn {
    name: String,
    f: Box<dyn Fn(Request) -> HandlerFuture + Send + Sync>,
}

#[async_trait]
impl Middleware for HandlerFn {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, ctx: &mut CallContext, _next: Next<'_>) -> Result<()> {
        let request = ctx.take_request()?;
        let response = (self.f)(request).await?;
        trace!(
            method = ctx.method(),
            kind = response.kind(),
            "Handler produced response"
        );
        ctx.response = Some(response);
        Ok(())
    }
}

/// Wrap an async handler function as a terminal step.
///
/// ```rust
/// use rpc_transform::message::Request;
/// use rpc_transform::pipeline::{Middleware, handler};
/// use serde_json::Value;
///
/// async fn echo(req: Request) -> rpc_transform::Result<Value> {
///     req.into_unary()
/// }
///
/// let step = handler(echo);
/// assert_eq!(step.name(), "handler");
/// ```
pub fn handler<F, Fut, R>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    R: Into<Response> + Send + 'static,
{
    named_handler("handler", f)
}

/// Like [`handler`] with a custom step name.
pub fn named_handler<F, Fut, R>(name: impl Into<String>, f: F) -> Arc<dyn Middleware>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    R: Into<Response> + Send + 'static,
{
    let f = move |request: Request| -> HandlerFuture { Box::pin(into_response(f(request))) };
    Arc::new(HandlerFn {
        name: name.into(),
        f: Box::new(f),
    })
}

async fn into_response<Fut, R>(fut: Fut) -> Result<Response>
where
    Fut: Future<Output = Result<R>>,
    R: Into<Response>,
{
    fut.await.map(Into::into)
}

// ============================================================================
// Chain
// ============================================================================

/// Ordered steps serving one method.
pub struct Chain {
    method: String,
    steps: Vec<Arc<dyn Middleware>>,
}

impl Chain {
    /// Start building a chain for `method`.
    #[must_use]
    pub fn builder(method: impl Into<String>) -> ChainBuilder {
        ChainBuilder {
            method: method.into(),
            steps: Vec::new(),
        }
    }

    /// Method served by this chain.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if the chain has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step names in execution order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step against `ctx`.
    pub async fn run(&self, ctx: &mut CallContext) -> Result<()> {
        Next { steps: &self.steps }.run(ctx).await
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("method", &self.method)
            .field("steps", &self.step_names())
            .finish()
    }
}

/// Builder for [`Chain`].
pub struct ChainBuilder {
    method: String,
    steps: Vec<Arc<dyn Middleware>>,
}

impl ChainBuilder {
    /// Append a step.
    #[must_use]
    pub fn step(mut self, step: Arc<dyn Middleware>) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a terminal handler function.
    #[must_use]
    pub fn handler<F, Fut, R>(self, f: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Into<Response> + Send + 'static,
    {
        self.step(handler(f))
    }

    /// Finalise and produce a [`Chain`].
    #[must_use]
    pub fn build(self) -> Chain {
        Chain {
            method: self.method,
            steps: self.steps,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
