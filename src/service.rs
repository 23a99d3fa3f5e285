//! In-process RPC service: routes a method name to its chain and runs it.
//!
//! # Call lifecycle
//!
//! 1. Look up the method's route and check the request shape.
//! 2. Create a fresh [`CallContext`] with its own call ID.
//! 3. Run the chain inside a `call` span, racing it against the call's
//!    cancellation token and optional deadline.
//! 4. Serialize the final response to the value returned to the caller.
//!
//! Cancellation and timeouts drop the chain future, so no step (and in
//! particular no response transform) runs after the call is aborted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::Config;
use crate::context::CallContext;
use crate::interceptor::transform;
use crate::message::Request;
use crate::pipeline::{Chain, Middleware};
use crate::{Error, Result};

/// Shape of a method's inbound traffic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    /// One request message, one response
    #[default]
    Unary,
    /// Stream of request messages, one response
    ClientStreaming,
}

impl CallKind {
    /// Returns `true` if `request` has the shape this kind expects
    #[must_use]
    pub fn accepts(self, request: &Request) -> bool {
        match self {
            Self::Unary => !request.is_stream(),
            Self::ClientStreaming => request.is_stream(),
        }
    }
}

struct Route {
    kind: CallKind,
    chain: Chain,
    timeout: Option<Duration>,
}

/// A named set of routed methods
pub struct Service {
    name: String,
    routes: HashMap<String, Route>,
    default_timeout: Option<Duration>,
}

impl Service {
    /// Create an empty service
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routes: HashMap::new(),
            default_timeout: None,
        }
    }

    /// Set the timeout applied to methods without their own
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Service name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register `chain` under its method name, replacing any previous route
    pub fn route(&mut self, kind: CallKind, chain: Chain) -> &mut Self {
        self.insert(kind, chain, None)
    }

    /// Register `chain` with its own timeout
    pub fn route_with_timeout(&mut self, kind: CallKind, chain: Chain, timeout: Duration) -> &mut Self {
        self.insert(kind, chain, Some(timeout))
    }

    fn insert(&mut self, kind: CallKind, chain: Chain, timeout: Option<Duration>) -> &mut Self {
        debug!(
            service = %self.name,
            method = chain.method(),
            kind = ?kind,
            steps = ?chain.step_names(),
            "Registered method"
        );
        self.routes.insert(
            chain.method().to_string(),
            Route {
                kind,
                chain,
                timeout,
            },
        );
        self
    }

    /// Registered method names, sorted
    #[must_use]
    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }

    /// Call shape of `method`, if registered
    #[must_use]
    pub fn call_kind(&self, method: &str) -> Option<CallKind> {
        self.routes.get(method).map(|r| r.kind)
    }

    /// Build a service from configuration and a table of terminal handlers.
    ///
    /// Configured methods get a transform interceptor ahead of their handler
    /// when they name an operation. Handlers without configuration are
    /// registered as plain unary methods.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid or a
    /// configured method has no handler.
    pub fn from_config<I, S>(config: &Config, handlers: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Arc<dyn Middleware>)>,
        S: Into<String>,
    {
        config.validate()?;
        let mut handlers: HashMap<String, Arc<dyn Middleware>> =
            handlers.into_iter().map(|(m, h)| (m.into(), h)).collect();

        let mut service = Self::new(&config.service.name);
        service.default_timeout = config.service.timeout;

        for (method, method_config) in &config.methods {
            let handler = handlers.remove(method).ok_or_else(|| {
                Error::Config(format!("no handler registered for method '{method}'"))
            })?;
            let mut builder = Chain::builder(method.as_str());
            if let Some(operation) = &method_config.transform {
                builder = builder.step(transform(operation)?);
            }
            let chain = builder.step(handler).build();
            service.insert(method_config.kind, chain, method_config.timeout);
        }

        let mut unconfigured: Vec<_> = handlers.into_iter().collect();
        unconfigured.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        for (method, handler) in unconfigured {
            let chain = Chain::builder(method).step(handler).build();
            service.route(CallKind::Unary, chain);
        }

        info!(
            service = %service.name,
            methods = service.routes.len(),
            transforms = config.transformed_methods().count(),
            "Service ready"
        );
        Ok(service)
    }

    /// Call `method` and return the serialized response
    ///
    /// # Errors
    ///
    /// Returns the first error raised by any step, or a dispatch error
    /// ([`Error::MethodNotFound`], [`Error::Protocol`], [`Error::Timeout`]).
    pub async fn call(&self, method: &str, request: impl Into<Request>) -> Result<Value> {
        self.call_with_cancel(method, request, CancellationToken::new())
            .await
    }

    /// Client-streaming call fed from `messages`
    ///
    /// # Errors
    ///
    /// Same as [`Service::call`].
    pub async fn call_stream<S>(&self, method: &str, messages: S) -> Result<Value>
    where
        S: Stream<Item = Value> + Send + 'static,
    {
        self.call(method, Request::stream(messages)).await
    }

    /// Call `method`, aborting with [`Error::Cancelled`] once `cancellation`
    /// fires
    ///
    /// # Errors
    ///
    /// Same as [`Service::call`], plus [`Error::Cancelled`].
    pub async fn call_with_cancel(
        &self,
        method: &str,
        request: impl Into<Request>,
        cancellation: CancellationToken,
    ) -> Result<Value> {
        let route = self
            .routes
            .get(method)
            .ok_or_else(|| Error::MethodNotFound(format!("{}/{method}", self.name)))?;

        let request = request.into();
        if !route.kind.accepts(&request) {
            return Err(Error::Protocol(format!(
                "method '{method}' expects a {:?} call",
                route.kind
            )));
        }

        let mut ctx = CallContext::with_cancellation(method, request, cancellation);
        let span = info_span!(
            "call",
            service = %self.name,
            method,
            call_id = ctx.call_id()
        );

        async {
            self.dispatch(route, &mut ctx).await?;
            let response = ctx.take_response().ok_or_else(|| {
                Error::Protocol(format!("method '{method}' produced no response"))
            })?;
            response.into_value()
        }
        .instrument(span)
        .await
    }

    async fn dispatch(&self, route: &Route, ctx: &mut CallContext) -> Result<()> {
        let started = Instant::now();
        let method = ctx.method().to_string();
        let token = ctx.cancellation().clone();
        let timeout = route.timeout.or(self.default_timeout);

        let run = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, route.chain.run(ctx))
                    .await
                    .unwrap_or_else(|_| {
                        Err(Error::Timeout(format!("{method} after {}ms", limit.as_millis())))
                    }),
                None => route.chain.run(ctx).await,
            }
        };

        let result = tokio::select! {
            biased;
            () = token.cancelled() => Err(Error::Cancelled(method.clone())),
            result = run => result,
        };

        let elapsed_ms = started.elapsed().as_millis();
        match &result {
            Ok(()) => debug!(elapsed_ms, "Call completed"),
            Err(e) => {
                if matches!(e, Error::Timeout(_)) {
                    token.cancel();
                }
                warn!(elapsed_ms, status = e.status(), error = %e, "Call failed");
            }
        }
        result
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("methods", &self.methods())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}
