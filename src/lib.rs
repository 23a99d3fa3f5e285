//! RPC Response Transform
//!
//! Middleware for in-process RPC chains that post-processes a handler's
//! response by invoking a named zero-argument operation on it.
//!
//! # Features
//!
//! - **Transform interceptor**: installed ahead of a handler, replaces the
//!   response with the result of a configured operation when the response
//!   exposes it, and leaves it untouched otherwise
//! - **Uniform responses**: plain values, values with operations attached at
//!   runtime, and typed objects defining their own operations
//! - **Sync or async operations** behind a single future type
//! - **Unary and client-streaming** methods with per-call timeouts and
//!   cancellation
//! - **Configuration** from YAML and environment variables
//!
//! # Example
//!
//! ```rust
//! use rpc_transform::interceptor::transform;
//! use rpc_transform::message::{AugmentedValue, Request};
//! use rpc_transform::pipeline::Chain;
//! use rpc_transform::service::{CallKind, Service};
//! use serde_json::json;
//!
//! async fn handler(req: Request) -> rpc_transform::Result<AugmentedValue> {
//!     Ok(AugmentedValue::new(req.into_unary()?)
//!         .with_method("xform", |this| Ok(json!({ "message": this["message"] }))))
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> rpc_transform::Result<()> {
//! let mut service = Service::new("TransformService");
//! service.route(
//!     CallKind::Unary,
//!     Chain::builder("do2").step(transform("xform")?).handler(handler).build(),
//! );
//!
//! let res = service.call("do2", json!({ "message": "Hello World", "value": "value 1" })).await?;
//! assert_eq!(res, json!({ "message": "Hello World" }));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod context;
pub mod error;
pub mod interceptor;
pub mod message;
pub mod pipeline;
pub mod service;

pub use context::CallContext;
pub use error::{Error, Result};
pub use interceptor::{Outcome, TransformInterceptor, transform};
pub use message::{AugmentedValue, Operation, Request, Response, Transformable};
pub use pipeline::{Chain, Middleware, Next};
pub use service::{CallKind, Service};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `level` is used when `RUST_LOG` is unset; `format` is `"json"` or text.
///
/// # Errors
///
/// Returns [`Error::Config`] if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Config(format!("tracing already initialised: {e}")))
}
