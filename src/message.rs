//! In-memory request and response values carried through a call.
//!
//! A response is one of three shapes:
//!
//! ```text
//! Response::Value      plain structured value, exposes no operations
//! Response::Augmented  plain value + operations attached by the handler
//! Response::Object     typed object whose type defines its operations
//! ```
//!
//! Operations are resolved by name with [`Response::operation`], which
//! returns an [`Operation`] already bound to its receiver. Invoking it takes
//! no arguments and always yields a [`TransformFuture`]; synchronous
//! operations are wrapped into a ready future.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{Error, Result};

// ============================================================================
// Operations
// ============================================================================

/// Future produced by invoking an [`Operation`].
pub type TransformFuture<'a> = BoxFuture<'a, anyhow::Result<Response>>;

/// A zero-argument operation bound to the response it was resolved on.
///
/// The receiver is borrowed for `'a`, so the operation reads the object's
/// own fields without being handed anything by the caller.
pub struct Operation<'a> {
    call: Box<dyn FnOnce() -> TransformFuture<'a> + Send + 'a>,
}

impl<'a> Operation<'a> {
    /// Wrap an operation that returns its value immediately.
    pub fn sync<F, R>(f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<R> + Send + 'a,
        R: Into<Response>,
    {
        let call = move || -> TransformFuture<'a> {
            let out: anyhow::Result<Response> = f().map(Into::into);
            Box::pin(future::ready(out))
        };
        Self {
            call: Box::new(call),
        }
    }

    /// Wrap an operation that resolves later.
    pub fn deferred<F, Fut, R>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'a,
        R: Into<Response> + Send + 'a,
    {
        let call = move || -> TransformFuture<'a> { Box::pin(resolve(f())) };
        Self {
            call: Box::new(call),
        }
    }

    /// Invoke the operation.
    #[must_use]
    pub fn invoke(self) -> TransformFuture<'a> {
        (self.call)()
    }
}

impl fmt::Debug for Operation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation").finish_non_exhaustive()
    }
}

async fn resolve<R, Fut>(fut: Fut) -> anyhow::Result<Response>
where
    Fut: Future<Output = anyhow::Result<R>>,
    R: Into<Response>,
{
    fut.await.map(Into::into)
}

/// A value that can expose named operations.
///
/// Implemented by handler result types that define transforms as part of
/// their behavior, and by [`AugmentedValue`].
pub trait Transformable: Send + Sync + fmt::Debug {
    /// Resolve `name` to an operation bound to `self`, or `None` if the type
    /// has no such operation.
    fn operation(&self, name: &str) -> Option<Operation<'_>>;

    /// Serialize to the structured value sent to the caller.
    fn to_value(&self) -> Result<Value>;
}

// ============================================================================
// Augmented values
// ============================================================================

type SyncMethod = Arc<dyn Fn(&Value) -> anyhow::Result<Response> + Send + Sync>;
type AsyncMethod = Arc<dyn Fn(Value) -> TransformFuture<'static> + Send + Sync>;

#[derive(Clone)]
enum Method {
    Sync(SyncMethod),
    Async(AsyncMethod),
}

/// A plain value with operations attached at runtime.
///
/// Attached operations are not part of the serialized value.
///
/// ```rust
/// use rpc_transform::message::AugmentedValue;
/// use serde_json::json;
///
/// let res = AugmentedValue::new(json!({ "message": "hi", "value": "v" }))
///     .with_method("xform", |this| Ok(json!({ "message": this["message"] })));
/// assert!(res.has_method("xform"));
/// ```
#[derive(Clone)]
pub struct AugmentedValue {
    value: Value,
    methods: HashMap<String, Method>,
}

impl AugmentedValue {
    /// Wrap a plain value with no operations yet.
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self {
            value,
            methods: HashMap::new(),
        }
    }

    /// Attach a synchronous operation that reads the wrapped value.
    #[must_use]
    pub fn with_method<F, R>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Into<Response>,
    {
        let method = move |this: &Value| -> anyhow::Result<Response> { f(this).map(Into::into) };
        self.methods.insert(name.into(), Method::Sync(Arc::new(method)));
        self
    }

    /// Attach an asynchronous operation. It receives a copy of the wrapped
    /// value so the returned future owns its data.
    #[must_use]
    pub fn with_async_method<F, Fut, R>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<Response> + Send + 'static,
    {
        let method = move |this: Value| -> TransformFuture<'static> { Box::pin(resolve(f(this))) };
        self.methods.insert(name.into(), Method::Async(Arc::new(method)));
        self
    }

    /// Returns `true` if an operation named `name` is attached.
    #[must_use]
    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// The wrapped value.
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Drop the attached operations and return the plain value.
    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }
}

impl Transformable for AugmentedValue {
    fn operation(&self, name: &str) -> Option<Operation<'_>> {
        let method = self.methods.get(name)?;
        Some(match method {
            Method::Sync(f) => Operation::sync(move || f(&self.value)),
            Method::Async(f) => Operation::deferred(move || f(self.value.clone())),
        })
    }

    fn to_value(&self) -> Result<Value> {
        Ok(self.value.clone())
    }
}

impl fmt::Debug for AugmentedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut methods: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        methods.sort_unstable();
        f.debug_struct("AugmentedValue")
            .field("value", &self.value)
            .field("methods", &methods)
            .finish()
    }
}

// ============================================================================
// Response
// ============================================================================

/// The response slot of a call.
#[derive(Debug)]
pub enum Response {
    /// Plain structured value
    Value(Value),
    /// Plain value with runtime-attached operations
    Augmented(AugmentedValue),
    /// Typed object defining its own operations
    Object(Box<dyn Transformable>),
}

impl Response {
    /// Box a typed object.
    pub fn object<T: Transformable + 'static>(object: T) -> Self {
        Self::Object(Box::new(object))
    }

    /// Resolve the operation called `name`. Plain values never expose one.
    #[must_use]
    pub fn operation(&self, name: &str) -> Option<Operation<'_>> {
        match self {
            Self::Value(_) => None,
            Self::Augmented(value) => value.operation(name),
            Self::Object(object) => object.operation(name),
        }
    }

    /// Returns `true` if [`Response::operation`] would find `name`.
    #[must_use]
    pub fn has_operation(&self, name: &str) -> bool {
        self.operation(name).is_some()
    }

    /// Serialize to the structured value sent to the caller.
    pub fn to_value(&self) -> Result<Value> {
        match self {
            Self::Value(value) => Ok(value.clone()),
            Self::Augmented(value) => Ok(value.value().clone()),
            Self::Object(object) => object.to_value(),
        }
    }

    /// Consume and serialize.
    pub fn into_value(self) -> Result<Value> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Augmented(value) => Ok(value.into_value()),
            Self::Object(object) => object.to_value(),
        }
    }

    /// The plain value, if this is [`Response::Value`].
    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    /// Short shape name for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Value(_) => "value",
            Self::Augmented(_) => "augmented",
            Self::Object(_) => "object",
        }
    }
}

impl From<Value> for Response {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<AugmentedValue> for Response {
    fn from(value: AugmentedValue) -> Self {
        Self::Augmented(value)
    }
}

impl From<Box<dyn Transformable>> for Response {
    fn from(object: Box<dyn Transformable>) -> Self {
        Self::Object(object)
    }
}

// ============================================================================
// Request
// ============================================================================

/// Inbound message stream of a client-streaming call.
pub type MessageStream = BoxStream<'static, Result<Value>>;

/// The request slot of a call.
pub enum Request {
    /// Single inbound message
    Unary(Value),
    /// Stream of inbound messages
    Stream(MessageStream),
}

impl Request {
    /// Build a streaming request from plain messages.
    pub fn stream<S>(messages: S) -> Self
    where
        S: Stream<Item = Value> + Send + 'static,
    {
        Self::Stream(messages.map(Ok).boxed())
    }

    /// Returns `true` for streaming requests.
    #[must_use]
    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Take the single inbound message.
    pub fn into_unary(self) -> Result<Value> {
        match self {
            Self::Unary(value) => Ok(value),
            Self::Stream(_) => Err(Error::Protocol(
                "expected a unary request, got a stream".to_string(),
            )),
        }
    }

    /// Deserialize the single inbound message.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T> {
        Ok(serde_json::from_value(self.into_unary()?)?)
    }

    /// Take the inbound message stream.
    pub fn into_stream(self) -> Result<MessageStream> {
        match self {
            Self::Stream(stream) => Ok(stream),
            Self::Unary(_) => Err(Error::Protocol(
                "expected a request stream, got a unary message".to_string(),
            )),
        }
    }

    /// Deserialize each inbound message of the stream.
    pub fn decode_stream<T>(self) -> Result<BoxStream<'static, Result<T>>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let stream = self.into_stream()?;
        Ok(stream
            .map(|item| item.and_then(|value| Ok(serde_json::from_value(value)?)))
            .boxed())
    }
}

impl From<Value> for Request {
    fn from(value: Value) -> Self {
        Self::Unary(value)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unary(value) => f.debug_tuple("Unary").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    struct Greeting {
        message: String,
        value: String,
    }

    impl Transformable for Greeting {
        fn operation(&self, name: &str) -> Option<Operation<'_>> {
            match name {
                "shout" => Some(Operation::sync(move || {
                    Ok(json!({ "message": self.message.to_uppercase() }))
                })),
                "later" => Some(Operation::deferred(move || async move {
                    Ok::<_, anyhow::Error>(json!({ "value": self.value.clone() }))
                })),
                _ => None,
            }
        }

        fn to_value(&self) -> Result<Value> {
            Ok(serde_json::to_value(self)?)
        }
    }

    fn greeting() -> Greeting {
        Greeting {
            message: "hi".to_string(),
            value: "v".to_string(),
        }
    }

    // ── operation lookup ──────────────────────────────────────────────────

    #[test]
    fn plain_value_exposes_no_operations() {
        let res = Response::from(json!({ "xform": "not callable" }));
        assert!(!res.has_operation("xform"));
        assert_eq!(res.kind(), "value");
    }

    #[test]
    fn typed_object_resolves_only_its_operations() {
        let res = Response::object(greeting());
        assert!(res.has_operation("shout"));
        assert!(res.has_operation("later"));
        assert!(!res.has_operation("payload"));
        assert_eq!(res.kind(), "object");
    }

    #[tokio::test]
    async fn sync_operation_reads_receiver_fields() {
        let res = Response::object(greeting());
        let out = res.operation("shout").unwrap().invoke().await.unwrap();
        assert_eq!(out.into_value().unwrap(), json!({ "message": "HI" }));
    }

    #[tokio::test]
    async fn deferred_operation_resolves() {
        let res = Response::object(greeting());
        let out = res.operation("later").unwrap().invoke().await.unwrap();
        assert_eq!(out.into_value().unwrap(), json!({ "value": "v" }));
    }

    // ── augmented values ──────────────────────────────────────────────────

    #[tokio::test]
    async fn augmented_sync_method_sees_wrapped_value() {
        let res = Response::from(
            AugmentedValue::new(json!({ "message": "m", "value": "v" }))
                .with_method("xform", |this| Ok(json!({ "message": this["message"] }))),
        );
        let out = res.operation("xform").unwrap().invoke().await.unwrap();
        assert_eq!(out.into_value().unwrap(), json!({ "message": "m" }));
    }

    #[tokio::test]
    async fn augmented_async_method_sees_wrapped_value() {
        let res = Response::from(
            AugmentedValue::new(json!({ "n": 2 })).with_async_method("double", |this| async move {
                tokio::task::yield_now().await;
                Ok::<_, anyhow::Error>(json!({ "n": this["n"].as_i64().unwrap_or_default() * 2 }))
            }),
        );
        let out = res.operation("double").unwrap().invoke().await.unwrap();
        assert_eq!(out.into_value().unwrap(), json!({ "n": 4 }));
    }

    #[tokio::test]
    async fn augmented_method_failure_surfaces() {
        let res = Response::from(
            AugmentedValue::new(json!({}))
                .with_method("xform", |_| -> anyhow::Result<Value> { anyhow::bail!("nope") }),
        );
        let err = res.operation("xform").unwrap().invoke().await.unwrap_err();
        assert_eq!(err.to_string(), "nope");
    }

    #[test]
    fn attached_methods_are_not_serialized() {
        let res = Response::from(
            AugmentedValue::new(json!({ "message": "m" }))
                .with_method("xform", |this| Ok(this.clone())),
        );
        assert_eq!(res.to_value().unwrap(), json!({ "message": "m" }));
    }

    #[test]
    fn augmented_debug_lists_method_names() {
        let value = AugmentedValue::new(json!(1))
            .with_method("b", |this| Ok(this.clone()))
            .with_method("a", |this| Ok(this.clone()));
        let debug = format!("{value:?}");
        assert!(debug.contains(r#"methods: ["a", "b"]"#), "{debug}");
    }

    // ── request ───────────────────────────────────────────────────────────

    #[test]
    fn decode_unary_request() {
        let req = Request::from(json!({ "message": "m", "value": "v" }));
        let greeting: Greeting = req.decode().unwrap();
        assert_eq!(greeting.message, "m");
    }

    #[test]
    fn unary_request_is_not_a_stream() {
        let req = Request::from(json!({}));
        assert!(!req.is_stream());
        assert!(matches!(req.into_stream(), Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn decode_stream_request() {
        let req = Request::stream(futures::stream::iter(vec![
            json!({ "message": "a", "value": "1" }),
            json!({ "message": "b", "value": "2" }),
        ]));
        assert!(req.is_stream());
        let messages: Vec<Greeting> = req
            .decode_stream()
            .unwrap()
            .map(|m| m.unwrap())
            .collect()
            .await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].message, "b");
    }

    #[test]
    fn stream_request_rejects_unary_access() {
        let req = Request::stream(futures::stream::empty());
        assert!(matches!(req.into_unary(), Err(Error::Protocol(_))));
    }
}
