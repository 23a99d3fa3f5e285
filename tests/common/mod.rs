//! Fixture service shared by the integration tests.
//!
//! Four methods, one per handler shape:
//!
//! | method | handler                                   | transform   |
//! |--------|-------------------------------------------|-------------|
//! | do1    | echoes the request                        | none        |
//! | do2    | attaches `xform` to the request value     | `xform`     |
//! | do3    | builds a typed [`Sealed`] object          | `payload`   |
//! | do4    | aggregates a request stream into [`Batch`]| `toPayload` |

#![allow(dead_code)]

use std::sync::Arc;

use futures::TryStreamExt;
use rpc_transform::message::{AugmentedValue, Operation, Request, Response, Transformable};
use rpc_transform::pipeline::{Chain, Middleware, named_handler};
use rpc_transform::service::{CallKind, Service};
use rpc_transform::{Result, transform};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Inbound message of every fixture method
#[derive(Debug, Clone, Deserialize)]
pub struct TransformRequest {
    pub message: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub secret: String,
}

/// Typed result carrying a field that must never reach the caller once
/// transformed.
#[derive(Debug, Serialize)]
pub struct Sealed {
    message: String,
    value: String,
    secret: String,
}

impl From<TransformRequest> for Sealed {
    fn from(req: TransformRequest) -> Self {
        Self {
            message: req.message,
            value: req.value,
            secret: req.secret,
        }
    }
}

impl Transformable for Sealed {
    fn operation(&self, name: &str) -> Option<Operation<'_>> {
        match name {
            "payload" => Some(Operation::sync(move || {
                Ok(json!({
                    "message": self.message.to_uppercase(),
                    "value": self.value,
                }))
            })),
            _ => None,
        }
    }

    fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Aggregate of a whole request stream.
#[derive(Debug, Serialize)]
pub struct Batch {
    messages: Vec<String>,
}

impl Transformable for Batch {
    fn operation(&self, name: &str) -> Option<Operation<'_>> {
        match name {
            "toPayload" => Some(Operation::deferred(move || async move {
                tokio::task::yield_now().await;
                let joined = self
                    .messages
                    .iter()
                    .map(|m| m.to_uppercase())
                    .collect::<Vec<_>>()
                    .join(":");
                Ok::<_, anyhow::Error>(json!({ "message": joined.replace(':', "|") }))
            })),
            _ => None,
        }
    }

    fn to_value(&self) -> Result<Value> {
        Ok(json!({ "message": self.messages.join(":") }))
    }
}

pub async fn echo(req: Request) -> Result<Value> {
    req.into_unary()
}

pub async fn attach_xform(req: Request) -> Result<AugmentedValue> {
    Ok(AugmentedValue::new(req.into_unary()?)
        .with_method("xform", |this| Ok(json!({ "message": this["message"] }))))
}

pub async fn build_sealed(req: Request) -> Result<Response> {
    let data: TransformRequest = req.decode()?;
    Ok(Response::object(Sealed::from(data)))
}

pub async fn aggregate(req: Request) -> Result<Response> {
    let messages: Vec<String> = req
        .decode_stream::<TransformRequest>()?
        .map_ok(|m| m.message)
        .try_collect()
        .await?;
    Ok(Response::object(Batch { messages }))
}

/// Terminal handlers keyed by method name
pub fn handlers() -> Vec<(&'static str, Arc<dyn Middleware>)> {
    vec![
        ("do1", named_handler("echo", echo)),
        ("do2", named_handler("attach_xform", attach_xform)),
        ("do3", named_handler("build_sealed", build_sealed)),
        ("do4", named_handler("aggregate", aggregate)),
    ]
}

/// The fixture service wired by hand
pub fn transform_service() -> Result<Service> {
    let mut service = Service::new("TransformService");
    service
        .route(CallKind::Unary, Chain::builder("do1").handler(echo).build())
        .route(
            CallKind::Unary,
            Chain::builder("do2")
                .step(transform("xform")?)
                .handler(attach_xform)
                .build(),
        )
        .route(
            CallKind::Unary,
            Chain::builder("do3")
                .step(transform("payload")?)
                .handler(build_sealed)
                .build(),
        )
        .route(
            CallKind::ClientStreaming,
            Chain::builder("do4")
                .step(transform("toPayload")?)
                .handler(aggregate)
                .build(),
        );
    Ok(service)
}

/// The six inbound messages of the streaming scenario
pub fn stream_messages() -> Vec<Value> {
    ["1 foo", "2 bar", "3 asd", "4 qwe", "5 rty", "6 zxc"]
        .into_iter()
        .map(|m| json!({ "message": m }))
        .collect()
}
