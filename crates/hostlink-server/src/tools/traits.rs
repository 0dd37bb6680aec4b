use crate::context::ExecutionContext;
use hostlink_core::protocol::ToolStatus;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;

/// What a tool hands back; the server wraps it in a [`ToolResponse`] with the
/// request's id and protocol version.
///
/// [`ToolResponse`]: hostlink_core::protocol::ToolResponse
#[derive(Debug, Clone, PartialEq)]
pub struct ToolReply {
    pub status: ToolStatus,
    pub message: String,
    pub payload: Option<Value>,
}

impl ToolReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Ok,
            message: message.into(),
            payload: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Warning,
            ..Self::ok(message)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            ..Self::ok(message)
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// A named automation command.
///
/// Uses RPITIT with an explicit `Send` bound so the server can run calls on
/// any worker.
pub trait Tool: Send + Sync {
    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    /// Typed arguments, decoded from the request's `arguments` object.
    type Request: DeserializeOwned + Send;

    /// JSON schema of [`Tool::Request`], reported by `tools_list`.
    fn input_schema(&self) -> Value;

    fn call(
        &self,
        ctx: &ExecutionContext,
        request: Self::Request,
    ) -> impl Future<Output = ToolReply> + Send;
}

/// Object-safe version of [`Tool`] for type erasure in the registry.
///
/// Implemented automatically for every [`Tool`]; argument decoding happens
/// here so the registry only deals in raw JSON.
pub trait ErasedTool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> Value;
    fn call<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        arguments: Value,
    ) -> Pin<Box<dyn Future<Output = ToolReply> + Send + 'a>>;
}

impl<T: Tool> ErasedTool for T {
    fn name(&self) -> &'static str {
        T::NAME
    }

    fn description(&self) -> &'static str {
        T::DESCRIPTION
    }

    fn input_schema(&self) -> Value {
        Tool::input_schema(self)
    }

    fn call<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        arguments: Value,
    ) -> Pin<Box<dyn Future<Output = ToolReply> + Send + 'a>> {
        // A missing `arguments` field arrives as null.
        let arguments = if arguments.is_null() {
            Value::Object(Default::default())
        } else {
            arguments
        };
        match serde_json::from_value::<T::Request>(arguments) {
            Ok(request) => Box::pin(Tool::call(self, ctx, request)),
            Err(e) => {
                let reply = ToolReply::error(format!("Invalid arguments for {}: {e}", T::NAME));
                Box::pin(async move { reply })
            }
        }
    }
}

/// Arguments of tools that take none. Unknown fields are ignored.
#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
pub struct NoArguments {}

/// Schema of a tool without parameters.
pub(crate) fn empty_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}
