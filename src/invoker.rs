//! The tool-invocation boundary.
//!
//! Tools themselves (code editing, search, document fetch) live behind
//! [`ToolInvoker`]: the engine validates, dispatches, and interprets, but
//! never implements a tool. The trait is object-safe (boxed futures) so
//! adapters can be stored as `Arc<dyn ToolInvoker>`.
//!
//! For simple cases, wrap an async closure with [`invoker_fn`].

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::error::EngineError;

/// Boxed future returned by [`ToolInvoker::invoke`].
pub type InvokeFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, EngineError>> + Send + 'a>>;

/// Dispatches one validated tool call to whatever implements the tool.
///
/// Implementations decide transport (in-process, HTTP, IPC) and report
/// failures through [`EngineError`]; the variant chosen drives the
/// transient/permanent retry classification upstream.
pub trait ToolInvoker: Send + Sync {
    /// Invokes `tool_name` with `params` and resolves to the tool's output.
    fn invoke<'a>(&'a self, tool_name: &'a str, params: &'a Value) -> InvokeFuture<'a>;
}

/// An invoker backed by an async closure. Created via [`invoker_fn`].
pub struct FnInvoker<F> {
    handler: F,
}

impl<F> std::fmt::Debug for FnInvoker<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnInvoker").finish_non_exhaustive()
    }
}

impl<F, Fut> ToolInvoker for FnInvoker<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, EngineError>> + Send + 'static,
{
    fn invoke<'a>(&'a self, tool_name: &'a str, params: &'a Value) -> InvokeFuture<'a> {
        let fut = (self.handler)(tool_name.to_string(), params.clone());
        Box::pin(fut)
    }
}

/// Wraps an async closure `(tool_name, params) -> Result<Value, EngineError>`
/// as a [`ToolInvoker`].
///
/// ```rust
/// use serde_json::{json, Value};
/// use turnflow::invoker::invoker_fn;
///
/// let invoker = invoker_fn(|name: String, _params: Value| async move {
///     Ok(json!({ "echo": name }))
/// });
/// ```
pub fn invoker_fn<F, Fut>(handler: F) -> FnInvoker<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, EngineError>> + Send + 'static,
{
    FnInvoker { handler }
}
