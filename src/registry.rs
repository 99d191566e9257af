//! Tool catalogue: descriptors, compiled input schemas, and handlers.
//!
//! Arguments are validated against the tool's schema here, before any
//! handler sees them, and then deserialized into the handler's own
//! argument type by [`typed`].

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolError;
use crate::schema::{CompiledSchema, SchemaValidationError};

/// Public description of a tool, as returned by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool. `arguments` has already passed schema validation.
    async fn call(&self, arguments: Value) -> Result<Value, ToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool already registered: {0}")]
    Duplicate(String),
    #[error("Invalid input schema for {tool}: {source}")]
    Schema {
        tool: String,
        #[source]
        source: SchemaValidationError,
    },
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    schema: CompiledSchema,
    handler: Arc<dyn ToolHandler>,
}

/// Ordered set of tools. Read-only once the server starts.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        if self.index.contains_key(&descriptor.name) {
            return Err(RegistryError::Duplicate(descriptor.name));
        }
        let schema =
            CompiledSchema::compile(&descriptor.input_schema).map_err(|source| RegistryError::Schema {
                tool: descriptor.name.clone(),
                source,
            })?;

        self.index.insert(descriptor.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool {
            descriptor,
            schema,
            handler,
        });
        Ok(())
    }

    /// Descriptors in registration order.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ToolHandler>, ToolError> {
        self.entry(name).map(|t| Arc::clone(&t.handler))
    }

    /// Validate `arguments` (absent means `{}`) and run the named tool.
    pub async fn invoke(&self, name: &str, arguments: Option<Value>) -> Result<Value, ToolError> {
        let tool = self.entry(name)?;
        let arguments = arguments.unwrap_or_else(|| Value::Object(Default::default()));

        tool.schema
            .validate(&arguments)
            .map_err(|e| ToolError::invalid_arguments(name, e.to_string()))?;

        tool.handler.call(arguments).await
    }

    fn entry(&self, name: &str) -> Result<&RegisteredTool, ToolError> {
        self.index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }
}

/// Handler adapter that deserializes arguments into `A` before calling `f`.
pub struct TypedHandler<A, F> {
    tool: &'static str,
    f: F,
    _args: PhantomData<fn() -> A>,
}

#[async_trait]
impl<A, F, Fut> ToolHandler for TypedHandler<A, F>
where
    A: DeserializeOwned + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    async fn call(&self, arguments: Value) -> Result<Value, ToolError> {
        let args: A = serde_json::from_value(arguments)
            .map_err(|e| ToolError::invalid_arguments(self.tool, e.to_string()))?;
        (self.f)(args).await
    }
}

/// Build a handler for `tool` from a function over its typed arguments.
pub fn typed<A, F, Fut>(tool: &'static str, f: F) -> Arc<dyn ToolHandler>
where
    A: DeserializeOwned + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    Arc::new(TypedHandler {
        tool,
        f,
        _args: PhantomData,
    })
}
