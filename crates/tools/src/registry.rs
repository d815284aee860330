//! The tool registry: name → (schema, callable).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;

use relay_domain::tool::ToolDefinition;
use relay_domain::Result;

/// An async tool callable. Arguments arrive parsed; the return value is
/// normalized by the invoker.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: serde_json::Value) -> Result<serde_json::Value>;
}

type BoxedCallFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>;

/// Adapter so plain closures register without a trait impl.
struct FnHandler<F>(F);

#[async_trait::async_trait]
impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(serde_json::Value) -> BoxedCallFuture + Send + Sync,
{
    async fn call(&self, args: serde_json::Value) -> Result<serde_json::Value> {
        (self.0)(args).await
    }
}

#[derive(Clone)]
struct Registered {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
}

/// Live registry. Mutable at any time; runs operate on snapshots.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Registered>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, definition: ToolDefinition, handler: Arc<dyn ToolHandler>) {
        self.tools.write().insert(
            definition.name.clone(),
            Registered {
                definition,
                handler,
            },
        );
    }

    /// Register a closure-backed tool.
    pub fn register_fn<F, Fut>(
        &self,
        name: &str,
        description: &str,
        parameters: serde_json::Value,
        f: F,
    ) where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        let definition = ToolDefinition {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        };
        let handler = FnHandler(move |args| Box::pin(f(args)) as BoxedCallFuture);
        self.register(definition, Arc::new(handler));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// Snapshot the current map for one run. Registrations after this
    /// point do not leak into the run.
    pub fn get_available_functions(&self) -> ToolSnapshot {
        let tools = self.tools.read();
        ToolSnapshot {
            tools: tools
                .iter()
                .map(|(name, reg)| (name.clone(), reg.clone()))
                .collect(),
        }
    }
}

/// An immutable view of the registry taken at run start.
#[derive(Clone, Default)]
pub struct ToolSnapshot {
    tools: HashMap<String, Registered>,
}

impl ToolSnapshot {
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).map(|reg| reg.handler.clone())
    }

    /// Schemas exposed to the LLM, sorted by name for stable prompts.
    pub fn schemas(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|reg| reg.definition.clone())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}
