use super::traits::{ErasedTool, Tool, ToolReply};
use super::{artifacts, build, editor, index, test_run};
use crate::context::ExecutionContext;
use hostlink_core::protocol::TOOLS_LIST;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

/// Name, description and argument schema of one tool, as listed by
/// `tools_list`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// Tools by name, in registration order.
pub struct ToolRegistry {
    tools: Vec<Box<dyn ErasedTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// The full automation surface.
    pub fn with_default_tools() -> Self {
        let mut registry = Self::new();
        registry.register(build::BuildTrigger);
        registry.register(build::BuildStatus);
        registry.register(test_run::RunAll);
        registry.register(test_run::RunSingle);
        registry.register(test_run::RunRegex);
        registry.register(test_run::TestsStatus);
        registry.register(test_run::TestsCancel);
        registry.register(artifacts::CompileAll);
        registry.register(artifacts::CompileRegex);
        registry.register(artifacts::CompileSingle);
        registry.register(artifacts::ArtifactsStatus);
        registry.register(index::IndexRefresh);
        registry.register(index::IndexStatus);
        registry.register(editor::EditorStatus);
        registry.register(editor::ExitPlayMode);
        registry
    }

    /// Register a tool. A later registration under the same name replaces
    /// the earlier one.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools.retain(|t| t.name() != T::NAME);
        self.tools.push(Box::new(tool));
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name)
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|t| ToolDescriptor {
                name: t.name(),
                description: t.description(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Run the tool called `name`. `tools_list` is answered here.
    pub async fn dispatch(&self, name: &str, ctx: &ExecutionContext, arguments: Value) -> ToolReply {
        if name == TOOLS_LIST {
            let tools = self.descriptors();
            return ToolReply::ok(format!("{} tool(s) available", tools.len()))
                .with_payload(json!({ "tools": tools }));
        }

        match self.tools.iter().find(|t| t.name() == name) {
            Some(tool) => {
                debug!(tool = name, "dispatching tool call");
                tool.call(ctx, arguments).await
            }
            None => ToolReply::error(format!("Unknown tool: {name}")),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_default_tools()
    }
}
