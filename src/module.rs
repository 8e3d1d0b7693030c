//! The module variants a context can hold.

use serde_json::Value;

use crate::data_type::DataType;
use crate::diagnostics::Diagnostics;
use crate::graph_module::GraphModule;
use crate::lang_module::{LangModule, LANG_MODULE_NAME};
use crate::node_type::NodeType;

/// Either the built-in `lang` module or a user graph module. The common
/// surface (names, dependencies, type and node-type lookup) lives here so
/// the context can treat them uniformly.
#[derive(Debug)]
pub enum ChiModule {
    Lang(LangModule),
    Graph(GraphModule),
}

impl ChiModule {
    pub fn full_name(&self) -> &str {
        match self {
            ChiModule::Lang(_) => LANG_MODULE_NAME,
            ChiModule::Graph(m) => m.full_name(),
        }
    }

    pub fn short_name(&self) -> &str {
        match self {
            ChiModule::Lang(_) => LANG_MODULE_NAME,
            ChiModule::Graph(m) => m.short_name(),
        }
    }

    /// Dependency full names. `lang` has none and is implicit everywhere.
    pub fn dependencies(&self) -> Vec<String> {
        match self {
            ChiModule::Lang(_) => Vec::new(),
            ChiModule::Graph(m) => m.dependencies().iter().cloned().collect(),
        }
    }

    pub fn type_from_name(&self, name: &str) -> Option<DataType> {
        match self {
            ChiModule::Lang(m) => m.type_from_name(name),
            ChiModule::Graph(m) => m.type_from_name(name),
        }
    }

    pub fn node_type_names(&self) -> Vec<String> {
        match self {
            ChiModule::Lang(m) => m.node_type_names(),
            ChiModule::Graph(m) => m.node_type_names(),
        }
    }

    pub fn node_type_from_name(&self, name: &str, data: &Value) -> Result<NodeType, Diagnostics> {
        match self {
            ChiModule::Lang(m) => m.node_type_from_name(name, data),
            ChiModule::Graph(m) => m.node_type_from_name(name, data),
        }
    }

    pub fn as_graph(&self) -> Option<&GraphModule> {
        match self {
            ChiModule::Graph(m) => Some(m),
            ChiModule::Lang(_) => None,
        }
    }

    pub fn as_graph_mut(&mut self) -> Option<&mut GraphModule> {
        match self {
            ChiModule::Graph(m) => Some(m),
            ChiModule::Lang(_) => None,
        }
    }
}
