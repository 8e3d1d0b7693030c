//! A user module: functions, structs, and dependencies.

use std::collections::BTreeSet;
use std::time::SystemTime;

use serde_json::{json, Value};

use crate::data_type::{parse_qualified_name, DataType, NamedDataType};
use crate::diagnostics::Diagnostics;
use crate::graph_function::GraphFunction;
use crate::graph_struct::GraphStruct;
use crate::node_type::{NodeType, NodeTypeKind};

/// A module identified by a slash-separated full name
/// (e.g. `github.com/user/repo/sub`). Owns graph functions and structs and
/// records the full names of the modules it depends on; the dependencies
/// themselves live in the [`crate::context::Context`].
#[derive(Debug, Clone)]
pub struct GraphModule {
    full_name: String,
    dependencies: BTreeSet<String>,
    functions: Vec<GraphFunction>,
    structs: Vec<GraphStruct>,
    last_edit: SystemTime,
}

impl GraphModule {
    pub fn new(full_name: impl Into<String>) -> GraphModule {
        GraphModule {
            full_name: full_name.into(),
            dependencies: BTreeSet::new(),
            functions: Vec::new(),
            structs: Vec::new(),
            last_edit: SystemTime::now(),
        }
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Last path segment of the full name.
    pub fn short_name(&self) -> &str {
        self.full_name
            .rsplit('/')
            .next()
            .unwrap_or(&self.full_name)
    }

    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    /// Record a dependency. The context resolves and loads it; `lang` is
    /// implicit and never recorded.
    pub fn add_dependency(&mut self, full_name: impl Into<String>) {
        let full_name = full_name.into();
        if full_name != crate::lang_module::LANG_MODULE_NAME {
            self.touch();
            self.dependencies.insert(full_name);
        }
    }

    pub fn remove_dependency(&mut self, full_name: &str) -> bool {
        let removed = self.dependencies.remove(full_name);
        if removed {
            self.touch();
        }
        removed
    }

    pub fn functions(&self) -> &[GraphFunction] {
        &self.functions
    }

    pub fn function(&self, name: &str) -> Option<&GraphFunction> {
        self.functions.iter().find(|f| f.name() == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut GraphFunction> {
        self.functions.iter_mut().find(|f| f.name() == name)
    }

    pub fn structs(&self) -> &[GraphStruct] {
        &self.structs
    }

    pub fn struct_from_name(&self, name: &str) -> Option<&GraphStruct> {
        self.structs.iter().find(|s| s.name() == name)
    }

    pub fn struct_mut(&mut self, name: &str) -> Option<&mut GraphStruct> {
        self.structs.iter_mut().find(|s| s.name() == name)
    }

    /// Most recent edit across the module and its functions. Function edits
    /// bump their own stamps; the module aggregates them so the compile
    /// cache sees every change.
    pub fn last_edit_time(&self) -> SystemTime {
        self.functions
            .iter()
            .map(|f| f.last_edit_time())
            .fold(self.last_edit, SystemTime::max)
    }

    fn touch(&mut self) {
        self.last_edit = SystemTime::now();
    }

    /// Get a function by name, creating it with the given signature when
    /// absent. The bool reports whether a function was created.
    pub fn get_or_create_function(
        &mut self,
        name: impl Into<String>,
        data_inputs: Vec<NamedDataType>,
        data_outputs: Vec<NamedDataType>,
        exec_inputs: Vec<String>,
        exec_outputs: Vec<String>,
    ) -> (&mut GraphFunction, bool) {
        let name = name.into();
        if let Some(pos) = self.functions.iter().position(|f| f.name() == name) {
            return (&mut self.functions[pos], false);
        }
        self.touch();
        self.functions.push(GraphFunction::new(
            self.full_name.clone(),
            name,
            data_inputs,
            data_outputs,
            exec_inputs,
            exec_outputs,
        ));
        (self.functions.last_mut().unwrap(), true)
    }

    /// Remove a function by name. Nodes in other modules that call it are
    /// left dangling; validation reports them when their module compiles.
    pub fn remove_function(&mut self, name: &str) -> bool {
        let Some(pos) = self.functions.iter().position(|f| f.name() == name) else {
            return false;
        };
        self.touch();
        self.functions.remove(pos);
        true
    }

    pub fn get_or_create_struct(&mut self, name: impl Into<String>) -> (&mut GraphStruct, bool) {
        let name = name.into();
        if let Some(pos) = self.structs.iter().position(|s| s.name() == name) {
            return (&mut self.structs[pos], false);
        }
        self.touch();
        self.structs
            .push(GraphStruct::new(self.full_name.clone(), name));
        (self.structs.last_mut().unwrap(), true)
    }

    pub fn remove_struct(&mut self, name: &str) -> bool {
        let Some(pos) = self.structs.iter().position(|s| s.name() == name) else {
            return false;
        };
        self.touch();
        self.structs.remove(pos);
        true
    }

    /// The module's type namespace: its structs.
    pub fn type_from_name(&self, name: &str) -> Option<DataType> {
        self.struct_from_name(name).map(|s| s.data_type())
    }

    /// Re-stamp every `_make_` / `_break_` node of a struct after its
    /// fields changed, pruning edges the new field list cannot sustain.
    pub fn refresh_struct_nodes(&mut self, name: &str) {
        let Some(s) = self.struct_from_name(name) else {
            return;
        };
        let make = make_struct_node_type(s);
        let brk = break_struct_node_type(s);
        let module_name = self.full_name.clone();

        for func in &mut self.functions {
            for id in func.nodes_with_type(&module_name, &make.name) {
                func.set_node_type(id, make.clone());
            }
            for id in func.nodes_with_type(&module_name, &brk.name) {
                func.set_node_type(id, brk.clone());
            }
        }
    }

    /// Every node type name this module can hand out: one per function plus
    /// `_make_` / `_break_` for each struct. (`_get_` / `_set_` names are
    /// function-local and excluded here, as the local variable namespace is
    /// not module-wide.)
    pub fn node_type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.iter().map(|f| f.name().to_string()).collect();
        for s in &self.structs {
            names.push(format!("_make_{}", s.name()));
            names.push(format!("_break_{}", s.name()));
        }
        names
    }

    /// Hydrate a node type from a name and JSON payload.
    ///
    /// Resolves, in order: a graph function (call node), `_make_` /
    /// `_break_` struct nodes, `_get_` / `_set_` local variable nodes
    /// (payload is the variable's qualified type).
    pub fn node_type_from_name(&self, name: &str, data: &Value) -> Result<NodeType, Diagnostics> {
        let mut res = Diagnostics::new();

        if let Some(func) = self.function(name) {
            return Ok(function_call_node_type(func));
        }

        if let Some(struct_name) = name.strip_prefix("_make_") {
            if let Some(s) = self.struct_from_name(struct_name) {
                return Ok(make_struct_node_type(s));
            }
        }
        if let Some(struct_name) = name.strip_prefix("_break_") {
            if let Some(s) = self.struct_from_name(struct_name) {
                return Ok(break_struct_node_type(s));
            }
        }

        for (prefix, set) in [("_get_", false), ("_set_", true)] {
            let Some(var_name) = name.strip_prefix(prefix) else {
                continue;
            };
            let Some(qualified) = data.as_str() else {
                res.add_entry(
                    "EUKN",
                    "JSON data for a local variable node type must be a qualified type string",
                    json!({ "Given Data": data }),
                );
                return Err(res);
            };
            let Some((module, ty_name)) = parse_qualified_name(qualified) else {
                res.add_entry(
                    "EUKN",
                    "Incorrect qualified type name (should be module:type)",
                    json!({ "Given Data": qualified }),
                );
                return Err(res);
            };
            let var = NamedDataType::new(var_name, DataType::new(module, ty_name));
            return Ok(if set {
                set_local_node_type(&self.full_name, var)
            } else {
                get_local_node_type(&self.full_name, var)
            });
        }

        res.add_entry(
            "EUKN",
            "Graph not found in module",
            json!({ "Module Name": self.full_name, "Requested Graph": name }),
        );
        Err(res)
    }
}

/// Call node for a graph function: data and exec ports mirror the callee's
/// signature.
pub fn function_call_node_type(func: &GraphFunction) -> NodeType {
    NodeType {
        name: func.name().to_string(),
        module: func.module().to_string(),
        description: func.description().to_string(),
        pure: false,
        converter: false,
        data_inputs: func.data_inputs().to_vec(),
        data_outputs: func.data_outputs().to_vec(),
        exec_inputs: func.exec_inputs().to_vec(),
        exec_outputs: func.exec_outputs().to_vec(),
        kind: NodeTypeKind::FunctionCall {
            module: func.module().to_string(),
            function: func.name().to_string(),
        },
    }
}

/// `_make_<S>`: pure, fields in, one struct value out.
pub fn make_struct_node_type(s: &GraphStruct) -> NodeType {
    NodeType {
        name: format!("_make_{}", s.name()),
        module: s.module().to_string(),
        description: format!("Make a {} structure", s.name()),
        pure: true,
        converter: false,
        data_inputs: s.fields().to_vec(),
        data_outputs: vec![NamedDataType::new("", s.data_type())],
        exec_inputs: vec![],
        exec_outputs: vec![],
        kind: NodeTypeKind::MakeStruct { ty: s.data_type() },
    }
}

/// `_break_<S>`: pure, one struct value in, fields out.
pub fn break_struct_node_type(s: &GraphStruct) -> NodeType {
    NodeType {
        name: format!("_break_{}", s.name()),
        module: s.module().to_string(),
        description: format!("Break a {} structure", s.name()),
        pure: true,
        converter: false,
        data_inputs: vec![NamedDataType::new("", s.data_type())],
        data_outputs: s.fields().to_vec(),
        exec_inputs: vec![],
        exec_outputs: vec![],
        kind: NodeTypeKind::BreakStruct { ty: s.data_type() },
    }
}

/// `_get_<var>`: pure read of a function-local variable.
pub fn get_local_node_type(module: &str, var: NamedDataType) -> NodeType {
    NodeType {
        name: format!("_get_{}", var.name),
        module: module.to_string(),
        description: format!("Get {}", var.name),
        pure: true,
        converter: false,
        data_inputs: vec![],
        data_outputs: vec![NamedDataType::new("", var.ty.clone())],
        exec_inputs: vec![],
        exec_outputs: vec![],
        kind: NodeTypeKind::GetLocal(var),
    }
}

/// `_set_<var>`: sequenced write of a function-local variable.
pub fn set_local_node_type(module: &str, var: NamedDataType) -> NodeType {
    NodeType {
        name: format!("_set_{}", var.name),
        module: module.to_string(),
        description: format!("Set {}", var.name),
        pure: false,
        converter: false,
        data_inputs: vec![NamedDataType::new("", var.ty.clone())],
        data_outputs: vec![],
        exec_inputs: vec![String::new()],
        exec_outputs: vec![String::new()],
        kind: NodeTypeKind::SetLocal(var),
    }
}
