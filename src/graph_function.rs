//! A named dataflow graph compiled to one LLVM function.
//!
//! The function is the arena for its nodes: instances live in a UUID-keyed
//! table and every edge is a `(Uuid, port_index)` pair stored symmetrically
//! on both endpoints. All edge mutation goes through the `connect_*` /
//! `disconnect_*` operations here, which keep the dual records consistent
//! and never leave a half-connected state.

use std::collections::HashMap;
use std::time::SystemTime;

use serde_json::json;
use uuid::Uuid;

use crate::data_type::{DataType, NamedDataType};
use crate::diagnostics::Diagnostics;
use crate::graph_module::{get_local_node_type, set_local_node_type};
use crate::lang_module::{entry_node_type, exit_node_type};
use crate::node_instance::NodeInstance;
use crate::node_type::NodeType;

#[derive(Debug, Clone)]
pub struct GraphFunction {
    module: String,
    name: String,
    description: String,
    data_inputs: Vec<NamedDataType>,
    data_outputs: Vec<NamedDataType>,
    exec_inputs: Vec<String>,
    exec_outputs: Vec<String>,
    local_variables: Vec<NamedDataType>,
    nodes: HashMap<Uuid, NodeInstance>,
    last_edit: SystemTime,
}

impl GraphFunction {
    pub(crate) fn new(
        module: impl Into<String>,
        name: impl Into<String>,
        data_inputs: Vec<NamedDataType>,
        data_outputs: Vec<NamedDataType>,
        exec_inputs: Vec<String>,
        exec_outputs: Vec<String>,
    ) -> GraphFunction {
        GraphFunction {
            module: module.into(),
            name: name.into(),
            description: String::new(),
            data_inputs,
            data_outputs,
            exec_inputs,
            exec_outputs,
            local_variables: Vec::new(),
            nodes: HashMap::new(),
            last_edit: SystemTime::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full name of the owning module.
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.module, self.name)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn data_inputs(&self) -> &[NamedDataType] {
        &self.data_inputs
    }

    pub fn data_outputs(&self) -> &[NamedDataType] {
        &self.data_outputs
    }

    pub fn exec_inputs(&self) -> &[String] {
        &self.exec_inputs
    }

    pub fn exec_outputs(&self) -> &[String] {
        &self.exec_outputs
    }

    pub fn local_variables(&self) -> &[NamedDataType] {
        &self.local_variables
    }

    pub fn nodes(&self) -> &HashMap<Uuid, NodeInstance> {
        &self.nodes
    }

    pub fn node(&self, id: Uuid) -> Option<&NodeInstance> {
        self.nodes.get(&id)
    }

    pub fn last_edit_time(&self) -> SystemTime {
        self.last_edit
    }

    fn touch(&mut self) {
        self.last_edit = SystemTime::now();
    }

    // ------------------------------------------------------------------
    // Node management
    // ------------------------------------------------------------------

    /// Insert a node with a fresh id.
    pub fn insert_node(&mut self, ty: NodeType, x: f32, y: f32) -> Uuid {
        let id = Uuid::new_v4();
        let res = self.insert_node_with_id(ty, x, y, id);
        debug_assert!(res.success());
        id
    }

    /// Insert a node under a caller-chosen id, as the deserializer does.
    pub fn insert_node_with_id(&mut self, ty: NodeType, x: f32, y: f32, id: Uuid) -> Diagnostics {
        let mut res = Diagnostics::new();
        if self.nodes.contains_key(&id) {
            res.add_entry(
                "E47",
                "Cannot have two nodes with the same ID",
                json!({ "Requested ID": id.to_string() }),
            );
            return res;
        }
        self.touch();
        self.nodes.insert(id, NodeInstance::new(ty, x, y, id));
        res
    }

    /// Remove a node, severing every edge first.
    pub fn remove_node(&mut self, id: Uuid) -> Diagnostics {
        let mut res = Diagnostics::new();
        let Some(node) = self.nodes.get(&id) else {
            res.add_entry(
                "EUKN",
                "Cannot remove a node that doesn't exist",
                json!({ "Node ID": id.to_string() }),
            );
            return res;
        };

        let input_exec: Vec<_> = node
            .input_exec_connections()
            .iter()
            .flatten()
            .copied()
            .collect();
        let output_exec: Vec<_> = node
            .output_exec_connections()
            .iter()
            .enumerate()
            .filter(|(_, conn)| conn.is_some())
            .map(|(idx, _)| idx)
            .collect();
        let input_data: Vec<_> = node.input_data_connections().iter().flatten().copied().collect();
        let output_data: Vec<_> = node
            .output_data_connections()
            .iter()
            .enumerate()
            .flat_map(|(idx, conns)| conns.iter().map(move |(peer, _)| (idx, *peer)))
            .collect();

        self.touch();
        for (source, source_idx) in input_exec {
            res.append(self.disconnect_exec(source, source_idx));
        }
        for idx in output_exec {
            res.append(self.disconnect_exec(id, idx));
        }
        for (source, source_idx) in input_data {
            res.append(self.disconnect_data(source, source_idx, id));
        }
        for (idx, consumer) in output_data {
            res.append(self.disconnect_data(id, idx, consumer));
        }

        self.nodes.remove(&id);
        res
    }

    /// All nodes whose type has the given module and name.
    pub fn nodes_with_type(&self, module: &str, name: &str) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self
            .nodes
            .values()
            .filter(|n| n.node_type().module == module && n.node_type().name == name)
            .map(|n| n.id())
            .collect();
        ids.sort();
        ids
    }

    /// The unique `lang:entry` node whose signature matches the function's,
    /// if there is exactly one `lang:entry` at all.
    pub fn entry_node(&self) -> Option<Uuid> {
        let matching = self.nodes_with_type("lang", "entry");
        if matching.len() != 1 {
            return None;
        }
        let node = &self.nodes[&matching[0]];
        if node.node_type().data_outputs != self.data_inputs {
            return None;
        }
        if node.node_type().exec_outputs != self.exec_inputs {
            return None;
        }
        Some(matching[0])
    }

    /// The entry node type this function's signature calls for.
    pub fn create_entry_node_type(&self) -> NodeType {
        entry_node_type(self.data_inputs.clone(), self.exec_inputs.clone())
    }

    /// The exit node type this function's signature calls for.
    pub fn create_exit_node_type(&self) -> NodeType {
        exit_node_type(self.data_outputs.clone(), self.exec_outputs.clone())
    }

    /// Return the entry node, inserting one if the function has none.
    pub fn get_or_insert_entry_node(&mut self, x: f32, y: f32, id: Uuid) -> (Uuid, Diagnostics) {
        if let Some(existing) = self.entry_node() {
            return (existing, Diagnostics::new());
        }
        let ty = self.create_entry_node_type();
        let res = self.insert_node_with_id(ty, x, y, id);
        (id, res)
    }

    /// Replace a node's type, pruning every edge the new arity or types
    /// cannot sustain. An edge survives only if its port still exists and
    /// carries the same DataType.
    pub fn set_node_type(&mut self, id: Uuid, new_type: NodeType) -> Diagnostics {
        let mut res = Diagnostics::new();
        let Some(node) = self.nodes.get(&id) else {
            res.add_entry(
                "EUKN",
                "Cannot set the type of a node that doesn't exist",
                json!({ "Node ID": id.to_string() }),
            );
            return res;
        };

        let old = node.node_type().clone();

        // Exec ports are untyped; only arity matters.
        let stale_input_exec: Vec<_> = node
            .input_exec_connections()
            .iter()
            .skip(new_type.exec_inputs.len())
            .flatten()
            .copied()
            .collect();
        let stale_output_exec: Vec<_> = (new_type.exec_outputs.len()
            ..node.output_exec_connections().len())
            .filter(|idx| node.output_exec_connections()[*idx].is_some())
            .collect();

        let stale_input_data: Vec<_> = node
            .input_data_connections()
            .iter()
            .enumerate()
            .filter_map(|(idx, conn)| {
                let conn = (*conn)?;
                let keep = new_type.data_inputs.len() > idx
                    && old.data_inputs[idx].ty == new_type.data_inputs[idx].ty;
                if keep {
                    None
                } else {
                    Some(conn)
                }
            })
            .collect();
        let stale_output_data: Vec<_> = node
            .output_data_connections()
            .iter()
            .enumerate()
            .flat_map(|(idx, conns)| {
                let keep = new_type.data_outputs.len() > idx
                    && old.data_outputs[idx].ty == new_type.data_outputs[idx].ty;
                if keep {
                    Vec::new()
                } else {
                    conns.iter().map(move |(peer, _)| (idx, *peer)).collect()
                }
            })
            .collect();

        // Pure nodes drop every exec edge.
        let (stale_input_exec, stale_output_exec) = if new_type.pure {
            (
                node.input_exec_connections()
                    .iter()
                    .flatten()
                    .copied()
                    .collect(),
                (0..node.output_exec_connections().len())
                    .filter(|idx| node.output_exec_connections()[*idx].is_some())
                    .collect(),
            )
        } else {
            (stale_input_exec, stale_output_exec)
        };

        self.touch();
        for (source, source_idx) in stale_input_exec {
            res.append(self.disconnect_exec(source, source_idx));
        }
        for idx in stale_output_exec {
            res.append(self.disconnect_exec(id, idx));
        }
        for (source, source_idx) in stale_input_data {
            res.append(self.disconnect_data(source, source_idx, id));
        }
        for (idx, consumer) in stale_output_data {
            res.append(self.disconnect_data(id, idx, consumer));
        }

        self.nodes
            .get_mut(&id)
            .expect("node vanished during set_node_type")
            .replace_type_raw(new_type);
        res
    }

    // ------------------------------------------------------------------
    // Connection editing
    // ------------------------------------------------------------------

    /// Connect `lhs`'s data output `lhs_idx` to `rhs`'s data input
    /// `rhs_idx`. An occupied destination is disconnected first; both
    /// endpoints are updated atomically or not at all.
    pub fn connect_data(
        &mut self,
        lhs: Uuid,
        lhs_idx: usize,
        rhs: Uuid,
        rhs_idx: usize,
    ) -> Diagnostics {
        let mut res = Diagnostics::new();
        let lhs_node = self.expect_node(lhs);
        let rhs_node = self.expect_node(rhs);

        if lhs_idx >= lhs_node.output_data_connections().len() {
            res.add_entry(
                "E22",
                "Output data connection doesn't exist in node",
                json!({
                    "Requested ID": lhs_idx,
                    "Node Type": lhs_node.node_type().qualified_name(),
                    "Node Output Data Connections": crate::node_type::port_pairs(&lhs_node.node_type().data_outputs),
                }),
            );
        }
        if rhs_idx >= rhs_node.input_data_connections().len() {
            res.add_entry(
                "E23",
                "Input data connection doesn't exist in node",
                json!({
                    "Requested ID": rhs_idx,
                    "Node Type": rhs_node.node_type().qualified_name(),
                    "Node Input Data Connections": crate::node_type::port_pairs(&rhs_node.node_type().data_inputs),
                }),
            );
        }
        if !res.success() {
            return res;
        }

        let from_ty = &lhs_node.node_type().data_outputs[lhs_idx].ty;
        let to_ty = &rhs_node.node_type().data_inputs[rhs_idx].ty;
        if from_ty != to_ty {
            res.add_entry(
                "E24",
                "Connecting data ports with different types is invalid",
                json!({
                    "Left Hand Type": from_ty.qualified_name(),
                    "Right Hand Type": to_ty.qualified_name(),
                    "Left Node": lhs.to_string(),
                    "Right Node": rhs.to_string(),
                }),
            );
            return res;
        }

        // Replacement: sever the previous producer of this input.
        if let Some((prev, prev_idx)) = rhs_node.input_data_connections()[rhs_idx] {
            res.append(self.disconnect_data(prev, prev_idx, rhs));
            if !res.success() {
                return res;
            }
        }

        self.touch();
        self.nodes.get_mut(&lhs).unwrap().output_data[lhs_idx].push((rhs, rhs_idx));
        self.nodes.get_mut(&rhs).unwrap().input_data[rhs_idx] = Some((lhs, lhs_idx));
        res
    }

    /// Connect `lhs`'s exec output `lhs_idx` to `rhs`'s exec input
    /// `rhs_idx`. The output side holds at most one target, so replacement
    /// applies there; an input may receive any number of sources.
    pub fn connect_exec(
        &mut self,
        lhs: Uuid,
        lhs_idx: usize,
        rhs: Uuid,
        rhs_idx: usize,
    ) -> Diagnostics {
        let mut res = Diagnostics::new();
        let lhs_node = self.expect_node(lhs);
        let rhs_node = self.expect_node(rhs);

        if lhs_idx >= lhs_node.output_exec_connections().len() {
            res.add_entry(
                "E22",
                "Output exec connection doesn't exist in node",
                json!({
                    "Requested ID": lhs_idx,
                    "Node Type": lhs_node.node_type().qualified_name(),
                    "Node Output Exec Connections": lhs_node.node_type().exec_outputs,
                }),
            );
        }
        if rhs_idx >= rhs_node.input_exec_connections().len() {
            res.add_entry(
                "E23",
                "Input exec connection doesn't exist in node",
                json!({
                    "Requested ID": rhs_idx,
                    "Node Type": rhs_node.node_type().qualified_name(),
                    "Node Input Exec Connections": rhs_node.node_type().exec_inputs,
                }),
            );
        }
        if !res.success() {
            return res;
        }

        if lhs_node.output_exec_connections()[lhs_idx].is_some() {
            res.append(self.disconnect_exec(lhs, lhs_idx));
            if !res.success() {
                return res;
            }
        }

        self.touch();
        self.nodes.get_mut(&lhs).unwrap().output_exec[lhs_idx] = Some((rhs, rhs_idx));
        self.nodes.get_mut(&rhs).unwrap().input_exec[rhs_idx].push((lhs, lhs_idx));
        res
    }

    /// Remove the data edge from `lhs`'s output `lhs_idx` into `rhs`.
    /// A missing dual record signals corruption and reports `EUKN`.
    pub fn disconnect_data(&mut self, lhs: Uuid, lhs_idx: usize, rhs: Uuid) -> Diagnostics {
        let mut res = Diagnostics::new();
        let lhs_node = self.expect_node(lhs);

        if lhs_idx >= lhs_node.output_data_connections().len() {
            res.add_entry(
                "E22",
                "Output data connection doesn't exist in node",
                json!({
                    "Requested ID": lhs_idx,
                    "Node Type": lhs_node.node_type().qualified_name(),
                }),
            );
            return res;
        }

        let Some(entry_pos) = lhs_node.output_data_connections()[lhs_idx]
            .iter()
            .position(|(peer, _)| *peer == rhs)
        else {
            res.add_entry(
                "EUKN",
                "Cannot disconnect a data connection that doesn't exist",
                json!({
                    "Left node ID": lhs.to_string(),
                    "Right node ID": rhs.to_string(),
                    "Left dock ID": lhs_idx,
                }),
            );
            return res;
        };
        let (_, rhs_idx) = lhs_node.output_data_connections()[lhs_idx][entry_pos];

        let rhs_node = self.expect_node(rhs);
        if rhs_node.input_data_connections().len() <= rhs_idx
            || rhs_node.input_data_connections()[rhs_idx] != Some((lhs, lhs_idx))
        {
            res.add_entry(
                "EUKN",
                "Data connection doesn't connect back",
                json!({
                    "Left node ID": lhs.to_string(),
                    "Right node ID": rhs.to_string(),
                }),
            );
            return res;
        }

        self.touch();
        self.nodes.get_mut(&rhs).unwrap().input_data[rhs_idx] = None;
        self.nodes.get_mut(&lhs).unwrap().output_data[lhs_idx].remove(entry_pos);
        res
    }

    /// Remove the exec edge leaving `lhs`'s output `lhs_idx`.
    pub fn disconnect_exec(&mut self, lhs: Uuid, lhs_idx: usize) -> Diagnostics {
        let mut res = Diagnostics::new();
        let lhs_node = self.expect_node(lhs);

        if lhs_idx >= lhs_node.output_exec_connections().len() {
            res.add_entry(
                "E22",
                "Output exec connection doesn't exist in node",
                json!({
                    "Requested ID": lhs_idx,
                    "Node Type": lhs_node.node_type().qualified_name(),
                }),
            );
            return res;
        }

        let Some((rhs, rhs_idx)) = lhs_node.output_exec_connections()[lhs_idx] else {
            res.add_entry(
                "EUKN",
                "Cannot disconnect an exec connection that doesn't exist",
                json!({ "Left node ID": lhs.to_string(), "Left node dock id": lhs_idx }),
            );
            return res;
        };

        let rhs_node = self.expect_node(rhs);
        let Some(entry_pos) = rhs_node.input_exec_connections()[rhs_idx]
            .iter()
            .position(|pair| *pair == (lhs, lhs_idx))
        else {
            res.add_entry(
                "EUKN",
                "Cannot disconnect an exec connection that doesn't connect back",
                json!({ "Left node ID": lhs.to_string(), "Left node dock id": lhs_idx }),
            );
            return res;
        };

        self.touch();
        self.nodes.get_mut(&rhs).unwrap().input_exec[rhs_idx].remove(entry_pos);
        self.nodes.get_mut(&lhs).unwrap().output_exec[lhs_idx] = None;
        res
    }

    fn expect_node(&self, id: Uuid) -> &NodeInstance {
        self.nodes
            .get(&id)
            .unwrap_or_else(|| panic!("node {id} is not part of function {}", self.name))
    }

    // ------------------------------------------------------------------
    // Signature editing
    // ------------------------------------------------------------------

    pub fn add_data_input(&mut self, ty: DataType, name: impl Into<String>, add_before: usize) {
        self.touch();
        let port = NamedDataType::new(name, ty);
        if add_before < self.data_inputs.len() {
            self.data_inputs.insert(add_before, port);
        } else {
            self.data_inputs.push(port);
        }
        self.update_entries();
    }

    pub fn remove_data_input(&mut self, idx: usize) {
        self.touch();
        if idx < self.data_inputs.len() {
            self.data_inputs.remove(idx);
        }
        self.update_entries();
    }

    pub fn rename_data_input(&mut self, idx: usize, new_name: impl Into<String>) {
        self.touch();
        if idx < self.data_inputs.len() {
            self.data_inputs[idx].name = new_name.into();
        }
        self.update_entries();
    }

    pub fn retype_data_input(&mut self, idx: usize, new_type: DataType) {
        self.touch();
        if idx < self.data_inputs.len() {
            self.data_inputs[idx].ty = new_type;
        }
        self.update_entries();
    }

    pub fn add_data_output(&mut self, ty: DataType, name: impl Into<String>, add_before: usize) {
        self.touch();
        let port = NamedDataType::new(name, ty);
        if add_before < self.data_outputs.len() {
            self.data_outputs.insert(add_before, port);
        } else {
            self.data_outputs.push(port);
        }
        self.update_exits();
    }

    pub fn remove_data_output(&mut self, idx: usize) {
        self.touch();
        if idx < self.data_outputs.len() {
            self.data_outputs.remove(idx);
        }
        self.update_exits();
    }

    pub fn rename_data_output(&mut self, idx: usize, new_name: impl Into<String>) {
        self.touch();
        if idx < self.data_outputs.len() {
            self.data_outputs[idx].name = new_name.into();
        }
        self.update_exits();
    }

    pub fn retype_data_output(&mut self, idx: usize, new_type: DataType) {
        self.touch();
        if idx < self.data_outputs.len() {
            self.data_outputs[idx].ty = new_type;
        }
        self.update_exits();
    }

    pub fn add_exec_input(&mut self, name: impl Into<String>, add_before: usize) {
        self.touch();
        let name = name.into();
        if add_before < self.exec_inputs.len() {
            self.exec_inputs.insert(add_before, name);
        } else {
            self.exec_inputs.push(name);
        }
        self.update_entries();
    }

    pub fn add_exec_output(&mut self, name: impl Into<String>, add_before: usize) {
        self.touch();
        let name = name.into();
        if add_before < self.exec_outputs.len() {
            self.exec_outputs.insert(add_before, name);
        } else {
            self.exec_outputs.push(name);
        }
        self.update_exits();
    }

    pub fn remove_exec_input(&mut self, idx: usize) {
        self.touch();
        if idx < self.exec_inputs.len() {
            self.exec_inputs.remove(idx);
        }
        self.update_entries();
    }

    pub fn rename_exec_input(&mut self, idx: usize, new_name: impl Into<String>) {
        self.touch();
        if idx < self.exec_inputs.len() {
            self.exec_inputs[idx] = new_name.into();
        }
        self.update_entries();
    }

    pub fn remove_exec_output(&mut self, idx: usize) {
        self.touch();
        if idx < self.exec_outputs.len() {
            self.exec_outputs.remove(idx);
        }
        self.update_exits();
    }

    pub fn rename_exec_output(&mut self, idx: usize, new_name: impl Into<String>) {
        self.touch();
        if idx < self.exec_outputs.len() {
            self.exec_outputs[idx] = new_name.into();
        }
        self.update_exits();
    }

    /// Re-stamp every `lang:entry` node with the current input signature.
    fn update_entries(&mut self) {
        let ty = self.create_entry_node_type();
        for id in self.nodes_with_type("lang", "entry") {
            self.set_node_type(id, ty.clone());
        }
    }

    /// Re-stamp every `lang:exit` node with the current output signature.
    fn update_exits(&mut self) {
        let ty = self.create_exit_node_type();
        for id in self.nodes_with_type("lang", "exit") {
            self.set_node_type(id, ty.clone());
        }
    }

    // ------------------------------------------------------------------
    // Local variables
    // ------------------------------------------------------------------

    pub fn local_variable(&self, name: &str) -> Option<&NamedDataType> {
        self.local_variables.iter().find(|v| v.name == name)
    }

    pub fn get_or_create_local_variable(
        &mut self,
        name: impl Into<String>,
        ty: DataType,
    ) -> NamedDataType {
        let name = name.into();
        if let Some(existing) = self.local_variable(&name) {
            return existing.clone();
        }
        self.touch();
        let var = NamedDataType::new(name, ty);
        self.local_variables.push(var.clone());
        var
    }

    /// Remove a local variable along with every `_get_` / `_set_` node
    /// referencing it. Returns whether anything was removed.
    pub fn remove_local_variable(&mut self, name: &str) -> bool {
        let Some(pos) = self.local_variables.iter().position(|v| v.name == name) else {
            return false;
        };
        self.touch();
        self.local_variables.remove(pos);

        let module = self.module.clone();
        for prefix in ["_get_", "_set_"] {
            for id in self.nodes_with_type(&module, &format!("{prefix}{name}")) {
                self.remove_node(id);
            }
        }
        true
    }

    pub fn rename_local_variable(&mut self, old_name: &str, new_name: impl Into<String>) {
        let new_name = new_name.into();
        let Some(var) = self
            .local_variables
            .iter_mut()
            .find(|v| v.name == old_name)
        else {
            return;
        };
        var.name = new_name.clone();
        let renamed = var.clone();
        self.touch();

        let module = self.module.clone();
        for id in self.nodes_with_type(&module, &format!("_get_{old_name}")) {
            self.set_node_type(id, get_local_node_type(&module, renamed.clone()));
        }
        for id in self.nodes_with_type(&module, &format!("_set_{old_name}")) {
            self.set_node_type(id, set_local_node_type(&module, renamed.clone()));
        }
    }

    pub fn retype_local_variable(&mut self, name: &str, new_type: DataType) {
        let Some(var) = self.local_variables.iter_mut().find(|v| v.name == name) else {
            return;
        };
        var.ty = new_type;
        let retyped = var.clone();
        self.touch();

        let module = self.module.clone();
        for id in self.nodes_with_type(&module, &format!("_get_{name}")) {
            self.set_node_type(id, get_local_node_type(&module, retyped.clone()));
        }
        for id in self.nodes_with_type(&module, &format!("_set_{name}")) {
            self.set_node_type(id, set_local_node_type(&module, retyped.clone()));
        }
    }
}
