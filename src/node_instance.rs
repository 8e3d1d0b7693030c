//! A concrete use of a node type inside a graph function.

use uuid::Uuid;

use crate::node_type::NodeType;

/// One endpoint of an edge: the peer node's id plus a port index on it.
pub type PortRef = (Uuid, usize);

/// A node instance: a stable id, editor coordinates (opaque to the core),
/// its own copy of a [`NodeType`], and connection slots sized to the type's
/// port arities.
///
/// Edges are stored as `(Uuid, port_index)` pairs rather than pointers; the
/// owning [`crate::graph_function::GraphFunction`] is the arena that resolves
/// them. Every edge is stored on both endpoints and the two records must
/// stay symmetric — all mutation goes through the function's edit
/// operations, which maintain that invariant.
#[derive(Debug, Clone)]
pub struct NodeInstance {
    id: Uuid,
    pub x: f32,
    pub y: f32,
    ty: NodeType,

    /// `input_data[i]` is the producer feeding input port `i`, if any.
    pub(crate) input_data: Vec<Option<PortRef>>,
    /// `output_data[i]` lists every consumer fed by output port `i`.
    pub(crate) output_data: Vec<Vec<PortRef>>,
    /// `input_exec[i]` lists every exec output targeting input port `i`.
    pub(crate) input_exec: Vec<Vec<PortRef>>,
    /// `output_exec[i]` is the single target of exec output `i`, if any.
    pub(crate) output_exec: Vec<Option<PortRef>>,
}

impl NodeInstance {
    pub fn new(ty: NodeType, x: f32, y: f32, id: Uuid) -> NodeInstance {
        let mut inst = NodeInstance {
            id,
            x,
            y,
            ty,
            input_data: Vec::new(),
            output_data: Vec::new(),
            input_exec: Vec::new(),
            output_exec: Vec::new(),
        };
        inst.resize_slots();
        inst
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Hyphenated form of the id, used in error context and block names.
    pub fn string_id(&self) -> String {
        self.id.to_string()
    }

    pub fn node_type(&self) -> &NodeType {
        &self.ty
    }

    /// Replace the type without touching edges. Only the owning function's
    /// `set_node_type` may call this; it prunes incompatible edges first.
    pub(crate) fn replace_type_raw(&mut self, ty: NodeType) {
        self.ty = ty;
        self.resize_slots();
    }

    pub fn input_data_connections(&self) -> &[Option<PortRef>] {
        &self.input_data
    }

    pub fn output_data_connections(&self) -> &[Vec<PortRef>] {
        &self.output_data
    }

    pub fn input_exec_connections(&self) -> &[Vec<PortRef>] {
        &self.input_exec
    }

    pub fn output_exec_connections(&self) -> &[Option<PortRef>] {
        &self.output_exec
    }

    /// Number of distinct exec entries this node can be compiled for.
    /// Pure nodes and the entry node have exactly one.
    pub fn input_exec_count(&self) -> usize {
        if self.ty.pure || matches!(self.ty.kind, crate::node_type::NodeTypeKind::Entry) {
            1
        } else {
            self.input_exec.len()
        }
    }

    fn resize_slots(&mut self) {
        self.input_data.resize(self.ty.data_inputs.len(), None);
        self.output_data
            .resize(self.ty.data_outputs.len(), Vec::new());
        if self.ty.pure {
            self.input_exec.clear();
            self.output_exec.clear();
        } else {
            self.input_exec.resize(self.ty.exec_inputs.len(), Vec::new());
            self.output_exec.resize(self.ty.exec_outputs.len(), None);
        }
    }
}
