//! Node kinds: the catalog entries node instances are stamped from.

use serde_json::{json, Value};

use crate::data_type::{DataType, NamedDataType};

/// Arithmetic selector for the binary-operation node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Subtract => "-",
            BinOp::Multiply => "*",
            BinOp::Divide => "/",
        }
    }

    pub fn verb(self) -> &'static str {
        match self {
            BinOp::Add => "Add",
            BinOp::Subtract => "Subtract",
            BinOp::Multiply => "Multiply",
            BinOp::Divide => "Divide",
        }
    }
}

/// Comparison selector for the compare node types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Lt => "<",
            CmpOp::Gt => ">",
            CmpOp::Le => "<=",
            CmpOp::Ge => ">=",
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
        }
    }
}

/// The tagged variant behind a [`NodeType`]: which code-generation behavior
/// the node has, plus any per-kind payload. Port lists and flags live on the
/// `NodeType` itself so generic code never matches on the kind.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeTypeKind {
    /// Receives the function's arguments and dispatches on `inputexec_id`.
    Entry,
    /// Stores the function outputs through the out-pointers and returns the
    /// exec id it was entered through.
    Exit,
    /// Two-way branch on an `i1` condition.
    If,
    ConstInt(i32),
    ConstFloat(f64),
    ConstBool(bool),
    StrLiteral(String),
    /// `a <op> b` over a single numeric type.
    BinaryOp { ty: DataType, op: BinOp },
    /// `a <cmp> b` producing `lang:i1`.
    Compare { ty: DataType, op: CmpOp },
    /// `lang:i32` to `lang:f64` converter.
    IntToFloat,
    /// `lang:f64` to `lang:i32` converter.
    FloatToInt,
    /// Calls another graph function through its mangled symbol.
    FunctionCall { module: String, function: String },
    /// Packs field inputs into a struct value.
    MakeStruct { ty: DataType },
    /// Unpacks a struct value into field outputs.
    BreakStruct { ty: DataType },
    /// Reads a function-local variable.
    GetLocal(NamedDataType),
    /// Writes a function-local variable.
    SetLocal(NamedDataType),
}

/// A node kind as registered by a module: identity, port shape, and the
/// behavior variant consumed by code generation.
///
/// Values are cheap to clone; a [`crate::node_instance::NodeInstance`] owns
/// its own copy so replacing a type on one instance never affects others.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeType {
    /// Short name inside the owning module, e.g. `if` or `_make_vec3`.
    pub name: String,
    /// Full name of the owning module.
    pub module: String,
    pub description: String,
    pub pure: bool,
    /// Set on pure one-in one-out types registered as type converters.
    pub converter: bool,
    pub data_inputs: Vec<NamedDataType>,
    pub data_outputs: Vec<NamedDataType>,
    /// Display names of the exec input ports. Empty for pure nodes.
    pub exec_inputs: Vec<String>,
    pub exec_outputs: Vec<String>,
    pub kind: NodeTypeKind,
}

impl NodeType {
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.module, self.name)
    }

    /// Serialize the per-kind payload for module JSON. Kinds whose shape is
    /// fully determined by their name serialize as `null`.
    pub fn to_json(&self) -> Value {
        match &self.kind {
            NodeTypeKind::Entry => json!({
                "data": port_pairs(&self.data_outputs),
                "exec": self.exec_outputs,
            }),
            NodeTypeKind::Exit => json!({
                "data": port_pairs(&self.data_inputs),
                "exec": self.exec_inputs,
            }),
            NodeTypeKind::ConstInt(v) => json!(v),
            NodeTypeKind::ConstFloat(v) => json!(v),
            NodeTypeKind::ConstBool(v) => json!(v),
            NodeTypeKind::StrLiteral(s) => json!(s),
            NodeTypeKind::GetLocal(var) | NodeTypeKind::SetLocal(var) => {
                json!(var.ty.qualified_name())
            }
            _ => Value::Null,
        }
    }
}

/// Ports as `[[name, qualified type], ...]`, the pair form used throughout
/// the module JSON schema.
pub(crate) fn port_pairs(ports: &[NamedDataType]) -> Value {
    Value::Array(
        ports
            .iter()
            .map(|p| json!([p.name, p.ty.qualified_name()]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_joins_module_and_name() {
        let ty = NodeType {
            name: "if".into(),
            module: "lang".into(),
            description: String::new(),
            pure: false,
            converter: false,
            data_inputs: vec![NamedDataType::new(
                "condition",
                DataType::new("lang", "i1"),
            )],
            data_outputs: vec![],
            exec_inputs: vec![String::new()],
            exec_outputs: vec!["True".into(), "False".into()],
            kind: NodeTypeKind::If,
        };
        assert_eq!(ty.qualified_name(), "lang:if");
        assert_eq!(ty.to_json(), Value::Null);
    }

    #[test]
    fn payload_kinds_serialize_their_data() {
        let ty = NodeType {
            name: "const-int".into(),
            module: "lang".into(),
            description: "Integer literal".into(),
            pure: true,
            converter: false,
            data_inputs: vec![],
            data_outputs: vec![NamedDataType::new("", DataType::new("lang", "i32"))],
            exec_inputs: vec![],
            exec_outputs: vec![],
            kind: NodeTypeKind::ConstInt(42),
        };
        assert_eq!(ty.to_json(), json!(42));
    }
}
