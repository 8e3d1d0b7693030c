//! The built-in `lang` module: primitive types and control-flow node types.
//!
//! `lang` is always present in a [`crate::context::Context`]. It contributes
//! the primitive types `i32`, `i1`, `f64` and `i8*`, the structural node
//! types (`entry`, `exit`, `if`), literal constants, typed arithmetic and
//! comparison nodes named after their signature (`i32+i32`, `f64==f64`, …),
//! and the two registered converters `inttofloat` / `floattoint`.

use serde_json::{json, Value};

use crate::data_type::{parse_qualified_name, DataType, NamedDataType};
use crate::diagnostics::Diagnostics;
use crate::node_type::{BinOp, CmpOp, NodeType, NodeTypeKind};

pub const LANG_MODULE_NAME: &str = "lang";

/// Short names of the primitive types `lang` exports.
pub const LANG_TYPE_NAMES: [&str; 4] = ["i32", "i1", "f64", "i8*"];

/// The stateless built-in module.
#[derive(Debug, Default)]
pub struct LangModule;

impl LangModule {
    /// Look up a primitive type by name.
    pub fn type_from_name(&self, name: &str) -> Option<DataType> {
        if LANG_TYPE_NAMES.contains(&name) {
            Some(DataType::new(LANG_MODULE_NAME, name))
        } else {
            None
        }
    }

    /// Every node type name this module can hydrate, used for converter
    /// registration and tooling.
    pub fn node_type_names(&self) -> Vec<String> {
        let mut names = vec![
            "if".to_string(),
            "entry".to_string(),
            "exit".to_string(),
            "const-int".to_string(),
            "const-float".to_string(),
            "const-bool".to_string(),
            "strliteral".to_string(),
            "inttofloat".to_string(),
            "floattoint".to_string(),
        ];
        for ty in ["i32", "f64"] {
            for op in ["+", "-", "*", "/", "<", ">", "<=", ">=", "==", "!="] {
                names.push(format!("{ty}{op}{ty}"));
            }
        }
        names
    }

    /// Hydrate a node type from its name and JSON payload.
    ///
    /// Malformed payloads produce warnings and a best-effort type, matching
    /// the persistence layer's tolerance for hand-edited module files; an
    /// unknown name is an error.
    pub fn node_type_from_name(&self, name: &str, data: &Value) -> Result<NodeType, Diagnostics> {
        let mut res = Diagnostics::new();

        if let Some(ty) = self.arithmetic_from_name(name) {
            return Ok(ty);
        }

        let ty = match name {
            "if" => if_node_type(),
            "entry" => {
                let (data_ports, execs) = parse_entry_exit_payload(name, data, &mut res);
                entry_node_type(data_ports, execs)
            }
            "exit" => {
                let (data_ports, execs) = parse_entry_exit_payload(name, data, &mut res);
                exit_node_type(data_ports, execs)
            }
            "const-int" => {
                let value = match data.as_i64() {
                    Some(v) => v as i32,
                    None => {
                        res.add_entry(
                            "WUKN",
                            "Data for lang:const-int must be an integer",
                            json!({ "Given Data": data }),
                        );
                        0
                    }
                };
                const_int_node_type(value)
            }
            "const-float" => {
                let value = match data.as_f64() {
                    Some(v) => v,
                    None => {
                        res.add_entry(
                            "WUKN",
                            "Data for lang:const-float must be a number",
                            json!({ "Given Data": data }),
                        );
                        0.0
                    }
                };
                const_float_node_type(value)
            }
            "const-bool" => {
                let value = match data.as_bool() {
                    Some(v) => v,
                    None => {
                        res.add_entry(
                            "WUKN",
                            "Data for lang:const-bool must be a boolean",
                            json!({ "Given Data": data }),
                        );
                        false
                    }
                };
                const_bool_node_type(value)
            }
            "strliteral" => {
                let value = match data.as_str() {
                    Some(v) => v.to_string(),
                    None => {
                        res.add_entry(
                            "WUKN",
                            "Data for lang:strliteral must be a string",
                            json!({ "Given Data": data }),
                        );
                        String::new()
                    }
                };
                str_literal_node_type(value)
            }
            "inttofloat" => int_to_float_node_type(),
            "floattoint" => float_to_int_node_type(),
            _ => {
                res.add_entry(
                    "E37",
                    "Failed to find node type in module",
                    json!({ "Module": LANG_MODULE_NAME, "Requested Node Type": name }),
                );
                return Err(res);
            }
        };

        res.into_result()?;
        Ok(ty)
    }

    fn arithmetic_from_name(&self, name: &str) -> Option<NodeType> {
        for ty_name in ["i32", "f64"] {
            let Some(rest) = name.strip_prefix(ty_name) else {
                continue;
            };
            let Some(op_str) = rest.strip_suffix(ty_name) else {
                continue;
            };
            let ty = DataType::new(LANG_MODULE_NAME, ty_name);
            let bin = match op_str {
                "+" => Some(BinOp::Add),
                "-" => Some(BinOp::Subtract),
                "*" => Some(BinOp::Multiply),
                "/" => Some(BinOp::Divide),
                _ => None,
            };
            if let Some(op) = bin {
                return Some(binary_op_node_type(ty, op));
            }
            let cmp = match op_str {
                "<" => Some(CmpOp::Lt),
                ">" => Some(CmpOp::Gt),
                "<=" => Some(CmpOp::Le),
                ">=" => Some(CmpOp::Ge),
                "==" => Some(CmpOp::Eq),
                "!=" => Some(CmpOp::Ne),
                _ => None,
            };
            if let Some(op) = cmp {
                return Some(compare_node_type(ty, op));
            }
        }
        None
    }
}

/// Parse the `{"data": [[name, type]...], "exec": [name...]}` payload shared
/// by `entry` and `exit`. Missing or malformed sections warn and yield empty
/// lists.
fn parse_entry_exit_payload(
    kind: &str,
    data: &Value,
    res: &mut Diagnostics,
) -> (Vec<NamedDataType>, Vec<String>) {
    let mut ports = Vec::new();
    let mut execs = Vec::new();

    match data.get("data") {
        Some(Value::Array(entries)) => {
            for entry in entries {
                let pair = entry.as_array().filter(|a| a.len() == 2);
                let parsed = pair.and_then(|a| {
                    let name = a[0].as_str()?;
                    let qualified = a[1].as_str()?;
                    let (module, ty_name) = parse_qualified_name(qualified)?;
                    Some(NamedDataType::new(name, DataType::new(module, ty_name)))
                });
                match parsed {
                    Some(port) => ports.push(port),
                    None => res.add_entry(
                        "WUKN",
                        "Port entry must be a [name, module:type] pair",
                        json!({ "Node Type": kind, "Given Data": entry }),
                    ),
                }
            }
        }
        _ => res.add_entry(
            "WUKN",
            "Data for entry/exit must have a data array",
            json!({ "Node Type": kind, "Given Data": data }),
        ),
    }

    match data.get("exec") {
        Some(Value::Array(entries)) => {
            for entry in entries {
                match entry.as_str() {
                    Some(name) => execs.push(name.to_string()),
                    None => res.add_entry(
                        "WUKN",
                        "Exec entry must be a string",
                        json!({ "Node Type": kind, "Given Data": entry }),
                    ),
                }
            }
        }
        _ => res.add_entry(
            "WUKN",
            "Data for entry/exit must have an exec array",
            json!({ "Node Type": kind, "Given Data": data }),
        ),
    }

    (ports, execs)
}

/// `lang:entry`. The function's data inputs are the node's data *outputs*,
/// and its exec inputs are the node's exec *outputs*.
pub fn entry_node_type(data_outputs: Vec<NamedDataType>, exec_outputs: Vec<String>) -> NodeType {
    NodeType {
        name: "entry".into(),
        module: LANG_MODULE_NAME.into(),
        description: "Entry".into(),
        pure: false,
        converter: false,
        data_inputs: vec![],
        data_outputs,
        exec_inputs: vec![],
        exec_outputs,
        kind: NodeTypeKind::Entry,
    }
}

/// `lang:exit`. Mirror image of `entry`.
pub fn exit_node_type(data_inputs: Vec<NamedDataType>, exec_inputs: Vec<String>) -> NodeType {
    NodeType {
        name: "exit".into(),
        module: LANG_MODULE_NAME.into(),
        description: "Return from a function".into(),
        pure: false,
        converter: false,
        data_inputs,
        data_outputs: vec![],
        exec_inputs,
        exec_outputs: vec![],
        kind: NodeTypeKind::Exit,
    }
}

pub fn if_node_type() -> NodeType {
    NodeType {
        name: "if".into(),
        module: LANG_MODULE_NAME.into(),
        description: "If".into(),
        pure: false,
        converter: false,
        data_inputs: vec![NamedDataType::new(
            "condition",
            DataType::new(LANG_MODULE_NAME, "i1"),
        )],
        data_outputs: vec![],
        exec_inputs: vec![String::new()],
        exec_outputs: vec!["True".into(), "False".into()],
        kind: NodeTypeKind::If,
    }
}

pub fn const_int_node_type(value: i32) -> NodeType {
    NodeType {
        name: "const-int".into(),
        module: LANG_MODULE_NAME.into(),
        description: "Integer literal".into(),
        pure: true,
        converter: false,
        data_inputs: vec![],
        data_outputs: vec![NamedDataType::new("", DataType::new(LANG_MODULE_NAME, "i32"))],
        exec_inputs: vec![],
        exec_outputs: vec![],
        kind: NodeTypeKind::ConstInt(value),
    }
}

pub fn const_float_node_type(value: f64) -> NodeType {
    NodeType {
        name: "const-float".into(),
        module: LANG_MODULE_NAME.into(),
        description: "Float literal".into(),
        pure: true,
        converter: false,
        data_inputs: vec![],
        data_outputs: vec![NamedDataType::new("", DataType::new(LANG_MODULE_NAME, "f64"))],
        exec_inputs: vec![],
        exec_outputs: vec![],
        kind: NodeTypeKind::ConstFloat(value),
    }
}

pub fn const_bool_node_type(value: bool) -> NodeType {
    NodeType {
        name: "const-bool".into(),
        module: LANG_MODULE_NAME.into(),
        description: "Boolean literal".into(),
        pure: true,
        converter: false,
        data_inputs: vec![],
        data_outputs: vec![NamedDataType::new("", DataType::new(LANG_MODULE_NAME, "i1"))],
        exec_inputs: vec![],
        exec_outputs: vec![],
        kind: NodeTypeKind::ConstBool(value),
    }
}

pub fn str_literal_node_type(value: String) -> NodeType {
    NodeType {
        name: "strliteral".into(),
        module: LANG_MODULE_NAME.into(),
        description: "String literal".into(),
        pure: true,
        converter: false,
        data_inputs: vec![],
        data_outputs: vec![NamedDataType::new("", DataType::new(LANG_MODULE_NAME, "i8*"))],
        exec_inputs: vec![],
        exec_outputs: vec![],
        kind: NodeTypeKind::StrLiteral(value),
    }
}

pub fn binary_op_node_type(ty: DataType, op: BinOp) -> NodeType {
    NodeType {
        name: format!("{}{}{}", ty.name, op.symbol(), ty.name),
        module: LANG_MODULE_NAME.into(),
        description: format!("{} two {}s", op.verb(), ty.name),
        pure: true,
        converter: false,
        data_inputs: vec![
            NamedDataType::new("a", ty.clone()),
            NamedDataType::new("b", ty.clone()),
        ],
        data_outputs: vec![NamedDataType::new("", ty.clone())],
        exec_inputs: vec![],
        exec_outputs: vec![],
        kind: NodeTypeKind::BinaryOp { ty, op },
    }
}

pub fn compare_node_type(ty: DataType, op: CmpOp) -> NodeType {
    NodeType {
        name: format!("{}{}{}", ty.name, op.symbol(), ty.name),
        module: LANG_MODULE_NAME.into(),
        description: format!("{}{}{}", ty.name, op.symbol(), ty.name),
        pure: true,
        converter: false,
        data_inputs: vec![
            NamedDataType::new("a", ty.clone()),
            NamedDataType::new("b", ty.clone()),
        ],
        data_outputs: vec![NamedDataType::new("", DataType::new(LANG_MODULE_NAME, "i1"))],
        exec_inputs: vec![],
        exec_outputs: vec![],
        kind: NodeTypeKind::Compare { ty, op },
    }
}

pub fn int_to_float_node_type() -> NodeType {
    NodeType {
        name: "inttofloat".into(),
        module: LANG_MODULE_NAME.into(),
        description: "Integer -> Float".into(),
        pure: true,
        converter: true,
        data_inputs: vec![NamedDataType::new("", DataType::new(LANG_MODULE_NAME, "i32"))],
        data_outputs: vec![NamedDataType::new("", DataType::new(LANG_MODULE_NAME, "f64"))],
        exec_inputs: vec![],
        exec_outputs: vec![],
        kind: NodeTypeKind::IntToFloat,
    }
}

pub fn float_to_int_node_type() -> NodeType {
    NodeType {
        name: "floattoint".into(),
        module: LANG_MODULE_NAME.into(),
        description: "Float -> Integer".into(),
        pure: true,
        converter: true,
        data_inputs: vec![NamedDataType::new("", DataType::new(LANG_MODULE_NAME, "f64"))],
        data_outputs: vec![NamedDataType::new("", DataType::new(LANG_MODULE_NAME, "i32"))],
        exec_inputs: vec![],
        exec_outputs: vec![],
        kind: NodeTypeKind::FloatToInt,
    }
}
