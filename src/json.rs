//! JSON persistence of graph modules.
//!
//! One file per module (`<workspace>/src/<full_name>.chimod`). Ports,
//! fields and locals serialize as `[name, "module:type"]` pairs; `graphs`
//! and `types` are name-keyed objects; nodes are keyed by their UUID so the
//! round trip preserves identity. Serialization is deterministic: object
//! keys sort, and per-node connection records follow port order.

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::context::Context;
use crate::data_type::{parse_qualified_name, DataType, NamedDataType};
use crate::diagnostics::Diagnostics;
use crate::graph_function::GraphFunction;
use crate::graph_module::GraphModule;
use crate::graph_struct::GraphStruct;
use crate::node_type::{port_pairs, NodeType};

// ---------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------

pub fn graph_module_to_json(module: &GraphModule) -> Value {
    let mut graphs = Map::new();
    for func in module.functions() {
        graphs.insert(func.name().to_string(), graph_function_to_json(func));
    }

    let mut types = Map::new();
    for s in module.structs() {
        types.insert(s.name().to_string(), graph_struct_to_json(s));
    }

    json!({
        "dependencies": module.dependencies().iter().collect::<Vec<_>>(),
        "types": Value::Object(types),
        "graphs": Value::Object(graphs),
    })
}

pub fn graph_struct_to_json(s: &GraphStruct) -> Value {
    port_pairs(s.fields())
}

pub fn graph_function_to_json(func: &GraphFunction) -> Value {
    let mut nodes = Map::new();
    let mut connections = Vec::new();

    let mut ids: Vec<Uuid> = func.nodes().keys().copied().collect();
    ids.sort();

    for id in ids {
        let node = &func.nodes()[&id];
        let node_id = id.to_string();

        nodes.insert(
            node_id.clone(),
            json!({
                "type": node.node_type().qualified_name(),
                "location": [node.x, node.y],
                "data": node.node_type().to_json(),
            }),
        );

        // Edges are recorded once each: exec edges at their source, data
        // edges at their consumer.
        for (conn_id, conn) in node.output_exec_connections().iter().enumerate() {
            if let Some((target, target_idx)) = conn {
                connections.push(json!({
                    "type": "exec",
                    "input": [node_id, conn_id],
                    "output": [target.to_string(), target_idx],
                }));
            }
        }
        for (conn_id, conn) in node.input_data_connections().iter().enumerate() {
            if let Some((producer, producer_idx)) = conn {
                connections.push(json!({
                    "type": "data",
                    "input": [producer.to_string(), producer_idx],
                    "output": [node_id, conn_id],
                }));
            }
        }
    }

    json!({
        "description": func.description(),
        "data_inputs": port_pairs(func.data_inputs()),
        "data_outputs": port_pairs(func.data_outputs()),
        "exec_inputs": func.exec_inputs(),
        "exec_outputs": func.exec_outputs(),
        "local_variables": port_pairs(func.local_variables()),
        "nodes": Value::Object(nodes),
        "connections": connections,
    })
}

// ---------------------------------------------------------------------
// Deserialization
// ---------------------------------------------------------------------

/// Hydrate a module from JSON. Dependencies named by the JSON must already
/// be loaded in `ctx` (the context loads them before calling this); the
/// module itself is returned for the context to register.
pub fn json_to_graph_module(
    ctx: &Context,
    input: &Value,
    full_name: &str,
) -> Result<GraphModule, Diagnostics> {
    let mut res = Diagnostics::new();
    res.add_context(json!({ "Loading Module Name": full_name }));

    let mut module = GraphModule::new(full_name);

    match input.get("dependencies") {
        Some(Value::Array(deps)) => {
            for dep in deps {
                match dep.as_str() {
                    Some(name) => module.add_dependency(name),
                    None => {
                        res.add_entry(
                            "E40",
                            "dependency isn't a string",
                            json!({ "Actual Data": dep }),
                        );
                    }
                }
            }
        }
        Some(_) => {
            res.add_entry("E39", "dependencies element isn't an array", json!({}));
            return Err(res);
        }
        None => {
            res.add_entry("E38", "No dependencies element in module", json!({}));
            return Err(res);
        }
    }

    // Structs: declare them all first so fields may reference siblings.
    match input.get("types") {
        Some(Value::Object(types)) => {
            for name in types.keys() {
                module.get_or_create_struct(name.clone());
            }
            for (name, fields) in types {
                res.append(json_to_graph_struct(ctx, &mut module, name, fields));
            }
        }
        Some(_) | None => {
            res.add_entry("EUKN", "No types object in module", json!({}));
            return Err(res);
        }
    }

    // Graphs: declare signatures first, then hydrate bodies, so call nodes
    // can reference any sibling function.
    let graphs = match input.get("graphs") {
        Some(Value::Object(graphs)) => graphs,
        Some(_) => {
            res.add_entry("E42", "graphs element isn't an object", json!({}));
            return Err(res);
        }
        None => {
            res.add_entry("E41", "no graphs element in module", json!({}));
            return Err(res);
        }
    };

    for (name, graph) in graphs {
        res.append(declare_graph_function(ctx, &mut module, name, graph));
    }
    res.clone().into_result()?;

    for (name, graph) in graphs {
        res.append(hydrate_graph_function(ctx, &mut module, name, graph));
    }

    res.clone().into_result()?;
    Ok(module)
}

fn json_to_graph_struct(
    ctx: &Context,
    module: &mut GraphModule,
    name: &str,
    input: &Value,
) -> Diagnostics {
    let mut res = Diagnostics::new();

    let Some(entries) = input.as_array() else {
        res.add_entry(
            "EUKN",
            "Graph struct JSON has to be an array",
            json!({ "Struct": name, "Given JSON": input }),
        );
        return res;
    };

    let mut fields = Vec::new();
    for entry in entries {
        match parse_port_pair(entry) {
            Some((field_name, ty)) => {
                res.append(check_type_exists(ctx, module, &ty));
                fields.push((field_name, ty));
            }
            None => res.add_entry(
                "EUKN",
                "Graph struct entry must be a [name, module:type] pair",
                json!({ "Struct": name, "Given JSON": entry }),
            ),
        }
    }
    if !res.success() {
        return res;
    }

    let (s, _) = module.get_or_create_struct(name);
    for (field_name, ty) in fields {
        s.add_field(ty, field_name, usize::MAX);
    }
    res
}

fn declare_graph_function(
    ctx: &Context,
    module: &mut GraphModule,
    name: &str,
    input: &Value,
) -> Diagnostics {
    let mut res = Diagnostics::new();
    res.add_context(json!({ "Function": name }));

    if !input.is_object() {
        res.add_entry("E1", "Graph json isn't a JSON object", json!({}));
        return res;
    }

    let data_inputs = match parse_port_list(ctx, module, input.get("data_inputs"), &mut res) {
        Some(ports) => ports,
        None => {
            res.add_entry("E43", "Graph doesn't have a data_inputs array", json!({}));
            return res;
        }
    };
    let data_outputs = match parse_port_list(ctx, module, input.get("data_outputs"), &mut res) {
        Some(ports) => ports,
        None => {
            res.add_entry("E44", "Graph doesn't have a data_outputs array", json!({}));
            return res;
        }
    };
    let Some(exec_inputs) = parse_string_list(input.get("exec_inputs")) else {
        res.add_entry("E48", "Graph doesn't have an exec_inputs array", json!({}));
        return res;
    };
    let Some(exec_outputs) = parse_string_list(input.get("exec_outputs")) else {
        res.add_entry("E49", "Graph doesn't have an exec_outputs array", json!({}));
        return res;
    };

    let description = input
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let (func, _) =
        module.get_or_create_function(name, data_inputs, data_outputs, exec_inputs, exec_outputs);
    func.set_description(description);
    res
}

fn hydrate_graph_function(
    ctx: &Context,
    module: &mut GraphModule,
    name: &str,
    input: &Value,
) -> Diagnostics {
    let mut res = Diagnostics::new();
    res.add_context(json!({ "Function": name }));

    // Local variables.
    match input.get("local_variables") {
        Some(Value::Array(entries)) => {
            let mut locals = Vec::new();
            for entry in entries {
                match parse_port_pair(entry) {
                    Some((local_name, ty)) => {
                        res.append(check_type_exists(ctx, module, &ty));
                        locals.push((local_name, ty));
                    }
                    None => res.add_entry(
                        "E46",
                        "Local variable entry must be a [name, module:type] pair",
                        json!({ "Given local variable json": entry }),
                    ),
                }
            }
            let func = module.function_mut(name).expect("function was declared");
            for (local_name, ty) in locals {
                func.get_or_create_local_variable(local_name, ty);
            }
        }
        _ => {
            res.add_entry(
                "E45",
                "Graph doesn't have a local_variables array",
                json!({}),
            );
            return res;
        }
    }

    // Nodes. Types are built against the module first (self references),
    // then the context, before any mutation.
    let Some(Value::Object(nodes)) = input.get("nodes") else {
        res.add_entry("E5", "Graph doesn't have a nodes object", json!({}));
        return res;
    };

    let mut to_insert: Vec<(Uuid, NodeType, f32, f32)> = Vec::new();
    for (node_id, node) in nodes {
        let Ok(id) = Uuid::parse_str(node_id) else {
            res.add_entry("E51", "Invalid UUID string", json!({ "string": node_id }));
            continue;
        };
        let Some(full_type) = node.get("type").and_then(Value::as_str) else {
            res.add_entry(
                "E6",
                r#"Node doesn't have a "type" string"#,
                json!({ "Node ID": node_id }),
            );
            continue;
        };
        let Some((type_module, type_name)) = parse_qualified_name(full_type) else {
            res.add_entry(
                "E7",
                "Incorrect qualified module name (should be module:type)",
                json!({ "Node ID": node_id, "Requested Qualified Name": full_type }),
            );
            continue;
        };
        let Some(data) = node.get("data") else {
            res.add_entry(
                "E9",
                "Node doesn't have a data section",
                json!({ "Node ID": node_id }),
            );
            continue;
        };
        let location = node.get("location").and_then(Value::as_array);
        let (x, y) = match location {
            Some(loc) if loc.len() == 2 => (
                loc[0].as_f64().unwrap_or(0.0) as f32,
                loc[1].as_f64().unwrap_or(0.0) as f32,
            ),
            _ => {
                res.add_entry(
                    "E12",
                    "Node doesn't have a location that is an array of size 2",
                    json!({ "Node ID": node_id }),
                );
                continue;
            }
        };

        let node_type = if type_module == module.full_name() {
            module.node_type_from_name(type_name, data)
        } else {
            ctx.node_type_from_module(type_module, type_name, data)
        };
        match node_type {
            Ok(ty) => to_insert.push((id, ty, x, y)),
            Err(err) => res.append(err),
        }
    }

    {
        let func = module.function_mut(name).expect("function was declared");
        for (id, ty, x, y) in to_insert {
            res.append(func.insert_node_with_id(ty, x, y, id));
        }
    }

    // Connections.
    let Some(Value::Array(connections)) = input.get("connections") else {
        res.add_entry("E13", "No connections array in function", json!({}));
        return res;
    };

    let func = module.function_mut(name).expect("function was declared");
    for (conn_id, connection) in connections.iter().enumerate() {
        let Some(conn_type) = connection.get("type").and_then(Value::as_str) else {
            res.add_entry(
                "E14",
                "No type string in connection",
                json!({ "connectionid": conn_id }),
            );
            continue;
        };
        let is_data = conn_type == "data";
        if !is_data && conn_type != "exec" {
            res.add_entry(
                "E15",
                "Unrecognized connection type",
                json!({ "connectionid": conn_id, "Found Type": conn_type }),
            );
            continue;
        }

        let input_ref = parse_connection_endpoint(connection.get("input"));
        let output_ref = parse_connection_endpoint(connection.get("output"));
        let (Some((source, source_idx)), Some((target, target_idx))) = (input_ref, output_ref)
        else {
            res.add_entry(
                "E17",
                "Connection endpoints must be [uuid, index] pairs",
                json!({ "connectionid": conn_id, "Connection": connection }),
            );
            continue;
        };

        if func.node(source).is_none() {
            res.add_entry(
                "E20",
                "Input node for connection doesn't exist",
                json!({ "connectionid": conn_id, "Requested Node": source.to_string() }),
            );
            continue;
        }
        if func.node(target).is_none() {
            res.add_entry(
                "E21",
                "Output node for connection doesn't exist",
                json!({ "connectionid": conn_id, "Requested Node": target.to_string() }),
            );
            continue;
        }

        if is_data {
            res.append(func.connect_data(source, source_idx, target, target_idx));
        } else {
            res.append(func.connect_exec(source, source_idx, target, target_idx));
        }
    }

    res
}

// ---------------------------------------------------------------------
// Small parsers
// ---------------------------------------------------------------------

fn parse_port_pair(entry: &Value) -> Option<(String, DataType)> {
    let pair = entry.as_array().filter(|a| a.len() == 2)?;
    let name = pair[0].as_str()?;
    let (module, ty_name) = parse_qualified_name(pair[1].as_str()?)?;
    Some((name.to_string(), DataType::new(module, ty_name)))
}

fn parse_port_list(
    ctx: &Context,
    module: &GraphModule,
    value: Option<&Value>,
    res: &mut Diagnostics,
) -> Option<Vec<NamedDataType>> {
    let entries = value?.as_array()?;
    let mut ports = Vec::new();
    for entry in entries {
        match parse_port_pair(entry) {
            Some((name, ty)) => {
                res.append(check_type_exists(ctx, module, &ty));
                ports.push(NamedDataType::new(name, ty));
            }
            None => res.add_entry(
                "EUKN",
                "Port entry must be a [name, module:type] pair",
                json!({ "Given JSON": entry }),
            ),
        }
    }
    Some(ports)
}

fn parse_string_list(value: Option<&Value>) -> Option<Vec<String>> {
    let entries = value?.as_array()?;
    Some(
        entries
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}

fn parse_connection_endpoint(value: Option<&Value>) -> Option<(Uuid, usize)> {
    let pair = value?.as_array().filter(|a| a.len() == 2)?;
    let id = Uuid::parse_str(pair[0].as_str()?).ok()?;
    let idx = pair[1].as_u64()? as usize;
    Some((id, idx))
}

/// Verify a type reference resolves against the module being built or the
/// context. Keeps hydration errors close to the bad JSON instead of
/// surfacing at code generation.
fn check_type_exists(ctx: &Context, module: &GraphModule, ty: &DataType) -> Diagnostics {
    let mut res = Diagnostics::new();
    if ty.module == module.full_name() {
        if module.type_from_name(&ty.name).is_none() {
            res.add_entry(
                "E37",
                "Could not find type in module",
                json!({ "type": ty.name, "module": ty.module }),
            );
        }
        return res;
    }
    match ctx.type_from_module(&ty.module, &ty.name) {
        Ok(_) => res,
        Err(err) => {
            res.append(err);
            res
        }
    }
}
