//! Module persistence: serialize, rehydrate, compare.

use chigraph::json::{graph_function_to_json, graph_module_to_json};
use chigraph::lang_module;
use chigraph::node_type::BinOp;
use chigraph::{Context, DataType, NamedDataType};
use uuid::Uuid;

fn i32_ty() -> DataType {
    DataType::new("lang", "i32")
}

/// Build a module exercising structs, locals, constants, arithmetic, and
/// both edge kinds.
fn build_module(ctx: &mut Context) {
    let module = ctx.new_graph_module("test/main").unwrap();

    {
        let (s, _) = module.get_or_create_struct("pair");
        s.add_field(i32_ty(), "first", usize::MAX);
        s.add_field(i32_ty(), "second", usize::MAX);
    }

    let module_name = module.full_name().to_string();
    let (func, _) = module.get_or_create_function(
        "accumulate",
        vec![NamedDataType::new("x", i32_ty())],
        vec![NamedDataType::new("out", i32_ty())],
        vec!["In".into()],
        vec!["Out".into()],
    );
    func.set_description("Adds a constant to x through a local");

    let var = func.get_or_create_local_variable("total", i32_ty());

    let entry = func.insert_node(func.create_entry_node_type(), 0.0, 0.0);
    let exit = func.insert_node(func.create_exit_node_type(), 600.0, 0.0);
    let five = func.insert_node(lang_module::const_int_node_type(5), 100.0, 50.0);
    let add = func.insert_node(
        lang_module::binary_op_node_type(i32_ty(), BinOp::Add),
        200.0,
        0.0,
    );
    let set = func.insert_node(
        chigraph::graph_module::set_local_node_type(&module_name, var.clone()),
        300.0,
        0.0,
    );
    let get = func.insert_node(
        chigraph::graph_module::get_local_node_type(&module_name, var),
        400.0,
        0.0,
    );

    assert!(func.connect_exec(entry, 0, set, 0).success());
    assert!(func.connect_exec(set, 0, exit, 0).success());
    assert!(func.connect_data(entry, 0, add, 0).success());
    assert!(func.connect_data(five, 0, add, 1).success());
    assert!(func.connect_data(add, 0, set, 0).success());
    assert!(func.connect_data(get, 0, exit, 0).success());
}

#[test]
fn module_round_trips_structurally() {
    let mut ctx = Context::new("");
    build_module(&mut ctx);
    let serialized = graph_module_to_json(ctx.graph_module("test/main").unwrap());

    let mut ctx2 = Context::new("");
    let res = ctx2.add_module_from_json("test/main", &serialized);
    assert!(res.success(), "hydration failed:\n{res}");

    let reserialized = graph_module_to_json(ctx2.graph_module("test/main").unwrap());
    assert_eq!(serialized, reserialized);
}

#[test]
fn round_trip_preserves_uuids() {
    let mut ctx = Context::new("");
    build_module(&mut ctx);

    let original_ids: Vec<Uuid> = {
        let func = ctx
            .graph_module("test/main")
            .unwrap()
            .function("accumulate")
            .unwrap();
        let mut ids: Vec<Uuid> = func.nodes().keys().copied().collect();
        ids.sort();
        ids
    };

    let serialized = graph_module_to_json(ctx.graph_module("test/main").unwrap());
    let mut ctx2 = Context::new("");
    assert!(ctx2.add_module_from_json("test/main", &serialized).success());

    let reloaded_ids: Vec<Uuid> = {
        let func = ctx2
            .graph_module("test/main")
            .unwrap()
            .function("accumulate")
            .unwrap();
        let mut ids: Vec<Uuid> = func.nodes().keys().copied().collect();
        ids.sort();
        ids
    };

    assert_eq!(original_ids, reloaded_ids);
}

#[test]
fn function_json_uses_pair_lists_for_ports() {
    let mut ctx = Context::new("");
    build_module(&mut ctx);
    let func_json = graph_function_to_json(
        ctx.graph_module("test/main")
            .unwrap()
            .function("accumulate")
            .unwrap(),
    );

    assert_eq!(func_json["data_inputs"], serde_json::json!([["x", "lang:i32"]]));
    assert_eq!(
        func_json["data_outputs"],
        serde_json::json!([["out", "lang:i32"]])
    );
    assert_eq!(
        func_json["local_variables"],
        serde_json::json!([["total", "lang:i32"]])
    );
    assert_eq!(func_json["exec_inputs"], serde_json::json!(["In"]));

    // One exec edge record per source, one data record per consumer input.
    let connections = func_json["connections"].as_array().unwrap();
    let exec_edges = connections
        .iter()
        .filter(|c| c["type"] == "exec")
        .count();
    let data_edges = connections
        .iter()
        .filter(|c| c["type"] == "data")
        .count();
    assert_eq!(exec_edges, 2);
    assert_eq!(data_edges, 4);
}

#[test]
fn dependencies_load_before_hydration() {
    let mut ctx = Context::new("");
    {
        let dep = ctx.new_graph_module("test/dep").unwrap();
        dep.get_or_create_function(
            "answer",
            vec![],
            vec![NamedDataType::new("v", i32_ty())],
            vec!["In".into()],
            vec!["Out".into()],
        );
    }
    let dep_json = graph_module_to_json(ctx.graph_module("test/dep").unwrap());

    // A module whose only node calls test/dep:answer.
    let main_json = serde_json::json!({
        "dependencies": ["test/dep"],
        "types": {},
        "graphs": {
            "main": {
                "description": "",
                "data_inputs": [],
                "data_outputs": [],
                "exec_inputs": ["In"],
                "exec_outputs": ["Out"],
                "local_variables": [],
                "nodes": {
                    "00000000-0000-0000-0000-000000000001": {
                        "type": "test/dep:answer",
                        "location": [0.0, 0.0],
                        "data": null,
                    },
                },
                "connections": [],
            },
        },
    });

    // Loading straight into a fresh context must pull the dependency via
    // the fetcher.
    let mut ctx2 = Context::new("");
    let mut fetcher = chigraph::fetcher::MapFetcher::new();
    fetcher.insert("test/dep", serde_json::to_vec(&dep_json).unwrap());
    ctx2.set_fetcher(Box::new(fetcher));

    let res = ctx2.add_module_from_json("test/main", &main_json);
    assert!(res.success(), "hydration failed:\n{res}");
    assert!(ctx2.module_by_full_name("test/dep").is_some());

    let func = ctx2
        .graph_module("test/main")
        .unwrap()
        .function("main")
        .unwrap();
    assert_eq!(func.nodes().len(), 1);
}

#[test]
fn missing_dependency_is_e30() {
    let main_json = serde_json::json!({
        "dependencies": ["test/ghost"],
        "types": {},
        "graphs": {},
    });

    let mut ctx = Context::new("");
    let res = ctx.add_module_from_json("test/main", &main_json);
    assert!(!res.success());
    assert!(res.has_code("E30"));
}
