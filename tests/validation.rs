//! Validator coverage: entry/exit presence, cycles, data availability.

use chigraph::lang_module;
use chigraph::node_type::BinOp;
use chigraph::{validate_function, Context, DataType, NamedDataType};

fn i32_ty() -> DataType {
    DataType::new("lang", "i32")
}

fn fresh_context() -> Context {
    let mut ctx = Context::new("");
    let module = ctx.new_graph_module("test/main").unwrap();
    module.get_or_create_function(
        "f",
        vec![NamedDataType::new("x", i32_ty())],
        vec![NamedDataType::new("out", i32_ty())],
        vec!["In".into()],
        vec!["Out".into()],
    );
    ctx
}

#[test]
fn missing_entry_is_e01() {
    let ctx = fresh_context();
    let module = ctx.graph_module("test/main").unwrap();
    let func = module.function("f").unwrap();

    let res = validate_function(module, func);
    assert!(!res.success());
    assert!(res.has_code("E01"));
}

#[test]
fn a_minimal_entry_exit_function_validates() {
    let mut ctx = fresh_context();
    {
        let func = ctx
            .graph_module_mut("test/main")
            .unwrap()
            .function_mut("f")
            .unwrap();
        let entry = func.insert_node(func.create_entry_node_type(), 0.0, 0.0);
        let exit = func.insert_node(func.create_exit_node_type(), 1.0, 0.0);
        let one = func.insert_node(lang_module::const_int_node_type(1), 0.5, 0.0);
        assert!(func.connect_exec(entry, 0, exit, 0).success());
        assert!(func.connect_data(one, 0, exit, 0).success());
    }

    let module = ctx.graph_module("test/main").unwrap();
    let res = validate_function(module, module.function("f").unwrap());
    assert!(res.success(), "unexpected diagnostics:\n{res}");
}

#[test]
fn unconnected_data_input_is_e27() {
    let mut ctx = fresh_context();
    {
        let func = ctx
            .graph_module_mut("test/main")
            .unwrap()
            .function_mut("f")
            .unwrap();
        let entry = func.insert_node(func.create_entry_node_type(), 0.0, 0.0);
        let exit = func.insert_node(func.create_exit_node_type(), 1.0, 0.0);
        assert!(func.connect_exec(entry, 0, exit, 0).success());
        // exit's data input stays unconnected
    }

    let module = ctx.graph_module("test/main").unwrap();
    let res = validate_function(module, module.function("f").unwrap());
    assert!(res.has_code("E27"));
}

#[test]
fn disconnecting_the_only_input_reopens_validation_errors() {
    let mut ctx = fresh_context();
    let (one, exit) = {
        let func = ctx
            .graph_module_mut("test/main")
            .unwrap()
            .function_mut("f")
            .unwrap();
        let entry = func.insert_node(func.create_entry_node_type(), 0.0, 0.0);
        let exit = func.insert_node(func.create_exit_node_type(), 1.0, 0.0);
        let one = func.insert_node(lang_module::const_int_node_type(1), 0.5, 0.0);
        assert!(func.connect_exec(entry, 0, exit, 0).success());
        assert!(func.connect_data(one, 0, exit, 0).success());
        (one, exit)
    };

    {
        let module = ctx.graph_module("test/main").unwrap();
        assert!(validate_function(module, module.function("f").unwrap()).success());
    }

    {
        let func = ctx
            .graph_module_mut("test/main")
            .unwrap()
            .function_mut("f")
            .unwrap();
        assert!(func.disconnect_data(one, 0, exit).success());
        // Structures stay consistent after the disconnect.
        assert!(func.node(one).unwrap().output_data_connections()[0].is_empty());
        assert_eq!(func.node(exit).unwrap().input_data_connections()[0], None);
    }

    let module = ctx.graph_module("test/main").unwrap();
    let res = validate_function(module, module.function("f").unwrap());
    assert!(!res.success());
    assert!(res.has_code("E27"));
}

#[test]
fn pure_cycle_is_e25() {
    let mut ctx = fresh_context();
    {
        let func = ctx
            .graph_module_mut("test/main")
            .unwrap()
            .function_mut("f")
            .unwrap();
        let entry = func.insert_node(func.create_entry_node_type(), 0.0, 0.0);
        let exit = func.insert_node(func.create_exit_node_type(), 1.0, 0.0);
        assert!(func.connect_exec(entry, 0, exit, 0).success());

        let a = func.insert_node(
            lang_module::binary_op_node_type(i32_ty(), BinOp::Add),
            0.3,
            0.0,
        );
        let b = func.insert_node(
            lang_module::binary_op_node_type(i32_ty(), BinOp::Add),
            0.6,
            0.0,
        );
        // The two pure adds feed each other.
        assert!(func.connect_data(a, 0, b, 0).success());
        assert!(func.connect_data(b, 0, a, 0).success());
        assert!(func.connect_data(a, 0, exit, 0).success());
    }

    let module = ctx.graph_module("test/main").unwrap();
    let res = validate_function(module, module.function("f").unwrap());
    assert!(!res.success());
    assert!(res.has_code("E25"));
}

#[test]
fn pure_cycle_fails_compilation_before_ir_is_emitted() {
    let mut ctx = fresh_context();
    {
        let func = ctx
            .graph_module_mut("test/main")
            .unwrap()
            .function_mut("f")
            .unwrap();
        let entry = func.insert_node(func.create_entry_node_type(), 0.0, 0.0);
        let exit = func.insert_node(func.create_exit_node_type(), 1.0, 0.0);
        assert!(func.connect_exec(entry, 0, exit, 0).success());

        let a = func.insert_node(
            lang_module::binary_op_node_type(i32_ty(), BinOp::Add),
            0.3,
            0.0,
        );
        let b = func.insert_node(
            lang_module::binary_op_node_type(i32_ty(), BinOp::Add),
            0.6,
            0.0,
        );
        assert!(func.connect_data(a, 0, b, 0).success());
        assert!(func.connect_data(b, 0, a, 0).success());
        assert!(func.connect_data(a, 0, exit, 0).success());
    }

    let err = ctx
        .compile_module("test/main", &chigraph::CompileSettings::bare())
        .unwrap_err();
    assert!(err.has_code("E25"));
}

#[test]
fn exec_cycle_is_e26() {
    let mut ctx = fresh_context();
    {
        let module = ctx.graph_module_mut("test/main").unwrap();
        let module_name = module.full_name().to_string();
        let func = module.function_mut("f").unwrap();

        let entry = func.insert_node(func.create_entry_node_type(), 0.0, 0.0);
        let exit = func.insert_node(func.create_exit_node_type(), 1.0, 0.0);

        let var = func.get_or_create_local_variable("v", i32_ty());
        let set_ty = chigraph::graph_module::set_local_node_type(&module_name, var);
        let set_a = func.insert_node(set_ty.clone(), 0.4, 0.0);
        let set_b = func.insert_node(set_ty, 0.6, 0.0);

        assert!(func.connect_exec(entry, 0, set_a, 0).success());
        assert!(func.connect_exec(set_a, 0, set_b, 0).success());
        // Loop back: b -> a.
        assert!(func.connect_exec(set_b, 0, set_a, 0).success());
        let _ = exit;
    }

    let module = ctx.graph_module("test/main").unwrap();
    let res = validate_function(module, module.function("f").unwrap());
    assert!(!res.success());
    assert!(res.has_code("E26"));
}

#[test]
fn data_from_an_unexecuted_node_is_e28() {
    let mut ctx = fresh_context();
    {
        let func = ctx
            .graph_module_mut("test/main")
            .unwrap()
            .function_mut("f")
            .unwrap();

        let entry = func.insert_node(func.create_entry_node_type(), 0.0, 0.0);
        let exit = func.insert_node(func.create_exit_node_type(), 1.0, 0.0);
        assert!(func.connect_exec(entry, 0, exit, 0).success());

        // A recursive call to `f` is a non-pure data producer. It never
        // receives control, yet the exit reads its output.
        let call_ty = chigraph::graph_module::function_call_node_type(func);
        let call = func.insert_node(call_ty, 0.7, 0.0);
        assert!(func.connect_data(call, 0, exit, 0).success());
    }

    let module = ctx.graph_module("test/main").unwrap();
    let res = validate_function(module, module.function("f").unwrap());
    assert!(!res.success());
    assert!(res.has_code("E28"));
}

#[test]
fn reachable_node_with_open_exec_output_is_e29() {
    let mut ctx = fresh_context();
    {
        let module = ctx.graph_module_mut("test/main").unwrap();
        let module_name = module.full_name().to_string();
        let func = module.function_mut("f").unwrap();

        let entry = func.insert_node(func.create_entry_node_type(), 0.0, 0.0);
        let exit = func.insert_node(func.create_exit_node_type(), 1.0, 0.0);
        let _ = exit;

        let var = func.get_or_create_local_variable("v", i32_ty());
        let set_ty = chigraph::graph_module::set_local_node_type(&module_name, var);
        let set = func.insert_node(set_ty, 0.5, 0.0);
        let one = func.insert_node(lang_module::const_int_node_type(1), 0.4, 0.0);

        assert!(func.connect_exec(entry, 0, set, 0).success());
        assert!(func.connect_data(one, 0, set, 0).success());
        // set's exec output dangles
    }

    let module = ctx.graph_module("test/main").unwrap();
    let res = validate_function(module, module.function("f").unwrap());
    assert!(res.has_code("E29"));
}
