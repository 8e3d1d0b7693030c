//! End-to-end lowering scenarios: build a graph, compile it, JIT it, and
//! check the observable behavior.

use inkwell::module::Module;
use inkwell::values::BasicMetadataValueEnum;
use inkwell::OptimizationLevel;

use chigraph::lang_module;
use chigraph::node_type::{BinOp, CmpOp};
use chigraph::{CompileSettings, Context, DataType, NamedDataType};

fn i32_ty() -> DataType {
    DataType::new("lang", "i32")
}

/// Scenario: an empty function with one entry -> exit edge compiles to a
/// valid `i32 (i32)` and returns exit id 0.
#[test]
fn noop_function_returns_exit_zero() {
    let mut ctx = Context::new("");
    {
        let module = ctx.new_graph_module("test/main").unwrap();
        let (func, _) = module.get_or_create_function(
            "noop",
            vec![],
            vec![],
            vec!["In".into()],
            vec!["Out".into()],
        );
        let entry = func.insert_node(func.create_entry_node_type(), 0.0, 0.0);
        let exit = func.insert_node(func.create_exit_node_type(), 100.0, 0.0);
        assert!(func.connect_exec(entry, 0, exit, 0).success());
    }

    let compiled = ctx
        .compile_module("test/main", &CompileSettings::bare())
        .unwrap();

    let engine = compiled
        .create_jit_execution_engine(OptimizationLevel::None)
        .unwrap();
    let noop = unsafe {
        engine
            .get_function::<unsafe extern "C" fn(i32) -> i32>("test/main:noop")
            .unwrap()
    };
    assert_eq!(unsafe { noop.call(0) }, 0);
}

/// Scenario: a pure `+` node feeding the exit computes a+b.
#[test]
fn pure_add_computes_sum() {
    let mut ctx = Context::new("");
    {
        let module = ctx.new_graph_module("test/main").unwrap();
        let (func, _) = module.get_or_create_function(
            "add",
            vec![
                NamedDataType::new("a", i32_ty()),
                NamedDataType::new("b", i32_ty()),
            ],
            vec![NamedDataType::new("s", i32_ty())],
            vec!["In".into()],
            vec!["Out".into()],
        );
        let entry = func.insert_node(func.create_entry_node_type(), 0.0, 0.0);
        let exit = func.insert_node(func.create_exit_node_type(), 400.0, 0.0);
        let add = func.insert_node(
            lang_module::binary_op_node_type(i32_ty(), BinOp::Add),
            200.0,
            0.0,
        );
        assert!(func.connect_exec(entry, 0, exit, 0).success());
        assert!(func.connect_data(entry, 0, add, 0).success());
        assert!(func.connect_data(entry, 1, add, 1).success());
        assert!(func.connect_data(add, 0, exit, 0).success());
    }

    let compiled = ctx
        .compile_module("test/main", &CompileSettings::bare())
        .unwrap();
    add_result_shim(&ctx, &compiled, "test/main:add");

    let engine = compiled
        .create_jit_execution_engine(OptimizationLevel::None)
        .unwrap();
    let add = unsafe {
        engine
            .get_function::<unsafe extern "C" fn(i32, i32) -> i32>("add_shim")
            .unwrap()
    };
    assert_eq!(unsafe { add.call(3, 4) }, 7);
    assert_eq!(unsafe { add.call(-1, 1) }, 0);
}

/// Scenario: `if (x == 0)` branches to two exits; the return value is the
/// id of the exec output taken (0 for zero, 1 otherwise).
#[test]
fn if_node_selects_the_exit_id() {
    let mut ctx = Context::new("");
    {
        let module = ctx.new_graph_module("test/main").unwrap();
        let (func, _) = module.get_or_create_function(
            "classify",
            vec![NamedDataType::new("x", i32_ty())],
            vec![],
            vec!["In".into()],
            vec!["zero".into(), "nonzero".into()],
        );
        let entry = func.insert_node(func.create_entry_node_type(), 0.0, 0.0);
        let exit = func.insert_node(func.create_exit_node_type(), 400.0, 0.0);
        let branch = func.insert_node(lang_module::if_node_type(), 200.0, 0.0);
        let zero = func.insert_node(lang_module::const_int_node_type(0), 100.0, 100.0);
        let eq = func.insert_node(
            lang_module::compare_node_type(i32_ty(), CmpOp::Eq),
            150.0,
            50.0,
        );

        assert!(func.connect_exec(entry, 0, branch, 0).success());
        assert!(func.connect_exec(branch, 0, exit, 0).success()); // True -> zero
        assert!(func.connect_exec(branch, 1, exit, 1).success()); // False -> nonzero
        assert!(func.connect_data(entry, 0, eq, 0).success());
        assert!(func.connect_data(zero, 0, eq, 1).success());
        assert!(func.connect_data(eq, 0, branch, 0).success());
    }

    let compiled = ctx
        .compile_module("test/main", &CompileSettings::bare())
        .unwrap();

    let engine = compiled
        .create_jit_execution_engine(OptimizationLevel::None)
        .unwrap();
    let classify = unsafe {
        engine
            .get_function::<unsafe extern "C" fn(i32, i32) -> i32>("test/main:classify")
            .unwrap()
    };
    assert_eq!(unsafe { classify.call(0, 0) }, 0);
    assert_eq!(unsafe { classify.call(0, 5) }, 1);
    assert_eq!(unsafe { classify.call(0, -3) }, 1);
}

/// Scenario: module A depends on module B; linking produces a
/// self-contained module whose main returns B's constant.
#[test]
fn linked_dependency_returns_forty_two() {
    let mut ctx = Context::new("");

    {
        let dep = ctx.new_graph_module("test/b").unwrap();
        let (func, _) = dep.get_or_create_function(
            "answer",
            vec![],
            vec![NamedDataType::new("v", i32_ty())],
            vec!["In".into()],
            vec!["Out".into()],
        );
        let entry = func.insert_node(func.create_entry_node_type(), 0.0, 0.0);
        let exit = func.insert_node(func.create_exit_node_type(), 100.0, 0.0);
        let answer = func.insert_node(lang_module::const_int_node_type(42), 50.0, 0.0);
        assert!(func.connect_exec(entry, 0, exit, 0).success());
        assert!(func.connect_data(answer, 0, exit, 0).success());
    }

    let call_ty = ctx
        .node_type_from_module("test/b", "answer", &serde_json::Value::Null)
        .unwrap();

    {
        let module = ctx.new_graph_module("test/main").unwrap();
        module.add_dependency("test/b");
        let (func, _) = module.get_or_create_function(
            "main",
            vec![],
            vec![NamedDataType::new("out", i32_ty())],
            vec!["In".into()],
            vec!["Out".into()],
        );
        let entry = func.insert_node(func.create_entry_node_type(), 0.0, 0.0);
        let exit = func.insert_node(func.create_exit_node_type(), 300.0, 0.0);
        let call = func.insert_node(call_ty, 150.0, 0.0);

        assert!(func.connect_exec(entry, 0, call, 0).success());
        assert!(func.connect_exec(call, 0, exit, 0).success());
        assert!(func.connect_data(call, 0, exit, 0).success());
    }

    let settings = CompileSettings {
        use_cache: false,
        link_dependencies: true,
        cancel: None,
    };
    let compiled = ctx.compile_module("test/main", &settings).unwrap();

    // Self-contained: B's function is a definition, and a C main exists.
    assert!(compiled.get_function("test/b:answer").is_some());
    assert!(compiled.get_function("main").is_some());

    let engine = compiled
        .create_jit_execution_engine(OptimizationLevel::None)
        .unwrap();
    let main = unsafe {
        engine
            .get_function::<unsafe extern "C" fn() -> i32>("main")
            .unwrap()
    };
    assert_eq!(unsafe { main.call() }, 42);
}

/// Compiling the same validated function twice yields identical IR.
#[test]
fn compilation_is_deterministic() {
    let mut ctx = Context::new("");
    {
        let module = ctx.new_graph_module("test/main").unwrap();
        let (func, _) = module.get_or_create_function(
            "add",
            vec![
                NamedDataType::new("a", i32_ty()),
                NamedDataType::new("b", i32_ty()),
            ],
            vec![NamedDataType::new("s", i32_ty())],
            vec!["In".into()],
            vec!["Out".into()],
        );
        let entry = func.insert_node(func.create_entry_node_type(), 0.0, 0.0);
        let exit = func.insert_node(func.create_exit_node_type(), 400.0, 0.0);
        let add = func.insert_node(
            lang_module::binary_op_node_type(i32_ty(), BinOp::Add),
            200.0,
            0.0,
        );
        assert!(func.connect_exec(entry, 0, exit, 0).success());
        assert!(func.connect_data(entry, 0, add, 0).success());
        assert!(func.connect_data(entry, 1, add, 1).success());
        assert!(func.connect_data(add, 0, exit, 0).success());
    }

    let first = ctx
        .compile_module("test/main", &CompileSettings::bare())
        .unwrap()
        .print_to_string()
        .to_string();
    let second = ctx
        .compile_module("test/main", &CompileSettings::bare())
        .unwrap()
        .print_to_string()
        .to_string();
    assert_eq!(first, second);
}

/// Struct make/break and local variables lower and run.
#[test]
fn struct_pack_unpack_via_local() {
    let mut ctx = Context::new("");
    {
        let module = ctx.new_graph_module("test/main").unwrap();
        {
            let (s, _) = module.get_or_create_struct("pair");
            s.add_field(i32_ty(), "first", usize::MAX);
            s.add_field(i32_ty(), "second", usize::MAX);
        }
        let make_ty = module
            .node_type_from_name("_make_pair", &serde_json::Value::Null)
            .unwrap();
        let break_ty = module
            .node_type_from_name("_break_pair", &serde_json::Value::Null)
            .unwrap();

        let (func, _) = module.get_or_create_function(
            "swapsum",
            vec![
                NamedDataType::new("a", i32_ty()),
                NamedDataType::new("b", i32_ty()),
            ],
            vec![NamedDataType::new("s", i32_ty())],
            vec!["In".into()],
            vec!["Out".into()],
        );

        let entry = func.insert_node(func.create_entry_node_type(), 0.0, 0.0);
        let exit = func.insert_node(func.create_exit_node_type(), 500.0, 0.0);
        let make = func.insert_node(make_ty, 100.0, 0.0);
        let brk = func.insert_node(break_ty, 200.0, 0.0);
        let add = func.insert_node(
            lang_module::binary_op_node_type(i32_ty(), BinOp::Add),
            300.0,
            0.0,
        );

        assert!(func.connect_exec(entry, 0, exit, 0).success());
        assert!(func.connect_data(entry, 0, make, 0).success());
        assert!(func.connect_data(entry, 1, make, 1).success());
        assert!(func.connect_data(make, 0, brk, 0).success());
        assert!(func.connect_data(brk, 0, add, 0).success());
        assert!(func.connect_data(brk, 1, add, 1).success());
        assert!(func.connect_data(add, 0, exit, 0).success());
    }

    let compiled = ctx
        .compile_module("test/main", &CompileSettings::bare())
        .unwrap();
    add_result_shim(&ctx, &compiled, "test/main:swapsum");

    let engine = compiled
        .create_jit_execution_engine(OptimizationLevel::None)
        .unwrap();
    let swapsum = unsafe {
        engine
            .get_function::<unsafe extern "C" fn(i32, i32) -> i32>("add_shim")
            .unwrap()
    };
    assert_eq!(unsafe { swapsum.call(20, 22) }, 42);
}

/// A local variable written by `_set_` and read back by `_get_` carries
/// the value across the exec chain.
#[test]
fn local_variable_set_then_get() {
    let mut ctx = Context::new("");
    {
        let module = ctx.new_graph_module("test/main").unwrap();
        let module_name = module.full_name().to_string();
        let (func, _) = module.get_or_create_function(
            "bump",
            vec![NamedDataType::new("x", i32_ty())],
            vec![NamedDataType::new("out", i32_ty())],
            vec!["In".into()],
            vec!["Out".into()],
        );
        let var = func.get_or_create_local_variable("v", i32_ty());

        let entry = func.insert_node(func.create_entry_node_type(), 0.0, 0.0);
        let exit = func.insert_node(func.create_exit_node_type(), 500.0, 0.0);
        let one = func.insert_node(lang_module::const_int_node_type(1), 100.0, 50.0);
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
        assert!(func.connect_data(one, 0, add, 1).success());
        assert!(func.connect_data(add, 0, set, 0).success());
        assert!(func.connect_data(get, 0, exit, 0).success());
    }

    let compiled = ctx
        .compile_module("test/main", &CompileSettings::bare())
        .unwrap();

    // One-input shim: i32 bump_shim(i32).
    {
        let llvm = ctx.llvm();
        let i32t = llvm.i32_type();
        let shim = compiled.add_function("bump_shim", i32t.fn_type(&[i32t.into()], false), None);
        let block = llvm.append_basic_block(shim, "entry");
        let builder = llvm.create_builder();
        builder.position_at_end(block);
        let out = builder.build_alloca(i32t, "out").unwrap();
        let callee = compiled.get_function("test/main:bump").unwrap();
        let args: Vec<BasicMetadataValueEnum> = vec![
            i32t.const_zero().into(),
            shim.get_nth_param(0).unwrap().into(),
            out.into(),
        ];
        builder.build_call(callee, &args, "call").unwrap();
        let loaded = builder.build_load(out, "loaded").unwrap();
        builder.build_return(Some(&loaded)).unwrap();
    }

    let engine = compiled
        .create_jit_execution_engine(OptimizationLevel::None)
        .unwrap();
    let bump = unsafe {
        engine
            .get_function::<unsafe extern "C" fn(i32) -> i32>("bump_shim")
            .unwrap()
    };
    assert_eq!(unsafe { bump.call(5) }, 6);
    assert_eq!(unsafe { bump.call(-1) }, 0);
}

/// A cancelled token aborts compilation between nodes with `E32`.
#[test]
fn cancellation_reports_e32() {
    let mut ctx = Context::new("");
    {
        let module = ctx.new_graph_module("test/main").unwrap();
        let (func, _) = module.get_or_create_function(
            "noop",
            vec![],
            vec![],
            vec!["In".into()],
            vec!["Out".into()],
        );
        let entry = func.insert_node(func.create_entry_node_type(), 0.0, 0.0);
        let exit = func.insert_node(func.create_exit_node_type(), 100.0, 0.0);
        assert!(func.connect_exec(entry, 0, exit, 0).success());
    }

    let cancel = chigraph::CancelToken::new();
    cancel.cancel();
    let settings = CompileSettings {
        use_cache: false,
        link_dependencies: false,
        cancel: Some(cancel),
    };
    let err = ctx.compile_module("test/main", &settings).unwrap_err();
    assert!(err.has_code("E32"));
}

/// With a workspace, a second compile of an unchanged module is served
/// from the artifact cache.
#[test]
fn artifact_cache_round_trips_through_the_workspace() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".chigraphworkspace"), "").unwrap();

    let mut ctx = Context::new(dir.path());
    assert!(ctx.has_workspace());
    {
        let module = ctx.new_graph_module("test/main").unwrap();
        let (func, _) = module.get_or_create_function(
            "noop",
            vec![],
            vec![],
            vec!["In".into()],
            vec!["Out".into()],
        );
        let entry = func.insert_node(func.create_entry_node_type(), 0.0, 0.0);
        let exit = func.insert_node(func.create_exit_node_type(), 100.0, 0.0);
        assert!(func.connect_exec(entry, 0, exit, 0).success());
    }

    let settings = CompileSettings {
        use_cache: true,
        link_dependencies: false,
        cancel: None,
    };
    let first = ctx.compile_module("test/main", &settings).unwrap();
    assert!(first.get_function("test/main:noop").is_some());

    // An artifact landed in <workspace>/lib.
    let artifacts: Vec<_> = std::fs::read_dir(dir.path().join("lib"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "bc"))
        .collect();
    assert_eq!(artifacts.len(), 1);

    // The cached module still defines the function.
    let second = ctx.compile_module("test/main", &settings).unwrap();
    assert!(second.get_function("test/main:noop").is_some());
}

/// Emit `i32 add_shim(i32, i32)` wrapping a graph function of shape
/// `i32 (i32, i32, i32, i32*)` so the JIT can call it with plain ints.
fn add_result_shim<'ctx>(ctx: &'ctx Context, module: &Module<'ctx>, mangled: &str) {
    let llvm = ctx.llvm();
    let i32t = llvm.i32_type();
    let shim = module.add_function("add_shim", i32t.fn_type(&[i32t.into(), i32t.into()], false), None);
    let block = llvm.append_basic_block(shim, "entry");
    let builder = llvm.create_builder();
    builder.position_at_end(block);

    let out = builder.build_alloca(i32t, "out").unwrap();
    let callee = module.get_function(mangled).unwrap();
    let args: Vec<BasicMetadataValueEnum> = vec![
        i32t.const_zero().into(),
        shim.get_nth_param(0).unwrap().into(),
        shim.get_nth_param(1).unwrap().into(),
        out.into(),
    ];
    builder.build_call(callee, &args, "call").unwrap();
    let loaded = builder.build_load(out, "loaded").unwrap();
    builder.build_return(Some(&loaded)).unwrap();
}
