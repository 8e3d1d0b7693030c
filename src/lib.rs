//! # Chigraph compiler core
//!
//! Chigraph is a visual dataflow language: programs are graphs of nodes
//! connected by *execution* edges (ordering side effects) and typed *data*
//! edges (carrying values). This crate is the compiler middle-end — the
//! in-memory graph model with its edit operations and invariants, the
//! validator, and the lowering of graph functions to LLVM IR.
//!
//! ## Pipeline
//!
//! ```text
//! Module JSON -> GraphModule -> validate -> FunctionCompiler -> LLVM IR -> link/JIT
//! ```
//!
//! ## Quick start
//!
//! Build a function that adds two numbers and compile its module:
//!
//! ```no_run
//! use chigraph::{Context, CompileSettings, DataType, NamedDataType};
//! use chigraph::lang_module;
//! use chigraph::node_type::BinOp;
//!
//! let mut ctx = Context::new(".");
//! let i32_ty = DataType::new("lang", "i32");
//!
//! let module = ctx.new_graph_module("test/main").unwrap();
//! let (func, _) = module.get_or_create_function(
//!     "add",
//!     vec![
//!         NamedDataType::new("a", i32_ty.clone()),
//!         NamedDataType::new("b", i32_ty.clone()),
//!     ],
//!     vec![NamedDataType::new("s", i32_ty.clone())],
//!     vec!["In".into()],
//!     vec!["Out".into()],
//! );
//!
//! let entry = func.insert_node(func.create_entry_node_type(), 0.0, 0.0);
//! let exit = func.insert_node(func.create_exit_node_type(), 400.0, 0.0);
//! let add = func.insert_node(
//!     lang_module::binary_op_node_type(i32_ty, BinOp::Add),
//!     200.0,
//!     0.0,
//! );
//!
//! func.connect_exec(entry, 0, exit, 0);
//! func.connect_data(entry, 0, add, 0);
//! func.connect_data(entry, 1, add, 1);
//! func.connect_data(add, 0, exit, 0);
//!
//! let compiled = ctx
//!     .compile_module("test/main", &CompileSettings::bare())
//!     .unwrap();
//! println!("{}", compiled.print_to_string().to_string());
//! ```
//!
//! ## Module overview
//!
//! - [`context`] — process-scoped owner of modules, the LLVM context, the
//!   converter table, and the pluggable caches
//! - [`graph_module`] / [`graph_function`] / [`graph_struct`] — the graph
//!   data model and its edit operations
//! - [`node_type`] / [`node_instance`] — the node catalog and its uses
//! - [`validation`] — structural and type checks before codegen
//! - [`codegen`] — graph-to-LLVM lowering (two-stage node protocol, pure
//!   re-materialization)
//! - [`json`] — module persistence
//! - [`diagnostics`] — accumulated, coded error reporting
//! - [`cache`] / [`fetcher`] — artifact cache and module fetching
//!   capabilities

pub mod cache;
pub mod codegen;
pub mod context;
pub mod data_type;
pub mod diagnostics;
pub mod fetcher;
pub mod graph_function;
pub mod graph_module;
pub mod graph_struct;
pub mod json;
pub mod lang_module;
pub mod mangle;
pub mod module;
pub mod node_instance;
pub mod node_type;
pub mod validation;

pub use context::{CancelToken, CompileSettings, Context};
pub use data_type::{DataType, NamedDataType};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use graph_function::GraphFunction;
pub use graph_module::GraphModule;
pub use graph_struct::GraphStruct;
pub use module::ChiModule;
pub use node_instance::NodeInstance;
pub use node_type::{NodeType, NodeTypeKind};
pub use validation::validate_function;
