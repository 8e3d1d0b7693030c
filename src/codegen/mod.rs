//! LLVM code generation.
//!
//! A validated graph function lowers to a single LLVM function
//!
//! ```text
//! i32 <module>:<name>(i32 inputexec_id, <data inputs...>, <data outputs by pointer...>)
//! ```
//!
//! where the return value is the id of the exec output the function left
//! through. Modules compile to fresh LLVM modules; dependencies are either
//! linked in transitively (each compiled once per invocation) or left as
//! declarations.

pub mod debug;
pub mod types;

mod function_compiler;
mod nodes;

pub use function_compiler::{dependent_pures_recursive, FunctionCompiler, NodeIo};

use std::collections::{HashMap, HashSet, VecDeque};

use inkwell::builder::Builder;
use inkwell::context::Context as LlvmContext;
use inkwell::debug_info::{DWARFEmissionKind, DWARFSourceLanguage};
use inkwell::memory_buffer::MemoryBuffer;
use inkwell::module::Module;
use inkwell::types::{BasicMetadataTypeEnum, BasicType, FunctionType};
use inkwell::AddressSpace;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::artifact_key;
use crate::context::{CompileSettings, Context};
use crate::diagnostics::Diagnostics;
use crate::graph_module::GraphModule;
use crate::mangle::mangle_function_name;
use crate::module::ChiModule;
use crate::validation::validate_function;

use types::lower_basic_type;

/// The LLVM signature of a graph function: `i32 (i32, inputs..., out-ptrs...)`.
pub fn function_type<'ctx>(
    llvm: &'ctx LlvmContext,
    ctx: &Context,
    func: &crate::graph_function::GraphFunction,
) -> Result<FunctionType<'ctx>, Diagnostics> {
    let mut args: Vec<BasicMetadataTypeEnum<'ctx>> =
        Vec::with_capacity(1 + func.data_inputs().len() + func.data_outputs().len());
    args.push(llvm.i32_type().into());

    for input in func.data_inputs() {
        args.push(lower_basic_type(llvm, ctx, &input.ty)?.into());
    }
    for output in func.data_outputs() {
        let lowered = lower_basic_type(llvm, ctx, &output.ty)?;
        args.push(lowered.ptr_type(AddressSpace::default()).into());
    }

    Ok(llvm.i32_type().fn_type(&args, false))
}

/// Declaration-only prototypes for every function of a module, used both
/// for the module's own functions (so call nodes resolve) and for
/// dependencies when not linking.
pub(crate) fn add_forward_declarations<'ctx>(
    ctx: &'ctx Context,
    graph: &GraphModule,
    llmod: &Module<'ctx>,
) -> Diagnostics {
    let mut res = Diagnostics::new();
    let llvm = ctx.llvm();
    for func in graph.functions() {
        let mangled = mangle_function_name(graph.full_name(), func.name());
        if llmod.get_function(&mangled).is_some() {
            continue;
        }
        match function_type(llvm, ctx, func) {
            Ok(fn_type) => {
                llmod.add_function(&mangled, fn_type, None);
            }
            Err(err) => res.append(err),
        }
    }
    res
}

/// Assign every node in the module a stable 1-based source line, ordered by
/// function name then node id. Debug info points node-level breakpoints at
/// these lines.
pub(crate) fn line_number_table(graph: &GraphModule) -> HashMap<Uuid, u32> {
    let mut keys: Vec<(String, Uuid)> = graph
        .functions()
        .iter()
        .flat_map(|f| {
            let fname = f.name().to_string();
            f.nodes().keys().map(move |id| (fname.clone(), *id))
        })
        .collect();
    keys.sort();

    keys.into_iter()
        .enumerate()
        .map(|(i, (_, id))| (id, i as u32 + 1))
        .collect()
}

/// Generate IR for every function of a graph module into `llmod`.
pub(crate) fn generate_graph_module<'ctx>(
    ctx: &'ctx Context,
    graph: &GraphModule,
    llmod: &Module<'ctx>,
    settings: &CompileSettings,
) -> Diagnostics {
    let mut res = Diagnostics::new();

    let (di, _compile_unit) = llmod.create_debug_info_builder(
        true,
        DWARFSourceLanguage::C,
        &format!("{}.chimod", graph.short_name()),
        &format!("src/{}", graph.full_name()),
        "chigraph",
        false,
        "",
        0,
        "",
        DWARFEmissionKind::Full,
        0,
        true,
        false,
        "",
        "",
    );

    let node_lines = line_number_table(graph);

    res.append(add_forward_declarations(ctx, graph, llmod));
    if !res.success() {
        return res;
    }

    for func in graph.functions() {
        if settings.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            res.add_entry(
                "E32",
                "Compilation cancelled",
                json!({ "Module": graph.full_name() }),
            );
            return res;
        }

        res.append(validate_function(graph, func));
        if !res.success() {
            return res;
        }

        let compiler = FunctionCompiler::new(
            ctx,
            llmod,
            &di,
            graph,
            func,
            &node_lines,
            settings.cancel.clone(),
        );
        match compiler {
            Ok(mut compiler) => {
                res.append(compiler.compile());
                if !res.success() {
                    return res;
                }
            }
            Err(err) => {
                res.append(err);
                return res;
            }
        }
    }

    di.finalize();

    if llmod.get_flag("Debug Info Version").is_none() {
        llmod.add_basic_value_flag(
            "Debug Info Version",
            inkwell::module::FlagBehavior::Warning,
            ctx.llvm().i32_type().const_int(3, false),
        );
    }
    res
}

impl Context {
    /// Compile a module (and, per settings, its dependency closure) into a
    /// single LLVM module.
    pub fn compile_module<'ctx>(
        &'ctx self,
        full_name: &str,
        settings: &CompileSettings,
    ) -> Result<Module<'ctx>, Diagnostics> {
        let mut res = Diagnostics::new();
        res.add_context(json!({ "Module Name": full_name }));

        let Some(module) = self.module_by_full_name(full_name) else {
            res.add_entry("E30", "Could not find module", json!({ "module": full_name }));
            return Err(res);
        };

        let top = self.generate_one(full_name, settings)?;

        if settings.link_dependencies {
            // Each dependency is generated exactly once per invocation, so
            // diamonds never link a module twice.
            let mut linked: HashSet<String> = HashSet::from([full_name.to_string()]);
            let mut queue: VecDeque<String> = module.dependencies().into_iter().collect();

            while let Some(dep_name) = queue.pop_front() {
                if !linked.insert(dep_name.clone()) {
                    continue;
                }
                let Some(dep) = self.module_by_full_name(&dep_name) else {
                    res.add_entry(
                        "E30",
                        "Could not find module",
                        json!({ "module": dep_name }),
                    );
                    return Err(res);
                };
                queue.extend(dep.dependencies());

                let dep_llmod = self.generate_one(&dep_name, settings)?;
                if let Err(e) = top.link_in_module(dep_llmod) {
                    res.add_entry(
                        "EINT",
                        "Failed to link dependency",
                        json!({ "module": dep_name, "Error": e.to_string() }),
                    );
                    return Err(res);
                }
                debug!(module = full_name, dep = %dep_name, "linked dependency");
            }

            // A runnable `main` module gets a C entry point calling the
            // graph main and returning its single i32 output.
            if module.short_name() == "main" {
                let has_main = module
                    .as_graph()
                    .is_some_and(|g| g.function("main").is_some());
                if has_main {
                    res.append(self.synthesize_c_main(full_name, &top));
                    res.clone().into_result()?;
                }
            }
        }

        info!(module = full_name, "module compiled");
        Ok(top)
    }

    /// Generate (or fetch from cache) the IR for exactly one module, with
    /// forward declarations for its transitive dependencies.
    fn generate_one<'ctx>(
        &'ctx self,
        full_name: &str,
        settings: &CompileSettings,
    ) -> Result<Module<'ctx>, Diagnostics> {
        let mut res = Diagnostics::new();
        res.add_context(json!({ "Module Name": full_name }));

        let module = self
            .module_by_full_name(full_name)
            .expect("caller resolved the module");

        let cache_key = self
            .module_hash(full_name)
            .map(|hash| artifact_key(full_name, &hash));

        if settings.use_cache {
            if let Some(key) = &cache_key {
                if let Some(bytes) = self.module_cache().get(key) {
                    let buffer =
                        MemoryBuffer::create_from_memory_range_copy(&bytes, full_name);
                    match Module::parse_bitcode_from_buffer(&buffer, self.llvm()) {
                        Ok(cached) => {
                            debug!(module = full_name, "loaded module from artifact cache");
                            return Ok(cached);
                        }
                        Err(e) => {
                            // A corrupt artifact is not fatal; regenerate.
                            debug!(
                                module = full_name,
                                error = %e,
                                "ignoring unreadable cache artifact"
                            );
                        }
                    }
                }
            }
        }

        let llmod = self.llvm().create_module(full_name);

        // Forward declarations for the transitive dependency closure, so
        // cross-module calls and dependency cycles resolve to symbols.
        let mut declared: HashSet<String> = HashSet::from([full_name.to_string()]);
        let mut queue: VecDeque<String> = module.dependencies().into_iter().collect();
        while let Some(dep_name) = queue.pop_front() {
            if !declared.insert(dep_name.clone()) {
                continue;
            }
            let Some(dep) = self.module_by_full_name(&dep_name) else {
                res.add_entry(
                    "E30",
                    "Could not find module",
                    json!({ "module": dep_name }),
                );
                return Err(res);
            };
            if let Some(graph) = dep.as_graph() {
                res.append(add_forward_declarations(self, graph, &llmod));
            }
            queue.extend(dep.dependencies());
        }
        res.clone().into_result()?;

        match module {
            ChiModule::Lang(_) => {}
            ChiModule::Graph(graph) => {
                res.append(generate_graph_module(self, graph, &llmod, settings));
                res.clone().into_result()?;
            }
        }

        // Catch malformed IR before it escapes: an invalid module here is a
        // compiler bug, not a user error.
        if let Err(e) = llmod.verify() {
            res.add_entry(
                "EINT",
                "Internal compiler error: invalid module created",
                json!({
                    "Error": e.to_string(),
                    "Full Name": full_name,
                    "Module": llmod.print_to_string().to_string(),
                }),
            );
            return Err(res);
        }

        if settings.use_cache {
            if let Some(key) = &cache_key {
                let bitcode = llmod.write_bitcode_to_memory();
                if let Err(e) = self.module_cache().put(key, bitcode.as_slice()) {
                    debug!(module = full_name, error = %e, "failed to store cache artifact");
                }
            }
        }

        Ok(llmod)
    }

    /// Emit `i32 main()` calling the graph `main` with `inputexec_id = 0`
    /// and returning its single `i32` output.
    fn synthesize_c_main<'ctx>(&'ctx self, full_name: &str, llmod: &Module<'ctx>) -> Diagnostics {
        let mut res = Diagnostics::new();
        let llvm = self.llvm();

        let mangled = mangle_function_name(full_name, "main");
        let Some(graph_main) = llmod.get_function(&mangled) else {
            res.add_entry(
                "EINT",
                "Could not find graph main in generated module",
                json!({ "Requested Function": mangled }),
            );
            return res;
        };
        if llmod.get_function("main").is_some() {
            return res;
        }

        let main_fn = llmod.add_function("main", llvm.i32_type().fn_type(&[], false), None);
        let block = llvm.append_basic_block(main_fn, "entry");
        let builder: Builder<'ctx> = llvm.create_builder();
        builder.position_at_end(block);

        let emit = || -> Result<(), inkwell::builder::BuilderError> {
            let out = builder.build_alloca(llvm.i32_type(), "ret")?;
            builder.build_call(
                graph_main,
                &[llvm.i32_type().const_zero().into(), out.into()],
                "",
            )?;
            let loaded = builder.build_load(out, "ret_loaded")?;
            builder.build_return(Some(&loaded))?;
            Ok(())
        };
        if let Err(e) = emit() {
            res.add_entry(
                "EINT",
                "Failed to emit C main wrapper",
                json!({ "Error": e.to_string() }),
            );
        }
        res
    }
}
