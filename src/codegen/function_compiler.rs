//! Per-function and per-node compilation state.
//!
//! Each node instance reachable from the entry is compiled exactly once per
//! distinct input exec id it can be entered through, in two stages: stage 1
//! creates the node's first basic block (so predecessors have a branch
//! target), stage 2 emits the body. Pure nodes own no blocks at all — their
//! bodies are re-materialised into each consumer's block just before the
//! consumer's own body, so pure results never need PHI nodes.

use std::collections::{HashMap, HashSet, VecDeque};

use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context as LlvmContext;
use inkwell::debug_info::{AsDIScope, DIFlags, DIFlagsConstants, DISubprogram, DebugInfoBuilder};
use inkwell::module::Module;
use inkwell::values::{BasicValueEnum, FunctionValue, PointerValue};
use serde_json::json;
use uuid::Uuid;

use crate::context::{CancelToken, Context};
use crate::diagnostics::Diagnostics;
use crate::graph_function::GraphFunction;
use crate::graph_module::GraphModule;
use crate::mangle::mangle_function_name;

use super::debug::debug_type;
use super::function_type;
use super::types::lower_basic_type;

/// Values handed to a node's codegen: loaded input values in port order,
/// then the output allocas it stores results through.
pub struct NodeIo<'ctx> {
    pub inputs: Vec<BasicValueEnum<'ctx>>,
    pub outputs: Vec<PointerValue<'ctx>>,
}

/// Per-node compilation state: output storage plus one code block and one
/// compiled bit per input exec id.
struct NodeCompiler<'ctx> {
    return_values: Vec<PointerValue<'ctx>>,
    code_blocks: Vec<Option<BasicBlock<'ctx>>>,
    compiled: Vec<bool>,
}

/// Compiles one graph function into one LLVM function. Created fresh per
/// function; all caches die with it.
pub struct FunctionCompiler<'ctx, 'a> {
    ctx: &'ctx Context,
    llvm: &'ctx LlvmContext,
    module: &'a Module<'ctx>,
    builder: Builder<'ctx>,
    di: &'a DebugInfoBuilder<'ctx>,
    graph_module: &'a GraphModule,
    func: &'a GraphFunction,
    fn_value: FunctionValue<'ctx>,
    subprogram: DISubprogram<'ctx>,
    alloc_block: BasicBlock<'ctx>,
    locals: HashMap<String, PointerValue<'ctx>>,
    node_compilers: HashMap<Uuid, NodeCompiler<'ctx>>,
    node_lines: &'a HashMap<Uuid, u32>,
    cancel: Option<CancelToken>,
}

impl<'ctx, 'a> FunctionCompiler<'ctx, 'a> {
    /// Create the LLVM function, its debug subprogram, and the `alloc`
    /// block with local-variable storage. The graph must already be
    /// validated.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: &'ctx Context,
        module: &'a Module<'ctx>,
        di: &'a DebugInfoBuilder<'ctx>,
        graph_module: &'a GraphModule,
        func: &'a GraphFunction,
        node_lines: &'a HashMap<Uuid, u32>,
        cancel: Option<CancelToken>,
    ) -> Result<FunctionCompiler<'ctx, 'a>, Diagnostics> {
        let mut res = Diagnostics::new();
        res.add_context(json!({
            "Function": func.name(),
            "Module": graph_module.full_name(),
        }));

        let llvm = ctx.llvm();
        let mangled = mangle_function_name(graph_module.full_name(), func.name());

        let fn_type = function_type(llvm, ctx, func).map_err(|e| {
            let mut r = res.clone();
            r.append(e);
            r
        })?;
        let fn_value = match module.get_function(&mangled) {
            Some(existing) => existing,
            None => module.add_function(&mangled, fn_type, None),
        };

        let entry_line = func
            .entry_node()
            .and_then(|id| node_lines.get(&id).copied())
            .unwrap_or(1);

        // Debug subprogram. The "file" is the module file; lines index the
        // module-wide node table.
        let di_file = di.create_file(
            &format!("{}.chimod", graph_module.short_name()),
            graph_module.full_name(),
        );
        let i32_di = debug_type(di, ctx, &crate::data_type::DataType::new("lang", "i32"))
            .map_err(|e| {
                let mut r = res.clone();
                r.append(e);
                r
            })?;
        let mut param_di_types = vec![i32_di];
        for port in func.data_inputs().iter().chain(func.data_outputs()) {
            let ty = debug_type(di, ctx, &port.ty).map_err(|e| {
                let mut r = res.clone();
                r.append(e);
                r
            })?;
            param_di_types.push(ty);
        }
        let subroutine_type =
            di.create_subroutine_type(di_file, Some(i32_di), &param_di_types, DIFlags::PUBLIC);
        let subprogram = di.create_function(
            di_file.as_debug_info_scope(),
            &func.qualified_name(),
            Some(&mangled),
            di_file,
            entry_line,
            subroutine_type,
            false,
            true,
            entry_line,
            DIFlags::PUBLIC,
            false,
        );
        fn_value.set_subprogram(subprogram);

        let alloc_block = llvm.append_basic_block(fn_value, "alloc");
        let builder = llvm.create_builder();
        builder.position_at_end(alloc_block);

        let mut compiler = FunctionCompiler {
            ctx,
            llvm,
            module,
            builder,
            di,
            graph_module,
            func,
            fn_value,
            subprogram,
            alloc_block,
            locals: HashMap::new(),
            node_compilers: HashMap::new(),
            node_lines,
            cancel,
        };

        compiler.emit_parameter_debug(entry_line).map_err(|e| {
            let mut r = res.clone();
            r.append(e);
            r
        })?;
        compiler.emit_local_variables().map_err(|e| {
            let mut r = res.clone();
            r.append(e);
            r
        })?;

        Ok(compiler)
    }

    pub fn llvm(&self) -> &'ctx LlvmContext {
        self.llvm
    }

    pub fn chi(&self) -> &'ctx Context {
        self.ctx
    }

    pub fn llvm_module(&self) -> &'a Module<'ctx> {
        self.module
    }

    pub fn builder(&self) -> &Builder<'ctx> {
        &self.builder
    }

    pub fn function(&self) -> &'a GraphFunction {
        self.func
    }

    pub fn fn_value(&self) -> FunctionValue<'ctx> {
        self.fn_value
    }

    /// Storage for a function-local variable.
    pub fn local_variable(&self, name: &str) -> Option<PointerValue<'ctx>> {
        self.locals.get(name).copied()
    }

    /// Drive compilation: BFS from the entry across exec edges, stage 1 on
    /// each successor before stage 2 of the current node, then terminate
    /// `alloc` into the entry's first block.
    pub fn compile(&mut self) -> Diagnostics {
        let mut res = Diagnostics::new();
        res.add_context(json!({
            "Function": self.func.name(),
            "Module": self.graph_module.full_name(),
        }));

        let Some(entry) = self.func.entry_node() else {
            res.add_entry("E01", "No entry node", json!({}));
            return res;
        };

        let mut queue: VecDeque<(Uuid, usize)> = VecDeque::from([(entry, 0)]);
        while let Some((id, exec_id)) = queue.pop_front() {
            if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                res.add_entry("E32", "Compilation cancelled", json!({}));
                return res;
            }

            debug_assert!(!self.func.nodes()[&id].node_type().pure);
            if self.is_compiled(id, exec_id) {
                continue;
            }

            // Successor first blocks must exist to be branch targets.
            let node = &self.func.nodes()[&id];
            let mut successors = Vec::new();
            for (idx, conn) in node.output_exec_connections().iter().enumerate() {
                let Some((succ, succ_exec)) = conn else {
                    res.add_entry(
                        "E29",
                        "Node is missing an output exec connection",
                        json!({ "Node ID": id.to_string(), "Missing ID": idx }),
                    );
                    return res;
                };
                successors.push((*succ, *succ_exec));
            }

            let mut output_blocks = Vec::with_capacity(successors.len());
            for (succ, succ_exec) in &successors {
                if let Err(e) = self.stage_1(*succ, *succ_exec) {
                    res.append(e);
                    return res;
                }
                output_blocks.push(self.first_block(*succ, *succ_exec));
            }

            res.append(self.stage_2(id, exec_id, &output_blocks));
            if !res.success() {
                return res;
            }

            queue.extend(successors);
        }

        // Everything reachable is compiled; jump from the allocas into the
        // entry's code.
        let entry_block = self.first_block(entry, 0);
        self.builder.position_at_end(self.alloc_block);
        if let Err(e) = self.builder.build_unconditional_branch(entry_block) {
            res.add_entry(
                "EINT",
                "Failed to terminate alloc block",
                json!({ "Error": e.to_string() }),
            );
        }
        res
    }

    /// Stage 1: make sure the first basic block for `(node, exec_id)`
    /// exists. Idempotent.
    pub fn stage_1(&mut self, id: Uuid, exec_id: usize) -> Result<(), Diagnostics> {
        self.ensure_node_compiler(id)?;
        let node = &self.func.nodes()[&id];
        debug_assert!(exec_id < node.input_exec_count());

        let state = self.node_compilers.get_mut(&id).unwrap();
        if state.code_blocks[exec_id].is_none() {
            let name = format!("node_{}__{}", id, exec_id);
            state.code_blocks[exec_id] = Some(self.llvm.append_basic_block(self.fn_value, &name));
        }
        Ok(())
    }

    /// Stage 2: emit pure dependencies, then the node's own body. Must not
    /// run before stage 1 of the same pair; skips silently when already
    /// compiled.
    pub fn stage_2(
        &mut self,
        id: Uuid,
        exec_id: usize,
        output_blocks: &[BasicBlock<'ctx>],
    ) -> Diagnostics {
        let mut res = Diagnostics::new();

        if self.is_compiled(id, exec_id) {
            return res;
        }
        if let Err(e) = self.stage_1(id, exec_id) {
            res.append(e);
            return res;
        }

        let block = self.first_block(id, exec_id);
        self.builder.position_at_end(block);

        // Re-materialise the transitive pure producers, in dependency
        // order, into this node's block. The set is deduplicated, so each
        // pure is emitted once per (consumer, exec id).
        let func = self.func;
        for pure_id in dependent_pures_recursive(func, id) {
            res.append(self.emit_pure(pure_id));
            if !res.success() {
                return res;
            }
        }

        let io = match self.node_io(id) {
            Ok(io) => io,
            Err(e) => {
                res.append(e);
                return res;
            }
        };

        self.set_debug_location(id);
        let node = &func.nodes()[&id];
        res.append(node.node_type().codegen(self, node, exec_id, &io, output_blocks));
        if !res.success() {
            return res;
        }

        self.node_compilers.get_mut(&id).unwrap().compiled[exec_id] = true;
        res
    }

    /// Emit a pure node's body at the current insertion point. Its output
    /// allocas then hold fresh values for the consumer to load.
    fn emit_pure(&mut self, id: Uuid) -> Diagnostics {
        let mut res = Diagnostics::new();
        debug_assert!(self.func.nodes()[&id].node_type().pure);

        if let Err(e) = self.ensure_node_compiler(id) {
            res.append(e);
            return res;
        }
        let io = match self.node_io(id) {
            Ok(io) => io,
            Err(e) => {
                res.append(e);
                return res;
            }
        };

        self.set_debug_location(id);
        let node = &self.func.nodes()[&id];
        res.append(node.node_type().codegen(self, node, 0, &io, &[]));
        res
    }

    /// Load the node's input values from its producers' output storage and
    /// collect its own output allocas.
    fn node_io(&mut self, id: Uuid) -> Result<NodeIo<'ctx>, Diagnostics> {
        let func = self.func;
        let node = &func.nodes()[&id];

        let mut inputs = Vec::with_capacity(node.input_data_connections().len());
        for (idx, conn) in node.input_data_connections().iter().enumerate() {
            let Some((producer, producer_idx)) = conn else {
                let mut res = Diagnostics::new();
                res.add_entry(
                    "E27",
                    "Node is missing an input data connection",
                    json!({ "Node ID": id.to_string(), "dataid": idx }),
                );
                return Err(res);
            };
            self.ensure_node_compiler(*producer)?;
            let storage = self.node_compilers[producer].return_values[*producer_idx];
            let loaded = self
                .builder
                .build_load(storage, &format!("in_{idx}"))
                .map_err(internal)?;
            inputs.push(loaded);
        }

        let outputs = self.node_compilers[&id].return_values.clone();
        Ok(NodeIo { inputs, outputs })
    }

    /// Allocate output storage (with debug declares) for a node, once.
    fn ensure_node_compiler(&mut self, id: Uuid) -> Result<(), Diagnostics> {
        if self.node_compilers.contains_key(&id) {
            return Ok(());
        }
        let func = self.func;
        let node = &func.nodes()[&id];

        let alloc_builder = self.llvm.create_builder();
        alloc_builder.position_at_end(self.alloc_block);

        let line = self.node_lines.get(&id).copied().unwrap_or(1);

        let mut return_values = Vec::with_capacity(node.node_type().data_outputs.len());
        for (idx, port) in node.node_type().data_outputs.iter().enumerate() {
            let lowered = lower_basic_type(self.llvm, self.ctx, &port.ty)?;
            let name = format!("{}__{}", node.string_id(), idx);
            let alloca = alloc_builder
                .build_alloca(lowered, &name)
                .map_err(internal)?;

            let port_di = debug_type(self.di, self.ctx, &port.ty)?;
            let file = self.di.create_file(
                &format!("{}.chimod", self.graph_module.short_name()),
                self.graph_module.full_name(),
            );
            let var = self.di.create_auto_variable(
                self.subprogram.as_debug_info_scope(),
                &name,
                file,
                line,
                port_di,
                true,
                DIFlags::PUBLIC,
                8,
            );
            let loc = self.di.create_debug_location(
                self.llvm,
                line,
                1,
                self.subprogram.as_debug_info_scope(),
                None,
            );
            self.di.insert_declare_at_end(
                alloca,
                Some(var),
                Some(self.di.create_expression(vec![])),
                loc,
                self.alloc_block,
            );

            return_values.push(alloca);
        }

        let slots = node.input_exec_count();
        self.node_compilers.insert(
            id,
            NodeCompiler {
                return_values,
                code_blocks: vec![None; slots],
                compiled: vec![false; slots],
            },
        );
        Ok(())
    }

    fn is_compiled(&self, id: Uuid, exec_id: usize) -> bool {
        self.node_compilers
            .get(&id)
            .is_some_and(|c| c.compiled.get(exec_id).copied().unwrap_or(false))
    }

    /// The block predecessors branch into for `(node, exec_id)`.
    /// Stage 1 must have run.
    fn first_block(&self, id: Uuid, exec_id: usize) -> BasicBlock<'ctx> {
        self.node_compilers[&id].code_blocks[exec_id].expect("stage 1 has not run for this node")
    }

    fn set_debug_location(&self, id: Uuid) {
        let line = self.node_lines.get(&id).copied().unwrap_or(1);
        let loc = self.di.create_debug_location(
            self.llvm,
            line,
            1,
            self.subprogram.as_debug_info_scope(),
            None,
        );
        self.builder.set_current_debug_location(loc);
    }

    /// Shadow allocas and DWARF parameter records for the arguments.
    fn emit_parameter_debug(&mut self, entry_line: u32) -> Result<(), Diagnostics> {
        let file = self.di.create_file(
            &format!("{}.chimod", self.graph_module.short_name()),
            self.graph_module.full_name(),
        );

        let mut names = vec![("inputexec_id".to_string(),
            crate::data_type::DataType::new("lang", "i32"))];
        for port in self.func.data_inputs().iter().chain(self.func.data_outputs()) {
            names.push((port.name.clone(), port.ty.clone()));
        }

        for (i, (name, ty)) in names.into_iter().enumerate() {
            let Some(param) = self.fn_value.get_nth_param(i as u32) else {
                break;
            };
            set_value_name(param, &name);

            let shadow = self
                .builder
                .build_alloca(param.get_type(), &format!("{name}.addr"))
                .map_err(internal)?;
            self.builder.build_store(shadow, param).map_err(internal)?;

            let param_di = debug_type(self.di, self.ctx, &ty)?;
            let var = self.di.create_parameter_variable(
                self.subprogram.as_debug_info_scope(),
                &name,
                i as u32 + 1,
                file,
                entry_line,
                param_di,
                true,
                DIFlags::PUBLIC,
            );
            let loc = self.di.create_debug_location(
                self.llvm,
                entry_line,
                1,
                self.subprogram.as_debug_info_scope(),
                None,
            );
            self.di.insert_declare_at_end(
                shadow,
                Some(var),
                Some(self.di.create_expression(vec![])),
                loc,
                self.alloc_block,
            );
        }
        Ok(())
    }

    /// Allocate and zero every local variable.
    fn emit_local_variables(&mut self) -> Result<(), Diagnostics> {
        for local in self.func.local_variables() {
            let lowered = lower_basic_type(self.llvm, self.ctx, &local.ty)?;
            let alloca = self
                .builder
                .build_alloca(lowered, &format!("var_{}", local.name))
                .map_err(internal)?;
            self.builder
                .build_store(alloca, lowered.const_zero())
                .map_err(internal)?;
            self.locals.insert(local.name.clone(), alloca);
        }
        Ok(())
    }
}

/// The transitive pure producers of a node's data inputs, in dependency
/// order (producers before consumers), deduplicated.
pub fn dependent_pures_recursive(func: &GraphFunction, id: Uuid) -> Vec<Uuid> {
    fn walk(func: &GraphFunction, id: Uuid, seen: &mut HashSet<Uuid>, out: &mut Vec<Uuid>) {
        for conn in func.nodes()[&id].input_data_connections().iter().flatten() {
            let producer = conn.0;
            if !func.nodes()[&producer].node_type().pure || seen.contains(&producer) {
                continue;
            }
            seen.insert(producer);
            walk(func, producer, seen, out);
            out.push(producer);
        }
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    walk(func, id, &mut seen, &mut out);
    out
}

fn internal(e: impl std::fmt::Display) -> Diagnostics {
    let mut res = Diagnostics::new();
    res.add_entry(
        "EINT",
        "LLVM builder error",
        json!({ "Error": e.to_string() }),
    );
    res
}

fn set_value_name(value: BasicValueEnum<'_>, name: &str) {
    match value {
        BasicValueEnum::IntValue(v) => v.set_name(name),
        BasicValueEnum::FloatValue(v) => v.set_name(name),
        BasicValueEnum::PointerValue(v) => v.set_name(name),
        BasicValueEnum::StructValue(v) => v.set_name(name),
        BasicValueEnum::ArrayValue(v) => v.set_name(name),
        BasicValueEnum::VectorValue(v) => v.set_name(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_type::{DataType, NamedDataType};
    use crate::lang_module;

    /// entry -> (+) -> exit wiring, pure producers of the exit node.
    #[test]
    fn dependent_pures_are_topologically_ordered() {
        let mut func = GraphFunction::new(
            "test/main",
            "add3",
            vec![NamedDataType::new("a", DataType::new("lang", "i32"))],
            vec![NamedDataType::new("out", DataType::new("lang", "i32"))],
            vec!["In".into()],
            vec!["Out".into()],
        );

        let entry = func.insert_node(func.create_entry_node_type(), 0.0, 0.0);
        let exit = func.insert_node(func.create_exit_node_type(), 0.0, 0.0);
        let one = func.insert_node(lang_module::const_int_node_type(1), 0.0, 0.0);
        let add_ty = lang_module::binary_op_node_type(
            DataType::new("lang", "i32"),
            crate::node_type::BinOp::Add,
        );
        let add = func.insert_node(add_ty, 0.0, 0.0);

        assert!(func.connect_exec(entry, 0, exit, 0).success());
        assert!(func.connect_data(entry, 0, add, 0).success());
        assert!(func.connect_data(one, 0, add, 1).success());
        assert!(func.connect_data(add, 0, exit, 0).success());

        let pures = dependent_pures_recursive(&func, exit);
        // `one` must come before `add`; `entry` is not pure.
        assert_eq!(pures.len(), 2);
        assert_eq!(pures[1], add);
        assert_eq!(pures[0], one);
    }
}
