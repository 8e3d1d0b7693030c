//! Code generation for each node kind.
//!
//! Non-pure kinds receive the first blocks of their exec successors and
//! must terminate their block with a branch into one of them (or a return).
//! Pure kinds are emitted inline into their consumer's block: they store
//! results through their output allocas and leave the block open.

use inkwell::basic_block::BasicBlock;
use inkwell::values::BasicMetadataValueEnum;
use inkwell::{FloatPredicate, IntPredicate};
use serde_json::json;

use crate::diagnostics::Diagnostics;
use crate::mangle::mangle_function_name;
use crate::node_instance::NodeInstance;
use crate::node_type::{BinOp, CmpOp, NodeType, NodeTypeKind};

use super::function_compiler::{FunctionCompiler, NodeIo};
use super::types::lower_basic_type;

impl NodeType {
    /// Emit this node's body at `cg`'s current insertion point.
    pub fn codegen<'ctx>(
        &self,
        cg: &FunctionCompiler<'ctx, '_>,
        node: &NodeInstance,
        input_exec_id: usize,
        io: &NodeIo<'ctx>,
        output_blocks: &[BasicBlock<'ctx>],
    ) -> Diagnostics {
        debug_assert!(io.inputs.len() == self.data_inputs.len());
        debug_assert!(io.outputs.len() == self.data_outputs.len());
        debug_assert!(self.pure || output_blocks.len() == node.output_exec_connections().len());

        let result = self.codegen_inner(cg, input_exec_id, io, output_blocks);
        match result {
            Ok(()) => Diagnostics::new(),
            Err(err) => err,
        }
    }

    fn codegen_inner<'ctx>(
        &self,
        cg: &FunctionCompiler<'ctx, '_>,
        input_exec_id: usize,
        io: &NodeIo<'ctx>,
        output_blocks: &[BasicBlock<'ctx>],
    ) -> Result<(), Diagnostics> {
        let llvm = cg.llvm();
        let builder = cg.builder();

        match &self.kind {
            NodeTypeKind::Entry => {
                // Arguments land in this node's output storage; control
                // dispatches on the caller-provided exec id.
                for (i, out) in io.outputs.iter().enumerate() {
                    let param = cg
                        .fn_value()
                        .get_nth_param(i as u32 + 1)
                        .ok_or_else(|| ice("entry node argument count mismatch"))?;
                    builder.build_store(*out, param).map_err(ice)?;
                }

                let exec_arg = cg
                    .fn_value()
                    .get_nth_param(0)
                    .ok_or_else(|| ice("function has no inputexec_id argument"))?
                    .into_int_value();
                let default = output_blocks
                    .first()
                    .ok_or_else(|| ice("entry node has no exec successors"))?;
                let cases: Vec<_> = output_blocks
                    .iter()
                    .enumerate()
                    .map(|(i, block)| (llvm.i32_type().const_int(i as u64, false), *block))
                    .collect();
                builder.build_switch(exec_arg, *default, &cases).map_err(ice)?;
            }

            NodeTypeKind::Exit => {
                // Function outputs go out through the trailing pointer
                // parameters; the return value names the exec input taken.
                let total_params = cg.fn_value().count_params() as usize;
                let ret_start = total_params - io.inputs.len();
                for (i, value) in io.inputs.iter().enumerate() {
                    let out_ptr = cg
                        .fn_value()
                        .get_nth_param((ret_start + i) as u32)
                        .ok_or_else(|| ice("exit node argument count mismatch"))?
                        .into_pointer_value();
                    builder.build_store(out_ptr, *value).map_err(ice)?;
                }
                let exit_id = llvm.i32_type().const_int(input_exec_id as u64, false);
                builder.build_return(Some(&exit_id)).map_err(ice)?;
            }

            NodeTypeKind::If => {
                let cond = io.inputs[0].into_int_value();
                builder
                    .build_conditional_branch(cond, output_blocks[0], output_blocks[1])
                    .map_err(ice)?;
            }

            NodeTypeKind::ConstInt(value) => {
                let constant = llvm.i32_type().const_int(*value as i64 as u64, true);
                builder.build_store(io.outputs[0], constant).map_err(ice)?;
            }

            NodeTypeKind::ConstFloat(value) => {
                let constant = llvm.f64_type().const_float(*value);
                builder.build_store(io.outputs[0], constant).map_err(ice)?;
            }

            NodeTypeKind::ConstBool(value) => {
                let constant = llvm.bool_type().const_int(*value as u64, false);
                builder.build_store(io.outputs[0], constant).map_err(ice)?;
            }

            NodeTypeKind::StrLiteral(value) => {
                let global = builder.build_global_string_ptr(value, "str").map_err(ice)?;
                builder
                    .build_store(io.outputs[0], global.as_pointer_value())
                    .map_err(ice)?;
            }

            NodeTypeKind::BinaryOp { ty, op } => {
                let result: inkwell::values::BasicValueEnum<'ctx> = if ty.name == "i32" {
                    let a = io.inputs[0].into_int_value();
                    let b = io.inputs[1].into_int_value();
                    let v = match op {
                        BinOp::Add => builder.build_int_add(a, b, "add"),
                        BinOp::Subtract => builder.build_int_sub(a, b, "sub"),
                        BinOp::Multiply => builder.build_int_mul(a, b, "mul"),
                        BinOp::Divide => builder.build_int_signed_div(a, b, "div"),
                    };
                    v.map_err(ice)?.into()
                } else {
                    let a = io.inputs[0].into_float_value();
                    let b = io.inputs[1].into_float_value();
                    let v = match op {
                        BinOp::Add => builder.build_float_add(a, b, "add"),
                        BinOp::Subtract => builder.build_float_sub(a, b, "sub"),
                        BinOp::Multiply => builder.build_float_mul(a, b, "mul"),
                        BinOp::Divide => builder.build_float_div(a, b, "div"),
                    };
                    v.map_err(ice)?.into()
                };
                builder.build_store(io.outputs[0], result).map_err(ice)?;
            }

            NodeTypeKind::Compare { ty, op } => {
                let result = if ty.name == "i32" {
                    let pred = match op {
                        CmpOp::Lt => IntPredicate::SLT,
                        CmpOp::Gt => IntPredicate::SGT,
                        CmpOp::Le => IntPredicate::SLE,
                        CmpOp::Ge => IntPredicate::SGE,
                        CmpOp::Eq => IntPredicate::EQ,
                        CmpOp::Ne => IntPredicate::NE,
                    };
                    builder
                        .build_int_compare(
                            pred,
                            io.inputs[0].into_int_value(),
                            io.inputs[1].into_int_value(),
                            "cmp",
                        )
                        .map_err(ice)?
                } else {
                    let pred = match op {
                        CmpOp::Lt => FloatPredicate::ULT,
                        CmpOp::Gt => FloatPredicate::UGT,
                        CmpOp::Le => FloatPredicate::ULE,
                        CmpOp::Ge => FloatPredicate::UGE,
                        CmpOp::Eq => FloatPredicate::UEQ,
                        CmpOp::Ne => FloatPredicate::UNE,
                    };
                    builder
                        .build_float_compare(
                            pred,
                            io.inputs[0].into_float_value(),
                            io.inputs[1].into_float_value(),
                            "cmp",
                        )
                        .map_err(ice)?
                };
                builder.build_store(io.outputs[0], result).map_err(ice)?;
            }

            NodeTypeKind::IntToFloat => {
                let converted = builder
                    .build_signed_int_to_float(
                        io.inputs[0].into_int_value(),
                        llvm.f64_type(),
                        "conv",
                    )
                    .map_err(ice)?;
                builder.build_store(io.outputs[0], converted).map_err(ice)?;
            }

            NodeTypeKind::FloatToInt => {
                let converted = builder
                    .build_float_to_signed_int(
                        io.inputs[0].into_float_value(),
                        llvm.i32_type(),
                        "conv",
                    )
                    .map_err(ice)?;
                builder.build_store(io.outputs[0], converted).map_err(ice)?;
            }

            NodeTypeKind::FunctionCall { module, function } => {
                let mangled = mangle_function_name(module, function);
                let Some(callee) = cg.llvm_module().get_function(&mangled) else {
                    let mut res = Diagnostics::new();
                    res.add_entry(
                        "EINT",
                        "Could not find function in LLVM module",
                        json!({ "Requested Function": mangled }),
                    );
                    return Err(res);
                };

                let mut args: Vec<BasicMetadataValueEnum<'ctx>> =
                    Vec::with_capacity(1 + io.inputs.len() + io.outputs.len());
                args.push(llvm.i32_type().const_int(input_exec_id as u64, false).into());
                for value in &io.inputs {
                    args.push((*value).into());
                }
                for out in &io.outputs {
                    args.push((*out).into());
                }

                let returned = builder
                    .build_call(callee, &args, "call_function")
                    .map_err(ice)?
                    .try_as_basic_value()
                    .left()
                    .ok_or_else(|| ice("graph function call returned void"))?
                    .into_int_value();

                // Branch to the successor named by the callee's exit id.
                let default = output_blocks
                    .first()
                    .ok_or_else(|| ice("call node has no exec successors"))?;
                let cases: Vec<_> = output_blocks
                    .iter()
                    .enumerate()
                    .map(|(i, block)| (llvm.i32_type().const_int(i as u64, false), *block))
                    .collect();
                builder.build_switch(returned, *default, &cases).map_err(ice)?;
            }

            NodeTypeKind::MakeStruct { .. } => {
                let out = io.outputs[0];
                for (i, value) in io.inputs.iter().enumerate() {
                    let field = builder
                        .build_struct_gep(out, i as u32, &format!("field_{i}"))
                        .map_err(ice)?;
                    builder.build_store(field, *value).map_err(ice)?;
                }
            }

            NodeTypeKind::BreakStruct { ty } => {
                let struct_ty = lower_basic_type(llvm, cg.chi(), ty)?;
                let tmp = builder.build_alloca(struct_ty, "break_tmp").map_err(ice)?;
                builder.build_store(tmp, io.inputs[0]).map_err(ice)?;
                for (i, out) in io.outputs.iter().enumerate() {
                    let field = builder
                        .build_struct_gep(tmp, i as u32, &format!("field_{i}"))
                        .map_err(ice)?;
                    let loaded = builder
                        .build_load(field, &format!("field_{i}_loaded"))
                        .map_err(ice)?;
                    builder.build_store(*out, loaded).map_err(ice)?;
                }
            }

            NodeTypeKind::GetLocal(var) => {
                let Some(storage) = cg.local_variable(&var.name) else {
                    return Err(missing_local(&var.name));
                };
                let loaded = builder
                    .build_load(storage, &format!("{}_loaded", var.name))
                    .map_err(ice)?;
                builder.build_store(io.outputs[0], loaded).map_err(ice)?;
            }

            NodeTypeKind::SetLocal(var) => {
                let Some(storage) = cg.local_variable(&var.name) else {
                    return Err(missing_local(&var.name));
                };
                builder.build_store(storage, io.inputs[0]).map_err(ice)?;
                builder
                    .build_unconditional_branch(output_blocks[0])
                    .map_err(ice)?;
            }
        }

        Ok(())
    }
}

fn ice(e: impl std::fmt::Display) -> Diagnostics {
    let mut res = Diagnostics::new();
    res.add_entry(
        "EINT",
        "LLVM builder error",
        json!({ "Error": e.to_string() }),
    );
    res
}

fn missing_local(name: &str) -> Diagnostics {
    let mut res = Diagnostics::new();
    res.add_entry(
        "EINT",
        "Local variable has no storage in this function",
        json!({ "Variable": name }),
    );
    res
}
