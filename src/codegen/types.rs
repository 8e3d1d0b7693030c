//! Lowering of [`DataType`] values to LLVM types.
//!
//! The graph data model stores types as `(module, name)` references; this
//! is where they become machine types. `lang` primitives map directly,
//! struct types lower to literal LLVM struct types over their lowered
//! fields (literal structs unify structurally, so repeated lowerings of the
//! same struct compare equal).

use inkwell::context::Context as LlvmContext;
use inkwell::types::BasicTypeEnum;
use inkwell::AddressSpace;
use serde_json::json;

use crate::context::Context;
use crate::data_type::DataType;
use crate::diagnostics::Diagnostics;

/// Lower a data type, reporting `E30`/`E37` when the reference does not
/// resolve.
pub fn lower_basic_type<'ctx>(
    llvm: &'ctx LlvmContext,
    ctx: &Context,
    ty: &DataType,
) -> Result<BasicTypeEnum<'ctx>, Diagnostics> {
    let mut res = Diagnostics::new();

    if ty.module == "lang" {
        let lowered: Option<BasicTypeEnum<'ctx>> = match ty.name.as_str() {
            "i32" => Some(llvm.i32_type().into()),
            "i1" => Some(llvm.bool_type().into()),
            "f64" => Some(llvm.f64_type().into()),
            "i8*" => Some(llvm.i8_type().ptr_type(AddressSpace::default()).into()),
            _ => None,
        };
        return lowered.ok_or_else(|| {
            res.add_entry(
                "E37",
                "Could not find type in module",
                json!({ "type": ty.name, "module": ty.module }),
            );
            res
        });
    }

    let Some(module) = ctx.graph_module(&ty.module) else {
        res.add_entry(
            "E30",
            "Could not find module",
            json!({ "module": ty.module }),
        );
        return Err(res);
    };
    let Some(s) = module.struct_from_name(&ty.name) else {
        res.add_entry(
            "E37",
            "Could not find type in module",
            json!({ "type": ty.name, "module": ty.module }),
        );
        return Err(res);
    };

    let mut fields = Vec::with_capacity(s.fields().len());
    for field in s.fields() {
        fields.push(lower_basic_type(llvm, ctx, &field.ty)?);
    }
    Ok(llvm.struct_type(&fields, false).into())
}

/// Bit size used for debug info layout. Packing mirrors the debug struct
/// layout (byte-aligned sums), not the target data layout.
pub fn debug_size_bits(ctx: &Context, ty: &DataType) -> u64 {
    if ty.module == "lang" {
        return match ty.name.as_str() {
            "i32" => 32,
            "i1" => 8,
            "f64" => 64,
            "i8*" => 64,
            _ => 0,
        };
    }
    let Some(s) = ctx
        .graph_module(&ty.module)
        .and_then(|m| m.struct_from_name(&ty.name))
    else {
        return 0;
    };
    s.fields()
        .iter()
        .map(|f| debug_size_bits(ctx, &f.ty))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lang_primitives_lower() {
        let ctx = Context::new("");
        let llvm = ctx.llvm();

        let i32_ty = lower_basic_type(llvm, &ctx, &DataType::new("lang", "i32")).unwrap();
        assert!(i32_ty.is_int_type());
        let f64_ty = lower_basic_type(llvm, &ctx, &DataType::new("lang", "f64")).unwrap();
        assert!(f64_ty.is_float_type());
        let str_ty = lower_basic_type(llvm, &ctx, &DataType::new("lang", "i8*")).unwrap();
        assert!(str_ty.is_pointer_type());
    }

    #[test]
    fn struct_types_lower_to_struct_types() {
        let mut ctx = Context::new("");
        {
            let m = ctx.new_graph_module("test/main").unwrap();
            let (s, _) = m.get_or_create_struct("vec2");
            s.add_field(DataType::new("lang", "f64"), "x", usize::MAX);
            s.add_field(DataType::new("lang", "f64"), "y", usize::MAX);
        }

        let lowered =
            lower_basic_type(ctx.llvm(), &ctx, &DataType::new("test/main", "vec2")).unwrap();
        assert!(lowered.is_struct_type());
        assert_eq!(lowered.into_struct_type().count_fields(), 2);

        assert_eq!(debug_size_bits(&ctx, &DataType::new("test/main", "vec2")), 128);
    }

    #[test]
    fn unresolvable_types_report_codes() {
        let ctx = Context::new("");
        let err = lower_basic_type(ctx.llvm(), &ctx, &DataType::new("lang", "i64")).unwrap_err();
        assert!(err.has_code("E37"));
        let err =
            lower_basic_type(ctx.llvm(), &ctx, &DataType::new("ghost/mod", "t")).unwrap_err();
        assert!(err.has_code("E30"));
    }
}
