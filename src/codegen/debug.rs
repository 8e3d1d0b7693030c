//! DWARF debug types for graph values.
//!
//! Every node carries a source line taken from the module-wide line table,
//! so debuggers can step node to node. Type encodings follow DWARF 4.

use inkwell::debug_info::{AsDIScope, DIFlags, DIFlagsConstants, DIType, DebugInfoBuilder};
use inkwell::AddressSpace;
use serde_json::json;

use crate::context::Context;
use crate::data_type::DataType;
use crate::diagnostics::Diagnostics;

use super::types::debug_size_bits;

const DW_ATE_BOOLEAN: u32 = 0x02;
const DW_ATE_FLOAT: u32 = 0x04;
const DW_ATE_SIGNED: u32 = 0x05;
const DW_ATE_UNSIGNED_CHAR: u32 = 0x08;

/// Produce the debug type for a data type.
pub fn debug_type<'ctx>(
    di: &DebugInfoBuilder<'ctx>,
    ctx: &Context,
    ty: &DataType,
) -> Result<DIType<'ctx>, Diagnostics> {
    let mut res = Diagnostics::new();

    if ty.module == "lang" {
        let basic = match ty.name.as_str() {
            "i32" => di.create_basic_type("lang:i32", 32, DW_ATE_SIGNED, DIFlags::PUBLIC),
            "i1" => di.create_basic_type("lang:i1", 8, DW_ATE_BOOLEAN, DIFlags::PUBLIC),
            "f64" => di.create_basic_type("lang:f64", 64, DW_ATE_FLOAT, DIFlags::PUBLIC),
            "i8*" => {
                let pointee = di
                    .create_basic_type("lang:i8", 8, DW_ATE_UNSIGNED_CHAR, DIFlags::PUBLIC)
                    .map_err(|e| {
                        res.add_entry("EINT", "Failed to create debug type", json!({ "Error": e }));
                        res.clone()
                    })?;
                return Ok(di
                    .create_pointer_type(
                        "lang:i8*",
                        pointee.as_type(),
                        64,
                        64,
                        AddressSpace::default(),
                    )
                    .as_type());
            }
            _ => {
                res.add_entry(
                    "E37",
                    "Could not find type in module",
                    json!({ "type": ty.name, "module": ty.module }),
                );
                return Err(res);
            }
        };
        return basic.map(|b| b.as_type()).map_err(|e| {
            res.add_entry("EINT", "Failed to create debug type", json!({ "Error": e }));
            res
        });
    }

    let Some(s) = ctx
        .graph_module(&ty.module)
        .and_then(|m| m.struct_from_name(&ty.name))
    else {
        res.add_entry(
            "E37",
            "Could not find type in module",
            json!({ "type": ty.qualified_name() }),
        );
        return Err(res);
    };

    let file = di.create_file(&format!("{}.chimod", ty.module), "");
    let mut members = Vec::with_capacity(s.fields().len());
    let mut offset_bits = 0u64;
    for field in s.fields() {
        let member_ty = debug_type(di, ctx, &field.ty)?;
        let size = debug_size_bits(ctx, &field.ty);
        let member = di.create_member_type(
            file.as_debug_info_scope(),
            &field.name,
            file,
            0,
            size,
            8,
            offset_bits,
            DIFlags::PUBLIC,
            member_ty,
        );
        members.push(member.as_type());
        offset_bits += size;
    }

    Ok(di
        .create_struct_type(
            file.as_debug_info_scope(),
            s.name(),
            file,
            0,
            offset_bits,
            8,
            DIFlags::PUBLIC,
            None,
            &members,
            0,
            None,
            &ty.qualified_name(),
        )
        .as_type())
}
