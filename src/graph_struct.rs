//! User-defined struct types owned by a graph module.

use crate::data_type::{DataType, NamedDataType};

/// An ordered list of named fields. A struct synthesises a [`DataType`]
/// under its module's name, plus the `_make_<S>` and `_break_<S>` node
/// types the module hands out for packing and unpacking values.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphStruct {
    module: String,
    name: String,
    fields: Vec<NamedDataType>,
}

impl GraphStruct {
    pub(crate) fn new(module: impl Into<String>, name: impl Into<String>) -> GraphStruct {
        GraphStruct {
            module: module.into(),
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full name of the owning module.
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn fields(&self) -> &[NamedDataType] {
        &self.fields
    }

    /// The value type this struct defines.
    pub fn data_type(&self) -> DataType {
        DataType::new(self.module.clone(), self.name.clone())
    }

    pub fn add_field(&mut self, ty: DataType, name: impl Into<String>, add_before: usize) {
        debug_assert!(ty.valid());
        let field = NamedDataType::new(name, ty);
        if add_before < self.fields.len() {
            self.fields.insert(add_before, field);
        } else {
            self.fields.push(field);
        }
    }

    pub fn modify_field(&mut self, idx: usize, new_ty: DataType, new_name: impl Into<String>) {
        debug_assert!(idx < self.fields.len() && new_ty.valid());
        self.fields[idx] = NamedDataType::new(new_name, new_ty);
    }

    pub fn remove_field(&mut self, idx: usize) {
        debug_assert!(idx < self.fields.len());
        self.fields.remove(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_is_named_after_the_struct() {
        let mut s = GraphStruct::new("test/main", "vec2");
        s.add_field(DataType::new("lang", "f64"), "x", usize::MAX);
        s.add_field(DataType::new("lang", "f64"), "y", usize::MAX);
        assert_eq!(s.data_type(), DataType::new("test/main", "vec2"));
        assert_eq!(s.fields().len(), 2);
    }

    #[test]
    fn fields_keep_insertion_order() {
        let mut s = GraphStruct::new("test/main", "pair");
        s.add_field(DataType::new("lang", "i32"), "second", usize::MAX);
        s.add_field(DataType::new("lang", "i32"), "first", 0);
        assert_eq!(s.fields()[0].name, "first");
        assert_eq!(s.fields()[1].name, "second");
    }
}
