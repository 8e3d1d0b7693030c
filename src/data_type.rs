//! Value types carried by data edges.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A value type: the full name of the owning module plus a short type name.
///
/// Equality is structural over `(module, name)`. The backing LLVM type and
/// debug type are produced on demand by the codegen type lowerer; the graph
/// data model itself stays free of LLVM handles so modules serialize and
/// outlive any particular compilation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct DataType {
    pub module: String,
    pub name: String,
}

impl DataType {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> DataType {
        DataType {
            module: module.into(),
            name: name.into(),
        }
    }

    /// `module:name`, the form used in JSON and error messages.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.module, self.name)
    }

    /// A type is valid when it actually names something.
    pub fn valid(&self) -> bool {
        !self.module.is_empty() && !self.name.is_empty()
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.name)
    }
}

/// A named port or field: a non-empty-ish label plus its type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NamedDataType {
    pub name: String,
    pub ty: DataType,
}

impl NamedDataType {
    pub fn new(name: impl Into<String>, ty: DataType) -> NamedDataType {
        NamedDataType {
            name: name.into(),
            ty,
        }
    }

    pub fn valid(&self) -> bool {
        self.ty.valid()
    }
}

/// Split a `module:name` reference. The module part may itself contain
/// slashes and dots but never a colon, so the first colon is the divider.
pub fn parse_qualified_name(qualified: &str) -> Option<(&str, &str)> {
    let (module, name) = qualified.split_once(':')?;
    if module.is_empty() || name.is_empty() {
        return None;
    }
    Some((module, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_structural() {
        let a = DataType::new("lang", "i32");
        let b = DataType::new("lang", "i32");
        let c = DataType::new("lang", "f64");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn qualified_name_round_trips() {
        let ty = DataType::new("github.com/user/repo", "vec3");
        let qualified = ty.qualified_name();
        let (module, name) = parse_qualified_name(&qualified).unwrap();
        assert_eq!(module, "github.com/user/repo");
        assert_eq!(name, "vec3");
    }

    #[test]
    fn default_is_invalid() {
        assert!(!DataType::default().valid());
        assert!(DataType::new("lang", "i32").valid());
    }
}
