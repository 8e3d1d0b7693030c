//! Symbol name mangling for generated functions.
//!
//! A graph function's symbol is `<module_full_name>:<function_name>`.
//! Colons, slashes and dots are left intact — LLVM accepts them in symbol
//! names; embedders targeting stricter object formats can wrap these with
//! their own sanitiser. The mapping is bijective because a module full name
//! never contains a colon, so the last colon always splits the pair.

/// Mangle a (module, function) pair into a symbol name.
pub fn mangle_function_name(module_full_name: &str, function_name: &str) -> String {
    debug_assert!(!module_full_name.contains(':'));
    format!("{module_full_name}:{function_name}")
}

/// Recover the (module, function) pair from a mangled symbol, if it is one.
pub fn unmangle_function_name(mangled: &str) -> Option<(&str, &str)> {
    let (module, function) = mangled.rsplit_once(':')?;
    if module.is_empty() || function.is_empty() {
        return None;
    }
    Some((module, function))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let cases = [
            ("lang", "if"),
            ("test/main", "main"),
            ("github.com/user/repo/sub", "do_thing"),
            ("a.b.c/d_e", "f"),
        ];
        for (module, function) in cases {
            let mangled = mangle_function_name(module, function);
            assert_eq!(unmangle_function_name(&mangled), Some((module, function)));
        }
    }

    #[test]
    fn keeps_separators_intact() {
        assert_eq!(
            mangle_function_name("github.com/user/repo", "main"),
            "github.com/user/repo:main"
        );
    }

    #[test]
    fn rejects_non_mangled_names() {
        assert_eq!(unmangle_function_name("main"), None);
        assert_eq!(unmangle_function_name(":f"), None);
        assert_eq!(unmangle_function_name("mod:"), None);
    }
}
