//! Structured diagnostic accumulation.
//!
//! Compiler operations do not abort on the first problem; they collect
//! entries into a [`Diagnostics`] value that the caller inspects. Each entry
//! carries a short stable code, a human message, and a JSON context bag with
//! the specifics (node ids, port indices, type names).
//!
//! # Error codes
//!
//! The leading letter of a code determines its severity: `E` is an error,
//! `W` a warning, `I` informational. A [`Diagnostics`] is successful exactly
//! when it holds no error-severity entries.
//!
//! | Code  | Meaning |
//! |-------|---------|
//! | `E01` | missing entry node |
//! | `E22` | output port index out of range |
//! | `E23` | input port index out of range |
//! | `E24` | type mismatch on a data edge |
//! | `E25` | cycle among pure nodes |
//! | `E26` | execution cycle |
//! | `E27` | unconnected required data input |
//! | `E28` | data input fed by a node that has not yet executed |
//! | `E29` | unconnected exec output on a reachable node |
//! | `E30` | missing dependency / module |
//! | `E31` | duplicate module full name |
//! | `E32` | compilation cancelled |
//! | `E37` | type not found in module |
//! | `E47` | duplicate node id |
//! | `NoConverter` | no converter for a requested type pair |
//! | `EINT` | internal compiler error |
//! | `EUKN` | unknown / undocumented error — always a bug |
//!
//! The persistence layer uses `E1`–`E21` and `E38`–`E51` for malformed
//! module JSON (missing sections, bad endpoints, invalid UUIDs); `WUKN`
//! marks tolerated irregularities.

use std::fmt;

use serde_json::{json, Value};

/// Severity of a diagnostic entry, derived from the code's leading letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    fn from_code(code: &str) -> Severity {
        match code.as_bytes().first() {
            Some(b'W') => Severity::Warning,
            Some(b'I') => Severity::Info,
            // `NoConverter` and anything else unrecognized count as errors.
            _ => Severity::Error,
        }
    }
}

/// One accumulated entry: a stable code, an overview message that does not
/// vary between instances of the problem, and a JSON context bag that does.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: String,
    pub severity: Severity,
    pub message: String,
    pub context: Value,
}

/// Accumulator for diagnostics.
///
/// `res` is the conventional binding name. A fresh value is successful;
/// entries are added with [`add_entry`](Diagnostics::add_entry) and results
/// from callees merged with [`append`](Diagnostics::append). Context added
/// with [`add_context`](Diagnostics::add_context) is merged into every entry,
/// present and future, so call sites can tag a whole operation with
/// e.g. the function and module being processed.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
    context: Vec<Value>,
}

impl Diagnostics {
    pub fn new() -> Diagnostics {
        Diagnostics::default()
    }

    /// Add one entry. `data` must be a JSON object (or null).
    pub fn add_entry(&mut self, code: &str, overview: &str, data: Value) {
        debug_assert!(data.is_object() || data.is_null());
        let mut context = if data.is_null() { json!({}) } else { data };
        for extra in &self.context {
            merge_objects(&mut context, extra);
        }
        self.entries.push(Diagnostic {
            code: code.to_string(),
            severity: Severity::from_code(code),
            message: overview.to_string(),
            context,
        });
    }

    /// Merge `data` into every entry, present and future.
    pub fn add_context(&mut self, data: Value) {
        debug_assert!(data.is_object());
        for entry in &mut self.entries {
            merge_objects(&mut entry.context, &data);
        }
        self.context.push(data);
    }

    /// Merge another result into this one. The other result's entries pick
    /// up this result's context.
    pub fn append(&mut self, mut other: Diagnostics) {
        for entry in &mut other.entries {
            for extra in &self.context {
                merge_objects(&mut entry.context, extra);
            }
        }
        self.entries.append(&mut other.entries);
    }

    /// True when there are no error-severity entries.
    pub fn success(&self) -> bool {
        !self
            .entries
            .iter()
            .any(|e| e.severity == Severity::Error)
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when any entry carries the given code.
    pub fn has_code(&self, code: &str) -> bool {
        self.entries.iter().any(|e| e.code == code)
    }

    /// Convert into `Err(self)` when unsuccessful, for composing with `?`.
    pub fn into_result(self) -> Result<(), Diagnostics> {
        if self.success() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Render in the CLI form: one line per entry, context indented below.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let tag = match entry.severity {
                Severity::Error => "error",
                Severity::Warning => "warning",
                Severity::Info => "note",
            };
            out.push_str(&format!("{} [{}]: {}\n", tag, entry.code, entry.message));
            if let Ok(pretty) = serde_json::to_string_pretty(&entry.context) {
                for line in pretty.lines() {
                    out.push_str("    ");
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }
        out
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dump())
    }
}

fn merge_objects(target: &mut Value, extra: &Value) {
    if let (Some(target), Some(extra)) = (target.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            target.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_result_is_success() {
        let res = Diagnostics::new();
        assert!(res.success());
        assert!(res.is_empty());
    }

    #[test]
    fn warnings_do_not_fail() {
        let mut res = Diagnostics::new();
        res.add_entry("WUKN", "just a warning", json!({}));
        assert!(res.success());
        res.add_entry("E24", "now an error", json!({}));
        assert!(!res.success());
        assert!(res.has_code("E24"));
    }

    #[test]
    fn context_applies_to_existing_and_future_entries() {
        let mut res = Diagnostics::new();
        res.add_entry("EUKN", "first", json!({}));
        res.add_context(json!({"Module": "lang"}));
        res.add_entry("EUKN", "second", json!({}));
        for entry in res.entries() {
            assert_eq!(entry.context["Module"], "lang");
        }
    }

    #[test]
    fn append_merges_context() {
        let mut outer = Diagnostics::new();
        outer.add_context(json!({"Function": "main"}));

        let mut inner = Diagnostics::new();
        inner.add_entry("E27", "unconnected input", json!({"Port": 0}));
        outer.append(inner);

        assert!(!outer.success());
        let entry = &outer.entries()[0];
        assert_eq!(entry.context["Function"], "main");
        assert_eq!(entry.context["Port"], 0);
    }

    #[test]
    fn no_converter_counts_as_error() {
        let mut res = Diagnostics::new();
        res.add_entry("NoConverter", "no conversion", json!({}));
        assert!(!res.success());
    }
}
