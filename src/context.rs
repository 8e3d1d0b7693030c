//! The process-scoped compiler context.
//!
//! A [`Context`] owns the LLVM context, the set of loaded modules (always
//! including `lang`), the converter table, the pluggable artifact cache and
//! the optional module fetcher. A context and everything it owns belong to
//! one thread — LLVM contexts are thread-affine — but distinct contexts are
//! fully independent.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use crate::cache::{DefaultModuleCache, ModuleCache, NullModuleCache};
use crate::data_type::DataType;
use crate::diagnostics::Diagnostics;
use crate::fetcher::ModuleFetcher;
use crate::graph_module::GraphModule;
use crate::json::{graph_module_to_json, json_to_graph_module};
use crate::lang_module::{LangModule, LANG_MODULE_NAME};
use crate::module::ChiModule;
use crate::node_type::NodeType;

/// Marker file that makes a directory a workspace root.
pub const WORKSPACE_MARKER: &str = ".chigraphworkspace";

/// Cooperative cancellation for long compilations. The compiler checks the
/// token between nodes; in-flight node codegen runs to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Settings for [`Context::compile_module`].
#[derive(Debug, Clone, Default)]
pub struct CompileSettings {
    /// Serve and populate the artifact cache.
    pub use_cache: bool,
    /// Link every transitive dependency into the result; otherwise only
    /// declarations for external symbols are emitted.
    pub link_dependencies: bool,
    /// Optional cooperative cancellation token.
    pub cancel: Option<CancelToken>,
}

impl CompileSettings {
    /// Cache and link, the configuration the CLI uses.
    pub fn full() -> CompileSettings {
        CompileSettings {
            use_cache: true,
            link_dependencies: true,
            cancel: None,
        }
    }

    /// No cache, no linking; what tests and library embedders usually want
    /// for a single module.
    pub fn bare() -> CompileSettings {
        CompileSettings::default()
    }
}

pub struct Context {
    llvm: inkwell::context::Context,
    workspace: PathBuf,
    modules: Vec<ChiModule>,
    /// from qualified type -> to qualified type -> converter node type.
    type_converters: HashMap<String, HashMap<String, NodeType>>,
    module_cache: Box<dyn ModuleCache>,
    fetcher: Option<Box<dyn ModuleFetcher>>,
}

impl Context {
    /// Create a context rooted at the workspace containing `work_path` (or
    /// no workspace if none of its ancestors carry the marker file). The
    /// `lang` module is always loaded.
    pub fn new(work_path: impl AsRef<Path>) -> Context {
        let workspace = workspace_from_child(work_path.as_ref());
        let module_cache: Box<dyn ModuleCache> = if workspace.as_os_str().is_empty() {
            Box::new(NullModuleCache)
        } else {
            Box::new(DefaultModuleCache::new(workspace.join("lib")))
        };

        let mut ctx = Context {
            llvm: inkwell::context::Context::create(),
            workspace,
            modules: Vec::new(),
            type_converters: HashMap::new(),
            module_cache,
            fetcher: None,
        };
        let res = ctx.add_module(ChiModule::Lang(LangModule));
        debug_assert!(res.success());
        ctx
    }

    pub fn llvm(&self) -> &inkwell::context::Context {
        &self.llvm
    }

    pub fn workspace_path(&self) -> &Path {
        &self.workspace
    }

    pub fn has_workspace(&self) -> bool {
        !self.workspace.as_os_str().is_empty()
    }

    pub fn module_cache(&self) -> &dyn ModuleCache {
        &*self.module_cache
    }

    pub fn set_module_cache(&mut self, cache: Box<dyn ModuleCache>) {
        self.module_cache = cache;
    }

    pub fn set_fetcher(&mut self, fetcher: Box<dyn ModuleFetcher>) {
        self.fetcher = Some(fetcher);
    }

    // ------------------------------------------------------------------
    // Module access
    // ------------------------------------------------------------------

    pub fn modules(&self) -> &[ChiModule] {
        &self.modules
    }

    pub fn module_by_full_name(&self, full_name: &str) -> Option<&ChiModule> {
        self.modules.iter().find(|m| m.full_name() == full_name)
    }

    pub fn graph_module(&self, full_name: &str) -> Option<&GraphModule> {
        self.module_by_full_name(full_name)?.as_graph()
    }

    pub fn graph_module_mut(&mut self, full_name: &str) -> Option<&mut GraphModule> {
        self.modules
            .iter_mut()
            .find(|m| m.full_name() == full_name)?
            .as_graph_mut()
    }

    /// Create a new empty graph module. Fails with `E31` when the full name
    /// is taken.
    pub fn new_graph_module(&mut self, full_name: &str) -> Result<&mut GraphModule, Diagnostics> {
        let res = self.add_module(ChiModule::Graph(GraphModule::new(full_name)));
        res.into_result()?;
        Ok(self.graph_module_mut(full_name).unwrap())
    }

    /// Register a module, deduplicating on full name (`E31`) and recording
    /// any converter node types it offers.
    pub fn add_module(&mut self, module: ChiModule) -> Diagnostics {
        let mut res = Diagnostics::new();
        if self.module_by_full_name(module.full_name()).is_some() {
            res.add_entry(
                "E31",
                "Duplicate module full name",
                json!({ "Module Name": module.full_name() }),
            );
            return res;
        }

        for type_name in module.node_type_names() {
            // Node types that need real payloads fail to hydrate from null;
            // those can't be converters, so skip them quietly.
            let Ok(ty) = module.node_type_from_name(&type_name, &Value::Null) else {
                continue;
            };
            if !ty.converter {
                continue;
            }
            debug_assert!(ty.data_inputs.len() == 1 && ty.data_outputs.len() == 1);
            let from = ty.data_inputs[0].ty.qualified_name();
            let to = ty.data_outputs[0].ty.qualified_name();
            self.type_converters
                .entry(from)
                .or_default()
                .insert(to, ty);
        }

        info!(module = module.full_name(), "module registered");
        self.modules.push(module);
        res
    }

    /// Drop a module. Modules that depended on it keep their dependency
    /// records and will fail resolution until reloaded or edited.
    pub fn unload_module(&mut self, full_name: &str) -> bool {
        let Some(pos) = self
            .modules
            .iter()
            .position(|m| m.full_name() == full_name)
        else {
            return false;
        };
        self.modules.remove(pos);
        true
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Resolve a type by module full name and short name.
    pub fn type_from_module(&self, module: &str, name: &str) -> Result<DataType, Diagnostics> {
        let mut res = Diagnostics::new();
        let Some(found) = self.module_by_full_name(module) else {
            res.add_entry(
                "E30",
                "Could not find module",
                json!({ "module": module }),
            );
            return Err(res);
        };
        match found.type_from_name(name) {
            Some(ty) => Ok(ty),
            None => {
                res.add_entry(
                    "E37",
                    "Could not find type in module",
                    json!({ "type": name, "module": module }),
                );
                Err(res)
            }
        }
    }

    /// Hydrate a node type from a module, a type name, and a JSON payload.
    pub fn node_type_from_module(
        &self,
        module: &str,
        name: &str,
        data: &Value,
    ) -> Result<NodeType, Diagnostics> {
        let Some(found) = self.module_by_full_name(module) else {
            let mut res = Diagnostics::new();
            res.add_entry(
                "E30",
                "Could not find module",
                json!({ "module": module }),
            );
            return Err(res);
        };
        found.node_type_from_name(name, data)
    }

    /// Clone the registered converter for a type pair, or report
    /// `NoConverter`.
    pub fn create_converter_node_type(
        &self,
        from: &DataType,
        to: &DataType,
    ) -> Result<NodeType, Diagnostics> {
        self.type_converters
            .get(&from.qualified_name())
            .and_then(|table| table.get(&to.qualified_name()))
            .cloned()
            .ok_or_else(|| {
                let mut res = Diagnostics::new();
                res.add_entry(
                    "NoConverter",
                    "No converter for the requested type pair",
                    json!({
                        "From": from.qualified_name(),
                        "To": to.qualified_name(),
                    }),
                );
                res
            })
    }

    /// Every node instance of the given type across all loaded modules,
    /// as `(module full name, function name, node id)` locators.
    pub fn find_instances_of_type(
        &self,
        module: &str,
        type_name: &str,
    ) -> Vec<(String, String, uuid::Uuid)> {
        let mut found = Vec::new();
        for m in &self.modules {
            let Some(graph) = m.as_graph() else { continue };
            for func in graph.functions() {
                for id in func.nodes_with_type(module, type_name) {
                    found.push((graph.full_name().to_string(), func.name().to_string(), id));
                }
            }
        }
        found
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Resolve a module by full name: already loaded, then the workspace,
    /// then the fetcher. Dependencies load recursively; a dependency cycle
    /// stops the recursion and is completed by the outer call.
    pub fn load_module(&mut self, full_name: &str) -> Diagnostics {
        let mut visiting = HashSet::new();
        self.load_module_inner(full_name, &mut visiting)
    }

    fn load_module_inner(&mut self, full_name: &str, visiting: &mut HashSet<String>) -> Diagnostics {
        let mut res = Diagnostics::new();
        res.add_context(json!({ "Requested Module Name": full_name }));

        debug_assert!(!full_name.is_empty());

        if full_name == LANG_MODULE_NAME || self.module_by_full_name(full_name).is_some() {
            return res;
        }
        if !visiting.insert(full_name.to_string()) {
            // Mid-load already; module-level cycles are permitted.
            return res;
        }

        let bytes = match self.read_module_source(full_name) {
            Ok(bytes) => bytes,
            Err(err) => {
                res.append(err);
                return res;
            }
        };

        let parsed: Value = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => {
                res.add_entry(
                    "EUKN",
                    "Failed to parse module JSON",
                    json!({ "Error": e.to_string() }),
                );
                return res;
            }
        };

        res.append(self.add_module_from_json_inner(full_name, &parsed, visiting));
        res
    }

    fn read_module_source(&self, full_name: &str) -> Result<Vec<u8>, Diagnostics> {
        let mut res = Diagnostics::new();

        if self.has_workspace() {
            let path = self.module_source_path(full_name);
            if path.is_file() {
                return fs::read(&path).map_err(|e| {
                    res.add_entry(
                        "EUKN",
                        "Failed to read module file",
                        json!({ "Path": path.display().to_string(), "Error": e.to_string() }),
                    );
                    res
                });
            }
        }

        if let Some(fetcher) = &self.fetcher {
            match fetcher.fetch(full_name) {
                Ok(bytes) => {
                    // Persist fetched modules so subsequent loads come from
                    // the workspace.
                    if self.has_workspace() {
                        let path = self.module_source_path(full_name);
                        if let Some(parent) = path.parent() {
                            let _ = fs::create_dir_all(parent);
                        }
                        let _ = fs::write(&path, &bytes);
                    }
                    return Ok(bytes);
                }
                Err(e) => {
                    res.add_entry(
                        "E30",
                        "Failed to fetch module",
                        json!({ "module": full_name, "Error": e.to_string() }),
                    );
                    return Err(res);
                }
            }
        }

        res.add_entry(
            "E30",
            "Failed to find module",
            json!({
                "module": full_name,
                "Workspace Path": self.workspace.display().to_string(),
            }),
        );
        Err(res)
    }

    /// Where a module's JSON lives inside the workspace.
    pub fn module_source_path(&self, full_name: &str) -> PathBuf {
        self.workspace.join("src").join(format!("{full_name}.chimod"))
    }

    /// Register a module from in-memory JSON, loading its dependencies
    /// first.
    pub fn add_module_from_json(&mut self, full_name: &str, json: &Value) -> Diagnostics {
        let mut visiting = HashSet::new();
        visiting.insert(full_name.to_string());
        self.add_module_from_json_inner(full_name, json, &mut visiting)
    }

    fn add_module_from_json_inner(
        &mut self,
        full_name: &str,
        json: &Value,
        visiting: &mut HashSet<String>,
    ) -> Diagnostics {
        let mut res = Diagnostics::new();
        res.add_context(json!({ "Requested Module Name": full_name }));

        if self.module_by_full_name(full_name).is_some() {
            return res;
        }

        if let Some(deps) = json.get("dependencies").and_then(Value::as_array) {
            for dep in deps.iter().filter_map(Value::as_str) {
                res.append(self.load_module_inner(dep, visiting));
                if !res.success() {
                    return res;
                }
            }
        }

        match json_to_graph_module(self, json, full_name) {
            Ok(module) => res.append(self.add_module(ChiModule::Graph(module))),
            Err(err) => res.append(err),
        }
        res
    }

    /// Serialize a graph module to its workspace file.
    pub fn save_module_to_disk(&self, full_name: &str) -> Diagnostics {
        let mut res = Diagnostics::new();
        if !self.has_workspace() {
            res.add_entry("EUKN", "Cannot serialize without a workspace", json!({}));
            return res;
        }
        let Some(module) = self.graph_module(full_name) else {
            res.add_entry(
                "E30",
                "Could not find module",
                json!({ "module": full_name }),
            );
            return res;
        };

        let path = self.module_source_path(full_name);
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                res.add_entry(
                    "EUKN",
                    "Failed to create directories in workspace",
                    json!({ "Module File": path.display().to_string(), "Error": e.to_string() }),
                );
                return res;
            }
        }

        let json = graph_module_to_json(module);
        let pretty = serde_json::to_string_pretty(&json).expect("module JSON always serializes");
        if let Err(e) = fs::write(&path, pretty) {
            res.add_entry(
                "EUKN",
                "Failed to write module file",
                json!({ "Module File": path.display().to_string(), "Error": e.to_string() }),
            );
        }
        res
    }

    /// Modules present in the workspace `src/` tree, by full name.
    pub fn list_modules_in_workspace(&self) -> Vec<String> {
        let src = self.workspace.join("src");
        if !src.is_dir() {
            return Vec::new();
        }

        let mut found = Vec::new();
        let mut stack = vec![src.clone()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.extension().is_some_and(|e| e == "chimod") {
                    if let Ok(rel) = path.strip_prefix(&src) {
                        let mut name = rel.to_string_lossy().replace('\\', "/");
                        name.truncate(name.len() - ".chimod".len());
                        found.push(name);
                    }
                }
            }
        }
        found.sort();
        found
    }

    // ------------------------------------------------------------------
    // Structural hashing
    // ------------------------------------------------------------------

    /// Hash of a module's structure and its dependencies' hashes, keying
    /// the artifact cache. `None` when the module or a dependency is not
    /// loaded.
    pub fn module_hash(&self, full_name: &str) -> Option<String> {
        let mut stack = HashSet::new();
        self.module_hash_inner(full_name, &mut stack)
            .map(|h| h.to_hex().to_string())
    }

    fn module_hash_inner(
        &self,
        full_name: &str,
        stack: &mut HashSet<String>,
    ) -> Option<blake3::Hash> {
        let module = self.module_by_full_name(full_name)?;
        let mut hasher = blake3::Hasher::new();

        match module {
            ChiModule::Lang(_) => {
                hasher.update(b"lang:1");
            }
            ChiModule::Graph(graph) => {
                let json = graph_module_to_json(graph);
                hasher.update(&serde_json::to_vec(&json).expect("module JSON always serializes"));
            }
        }

        stack.insert(full_name.to_string());
        for dep in module.dependencies() {
            if stack.contains(&dep) {
                // Dependency cycle: fold in the name only, both directions
                // hash identically.
                hasher.update(b"cycle:");
                hasher.update(dep.as_bytes());
                continue;
            }
            let dep_hash = self.module_hash_inner(&dep, stack)?;
            hasher.update(dep_hash.as_bytes());
        }
        stack.remove(full_name);

        Some(hasher.finalize())
    }
}

/// Walk up from `path` until a directory containing the workspace marker is
/// found. Returns an empty path when there is none.
pub fn workspace_from_child(path: &Path) -> PathBuf {
    let mut current = path.to_path_buf();
    loop {
        if current.join(WORKSPACE_MARKER).is_file() {
            return current;
        }
        if !current.pop() {
            return PathBuf::new();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_always_has_lang() {
        let ctx = Context::new("");
        assert!(ctx.module_by_full_name("lang").is_some());
        assert!(!ctx.has_workspace());
    }

    #[test]
    fn duplicate_module_names_are_rejected() {
        let mut ctx = Context::new("");
        ctx.new_graph_module("test/main").unwrap();
        let err = ctx.new_graph_module("test/main").unwrap_err();
        assert!(err.has_code("E31"));
    }

    #[test]
    fn lang_types_resolve_through_the_context() {
        let ctx = Context::new("");
        let ty = ctx.type_from_module("lang", "i32").unwrap();
        assert_eq!(ty.qualified_name(), "lang:i32");

        let err = ctx.type_from_module("lang", "i64").unwrap_err();
        assert!(err.has_code("E37"));

        let err = ctx.type_from_module("nope", "i32").unwrap_err();
        assert!(err.has_code("E30"));
    }

    #[test]
    fn lang_converters_are_registered() {
        let ctx = Context::new("");
        let i32_ty = DataType::new("lang", "i32");
        let f64_ty = DataType::new("lang", "f64");

        let conv = ctx.create_converter_node_type(&i32_ty, &f64_ty).unwrap();
        assert_eq!(conv.name, "inttofloat");

        let i1 = DataType::new("lang", "i1");
        let err = ctx.create_converter_node_type(&i1, &f64_ty).unwrap_err();
        assert!(err.has_code("NoConverter"));
    }

    #[test]
    fn workspace_discovery_walks_parents() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(WORKSPACE_MARKER), "").unwrap();
        let child = dir.path().join("src").join("deep");
        fs::create_dir_all(&child).unwrap();

        let found = workspace_from_child(&child);
        assert_eq!(found, dir.path());

        let none = workspace_from_child(Path::new("/nonexistent/nowhere"));
        assert!(none.as_os_str().is_empty());
    }

    #[test]
    fn module_hash_changes_with_content() {
        let mut ctx = Context::new("");
        ctx.new_graph_module("test/a").unwrap();
        let before = ctx.module_hash("test/a").unwrap();

        {
            let m = ctx.graph_module_mut("test/a").unwrap();
            let (s, _) = m.get_or_create_struct("v");
            s.add_field(DataType::new("lang", "i32"), "x", usize::MAX);
        }
        let after = ctx.module_hash("test/a").unwrap();
        assert_ne!(before, after);
    }
}
