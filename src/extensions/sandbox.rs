//! Restricted Rhai runtime for extension handlers.
//!
//! Every invocation compiles the handler into a fresh engine and scope, so
//! nothing survives between calls and nothing leaks between extensions.
//! Scripts only reach the host through [`super::host`].

use super::host;
use crate::error::ExtensionError;
use crate::output;
use rhai::module_resolvers::FileModuleResolver;
use rhai::{AST, Dynamic, Engine, FuncArgs, Scope};
use std::path::{Path, PathBuf};

const MAX_CALL_LEVELS: usize = 64;
const MAX_EXPR_DEPTH: usize = 128;
const MAX_FN_EXPR_DEPTH: usize = 64;
const MAX_MODULES: usize = 32;

/// Build the engine an extension's handler runs in.
pub fn engine_for(ext_id: &str, ext_dir: &Path) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_call_levels(MAX_CALL_LEVELS);
    engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_FN_EXPR_DEPTH);
    engine.set_max_modules(MAX_MODULES);
    engine.disable_symbol("eval");

    // `import` resolves relative to the extension directory
    engine.set_module_resolver(FileModuleResolver::new_with_path(ext_dir));

    let id = ext_id.to_string();
    engine.on_print(move |s| output::detail(&format!("[{}] {}", id, s)));
    let id = ext_id.to_string();
    engine.on_debug(move |s, _, _| output::detail(&format!("[{}:debug] {}", id, s)));

    host::register_all(&mut engine, ext_id);
    engine
}

/// A compiled handler script together with the engine that compiled it.
pub struct Script {
    id: String,
    engine: Engine,
    ast: AST,
}

impl Script {
    /// Compile `handler` (relative to `ext_dir`) for extension `id`.
    pub fn load(id: &str, ext_dir: &Path, handler: &Path) -> Result<Self, ExtensionError> {
        let path = resolve_handler(id, ext_dir, handler)?;
        let engine = engine_for(id, ext_dir);
        let ast = engine
            .compile_file(path.clone())
            .map_err(|e| ExtensionError::Handler {
                id: id.to_string(),
                entry: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            id: id.to_string(),
            engine,
            ast,
        })
    }

    /// First of `names` the script defines.
    pub fn entry<'n>(&self, names: &[&'n str]) -> Option<&'n str> {
        names
            .iter()
            .copied()
            .find(|name| self.ast.iter_functions().any(|f| f.name == *name))
    }

    /// Call `entry` in a new scope.
    pub fn call(&self, entry: &str, args: impl FuncArgs) -> Result<Dynamic, ExtensionError> {
        let mut scope = Scope::new();
        self.engine
            .call_fn::<Dynamic>(&mut scope, &self.ast, entry, args)
            .map_err(|e| ExtensionError::Handler {
                id: self.id.clone(),
                entry: entry.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Join and verify the handler stays inside the extension directory.
fn resolve_handler(id: &str, ext_dir: &Path, handler: &Path) -> Result<PathBuf, ExtensionError> {
    let joined = ext_dir.join(handler);
    let canonical = joined
        .canonicalize()
        .map_err(|e| ExtensionError::Manifest {
            id: id.to_string(),
            reason: format!("handler {} not readable: {}", joined.display(), e),
        })?;
    let root = ext_dir.canonicalize().map_err(|source| ExtensionError::Io {
        path: ext_dir.to_path_buf(),
        source,
    })?;
    if !canonical.starts_with(&root) {
        return Err(ExtensionError::Manifest {
            id: id.to_string(),
            reason: format!("handler {} is outside the extension", handler.display()),
        });
    }
    Ok(canonical)
}
