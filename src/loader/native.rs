//! Native (dynamic-library) import resolution: `VIUA_LIBRARY_PATH`
//! (preferred) falling back to legacy `VIUAPATH`, both colon-separated.

use std::path::PathBuf;

use libloading::{Library, Symbol};
use thiserror::Error;

/// A foreign function loaded from a native module, keyed by its exported
/// name. The signature matches the foreign-function ABI: the actual
/// calling convention is applied by `process::dispatch` when it invokes
/// this through the FFI scheduler pool.
pub type ForeignFunction = unsafe extern "C" fn();

#[derive(Debug, Error)]
pub enum NativeLoadError {
    #[error("module {0} not found on the configured search path")]
    NotFound(String),
    #[error("failed to load library {path:?}: {source}")]
    Load { path: PathBuf, source: libloading::Error },
    #[error("library {0} has no `exports` symbol")]
    MissingExports(PathBuf),
}

/// A loaded dynamic library and the foreign functions it exports, kept
/// alive process-wide until Kernel shutdown (dropping the `Library`
/// unloads it, which must not happen while a foreign function from it is
/// still reachable).
pub struct NativeModule {
    _library: Library,
    functions: Vec<(String, ForeignFunction)>,
}

impl NativeModule {
    /// Functions this module exports, by name.
    pub fn functions(&self) -> &[(String, ForeignFunction)] {
        &self.functions
    }
}

fn search_paths() -> Vec<PathBuf> {
    let from_env = |var: &str| {
        std::env::var(var)
            .ok()
            .map(|value| value.split(':').map(PathBuf::from).collect::<Vec<_>>())
            .unwrap_or_default()
    };
    let mut paths = from_env("VIUA_LIBRARY_PATH");
    if paths.is_empty() {
        paths = from_env("VIUAPATH");
    }
    paths
}

fn candidate_file_name(module: &str) -> String {
    format!("{module}.so")
}

/// Resolve `module` through the configured search path and register every
/// function its `exports()` entry point reports.
///
/// # Safety
/// Loading and calling into an arbitrary shared object is inherently
/// unsafe: the library's `exports` symbol must actually have the
/// null-terminated `{name_cstr, function_pointer}` array shape the ABI
/// promises.
pub unsafe fn resolve_native_module(module: &str) -> Result<NativeModule, NativeLoadError> {
    let mut last_error = None;
    for dir in search_paths() {
        let path = dir.join(candidate_file_name(module));
        if !path.is_file() {
            continue;
        }
        match Library::new(&path) {
            Ok(library) => {
                let functions = read_exports(&library, &path)?;
                return Ok(NativeModule { _library: library, functions });
            }
            Err(source) => last_error = Some(NativeLoadError::Load { path, source }),
        }
    }
    Err(last_error.unwrap_or_else(|| NativeLoadError::NotFound(module.to_owned())))
}

unsafe fn read_exports(library: &Library, path: &std::path::Path) -> Result<Vec<(String, ForeignFunction)>, NativeLoadError> {
    let exports: Symbol<unsafe extern "C" fn() -> *const ExportRecord> = library
        .get(b"exports\0")
        .map_err(|_| NativeLoadError::MissingExports(path.to_owned()))?;
    let mut functions = Vec::new();
    let mut cursor = exports();
    while !(*cursor).name.is_null() {
        let name = std::ffi::CStr::from_ptr((*cursor).name).to_string_lossy().into_owned();
        functions.push((name, (*cursor).function));
        cursor = cursor.add(1);
    }
    Ok(functions)
}

/// Mirrors the foreign-function-spec record a native module's `exports()`
/// returns: a null-terminated array of `{name_cstr, function_pointer}`.
#[repr(C)]
struct ExportRecord {
    name: *const std::os::raw::c_char,
    function: ForeignFunction,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_search_path_yields_not_found() {
        std::env::remove_var("VIUA_LIBRARY_PATH");
        std::env::remove_var("VIUAPATH");
        let result = unsafe { resolve_native_module("nonexistent_module_xyz") };
        assert!(matches!(result, Err(NativeLoadError::NotFound(_))));
    }
}
