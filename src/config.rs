//! Environment-driven runtime configuration, constructed once at Kernel
//! bootstrap (mirrors the named-constants-plus-builder pattern used for the
//! few runtime-tunable knobs).

/// Default instruction budget granted to a process per scheduling quantum.
pub const DEFAULT_QUANTUM: usize = 256;

/// Runtime-tunable knobs read from the process environment at startup.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of process-scheduler workers. Defaults to the physical core
    /// count (`num_cpus::get_physical`) when `VIUA_VP_SCHEDULERS` is unset
    /// or unparsable.
    pub scheduler_workers: usize,
    /// Instructions granted per quantum before a process yields its worker.
    pub quantum: usize,
    /// Colon-separated native-library search path, `VIUA_LIBRARY_PATH`
    /// preferred, falling back to legacy `VIUAPATH`.
    pub library_path: Vec<String>,
    /// Modules to dynamically link (native libraries) eagerly at startup.
    pub prelink: Vec<String>,
    /// Modules to import (Viua libraries) eagerly at startup.
    pub preimport: Vec<String>,
}

fn colon_separated(var: &str) -> Vec<String> {
    std::env::var(var)
        .ok()
        .map(|value| value.split(':').filter(|s| !s.is_empty()).map(str::to_owned).collect())
        .unwrap_or_default()
}

impl RuntimeConfig {
    /// Build configuration from the process environment, applying defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let scheduler_workers = std::env::var("VIUA_VP_SCHEDULERS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or_else(num_cpus::get);

        let mut library_path = colon_separated("VIUA_LIBRARY_PATH");
        if library_path.is_empty() {
            library_path = colon_separated("VIUAPATH");
        }

        Self {
            scheduler_workers,
            quantum: DEFAULT_QUANTUM,
            library_path,
            prelink: colon_separated("VIUAPRELINK"),
            preimport: colon_separated("VIUAPREIMPORT"),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scheduler_workers: num_cpus::get(),
            quantum: DEFAULT_QUANTUM,
            library_path: Vec::new(),
            prelink: Vec::new(),
            preimport: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn library_path_prefers_new_variable_over_legacy() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("VIUA_LIBRARY_PATH", "/a:/b");
        std::env::set_var("VIUAPATH", "/legacy");
        let config = RuntimeConfig::from_env();
        assert_eq!(config.library_path, vec!["/a".to_owned(), "/b".to_owned()]);
        std::env::remove_var("VIUA_LIBRARY_PATH");
        std::env::remove_var("VIUAPATH");
    }

    #[test]
    fn unset_scheduler_count_falls_back_to_cpu_count() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("VIUA_VP_SCHEDULERS");
        let config = RuntimeConfig::from_env();
        assert!(config.scheduler_workers > 0);
    }
}
