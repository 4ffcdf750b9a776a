//! Ambient process environment seam

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

/// Process-level state the bridge reads and mutates between invocations
#[cfg_attr(test, mockall::automock)]
pub trait Environment: Send + fmt::Debug {
    /// Read a variable
    fn var(&self, name: &str) -> Option<String>;

    /// Set a variable, replacing any existing value
    fn set_var(&mut self, name: &str, value: &str);

    /// Remove a variable
    fn remove_var(&mut self, name: &str);

    /// Snapshot of every variable
    fn vars(&self) -> Vec<(String, String)>;

    /// Change the working directory
    fn set_current_dir(&mut self, path: &Path) -> io::Result<()>;
}

/// Whether `name` can be stored as an environment variable name
pub fn valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('=') && !name.contains('\0')
}

/// The real process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }

    fn set_var(&mut self, name: &str, value: &str) {
        std::env::set_var(name, value);
    }

    fn remove_var(&mut self, name: &str) {
        std::env::remove_var(name);
    }

    fn vars(&self) -> Vec<(String, String)> {
        std::env::vars().collect()
    }

    fn set_current_dir(&mut self, path: &Path) -> io::Result<()> {
        std::env::set_current_dir(path)
    }
}

/// In-memory environment for embedding hosts that must not touch the process
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryEnvironment {
    vars: BTreeMap<String, String>,
    current_dir: Option<PathBuf>,
}

impl MemoryEnvironment {
    /// Empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment pre-populated with `vars`
    pub fn with_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            current_dir: None,
        }
    }

    /// Last directory passed to [`Environment::set_current_dir`]
    pub fn current_dir(&self) -> Option<&Path> {
        self.current_dir.as_deref()
    }
}

impl Environment for MemoryEnvironment {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }

    fn set_var(&mut self, name: &str, value: &str) {
        self.vars.insert(name.to_string(), value.to_string());
    }

    fn remove_var(&mut self, name: &str) {
        self.vars.remove(name);
    }

    fn vars(&self) -> Vec<(String, String)> {
        self.vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn set_current_dir(&mut self, path: &Path) -> io::Result<()> {
        self.current_dir = Some(path.to_path_buf());
        Ok(())
    }
}
