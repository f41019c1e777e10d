//! Dependency sources
//!
//! A dependency is a name that refers to a task if one is registered under it,
//! otherwise to a file. Sources are evaluated on every build so glob based
//! dependencies pick up newly created files.

use std::sync::Arc;

use crate::error::{MkrunError, Result};

/// Access to the dependency names of a task.
pub trait Dependencies: Send + Sync {
    fn get(&self) -> Result<Vec<String>>;
}

impl<D: Dependencies + ?Sized> Dependencies for Arc<D> {
    fn get(&self) -> Result<Vec<String>> {
        (**self).get()
    }
}

/// A fixed list of dependency names.
#[derive(Debug, Clone, Default)]
pub struct StaticDependencies(pub Vec<String>);

impl StaticDependencies {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }
}

impl Dependencies for StaticDependencies {
    fn get(&self) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// Dependencies computed only when the task is built.
#[derive(Clone)]
pub struct DependencyFn(Arc<dyn Fn() -> Result<Vec<String>> + Send + Sync>);

impl DependencyFn {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> Result<Vec<String>> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }
}

impl Dependencies for DependencyFn {
    fn get(&self) -> Result<Vec<String>> {
        (self.0)()
    }
}

/// Files matching a glob pattern; `**` matches across directories.
pub fn glob_files(pattern: impl Into<String>) -> DependencyFn {
    let pattern = pattern.into();
    DependencyFn::new(move || {
        let paths = glob::glob(&pattern).map_err(|e| MkrunError::Glob {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;

        let mut files = Vec::new();
        for entry in paths {
            let path = entry.map_err(|e| MkrunError::Glob {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
            files.push(path.to_string_lossy().into_owned());
        }
        Ok(files)
    })
}

/// Concatenation of several sources; the first failing source aborts.
#[derive(Clone, Default)]
pub struct DependenciesList(Vec<Arc<dyn Dependencies>>);

impl DependenciesList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, deps: impl Dependencies + 'static) -> Self {
        self.0.push(Arc::new(deps));
        self
    }

    pub fn push(&mut self, deps: Arc<dyn Dependencies>) {
        self.0.push(deps);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Dependencies for DependenciesList {
    fn get(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for deps in &self.0 {
            names.extend(deps.get()?);
        }
        Ok(names)
    }
}

/// Dependencies of the targets of a multi-target task.
pub trait TargetDependencies: Send + Sync {
    fn for_target(&self, name: &str) -> Arc<dyn Dependencies>;
}

impl TargetDependencies for StaticDependencies {
    fn for_target(&self, _name: &str) -> Arc<dyn Dependencies> {
        Arc::new(self.clone())
    }
}

impl TargetDependencies for DependencyFn {
    fn for_target(&self, _name: &str) -> Arc<dyn Dependencies> {
        Arc::new(self.clone())
    }
}

impl TargetDependencies for DependenciesList {
    fn for_target(&self, _name: &str) -> Arc<dyn Dependencies> {
        Arc::new(self.clone())
    }
}

/// Templates where `{name}` is replaced by the target name.
#[derive(Debug, Clone, Default)]
pub struct NameFormat(pub Vec<String>);

impl NameFormat {
    pub fn new<I, S>(templates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(templates.into_iter().map(Into::into).collect())
    }
}

impl TargetDependencies for NameFormat {
    fn for_target(&self, name: &str) -> Arc<dyn Dependencies> {
        Arc::new(StaticDependencies(
            self.0.iter().map(|t| t.replace("{name}", name)).collect(),
        ))
    }
}

/// Build each target's dependencies with a function of its name.
#[derive(Clone)]
pub struct TargetDependencyFn(Arc<dyn Fn(&str) -> Arc<dyn Dependencies> + Send + Sync>);

impl TargetDependencyFn {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str) -> Arc<dyn Dependencies> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }
}

impl TargetDependencies for TargetDependencyFn {
    fn for_target(&self, name: &str) -> Arc<dyn Dependencies> {
        (self.0)(name)
    }
}

/// Several multi-target sources concatenated per target.
#[derive(Clone, Default)]
pub struct TargetDependencyList(Vec<Arc<dyn TargetDependencies>>);

impl TargetDependencyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, deps: impl TargetDependencies + 'static) -> Self {
        self.0.push(Arc::new(deps));
        self
    }
}

impl TargetDependencies for TargetDependencyList {
    fn for_target(&self, name: &str) -> Arc<dyn Dependencies> {
        let mut list = DependenciesList::new();
        for deps in &self.0 {
            list.push(deps.for_target(name));
        }
        Arc::new(list)
    }
}
