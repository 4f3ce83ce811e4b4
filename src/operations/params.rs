use std::collections::BTreeMap;

/// Parameters extracted from a task description, before sandbox validation.
///
/// Paths are kept as raw text (absolute, or relative to the sandbox root);
/// the executor turns them into [`crate::sandbox::ValidatedParams`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskParams {
    paths: BTreeMap<&'static str, String>,
    values: BTreeMap<&'static str, String>,
}

impl TaskParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(mut self, name: &'static str, path: impl Into<String>) -> Self {
        self.paths.insert(name, path.into());
        self
    }

    pub fn with_value(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(name, value.into());
        self
    }

    pub fn path(&self, name: &str) -> Option<&str> {
        self.paths.get(name).map(String::as_str)
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn path_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.paths.keys().copied()
    }

    pub fn value_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.values.keys().copied()
    }

    pub(crate) fn into_parts(
        self,
    ) -> (BTreeMap<&'static str, String>, BTreeMap<&'static str, String>) {
        (self.paths, self.values)
    }
}
