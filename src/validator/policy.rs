use std::collections::HashSet;

use crate::config::types::ValidatorConfig;

/// Immutable import/call policy shared by every validation.
///
/// Built once at startup from [`ValidatorConfig`] and handed to
/// [`validate`](crate::validator::validate) by reference.
#[derive(Debug, Clone)]
pub struct AllowList {
    allowed_imports: Vec<String>,
    forbidden_calls: HashSet<String>,
}

impl AllowList {
    pub fn new<I, F>(allowed_imports: I, forbidden_calls: F) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        Self {
            allowed_imports: allowed_imports.into_iter().map(Into::into).collect(),
            forbidden_calls: forbidden_calls.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &ValidatorConfig) -> Self {
        Self::new(
            config.allowed_imports.iter().cloned(),
            config.forbidden_calls.iter().cloned(),
        )
    }

    /// Whether `module` (possibly dotted) falls under an allowed entry.
    ///
    /// Prefixes only match on module boundaries: `matplotlib` covers
    /// `matplotlib.pyplot` but not `matplotlibx`.
    pub fn permits_import(&self, module: &str) -> bool {
        self.allowed_imports.iter().any(|entry| {
            module == entry
                || module
                    .strip_prefix(entry.as_str())
                    .is_some_and(|rest| rest.starts_with('.'))
        })
    }

    /// Whether a bare name (`eval`) or dotted path (`os.system`) is forbidden.
    pub fn forbids_call(&self, callee: &str) -> bool {
        self.forbidden_calls.contains(callee)
    }

    pub fn allowed_imports(&self) -> &[String] {
        &self.allowed_imports
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::from_config(&ValidatorConfig::default())
    }
}
