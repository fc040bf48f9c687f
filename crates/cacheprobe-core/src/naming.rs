//! Canonical artifact names.

use std::collections::HashMap;

/// Parameter artifact name: `<model>_<ident with '.' replaced by '_'>`.
///
/// Path separators become `_` as well, so the name is always a single file
/// name inside the artifact directory.
#[must_use]
pub fn param_artifact_name(model: &str, ident: &str) -> String {
    format!("{}_{}", model, ident.replace('.', "_")).replace(['/', '\\'], "_")
}

/// Hands out `<base>_output<N>` names, N counting captures per base name.
#[derive(Debug, Clone, Default)]
pub struct OutputNamer {
    counters: HashMap<String, usize>,
}

impl OutputNamer {
    /// Creates a namer with no names issued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues the next name for `base`.
    pub fn next_name(&mut self, base: &str) -> String {
        let counter = self.counters.entry(base.to_string()).or_insert(0);
        let name = format!("{base}_output{counter}");
        *counter += 1;
        name
    }

    /// Number of names issued for `base`.
    #[must_use]
    pub fn issued(&self, base: &str) -> usize {
        self.counters.get(base).copied().unwrap_or(0)
    }

    /// Returns true if no name has been issued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Forgets every counter.
    pub fn clear(&mut self) {
        self.counters.clear();
    }
}

/// First `hook<N>` not present in `taken`.
pub fn auto_hook_name<'a>(taken: impl Iterator<Item = &'a str> + Clone) -> String {
    (0..)
        .map(|i| format!("hook{i}"))
        .find(|candidate| !taken.clone().any(|t| t == candidate))
        .unwrap_or_default()
}
