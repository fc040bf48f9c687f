//! Interception point registry.

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use cacheprobe_core::{auto_hook_name, Error, Result};

/// Name to register an interception point under.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HookName {
    /// First free `hook<N>`.
    #[default]
    Auto,
    /// Caller-supplied name.
    Named(String),
}

impl From<&str> for HookName {
    fn from(name: &str) -> Self {
        HookName::Named(name.to_string())
    }
}

impl From<String> for HookName {
    fn from(name: String) -> Self {
        HookName::Named(name)
    }
}

/// Which registrations to tear down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookTarget {
    /// Every registration.
    All,
    /// Exactly one registration.
    Named(String),
}

impl From<&str> for HookTarget {
    fn from(name: &str) -> Self {
        HookTarget::Named(name.to_string())
    }
}

/// Result of a registration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// A new point was bound under this name.
    Added(String),
    /// The name was taken; the earlier registration stays active.
    Existing(String),
}

impl Registration {
    /// Name of the active registration.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Registration::Added(n) | Registration::Existing(n) => n,
        }
    }

    /// Returns true if the request created a registration.
    #[must_use]
    pub fn is_added(&self) -> bool {
        matches!(self, Registration::Added(_))
    }
}

/// Registered interception points, name → submodule path.
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    hooks: IndexMap<String, String>,
}

impl HookRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a point on `submodule`. A taken name is a logged no-op.
    pub fn register(&mut self, submodule: &str, name: HookName) -> Registration {
        let name = match name {
            HookName::Auto => auto_hook_name(self.hooks.keys().map(String::as_str)),
            HookName::Named(n) => n,
        };

        if let Some(existing) = self.hooks.get(&name) {
            warn!(
                hook = %name,
                bound = %existing,
                requested = %submodule,
                "hook name already registered, ignoring"
            );
            return Registration::Existing(name);
        }

        debug!(hook = %name, %submodule, "registered hook");
        self.hooks.insert(name.clone(), submodule.to_string());
        Registration::Added(name)
    }

    /// Tears down registrations, returning how many were removed.
    pub fn remove(&mut self, target: HookTarget) -> Result<usize> {
        match target {
            HookTarget::All => {
                let removed = self.hooks.len();
                self.hooks.clear();
                info!("removed all {} hooks", removed);
                Ok(removed)
            }
            HookTarget::Named(name) => {
                self.hooks
                    .shift_remove(&name)
                    .ok_or_else(|| Error::UnknownHook(name.clone()))?;
                debug!(hook = %name, "removed hook");
                Ok(1)
            }
        }
    }

    /// Hook names bound to `submodule`, in registration order.
    pub fn hooks_for<'a>(&'a self, submodule: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.hooks
            .iter()
            .filter(move |(_, m)| m.as_str() == submodule)
            .map(|(n, _)| n.as_str())
    }

    /// Submodule a hook is bound to.
    #[must_use]
    pub fn submodule_of(&self, name: &str) -> Option<&str> {
        self.hooks.get(name).map(String::as_str)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hooks.keys().map(String::as_str)
    }

    /// Returns true if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    /// Number of registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_names_take_first_free_index() {
        let mut reg = HookRegistry::new();
        assert_eq!(reg.register("conv1", HookName::Auto).name(), "hook0");
        assert_eq!(reg.register("conv2", HookName::Auto).name(), "hook1");
        reg.remove("hook0".into()).unwrap();
        assert_eq!(reg.register("conv3", HookName::Auto).name(), "hook0");
    }

    #[test]
    fn test_duplicate_name_keeps_first_binding() {
        let mut reg = HookRegistry::new();
        assert!(reg.register("conv1", "stem".into()).is_added());
        let again = reg.register("conv2", "stem".into());

        assert_eq!(again, Registration::Existing("stem".to_string()));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.submodule_of("stem"), Some("conv1"));
    }

    #[test]
    fn test_remove_unknown_fails() {
        let mut reg = HookRegistry::new();
        assert!(matches!(
            reg.remove("nope".into()),
            Err(Error::UnknownHook(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_remove_all() {
        let mut reg = HookRegistry::new();
        reg.register("a", HookName::Auto);
        reg.register("b", HookName::Auto);
        assert_eq!(reg.remove(HookTarget::All).unwrap(), 2);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_hooks_for_submodule() {
        let mut reg = HookRegistry::new();
        reg.register("features.0", "first".into());
        reg.register("classifier", HookName::Auto);
        reg.register("features.0", "second".into());

        let bound: Vec<_> = reg.hooks_for("features.0").collect();
        assert_eq!(bound, vec!["first", "second"]);
    }
}
