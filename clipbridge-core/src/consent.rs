use std::collections::HashMap;

use crate::CoreError;

/// Synchronous string key/value storage scoped to the current user.
pub trait ConsentStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), CoreError>;
}

impl<S: ConsentStore + ?Sized> ConsentStore for Box<S> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), CoreError> {
        (**self).set(key, value)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryConsentStore {
    entries: HashMap<String, String>,
}

impl MemoryConsentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConsentStore for MemoryConsentStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), CoreError> {
        self.entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentFlag {
    pub warning_id: String,
    pub user_id: String,
}

impl ConsentFlag {
    pub fn storage_key(&self) -> String {
        format!("{}_{}", self.warning_id, self.user_id)
    }
}

/// One-time warnings, remembered per user.
///
/// Flags are only ever set here; resetting one is left to the user clearing
/// their storage.
#[derive(Debug)]
pub struct ConsentGate<S> {
    store: S,
    user_id: String,
}

impl<S: ConsentStore> ConsentGate<S> {
    pub fn new(store: S, user_id: impl Into<String>) -> Self {
        Self {
            store,
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn set_user(&mut self, user_id: impl Into<String>) {
        self.user_id = user_id.into();
    }

    pub fn has_been_warned(&self, warning_id: &str) -> bool {
        self.store.get(&self.flag(warning_id).storage_key()).is_some()
    }

    pub fn mark_warned(&mut self, warning_id: &str) -> Result<(), CoreError> {
        let key = self.flag(warning_id).storage_key();
        self.store.set(&key, "1")
    }

    /// Returns `true` the first time it is called for `warning_id`, marking
    /// the flag as it does so. A flag that cannot be persisted still lets the
    /// warning through this once.
    pub fn warn_once(&mut self, warning_id: &str) -> bool {
        if self.has_been_warned(warning_id) {
            return false;
        }
        if let Err(err) = self.mark_warned(warning_id) {
            tracing::warn!(warning_id, "failed to persist consent flag: {err}");
        }
        true
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn flag(&self, warning_id: &str) -> ConsentFlag {
        ConsentFlag {
            warning_id: warning_id.to_owned(),
            user_id: self.user_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WARNED_ABOUT_LARGE_COPY;

    #[test]
    fn warns_only_once_per_user() {
        let mut gate = ConsentGate::new(MemoryConsentStore::new(), "alice");
        assert!(gate.warn_once(WARNED_ABOUT_LARGE_COPY));
        assert!(!gate.warn_once(WARNED_ABOUT_LARGE_COPY));
        assert!(gate.has_been_warned(WARNED_ABOUT_LARGE_COPY));

        gate.set_user("bob");
        assert!(!gate.has_been_warned(WARNED_ABOUT_LARGE_COPY));
        assert!(gate.warn_once(WARNED_ABOUT_LARGE_COPY));
    }

    #[test]
    fn flag_is_stored_under_warning_and_user() {
        let mut gate = ConsentGate::new(MemoryConsentStore::new(), "alice");
        gate.mark_warned("warnedAboutLargeCopy").unwrap();
        gate.mark_warned("warnedAboutLargeCopy").unwrap();
        assert_eq!(
            gate.store().get("warnedAboutLargeCopy_alice").as_deref(),
            Some("1")
        );
    }
}
