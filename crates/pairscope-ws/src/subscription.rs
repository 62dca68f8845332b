//! Subscription set management.
//!
//! Tracks the full token-id set the session must be subscribed to, so
//! a reconnect can restore everything before any event is delivered.
//! Mutations are serialized by the owning session loop.

use parking_lot::RwLock;
use std::collections::BTreeSet;

/// Current subscription set for one stream session.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    tokens: RwLock<BTreeSet<String>>,
}

impl SubscriptionManager {
    pub fn new(initial: impl IntoIterator<Item = String>) -> Self {
        Self {
            tokens: RwLock::new(initial.into_iter().collect()),
        }
    }

    /// Add tokens; returns the ones that were not already present.
    pub fn add(&self, tokens: &[String]) -> Vec<String> {
        let mut set = self.tokens.write();
        tokens
            .iter()
            .filter(|t| set.insert((*t).clone()))
            .cloned()
            .collect()
    }

    /// Remove tokens; returns the ones that were actually present.
    pub fn remove(&self, tokens: &[String]) -> Vec<String> {
        let mut set = self.tokens.write();
        tokens.iter().filter(|t| set.remove(*t)).cloned().collect()
    }

    /// Snapshot of the full current set.
    pub fn current(&self) -> Vec<String> {
        self.tokens.read().iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_reports_only_new() {
        let subs = SubscriptionManager::new(["a".to_string()]);
        let added = subs.add(&["a".to_string(), "b".to_string()]);
        assert_eq!(added, vec!["b".to_string()]);
        assert_eq!(subs.current().len(), 2);
    }

    #[test]
    fn test_remove_reports_only_present() {
        let subs = SubscriptionManager::new(["a".to_string(), "b".to_string()]);
        let removed = subs.remove(&["b".to_string(), "c".to_string()]);
        assert_eq!(removed, vec!["b".to_string()]);
        assert_eq!(subs.current(), vec!["a".to_string()]);
    }
}
