use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Bounds an event tag type must satisfy to flow through the gateway.
pub trait EventTag: Serialize + DeserializeOwned + Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> EventTag for T where
    T: Serialize + DeserializeOwned + Eq + Hash + Clone + Debug + Send + Sync + 'static
{
}

/// Closed set of event tags the gateway forwards. An unrestricted registry
/// accepts every tag.
#[derive(Debug, Clone)]
pub struct EventRegistry<E> {
    allowed: Option<HashSet<E>>,
}

impl<E: Eq + Hash> EventRegistry<E> {
    pub fn unrestricted() -> Self {
        Self { allowed: None }
    }

    pub fn closed(tags: impl IntoIterator<Item = E>) -> Self {
        Self {
            allowed: Some(tags.into_iter().collect()),
        }
    }

    pub fn is_registered(&self, tag: &E) -> bool {
        match &self.allowed {
            Some(allowed) => allowed.contains(tag),
            None => true,
        }
    }

    pub fn is_restricted(&self) -> bool {
        self.allowed.is_some()
    }
}

impl<E: Eq + Hash> Default for EventRegistry<E> {
    fn default() -> Self {
        Self::unrestricted()
    }
}

impl EventRegistry<String> {
    /// Build a registry from a comma-separated tag list. A blank list means
    /// unrestricted.
    pub fn from_csv(list: &str) -> Self {
        let tags: Vec<String> = list
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if tags.is_empty() {
            Self::unrestricted()
        } else {
            Self::closed(tags)
        }
    }
}
