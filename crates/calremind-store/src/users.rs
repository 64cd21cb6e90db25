//! Owner to recipient resolution.

use std::collections::HashMap;

use calremind_core::{OwnerId, Recipient};

use crate::store::BoxFuture;

/// Resolves the mail recipient for an event owner.
pub trait UserDirectory: Send + Sync {
    /// Returns the recipient for `owner`, or `None` if the owner is unknown.
    fn lookup<'a>(&'a self, owner: &'a OwnerId) -> BoxFuture<'a, Option<Recipient>>;
}

/// A fixed directory, loaded from configuration or built in tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserDirectory {
    users: HashMap<OwnerId, Recipient>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to register a user.
    #[must_use]
    pub fn with_user(mut self, owner: impl Into<OwnerId>, recipient: Recipient) -> Self {
        self.insert(owner, recipient);
        self
    }

    pub fn insert(&mut self, owner: impl Into<OwnerId>, recipient: Recipient) {
        self.users.insert(owner.into(), recipient);
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl FromIterator<(OwnerId, Recipient)> for InMemoryUserDirectory {
    fn from_iter<I: IntoIterator<Item = (OwnerId, Recipient)>>(iter: I) -> Self {
        Self {
            users: iter.into_iter().collect(),
        }
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn lookup<'a>(&'a self, owner: &'a OwnerId) -> BoxFuture<'a, Option<Recipient>> {
        let found = self.users.get(owner).cloned();
        Box::pin(async move { found })
    }
}
