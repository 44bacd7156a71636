//! In-process stores used by tests and local development.
//!
//! Refresh rows are grouped per owner in a `DashMap`; rotating or pruning an
//! owner's rows happens under that owner's entry guard only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use super::storage::{
    NewRefreshCredential, RefreshStore, StoreError, StoredRefreshCredential, UserRecord, UserStore,
};

#[derive(Debug, Default)]
pub struct MemoryRefreshStore {
    by_owner: DashMap<i64, Vec<StoredRefreshCredential>>,
}

impl MemoryRefreshStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows for `owner_id`, expired ones included.
    #[must_use]
    pub fn count_for_owner(&self, owner_id: i64) -> usize {
        self.by_owner.get(&owner_id).map_or(0, |rows| rows.len())
    }

    fn stored(credential: NewRefreshCredential) -> StoredRefreshCredential {
        StoredRefreshCredential {
            owner_id: credential.owner_id,
            lookup_key: credential.lookup_key,
            secret_hash: credential.secret_hash,
            expires_at: credential.expires_at,
            created_at: Utc::now(),
            last_used_at: credential.last_used_at,
        }
    }

    // Rows are kept oldest first, so pruning drops from the front.
    fn push_and_prune(
        rows: &mut Vec<StoredRefreshCredential>,
        credential: NewRefreshCredential,
        retention: usize,
    ) {
        rows.push(Self::stored(credential));
        if rows.len() > retention {
            let excess = rows.len() - retention;
            rows.drain(..excess);
        }
    }
}

#[async_trait]
impl RefreshStore for MemoryRefreshStore {
    async fn insert(
        &self,
        credential: NewRefreshCredential,
        retention: usize,
    ) -> Result<(), StoreError> {
        let mut rows = self.by_owner.entry(credential.owner_id).or_default();
        Self::push_and_prune(&mut rows, credential, retention);
        Ok(())
    }

    async fn find_by_lookup_key(
        &self,
        lookup_key: &str,
    ) -> Result<Vec<StoredRefreshCredential>, StoreError> {
        Ok(self
            .by_owner
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|row| row.lookup_key == lookup_key)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect())
    }

    async fn find_by_owner(
        &self,
        owner_id: i64,
    ) -> Result<Vec<StoredRefreshCredential>, StoreError> {
        let now = Utc::now();
        Ok(self.by_owner.get(&owner_id).map_or_else(Vec::new, |rows| {
            rows.iter()
                .rev()
                .filter(|row| row.expires_at > now)
                .cloned()
                .collect()
        }))
    }

    async fn rotate(
        &self,
        old_secret_hash: &str,
        replacement: NewRefreshCredential,
        retention: usize,
    ) -> Result<bool, StoreError> {
        let Some(mut rows) = self.by_owner.get_mut(&replacement.owner_id) else {
            return Ok(false);
        };
        let Some(index) = rows
            .iter()
            .position(|row| row.secret_hash == old_secret_hash)
        else {
            return Ok(false);
        };
        rows.remove(index);
        Self::push_and_prune(&mut rows, replacement, retention);
        Ok(true)
    }

    async fn delete_by_hash(&self, secret_hash: &str) -> Result<bool, StoreError> {
        let mut deleted = false;
        for mut entry in self.by_owner.iter_mut() {
            let before = entry.len();
            entry.retain(|row| row.secret_hash != secret_hash);
            deleted |= entry.len() != before;
        }
        Ok(deleted)
    }

    async fn delete_all_by_owner(&self, owner_id: i64) -> Result<u64, StoreError> {
        Ok(self
            .by_owner
            .remove(&owner_id)
            .map_or(0, |(_, rows)| rows.len() as u64))
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut pruned = 0_u64;
        for mut entry in self.by_owner.iter_mut() {
            let before = entry.len();
            entry.retain(|row| row.expires_at > now);
            pruned += (before - entry.len()) as u64;
        }
        Ok(pruned)
    }
}

#[derive(Debug, Default)]
pub struct MemoryUserStore {
    users: DashMap<String, UserRecord>,
    next_id: AtomicI64,
}

impl MemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.get(username).map(|user| user.clone()))
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .users
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.value().clone()))
    }

    async fn create(&self, username: &str, password_hash: &str) -> Result<UserRecord, StoreError> {
        match self.users.entry(username.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(StoreError::UsernameTaken),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let user = UserRecord {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed) + 1,
                    username: username.to_string(),
                    password_hash: password_hash.to_string(),
                };
                slot.insert(user.clone());
                Ok(user)
            }
        }
    }

    async fn update_password(&self, id: i64, password_hash: &str) -> Result<(), StoreError> {
        for mut entry in self.users.iter_mut() {
            if entry.id == id {
                entry.password_hash = password_hash.to_string();
            }
        }
        Ok(())
    }
}
