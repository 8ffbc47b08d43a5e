use crate::{Db, Result, StoreError};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Cloneable handle over one SQLite connection, shared by the server, the engine and
/// the orchestrator. Every access holds the lock for one closure and never across an await.
#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Db>>,
}

impl Store {
    pub fn new(db: Db) -> Self {
        Store { db: Arc::new(Mutex::new(db)) }
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Store::new(Db::open_or_create(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Store::new(Db::open_in_memory()?))
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut Db) -> Result<T>) -> Result<T> {
        let mut guard = self.db.lock().map_err(|_| StoreError::Poisoned)?;
        f(&mut guard)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}
