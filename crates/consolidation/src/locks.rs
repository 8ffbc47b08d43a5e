use results_sqlite::{Result, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// One mutex per scope target. Passes for the same target serialize; different targets
/// only contend on the store itself.
#[derive(Clone, Debug, Default)]
pub struct TargetLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl TargetLocks {
    pub fn handle(&self, scope_target_id: Uuid) -> Result<Arc<Mutex<()>>> {
        let mut map = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(map.entry(scope_target_id).or_default().clone())
    }

    /// Runs `f` while holding the target's lock.
    pub fn run<T>(&self, scope_target_id: Uuid, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = self.handle(scope_target_id)?;
        let out = {
            let _guard = lock.lock().map_err(|_| StoreError::Poisoned)?;
            f()
        };
        self.release(scope_target_id, lock)?;
        out
    }

    /// Drops the target's entry once nobody else holds or waits on it. Handles are only
    /// cloned under the map lock, so the count cannot grow while it is checked.
    fn release(&self, scope_target_id: Uuid, lock: Arc<Mutex<()>>) -> Result<()> {
        let mut map = self.inner.lock().map_err(|_| StoreError::Poisoned)?;
        if Arc::strong_count(&lock) == 2 {
            map.remove(&scope_target_id);
        }
        Ok(())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().map(|m| m.len()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_target_shares_one_mutex() {
        let locks = TargetLocks::default();
        let id = Uuid::now_v7();
        assert!(Arc::ptr_eq(&locks.handle(id).unwrap(), &locks.handle(id).unwrap()));
        assert!(!Arc::ptr_eq(&locks.handle(id).unwrap(), &locks.handle(Uuid::now_v7()).unwrap()));
    }

    #[test]
    fn run_returns_the_closure_result() {
        let locks = TargetLocks::default();
        let n = locks.run(Uuid::now_v7(), || Ok(41 + 1)).unwrap();
        assert_eq!(n, 42);
    }

    #[test]
    fn finished_runs_leave_no_entry_behind() {
        let locks = TargetLocks::default();
        for _ in 0..3 {
            locks.run(Uuid::now_v7(), || Ok(())).unwrap();
        }
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn entry_survives_while_another_caller_holds_it() {
        let locks = TargetLocks::default();
        let id = Uuid::now_v7();
        let held = locks.handle(id).unwrap();
        locks.run(id, || Ok(())).unwrap();
        assert_eq!(locks.len(), 1);
        assert!(Arc::ptr_eq(&held, &locks.handle(id).unwrap()));
    }
}
