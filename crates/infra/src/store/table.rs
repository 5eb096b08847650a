use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use medstock_core::{DomainError, DomainResult};

/// Lock a row, mapping poisoning to `conflict`.
pub fn lock_row<'a, V>(row: &'a Mutex<V>, what: &str) -> DomainResult<MutexGuard<'a, V>> {
    row.lock()
        .map_err(|_| DomainError::conflict(format!("{what} lock poisoned; retry")))
}

/// Rows keyed by id, each behind its own mutex.
///
/// The map lock is only held to find or insert a row; callers then lock the
/// row itself for the duration of their transaction.
#[derive(Debug)]
pub struct Table<K, V> {
    name: &'static str,
    rows: RwLock<HashMap<K, Arc<Mutex<V>>>>,
}

impl<K, V> Table<K, V>
where
    K: Copy + Eq + Hash + core::fmt::Display,
    V: Clone,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            rows: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn row(&self, key: K) -> DomainResult<Arc<Mutex<V>>> {
        let rows = self
            .rows
            .read()
            .map_err(|_| DomainError::conflict(format!("{} table lock poisoned", self.name)))?;
        rows.get(&key)
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("{} {key}", self.name)))
    }

    pub fn insert(&self, key: K, value: V) -> DomainResult<()> {
        let mut rows = self
            .rows
            .write()
            .map_err(|_| DomainError::conflict(format!("{} table lock poisoned", self.name)))?;
        if rows.contains_key(&key) {
            return Err(DomainError::conflict(format!("{} {key} already exists", self.name)));
        }
        rows.insert(key, Arc::new(Mutex::new(value)));
        Ok(())
    }

    /// Consistent copy of one row.
    pub fn snapshot(&self, key: K) -> DomainResult<V> {
        let row = self.row(key)?;
        let guard = lock_row(&row, self.name)?;
        Ok(guard.clone())
    }

    pub fn keys(&self) -> DomainResult<Vec<K>> {
        let rows = self
            .rows
            .read()
            .map_err(|_| DomainError::conflict(format!("{} table lock poisoned", self.name)))?;
        Ok(rows.keys().copied().collect())
    }

    /// Copy of every row; each row is locked briefly in turn.
    pub fn snapshots(&self) -> DomainResult<Vec<V>> {
        self.keys()?.into_iter().map(|k| self.snapshot(k)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medstock_core::{ErrorKind, LotId};

    #[test]
    fn duplicate_insert_conflicts() {
        let table: Table<LotId, u32> = Table::new("lot");
        let id = LotId::new();
        table.insert(id, 1).unwrap();
        assert_eq!(table.insert(id, 2).unwrap_err().kind(), ErrorKind::Conflict);
        assert_eq!(table.snapshot(id).unwrap(), 1);
    }

    #[test]
    fn missing_row_is_not_found() {
        let table: Table<LotId, u32> = Table::new("lot");
        assert_eq!(table.row(LotId::new()).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn poisoned_map_fails_scans() {
        let table: Table<LotId, u32> = Table::new("count");
        table.insert(LotId::new(), 1).unwrap();
        std::thread::scope(|s| {
            let _ = s
                .spawn(|| {
                    let _guard = table.rows.write().unwrap();
                    panic!("poison");
                })
                .join();
        });
        assert_eq!(table.keys().unwrap_err().kind(), ErrorKind::Conflict);
        assert_eq!(table.snapshots().unwrap_err().kind(), ErrorKind::Conflict);
    }

    #[test]
    fn poisoned_row_maps_to_conflict() {
        let row = Arc::new(Mutex::new(0u32));
        let poisoner = Arc::clone(&row);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert_eq!(lock_row(&row, "lot").unwrap_err().kind(), ErrorKind::Conflict);
    }
}
