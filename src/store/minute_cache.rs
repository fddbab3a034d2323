//! In-memory hot overlay for the current trading day's minute snapshots
//! (§4.4 of the design).
//!
//! The original mixed this into the archive's type system by duck-typing a
//! `DictStore` namespace as if it were an HDF5 group
//! (`original_source/datafeed/imiguserver.py`'s `MinuteSnapshotCache`). Here
//! [`MinuteStoreBackend`] is a proper trait with two implementations:
//! [`MinuteCache`] (memory-backed, today's hot overlay) and
//! [`FileMinuteStore`] (backed by the persisted array store, for any other
//! day). [`StoreManager::get_minute_store_at`](crate::store::manager::StoreManager::get_minute_store_at)
//! picks between them.

use chrono::NaiveDate;

use crate::error::Result;
use crate::store::array_store::ArrayStoreBackend;
use crate::types::MinuteSnap;

/// The minute-snapshot slice interface shared by the memory- and
/// file-backed stores.
pub trait MinuteStoreBackend {
    fn date(&self) -> NaiveDate;
    fn create_dataset(&mut self, symbol: &str, len: usize);
    fn get(&self, symbol: &str) -> Option<Vec<MinuteSnap>>;
    fn set(&mut self, symbol: &str, rows: Vec<MinuteSnap>);
    fn set_row(&mut self, symbol: &str, len: usize, index: usize, row: MinuteSnap);
    fn delete(&mut self, symbol: &str);
    /// Symbols currently resident, for the scheduler's `archive_minute` scan.
    fn symbols(&self) -> Vec<String>;
    fn is_empty(&self) -> bool;
}

/// The write-hot, memory-backed overlay for `date`'s minute snapshots.
pub struct MinuteCache {
    date: NaiveDate,
    symbols: std::collections::BTreeMap<String, Vec<MinuteSnap>>,
}

impl MinuteCache {
    pub fn new(date: NaiveDate) -> MinuteCache {
        MinuteCache {
            date,
            symbols: std::collections::BTreeMap::new(),
        }
    }

    /// Drain this cache into `destination`'s minsnap archive under this
    /// cache's own date, and flush it. Per-symbol write failures are logged
    /// and skipped rather than aborting the whole rotation; a symbol whose
    /// copy fails stays in the cache and is retried on the next rotation.
    ///
    /// Each array is already fixed-shape and index-aligned to the session's
    /// compressed minute axis, so it's copied verbatim by position — never
    /// through a path that rederives positions from row timestamps, which
    /// would scatter zero-padded rows (`time == 0`) onto the wrong date.
    pub fn rotate(&mut self, destination: &mut dyn ArrayStoreBackend) -> Result<()> {
        let symbols: Vec<String> = self.symbols.keys().cloned().collect();
        for symbol in symbols {
            let Some(rows) = self.symbols.get(&symbol).cloned() else {
                continue;
            };
            if let Err(err) = destination.put_minsnap(self.date, &symbol, rows) {
                tracing::warn!(symbol = %symbol, error = %err, "minute cache rotation: copy failed, retaining entry");
                continue;
            }
            self.symbols.remove(&symbol);
        }
        destination.flush()
    }
}

impl MinuteStoreBackend for MinuteCache {
    fn date(&self) -> NaiveDate {
        self.date
    }

    fn create_dataset(&mut self, symbol: &str, len: usize) {
        self.symbols
            .entry(symbol.to_string())
            .or_insert_with(|| vec![MinuteSnap::ZERO; len]);
    }

    fn get(&self, symbol: &str) -> Option<Vec<MinuteSnap>> {
        self.symbols.get(symbol).cloned()
    }

    fn set(&mut self, symbol: &str, rows: Vec<MinuteSnap>) {
        self.symbols.insert(symbol.to_string(), rows);
    }

    fn set_row(&mut self, symbol: &str, len: usize, index: usize, row: MinuteSnap) {
        let arr = self
            .symbols
            .entry(symbol.to_string())
            .or_insert_with(|| vec![MinuteSnap::ZERO; len]);
        if arr.len() != len {
            *arr = vec![MinuteSnap::ZERO; len];
        }
        let idx = index.min(len.saturating_sub(1));
        arr[idx] = row;
    }

    fn delete(&mut self, symbol: &str) {
        self.symbols.remove(symbol);
    }

    fn symbols(&self) -> Vec<String> {
        self.symbols.keys().cloned().collect()
    }

    fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// Delegating blanket impl so a `&mut MinuteCache` (or any other mutable
/// borrow of a backend) can be boxed as `Box<dyn MinuteStoreBackend>`.
impl<T: MinuteStoreBackend + ?Sized> MinuteStoreBackend for &mut T {
    fn date(&self) -> NaiveDate {
        (**self).date()
    }

    fn create_dataset(&mut self, symbol: &str, len: usize) {
        (**self).create_dataset(symbol, len)
    }

    fn get(&self, symbol: &str) -> Option<Vec<MinuteSnap>> {
        (**self).get(symbol)
    }

    fn set(&mut self, symbol: &str, rows: Vec<MinuteSnap>) {
        (**self).set(symbol, rows)
    }

    fn set_row(&mut self, symbol: &str, len: usize, index: usize, row: MinuteSnap) {
        (**self).set_row(symbol, len, index, row)
    }

    fn delete(&mut self, symbol: &str) {
        (**self).delete(symbol)
    }

    fn symbols(&self) -> Vec<String> {
        (**self).symbols()
    }

    fn is_empty(&self) -> bool {
        (**self).is_empty()
    }
}

/// A read-mostly view over an already-archived day, implemented on top of
/// the persistent [`ArrayStoreBackend`]'s minsnap group.
pub struct FileMinuteStore<'a> {
    backend: &'a mut dyn ArrayStoreBackend,
    date: NaiveDate,
}

impl<'a> FileMinuteStore<'a> {
    pub fn new(backend: &'a mut dyn ArrayStoreBackend, date: NaiveDate) -> FileMinuteStore<'a> {
        FileMinuteStore { backend, date }
    }
}

impl<'a> MinuteStoreBackend for FileMinuteStore<'a> {
    fn date(&self) -> NaiveDate {
        self.date
    }

    fn create_dataset(&mut self, symbol: &str, len: usize) {
        // Only initialize a fresh zeroed array when none exists yet; unlike
        // `set_row`, creation must never clobber an already-archived row 0.
        if self.backend.get_minsnap(self.date, symbol).is_err() {
            let _ = self
                .backend
                .set_minsnap_row(self.date, symbol, len, 0, MinuteSnap::ZERO);
        }
    }

    fn get(&self, symbol: &str) -> Option<Vec<MinuteSnap>> {
        self.backend.get_minsnap(self.date, symbol).ok()
    }

    fn set(&mut self, symbol: &str, rows: Vec<MinuteSnap>) {
        let _ = self.backend.put_minsnap(self.date, symbol, rows);
    }

    fn set_row(&mut self, symbol: &str, len: usize, index: usize, row: MinuteSnap) {
        let _ = self.backend.set_minsnap_row(self.date, symbol, len, index, row);
    }

    fn delete(&mut self, symbol: &str) {
        let _ = self.backend.drop_minsnap(self.date, symbol);
    }

    fn symbols(&self) -> Vec<String> {
        // Archived days are never scanned by the scheduler; enumerating
        // their resident symbols isn't needed on this path.
        Vec::new()
    }

    fn is_empty(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::array_store::FileArrayStore;

    #[test]
    fn rotate_drains_cache_into_destination() {
        let date = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
        let mut cache = MinuteCache::new(date);
        cache.create_dataset("SH000001", 242);
        cache.set_row(
            "SH000001",
            242,
            29,
            MinuteSnap {
                time: 0,
                price: 3000.0,
                volume: 0.0,
                amount: 0.0,
            },
        );

        let dir = std::env::temp_dir().join(format!("array-store-rotate-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut backend = FileArrayStore::open(dir.join("data.h5")).unwrap();

        cache.rotate(&mut backend).unwrap();
        assert!(cache.is_empty());
        let archived = backend.get_minsnap(date, "SH000001").unwrap();
        assert_eq!(archived[29].price, 3000.0);
    }
}
