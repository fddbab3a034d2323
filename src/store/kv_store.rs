//! Key/value store for fast-changing records (§4.3 of the design).
//!
//! A single on-disk dump (`dstore.dump`) holds every namespace. `ticks`,
//! `dividends` and `sectors` are named in the spec; `meta`/`depth`/`trade`
//! are opaque byte namespaces the `put_meta`/`put_depth`/`put_trade`/
//! `mput_trade` commands write into, grounded in the same "dict of dicts"
//! shape `original_source/datafeed/datastore.py`'s `DictStore` uses for
//! everything that isn't an array.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Dividend, Tick};

#[derive(Serialize, Deserialize, Default)]
struct KvDump {
    ticks: BTreeMap<String, Tick>,
    dividends: BTreeMap<String, Vec<Dividend>>,
    sectors: BTreeMap<String, Vec<String>>,
    /// namespace name -> key -> raw bytes, for `put_meta`/`put_depth`/`put_trade`.
    opaque: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
}

/// The persisted key/value store. All accessors assert the store is open;
/// calling one after [`close`](Self::close) is a programming error and
/// panics rather than returning an error, matching §4.3's "fails fast".
pub struct KvStore {
    path: PathBuf,
    data: KvDump,
    open: bool,
}

impl KvStore {
    pub fn open(path: impl AsRef<Path>) -> Result<KvStore> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let bytes = fs::read(&path)?;
            bincode::deserialize(&bytes)?
        } else {
            KvDump::default()
        };
        Ok(KvStore {
            path,
            data,
            open: true,
        })
    }

    fn assert_open(&self) {
        assert!(self.open, "KvStore used after close");
    }

    // -- ticks ---------------------------------------------------------

    pub fn get_tick(&self, symbol: &str) -> Option<&Tick> {
        self.assert_open();
        self.data.ticks.get(symbol)
    }

    pub fn set_tick(&mut self, symbol: String, tick: Tick) {
        self.assert_open();
        self.data.ticks.insert(symbol, tick);
    }

    pub fn delete_tick(&mut self, symbol: &str) -> bool {
        self.assert_open();
        self.data.ticks.remove(symbol).is_some()
    }

    pub fn has_tick(&self, symbol: &str) -> bool {
        self.assert_open();
        self.data.ticks.contains_key(symbol)
    }

    pub fn tick_items(&self) -> impl Iterator<Item = (&String, &Tick)> {
        self.assert_open();
        self.data.ticks.iter()
    }

    pub fn ticks_len(&self) -> usize {
        self.assert_open();
        self.data.ticks.len()
    }

    // -- dividends -------------------------------------------------------

    pub fn get_dividend(&self, symbol: &str) -> Option<&Vec<Dividend>> {
        self.assert_open();
        self.data.dividends.get(symbol)
    }

    pub fn set_dividend(&mut self, symbol: String, rows: Vec<Dividend>) {
        self.assert_open();
        self.data.dividends.insert(symbol, rows);
    }

    pub fn delete_dividend(&mut self, symbol: &str) -> bool {
        self.assert_open();
        self.data.dividends.remove(symbol).is_some()
    }

    // -- sectors -----------------------------------------------------------

    pub fn get_sector(&self, name: &str) -> Option<&Vec<String>> {
        self.assert_open();
        self.data.sectors.get(name)
    }

    pub fn set_sector(&mut self, name: String, members: Vec<String>) {
        self.assert_open();
        self.data.sectors.insert(name, members);
    }

    // -- opaque namespaces (meta/depth/trade) -------------------------------

    pub fn get_opaque(&self, namespace: &str, key: &str) -> Option<&Vec<u8>> {
        self.assert_open();
        self.data.opaque.get(namespace).and_then(|ns| ns.get(key))
    }

    pub fn set_opaque(&mut self, namespace: &str, key: String, value: Vec<u8>) {
        self.assert_open();
        self.data
            .opaque
            .entry(namespace.to_string())
            .or_default()
            .insert(key, value);
    }

    pub fn has_opaque(&self, namespace: &str, key: &str) -> bool {
        self.assert_open();
        self.data
            .opaque
            .get(namespace)
            .is_some_and(|ns| ns.contains_key(key))
    }

    // -- lifecycle -----------------------------------------------------------

    /// Serialize the whole store to `dstore.dump`, atomically
    /// (write-to-temp-then-rename). No per-key WAL: a crash between flushes
    /// loses whatever changed since the last one.
    pub fn flush(&mut self) -> Result<()> {
        self.assert_open();
        let bytes = bincode::serialize(&self.data)?;
        let tmp = self.path.with_extension("dump.tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Flush and mark the store closed; further accessor calls panic.
    pub fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.open = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TickValue;

    fn sample_tick(price: f64) -> Tick {
        let mut tick = Tick::new();
        tick.insert("price".to_string(), TickValue::Float(price));
        tick
    }

    #[test]
    fn set_then_get_tick_round_trips() {
        let dir = std::env::temp_dir().join(format!("kv-store-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut store = KvStore::open(dir.join("dstore.dump")).unwrap();
        store.set_tick("SH000001".to_string(), sample_tick(12.5));
        assert_eq!(
            store
                .get_tick("SH000001")
                .unwrap()
                .get("price")
                .unwrap()
                .as_f64(),
            Some(12.5)
        );
    }

    #[test]
    fn flush_then_reopen_persists_data() {
        let dir = std::env::temp_dir().join(format!("kv-store-test-reopen-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let dump_path = dir.join("dstore.dump");
        let mut store = KvStore::open(&dump_path).unwrap();
        store.set_tick("SH000001".to_string(), sample_tick(1.0));
        store.flush().unwrap();

        let reopened = KvStore::open(&dump_path).unwrap();
        assert!(reopened.has_tick("SH000001"));
    }

    #[test]
    #[should_panic(expected = "used after close")]
    fn access_after_close_panics() {
        let dir = std::env::temp_dir().join(format!("kv-store-test-closed-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut store = KvStore::open(dir.join("dstore.dump")).unwrap();
        store.close().unwrap();
        store.has_tick("whatever");
    }
}
