//! The deduplicated catalog and its merge operation.
//!
//! The catalog is the single piece of state shared between workers. All
//! mutation goes through [`SharedCatalog::merge`], one synchronized
//! insert-or-overwrite per record, so interleaved files behave as if their
//! records were merged one at a time in some total order. Merging is
//! monotonic within a run: last write for a key wins, nothing is ever rolled
//! back.

use crate::models::{CanonicalRecord, Product, RecordKey, Store};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Counts of records merged from one batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeCounts {
    pub products: usize,
    pub stores: usize,
}

/// The accumulated catalog: products keyed by barcode, stores keyed by
/// chain + store id, plus provenance recording which file last wrote each
/// entry.
#[derive(Debug, Default)]
pub struct Catalog {
    products: HashMap<String, Product>,
    stores: HashMap<(String, String), Store>,
    provenance: HashMap<RecordKey, String>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one record: insert if the key is new, otherwise overwrite and
    /// update provenance (last-writer-wins).
    pub fn merge(&mut self, record: CanonicalRecord, file: &str) {
        let key = record.key();
        match record {
            CanonicalRecord::Product(p) => {
                self.products.insert(p.barcode.clone(), p);
            }
            CanonicalRecord::Store(s) => {
                self.stores.insert((s.chain.clone(), s.store_id.clone()), s);
            }
        }
        self.provenance.insert(key, file.to_string());
    }

    pub fn product_count(&self) -> usize {
        self.products.len()
    }

    pub fn store_count(&self) -> usize {
        self.stores.len()
    }

    pub fn product(&self, barcode: &str) -> Option<&Product> {
        self.products.get(barcode)
    }

    pub fn store(&self, chain: &str, store_id: &str) -> Option<&Store> {
        self.stores.get(&(chain.to_string(), store_id.to_string()))
    }

    /// The file that last wrote the given key, if any.
    pub fn provenance(&self, key: &RecordKey) -> Option<&str> {
        self.provenance.get(key).map(String::as_str)
    }

    /// Products sorted by barcode, for deterministic export.
    pub fn sorted_products(&self) -> Vec<&Product> {
        let mut products: Vec<&Product> = self.products.values().collect();
        products.sort_by(|a, b| a.barcode.cmp(&b.barcode));
        products
    }

    /// Stores sorted by chain then store id, for deterministic export.
    pub fn sorted_stores(&self) -> Vec<&Store> {
        let mut stores: Vec<&Store> = self.stores.values().collect();
        stores.sort_by(|a, b| (&a.chain, &a.store_id).cmp(&(&b.chain, &b.store_id)));
        stores
    }

    /// Mutable iteration over stores, for post-merge enrichment.
    pub fn stores_mut(&mut self) -> impl Iterator<Item = &mut Store> {
        self.stores.values_mut()
    }
}

/// Thread-safe handle to the catalog, shared by all per-file workers.
#[derive(Debug, Clone, Default)]
pub struct SharedCatalog {
    inner: Arc<Mutex<Catalog>>,
}

impl SharedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a batch of records originating from one file.
    pub fn merge(&self, records: Vec<CanonicalRecord>, file: &str) -> MergeCounts {
        let mut counts = MergeCounts::default();
        let mut catalog = self.inner.lock().expect("catalog mutex poisoned");
        for record in records {
            match &record {
                CanonicalRecord::Product(_) => counts.products += 1,
                CanonicalRecord::Store(_) => counts.stores += 1,
            }
            catalog.merge(record, file);
        }
        debug!(
            %file,
            products = counts.products,
            stores = counts.stores,
            "Merged batch into catalog"
        );
        counts
    }

    /// Unwrap into the final catalog once every worker is done.
    pub fn into_catalog(self) -> Catalog {
        match Arc::try_unwrap(self.inner) {
            Ok(mutex) => mutex.into_inner().expect("catalog mutex poisoned"),
            Err(arc) => {
                // A clone outlived the run; fall back to copying out.
                let guard = arc.lock().expect("catalog mutex poisoned");
                Catalog {
                    products: guard.products.clone(),
                    stores: guard.stores.clone(),
                    provenance: guard.provenance.clone(),
                }
            }
        }
    }
}
