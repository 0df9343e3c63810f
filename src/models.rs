//! Data models for feed files and normalized catalog records.
//!
//! This module defines the shapes that flow through the pipeline:
//! - [`FileDescriptor`]: one discoverable remote file, as advertised by a source
//! - [`RawPayload`]: downloaded bytes before container decoding
//! - [`DecodedDocument`]: decoded feed text plus the detected container kind
//! - [`CanonicalRecord`]: the normalized product or store representation,
//!   independent of any single retailer's XML vocabulary
//!
//! A [`CanonicalRecord`] is only ever constructed with a non-empty primary
//! key and display name; the normalizer enforces that invariant before
//! emitting anything.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of feed file a source advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileKind {
    /// Full price list for one store of the chain.
    PriceFull,
    /// Store directory for the whole chain.
    Stores,
}

impl FileKind {
    /// The token sources embed in advertised file names (e.g.
    /// `PriceFull7290058108879-001-202512121031.gz`).
    pub fn token(&self) -> &'static str {
        match self {
            FileKind::PriceFull => "PriceFull",
            FileKind::Stores => "Stores",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// One remote file as reported by a source's listing endpoint.
///
/// Produced by the directory resolver and consumed once by the fetcher.
/// Some sources advertise a concrete download URL directly (`url` is set);
/// others require a second resolution call.
#[derive(Debug, Clone, PartialEq)]
pub struct FileDescriptor {
    /// Chain code of the owning source.
    pub chain: String,
    /// Declared file kind.
    pub kind: FileKind,
    /// File name or identifier exactly as the source reported it.
    pub name: String,
    /// Concrete download URL, when the listing already provides one.
    pub url: Option<String>,
    /// Timestamp parsed from the file name, when the name carries one.
    pub timestamp: Option<NaiveDateTime>,
}

/// Downloaded bytes plus a content-type hint taken from the URL.
///
/// The hint is advisory only; container detection is content-based.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub bytes: Vec<u8>,
    pub declared_type: Option<String>,
}

impl RawPayload {
    pub fn new(bytes: Vec<u8>, url: &str) -> Self {
        // Extension of the URL path, ignoring any query string.
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let declared_type = path
            .rsplit('/')
            .next()
            .and_then(|seg| seg.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());
        Self {
            bytes,
            declared_type,
        }
    }
}

/// Compression container detected around a feed's textual content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContainerKind {
    Plain,
    Gzip,
    Zip,
}

/// Decoded textual feed content plus the container it was wrapped in.
#[derive(Debug, Clone)]
pub struct DecodedDocument {
    pub text: String,
    pub container: ContainerKind,
}

/// A normalized product entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Barcode; primary key in a chain-independent namespace.
    pub barcode: String,
    pub name: String,
    /// Non-negative; defaults to zero when the feed value is absent or unusable.
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Chain code of the feed that last contributed this product.
    pub chain: String,
}

/// A normalized store entry, keyed by chain + store id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub chain: String,
    pub chain_name: String,
    /// Sub-chain or banner label; empty when the feed carries none.
    pub subchain: String,
    pub store_id: String,
    pub name: String,
    pub address: String,
    pub city: String,
    pub zipcode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
}

/// A normalized record, discriminated by kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CanonicalRecord {
    Product(Product),
    Store(Store),
}

impl CanonicalRecord {
    /// The record's primary key within the catalog.
    pub fn key(&self) -> RecordKey {
        match self {
            CanonicalRecord::Product(p) => RecordKey::Product(p.barcode.clone()),
            CanonicalRecord::Store(s) => RecordKey::Store(s.chain.clone(), s.store_id.clone()),
        }
    }
}

/// Catalog key: barcode for products, chain + store id for stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKey {
    Product(String),
    Store(String, String),
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Product(barcode) => write!(f, "product:{barcode}"),
            RecordKey::Store(chain, id) => write!(f, "store:{chain}:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_kind_tokens() {
        assert_eq!(FileKind::PriceFull.token(), "PriceFull");
        assert_eq!(FileKind::Stores.to_string(), "Stores");
    }

    #[test]
    fn test_raw_payload_declared_type_from_url() {
        let p = RawPayload::new(vec![1, 2, 3], "https://host/files/PriceFull-001.gz");
        assert_eq!(p.declared_type.as_deref(), Some("gz"));

        let p = RawPayload::new(vec![], "https://host/Download.aspx?FileNm=x.zip");
        assert_eq!(p.declared_type.as_deref(), Some("aspx"));

        let p = RawPayload::new(vec![], "https://host/plain");
        assert_eq!(p.declared_type, None);
    }

    #[test]
    fn test_record_key_for_product_is_chain_independent() {
        let a = CanonicalRecord::Product(Product {
            barcode: "7290000000001".to_string(),
            name: "Milk 3%".to_string(),
            price: 6.9,
            manufacturer: None,
            unit: None,
            chain: "shufersal".to_string(),
        });
        let b = CanonicalRecord::Product(Product {
            barcode: "7290000000001".to_string(),
            name: "Milk 3% 1L".to_string(),
            price: 6.5,
            manufacturer: None,
            unit: None,
            chain: "kingstore".to_string(),
        });
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_record_key_for_store_includes_chain() {
        let a = RecordKey::Store("kingstore".to_string(), "001".to_string());
        let b = RecordKey::Store("shufersal".to_string(), "001".to_string());
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "store:kingstore:001");
    }

    #[test]
    fn test_product_serialization_skips_empty_optionals() {
        let p = Product {
            barcode: "123".to_string(),
            name: "Milk".to_string(),
            price: 6.9,
            manufacturer: None,
            unit: Some("liter".to_string()),
            chain: "kingstore".to_string(),
        };
        let json = serde_json::to_string(&p).unwrap();
        assert!(!json.contains("manufacturer"));
        assert!(json.contains("\"unit\":\"liter\""));
    }
}
