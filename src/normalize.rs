//! Schema normalization: heterogeneous feed XML onto canonical records.
//!
//! Every chain publishes structurally different XML for the same data:
//! different entry element names (`Item`, `Product`, `item`, `Store`,
//! `STORE`), different field tags (`ItemName` vs `ItemNm` vs
//! `ManufacturerItemDescription`), optional fields, and the occasional
//! malformed document. Rather than bespoke parsing per retailer, the
//! normalizer consumes the per-source fallback tables from
//! [`FieldTable`](crate::sources::FieldTable) and applies one generic
//! algorithm:
//!
//! 1. Parse the document into a generic element tree (`quick-xml` events).
//! 2. Try each configured entry-container name in order; the first one with
//!    at least one match anywhere in the document wins.
//! 3. Per entry and per logical field, try each candidate tag in priority
//!    order; the first present and non-empty after trimming wins.
//!
//! Ill-formed markup fails the whole document with `MalformedDocument`. A
//! malformed individual entry (no primary key or name after all fallbacks)
//! is skipped and counted, never fatal.

use crate::error::{PipelineError, Result};
use crate::models::{CanonicalRecord, DecodedDocument, FileKind, Product, Store};
use crate::sources::FeedSource;
use quick_xml::events::Event;
use quick_xml::Reader;
use tracing::{debug, warn};

/// A parsed XML element: name, direct text content, children.
///
/// Attributes are deliberately not kept; no known feed carries data in them.
#[derive(Debug, Clone, Default)]
pub struct XmlElement {
    pub name: String,
    pub text: String,
    pub children: Vec<XmlElement>,
}

impl XmlElement {
    /// Depth-first traversal over all elements below this one.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: self.children.iter().rev().collect(),
        }
    }

    /// Trimmed text of the first direct child named `tag`, if non-empty.
    pub fn child_text(&self, tag: &str) -> Option<&str> {
        self.children
            .iter()
            .find(|c| c.name == tag)
            .map(|c| c.text.trim())
            .filter(|t| !t.is_empty())
    }

    /// Resolve a logical field through its fallback chain: first candidate
    /// tag present and non-empty after trimming wins.
    pub fn resolve_field(&self, candidates: &[String]) -> Option<&str> {
        candidates.iter().find_map(|tag| self.child_text(tag))
    }
}

/// Document-order iterator over an element's descendants.
pub struct Descendants<'a> {
    stack: Vec<&'a XmlElement>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a XmlElement;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.children.iter().rev());
        Some(next)
    }
}

/// Parse feed text into an element tree under a synthetic root.
///
/// The synthetic root makes documents with leading processing instructions
/// or comments uniform to traverse; `descendants()` on it visits every real
/// element including the document root.
pub fn parse_tree(text: &str) -> Result<XmlElement> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    let mut root = XmlElement::default();
    let mut stack: Vec<XmlElement> = Vec::new();
    let mut saw_element = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                saw_element = true;
                stack.push(XmlElement {
                    name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                    ..Default::default()
                });
            }
            Ok(Event::Empty(e)) => {
                saw_element = true;
                let element = XmlElement {
                    name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
                    ..Default::default()
                };
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root.children.push(element),
                }
            }
            Ok(Event::Text(t)) => {
                if let Some(current) = stack.last_mut() {
                    let text = t.unescape().map_err(|e| PipelineError::MalformedDocument {
                        reason: e.to_string(),
                    })?;
                    current.text.push_str(&text);
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::End(_)) => {
                // quick-xml validates end-tag nesting, so the stack is never
                // empty here.
                if let Some(done) = stack.pop() {
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(done),
                        None => root.children.push(done),
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(PipelineError::MalformedDocument {
                    reason: e.to_string(),
                });
            }
        }
    }

    if !saw_element {
        return Err(PipelineError::MalformedDocument {
            reason: "no elements in document".to_string(),
        });
    }
    if !stack.is_empty() {
        return Err(PipelineError::MalformedDocument {
            reason: format!("unclosed element <{}>", stack.last().unwrap().name),
        });
    }
    Ok(root)
}

/// Normalization output for one document: the records plus entry-level
/// counters.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub records: Vec<CanonicalRecord>,
    /// Entries dropped for missing primary key or name after all fallbacks.
    pub skipped: usize,
    /// Prices present but unusable (non-numeric or negative); the record is
    /// still emitted with a zero price.
    pub bad_prices: usize,
}

impl NormalizedBatch {
    /// Restartable view over the normalized records.
    pub fn records(&self) -> impl Iterator<Item = &CanonicalRecord> {
        self.records.iter()
    }
}

/// Normalize a decoded document using the owning source's field vocabulary.
pub fn normalize(
    doc: &DecodedDocument,
    source: &FeedSource,
    kind: FileKind,
) -> Result<NormalizedBatch> {
    let tree = parse_tree(&doc.text)?;
    let batch = match kind {
        FileKind::PriceFull => normalize_products(&tree, source),
        FileKind::Stores => normalize_stores(&tree, source),
    };
    debug!(
        chain = %source.chain,
        %kind,
        records = batch.records.len(),
        skipped = batch.skipped,
        bad_prices = batch.bad_prices,
        "Normalized document"
    );
    Ok(batch)
}

/// Find entry elements: try each configured container name in order and use
/// the first one that yields at least one match anywhere in the document.
fn find_entries<'a>(tree: &'a XmlElement, candidates: &[String]) -> Vec<&'a XmlElement> {
    for name in candidates {
        let matches: Vec<&XmlElement> =
            tree.descendants().filter(|e| &e.name == name).collect();
        if !matches.is_empty() {
            return matches;
        }
    }
    Vec::new()
}

fn normalize_products(tree: &XmlElement, source: &FeedSource) -> NormalizedBatch {
    let fields = &source.fields;
    let mut batch = NormalizedBatch::default();

    for entry in find_entries(tree, &fields.product_entries) {
        let barcode = entry.resolve_field(&fields.barcode);
        let name = entry.resolve_field(&fields.name);
        let (Some(barcode), Some(name)) = (barcode, name) else {
            batch.skipped += 1;
            continue;
        };

        let price = match entry.resolve_field(&fields.price) {
            Some(raw) => match parse_price(raw) {
                Some(p) => p,
                None => {
                    batch.bad_prices += 1;
                    0.0
                }
            },
            None => 0.0,
        };

        batch.records.push(CanonicalRecord::Product(Product {
            barcode: barcode.to_string(),
            name: name.to_string(),
            price,
            manufacturer: entry
                .resolve_field(&fields.manufacturer)
                .map(str::to_string),
            unit: entry.resolve_field(&fields.unit).map(str::to_string),
            chain: source.chain.clone(),
        }));
    }

    if batch.records.is_empty() && batch.skipped == 0 {
        warn!(chain = %source.chain, "no product entries matched any configured container name");
    }
    batch
}

fn normalize_stores(tree: &XmlElement, source: &FeedSource) -> NormalizedBatch {
    let fields = &source.fields;
    let mut batch = NormalizedBatch::default();

    // Store feeds carry the chain display name at document level.
    let chain_name = tree
        .descendants()
        .find(|e| fields.chain_name.contains(&e.name))
        .map(|e| e.text.trim())
        .filter(|t| !t.is_empty())
        .unwrap_or(&source.chain_name)
        .to_string();

    for entry in find_entries(tree, &fields.store_entries) {
        let store_id = entry.resolve_field(&fields.store_id);
        let name = entry.resolve_field(&fields.store_name);
        let (Some(store_id), Some(name)) = (store_id, name) else {
            batch.skipped += 1;
            continue;
        };

        batch.records.push(CanonicalRecord::Store(Store {
            chain: source.chain.clone(),
            chain_name: chain_name.clone(),
            subchain: entry
                .resolve_field(&fields.subchain)
                .unwrap_or_default()
                .to_string(),
            store_id: store_id.to_string(),
            name: name.to_string(),
            address: entry
                .resolve_field(&fields.address)
                .unwrap_or_default()
                .to_string(),
            city: entry
                .resolve_field(&fields.city)
                .unwrap_or_default()
                .to_string(),
            zipcode: entry
                .resolve_field(&fields.zipcode)
                .unwrap_or_default()
                .to_string(),
            lat: None,
            lon: None,
        }));
    }
    batch
}

/// Parse a feed price value. Accepts "." and "," decimal separators; a
/// negative or non-numeric value is unusable.
fn parse_price(raw: &str) -> Option<f64> {
    let normalized = raw.trim().replace(',', ".");
    match normalized.parse::<f64>() {
        Ok(p) if p >= 0.0 && p.is_finite() => Some(p),
        _ => None,
    }
}
