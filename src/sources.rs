//! Feed source configuration.
//!
//! A [`FeedSource`] describes everything the pipeline needs to know about one
//! retailer chain: where its listing endpoint lives, how that endpoint is
//! shaped, and which XML tags its feeds use for each logical field. Adding a
//! retailer means adding one definition here (or one entry in a YAML sources
//! file), not new code paths.
//!
//! Three listing styles cover the chains observed in the wild:
//!
//! | Style | Example chain | Listing | Download |
//! |-------|---------------|---------|----------|
//! | `HtmlLinks` | Shufersal | category page with `<a href>` links | link is the URL |
//! | `BinaProjects` | King Store | `MainIO_Hok.aspx` JSON array | `Download.aspx` → `SPath` |
//! | `PublishedPrices` | Rami Levy | `/file/json/dir` JSON array | `/file/d/<name>` |

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

fn default_concurrency() -> usize {
    3
}

fn default_max_files() -> usize {
    10
}

/// Immutable configuration for one retailer chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSource {
    /// Stable chain code, e.g. `"kingstore"`.
    pub chain: String,
    /// Human-readable chain name; store feeds may override it per document.
    pub chain_name: String,
    /// Listing endpoint shape and location.
    pub listing: ListingEndpoint,
    /// Ordered candidate XML tag names per logical field.
    #[serde(default)]
    pub fields: FieldTable,
    /// Bound on concurrent in-flight downloads for this source.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Cap on files processed per kind in one run.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

/// Listing endpoint variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "style", rename_all = "snake_case")]
pub enum ListingEndpoint {
    /// An HTML page per file kind whose anchor links point at the files.
    HtmlLinks {
        price_url: String,
        store_url: String,
    },
    /// BinaProjects-hosted portal: JSON listing plus a download indirection
    /// that answers with the real binary location.
    BinaProjects { base: String },
    /// publishedprices.co.il-style JSON directory with direct file paths.
    PublishedPrices { base: String },
}

impl ListingEndpoint {
    fn urls(&self) -> Vec<&str> {
        match self {
            ListingEndpoint::HtmlLinks {
                price_url,
                store_url,
            } => vec![price_url, store_url],
            ListingEndpoint::BinaProjects { base } => vec![base],
            ListingEndpoint::PublishedPrices { base } => vec![base],
        }
    }
}

/// Ordered fallback chains of candidate tag names per logical field.
///
/// The first tag present and non-empty after trimming wins. Entry containers
/// are tried in order too; the first name that matches at least once anywhere
/// in the document is used for the whole document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldTable {
    /// Candidate element names wrapping one product entry.
    pub product_entries: Vec<String>,
    /// Candidate element names wrapping one store entry.
    pub store_entries: Vec<String>,
    pub barcode: Vec<String>,
    pub name: Vec<String>,
    pub price: Vec<String>,
    pub manufacturer: Vec<String>,
    pub unit: Vec<String>,
    pub store_id: Vec<String>,
    pub store_name: Vec<String>,
    pub address: Vec<String>,
    pub city: Vec<String>,
    pub zipcode: Vec<String>,
    /// Candidate tags carrying the chain display name at document level.
    pub chain_name: Vec<String>,
    /// Candidate tags carrying a per-store sub-chain label.
    pub subchain: Vec<String>,
}

fn tags(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

impl Default for FieldTable {
    fn default() -> Self {
        // The union of vocabularies the chains have been seen to publish.
        FieldTable {
            product_entries: tags(&["Item", "Product", "item"]),
            store_entries: tags(&["Store", "STORE"]),
            barcode: tags(&["ItemCode", "Barcode", "barcode", "ItemBarcode"]),
            name: tags(&[
                "ItemName",
                "ItemNm",
                "ManufacturerItemDescription",
                "ProductName",
            ]),
            price: tags(&["ItemPrice", "Price", "price"]),
            manufacturer: tags(&["ManufacturerName"]),
            unit: tags(&["UnitOfMeasure", "UnitQty"]),
            store_id: tags(&["StoreId", "STOREID"]),
            store_name: tags(&["StoreName", "STORENAME"]),
            address: tags(&["Address", "ADDRESS"]),
            city: tags(&["City", "CITY"]),
            zipcode: tags(&["ZipCode", "ZIPCODE"]),
            chain_name: tags(&["ChainName", "CHAINNAME"]),
            subchain: tags(&["SUBCHAINNAME", "SubChainName"]),
        }
    }
}

/// The built-in source table covering the three supported chains.
pub fn builtin_sources() -> Vec<FeedSource> {
    vec![
        FeedSource {
            chain: "shufersal".to_string(),
            chain_name: "שופרסל".to_string(),
            listing: ListingEndpoint::HtmlLinks {
                price_url:
                    "https://prices.shufersal.co.il/FileObject/UpdateCategory?catID=2&storeId=0"
                        .to_string(),
                store_url:
                    "https://prices.shufersal.co.il/FileObject/UpdateCategory?catID=5&storeId=0&sort=Time&sortdir=DESC"
                        .to_string(),
            },
            fields: FieldTable::default(),
            concurrency: default_concurrency(),
            max_files: default_max_files(),
        },
        FeedSource {
            chain: "kingstore".to_string(),
            chain_name: "קינג סטור".to_string(),
            listing: ListingEndpoint::BinaProjects {
                base: "https://kingstore.binaprojects.com".to_string(),
            },
            fields: FieldTable::default(),
            concurrency: default_concurrency(),
            max_files: default_max_files(),
        },
        FeedSource {
            chain: "rami_levy".to_string(),
            chain_name: "רמי לוי".to_string(),
            listing: ListingEndpoint::PublishedPrices {
                base: "https://url.retail.publishedprices.co.il".to_string(),
            },
            fields: FieldTable::default(),
            concurrency: default_concurrency(),
            max_files: default_max_files(),
        },
    ]
}

/// Load source definitions from a YAML file.
pub fn load_sources(path: &str) -> Result<Vec<FeedSource>> {
    let text = std::fs::read_to_string(path).map_err(|e| PipelineError::Config {
        message: format!("cannot read sources file {path}: {e}"),
    })?;
    serde_yaml::from_str(&text).map_err(|e| PipelineError::Config {
        message: format!("cannot parse sources file {path}: {e}"),
    })
}

/// Validate a source table before the run starts.
///
/// This is the one fatal check in the system: a source with a missing
/// endpoint or empty field chains would silently produce nothing, so the run
/// aborts instead.
pub fn validate_sources(sources: &[FeedSource]) -> Result<()> {
    if sources.is_empty() {
        return Err(PipelineError::Config {
            message: "no feed sources configured".to_string(),
        });
    }
    for source in sources {
        if source.chain.trim().is_empty() {
            return Err(PipelineError::Config {
                message: "source with empty chain code".to_string(),
            });
        }
        for url in source.listing.urls() {
            if url.trim().is_empty() {
                return Err(PipelineError::Config {
                    message: format!("source {} has an empty listing endpoint", source.chain),
                });
            }
        }
        if source.concurrency == 0 {
            return Err(PipelineError::Config {
                message: format!("source {} has zero concurrency", source.chain),
            });
        }
        let f = &source.fields;
        for (field, chain) in [
            ("product_entries", &f.product_entries),
            ("store_entries", &f.store_entries),
            ("barcode", &f.barcode),
            ("name", &f.name),
            ("store_id", &f.store_id),
            ("store_name", &f.store_name),
        ] {
            if chain.is_empty() {
                return Err(PipelineError::Config {
                    message: format!(
                        "source {} has an empty fallback chain for {field}",
                        source.chain
                    ),
                });
            }
        }
    }
    Ok(())
}
