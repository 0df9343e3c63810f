//! JSON export of the finished catalog.
//!
//! The catalog is the only on-disk artifact the pipeline produces. Records
//! are written sorted by primary key and pretty-printed so successive runs
//! diff cleanly:
//!
//! ```text
//! output_dir/
//! ├── products.json   # array of products, sorted by barcode
//! ├── stores.json     # array of stores, sorted by chain + store id
//! └── report.json     # the finalized run report
//! ```

use crate::catalog::Catalog;
use crate::run::RunReport;
use std::error::Error;
use tokio::fs;
use tracing::{info, instrument};

/// Write `products.json` and `stores.json` under `output_dir`.
#[instrument(level = "info", skip_all, fields(output_dir = %output_dir))]
pub async fn write_catalog(catalog: &Catalog, output_dir: &str) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(output_dir).await?;

    let products = serde_json::to_string_pretty(&catalog.sorted_products())?;
    let products_path = format!("{}/products.json", output_dir.trim_end_matches('/'));
    fs::write(&products_path, products).await?;
    info!(path = %products_path, count = catalog.product_count(), "Wrote products");

    let stores = serde_json::to_string_pretty(&catalog.sorted_stores())?;
    let stores_path = format!("{}/stores.json", output_dir.trim_end_matches('/'));
    fs::write(&stores_path, stores).await?;
    info!(path = %stores_path, count = catalog.store_count(), "Wrote stores");

    Ok(())
}

/// Write the finalized run report as `report.json`.
#[instrument(level = "info", skip_all, fields(output_dir = %output_dir))]
pub async fn write_report(report: &RunReport, output_dir: &str) -> Result<(), Box<dyn Error>> {
    fs::create_dir_all(output_dir).await?;
    let path = format!("{}/report.json", output_dir.trim_end_matches('/'));
    fs::write(&path, serde_json::to_string_pretty(report)?).await?;
    info!(path = %path, files = report.files.len(), "Wrote run report");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SharedCatalog;
    use crate::models::{CanonicalRecord, Product};

    fn product(barcode: &str, name: &str) -> CanonicalRecord {
        CanonicalRecord::Product(Product {
            barcode: barcode.to_string(),
            name: name.to_string(),
            price: 1.0,
            manufacturer: None,
            unit: None,
            chain: "kingstore".to_string(),
        })
    }

    #[tokio::test]
    async fn test_write_catalog_produces_sorted_arrays() {
        let shared = SharedCatalog::new();
        shared.merge(vec![product("9", "Last"), product("1", "First")], "f");
        let catalog = shared.into_catalog();

        let dir = tempfile::tempdir().unwrap();
        let dir_path = dir.path().to_str().unwrap();
        write_catalog(&catalog, dir_path).await.unwrap();

        let products = tokio::fs::read_to_string(format!("{dir_path}/products.json"))
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&products).unwrap();
        let array = parsed.as_array().unwrap();
        assert_eq!(array.len(), 2);
        assert_eq!(array[0]["barcode"], "1");
        assert_eq!(array[1]["barcode"], "9");

        let stores = tokio::fs::read_to_string(format!("{dir_path}/stores.json"))
            .await
            .unwrap();
        assert_eq!(stores.trim(), "[]");
    }
}
