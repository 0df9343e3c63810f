//! Post-merge coordinate enrichment for store records.
//!
//! Enrichment never sits on the ingestion path and never fails the run: a
//! store without coordinates is still a valid store. Two layers are applied
//! after the merge:
//!
//! 1. A built-in table of major-city coordinates, matched on the store's
//!    city field. Free and instant; covers the bulk of stores.
//! 2. Optionally (off by default), a Nominatim lookup per remaining store,
//!    queried sequentially to stay polite to the public endpoint.

use crate::catalog::Catalog;
use crate::fetch::Fetch;
use tracing::{debug, info, instrument, warn};

/// Coordinates for cities that account for most store locations.
const CITY_COORDS: &[(&str, f64, f64)] = &[
    ("תל אביב", 32.0853, 34.7818),
    ("ירושלים", 31.7683, 35.2137),
    ("חיפה", 32.7940, 34.9896),
    ("באר שבע", 31.2530, 34.7915),
    ("נתניה", 32.3286, 34.8572),
    ("ראשון לציון", 31.9730, 34.7925),
    ("פתח תקווה", 32.0841, 34.8878),
    ("אשדוד", 31.8044, 34.6553),
    ("רמת גן", 32.0833, 34.8147),
    ("גבעתיים", 32.0700, 34.8100),
    ("הרצליה", 32.1656, 34.8467),
    ("רעננה", 32.1836, 34.8708),
    ("כפר סבא", 32.1780, 34.9065),
    ("הוד השרון", 32.1500, 34.8917),
    ("בני ברק", 32.0833, 34.8333),
    ("חולון", 32.0158, 34.7789),
    ("בת ים", 32.0231, 34.7518),
];

fn city_coords(city: &str) -> Option<(f64, f64)> {
    let city = city.trim();
    CITY_COORDS
        .iter()
        .find(|(name, _, _)| *name == city)
        .map(|(_, lat, lon)| (*lat, *lon))
}

/// Fill in coordinates for stores that lack them.
///
/// With `use_nominatim` set, stores not covered by the built-in table are
/// geocoded one at a time; any lookup failure is logged and ignored.
#[instrument(level = "info", skip_all)]
pub async fn enrich_stores<F: Fetch>(catalog: &mut Catalog, fetcher: &F, use_nominatim: bool) {
    let mut from_table = 0usize;
    let mut pending: Vec<(String, String, String, String)> = Vec::new();

    for store in catalog.stores_mut() {
        if store.lat.is_some() {
            continue;
        }
        if let Some((lat, lon)) = city_coords(&store.city) {
            store.lat = Some(lat);
            store.lon = Some(lon);
            from_table += 1;
        } else if use_nominatim && !store.city.trim().is_empty() {
            pending.push((
                store.chain.clone(),
                store.store_id.clone(),
                store.address.clone(),
                store.city.clone(),
            ));
        }
    }

    let mut from_lookup = 0usize;
    for (chain, store_id, address, city) in pending {
        match lookup(fetcher, &address, &city).await {
            Some((lat, lon)) => {
                if let Some(store) = catalog
                    .stores_mut()
                    .find(|s| s.chain == chain && s.store_id == store_id)
                {
                    store.lat = Some(lat);
                    store.lon = Some(lon);
                    from_lookup += 1;
                }
            }
            None => debug!(%chain, %store_id, %city, "geocode lookup yielded nothing"),
        }
    }

    info!(from_table, from_lookup, "Store enrichment done");
}

/// Best-effort Nominatim lookup; `None` on any failure.
async fn lookup<F: Fetch>(fetcher: &F, address: &str, city: &str) -> Option<(f64, f64)> {
    let query = format!("{address}, {city}, Israel");
    let url = format!(
        "https://nominatim.openstreetmap.org/search?q={}&format=json&limit=1",
        urlencoding::encode(&query)
    );
    let body = match fetcher.get_text(&url).await {
        Ok(body) => body,
        Err(e) => {
            warn!(%city, error = %e, "geocode lookup failed");
            return None;
        }
    };
    let value: serde_json::Value = serde_json::from_str(&body).ok()?;
    let hit = value.as_array()?.first()?;
    let lat = hit.get("lat")?.as_str()?.parse::<f64>().ok()?;
    let lon = hit.get("lon")?.as_str()?.parse::<f64>().ok()?;
    Some((lat, lon))
}
