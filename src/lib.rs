//! Ingestion pipeline for retailer price-transparency feeds.
//!
//! Each configured chain publishes product-price and store-location XML
//! feeds behind its own listing API, file naming, compression container,
//! and tag vocabulary. This crate discovers the advertised files, fetches
//! and decodes them, normalizes their schemas through per-source fallback
//! field tables, and merges everything into one deduplicated catalog while
//! isolating per-file failures.
//!
//! The pipeline, leaf first: [`decode`] unwraps containers, [`normalize`]
//! maps vocabularies onto [`models::CanonicalRecord`], [`directory`] lists
//! and resolves remote files, [`fetch`] moves bytes, [`catalog`] merges, and
//! [`run`] coordinates the whole thing into a
//! [`run::RunReport`].

pub mod catalog;
pub mod decode;
pub mod directory;
pub mod error;
pub mod fetch;
pub mod geocode;
pub mod models;
pub mod normalize;
pub mod outputs;
pub mod run;
pub mod sources;
pub mod utils;
