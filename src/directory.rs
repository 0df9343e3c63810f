//! Feed directory resolution: what files does a source advertise, and where
//! do their bytes actually live.
//!
//! Listing shapes differ per source (see
//! [`ListingEndpoint`](crate::sources::ListingEndpoint)):
//!
//! - **HTML pages** list files as anchor links; the link itself is the
//!   download URL (typically a blob-store address).
//! - **BinaProjects portals** answer a query endpoint with a JSON array of
//!   file names; the real binary location requires a second call to
//!   `Download.aspx`, which responds with a JSON array whose first element
//!   carries an `SPath` field.
//! - **PublishedPrices directories** answer `/file/json/dir` with a JSON
//!   array of names; the download URL is `/file/d/<name>`.
//!
//! Listing ordering is not meaningful; the run coordinator imposes policy on
//! which and how many files to process.

use crate::error::{PipelineError, Result};
use crate::fetch::Fetch;
use crate::models::{FileDescriptor, FileKind};
use crate::sources::{FeedSource, ListingEndpoint};
use crate::utils::truncate_for_log;
use chrono::{Local, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

/// File names carry a `-YYYYMMDDHHMM` publication timestamp.
static FILE_TIMESTAMP: Lazy<Regex> = Lazy::new(|| Regex::new(r"-(\d{12})").unwrap());

/// Timestamp parsed from an advertised file name, when present.
pub fn file_timestamp(name: &str) -> Option<NaiveDateTime> {
    let captures = FILE_TIMESTAMP.captures(name)?;
    NaiveDateTime::parse_from_str(&captures[1], "%Y%m%d%H%M").ok()
}

/// List the files a source currently advertises for one kind.
#[instrument(level = "info", skip(fetcher, source), fields(chain = %source.chain, %kind))]
pub async fn list_files<F: Fetch>(
    fetcher: &F,
    source: &FeedSource,
    kind: FileKind,
) -> Result<Vec<FileDescriptor>> {
    let files = match &source.listing {
        ListingEndpoint::HtmlLinks {
            price_url,
            store_url,
        } => {
            let listing_url = match kind {
                FileKind::PriceFull => price_url,
                FileKind::Stores => store_url,
            };
            let html = fetcher
                .get_text(listing_url)
                .await
                .map_err(|e| directory_unavailable(source, &e))?;
            html_file_links(source, kind, listing_url, &html)
        }
        ListingEndpoint::BinaProjects { base } => {
            // Price listings are filtered by today's date; store listings
            // are not date-scoped.
            let date = match kind {
                FileKind::PriceFull => Local::now().format("%d/%m/%Y").to_string(),
                FileKind::Stores => String::new(),
            };
            let listing_url = format!(
                "{base}/MainIO_Hok.aspx?Store=&FileType={}&Date={}&Wession=",
                kind.token(),
                urlencoding::encode(&date)
            );
            let body = fetcher
                .get_text(&listing_url)
                .await
                .map_err(|e| directory_unavailable(source, &e))?;
            json_listing_names(source, &body, &["FileNm", "FileName", "filename"])?
                .into_iter()
                .filter(|name| name.contains(kind.token()))
                .map(|name| descriptor(source, kind, name, None))
                .collect()
        }
        ListingEndpoint::PublishedPrices { base } => {
            let listing_url = format!("{base}/file/json/dir");
            let body = fetcher
                .get_text(&listing_url)
                .await
                .map_err(|e| directory_unavailable(source, &e))?;
            json_listing_names(source, &body, &["name"])?
                .into_iter()
                .filter(|name| name.contains(kind.token()))
                .map(|name| {
                    let url = format!("{base}/file/d/{}", urlencoding::encode(&name));
                    descriptor(source, kind, name, Some(url))
                })
                .collect()
        }
    };

    debug!(count = files.len(), "Listed feed files");
    Ok(files)
}

/// Resolve a descriptor to one or more concrete download locations.
///
/// Sources whose listing already names the binary location resolve without
/// I/O; BinaProjects portals need the `Download.aspx` indirection.
#[instrument(level = "debug", skip(fetcher, source), fields(file = %file.name))]
pub async fn resolve_download<F: Fetch>(
    fetcher: &F,
    source: &FeedSource,
    file: &FileDescriptor,
) -> Result<Vec<String>> {
    if let Some(url) = &file.url {
        return Ok(vec![url.clone()]);
    }

    match &source.listing {
        ListingEndpoint::BinaProjects { base } => {
            let url = format!(
                "{base}/Download.aspx?FileNm={}",
                urlencoding::encode(&file.name)
            );
            let body =
                fetcher
                    .get_text(&url)
                    .await
                    .map_err(|e| PipelineError::DownloadResolutionFailed {
                        file: file.name.clone(),
                        reason: e.to_string(),
                    })?;
            let value: serde_json::Value = serde_json::from_str(&body).map_err(|e| {
                PipelineError::DownloadResolutionFailed {
                    file: file.name.clone(),
                    reason: format!("unparseable resolution response: {e}"),
                }
            })?;
            let paths: Vec<String> = value
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.get("SPath"))
                        .filter_map(|p| p.as_str())
                        .filter(|p| !p.trim().is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            if paths.is_empty() {
                return Err(PipelineError::DownloadResolutionFailed {
                    file: file.name.clone(),
                    reason: "no SPath in resolution response".to_string(),
                });
            }
            Ok(paths)
        }
        _ => Err(PipelineError::DownloadResolutionFailed {
            file: file.name.clone(),
            reason: "listing provided no download URL".to_string(),
        }),
    }
}

fn directory_unavailable(source: &FeedSource, cause: &PipelineError) -> PipelineError {
    PipelineError::DirectoryUnavailable {
        chain: source.chain.clone(),
        reason: cause.to_string(),
    }
}

fn descriptor(
    source: &FeedSource,
    kind: FileKind,
    name: String,
    url: Option<String>,
) -> FileDescriptor {
    let timestamp = file_timestamp(&name);
    FileDescriptor {
        chain: source.chain.clone(),
        kind,
        name,
        url,
        timestamp,
    }
}

/// Extract feed file links from an HTML listing page.
///
/// Price pages link `.gz` files directly; store pages mix in navigation
/// links, so those are additionally filtered by the kind token.
fn html_file_links(
    source: &FeedSource,
    kind: FileKind,
    listing_url: &str,
    html: &str,
) -> Vec<FileDescriptor> {
    let document = Html::parse_document(html);
    let anchor = Selector::parse("a[href]").expect("static selector");
    let base = Url::parse(listing_url).ok();

    let mut files = Vec::new();
    for element in document.select(&anchor) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let is_feed_link = match kind {
            FileKind::PriceFull => href.contains(".gz"),
            FileKind::Stores => href.contains(kind.token()),
        };
        if !is_feed_link {
            continue;
        }
        let resolved = match &base {
            Some(base) => match base.join(href) {
                Ok(url) => url.to_string(),
                Err(_) => continue,
            },
            None => href.to_string(),
        };
        let name = file_name_from_url(&resolved);
        files.push(descriptor(source, kind, name, Some(resolved)));
    }
    files
}

/// Last path segment of a URL, without the query string.
fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path).to_string()
}

/// Parse a JSON listing body into advertised file names, trying the known
/// name keys in order.
fn json_listing_names(
    source: &FeedSource,
    body: &str,
    name_keys: &[&str],
) -> Result<Vec<String>> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| PipelineError::DirectoryUnavailable {
            chain: source.chain.clone(),
            reason: format!(
                "unparseable listing response: {e}: {}",
                truncate_for_log(body, 120)
            ),
        })?;
    let items = value
        .as_array()
        .ok_or_else(|| PipelineError::DirectoryUnavailable {
            chain: source.chain.clone(),
            reason: "listing response is not an array".to_string(),
        })?;
    Ok(items
        .iter()
        .filter_map(|item| {
            name_keys
                .iter()
                .find_map(|key| item.get(*key).and_then(|v| v.as_str()))
        })
        .map(str::to_string)
        .collect())
}
