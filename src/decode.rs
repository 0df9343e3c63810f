//! Container decoding for downloaded feed payloads.
//!
//! Feeds arrive as plain XML, gzip streams, or single-entry zip archives,
//! and the advertised file extension routinely lies (a `.gz` name may hold a
//! zip archive). Detection is therefore content-based: the leading bytes are
//! inspected for a gzip magic number or a zip local-file-header signature
//! before falling back to plain text.
//!
//! Decoding never silently truncates: zero bytes of output from a non-empty
//! input is a [`PipelineError::DecodeFailed`], not an empty success.

use crate::error::{PipelineError, Result};
use crate::models::{ContainerKind, DecodedDocument, RawPayload};
use flate2::read::GzDecoder;
use std::io::{Cursor, Read};
use tracing::debug;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Detect the container kind from the payload's leading bytes.
///
/// Zip detection covers the local-file-header signature plus the
/// end-of-central-directory marker an empty archive starts with, so an
/// empty archive is diagnosed as a decode failure rather than passed
/// through as plain text.
pub fn detect_container(bytes: &[u8]) -> ContainerKind {
    if bytes.starts_with(&GZIP_MAGIC) {
        ContainerKind::Gzip
    } else if bytes.starts_with(b"PK\x03\x04") || bytes.starts_with(b"PK\x05\x06") {
        ContainerKind::Zip
    } else {
        ContainerKind::Plain
    }
}

/// Decode a raw payload into its textual feed content.
///
/// Pure and idempotent: decoding the same payload twice yields byte-identical
/// text.
pub fn decode(payload: &RawPayload) -> Result<DecodedDocument> {
    if payload.bytes.is_empty() {
        return Err(PipelineError::DecodeFailed {
            reason: "empty payload".to_string(),
        });
    }

    let container = detect_container(&payload.bytes);
    let raw_text = match container {
        ContainerKind::Gzip => inflate_gzip(&payload.bytes)?,
        ContainerKind::Zip => extract_zip_first_entry(&payload.bytes)?,
        ContainerKind::Plain => payload.bytes.clone(),
    };

    if raw_text.is_empty() {
        return Err(PipelineError::DecodeFailed {
            reason: format!("{container:?} container decoded to zero bytes"),
        });
    }

    let mut text = String::from_utf8_lossy(&raw_text).into_owned();
    if let Some(stripped) = text.strip_prefix('\u{feff}') {
        text = stripped.to_string();
    }

    debug!(
        ?container,
        input_bytes = payload.bytes.len(),
        output_chars = text.len(),
        declared = payload.declared_type.as_deref().unwrap_or("-"),
        "Decoded payload"
    );
    Ok(DecodedDocument { text, container })
}

fn inflate_gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| PipelineError::DecodeFailed {
            reason: format!("gzip: {e}"),
        })?;
    Ok(out)
}

/// Feeds are single-entry archives; exactly the first entry is extracted.
fn extract_zip_first_entry(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| PipelineError::DecodeFailed {
            reason: format!("zip: {e}"),
        })?;
    if archive.is_empty() {
        return Err(PipelineError::DecodeFailed {
            reason: "zip: empty archive".to_string(),
        });
    }
    let mut entry = archive
        .by_index(0)
        .map_err(|e| PipelineError::DecodeFailed {
            reason: format!("zip: {e}"),
        })?;
    let mut out = Vec::new();
    entry
        .read_to_end(&mut out)
        .map_err(|e| PipelineError::DecodeFailed {
            reason: format!("zip entry: {e}"),
        })?;
    Ok(out)
}
