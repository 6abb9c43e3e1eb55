//! Collaborators that fetch and decode the raw sources. The pipeline only sees their output.

mod decode;
mod fs;
mod http;

pub use decode::{read_delimited_bytes, read_shapefile, read_workbook_bytes};
pub use fs::{ensure_dir, find_layer, unpack_archive, write_atomic};
pub use http::HttpSources;

use anyhow::Result;
use polars::frame::DataFrame;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{config::{ArchiveSource, DelimitedSource}, geometry::GeometryUnits};

/// Provenance of one downloaded payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDigest {
    pub url: String,
    pub sha256: String,
    pub bytes: usize,
}

impl SourceDigest {
    pub fn of(url: &str, bytes: &[u8]) -> Self {
        Self { url: url.to_string(), sha256: hex::encode(Sha256::digest(bytes)), bytes: bytes.len() }
    }
}

/// A decoded source plus, when it came over the wire, its digest.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub data: T,
    pub digest: Option<SourceDigest>,
}

impl<T> Fetched<T> {
    pub fn local(data: T) -> Self { Self { data, digest: None } }
}

/// External fetch/decode collaborators. Every call is blocking and fallible; the
/// pipeline treats any error as fatal and never retries.
pub trait SourceFetcher {
    /// Page text of `url`.
    fn fetch_markup(&self, url: &str) -> Result<String>;

    /// One sheet of the workbook at `url`, all cells as strings.
    fn fetch_workbook(&self, url: &str, sheet: &str) -> Result<Fetched<DataFrame>>;

    /// A delimited text table, all columns as strings.
    fn fetch_delimited(&self, source: &DelimitedSource) -> Result<Fetched<DataFrame>>;

    /// The zipped boundary shapefile, decoded to attribute rows plus shapes.
    fn fetch_geometries(&self, source: &ArchiveSource) -> Result<Fetched<GeometryUnits>>;
}
