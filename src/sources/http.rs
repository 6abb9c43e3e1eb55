use std::path::PathBuf;

use anyhow::{Context, Result};
use polars::frame::DataFrame;
use reqwest::blocking::Client;
use tracing::{debug, info};

use crate::{
    config::{ArchiveSource, DelimitedSource, PipelineConfig},
    geometry::GeometryUnits,
};

use super::{Fetched, SourceDigest, SourceFetcher, decode, fs};

/// Fetches sources over HTTP(S) with a blocking client; archives are unpacked under `work_dir`.
#[derive(Debug, Clone)]
pub struct HttpSources {
    client: Client,
    work_dir: PathBuf,
}

impl HttpSources {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .build()
            .context("build HTTP client")?;

        Ok(Self { client, work_dir: config.work_dir.clone() })
    }

    /// GET `url` into memory, failing on any non-success status.
    fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        debug!(url, "GET");
        let bytes = self.client.get(url)
            .send()
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .with_context(|| format!("GET {url} returned error status"))?
            .bytes()
            .with_context(|| format!("read body of {url}"))?;
        Ok(bytes.to_vec())
    }
}

impl SourceFetcher for HttpSources {
    fn fetch_markup(&self, url: &str) -> Result<String> {
        let bytes = self.get_bytes(url)?;
        String::from_utf8(bytes).with_context(|| format!("page {url} is not valid UTF-8"))
    }

    fn fetch_workbook(&self, url: &str, sheet: &str) -> Result<Fetched<DataFrame>> {
        let bytes = self.get_bytes(url)?;
        let digest = SourceDigest::of(url, &bytes);
        let data = decode::read_workbook_bytes(bytes, sheet)
            .with_context(|| format!("decode workbook {url}"))?;
        Ok(Fetched { data, digest: Some(digest) })
    }

    fn fetch_delimited(&self, source: &DelimitedSource) -> Result<Fetched<DataFrame>> {
        let bytes = self.get_bytes(&source.url)?;
        let digest = SourceDigest::of(&source.url, &bytes);
        let data = decode::read_delimited_bytes(&bytes, source.delimiter, source.skip_rows, source.skip_footer)
            .with_context(|| format!("decode {}", source.url))?;
        Ok(Fetched { data, digest: Some(digest) })
    }

    fn fetch_geometries(&self, source: &ArchiveSource) -> Result<Fetched<GeometryUnits>> {
        let bytes = self.get_bytes(&source.url)?;
        let digest = SourceDigest::of(&source.url, &bytes);

        let out_dir = self.work_dir.join(&source.layer);
        let entries = fs::unpack_archive(&bytes, &out_dir)?;
        info!(url = %source.url, to = %out_dir.display(), entries, "unpacked archive");

        let shp_path = fs::find_layer(&out_dir, &source.layer)?;
        let data = decode::read_shapefile(&shp_path, &source.fields)?;
        Ok(Fetched { data, digest: Some(digest) })
    }
}
