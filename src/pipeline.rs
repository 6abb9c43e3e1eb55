use std::collections::{BTreeMap, BTreeSet};

use polars::frame::DataFrame;
use serde::Serialize;
use tracing::{info, info_span, warn};

use crate::{
    config::{PipelineConfig, UnmatchedPolicy},
    dissolve::{DissolveLevel, Dissolved},
    error::{PipelineError, Result},
    fused::FusedTable,
    join::{self, JoinReport},
    link, normalize,
    render::Renderer,
    sources::{Fetched, SourceDigest, SourceFetcher},
};

/// One row of the run's source manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceManifestEntry {
    pub table: String,
    #[serde(flatten)]
    pub digest: SourceDigest,
}

/// Everything a run produces. Tables are final; nothing is mutated after the run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Workbook URL the link resolver picked.
    pub postal_codes_url: String,
    pub postal_codes: DataFrame,
    pub municipalities: DataFrame,
    pub political_districts: DataFrame,
    /// Localities with their district and state.
    pub localities: DataFrame,
    pub fused: FusedTable,
    /// Localities sharing a postal code with another district.
    pub locality_fanout: DataFrame,
    /// Fused rows of geometry units that matched more than one registry entry.
    pub unit_fanout: DataFrame,
    pub joins: Vec<JoinReport>,
    pub unmapped_states: BTreeSet<String>,
    pub aggregates: BTreeMap<DissolveLevel, Vec<Dissolved>>,
    pub manifest: Vec<SourceManifestEntry>,
}

/// The batch driver: fetch, normalize, join, dissolve, in that order, aborting on the first error.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self { Self { config } }

    #[inline] pub fn config(&self) -> &PipelineConfig { &self.config }

    /// Scrape the registry page and resolve the current workbook URL.
    pub fn resolve_postal_codes_url(&self, fetcher: &dyn SourceFetcher) -> Result<String> {
        let source = &self.config.postal_codes;
        let markup = fetcher.fetch_markup(&source.page_url)
            .map_err(|e| PipelineError::fetch("postal_codes_page", e))?;
        let url = link::resolve_from_page(&markup, &source.marker)
            .map_err(|e| PipelineError::link("postal_codes_page", e))?;
        info!(url, "resolved postal-code workbook");
        Ok(url)
    }

    pub fn run(&self, fetcher: &dyn SourceFetcher) -> Result<PipelineOutput> {
        let config = &self.config;
        let mut manifest = Vec::new();

        /// Unwrap a fetched source, recording its digest.
        fn take<T>(table: &str, fetched: anyhow::Result<Fetched<T>>, manifest: &mut Vec<SourceManifestEntry>) -> Result<T> {
            let fetched = fetched.map_err(|e| PipelineError::fetch(table, e))?;
            if let Some(digest) = fetched.digest {
                info!(table, url = %digest.url, sha256 = %digest.sha256, bytes = digest.bytes, "fetched");
                manifest.push(SourceManifestEntry { table: table.to_string(), digest });
            }
            Ok(fetched.data)
        }

        let (postal_codes_url, raw_postal, raw_municipalities, raw_districts, raw_localities, raw_geometries) = {
            let _span = info_span!("fetch").entered();
            let url = self.resolve_postal_codes_url(fetcher)?;
            let postal = take("postal_codes", fetcher.fetch_workbook(&url, &config.postal_codes.sheet), &mut manifest)?;
            let municipalities = take("municipalities", fetcher.fetch_delimited(&config.municipalities), &mut manifest)?;
            let districts = take("political_districts", fetcher.fetch_delimited(&config.political_districts), &mut manifest)?;
            let localities = take("localities", fetcher.fetch_delimited(&config.localities), &mut manifest)?;
            let geometries = take("geometries", fetcher.fetch_geometries(&config.geometries), &mut manifest)?;
            (url, postal, municipalities, districts, localities, geometries)
        };

        let (postal_codes, municipalities, political_districts, localities, units) = {
            let _span = info_span!("normalize").entered();
            (
                normalize::normalize_postal_codes(&raw_postal, config.vocabulary, config.strict_vocabulary)?,
                normalize::normalize_municipalities(&raw_municipalities)?,
                normalize::normalize_political_districts(&raw_districts)?,
                normalize::normalize_localities(&raw_localities)?,
                normalize::normalize_geometries(&raw_geometries)?,
            )
        };

        let _span = info_span!("join").entered();
        let (localities, locality_report) = join::enrich_localities(&localities, &political_districts)?;
        let locality_fanout = join::find_fanout(&localities, "localities", "postal_code")?;
        if locality_fanout.height() > 0 {
            info!(rows = locality_fanout.height(), "postal codes shared by several political districts");
        }

        let (fused, fuse_reports) = join::fuse(&units, &municipalities, &postal_codes.data)?;
        let fused = match config.unmatched {
            UnmatchedPolicy::Retain => fused,
            UnmatchedPolicy::Drop => {
                let kept = fused.drop_unmatched()?;
                info!(dropped = fused.len() - kept.len(), "dropped geometry units without a postal-code match");
                kept
            }
        };
        let unit_fanout = join::find_fanout(&fused.data, "fused", "municipality_code")?;
        if unit_fanout.height() > 0 {
            warn!(rows = unit_fanout.height(), "geometry units with ambiguous postal-code matches");
        }
        drop(_span);

        let aggregates = {
            let _span = info_span!("dissolve").entered();
            DissolveLevel::ALL.into_iter()
                .map(|level| Ok((level, fused.dissolve(level)?)))
                .collect::<Result<BTreeMap<_, _>>>()?
        };

        info!(
            fused_rows = fused.len(), units = units.len(),
            states = aggregates[&DissolveLevel::State].len(), "pipeline finished"
        );

        Ok(PipelineOutput {
            postal_codes_url,
            postal_codes: postal_codes.data,
            municipalities,
            political_districts,
            localities,
            fused,
            locality_fanout,
            unit_fanout,
            joins: std::iter::once(locality_report).chain(fuse_reports).collect(),
            unmapped_states: postal_codes.unmapped_states,
            aggregates,
            manifest,
        })
    }
}

impl PipelineOutput {
    /// Hand each dissolved layer to the rendering collaborator, state first.
    pub fn render(&self, renderer: &mut dyn Renderer) -> Result<()> {
        for (level, groups) in &self.aggregates {
            renderer.render(*level, groups)
                .map_err(|source| PipelineError::Render {
                    table: format!("dissolved_{level}"),
                    level: level.to_string(),
                    source,
                })?;
        }
        Ok(())
    }
}
