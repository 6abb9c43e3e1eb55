use std::{fs, path::{Path, PathBuf}, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::link::POSTAL_LINK_MARKER;

/// Which state abbreviations the postal-code registry is mapped with.
///
/// Published variants of the registry processing disagree on Carinthia ("K"),
/// so the choice is explicit rather than baked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateVocabulary {
    /// All nine federal states.
    #[default]
    Full,
    /// The eight-state table that leaves "K" unmapped.
    WithoutCarinthia,
}

/// What happens to geometry units without a postal-code match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnmatchedPolicy {
    /// Keep the unit with null attributes (it still shows up in the fused table).
    #[default]
    Retain,
    /// Remove units whose postal-code join found nothing.
    Drop,
}

/// A `;`-style delimited text table published with banner lines above the header and a footer below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelimitedSource {
    pub url: String,
    pub delimiter: char,
    /// Lines dropped before the header row.
    pub skip_rows: usize,
    /// Lines dropped from the end of the file.
    pub skip_footer: usize,
}

/// An Excel workbook; the URL is resolved from the scraped page at run time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkbookSource {
    pub page_url: String,
    pub marker: String,
    pub sheet: String,
}

/// A zipped shapefile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSource {
    pub url: String,
    /// Layer (file stem) of the `.shp` inside the archive.
    pub layer: String,
    /// Attribute fields kept from the `.dbf`.
    pub fields: Vec<String>,
}

/// Everything a run needs; passed into the driver instead of any ambient state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub work_dir: PathBuf,
    pub postal_codes: WorkbookSource,
    pub municipalities: DelimitedSource,
    pub political_districts: DelimitedSource,
    pub localities: DelimitedSource,
    pub geometries: ArchiveSource,
    pub vocabulary: StateVocabulary,
    /// Abort on unmapped state abbreviations instead of nulling them.
    pub strict_vocabulary: bool,
    pub unmatched: UnmatchedPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        /// Statistik Austria register lists share the same layout.
        fn register_list(name: &str) -> DelimitedSource {
            DelimitedSource {
                url: format!("https://www.statistik.at/verzeichnis/reglisten/{name}"),
                delimiter: ';',
                skip_rows: 2,
                skip_footer: 1,
            }
        }

        Self {
            user_agent: "Mozilla".to_string(),
            timeout_secs: 60,
            work_dir: PathBuf::from("atmap-work"),
            postal_codes: WorkbookSource {
                page_url: "https://www.post.at/g/c/postlexikon".to_string(),
                marker: POSTAL_LINK_MARKER.to_string(),
                sheet: "Plz_Anhang".to_string(),
            },
            municipalities: register_list("gemliste_knz_en.csv"),
            political_districts: register_list("polbezirke_en.csv"),
            localities: register_list("ortsliste.csv"),
            geometries: ArchiveSource {
                url: "https://data.statistik.gv.at/data/OGDEXT_GEM_1_STATISTIK_AUSTRIA_20230101.zip".to_string(),
                layer: "STATISTIK_AUSTRIA_GEM_20230101".to_string(),
                fields: vec!["g_id".to_string(), "g_name".to_string()],
            },
            vocabulary: StateVocabulary::Full,
            strict_vocabulary: false,
            unmatched: UnmatchedPolicy::Retain,
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file; absent fields fall back to the defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Serialize as pretty JSON (used by `atmap default-config`).
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize config")
    }

    #[inline]
    pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout_secs) }
}
