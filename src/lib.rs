#![doc = "atmap: fuses Austrian postal, municipal and boundary registries into one geo-table"]
mod config;
mod dissolve;
mod error;
mod fused;
mod geometry;
mod join;
mod keys;
mod link;
mod normalize;
mod pipeline;
mod render;
pub mod sources;
mod table;
mod vocab;

#[doc(inline)]
pub use config::{ArchiveSource, DelimitedSource, PipelineConfig, StateVocabulary, UnmatchedPolicy, WorkbookSource};

#[doc(inline)]
pub use error::{LinkError, PipelineError, Result, Stage};

#[doc(inline)]
pub use link::{POSTAL_LINK_MARKER, resolve_download_link, resolve_from_page};

#[doc(inline)]
pub use vocab::{STATE_ABBREVIATIONS, Substitution, substitute_states};

#[doc(inline)]
pub use keys::{dedup_rows, derive_prefix, derive_prefix_column, explode_whitespace};

#[doc(inline)]
pub use normalize::{
    PostalCodes, TableSchema, normalize_geometries, normalize_localities, normalize_municipalities,
    normalize_political_districts, normalize_postal_codes, normalize_table,
};

#[doc(inline)]
pub use join::{JoinReport, Side, enrich_localities, find_fanout, fuse, left_join};

#[doc(inline)]
pub use geometry::{GeometryUnits, shape_to_multipolygon, validate_multipolygon};

#[doc(inline)]
pub use fused::{FUSED_COLUMNS, FusedRecord, FusedTable, UNIT_INDEX};

#[doc(inline)]
pub use dissolve::{DissolveLevel, Dissolved, dissolve};

#[doc(inline)]
pub use sources::{Fetched, HttpSources, SourceDigest, SourceFetcher};

#[doc(inline)]
pub use render::{GeoJsonSink, Renderer, to_csv_bytes, to_geojson_bytes};

#[doc(inline)]
pub use pipeline::{Pipeline, PipelineOutput, SourceManifestEntry};
