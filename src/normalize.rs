use std::collections::BTreeSet;

use polars::prelude::*;
use tracing::{debug, info, warn};

use crate::{
    config::StateVocabulary,
    error::{FrameContext, Result, Stage},
    geometry::GeometryUnits,
    keys, table, vocab,
};

/// Length of the political-district prefix of a municipality code ("90101" -> "901").
pub const DISTRICT_PREFIX_LEN: usize = 3;

/// Country code stamped onto every postal-code record.
pub const COUNTRY: &str = "AT";

/// Declarative shape of one normalization: rename, retype, project, sort.
#[derive(Debug, Clone, Copy)]
pub struct TableSchema<'a> {
    pub table: &'a str,
    /// (source column, canonical column); every source column here is required.
    pub renames: &'a [(&'a str, &'a str)],
    /// Canonical columns coerced to trimmed strings.
    pub identifiers: &'a [&'a str],
    /// Canonical columns kept, in output order.
    pub projection: &'a [&'a str],
    pub sort_by: &'a [&'a str],
}

pub const POSTAL_CODES: TableSchema<'static> = TableSchema {
    table: "postal_codes",
    renames: &[("PLZ", "postal_code"), ("Ort", "city"), ("Bundesland", "state"), ("adressierbar", "adressierbar")],
    identifiers: &["postal_code", "city", "state", "adressierbar"],
    projection: &["country", "postal_code", "state", "city"],
    sort_by: &["country", "postal_code"],
};

pub const MUNICIPALITIES: TableSchema<'static> = TableSchema {
    table: "municipalities",
    renames: &[
        ("Municipality Code", "municipality_code"),
        ("Municipality Name", "municipality"),
        ("Postal Code of the Municipal", "postal_code"),
    ],
    identifiers: &["municipality_code", "municipality", "postal_code"],
    projection: &["municipality_code", "municipality", "postal_code"],
    sort_by: &["municipality_code"],
};

pub const POLITICAL_DISTRICTS: TableSchema<'static> = TableSchema {
    table: "political_districts",
    renames: &[
        ("Pol. District Code", "political_district_code"),
        ("Political District", "political_district"),
        ("Federal Province", "state"),
    ],
    identifiers: &["political_district_code", "political_district", "state"],
    projection: &["political_district_code", "political_district", "state"],
    sort_by: &["political_district_code"],
};

pub const LOCALITIES: TableSchema<'static> = TableSchema {
    table: "localities",
    renames: &[("Gemeindekennziffer", "gemeindekennziffer"), ("Postleitzahl", "postal_code")],
    identifiers: &["gemeindekennziffer", "postal_code"],
    projection: &["gemeindekennziffer", "postal_code"],
    sort_by: &[],
};

pub const GEOMETRIES: TableSchema<'static> = TableSchema {
    table: "geometries",
    renames: &[("g_id", "municipality_code"), ("g_name", "municipality")],
    identifiers: &["municipality_code", "municipality"],
    projection: &["municipality_code", "municipality"],
    sort_by: &[],
};

/// Apply a schema to a raw decoded table. Pure: the input is never modified.
pub fn normalize_table(raw: &DataFrame, schema: &TableSchema) -> Result<DataFrame> {
    let table = schema.table;
    let mut df = raw.clone();

    // Published headers sometimes carry stray whitespace.
    let trimmed = df.get_column_names().iter().map(|c| c.trim().to_string()).collect::<Vec<_>>();
    df.set_column_names(trimmed).frame_ctx(Stage::Normalize, table)?;

    let sources = schema.renames.iter().map(|(from, _)| *from).collect::<Vec<_>>();
    table::require_columns(&df, Stage::Normalize, table, &sources)?;

    let mut df = df.select(sources.iter().copied()).frame_ctx(Stage::Normalize, table)?;
    for (from, to) in schema.renames.iter().filter(|(from, to)| from != to) {
        df.rename(from, (*to).into()).frame_ctx(Stage::Normalize, table)?;
    }

    for &name in schema.identifiers {
        let coerced = table::to_identifier_column(df.column(name).frame_ctx(Stage::Normalize, table)?)
            .frame_ctx(Stage::Normalize, table)?;
        let trimmed = coerced.str().frame_ctx(Stage::Normalize, table)?
            .into_iter()
            .map(|v| v.map(str::trim).filter(|v| !v.is_empty()))
            .collect::<Vec<_>>();
        df.with_column(Column::new(name.into(), trimmed)).frame_ctx(Stage::Normalize, table)?;
    }

    let df = df.select(schema.projection.iter().copied()).frame_ctx(Stage::Normalize, table)?;
    if schema.sort_by.is_empty() {
        return Ok(df);
    }
    table::sort_stable(&df, schema.sort_by).frame_ctx(Stage::Normalize, table)
}

/// Normalized postal-code registry plus the abbreviations the vocabulary could not map.
#[derive(Debug, Clone)]
pub struct PostalCodes {
    pub data: DataFrame,
    pub unmapped_states: BTreeSet<String>,
}

/// Post AG registry: keep addressable codes only, stamp the country, map state abbreviations.
pub fn normalize_postal_codes(raw: &DataFrame, vocabulary: StateVocabulary, strict: bool) -> Result<PostalCodes> {
    let schema = TableSchema { projection: &["postal_code", "state", "city", "adressierbar"], sort_by: &[], ..POSTAL_CODES };
    let table = schema.table;
    let df = normalize_table(raw, &schema)?;

    let mask = df.column("adressierbar").frame_ctx(Stage::Normalize, table)?
        .str().frame_ctx(Stage::Normalize, table)?
        .into_iter()
        .map(|v| v == Some("Ja"))
        .collect::<Vec<_>>();
    let mut df = df.filter(&BooleanChunked::from_slice("adressierbar".into(), &mask))
        .frame_ctx(Stage::Normalize, table)?;
    debug!(table, kept = df.height(), dropped = mask.len() - df.height(), "filtered non-addressable postal codes");

    let height = df.height();
    df.with_column(Column::new("country".into(), vec![COUNTRY; height]))
        .frame_ctx(Stage::Normalize, table)?;

    let substituted = vocab::substitute_states(&df, table, "state", vocabulary, strict)?;
    if !substituted.unmapped.is_empty() {
        warn!(table, unmapped = ?substituted.unmapped, "state abbreviations without a mapping were set to null");
    }

    let df = substituted.data
        .select(POSTAL_CODES.projection.iter().copied())
        .frame_ctx(Stage::Normalize, table)?;
    let data = table::sort_stable(&df, POSTAL_CODES.sort_by).frame_ctx(Stage::Normalize, table)?;
    info!(table, rows = data.height(), "normalized");

    Ok(PostalCodes { data, unmapped_states: substituted.unmapped })
}

pub fn normalize_municipalities(raw: &DataFrame) -> Result<DataFrame> {
    let data = normalize_table(raw, &MUNICIPALITIES)?;
    info!(table = MUNICIPALITIES.table, rows = data.height(), "normalized");
    Ok(data)
}

pub fn normalize_political_districts(raw: &DataFrame) -> Result<DataFrame> {
    let data = normalize_table(raw, &POLITICAL_DISTRICTS)?;
    info!(table = POLITICAL_DISTRICTS.table, rows = data.height(), "normalized");
    Ok(data)
}

/// Locality list -> unique (political_district_code, postal_code) pairs.
///
/// The district is the 3-character prefix of the municipality code, and the packed
/// postal-code field is exploded to one row per code before deduplication.
pub fn normalize_localities(raw: &DataFrame) -> Result<DataFrame> {
    let table = LOCALITIES.table;
    let df = normalize_table(raw, &LOCALITIES)?;
    let df = keys::derive_prefix_column(&df, table, "gemeindekennziffer", "political_district_code", DISTRICT_PREFIX_LEN)?;
    let df = keys::explode_whitespace(&df, table, "postal_code")?;
    let df = df.select(["political_district_code", "postal_code"]).frame_ctx(Stage::DeriveKeys, table)?;
    let data = keys::dedup_rows(&df, table)?;
    info!(table, rows = data.height(), exploded = df.height(), "normalized");
    Ok(data)
}

/// Boundary attributes renamed onto the municipality key; shapes are carried through unchanged.
pub fn normalize_geometries(raw: &GeometryUnits) -> Result<GeometryUnits> {
    let data = normalize_table(&raw.data, &GEOMETRIES)?;
    info!(table = GEOMETRIES.table, rows = data.height(), "normalized");
    raw.with_data(data).map_err(|e| crate::error::PipelineError::fetch(GEOMETRIES.table, e))
}
