use ahash::{AHashMap, AHashSet};
use polars::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    error::{FrameContext, PipelineError, Result, Stage},
    fused::{FUSED_COLUMNS, FusedTable, UNIT_INDEX},
    geometry::GeometryUnits,
    table,
};

const LEFT_ROW: &str = "__left_row";
const RIGHT_ROW: &str = "__right_row";
const FIRST_JOIN: &str = "geometries_municipalities";

/// A named table taking part in a join.
#[derive(Debug, Clone, Copy)]
pub struct Side<'a> {
    pub table: &'a str,
    pub data: &'a DataFrame,
}

impl<'a> Side<'a> {
    #[inline] pub fn new(table: &'a str, data: &'a DataFrame) -> Self { Self { table, data } }
}

/// Row accounting for one left join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinReport {
    pub name: String,
    pub key: String,
    pub left_rows: usize,
    pub right_rows: usize,
    pub output_rows: usize,
    /// Distinct left keys that matched more than one right row.
    pub fanned_out_keys: usize,
    /// Left rows whose key matched nothing (including null keys).
    pub unmatched_rows: usize,
}

/// Left join on a single key column.
///
/// Every left row appears at least once, in left order; a key matching `n > 1`
/// right rows repeats the left row `n` times in right order. Unmatched rows get
/// nulls in the right-hand columns. Null keys never match.
pub fn left_join(name: &str, left: Side, right: Side, key: &str) -> Result<(DataFrame, JoinReport)> {
    require_key(name, left, key)?;
    require_key(name, right, key)?;

    let left_keys = table::str_column(left.data, Stage::Join, left.table, key)?;
    let right_keys = table::str_column(right.data, Stage::Join, right.table, key)?;

    let mut right_counts = AHashMap::<&str, usize>::new();
    right_keys.into_iter().flatten().for_each(|k| *right_counts.entry(k).or_default() += 1);

    let mut fanned_out = AHashSet::<&str>::new();
    let mut unmatched_rows = 0;
    for k in left_keys.into_iter() {
        match k.and_then(|k| right_counts.get(k).map(|&n| (k, n))) {
            None => unmatched_rows += 1,
            Some((k, n)) if n > 1 => { fanned_out.insert(k); }
            Some(_) => {}
        }
    }

    let lhs = left.data.with_row_index(LEFT_ROW.into(), None).frame_ctx(Stage::Join, left.table)?;
    let rhs = right.data.with_row_index(RIGHT_ROW.into(), None).frame_ctx(Stage::Join, right.table)?;

    let joined = lhs.left_join(&rhs, [key], [key]).frame_ctx(Stage::Join, name)?;
    let joined = table::sort_stable(&joined, &[LEFT_ROW, RIGHT_ROW]).frame_ctx(Stage::Join, name)?;
    let joined = joined.drop(LEFT_ROW).and_then(|df| df.drop(RIGHT_ROW)).frame_ctx(Stage::Join, name)?;

    let report = JoinReport {
        name: name.to_string(),
        key: key.to_string(),
        left_rows: left.data.height(),
        right_rows: right.data.height(),
        output_rows: joined.height(),
        fanned_out_keys: fanned_out.len(),
        unmatched_rows,
    };
    info!(
        join = name, key, left = report.left_rows, right = report.right_rows,
        output = report.output_rows, fanned_out_keys = report.fanned_out_keys,
        unmatched = report.unmatched_rows, "left join"
    );

    Ok((joined, report))
}

fn require_key(join: &str, side: Side, key: &str) -> Result<()> {
    match side.data.column(key) {
        Ok(_) => Ok(()),
        Err(_) => Err(PipelineError::JoinKey {
            join: join.to_string(),
            table: side.table.to_string(),
            column: key.to_string(),
        }),
    }
}

/// All rows whose non-null `key` value occurs more than once, ordered by key
/// (original order within a key). Informational; an empty result is not an error.
pub fn find_fanout(df: &DataFrame, table: &str, key: &str) -> Result<DataFrame> {
    let keys = table::str_column(df, Stage::Join, table, key)?;

    let mut counts = AHashMap::<&str, usize>::new();
    keys.into_iter().flatten().for_each(|k| *counts.entry(k).or_default() += 1);

    let mask = keys.into_iter()
        .map(|k| k.is_some_and(|k| counts.get(k).is_some_and(|&n| n > 1)))
        .collect::<Vec<_>>();

    let duplicated = df.filter(&BooleanChunked::from_slice("fanout".into(), &mask))
        .frame_ctx(Stage::Join, table)?;
    table::sort_stable(&duplicated, &[key]).frame_ctx(Stage::Join, table)
}

/// Localities joined to their political district (and so to their state).
pub fn enrich_localities(localities: &DataFrame, districts: &DataFrame) -> Result<(DataFrame, JoinReport)> {
    let (joined, report) = left_join(
        "localities_districts",
        Side::new("localities", localities),
        Side::new("political_districts", districts),
        "political_district_code",
    )?;

    let df = joined
        .select(["state", "political_district_code", "political_district", "postal_code"])
        .frame_ctx(Stage::Join, "localities")?;
    let df = table::sort_stable(&df, &["political_district_code", "postal_code"]).frame_ctx(Stage::Join, "localities")?;

    Ok((df, report))
}

/// Geometry units extended with municipality postal codes and then postal-registry attributes.
pub fn fuse(units: &GeometryUnits, municipalities: &DataFrame, postal_codes: &DataFrame) -> Result<(FusedTable, Vec<JoinReport>)> {
    let base = units.data.with_row_index(UNIT_INDEX.into(), None).frame_ctx(Stage::Join, "geometries")?;

    // A missing key is a join-key error; a missing projected column is a schema error.
    require_key(FIRST_JOIN, Side::new("municipalities", municipalities), "municipality_code")?;
    table::require_columns(municipalities, Stage::Join, "municipalities", &["postal_code"])?;
    let municipal_postal = municipalities
        .select(["municipality_code", "postal_code"])
        .frame_ctx(Stage::Join, "municipalities")?;

    let (with_postal, first) = left_join(
        FIRST_JOIN,
        Side::new("geometries", &base),
        Side::new("municipalities", &municipal_postal),
        "municipality_code",
    )?;

    let (with_registry, second) = left_join(
        "geometries_postal_codes",
        Side::new("geometries_municipalities", &with_postal),
        Side::new("postal_codes", postal_codes),
        "postal_code",
    )?;

    let columns = std::iter::once(UNIT_INDEX).chain(FUSED_COLUMNS).collect::<Vec<_>>();
    table::require_columns(&with_registry, Stage::Join, "fused", &columns)?;
    let data = with_registry.select(columns).frame_ctx(Stage::Join, "fused")?;

    if data.height() != units.len() {
        warn!(units = units.len(), rows = data.height(), "fused table fans out past one row per geometry unit");
    }

    Ok((FusedTable::new(data, units.clone())?, vec![first, second]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(df: &DataFrame, name: &str) -> Vec<Option<String>> {
        df.column(name).unwrap().str().unwrap().into_iter().map(|v| v.map(str::to_string)).collect()
    }

    fn frame(columns: &[(&str, &[Option<&str>])]) -> DataFrame {
        DataFrame::new(columns.iter().map(|(name, values)| Column::new((*name).into(), *values)).collect()).unwrap()
    }

    #[test]
    fn unique_right_keys_preserve_row_count() {
        let left = frame(&[("k", &[Some("a"), Some("b"), None])]);
        let right = frame(&[("k", &[Some("a"), Some("b")]), ("v", &[Some("1"), Some("2")])]);

        let (out, report) = left_join("t", Side::new("l", &left), Side::new("r", &right), "k").unwrap();
        assert_eq!(out.height(), left.height());
        assert_eq!(report.fanned_out_keys, 0);
        assert_eq!(report.unmatched_rows, 1);
        assert_eq!(strings(&out, "v"), vec![Some("1".into()), Some("2".into()), None]);
    }

    #[test]
    fn duplicate_right_keys_fan_out_in_place() {
        let left = frame(&[("k", &[Some("b"), Some("a"), Some("c")])]);
        let right = frame(&[
            ("k", &[Some("a"), Some("b"), Some("a")]),
            ("v", &[Some("a1"), Some("b1"), Some("a2")]),
        ]);

        let (out, report) = left_join("t", Side::new("l", &left), Side::new("r", &right), "k").unwrap();
        assert!(out.height() > left.height());
        assert_eq!(out.height(), 4);
        assert_eq!(report.fanned_out_keys, 1);
        assert_eq!(strings(&out, "k"), vec![Some("b".into()), Some("a".into()), Some("a".into()), Some("c".into())]);
        assert_eq!(strings(&out, "v"), vec![Some("b1".into()), Some("a1".into()), Some("a2".into()), None]);
    }

    #[test]
    fn missing_key_on_either_side_is_join_key_error() {
        let left = frame(&[("k", &[Some("a")])]);
        let right = frame(&[("other", &[Some("a")])]);

        let err = left_join("t", Side::new("l", &left), Side::new("r", &right), "k").unwrap_err();
        assert!(matches!(err, PipelineError::JoinKey { ref table, .. } if table == "r"));

        let err = left_join("t", Side::new("r", &right), Side::new("l", &left), "k").unwrap_err();
        assert!(matches!(err, PipelineError::JoinKey { ref table, .. } if table == "r"));
    }

    #[test]
    fn fuse_reports_missing_municipality_key_as_join_key_error() {
        let units = GeometryUnits::new(
            frame(&[("municipality_code", &[Some("10101")]), ("municipality", &[Some("Wien")])]),
            vec![crate::geometry::tests::rect(0.0, 1.0)],
        ).unwrap();
        let municipalities = frame(&[("gkz", &[Some("10101")]), ("postal_code", &[Some("1010")])]);
        let postal_codes = frame(&[
            ("country", &[Some("AT")]),
            ("postal_code", &[Some("1010")]),
            ("state", &[Some("Vienna")]),
            ("city", &[Some("Wien")]),
        ]);

        let err = fuse(&units, &municipalities, &postal_codes).unwrap_err();
        assert_eq!(err.stage(), Stage::Join);
        assert!(matches!(
            err,
            PipelineError::JoinKey { ref join, ref table, ref column }
                if join == "geometries_municipalities" && table == "municipalities" && column == "municipality_code"
        ));
    }

    #[test]
    fn fuse_requires_projected_postal_code() {
        let units = GeometryUnits::new(
            frame(&[("municipality_code", &[Some("10101")]), ("municipality", &[Some("Wien")])]),
            vec![crate::geometry::tests::rect(0.0, 1.0)],
        ).unwrap();
        let municipalities = frame(&[("municipality_code", &[Some("10101")])]);
        let postal_codes = frame(&[("postal_code", &[Some("1010")])]);

        let err = fuse(&units, &municipalities, &postal_codes).unwrap_err();
        assert!(matches!(err, PipelineError::Schema { ref column, .. } if column == "postal_code"));
    }

    #[test]
    fn fanout_lists_duplicated_keys_sorted() {
        let df = frame(&[
            ("postal_code", &[Some("3000"), Some("1010"), Some("2020"), Some("1010"), None, None]),
            ("district", &[Some("301"), Some("901"), Some("310"), Some("902"), Some("x"), Some("y")]),
        ]);

        let out = find_fanout(&df, "localities", "postal_code").unwrap();
        assert_eq!(strings(&out, "postal_code"), vec![Some("1010".into()), Some("1010".into())]);
        assert_eq!(strings(&out, "district"), vec![Some("901".into()), Some("902".into())]);
    }

    #[test]
    fn fanout_of_unique_keys_is_empty() {
        let df = frame(&[("k", &[Some("a"), Some("b")])]);
        assert_eq!(find_fanout(&df, "t", "k").unwrap().height(), 0);
    }

    #[test]
    fn localities_gain_state_and_district() {
        let localities = frame(&[
            ("political_district_code", &[Some("901"), Some("310"), Some("999")]),
            ("postal_code", &[Some("1010"), Some("3100"), Some("9999")]),
        ]);
        let districts = frame(&[
            ("political_district_code", &[Some("310"), Some("901")]),
            ("political_district", &[Some("St. Pölten"), Some("Wien")]),
            ("state", &[Some("Lower Austria"), Some("Vienna")]),
        ]);

        let (out, report) = enrich_localities(&localities, &districts).unwrap();
        assert_eq!(report.output_rows, 3);
        assert_eq!(strings(&out, "political_district_code"), vec![Some("310".into()), Some("901".into()), Some("999".into())]);
        assert_eq!(strings(&out, "state"), vec![Some("Lower Austria".into()), Some("Vienna".into()), None]);
    }
}
