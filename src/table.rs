//! Small helpers over polars frames whose identifier columns are all strings.

use polars::prelude::*;

use crate::error::{FrameContext, PipelineError, Result, Stage};

/// Fail with a schema error unless every named column is present.
pub(crate) fn require_columns(df: &DataFrame, stage: Stage, table: &str, columns: &[&str]) -> Result<()> {
    columns.iter()
        .find(|&&name| df.column(name).is_err())
        .map_or(Ok(()), |&name| Err(PipelineError::schema(stage, table, name)))
}

/// Borrow a column as strings, failing with a schema error if it is absent.
pub(crate) fn str_column<'a>(df: &'a DataFrame, stage: Stage, table: &str, name: &str) -> Result<&'a StringChunked> {
    df.column(name)
        .map_err(|_| PipelineError::schema(stage, table, name))?
        .str()
        .frame_ctx(stage, table)
}

/// Coerce an identifier column to strings without losing leading zeros or
/// turning whole numbers into `"1010.0"`.
pub(crate) fn to_identifier_column(column: &Column) -> PolarsResult<Column> {
    let name = column.name().clone();
    match column.dtype() {
        DataType::String => Ok(column.clone()),
        DataType::Float32 | DataType::Float64 => {
            let values = column.cast(&DataType::Float64)?;
            let strings = values.f64()?.into_iter()
                .map(|v| v.map(|v| if v.fract() == 0.0 { format!("{}", v as i64) } else { v.to_string() }))
                .collect::<Vec<_>>();
            Ok(Column::new(name, strings))
        }
        _ => column.cast(&DataType::String),
    }
}

/// Select rows by position, in the given order (repeats allowed).
pub(crate) fn take_rows(df: &DataFrame, rows: Vec<IdxSize>) -> PolarsResult<DataFrame> {
    df.take(&IdxCa::from_vec("rows".into(), rows))
}

/// Stable sort on the given columns, nulls last.
pub(crate) fn sort_stable(df: &DataFrame, by: &[&str]) -> PolarsResult<DataFrame> {
    df.sort(
        by.iter().map(|&c| PlSmallStr::from(c)).collect::<Vec<_>>(),
        SortMultipleOptions::default()
            .with_maintain_order(true)
            .with_nulls_last(true),
    )
}

/// Owned string cells of one row, in column order (used for hashing whole rows).
pub(crate) fn row_cells(columns: &[&StringChunked], row: usize) -> Vec<Option<String>> {
    columns.iter().map(|c| c.get(row).map(str::to_string)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_identifiers_keep_integer_form() {
        let col = Column::new("plz".into(), &[Some(1010.0f64), None, Some(2020.0)]);
        let out = to_identifier_column(&col).unwrap();
        let values = out.str().unwrap().into_iter().collect::<Vec<_>>();
        assert_eq!(values, vec![Some("1010"), None, Some("2020")]);
    }

    #[test]
    fn string_identifiers_are_untouched() {
        let col = Column::new("code".into(), &["01010", "90101"]);
        let out = to_identifier_column(&col).unwrap();
        assert_eq!(out.str().unwrap().get(0), Some("01010"));
    }

    #[test]
    fn missing_column_is_schema_error() {
        let df = DataFrame::new(vec![Column::new("a".into(), &["x"])]).unwrap();
        let err = require_columns(&df, Stage::Normalize, "t", &["a", "b"]).unwrap_err();
        assert!(matches!(err, PipelineError::Schema { ref column, .. } if column == "b"));
    }
}
