use ahash::AHashSet;
use polars::prelude::*;

use crate::{error::{FrameContext, PipelineError, Result, Stage}, table};

/// Parent-level code of a fixed-width composite code (e.g. "90101" -> "901" for length 3).
pub fn derive_prefix(table: &str, code: &str, len: usize) -> Result<String> {
    let code = code.trim();
    match code.char_indices().nth(len) {
        Some((end, _)) => Ok(code[..end].to_string()),
        None if code.chars().count() == len => Ok(code.to_string()),
        None => Err(PipelineError::MalformedKey { table: table.to_string(), code: code.to_string(), len }),
    }
}

/// Add `target` holding the `len`-character prefix of every `source` code. Null codes stay null.
pub fn derive_prefix_column(df: &DataFrame, table: &str, source: &str, target: &str, len: usize) -> Result<DataFrame> {
    let prefixes = table::str_column(df, Stage::DeriveKeys, table, source)?
        .into_iter()
        .map(|code| code.map(|code| derive_prefix(table, code, len)).transpose())
        .collect::<Result<Vec<_>>>()?;

    let mut out = df.clone();
    out.with_column(Column::new(target.into(), prefixes))
        .frame_ctx(Stage::DeriveKeys, table)?;
    Ok(out)
}

/// One output row per whitespace-separated value of `column`, other fields copied.
///
/// Rows whose field is null or holds no values produce no output at all.
pub fn explode_whitespace(df: &DataFrame, table: &str, column: &str) -> Result<DataFrame> {
    let packed = table::str_column(df, Stage::DeriveKeys, table, column)?;

    let mut rows = Vec::with_capacity(df.height());
    let mut values = Vec::with_capacity(df.height());
    for (i, field) in packed.into_iter().enumerate() {
        for value in field.into_iter().flat_map(str::split_whitespace) {
            rows.push(i as IdxSize);
            values.push(value.to_string());
        }
    }

    let mut out = table::take_rows(df, rows).frame_ctx(Stage::DeriveKeys, table)?;
    out.with_column(Column::new(column.into(), values))
        .frame_ctx(Stage::DeriveKeys, table)?;
    Ok(out)
}

/// Drop exact duplicate rows (all columns), keeping first occurrences in their original order.
pub fn dedup_rows(df: &DataFrame, table: &str) -> Result<DataFrame> {
    let names = df.get_column_names().into_iter().map(|c| c.to_string()).collect::<Vec<_>>();
    let columns = names.iter()
        .map(|name| table::str_column(df, Stage::DeriveKeys, table, name))
        .collect::<Result<Vec<_>>>()?;

    let mut seen = AHashSet::with_capacity(df.height());
    let keep = (0..df.height())
        .filter(|&i| seen.insert(table::row_cells(&columns, i)))
        .map(|i| i as IdxSize)
        .collect::<Vec<_>>();

    table::take_rows(df, keep).frame_ctx(Stage::DeriveKeys, table)
}
