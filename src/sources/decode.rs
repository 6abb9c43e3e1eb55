use std::{collections::HashSet, io::Cursor, path::Path};

use anyhow::{Context, Result, bail};
use calamine::{Data, Reader, open_workbook_auto_from_rs};
use polars::{frame::DataFrame, io::SerReader, prelude::{Column, CsvReadOptions}};
use shapefile::dbase::{FieldValue, Record};

use crate::geometry::{GeometryUnits, shape_to_multipolygon};

/// Decode a delimited text table, dropping `skip_rows` banner lines above the header
/// and `skip_footer` lines at the end. Every column is read as a string.
pub fn read_delimited_bytes(bytes: &[u8], delimiter: char, skip_rows: usize, skip_footer: usize) -> Result<DataFrame> {
    let text = std::str::from_utf8(bytes).context("delimited source is not valid UTF-8")?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let lines = text.lines().collect::<Vec<_>>();
    let end = lines.len().saturating_sub(skip_footer);
    if skip_rows >= end {
        bail!("no header row left after skipping {skip_rows} leading and {skip_footer} trailing lines of {}", lines.len());
    }
    let body = lines[skip_rows..end].join("\n");

    if !delimiter.is_ascii() {
        bail!("delimiter {delimiter:?} is not a single byte");
    }

    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .map_parse_options(|po| po.with_separator(delimiter as u8))
        .into_reader_with_file_handle(Cursor::new(body.into_bytes()))
        .finish()
        .context("Failed to parse delimited source")
}

/// Decode one sheet of an Excel workbook (.xls or .xlsx). The first row is the header.
pub fn read_workbook_bytes(bytes: Vec<u8>, sheet: &str) -> Result<DataFrame> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
        .context("Failed to open workbook")?;
    let range = workbook.worksheet_range(sheet)
        .with_context(|| format!("Failed to read sheet {sheet:?}"))?;

    let mut rows = range.rows();
    let header = rows.next()
        .with_context(|| format!("sheet {sheet:?} is empty"))?;
    let names = unique_headers(header.iter().map(|cell| cell_to_string(cell).unwrap_or_default()));

    let mut columns = vec![Vec::<Option<String>>::new(); names.len()];
    for row in rows {
        for (i, values) in columns.iter_mut().enumerate() {
            values.push(row.get(i).and_then(cell_to_string));
        }
    }

    Ok(DataFrame::new(
        names.into_iter().zip(columns)
            .map(|(name, values)| Column::new(name.into(), values))
            .collect(),
    )?)
}

/// Text form of a workbook cell; whole numbers lose their ".0" so codes stay codes.
fn cell_to_string(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => Some(s.clone()),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => Some(format!("{}", *f as i64)),
        Data::Int(i) => Some(i.to_string()),
        other => Some(other.to_string()),
    }
}

/// Make header names non-empty and unique ("", "x", "x" -> "column_0", "x", "x_2").
fn unique_headers(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names.enumerate()
        .map(|(i, name)| {
            let base = match name.trim() {
                "" => format!("column_{i}"),
                trimmed => trimmed.to_string(),
            };
            let mut candidate = base.clone();
            let mut n = 2;
            while !seen.insert(candidate.clone()) {
                candidate = format!("{base}_{n}");
                n += 1;
            }
            candidate
        })
        .collect()
}

/// Reads all shapes of a `.shp` file plus the allow-listed attribute fields as string columns.
///
/// Fields absent from the file are left out of the table (the normalizer reports them).
pub fn read_shapefile(path: &Path, fields: &[String]) -> Result<GeometryUnits> {
    let mut reader = shapefile::Reader::from_path(path)
        .with_context(|| format!("Failed to open shapefile: {}", path.display()))?;

    let mut shapes = Vec::with_capacity(reader.shape_count()?);
    let mut records = Vec::with_capacity(shapes.capacity());
    for (i, result) in reader.iter_shapes_and_records().enumerate() {
        let (shape, record) = result
            .with_context(|| format!("Error reading shape+record {i} of {}", path.display()))?;
        shapes.push(shape_to_multipolygon(shape)
            .with_context(|| format!("Error converting shape {i} of {}", path.display()))?);
        records.push(record);
    }

    let present = fields.iter()
        .filter(|field| records.first().is_some_and(|record| record.get(field).is_some()))
        .collect::<Vec<_>>();

    let columns = present.into_iter()
        .map(|field| {
            let values = records.iter()
                .map(|record| field_to_string(record, field))
                .collect::<Result<Vec<_>>>()?;
            Ok(Column::new(field.as_str().into(), values))
        })
        .collect::<Result<Vec<_>>>()?;

    GeometryUnits::new(DataFrame::new(columns)?, shapes)
}

/// Attribute value as a string, numeric identifiers without a fractional part.
fn field_to_string(record: &Record, field: &str) -> Result<Option<String>> {
    Ok(match record.get(field) {
        None => None,
        Some(FieldValue::Character(s)) => s.as_ref().map(|s| s.trim().to_string()),
        Some(FieldValue::Numeric(n)) => n.map(|n| if n.fract() == 0.0 { format!("{}", n as i64) } else { n.to_string() }),
        Some(FieldValue::Integer(n)) => Some(n.to_string()),
        Some(FieldValue::Float(f)) => f.map(|f| f.to_string()),
        Some(FieldValue::Double(d)) => Some(d.to_string()),
        Some(FieldValue::Logical(b)) => b.map(|b| b.to_string()),
        Some(FieldValue::Memo(s)) => Some(s.clone()),
        Some(other) => bail!("unsupported field type for {field}: {other:?}"),
    })
}
