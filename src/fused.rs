use geo::MultiPolygon;
use polars::prelude::*;

use crate::{
    error::{FrameContext, PipelineError, Result, Stage},
    geometry::GeometryUnits,
    table,
};

/// Row-index column linking a fused row back to its geometry unit.
pub const UNIT_INDEX: &str = "idx";

/// Attribute columns of the fused table, in output order.
pub const FUSED_COLUMNS: [&str; 6] = ["country", "state", "municipality_code", "municipality", "city", "postal_code"];

/// One fused row: matched attributes plus the (shared) shape of its geometry unit.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedRecord<'a> {
    pub unit: usize,
    pub country: Option<&'a str>,
    pub state: Option<&'a str>,
    pub municipality_code: Option<&'a str>,
    pub municipality: Option<&'a str>,
    pub city: Option<&'a str>,
    pub postal_code: Option<&'a str>,
    pub geometry: &'a MultiPolygon<f64>,
}

/// Pipeline output table: attributes in `data`, shapes held once per unit and referenced by `idx`.
#[derive(Debug, Clone)]
pub struct FusedTable {
    pub data: DataFrame,
    units: GeometryUnits,
    unit_index: Vec<usize>,
}

impl FusedTable {
    pub(crate) fn new(data: DataFrame, units: GeometryUnits) -> Result<Self> {
        let unit_index = data.column(UNIT_INDEX)
            .map_err(|_| PipelineError::schema(Stage::Join, "fused", UNIT_INDEX))?
            .idx().frame_ctx(Stage::Join, "fused")?
            .into_iter()
            .map(|i| i.map(|i| i as usize).filter(|&i| i < units.len()))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| PipelineError::schema(Stage::Join, "fused", UNIT_INDEX))?;

        Ok(Self { data, units, unit_index })
    }

    #[inline] pub fn len(&self) -> usize { self.data.height() }

    #[inline] pub fn is_empty(&self) -> bool { self.data.height() == 0 }

    #[inline] pub fn units(&self) -> &GeometryUnits { &self.units }

    /// Geometry-unit index of every row.
    #[inline] pub fn unit_index(&self) -> &[usize] { &self.unit_index }

    /// Shape of row `row`.
    #[inline]
    pub fn geometry(&self, row: usize) -> Option<&MultiPolygon<f64>> {
        self.unit_index.get(row).and_then(|&i| self.units.shape(i))
    }

    /// Typed view over every row.
    pub fn records(&self) -> Result<Vec<FusedRecord<'_>>> {
        let columns = FUSED_COLUMNS.iter()
            .map(|&name| table::str_column(&self.data, Stage::Join, "fused", name))
            .collect::<Result<Vec<_>>>()?;

        Ok(self.unit_index.iter().enumerate()
            .filter_map(|(row, &unit)| Some(FusedRecord {
                unit,
                country: columns[0].get(row),
                state: columns[1].get(row),
                municipality_code: columns[2].get(row),
                municipality: columns[3].get(row),
                city: columns[4].get(row),
                postal_code: columns[5].get(row),
                geometry: self.units.shape(unit)?,
            }))
            .collect())
    }

    /// Keep only rows whose postal-code join found a registry entry.
    ///
    /// `country` is stamped on every registry row, so it is null exactly when nothing matched.
    /// `state` is not used: a matched row can carry a null state from an unmapped abbreviation.
    pub fn drop_unmatched(&self) -> Result<Self> {
        let mask = table::str_column(&self.data, Stage::Join, "fused", "country")?
            .into_iter()
            .map(|s| s.is_some())
            .collect::<Vec<_>>();
        let data = self.data.filter(&BooleanChunked::from_slice("matched".into(), &mask))
            .frame_ctx(Stage::Join, "fused")?;
        Self::new(data, self.units.clone())
    }
}

impl FusedTable {
    /// Attribute rows ordered by (country, postal_code), unmatched rows last, for export.
    pub fn export_frame(&self) -> Result<DataFrame> {
        table::sort_stable(&self.data, &["country", "postal_code"]).frame_ctx(Stage::Render, "fused")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::tests::rect;

    fn table() -> FusedTable {
        let units = GeometryUnits::new(
            DataFrame::new(vec![Column::new("municipality_code".into(), &["10101", "30303"])]).unwrap(),
            vec![rect(0.0, 1.0), rect(5.0, 6.0)],
        ).unwrap();
        let data = DataFrame::new(vec![
            Column::new(UNIT_INDEX.into(), &[0 as IdxSize, 0, 1]),
            Column::new("country".into(), &[Some("AT"), Some("AT"), None]),
            Column::new("state".into(), &[Some("Vienna"), Some("Vienna"), None]),
            Column::new("municipality_code".into(), &["10101", "10101", "30303"]),
            Column::new("municipality".into(), &["Wien", "Wien", "Drittheim"]),
            Column::new("city".into(), &[Some("Wien"), Some("Wien Mitte"), None]),
            Column::new("postal_code".into(), &[Some("1010"), Some("1010"), Some("3030")]),
        ]).unwrap();
        FusedTable::new(data, units).unwrap()
    }

    #[test]
    fn fan_out_rows_share_the_unit_shape() {
        let fused = table();
        assert_eq!(fused.unit_index(), &[0, 0, 1]);
        assert_eq!(fused.geometry(0), fused.geometry(1));
        assert_ne!(fused.geometry(1), fused.geometry(2));
        assert!(fused.geometry(3).is_none());

        let records = fused.records().unwrap();
        assert_eq!(records[1].city, Some("Wien Mitte"));
        assert_eq!(records[2].state, None);
    }

    #[test]
    fn export_frame_orders_by_country_and_postal_code() {
        let units = GeometryUnits::new(
            DataFrame::new(vec![Column::new("municipality_code".into(), &["20202", "30303", "10101"])]).unwrap(),
            vec![rect(0.0, 1.0), rect(1.0, 2.0), rect(2.0, 3.0)],
        ).unwrap();
        let data = DataFrame::new(vec![
            Column::new(UNIT_INDEX.into(), &[0 as IdxSize, 1, 2]),
            Column::new("country".into(), &[Some("AT"), None, Some("AT")]),
            Column::new("state".into(), &[Some("Lower Austria"), None, Some("Vienna")]),
            Column::new("municipality_code".into(), &["20202", "30303", "10101"]),
            Column::new("municipality".into(), &["Zweitdorf", "Drittheim", "Wien"]),
            Column::new("city".into(), &[Some("A"), None, Some("Wien")]),
            Column::new("postal_code".into(), &["2020", "3030", "1010"]),
        ]).unwrap();
        let fused = FusedTable::new(data, units).unwrap();

        let export = fused.export_frame().unwrap();
        let codes = export.column("municipality_code").unwrap().str().unwrap().into_iter().collect::<Vec<_>>();
        assert_eq!(codes, vec![Some("10101"), Some("20202"), Some("30303")]);
        // The table itself keeps unit order.
        assert_eq!(fused.unit_index(), &[0, 1, 2]);
    }

    #[test]
    fn unmatched_rows_can_be_dropped() {
        let kept = table().drop_unmatched().unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept.unit_index(), &[0, 0]);
        assert_eq!(kept.units().len(), 2);
    }

    #[test]
    fn matched_rows_with_unmapped_state_are_kept() {
        let units = GeometryUnits::new(
            DataFrame::new(vec![Column::new("municipality_code".into(), &["20202", "30303"])]).unwrap(),
            vec![rect(0.0, 1.0), rect(5.0, 6.0)],
        ).unwrap();
        let data = DataFrame::new(vec![
            Column::new(UNIT_INDEX.into(), &[0 as IdxSize, 1]),
            Column::new("country".into(), &[Some("AT"), None]),
            Column::new("state".into(), &[None::<&str>, None]),
            Column::new("municipality_code".into(), &["20202", "30303"]),
            Column::new("municipality".into(), &["Zweitdorf", "Drittheim"]),
            Column::new("city".into(), &[Some("A"), None]),
            Column::new("postal_code".into(), &[Some("2020"), Some("3030")]),
        ]).unwrap();

        let kept = FusedTable::new(data, units).unwrap().drop_unmatched().unwrap();
        assert_eq!(kept.unit_index(), &[0]);
        assert_eq!(kept.records().unwrap()[0].city, Some("A"));
    }

    #[test]
    fn out_of_range_unit_index_is_rejected() {
        let units = GeometryUnits::new(DataFrame::empty(), vec![]).unwrap();
        let data = DataFrame::new(vec![Column::new(UNIT_INDEX.into(), &[0 as IdxSize])]).unwrap();
        assert!(FusedTable::new(data, units).is_err());
    }
}
