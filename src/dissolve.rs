use std::{collections::BTreeMap, fmt, str::FromStr};

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::{PipelineError, Result},
    fused::{FusedRecord, FusedTable},
    geometry::{canonical_cmp, union_all, validate_multipolygon},
};

/// Hierarchy level a dissolve groups by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DissolveLevel {
    State,
    Municipality,
    PostalCode,
}

impl DissolveLevel {
    pub const ALL: [DissolveLevel; 3] = [DissolveLevel::State, DissolveLevel::Municipality, DissolveLevel::PostalCode];

    /// Fused-table column holding the grouping key.
    pub fn column(self) -> &'static str {
        match self {
            DissolveLevel::State => "state",
            DissolveLevel::Municipality => "municipality",
            DissolveLevel::PostalCode => "postal_code",
        }
    }

    fn key<'a>(self, record: &FusedRecord<'a>) -> Option<&'a str> {
        match self {
            DissolveLevel::State => record.state,
            DissolveLevel::Municipality => record.municipality,
            DissolveLevel::PostalCode => record.postal_code,
        }
    }
}

impl fmt::Display for DissolveLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

impl FromStr for DissolveLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "state" => Ok(DissolveLevel::State),
            "municipality" => Ok(DissolveLevel::Municipality),
            "postal_code" | "postal-code" => Ok(DissolveLevel::PostalCode),
            _ => Err(format!("unknown dissolve level: {s}")),
        }
    }
}

/// One group of a dissolve: its key and the union of its members' shapes.
#[derive(Debug, Clone, PartialEq)]
pub struct Dissolved {
    pub key: String,
    /// Distinct geometry units merged into this group.
    pub units: usize,
    pub geometry: MultiPolygon<f64>,
}

/// Union the shapes of all records sharing a non-null key at `level`.
///
/// Groups come out in ascending key order. Rows repeated by join fan-out refer to the
/// same unit and are merged once. Members are unioned in a canonical shape order, so
/// the result does not depend on record order. Any invalid member aborts with a
/// geometry error naming the group.
pub fn dissolve(records: &[FusedRecord], level: DissolveLevel) -> Result<Vec<Dissolved>> {
    let mut groups = BTreeMap::<&str, BTreeMap<usize, &FusedRecord>>::new();
    let mut skipped = 0usize;
    for record in records {
        match level.key(record) {
            Some(key) => { groups.entry(key).or_default().entry(record.unit).or_insert(record); }
            None => skipped += 1,
        }
    }
    debug!(level = %level, groups = groups.len(), null_keys = skipped, "grouped records");

    let dissolved = groups.into_iter()
        .map(|(key, members)| {
            let mut shapes = members.values()
                .map(|record| {
                    validate_multipolygon(record.geometry)
                        .map(|_| record.geometry)
                        .map_err(|e| PipelineError::Geometry {
                            group: key.to_string(),
                            unit: record.municipality_code.map_or_else(|| format!("#{}", record.unit), str::to_string),
                            reason: e.to_string(),
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            shapes.sort_by(|a, b| canonical_cmp(a, b));

            Ok(Dissolved { key: key.to_string(), units: shapes.len(), geometry: union_all(shapes) })
        })
        .collect::<Result<Vec<_>>>()?;

    info!(level = %level, groups = dissolved.len(), "dissolved");
    Ok(dissolved)
}

impl FusedTable {
    /// Dissolve the fused table at `level`.
    pub fn dissolve(&self, level: DissolveLevel) -> Result<Vec<Dissolved>> {
        dissolve(&self.records()?, level)
    }
}
