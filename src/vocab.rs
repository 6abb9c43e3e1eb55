use std::collections::BTreeSet;

use polars::prelude::*;

use crate::{config::StateVocabulary, error::{FrameContext, PipelineError, Result, Stage}, table};

/// The nine official federal-state abbreviations used by the postal registry.
pub const STATE_ABBREVIATIONS: [&str; 9] = ["W", "N", "B", "O", "Sa", "T", "V", "St", "K"];

impl StateVocabulary {
    /// Full English state name for a registry abbreviation, if this vocabulary maps it.
    pub fn lookup(self, abbr: &str) -> Option<&'static str> {
        let name = match abbr {
            "W" => "Vienna",
            "N" => "Lower Austria",
            "B" => "Burgenland",
            "O" => "Upper Austria",
            "Sa" => "Salzburg",
            "T" => "Tyrol",
            "V" => "Vorarlberg",
            "St" => "Styria",
            "K" => "Carinthia",
            _ => return None,
        };
        match (self, abbr) {
            (StateVocabulary::WithoutCarinthia, "K") => None,
            _ => Some(name),
        }
    }
}

/// Result of a vocabulary substitution: the rewritten frame plus every source value that had no mapping.
#[derive(Debug, Clone)]
pub struct Substitution {
    pub data: DataFrame,
    pub unmapped: BTreeSet<String>,
}

/// Replace abbreviations in `column` by full state names.
///
/// Unmapped non-null values become null and are collected in `unmapped`; with `strict`
/// they abort the run instead.
pub fn substitute_states(
    df: &DataFrame,
    table: &str,
    column: &str,
    vocabulary: StateVocabulary,
    strict: bool,
) -> Result<Substitution> {
    let values = table::str_column(df, Stage::Normalize, table, column)?;

    let mut unmapped = BTreeSet::new();
    let mapped = values.into_iter()
        .map(|v| v.and_then(|abbr| {
            let name = vocabulary.lookup(abbr.trim());
            if name.is_none() { unmapped.insert(abbr.to_string()); }
            name
        }))
        .collect::<Vec<_>>();

    if strict && !unmapped.is_empty() {
        return Err(PipelineError::Vocabulary {
            stage: Stage::Normalize,
            table: table.to_string(),
            column: column.to_string(),
            values: unmapped.into_iter().collect(),
        });
    }

    let mut data = df.clone();
    data.with_column(Column::new(column.into(), mapped))
        .frame_ctx(Stage::Normalize, table)?;

    Ok(Substitution { data, unmapped })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_vocabulary_maps_every_official_abbreviation() {
        let unmapped = STATE_ABBREVIATIONS.iter()
            .filter(|abbr| StateVocabulary::Full.lookup(abbr).is_none())
            .collect::<Vec<_>>();
        assert!(unmapped.is_empty(), "unmapped abbreviations: {unmapped:?}");
    }

    #[test]
    fn eight_state_vocabulary_only_lacks_carinthia() {
        let unmapped = STATE_ABBREVIATIONS.iter()
            .filter(|abbr| StateVocabulary::WithoutCarinthia.lookup(abbr).is_none())
            .collect::<Vec<_>>();
        assert_eq!(unmapped, vec![&"K"]);
    }

    #[test]
    fn substitution_flags_unmapped_values() {
        let df = DataFrame::new(vec![
            Column::new("state".into(), &[Some("W"), Some("K"), Some("X"), None]),
        ]).unwrap();

        let out = substitute_states(&df, "postal_codes", "state", StateVocabulary::WithoutCarinthia, false).unwrap();
        let states = out.data.column("state").unwrap().str().unwrap().into_iter().collect::<Vec<_>>();
        assert_eq!(states, vec![Some("Vienna"), None, None, None]);
        assert_eq!(out.unmapped.into_iter().collect::<Vec<_>>(), vec!["K".to_string(), "X".to_string()]);
    }

    #[test]
    fn strict_substitution_aborts_on_unmapped_values() {
        let df = DataFrame::new(vec![Column::new("state".into(), &["W", "Q"])]).unwrap();
        let err = substitute_states(&df, "postal_codes", "state", StateVocabulary::Full, true).unwrap_err();
        assert!(matches!(err, PipelineError::Vocabulary { ref values, .. } if values == &["Q".to_string()]));
    }

    #[test]
    fn every_abbreviation_in_fixture_maps_under_full_vocabulary() {
        let df = DataFrame::new(vec![Column::new("state".into(), &STATE_ABBREVIATIONS)]).unwrap();
        let out = substitute_states(&df, "postal_codes", "state", StateVocabulary::Full, true).unwrap();
        assert!(out.unmapped.is_empty());
        assert_eq!(out.data.column("state").unwrap().null_count(), 0);
    }
}
