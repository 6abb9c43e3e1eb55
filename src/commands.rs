use std::path::Path;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::info;

use atmap::{GeoJsonSink, HttpSources, Pipeline, PipelineConfig, PipelineOutput, UnmatchedPolicy, to_csv_bytes};

use crate::cli::{ResolveLinkArgs, RunArgs};

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_json_file(path),
        None => Ok(PipelineConfig::default()),
    }
}

pub fn run(args: &RunArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(work_dir) = &args.work_dir { config.work_dir = work_dir.clone(); }
    if let Some(vocabulary) = args.vocabulary { config.vocabulary = vocabulary.into(); }
    if args.drop_unmatched { config.unmatched = UnmatchedPolicy::Drop; }
    if args.strict { config.strict_vocabulary = true; }

    atmap::sources::ensure_dir(&config.work_dir)?;
    atmap::sources::ensure_dir(&args.out)?;

    let fetcher = HttpSources::new(&config)?;
    let output = Pipeline::new(config).run(&fetcher)?;

    output.render(&mut GeoJsonSink::new(&args.out))?;
    atmap::sources::write_atomic(&args.out.join("fused.csv"), &to_csv_bytes(&output.fused.export_frame()?)?)?;
    write_report(&output, &args.out.join("report.json"))?;

    println!("Fused {} rows into {}", output.fused.len(), args.out.display());
    Ok(())
}

/// Join diagnostics, unmapped vocabulary and source manifest of one run.
fn write_report(output: &PipelineOutput, path: &Path) -> Result<()> {
    let report = json!({
        "postal_codes_url": output.postal_codes_url,
        "fused_rows": output.fused.len(),
        "locality_fanout_rows": output.locality_fanout.height(),
        "unit_fanout_rows": output.unit_fanout.height(),
        "joins": output.joins,
        "unmapped_states": output.unmapped_states,
        "groups": output.aggregates.iter()
            .map(|(level, groups)| (level.to_string(), groups.len()))
            .collect::<std::collections::BTreeMap<_, _>>(),
        "sources": output.manifest,
    });
    let bytes = serde_json::to_vec_pretty(&report).context("Failed to serialize run report")?;
    atmap::sources::write_atomic(path, &bytes)?;
    info!(path = %path.display(), "wrote report");
    Ok(())
}

pub fn resolve_link(args: &ResolveLinkArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let fetcher = HttpSources::new(&config)?;
    let url = Pipeline::new(config).resolve_postal_codes_url(&fetcher)?;
    println!("{url}");
    Ok(())
}

pub fn default_config() -> Result<()> {
    println!("{}", PipelineConfig::default().to_json()?);
    Ok(())
}
