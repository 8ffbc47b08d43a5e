use anyhow::Result;
use clap::ValueEnum;
use reconflow_core::AttackSurfaceAsset;
use results_sqlite::{export_assets_to_parquet, Db};
use std::io::Write;
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ExportFormat {
    Parquet,
    Csv,
    Jsonl,
}

/// Writes the target's attack-surface assets to `out`. Returns the number of rows.
pub fn export_assets(db: &Db, scope_target_id: Uuid, out: &Path, format: ExportFormat) -> Result<usize> {
    db.scope_target(scope_target_id)?;
    match format {
        ExportFormat::Parquet => export_assets_to_parquet(db, scope_target_id, out),
        ExportFormat::Csv => write_csv(&db.attack_surface_assets(scope_target_id, None)?, std::fs::File::create(out)?),
        ExportFormat::Jsonl => write_jsonl(&db.attack_surface_assets(scope_target_id, None)?, std::fs::File::create(out)?),
    }
}

fn write_csv<W: Write>(assets: &[AttackSurfaceAsset], w: W) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(w);
    wtr.write_record(["id", "asset_type", "asset_identifier", "observed_at", "last_updated", "details_json"])?;
    for a in assets {
        wtr.write_record([
            a.id.to_string(),
            a.asset_type().as_str().to_string(),
            a.asset_identifier.clone(),
            a.observed_at.format(&Rfc3339)?,
            a.last_updated.format(&Rfc3339)?,
            serde_json::to_string(&a.details)?,
        ])?;
    }
    wtr.flush()?;
    Ok(assets.len())
}

fn write_jsonl<W: Write>(assets: &[AttackSurfaceAsset], w: W) -> Result<usize> {
    let mut w = std::io::BufWriter::new(w);
    for a in assets {
        serde_json::to_writer(&mut w, a)?;
        writeln!(w)?;
    }
    w.flush()?;
    Ok(assets.len())
}
