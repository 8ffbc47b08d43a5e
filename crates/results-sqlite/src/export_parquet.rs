use anyhow::Result;
use arrow::array::{ArrayRef, Int64Builder, StringBuilder};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::file::properties::WriterProperties;
use rusqlite::Row;
use std::sync::Arc;
use uuid::Uuid;

use crate::{arrow_schemas, Db};

const CHUNK: usize = 10_000;

/// Writes every attack-surface asset of one target to a ZSTD-compressed Parquet file.
/// Returns the number of rows written.
pub fn export_assets_to_parquet(db: &Db, scope_target_id: Uuid, out: &std::path::Path) -> Result<usize> {
    let mut stmt = db.conn.prepare(
        "SELECT id, scope_target_id, asset_type, asset_identifier, details_json, observed_ms, last_updated_ms, created_ms
         FROM attack_surface_assets WHERE scope_target_id=? ORDER BY asset_type, asset_identifier",
    )?;
    let mut rows = stmt.query([scope_target_id.to_string()])?;
    let file = std::fs::File::create(out)?;
    let schema = Arc::new(arrow_schemas::assets_schema());

    let props = WriterProperties::builder()
        .set_compression(parquet::basic::Compression::ZSTD(Default::default()))
        .build();

    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;
    let mut total = 0;

    loop {
        let mut batch = AssetBatch::default();
        let mut count = 0;
        while count < CHUNK {
            let Some(row) = rows.next()? else { break; };
            batch.push(row)?;
            count += 1;
        }
        if count == 0 { break; }
        let rb = RecordBatch::try_new(schema.clone(), batch.finish())?;
        writer.write(&rb)?;
        total += count;
    }

    writer.close()?;
    Ok(total)
}

#[derive(Default)]
struct AssetBatch {
    id: StringBuilder,
    scope_target_id: StringBuilder,
    asset_type: StringBuilder,
    asset_identifier: StringBuilder,
    details_json: StringBuilder,
    observed: Int64Builder,
    last_updated: Int64Builder,
    created: Int64Builder,
}

impl AssetBatch {
    fn push(&mut self, row: &Row) -> Result<()> {
        self.id.append_value(row.get::<_, String>(0)?);
        self.scope_target_id.append_value(row.get::<_, String>(1)?);
        self.asset_type.append_value(row.get::<_, String>(2)?);
        self.asset_identifier.append_value(row.get::<_, String>(3)?);
        self.details_json.append_value(row.get::<_, String>(4)?);
        self.observed.append_value(row.get::<_, i64>(5)?);
        self.last_updated.append_value(row.get::<_, i64>(6)?);
        self.created.append_value(row.get::<_, i64>(7)?);
        Ok(())
    }

    fn finish(mut self) -> Vec<ArrayRef> {
        vec![
            Arc::new(self.id.finish()),
            Arc::new(self.scope_target_id.finish()),
            Arc::new(self.asset_type.finish()),
            Arc::new(self.asset_identifier.finish()),
            Arc::new(self.details_json.finish()),
            Arc::new(self.observed.finish()),
            Arc::new(self.last_updated.finish()),
            Arc::new(self.created.finish()),
        ]
    }
}
