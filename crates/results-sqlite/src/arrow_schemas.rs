use arrow::datatypes::{DataType, Field, Schema};

pub fn assets_schema() -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("scope_target_id", DataType::Utf8, false),
        Field::new("asset_type", DataType::Utf8, false),
        Field::new("asset_identifier", DataType::Utf8, false),
        Field::new("details_json", DataType::Utf8, false),
        Field::new("observed_ms", DataType::Int64, false),
        Field::new("last_updated_ms", DataType::Int64, false),
        Field::new("created_ms", DataType::Int64, false),
    ])
}
