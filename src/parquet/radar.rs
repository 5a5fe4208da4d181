//! Save collected radar values to a parquet file.

use std::{fs::File, path::Path, sync::Arc};

use anyhow::Result;
use arrow::{
    array::{Float64Builder, Int64Builder, StringBuilder, TimestampMicrosecondBuilder},
    datatypes::{DataType, Field, Schema, TimeUnit},
    record_batch::RecordBatch,
};
use parquet::{
    arrow::ArrowWriter,
    basic::{Compression, ZstdLevel},
    file::properties::WriterProperties,
};

use crate::{cli::create_progress_bar, collect::radar::RadarRow};

pub fn save_radar(rows: &[RadarRow], file_path: &Path) -> Result<()> {
    let chunk_size = 100_000;
    let file = File::create(file_path)?;

    let schema = Arc::new(Schema::new(vec![
        Field::new("catchment_id", DataType::Int64, false),
        Field::new("catchment_name", DataType::Utf8, false),
        Field::new("pixel_index", DataType::Int64, false),
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            false,
        ),
        Field::new("value", DataType::Float64, false),
    ]));

    // catchment names repeat on every row
    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .set_dictionary_enabled(true)
        .build();

    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;
    let pb = create_progress_bar(rows.len() as u64, "Writing parquet file".to_string());

    let mut catchment_id = Int64Builder::with_capacity(chunk_size);
    let mut catchment_name = StringBuilder::with_capacity(chunk_size, chunk_size * 16);
    let mut pixel_index = Int64Builder::with_capacity(chunk_size);
    let mut timestamp = TimestampMicrosecondBuilder::with_capacity(chunk_size).with_timezone("UTC");
    let mut value = Float64Builder::with_capacity(chunk_size);

    for chunk in rows.chunks(chunk_size) {
        for row in chunk {
            catchment_id.append_value(row.catchment_id);
            catchment_name.append_value(&row.catchment_name);
            pixel_index.append_value(row.pixel_index);
            timestamp.append_value(row.timestamp.timestamp_micros());
            value.append_value(row.value);
        }

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(catchment_id.finish()),
                Arc::new(catchment_name.finish()),
                Arc::new(pixel_index.finish()),
                Arc::new(timestamp.finish()),
                Arc::new(value.finish()),
            ],
        )?;
        writer.write(&batch)?;
        pb.inc(chunk.len() as u64);
    }

    pb.finish_with_message("Finished writing Parquet file");
    writer.close()?;
    Ok(())
}

// -- Tests -------------------------------------------------------------------
