//! Save ARI exceedances to a parquet file.

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

use crate::analyze::radar::ExceedanceRecord;

const CHUNK_SIZE: usize = 50_000;

pub fn save_exceedances(exceedances: &[ExceedanceRecord], file_path: &Path) -> Result<()> {
    let file = File::create(file_path)?;

    let schema = Arc::new(Schema::new(vec![
        Field::new("catchment_id", DataType::Int64, true),
        Field::new("catchment_name", DataType::Utf8, false),
        Field::new("pixel_index", DataType::Int64, false),
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            false,
        ),
        Field::new("duration", DataType::Utf8, false),
        Field::new("depth_mm", DataType::Float64, false),
        Field::new("ari_years", DataType::Float64, false),
    ]));

    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(ZstdLevel::default()))
        .set_dictionary_enabled(true)
        .build();

    let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;

    for chunk in exceedances.chunks(CHUNK_SIZE) {
        let mut catchment_id = Int64Builder::with_capacity(chunk.len());
        let mut catchment_name = StringBuilder::with_capacity(chunk.len(), chunk.len() * 16);
        let mut pixel_index = Int64Builder::with_capacity(chunk.len());
        let mut timestamp =
            TimestampMicrosecondBuilder::with_capacity(chunk.len()).with_timezone("UTC");
        let mut duration = StringBuilder::with_capacity(chunk.len(), chunk.len() * 3);
        let mut depth_mm = Float64Builder::with_capacity(chunk.len());
        let mut ari_years = Float64Builder::with_capacity(chunk.len());

        for record in chunk {
            catchment_id.append_option(record.catchment_id);
            catchment_name.append_value(&record.catchment_name);
            pixel_index.append_value(record.pixel_index);
            timestamp.append_value(record.timestamp.timestamp_micros());
            duration.append_value(&record.duration);
            depth_mm.append_value(record.depth_mm);
            ari_years.append_value(record.ari_years);
        }

        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(catchment_id.finish()),
                Arc::new(catchment_name.finish()),
                Arc::new(pixel_index.finish()),
                Arc::new(timestamp.finish()),
                Arc::new(duration.finish()),
                Arc::new(depth_mm.finish()),
                Arc::new(ari_years.finish()),
            ],
        )?;
        writer.write(&batch)?;
    }

    writer.close()?;
    Ok(())
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use std::fs;

    use arrow::array::{Array, Float64Array, Int64Array, StringArray};
    use chrono::{TimeZone, Utc};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::NamedTempFile;

    use super::*;

    #[test]
    fn should_write_exceedance_columns() {
        let exceedances = vec![
            ExceedanceRecord {
                catchment_id: Some(7),
                catchment_name: "Oakley Creek".to_string(),
                pixel_index: 1201,
                timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
                duration: "1h".to_string(),
                depth_mm: 42.5,
                ari_years: 12.0,
            },
            ExceedanceRecord {
                catchment_id: None,
                catchment_name: "Unnamed".to_string(),
                pixel_index: 1202,
                timestamp: Utc.with_ymd_and_hms(2025, 3, 1, 10, 5, 0).unwrap(),
                duration: "10m".to_string(),
                depth_mm: 15.0,
                ari_years: 6.5,
            },
        ];
        let temp_file = NamedTempFile::new().unwrap();

        save_exceedances(&exceedances, temp_file.path()).unwrap();

        let file = fs::File::open(temp_file.path()).unwrap();
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .unwrap()
            .build()
            .unwrap();
        let batches: Vec<RecordBatch> = reader.map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 1);

        let batch = &batches[0];
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema().field(3).name(), "timestamp");

        let ids = batch.column(0).as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(ids.value(0), 7);
        assert_eq!(ids.null_count(), 1);

        let names = batch.column(1).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(names.value(1), "Unnamed");

        let ari = batch.column(6).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(ari.value(0), 12.0);
    }

    #[test]
    fn should_write_empty_file_with_schema() {
        let temp_file = NamedTempFile::new().unwrap();

        save_exceedances(&[], temp_file.path()).unwrap();

        let file = fs::File::open(temp_file.path()).unwrap();
        let builder = ParquetRecordBatchReaderBuilder::try_new(file).unwrap();
        assert_eq!(builder.schema().fields().len(), 7);
        assert_eq!(builder.metadata().file_metadata().num_rows(), 0);
    }
}
