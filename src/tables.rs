//! CSV helpers shared by every stage.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};

/// Writes rows with a header taken from the row type's field names.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("cannot write {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("cannot read {}", path.display()))?;
    let rows = reader
        .deserialize()
        .collect::<Result<Vec<T>, csv::Error>>()
        .with_context(|| format!("invalid rows in {}", path.display()))?;
    Ok(rows)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use serde::Deserialize;
    use tempfile::TempDir;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Row {
        name: String,
        value: Option<f64>,
    }

    #[test]
    fn should_write_and_read_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rows.csv");
        let rows = vec![
            Row { name: "a, b".to_string(), value: Some(1.5) },
            Row { name: "c".to_string(), value: None },
        ];

        write_csv(&path, &rows).unwrap();

        assert_eq!(read_csv::<Row>(&path).unwrap(), rows);
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("name,value\n"));
    }

    #[test]
    fn should_name_missing_file_in_error() {
        let err = read_csv::<Row>(Path::new("does/not/exist.csv")).unwrap_err();

        assert!(err.to_string().contains("does/not/exist.csv"));
    }
}
