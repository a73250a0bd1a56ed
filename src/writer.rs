use std::{fs::File, io::BufWriter, path::Path};

use log::info;
use serde::{Serialize, de::DeserializeOwned};
use serde_jsonlines::JsonLinesWriter;

use crate::errors::RacelogError;

/// Writes one JSON document per line. Returns the number of records written.
pub fn write_jsonl<T, I>(path: &Path, records: I) -> Result<usize, RacelogError>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let file = File::create(path).map_err(|e| RacelogError::WriterError { source: e })?;
    let mut writer = JsonLinesWriter::new(BufWriter::new(file));
    let mut written = 0;
    for record in records {
        writer
            .write(&record)
            .map_err(|e| RacelogError::WriterError { source: e })?;
        written += 1;
    }
    writer
        .flush()
        .map_err(|e| RacelogError::WriterError { source: e })?;
    info!("Wrote {} records to {:?}", written, path);
    Ok(written)
}

/// Reads back a file produced by [`write_jsonl`]
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, RacelogError> {
    serde_jsonlines::json_lines(path)
        .map_err(|e| RacelogError::LogReadError {
            path: path.display().to_string(),
            source: e,
        })?
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| RacelogError::LogReadError {
            path: path.display().to_string(),
            source: e,
        })
}
