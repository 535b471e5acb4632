use crate::error::{IngestError, Result};
use crate::types::{SourceAdapter, SourceRecord};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Either a bare array of records or an object carrying one under `records`.
#[derive(Deserialize)]
#[serde(untagged)]
enum RecordFile {
    Bare(Vec<SourceRecord>),
    Wrapped {
        records: Vec<SourceRecord>,
        #[serde(default)]
        extraction_version: Option<String>,
    },
}

/// Source adapter over a JSON file of pre-extracted records.
pub struct JsonFileSource {
    name: String,
    path: PathBuf,
    extraction_version: String,
}

impl JsonFileSource {
    /// The source is named after the file stem.
    pub fn new<P: AsRef<Path>>(path: P, extraction_version: impl Into<String>) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            path,
            extraction_version: extraction_version.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl SourceAdapter for JsonFileSource {
    fn source_name(&self) -> &str {
        &self.name
    }

    fn extraction_version(&self) -> &str {
        &self.extraction_version
    }

    async fn fetch_records(&self) -> Result<Vec<SourceRecord>> {
        let raw = tokio::fs::read_to_string(&self.path).await.map_err(|e| IngestError::Source {
            source_name: self.name.clone(),
            message: format!("cannot read {}: {}", self.path.display(), e),
        })?;

        let records = match serde_json::from_str::<RecordFile>(&raw)? {
            RecordFile::Bare(records) => records,
            RecordFile::Wrapped {
                records,
                extraction_version,
            } => match extraction_version {
                // A file-level version applies to records that do not carry their own
                Some(version) => records
                    .into_iter()
                    .map(|mut r| {
                        if r.extraction_version.is_none() {
                            r.extraction_version = Some(version.clone());
                        }
                        r
                    })
                    .collect(),
                None => records,
            },
        };

        info!(source = %self.name, count = records.len(), "Loaded records from {}", self.path.display());
        Ok(records)
    }
}
