// ==============================================================================
// parameters.rs - Job Parameters and URI Resolution
// ==============================================================================
// Description: Flat key/value job parameters, URI canonicalization, job instances
// Created: 2026-10-18
// Modified: 2026-10-18
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{PipelineError, StorageError};

/// Recognized parameter keys
pub mod keys {
    pub const INPUT: &str = "input";
    pub const OUTPUT_DIR: &str = "outputDir";
    pub const PEDIGREE: &str = "pedigree";
    pub const DB_NAME: &str = "dbName";
    pub const COMPRESS_EXTENSION: &str = "compressExtension";
    pub const COMPRESS_GENOTYPES: &str = "compressGenotypes";
    pub const INCLUDE_SRC: &str = "includeSrc";
    pub const AGGREGATED: &str = "aggregated";
    pub const STUDY_TYPE: &str = "studyType";
    pub const STUDY_NAME: &str = "studyName";
    pub const STUDY_ID: &str = "studyId";
    pub const FILE_ID: &str = "fileId";
    pub const SKIP_LOAD: &str = "skipLoad";
    pub const SKIP_STATS_CREATE: &str = "skipStatsCreate";
    pub const SKIP_STATS_LOAD: &str = "skipStatsLoad";
}

/// String parameters of one job launch; read-only once the job starts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobParameters {
    values: BTreeMap<String, String>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Value of a mandatory parameter; absent or blank is an error
    pub fn require(&self, key: &str) -> Result<&str, PipelineError> {
        match self.get(key).map(str::trim) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(PipelineError::parameter(key, "missing required parameter")),
        }
    }

    /// `"true"` (any case) is true; absent or anything else is false
    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Merge another set on top of this one (other wins)
    pub fn extend(&mut self, other: JobParameters) {
        self.values.extend(other.values);
    }

    /// Load parameters from a JSON object; non-string scalars are stringified
    pub fn from_json_str(json: &str) -> Result<Self, PipelineError> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| PipelineError::parameter("parameters", e.to_string()))?;

        let object = value
            .as_object()
            .ok_or_else(|| PipelineError::parameter("parameters", "expected a JSON object"))?;

        let mut params = JobParameters::new();
        for (key, value) in object {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                other => {
                    return Err(PipelineError::parameter(
                        key,
                        format!("unsupported value {}", other),
                    ))
                }
            };
            params.insert(key.clone(), value);
        }
        Ok(params)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for JobParameters {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Canonicalize a path or URI string
///
/// Strings with a scheme are parsed as absolute URIs; anything else is a
/// local path, made absolute against the working directory and turned into
/// a `file://` URI. Resolving the output again yields the same URI.
///
/// # Example
/// ```
/// use variant_pipeline::parameters::create_uri;
///
/// let uri = create_uri("/data/small20.vcf.gz")?;
/// assert_eq!(uri.as_str(), "file:///data/small20.vcf.gz");
/// assert_eq!(create_uri(uri.as_str())?, uri);
/// # Ok::<(), variant_pipeline::error::PipelineError>(())
/// ```
pub fn create_uri(raw: &str) -> Result<Url, PipelineError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(PipelineError::parameter("uri", "empty path"));
    }

    // Single-letter schemes are drive letters, not URIs
    if let Ok(url) = Url::parse(raw) {
        if url.scheme().len() > 1 {
            return Ok(url);
        }
    }

    let path = Path::new(raw);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| PipelineError::parameter("uri", e.to_string()))?
            .join(path)
    };

    let url = Url::from_file_path(&absolute).map_err(|_| {
        PipelineError::parameter("uri", format!("'{}' is not a valid path", raw))
    })?;

    // Re-parse so dot segments are normalized the same way as parsed URIs
    Url::parse(url.as_str()).map_err(|e| PipelineError::parameter("uri", e.to_string()))
}

/// Local path of a `file://` URI
pub fn uri_to_path(uri: &Url) -> Result<PathBuf, StorageError> {
    if uri.scheme() != "file" {
        return Err(StorageError::UnsupportedUri(uri.to_string()));
    }
    uri.to_file_path()
        .map_err(|_| StorageError::UnsupportedUri(uri.to_string()))
}

/// URI of `name` inside the directory `dir`
pub fn child_uri(dir: &Url, name: &str) -> Url {
    let mut url = dir.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push(name);
    }
    url
}

/// Last path component of a URI, percent-decoded for file URIs
pub fn uri_file_name(uri: &Url) -> Option<String> {
    if let Ok(path) = uri.to_file_path() {
        return path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
    }
    uri.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
}

/// One logical execution lineage of a named job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInstance {
    pub job_name: String,
    /// Hex SHA-256 of the job name and sorted parameters
    pub id: String,
}

impl JobInstance {
    pub fn from_parameters(job_name: &str, parameters: &JobParameters) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(job_name.as_bytes());
        hasher.update(b"\n");
        for (key, value) in parameters.iter() {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
            hasher.update(b"\n");
        }

        Self {
            job_name: job_name.to_string(),
            id: format!("{:x}", hasher.finalize()),
        }
    }
}
