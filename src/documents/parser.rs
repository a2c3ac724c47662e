//! Document parsing: metadata block extraction and file reading.
//!
//! A document is a `---` delimited YAML block at the top of the file followed
//! by free-form body text:
//!
//! ```markdown
//! ---
//! id: E13-F01
//! title: "Registry API"
//! documentType: feature
//! status: approved
//! ---
//! # Registry API
//! ...
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::{DocumentError, DocumentResult, FileAccessCause, ParseError};
use super::types::{Document, DocumentMetadata};
use super::validator::{MetadataValidator, RawMetadata};

const DELIMITER: &str = "---";

/// Result of parsing document content.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub metadata: DocumentMetadata,
    pub body: String,
}

impl ParsedDocument {
    /// Convert into a registry document tagged with its source file.
    pub fn into_document(self, source_path: Option<PathBuf>) -> Document {
        Document {
            metadata: self.metadata,
            body: self.body,
            source_path,
        }
    }
}

/// Parses document content and files.
#[derive(Debug, Clone, Default)]
pub struct DocumentParser {
    validator: MetadataValidator,
}

impl DocumentParser {
    pub fn new(validator: MetadataValidator) -> Self {
        Self { validator }
    }

    pub fn validator(&self) -> &MetadataValidator {
        &self.validator
    }

    /// Parse document content into validated metadata and body text.
    pub fn parse(&self, content: &str) -> Result<ParsedDocument, ParseError> {
        let (block, body) = split_metadata(content).ok_or(ParseError::NoMetadataBlock)?;
        let raw = decode_block(block)?;
        let metadata = self.validator.validate(raw)?;

        Ok(ParsedDocument {
            metadata,
            body: body.to_string(),
        })
    }

    /// Read and parse a file.
    ///
    /// Read failures become [`DocumentError::FileAccess`]; parse failures are
    /// passed through as [`DocumentError::Parse`].
    pub fn parse_file(&self, path: &Path) -> DocumentResult<Document> {
        let content =
            std::fs::read_to_string(path).map_err(|e| DocumentError::file_access(path, &e))?;
        self.parse_content(path, &content)
    }

    /// Blocking [`parse_file`](Self::parse_file) that gives up on the read
    /// after `timeout`.
    pub fn parse_file_within(&self, path: &Path, timeout: Duration) -> DocumentResult<Document> {
        let content = read_file_with_timeout(path, timeout)?;
        self.parse_content(path, &content)
    }

    /// Async variant of [`parse_file`](Self::parse_file) with a bounded read.
    pub async fn parse_file_with_timeout(
        &self,
        path: &Path,
        timeout: Duration,
    ) -> DocumentResult<Document> {
        let content = read_with_timeout(path, timeout).await?;
        self.parse_content(path, &content)
    }

    fn parse_content(&self, path: &Path, content: &str) -> DocumentResult<Document> {
        let parsed = self.parse(content).inspect_err(|e| {
            crate::debug_event!("parser", "rejected", "{}: {e}", path.display());
        })?;
        crate::debug_event!("parser", "parsed", "{} as {}", path.display(), parsed.metadata.id);
        Ok(parsed.into_document(Some(path.to_path_buf())))
    }
}

fn timed_out(path: &Path) -> DocumentError {
    DocumentError::FileAccess {
        path: path.to_path_buf(),
        cause: FileAccessCause::TimedOut,
    }
}

/// Blocking read that gives up after `timeout`.
///
/// The read runs on its own thread; a stalled read is abandoned there and
/// the caller gets `TimedOut`.
pub fn read_file_with_timeout(path: &Path, timeout: Duration) -> DocumentResult<String> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let owned = path.to_path_buf();
    std::thread::Builder::new()
        .name("specdex-read".to_string())
        .spawn(move || {
            let _ = tx.send(std::fs::read_to_string(&owned));
        })
        .map_err(|e| DocumentError::file_access(path, &e))?;

    match rx.recv_timeout(timeout) {
        Ok(Ok(content)) => Ok(content),
        Ok(Err(e)) => Err(DocumentError::file_access(path, &e)),
        Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(timed_out(path)),
        Err(crossbeam_channel::RecvTimeoutError::Disconnected) => Err(DocumentError::FileAccess {
            path: path.to_path_buf(),
            cause: FileAccessCause::Io("read thread exited without a result".to_string()),
        }),
    }
}

/// Read a file, giving up after `timeout`.
pub async fn read_with_timeout(path: &Path, timeout: Duration) -> DocumentResult<String> {
    match tokio::time::timeout(timeout, tokio::fs::read_to_string(path)).await {
        Ok(Ok(content)) => Ok(content),
        Ok(Err(e)) => Err(DocumentError::file_access(path, &e)),
        Err(_) => Err(timed_out(path)),
    }
}

/// Split content into `(metadata block, body)`.
///
/// The opening delimiter must be the first line (a UTF-8 BOM is skipped).
/// The block ends at the next line that is exactly `---`. The body is
/// everything after that line, untouched.
fn split_metadata(content: &str) -> Option<(&str, &str)> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let rest = content.strip_prefix(DELIMITER)?;
    let rest = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed == DELIMITER {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

/// Decode the YAML block into a raw metadata mapping.
fn decode_block(block: &str) -> Result<RawMetadata, ParseError> {
    let has_content = block.lines().any(|line| {
        let line = line.trim();
        !line.is_empty() && !line.starts_with('#')
    });
    if !has_content {
        return Err(ParseError::EmptyMetadata);
    }

    let value: serde_yaml::Value =
        serde_yaml::from_str(block).map_err(|e| ParseError::MetadataSyntax {
            message: e.to_string(),
        })?;

    match value {
        serde_yaml::Value::Null => Err(ParseError::EmptyMetadata),
        serde_yaml::Value::Mapping(map) if map.is_empty() => Err(ParseError::EmptyMetadata),
        serde_yaml::Value::Mapping(map) => map.into_iter().map(entry).collect(),
        _ => Err(ParseError::MetadataSyntax {
            message: "expected a mapping of key/value pairs".to_string(),
        }),
    }
}

/// Convert a YAML value to JSON. Scalar mapping keys become strings
/// (`2024: alpha` is keyed `"2024"`). Tags are dropped.
fn to_json(value: serde_yaml::Value) -> Result<serde_json::Value, ParseError> {
    use serde_json::Value as Json;
    use serde_yaml::Value as Yaml;

    Ok(match value {
        Yaml::Null => Json::Null,
        Yaml::Bool(b) => Json::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Json::from(i)
            } else if let Some(u) = n.as_u64() {
                Json::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map_or_else(|| Json::String(n.to_string()), Json::Number)
            }
        }
        Yaml::String(s) => Json::String(s),
        Yaml::Sequence(items) => Json::Array(
            items
                .into_iter()
                .map(to_json)
                .collect::<Result<_, ParseError>>()?,
        ),
        Yaml::Mapping(map) => Json::Object(
            map.into_iter()
                .map(entry)
                .collect::<Result<_, ParseError>>()?,
        ),
        Yaml::Tagged(tagged) => to_json(tagged.value)?,
    })
}

fn entry(
    (key, value): (serde_yaml::Value, serde_yaml::Value),
) -> Result<(String, serde_json::Value), ParseError> {
    Ok((key_string(key)?, to_json(value)?))
}

fn key_string(key: serde_yaml::Value) -> Result<String, ParseError> {
    use serde_yaml::Value as Yaml;

    match key {
        Yaml::String(s) => Ok(s),
        Yaml::Number(n) => Ok(n.to_string()),
        Yaml::Bool(b) => Ok(b.to_string()),
        Yaml::Null => Ok("null".to_string()),
        Yaml::Tagged(tagged) => key_string(tagged.value),
        Yaml::Sequence(_) | Yaml::Mapping(_) => Err(ParseError::MetadataSyntax {
            message: "mapping keys must be scalars".to_string(),
        }),
    }
}

/// Serialize metadata and body back into file form.
///
/// `parse(&render(m, b))` yields metadata equivalent to `m` and exactly `b`.
pub fn render(metadata: &DocumentMetadata, body: &str) -> Result<String, serde_yaml::Error> {
    let yaml = serde_yaml::to_string(metadata)?;
    let mut out = String::with_capacity(yaml.len() + body.len() + 8);
    out.push_str(DELIMITER);
    out.push('\n');
    out.push_str(&yaml);
    if !yaml.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(DELIMITER);
    out.push('\n');
    out.push_str(body);
    Ok(out)
}
