use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum LocatorError {
    #[error("unknown alias {alias}; valid options:\n{valid}")]
    UnknownAlias { alias: String, valid: String },

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid scan range: {0}")]
    InvalidRange(String),

    #[error("no image found for {stem} in [{start}, {end}): {message}")]
    NoMatchInRange {
        stem: String,
        start: u64,
        end: u64,
        message: String,
    },

    #[error("catalog request failed: {0}")]
    TransportFailure(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("malformed image descriptor: {0}")]
    MalformedDescriptor(String),

    #[error("malformed search response: {0}")]
    MalformedSearchResponse(String),

    #[error("rasterization failed: {0}")]
    RasterizationFailed(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("search session expired or unknown token: {0}")]
    #[diagnostic(help("run the search again to obtain a fresh token"))]
    SessionExpired(String),

    #[error("document {0} is not part of the cached search results")]
    UnknownDocument(String),

    #[error("no artifacts were produced")]
    NoArtifactsProduced,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("archive error: {0}")]
    Archive(String),
}
