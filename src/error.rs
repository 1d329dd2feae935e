use std::{io, path::PathBuf};

/// How far an error is allowed to propagate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorTier {
    /// Handled where it happens; the request continues.
    Recoverable,
    /// Aborts the transformation; the client gets the upstream response untouched.
    RequestFatal,
    /// The process does not start.
    StartupFatal,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("cannot load tls material from {path}: {message}")]
    Tls { path: PathBuf, message: String },
}

impl ConfigError {
    pub fn tier(&self) -> ErrorTier {
        ErrorTier::StartupFatal
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("upstream request failed: {0}")]
    Fetch(#[from] hyper::Error),
    #[error("upstream did not answer within {0}s")]
    Timeout(u64),
    #[error("cannot build upstream target: {0}")]
    InvalidTarget(String),
    #[error("cannot decode body: {0}")]
    Decode(#[source] io::Error),
    #[error("cannot parse document: {0}")]
    Parse(#[source] io::Error),
    #[error("cannot encode body: {0}")]
    Encode(#[source] io::Error),
    #[error("response is unset")]
    ResponseUnset,
}

impl PipelineError {
    pub fn tier(&self) -> ErrorTier {
        ErrorTier::RequestFatal
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("cannot convert charset {charset} to utf-8")]
pub struct TranscodeError {
    pub charset: String,
}

impl TranscodeError {
    pub fn tier(&self) -> ErrorTier {
        ErrorTier::Recoverable
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RuleError {
    #[error("invalid selector {0}")]
    InvalidSelector(String),
    #[error("no element found for selector {selector} on index {index}")]
    IndexOutOfRange { selector: String, index: usize },
    #[error("no element found for selector {0}")]
    NoTarget(String),
    #[error("no action (replace/append) configured")]
    NoMode,
}

impl RuleError {
    pub fn tier(&self) -> ErrorTier {
        ErrorTier::Recoverable
    }
}
