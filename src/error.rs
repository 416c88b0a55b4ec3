use thiserror::Error;

/// A rule string that could not be compiled into a pattern.
#[derive(Debug, Error)]
pub(crate) enum PatternError {
    #[error("pattern `{pattern}` has no method segment (expected unit#method[#descriptor])")]
    MissingMethod { pattern: String },
    #[error("pattern `{pattern}` has an invalid method name `{method}`")]
    InvalidMethod { pattern: String, method: String },
    #[error("pattern `{pattern}` does not compile: {source}")]
    Regex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Failure localized to a single archive entry.
#[derive(Debug, Error)]
pub(crate) enum EntryError {
    #[error("failed to open {entry}")]
    Open {
        entry: String,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("failed to read {entry}")]
    Read {
        entry: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode class in {entry}: {reason}")]
    Undecodable { entry: String, reason: String },
    #[error("failed to read mod info {entry}: {reason}")]
    Metadata { entry: String, reason: String },
}

/// Why an archive entry was skipped without being scanned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum SkipReason {
    Oversized { declared: u64 },
    NotRelevant,
}

/// Outcome of processing one archive entry.
#[derive(Debug)]
pub(crate) enum EntryOutcome<T> {
    Scanned(T),
    Skipped(SkipReason),
    Failed(EntryError),
}
