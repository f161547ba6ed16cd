use regex::Regex;
use std::{fmt, path::PathBuf, str::FromStr, sync::LazyLock};
use thiserror::Error;

/// Where a policy is read from.
///
/// Parsed from a descriptor that is either a local path:
///
/// ```text
/// /etc/remote-abac/policy.jsonl
/// ```
///
/// or a storage type followed by one or more store locations that must all name the same key:
///
/// ```text
/// etcd@http://10.0.0.1:2379/path/to/policy,http://10.0.0.2:2379/path/to/policy
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyLocation {
    File(PathBuf),
    Etcd {
        /// Base URLs (`scheme://host:port`), in descriptor order. Never empty.
        endpoints: Vec<String>,
        /// The key path, always starting with `/`.
        key: String,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocationError {
    #[error("policy location is empty")]
    Empty,

    #[error("policy location is not correctly specified: {0}")]
    MultipleSeparators(String),

    #[error("storage type {0} is not currently supported")]
    UnsupportedStorage(String),

    #[error("etcd location is not recognized: {0}")]
    InvalidEndpoint(String),

    #[error("all etcd paths must be the same: {entry} names {key}, expected {expected}")]
    KeyMismatch {
        entry: String,
        key: String,
        expected: String,
    },
}

const SEPARATOR: char = '@';
const ETCD: &str = "etcd";

static ENDPOINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://[A-Za-z0-9.\-]+:[0-9]+)/(.+)$").expect("endpoint regex must compile")
});

// === impl PolicyLocation ===

impl PolicyLocation {
    pub fn is_etcd(&self) -> bool {
        matches!(self, Self::Etcd { .. })
    }
}

impl FromStr for PolicyLocation {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(LocationError::Empty);
        }

        let mut parts = s.split(SEPARATOR);
        let (storage, locations) = match (parts.next(), parts.next(), parts.next()) {
            (Some(path), None, _) => return Ok(Self::File(path.into())),
            (Some(storage), Some(locations), None) => (storage, locations),
            _ => return Err(LocationError::MultipleSeparators(s.to_string())),
        };

        if !storage.eq_ignore_ascii_case(ETCD) {
            return Err(LocationError::UnsupportedStorage(storage.to_string()));
        }

        let mut endpoints = Vec::new();
        let mut key: Option<String> = None;
        for entry in locations.split(',').map(str::trim) {
            let caps = ENDPOINT
                .captures(entry)
                .ok_or_else(|| LocationError::InvalidEndpoint(entry.to_string()))?;
            let path = format!("/{}", &caps[2]);
            match &key {
                None => key = Some(path),
                Some(expected) if *expected != path => {
                    return Err(LocationError::KeyMismatch {
                        entry: entry.to_string(),
                        key: path,
                        expected: expected.clone(),
                    })
                }
                Some(_) => {}
            }
            endpoints.push(caps[1].to_string());
        }

        // `split` always yields at least one entry, and every entry either matched or failed.
        let key = key.ok_or_else(|| LocationError::InvalidEndpoint(locations.to_string()))?;
        Ok(Self::Etcd { endpoints, key })
    }
}

impl fmt::Display for PolicyLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Etcd { endpoints, key } => write!(f, "{ETCD}@{}{key}", endpoints.join(",")),
        }
    }
}
