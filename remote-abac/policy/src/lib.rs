//! An ABAC policy engine for the Kubernetes policy-file format.
//!
//! A policy file holds one JSON object per line. Each line is either versioned:
//!
//! ```text
//! {"apiVersion": "abac.authorization.kubernetes.io/v1beta1", "kind": "Policy",
//!  "spec": {"user": "alice", "namespace": "*", "resource": "*", "apiGroup": "*"}}
//! ```
//!
//! or uses the older flat shape, e.g. `{"user": "bob", "readonly": true}`. Blank lines and lines
//! starting with `#` are ignored. A request is allowed if any line matches it.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod spec;


pub use self::spec::PolicySpec;
use self::spec::{LegacyPolicy, Versioned, API_VERSION, KIND};
use remote_abac_core::{Attributes, Decision, Engine, PolicyEngine};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Compiles policy files into [`PolicyList`]s.
#[derive(Clone, Debug, Default)]
pub struct AbacPolicyEngine(());

/// An ordered list of policy rules.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PolicyList(Vec<PolicySpec>);

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read policy file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: invalid policy: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("line {line}: unsupported policy {api_version}/{kind}")]
    Unsupported {
        line: usize,
        api_version: String,
        kind: String,
    },
}

const NO_MATCH_REASON: &str = "No policy matched.";

// === impl AbacPolicyEngine ===

impl AbacPolicyEngine {
    pub fn new() -> Self {
        Self(())
    }
}

impl PolicyEngine for AbacPolicyEngine {
    type Engine = PolicyList;
    type Error = Error;

    fn compile(&self, path: &Path) -> Result<PolicyList, Error> {
        let contents = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let policies = PolicyList::parse(&contents)?;
        tracing::debug!(path = %path.display(), policies = policies.len(), "Compiled policy");
        Ok(policies)
    }
}

// === impl PolicyList ===

impl PolicyList {
    pub fn parse(contents: &str) -> Result<Self, Error> {
        let mut policies = Vec::new();
        for (i, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            policies.push(parse_line(i + 1, line)?);
        }
        Ok(Self(policies))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Engine for PolicyList {
    fn decide(&self, attrs: &Attributes) -> Decision {
        if self.0.iter().any(|p| p.matches(attrs)) {
            return Decision::Allow;
        }
        Decision::deny(NO_MATCH_REASON)
    }
}

fn parse_line(line: usize, text: &str) -> Result<PolicySpec, Error> {
    let json = |source| Error::Json { line, source };

    let value = serde_json::from_str::<serde_json::Value>(text).map_err(json)?;
    if value.get("apiVersion").is_none() {
        let legacy = serde_json::from_value::<LegacyPolicy>(value).map_err(json)?;
        return Ok(legacy.into());
    }

    let Versioned {
        api_version,
        kind,
        spec,
    } = serde_json::from_value(value).map_err(json)?;
    if api_version != API_VERSION || kind != KIND {
        return Err(Error::Unsupported {
            line,
            api_version,
            kind,
        });
    }
    Ok(spec)
}
