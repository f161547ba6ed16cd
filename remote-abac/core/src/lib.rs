//! Core types for the remote ABAC authorizer.
//!
//! A policy is located by a [`PolicyLocation`] (a local file or a key in an etcd cluster), compiled
//! by a [`PolicyEngine`] into an [`Engine`], and published through an [`Authorizer`] so that
//! request handlers always decide against a complete policy while reloads replace it in the
//! background.
//!
//! ```text
//! [ PolicyLocation ] -> [ PolicyEngine::compile ] -> [ Authorizer ] <- decide(Attributes)
//! ```
//!
//! The rule-matching semantics are intentionally opaque here: this crate only describes the
//! capability that a policy engine must provide.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod attributes;
mod authorizer;
mod location;

pub use self::{
    attributes::{Attributes, Decision, RequestAttributes},
    authorizer::Authorizer,
    location::{LocationError, PolicyLocation},
};
use std::path::Path;

/// A compiled, immutable policy that can decide individual requests.
pub trait Engine: Send + Sync + 'static {
    fn decide(&self, attrs: &Attributes) -> Decision;
}

/// Compiles policy files into [`Engine`]s.
///
/// Compilation consumes a path rather than raw bytes: policies fetched from a remote store are
/// written to disk before they are compiled.
pub trait PolicyEngine: Send + Sync + 'static {
    type Engine: Engine;
    type Error: std::error::Error + Send + Sync + 'static;

    fn compile(&self, path: &Path) -> Result<Self::Engine, Self::Error>;
}
