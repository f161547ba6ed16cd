use remote_abac_core::Attributes;
use serde::Deserialize;

pub(crate) const API_VERSION: &str = "abac.authorization.kubernetes.io/v1beta1";
pub(crate) const KIND: &str = "Policy";

const ALL_AUTHENTICATED: &str = "system:authenticated";
const ALL_UNAUTHENTICATED: &str = "system:unauthenticated";
const WILDCARD: &str = "*";
const READONLY_VERBS: [&str; 3] = ["get", "list", "watch"];

/// A versioned policy line.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Versioned {
    pub(crate) api_version: String,
    pub(crate) kind: String,
    #[serde(default)]
    pub(crate) spec: PolicySpec,
}

/// A versioned policy rule. Empty fields only match empty request attributes; `*` matches
/// anything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicySpec {
    pub user: String,
    pub group: String,
    pub readonly: bool,
    pub api_group: String,
    pub namespace: String,
    pub resource: String,
    pub non_resource_path: String,
}

/// The flat, unversioned rule shape, where empty fields act as wildcards.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct LegacyPolicy {
    user: String,
    group: String,
    readonly: bool,
    namespace: String,
    resource: String,
}

// === impl LegacyPolicy ===

impl From<LegacyPolicy> for PolicySpec {
    fn from(legacy: LegacyPolicy) -> Self {
        let mut spec = PolicySpec {
            user: legacy.user,
            group: legacy.group,
            readonly: legacy.readonly,
            namespace: legacy.namespace,
            resource: legacy.resource,
            // Unversioned rules apply to every API group.
            api_group: WILDCARD.to_string(),
            non_resource_path: String::new(),
        };

        // An unset subject, or a wildcard user or group, matches all authenticated users.
        if (spec.user.is_empty() && spec.group.is_empty())
            || spec.user == WILDCARD
            || spec.group == WILDCARD
        {
            spec.user = String::new();
            spec.group = ALL_AUTHENTICATED.to_string();
        }

        // Leaving both the namespace and the resource blank allows non-resource paths.
        if spec.namespace.is_empty() && spec.resource.is_empty() {
            spec.non_resource_path = WILDCARD.to_string();
        }
        if spec.namespace.is_empty() {
            spec.namespace = WILDCARD.to_string();
        }
        if spec.resource.is_empty() {
            spec.resource = WILDCARD.to_string();
        }

        spec
    }
}

// === impl PolicySpec ===

impl PolicySpec {
    pub fn matches(&self, attrs: &Attributes) -> bool {
        self.subject_matches(attrs)
            && self.verb_matches(attrs)
            && (self.resource_matches(attrs) || self.non_resource_matches(attrs))
    }

    fn subject_matches(&self, attrs: &Attributes) -> bool {
        let mut matched = false;

        // A rule must name a subject to match anything at all.
        if !self.user.is_empty() {
            if self.user != WILDCARD && self.user != attrs.user {
                return false;
            }
            matched = true;
        }

        if !self.group.is_empty() {
            // Requests only identify their user, so group membership is derived from it.
            let member = match self.group.as_str() {
                WILDCARD => true,
                ALL_AUTHENTICATED => !attrs.user.is_empty(),
                ALL_UNAUTHENTICATED => attrs.user.is_empty(),
                _ => false,
            };
            if !member {
                return false;
            }
            matched = true;
        }

        matched
    }

    fn verb_matches(&self, attrs: &Attributes) -> bool {
        !self.readonly || READONLY_VERBS.contains(&attrs.verb.as_str())
    }

    fn resource_matches(&self, attrs: &Attributes) -> bool {
        attrs.is_resource_request()
            && wildcard_eq(&self.namespace, attrs.namespace())
            && wildcard_eq(&self.resource, attrs.resource_name())
            && wildcard_eq(&self.api_group, attrs.api_group())
    }

    fn non_resource_matches(&self, attrs: &Attributes) -> bool {
        if attrs.is_resource_request() || self.non_resource_path.is_empty() {
            return false;
        }

        let path = attrs.path();
        if self.non_resource_path == WILDCARD || self.non_resource_path == path {
            return true;
        }
        match self.non_resource_path.strip_suffix(WILDCARD) {
            Some(prefix) => path.starts_with(prefix.trim_end_matches('*')),
            None => false,
        }
    }
}

fn wildcard_eq(rule: &str, value: &str) -> bool {
    rule == WILDCARD || rule == value
}
