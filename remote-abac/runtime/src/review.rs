//! The `SubjectAccessReview` wire format exchanged with the control plane.

use remote_abac_core::{Attributes, Decision};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubjectAccessReview {
    pub kind: String,
    pub api_version: String,
    pub spec: ReviewSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReviewSpec {
    pub user: String,
    pub resource_attributes: Option<ResourceAttributes>,
    pub non_resource_attributes: Option<NonResourceAttributes>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResourceAttributes {
    pub verb: String,
    pub namespace: String,
    pub group: String,
    pub resource: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct NonResourceAttributes {
    pub verb: String,
    pub path: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResponse {
    pub kind: String,
    pub api_version: String,
    pub status: ReviewStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReviewStatus {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// === impl ReviewSpec ===

impl ReviewSpec {
    /// Translates the review into the attributes a policy engine decides on.
    ///
    /// Resource attributes take precedence when both groups are present. A review without either
    /// group is treated as a non-resource request for an empty path.
    pub fn to_attributes(&self) -> Attributes {
        if let Some(ResourceAttributes {
            verb,
            namespace,
            group,
            resource,
        }) = &self.resource_attributes
        {
            return Attributes::resource(
                self.user.as_str(),
                verb.as_str(),
                namespace.as_str(),
                group.as_str(),
                resource.as_str(),
            );
        }

        match &self.non_resource_attributes {
            Some(NonResourceAttributes { verb, path }) => {
                Attributes::non_resource(self.user.as_str(), verb.as_str(), path.as_str())
            }
            None => Attributes::non_resource(self.user.as_str(), "", ""),
        }
    }
}

// === impl ReviewResponse ===

impl ReviewResponse {
    /// Builds a response that echoes the review's `kind` and `apiVersion`.
    pub fn new(review: SubjectAccessReview, decision: Decision) -> Self {
        let status = match decision {
            Decision::Allow => ReviewStatus {
                allowed: true,
                reason: None,
            },
            Decision::Deny { reason } if reason.is_empty() => {
                return Self::new(review, Decision::deny(reason));
            }
            Decision::Deny { reason } => ReviewStatus {
                allowed: false,
                reason: Some(reason),
            },
        };
        Self {
            kind: review.kind,
            api_version: review.api_version,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn review(spec: serde_json::Value) -> SubjectAccessReview {
        serde_json::from_value(json!({
            "kind": "SubjectAccessReview",
            "apiVersion": "authorization.k8s.io/v1beta1",
            "spec": spec,
        }))
        .expect("review must decode")
    }

    #[test]
    fn resource_attributes() {
        let review = review(json!({
            "user": "alice",
            "resourceAttributes": {
                "verb": "get",
                "namespace": "default",
                "group": "apps",
                "resource": "deployments",
            },
        }));

        let attrs = review.spec.to_attributes();
        assert_eq!(
            attrs,
            Attributes::resource("alice", "get", "default", "apps", "deployments")
        );
        assert!(attrs.is_resource_request());
        assert_eq!(attrs.path(), "");
    }

    #[test]
    fn non_resource_attributes() {
        let review = review(json!({
            "user": "bob",
            "nonResourceAttributes": { "verb": "get", "path": "/version" },
        }));

        let attrs = review.spec.to_attributes();
        assert_eq!(attrs, Attributes::non_resource("bob", "get", "/version"));
        assert!(!attrs.is_resource_request());
        assert_eq!(attrs.namespace(), "");
        assert_eq!(attrs.api_group(), "");
        assert_eq!(attrs.resource_name(), "");
    }

    #[test]
    fn resource_attributes_take_precedence() {
        let review = review(json!({
            "user": "carol",
            "resourceAttributes": { "verb": "list", "resource": "pods" },
            "nonResourceAttributes": { "verb": "get", "path": "/healthz" },
        }));
        assert_eq!(
            review.spec.to_attributes(),
            Attributes::resource("carol", "list", "", "", "pods")
        );
    }

    #[test]
    fn missing_attributes() {
        let review = review(json!({ "user": "dave" }));
        assert_eq!(
            review.spec.to_attributes(),
            Attributes::non_resource("dave", "", "")
        );

        let review: SubjectAccessReview = serde_json::from_str("{}").unwrap();
        assert_eq!(review, SubjectAccessReview::default());
    }

    #[test]
    fn responses_echo_kind_and_version() {
        let allowed = ReviewResponse::new(review(json!({})), Decision::Allow);
        assert_eq!(
            serde_json::to_value(&allowed).unwrap(),
            json!({
                "kind": "SubjectAccessReview",
                "apiVersion": "authorization.k8s.io/v1beta1",
                "status": { "allowed": true },
            })
        );

        let denied = ReviewResponse::new(review(json!({})), Decision::deny("No policy matched."));
        assert_eq!(
            serde_json::to_value(&denied).unwrap(),
            json!({
                "kind": "SubjectAccessReview",
                "apiVersion": "authorization.k8s.io/v1beta1",
                "status": { "allowed": false, "reason": "No policy matched." },
            })
        );
    }
}
