/// The normalized shape of an access-check request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attributes {
    pub user: String,
    pub verb: String,
    pub request: RequestAttributes,
}

/// Exactly one of the resource and non-resource attribute groups describes a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestAttributes {
    Resource {
        namespace: String,
        api_group: String,
        resource: String,
    },
    NonResource {
        path: String,
    },
}

/// The outcome of evaluating a request against a policy.
///
/// A denial always carries a non-empty reason; an allow never does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

const DEFAULT_DENY_REASON: &str = "denied";

// === impl Attributes ===

impl Attributes {
    pub fn resource(
        user: impl Into<String>,
        verb: impl Into<String>,
        namespace: impl Into<String>,
        api_group: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            verb: verb.into(),
            request: RequestAttributes::Resource {
                namespace: namespace.into(),
                api_group: api_group.into(),
                resource: resource.into(),
            },
        }
    }

    pub fn non_resource(
        user: impl Into<String>,
        verb: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            verb: verb.into(),
            request: RequestAttributes::NonResource { path: path.into() },
        }
    }

    pub fn is_resource_request(&self) -> bool {
        matches!(self.request, RequestAttributes::Resource { .. })
    }

    pub fn namespace(&self) -> &str {
        match &self.request {
            RequestAttributes::Resource { namespace, .. } => namespace,
            RequestAttributes::NonResource { .. } => "",
        }
    }

    pub fn api_group(&self) -> &str {
        match &self.request {
            RequestAttributes::Resource { api_group, .. } => api_group,
            RequestAttributes::NonResource { .. } => "",
        }
    }

    pub fn resource_name(&self) -> &str {
        match &self.request {
            RequestAttributes::Resource { resource, .. } => resource,
            RequestAttributes::NonResource { .. } => "",
        }
    }

    pub fn path(&self) -> &str {
        match &self.request {
            RequestAttributes::Resource { .. } => "",
            RequestAttributes::NonResource { path } => path,
        }
    }
}

// === impl Decision ===

impl Decision {
    /// Denies a request. An empty reason is replaced so that denials are always explained.
    pub fn deny(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        if reason.is_empty() {
            return Self::Deny {
                reason: DEFAULT_DENY_REASON.to_string(),
            };
        }
        Self::Deny { reason }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Allow => None,
            Self::Deny { reason } => Some(reason),
        }
    }
}
