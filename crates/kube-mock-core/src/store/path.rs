//! Kubernetes REST path grammar.

use crate::types::resource::ResourceType;

/// A parsed API path.
///
/// Covers `/api/{v}/...` and `/apis/{group}/{v}/...`, namespaced
/// (`namespaces/{ns}/{plural}[/{name}[/{sub}]]`) and cluster or all-namespace
/// (`{plural}[/{name}[/{sub}]]`) forms, plus the legacy `watch/` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiPath {
    pub resource_type: ResourceType,
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub subresource: Option<String>,
    /// Path used the legacy `/watch/` prefix
    pub watch: bool,
}

const NAMESPACE_SUBRESOURCES: [&str; 2] = ["status", "finalize"];

impl ApiPath {
    pub fn parse(path: &str) -> Option<Self> {
        let segments: Vec<&str> = path
            .split('?')
            .next()
            .unwrap_or_default()
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();

        let (group, version, mut rest) = match segments.as_slice() {
            ["api", version, rest @ ..] => ("", *version, rest),
            ["apis", group, version, rest @ ..] => (*group, *version, rest),
            _ => return None,
        };

        let watch = rest.first() == Some(&"watch");
        if watch {
            rest = &rest[1..];
        }

        let (namespace, plural, name, subresource) = match rest {
            ["namespaces", ns, sub] if group.is_empty() && NAMESPACE_SUBRESOURCES.contains(sub) => {
                (None, "namespaces", Some(*ns), Some(*sub))
            }
            ["namespaces", ns, plural, tail @ ..] if tail.len() <= 2 => {
                (Some(*ns), *plural, tail.first().copied(), tail.get(1).copied())
            }
            ["namespaces", ns] => (None, "namespaces", Some(*ns), None),
            [plural, tail @ ..] if tail.len() <= 2 => {
                (None, *plural, tail.first().copied(), tail.get(1).copied())
            }
            _ => return None,
        };

        Some(Self {
            resource_type: ResourceType::new(group, version, plural),
            namespace: namespace.map(str::to_string),
            name: name.map(str::to_string),
            subresource: subresource.map(str::to_string),
            watch,
        })
    }
}
