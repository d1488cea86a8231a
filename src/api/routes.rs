use std::collections::BTreeSet;

use crate::contract::{HttpMethod, RouteSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteDomain {
    System,
    Preview,
    Push,
}

impl RouteDomain {
    pub fn from_path(path: &str) -> Self {
        if path == "/health" {
            return Self::System;
        }
        if path.ends_with("/ws") {
            return Self::Push;
        }
        Self::Preview
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDefinition {
    pub spec: RouteSpec,
    pub domain: RouteDomain,
    pub handler_id: String,
}

pub fn route_catalog() -> Vec<RouteDefinition> {
    let mut out = Vec::with_capacity(CONTRACT_ROUTES.len());
    let mut seen = BTreeSet::new();

    for (method, path) in CONTRACT_ROUTES {
        let Ok(spec) = RouteSpec::new(*method, *path) else {
            continue;
        };
        if !seen.insert(spec.clone()) {
            continue;
        }

        out.push(RouteDefinition {
            domain: RouteDomain::from_path(spec.path.as_str()),
            handler_id: handler_id_for(spec.method, spec.path.as_str()),
            spec,
        });
    }

    out
}

fn handler_id_for(method: HttpMethod, path: &str) -> String {
    let mut tokens = Vec::new();
    tokens.push(method.as_str().to_ascii_lowercase());

    for part in path.trim_matches('/').split('/') {
        let normalized = part
            .chars()
            .map(|ch| {
                if ch.is_ascii_alphanumeric() {
                    ch.to_ascii_lowercase()
                } else {
                    '_'
                }
            })
            .collect::<String>();
        tokens.push(normalized);
    }

    tokens.join("_")
}

const CONTRACT_ROUTES: &[(HttpMethod, &str)] = &[
    (HttpMethod::Get, "/health"),
    (HttpMethod::Post, "/image_preview/apply"),
    (HttpMethod::Post, "/image_preview/process"),
    (HttpMethod::Post, "/image_preview/process_chain"),
    (HttpMethod::Get, "/image_preview/nodes"),
    (HttpMethod::Get, "/image_preview/ws"),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_unique_and_classified() {
        let catalog = route_catalog();
        assert_eq!(catalog.len(), CONTRACT_ROUTES.len());

        let push = catalog
            .iter()
            .filter(|route| route.domain == RouteDomain::Push)
            .count();
        assert_eq!(push, 1);
        assert_eq!(catalog[0].domain, RouteDomain::System);
    }

    #[test]
    fn handler_ids_are_snake_cased() {
        assert_eq!(
            handler_id_for(HttpMethod::Post, "/image_preview/process_chain"),
            "post_image_preview_process_chain"
        );
        assert_eq!(handler_id_for(HttpMethod::Get, "/health"), "get_health");
    }
}
