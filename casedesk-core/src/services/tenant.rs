//! Tenant resolution and physical key derivation

use std::sync::{OnceLock, PoisonError, RwLock};

use url::Url;

use crate::error::{CoreError, CoreResult};

/// Placeholder values that leak from loosely typed callers and must not
/// be treated as tenant ids.
const SENTINELS: [&str; 3] = ["undefined", "null", "unknown"];

/// Path segments that precede a tenant id in page URLs (`/teams/42/cases`).
const TEAM_SEGMENTS: [&str; 2] = ["team", "teams"];

/// Query parameters that carry a tenant id.
const TEAM_PARAMS: [&str; 2] = ["team_id", "teamId"];

fn normalize(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty()
        || SENTINELS
            .iter()
            .any(|sentinel| trimmed.eq_ignore_ascii_case(sentinel))
    {
        return None;
    }
    Some(trimmed.to_string())
}

/// Escape the separator so `tenant:key` stays unambiguous for any tenant id.
fn escape_tenant(tenant: &str) -> String {
    tenant.replace('%', "%25").replace(':', "%3A")
}

/// Extract the tenant id from a page URL.
#[must_use]
pub fn tenant_from_url(page_url: &str) -> Option<String> {
    let url = Url::parse(page_url).ok()?;

    if let Some(segments) = url.path_segments() {
        let segments: Vec<&str> = segments.collect();
        let from_path = segments
            .windows(2)
            .find(|pair| TEAM_SEGMENTS.contains(&pair[0]))
            .and_then(|pair| normalize(pair[1]));
        if from_path.is_some() {
            return from_path;
        }
    }

    url.query_pairs()
        .find(|(name, _)| TEAM_PARAMS.contains(&name.as_ref()))
        .and_then(|(_, value)| normalize(&value))
}

/// Resolves the tenant a cache key belongs to.
///
/// Resolution order:
/// 1. the explicit id passed by the caller
/// 2. the current tenant selected by the UI layer
/// 3. the tenant parsed from the page URL
/// 4. an `anon-<uuid>` generated on first use and reused for the life of the resolver
#[derive(Debug, Default)]
pub struct TenantResolver {
    current: RwLock<Option<String>>,
    page: RwLock<Option<String>>,
    fallback: OnceLock<String>,
}

impl TenantResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the tenant the user is working in. Sentinels and blanks clear it.
    pub fn set_current_tenant(&self, tenant_id: Option<&str>) {
        let value = tenant_id.and_then(normalize);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    /// Record the page URL the cache is serving.
    pub fn set_page_url(&self, page_url: &str) {
        let value = tenant_from_url(page_url);
        if value.is_none() {
            log::debug!("[cache] No tenant in page URL");
        }
        *self.page.write().unwrap_or_else(PoisonError::into_inner) = value;
    }

    #[must_use]
    pub fn resolve(&self, explicit: Option<&str>) -> String {
        if let Some(tenant) = explicit.and_then(normalize) {
            return tenant;
        }
        if let Some(tenant) = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return tenant;
        }
        if let Some(tenant) = self
            .page
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            return tenant;
        }
        self.fallback_tenant().to_string()
    }

    /// The anonymous fallback id, generated once.
    pub fn fallback_tenant(&self) -> &str {
        self.fallback
            .get_or_init(|| format!("anon-{}", uuid::Uuid::new_v4()))
    }

    /// `tenant:key` for the resolved tenant. Returns the tenant alongside.
    ///
    /// `%` and `:` in the tenant id are percent-escaped, so the first `:`
    /// always ends the tenant part.
    pub fn physical_key(&self, explicit: Option<&str>, key: &str) -> CoreResult<(String, String)> {
        let key = key.trim();
        if key.is_empty() {
            return Err(CoreError::ValidationError(
                "cache key must not be empty".to_string(),
            ));
        }
        let tenant = self.resolve(explicit);
        let physical = format!("{}:{key}", escape_tenant(&tenant));
        Ok((tenant, physical))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_tenant_wins() {
        let resolver = TenantResolver::new();
        resolver.set_current_tenant(Some("7"));
        assert_eq!(resolver.resolve(Some(" 12 ")), "12");
    }

    #[test]
    fn sentinels_fall_through() {
        let resolver = TenantResolver::new();
        resolver.set_current_tenant(Some("7"));
        for sentinel in ["", "  ", "undefined", "NULL", "unknown"] {
            assert_eq!(resolver.resolve(Some(sentinel)), "7");
        }
    }

    #[test]
    fn current_then_page_url() {
        let resolver = TenantResolver::new();
        resolver.set_page_url("https://casedesk.example/teams/31/runs?tab=open");
        assert_eq!(resolver.resolve(None), "31");

        resolver.set_current_tenant(Some("5"));
        assert_eq!(resolver.resolve(None), "5");

        resolver.set_current_tenant(Some("null"));
        assert_eq!(resolver.resolve(None), "31");
    }

    #[test]
    fn url_query_parameter() {
        assert_eq!(
            tenant_from_url("https://casedesk.example/cases?teamId=88").as_deref(),
            Some("88")
        );
        assert_eq!(
            tenant_from_url("https://casedesk.example/cases?team_id=9").as_deref(),
            Some("9")
        );
        assert_eq!(tenant_from_url("https://casedesk.example/team/undefined"), None);
        assert_eq!(tenant_from_url("not a url"), None);
    }

    #[test]
    fn fallback_is_stable_per_resolver() {
        let resolver = TenantResolver::new();
        let first = resolver.resolve(None);
        assert!(first.starts_with("anon-"));
        assert_eq!(resolver.resolve(Some("undefined")), first);

        let other_page = TenantResolver::new();
        assert_ne!(other_page.resolve(None), first);
    }

    #[test]
    fn physical_key_layout() {
        let resolver = TenantResolver::new();
        let (tenant, key) = resolver.physical_key(Some("4"), "members").unwrap();
        assert_eq!(tenant, "4");
        assert_eq!(key, "4:members");
        assert!(matches!(
            resolver.physical_key(Some("4"), " "),
            Err(CoreError::ValidationError(_))
        ));
    }

    #[test]
    fn separator_in_tenant_id_cannot_collide() {
        let resolver = TenantResolver::new();
        let (tenant, first) = resolver.physical_key(Some("a:b"), "c").unwrap();
        let (_, second) = resolver.physical_key(Some("a"), "b:c").unwrap();
        assert_eq!(tenant, "a:b");
        assert_eq!(first, "a%3Ab:c");
        assert_eq!(second, "a:b:c");
        assert_ne!(first, second);

        let (_, literal) = resolver.physical_key(Some("a%3Ab"), "c").unwrap();
        assert_eq!(literal, "a%253Ab:c");
        assert_ne!(literal, first);
    }
}
