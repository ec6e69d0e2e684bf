//! Cache key derivation.
//!
//! A key is the namespace followed by the present vary-by components, joined
//! with `:` in vary-by order. Derivation is a pure function of
//! `(namespace, vary_by, request)`.

use axum::http::{HeaderMap, Method, Uri, request::Parts};
use serde_json::Value;

use crate::middleware::CurrentUser;

/// Placeholder used for requests without an authenticated user.
pub const ANONYMOUS: &str = "anonymous";

/// A request dimension folded into the cache key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaryBy {
    /// Path and query string as received
    Url,
    /// HTTP method
    Method,
    /// Authenticated user id, or `anonymous`
    User,
    /// Query parameters sorted by name; omitted when there are none
    Query,
    /// JSON request body; omitted when empty
    Body,
    /// Value of the named request header; omitted when absent or empty
    Header(String),
}

impl VaryBy {
    /// The default dimensions: url, method, user.
    pub fn defaults() -> Vec<VaryBy> {
        vec![VaryBy::Url, VaryBy::Method, VaryBy::User]
    }
}

/// What key generators and cacheability predicates see of a request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub user_id: Option<String>,
    pub body: Option<Value>,
}

impl RequestInfo {
    pub fn from_parts(parts: &Parts, body: Option<Value>) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
            user_id: parts
                .extensions
                .get::<CurrentUser>()
                .map(|user| user.id.clone()),
            body,
        }
    }

    /// Path plus query string.
    pub fn url(&self) -> &str {
        self.uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| self.uri.path())
    }

    pub fn user(&self) -> &str {
        self.user_id.as_deref().unwrap_or(ANONYMOUS)
    }

    /// Query parameters sorted by name and re-encoded as `k=v&k=v`, or
    /// `None` when the request has no query parameters. Repeated names keep
    /// their original relative order.
    pub fn sorted_query(&self) -> Option<String> {
        let query = self.uri.query()?;
        let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if pairs.is_empty() {
            return None;
        }
        pairs.sort_by(|a, b| a.0.cmp(&b.0));

        Some(
            url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&pairs)
                .finish(),
        )
    }

    fn body_component(&self) -> Option<String> {
        let body = self.body.as_ref()?;
        let empty = match body {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::String(s) => s.is_empty(),
            Value::Bool(_) | Value::Number(_) => false,
        };
        if empty {
            None
        } else {
            serde_json::to_string(body).ok()
        }
    }

    fn header_component(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

/// Build the default cache key for a request.
pub fn generate_default_key(namespace: &str, vary_by: &[VaryBy], req: &RequestInfo) -> String {
    let mut parts = Vec::with_capacity(vary_by.len() + 1);
    parts.push(namespace.to_string());

    for dimension in vary_by {
        let component = match dimension {
            VaryBy::Url => Some(req.url().to_string()),
            VaryBy::Method => Some(req.method.as_str().to_string()),
            VaryBy::User => Some(req.user().to_string()),
            VaryBy::Query => req.sorted_query(),
            VaryBy::Body => req.body_component(),
            VaryBy::Header(name) => req.header_component(name),
        };
        if let Some(component) = component {
            parts.push(component);
        }
    }

    parts.join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;
    use serde_json::json;

    fn info(method: Method, uri: &str, user: Option<&str>) -> RequestInfo {
        let mut req = Request::builder()
            .method(method)
            .uri(uri)
            .header("accept-language", "de")
            .body(())
            .unwrap();
        if let Some(id) = user {
            req.extensions_mut().insert(CurrentUser { id: id.to_string() });
        }
        let (parts, _) = req.into_parts();
        RequestInfo::from_parts(&parts, None)
    }

    #[test]
    fn test_default_dimensions() {
        let req = info(Method::GET, "/content?x=1", None);
        assert_eq!(
            generate_default_key("http", &VaryBy::defaults(), &req),
            "http:/content?x=1:GET:anonymous"
        );

        let req = info(Method::GET, "/content", Some("u-42"));
        assert_eq!(
            generate_default_key("http", &VaryBy::defaults(), &req),
            "http:/content:GET:u-42"
        );
    }

    #[test]
    fn test_key_is_idempotent() {
        let req = info(Method::GET, "/blog?page=2", Some("u-1"));
        let vary = VaryBy::defaults();
        assert_eq!(
            generate_default_key("http", &vary, &req),
            generate_default_key("http", &vary, &req)
        );
    }

    #[test]
    fn test_query_dimension_ignores_parameter_order() {
        let vary = [VaryBy::Query];
        let a = info(Method::GET, "/content?a=1&b=2", None);
        let b = info(Method::GET, "/content?b=2&a=1", None);

        assert_eq!(generate_default_key("q", &vary, &a), "q:a=1&b=2");
        assert_eq!(
            generate_default_key("q", &vary, &a),
            generate_default_key("q", &vary, &b)
        );
    }

    #[test]
    fn test_query_dimension_keeps_encoded_separators_distinct() {
        let vary = [VaryBy::Query];
        let encoded = info(Method::GET, "/content?a=1%26b%3D2", None);
        let split = info(Method::GET, "/content?a=1&b=2", None);

        assert_eq!(generate_default_key("q", &vary, &encoded), "q:a=1%26b%3D2");
        assert_ne!(
            generate_default_key("q", &vary, &encoded),
            generate_default_key("q", &vary, &split)
        );
    }

    #[test]
    fn test_query_dimension_omitted_without_params() {
        let vary = [VaryBy::Method, VaryBy::Query];
        assert_eq!(
            generate_default_key("q", &vary, &info(Method::GET, "/content", None)),
            "q:GET"
        );
        assert_eq!(
            generate_default_key("q", &vary, &info(Method::GET, "/content?", None)),
            "q:GET"
        );
    }

    #[test]
    fn test_vary_by_order_matters() {
        let req = info(Method::GET, "/content", None);
        let a = generate_default_key("n", &[VaryBy::Url, VaryBy::Method], &req);
        let b = generate_default_key("n", &[VaryBy::Method, VaryBy::Url], &req);
        assert_eq!(a, "n:/content:GET");
        assert_eq!(b, "n:GET:/content");
        assert_ne!(a, b);
    }

    #[test]
    fn test_header_dimension() {
        let req = info(Method::GET, "/content", None);
        let vary = [
            VaryBy::Url,
            VaryBy::Header("accept-language".into()),
            VaryBy::Header("x-missing".into()),
        ];
        assert_eq!(generate_default_key("n", &vary, &req), "n:/content:de");
    }

    #[test]
    fn test_body_dimension_only_when_non_empty() {
        let mut req = info(Method::GET, "/search", None);
        let vary = [VaryBy::Url, VaryBy::Body];

        assert_eq!(generate_default_key("n", &vary, &req), "n:/search");

        req.body = Some(json!({}));
        assert_eq!(generate_default_key("n", &vary, &req), "n:/search");

        req.body = Some(json!({"q": "rust"}));
        assert_eq!(
            generate_default_key("n", &vary, &req),
            r#"n:/search:{"q":"rust"}"#
        );
    }
}
