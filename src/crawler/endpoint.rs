//! Endpoint fallback chain
//!
//! One logical page fetch may be served by several equivalent API variants
//! (different paths, paging styles, JSONP wrappers). The chain tries them in
//! priority order and returns the first well-formed success. Failures of
//! individual variants are collected, never raised, and surface only as
//! [`HarvestError::NoViableEndpoint`] once every variant is exhausted.
//! Retrying the whole chain is the caller's concern.

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use crate::crawler::transport::{QueryParams, RawResponse, Transport};
use crate::models::{PageRequest, PageResult, SortMode};
use crate::utils::error::{FetchError, HarvestError, VariantFailure};

// ============================================================================
// JSONP Parser
// ============================================================================

/// Regex for extracting JSON from JSONP response
/// Format: __jp0({...}) or jQuery12345({...})
static JSONP_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^[a-zA-Z_$][a-zA-Z0-9_$.]*\s*\(\s*(.*?)\s*\)\s*;?\s*$")
        .expect("Invalid JSONP regex")
});

/// Parse a JSONP response and extract the JSON content
///
/// Plain JSON passes through untouched.
///
/// # Example
/// ```
/// use pinglun::crawler::endpoint::parse_jsonp;
///
/// let json = parse_jsonp(r#"__jp0({"code": 0})"#).unwrap();
/// assert_eq!(json, r#"{"code": 0}"#);
/// ```
pub fn parse_jsonp(jsonp: &str) -> Result<&str> {
    let trimmed = jsonp.trim();

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    if let Some(json_match) = JSONP_REGEX.captures(trimmed).and_then(|c| c.get(1)) {
        return Ok(json_match.as_str());
    }

    anyhow::bail!("Invalid JSONP format: unable to extract JSON content")
}

// ============================================================================
// Endpoint Variants
// ============================================================================

/// How a variant addresses successive pages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Paging {
    /// 1-based page index sent in `param`
    Page { param: String },
    /// Opaque cursor from the previous response sent in `param`
    Cursor { param: String },
}

/// Query parameter carrying the sort order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortParam {
    pub param: String,
    pub by_time: String,
    pub by_popularity: String,
}

impl SortParam {
    fn value(&self, mode: SortMode) -> &str {
        match mode {
            SortMode::Time => &self.by_time,
            SortMode::Popularity => &self.by_popularity,
        }
    }
}

/// One API variant able to serve a page of comments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointVariant {
    /// Short name used in logs and failure reports
    pub name: String,

    /// Absolute endpoint URL
    pub url: String,

    /// Parameter receiving the target id
    #[serde(default)]
    pub target_param: Option<String>,

    /// Additional parameters that repeat the target id
    #[serde(default)]
    pub target_aliases: Vec<String>,

    /// Parameter receiving the root comment id (reply endpoints only)
    #[serde(default)]
    pub root_param: Option<String>,

    /// Paging style
    pub paging: Paging,

    /// Parameter receiving the page size, if the endpoint accepts one
    #[serde(default)]
    pub size_param: Option<String>,

    /// Sort parameter, if the endpoint accepts one
    #[serde(default)]
    pub sort: Option<SortParam>,

    /// Constant parameters sent with every request
    #[serde(default)]
    pub extra_params: BTreeMap<String, String>,

    /// Top-level field holding the embedded status
    #[serde(default = "default_success_field")]
    pub success_field: String,

    /// Status value meaning success
    #[serde(default)]
    pub success_value: i64,
}

fn default_success_field() -> String {
    "code".to_string()
}

impl EndpointVariant {
    /// Whether the variant pages by cursor
    pub fn is_cursor_paged(&self) -> bool {
        matches!(self.paging, Paging::Cursor { .. })
    }

    /// Build query parameters for `request`
    ///
    /// Returns `None` when the variant cannot serve the request: a cursor
    /// variant past the first page with no cursor, or a reply request sent to
    /// a variant without a root parameter.
    pub fn build_params(&self, request: &PageRequest) -> Option<QueryParams> {
        let mut params: QueryParams = self.extra_params.clone();

        if let Some(param) = &self.target_param {
            params.insert(param.clone(), request.target_id.clone());
        }
        for alias in &self.target_aliases {
            params.insert(alias.clone(), request.target_id.clone());
        }

        match (&request.root_id, &self.root_param) {
            (Some(root), Some(param)) => {
                params.insert(param.clone(), root.clone());
            }
            (Some(_), None) => return None,
            (None, _) => {}
        }

        match &self.paging {
            Paging::Page { param } => {
                params.insert(param.clone(), request.page.to_string());
            }
            Paging::Cursor { param } => match &request.cursor {
                Some(cursor) => {
                    params.insert(param.clone(), cursor.clone());
                }
                None if request.page <= 1 => {}
                None => return None,
            },
        }

        if let Some(param) = &self.size_param {
            params.insert(param.clone(), request.page_size.to_string());
        }
        if let Some(sort) = &self.sort {
            params.insert(sort.param.clone(), sort.value(request.sort).to_string());
        }

        Some(params)
    }

    /// Validate a raw response and parse its body
    ///
    /// Succeeds only when the status is 2xx, the body parses as a JSON object
    /// (after JSONP unwrapping), and the embedded status equals
    /// `success_value`.
    pub fn interpret(&self, raw: &RawResponse) -> Result<Value, HarvestError> {
        if !raw.is_success() {
            return Err(HarvestError::Fetch(FetchError::ServerError(raw.status)));
        }

        let malformed = |reason: String| HarvestError::MalformedResponse {
            endpoint: self.name.clone(),
            reason,
        };

        let json = parse_jsonp(&raw.body).map_err(|e| malformed(e.to_string()))?;
        let body: Value = serde_json::from_str(json).map_err(|e| malformed(e.to_string()))?;

        if !body.is_object() {
            return Err(malformed("response is not a JSON object".to_string()));
        }

        let code = match body.get(&self.success_field) {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::Bool(b)) => Some(i64::from(*b)),
            Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
        .ok_or_else(|| malformed(format!("missing status field '{}'", self.success_field)))?;

        if code != self.success_value {
            let message = ["message", "msg"]
                .iter()
                .find_map(|key| body.get(*key).and_then(Value::as_str))
                .unwrap_or_default()
                .to_string();
            return Err(HarvestError::EndpointRejected {
                endpoint: self.name.clone(),
                code,
                message,
            });
        }

        Ok(body)
    }
}

// ============================================================================
// Fallback Chain
// ============================================================================

/// Ordered list of equivalent variants sharing one transport
#[derive(Clone)]
pub struct FallbackChain {
    variants: Vec<EndpointVariant>,
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl FallbackChain {
    /// Create a chain over `variants`, tried in order
    pub fn new(
        variants: Vec<EndpointVariant>,
        transport: Arc<dyn Transport>,
        timeout: Duration,
    ) -> Self {
        Self {
            variants,
            transport,
            timeout,
        }
    }

    /// Configured variants in priority order
    pub fn variants(&self) -> &[EndpointVariant] {
        &self.variants
    }

    /// Whether at least one variant can address a page by index alone
    pub fn supports_page_index(&self) -> bool {
        self.variants.iter().any(|v| !v.is_cursor_paged())
    }

    /// Fetch one page, trying each variant until one succeeds
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::NoViableEndpoint`] listing every variant's
    /// failure when none produced a well-formed success.
    pub async fn fetch(&self, request: &PageRequest) -> Result<PageResult, HarvestError> {
        let mut failures = Vec::with_capacity(self.variants.len());

        for variant in &self.variants {
            let Some(params) = variant.build_params(request) else {
                failures.push(VariantFailure {
                    endpoint: variant.name.clone(),
                    reason: "not applicable to this request".to_string(),
                });
                continue;
            };

            let outcome = match self.transport.fetch(&variant.url, &params, self.timeout).await {
                Ok(raw) => variant.interpret(&raw),
                Err(e) => Err(HarvestError::Fetch(e)),
            };

            match outcome {
                Ok(body) => {
                    tracing::debug!(
                        endpoint = %variant.name,
                        thread = %request.thread(),
                        page = request.page,
                        "Endpoint variant succeeded"
                    );
                    return Ok(PageResult {
                        endpoint: variant.name.clone(),
                        body,
                    });
                }
                Err(e) => {
                    tracing::debug!(
                        endpoint = %variant.name,
                        page = request.page,
                        error = %e,
                        "Endpoint variant failed, trying next"
                    );
                    failures.push(VariantFailure {
                        endpoint: variant.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Err(HarvestError::NoViableEndpoint { failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page_variant() -> EndpointVariant {
        EndpointVariant {
            name: "reply".into(),
            url: "https://api.bilibili.com/x/v2/reply".into(),
            target_param: Some("oid".into()),
            target_aliases: vec![],
            root_param: None,
            paging: Paging::Page { param: "pn".into() },
            size_param: Some("ps".into()),
            sort: Some(SortParam {
                param: "sort".into(),
                by_time: "0".into(),
                by_popularity: "2".into(),
            }),
            extra_params: BTreeMap::from([("type".to_string(), "1".to_string())]),
            success_field: "code".into(),
            success_value: 0,
        }
    }

    fn request(page: u32, cursor: Option<&str>) -> PageRequest {
        PageRequest {
            target_id: "170001".into(),
            root_id: None,
            page,
            cursor: cursor.map(String::from),
            page_size: 20,
            sort: SortMode::Time,
        }
    }

    #[test]
    fn test_parse_jsonp() {
        assert_eq!(parse_jsonp(r#"_callback({"a": 1})"#).unwrap(), r#"{"a": 1}"#);
        assert_eq!(parse_jsonp("jQuery123_456({\"a\":\n1});").unwrap(), "{\"a\":\n1}");
        assert_eq!(parse_jsonp(r#"  {"a": 1}  "#).unwrap(), r#"{"a": 1}"#);
        assert!(parse_jsonp("<html>blocked</html>").is_err());
    }

    #[test]
    fn test_page_params() {
        let params = page_variant().build_params(&request(3, None)).unwrap();
        assert_eq!(params["oid"], "170001");
        assert_eq!(params["pn"], "3");
        assert_eq!(params["ps"], "20");
        assert_eq!(params["sort"], "0");
        assert_eq!(params["type"], "1");
    }

    #[test]
    fn test_cursor_variant_needs_cursor_after_first_page() {
        let mut variant = page_variant();
        variant.paging = Paging::Cursor {
            param: "next".into(),
        };

        let first = variant.build_params(&request(1, None)).unwrap();
        assert!(!first.contains_key("next"));
        assert!(variant.build_params(&request(2, None)).is_none());
        assert_eq!(
            variant.build_params(&request(2, Some("2"))).unwrap()["next"],
            "2"
        );
    }

    #[test]
    fn test_reply_request_requires_root_param() {
        let mut req = request(1, None);
        req.root_id = Some("42".into());
        assert!(page_variant().build_params(&req).is_none());

        let mut variant = page_variant();
        variant.root_param = Some("root".into());
        assert_eq!(variant.build_params(&req).unwrap()["root"], "42");
    }

    #[test]
    fn test_interpret_success() {
        let raw = RawResponse::new(200, r#"{"code":0,"data":{"replies":[]}}"#);
        let body = page_variant().interpret(&raw).unwrap();
        assert!(body["data"]["replies"].is_array());
    }

    #[test]
    fn test_interpret_rejected() {
        let raw = RawResponse::new(200, r#"{"code":-412,"message":"请求被拦截"}"#);
        match page_variant().interpret(&raw) {
            Err(HarvestError::EndpointRejected { code, message, .. }) => {
                assert_eq!(code, -412);
                assert_eq!(message, "请求被拦截");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_interpret_malformed_and_status() {
        let variant = page_variant();
        assert!(matches!(
            variant.interpret(&RawResponse::new(200, "not json")),
            Err(HarvestError::MalformedResponse { .. })
        ));
        assert!(matches!(
            variant.interpret(&RawResponse::new(200, r#"{"data":{}}"#)),
            Err(HarvestError::MalformedResponse { .. })
        ));
        assert!(matches!(
            variant.interpret(&RawResponse::new(412, "")),
            Err(HarvestError::Fetch(FetchError::ServerError(412)))
        ));
    }

    #[test]
    fn test_interpret_weibo_ok_flag() {
        let mut variant = page_variant();
        variant.success_field = "ok".into();
        variant.success_value = 1;

        assert!(variant
            .interpret(&RawResponse::new(200, r#"{"ok":1,"data":{"data":[]}}"#))
            .is_ok());
        assert!(matches!(
            variant.interpret(&RawResponse::new(200, r#"{"ok":0,"msg":"login"}"#)),
            Err(HarvestError::EndpointRejected { code: 0, .. })
        ));
    }

    #[test]
    fn test_variant_from_toml() {
        let src = r#"
            name = "hotflow"
            url = "https://m.weibo.cn/comments/hotflow"
            target_param = "id"
            target_aliases = ["mid"]
            success_field = "ok"
            success_value = 1

            [paging]
            kind = "cursor"
            param = "max_id"

            [extra_params]
            max_id_type = "0"
        "#;
        let variant: EndpointVariant = toml::from_str(src).unwrap();
        assert!(variant.is_cursor_paged());
        assert_eq!(variant.target_aliases, vec!["mid".to_string()]);
        assert_eq!(variant.extra_params["max_id_type"], "0");
    }
}
