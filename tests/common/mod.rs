//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;

use pinglun::config::Config;
use pinglun::crawler::endpoint::{EndpointVariant, Paging, SortParam};
use pinglun::crawler::transport::{QueryParams, RawResponse, Transport};
use pinglun::error::FetchError;
use pinglun::utils::retry::DelayInterval;

pub const REPLY_URL: &str = "https://api.bilibili.com/x/v2/reply";
pub const SUB_REPLY_URL: &str = "https://api.bilibili.com/x/v2/reply/reply";

type Handler = dyn Fn(&str, &QueryParams) -> Result<RawResponse, FetchError> + Send + Sync;

/// One request seen by [`ScriptedTransport`]
#[derive(Debug, Clone)]
pub struct Call {
    pub endpoint: String,
    pub params: QueryParams,
}

impl Call {
    /// Page index sent in `pn`, if any
    pub fn page(&self) -> Option<u32> {
        self.params.get("pn").and_then(|p| p.parse().ok())
    }
}

/// In-memory transport answering from a closure and logging every request
pub struct ScriptedTransport {
    handler: Box<Handler>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &QueryParams) -> Result<RawResponse, FetchError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Requests sent to exactly `endpoint`
    pub fn calls_to(&self, endpoint: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.endpoint == endpoint)
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn fetch(
        &self,
        endpoint: &str,
        params: &QueryParams,
        _timeout: Duration,
    ) -> Result<RawResponse, FetchError> {
        self.calls.lock().unwrap().push(Call {
            endpoint: endpoint.to_string(),
            params: params.clone(),
        });
        (self.handler)(endpoint, params)
    }
}

/// 200 response carrying `body`
pub fn ok(body: Value) -> Result<RawResponse, FetchError> {
    Ok(RawResponse::new(200, body.to_string()))
}

/// Page-indexed Bilibili-style variant
pub fn paged_variant(name: &str, url: &str) -> EndpointVariant {
    EndpointVariant {
        name: name.to_string(),
        url: url.to_string(),
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
        extra_params: [("type".to_string(), "1".to_string())].into(),
        success_field: "code".into(),
        success_value: 0,
    }
}

/// Configuration with no pauses and a single page-indexed variant per chain
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.harvest.delay_interval = DelayInterval::zero();

    let mut replies = paged_variant("reply-reply", SUB_REPLY_URL);
    replies.root_param = Some("root".into());
    replies.sort = None;

    config.endpoints.top_level = Some(vec![paged_variant("reply-paged", REPLY_URL)]);
    config.endpoints.replies = Some(vec![replies]);
    config
}

/// Bilibili top-level comment entry
pub fn bili_comment(id: u64, replies: u64) -> Value {
    json!({
        "rpid": id,
        "rpid_str": id.to_string(),
        "oid": 170001,
        "root": 0,
        "parent": 0,
        "mid": 1000 + id,
        "ctime": 1_700_000_000 + id,
        "like": id % 7,
        "rcount": replies,
        "member": {
            "mid": (1000 + id).to_string(),
            "uname": format!("user{id}"),
            "sex": "保密",
            "level_info": { "current_level": 5 },
            "vip": { "vipStatus": 0 }
        },
        "content": { "message": format!("comment {id}") }
    })
}

/// Bilibili reply entry under `root`
pub fn bili_reply(id: u64, root: u64) -> Value {
    json!({
        "rpid": id,
        "rpid_str": id.to_string(),
        "root": root,
        "parent": root,
        "ctime": 1_700_100_000 + id,
        "like": 1,
        "rcount": 0,
        "member": { "mid": "2001", "uname": "replier" },
        "content": { "message": format!("reply {id}") }
    })
}

/// Bilibili page body, optionally declaring the total item count
pub fn bili_page(entries: Vec<Value>, total: Option<u64>) -> Value {
    let mut data = json!({ "replies": entries });
    if let Some(total) = total {
        data["page"] = json!({ "count": total });
    }
    json!({ "code": 0, "message": "0", "data": data })
}

/// `count` consecutive top-level entries starting at `first`, without replies
pub fn bili_comments(first: u64, count: u64) -> Vec<Value> {
    (first..first + count).map(|id| bili_comment(id, 0)).collect()
}
