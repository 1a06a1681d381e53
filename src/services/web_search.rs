use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::utils::log_helpers::truncate_log;

const MAX_RESULTS: u32 = 3;

/// Web search used to answer `web_search` tool calls. Always yields a JSON
/// string: either the provider's results or an `{"error": ...}` object.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> String;
}

#[derive(Clone)]
pub struct TavilySearch {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl TavilySearch {
    pub fn new(api_key: Option<String>, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    fn payload(query: &str) -> Value {
        json!({
            "query": query,
            "search_depth": "advanced",
            "max_results": MAX_RESULTS,
            "include_answer": true,
            "include_raw_content": true,
        })
    }
}

#[async_trait]
impl WebSearch for TavilySearch {
    async fn search(&self, query: &str) -> String {
        let Some(api_key) = self.api_key.as_deref() else {
            return json!({ "error": "Web search is not available, API key not configured" })
                .to_string();
        };

        let url = format!("{}/search", self.base_url.trim_end_matches('/'));
        let resp = match self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&Self::payload(query))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                warn!("[SEARCH] request failed for query {:?}: {}", query, err);
                return json!({ "error": "An error occurred during the web search" }).to_string();
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let details = resp.text().await.unwrap_or_default();
            warn!(
                "[SEARCH] search failed for query {:?}: status={}, body={}",
                query,
                status,
                truncate_log(&details, 500)
            );
            return json!({
                "error": format!("Search failed with status: {}", status.as_u16()),
                "details": details,
            })
            .to_string();
        }

        match resp.json::<Value>().await {
            Ok(data) => {
                info!("[SEARCH] search succeeded for query {:?}", query);
                data.to_string()
            }
            Err(err) => {
                warn!("[SEARCH] invalid response for query {:?}: {}", query, err);
                json!({ "error": "An error occurred during the web search" }).to_string()
            }
        }
    }
}
