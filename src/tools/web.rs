//! Web search: the Tavily backend and the `web_search` tool exposed to the model.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::Tool;

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Query → ranked results.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str) -> anyhow::Result<Vec<SearchResult>>;
}

/// Tavily search API client.
pub struct TavilyClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    max_results: usize,
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'static str,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyHit>,
}

#[derive(Debug, Deserialize)]
struct TavilyHit {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

impl TavilyClient {
    pub fn new(api_key: impl Into<String>, max_results: usize) -> Self {
        Self::with_endpoint(TAVILY_ENDPOINT, api_key, max_results)
    }

    pub fn with_endpoint(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        max_results: usize,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            max_results,
        }
    }
}

#[async_trait]
impl SearchBackend for TavilyClient {
    async fn search(&self, query: &str) -> anyhow::Result<Vec<SearchResult>> {
        let body = TavilyRequest {
            api_key: &self.api_key,
            query,
            max_results: self.max_results,
            search_depth: "advanced",
        };

        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Search API error {}: {}", status, text));
        }

        let text = response.text().await?;
        parse_tavily(&text)
    }
}

fn parse_tavily(body: &str) -> anyhow::Result<Vec<SearchResult>> {
    let parsed: TavilyResponse = serde_json::from_str(body)
        .map_err(|e| anyhow::anyhow!("Malformed search response: {}", e))?;
    Ok(parsed
        .results
        .into_iter()
        .map(|hit| SearchResult {
            title: hit.title,
            url: hit.url,
            snippet: hit.content,
        })
        .collect())
}

/// Search the web for current information.
pub struct WebSearch {
    backend: Arc<dyn SearchBackend>,
}

impl WebSearch {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "A search engine optimized for comprehensive, accurate, and trusted results. Useful for when you need to answer questions about current events, products, competitors, trends or user reviews. Input should be a search query."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<String> {
        let query = args["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("Missing 'query' argument"))?;

        tracing::info!(query, "Running web search");
        let results = self.backend.search(query).await?;

        if results.is_empty() {
            Ok(format!("No results found for: {}", query))
        } else {
            Ok(format_results(&results))
        }
    }
}

fn format_results(results: &[SearchResult]) -> String {
    results
        .iter()
        .map(|r| format!("**{}**\n{}\nURL: {}", r.title, r.snippet, r.url))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<SearchResult>);

    #[async_trait]
    impl SearchBackend for Fixed {
        async fn search(&self, _query: &str) -> anyhow::Result<Vec<SearchResult>> {
            Ok(self.0.clone())
        }
    }

    fn hit(title: &str) -> SearchResult {
        SearchResult {
            title: title.to_string(),
            url: format!("https://example.com/{}", title),
            snippet: format!("{} snippet", title),
        }
    }

    #[test]
    fn parses_tavily_results_in_rank_order() {
        let body = r#"{"query":"q","results":[
            {"title":"A","url":"https://a","content":"first","score":0.9},
            {"title":"B","url":"https://b","content":"second","score":0.5}
        ]}"#;
        let results = parse_tavily(body).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "A");
        assert_eq!(results[0].snippet, "first");
        assert_eq!(results[1].url, "https://b");
    }

    #[test]
    fn malformed_tavily_body_is_an_error() {
        assert!(parse_tavily("not json").is_err());
    }

    #[tokio::test]
    async fn web_search_formats_hits() {
        let tool = WebSearch::new(Arc::new(Fixed(vec![hit("one"), hit("two")])));
        let out = tool.execute(json!({"query": "toothbrush"})).await.unwrap();
        assert!(out.starts_with("**one**\none snippet\nURL: https://example.com/one"));
        assert!(out.contains("**two**"));
    }

    #[tokio::test]
    async fn web_search_reports_no_results() {
        let tool = WebSearch::new(Arc::new(Fixed(Vec::new())));
        let out = tool.execute(json!({"query": "nothing"})).await.unwrap();
        assert_eq!(out, "No results found for: nothing");
    }

    #[tokio::test]
    async fn web_search_requires_query() {
        let tool = WebSearch::new(Arc::new(Fixed(Vec::new())));
        assert!(tool.execute(json!({})).await.is_err());
        assert!(tool.execute(json!({"query": "  "})).await.is_err());
    }
}
