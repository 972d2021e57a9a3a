//! Wire types for the remote analysis service

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize)]
pub struct UploadTaskRequest<'a> {
    pub index_name: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeRequest<'a> {
    pub video_id: &'a str,
    pub task_type: &'a str,
    pub options: &'a Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest<'a> {
    pub index_name: &'a str,
    pub query: &'a str,
    #[serde(flatten)]
    pub options: &'a Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateIndexRequest<'a> {
    pub index_name: &'a str,
    #[serde(flatten)]
    pub options: &'a Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest<'a> {
    pub video_id: &'a str,
    pub prompt: &'a str,
    #[serde(flatten)]
    pub options: &'a Map<String, Value>,
}

/// Body of every task-creating response
#[derive(Debug, Clone, Deserialize)]
pub struct TaskCreated {
    pub task_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub matches: Vec<Value>,
}

/// Rate limit counters from the most recent response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub remaining: Option<u64>,
    /// Unix time at which the window resets
    pub reset: Option<u64>,
}

/// Payload of a request issued through `RemoteTaskClient::request`
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    /// Raw upload chunk with its `Content-Range` header value
    Chunk { data: Vec<u8>, content_range: String },
}

/// `bytes <start>-<end>/<total>` with an inclusive end
pub fn content_range(start: u64, len: u64, total: u64) -> String {
    format!("bytes {}-{}/{}", start, start + len.saturating_sub(1), total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_range() {
        assert_eq!(content_range(0, 1024, 3072), "bytes 0-1023/3072");
        assert_eq!(content_range(2048, 1024, 3072), "bytes 2048-3071/3072");
    }

    #[test]
    fn test_search_request_flattens_options() {
        let mut options = Map::new();
        options.insert("limit".into(), Value::from(5));
        let body = serde_json::to_value(SearchRequest {
            index_name: "default",
            query: "goal",
            options: &options,
        })
        .unwrap();
        assert_eq!(body["index_name"], "default");
        assert_eq!(body["query"], "goal");
        assert_eq!(body["limit"], 5);
    }
}
