//! HTTP request/response descriptors
//!
//! The testkit never talks to a socket itself: it hands an [`HttpRequest`] to
//! an [`HttpClient`](crate::app::HttpClient) and records whatever
//! [`HttpResponse`] comes back. With the `reqwest` feature enabled,
//! [`ReqwestClient`] provides a client for applications listening on a real
//! address.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// HTTP verbs understood by the remote call helpers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
    /// HEAD
    Head,
}

impl Method {
    /// Upper-case wire name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(verb: &str) -> Result<Self, Self::Err> {
        match verb.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" | "DEL" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            other => Err(format!("unsupported HTTP verb: {other}")),
        }
    }
}

/// A fully resolved outgoing request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    /// Verb
    pub method: Method,
    /// Path (or absolute URL) exactly as resolved at call time
    pub url: String,
    /// Headers in the order they were set
    pub headers: Vec<(String, String)>,
    /// JSON payload, if any
    pub body: Option<Value>,
}

impl HttpRequest {
    /// Create a request without headers or body
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Set a header, replacing an existing one of the same name
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name, value)),
        }
    }

    /// Look a header up by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A raw response as returned by the client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Headers keyed by lower-cased name
    pub headers: BTreeMap<String, String>,
    /// Raw body text
    pub text: String,
    /// Parsed body, when the client already decoded one
    pub body: Option<Value>,
}

impl HttpResponse {
    /// Response with a status and nothing else
    pub fn status(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Response carrying a JSON document as text, without a parsed body
    pub fn json_text(status: u16, document: &Value) -> Self {
        Self::status(status)
            .with_header("content-type", "application/json; charset=utf-8")
            .with_text(document.to_string())
    }

    /// Add a header (name is lower-cased)
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Set the raw body text
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Set an already-parsed body
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Declared content type, if any
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    /// Whether the declared content type is JSON
    pub fn declares_json(&self) -> bool {
        self.content_type()
            .map(|ct| ct.contains("json"))
            .unwrap_or(false)
    }
}

#[cfg(feature = "reqwest")]
pub use self::reqwest_client::ReqwestClient;

#[cfg(feature = "reqwest")]
mod reqwest_client {
    use super::{HttpRequest, HttpResponse, Method};
    use crate::app::HttpClient;
    use crate::error::CollaboratorError;
    use async_trait::async_trait;

    /// [`HttpClient`] that sends requests to an application at `base_url`
    #[derive(Debug, Clone)]
    pub struct ReqwestClient {
        base_url: String,
        client: reqwest::Client,
    }

    impl ReqwestClient {
        /// Create a client for the application listening at `base_url`
        pub fn new(base_url: impl Into<String>) -> Self {
            Self {
                base_url: base_url.into().trim_end_matches('/').to_string(),
                client: reqwest::Client::new(),
            }
        }

        fn absolute(&self, url: &str) -> String {
            if url.starts_with("http://") || url.starts_with("https://") {
                url.to_string()
            } else {
                format!("{}{}", self.base_url, url)
            }
        }
    }

    #[async_trait]
    impl HttpClient for ReqwestClient {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, CollaboratorError> {
            let method = match request.method {
                Method::Get => reqwest::Method::GET,
                Method::Post => reqwest::Method::POST,
                Method::Put => reqwest::Method::PUT,
                Method::Patch => reqwest::Method::PATCH,
                Method::Delete => reqwest::Method::DELETE,
                Method::Head => reqwest::Method::HEAD,
            };

            let mut builder = self.client.request(method, self.absolute(&request.url));
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await.map_err(|e| {
                CollaboratorError::new(format!("request to {} failed: {e}", request.url))
            })?;

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
                })
                .collect();
            let text = response.text().await.map_err(|e| {
                CollaboratorError::new(format!("failed to read response body: {e}"))
                    .with_status(status)
            })?;

            Ok(HttpResponse {
                status,
                headers,
                text,
                body: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_parsing_accepts_short_delete() {
        assert_eq!("del".parse::<Method>(), Ok(Method::Delete));
        assert_eq!("get".parse::<Method>(), Ok(Method::Get));
        assert!("TRACE".parse::<Method>().is_err());
    }

    #[test]
    fn test_set_header_replaces_case_insensitively() {
        let mut request = HttpRequest::new(Method::Get, "/widgets");
        request.set_header("Accept", "text/plain");
        request.set_header("accept", "application/json");
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.header("ACCEPT"), Some("application/json"));
    }

    #[test]
    fn test_json_text_declares_json_without_parsed_body() {
        let response = HttpResponse::json_text(200, &json!({"id": 1}));
        assert!(response.declares_json());
        assert!(response.body.is_none());
        assert_eq!(response.text, r#"{"id":1}"#);
    }
}
