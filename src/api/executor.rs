//! The remote request executor: the one seam between this crate and the
//! actual network transport.
//!
//! The orchestrator only ever sees `Result<Value, RemoteError>`, so anything
//! that can classify its failures as transport vs application can stand in
//! for the real API, including the scripted executors the tests use.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::config::Config;
use crate::error::{RemoteError, SetupError};

/// Request verb. `GET` is the only verb that reads caches; everything else is
/// a mutation and goes through the sync queue on transport failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  #[default]
  Get,
  Post,
  Put,
  Delete,
  Patch,
}

impl Method {
  pub fn is_mutation(&self) -> bool {
    !matches!(self, Method::Get)
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Delete => "DELETE",
      Method::Patch => "PATCH",
    };
    f.write_str(name)
  }
}

/// A keyed request handed to the executor.
#[derive(Debug, Clone)]
pub struct RemoteRequest {
  pub endpoint: String,
  pub method: Method,
  pub params: BTreeMap<String, String>,
  pub body: Option<Value>,
}

/// Performs a request over some transport and classifies its failures.
pub trait RemoteExecutor: Send + Sync {
  fn execute(&self, request: RemoteRequest) -> BoxFuture<'_, Result<Value, RemoteError>>;
}

/// The default executor: JSON over HTTP via reqwest, with a bounded timeout
/// and an optional bearer token.
pub struct HttpExecutor {
  client: reqwest::Client,
  base_url: String,
  token: Option<String>,
}

impl HttpExecutor {
  pub fn new(config: &Config) -> Result<Self, SetupError> {
    let client = reqwest::Client::builder()
      .timeout(config.request_timeout())
      .build()
      .map_err(|err| SetupError::HttpClient(err.to_string()))?;

    Ok(Self {
      client,
      base_url: config.base_url.trim_end_matches('/').to_string(),
      token: None,
    })
  }

  pub fn with_token(mut self, token: impl Into<String>) -> Self {
    self.token = Some(token.into());
    self
  }

  fn url_for(&self, endpoint: &str) -> String {
    format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
  }
}

impl RemoteExecutor for HttpExecutor {
  fn execute(&self, request: RemoteRequest) -> BoxFuture<'_, Result<Value, RemoteError>> {
    Box::pin(async move {
      let method = match request.method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
        Method::Patch => reqwest::Method::PATCH,
      };

      let mut builder = self.client.request(method, self.url_for(&request.endpoint));
      if !request.params.is_empty() {
        builder = builder.query(&request.params);
      }
      if let Some(token) = &self.token {
        builder = builder.bearer_auth(token);
      }
      if let Some(body) = &request.body {
        builder = builder.json(body);
      }

      let response = builder
        .send()
        .await
        .map_err(|err| RemoteError::Transport(err.to_string()))?;

      let status = response.status();
      if status.is_success() {
        // A body cut off mid-flight never reached us intact
        response
          .json::<Value>()
          .await
          .map_err(|err| RemoteError::Transport(err.to_string()))
      } else {
        let message = response.text().await.unwrap_or_default();
        Err(RemoteError::Application {
          status: status.as_u16(),
          message,
        })
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn method_serializes_uppercase() {
    assert_eq!(serde_json::to_string(&Method::Post).unwrap(), "\"POST\"");
    let parsed: Method = serde_json::from_str("\"DELETE\"").unwrap();
    assert_eq!(parsed, Method::Delete);
  }

  #[test]
  fn only_get_reads_caches() {
    assert!(!Method::Get.is_mutation());
    for method in [Method::Post, Method::Put, Method::Delete, Method::Patch] {
      assert!(method.is_mutation());
    }
  }

  #[test]
  fn urls_join_without_doubled_slashes() {
    let config = Config {
      base_url: "http://api.example/v1/".to_string(),
      ..Config::default()
    };
    let executor = HttpExecutor::new(&config).unwrap();
    assert_eq!(executor.url_for("/dashboard"), "http://api.example/v1/dashboard");
    assert_eq!(executor.url_for("dashboard"), "http://api.example/v1/dashboard");
  }

  #[tokio::test]
  async fn refused_connection_is_a_transport_failure() {
    let config = Config {
      // Discard port on loopback: connections are refused immediately
      base_url: "http://127.0.0.1:9".to_string(),
      request_timeout_secs: 2,
      ..Config::default()
    };
    let executor = HttpExecutor::new(&config).unwrap();

    let result = executor
      .execute(RemoteRequest {
        endpoint: "dashboard".to_string(),
        method: Method::Get,
        params: BTreeMap::new(),
        body: None,
      })
      .await;

    match result {
      Err(err) => assert!(err.is_transport(), "expected transport error, got {err}"),
      Ok(value) => panic!("unexpected success: {value}"),
    }
  }
}
