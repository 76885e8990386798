//! Network transport for declaration content.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use crate::locator::ResourceLocator;

/// Errors from fetching a resource.
///
/// Cloneable so a single failed fetch can be handed to every caller waiting on
/// it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
	/// The request could not be sent or the body could not be read.
	#[error("network error: {0}")]
	Network(String),
	/// The request did not complete within the configured timeout.
	#[error("request timed out")]
	Timeout,
	/// The server answered with a non-success status.
	#[error("unexpected status {code}")]
	Status {
		/// HTTP status code.
		code: u16,
	},
	/// The task performing the fetch went away before publishing a result.
	#[error("fetch aborted before completion")]
	Aborted,
}

/// Transport capability used by the content cache.
#[async_trait]
pub trait FetchTransport: Send + Sync {
	/// Fetches the text at `locator`.
	async fn fetch_text(&self, locator: &ResourceLocator) -> Result<String, FetchError>;
}

/// HTTP transport backed by [`reqwest`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
	client: Client,
	timeout: Duration,
}

impl HttpTransport {
	/// Creates a transport whose requests time out after `timeout`.
	pub fn new(timeout: Duration) -> Self {
		Self::with_client(Client::new(), timeout)
	}

	/// Creates a transport that reuses an existing client, keeping its
	/// headers and connection pool.
	pub fn with_client(client: Client, timeout: Duration) -> Self {
		Self { client, timeout }
	}
}

#[async_trait]
impl FetchTransport for HttpTransport {
	async fn fetch_text(&self, locator: &ResourceLocator) -> Result<String, FetchError> {
		let response = self
			.client
			.get(locator.as_str())
			.timeout(self.timeout)
			.send()
			.await
			.map_err(classify)?;

		let status = response.status();
		if !status.is_success() {
			return Err(FetchError::Status { code: status.as_u16() });
		}

		response.text().await.map_err(classify)
	}
}

fn classify(error: reqwest::Error) -> FetchError {
	if error.is_timeout() {
		FetchError::Timeout
	} else {
		FetchError::Network(error.to_string())
	}
}
