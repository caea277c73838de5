//! HTTP client wrapper using reqwest

use crate::error::{RefbibError, Result};
use reqwest::Client;
use std::time::Duration;

const USER_AGENT: &str = "refbib/0.1";

pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RefbibError::Http(e.to_string()))?;
        Ok(Self { client })
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RefbibError::Http(format!("GET {url}: status {status}")));
        }
        Ok(response.text().await?)
    }

    pub async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RefbibError::Http(format!("POST {url}: status {status}")));
        }
        Ok(response.json().await?)
    }
}
