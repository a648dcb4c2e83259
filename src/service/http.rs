use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::error::StrategyError;
use crate::graph::StrategyGraph;
use crate::service::BacktestService;
use crate::types::{GraphSummary, GraphUpdate, NewGraph, NewRun, Run};

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    /// Bearer credential obtained from the auth collaborator.
    pub token: String,
    pub request_timeout: Duration,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

/// REST/JSON client for the backtest backend.
#[derive(Debug, Clone)]
pub struct HttpBacktestService {
    client: Client,
    config: BackendConfig,
}

impl HttpBacktestService {
    pub fn from_config(config: BackendConfig) -> Result<Self, StrategyError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.config.token)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, StrategyError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StrategyError::Backend(format!("{status}: {body}")));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl BacktestService for HttpBacktestService {
    async fn list_graphs(&self) -> Result<Vec<GraphSummary>, StrategyError> {
        let response = self
            .authed(self.client.get(self.endpoint("/api/graphs")))
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn create_graph(&self, graph: NewGraph) -> Result<StrategyGraph, StrategyError> {
        let response = self
            .authed(self.client.post(self.endpoint("/api/graphs")))
            .json(&graph)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn get_graph(&self, id: &str) -> Result<StrategyGraph, StrategyError> {
        let response = self
            .authed(self.client.get(self.endpoint(&format!("/api/graphs/{id}"))))
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn update_graph(
        &self,
        id: &str,
        update: GraphUpdate,
    ) -> Result<StrategyGraph, StrategyError> {
        let response = self
            .authed(
                self.client
                    .patch(self.endpoint(&format!("/api/graphs/{id}"))),
            )
            .json(&update)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn delete_graph(&self, id: &str) -> Result<(), StrategyError> {
        let response = self
            .authed(
                self.client
                    .delete(self.endpoint(&format!("/api/graphs/{id}"))),
            )
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StrategyError::Backend(format!("{status}: {body}")));
        }
        Ok(())
    }

    async fn create_run(&self, run: NewRun) -> Result<Run, StrategyError> {
        let response = self
            .authed(self.client.post(self.endpoint("/api/runs")))
            .json(&run)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn get_run(&self, id: &str) -> Result<Run, StrategyError> {
        let response = self
            .authed(self.client.get(self.endpoint(&format!("/api/runs/{id}"))))
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn patch_run_notes(&self, id: &str, notes: &str) -> Result<Run, StrategyError> {
        let response = self
            .authed(
                self.client
                    .patch(self.endpoint(&format!("/api/runs/{id}/notes"))),
            )
            .json(&serde_json::json!({ "notes": notes }))
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn list_runs(&self, limit: Option<usize>) -> Result<Vec<Run>, StrategyError> {
        let mut request = self.authed(self.client.get(self.endpoint("/api/runs")));
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit)]);
        }
        let response = request.send().await?;
        Self::decode(response).await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
