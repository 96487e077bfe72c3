//! HTTP client an ingestion process uses to talk to the hub

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use tracing::{instrument, trace};

use crate::MachineType;
use crate::identity::{IdentityError, MachineDirectory};
use crate::intake::MetricForwarder;
use crate::payload::MetricPayload;
use crate::thresholds::{BoundKind, ThresholdSnapshot, ThresholdSource};
use crate::violations::{ViolationReport, ViolationSink};

#[derive(Clone)]
pub struct HubClient {
    client: reqwest::Client,
    base_url: Url,
}

impl HubClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url).with_context(|| format!("invalid hub url '{base_url}'"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("hub url '{base_url}' cannot be used as a base");
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!("hub responded with {status}: {body}")
    }
}

#[async_trait]
impl ThresholdSource for HubClient {
    #[instrument(skip(self))]
    async fn fetch(&self, kind: BoundKind) -> Result<ThresholdSnapshot> {
        let mut url = self.endpoint(&["metrics", "threshold-check"]);
        if kind == BoundKind::Under {
            url.query_pairs_mut().append_pair("kind", "under");
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("failed to request thresholds")?;

        Self::check(response)
            .await?
            .json()
            .await
            .context("failed to parse threshold snapshot")
    }
}

#[async_trait]
impl MachineDirectory for HubClient {
    #[instrument(skip(self, display_name))]
    async fn lookup_or_register(
        &self,
        machine_type: MachineType,
        raw_id: &str,
        display_name: Option<&str>,
    ) -> Result<String, IdentityError> {
        let mut url = self.endpoint(&["inventory", raw_id, machine_type.as_str()]);
        if let Some(name) = display_name {
            url.query_pairs_mut().append_pair("name", name);
        }

        let lookup = async {
            let response = self.client.get(url).send().await?;
            let stable_id = Self::check(response).await?.text().await?;
            anyhow::Ok(stable_id.trim().to_string())
        };

        let stable_id = lookup
            .await
            .map_err(|e| IdentityError::Remote(format!("{e:#}")))?;
        if stable_id.is_empty() {
            return Err(IdentityError::Remote("hub returned an empty id".to_string()));
        }

        trace!("hub resolved '{raw_id}' to {stable_id}");
        Ok(stable_id)
    }
}

#[async_trait]
impl ViolationSink for HubClient {
    async fn report(&self, report: &ViolationReport) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint(&["violation-store"]))
            .json(report)
            .send()
            .await
            .context("failed to send violation")?;

        Self::check(response).await?;
        Ok(())
    }
}

#[async_trait]
impl MetricForwarder for HubClient {
    async fn forward(
        &self,
        _payload: &MetricPayload,
        raw: &[u8],
        _received_at: DateTime<Utc>,
    ) -> Result<()> {
        let response = self
            .client
            .post(self.endpoint(&["metrics"]))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(raw.to_vec())
            .send()
            .await
            .context("failed to forward metrics")?;

        Self::check(response).await?;
        Ok(())
    }
}
