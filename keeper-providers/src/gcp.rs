use crate::{inventory, ComputeProvider};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

const COMPUTE_BASE_URL: &str = "https://compute.googleapis.com/compute/v1";

// Token endpoint of the GCE metadata server, reachable from inside GCP.
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

// Zone operations normally settle within a minute or two; cap the wait so a
// wedged operation cannot hang a request forever.
const OPERATION_POLL_INTERVAL: Duration = Duration::from_secs(2);
const OPERATION_POLL_ATTEMPTS: u32 = 120;

pub struct GcpProvider {
    client: Client,
    access_token: Option<String>,
}

impl GcpProvider {
    pub fn new(access_token: Option<String>) -> Self {
        // Default reqwest client has no overall timeout. If the compute API
        // stalls, a request would hang forever.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap();
        let access_token = access_token
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        Self {
            client,
            access_token,
        }
    }

    /// Resolve a bearer token: explicit override first, metadata server
    /// otherwise. Tokens are short-lived, so we fetch per invocation rather
    /// than caching across requests.
    async fn access_token(&self) -> Result<String> {
        if let Some(token) = &self.access_token {
            return Ok(token.clone());
        }

        let resp = self
            .client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .context("metadata server unreachable")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "metadata token request failed: status={} body={}",
                status.as_u16(),
                text
            ));
        }

        let json: serde_json::Value = resp.json().await?;
        json["access_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("No access_token in metadata response"))
    }

    async fn get_operation(
        &self,
        token: &str,
        project_id: &str,
        zone: &str,
        operation: &str,
    ) -> Result<serde_json::Value> {
        let url = format!(
            "{}/projects/{}/zones/{}/operations/{}",
            COMPUTE_BASE_URL, project_id, zone, operation
        );
        let resp = self.client.get(&url).bearer_auth(token).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "GCE get operation failed: status={} body={}",
                status.as_u16(),
                text
            ));
        }

        Ok(resp.json().await?)
    }

    /// Poll a zone operation until the API reports DONE, then surface any
    /// error block the operation carries.
    async fn wait_for_operation(
        &self,
        token: &str,
        project_id: &str,
        zone: &str,
        operation: &str,
    ) -> Result<()> {
        for _attempt in 0..OPERATION_POLL_ATTEMPTS {
            let op = self
                .get_operation(token, project_id, zone, operation)
                .await?;

            if op["status"].as_str() == Some("DONE") {
                if op.get("error").is_some() {
                    return Err(anyhow!("operation failed: {}", operation_error(&op)));
                }
                return Ok(());
            }

            sleep(OPERATION_POLL_INTERVAL).await;
        }

        Err(anyhow!("timed out waiting for operation {}", operation))
    }
}

fn operation_error(op: &serde_json::Value) -> String {
    // Error block shape: {"error": {"errors": [{"code": ..., "message": ...}]}}
    let messages: Vec<&str> = op["error"]["errors"]
        .as_array()
        .map(|errs| {
            errs.iter()
                .filter_map(|e| e["message"].as_str())
                .collect()
        })
        .unwrap_or_default();

    if messages.is_empty() {
        op["error"].to_string()
    } else {
        messages.join("; ")
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstanceListPage {
    #[serde(default)]
    items: Vec<WireInstance>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInstance {
    name: String,
    status: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    scheduling: WireScheduling,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WireScheduling {
    #[serde(default)]
    provisioning_model: String,
}

impl From<WireInstance> for inventory::Instance {
    fn from(wire: WireInstance) -> Self {
        inventory::Instance {
            name: wire.name,
            status: wire.status,
            provisioning_model: wire.scheduling.provisioning_model,
            labels: wire.labels,
        }
    }
}

#[async_trait]
impl ComputeProvider for GcpProvider {
    async fn list_instances(
        &self,
        project_id: &str,
        zone: &str,
    ) -> Result<Vec<inventory::Instance>> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/projects/{}/zones/{}/instances",
            COMPUTE_BASE_URL, project_id, zone
        );

        let mut instances = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut req = self.client.get(&url).bearer_auth(&token);
            if let Some(tok) = &page_token {
                req = req.query(&[("pageToken", tok)]);
            }

            let resp = req.send().await?;
            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(anyhow!(
                    "GCE list instances failed: status={} body={}",
                    status.as_u16(),
                    text
                ));
            }

            let page: InstanceListPage = resp.json().await?;
            instances.extend(page.items.into_iter().map(inventory::Instance::from));

            match page.next_page_token {
                Some(tok) if !tok.is_empty() => page_token = Some(tok),
                _ => break,
            }
        }

        debug!(project_id, zone, count = instances.len(), "listed instances");
        Ok(instances)
    }

    async fn start_instance(&self, project_id: &str, zone: &str, name: &str) -> Result<()> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/projects/{}/zones/{}/instances/{}/start",
            COMPUTE_BASE_URL, project_id, zone, name
        );

        let resp = self.client.post(&url).bearer_auth(&token).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "GCE start instance failed: status={} body={}",
                status.as_u16(),
                text
            ));
        }

        let json: serde_json::Value = resp.json().await?;
        let operation = json["name"]
            .as_str()
            .ok_or_else(|| anyhow!("No operation name in start response"))?;

        debug!(instance = name, operation, "start submitted, waiting for operation");
        self.wait_for_operation(&token, project_id, zone, operation)
            .await
    }
}
