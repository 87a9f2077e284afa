use crate::{inventory, ComputeProvider};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// In-memory provider for tests: serves a fixed instance list, journals
/// every start call, and can be told to fail listing or individual starts.
#[derive(Default)]
pub struct MockProvider {
    instances: Mutex<Vec<inventory::Instance>>,
    listings: Mutex<Vec<(String, String)>>,
    started: Mutex<Vec<String>>,
    start_errors: Mutex<BTreeMap<String, String>>,
    listing_error: Mutex<Option<String>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instances(instances: Vec<inventory::Instance>) -> Self {
        let provider = Self::new();
        *provider.instances.lock().unwrap() = instances;
        provider
    }

    pub fn with_listing_error(self, message: &str) -> Self {
        *self.listing_error.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn with_start_error(self, name: &str, message: &str) -> Self {
        self.start_errors
            .lock()
            .unwrap()
            .insert(name.to_string(), message.to_string());
        self
    }

    /// (project_id, zone) pairs passed to list_instances, in call order.
    pub fn listings(&self) -> Vec<(String, String)> {
        self.listings.lock().unwrap().clone()
    }

    /// Names passed to start_instance, in call order.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn instance_status(&self, name: &str) -> Option<String> {
        self.instances
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.name == name)
            .map(|i| i.status.clone())
    }
}

/// Shorthand for building fixture instances.
pub fn instance(name: &str, status: &str, provisioning_model: &str) -> inventory::Instance {
    inventory::Instance {
        name: name.to_string(),
        status: status.to_string(),
        provisioning_model: provisioning_model.to_string(),
        labels: BTreeMap::new(),
    }
}

pub fn labeled_instance(
    name: &str,
    status: &str,
    provisioning_model: &str,
    labels: &[(&str, &str)],
) -> inventory::Instance {
    let mut instance = instance(name, status, provisioning_model);
    instance.labels = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    instance
}

#[async_trait]
impl ComputeProvider for MockProvider {
    async fn list_instances(
        &self,
        project_id: &str,
        zone: &str,
    ) -> Result<Vec<inventory::Instance>> {
        self.listings
            .lock()
            .unwrap()
            .push((project_id.to_string(), zone.to_string()));

        if let Some(message) = self.listing_error.lock().unwrap().clone() {
            return Err(anyhow!(message));
        }
        Ok(self.instances.lock().unwrap().clone())
    }

    async fn start_instance(&self, _project_id: &str, _zone: &str, name: &str) -> Result<()> {
        self.started.lock().unwrap().push(name.to_string());

        if let Some(message) = self.start_errors.lock().unwrap().get(name) {
            return Err(anyhow!(message.clone()));
        }

        let mut instances = self.instances.lock().unwrap();
        let instance = instances
            .iter_mut()
            .find(|i| i.name == name)
            .ok_or_else(|| anyhow!("Instance not found: {}", name))?;
        instance.status = "RUNNING".to_string();
        Ok(())
    }
}
