use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// List every instance in the given project/zone, in the provider's
    /// listing order. Callers filter by provisioning model themselves.
    async fn list_instances(
        &self,
        project_id: &str,
        zone: &str,
    ) -> Result<Vec<inventory::Instance>>;

    /// Start a stopped/terminated instance and block until the provider
    /// reports the operation as finished. Errors if the operation itself
    /// fails, not just the request submission.
    async fn start_instance(&self, project_id: &str, zone: &str, name: &str) -> Result<()>;
}

pub mod inventory {
    use std::collections::BTreeMap;

    /// Provisioning model value the compute API reports for spot VMs.
    pub const PROVISIONING_MODEL_SPOT: &str = "SPOT";

    #[derive(Clone, Debug)]
    pub struct Instance {
        pub name: String,
        pub status: String,
        pub provisioning_model: String,
        pub labels: BTreeMap<String, String>,
    }

    impl Instance {
        pub fn is_spot(&self) -> bool {
            self.provisioning_model == PROVISIONING_MODEL_SPOT
        }

        pub fn label(&self, key: &str) -> Option<&str> {
            self.labels.get(key).map(String::as_str)
        }
    }
}

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "gcp")]
pub mod gcp;
