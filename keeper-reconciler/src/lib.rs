use anyhow::Result;
use keeper_providers::inventory::Instance;
use keeper_providers::ComputeProvider;
use std::time::Instant;
use tracing::{error, info};

/// Instances carrying this label with value "true" are never touched.
pub const EXCLUDE_LABEL: &str = "exclude_from_keeper";

const STATUS_TERMINATED: &str = "TERMINATED";
const STATUS_STOPPING: &str = "STOPPING";

/// Per-instance result of one reconciliation pass. Skipped instances
/// (excluded label, mid-preemption) produce no outcome at all.
enum Outcome {
    BackOnline { name: String, elapsed_secs: f64 },
    StartFailed { name: String, error: String },
    NoActionNeeded { name: String, status: String },
}

impl Outcome {
    fn message(&self) -> String {
        match self {
            Outcome::BackOnline { name, elapsed_secs } => format!(
                "VM instance [{}] is back online (took {:.2} seconds)",
                name, elapsed_secs
            ),
            Outcome::StartFailed { name, error } => format!(
                "Error bringing VM instance [{}] back online: {}",
                name, error
            ),
            Outcome::NoActionNeeded { name, status } => format!(
                "VM instance [{}] is {}, no action needed",
                name,
                status.to_lowercase()
            ),
        }
    }
}

/// Scan one zone for spot VMs and restart the preempted ones.
///
/// Returns one human-readable message per processed instance, in listing
/// order. A listing failure is reported in-band as a single
/// "Error processing request" message rather than an `Err`; the `Err` arm is
/// reserved for failures outside the scan loop, which the HTTP handler maps
/// to a 500.
pub async fn reconcile(
    provider: &(impl ComputeProvider + ?Sized),
    project_id: &str,
    zone: &str,
) -> Result<Vec<String>> {
    info!(project_id, zone, "initializing spot VM maintenance check");

    let instances = match provider.list_instances(project_id, zone).await {
        Ok(instances) => instances,
        Err(e) => {
            let message = format!("Error processing request: {:#}", e);
            error!("{}", message);
            return Ok(vec![message]);
        }
    };

    let spot_instances: Vec<Instance> =
        instances.into_iter().filter(Instance::is_spot).collect();
    info!(count = spot_instances.len(), "found spot VMs");

    let mut outcomes = Vec::new();
    for instance in &spot_instances {
        if instance.label(EXCLUDE_LABEL) == Some("true") {
            info!(
                "VM instance [{}] excluded from keeper, skipping...",
                instance.name
            );
            continue;
        }

        match instance.status.as_str() {
            STATUS_TERMINATED => {
                info!(
                    "VM instance [{}] was preempted, attempting to bring back online...",
                    instance.name
                );
                let start = Instant::now();
                let outcome = match provider
                    .start_instance(project_id, zone, &instance.name)
                    .await
                {
                    Ok(()) => Outcome::BackOnline {
                        name: instance.name.clone(),
                        elapsed_secs: start.elapsed().as_secs_f64(),
                    },
                    // Per-instance failure: record and keep going with the
                    // rest of the batch.
                    Err(e) => Outcome::StartFailed {
                        name: instance.name.clone(),
                        error: format!("{:#}", e),
                    },
                };
                match &outcome {
                    Outcome::StartFailed { .. } => error!("{}", outcome.message()),
                    _ => info!("{}", outcome.message()),
                }
                outcomes.push(outcome);
            }
            STATUS_STOPPING => {
                // Starting an instance that is still stopping would race the
                // in-progress preemption; the next invocation picks it up.
                info!(
                    "VM instance [{}] is in stopping state, waiting for full preemption before taking action",
                    instance.name
                );
            }
            status => {
                let outcome = Outcome::NoActionNeeded {
                    name: instance.name.clone(),
                    status: status.to_string(),
                };
                info!("{}", outcome.message());
                outcomes.push(outcome);
            }
        }
    }

    Ok(outcomes.iter().map(Outcome::message).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_providers::mock::{instance, labeled_instance, MockProvider};

    #[tokio::test]
    async fn ignores_non_spot_instances() {
        let provider = MockProvider::with_instances(vec![
            instance("db-1", "TERMINATED", "STANDARD"),
            instance("db-2", "RUNNING", "STANDARD"),
        ]);

        let results = reconcile(&provider, "proj", "zone-a").await.unwrap();

        assert!(results.is_empty());
        assert!(provider.started().is_empty());
    }

    #[tokio::test]
    async fn excluded_spot_is_never_touched() {
        let provider = MockProvider::with_instances(vec![labeled_instance(
            "batch-1",
            "TERMINATED",
            "SPOT",
            &[("exclude_from_keeper", "true")],
        )]);

        let results = reconcile(&provider, "proj", "zone-a").await.unwrap();

        assert!(results.is_empty());
        assert!(provider.started().is_empty());
    }

    #[tokio::test]
    async fn exclusion_label_must_be_exactly_true() {
        let provider = MockProvider::with_instances(vec![labeled_instance(
            "batch-1",
            "TERMINATED",
            "SPOT",
            &[("exclude_from_keeper", "false")],
        )]);

        let results = reconcile(&provider, "proj", "zone-a").await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(provider.started(), vec!["batch-1"]);
    }

    #[tokio::test]
    async fn restarts_terminated_spot_exactly_once() {
        let provider =
            MockProvider::with_instances(vec![instance("worker-1", "TERMINATED", "SPOT")]);

        let results = reconcile(&provider, "proj", "zone-a").await.unwrap();

        assert_eq!(provider.started(), vec!["worker-1"]);
        assert_eq!(provider.instance_status("worker-1").as_deref(), Some("RUNNING"));
        assert_eq!(results.len(), 1);
        assert!(results[0].starts_with("VM instance [worker-1] is back online (took "));
        assert!(results[0].ends_with(" seconds)"));
    }

    #[tokio::test]
    async fn start_failure_does_not_abort_the_batch() {
        let provider = MockProvider::with_instances(vec![
            instance("worker-1", "TERMINATED", "SPOT"),
            instance("worker-2", "TERMINATED", "SPOT"),
        ])
        .with_start_error("worker-1", "quota exceeded");

        let results = reconcile(&provider, "proj", "zone-a").await.unwrap();

        assert_eq!(provider.started(), vec!["worker-1", "worker-2"]);
        assert_eq!(
            results[0],
            "Error bringing VM instance [worker-1] back online: quota exceeded"
        );
        assert!(results[1].starts_with("VM instance [worker-2] is back online"));
    }

    #[tokio::test]
    async fn stopping_spot_is_left_alone() {
        let provider =
            MockProvider::with_instances(vec![instance("worker-1", "STOPPING", "SPOT")]);

        let results = reconcile(&provider, "proj", "zone-a").await.unwrap();

        assert!(results.is_empty());
        assert!(provider.started().is_empty());
    }

    #[tokio::test]
    async fn reports_other_statuses_lowercased() {
        let provider = MockProvider::with_instances(vec![
            instance("web-1", "RUNNING", "SPOT"),
            instance("web-2", "PROVISIONING", "SPOT"),
        ]);

        let results = reconcile(&provider, "proj", "zone-a").await.unwrap();

        assert_eq!(
            results,
            vec![
                "VM instance [web-1] is running, no action needed",
                "VM instance [web-2] is provisioning, no action needed",
            ]
        );
        assert!(provider.started().is_empty());
    }

    #[tokio::test]
    async fn listing_failure_short_circuits_in_band() {
        let provider = MockProvider::new().with_listing_error("permission denied");

        let results = reconcile(&provider, "proj", "zone-a").await.unwrap();

        assert_eq!(results, vec!["Error processing request: permission denied"]);
    }

    #[tokio::test]
    async fn mixed_zone_yields_one_message_per_actionable_instance() {
        let provider = MockProvider::with_instances(vec![
            instance("worker-1", "TERMINATED", "SPOT"),
            instance("web-1", "RUNNING", "SPOT"),
            labeled_instance(
                "batch-1",
                "TERMINATED",
                "SPOT",
                &[("exclude_from_keeper", "true")],
            ),
            instance("db-1", "TERMINATED", "STANDARD"),
        ]);

        let results = reconcile(&provider, "proj", "zone-a").await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].starts_with("VM instance [worker-1] is back online"));
        assert_eq!(results[1], "VM instance [web-1] is running, no action needed");
        assert_eq!(provider.started(), vec!["worker-1"]);
    }
}
