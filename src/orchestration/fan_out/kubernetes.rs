use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use super::TargetResolver;
use crate::constants::kubernetes::{INJECTION_DISABLED_LABEL_KEY, INJECTION_DISABLED_LABEL_VALUE};
use crate::error::{ChaosError, Result};
use crate::models::{FanOutKind, FanOutSpec, FaultSpec, FaultTarget};
use crate::orchestration::inventory::{TargetInventory, TargetQuery};

/// Fans out over the pods matching the fault's pod labels.
///
/// Pods labelled as injection-disabled are never targeted.
pub struct KubernetesPodResolver {
    inventory: Arc<dyn TargetInventory>,
}

impl KubernetesPodResolver {
    pub fn new(inventory: Arc<dyn TargetInventory>) -> Self {
        Self { inventory }
    }

    fn pod_labels(spec: &FaultSpec) -> Result<&BTreeMap<String, String>> {
        match &spec.target {
            FaultTarget::KubernetesPod(arguments) if !arguments.pod_labels.is_empty() => {
                Ok(&arguments.pod_labels)
            }
            FaultTarget::KubernetesPod(_) => Err(ChaosError::validation(
                "kubernetes fan-out requires at least one pod label",
            )),
            _ => Err(ChaosError::validation(format!(
                "fault {} does not target kubernetes pods",
                spec.fault_name
            ))),
        }
    }
}

#[async_trait]
impl TargetResolver for KubernetesPodResolver {
    type Target = String;

    fn flavor(&self) -> &'static str {
        "kubernetes pod"
    }

    async fn resolve_targets(&self, spec: &FanOutSpec) -> Result<Vec<String>> {
        if !matches!(spec.kind, FanOutKind::KubernetesPods) {
            return Err(ChaosError::validation(format!(
                "kubernetes trigger cannot resolve {} targets",
                spec.kind.name()
            )));
        }
        let labels = Self::pod_labels(&spec.fault)?;
        let selector = labels
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(",");

        let pods = self
            .inventory
            .query(
                &spec.fault,
                &TargetQuery::PodsWithLabels {
                    labels: labels.clone(),
                },
            )
            .await?;

        let disabled: BTreeSet<String> = self
            .inventory
            .query(
                &spec.fault,
                &TargetQuery::PodsWithLabels {
                    labels: BTreeMap::from([(
                        INJECTION_DISABLED_LABEL_KEY.to_string(),
                        INJECTION_DISABLED_LABEL_VALUE.to_string(),
                    )]),
                },
            )
            .await?
            .into_iter()
            .collect();

        let eligible: Vec<String> = pods
            .into_iter()
            .filter(|pod| {
                let skip = disabled.contains(pod);
                if skip {
                    debug!(pod = %pod, "Skipping pod with injection disabled");
                }
                !skip
            })
            .collect();

        if eligible.is_empty() {
            return Err(ChaosError::NoTargetsFound { selector });
        }
        Ok(eligible)
    }

    fn target_key(&self, target: &String) -> String {
        target.clone()
    }

    fn derive_child_spec(&self, mut template: FaultSpec, target: &String) -> FaultSpec {
        if let FaultTarget::KubernetesPod(arguments) = &mut template.target {
            arguments.pod_in_action = Some(target.clone());
        }
        template
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::KubernetesArguments;
    use crate::test_helpers::StaticInventory;

    fn labels() -> BTreeMap<String, String> {
        BTreeMap::from([("app".to_string(), "checkout".to_string())])
    }

    fn pod_fan_out() -> FanOutSpec {
        FanOutSpec::new(
            FanOutKind::KubernetesPods,
            FaultSpec::new(
                "pod-delete",
                "prod-cluster",
                FaultTarget::KubernetesPod(KubernetesArguments {
                    pod_labels: labels(),
                    ..Default::default()
                }),
            ),
        )
    }

    #[tokio::test]
    async fn test_disabled_pods_are_excluded() {
        let inventory = StaticInventory::new()
            .answer(
                TargetQuery::PodsWithLabels { labels: labels() },
                ["checkout-1", "checkout-2", "checkout-3"],
            )
            .answer(
                TargetQuery::PodsWithLabels {
                    labels: BTreeMap::from([(
                        INJECTION_DISABLED_LABEL_KEY.to_string(),
                        INJECTION_DISABLED_LABEL_VALUE.to_string(),
                    )]),
                },
                ["checkout-2", "billing-1"],
            );
        let resolver = KubernetesPodResolver::new(Arc::new(inventory));

        let pods = resolver.resolve_targets(&pod_fan_out()).await.unwrap();
        assert_eq!(pods, vec!["checkout-1", "checkout-3"]);

        let child = resolver.derive_child_spec(pod_fan_out().fault, &pods[0]);
        assert_eq!(child.target_identifier(), "checkout-1");
    }

    #[tokio::test]
    async fn test_no_matching_pods_fails_resolution() {
        let resolver = KubernetesPodResolver::new(Arc::new(StaticInventory::new()));
        let err = resolver.resolve_targets(&pod_fan_out()).await.unwrap_err();
        assert_eq!(
            err,
            ChaosError::NoTargetsFound {
                selector: "app=checkout".into()
            }
        );
    }
}
