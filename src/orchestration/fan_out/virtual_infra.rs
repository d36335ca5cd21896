use async_trait::async_trait;
use std::sync::Arc;

use super::TargetResolver;
use crate::constants::args;
use crate::error::{ChaosError, Result};
use crate::models::{FanOutKind, FanOutSpec, FaultSpec, FaultTarget, VmArguments, VmFaultKind};
use crate::orchestration::inventory::{TargetInventory, TargetQuery};

/// One VM, VM NIC, VM disk or host found in the virtualization inventory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirtualTarget {
    Vm { vm_id: String },
    Nic { vm_id: String, nic_id: String },
    Disk { vm_id: String, disk_id: String },
    Host { host_name: String },
}

/// Fans out over inventory results: VMs (optionally filtered by name), the
/// NICs or disks of those VMs, or hosts.
pub struct VirtualInfraResolver {
    inventory: Arc<dyn TargetInventory>,
}

impl VirtualInfraResolver {
    pub fn new(inventory: Arc<dyn TargetInventory>) -> Self {
        Self { inventory }
    }

    async fn vm_ids(&self, spec: &FaultSpec, vm: &VmArguments) -> Result<Vec<String>> {
        if let Some(vm_id) = &vm.vm_id {
            return Ok(vec![vm_id.clone()]);
        }
        self.inventory
            .query(
                spec,
                &TargetQuery::VirtualMachines {
                    name: vm.vm_name.clone(),
                    filters: vm.filters.clone(),
                },
            )
            .await
    }

    async fn resolve_vm_targets(&self, spec: &FaultSpec, vm: &VmArguments) -> Result<Vec<VirtualTarget>> {
        let vm_ids = self.vm_ids(spec, vm).await?;
        if vm.kind == VmFaultKind::State {
            return Ok(vm_ids
                .into_iter()
                .map(|vm_id| VirtualTarget::Vm { vm_id })
                .collect());
        }

        let mut targets = Vec::new();
        for vm_id in vm_ids {
            let query = match vm.kind {
                VmFaultKind::Nic => TargetQuery::VmNics { vm_id: vm_id.clone() },
                _ => TargetQuery::VmDisks { vm_id: vm_id.clone() },
            };
            for device in self.inventory.query(spec, &query).await? {
                targets.push(match vm.kind {
                    VmFaultKind::Nic => VirtualTarget::Nic {
                        vm_id: vm_id.clone(),
                        nic_id: device,
                    },
                    _ => VirtualTarget::Disk {
                        vm_id: vm_id.clone(),
                        disk_id: device,
                    },
                });
            }
        }
        Ok(targets)
    }
}

#[async_trait]
impl TargetResolver for VirtualInfraResolver {
    type Target = VirtualTarget;

    fn flavor(&self) -> &'static str {
        "virtual infrastructure"
    }

    async fn resolve_targets(&self, spec: &FanOutSpec) -> Result<Vec<VirtualTarget>> {
        if !matches!(spec.kind, FanOutKind::VirtualInfrastructure) {
            return Err(ChaosError::validation(format!(
                "virtual infrastructure trigger cannot resolve {} targets",
                spec.kind.name()
            )));
        }

        let fault = &spec.fault;
        let (targets, selector) = match &fault.target {
            FaultTarget::VirtualMachine(vm) => {
                let selector = format!(
                    "{:?} of vm {}",
                    vm.kind,
                    vm.vm_id.as_deref().or(vm.vm_name.as_deref()).unwrap_or("*")
                );
                (self.resolve_vm_targets(fault, vm).await?, selector)
            }
            FaultTarget::Host(host) => {
                let hosts = self
                    .inventory
                    .query(
                        fault,
                        &TargetQuery::Hosts {
                            name: host.host_name.clone(),
                            filters: host.filters.clone(),
                        },
                    )
                    .await?;
                let selector = format!("host {}", host.host_name.as_deref().unwrap_or("*"));
                (
                    hosts
                        .into_iter()
                        .map(|host_name| VirtualTarget::Host { host_name })
                        .collect(),
                    selector,
                )
            }
            other => {
                return Err(ChaosError::validation(format!(
                    "fault {} targets {}, not virtual infrastructure",
                    fault.fault_name,
                    other.family()
                )))
            }
        };

        if targets.is_empty() {
            return Err(ChaosError::NoTargetsFound { selector });
        }
        Ok(targets)
    }

    fn target_key(&self, target: &VirtualTarget) -> String {
        match target {
            VirtualTarget::Vm { vm_id } => vm_id.clone(),
            VirtualTarget::Nic { vm_id, nic_id } => format!("{vm_id}/{nic_id}"),
            VirtualTarget::Disk { vm_id, disk_id } => format!("{vm_id}/{disk_id}"),
            VirtualTarget::Host { host_name } => host_name.clone(),
        }
    }

    fn derive_child_spec(&self, mut template: FaultSpec, target: &VirtualTarget) -> FaultSpec {
        match (&mut template.target, target) {
            (FaultTarget::Host(host), VirtualTarget::Host { host_name }) => {
                host.host_name = Some(host_name.clone());
            }
            (FaultTarget::VirtualMachine(vm), target) => {
                let (vm_id, nic_id, disk_id) = match target {
                    VirtualTarget::Vm { vm_id } => (vm_id, None, None),
                    VirtualTarget::Nic { vm_id, nic_id } => (vm_id, Some(nic_id), None),
                    VirtualTarget::Disk { vm_id, disk_id } => (vm_id, None, Some(disk_id)),
                    VirtualTarget::Host { host_name } => (host_name, None, None),
                };
                vm.vm_id = Some(vm_id.clone());
                template.args.insert(args::VM_ID.to_string(), vm_id.clone());
                if let Some(nic_id) = nic_id {
                    vm.nic_id = Some(nic_id.clone());
                    template.args.insert(args::VM_NIC.to_string(), nic_id.clone());
                }
                if let Some(disk_id) = disk_id {
                    vm.disk_id = Some(disk_id.clone());
                    template.args.insert(args::VM_DISK.to_string(), disk_id.clone());
                }
            }
            _ => {}
        }
        template
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HostArguments;
    use crate::test_helpers::StaticInventory;
    use std::collections::BTreeMap;

    fn vm_fault(kind: VmFaultKind, vm_name: Option<&str>) -> FanOutSpec {
        FanOutSpec::new(
            FanOutKind::VirtualInfrastructure,
            FaultSpec::new(
                "vm-fault",
                "vcenter",
                FaultTarget::VirtualMachine(VmArguments {
                    kind,
                    vm_name: vm_name.map(str::to_string),
                    vm_id: None,
                    nic_id: None,
                    disk_id: None,
                    filters: BTreeMap::new(),
                }),
            ),
        )
    }

    fn vm_query(name: Option<&str>) -> TargetQuery {
        TargetQuery::VirtualMachines {
            name: name.map(str::to_string),
            filters: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_vm_name_filter_is_passed_to_inventory() {
        let inventory = Arc::new(StaticInventory::new().answer(vm_query(Some("web")), ["vm-7"]));
        let resolver = VirtualInfraResolver::new(inventory.clone());

        let targets = resolver
            .resolve_targets(&vm_fault(VmFaultKind::State, Some("web")))
            .await
            .unwrap();
        assert_eq!(targets, vec![VirtualTarget::Vm { vm_id: "vm-7".into() }]);
        assert_eq!(inventory.queries(), vec![vm_query(Some("web"))]);
    }

    #[tokio::test]
    async fn test_nics_enumerated_per_vm() {
        let inventory = StaticInventory::new()
            .answer(vm_query(None), ["vm-1", "vm-2"])
            .answer(TargetQuery::VmNics { vm_id: "vm-1".into() }, ["nic-a", "nic-b"])
            .answer(TargetQuery::VmNics { vm_id: "vm-2".into() }, ["nic-c"]);
        let resolver = VirtualInfraResolver::new(Arc::new(inventory));
        let spec = vm_fault(VmFaultKind::Nic, None);

        let targets = resolver.resolve_targets(&spec).await.unwrap();
        let keys: Vec<_> = targets.iter().map(|t| resolver.target_key(t)).collect();
        assert_eq!(keys, vec!["vm-1/nic-a", "vm-1/nic-b", "vm-2/nic-c"]);

        let child = resolver.derive_child_spec(spec.fault.clone(), &targets[2]);
        assert_eq!(child.args[args::VM_ID], "vm-2");
        assert_eq!(child.args[args::VM_NIC], "nic-c");
        assert_eq!(child.target_identifier(), "vm-2");
    }

    #[tokio::test]
    async fn test_hosts_and_empty_inventory() {
        let spec = FanOutSpec::new(
            FanOutKind::VirtualInfrastructure,
            FaultSpec::new("host-fault", "vcenter", FaultTarget::Host(HostArguments::default())),
        );
        let empty = VirtualInfraResolver::new(Arc::new(StaticInventory::new()));
        assert!(matches!(
            empty.resolve_targets(&spec).await,
            Err(ChaosError::NoTargetsFound { .. })
        ));

        let inventory = StaticInventory::new().answer(
            TargetQuery::Hosts {
                name: None,
                filters: BTreeMap::new(),
            },
            ["esx-1"],
        );
        let resolver = VirtualInfraResolver::new(Arc::new(inventory));
        let targets = resolver.resolve_targets(&spec).await.unwrap();
        let child = resolver.derive_child_spec(spec.fault.clone(), &targets[0]);
        assert_eq!(child.target_identifier(), "esx-1");
    }
}
