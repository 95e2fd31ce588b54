use async_trait::async_trait;
use fleet_api::resources::{FirewallRule, FirewallRuleSpec, Managed, Nic};
use fleet_api::v1alpha1::FirewallRuleTemplate;
use fleet_core::naming::{
    firewall_rule_name, label_selector, ordinal_of, LABEL_NIC_ORDINAL, LABEL_RULE_ORDINAL,
};
use fleet_core::{FleetError, LabelSelector, ReplicaSlot, ResourceKind, Result};
use kube::ResourceExt;

use crate::context::FleetContext;
use crate::controller::{RecordBuilder, ResourceController};

#[derive(Clone, Debug)]
pub struct RuleInput {
    pub slot: ReplicaSlot,
    pub nic_ordinal: usize,
    pub rule_ordinal: usize,
    pub server_id: String,
    pub nic_id: String,
    pub template: FirewallRuleTemplate,
}

pub struct FirewallRuleBuilder;

#[async_trait]
impl RecordBuilder for FirewallRuleBuilder {
    type Record = FirewallRule;
    type Input = RuleInput;

    fn kind(&self) -> ResourceKind {
        ResourceKind::FirewallRule
    }

    fn slot(&self, input: &RuleInput) -> ReplicaSlot {
        input.slot
    }

    fn identity(&self, fleet: &FleetContext, input: &RuleInput) -> LabelSelector {
        label_selector(&fleet.name, ResourceKind::FirewallRule, input.slot)
            .with(LABEL_NIC_ORDINAL, input.nic_ordinal.to_string())
            .with(LABEL_RULE_ORDINAL, input.rule_ordinal.to_string())
    }

    async fn build_desired(&self, fleet: &FleetContext, input: &RuleInput) -> Result<FirewallRule> {
        let name = firewall_rule_name(&fleet.name, input.slot, input.nic_ordinal, input.rule_ordinal);
        let rule = &input.template;

        Ok(FirewallRule {
            metadata: fleet.record_meta(&name, &self.identity(fleet, input)),
            spec: FirewallRuleSpec {
                datacenter_id: fleet.spec.datacenter_id.clone(),
                name,
                server_id: input.server_id.clone(),
                nic_id: input.nic_id.clone(),
                protocol: rule.protocol.clone(),
                source_ip: rule.source_ip.clone(),
                target_ip: rule.target_ip.clone(),
                port_range_start: rule.port_range_start,
                port_range_end: rule.port_range_end,
                icmp_type: rule.icmp_type,
                icmp_code: rule.icmp_code,
            },
            status: None,
        })
    }
}

impl ResourceController<FirewallRuleBuilder> {
    /// Ensure the rules of every firewalled attachment of one generation.
    ///
    /// `nics` are the generation's NIC records; a rule is only created once
    /// the NIC it binds to is available.
    pub async fn ensure_all(
        &self,
        fleet: &FleetContext,
        slot: ReplicaSlot,
        server_id: &str,
        nics: &[Nic],
    ) -> Result<Vec<FirewallRule>> {
        let mut rules = Vec::new();

        for (nic_ordinal, attachment) in fleet.spec.template.nics.iter().enumerate() {
            if !attachment.firewall_active || attachment.firewall_rules.is_empty() {
                continue;
            }

            let nic = nics
                .iter()
                .find(|nic| ordinal_of(nic.labels(), LABEL_NIC_ORDINAL) == Some(nic_ordinal))
                .ok_or_else(|| FleetError::not_found("Nic", format!("{}#{}", slot, nic_ordinal)))?;
            let Some(nic_id) = nic.external_id().filter(|_| nic.is_available()) else {
                return Err(FleetError::busy("Nic", nic.name_any(), nic.state()));
            };

            for (rule_ordinal, template) in attachment.firewall_rules.iter().enumerate() {
                let input = RuleInput {
                    slot,
                    nic_ordinal,
                    rule_ordinal,
                    server_id: server_id.to_string(),
                    nic_id: nic_id.to_string(),
                    template: template.clone(),
                };
                rules.push(self.ensure(fleet, &input).await?);
            }
        }
        Ok(rules)
    }
}
