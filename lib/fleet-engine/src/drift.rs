//! Drift between a fleet template and what a replica was built from
//!
//! Only fields that cannot change without replacing the replica count.
//! Informational labels are ignored. Records that do not exist yet are not
//! drift; ensuring the generation fills them in.

use fleet_api::resources::{FirewallRule, Lan, Nic, Server, Volume};
use fleet_api::v1alpha1::{
    FirewallRuleTemplate, LanTemplate, NicTemplate, ServerTemplate, IPV6_CIDR_AUTO,
};
use fleet_core::naming::{ordinal_of, LABEL_NIC_ORDINAL, LABEL_RULE_ORDINAL};
use kube::ResourceExt;
use std::fmt::Debug;

use crate::builders::{topology_hash, TOPOLOGY_ANNOTATION};
use crate::replica::ReplicaBundle;

fn compare<T: PartialEq + Debug>(diff: &mut Vec<String>, field: &str, observed: &T, desired: &T) {
    if observed != desired {
        diff.push(format!("{}: {:?} -> {:?}", field, observed, desired));
    }
}

/// Every difference between `template` and the records of `bundle`
pub fn replica_diff(template: &ServerTemplate, bundle: &ReplicaBundle) -> Vec<String> {
    let mut diff = Vec::new();

    if let Some(server) = &bundle.server {
        server_diff(&mut diff, template, server);
    }
    if let Some(volume) = &bundle.boot_volume {
        boot_volume_diff(&mut diff, template, volume);
    }
    for nic in &bundle.nics {
        nic_diff(&mut diff, &template.nics, nic);
    }
    for rule in &bundle.firewall_rules {
        rule_diff(&mut diff, &template.nics, rule);
    }
    diff
}

fn server_diff(diff: &mut Vec<String>, template: &ServerTemplate, server: &Server) {
    compare(diff, "server.cores", &server.spec.cores, &template.cores);
    compare(diff, "server.ram", &server.spec.ram, &template.ram);
    compare(diff, "server.cpuFamily", &server.spec.cpu_family, &template.cpu_family);

    if let Some(built_for) = server.annotations().get(TOPOLOGY_ANNOTATION) {
        if *built_for != topology_hash(&template.nics) {
            diff.push("nics: topology changed".to_string());
        }
    }
}

fn boot_volume_diff(diff: &mut Vec<String>, template: &ServerTemplate, volume: &Volume) {
    let desired = &template.boot_volume;
    compare(diff, "bootVolume.size", &volume.spec.size, &desired.size);
    compare(diff, "bootVolume.type", &volume.spec.volume_type, &desired.volume_type);
    compare(diff, "bootVolume.image", &volume.spec.image, &desired.image);
    compare(diff, "bootVolume.imageAlias", &volume.spec.image_alias, &desired.image_alias);
}

fn nic_diff(diff: &mut Vec<String>, templates: &[NicTemplate], nic: &Nic) {
    let Some(ordinal) = ordinal_of(nic.labels(), LABEL_NIC_ORDINAL) else {
        return;
    };
    let Some(desired) = templates.get(ordinal) else {
        diff.push(format!("nics[{}]: removed from template", ordinal));
        return;
    };

    let prefix = format!("nics[{}]", ordinal);
    compare(diff, &format!("{}.lan", prefix), &nic.spec.lan_ref, &desired.lan);
    compare(diff, &format!("{}.ipv4", prefix), &nic.spec.ipv4, &desired.ipv4);
    compare(diff, &format!("{}.dhcp", prefix), &nic.spec.dhcp, &desired.dhcp);
    compare(
        diff,
        &format!("{}.firewallActive", prefix),
        &nic.spec.firewall_active,
        &desired.firewall_active,
    );
    compare(
        diff,
        &format!("{}.firewallType", prefix),
        &nic.spec.firewall_type,
        &desired.firewall_type,
    );
}

fn rule_diff(diff: &mut Vec<String>, templates: &[NicTemplate], rule: &FirewallRule) {
    let labels = rule.labels();
    let (Some(nic), Some(ordinal)) = (
        ordinal_of(labels, LABEL_NIC_ORDINAL),
        ordinal_of(labels, LABEL_RULE_ORDINAL),
    ) else {
        return;
    };
    let desired: Option<&FirewallRuleTemplate> = templates
        .get(nic)
        .filter(|t| t.firewall_active)
        .and_then(|t| t.firewall_rules.get(ordinal));
    let Some(desired) = desired else {
        diff.push(format!("nics[{}].firewallRules[{}]: removed from template", nic, ordinal));
        return;
    };

    let prefix = format!("nics[{}].firewallRules[{}]", nic, ordinal);
    compare(diff, &format!("{}.protocol", prefix), &rule.spec.protocol, &desired.protocol);
    compare(diff, &format!("{}.sourceIp", prefix), &rule.spec.source_ip, &desired.source_ip);
    compare(diff, &format!("{}.targetIp", prefix), &rule.spec.target_ip, &desired.target_ip);
    compare(
        diff,
        &format!("{}.portRangeStart", prefix),
        &rule.spec.port_range_start,
        &desired.port_range_start,
    );
    compare(
        diff,
        &format!("{}.portRangeEnd", prefix),
        &rule.spec.port_range_end,
        &desired.port_range_end,
    );
    compare(diff, &format!("{}.icmpType", prefix), &rule.spec.icmp_type, &desired.icmp_type);
    compare(diff, &format!("{}.icmpCode", prefix), &rule.spec.icmp_code, &desired.icmp_code);
}

/// Whether the IPv6 block observed on a LAN satisfies the requested one.
///
/// `AUTO` accepts whatever block the provider assigned, empty requires no
/// block, anything else must match literally.
pub fn lan_ipv6_up_to_date(requested: &str, observed: Option<&str>) -> bool {
    match requested {
        IPV6_CIDR_AUTO => observed.is_some(),
        "" => observed.is_none(),
        literal => observed == Some(literal),
    }
}

/// Whether an existing LAN record has to be updated to match `template`.
///
/// A literal block is also checked against what the provider reports, so a
/// block changed outside the orchestrator counts as drift.
pub fn lan_needs_update(lan: &Lan, template: &LanTemplate) -> bool {
    if lan.spec.public != template.public {
        return true;
    }
    let literal = !matches!(template.ipv6_cidr.as_str(), IPV6_CIDR_AUTO | "");
    if lan.spec.ipv6_cidr == template.ipv6_cidr && !literal {
        return false;
    }
    let observed = lan.status.as_ref().and_then(|s| s.ipv6_cidr.as_deref());
    !lan_ipv6_up_to_date(&template.ipv6_cidr, observed)
}
