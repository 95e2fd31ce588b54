//! Structural validation of fleet specs before anything is provisioned

use fleet_api::v1alpha1::{
    NicTemplate, PlacementMode, ServerSetSpec, StatefulServerSetSpec, IPV6_CIDR_AUTO,
};
use ipnetwork::{IpNetwork, Ipv6Network};
use std::collections::HashSet;
use std::net::Ipv4Addr;

use crate::{FleetError, Result};

pub fn validate_server_set(spec: &ServerSetSpec) -> Result<()> {
    if spec.replicas < 1 {
        return invalid("replicas must be at least 1");
    }
    if spec.datacenter_id.is_empty() {
        return invalid("datacenterId must be set");
    }
    if spec.placement.mode == PlacementMode::Fixed
        && spec.placement.zone.as_deref().map_or(true, str::is_empty)
    {
        return invalid("placement mode Fixed requires a zone");
    }

    let template = &spec.template;
    if template.cores == 0 {
        return invalid("template.cores must be at least 1");
    }
    if template.ram == 0 {
        return invalid("template.ram must be set");
    }
    if template.boot_volume.size == 0 {
        return invalid("template.bootVolume.size must be set");
    }
    if template.nics.is_empty() {
        return invalid("template.nics needs at least one network attachment");
    }

    let mut names = HashSet::new();
    for nic in &template.nics {
        if !names.insert(nic.name.as_str()) {
            return invalid(format!("duplicate nic name {}", nic.name));
        }
        validate_nic(nic)?;
    }

    Ok(())
}

fn validate_nic(nic: &NicTemplate) -> Result<()> {
    if nic.lan.is_empty() {
        return invalid(format!("nic {} must reference a lan", nic.name));
    }
    if let Some(ipv4) = &nic.ipv4 {
        if ipv4.parse::<Ipv4Addr>().is_err() {
            return invalid(format!("nic {}: {} is not an IPv4 address", nic.name, ipv4));
        }
    }

    for rule in &nic.firewall_rules {
        for ip in [&rule.source_ip, &rule.target_ip].into_iter().flatten() {
            if ip.parse::<IpNetwork>().is_err() {
                return invalid(format!("firewall rule {}: invalid address {}", rule.name, ip));
            }
        }
        if let (Some(start), Some(end)) = (rule.port_range_start, rule.port_range_end) {
            if start > end {
                return invalid(format!(
                    "firewall rule {}: port range {}-{} is reversed",
                    rule.name, start, end
                ));
            }
        }
    }
    Ok(())
}

pub fn validate_stateful(spec: &StatefulServerSetSpec) -> Result<()> {
    validate_server_set(&spec.fleet)?;

    let mut lans = HashSet::new();
    for lan in &spec.lans {
        if !lans.insert(lan.name.as_str()) {
            return invalid(format!("duplicate lan name {}", lan.name));
        }
        validate_ipv6_cidr(&lan.ipv6_cidr)
            .map_err(|_| FleetError::InvalidSpec(format!("lan {}: invalid ipv6Cidr {}", lan.name, lan.ipv6_cidr)))?;
    }

    let mut volumes = HashSet::new();
    for volume in &spec.volumes {
        if !volumes.insert(volume.name.as_str()) {
            return invalid(format!("duplicate volume name {}", volume.name));
        }
        if volume.size == 0 {
            return invalid(format!("volume {} must have a size", volume.name));
        }
    }
    Ok(())
}

/// Empty, the AUTO sentinel, or an IPv6 network
pub fn validate_ipv6_cidr(cidr: &str) -> Result<()> {
    if cidr.is_empty() || cidr == IPV6_CIDR_AUTO {
        return Ok(());
    }
    cidr.parse::<Ipv6Network>()
        .map(|_| ())
        .map_err(|e| FleetError::InvalidSpec(format!("{}: {}", cidr, e)))
}

fn invalid<T>(message: impl Into<String>) -> Result<T> {
    Err(FleetError::InvalidSpec(message.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_api::v1alpha1::{
        BootVolumeTemplate, FirewallRuleTemplate, LanTemplate, ServerTemplate, ZonePlacement,
    };

    fn spec() -> ServerSetSpec {
        ServerSetSpec {
            replicas: 2,
            datacenter_id: "dc-1".to_string(),
            placement: ZonePlacement::default(),
            template: ServerTemplate {
                cores: 2,
                ram: 2048,
                cpu_family: "INTEL_SKYLAKE".to_string(),
                boot_volume: BootVolumeTemplate {
                    size: 10,
                    volume_type: "SSD".to_string(),
                    image: Some("ubuntu-22.04".to_string()),
                    ..Default::default()
                },
                nics: vec![NicTemplate {
                    name: "public".to_string(),
                    lan: "lan-1".to_string(),
                    dhcp: true,
                    ..Default::default()
                }],
                labels: Default::default(),
            },
            identity: None,
        }
    }

    #[test]
    fn test_valid_spec() {
        assert!(validate_server_set(&spec()).is_ok());
    }

    #[test]
    fn test_zero_replicas() {
        let mut spec = spec();
        spec.replicas = 0;
        assert!(matches!(validate_server_set(&spec), Err(FleetError::InvalidSpec(_))));
    }

    #[test]
    fn test_requires_nic() {
        let mut spec = spec();
        spec.template.nics.clear();
        assert!(validate_server_set(&spec).is_err());
    }

    #[test]
    fn test_fixed_placement_requires_zone() {
        let mut spec = spec();
        spec.placement.mode = PlacementMode::Fixed;
        assert!(validate_server_set(&spec).is_err());
        spec.placement.zone = Some("ZONE_1".to_string());
        assert!(validate_server_set(&spec).is_ok());
    }

    #[test]
    fn test_firewall_rule_checks() {
        let mut spec = spec();
        spec.template.nics[0].firewall_rules.push(FirewallRuleTemplate {
            name: "ssh".to_string(),
            protocol: "TCP".to_string(),
            source_ip: Some("10.0.0.0/8".to_string()),
            port_range_start: Some(22),
            port_range_end: Some(22),
            ..Default::default()
        });
        assert!(validate_server_set(&spec).is_ok());

        spec.template.nics[0].firewall_rules[0].port_range_start = Some(80);
        assert!(validate_server_set(&spec).is_err());
    }

    #[test]
    fn test_ipv6_cidr_values() {
        assert!(validate_ipv6_cidr("").is_ok());
        assert!(validate_ipv6_cidr("AUTO").is_ok());
        assert!(validate_ipv6_cidr("2001:db8::/64").is_ok());
        assert!(validate_ipv6_cidr("10.0.0.0/24").is_err());
        assert!(validate_ipv6_cidr("auto").is_err());
    }

    #[test]
    fn test_stateful_duplicate_lan() {
        let lan = LanTemplate {
            name: "data".to_string(),
            ..Default::default()
        };
        let spec = StatefulServerSetSpec {
            fleet: spec(),
            lans: vec![lan.clone(), lan],
            volumes: vec![],
        };
        assert!(validate_stateful(&spec).is_err());
    }
}
