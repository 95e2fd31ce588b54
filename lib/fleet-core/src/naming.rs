//! Deterministic names and labels of dependent resources
//!
//! Every dependent record is addressed by (fleet, kind, replica index,
//! generation). Names are derived from that tuple and the same tuple is
//! written as labels, so records can always be found again by listing with a
//! selector instead of remembering anything in memory.

use std::collections::BTreeMap;
use std::fmt;

use crate::store::LabelSelector;

/// Label carrying the owning fleet name
pub const LABEL_FLEET: &str = "compute.fleet.dev/fleet";
/// Label carrying the dependent kind token
pub const LABEL_KIND: &str = "compute.fleet.dev/kind";
/// Label carrying the NIC position within the server template
pub const LABEL_NIC_ORDINAL: &str = "compute.fleet.dev/nic-ordinal";
/// Label carrying the rule position within its NIC template
pub const LABEL_RULE_ORDINAL: &str = "compute.fleet.dev/rule-ordinal";
/// Label carrying the data volume template name
pub const LABEL_DATA_VOLUME_NAME: &str = "compute.fleet.dev/datavolume-name";
/// Label carrying the LAN template name
pub const LABEL_LAN_NAME: &str = "compute.fleet.dev/lan-name";

/// Kinds of dependent resources owned by a fleet
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    BootVolume,
    DataVolume,
    Server,
    Nic,
    FirewallRule,
    Lan,
    VolumeSelector,
}

impl ResourceKind {
    /// Token used in names and label keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BootVolume => "bootvolume",
            Self::DataVolume => "datavolume",
            Self::Server => "server",
            Self::Nic => "nic",
            Self::FirewallRule => "fwrule",
            Self::Lan => "lan",
            Self::VolumeSelector => "volumeselector",
        }
    }

    pub fn index_label(&self) -> String {
        format!("compute.fleet.dev/{}-index", self.as_str())
    }

    pub fn generation_label(&self) -> String {
        format!("compute.fleet.dev/{}-generation", self.as_str())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One version of one replica's dependent-resource bundle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplicaSlot {
    pub index: u32,
    pub generation: u32,
}

impl ReplicaSlot {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Same replica, one generation later
    pub fn next(&self) -> Self {
        Self {
            index: self.index,
            generation: self.generation + 1,
        }
    }
}

impl fmt::Display for ReplicaSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.index, self.generation)
    }
}

/// `{parent}-{kind}-{index}-{generation}`
pub fn resource_name(parent: &str, kind: ResourceKind, slot: ReplicaSlot) -> String {
    format!("{}-{}-{}-{}", parent, kind, slot.index, slot.generation)
}

pub fn nic_name(parent: &str, slot: ReplicaSlot, nic: usize) -> String {
    format!(
        "{}-{}-{}-{}-{}",
        parent,
        ResourceKind::Nic,
        slot.index,
        nic,
        slot.generation
    )
}

pub fn firewall_rule_name(parent: &str, slot: ReplicaSlot, nic: usize, rule: usize) -> String {
    format!(
        "{}-{}-{}-{}-{}-{}",
        parent,
        ResourceKind::FirewallRule,
        slot.index,
        nic,
        rule,
        slot.generation
    )
}

/// Data volumes outlive generations, so only the index and template name count
pub fn data_volume_name(parent: &str, index: u32, volume: &str) -> String {
    format!("{}-{}-{}-{}", parent, ResourceKind::DataVolume, index, volume)
}

pub fn lan_name(parent: &str, lan: &str) -> String {
    format!("{}-{}-{}", parent, ResourceKind::Lan, lan)
}

pub fn volume_selector_name(parent: &str) -> String {
    format!("{}-{}", parent, ResourceKind::VolumeSelector)
}

/// Every record owned by the fleet
pub fn fleet_selector(parent: &str) -> LabelSelector {
    LabelSelector::new().with(LABEL_FLEET, parent)
}

/// Every record of one kind owned by the fleet
pub fn kind_selector(parent: &str, kind: ResourceKind) -> LabelSelector {
    fleet_selector(parent).with(LABEL_KIND, kind.as_str())
}

/// Every generation of one replica's records of a kind
pub fn index_selector(parent: &str, kind: ResourceKind, index: u32) -> LabelSelector {
    kind_selector(parent, kind).with(kind.index_label(), index.to_string())
}

/// The records of a kind for exactly one (index, generation)
pub fn label_selector(parent: &str, kind: ResourceKind, slot: ReplicaSlot) -> LabelSelector {
    index_selector(parent, kind, slot.index)
        .with(kind.generation_label(), slot.generation.to_string())
}

pub fn index_of(labels: &BTreeMap<String, String>, kind: ResourceKind) -> Option<u32> {
    labels.get(&kind.index_label())?.parse().ok()
}

pub fn generation_of(labels: &BTreeMap<String, String>, kind: ResourceKind) -> Option<u32> {
    labels.get(&kind.generation_label())?.parse().ok()
}

pub fn ordinal_of(labels: &BTreeMap<String, String>, key: &str) -> Option<usize> {
    labels.get(key)?.parse().ok()
}
