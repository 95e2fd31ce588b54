//! Record builders for every dependent kind

mod firewall_rule;
mod lan;
mod nic;
mod server;
mod volume;
mod volume_selector;

pub use firewall_rule::{FirewallRuleBuilder, RuleInput};
pub use lan::LanBuilder;
pub use nic::{NicBuilder, NicInput};
pub use server::{topology_hash, ServerBuilder, ServerInput, TOPOLOGY_ANNOTATION};
pub use volume::{check_volume_mutable, BootVolumeBuilder, DataVolumeBuilder, DataVolumeInput};
pub use volume_selector::VolumeSelectorBuilder;
