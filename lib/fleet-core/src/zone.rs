//! Availability zone placement

use fleet_api::v1alpha1::{PlacementMode, ZonePlacement};

pub const ZONE_1: &str = "ZONE_1";
pub const ZONE_2: &str = "ZONE_2";

/// Picks the availability zone for a replica index
pub trait ZoneStrategy: Send + Sync {
    fn zone(&self, index: u32) -> String;
}

/// Even indices in the first zone, odd ones in the second
#[derive(Clone, Debug)]
pub struct RoundRobin {
    zones: [String; 2],
}

impl RoundRobin {
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self {
            zones: [first.into(), second.into()],
        }
    }
}

impl Default for RoundRobin {
    fn default() -> Self {
        Self::new(ZONE_1, ZONE_2)
    }
}

impl ZoneStrategy for RoundRobin {
    fn zone(&self, index: u32) -> String {
        self.zones[(index % 2) as usize].clone()
    }
}

/// Same zone for every index
#[derive(Clone, Debug)]
pub struct Fixed(pub String);

impl ZoneStrategy for Fixed {
    fn zone(&self, _index: u32) -> String {
        self.0.clone()
    }
}

/// Strategy for a placement block. Fixed mode requires a zone, which spec
/// validation enforces; without one it falls back to round-robin.
pub fn strategy_for(placement: &ZonePlacement) -> Box<dyn ZoneStrategy> {
    match (placement.mode, placement.zone.as_deref()) {
        (PlacementMode::Fixed, Some(zone)) if !zone.is_empty() => Box::new(Fixed(zone.to_string())),
        _ => Box::new(RoundRobin::default()),
    }
}
