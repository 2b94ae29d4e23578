//! DNA map-data loader interface (spec §1 external collaborator).
//!
//! Supplies the `zoneId -> set<visibleZoneId>` table used only to expand
//! interest sets when a client adds interest in a zone (spec §3, §4.3).

use std::collections::HashMap;

use crate::ids::ZoneId;

pub trait DnaLoader: Send + Sync {
    /// Zones visible from `zone_id` per the authored visgroup table.
    /// Does not include `zone_id` itself.
    fn visible_zones(&self, zone_id: ZoneId) -> &[ZoneId];
}

/// A fixed visgroup table for tests and small deployments without a real
/// DNA file loader.
#[derive(Default)]
pub struct StaticDnaLoader {
    visgroups: HashMap<ZoneId, Vec<ZoneId>>,
}

impl StaticDnaLoader {
    pub fn new() -> Self {
        Self {
            visgroups: HashMap::new(),
        }
    }

    pub fn with_visgroup(mut self, zone_id: ZoneId, visible: Vec<ZoneId>) -> Self {
        self.visgroups.insert(zone_id, visible);
        self
    }
}

impl DnaLoader for StaticDnaLoader {
    fn visible_zones(&self, zone_id: ZoneId) -> &[ZoneId] {
        self.visgroups.get(&zone_id).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_zone_has_no_visgroup() {
        let loader = StaticDnaLoader::new();
        assert!(loader.visible_zones(2100).is_empty());
    }

    #[test]
    fn configured_visgroup_is_returned() {
        let loader = StaticDnaLoader::new().with_visgroup(2100, vec![2101, 2102]);
        assert_eq!(loader.visible_zones(2100), &[2101, 2102]);
    }
}
