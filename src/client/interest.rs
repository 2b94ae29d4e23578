//! Per-client interest handles and the interest cache derived from them.
//!
//! A client builds up visibility one `CLIENT_ADD_INTEREST` call at a time;
//! `otp_proto::client_wire` documents that each call carries a single zone
//! rather than the batch form, so a handle's full zone set accumulates
//! across repeated calls that share an `interest_id`. This table tracks
//! that accumulation and derives `interestCache = ⋃ₕ {(parentₕ, z)}`.

use std::collections::{HashMap, HashSet};

use otp_proto::dna::DnaLoader;
use otp_proto::ids::{block_origin, QUIET_ZONE};
use otp_proto::{DoId, ZoneId};

#[derive(Debug, Clone, Default)]
struct InterestEntry {
    parent_id: DoId,
    zones: HashSet<ZoneId>,
}

/// Result of an `add`/`remove` call: zones to generate objects into and
/// zones to disable objects out of, after accounting for overlap with a
/// client's other live handles.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct InterestDelta {
    pub newly_covered: Vec<(DoId, ZoneId)>,
    pub uncovered: Vec<(DoId, ZoneId)>,
}

#[derive(Debug, Default)]
pub struct InterestTable {
    handles: HashMap<u16, InterestEntry>,
    cache: HashSet<(DoId, ZoneId)>,
}

impl InterestTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(&self) -> &HashSet<(DoId, ZoneId)> {
        &self.cache
    }

    pub fn is_visible(&self, parent_id: DoId, zone_id: ZoneId) -> bool {
        self.cache.contains(&(parent_id, zone_id))
    }

    pub fn has_handle(&self, handle: u16) -> bool {
        self.handles.contains_key(&handle)
    }

    /// Expand one requested zone into itself, its block origin, and every
    /// DNA-declared visgroup neighbour. The quiet zone never appears in an
    /// interest cache.
    pub fn expand_zone(dna: &dyn DnaLoader, zone_id: ZoneId) -> Vec<ZoneId> {
        if zone_id == QUIET_ZONE {
            return Vec::new();
        }
        let mut expanded: HashSet<ZoneId> = HashSet::new();
        expanded.insert(zone_id);
        expanded.insert(block_origin(zone_id));
        for &visible in dna.visible_zones(zone_id) {
            if visible != QUIET_ZONE {
                expanded.insert(visible);
            }
        }
        expanded.into_iter().collect()
    }

    /// Apply one `CLIENT_ADD_INTEREST` call. Same handle + same parent is
    /// additive. Same handle + a different parent disables whatever the
    /// old parent's zones aren't still covered by another handle, and the
    /// new parent's zone set starts empty.
    pub fn add(
        &mut self,
        dna: &dyn DnaLoader,
        handle: u16,
        parent_id: DoId,
        zone_id: ZoneId,
    ) -> InterestDelta {
        let expanded = Self::expand_zone(dna, zone_id);
        let previous = self.handles.get(&handle).cloned();

        let mut uncovered = Vec::new();
        let mut entry = match previous {
            Some(prev) if prev.parent_id == parent_id => prev,
            Some(prev) => {
                for z in prev.zones {
                    if !self.covered_by_other(handle, prev.parent_id, z) {
                        uncovered.push((prev.parent_id, z));
                    }
                }
                InterestEntry {
                    parent_id,
                    zones: HashSet::new(),
                }
            }
            None => InterestEntry {
                parent_id,
                zones: HashSet::new(),
            },
        };

        let mut newly_covered = Vec::new();
        for z in expanded {
            if entry.zones.insert(z) {
                newly_covered.push((parent_id, z));
            }
        }

        self.handles.insert(handle, entry);
        self.rebuild_cache();
        InterestDelta {
            newly_covered,
            uncovered,
        }
    }

    /// Drop a handle entirely (`CLIENT_REMOVE_INTEREST`). Returns the
    /// `(parentId, zoneId)` pairs no surviving handle still covers.
    pub fn remove(&mut self, handle: u16) -> Vec<(DoId, ZoneId)> {
        let Some(entry) = self.handles.remove(&handle) else {
            return Vec::new();
        };
        let uncovered = entry
            .zones
            .iter()
            .filter(|&&z| !self.covered_by_other(handle, entry.parent_id, z))
            .map(|&z| (entry.parent_id, z))
            .collect();
        self.rebuild_cache();
        uncovered
    }

    /// Drop every handle (client disconnect). Returns every pair that was
    /// in the cache.
    pub fn clear(&mut self) -> Vec<(DoId, ZoneId)> {
        let all: Vec<_> = self.cache.iter().copied().collect();
        self.handles.clear();
        self.cache.clear();
        all
    }

    fn covered_by_other(&self, excluding: u16, parent_id: DoId, zone_id: ZoneId) -> bool {
        self.handles
            .iter()
            .any(|(h, e)| *h != excluding && e.parent_id == parent_id && e.zones.contains(&zone_id))
    }

    fn rebuild_cache(&mut self) {
        self.cache = self
            .handles
            .values()
            .flat_map(|e| e.zones.iter().map(move |&z| (e.parent_id, z)))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otp_proto::dna::StaticDnaLoader;

    #[test]
    fn quiet_zone_expands_to_nothing() {
        let dna = StaticDnaLoader::default();
        assert!(InterestTable::expand_zone(&dna, QUIET_ZONE).is_empty());
    }

    #[test]
    fn expand_includes_block_origin_and_visgroup_neighbours() {
        let dna = StaticDnaLoader::default().with_visgroup(2100, vec![2101, 2102]);
        let expanded = InterestTable::expand_zone(&dna, 2100);
        assert!(expanded.contains(&2100));
        assert!(expanded.contains(&block_origin(2100)));
        assert!(expanded.contains(&2101));
        assert!(expanded.contains(&2102));
    }

    #[test]
    fn add_same_handle_same_parent_is_additive() {
        let dna = StaticDnaLoader::default();
        let mut table = InterestTable::new();
        table.add(&dna, 1, 2000, 2100);
        let delta = table.add(&dna, 1, 2000, 2200);
        assert!(delta.uncovered.is_empty());
        assert!(table.is_visible(2000, 2100));
        assert!(table.is_visible(2000, 2200));
    }

    #[test]
    fn add_parent_change_uncovers_old_zones_not_shared() {
        let dna = StaticDnaLoader::default();
        let mut table = InterestTable::new();
        table.add(&dna, 1, 2000, 2100);
        let delta = table.add(&dna, 1, 3000, 3100);
        assert!(delta.uncovered.contains(&(2000, 2100)));
        assert!(!table.is_visible(2000, 2100));
        assert!(table.is_visible(3000, 3100));
    }

    #[test]
    fn add_parent_change_keeps_zones_covered_by_another_handle() {
        let dna = StaticDnaLoader::default();
        let mut table = InterestTable::new();
        table.add(&dna, 1, 2000, 2100);
        table.add(&dna, 2, 2000, 2100);
        let delta = table.add(&dna, 1, 3000, 3100);
        assert!(!delta.uncovered.contains(&(2000, 2100)));
        assert!(table.is_visible(2000, 2100));
    }

    #[test]
    fn remove_uncovers_unshared_zones_only() {
        let dna = StaticDnaLoader::default();
        let mut table = InterestTable::new();
        table.add(&dna, 1, 2000, 2100);
        table.add(&dna, 2, 2000, 2100);
        let uncovered = table.remove(1);
        assert!(uncovered.is_empty());
        assert!(table.is_visible(2000, 2100));

        let uncovered = table.remove(2);
        assert_eq!(uncovered.len(), 1);
        assert!(!table.is_visible(2000, 2100));
    }

    #[test]
    fn clear_returns_full_cache_and_empties_it() {
        let dna = StaticDnaLoader::default();
        let mut table = InterestTable::new();
        table.add(&dna, 1, 2000, 2100);
        table.add(&dna, 2, 3000, 3100);
        let mut cleared = table.clear();
        cleared.sort();
        assert_eq!(cleared, vec![(2000, 2100), (3000, 3100)]);
        assert!(table.cache().is_empty());
    }
}
