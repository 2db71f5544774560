//! Per-level routing table of one node and the address selection built on
//! the neighbors' advertised tables.

use std::collections::BTreeMap;
use std::fmt;

use pcn_core::{GapFilling, WalletAddress};
use serde::{Deserialize, Serialize};

use super::address::{format_address, level_sibling, SubtreeId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    /// Routing address of the neighbor that forwards into the subtree.
    pub next_hop: u32,
    pub next_hop_wallet: WalletAddress,
    pub cost: u32,
    /// Lowest identifier known in the subtree.
    pub min_id: WalletAddress,
    /// Levels the advertisement has crossed; prevents loops.
    pub route_log: u32,
}

/// The best route a neighbor knows for one level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEntry {
    pub cost: u32,
    pub min_id: WalletAddress,
    pub route_log: u32,
}

/// A neighbor's advertised position and routing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborUpdate {
    pub address: u32,
    pub identifier: WalletAddress,
    pub table: BTreeMap<u32, UpdateEntry>,
    pub last_update: u64,
}

impl NeighborUpdate {
    /// Lowest identifier in the neighbor's subtree up to `level`.
    fn level_id(&self, level: Option<u32>) -> WalletAddress {
        let Some(level) = level else {
            return self.identifier.clone();
        };
        self.table
            .range(..=level)
            .map(|(_, e)| &e.min_id)
            .fold(&self.identifier, |a, b| a.min(b))
            .clone()
    }

    /// Highest level the neighbor has no route for.
    fn insertion_point(&self, addr_size: u32) -> u32 {
        (0..addr_size)
            .rev()
            .find(|level| !self.table.contains_key(level))
            .unwrap_or(0)
    }
}

/// Where a DHT request goes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhtStep {
    /// This node is responsible for the anchor.
    Anchor,
    Forward { anchor: u32, entry: TableEntry },
}

#[derive(Debug)]
pub struct AddressTable {
    addr_size: u32,
    identifier: WalletAddress,
    address: Option<u32>,
    levels: BTreeMap<u32, Vec<TableEntry>>,
    updates: BTreeMap<WalletAddress, NeighborUpdate>,
    last_update: u64,
}

impl AddressTable {
    pub fn new(identifier: WalletAddress, addr_size: u32) -> Self {
        Self {
            addr_size,
            identifier,
            address: None,
            levels: BTreeMap::new(),
            updates: BTreeMap::new(),
            last_update: 0,
        }
    }

    pub fn address(&self) -> Option<u32> {
        self.address
    }

    pub fn addr_size(&self) -> u32 {
        self.addr_size
    }

    pub fn update_count(&self) -> usize {
        self.updates.len()
    }

    pub fn entries(&self, level: u32) -> &[TableEntry] {
        self.levels.get(&level).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn store_update(&mut self, update: NeighborUpdate) {
        self.updates.insert(update.identifier.clone(), update);
    }

    pub fn remove_update(&mut self, neighbor: &WalletAddress) -> Option<NeighborUpdate> {
        self.updates.remove(neighbor)
    }

    /// Drop updates whose sender has been silent for more than `max_age`
    /// cycles.
    pub fn expire_updates(&mut self, cycle: u64, max_age: f64) {
        self.updates
            .retain(|_, u| u.last_update as f64 + max_age >= cycle as f64);
    }

    fn level_populated(&self, level: u32) -> bool {
        self.levels.get(&level).is_some_and(|e| !e.is_empty())
    }

    fn min_id(&self, level: u32) -> SubtreeId {
        self.levels
            .get(&level)
            .and_then(|entries| entries.iter().map(|e| &e.min_id).min())
            .map(|w| SubtreeId::Wallet(w.clone()))
            .unwrap_or(SubtreeId::Unbounded)
    }

    /// Lowest identifier in our own subtree up to `level`.
    fn level_id(&self, level: Option<u32>) -> WalletAddress {
        let Some(level) = level else {
            return self.identifier.clone();
        };
        self.levels
            .range(..=level)
            .flat_map(|(_, entries)| entries.iter().map(|e| &e.min_id))
            .fold(&self.identifier, |a, b| a.min(b))
            .clone()
    }

    /// Recompute all levels from the stored neighbor updates.
    pub fn rebuild(&mut self, cycle: u64) {
        self.levels.clear();
        if self.address.is_some() {
            let updates: Vec<NeighborUpdate> = self.updates.values().cloned().collect();
            for update in &updates {
                self.populate(update);
            }
        }
        self.last_update = cycle;
    }

    fn populate(&mut self, update: &NeighborUpdate) {
        let Some(address) = self.address else {
            return;
        };
        let Some(diff) = level_sibling(address, update.address, self.addr_size) else {
            return;
        };

        let neighbor_id = update.level_id(diff.checked_sub(1));
        let current = self.min_id(diff);
        let candidate = SubtreeId::Wallet(neighbor_id.clone());
        if candidate <= current {
            let present = candidate >= current
                && self
                    .entries(diff)
                    .iter()
                    .any(|e| e.next_hop == update.address);
            if !present {
                self.levels.entry(diff).or_default().push(TableEntry {
                    next_hop: update.address,
                    next_hop_wallet: update.identifier.clone(),
                    cost: 1,
                    min_id: neighbor_id,
                    route_log: 1 << diff,
                });
            }
        }

        for level in (diff + 1..self.addr_size).rev() {
            let Some(entry) = update.table.get(&level) else {
                continue;
            };
            if (entry.route_log >> diff) & 1 == 1 {
                continue;
            }
            let candidate = SubtreeId::Wallet(entry.min_id.clone());
            let current = self.min_id(level);
            if candidate < current {
                self.levels.remove(&level);
            }
            if candidate <= current {
                let route_log = (entry.route_log | (1 << diff)) & !((1u32 << diff) - 1);
                self.levels.entry(level).or_default().push(TableEntry {
                    next_hop: update.address,
                    next_hop_wallet: update.identifier.clone(),
                    cost: entry.cost + 1,
                    min_id: entry.min_id.clone(),
                    route_log,
                });
            }
        }
    }

    /// An address is valid while no neighbor holds the same one with a
    /// lower identifier and no neighbor knows a lower identifier in a
    /// sibling subtree than we know in ours.
    pub fn validate(&self) -> bool {
        let Some(address) = self.address else {
            return false;
        };
        self.updates.values().all(|update| {
            match level_sibling(update.address, address, self.addr_size) {
                None => update.identifier >= self.identifier,
                Some(diff) => update
                    .table
                    .get(&diff)
                    .map_or(true, |e| e.min_id >= self.level_id(diff.checked_sub(1))),
            }
        })
    }

    /// Pick a new address next to a neighbor and rebuild the table. Without
    /// any neighbor update the address is 0; `None` if no candidate holds.
    pub fn select(&mut self, cycle: u64) -> Option<u32> {
        if self.updates.is_empty() {
            self.address = Some(0);
            self.rebuild(cycle);
            return self.address;
        }

        let mut candidates: Vec<(u32, WalletAddress, u32)> = self
            .updates
            .values()
            .map(|u| (u.insertion_point(self.addr_size), u.identifier.clone(), u.address))
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        for (insertion_point, _, neighbor_address) in candidates {
            for bit in (0..=insertion_point).rev() {
                self.address = Some(neighbor_address ^ (1 << bit));
                self.rebuild(cycle);
                if self.validate() {
                    return self.address;
                }
            }
        }
        self.address = None;
        self.rebuild(cycle);
        None
    }

    /// Our advertisement: the best entry per level.
    pub fn neighbor_update(&self) -> Option<NeighborUpdate> {
        let address = self.address?;
        let table = self
            .levels
            .iter()
            .filter_map(|(level, entries)| {
                entries
                    .iter()
                    .min_by(|a, b| a.min_id.cmp(&b.min_id).then(a.cost.cmp(&b.cost)))
                    .map(|e| {
                        (
                            *level,
                            UpdateEntry {
                                cost: e.cost,
                                min_id: e.min_id.clone(),
                                route_log: e.route_log,
                            },
                        )
                    })
            })
            .collect();
        Some(NeighborUpdate {
            address,
            identifier: self.identifier.clone(),
            table,
            last_update: self.last_update,
        })
    }

    /// Greedy descent toward `destination`: from the sibling level upward,
    /// the first level with a usable entry wins; within a level the entry
    /// closest to the destination, then the cheapest.
    pub fn route_next_hop(
        &self,
        destination: u32,
        exclude: &[WalletAddress],
    ) -> Option<TableEntry> {
        let address = self.address?;
        let start = level_sibling(destination, address, self.addr_size).unwrap_or(0);
        self.levels.range(start..).find_map(|(_, entries)| {
            entries
                .iter()
                .filter(|e| !exclude.contains(&e.next_hop_wallet))
                .min_by_key(|e| (level_sibling(destination, e.next_hop, self.addr_size), e.cost))
                .cloned()
        })
    }

    /// Next step of a DHT request for `anchor`. Empty levels are skipped
    /// according to `gap_filling`; `None` without an own address.
    pub fn dht_step(&self, anchor: u32, gap_filling: GapFilling) -> Option<DhtStep> {
        let address = self.address?;
        let mut target = anchor;
        let mut diff = level_sibling(target, address, self.addr_size);
        match gap_filling {
            GapFilling::Dart => {
                while let Some(level) = diff {
                    if self.level_populated(level) {
                        break;
                    }
                    target ^= 1 << level;
                    diff = level_sibling(target, address, self.addr_size);
                }
            }
            GapFilling::ZeroLowerBits => {
                for bit in 0..self.addr_size {
                    match diff {
                        Some(level) if !self.level_populated(level) => {
                            target &= !(1 << bit);
                            diff = level_sibling(target, address, self.addr_size);
                        }
                        _ => break,
                    }
                }
                if diff.is_some_and(|level| !self.level_populated(level)) {
                    diff = None;
                }
            }
        }

        let Some(level) = diff else {
            return Some(DhtStep::Anchor);
        };
        let entry = self
            .entries(level)
            .iter()
            .min_by_key(|e| (level_sibling(target, e.next_hop, self.addr_size), e.cost))?
            .clone();
        Some(DhtStep::Forward {
            anchor: target,
            entry,
        })
    }
}

impl fmt::Display for AddressTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(address) = self.address else {
            return Ok(());
        };
        let size = self.addr_size;
        for level in 0..size {
            let sibling = format_address(Some(address ^ (1 << level)), size);
            let keep = (size - level) as usize;
            let subtree = format!("{}{}", &sibling[..keep], "X".repeat(level as usize));
            let entries = self.entries(level);
            if entries.is_empty() {
                writeln!(f, "   {level} {subtree} -")?;
            }
            for e in entries {
                writeln!(
                    f,
                    "   {level} {subtree} {} {} {:>2} {} {}",
                    format_address(Some(e.next_hop), size),
                    e.next_hop_wallet,
                    e.cost,
                    e.min_id,
                    format_address(Some(e.route_log), size),
                )?;
            }
        }
        Ok(())
    }
}
