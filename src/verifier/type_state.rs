//! Dataflow state for the inferencing pass: per target type states,
//! subroutine bookkeeping, and interned subroutine call chains

use super::frame::Frame;
use super::types::SubroutineId;
use std::collections::HashMap;

/// Handle to an interned subroutine call chain node
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ChainId(pub u32);

impl ChainId {
    /// The empty chain: execution outside of any subroutine
    pub const TOP: ChainId = ChainId(0);
}

/// Recorded type state at one merge target
///
/// Exactly one of these exists per targeted position; the dataflow loop
/// merges into it and never aliases it.
#[derive(Clone, Debug)]
pub struct TypeState {
    pub position: u32,
    pub frame: Frame,
    /// Subroutine call chain under which this position executes
    pub chain: ChainId,
    pub visited: bool,
}

/// One subroutine, identified by its entry position
#[derive(Clone, Debug)]
pub struct Subroutine {
    pub entry: u32,
    /// Bit per local slot the subroutine reads or writes
    accessed_locals: Vec<u64>,
    /// Positions of the `ret` instructions that leave this subroutine
    pub ret_positions: Vec<u32>,
    /// Positions just after the `jsr` instructions that call it
    pub ret_targets: Vec<u32>,
}

impl Subroutine {
    fn new(entry: u32) -> Subroutine {
        Subroutine {
            entry,
            accessed_locals: vec![],
            ret_positions: vec![],
            ret_targets: vec![],
        }
    }

    pub fn record_access(&mut self, index: u16) {
        let word = index as usize / 64;
        if word >= self.accessed_locals.len() {
            self.accessed_locals.resize(word + 1, 0);
        }
        self.accessed_locals[word] |= 1 << (index % 64);
    }

    pub fn accesses(&self, index: u16) -> bool {
        self.accessed_locals
            .get(index as usize / 64)
            .map_or(false, |word| word & (1 << (index % 64)) != 0)
    }

    /// Record a `ret` leaving this subroutine; true if it was not yet known
    pub fn add_ret_position(&mut self, position: u32) -> bool {
        if self.ret_positions.contains(&position) {
            return false;
        }
        self.ret_positions.push(position);
        true
    }

    /// Record a position following a `jsr` to this subroutine; true if new
    pub fn add_ret_target(&mut self, position: u32) -> bool {
        if self.ret_targets.contains(&position) {
            return false;
        }
        self.ret_targets.push(position);
        true
    }
}

#[derive(Copy, Clone, Debug)]
struct ChainNode {
    subroutine: SubroutineId,
    parent: ChainId,
    depth: u16,
}

/// Pool of subroutines plus the interned call chain nodes built over them
///
/// Chains are interned so that a state's chain is a single comparable
/// handle: pushing the same subroutine onto the same parent always yields
/// the same `ChainId`.
pub struct Subroutines {
    subroutines: Vec<Subroutine>,
    by_entry: HashMap<u32, SubroutineId>,
    chain: Vec<ChainNode>,
    interned: HashMap<(SubroutineId, ChainId), ChainId>,
}

impl Subroutines {
    pub fn new() -> Subroutines {
        let mut pool = Subroutines {
            subroutines: vec![],
            by_entry: HashMap::new(),
            chain: vec![ChainNode {
                subroutine: SubroutineId::MERGED,
                parent: ChainId::TOP,
                depth: 0,
            }],
            interned: HashMap::new(),
        };
        // The merged marker subroutine occupies the first slot
        pool.subroutines.push(Subroutine::new(u32::MAX));
        pool
    }

    /// Subroutine entered at `entry`, if one has been seen there
    pub fn id_at_entry(&self, entry: u32) -> Option<SubroutineId> {
        self.by_entry.get(&entry).copied()
    }

    /// Subroutine entered at `entry`, created on first sight
    pub fn at_entry(&mut self, entry: u32) -> SubroutineId {
        if let Some(id) = self.by_entry.get(&entry) {
            return *id;
        }
        let id = SubroutineId(self.subroutines.len() as u16);
        self.subroutines.push(Subroutine::new(entry));
        self.by_entry.insert(entry, id);
        id
    }

    pub fn get(&self, id: SubroutineId) -> &Subroutine {
        &self.subroutines[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: SubroutineId) -> &mut Subroutine {
        &mut self.subroutines[id.0 as usize]
    }

    pub fn depth(&self, chain: ChainId) -> usize {
        self.chain[chain.0 as usize].depth as usize
    }

    pub fn parent(&self, chain: ChainId) -> ChainId {
        self.chain[chain.0 as usize].parent
    }

    /// Subroutine at the leaf of the chain, `None` for the empty chain
    pub fn innermost(&self, chain: ChainId) -> Option<SubroutineId> {
        if chain == ChainId::TOP {
            None
        } else {
            Some(self.chain[chain.0 as usize].subroutine)
        }
    }

    pub fn push(&mut self, parent: ChainId, subroutine: SubroutineId) -> ChainId {
        if let Some(existing) = self.interned.get(&(subroutine, parent)) {
            return *existing;
        }
        let id = ChainId(self.chain.len() as u32);
        let depth = self.chain[parent.0 as usize].depth + 1;
        self.chain.push(ChainNode {
            subroutine,
            parent,
            depth,
        });
        self.interned.insert((subroutine, parent), id);
        id
    }

    /// Subroutine identities from the outermost call inward
    pub fn ids_outside_in(&self, chain: ChainId) -> Vec<SubroutineId> {
        let mut ids = vec![];
        let mut current = chain;
        while current != ChainId::TOP {
            let node = self.chain[current.0 as usize];
            ids.push(node.subroutine);
            current = node.parent;
        }
        ids.reverse();
        ids
    }

    /// Merge two chains: the deeper one is unwound to the shallower depth,
    /// then divergent identities collapse to the merged marker
    pub fn merge(&mut self, a: ChainId, b: ChainId) -> ChainId {
        if a == b {
            return a;
        }
        let mut a = a;
        let mut b = b;
        while self.depth(a) > self.depth(b) {
            a = self.parent(a);
        }
        while self.depth(b) > self.depth(a) {
            b = self.parent(b);
        }
        if a == b {
            return a;
        }
        let ids_a = self.ids_outside_in(a);
        let ids_b = self.ids_outside_in(b);
        let mut merged = ChainId::TOP;
        for (id_a, id_b) in ids_a.into_iter().zip(ids_b) {
            let id = if id_a == id_b {
                id_a
            } else {
                SubroutineId::MERGED
            };
            merged = self.push(merged, id);
        }
        merged
    }
}

impl Default for Subroutines {
    fn default() -> Subroutines {
        Subroutines::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn chains_are_interned() {
        let mut pool = Subroutines::new();
        let first = pool.at_entry(10);
        let second = pool.at_entry(20);
        assert_eq!(pool.at_entry(10), first);

        let outer = pool.push(ChainId::TOP, first);
        let inner = pool.push(outer, second);
        assert_eq!(pool.push(ChainId::TOP, first), outer);
        assert_eq!(pool.push(outer, second), inner);
        assert_eq!(pool.depth(inner), 2);
        assert_eq!(pool.parent(inner), outer);
        assert_eq!(pool.innermost(inner), Some(second));
    }

    #[test]
    fn merging_chains() {
        let mut pool = Subroutines::new();
        let first = pool.at_entry(10);
        let second = pool.at_entry(20);
        let third = pool.at_entry(30);

        let in_first = pool.push(ChainId::TOP, first);
        let in_second = pool.push(ChainId::TOP, second);
        let nested = pool.push(in_first, third);

        // Equal chains are untouched
        assert_eq!(pool.merge(in_first, in_first), in_first);
        // Deeper chain unwinds to the common prefix
        assert_eq!(pool.merge(nested, in_first), in_first);
        // Divergent identities collapse to the merged marker
        let collapsed = pool.merge(in_first, in_second);
        assert_eq!(pool.innermost(collapsed), Some(SubroutineId::MERGED));
        assert_eq!(pool.depth(collapsed), 1);
    }

    #[test]
    fn accessed_locals() {
        let mut pool = Subroutines::new();
        let id = pool.at_entry(10);
        pool.get_mut(id).record_access(3);
        pool.get_mut(id).record_access(70);
        assert!(pool.get(id).accesses(3));
        assert!(pool.get(id).accesses(70));
        assert!(!pool.get(id).accesses(4));
    }
}
