//! Connections between local reads and local writes.
//!
//! For every `local.get` this computes the exact set of `local.set`s whose
//! values may reach it, treating the function's entry value as a
//! distinguished extra write. The graph underpins value-equivalence
//! reasoning in the store-elimination passes and drives local type
//! refinement.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::support::{SmallSet, UniqueDeferredQueue};

use super::cfg::{BlockId, Cfg};
use super::expr::{ExprId, ExprKind, Index};
use super::structure::Function;

/// A write that may reach a read: a concrete `local.set`, or the value the
/// local holds on function entry (the argument for a param, the default
/// for a var). A distinguished variant rather than an `Option` keeps the
/// equivalence rule free of absence checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetRef {
    Entry,
    Set(ExprId),
}

/// The writes reaching one read. One element is the common case, two the
/// usual phi, so inline capacity 2.
pub type Sets = SmallSet<SetRef, 2>;

/// For a write, the reads that may observe it.
pub type SetInfluences = SmallSet<ExprId, 3>;

/// For a read, the writes whose stored value uses it.
pub type GetInfluences = SmallSet<ExprId, 4>;

/// What a tracked expression is. The arena id doubles as the in-place
/// substitution handle, so this only needs to carry the classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalOp {
    Get { index: Index },
    Set { index: Index },
}

impl LocalOp {
    pub fn index(&self) -> Index {
        match self {
            LocalOp::Get { index } | LocalOp::Set { index } => *index,
        }
    }
}

pub struct LocalGraph {
    /// The writes reaching each read. Reads in unreachable code have no
    /// entry.
    pub get_setses: FxHashMap<ExprId, Sets>,
    /// Every `local.get` and `local.set` in the function, including ones
    /// in unreachable code.
    pub locations: FxHashMap<ExprId, LocalOp>,
    /// write -> reads that may observe it; see `compute_set_influences`.
    pub set_influences: FxHashMap<ExprId, SetInfluences>,
    /// read -> writes whose stored value uses it; see
    /// `compute_get_influences`.
    pub get_influences: FxHashMap<ExprId, GetInfluences>,
    ssa_indexes: FxHashSet<Index>,
}

impl LocalGraph {
    pub fn new(func: &Function) -> LocalGraph {
        let mut graph = LocalGraph {
            get_setses: FxHashMap::default(),
            locations: FxHashMap::default(),
            set_influences: FxHashMap::default(),
            get_influences: FxHashMap::default(),
            ssa_indexes: FxHashSet::default(),
        };

        func.walk_post(func.body(), &mut |e| match func.kind(e) {
            ExprKind::LocalGet(g) => {
                graph.locations.insert(e, LocalOp::Get { index: g.index });
            }
            ExprKind::LocalSet(s) => {
                graph.locations.insert(e, LocalOp::Set { index: s.index });
            }
            _ => {}
        });

        graph.flow(func);
        graph
    }

    /// Forward dataflow to a fixed point. The state at a program point
    /// maps each local index to the writes that may reach it; a write
    /// replaces the set for its index, a join unions pointwise. Sets only
    /// grow and are bounded by the write population, so the worklist
    /// terminates; blocks are revisited in creation order for
    /// reproducibility.
    fn flow(&mut self, func: &Function) {
        let cfg = Cfg::build(func);
        let num_locals = func.num_locals() as usize;

        let mut entry_state = vec![Sets::new(); num_locals];
        for set in &mut entry_state {
            set.insert(SetRef::Entry);
        }
        let mut in_states: FxHashMap<BlockId, Vec<Sets>> = FxHashMap::default();
        in_states.insert(cfg.entry, entry_state);

        let mut work = UniqueDeferredQueue::new();
        work.push(cfg.entry);
        while let Some(block) = work.pop() {
            let mut state = in_states[&block].clone();
            Self::transfer(func, &cfg, block, &mut state, None);
            for &succ in &cfg.block(block).succs {
                let changed = match in_states.get_mut(&succ) {
                    Some(existing) => {
                        let mut changed = false;
                        for (dst, src) in existing.iter_mut().zip(&state) {
                            changed |= dst.union_with(src);
                        }
                        changed
                    }
                    None => {
                        in_states.insert(succ, state.clone());
                        true
                    }
                };
                if changed {
                    work.push(succ);
                }
            }
        }

        // Replay each block once over its final entry state, recording the
        // reaching writes at every read.
        for &block in &cfg.order {
            let Some(in_state) = in_states.get(&block) else { continue };
            let mut state = in_state.clone();
            Self::transfer(func, &cfg, block, &mut state, Some(&mut self.get_setses));
        }
    }

    fn transfer(
        func: &Function,
        cfg: &Cfg,
        block: BlockId,
        state: &mut [Sets],
        mut record: Option<&mut FxHashMap<ExprId, Sets>>,
    ) {
        for &expr in &cfg.block(block).exprs {
            match func.kind(expr) {
                ExprKind::LocalGet(g) => {
                    if let Some(record) = record.as_deref_mut() {
                        record.insert(expr, state[g.index as usize].clone());
                    }
                }
                ExprKind::LocalSet(s) => {
                    let set = &mut state[s.index as usize];
                    set.clear();
                    set.insert(SetRef::Set(expr));
                }
                _ => {}
            }
        }
    }

    /// Whether two reads definitely observe the same value: their
    /// reaching-write sets are structurally equal, and when the entry
    /// value is among them the reads must be of the same local.
    pub fn equivalent(&self, a: ExprId, b: ExprId) -> bool {
        let (Some(LocalOp::Get { index: ai }), Some(LocalOp::Get { index: bi })) =
            (self.locations.get(&a), self.locations.get(&b))
        else {
            return false;
        };
        let (Some(a_sets), Some(b_sets)) = (self.get_setses.get(&a), self.get_setses.get(&b))
        else {
            return false;
        };
        if a_sets.is_empty() || a_sets != b_sets {
            return false;
        }
        if a_sets.contains(&SetRef::Entry) && ai != bi {
            return false;
        }
        true
    }

    /// Populates `set_influences`, the inverse of `get_setses` (the entry
    /// sentinel has no inverse entry).
    pub fn compute_set_influences(&mut self) {
        for (&get, sets) in &self.get_setses {
            for set_ref in sets {
                if let SetRef::Set(set) = *set_ref {
                    self.set_influences.entry(set).or_default().insert(get);
                }
            }
        }
    }

    /// Populates `get_influences`: for each write, the reads inside its
    /// stored value's subtree are influenced by it.
    pub fn compute_get_influences(&mut self, func: &Function) {
        let sets: Vec<ExprId> = self
            .locations
            .iter()
            .filter(|(_, op)| matches!(op, LocalOp::Set { .. }))
            .map(|(&expr, _)| expr)
            .collect();
        for set in sets {
            let value = func.kind(set).as_local_set().value;
            let influences = &mut self.get_influences;
            func.walk_post(value, &mut |e| {
                if func.kind(e).is_local_get() {
                    influences.entry(e).or_default().insert(set);
                }
            });
        }
    }

    pub fn compute_influences(&mut self, func: &Function) {
        self.compute_set_influences();
        self.compute_get_influences(func);
    }

    /// Classifies the local indexes that are SSA-like: all reads of the
    /// index observe one common write, and no other write of the index
    /// exists besides that one (the entry value counting as a write).
    pub fn compute_ssa_indexes(&mut self) {
        let mut reached: FxHashMap<Index, SmallSet<SetRef, 2>> = FxHashMap::default();
        for (&get, sets) in &self.get_setses {
            let index = self.locations[&get].index();
            let merged = reached.entry(index).or_default();
            for &set_ref in sets {
                merged.insert(set_ref);
            }
        }

        let mut num_sets: FxHashMap<Index, usize> = FxHashMap::default();
        for op in self.locations.values() {
            if let LocalOp::Set { index } = op {
                *num_sets.entry(*index).or_default() += 1;
            }
        }

        for (index, merged) in reached {
            if merged.len() != 1 {
                continue;
            }
            let writes = num_sets.get(&index).copied().unwrap_or(0);
            let ssa = match merged.iter().next().unwrap() {
                SetRef::Entry => writes == 0,
                SetRef::Set(_) => writes == 1,
            };
            if ssa {
                self.ssa_indexes.insert(index);
            }
        }
    }

    /// Valid after `compute_ssa_indexes`.
    pub fn is_ssa(&self, index: Index) -> bool {
        self.ssa_indexes.contains(&index)
    }
}
