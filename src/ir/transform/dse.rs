//! Dead store elimination.
//!
//! Finds stores that are trampled over by other stores before their value
//! can be read, and replaces them with drops of their operands. The engine
//! flows each store forward through the CFG, classifying every relevant
//! expression it meets as a matching load, a full trample, or an opaque
//! interaction; a store whose uses are fully understood and empty is dead.

use log::{debug, trace};
use rustc_hash::FxHashMap;

use crate::ir::cfg::{BlockId, Cfg};
use crate::ir::effects::{shallow_effects, EffectFlags};
use crate::ir::expr::{ExprId, ExprKind};
use crate::ir::local_graph::LocalGraph;
use crate::ir::properties::fallthrough;
use crate::ir::structure::Function;
use crate::ir::ty::{Features, PassOptions, Type};
use crate::support::UniqueNonrepeatingDeferredQueue;

use super::{FunctionPass, PassCx};

/// Whether two expressions definitely evaluate to the same value: both
/// peel through fallthrough wrappers to local reads with equal reaching
/// writes, or to equal constants. Anything else is not provable and
/// compares unequal.
pub fn equivalent(func: &Function, graph: &LocalGraph, a: ExprId, b: ExprId) -> bool {
    let a = fallthrough(func, a);
    let b = fallthrough(func, b);
    match (func.kind(a), func.kind(b)) {
        (ExprKind::LocalGet(_), ExprKind::LocalGet(_)) => graph.equivalent(a, b),
        (ExprKind::Const(ca), ExprKind::Const(cb)) => ca == cb,
        _ => false,
    }
}

/// Shared analysis services the kind hooks consult.
pub struct KindCx<'a> {
    pub func: &'a Function,
    pub graph: &'a LocalGraph,
}

impl<'a> KindCx<'a> {
    pub fn equivalent(&self, a: ExprId, b: ExprId) -> bool {
        equivalent(self.func, self.graph, a, b)
    }
}

/// One store family the elimination engine can analyze.
///
/// Hooks receive effects computed for the node alone; children have
/// already been seen, as blocks are processed in execution order. Hooks
/// need not handle code that leaves the function: a call, throw, trap or
/// return halts the flow by itself.
pub trait StoreKind: Sync {
    /// Whether `expr` is a store of this family.
    fn is_store(&self, func: &Function, expr: ExprId) -> bool;

    /// Whether `expr` must be watched during the flow even though it is
    /// not a store. Stores themselves need not be included.
    fn is_relevant(&self, func: &Function, expr: ExprId, effects: &EffectFlags) -> bool;

    /// Whether `expr` observes at least some of the data `store` wrote.
    fn is_load_from(&self, cx: &KindCx<'_>, expr: ExprId, effects: &EffectFlags, store: ExprId) -> bool;

    /// Whether `expr` overwrites all of the data `store` wrote. Only
    /// consulted after `is_load_from` returned false.
    fn tramples(&self, cx: &KindCx<'_>, expr: ExprId, effects: &EffectFlags, store: ExprId) -> bool;

    /// Whether `expr` may interact with `store` in a way the two previous
    /// hooks cannot see. Only consulted after both returned false.
    fn may_interact(&self, cx: &KindCx<'_>, expr: ExprId, effects: &EffectFlags, store: ExprId) -> bool;

    /// Builds the replacement for a dead store: its operands evaluated
    /// and dropped, in the original order.
    fn replace_store_with_drops(&self, func: &mut Function, store: ExprId) -> ExprId;
}

/// An expression that can transfer control or observation outside the
/// function, making every further use of a store visible.
fn reaches_global_code(func: &Function, expr: ExprId, effects: &EffectFlags) -> bool {
    effects.calls || effects.throws || effects.trap || func.kind(expr).is_return()
}

pub struct DeadStoreFinder<'a, K: StoreKind> {
    func: &'a Function,
    graph: &'a LocalGraph,
    kind: &'a K,
    options: &'a PassOptions,
    features: Features,
    cfg: Cfg,
    /// Per block, the stores and the expressions that may interact with
    /// stores, in execution order.
    relevant: FxHashMap<BlockId, Vec<ExprId>>,
    /// Stores whose uses are fully understood, mapped to the loads that
    /// observe them. A store with an empty list is completely dead.
    pub optimizable_stores: FxHashMap<ExprId, Vec<ExprId>>,
}

impl<'a, K: StoreKind> DeadStoreFinder<'a, K> {
    pub fn new(
        func: &'a Function,
        graph: &'a LocalGraph,
        kind: &'a K,
        options: &'a PassOptions,
        features: Features,
    ) -> Self {
        Self {
            func,
            graph,
            kind,
            options,
            features,
            cfg: Cfg::build(func),
            relevant: FxHashMap::default(),
            optimizable_stores: FxHashMap::default(),
        }
    }

    pub fn analyze(&mut self) {
        // Capture the relevant expressions of every block: stores, the
        // kind's own observation points, and anything that reaches global
        // code.
        for &block in &self.cfg.order {
            let mut list = Vec::new();
            for &expr in &self.cfg.block(block).exprs {
                let effects = shallow_effects(self.func, expr, self.options, self.features);
                if self.kind.is_store(self.func, expr)
                    || self.kind.is_relevant(self.func, expr, &effects)
                    || reaches_global_code(self.func, expr, &effects)
                {
                    list.push(expr);
                }
            }
            if !list.is_empty() {
                self.relevant.insert(block, list);
            }
        }

        // Flow each store forward, scanning each block at most once per
        // store. This is a naive flow, but most stores are halted almost
        // immediately, at the first call or opaque interaction.
        let mut optimizable = FxHashMap::default();
        for &block in &self.cfg.order {
            let Some(exprs) = self.relevant.get(&block) else { continue };
            for (i, &store) in exprs.iter().enumerate() {
                if !self.kind.is_store(self.func, store) {
                    continue;
                }

                let mut loads = Vec::new();
                let mut work = UniqueNonrepeatingDeferredQueue::new();
                let mut halted = self.scan_block(block, i + 1, store, &mut loads, &mut work);
                while !halted {
                    let Some(next) = work.pop() else { break };
                    halted = self.scan_block(next, 0, store, &mut loads, &mut work);
                }

                if halted {
                    trace!("{}: store has unanalyzable uses", self.func.name);
                } else {
                    optimizable.insert(store, loads);
                }
            }
        }
        self.optimizable_stores = optimizable;
    }

    /// Scans one block for interactions with `store`, starting at `from`
    /// in its relevant list. Returns true to halt the whole flow; false
    /// either stops just this path (a trample) or has queued the block's
    /// successors.
    fn scan_block(
        &self,
        block: BlockId,
        from: usize,
        store: ExprId,
        loads: &mut Vec<ExprId>,
        work: &mut UniqueNonrepeatingDeferredQueue<BlockId>,
    ) -> bool {
        let cx = KindCx { func: self.func, graph: self.graph };
        if let Some(exprs) = self.relevant.get(&block) {
            for &curr in &exprs[from..] {
                let effects = shallow_effects(self.func, curr, self.options, self.features);
                if self.kind.is_load_from(&cx, curr, &effects, store) {
                    loads.push(curr);
                } else if self.kind.tramples(&cx, curr, &effects, store) {
                    // Nothing past this point can see the store's value
                    // along this path.
                    return false;
                } else if reaches_global_code(self.func, curr, &effects)
                    || self.kind.may_interact(&cx, curr, &effects, store)
                {
                    return true;
                }
            }
        }

        for &succ in &self.cfg.block(block).succs {
            work.push(succ);
        }
        if block == self.cfg.exit {
            // A value flowing out of the function can be observed by
            // anything.
            return true;
        }
        false
    }
}

/// Analyzes one kind and rewrites the fully dead stores in place. Loads
/// of partially understood stores are left for a future forwarding pass.
pub fn run_kind<K: StoreKind>(
    kind: &K,
    func: &mut Function,
    graph: &LocalGraph,
    options: &PassOptions,
    features: Features,
) {
    let optimizable = {
        let mut finder = DeadStoreFinder::new(func, graph, kind, options, features);
        finder.analyze();
        finder.optimizable_stores
    };

    let mut dead: Vec<ExprId> = optimizable
        .iter()
        .filter(|(_, loads)| loads.is_empty())
        .map(|(&store, _)| store)
        .collect();
    dead.sort_by_key(|id| id.index());

    // Dropping the store's operands is valid even when implicit traps
    // matter: the trampling store still traps at the same place, and the
    // path between the two crossed nothing that affects global state.
    let removed = dead.len();
    for store in dead {
        let replacement = kind.replace_store_with_drops(func, store);
        func.replace_expr(store, replacement);
    }
    if removed > 0 {
        debug!("{}: removed {} dead stores", func.name, removed);
    }
}

/// Scalar global variables. Globals cannot alias, and nothing but a call
/// touches them from elsewhere, so load/trample classification is exact.
pub struct GlobalStoreKind;

impl StoreKind for GlobalStoreKind {
    fn is_store(&self, func: &Function, expr: ExprId) -> bool {
        func.kind(expr).is_global_set()
    }

    fn is_relevant(&self, func: &Function, expr: ExprId, _effects: &EffectFlags) -> bool {
        matches!(func.kind(expr), ExprKind::GlobalGet(_))
    }

    fn is_load_from(&self, cx: &KindCx<'_>, expr: ExprId, _effects: &EffectFlags, store: ExprId) -> bool {
        if let ExprKind::GlobalGet(load) = cx.func.kind(expr) {
            load.name == cx.func.kind(store).as_global_set().name
        } else {
            false
        }
    }

    fn tramples(&self, cx: &KindCx<'_>, expr: ExprId, _effects: &EffectFlags, store: ExprId) -> bool {
        if let ExprKind::GlobalSet(other) = cx.func.kind(expr) {
            other.name == cx.func.kind(store).as_global_set().name
        } else {
            false
        }
    }

    fn may_interact(&self, _cx: &KindCx<'_>, _expr: ExprId, _effects: &EffectFlags, _store: ExprId) -> bool {
        false
    }

    fn replace_store_with_drops(&self, func: &mut Function, store: ExprId) -> ExprId {
        let value = func.kind(store).as_global_set().value;
        func.make_drop(value)
    }
}

/// Linear-memory loads and stores.
pub struct MemoryStoreKind;

impl StoreKind for MemoryStoreKind {
    fn is_store(&self, func: &Function, expr: ExprId) -> bool {
        func.kind(expr).is_store()
    }

    fn is_relevant(&self, _func: &Function, _expr: ExprId, effects: &EffectFlags) -> bool {
        effects.reads_memory || effects.writes_memory
    }

    fn is_load_from(&self, cx: &KindCx<'_>, expr: ExprId, _effects: &EffectFlags, store: ExprId) -> bool {
        // An unreachable-typed load never produces a runtime observation.
        if cx.func.ty(expr) == Type::Unreachable {
            return false;
        }
        let ExprKind::Load(load) = cx.func.kind(expr) else { return false };
        let store = cx.func.kind(store).as_store();
        // Atomic stores trap on unaligned addresses, a behavior the
        // non-atomic load lacks; the reverse direction is fine.
        if store.atomic && !load.atomic {
            return false;
        }
        // Only the obvious case: identical size and offset, and the load
        // is full-width (no partial reads of the stored bytes).
        load.bytes == store.bytes
            && Some(load.bytes as u32) == cx.func.ty(expr).byte_size()
            && load.offset == store.offset
            && cx.equivalent(load.ptr, store.ptr)
    }

    fn tramples(&self, cx: &KindCx<'_>, expr: ExprId, _effects: &EffectFlags, store: ExprId) -> bool {
        let ExprKind::Store(other) = cx.func.kind(expr) else { return false };
        let store = cx.func.kind(store).as_store();
        // As in is_load_from, atomic stores are dangerous.
        if store.atomic && !other.atomic {
            return false;
        }
        other.bytes == store.bytes
            && other.offset == store.offset
            && cx.equivalent(other.ptr, store.ptr)
    }

    fn may_interact(&self, _cx: &KindCx<'_>, _expr: ExprId, effects: &EffectFlags, _store: ExprId) -> bool {
        // Any memory access we did not identify is dangerous.
        effects.reads_memory || effects.writes_memory
    }

    fn replace_store_with_drops(&self, func: &mut Function, store: ExprId) -> ExprId {
        let (ptr, value) = {
            let store = func.kind(store).as_store();
            (store.ptr, store.value)
        };
        let drop_ptr = func.make_drop(ptr);
        let drop_value = func.make_drop(value);
        func.make_sequence(drop_ptr, drop_value)
    }
}

/// Struct field accesses, when the module uses GC types.
pub struct StructStoreKind;

impl StoreKind for StructStoreKind {
    fn is_store(&self, func: &Function, expr: ExprId) -> bool {
        func.kind(expr).is_struct_set()
    }

    fn is_relevant(&self, func: &Function, expr: ExprId, _effects: &EffectFlags) -> bool {
        matches!(func.kind(expr), ExprKind::StructGet(_))
    }

    fn is_load_from(&self, cx: &KindCx<'_>, expr: ExprId, _effects: &EffectFlags, store: ExprId) -> bool {
        let ExprKind::StructGet(load) = cx.func.kind(expr) else { return false };
        let store = cx.func.kind(store).as_struct_set();
        // Identical static reference types only; subtyping is not yet
        // exploited here.
        load.field == store.field
            && cx.func.ty(load.ref_) == cx.func.ty(store.ref_)
            && cx.equivalent(load.ref_, store.ref_)
    }

    fn tramples(&self, cx: &KindCx<'_>, expr: ExprId, _effects: &EffectFlags, store: ExprId) -> bool {
        let ExprKind::StructSet(other) = cx.func.kind(expr) else { return false };
        let store = cx.func.kind(store).as_struct_set();
        other.field == store.field
            && cx.func.ty(other.ref_) == cx.func.ty(store.ref_)
            && cx.equivalent(other.ref_, store.ref_)
    }

    fn may_interact(&self, _cx: &KindCx<'_>, _expr: ExprId, effects: &EffectFlags, _store: ExprId) -> bool {
        effects.reads_heap || effects.writes_heap
    }

    fn replace_store_with_drops(&self, func: &mut Function, store: ExprId) -> ExprId {
        let (ref_, value) = {
            let store = func.kind(store).as_struct_set();
            (store.ref_, store.value)
        };
        let drop_ref = func.make_drop(ref_);
        let drop_value = func.make_drop(value);
        func.make_sequence(drop_ref, drop_value)
    }
}

/// The driver: per function, build the local graph once and run the three
/// kinds in a fixed order, each seeing the previous one's rewrites. The
/// order is fixed for determinism.
pub struct DeadStoreElimination;

impl FunctionPass for DeadStoreElimination {
    fn name(&self) -> &'static str {
        "dead-store-elimination"
    }

    fn run_on_function(&self, cx: &PassCx<'_>, func: &mut Function) {
        // One graph serves all three runs: rewrites only overwrite store
        // slots and re-reference existing operands, so every local op and
        // its reaching writes stay valid.
        let graph = LocalGraph::new(func);
        run_kind(&GlobalStoreKind, func, &graph, cx.options, cx.features);
        run_kind(&MemoryStoreKind, func, &graph, cx.options, cx.features);
        if cx.features.gc {
            run_kind(&StructStoreKind, func, &graph, cx.options, cx.features);
        }
    }
}
