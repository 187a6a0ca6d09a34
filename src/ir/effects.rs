use super::expr::{ExprId, ExprKind};
use super::structure::Function;
use super::ty::{Features, PassOptions};

/// Effects of a single expression node, excluding its children. Block
/// contents are iterated in execution order, so every child shows its own
/// effects when its turn comes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffectFlags {
    pub reads_memory: bool,
    pub writes_memory: bool,
    pub reads_heap: bool,
    pub writes_heap: bool,
    pub calls: bool,
    pub throws: bool,
    pub trap: bool,
}

/// Computes the shallow effect summary for one node.
pub fn shallow_effects(
    func: &Function,
    expr: ExprId,
    options: &PassOptions,
    features: Features,
) -> EffectFlags {
    let mut e = EffectFlags::default();
    let implicit_trap = !options.ignore_implicit_traps;
    match func.kind(expr) {
        ExprKind::Load(_) => {
            e.reads_memory = true;
            e.trap = implicit_trap;
        }
        ExprKind::Store(_) => {
            e.writes_memory = true;
            e.trap = implicit_trap;
        }
        ExprKind::StructGet(_) => {
            e.reads_heap = true;
            // The reference may be null.
            e.trap = implicit_trap;
        }
        ExprKind::StructSet(_) => {
            e.writes_heap = true;
            e.trap = implicit_trap;
        }
        ExprKind::Binary(b) => {
            e.trap = implicit_trap && b.op.may_trap();
        }
        ExprKind::Call(_) => {
            e.calls = true;
            e.throws = features.exceptions;
        }
        ExprKind::Unreachable => {
            e.trap = true;
        }
        _ => {}
    }
    e
}
