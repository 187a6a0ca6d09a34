use super::expr::{ExprId, ExprKind};
use super::structure::Function;

/// Peels `expr` through wrappers that merely forward a child's value: a
/// value-typed block falls through to its last child, a loop to its body,
/// a tee to the written value. Stops at the first node that produces a
/// value of its own.
pub fn fallthrough(func: &Function, mut expr: ExprId) -> ExprId {
    loop {
        if !func.ty(expr).is_concrete() {
            return expr;
        }
        expr = match func.kind(expr) {
            ExprKind::Block(b) => match b.children.last() {
                Some(&last) => last,
                None => return expr,
            },
            ExprKind::Loop(l) => l.body,
            ExprKind::LocalSet(s) if func.is_tee(expr) => s.value,
            _ => return expr,
        };
    }
}
