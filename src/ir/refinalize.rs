use super::expr::{ExprId, ExprKind};
use super::structure::Function;
use super::ty::{StructTable, Type};

/// Recomputes the result types of control structures bottom-up, after
/// something underneath them changed type. Blocks take their last child's
/// type, loops their body's, ifs the least upper bound of their arms; tees
/// keep their local's declared type.
pub fn refinalize(func: &mut Function, structs: &StructTable) {
    let body = func.body();
    refin(func, structs, body);
}

fn refin(func: &mut Function, structs: &StructTable, expr: ExprId) {
    let mut children = Vec::new();
    func.kind(expr).for_each_child(|c| children.push(c));
    for child in children {
        refin(func, structs, child);
    }

    let new_ty = match func.kind(expr) {
        ExprKind::Block(b) => Some(func.block_result_ty(&b.children)),
        ExprKind::Loop(l) => Some(func.ty(l.body)),
        ExprKind::If(i) => Some(match i.if_false {
            None => Type::None,
            Some(alt) => structs
                .lub(func.ty(i.if_true), func.ty(alt))
                .unwrap_or(Type::None),
        }),
        ExprKind::LocalSet(s) if func.is_tee(expr) => Some(func.local_type(s.index)),
        _ => None,
    };
    if let Some(ty) = new_ty {
        func.exprs[expr].ty = ty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ty::{Field, StructDef};

    #[test]
    fn block_and_if_types_follow_children() {
        let mut structs = StructTable::default();
        let base = structs.add(StructDef {
            fields: vec![Field { ty: Type::I32, mutable: true }],
            supertype: None,
        });
        let sub = structs.add(StructDef {
            fields: vec![Field { ty: Type::I32, mutable: true }],
            supertype: Some(base),
        });

        let mut f = Function::new("f", vec![Type::I32], vec![]);
        let cond = f.local_get(0);
        let a = f.struct_new(base, vec![]);
        let b = f.struct_new(sub, vec![]);
        let if_ = f.if_(cond, a, Some(b));
        let body = f.block(None, vec![if_]);
        f.set_body(body);

        // Pretend the arms started out wider and let refinalize fix it up.
        f.exprs[if_].ty = Type::ref_null(base);
        f.exprs[body].ty = Type::ref_null(base);
        refinalize(&mut f, &structs);
        assert_eq!(f.ty(if_), Type::ref_non_null(base));
        assert_eq!(f.ty(body), Type::ref_non_null(base));
    }

    #[test]
    fn tee_takes_declared_local_type() {
        let structs = StructTable::default();
        let mut f = Function::new("f", vec![], vec![Type::I64]);
        let c = f.const_(crate::ir::Literal::I64(1));
        let tee = f.local_tee(0, c);
        let d = f.make_drop(tee);
        let body = f.block(None, vec![d]);
        f.set_body(body);

        f.exprs[tee].ty = Type::I32;
        refinalize(&mut f, &structs);
        assert_eq!(f.ty(tee), Type::I64);
    }
}
