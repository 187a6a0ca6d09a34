//! Refines the declared types of vars.
//!
//! If every value assigned to a var has a more specific type than the
//! var's declaration, the declaration can be narrowed, which unlocks
//! later optimization of the var's uses. Only meaningful with GC types;
//! numeric locals can never change type.

use log::debug;
use rustc_hash::FxHashSet;

use crate::ir::expr::{ExprId, Index};
use crate::ir::local_graph::{LocalGraph, LocalOp, SetRef};
use crate::ir::refinalize::refinalize;
use crate::ir::structure::Function;
use crate::ir::ty::Type;

use super::{FunctionPass, PassCx};

pub struct LocalRefine;

impl FunctionPass for LocalRefine {
    fn name(&self) -> &'static str {
        "local-refine"
    }

    fn run_on_function(&self, cx: &PassCx<'_>, func: &mut Function) {
        if !cx.features.gc {
            return;
        }

        let num_locals = func.num_locals();
        let graph = LocalGraph::new(func);

        let mut sets_for_local: Vec<Vec<ExprId>> = vec![Vec::new(); num_locals as usize];
        let mut gets_for_local: Vec<Vec<ExprId>> = vec![Vec::new(); num_locals as usize];
        for (&expr, op) in &graph.locations {
            match op {
                LocalOp::Set { index } => sets_for_local[*index as usize].push(expr),
                LocalOp::Get { index } => gets_for_local[*index as usize].push(expr),
            }
        }

        // Vars whose default value may be read. Narrowing such a var to a
        // non-nullable type would make the default access illegal. Without
        // non-nullable locals the question never arises: the default stays
        // a null and all nulls compare alike.
        let mut uses_default: FxHashSet<Index> = FxHashSet::default();
        if cx.features.gc_nn_locals {
            for (&get, sets) in &graph.get_setses {
                let index = graph.locations[&get].index();
                if func.is_var(index) && sets.contains(&SetRef::Entry) {
                    uses_default.insert(index);
                }
            }
        }

        // Keep iterating while something changes: narrowing one var can
        // expose a narrower type for another through chains of copies.
        let var_base = func.var_index_base();
        let mut refined = 0;
        loop {
            let mut more = false;

            // Recompute control-structure types first; the previous round
            // may have narrowed something underneath them.
            refinalize(func, cx.structs);

            for i in var_base..num_locals {
                let sets = &sets_for_local[i as usize];

                let mut new_ty: Option<Type> = None;
                for &set in sets {
                    let value = func.kind(set).as_local_set().value;
                    let value_ty = func.ty(value);
                    new_ty = match new_ty {
                        None => Some(value_ty),
                        Some(t) => cx.structs.lub(t, value_ty),
                    };
                    if new_ty.is_none() {
                        break;
                    }
                }
                // Nothing is assigned to this var, or the assignments do
                // not combine; other passes deal with it.
                let Some(mut new_ty) = new_ty else { continue };
                if !new_ty.is_concrete() {
                    continue;
                }

                if let Type::Ref(r) = new_ty {
                    if !r.nullable && (!cx.features.gc_nn_locals || uses_default.contains(&i)) {
                        new_ty = Type::ref_null(r.heap);
                    }
                } else if !new_ty.is_defaultable() {
                    continue;
                }

                let old_ty = func.local_type(i);
                if new_ty == old_ty {
                    continue;
                }
                debug_assert!(cx.structs.is_sub_type(new_ty, old_ty));

                func.vars[(i - var_base) as usize] = new_ty;
                more = true;
                refined += 1;

                for &get in &gets_for_local[i as usize] {
                    func.exprs[get].ty = new_ty;
                }
                for &set in sets {
                    if func.is_tee(set) {
                        func.exprs[set].ty = new_ty;
                    }
                }
            }

            if !more {
                break;
            }
        }
        if refined > 0 {
            debug!("{}: refined {} var types", func.name, refined);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::structure::Module;
    use crate::ir::transform::run_function_pass;
    use crate::ir::ty::{Features, Field, PassOptions, StructDef};

    fn gc_module(nn_locals: bool) -> Module {
        let mut module = Module::new();
        module.features = Features { gc: true, gc_nn_locals: nn_locals, ..Features::default() };
        let base = module.structs.add(StructDef {
            fields: vec![Field { ty: Type::I32, mutable: true }],
            supertype: None,
        });
        let sub = module.structs.add(StructDef {
            fields: vec![Field { ty: Type::I32, mutable: true }],
            supertype: Some(base),
        });
        assert_eq!((base, sub), (0, 1));
        module
    }

    #[test]
    fn narrows_a_var_to_the_assigned_subtype() {
        let mut module = gc_module(false);
        let mut f = Function::new("f", vec![], vec![Type::ref_null(0)]);
        let new = f.struct_new(1, vec![]);
        let set = f.local_set(0, new);
        let get = f.local_get(0);
        let d = f.make_drop(get);
        let body = f.block(None, vec![set, d]);
        f.set_body(body);
        module.add_func(f);

        let options = PassOptions::default();
        run_function_pass(&mut module, &LocalRefine, &options);

        let f = &module.funcs["f"];
        // Non-nullable locals are off, so the null is kept.
        assert_eq!(f.vars[0], Type::ref_null(1));
        assert_eq!(f.ty(get), Type::ref_null(1));
    }

    #[test]
    fn allows_non_nullable_when_default_is_never_read() {
        let mut module = gc_module(true);
        let mut f = Function::new("f", vec![], vec![Type::ref_null(0)]);
        let new = f.struct_new(1, vec![]);
        let set = f.local_set(0, new);
        let get = f.local_get(0);
        let d = f.make_drop(get);
        let body = f.block(None, vec![set, d]);
        f.set_body(body);
        module.add_func(f);

        run_function_pass(&mut module, &LocalRefine, &PassOptions::default());
        assert_eq!(module.funcs["f"].vars[0], Type::ref_non_null(1));
    }

    #[test]
    fn keeps_nullability_when_default_may_be_read() {
        let mut module = gc_module(true);
        let mut f = Function::new("f", vec![Type::I32], vec![Type::ref_null(0)]);
        // if (p) x = new Sub; use x  -- the else path reads the default.
        let cond = f.local_get(0);
        let new = f.struct_new(1, vec![]);
        let set = f.local_set(1, new);
        let if_ = f.if_(cond, set, None);
        let get = f.local_get(1);
        let d = f.make_drop(get);
        let body = f.block(None, vec![if_, d]);
        f.set_body(body);
        module.add_func(f);

        run_function_pass(&mut module, &LocalRefine, &PassOptions::default());
        assert_eq!(module.funcs["f"].vars[0], Type::ref_null(1));
    }

    #[test]
    fn refines_through_a_chain_of_copies() {
        let mut module = gc_module(true);
        let mut f = Function::new("f", vec![], vec![Type::ref_null(0), Type::ref_null(0)]);
        // x = new Sub; y = x; use y
        let new = f.struct_new(1, vec![]);
        let set_x = f.local_set(0, new);
        let x = f.local_get(0);
        let set_y = f.local_set(1, x);
        let y = f.local_get(1);
        let d = f.make_drop(y);
        let body = f.block(None, vec![set_x, set_y, d]);
        f.set_body(body);
        module.add_func(f);

        run_function_pass(&mut module, &LocalRefine, &PassOptions::default());
        let f = &module.funcs["f"];
        assert_eq!(f.vars[0], Type::ref_non_null(1));
        // x's narrowed read feeds y.
        assert_eq!(f.vars[1], Type::ref_non_null(1));
    }

    #[test]
    fn numeric_vars_are_untouched() {
        let mut module = gc_module(false);
        let mut f = Function::new("f", vec![], vec![Type::I32]);
        let c = f.const_i32(1);
        let set = f.local_set(0, c);
        let body = f.block(None, vec![set]);
        f.set_body(body);
        module.add_func(f);

        run_function_pass(&mut module, &LocalRefine, &PassOptions::default());
        assert_eq!(module.funcs["f"].vars[0], Type::I32);
    }
}
