use thiserror::Error;

use super::expr::{ExprId, ExprKind, Index};
use super::structure::{Function, Module};
use super::ty::Type;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("function {func}: local index {index} out of range")]
    LocalIndexOutOfRange { func: String, index: Index },
    #[error("function {func}: branch to unknown label {label}")]
    UnknownLabel { func: String, label: String },
    #[error("function {func}: unknown global {name}")]
    UnknownGlobal { func: String, name: String },
    #[error("function {func}: struct access on a non-reference value")]
    NotAReference { func: String },
    #[error("function {func}: struct type {heap} has no field {field}")]
    FieldOutOfRange { func: String, heap: u32, field: u32 },
    #[error("function {func}: invalid access width {bytes}")]
    BadAccessWidth { func: String, bytes: u8 },
    #[error("function {func} has no body")]
    MissingBody { func: String },
}

/// Structural validation of every function in the module. The analyses
/// assume these properties hold; a violation is a programmer error in
/// whatever produced the IR.
pub fn validate_module(module: &Module) -> Result<(), VerifyError> {
    for func in module.funcs.values() {
        validate_function(func, module)?;
    }
    Ok(())
}

pub fn validate_function(func: &Function, module: &Module) -> Result<(), VerifyError> {
    let Some(body) = func.body else {
        return Err(VerifyError::MissingBody { func: func.name.clone() });
    };
    let mut labels = Vec::new();
    check(func, module, &mut labels, body)
}

fn check(
    func: &Function,
    module: &Module,
    labels: &mut Vec<String>,
    expr: ExprId,
) -> Result<(), VerifyError> {
    let err_func = || func.name.clone();
    match func.kind(expr) {
        ExprKind::LocalGet(g) => {
            if g.index >= func.num_locals() {
                return Err(VerifyError::LocalIndexOutOfRange { func: err_func(), index: g.index });
            }
        }
        ExprKind::LocalSet(s) => {
            if s.index >= func.num_locals() {
                return Err(VerifyError::LocalIndexOutOfRange { func: err_func(), index: s.index });
            }
            check(func, module, labels, s.value)?;
        }
        ExprKind::GlobalGet(g) => {
            if !module.globals.contains_key(&g.name) {
                return Err(VerifyError::UnknownGlobal { func: err_func(), name: g.name.clone() });
            }
        }
        ExprKind::GlobalSet(g) => {
            if !module.globals.contains_key(&g.name) {
                return Err(VerifyError::UnknownGlobal { func: err_func(), name: g.name.clone() });
            }
            check(func, module, labels, g.value)?;
        }
        ExprKind::Load(l) => {
            check_width(func, l.bytes, func.ty(expr))?;
            check(func, module, labels, l.ptr)?;
        }
        ExprKind::Store(s) => {
            check_width(func, s.bytes, func.ty(s.value))?;
            check(func, module, labels, s.ptr)?;
            check(func, module, labels, s.value)?;
        }
        ExprKind::StructGet(s) => {
            check_field(func, module, s.ref_, s.field)?;
            check(func, module, labels, s.ref_)?;
        }
        ExprKind::StructSet(s) => {
            check_field(func, module, s.ref_, s.field)?;
            check(func, module, labels, s.ref_)?;
            check(func, module, labels, s.value)?;
        }
        ExprKind::Block(b) => {
            let named = b.name.is_some();
            if let Some(name) = &b.name {
                labels.push(name.clone());
            }
            for &child in &b.children {
                let result = check(func, module, labels, child);
                if result.is_err() {
                    if named {
                        labels.pop();
                    }
                    return result;
                }
            }
            if named {
                labels.pop();
            }
        }
        ExprKind::Loop(l) => {
            labels.push(l.name.clone());
            let result = check(func, module, labels, l.body);
            labels.pop();
            result?;
        }
        ExprKind::Br(b) => {
            if !labels.iter().any(|l| *l == b.target) {
                return Err(VerifyError::UnknownLabel { func: err_func(), label: b.target.clone() });
            }
        }
        ExprKind::BrIf(b) => {
            if !labels.iter().any(|l| *l == b.target) {
                return Err(VerifyError::UnknownLabel { func: err_func(), label: b.target.clone() });
            }
            check(func, module, labels, b.cond)?;
        }
        kind => {
            let mut children = Vec::new();
            kind.for_each_child(|c| children.push(c));
            for child in children {
                check(func, module, labels, child)?;
            }
        }
    }
    Ok(())
}

fn check_width(func: &Function, bytes: u8, ty: Type) -> Result<(), VerifyError> {
    let valid = matches!(bytes, 1 | 2 | 4 | 8)
        && match ty.byte_size() {
            Some(size) => bytes as u32 <= size,
            None => ty == Type::Unreachable,
        };
    if valid {
        Ok(())
    } else {
        Err(VerifyError::BadAccessWidth { func: func.name.clone(), bytes })
    }
}

fn check_field(
    func: &Function,
    module: &Module,
    ref_: ExprId,
    field: u32,
) -> Result<(), VerifyError> {
    match func.ty(ref_) {
        Type::Ref(r) => {
            if field as usize >= module.structs.get(r.heap).fields.len() {
                return Err(VerifyError::FieldOutOfRange {
                    func: func.name.clone(),
                    heap: r.heap,
                    field,
                });
            }
            Ok(())
        }
        // An unreachable reference never executes the access.
        Type::Unreachable => Ok(()),
        _ => Err(VerifyError::NotAReference { func: func.name.clone() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ty::{Field, StructDef};

    #[test]
    fn accepts_a_well_formed_function() {
        let mut module = Module::new();
        module.add_global("g", Type::I32, true);
        let mut f = Function::new("f", vec![Type::I32], vec![]);
        let p = f.local_get(0);
        let set = f.global_set("g", p);
        let body = f.block(None, vec![set]);
        f.set_body(body);
        module.add_func(f);
        assert_eq!(validate_module(&module), Ok(()));
    }

    #[test]
    fn rejects_out_of_range_local() {
        let module = Module::new();
        let mut f = Function::new("f", vec![Type::I32], vec![]);
        let g = f.local_get(3);
        let d = f.make_drop(g);
        let body = f.block(None, vec![d]);
        f.set_body(body);
        assert_eq!(
            validate_function(&f, &module),
            Err(VerifyError::LocalIndexOutOfRange { func: "f".into(), index: 3 })
        );
    }

    #[test]
    fn rejects_branch_out_of_scope() {
        let module = Module::new();
        let mut f = Function::new("f", vec![], vec![]);
        let br = f.br("l");
        let named = f.block(Some("l"), vec![]);
        let body = f.block(None, vec![named, br]);
        f.set_body(body);
        assert_eq!(
            validate_function(&f, &module),
            Err(VerifyError::UnknownLabel { func: "f".into(), label: "l".into() })
        );
    }

    #[test]
    fn rejects_bad_field_and_width() {
        let mut module = Module::new();
        let heap = module.structs.add(StructDef {
            fields: vec![Field { ty: Type::I32, mutable: true }],
            supertype: None,
        });

        let mut f = Function::new("f", vec![Type::ref_null(heap)], vec![]);
        let r = f.local_get(0);
        let get = f.struct_get(r, 1, Type::I32);
        let d = f.make_drop(get);
        let body = f.block(None, vec![d]);
        f.set_body(body);
        assert_eq!(
            validate_function(&f, &module),
            Err(VerifyError::FieldOutOfRange { func: "f".into(), heap, field: 1 })
        );

        let mut f2 = Function::new("f2", vec![Type::I32], vec![]);
        let p = f2.local_get(0);
        let load = f2.load(3, 0, false, p, Type::I32);
        let d = f2.make_drop(load);
        let body = f2.block(None, vec![d]);
        f2.set_body(body);
        assert_eq!(
            validate_function(&f2, &module),
            Err(VerifyError::BadAccessWidth { func: "f2".into(), bytes: 3 })
        );
    }
}
