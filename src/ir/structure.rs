use id_arena::Arena;
use rustc_hash::FxHashMap;

use super::expr::{
    Binary, BinaryOp, Block, Br, BrIf, Call, ExprId, ExprKind, Expression, GlobalGet, GlobalSet,
    If, Index, Literal, Load, LocalGet, LocalSet, Loop, Return, Store, StructGet, StructNew,
    StructSet,
};
use super::ty::{Features, HeapType, StructTable, Type};

#[derive(Debug, Clone)]
pub struct Global {
    pub ty: Type,
    pub mutable: bool,
}

#[derive(Debug, Default)]
pub struct Module {
    pub funcs: FxHashMap<String, Function>,
    pub globals: FxHashMap<String, Global>,
    pub structs: StructTable,
    pub features: Features,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_func(&mut self, func: Function) {
        self.funcs.insert(func.name.clone(), func);
    }

    pub fn add_global(&mut self, name: &str, ty: Type, mutable: bool) {
        self.globals.insert(name.to_string(), Global { ty, mutable });
    }
}

/// A function body: an arena of expression nodes plus the locals table.
/// Each function owns its arena, so passes can work on functions in
/// parallel with no shared mutable state.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<Type>,
    pub vars: Vec<Type>,
    pub exprs: Arena<Expression>,
    pub body: Option<ExprId>,
}

impl Function {
    pub fn new(name: &str, params: Vec<Type>, vars: Vec<Type>) -> Self {
        Self {
            name: name.to_string(),
            params,
            vars,
            exprs: Arena::new(),
            body: None,
        }
    }

    pub fn set_body(&mut self, body: ExprId) {
        self.body = Some(body);
    }

    pub fn body(&self) -> ExprId {
        self.body.expect("function has no body")
    }

    // locals table

    pub fn num_locals(&self) -> Index {
        (self.params.len() + self.vars.len()) as Index
    }

    /// First index that is a var rather than a param.
    pub fn var_index_base(&self) -> Index {
        self.params.len() as Index
    }

    pub fn is_param(&self, index: Index) -> bool {
        index < self.var_index_base()
    }

    pub fn is_var(&self, index: Index) -> bool {
        !self.is_param(index) && index < self.num_locals()
    }

    pub fn local_type(&self, index: Index) -> Type {
        if self.is_param(index) {
            self.params[index as usize]
        } else {
            self.vars[(index - self.var_index_base()) as usize]
        }
    }

    // node access

    pub fn expr(&self, id: ExprId) -> &Expression {
        &self.exprs[id]
    }

    pub fn kind(&self, id: ExprId) -> &ExprKind {
        &self.exprs[id].kind
    }

    pub fn ty(&self, id: ExprId) -> Type {
        self.exprs[id].ty
    }

    /// A `local.set` whose type is concrete is a tee: it also yields the
    /// written value.
    pub fn is_tee(&self, id: ExprId) -> bool {
        self.exprs[id].kind.is_local_set() && self.exprs[id].ty.is_concrete()
    }

    fn alloc(&mut self, kind: ExprKind, ty: Type) -> ExprId {
        self.exprs.alloc(Expression::new(kind, ty))
    }

    /// Writes the node at `with` into the slot of `at`. Every parent that
    /// references `at` observes the new node; the slot at `with` becomes an
    /// orphan.
    pub fn replace_expr(&mut self, at: ExprId, with: ExprId) {
        self.exprs[at] = self.exprs[with].clone();
    }

    /// Walks the subtree under `root` post-order, children before parents.
    pub fn walk_post(&self, root: ExprId, f: &mut impl FnMut(ExprId)) {
        self.exprs[root].kind.for_each_child(|child| self.walk_post(child, f));
        f(root);
    }

    // node builders

    pub fn nop(&mut self) -> ExprId {
        self.alloc(ExprKind::Nop, Type::None)
    }

    pub fn const_(&mut self, value: Literal) -> ExprId {
        self.alloc(ExprKind::Const(value), value.ty())
    }

    pub fn const_i32(&mut self, value: i32) -> ExprId {
        self.const_(Literal::I32(value))
    }

    pub fn local_get(&mut self, index: Index) -> ExprId {
        let ty = self.local_type(index);
        self.alloc(ExprKind::LocalGet(LocalGet { index }), ty)
    }

    pub fn local_set(&mut self, index: Index, value: ExprId) -> ExprId {
        self.alloc(ExprKind::LocalSet(LocalSet { index, value }), Type::None)
    }

    pub fn local_tee(&mut self, index: Index, value: ExprId) -> ExprId {
        let ty = self.local_type(index);
        self.alloc(ExprKind::LocalSet(LocalSet { index, value }), ty)
    }

    pub fn global_get(&mut self, name: &str, ty: Type) -> ExprId {
        self.alloc(ExprKind::GlobalGet(GlobalGet { name: name.to_string() }), ty)
    }

    pub fn global_set(&mut self, name: &str, value: ExprId) -> ExprId {
        self.alloc(ExprKind::GlobalSet(GlobalSet { name: name.to_string(), value }), Type::None)
    }

    pub fn load(&mut self, bytes: u8, offset: u32, atomic: bool, ptr: ExprId, ty: Type) -> ExprId {
        self.alloc(ExprKind::Load(Load { bytes, offset, atomic, ptr }), ty)
    }

    pub fn store(&mut self, bytes: u8, offset: u32, atomic: bool, ptr: ExprId, value: ExprId) -> ExprId {
        self.alloc(ExprKind::Store(Store { bytes, offset, atomic, ptr, value }), Type::None)
    }

    pub fn struct_new(&mut self, heap: HeapType, operands: Vec<ExprId>) -> ExprId {
        self.alloc(ExprKind::StructNew(StructNew { heap, operands }), Type::ref_non_null(heap))
    }

    pub fn struct_get(&mut self, ref_: ExprId, field: u32, ty: Type) -> ExprId {
        self.alloc(ExprKind::StructGet(StructGet { ref_, field }), ty)
    }

    pub fn struct_set(&mut self, ref_: ExprId, field: u32, value: ExprId) -> ExprId {
        self.alloc(ExprKind::StructSet(StructSet { ref_, field, value }), Type::None)
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: ExprId, rhs: ExprId) -> ExprId {
        let ty = match op {
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::LtS => Type::I32,
            _ => self.ty(lhs),
        };
        self.alloc(ExprKind::Binary(Binary { op, lhs, rhs }), ty)
    }

    pub fn call(&mut self, target: &str, operands: Vec<ExprId>, ty: Type) -> ExprId {
        self.alloc(ExprKind::Call(Call { target: target.to_string(), operands }), ty)
    }

    pub fn make_drop(&mut self, value: ExprId) -> ExprId {
        self.alloc(ExprKind::Drop(value), Type::None)
    }

    /// Result type of a child list, as a block computes it.
    pub fn block_result_ty(&self, children: &[ExprId]) -> Type {
        match children.last() {
            None => Type::None,
            Some(&last) => {
                if children[..children.len() - 1]
                    .iter()
                    .any(|&c| self.ty(c) == Type::Unreachable)
                {
                    Type::Unreachable
                } else {
                    self.ty(last)
                }
            }
        }
    }

    pub fn block(&mut self, name: Option<&str>, children: Vec<ExprId>) -> ExprId {
        let ty = self.block_result_ty(&children);
        self.alloc(
            ExprKind::Block(Block { name: name.map(str::to_string), children }),
            ty,
        )
    }

    /// Two expressions in sequence, yielding the second.
    pub fn make_sequence(&mut self, first: ExprId, second: ExprId) -> ExprId {
        self.block(None, vec![first, second])
    }

    pub fn if_(&mut self, cond: ExprId, if_true: ExprId, if_false: Option<ExprId>) -> ExprId {
        let ty = match if_false {
            None => Type::None,
            Some(alt) => match (self.ty(if_true), self.ty(alt)) {
                (Type::Unreachable, t) | (t, Type::Unreachable) => t,
                (t, u) if t == u => t,
                _ => Type::None,
            },
        };
        self.alloc(ExprKind::If(If { cond, if_true, if_false }), ty)
    }

    pub fn loop_(&mut self, name: &str, body: ExprId) -> ExprId {
        let ty = self.ty(body);
        self.alloc(ExprKind::Loop(Loop { name: name.to_string(), body }), ty)
    }

    pub fn br(&mut self, target: &str) -> ExprId {
        self.alloc(ExprKind::Br(Br { target: target.to_string() }), Type::Unreachable)
    }

    pub fn br_if(&mut self, target: &str, cond: ExprId) -> ExprId {
        self.alloc(ExprKind::BrIf(BrIf { target: target.to_string(), cond }), Type::None)
    }

    pub fn return_(&mut self, value: Option<ExprId>) -> ExprId {
        self.alloc(ExprKind::Return(Return { value }), Type::Unreachable)
    }

    pub fn unreachable(&mut self) -> ExprId {
        self.alloc(ExprKind::Unreachable, Type::Unreachable)
    }
}
