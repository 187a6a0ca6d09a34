use id_arena::Id;

use super::ty::{HeapType, Type};

pub type ExprId = Id<Expression>;

/// Dense local index; indices below the param count are params.
pub type Index = u32;

/// A constant value. Floats are held as bit patterns so that equality is
/// exact bit equality, which is what the constant branch of the
/// equivalence rule compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Literal {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
}

impl Literal {
    pub fn f32(v: f32) -> Literal {
        Literal::F32(v.to_bits())
    }

    pub fn f64(v: f64) -> Literal {
        Literal::F64(v.to_bits())
    }

    pub fn ty(&self) -> Type {
        match self {
            Literal::I32(_) => Type::I32,
            Literal::I64(_) => Type::I64,
            Literal::F32(_) => Type::F32,
            Literal::F64(_) => Type::F64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    DivS,
    RemS,
    Eq,
    Ne,
    LtS,
}

impl BinaryOp {
    /// Signed division and remainder trap on zero divisors.
    pub fn may_trap(&self) -> bool {
        matches!(self, BinaryOp::DivS | BinaryOp::RemS)
    }
}

#[derive(Debug, Clone)]
pub struct LocalGet {
    pub index: Index,
}

#[derive(Debug, Clone)]
pub struct LocalSet {
    pub index: Index,
    pub value: ExprId,
}

#[derive(Debug, Clone)]
pub struct GlobalGet {
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct GlobalSet {
    pub name: String,
    pub value: ExprId,
}

#[derive(Debug, Clone)]
pub struct Load {
    pub bytes: u8,
    pub offset: u32,
    pub atomic: bool,
    pub ptr: ExprId,
}

#[derive(Debug, Clone)]
pub struct Store {
    pub bytes: u8,
    pub offset: u32,
    pub atomic: bool,
    pub ptr: ExprId,
    pub value: ExprId,
}

#[derive(Debug, Clone)]
pub struct StructNew {
    pub heap: HeapType,
    pub operands: Vec<ExprId>,
}

#[derive(Debug, Clone)]
pub struct StructGet {
    pub ref_: ExprId,
    pub field: u32,
}

#[derive(Debug, Clone)]
pub struct StructSet {
    pub ref_: ExprId,
    pub field: u32,
    pub value: ExprId,
}

#[derive(Debug, Clone)]
pub struct Binary {
    pub op: BinaryOp,
    pub lhs: ExprId,
    pub rhs: ExprId,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub target: String,
    pub operands: Vec<ExprId>,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub name: Option<String>,
    pub children: Vec<ExprId>,
}

#[derive(Debug, Clone)]
pub struct If {
    pub cond: ExprId,
    pub if_true: ExprId,
    pub if_false: Option<ExprId>,
}

#[derive(Debug, Clone)]
pub struct Loop {
    pub name: String,
    pub body: ExprId,
}

#[derive(Debug, Clone)]
pub struct Br {
    pub target: String,
}

#[derive(Debug, Clone)]
pub struct BrIf {
    pub target: String,
    pub cond: ExprId,
}

#[derive(Debug, Clone)]
pub struct Return {
    pub value: Option<ExprId>,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Nop,
    Const(Literal),
    LocalGet(LocalGet),
    LocalSet(LocalSet),
    GlobalGet(GlobalGet),
    GlobalSet(GlobalSet),
    Load(Load),
    Store(Store),
    StructNew(StructNew),
    StructGet(StructGet),
    StructSet(StructSet),
    Binary(Binary),
    Call(Call),
    Drop(ExprId),
    Block(Block),
    If(If),
    Loop(Loop),
    Br(Br),
    BrIf(BrIf),
    Return(Return),
    Unreachable,
}

#[derive(Debug, Clone)]
pub struct Expression {
    pub kind: ExprKind,
    pub ty: Type,
}

impl Expression {
    pub fn new(kind: ExprKind, ty: Type) -> Self {
        Self { kind, ty }
    }
}

macro_rules! impl_cast {
    ($as:ident, $is:ident, $var:ident, $ty:ty) => {
        pub fn $as(&self) -> &$ty {
            match self {
                ExprKind::$var(v) => v,
                _ => panic!(concat!("not a ", stringify!($var))),
            }
        }

        pub fn $is(&self) -> bool {
            matches!(self, ExprKind::$var(_))
        }
    };
}

impl ExprKind {
    impl_cast!(as_local_get, is_local_get, LocalGet, LocalGet);
    impl_cast!(as_local_set, is_local_set, LocalSet, LocalSet);
    impl_cast!(as_global_set, is_global_set, GlobalSet, GlobalSet);
    impl_cast!(as_store, is_store, Store, Store);
    impl_cast!(as_struct_set, is_struct_set, StructSet, StructSet);

    pub fn is_return(&self) -> bool {
        matches!(self, ExprKind::Return(_))
    }

    /// Invokes `f` on each direct child, in evaluation order.
    pub fn for_each_child(&self, mut f: impl FnMut(ExprId)) {
        match self {
            ExprKind::Nop
            | ExprKind::Const(_)
            | ExprKind::LocalGet(_)
            | ExprKind::GlobalGet(_)
            | ExprKind::Br(_)
            | ExprKind::Unreachable => {}
            ExprKind::LocalSet(e) => f(e.value),
            ExprKind::GlobalSet(e) => f(e.value),
            ExprKind::Load(e) => f(e.ptr),
            ExprKind::Store(e) => {
                f(e.ptr);
                f(e.value);
            }
            ExprKind::StructNew(e) => e.operands.iter().copied().for_each(f),
            ExprKind::StructGet(e) => f(e.ref_),
            ExprKind::StructSet(e) => {
                f(e.ref_);
                f(e.value);
            }
            ExprKind::Binary(e) => {
                f(e.lhs);
                f(e.rhs);
            }
            ExprKind::Call(e) => e.operands.iter().copied().for_each(f),
            ExprKind::Drop(value) => f(*value),
            ExprKind::Block(e) => e.children.iter().copied().for_each(f),
            ExprKind::If(e) => {
                f(e.cond);
                f(e.if_true);
                if let Some(alt) = e.if_false {
                    f(alt);
                }
            }
            ExprKind::Loop(e) => f(e.body),
            ExprKind::BrIf(e) => f(e.cond),
            ExprKind::Return(e) => {
                if let Some(value) = e.value {
                    f(value);
                }
            }
        }
    }
}
