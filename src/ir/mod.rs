pub mod ty;
pub mod expr;
pub mod structure;
pub mod effects;
pub mod cfg;
pub mod properties;
pub mod local_graph;
pub mod refinalize;
pub mod verify;
pub mod print;
pub mod transform;

pub use expr::{ExprId, ExprKind, Expression, Literal};
pub use structure::{Function, Global, Module};
pub use ty::{Features, HeapType, PassOptions, RefType, Type};
