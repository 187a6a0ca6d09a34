//! WebAssembly function optimizer core: a reaching-definitions graph over
//! function locals and a dead-store elimination engine parameterized over
//! store kinds (globals, linear memory, struct fields).

pub mod support;
pub mod ir;
