use log::debug;
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use super::structure::{Function, Global, Module};
use super::ty::{Features, PassOptions, StructTable};

pub mod dse;
pub mod local_refine;

/// Module-level context a function worker may read. Workers never share
/// mutable state; each owns the one function it rewrites.
pub struct PassCx<'a> {
    pub globals: &'a FxHashMap<String, Global>,
    pub structs: &'a StructTable,
    pub features: Features,
    pub options: &'a PassOptions,
}

pub trait FunctionPass: Sync {
    fn name(&self) -> &'static str;

    /// Whether the pass may run on functions in parallel. True unless a
    /// pass accumulates cross-function state.
    fn parallel(&self) -> bool {
        true
    }

    fn run_on_function(&self, cx: &PassCx<'_>, func: &mut Function);
}

/// Runs `pass` over every function of the module, in parallel when the
/// pass allows it.
pub fn run_function_pass(module: &mut Module, pass: &dyn FunctionPass, options: &PassOptions) {
    let Module { funcs, globals, structs, features } = module;
    let cx = PassCx { globals: &*globals, structs: &*structs, features: *features, options };
    debug!("running {}", pass.name());
    if pass.parallel() {
        funcs.par_iter_mut().for_each(|(_, func)| pass.run_on_function(&cx, func));
    } else {
        for func in funcs.values_mut() {
            pass.run_on_function(&cx, func);
        }
    }
}

pub fn create_dead_store_elimination() -> Box<dyn FunctionPass> {
    Box::new(dse::DeadStoreElimination)
}

pub fn create_local_refine() -> Box<dyn FunctionPass> {
    Box::new(local_refine::LocalRefine)
}
