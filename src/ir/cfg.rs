use id_arena::{Arena, Id};

use super::expr::{ExprId, ExprKind};
use super::structure::Function;

pub type BlockId = Id<BasicBlock>;

/// A basic block: the expressions that execute in it, in evaluation
/// (post) order, plus the edges.
#[derive(Debug, Default)]
pub struct BasicBlock {
    pub exprs: Vec<ExprId>,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
}

/// Control-flow graph over a function body. Every expression reachable in
/// execution order appears in exactly one block; expressions in dead code
/// appear in no linked block. The exit block is empty and distinguished:
/// reaching it means leaving the function.
#[derive(Debug)]
pub struct Cfg {
    pub blocks: Arena<BasicBlock>,
    /// Creation order; deterministic, entry first, exit last.
    pub order: Vec<BlockId>,
    pub entry: BlockId,
    pub exit: BlockId,
}

impl Cfg {
    pub fn build(func: &Function) -> Cfg {
        Builder::new(func).build()
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }
}

enum FrameTarget {
    /// A block label: branches jump past the block's end. Holds the source
    /// blocks to link once the join block exists.
    Forward(Vec<BlockId>),
    /// A loop label: branches jump back to the header.
    Backward(BlockId),
}

struct Frame {
    name: String,
    target: FrameTarget,
}

struct Builder<'a> {
    func: &'a Function,
    blocks: Arena<BasicBlock>,
    order: Vec<BlockId>,
    current: Option<BlockId>,
    frames: Vec<Frame>,
    returns: Vec<BlockId>,
}

impl<'a> Builder<'a> {
    fn new(func: &'a Function) -> Self {
        Self {
            func,
            blocks: Arena::new(),
            order: Vec::new(),
            current: None,
            frames: Vec::new(),
            returns: Vec::new(),
        }
    }

    fn build(mut self) -> Cfg {
        let entry = self.new_block();
        self.current = Some(entry);
        self.walk(self.func.body());
        let flowing_out = self.current;

        let exit = self.new_block();
        if let Some(last) = flowing_out {
            self.link(last, exit);
        }
        for ret in std::mem::take(&mut self.returns) {
            self.link(ret, exit);
        }

        Cfg { blocks: self.blocks, order: self.order, entry, exit }
    }

    fn new_block(&mut self) -> BlockId {
        let id = self.blocks.alloc(BasicBlock::default());
        self.order.push(id);
        id
    }

    fn link(&mut self, from: BlockId, to: BlockId) {
        self.blocks[from].succs.push(to);
        self.blocks[to].preds.push(from);
    }

    fn emit(&mut self, expr: ExprId) {
        if let Some(block) = self.current {
            self.blocks[block].exprs.push(expr);
        }
    }

    /// Records a branch from the current block to the named label.
    fn branch_to(&mut self, target: &str) {
        let Some(from) = self.current else { return };
        let frame = self
            .frames
            .iter_mut()
            .rev()
            .find(|f| f.name == target)
            .expect("branch to unknown label");
        match &mut frame.target {
            FrameTarget::Forward(pending) => pending.push(from),
            FrameTarget::Backward(header) => {
                let header = *header;
                self.link(from, header);
            }
        }
    }

    fn walk(&mut self, expr: ExprId) {
        let func = self.func;
        match func.kind(expr) {
            ExprKind::Block(b) => {
                let named = b.name.is_some();
                if let Some(name) = &b.name {
                    self.frames.push(Frame {
                        name: name.clone(),
                        target: FrameTarget::Forward(Vec::new()),
                    });
                }
                for &child in &b.children {
                    self.walk(child);
                }
                self.emit(expr);
                if named {
                    let frame = self.frames.pop().unwrap();
                    let FrameTarget::Forward(pending) = frame.target else { unreachable!() };
                    if !pending.is_empty() {
                        let join = self.new_block();
                        if let Some(cur) = self.current {
                            self.link(cur, join);
                        }
                        for from in pending {
                            self.link(from, join);
                        }
                        self.current = Some(join);
                    }
                }
            }
            ExprKind::Loop(l) => {
                let header = self.new_block();
                if let Some(cur) = self.current {
                    self.link(cur, header);
                }
                self.current = Some(header);
                self.frames.push(Frame {
                    name: l.name.clone(),
                    target: FrameTarget::Backward(header),
                });
                self.walk(l.body);
                self.frames.pop();
                self.emit(expr);
            }
            ExprKind::If(i) => {
                self.walk(i.cond);
                let before = self.current;

                let then_block = self.new_block();
                if let Some(b) = before {
                    self.link(b, then_block);
                }
                self.current = Some(then_block);
                self.walk(i.if_true);
                let then_end = self.current;

                let else_end = match i.if_false {
                    Some(alt) => {
                        let else_block = self.new_block();
                        if let Some(b) = before {
                            self.link(b, else_block);
                        }
                        self.current = Some(else_block);
                        self.walk(alt);
                        self.current
                    }
                    None => before,
                };

                let join = self.new_block();
                if let Some(b) = then_end {
                    self.link(b, join);
                }
                if let Some(b) = else_end {
                    self.link(b, join);
                }
                self.current = Some(join);
                self.emit(expr);
            }
            ExprKind::Br(b) => {
                self.emit(expr);
                self.branch_to(&b.target);
                self.current = None;
            }
            ExprKind::BrIf(b) => {
                self.walk(b.cond);
                self.emit(expr);
                self.branch_to(&b.target);
                if let Some(cur) = self.current {
                    let fallthrough = self.new_block();
                    self.link(cur, fallthrough);
                    self.current = Some(fallthrough);
                }
            }
            ExprKind::Return(r) => {
                if let Some(value) = r.value {
                    self.walk(value);
                }
                self.emit(expr);
                if let Some(cur) = self.current {
                    self.returns.push(cur);
                }
                self.current = None;
            }
            ExprKind::Unreachable => {
                self.emit(expr);
                self.current = None;
            }
            kind => {
                kind.for_each_child(|child| self.walk(child));
                self.emit(expr);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::BinaryOp;
    use crate::ir::ty::Type;

    fn block_of(cfg: &Cfg, expr: ExprId) -> Option<BlockId> {
        cfg.order
            .iter()
            .copied()
            .find(|&b| cfg.block(b).exprs.contains(&expr))
    }

    #[test]
    fn straight_line_is_one_block_into_exit() {
        let mut f = Function::new("f", vec![Type::I32], vec![]);
        let p = f.local_get(0);
        let c = f.const_i32(1);
        let add = f.binary(BinaryOp::Add, p, c);
        let body = f.block(None, vec![add]);
        f.set_body(body);

        let cfg = Cfg::build(&f);
        let entry = cfg.block(cfg.entry);
        assert_eq!(entry.exprs, vec![p, c, add, body]);
        assert_eq!(entry.succs, vec![cfg.exit]);
        assert!(cfg.block(cfg.exit).exprs.is_empty());
    }

    #[test]
    fn if_else_forms_a_diamond() {
        let mut f = Function::new("f", vec![Type::I32], vec![Type::I32]);
        let cond = f.local_get(0);
        let c1 = f.const_i32(1);
        let s1 = f.local_set(1, c1);
        let c2 = f.const_i32(2);
        let s2 = f.local_set(1, c2);
        let if_ = f.if_(cond, s1, Some(s2));
        let use_x = f.local_get(1);
        let drop = f.make_drop(use_x);
        let body = f.block(None, vec![if_, drop]);
        f.set_body(body);

        let cfg = Cfg::build(&f);
        let join = block_of(&cfg, use_x).unwrap();
        assert_eq!(cfg.block(join).preds.len(), 2);
        let then_block = block_of(&cfg, s1).unwrap();
        let else_block = block_of(&cfg, s2).unwrap();
        assert_eq!(cfg.block(then_block).succs, vec![join]);
        assert_eq!(cfg.block(else_block).succs, vec![join]);
        assert_eq!(block_of(&cfg, cond), Some(cfg.entry));
    }

    #[test]
    fn loop_branch_is_a_back_edge() {
        let mut f = Function::new("f", vec![Type::I32], vec![]);
        let cond = f.local_get(0);
        let cont = f.br_if("l", cond);
        let inner = f.block(None, vec![cont]);
        let looped = f.loop_("l", inner);
        let body = f.block(None, vec![looped]);
        f.set_body(body);

        let cfg = Cfg::build(&f);
        let header = block_of(&cfg, cond).unwrap();
        assert!(cfg.block(header).succs.contains(&header));
        assert!(cfg.block(header).preds.contains(&cfg.entry));
        assert!(cfg.block(header).preds.contains(&header));
    }

    #[test]
    fn code_after_return_is_in_no_block() {
        let mut f = Function::new("f", vec![], vec![]);
        let ret = f.return_(None);
        let dead = f.const_i32(9);
        let dead_drop = f.make_drop(dead);
        let body = f.block(None, vec![ret, dead_drop]);
        f.set_body(body);

        let cfg = Cfg::build(&f);
        assert!(block_of(&cfg, dead_drop).is_none());
        let ret_block = block_of(&cfg, ret).unwrap();
        assert_eq!(cfg.block(ret_block).succs, vec![cfg.exit]);
    }

    #[test]
    fn br_exits_a_named_block() {
        let mut f = Function::new("f", vec![], vec![]);
        let br = f.br("out");
        let skipped = f.nop();
        let named = f.block(Some("out"), vec![br, skipped]);
        let after = f.nop();
        let body = f.block(None, vec![named, after]);
        f.set_body(body);

        let cfg = Cfg::build(&f);
        assert!(block_of(&cfg, skipped).is_none());
        let br_block = block_of(&cfg, br).unwrap();
        let after_block = block_of(&cfg, after).unwrap();
        assert_eq!(cfg.block(br_block).succs, vec![after_block]);
    }
}
