use std::fmt::{self, Display, Formatter, Write as _};

use super::expr::{ExprId, ExprKind, Literal};
use super::structure::Function;
use super::ty::Type;

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Type::None => write!(f, "none"),
            Type::Unreachable => write!(f, "unreachable"),
            Type::I32 => write!(f, "i32"),
            Type::I64 => write!(f, "i64"),
            Type::F32 => write!(f, "f32"),
            Type::F64 => write!(f, "f64"),
            Type::Ref(r) => {
                if r.nullable {
                    write!(f, "(ref null ${})", r.heap)
                } else {
                    write!(f, "(ref ${})", r.heap)
                }
            }
        }
    }
}

impl Function {
    /// Renders the function as nested s-expressions, for debugging and
    /// test diagnostics.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = write!(out, "(func ${}", self.name);
        for p in &self.params {
            let _ = write!(out, " (param {})", p);
        }
        for v in &self.vars {
            let _ = write!(out, " (local {})", v);
        }
        out.push('\n');
        if let Some(body) = self.body {
            self.print_expr(&mut out, body, 1);
        }
        out.push_str(")\n");
        out
    }

    fn print_expr(&self, out: &mut String, expr: ExprId, depth: usize) {
        let pad = "  ".repeat(depth);
        let open = |out: &mut String, head: &str| {
            let _ = write!(out, "{}({}", pad, head);
        };
        let close_inline = |out: &mut String| out.push_str(")\n");
        let close_nested = |out: &mut String| {
            let _ = write!(out, "{})\n", pad);
        };

        match self.kind(expr) {
            ExprKind::Nop => {
                open(out, "nop");
                close_inline(out);
            }
            ExprKind::Const(lit) => {
                match lit {
                    Literal::I32(v) => open(out, &format!("i32.const {}", v)),
                    Literal::I64(v) => open(out, &format!("i64.const {}", v)),
                    Literal::F32(bits) => open(out, &format!("f32.const {}", f32::from_bits(*bits))),
                    Literal::F64(bits) => open(out, &format!("f64.const {}", f64::from_bits(*bits))),
                }
                close_inline(out);
            }
            ExprKind::LocalGet(g) => {
                open(out, &format!("local.get {}", g.index));
                close_inline(out);
            }
            ExprKind::LocalSet(s) => {
                let head = if self.is_tee(expr) { "local.tee" } else { "local.set" };
                open(out, &format!("{} {}", head, s.index));
                out.push('\n');
                self.print_expr(out, s.value, depth + 1);
                close_nested(out);
            }
            ExprKind::GlobalGet(g) => {
                open(out, &format!("global.get ${}", g.name));
                close_inline(out);
            }
            ExprKind::GlobalSet(g) => {
                open(out, &format!("global.set ${}", g.name));
                out.push('\n');
                self.print_expr(out, g.value, depth + 1);
                close_nested(out);
            }
            ExprKind::Load(l) => {
                let atomic = if l.atomic { " atomic" } else { "" };
                open(out, &format!("load {}{} offset={}", l.bytes, atomic, l.offset));
                out.push('\n');
                self.print_expr(out, l.ptr, depth + 1);
                close_nested(out);
            }
            ExprKind::Store(s) => {
                let atomic = if s.atomic { " atomic" } else { "" };
                open(out, &format!("store {}{} offset={}", s.bytes, atomic, s.offset));
                out.push('\n');
                self.print_expr(out, s.ptr, depth + 1);
                self.print_expr(out, s.value, depth + 1);
                close_nested(out);
            }
            ExprKind::StructNew(s) => {
                open(out, &format!("struct.new ${}", s.heap));
                if s.operands.is_empty() {
                    close_inline(out);
                } else {
                    out.push('\n');
                    for &op in &s.operands {
                        self.print_expr(out, op, depth + 1);
                    }
                    close_nested(out);
                }
            }
            ExprKind::StructGet(s) => {
                open(out, &format!("struct.get {}", s.field));
                out.push('\n');
                self.print_expr(out, s.ref_, depth + 1);
                close_nested(out);
            }
            ExprKind::StructSet(s) => {
                open(out, &format!("struct.set {}", s.field));
                out.push('\n');
                self.print_expr(out, s.ref_, depth + 1);
                self.print_expr(out, s.value, depth + 1);
                close_nested(out);
            }
            ExprKind::Binary(b) => {
                open(out, &format!("{:?}", b.op).to_lowercase());
                out.push('\n');
                self.print_expr(out, b.lhs, depth + 1);
                self.print_expr(out, b.rhs, depth + 1);
                close_nested(out);
            }
            ExprKind::Call(c) => {
                open(out, &format!("call ${}", c.target));
                if c.operands.is_empty() {
                    close_inline(out);
                } else {
                    out.push('\n');
                    for &op in &c.operands {
                        self.print_expr(out, op, depth + 1);
                    }
                    close_nested(out);
                }
            }
            ExprKind::Drop(value) => {
                open(out, "drop");
                out.push('\n');
                self.print_expr(out, *value, depth + 1);
                close_nested(out);
            }
            ExprKind::Block(b) => {
                match &b.name {
                    Some(name) => open(out, &format!("block ${}", name)),
                    None => open(out, "block"),
                }
                out.push('\n');
                for &child in &b.children {
                    self.print_expr(out, child, depth + 1);
                }
                close_nested(out);
            }
            ExprKind::If(i) => {
                open(out, "if");
                out.push('\n');
                self.print_expr(out, i.cond, depth + 1);
                self.print_expr(out, i.if_true, depth + 1);
                if let Some(alt) = i.if_false {
                    self.print_expr(out, alt, depth + 1);
                }
                close_nested(out);
            }
            ExprKind::Loop(l) => {
                open(out, &format!("loop ${}", l.name));
                out.push('\n');
                self.print_expr(out, l.body, depth + 1);
                close_nested(out);
            }
            ExprKind::Br(b) => {
                open(out, &format!("br ${}", b.target));
                close_inline(out);
            }
            ExprKind::BrIf(b) => {
                open(out, &format!("br_if ${}", b.target));
                out.push('\n');
                self.print_expr(out, b.cond, depth + 1);
                close_nested(out);
            }
            ExprKind::Return(r) => {
                open(out, "return");
                match r.value {
                    Some(value) => {
                        out.push('\n');
                        self.print_expr(out, value, depth + 1);
                        close_nested(out);
                    }
                    None => close_inline(out),
                }
            }
            ExprKind::Unreachable => {
                open(out, "unreachable");
                close_inline(out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dumps_nested_expressions() {
        let mut f = Function::new("f", vec![Type::I32], vec![]);
        let p = f.local_get(0);
        let c = f.const_i32(1);
        let store = f.store(4, 0, false, p, c);
        let body = f.block(None, vec![store]);
        f.set_body(body);

        let text = f.dump();
        assert!(text.starts_with("(func $f (param i32)"));
        assert!(text.contains("(store 4 offset=0"));
        assert!(text.contains("(local.get 0)"));
        assert!(text.contains("(i32.const 1)"));
    }
}
