//! RcDoc-based printer for terms and types.
//!
//! Terms print as s-expressions, e.g. `(bv-add x (bv-neg y))`. Uninterpreted terms use
//! their base name when they have one and `t!<index>` otherwise. Documents carry [`Style`]
//! annotations so that terminals get colored output, while [`render_plain`] produces
//! an uncolored string.

use std::io::{self, Write};

use pretty::{RcDoc, RenderAnnotated};
use termcolor::{Color, ColorSpec, WriteColor};

use crate::{
    terms::{Term, TermDesc, TermTable},
    types::{TypeDesc, TypeId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    /// Parentheses are colored by nesting depth so matching pairs share a color.
    Paren(u8),
    Keyword,
    Operator,
    Ident,
    Constant,
    Type,
}

impl Style {
    fn to_color_spec(self) -> ColorSpec {
        let mut s = ColorSpec::new();
        match self {
            Style::Paren(depth) => {
                let fg = match depth % 4 {
                    0 => Color::Blue,
                    1 => Color::Green,
                    2 => Color::Yellow,
                    _ => Color::Magenta,
                };
                s.set_fg(Some(fg)).set_dimmed(true);
            }
            Style::Keyword => {
                s.set_fg(Some(Color::Cyan)).set_bold(true);
            }
            Style::Operator => {
                s.set_fg(Some(Color::Yellow)).set_bold(true);
            }
            Style::Ident => {
                s.set_fg(Some(Color::Green));
            }
            Style::Constant => {
                s.set_fg(Some(Color::Red));
            }
            Style::Type => {
                s.set_fg(Some(Color::Magenta));
            }
        }
        s
    }
}

pub type Doc = RcDoc<'static, Style>;

fn styled(style: Style, s: impl Into<String>) -> Doc {
    RcDoc::as_string(s.into()).annotate(style)
}

/// `(head arg1 arg2 ...)`, breaking lines when too wide.
pub fn sexp(head: Doc, args: Vec<Doc>, depth: u8) -> Doc {
    let body = args
        .into_iter()
        .fold(head, |acc, a| acc.append(RcDoc::line()).append(a));
    styled(Style::Paren(depth), "(")
        .append(body.nest(2))
        .append(styled(Style::Paren(depth), ")"))
        .group()
}

pub fn op(s: &'static str) -> Doc {
    styled(Style::Operator, s)
}

pub fn keyword(s: &'static str) -> Doc {
    styled(Style::Keyword, s)
}

pub fn constant(s: impl Into<String>) -> Doc {
    styled(Style::Constant, s)
}

/// Binary representation of a bitvector value, most significant bit first.
pub fn bv_literal(width: u32, value: u64) -> String {
    let bits: String = (0..width)
        .rev()
        .map(|i| if value >> i & 1 == 1 { '1' } else { '0' })
        .collect();
    format!("0b{}", bits)
}

impl TermTable {
    pub fn type_doc(&self, ty: TypeId) -> Doc {
        if let Some(name) = self.get_type_name(ty) {
            return styled(Style::Type, name);
        }
        match self.types().get(ty) {
            None => styled(Style::Type, "<invalid>"),
            Some(TypeDesc::Bool) => styled(Style::Type, "bool"),
            Some(TypeDesc::BitVector(w)) => sexp(
                styled(Style::Type, "bitvector"),
                vec![constant(w.to_string())],
                0,
            ),
            Some(TypeDesc::Uninterpreted(_)) => styled(Style::Type, format!("tau!{}", ty.raw())),
            Some(TypeDesc::Function { domain, range }) => {
                let mut args: Vec<Doc> = domain.iter().map(|&d| self.type_doc(d)).collect();
                args.push(self.type_doc(*range));
                sexp(op("->"), args, 0)
            }
        }
    }

    pub fn term_doc(&self, t: Term) -> Doc {
        self.term_doc_with_depth(t, 0)
    }

    fn term_doc_with_depth(&self, t: Term, depth: u8) -> Doc {
        if !self.is_valid(t) {
            return styled(Style::Ident, "<invalid>");
        }
        if t == Term::FALSE {
            return constant("false");
        }
        if t.is_negated() {
            let inner = self.term_doc_with_depth(t.positive(), depth + 1);
            return sexp(op("not"), vec![inner], depth);
        }

        let sub = |u: Term| self.term_doc_with_depth(u, depth + 1);
        let subs = |args: &[Term]| args.iter().map(|&u| sub(u)).collect::<Vec<_>>();
        match self.desc(t) {
            TermDesc::True => constant("true"),
            TermDesc::BvConstant { width, value } => constant(bv_literal(*width, *value)),
            TermDesc::Uninterpreted { .. } => match self.get_term_name(t) {
                Some(name) => styled(Style::Ident, name),
                None => styled(Style::Ident, format!("t!{}", t.index())),
            },
            TermDesc::Variable { .. } => match self.get_term_name(t) {
                Some(name) => styled(Style::Ident, name),
                None => styled(Style::Ident, format!("x!{}", t.index())),
            },
            TermDesc::Ite(c, a, b) => sexp(keyword("ite"), subs(&[*c, *a, *b]), depth),
            TermDesc::Eq(a, b) => sexp(op("="), subs(&[*a, *b]), depth),
            TermDesc::Or(args) => sexp(op("or"), subs(args), depth),
            TermDesc::Xor(a, b) => sexp(op("xor"), subs(&[*a, *b]), depth),
            TermDesc::App(f, args) => sexp(sub(*f), subs(args), depth),
            TermDesc::Forall(vars, body) => {
                let bindings = vars
                    .iter()
                    .map(|&v| {
                        sub(v)
                            .append(RcDoc::text("::"))
                            .append(self.type_doc(self.ty(v)))
                    })
                    .collect::<Vec<_>>();
                let (head, rest) = match bindings.split_first() {
                    Some((h, r)) => (h.clone(), r.to_vec()),
                    None => (RcDoc::nil(), Vec::new()),
                };
                sexp(
                    keyword("forall"),
                    vec![sexp(head, rest, depth + 1), sub(*body)],
                    depth,
                )
            }
            TermDesc::BitSelect(x, i) => sexp(op("bit"), vec![sub(*x), constant(i.to_string())], depth),
            TermDesc::BvGe(a, b) => sexp(op("bv-ge"), subs(&[*a, *b]), depth),
            TermDesc::BvSge(a, b) => sexp(op("bv-sge"), subs(&[*a, *b]), depth),
            TermDesc::BvNeg(a) => sexp(op("bv-neg"), vec![sub(*a)], depth),
            TermDesc::BvSum(args) => sexp(op("bv-add"), subs(args), depth),
            TermDesc::BvProduct(args) => sexp(op("bv-mul"), subs(args), depth),
        }
    }

    pub fn term_to_string(&self, t: Term, width: usize) -> String {
        render_plain(&self.term_doc(t), width)
    }

    pub fn type_to_string(&self, ty: TypeId, width: usize) -> String {
        render_plain(&self.type_doc(ty), width)
    }
}

// A writer that maps Style annotations to termcolor ColorSpec on a WriteColor sink.
struct ColorWriter<'w, W: WriteColor + Write> {
    out: &'w mut W,
}

impl<'a, 'w, W: WriteColor + Write> RenderAnnotated<'a, Style> for ColorWriter<'w, W> {
    fn push_annotation(&mut self, ann: &'a Style) -> io::Result<()> {
        self.out.set_color(&ann.to_color_spec())
    }

    fn pop_annotation(&mut self) -> io::Result<()> {
        self.out.reset()
    }
}

impl<'w, W: WriteColor + Write> pretty::Render for ColorWriter<'w, W> {
    type Error = io::Error;

    fn write_str(&mut self, s: &str) -> io::Result<usize> {
        self.out.write_all(s.as_bytes())?;
        Ok(s.len())
    }

    fn write_str_all(&mut self, s: &str) -> io::Result<()> {
        self.out.write_all(s.as_bytes())
    }

    fn fail_doc(&self) -> Self::Error {
        io::Error::other("render failed")
    }
}

/// Render a document to a `termcolor::WriteColor` with width-aware layout.
pub fn render_to<W: WriteColor + Write>(doc: &Doc, width: usize, out: &mut W) -> io::Result<()> {
    let mut cw = ColorWriter { out };
    doc.render_raw(width, &mut cw)
}

pub fn render_plain(doc: &Doc, width: usize) -> String {
    let mut buf = String::new();
    let _ = doc.render_fmt(width, &mut buf);
    buf
}
