use std::{fmt, ops::Not};

use crate::variable_db::Variable;

/// A variable with a polarity: `variable << 1 | negated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Literal(u32);

impl Literal {
    pub fn new(var: Variable, negated: bool) -> Self {
        Literal((var.index() as u32) << 1 | negated as u32)
    }

    pub fn positive(var: Variable) -> Self {
        Self::new(var, false)
    }

    pub fn var(self) -> Variable {
        Variable::from_index((self.0 >> 1) as usize)
    }

    pub fn is_negated(self) -> bool {
        self.0 & 1 == 1
    }

    /// Dense index, suitable for per-literal tables.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl Not for Literal {
    type Output = Literal;

    fn not(self) -> Literal {
        Literal(self.0 ^ 1)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_negated() {
            write!(f, "~{}", self.var())
        } else {
            write!(f, "{}", self.var())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LBool {
    True,
    False,
    #[default]
    Undef,
}

impl LBool {
    pub fn from_bool(b: bool) -> Self {
        if b { LBool::True } else { LBool::False }
    }

    /// Value seen through a literal of the given polarity.
    pub fn xor(self, negated: bool) -> Self {
        match (self, negated) {
            (LBool::True, true) => LBool::False,
            (LBool::False, true) => LBool::True,
            (v, _) => v,
        }
    }
}
