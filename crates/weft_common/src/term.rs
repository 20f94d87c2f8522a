//! Generic syntax-tree values exchanged with extension toolchains.
//!
//! A [`Term`] is the only shape the driver needs to know about declarations:
//! constructor applications, lists, tuples, strings and integers. Its
//! `Display` output follows the ATerm text notation, e.g.
//! `Import("std/lib",None())`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A syntax-tree value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Term {
    /// A constructor application `Cons(arg, ...)`.
    Appl {
        /// Constructor name.
        cons: String,
        /// Ordered arguments.
        args: Vec<Term>,
    },
    /// A list `[t, ...]`.
    List(Vec<Term>),
    /// A tuple `(t, ...)`.
    Tuple(Vec<Term>),
    /// A string literal.
    Str(String),
    /// An integer literal.
    Int(i64),
}

impl Term {
    /// Builds a constructor application.
    pub fn appl(cons: impl Into<String>, args: Vec<Term>) -> Self {
        Term::Appl {
            cons: cons.into(),
            args,
        }
    }

    /// Builds a string term.
    pub fn string(s: impl Into<String>) -> Self {
        Term::Str(s.into())
    }

    /// Encodes `Some(term)`.
    pub fn some(term: Term) -> Self {
        Term::appl("Some", vec![term])
    }

    /// Encodes `None()`.
    pub fn none() -> Self {
        Term::appl("None", Vec::new())
    }

    /// Returns the constructor name if this is an application.
    pub fn cons(&self) -> Option<&str> {
        match self {
            Term::Appl { cons, .. } => Some(cons),
            _ => None,
        }
    }

    /// Returns the arguments of an application, or the elements of a list or tuple.
    pub fn args(&self) -> &[Term] {
        match self {
            Term::Appl { args, .. } => args,
            Term::List(items) | Term::Tuple(items) => items,
            Term::Str(_) | Term::Int(_) => &[],
        }
    }

    /// Returns the `index`-th argument, if present.
    pub fn arg(&self, index: usize) -> Option<&Term> {
        self.args().get(index)
    }

    /// Returns `true` for an application of `cons` with exactly `arity` arguments.
    pub fn is_appl(&self, cons: &str, arity: usize) -> bool {
        matches!(self, Term::Appl { cons: c, args } if c == cons && args.len() == arity)
    }

    /// Returns the string payload of a `Str` term.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Term::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Decodes `Some(x)` / `None()`. Any other term is treated as a present value.
    pub fn as_option(&self) -> Option<&Term> {
        match self {
            Term::Appl { cons, args } if cons == "None" && args.is_empty() => None,
            Term::Appl { cons, args } if cons == "Some" && args.len() == 1 => args.first(),
            other => Some(other),
        }
    }

    /// Returns the list elements of a `List` term.
    pub fn as_list(&self) -> Option<&[Term]> {
        match self {
            Term::List(items) => Some(items),
            _ => None,
        }
    }

    /// Rewrites every string leaf with `f`, leaving structure untouched.
    pub fn map_strings(&self, f: &mut impl FnMut(&str) -> String) -> Term {
        match self {
            Term::Appl { cons, args } => Term::Appl {
                cons: cons.clone(),
                args: args.iter().map(|a| a.map_strings(f)).collect(),
            },
            Term::List(items) => Term::List(items.iter().map(|t| t.map_strings(f)).collect()),
            Term::Tuple(items) => Term::Tuple(items.iter().map(|t| t.map_strings(f)).collect()),
            Term::Str(s) => Term::Str(f(s)),
            Term::Int(i) => Term::Int(*i),
        }
    }
}

fn write_seq(f: &mut fmt::Formatter<'_>, items: &[Term]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Appl { cons, args } => {
                write!(f, "{cons}(")?;
                write_seq(f, args)?;
                f.write_str(")")
            }
            Term::List(items) => {
                f.write_str("[")?;
                write_seq(f, items)?;
                f.write_str("]")
            }
            Term::Tuple(items) => {
                f.write_str("(")?;
                write_seq(f, items)?;
                f.write_str(")")
            }
            Term::Str(s) => {
                f.write_str("\"")?;
                for c in s.chars() {
                    match c {
                        '"' => f.write_str("\\\"")?,
                        '\\' => f.write_str("\\\\")?,
                        '\n' => f.write_str("\\n")?,
                        '\t' => f.write_str("\\t")?,
                        c => write!(f, "{c}")?,
                    }
                }
                f.write_str("\"")
            }
            Term::Int(i) => write!(f, "{i}"),
        }
    }
}
