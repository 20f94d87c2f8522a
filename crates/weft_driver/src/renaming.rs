//! Renamings applied to declarations after an aliased or transformed import.

use serde::{Deserialize, Serialize};
use weft_common::Term;

/// Renames references to `from` (optionally qualified by `qualifiers`) to `to`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Renaming {
    /// Namespace segments a qualified reference must carry.
    pub qualifiers: Vec<String>,
    /// The old name.
    pub from: String,
    /// The new name.
    pub to: String,
}

impl Renaming {
    /// An unqualified renaming.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            qualifiers: Vec::new(),
            from: from.into(),
            to: to.into(),
        }
    }

    /// Renames the module at `from_module` to the last segment of `to_module`.
    ///
    /// `-` in the last segments becomes `$`, the character generated names use.
    pub fn from_paths(from_module: &str, to_module: &str) -> Self {
        let (qualifiers, from) = match from_module.rsplit_once('/') {
            Some((dir, last)) => (dir.split('/').map(str::to_string).collect(), last),
            None => (Vec::new(), from_module),
        };
        let to = to_module.rsplit('/').next().unwrap_or(to_module);
        Self {
            qualifiers,
            from: from.replace('-', "$"),
            to: to.replace('-', "$"),
        }
    }

    /// Renames `name` if it refers to this renaming's source.
    pub fn rename(&self, name: &str) -> Option<String> {
        if name == self.from {
            return Some(self.to.clone());
        }
        if self.qualifiers.is_empty() {
            return None;
        }
        let prefix = self.qualifiers.join("/");
        match name.strip_prefix(&prefix).and_then(|rest| rest.strip_prefix('/')) {
            Some(rest) if rest == self.from => Some(format!("{prefix}/{}", self.to)),
            _ => None,
        }
    }

    /// Applies the first matching renaming, most recent first.
    pub fn rename_all(renamings: &[Renaming], name: &str) -> String {
        renamings
            .iter()
            .find_map(|r| r.rename(name))
            .unwrap_or_else(|| name.to_string())
    }

    /// Encodes renamings as the argument of the renaming rule:
    /// a list of `([qualifier, ...], from, to)` tuples.
    pub fn table_term(renamings: &[Renaming]) -> Term {
        Term::List(
            renamings
                .iter()
                .map(|r| {
                    Term::Tuple(vec![
                        Term::List(r.qualifiers.iter().map(Term::string).collect()),
                        Term::string(&r.from),
                        Term::string(&r.to),
                    ])
                })
                .collect(),
        )
    }

    /// Decodes a table produced by [`table_term`](Self::table_term).
    pub fn from_table_term(term: &Term) -> Option<Vec<Renaming>> {
        term.as_list()?
            .iter()
            .map(|entry| {
                let qualifiers = entry
                    .arg(0)?
                    .as_list()?
                    .iter()
                    .map(|q| q.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()?;
                Some(Renaming {
                    qualifiers,
                    from: entry.arg(1)?.as_str()?.to_string(),
                    to: entry.arg(2)?.as_str()?.to_string(),
                })
            })
            .collect()
    }
}

/// Module path of the model produced by applying `transformation` to `model`.
pub fn transformed_model_module(model: &str, transformation: &str) -> String {
    format!("{model}__{}", transformation.replace('/', "_"))
}

/// Entry rule name of the transformation module `module`.
pub fn transformation_rule(module: &str) -> String {
    format!("main-{}", module.replace('/', "_"))
}

/// Replaces whole-identifier occurrences of `old` in `body` with `new`.
///
/// Identifier characters are alphanumerics, `_`, `-` and `$`.
pub fn rename_rule(body: &str, old: &str, new: &str) -> String {
    fn is_ident(c: char) -> bool {
        c.is_alphanumeric() || matches!(c, '_' | '-' | '$')
    }

    let mut out = String::with_capacity(body.len());
    let mut rest = body;
    while let Some(pos) = rest.find(old) {
        let before = rest[..pos].chars().next_back();
        let after = rest[pos + old.len()..].chars().next();
        out.push_str(&rest[..pos]);
        if before.is_some_and(is_ident) || after.is_some_and(is_ident) {
            out.push_str(old);
        } else {
            out.push_str(new);
        }
        rest = &rest[pos + old.len()..];
    }
    out.push_str(rest);
    out
}
