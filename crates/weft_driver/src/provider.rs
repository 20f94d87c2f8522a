//! Sources of top-level declarations: source text parsed one declaration at a
//! time, or the declaration list of a model.

use weft_common::{InternalError, Term};

use crate::error::DriverError;
use crate::toolchain::ParsedDeclaration;

/// Parses one declaration off the front of some input with the current grammar.
pub trait DeclParser {
    /// Parses the next declaration of `input`.
    fn parse_next(&mut self, input: &str, recovery: bool) -> Result<ParsedDeclaration, DriverError>;
}

/// Hands out a unit's top-level declarations one at a time.
pub trait DeclarationProvider: Send {
    /// Returns `true` while declarations remain.
    fn has_next(&self) -> bool;

    /// Fetches the next declaration.
    ///
    /// A `lookahead` fetch may be undone with [`retract`](Self::retract); it
    /// disables error recovery so that a failed lookahead leaves no errors behind.
    fn next(
        &mut self,
        parser: &mut dyn DeclParser,
        recovery: bool,
        lookahead: bool,
    ) -> Result<ParsedDeclaration, DriverError>;

    /// Pushes back the most recently fetched declaration.
    fn retract(&mut self, term: &Term) -> Result<(), DriverError>;

    /// Where the first declaration starts.
    fn start_marker(&self) -> usize;
}

/// Provides declarations by parsing source text incrementally, so that each
/// declaration is parsed with the grammar in effect after the previous ones.
pub struct SourceDeclarationProvider {
    input: String,
    offset: usize,
    history: Vec<(usize, Term)>,
}

impl SourceDeclarationProvider {
    /// Creates a provider over `input`.
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            offset: 0,
            history: Vec::new(),
        }
    }
}

impl DeclarationProvider for SourceDeclarationProvider {
    fn has_next(&self) -> bool {
        !self.input[self.offset..].trim().is_empty()
    }

    fn next(
        &mut self,
        parser: &mut dyn DeclParser,
        recovery: bool,
        lookahead: bool,
    ) -> Result<ParsedDeclaration, DriverError> {
        let rest = &self.input[self.offset..];
        let parsed = parser.parse_next(rest, recovery && !lookahead)?;
        if parsed.consumed == 0 || parsed.consumed > rest.len() || !rest.is_char_boundary(parsed.consumed) {
            return Err(InternalError::new(format!(
                "parser consumed {} of {} remaining bytes",
                parsed.consumed,
                rest.len()
            ))
            .into());
        }
        self.history.push((self.offset, parsed.term.clone()));
        self.offset += parsed.consumed;
        Ok(parsed)
    }

    fn retract(&mut self, term: &Term) -> Result<(), DriverError> {
        match self.history.pop() {
            Some((offset, last)) if &last == term => {
                self.offset = offset;
                Ok(())
            }
            _ => Err(InternalError::new("retracted a declaration that was not the last one fetched").into()),
        }
    }

    fn start_marker(&self) -> usize {
        self.input.len() - self.input.trim_start().len()
    }
}

/// Replays the declarations of a model term.
pub struct TermDeclarationProvider {
    terms: Vec<Term>,
    index: usize,
}

impl TermDeclarationProvider {
    /// Unpacks `CompilationUnit([decl, ...])`, a bare list, or a single declaration.
    pub fn new(model: Term) -> Self {
        let terms = match model {
            Term::Appl { cons, mut args } if cons == "CompilationUnit" && args.len() == 1 => {
                match args.remove(0) {
                    Term::List(decls) => decls,
                    other => vec![other],
                }
            }
            Term::List(decls) => decls,
            other => vec![other],
        };
        Self { terms, index: 0 }
    }
}

impl DeclarationProvider for TermDeclarationProvider {
    fn has_next(&self) -> bool {
        self.index < self.terms.len()
    }

    fn next(
        &mut self,
        _parser: &mut dyn DeclParser,
        _recovery: bool,
        _lookahead: bool,
    ) -> Result<ParsedDeclaration, DriverError> {
        let term = self
            .terms
            .get(self.index)
            .cloned()
            .ok_or_else(|| InternalError::new("no declarations left in model"))?;
        self.index += 1;
        Ok(ParsedDeclaration {
            term,
            consumed: 1,
            errors: Vec::new(),
        })
    }

    fn retract(&mut self, term: &Term) -> Result<(), DriverError> {
        match self.index.checked_sub(1) {
            Some(prev) if &self.terms[prev] == term => {
                self.index = prev;
                Ok(())
            }
            _ => Err(InternalError::new("retracted a declaration that was not the last one fetched").into()),
        }
    }

    fn start_marker(&self) -> usize {
        0
    }
}
