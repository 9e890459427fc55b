use crate::source::SourceFilePos;
use thiserror::Error;

/// A compile error with the position of the node that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Compile Error: {message}\n\tat {pos}")]
pub struct CompileError {
    pub message: String,
    pub pos: SourceFilePos,
}

impl CompileError {
    pub fn new(message: impl Into<String>, pos: SourceFilePos) -> Self {
        CompileError {
            message: message.into(),
            pos,
        }
    }

    pub fn redeclared(name: &str, pos: SourceFilePos) -> Self {
        Self::new(format!("'{}' redeclared in this block", name), pos)
    }

    pub fn unresolved(name: &str, pos: SourceFilePos) -> Self {
        Self::new(format!("unresolved reference '{}'", name), pos)
    }

    pub fn module_not_found(name: &str, pos: SourceFilePos) -> Self {
        Self::new(format!("module '{}' not found", name), pos)
    }

    pub fn cyclic_import(name: &str, pos: SourceFilePos) -> Self {
        Self::new(format!("cyclic module import: {}", name), pos)
    }

    /// An operand that does not fit its instruction slot.
    pub fn limit(what: &str, max: usize, pos: SourceFilePos) -> Self {
        Self::new(format!("too many {} (max {})", what, max), pos)
    }
}

/// All errors collected while compiling one program, in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{}", summary(.0))]
pub struct ErrorList(pub Vec<CompileError>);

impl ErrorList {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&CompileError> {
        self.0.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompileError> {
        self.0.iter()
    }
}

fn summary(errors: &[CompileError]) -> String {
    match errors {
        [] => "no errors".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{} (and {} more errors)", first, rest.len()),
    }
}

impl From<CompileError> for ErrorList {
    fn from(err: CompileError) -> Self {
        ErrorList(vec![err])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(line: usize, column: usize) -> SourceFilePos {
        SourceFilePos {
            filename: "test".to_string(),
            offset: 0,
            line,
            column,
        }
    }

    #[test]
    fn test_display_includes_position() {
        let err = CompileError::redeclared("a", pos(1, 6));
        assert_eq!(
            err.to_string(),
            "Compile Error: 'a' redeclared in this block\n\tat test:1:6"
        );
    }

    #[test]
    fn test_error_list_summary() {
        let list = ErrorList(vec![
            CompileError::unresolved("a", pos(1, 1)),
            CompileError::unresolved("b", pos(2, 1)),
            CompileError::unresolved("c", pos(3, 1)),
        ]);
        assert_eq!(
            list.to_string(),
            "Compile Error: unresolved reference 'a'\n\tat test:1:1 (and 2 more errors)"
        );
    }

    #[test]
    fn test_error_list_as_std_error() {
        let single: Box<dyn std::error::Error> =
            Box::new(ErrorList::from(CompileError::module_not_found("m", pos(4, 2))));
        assert_eq!(single.to_string(), "Compile Error: module 'm' not found\n\tat test:4:2");
        assert_eq!(ErrorList::default().to_string(), "no errors");
    }
}
