use crate::source::SourceFilePos;
use thiserror::Error;

/// An error that aborted a run.
///
/// `pos` is the position of the faulting instruction; `call_stack` holds the
/// call sites of the frames below it, innermost first.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Runtime Error: {message}{}", locations(.pos, .call_stack))]
pub struct RuntimeError {
    pub message: String,
    pub pos: Option<SourceFilePos>,
    pub call_stack: Vec<SourceFilePos>,
}

fn locations(pos: &Option<SourceFilePos>, call_stack: &[SourceFilePos]) -> String {
    pos.iter()
        .chain(call_stack)
        .map(|p| format!("\n\tat {}", p))
        .collect()
}

impl RuntimeError {
    pub fn new(msg: impl Into<String>) -> Self {
        RuntimeError {
            message: msg.into(),
            pos: None,
            call_stack: Vec::new(),
        }
    }

    pub fn with_pos(mut self, pos: SourceFilePos) -> Self {
        self.pos = Some(pos);
        self
    }

    /// Record the call site of one more caller frame.
    pub fn with_context(mut self, pos: SourceFilePos) -> Self {
        self.call_stack.push(pos);
        self
    }
}

pub fn stack_overflow() -> RuntimeError {
    RuntimeError::new("stack overflow")
}

pub fn stack_underflow() -> RuntimeError {
    RuntimeError::new("stack underflow")
}

pub fn wrong_num_arguments(want: usize, variadic: bool, got: usize) -> RuntimeError {
    let op = if variadic { ">=" } else { "=" };
    RuntimeError::new(format!(
        "wrong number of arguments: want{}{}, got={}",
        op, want, got
    ))
}

pub fn invalid_operation(lhs: &str, op: &str, rhs: &str) -> RuntimeError {
    RuntimeError::new(format!("invalid operation: {} {} {}", lhs, op, rhs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(line: usize, column: usize) -> SourceFilePos {
        SourceFilePos {
            filename: "main".to_string(),
            offset: 0,
            line,
            column,
        }
    }

    #[test]
    fn test_display_without_position() {
        let err = RuntimeError::new("division by zero");
        assert_eq!(err.to_string(), "Runtime Error: division by zero");
    }

    #[test]
    fn test_display_lists_fault_then_callers() {
        let err = RuntimeError::new("not callable: int")
            .with_pos(pos(3, 5))
            .with_context(pos(7, 1))
            .with_context(pos(9, 2));
        assert_eq!(
            err.to_string(),
            "Runtime Error: not callable: int\n\tat main:3:5\n\tat main:7:1\n\tat main:9:2"
        );
    }

    #[test]
    fn test_argument_count_messages() {
        assert_eq!(
            wrong_num_arguments(2, false, 1).message,
            "wrong number of arguments: want=2, got=1"
        );
        assert_eq!(
            wrong_num_arguments(1, true, 0).message,
            "wrong number of arguments: want>=1, got=0"
        );
    }
}
