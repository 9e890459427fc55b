//! # Syntax tree
//!
//! The tree handed to the compiler by an external parser. Every node carries
//! the [`Pos`] of its first character so compile and runtime errors can point
//! back at the source.
//!
//! The constructors at the bottom of this module build nodes without a
//! position; chain `.at(pos)` to attach one. Hosts that generate programs
//! directly (and the test suites) use them instead of a parser.

use crate::source::Pos;
use serde::{Deserialize, Serialize};

/// Operator tokens.
///
/// The discriminants are stable: the compiler encodes binary operators as
/// the operand of the `BinaryOp` instruction using these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Token {
    Add = 11,
    Sub = 12,
    Mul = 13,
    Quo = 14,
    Rem = 15,
    And = 16,
    Or = 17,
    Xor = 18,
    Shl = 19,
    Shr = 20,
    AndNot = 21,
    AddAssign = 22,
    SubAssign = 23,
    MulAssign = 24,
    QuoAssign = 25,
    RemAssign = 26,
    AndAssign = 27,
    OrAssign = 28,
    XorAssign = 29,
    ShlAssign = 30,
    ShrAssign = 31,
    AndNotAssign = 32,
    LAnd = 33,
    LOr = 34,
    Inc = 35,
    Dec = 36,
    Equal = 37,
    Less = 38,
    Greater = 39,
    Assign = 40,
    Not = 41,
    NotEqual = 42,
    LessEq = 43,
    GreaterEq = 44,
    Define = 45,
}

impl Token {
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a `BinaryOp` operand back into the operator token.
    pub fn from_code(code: u8) -> Option<Token> {
        use Token::*;
        let tok = match code {
            11 => Add,
            12 => Sub,
            13 => Mul,
            14 => Quo,
            15 => Rem,
            16 => And,
            17 => Or,
            18 => Xor,
            19 => Shl,
            20 => Shr,
            21 => AndNot,
            33 => LAnd,
            34 => LOr,
            37 => Equal,
            38 => Less,
            39 => Greater,
            41 => Not,
            42 => NotEqual,
            43 => LessEq,
            44 => GreaterEq,
            _ => return None,
        };
        Some(tok)
    }

    /// For a compound assignment (`+=` and friends), the binary operator it
    /// applies.
    pub fn assign_operator(self) -> Option<Token> {
        use Token::*;
        match self {
            AddAssign => Some(Add),
            SubAssign => Some(Sub),
            MulAssign => Some(Mul),
            QuoAssign => Some(Quo),
            RemAssign => Some(Rem),
            AndAssign => Some(And),
            OrAssign => Some(Or),
            XorAssign => Some(Xor),
            ShlAssign => Some(Shl),
            ShrAssign => Some(Shr),
            AndNotAssign => Some(AndNot),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        use Token::*;
        match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Quo => "/",
            Rem => "%",
            And => "&",
            Or => "|",
            Xor => "^",
            Shl => "<<",
            Shr => ">>",
            AndNot => "&^",
            AddAssign => "+=",
            SubAssign => "-=",
            MulAssign => "*=",
            QuoAssign => "/=",
            RemAssign => "%=",
            AndAssign => "&=",
            OrAssign => "|=",
            XorAssign => "^=",
            ShlAssign => "<<=",
            ShrAssign => ">>=",
            AndNotAssign => "&^=",
            LAnd => "&&",
            LOr => "||",
            Inc => "++",
            Dec => "--",
            Equal => "==",
            Less => "<",
            Greater => ">",
            Assign => "=",
            Not => "!",
            NotEqual => "!=",
            LessEq => "<=",
            GreaterEq => ">=",
            Define => ":=",
        }
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Expressions
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub pos: Pos,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprKind {
    Ident(String),
    Int(i64),
    Float(f64),
    Char(char),
    Str(String),
    Bool(bool),
    Undefined,
    Array(Vec<Expr>),
    /// Map literal; keys are plain names or string literals.
    Map(Vec<(String, Expr)>),
    Binary {
        op: Token,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `-x`, `!x`, `^x`, `+x`.
    Unary {
        op: Token,
        expr: Box<Expr>,
    },
    /// `cond ? then : other`
    Cond {
        cond: Box<Expr>,
        then: Box<Expr>,
        other: Box<Expr>,
    },
    Index {
        expr: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        expr: Box<Expr>,
        low: Option<Box<Expr>>,
        high: Option<Box<Expr>>,
    },
    /// `expr.name`; compiled as indexing with the string key.
    Selector {
        expr: Box<Expr>,
        name: String,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        /// Last argument is spread with `...`.
        ellipsis: bool,
    },
    Func(FuncLit),
    Import(String),
    /// `error(expr)`
    Error(Box<Expr>),
    /// `immutable(expr)`
    Immutable(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncLit {
    pub params: Vec<Ident>,
    /// The last parameter collects extra arguments into an array.
    pub variadic: bool,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ident {
    pub pos: Pos,
    pub name: String,
}

impl Ident {
    pub fn new(name: impl Into<String>) -> Self {
        Ident {
            pos: Pos::NONE,
            name: name.into(),
        }
    }

    pub fn at(mut self, pos: Pos) -> Self {
        self.pos = pos;
        self
    }
}

// =============================================================================
// Statements
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    pub pos: Pos,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StmtKind {
    Expr(Expr),
    /// `lhs op rhs` where `op` is `:=`, `=` or a compound assignment.
    Assign {
        lhs: Vec<Expr>,
        op: Token,
        rhs: Vec<Expr>,
    },
    /// `expr++` / `expr--`
    IncDec { expr: Expr, op: Token },
    Block(Block),
    If {
        init: Option<Box<Stmt>>,
        cond: Expr,
        body: Block,
        /// Either a `Block` or another `If` statement.
        other: Option<Box<Stmt>>,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        post: Option<Box<Stmt>>,
        body: Block,
    },
    ForIn {
        key: Ident,
        value: Option<Ident>,
        iterable: Expr,
        body: Block,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Export(Expr),
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub pos: Pos,
    pub stmts: Vec<Stmt>,
}

/// A whole source file: the unit the compiler and module loader work on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub stmts: Vec<Stmt>,
}

impl File {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        File { stmts }
    }
}

// =============================================================================
// Builders
// =============================================================================

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Expr {
            pos: Pos::NONE,
            kind,
        }
    }

    pub fn at(mut self, pos: Pos) -> Self {
        self.pos = pos;
        self
    }

    pub fn ident(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Ident(name.into()))
    }

    pub fn int(v: i64) -> Self {
        Self::new(ExprKind::Int(v))
    }

    pub fn float(v: f64) -> Self {
        Self::new(ExprKind::Float(v))
    }

    pub fn char(v: char) -> Self {
        Self::new(ExprKind::Char(v))
    }

    pub fn str(v: impl Into<String>) -> Self {
        Self::new(ExprKind::Str(v.into()))
    }

    pub fn bool(v: bool) -> Self {
        Self::new(ExprKind::Bool(v))
    }

    pub fn undefined() -> Self {
        Self::new(ExprKind::Undefined)
    }

    pub fn array(items: Vec<Expr>) -> Self {
        Self::new(ExprKind::Array(items))
    }

    pub fn map(entries: Vec<(&str, Expr)>) -> Self {
        Self::new(ExprKind::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        ))
    }

    pub fn binary(lhs: Expr, op: Token, rhs: Expr) -> Self {
        let pos = lhs.pos;
        Self::new(ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
        .at(pos)
    }

    pub fn unary(op: Token, expr: Expr) -> Self {
        Self::new(ExprKind::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    pub fn cond(cond: Expr, then: Expr, other: Expr) -> Self {
        let pos = cond.pos;
        Self::new(ExprKind::Cond {
            cond: Box::new(cond),
            then: Box::new(then),
            other: Box::new(other),
        })
        .at(pos)
    }

    pub fn index(expr: Expr, index: Expr) -> Self {
        let pos = expr.pos;
        Self::new(ExprKind::Index {
            expr: Box::new(expr),
            index: Box::new(index),
        })
        .at(pos)
    }

    pub fn slice(expr: Expr, low: Option<Expr>, high: Option<Expr>) -> Self {
        let pos = expr.pos;
        Self::new(ExprKind::Slice {
            expr: Box::new(expr),
            low: low.map(Box::new),
            high: high.map(Box::new),
        })
        .at(pos)
    }

    pub fn selector(expr: Expr, name: impl Into<String>) -> Self {
        let pos = expr.pos;
        Self::new(ExprKind::Selector {
            expr: Box::new(expr),
            name: name.into(),
        })
        .at(pos)
    }

    pub fn call(func: Expr, args: Vec<Expr>) -> Self {
        let pos = func.pos;
        Self::new(ExprKind::Call {
            func: Box::new(func),
            args,
            ellipsis: false,
        })
        .at(pos)
    }

    /// A call whose last argument is spread: `f(a, b...)`.
    pub fn call_spread(func: Expr, args: Vec<Expr>) -> Self {
        let pos = func.pos;
        Self::new(ExprKind::Call {
            func: Box::new(func),
            args,
            ellipsis: true,
        })
        .at(pos)
    }

    pub fn func(params: &[&str], body: Vec<Stmt>) -> Self {
        Self::new(ExprKind::Func(FuncLit {
            params: params.iter().map(|p| Ident::new(*p)).collect(),
            variadic: false,
            body: Block::new(body),
        }))
    }

    pub fn variadic_func(params: &[&str], body: Vec<Stmt>) -> Self {
        Self::new(ExprKind::Func(FuncLit {
            params: params.iter().map(|p| Ident::new(*p)).collect(),
            variadic: true,
            body: Block::new(body),
        }))
    }

    pub fn import(name: impl Into<String>) -> Self {
        Self::new(ExprKind::Import(name.into()))
    }

    pub fn error(expr: Expr) -> Self {
        Self::new(ExprKind::Error(Box::new(expr)))
    }

    pub fn immutable(expr: Expr) -> Self {
        Self::new(ExprKind::Immutable(Box::new(expr)))
    }
}

impl Block {
    pub fn new(stmts: Vec<Stmt>) -> Self {
        Block {
            pos: Pos::NONE,
            stmts,
        }
    }
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Stmt {
            pos: Pos::NONE,
            kind,
        }
    }

    pub fn at(mut self, pos: Pos) -> Self {
        self.pos = pos;
        self
    }

    pub fn expr(expr: Expr) -> Self {
        let pos = expr.pos;
        Self::new(StmtKind::Expr(expr)).at(pos)
    }

    /// `name := value`
    pub fn define(name: &str, value: Expr) -> Self {
        Self::assign_op(Expr::ident(name), Token::Define, value)
    }

    /// `target = value`
    pub fn assign(target: Expr, value: Expr) -> Self {
        Self::assign_op(target, Token::Assign, value)
    }

    pub fn assign_op(target: Expr, op: Token, value: Expr) -> Self {
        let pos = target.pos;
        Self::new(StmtKind::Assign {
            lhs: vec![target],
            op,
            rhs: vec![value],
        })
        .at(pos)
    }

    pub fn inc(target: Expr) -> Self {
        let pos = target.pos;
        Self::new(StmtKind::IncDec {
            expr: target,
            op: Token::Inc,
        })
        .at(pos)
    }

    pub fn dec(target: Expr) -> Self {
        let pos = target.pos;
        Self::new(StmtKind::IncDec {
            expr: target,
            op: Token::Dec,
        })
        .at(pos)
    }

    pub fn block(stmts: Vec<Stmt>) -> Self {
        Self::new(StmtKind::Block(Block::new(stmts)))
    }

    pub fn if_(cond: Expr, body: Vec<Stmt>) -> Self {
        Self::new(StmtKind::If {
            init: None,
            cond,
            body: Block::new(body),
            other: None,
        })
    }

    pub fn if_else(cond: Expr, body: Vec<Stmt>, other: Vec<Stmt>) -> Self {
        Self::new(StmtKind::If {
            init: None,
            cond,
            body: Block::new(body),
            other: Some(Box::new(Stmt::block(other))),
        })
    }

    pub fn for_(
        init: Option<Stmt>,
        cond: Option<Expr>,
        post: Option<Stmt>,
        body: Vec<Stmt>,
    ) -> Self {
        Self::new(StmtKind::For {
            init: init.map(Box::new),
            cond,
            post: post.map(Box::new),
            body: Block::new(body),
        })
    }

    pub fn for_in(key: &str, value: Option<&str>, iterable: Expr, body: Vec<Stmt>) -> Self {
        Self::new(StmtKind::ForIn {
            key: Ident::new(key),
            value: value.map(Ident::new),
            iterable,
            body: Block::new(body),
        })
    }

    pub fn ret(value: Option<Expr>) -> Self {
        Self::new(StmtKind::Return(value))
    }

    pub fn export(value: Expr) -> Self {
        Self::new(StmtKind::Export(value))
    }

    pub fn brk() -> Self {
        Self::new(StmtKind::Break)
    }

    pub fn cont() -> Self {
        Self::new(StmtKind::Continue)
    }
}
