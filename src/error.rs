use crate::span::Span;
use thiserror::Error;

/// Failures raised while splitting source bytes into a token stream.
#[derive(Debug, Error)]
pub enum LexError {
    #[error("{0}: unterminated string literal")]
    UnterminatedString(Span),
    #[error("{0}: invalid numeric literal '{1}'")]
    InvalidNumber(Span, String),
    #[error("{0}: unexpected byte '{1}'")]
    UnexpectedByte(Span, char),
}

/// Failures raised while turning a token stream into an AST.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{span}: Unexpected {kind}")]
    UnexpectedToken { span: Span, kind: String },
    #[error("{span}: Unexpected EOF while parsing {production}")]
    UnexpectedEof { span: Span, production: String },
    #[error("{0}: nested function definitions are not allowed")]
    NestedFuncDef(Span),
    #[error("{0}: nested implement blocks are not allowed")]
    NestedImplement(Span),
}

/// Failures raised while lowering an AST to a backend.
#[derive(Debug, Error)]
pub enum LowerError {
    #[error("{0}: undefined identifier '{1}'")]
    UndefinedIdentifier(Span, String),
    #[error("{0}: undefined type '{1}'")]
    UndefinedType(Span, String),
    #[error("{0}: '{1}' is already defined")]
    NameCollision(Span, String),
    #[error("{0}: '{1}' is a reserved word")]
    ReservedName(Span, String),
    #[error("{0}: invalid attribute '{1}'")]
    InvalidAttribute(Span, String),
    #[error("{0}: a struct value cannot be used where a scalar is required")]
    StructAsScalar(Span),
    #[error("{0}: a struct cannot be used as a function parameter")]
    StructAsParameter(Span),
    #[error("{0}: integer literal {1} exceeds the backend's maximum of {2}")]
    IntegerOverflow(Span, i64, i64),
    #[error("{0}: array elements must be integer or word literals")]
    IllegalArrayElement(Span),
    #[error("{0}: 'break' used outside of a loop")]
    BreakOutsideLoop(Span),
    #[error("{0}: 'continue' used outside of a loop")]
    ContinueOutsideLoop(Span),
    #[error("{0}: 'return' used outside of a function")]
    ReturnOutsideFunction(Span),
    #[error("{0}: extern kind '{1}' is not supported by this backend")]
    UnsupportedExternKind(Span, String),
    #[error("{0}: '{1}' already has an '{2}' method")]
    DuplicateInitOrDeinit(Span, String, String),
    #[error("{0}: union '{1}' already has a member of type '{2}'")]
    DuplicateUnionMember(Span, String, String),
    #[error("{0}: cannot load a value of size {1} bytes")]
    InvalidSizeLoad(Span, usize),
    #[error("{0}: local arrays must have a length greater than zero")]
    ZeroLengthArray(Span),
}

/// Top-level error type returned by the public [`tokenize`](crate::lexer::tokenize),
/// [`parse`](crate::parser::parse) and [`lower`](crate::lower::lower) entry points.
#[derive(Debug, Error)]
pub enum CallistoError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Lower(#[from] LowerError),
}

impl CallistoError {
    /// The span the error is anchored to, for the `<file>:<line>:<col>: error: <message>` rendering.
    pub fn span(&self) -> &Span {
        match self {
            CallistoError::Lex(e) => match e {
                LexError::UnterminatedString(s) => s,
                LexError::InvalidNumber(s, _) => s,
                LexError::UnexpectedByte(s, _) => s,
            },
            CallistoError::Parse(e) => match e {
                ParseError::UnexpectedToken { span, .. } => span,
                ParseError::UnexpectedEof { span, .. } => span,
                ParseError::NestedFuncDef(s) => s,
                ParseError::NestedImplement(s) => s,
            },
            CallistoError::Lower(e) => match e {
                LowerError::UndefinedIdentifier(s, _)
                | LowerError::UndefinedType(s, _)
                | LowerError::NameCollision(s, _)
                | LowerError::ReservedName(s, _)
                | LowerError::InvalidAttribute(s, _)
                | LowerError::StructAsScalar(s)
                | LowerError::StructAsParameter(s)
                | LowerError::IntegerOverflow(s, _, _)
                | LowerError::IllegalArrayElement(s)
                | LowerError::BreakOutsideLoop(s)
                | LowerError::ContinueOutsideLoop(s)
                | LowerError::ReturnOutsideFunction(s)
                | LowerError::UnsupportedExternKind(s, _)
                | LowerError::DuplicateInitOrDeinit(s, _, _)
                | LowerError::DuplicateUnionMember(s, _, _)
                | LowerError::InvalidSizeLoad(s, _)
                | LowerError::ZeroLengthArray(s) => s,
            },
        }
    }
}
