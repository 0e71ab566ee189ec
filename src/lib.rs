//! Callisto is a small stack-oriented programming language. This crate is its
//! toolchain: a lexer, a recursive-descent parser producing a closed-variant
//! AST, and a backend-agnostic lowering pass that turns the AST into target
//! assembly. [`lower::uxn::UxnBackend`] is the reference target, emitting
//! Uxntal for Devine Lu Linvega's UXN virtual machine.
//!
//! # Pipeline
//!
//! ```no_run
//! use callisto::{lexer, parser, lower, span::Code};
//! use callisto::lower::uxn::UxnBackend;
//!
//! let source = b"func main begin 1 2 end".to_vec();
//! let code = Code::new("main.cal", &source[..]);
//! let tokens = lexer::tokenize(&code)?;
//! let ast = parser::parse(&tokens)?;
//! let mut backend = UxnBackend::new();
//! let assembly = lower::lower(&mut backend, &ast)?;
//! # Ok::<(), callisto::error::CallistoError>(())
//! ```

pub mod ast;
pub mod error;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod policy;
pub mod span;
pub mod token;

pub use ast::{AstKind, AstNode};
pub use error::CallistoError;
pub use span::{Code, Position, Span};
pub use token::{Token, TokenKind};

/// Run the full tokenize -> parse -> lower pipeline against `backend`.
#[tracing::instrument(skip(code, backend))]
pub fn compile<B: lower::Backend>(code: &Code, backend: &mut B) -> Result<String, CallistoError> {
    let tokens = lexer::tokenize(code)?;
    let ast = parser::parse(&tokens)?;
    let assembly = lower::lower(backend, &ast)?;
    Ok(assembly)
}
