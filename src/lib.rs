// Pseudo-code language engine
//
// A parse-and-repair front end that always produces a runnable tree, and a
// tree-walking evaluator over a single base-pointer-addressed runtime stack.

pub mod ast;
pub mod builtins;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod host;
pub mod lexer;
mod native_stack;
pub mod parser;
pub mod runner;
pub mod stack;
pub mod symbols;
pub mod value;

// Re-export commonly used items
pub use ast::{Expr, Program, Stmt};
pub use config::EngineConfig;
pub use error::{Diagnostic, DiagnosticKind, Span};
pub use evaluator::{run, Flow, Interpreter, Outcome};
pub use host::{BufferHost, ConsoleHost, Host, StopHandle};
pub use lexer::{Lexer, Token, TokenType};
pub use parser::Parser;
pub use value::Value;

/// Lex and parse `source`. A program is always produced; lexical and
/// syntax problems come back together, in source order.
pub fn parse(source: &str) -> (Program, Vec<Diagnostic>) {
    let (tokens, mut diagnostics) = Lexer::new(source).scan_tokens();
    let (program, parse_diagnostics) = Parser::new(tokens).parse();
    diagnostics.extend(parse_diagnostics);
    diagnostics.sort_by_key(|diagnostic| diagnostic.span.start);
    (program, diagnostics)
}
