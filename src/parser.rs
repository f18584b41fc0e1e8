//! Recursive-descent parser with repair.
//!
//! Parsing never stops at the first problem. Every problem becomes a
//! [`Diagnostic`]. Where the intent is obvious the tree is repaired (a
//! missing `Then`, `=` written where `==` was meant); otherwise the
//! statement is dropped and parsing resumes on the next source line.
//!
//! Names are bound to symbols while parsing, so the tree handed to the
//! evaluator carries variable ids and stack offsets, never raw names.
//! Calls and class names may refer forward; they are checked once the whole
//! source has been read.

mod declaration;
mod expression;
mod statement;

use crate::ast::{ClassDef, Program, Routine, Stmt};
use crate::builtins;
use crate::error::{Diagnostic, Span};
use crate::lexer::{Token, TokenType};
use crate::symbols::{ClassId, CompileContext, RoutineId, Storage};
use std::collections::HashMap;
use tracing::debug;

/// A statement could not be parsed; its diagnostic is already recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reported;

type ParseResult<T> = Result<T, Reported>;

/// Constructs that are closed by a matching `End ...` (or `Loop ...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    If,
    Select,
    While,
    Do,
    For,
    Module,
    Function,
    Class,
}

impl BlockKind {
    fn name(self) -> &'static str {
        match self {
            BlockKind::If => "If",
            BlockKind::Select => "Select",
            BlockKind::While => "While",
            BlockKind::Do => "Do",
            BlockKind::For => "For",
            BlockKind::Module => "Module",
            BlockKind::Function => "Function",
            BlockKind::Class => "Class",
        }
    }

    /// Keyword written after `End`. `Do` is closed by `Loop` instead.
    fn end_keyword(self) -> Option<TokenType> {
        match self {
            BlockKind::If => Some(TokenType::If),
            BlockKind::Select => Some(TokenType::Select),
            BlockKind::While => Some(TokenType::While),
            BlockKind::Do => None,
            BlockKind::For => Some(TokenType::For),
            BlockKind::Module => Some(TokenType::Module),
            BlockKind::Function => Some(TokenType::Function),
            BlockKind::Class => Some(TokenType::Class),
        }
    }

    /// Tokens other than `End` that finish a body of this construct.
    fn terminators(self) -> &'static [TokenType] {
        match self {
            BlockKind::If => &[TokenType::Else],
            BlockKind::Select => &[TokenType::Case, TokenType::Default],
            BlockKind::Do => &[TokenType::Loop],
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CallTarget {
    /// Call by name from inside `class` (if any).
    Routine(Option<ClassId>),
    /// `New Class(...)`.
    Constructor,
    /// `object.name(...)` on a variable of the named class.
    Method(String),
}

/// A call whose target may be defined later in the source.
#[derive(Debug, Clone)]
struct PendingCall {
    name: String,
    target: CallTarget,
    /// For each argument: whether it denotes storage, and where it is.
    args: Vec<(bool, Span)>,
    span: Span,
}

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    diagnostics: Vec<Diagnostic>,
    ctx: CompileContext,
    routines: Vec<Routine>,
    classes: Vec<ClassDef>,
    routine_index: HashMap<String, RoutineId>,
    class_index: HashMap<String, ClassId>,
    /// Constructs whose bodies are being parsed, innermost last. Reset for
    /// each routine and class body.
    open_blocks: Vec<BlockKind>,
    loop_depth: usize,
    /// Inside an `If`/`While`/`Loop` test, where `=` is read as `==`.
    in_condition: bool,
    pending_types: Vec<(String, Span)>,
    pending_calls: Vec<PendingCall>,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last().map(|t| t.token_type) != Some(TokenType::Eof) {
            let end = tokens.last().map(|t| t.span).unwrap_or_default();
            tokens.push(Token::new(
                TokenType::Eof,
                String::new(),
                Span::new(end.end, end.end, end.line.max(1)),
            ));
        }

        Self {
            tokens,
            current: 0,
            diagnostics: Vec::new(),
            ctx: CompileContext::new(),
            routines: Vec::new(),
            classes: Vec::new(),
            routine_index: HashMap::new(),
            class_index: HashMap::new(),
            open_blocks: Vec::new(),
            loop_depth: 0,
            in_condition: false,
            pending_types: Vec::new(),
            pending_calls: Vec::new(),
        }
    }

    /// Parse the whole token stream. Always produces a program; it is only
    /// safe to run when no returned diagnostic is an error.
    pub fn parse(mut self) -> (Program, Vec<Diagnostic>) {
        let mut statements = Vec::new();

        while !self.is_at_end() {
            let token_type = self.peek().token_type;
            match token_type {
                TokenType::Module | TokenType::Function => self.routine_definition(),
                TokenType::Class => self.class_definition(),
                TokenType::Public | TokenType::Private => {
                    let token = self.advance().clone();
                    self.report(Diagnostic::syntax_error_with_help(
                        token.span,
                        format!("'{}' is only allowed on class members", token.lexeme),
                        "Remove it, or move the declaration inside a Class.".to_string(),
                    ));
                }
                _ => {
                    if let Some(stmt) = self.statement() {
                        statements.push(stmt);
                    }
                }
            }
        }

        self.resolve();
        self.diagnostics.sort_by_key(|d| d.span.start);

        debug!(
            statements = statements.len(),
            routines = self.routines.len(),
            classes = self.classes.len(),
            diagnostics = self.diagnostics.len(),
            "parsed program"
        );

        let program = Program {
            statements,
            routines: self.routines,
            classes: self.classes,
            symbols: self.ctx.into_symbols(),
            routine_index: self.routine_index,
            class_index: self.class_index,
        };
        (program, self.diagnostics)
    }

    /// Checks that need the whole program: class names used as types, and
    /// calls to routines that may be defined after the call.
    fn resolve(&mut self) {
        for (name, span) in std::mem::take(&mut self.pending_types) {
            if !self.class_index.contains_key(&name) {
                self.report(Diagnostic::semantic_error_with_help(
                    span,
                    format!("Undefined type '{}'", name),
                    format!(
                        "Define it with 'Class {}' ... 'End Class', or use a built-in type such as Integer or String.",
                        name
                    ),
                ));
            }
        }

        for call in std::mem::take(&mut self.pending_calls) {
            match call.target {
                CallTarget::Constructor => {
                    let Some(class) = self.class_index.get(&call.name).copied() else {
                        // Reported as an undefined type.
                        continue;
                    };
                    match self.classes[class].constructor {
                        Some(id) => self.check_arguments(id, &call),
                        None if !call.args.is_empty() => {
                            self.report(Diagnostic::semantic_error_with_help(
                                call.span,
                                format!("Class '{}' has no constructor that takes arguments", call.name),
                                format!("Add 'Module {}(...)' inside the class.", call.name),
                            ));
                        }
                        None => {}
                    }
                }
                CallTarget::Method(ref class_name) => {
                    let Some(class) = self.class_index.get(class_name).copied() else {
                        // Reported as an undefined type.
                        continue;
                    };
                    match self.classes[class].methods.get(&call.name).copied() {
                        Some(id) => self.check_arguments(id, &call),
                        None => {
                            self.report(Diagnostic::semantic_error(
                                call.span,
                                format!("Class '{}' has no method '{}'", class_name, call.name),
                            ));
                        }
                    }
                }
                CallTarget::Routine(class) => {
                    let routine = class
                        .and_then(|c| self.classes[c].methods.get(&call.name).copied())
                        .or_else(|| self.routine_index.get(&call.name).copied());

                    match routine {
                        Some(id) => self.check_arguments(id, &call),
                        None => match builtins::arity(&call.name) {
                            Some(arity) if arity != call.args.len() => {
                                self.report(Diagnostic::semantic_error(
                                    call.span,
                                    format!(
                                        "'{}' expects {} argument(s) but {} were given",
                                        call.name,
                                        arity,
                                        call.args.len()
                                    ),
                                ));
                            }
                            Some(_) => {}
                            None => {
                                self.report(
                                    Diagnostic::semantic_error_with_help(
                                        call.span,
                                        format!("'{}' is not defined in this program", call.name),
                                        "It must be supplied by the host application when the program runs."
                                            .to_string(),
                                    )
                                    .warning(),
                                );
                            }
                        },
                    }
                }
            }
        }

        if let Some(main) = self.routine_index.get("main").copied() {
            let routine = &self.routines[main];
            if !routine.params.is_empty() {
                let span = routine.span;
                self.report(Diagnostic::semantic_error_with_help(
                    span,
                    "'main' cannot take parameters".to_string(),
                    "The program calls main() with no arguments. Write: Module main()".to_string(),
                ));
            }
        }
    }

    fn check_arguments(&mut self, id: RoutineId, call: &PendingCall) {
        let params = self.routines[id].params.clone();
        if params.len() != call.args.len() {
            let signature = format!("{}{}", call.name, self.signature_of(id));
            self.report(Diagnostic::semantic_error_with_help(
                call.span,
                format!(
                    "'{}' expects {} argument(s) but {} were given",
                    call.name,
                    params.len(),
                    call.args.len()
                ),
                format!("It is declared as {}", signature),
            ));
            return;
        }

        for (position, (param, (is_place, span))) in params.iter().zip(&call.args).enumerate() {
            let var = self.ctx.symbols.variable(*param);
            if var.storage == Storage::RefArgument && !*is_place {
                let name = var.name.clone();
                self.report(Diagnostic::semantic_error_with_help(
                    *span,
                    format!(
                        "Argument {} of '{}' must be a variable because parameter '{}' is 'Ref'",
                        position + 1,
                        call.name,
                        name
                    ),
                    "Store the value in a variable first and pass the variable.".to_string(),
                ));
            }
        }
    }

    fn signature_of(&self, id: RoutineId) -> String {
        let params: Vec<String> = self.routines[id]
            .params
            .iter()
            .map(|param| {
                let var = self.ctx.symbols.variable(*param);
                let by_ref = if var.storage == Storage::RefArgument { " Ref" } else { "" };
                format!("{}{} {}{}", var.ty, by_ref, var.name, "[]".repeat(var.rank))
            })
            .collect();
        format!("({})", params.join(", "))
    }

    /// Statements up to (not including) the `End`, `Else`, `Case` or `Loop`
    /// that closes the innermost open construct. Opens a nested scope.
    fn block(&mut self) -> crate::ast::Block {
        let start = self.peek().span;
        self.ctx.push_scope();
        let mut statements = Vec::new();

        while !self.is_at_end() {
            let token_type = self.peek().token_type;
            if token_type == TokenType::End || self.closes_open_block(token_type) {
                break;
            }
            match token_type {
                TokenType::Module | TokenType::Function => self.routine_definition(),
                TokenType::Class => self.class_definition(),
                _ => {
                    if let Some(stmt) = self.statement() {
                        statements.push(stmt);
                    }
                }
            }
        }

        self.ctx.pop_scope();
        let end = statements.last().map(|s: &Stmt| *s.span()).unwrap_or(start);
        crate::ast::Block {
            statements,
            span: start.to(&end),
        }
    }

    fn closes_open_block(&self, token_type: TokenType) -> bool {
        self.open_blocks
            .iter()
            .any(|kind| kind.terminators().contains(&token_type))
    }

    /// Consume `End <kind>` for the construct opened by `opener`.
    ///
    /// A missing `End` is reported against the opener. An `End` that closes
    /// an enclosing construct is left in place for it.
    fn expect_end(&mut self, kind: BlockKind, opener: &Token) {
        let Some(keyword) = kind.end_keyword() else {
            return;
        };
        let expected = format!("End {}", kind.name());

        if !self.check(&TokenType::End) {
            self.report(Diagnostic::syntax_error_with_help(
                opener.span,
                format!("Missing '{}' for the {} on line {}", expected, kind.name(), opener.line()),
                format!("Close it with '{}'.", expected),
            ));
            return;
        }

        let end_token = self.peek().clone();
        let next = self.peek_at(1).clone();
        let same_line = next.token_type != TokenType::Eof && next.line() == end_token.line();

        if same_line && next.token_type == keyword {
            self.advance();
            self.advance();
            self.end_of_statement();
            return;
        }

        let closes_outer = same_line
            && self
                .open_blocks
                .iter()
                .rev()
                .skip(1)
                .any(|outer| outer.end_keyword() == Some(next.token_type));

        if closes_outer {
            self.report(Diagnostic::syntax_error_with_help(
                end_token.span,
                format!("Missing '{}' for the {} on line {}", expected, kind.name(), opener.line()),
                format!("Add '{}' before this line.", expected),
            ));
            return;
        }

        let found = if same_line {
            format!("End {}", next.lexeme)
        } else {
            "End".to_string()
        };
        self.report(Diagnostic::syntax_error_with_help(
            end_token.span.to(&if same_line { next.span } else { end_token.span }),
            format!(
                "Expected '{}' to close the {} on line {}, found '{}'",
                expected,
                kind.name(),
                opener.line(),
                found
            ),
            format!("Change this to '{}'.", expected),
        ));
        self.advance();
        if same_line {
            self.advance();
        }
        self.end_of_statement();
    }

    /// Report anything left on the line of the token just consumed.
    fn end_of_statement(&mut self) {
        if self.current == 0 || self.is_at_end() {
            return;
        }
        let line = self.previous().line();
        if self.peek().line() == line {
            let token = self.peek().clone();
            self.report(Diagnostic::syntax_error_with_help(
                token.span,
                format!("Unexpected {} after the end of the statement", describe(&token)),
                "Each statement goes on its own line.".to_string(),
            ));
            self.skip_line(line);
        }
    }

    /// Skip every remaining token on `line`.
    fn skip_line(&mut self, line: usize) {
        while !self.is_at_end() && self.peek().line() <= line {
            self.advance();
        }
    }

    fn on_line(&self, line: usize) -> bool {
        !self.is_at_end() && self.peek().line() == line
    }

    fn report(&mut self, diagnostic: Diagnostic) -> Reported {
        self.diagnostics.push(diagnostic);
        Reported
    }

    /// Zero-width position just after the previous token, for things that
    /// are missing rather than wrong.
    fn missing_span(&self) -> Span {
        if self.current == 0 {
            return self.peek().span;
        }
        let previous = self.previous();
        Span::new(previous.span.end, previous.span.end + 1, previous.line())
    }

    /// Where to point when the next token is not what was expected.
    fn error_span(&self) -> Span {
        if self.is_at_end() || (self.current > 0 && self.peek().line() != self.previous().line()) {
            self.missing_span()
        } else {
            self.peek().span
        }
    }

    fn match_types(&mut self, types: &[TokenType]) -> bool {
        for token_type in types {
            if self.check(token_type) {
                self.advance();
                return true;
            }
        }
        false
    }

    fn check(&self, token_type: &TokenType) -> bool {
        if self.is_at_end() {
            false
        } else {
            &self.peek().token_type == token_type
        }
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn is_at_end(&self) -> bool {
        self.peek().token_type == TokenType::Eof
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.current]
    }

    fn peek_at(&self, distance: usize) -> &Token {
        let index = (self.current + distance).min(self.tokens.len() - 1);
        &self.tokens[index]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }

    fn consume(&mut self, token_type: TokenType, message: &str) -> ParseResult<Token> {
        if self.check(&token_type) {
            Ok(self.advance().clone())
        } else {
            let span = self.error_span();
            Err(self.report(Diagnostic::syntax_error(span, message.to_string())))
        }
    }

    fn consume_with_help(&mut self, token_type: TokenType, message: &str, help: &str) -> ParseResult<Token> {
        if self.check(&token_type) {
            Ok(self.advance().clone())
        } else {
            let span = self.error_span();
            Err(self.report(Diagnostic::syntax_error_with_help(
                span,
                message.to_string(),
                help.to_string(),
            )))
        }
    }
}

/// How a token is named in messages.
fn describe(token: &Token) -> String {
    match token.token_type {
        TokenType::Eof => "end of input".to_string(),
        TokenType::String => format!("\"{}\"", token.lexeme),
        TokenType::Character => format!("'{}'", token.lexeme),
        _ => format!("'{}'", token.lexeme),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Expr, Stmt};
    use crate::error::DiagnosticKind;
    use crate::lexer::Lexer;

    fn parse(source: &str) -> (Program, Vec<Diagnostic>) {
        let (tokens, mut diagnostics) = Lexer::new(source).scan_tokens();
        let (program, parse_diagnostics) = Parser::new(tokens).parse();
        diagnostics.extend(parse_diagnostics);
        (program, diagnostics)
    }

    fn errors(diagnostics: &[Diagnostic]) -> Vec<&Diagnostic> {
        diagnostics.iter().filter(|d| d.is_error()).collect()
    }

    #[test]
    fn clean_program_has_no_diagnostics() {
        let (program, diagnostics) = parse(
            "Declare Integer total = 0\n\
             Declare Integer i\n\
             For i = 1 To 3\n\
                 Set total = total + i\n\
             End For\n\
             Display total\n",
        );
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(program.statements.len(), 4);
    }

    #[test]
    fn missing_then_is_repaired() {
        let (program, diagnostics) = parse("Declare Integer x = 1\nIf x > 0\n  Display x\nEnd If\n");
        assert_eq!(errors(&diagnostics).len(), 1);
        assert!(diagnostics[0].message.contains("Then"));
        assert!(matches!(program.statements[1], Stmt::If { .. }));
    }

    #[test]
    fn missing_test_gives_one_diagnostic_and_keeps_the_body() {
        let (program, diagnostics) = parse("While\n  Display \"x\"\nEnd While\n");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::Syntax);
        match &program.statements[0] {
            Stmt::While { condition, body, .. } => {
                assert!(matches!(condition, Expr::Literal { .. }));
                assert_eq!(body.statements.len(), 1);
            }
            other => panic!("expected While, got {:?}", other),
        }
    }

    #[test]
    fn end_of_enclosing_construct_is_not_swallowed() {
        let (program, diagnostics) = parse(
            "Module main()\n\
               If True Then\n\
                 Display 1\n\
             End Module\n\
             Display 2\n",
        );
        assert_eq!(errors(&diagnostics).len(), 1);
        assert!(diagnostics[0].message.contains("End If"));
        assert_eq!(program.routines.len(), 1);
        assert_eq!(program.statements.len(), 1);
    }

    #[test]
    fn forward_calls_resolve_at_end_of_parse() {
        let (_, diagnostics) = parse("Call later(1)\nModule later(Integer n)\n  Display n\nEnd Module\n");
        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    }

    #[test]
    fn unknown_routine_is_only_a_warning() {
        let (_, diagnostics) = parse("Call beep()\n");
        assert_eq!(diagnostics.len(), 1);
        assert!(!diagnostics[0].is_error());
    }

    #[test]
    fn junk_after_statement_is_reported() {
        let (_, diagnostics) = parse("Display 1 2\n");
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("after the end of the statement"));
    }
}
