use super::{describe, BlockKind, ParseResult, Parser, Reported};
use crate::ast::{Case, Expr, RoutineKind, Stmt};
use crate::error::{Diagnostic, Span};
use crate::lexer::{Token, TokenType};
use crate::native_stack::ensure_sufficient_stack;
use crate::symbols::DeclarationKind;
use crate::value::Value;

impl Parser {
    /// Parse one statement. When it cannot be parsed the rest of its line is
    /// skipped and `None` is returned.
    pub(super) fn statement(&mut self) -> Option<Stmt> {
        ensure_sufficient_stack(|| self.statement_inner())
    }

    fn statement_inner(&mut self) -> Option<Stmt> {
        let line = self.peek().line();
        let token_type = self.peek().token_type;
        let result = match token_type {
            TokenType::Declare => {
                let start = self.advance().span;
                self.declaration_statement(DeclarationKind::Variable, start)
            }
            TokenType::Constant => {
                let start = self.advance().span;
                self.declaration_statement(DeclarationKind::Constant, start)
            }
            TokenType::TypeName => self.missing_declare(),
            TokenType::Identifier
                if self.peek_at(1).token_type == TokenType::Identifier && self.peek_at(1).line() == line =>
            {
                self.missing_declare()
            }
            TokenType::Set => self.set_statement(),
            TokenType::Display => self.display_statement(),
            TokenType::Input => self.input_statement(),
            TokenType::Call => self.call_statement(),
            TokenType::If => Ok(self.if_statement()),
            TokenType::Select => Ok(self.select_statement()),
            TokenType::While => Ok(self.while_statement()),
            TokenType::Do => Ok(self.do_statement()),
            TokenType::For => Ok(self.for_statement()),
            TokenType::Return => self.return_statement(),
            TokenType::Break | TokenType::Continue => self.jump_statement(),
            TokenType::Stop => {
                let span = self.advance().span;
                self.end_of_statement();
                Ok(Stmt::Stop { span })
            }
            TokenType::Identifier => self.bare_statement(),
            _ => Err(self.unexpected()),
        };

        match result {
            Ok(stmt) => Some(stmt),
            Err(Reported) => {
                self.skip_line(line);
                None
            }
        }
    }

    fn unexpected(&mut self) -> Reported {
        let token = self.peek().clone();
        let (message, help) = match token.token_type {
            TokenType::End => (
                "'End' does not close anything here".to_string(),
                "Remove it, or check which construct it was meant to close.",
            ),
            TokenType::Else => (
                "'Else' without a matching 'If'".to_string(),
                "'Else' must appear between 'If ... Then' and 'End If'.",
            ),
            TokenType::Case | TokenType::Default => (
                format!("'{}' outside a Select", token.lexeme),
                "Case labels must appear between 'Select' and 'End Select'.",
            ),
            TokenType::Loop => (
                "'Loop' without a matching 'Do'".to_string(),
                "Start the loop with 'Do' on its own line.",
            ),
            _ => (
                format!("Expected a statement, found {}", describe(&token)),
                "Statements start with a keyword such as Declare, Set, Display, If or While.",
            ),
        };
        self.report(Diagnostic::syntax_error_with_help(token.span, message, help.to_string()))
    }

    fn missing_declare(&mut self) -> ParseResult<Stmt> {
        let span = self.peek().span;
        self.report(Diagnostic::syntax_error_with_help(
            span,
            "Missing 'Declare' before the variable declaration".to_string(),
            "Write: Declare Integer count".to_string(),
        ));
        self.declaration_statement(DeclarationKind::Variable, span)
    }

    fn set_statement(&mut self) -> ParseResult<Stmt> {
        let keyword = self.advance().clone();
        let target = self.postfix()?;
        self.assignment_operator()?;
        let value = self.expression()?;
        self.check_assignable(&target);
        let span = keyword.span.to(value.span());
        self.end_of_statement();
        Ok(Stmt::Assign { target, value, span })
    }

    /// `=`, or `==` repaired to `=`.
    pub(super) fn assignment_operator(&mut self) -> ParseResult<()> {
        if self.match_types(&[TokenType::Equal]) {
            return Ok(());
        }
        if self.check(&TokenType::EqualEqual) {
            let span = self.advance().span;
            self.report(Diagnostic::syntax_error_with_help(
                span,
                "'==' compares values; use '=' to assign".to_string(),
                "Write: Set count = 10".to_string(),
            ));
            return Ok(());
        }
        self.consume_with_help(
            TokenType::Equal,
            "Expected '=' in the assignment",
            "Write: Set count = 10",
        )
        .map(|_| ())
    }

    /// Report writes to constants and to things that are not storage.
    pub(super) fn check_assignable(&mut self, target: &Expr) {
        match target {
            Expr::Error { .. } => {}
            Expr::Variable { var, name, span } => {
                if self.ctx.symbols.variable(*var).is_constant {
                    self.report(Diagnostic::semantic_error_with_help(
                        *span,
                        format!("Cannot change the constant '{}'", name),
                        "Declare it with 'Declare' instead of 'Constant' if it must change.".to_string(),
                    ));
                }
            }
            Expr::Index { base, .. } => self.check_assignable(base),
            Expr::Field { .. } => {}
            other => {
                self.report(Diagnostic::semantic_error_with_help(
                    *other.span(),
                    "Only variables, array elements and fields can be assigned".to_string(),
                    "Put a variable name on the left of '='.".to_string(),
                ));
            }
        }
    }

    fn display_statement(&mut self) -> ParseResult<Stmt> {
        let keyword = self.advance().clone();
        let mut items = Vec::new();

        if self.on_line(keyword.line()) {
            loop {
                items.push(self.expression()?);
                if !self.match_types(&[TokenType::Comma]) {
                    break;
                }
            }
        }

        let span = match items.last() {
            Some(last) => keyword.span.to(last.span()),
            None => keyword.span,
        };
        self.end_of_statement();
        Ok(Stmt::Display { items, span })
    }

    fn input_statement(&mut self) -> ParseResult<Stmt> {
        let keyword = self.advance().clone();
        if !self.on_line(keyword.line()) {
            let span = self.missing_span();
            return Err(self.report(Diagnostic::syntax_error_with_help(
                span,
                "Missing variable after 'Input'".to_string(),
                "Write: Input name".to_string(),
            )));
        }
        let target = self.postfix()?;
        self.check_assignable(&target);
        let span = keyword.span.to(target.span());
        self.end_of_statement();
        Ok(Stmt::Input { target, span })
    }

    fn call_statement(&mut self) -> ParseResult<Stmt> {
        let keyword = self.advance().clone();

        // `Call name` without parentheses
        if self.check(&TokenType::Identifier)
            && !matches!(
                self.peek_at(1).token_type,
                TokenType::LeftParen | TokenType::Dot | TokenType::LeftBracket
            )
        {
            let name = self.advance().clone();
            self.report(Diagnostic::syntax_error_with_help(
                name.span,
                format!("Missing '()' after '{}'", name.lexeme),
                format!("Write: Call {}()", name.lexeme),
            ));
            let call = self.routine_call(&name, Vec::new(), name.span);
            self.end_of_statement();
            return Ok(Stmt::Call {
                span: keyword.span.to(&name.span),
                call,
            });
        }

        let call = self.postfix()?;
        if !call.is_call() {
            if matches!(call, Expr::Error { .. }) {
                return Err(Reported);
            }
            return Err(self.report(Diagnostic::syntax_error_with_help(
                *call.span(),
                "'Call' must be followed by a Module or Function call".to_string(),
                "Write: Call showTotal()".to_string(),
            )));
        }
        let span = keyword.span.to(call.span());
        self.end_of_statement();
        Ok(Stmt::Call { call, span })
    }

    /// A statement that starts with a name: an assignment or call whose
    /// keyword was left out.
    fn bare_statement(&mut self) -> ParseResult<Stmt> {
        let first = self.peek().clone();
        let target = self.postfix()?;

        if self.check(&TokenType::Equal) || self.check(&TokenType::EqualEqual) {
            self.report(Diagnostic::syntax_error_with_help(
                first.span,
                "Missing 'Set' before the assignment".to_string(),
                format!("Write: Set {} = ...", first.lexeme),
            ));
            self.advance();
            let value = self.expression()?;
            self.check_assignable(&target);
            let span = first.span.to(value.span());
            self.end_of_statement();
            return Ok(Stmt::Assign { target, value, span });
        }

        if target.is_call() {
            self.report(Diagnostic::syntax_error_with_help(
                first.span,
                "Missing 'Call' before the routine call".to_string(),
                format!("Write: Call {}(...)", first.lexeme),
            ));
            let span = *target.span();
            self.end_of_statement();
            return Ok(Stmt::Call { call: target, span });
        }

        if matches!(target, Expr::Error { .. }) {
            return Err(Reported);
        }
        Err(self.report(Diagnostic::syntax_error_with_help(
            *target.span(),
            format!("Expected a statement, found '{}'", first.lexeme),
            format!("To assign, write: Set {} = ...", first.lexeme),
        )))
    }

    /// The test of an `If`, `While` or `Loop`. A missing or unparsable test
    /// is reported once and replaced by the literal `fallback`.
    fn condition(&mut self, keyword: &Token, stops: &[TokenType], fallback: bool) -> Expr {
        let line = keyword.line();

        if !self.on_line(line) || stops.iter().any(|stop| self.check(stop)) {
            let span = self.missing_span();
            self.report(Diagnostic::syntax_error_with_help(
                span,
                format!("Missing test after '{}'", keyword.lexeme),
                format!("Write the condition to test, for example: {} count < 10", keyword.lexeme),
            ));
            return literal(fallback, span);
        }

        let saved = std::mem::replace(&mut self.in_condition, true);
        let result = self.expression();
        self.in_condition = saved;

        match result {
            Ok(expr) => expr,
            Err(Reported) => {
                let span = self.peek().span;
                while self.on_line(line) && !stops.iter().any(|stop| self.check(stop)) {
                    self.advance();
                }
                literal(fallback, span)
            }
        }
    }

    fn expect_then(&mut self) {
        if !self.match_types(&[TokenType::Then]) {
            let span = self.missing_span();
            self.report(Diagnostic::syntax_error_with_help(
                span,
                "Missing 'Then' after the If test".to_string(),
                "Write: If count > 0 Then".to_string(),
            ));
        }
        self.end_of_statement();
    }

    fn if_statement(&mut self) -> Stmt {
        let opener = self.advance().clone();
        let mut branches = Vec::new();
        let mut else_branch = None;

        let condition = self.condition(&opener, &[TokenType::Then], false);
        self.expect_then();
        self.open_blocks.push(BlockKind::If);
        let body = self.block();
        branches.push((condition, body));

        while self.check(&TokenType::Else) {
            let else_token = self.advance().clone();

            if self.check(&TokenType::If) && self.peek().line() == else_token.line() {
                let if_token = self.advance().clone();
                let condition = self.condition(&if_token, &[TokenType::Then], false);
                self.expect_then();
                let body = self.block();
                if else_branch.is_some() {
                    self.report(Diagnostic::syntax_error_with_help(
                        else_token.span.to(&if_token.span),
                        "'Else If' after the final 'Else'".to_string(),
                        "Move this branch above the 'Else'.".to_string(),
                    ));
                } else {
                    branches.push((condition, body));
                }
            } else {
                self.end_of_statement();
                let body = self.block();
                if else_branch.is_some() {
                    self.report(Diagnostic::syntax_error(
                        else_token.span,
                        "An If can only have one 'Else'".to_string(),
                    ));
                } else {
                    else_branch = Some(body);
                }
            }
        }

        self.expect_end(BlockKind::If, &opener);
        self.open_blocks.pop();
        Stmt::If {
            branches,
            else_branch,
            span: opener.span.to(&self.previous().span),
        }
    }

    fn select_statement(&mut self) -> Stmt {
        let opener = self.advance().clone();

        let subject = if self.on_line(opener.line()) {
            match self.expression() {
                Ok(expr) => expr,
                Err(Reported) => {
                    self.skip_line(opener.line());
                    Expr::Error { span: opener.span }
                }
            }
        } else {
            let span = self.missing_span();
            self.report(Diagnostic::syntax_error_with_help(
                span,
                "Missing value after 'Select'".to_string(),
                "Write: Select choice".to_string(),
            ));
            Expr::Error { span }
        };
        self.end_of_statement();

        self.open_blocks.push(BlockKind::Select);
        let mut cases = Vec::new();
        let mut default = None;

        loop {
            let token_type = self.peek().token_type;
            match token_type {
                TokenType::Case => {
                    let case_token = self.advance().clone();
                    let labels = self.case_labels(&case_token);
                    let body = self.block();
                    cases.push(Case {
                        labels,
                        span: case_token.span.to(&body.span),
                        body,
                    });
                }
                TokenType::Default => {
                    let default_token = self.advance().clone();
                    self.expect_colon();
                    let body = self.block();
                    if default.is_some() {
                        self.report(Diagnostic::syntax_error(
                            default_token.span,
                            "A Select can only have one 'Default'".to_string(),
                        ));
                    } else {
                        default = Some(body);
                    }
                }
                TokenType::End | TokenType::Eof => break,
                token_type if self.closes_open_block(token_type) => break,
                _ => {
                    let token = self.peek().clone();
                    self.report(Diagnostic::syntax_error_with_help(
                        token.span,
                        format!("Expected 'Case' or 'Default', found {}", describe(&token)),
                        "Statements inside a Select belong to a 'Case value:' label.".to_string(),
                    ));
                    self.skip_line(token.line());
                }
            }
        }

        self.expect_end(BlockKind::Select, &opener);
        self.open_blocks.pop();
        Stmt::Select {
            subject,
            cases,
            default,
            span: opener.span.to(&self.previous().span),
        }
    }

    fn case_labels(&mut self, case_token: &Token) -> Vec<Expr> {
        let line = case_token.line();
        let mut labels = Vec::new();

        if !self.on_line(line) || self.check(&TokenType::Colon) {
            let span = self.missing_span();
            self.report(Diagnostic::syntax_error_with_help(
                span,
                "Missing value after 'Case'".to_string(),
                "Write: Case 1:".to_string(),
            ));
        } else {
            loop {
                match self.expression() {
                    Ok(label) => labels.push(label),
                    Err(Reported) => {
                        while self.on_line(line) && !self.check(&TokenType::Colon) {
                            self.advance();
                        }
                        break;
                    }
                }
                if !self.match_types(&[TokenType::Comma]) {
                    break;
                }
            }
        }

        self.expect_colon();
        labels
    }

    fn expect_colon(&mut self) {
        if !self.match_types(&[TokenType::Colon]) {
            let span = self.missing_span();
            self.report(Diagnostic::syntax_error_with_help(
                span,
                "Missing ':' after the case label".to_string(),
                "Write: Case 1:".to_string(),
            ));
        }
        self.end_of_statement();
    }

    fn while_statement(&mut self) -> Stmt {
        let opener = self.advance().clone();
        let condition = self.condition(&opener, &[], false);
        self.end_of_statement();

        self.loop_depth += 1;
        self.open_blocks.push(BlockKind::While);
        let body = self.block();
        self.expect_end(BlockKind::While, &opener);
        self.open_blocks.pop();
        self.loop_depth -= 1;

        Stmt::While {
            condition,
            body,
            span: opener.span.to(&self.previous().span),
        }
    }

    fn do_statement(&mut self) -> Stmt {
        let opener = self.advance().clone();
        self.end_of_statement();

        self.loop_depth += 1;
        self.open_blocks.push(BlockKind::Do);
        let body = self.block();
        self.open_blocks.pop();
        self.loop_depth -= 1;

        let (condition, until) = if self.check(&TokenType::Loop) {
            let loop_token = self.advance().clone();
            let until = if self.match_types(&[TokenType::Until]) {
                true
            } else if self.match_types(&[TokenType::While]) {
                false
            } else {
                let span = self.missing_span();
                self.report(Diagnostic::syntax_error_with_help(
                    span,
                    "Expected 'While' or 'Until' after 'Loop'".to_string(),
                    "Write: Loop While count < 10".to_string(),
                ));
                false
            };
            // A missing test must end the loop: `While False` or `Until True`.
            let condition = self.condition(&loop_token, &[], until);
            self.end_of_statement();
            (condition, until)
        } else {
            self.report(Diagnostic::syntax_error_with_help(
                opener.span,
                format!("Missing 'Loop While' or 'Loop Until' for the Do on line {}", opener.line()),
                "Close the loop with: Loop While count < 10".to_string(),
            ));
            if self.check(&TokenType::End) && self.peek_at(1).token_type == TokenType::Do {
                self.advance();
                self.advance();
                self.end_of_statement();
            }
            (literal(false, opener.span), false)
        };

        Stmt::DoLoop {
            body,
            condition,
            until,
            span: opener.span.to(&self.previous().span),
        }
    }

    fn for_statement(&mut self) -> Stmt {
        let opener = self.advance().clone();
        if self.check(&TokenType::Each) {
            return self.for_each_statement(opener);
        }

        let (counter, start, end, step) = match self.for_header() {
            Ok(header) => {
                self.end_of_statement();
                header
            }
            Err(Reported) => {
                self.skip_line(opener.line());
                // Runs zero times.
                (
                    Expr::Error { span: opener.span },
                    integer(1, opener.span),
                    integer(0, opener.span),
                    None,
                )
            }
        };

        self.loop_depth += 1;
        self.open_blocks.push(BlockKind::For);
        let body = self.block();
        self.expect_end(BlockKind::For, &opener);
        self.open_blocks.pop();
        self.loop_depth -= 1;

        Stmt::For {
            counter,
            start,
            end,
            step,
            body,
            span: opener.span.to(&self.previous().span),
        }
    }

    fn for_header(&mut self) -> ParseResult<(Expr, Expr, Expr, Option<Expr>)> {
        let counter = self.postfix()?;
        self.check_assignable(&counter);
        self.assignment_operator()?;
        let start = self.expression()?;
        self.consume_with_help(
            TokenType::To,
            "Expected 'To' after the start value",
            "Write: For i = 1 To 10",
        )?;
        let end = self.expression()?;
        let step = if self.match_types(&[TokenType::Step]) {
            Some(self.expression()?)
        } else {
            None
        };
        Ok((counter, start, end, step))
    }

    fn for_each_statement(&mut self, opener: Token) -> Stmt {
        self.advance();

        let (item, array) = match self.for_each_header() {
            Ok(header) => {
                self.end_of_statement();
                header
            }
            Err(Reported) => {
                self.skip_line(opener.line());
                (Expr::Error { span: opener.span }, Expr::Error { span: opener.span })
            }
        };

        self.loop_depth += 1;
        self.open_blocks.push(BlockKind::For);
        let body = self.block();
        self.expect_end(BlockKind::For, &opener);
        self.open_blocks.pop();
        self.loop_depth -= 1;

        Stmt::ForEach {
            item,
            array,
            body,
            span: opener.span.to(&self.previous().span),
        }
    }

    fn for_each_header(&mut self) -> ParseResult<(Expr, Expr)> {
        let item = self.postfix()?;
        self.check_assignable(&item);
        self.consume_with_help(
            TokenType::In,
            "Expected 'In' after the loop variable",
            "Write: For Each item In values",
        )?;
        let array = self.expression()?;
        Ok((item, array))
    }

    fn return_statement(&mut self) -> ParseResult<Stmt> {
        let keyword = self.advance().clone();
        let mut value = if self.on_line(keyword.line()) {
            Some(self.expression()?)
        } else {
            None
        };
        let span = match &value {
            Some(expr) => keyword.span.to(expr.span()),
            None => keyword.span,
        };

        match self.ctx.current_routine().map(|id| self.routines[id].kind) {
            None => {
                self.report(Diagnostic::semantic_error_with_help(
                    keyword.span,
                    "'Return' outside a Module or Function".to_string(),
                    "Use 'Stop' to end the program early.".to_string(),
                ));
            }
            Some(RoutineKind::Module) if value.is_some() => {
                self.report(Diagnostic::semantic_error_with_help(
                    span,
                    "A Module cannot return a value".to_string(),
                    "Make it a Function, or remove the value after 'Return'.".to_string(),
                ));
                value = None;
            }
            Some(RoutineKind::Function) if value.is_none() => {
                self.report(Diagnostic::semantic_error_with_help(
                    keyword.span,
                    "A Function must return a value".to_string(),
                    "Write: Return result".to_string(),
                ));
            }
            Some(_) => {}
        }

        self.end_of_statement();
        Ok(Stmt::Return { value, span })
    }

    fn jump_statement(&mut self) -> ParseResult<Stmt> {
        let token = self.advance().clone();
        if self.loop_depth == 0 {
            self.report(Diagnostic::semantic_error(
                token.span,
                format!("'{}' can only be used inside a loop", token.lexeme),
            ));
        }
        self.end_of_statement();
        Ok(match token.token_type {
            TokenType::Break => Stmt::Break { span: token.span },
            _ => Stmt::Continue { span: token.span },
        })
    }
}

fn literal(value: bool, span: Span) -> Expr {
    Expr::Literal {
        value: Value::Boolean(value),
        span,
    }
}

fn integer(value: i64, span: Span) -> Expr {
    Expr::Literal {
        value: Value::Integer(value),
        span,
    }
}
