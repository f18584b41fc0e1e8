use super::{describe, CallTarget, ParseResult, Parser, PendingCall};
use crate::ast::{BinaryOp, Expr, LogicalOp, UnaryOp};
use crate::builtins;
use crate::error::{Diagnostic, Span};
use crate::lexer::{Token, TokenType};
use crate::native_stack::ensure_sufficient_stack;
use crate::value::{TypeName, Value};

// Precedence, loosest first:
//   OR, AND, NOT, comparison, + -, * / MOD, unary -, ^, postfix, primary

impl Parser {
    /// Every nesting level of parentheses, arguments and indices comes back
    /// through here, so the stack is checked once per level.
    pub(super) fn expression(&mut self) -> ParseResult<Expr> {
        ensure_sufficient_stack(|| self.or())
    }

    fn or(&mut self) -> ParseResult<Expr> {
        let mut expr = self.and()?;

        while self.match_types(&[TokenType::Or]) {
            let right = self.and()?;
            let span = expr.span().to(right.span());
            expr = Expr::Logical {
                left: Box::new(expr),
                operator: LogicalOp::Or,
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn and(&mut self) -> ParseResult<Expr> {
        let mut expr = self.negation()?;

        while self.match_types(&[TokenType::And]) {
            let right = self.negation()?;
            let span = expr.span().to(right.span());
            expr = Expr::Logical {
                left: Box::new(expr),
                operator: LogicalOp::And,
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn negation(&mut self) -> ParseResult<Expr> {
        if self.match_types(&[TokenType::Not]) {
            let start = self.previous().span;
            let operand = ensure_sufficient_stack(|| self.negation())?;
            let span = start.to(operand.span());
            return Ok(Expr::Unary {
                operator: UnaryOp::Not,
                operand: Box::new(operand),
                span,
            });
        }

        self.comparison()
    }

    fn comparison(&mut self) -> ParseResult<Expr> {
        let mut expr = self.additive()?;

        loop {
            let token_type = self.peek().token_type;
            let operator = match token_type {
                TokenType::EqualEqual => BinaryOp::Equal,
                TokenType::BangEqual => BinaryOp::NotEqual,
                TokenType::Less => BinaryOp::Less,
                TokenType::LessEqual => BinaryOp::LessEqual,
                TokenType::Greater => BinaryOp::Greater,
                TokenType::GreaterEqual => BinaryOp::GreaterEqual,
                TokenType::Equal if self.in_condition => {
                    let span = self.peek().span;
                    self.report(Diagnostic::syntax_error_with_help(
                        span,
                        "'=' assigns; use '==' to compare".to_string(),
                        "Write: If count == 10 Then".to_string(),
                    ));
                    BinaryOp::Equal
                }
                _ => break,
            };
            self.advance();

            let right = self.additive()?;
            let span = expr.span().to(right.span());
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn additive(&mut self) -> ParseResult<Expr> {
        let mut expr = self.multiplicative()?;

        while self.match_types(&[TokenType::Plus, TokenType::Minus]) {
            let operator = match self.previous().token_type {
                TokenType::Plus => BinaryOp::Add,
                _ => BinaryOp::Subtract,
            };
            let right = self.multiplicative()?;
            let span = expr.span().to(right.span());
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn multiplicative(&mut self) -> ParseResult<Expr> {
        let mut expr = self.unary()?;

        while self.match_types(&[TokenType::Star, TokenType::Slash, TokenType::Mod]) {
            let operator = match self.previous().token_type {
                TokenType::Star => BinaryOp::Multiply,
                TokenType::Slash => BinaryOp::Divide,
                _ => BinaryOp::Modulo,
            };
            let right = self.unary()?;
            let span = expr.span().to(right.span());
            expr = Expr::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
                span,
            };
        }

        Ok(expr)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        if self.match_types(&[TokenType::Minus]) {
            let start = self.previous().span;
            let operand = ensure_sufficient_stack(|| self.unary())?;
            let span = start.to(operand.span());
            return Ok(Expr::Unary {
                operator: UnaryOp::Negate,
                operand: Box::new(operand),
                span,
            });
        }

        self.power()
    }

    /// `^` binds tighter than unary minus and groups to the right.
    fn power(&mut self) -> ParseResult<Expr> {
        let base = self.postfix()?;

        if self.match_types(&[TokenType::Caret]) {
            let exponent = self.unary()?;
            let span = base.span().to(exponent.span());
            return Ok(Expr::Binary {
                left: Box::new(base),
                operator: BinaryOp::Power,
                right: Box::new(exponent),
                span,
            });
        }

        Ok(base)
    }

    /// Primary followed by any number of `[index]` and `.member` suffixes.
    pub(super) fn postfix(&mut self) -> ParseResult<Expr> {
        let mut expr = self.primary()?;

        loop {
            if self.check(&TokenType::LeftBracket) {
                self.advance();
                let mut indices = vec![self.expression()?];
                while self.match_types(&[TokenType::Comma]) {
                    indices.push(self.expression()?);
                }
                let close = self.consume(TokenType::RightBracket, "Expected ']' after the index")?;
                let span = expr.span().to(&close.span);

                self.check_indexable(&expr);
                expr = match expr {
                    Expr::Index {
                        base,
                        indices: mut existing,
                        ..
                    } => {
                        existing.extend(indices);
                        Expr::Index {
                            base,
                            indices: existing,
                            span,
                        }
                    }
                    other => Expr::Index {
                        base: Box::new(other),
                        indices,
                        span,
                    },
                };
            } else if self.match_types(&[TokenType::Dot]) {
                let name = self.consume_with_help(
                    TokenType::Identifier,
                    "Expected a field or method name after '.'",
                    "Write: shape.area() or point.x",
                )?;

                if self.check(&TokenType::LeftParen) {
                    let (args, end) = self.arguments()?;
                    let span = expr.span().to(&end);
                    if let Some(class) = self.receiver_class(&expr) {
                        self.pending_calls.push(PendingCall {
                            name: name.lexeme.clone(),
                            target: CallTarget::Method(class),
                            args: args.iter().map(|arg| (arg.is_place(), *arg.span())).collect(),
                            span,
                        });
                    }
                    expr = Expr::MethodCall {
                        object: Box::new(expr),
                        name: name.lexeme,
                        args,
                        span,
                    };
                } else {
                    let span = expr.span().to(&name.span);
                    expr = Expr::Field {
                        object: Box::new(expr),
                        name: name.lexeme,
                        span,
                    };
                }
            } else {
                break;
            }
        }

        Ok(expr)
    }

    /// Class of a method call's receiver, when it is a plain object variable.
    fn receiver_class(&self, receiver: &Expr) -> Option<String> {
        let Expr::Variable { var, .. } = receiver else {
            return None;
        };
        let var = self.ctx.symbols.variable(*var);
        match &var.ty {
            TypeName::Class(class) if !var.is_array() => Some(class.clone()),
            _ => None,
        }
    }

    /// Indexing a variable that was declared without dimensions.
    fn check_indexable(&mut self, base: &Expr) {
        if let Expr::Variable { var, name, span } = base {
            if !self.ctx.symbols.variable(*var).is_array() {
                self.report(Diagnostic::semantic_error_with_help(
                    *span,
                    format!("'{}' is not an array", name),
                    format!("Declare it with a size, for example: Declare Integer {}[10]", name),
                ));
            }
        }
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let token = self.peek().clone();

        match token.token_type {
            TokenType::Integer => {
                self.advance();
                let value = match token.lexeme.parse::<i64>() {
                    Ok(n) => n,
                    Err(_) => {
                        self.report(Diagnostic::lex_error(
                            token.span,
                            format!("Integer literal '{}' is too large", token.lexeme),
                        ));
                        0
                    }
                };
                Ok(literal(Value::Integer(value), token.span))
            }
            TokenType::Real => {
                self.advance();
                let value = token.lexeme.parse::<f64>().unwrap_or(0.0);
                Ok(literal(Value::Real(value), token.span))
            }
            TokenType::String => {
                self.advance();
                Ok(literal(Value::String(token.lexeme), token.span))
            }
            TokenType::Character => {
                self.advance();
                let c = token.lexeme.chars().next().unwrap_or(' ');
                Ok(literal(Value::Character(c), token.span))
            }
            TokenType::True => {
                self.advance();
                Ok(literal(Value::Boolean(true), token.span))
            }
            TokenType::False => {
                self.advance();
                Ok(literal(Value::Boolean(false), token.span))
            }
            TokenType::Null => {
                self.advance();
                Ok(literal(Value::Null, token.span))
            }
            TokenType::Not => self.negation(),
            TokenType::LeftParen => {
                self.advance();
                let expr = self.expression()?;
                let close = self.consume_with_help(
                    TokenType::RightParen,
                    "Expected ')' after the expression",
                    "Every '(' needs a matching ')'.",
                )?;
                Ok(Expr::Grouping {
                    expr: Box::new(expr),
                    span: token.span.to(&close.span),
                })
            }
            TokenType::New => self.new_expression(),
            TokenType::Identifier => {
                self.advance();
                if self.check(&TokenType::LeftParen) {
                    let (args, end) = self.arguments()?;
                    Ok(self.routine_call(&token, args, end))
                } else {
                    Ok(self.variable_reference(&token))
                }
            }
            TokenType::TypeName => {
                self.advance();
                Err(self.report(Diagnostic::syntax_error(
                    token.span,
                    format!("'{}' is a type, not a value", token.lexeme),
                )))
            }
            _ => {
                let span = self.error_span();
                let found = if span == token.span {
                    describe(&token)
                } else {
                    "the end of the line".to_string()
                };
                Err(self.report(Diagnostic::syntax_error_with_help(
                    span,
                    format!("Expected a value, found {}", found),
                    "A value is a number, text in quotes, a variable or a call.".to_string(),
                )))
            }
        }
    }

    fn variable_reference(&mut self, token: &Token) -> Expr {
        if let Some(var) = self.ctx.lookup(&token.lexeme) {
            return Expr::Variable {
                var,
                name: token.lexeme.clone(),
                span: token.span,
            };
        }

        let is_routine = self.routine_index.contains_key(&token.lexeme) || builtins::arity(&token.lexeme).is_some();
        let help = if is_routine {
            format!("'{0}' is a routine; call it with {0}(...)", token.lexeme)
        } else {
            format!("Declare it before use: Declare Integer {}", token.lexeme)
        };
        self.report(Diagnostic::semantic_error_with_help(
            token.span,
            format!("Undefined variable '{}'", token.lexeme),
            help,
        ));
        Expr::Error { span: token.span }
    }

    /// `(a, b, ...)`; returns the arguments and the span of the `)`.
    pub(super) fn arguments(&mut self) -> ParseResult<(Vec<Expr>, Span)> {
        self.consume(TokenType::LeftParen, "Expected '('")?;
        let mut args = Vec::new();

        if !self.check(&TokenType::RightParen) {
            loop {
                args.push(self.expression()?);
                if !self.match_types(&[TokenType::Comma]) {
                    break;
                }
            }
        }

        let close = self.consume_with_help(
            TokenType::RightParen,
            "Expected ')' after the arguments",
            "Separate arguments with ',' and close the list with ')'.",
        )?;
        Ok((args, close.span))
    }

    /// Build a by-name call and queue it for checking once every routine
    /// is known.
    pub(super) fn routine_call(&mut self, name: &Token, args: Vec<Expr>, end: Span) -> Expr {
        let span = name.span.to(&end);
        self.pending_calls.push(PendingCall {
            name: name.lexeme.clone(),
            target: CallTarget::Routine(self.ctx.current_class()),
            args: args.iter().map(|arg| (arg.is_place(), *arg.span())).collect(),
            span,
        });
        Expr::Call {
            name: name.lexeme.clone(),
            args,
            span,
        }
    }

    fn new_expression(&mut self) -> ParseResult<Expr> {
        let keyword = self.advance().clone();
        let class = self.consume_with_help(
            TokenType::Identifier,
            "Expected a class name after 'New'",
            "Write: New Point(1, 2)",
        )?;
        self.pending_types.push((class.lexeme.clone(), class.span));

        let (args, end) = if self.check(&TokenType::LeftParen) {
            self.arguments()?
        } else {
            self.report(Diagnostic::syntax_error_with_help(
                class.span,
                format!("Missing '()' after '{}'", class.lexeme),
                format!("Write: New {}()", class.lexeme),
            ));
            (Vec::new(), class.span)
        };

        let span = keyword.span.to(&end);
        self.pending_calls.push(PendingCall {
            name: class.lexeme.clone(),
            target: CallTarget::Constructor,
            args: args.iter().map(|arg| (arg.is_place(), *arg.span())).collect(),
            span,
        });
        Ok(Expr::New {
            class: class.lexeme,
            args,
            span,
        })
    }
}

fn literal(value: Value, span: Span) -> Expr {
    Expr::Literal { value, span }
}
