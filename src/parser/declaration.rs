use super::{BlockKind, ParseResult, Parser, Reported};
use crate::ast::{Block, ClassDef, Declaration, Expr, Initializer, Routine, RoutineKind, Stmt, UnaryOp};
use crate::error::{Diagnostic, Span};
use crate::lexer::{Token, TokenType};
use crate::native_stack::ensure_sufficient_stack;
use crate::symbols::{DeclarationKind, VarId};
use crate::value::{TypeName, Value};
use std::collections::HashMap;
use tracing::trace;

impl Parser {
    /// Everything after `Declare` or `Constant`.
    pub(super) fn declaration_statement(&mut self, kind: DeclarationKind, start: Span) -> ParseResult<Stmt> {
        let declarations = self.declarators(kind)?;
        let span = start.to(&self.previous().span);
        self.end_of_statement();
        Ok(Stmt::Declare { declarations, span })
    }

    /// `Type name[dims] = init, name2 = init2, ...`
    fn declarators(&mut self, kind: DeclarationKind) -> ParseResult<Vec<Declaration>> {
        let declared = self.declared_type()?;
        let mut declarations = Vec::new();
        let mut reported_missing_type = false;

        loop {
            let name = self.consume_with_help(
                TokenType::Identifier,
                "Expected a variable name",
                "Write: Declare Integer count",
            )?;

            let mut dims = Vec::new();
            while self.match_types(&[TokenType::LeftBracket]) {
                if self.check(&TokenType::RightBracket) {
                    dims.push(None);
                } else {
                    dims.push(Some(self.expression()?));
                    while self.match_types(&[TokenType::Comma]) {
                        dims.push(Some(self.expression()?));
                    }
                }
                self.consume(TokenType::RightBracket, "Expected ']' after the array size")?;
            }
            let rank = dims.len();

            let init = if self.check(&TokenType::Equal) || self.check(&TokenType::EqualEqual) {
                if self.check(&TokenType::EqualEqual) {
                    let span = self.peek().span;
                    self.report(Diagnostic::syntax_error_with_help(
                        span,
                        "'==' compares values; use '=' to give a starting value".to_string(),
                        format!("Write: Declare Integer {} = 0", name.lexeme),
                    ));
                }
                self.advance();
                self.initializer(rank > 0)?
            } else {
                None
            };

            let ty = match &declared {
                Some(ty) => ty.clone(),
                None => {
                    let inferred = init.as_ref().and_then(infer_type).unwrap_or(TypeName::Integer);
                    if !reported_missing_type {
                        self.report(Diagnostic::syntax_error_with_help(
                            name.span,
                            format!("Missing type for '{}'; assuming {}", name.lexeme, inferred),
                            format!("Write: Declare {} {}", inferred, name.lexeme),
                        ));
                        reported_missing_type = true;
                    }
                    inferred
                }
            };

            let dims = self.array_dimensions(dims, &init, &name);
            let (var, duplicate) = self.ctx.declare(&name.lexeme, ty.clone(), rank, kind, name.span);
            if let Some(duplicate) = duplicate {
                self.report(duplicate);
            }

            if kind == DeclarationKind::Constant && init.is_none() {
                self.report(Diagnostic::semantic_error_with_help(
                    name.span,
                    format!("Constant '{}' needs a value", name.lexeme),
                    format!("Write: Constant {} {} = ...", ty, name.lexeme),
                ));
            }

            let init = match init {
                Some(Initializer::Expr(expr)) if rank == 0 && self.literal_mismatch(&ty, &expr) => None,
                other => other,
            };

            declarations.push(Declaration {
                var,
                dims,
                init,
                span: name.span.to(&self.previous().span),
            });

            if !self.match_types(&[TokenType::Comma]) {
                break;
            }
        }

        Ok(declarations)
    }

    /// The type in front of a declaration. `None` when the declaration starts
    /// straight with the variable name.
    fn declared_type(&mut self) -> ParseResult<Option<TypeName>> {
        if self.starts_type() {
            return Ok(Some(self.type_name()));
        }
        if self.check(&TokenType::Identifier) {
            return Ok(None);
        }
        let span = self.error_span();
        Err(self.report(Diagnostic::syntax_error_with_help(
            span,
            "Expected a type such as Integer, Real, String, Boolean or Character".to_string(),
            "Write: Declare Integer count".to_string(),
        )))
    }

    /// A built-in type keyword, or a class name followed by another name.
    fn starts_type(&self) -> bool {
        match self.peek().token_type {
            TokenType::TypeName => true,
            TokenType::Identifier => {
                let next = self.peek_at(1);
                next.line() == self.peek().line()
                    && matches!(next.token_type, TokenType::Identifier | TokenType::Ref)
            }
            _ => false,
        }
    }

    /// Consume a type. Class names are checked once every class is known.
    fn type_name(&mut self) -> TypeName {
        let token = self.advance().clone();
        match token.token_type {
            TokenType::TypeName => TypeName::from_keyword(&token.lexeme).unwrap_or(TypeName::Integer),
            _ => {
                self.pending_types.push((token.lexeme.clone(), token.span));
                TypeName::Class(token.lexeme)
            }
        }
    }

    /// Starting value after `=`: one expression, a bracketed list, or (for
    /// arrays) a bare comma-separated list.
    fn initializer(&mut self, is_array: bool) -> ParseResult<Option<Initializer>> {
        if self.check(&TokenType::LeftBracket) {
            let open = self.peek().span;
            let list = self.initializer_list()?;
            if !is_array {
                self.report(Diagnostic::semantic_error_with_help(
                    open,
                    "A list of values can only initialise an array".to_string(),
                    "Give the variable a size, for example: Declare Integer values[3] = [1, 2, 3]".to_string(),
                ));
                return Ok(None);
            }
            return Ok(Some(list));
        }

        let first = self.expression()?;
        if is_array && self.check(&TokenType::Comma) {
            let mut items = vec![Initializer::Expr(first)];
            while self.match_types(&[TokenType::Comma]) {
                items.push(self.initializer_item()?);
            }
            return Ok(Some(Initializer::List(items)));
        }

        Ok(Some(Initializer::Expr(first)))
    }

    fn initializer_list(&mut self) -> ParseResult<Initializer> {
        self.consume(TokenType::LeftBracket, "Expected '['")?;
        let mut items = Vec::new();

        if !self.check(&TokenType::RightBracket) {
            loop {
                items.push(self.initializer_item()?);
                if !self.match_types(&[TokenType::Comma]) {
                    break;
                }
            }
        }

        self.consume_with_help(
            TokenType::RightBracket,
            "Expected ']' to close the list of values",
            "Write: [1, 2, 3]",
        )?;
        Ok(Initializer::List(items))
    }

    fn initializer_item(&mut self) -> ParseResult<Initializer> {
        if self.check(&TokenType::LeftBracket) {
            ensure_sufficient_stack(|| self.initializer_list())
        } else {
            Ok(Initializer::Expr(self.expression()?))
        }
    }

    /// Size expressions for each dimension. An empty `[]` takes its size from
    /// a one-dimensional list initializer.
    fn array_dimensions(&mut self, dims: Vec<Option<Expr>>, init: &Option<Initializer>, name: &Token) -> Vec<Expr> {
        let rank = dims.len();
        let mut sizes = Vec::with_capacity(rank);

        for dim in dims {
            match (dim, init) {
                (Some(size), _) => sizes.push(size),
                (None, Some(Initializer::List(items))) if rank == 1 => sizes.push(Expr::Literal {
                    value: Value::Integer(items.len() as i64),
                    span: name.span,
                }),
                (None, _) => {
                    self.report(Diagnostic::semantic_error_with_help(
                        name.span,
                        format!("Array '{}' needs a size", name.lexeme),
                        format!("Write: Declare Integer {}[10]", name.lexeme),
                    ));
                    sizes.push(Expr::Literal {
                        value: Value::Integer(0),
                        span: name.span,
                    });
                }
            }
        }

        sizes
    }

    /// Report a literal that can never be stored in `ty`.
    fn literal_mismatch(&mut self, ty: &TypeName, expr: &Expr) -> bool {
        let Some(found) = literal_type(expr) else {
            return false;
        };

        let compatible = match (ty, &found) {
            (expected, found) if expected == found => true,
            (TypeName::Real, TypeName::Integer) => true,
            (TypeName::String, TypeName::Character) => true,
            (TypeName::Character, TypeName::String) => {
                matches!(expr, Expr::Literal { value: Value::String(s), .. } if s.chars().count() == 1)
            }
            _ => false,
        };

        if !compatible {
            self.report(Diagnostic::semantic_error_with_help(
                *expr.span(),
                format!("A {} value cannot be stored in a {} variable", found, ty),
                format!("Use a {} value, or declare the variable as {}.", ty, found),
            ));
        }
        !compatible
    }

    /// `Module name(params)` or `Function Type name(params)` through the
    /// matching `End`. Inside a class body this defines a method.
    pub(super) fn routine_definition(&mut self) {
        let keyword = self.advance().clone();
        let (kind, block_kind) = match keyword.token_type {
            TokenType::Function => (RoutineKind::Function, BlockKind::Function),
            _ => (RoutineKind::Module, BlockKind::Module),
        };

        let nested = self.ctx.current_routine().is_some();
        if nested {
            self.report(Diagnostic::semantic_error_with_help(
                keyword.span,
                format!("A {} cannot be defined inside another Module or Function", keyword.lexeme),
                "Move it after the 'End' of the enclosing routine.".to_string(),
            ));
        }

        let return_type = match kind {
            RoutineKind::Function if self.starts_type() => Some(self.type_name()),
            RoutineKind::Function => {
                let span = self.missing_span();
                self.report(Diagnostic::syntax_error_with_help(
                    span,
                    "Missing return type after 'Function'; assuming Integer".to_string(),
                    "Write: Function Integer square(Integer n)".to_string(),
                ));
                Some(TypeName::Integer)
            }
            RoutineKind::Module => None,
        };

        let name = if self.check(&TokenType::Identifier) {
            Some(self.advance().clone())
        } else {
            let span = self.error_span();
            self.report(Diagnostic::syntax_error_with_help(
                span,
                format!("Expected a name after '{}'", keyword.lexeme),
                format!("Write: {} showTotal()", keyword.lexeme),
            ));
            None
        };
        let (name, name_span) = match &name {
            Some(token) => (token.lexeme.clone(), token.span),
            None => (format!("<unnamed on line {}>", keyword.line()), keyword.span),
        };

        let class = if nested { None } else { self.ctx.current_class() };
        let id = self.routines.len();
        self.routines.push(Routine {
            name: name.clone(),
            kind,
            params: Vec::new(),
            return_type,
            body: Block::empty(keyword.span),
            local_count: 0,
            class,
            scope: 0,
            span: keyword.span.to(&name_span),
        });
        self.register_routine(id, &name, name_span, class);

        let scope = self.ctx.enter_routine(id);
        let params = self.parameters(&keyword);
        self.end_of_statement();

        let saved_blocks = std::mem::replace(&mut self.open_blocks, vec![block_kind]);
        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        let body = self.block();
        self.expect_end(block_kind, &keyword);
        self.open_blocks = saved_blocks;
        self.loop_depth = saved_loops;
        let local_count = self.ctx.exit_routine();

        if kind == RoutineKind::Function && !body.statements.iter().any(Stmt::contains_return) {
            self.report(
                Diagnostic::semantic_error_with_help(
                    name_span,
                    format!("Function '{}' never returns a value", name),
                    "Add 'Return' followed by the result before 'End Function'.".to_string(),
                )
                .warning(),
            );
        }

        trace!(routine = %name, params = params.len(), locals = local_count, "parsed routine");

        let routine = &mut self.routines[id];
        routine.params = params;
        routine.body = body;
        routine.local_count = local_count;
        routine.scope = scope;
    }

    fn register_routine(&mut self, id: usize, name: &str, span: Span, class: Option<usize>) {
        if name.starts_with('<') {
            return;
        }

        let existing = match class {
            Some(class) => self.classes[class].methods.get(name).copied(),
            None => self.routine_index.get(name).copied(),
        };
        if let Some(existing) = existing {
            let line = self.routines[existing].span.line;
            self.report(Diagnostic::semantic_error_with_help(
                span,
                format!("'{}' is already defined", name),
                format!("The first definition is on line {}. Pick a different name.", line),
            ));
            return;
        }

        match class {
            Some(class) => {
                self.classes[class].methods.insert(name.to_string(), id);
            }
            None => {
                self.routine_index.insert(name.to_string(), id);
            }
        }
    }

    /// `(Type name, Type Ref name, Type name[], ...)`
    fn parameters(&mut self, keyword: &Token) -> Vec<VarId> {
        let line = keyword.line();

        if !self.match_types(&[TokenType::LeftParen]) {
            let span = self.missing_span();
            self.report(Diagnostic::syntax_error_with_help(
                span,
                format!("Missing '()' after the {} name", keyword.lexeme),
                format!("Write: {} showTotal()", keyword.lexeme),
            ));
            return Vec::new();
        }

        let mut params = Vec::new();
        if !self.check(&TokenType::RightParen) {
            loop {
                match self.parameter() {
                    Ok(param) => params.push(param),
                    Err(Reported) => {
                        while self.on_line(line)
                            && !self.check(&TokenType::Comma)
                            && !self.check(&TokenType::RightParen)
                        {
                            self.advance();
                        }
                    }
                }
                if !self.match_types(&[TokenType::Comma]) {
                    break;
                }
            }
        }

        if !self.match_types(&[TokenType::RightParen]) {
            let span = self.error_span();
            self.report(Diagnostic::syntax_error(
                span,
                "Expected ')' after the parameters".to_string(),
            ));
        }
        params
    }

    fn parameter(&mut self) -> ParseResult<VarId> {
        let mut by_ref = false;

        let ty = if self.check(&TokenType::Ref) {
            let ref_token = self.advance().clone();
            by_ref = true;
            if self.starts_type() {
                self.report(Diagnostic::syntax_error_with_help(
                    ref_token.span,
                    "'Ref' goes after the parameter type".to_string(),
                    "Write: Integer Ref count".to_string(),
                ));
                self.type_name()
            } else if self.check(&TokenType::Identifier) {
                self.report(Diagnostic::syntax_error_with_help(
                    ref_token.span,
                    "Missing type before 'Ref'; assuming Integer".to_string(),
                    "Write: Integer Ref count".to_string(),
                ));
                TypeName::Integer
            } else {
                let span = self.error_span();
                return Err(self.report(Diagnostic::syntax_error_with_help(
                    span,
                    "Expected a parameter after 'Ref'".to_string(),
                    "Write: Integer Ref count".to_string(),
                )));
            }
        } else if self.starts_type() {
            self.type_name()
        } else if self.check(&TokenType::Identifier) {
            let token = self.peek().clone();
            self.report(Diagnostic::syntax_error_with_help(
                token.span,
                format!("Missing type for parameter '{}'; assuming Integer", token.lexeme),
                format!("Write: Integer {}", token.lexeme),
            ));
            TypeName::Integer
        } else {
            let span = self.error_span();
            return Err(self.report(Diagnostic::syntax_error_with_help(
                span,
                "Expected a parameter".to_string(),
                "Write: Integer count".to_string(),
            )));
        };

        if self.check(&TokenType::Ref) {
            let ref_token = self.advance().clone();
            if by_ref {
                self.report(Diagnostic::syntax_error(
                    ref_token.span,
                    "'Ref' is written twice".to_string(),
                ));
            }
            by_ref = true;
        }

        let name = self.consume_with_help(
            TokenType::Identifier,
            "Expected a parameter name",
            "Write: Integer Ref count",
        )?;

        let mut rank = 0;
        while self.match_types(&[TokenType::LeftBracket]) {
            if !self.check(&TokenType::RightBracket) {
                let span = self.peek().span;
                self.report(Diagnostic::semantic_error_with_help(
                    span,
                    "Array parameters take their size from the argument".to_string(),
                    format!("Write: {} {}[]", ty, name.lexeme),
                ));
                while self.on_line(name.line()) && !self.check(&TokenType::RightBracket) {
                    self.advance();
                }
            }
            self.consume(TokenType::RightBracket, "Expected ']' in the array parameter")?;
            rank += 1;
        }

        let (id, duplicate) = self.ctx.declare(
            &name.lexeme,
            ty,
            rank,
            DeclarationKind::Parameter { by_ref },
            name.span,
        );
        if let Some(duplicate) = duplicate {
            self.report(duplicate);
        }
        Ok(id)
    }

    /// `Class Name` ... `End Class`: fields and methods.
    pub(super) fn class_definition(&mut self) {
        let keyword = self.advance().clone();

        if self.ctx.current_routine().is_some() || self.ctx.current_class().is_some() {
            self.report(Diagnostic::semantic_error_with_help(
                keyword.span,
                "Classes must be defined at the top level of the program".to_string(),
                "Move the class outside every Module, Function and Class.".to_string(),
            ));
        }

        let (name, name_span) = if self.check(&TokenType::Identifier) {
            let token = self.advance().clone();
            (token.lexeme, token.span)
        } else {
            let span = self.error_span();
            self.report(Diagnostic::syntax_error_with_help(
                span,
                "Expected a class name after 'Class'".to_string(),
                "Write: Class Point".to_string(),
            ));
            (format!("<unnamed on line {}>", keyword.line()), keyword.span)
        };
        self.end_of_statement();

        let id = self.classes.len();
        match self.class_index.get(&name) {
            Some(existing) => {
                let line = self.classes[*existing].span.line;
                self.report(Diagnostic::semantic_error_with_help(
                    name_span,
                    format!("Class '{}' is already defined", name),
                    format!("The first definition is on line {}.", line),
                ));
            }
            None => {
                if !name.starts_with('<') {
                    self.class_index.insert(name.clone(), id);
                }
            }
        }

        let scope = self.ctx.enter_class(id);
        self.classes.push(ClassDef {
            name: name.clone(),
            fields: Vec::new(),
            field_declarations: Vec::new(),
            field_index: HashMap::new(),
            methods: HashMap::new(),
            constructor: None,
            scope,
            span: keyword.span.to(&name_span),
        });

        let saved_blocks = std::mem::replace(&mut self.open_blocks, vec![BlockKind::Class]);
        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);

        while !self.is_at_end() && !self.check(&TokenType::End) {
            let line = self.peek().line();

            if self.match_types(&[TokenType::Public, TokenType::Private]) && !self.on_line(line) {
                let span = self.previous().span;
                self.report(Diagnostic::syntax_error(
                    span,
                    "Expected a field or method after the access modifier".to_string(),
                ));
                continue;
            }

            let token_type = self.peek().token_type;
            match token_type {
                TokenType::Module | TokenType::Function => self.routine_definition(),
                TokenType::Class => self.class_definition(),
                TokenType::Declare | TokenType::TypeName | TokenType::Identifier => {
                    self.match_types(&[TokenType::Declare]);
                    match self.declarators(DeclarationKind::Field) {
                        Ok(declarations) => {
                            self.end_of_statement();
                            self.classes[id].field_declarations.extend(declarations);
                        }
                        Err(Reported) => self.skip_line(line),
                    }
                }
                _ => {
                    let token = self.peek().clone();
                    self.report(Diagnostic::syntax_error_with_help(
                        token.span,
                        format!("Expected a field or method inside Class '{}'", name),
                        "A class body holds field declarations, Modules and Functions.".to_string(),
                    ));
                    self.skip_line(line);
                }
            }
        }

        self.expect_end(BlockKind::Class, &keyword);
        self.open_blocks = saved_blocks;
        self.loop_depth = saved_loops;
        self.ctx.exit_class();

        let fields = self.ctx.symbols.scopes[scope].variables.clone();
        let field_index = fields
            .iter()
            .map(|id| {
                let var = self.ctx.symbols.variable(*id);
                (var.name.clone(), var.offset as usize)
            })
            .collect();

        let class = &mut self.classes[id];
        class.constructor = class.methods.get(&name).copied();
        class.fields = fields;
        class.field_index = field_index;
    }
}

/// Type of a literal initializer, when it is obvious from the source.
fn literal_type(expr: &Expr) -> Option<TypeName> {
    match expr {
        Expr::Literal { value, .. } => match value {
            Value::Integer(_) => Some(TypeName::Integer),
            Value::Real(_) => Some(TypeName::Real),
            Value::String(_) => Some(TypeName::String),
            Value::Boolean(_) => Some(TypeName::Boolean),
            Value::Character(_) => Some(TypeName::Character),
            _ => None,
        },
        Expr::Unary {
            operator: UnaryOp::Negate,
            operand,
            ..
        } => literal_type(operand).filter(|ty| matches!(ty, TypeName::Integer | TypeName::Real)),
        Expr::Grouping { expr, .. } => literal_type(expr),
        Expr::New { class, .. } => Some(TypeName::Class(class.clone())),
        _ => None,
    }
}

fn infer_type(init: &Initializer) -> Option<TypeName> {
    init.flatten().first().and_then(|expr| literal_type(expr))
}
