use crate::error::Span;
use crate::symbols::{ClassId, RoutineId, ScopeId, SymbolTable, VarId};
use crate::value::{TypeName, Value};
use std::collections::HashMap;
use std::fmt;

/// Result of parsing: the executable tree plus its side tables.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Top-level statements; they form the program entry.
    pub statements: Vec<Stmt>,
    pub routines: Vec<Routine>,
    pub classes: Vec<ClassDef>,
    pub symbols: SymbolTable,
    pub routine_index: HashMap<String, RoutineId>,
    pub class_index: HashMap<String, ClassId>,
}

impl Program {
    pub fn routine(&self, name: &str) -> Option<&Routine> {
        self.routine_index.get(name).map(|id| &self.routines[*id])
    }

    pub fn class(&self, name: &str) -> Option<&ClassDef> {
        self.class_index.get(name).map(|id| &self.classes[*id])
    }

    /// Classes, free routines and statics in source order, for editor
    /// outlines. Works on trees produced from source with errors.
    pub fn outline(&self) -> Vec<OutlineEntry> {
        let mut entries = Vec::new();

        for var in self.symbols.statics() {
            entries.push(OutlineEntry {
                kind: OutlineKind::Static,
                name: var.name.clone(),
                detail: if var.is_array() {
                    format!("{}{}", var.ty, "[]".repeat(var.rank))
                } else {
                    var.ty.to_string()
                },
                line: var.span.line,
                depth: 0,
            });
        }

        for class in &self.classes {
            entries.push(OutlineEntry {
                kind: OutlineKind::Class,
                name: class.name.clone(),
                detail: format!("{} field(s)", class.fields.len()),
                line: class.span.line,
                depth: 0,
            });
        }

        for routine in &self.routines {
            entries.push(OutlineEntry {
                kind: match routine.kind {
                    RoutineKind::Module => OutlineKind::Module,
                    RoutineKind::Function => OutlineKind::Function,
                },
                name: routine.qualified_name(self),
                detail: routine.signature(self),
                line: routine.span.line,
                depth: usize::from(routine.class.is_some()),
            });
        }

        entries.sort_by_key(|entry| (entry.line, entry.depth));
        entries
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutlineKind {
    Static,
    Class,
    Module,
    Function,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineEntry {
    pub kind: OutlineKind,
    pub name: String,
    pub detail: String,
    pub line: usize,
    pub depth: usize,
}

impl fmt::Display for OutlineEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match self.kind {
            OutlineKind::Static => "static",
            OutlineKind::Class => "class",
            OutlineKind::Module => "module",
            OutlineKind::Function => "function",
        };
        write!(
            f,
            "{:>4}  {}{:<8} {} {}",
            self.line,
            "  ".repeat(self.depth),
            kind,
            self.name,
            self.detail
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutineKind {
    Module,
    Function,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Routine {
    pub name: String,
    pub kind: RoutineKind,
    pub params: Vec<VarId>,
    pub return_type: Option<TypeName>,
    pub body: Block,
    /// Frame size: number of local slots above the base pointer.
    pub local_count: usize,
    pub class: Option<ClassId>,
    pub scope: ScopeId,
    pub span: Span,
}

impl Routine {
    pub fn qualified_name(&self, program: &Program) -> String {
        match self.class {
            Some(class) => format!("{}.{}", program.classes[class].name, self.name),
            None => self.name.clone(),
        }
    }

    pub fn signature(&self, program: &Program) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|id| {
                let var = program.symbols.variable(*id);
                let by_ref = if var.storage == crate::symbols::Storage::RefArgument {
                    " Ref"
                } else {
                    ""
                };
                format!("{}{} {}{}", var.ty, by_ref, var.name, "[]".repeat(var.rank))
            })
            .collect();
        match &self.return_type {
            Some(ty) => format!("({}) As {}", params.join(", "), ty),
            None => format!("({})", params.join(", ")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    /// Field variables in layout order; an instance has one slot per field.
    pub fields: Vec<VarId>,
    /// Field declarations, run against every new instance.
    pub field_declarations: Vec<Declaration>,
    pub field_index: HashMap<String, usize>,
    pub methods: HashMap<String, RoutineId>,
    pub constructor: Option<RoutineId>,
    pub scope: ScopeId,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

impl Block {
    pub fn empty(span: Span) -> Self {
        Self {
            statements: Vec::new(),
            span,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub var: VarId,
    /// Dimension size expressions, outermost first; empty for scalars.
    pub dims: Vec<Expr>,
    pub init: Option<Initializer>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Initializer {
    Expr(Expr),
    /// `[a, b, c]` or a bare `a, b, c` list; nested lists flatten
    /// depth-first into storage order.
    List(Vec<Initializer>),
}

impl Initializer {
    /// Element initializers in the order they are written.
    pub fn flatten(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into<'a>(&'a self, out: &mut Vec<&'a Expr>) {
        match self {
            Initializer::Expr(expr) => out.push(expr),
            Initializer::List(items) => {
                for item in items {
                    item.flatten_into(out);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub labels: Vec<Expr>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Declare {
        declarations: Vec<Declaration>,
        span: Span,
    },
    Assign {
        target: Expr,
        value: Expr,
        span: Span,
    },
    Display {
        items: Vec<Expr>,
        span: Span,
    },
    Input {
        target: Expr,
        span: Span,
    },
    /// `Call name(...)` / `Call obj.method(...)`; `call` is a call expression.
    Call {
        call: Expr,
        span: Span,
    },
    If {
        /// `If` and every `Else If`, in order.
        branches: Vec<(Expr, Block)>,
        else_branch: Option<Block>,
        span: Span,
    },
    Select {
        subject: Expr,
        cases: Vec<Case>,
        default: Option<Block>,
        span: Span,
    },
    While {
        condition: Expr,
        body: Block,
        span: Span,
    },
    DoLoop {
        body: Block,
        condition: Expr,
        /// `Loop Until` stops when the test is true, `Loop While` when false.
        until: bool,
        span: Span,
    },
    For {
        counter: Expr,
        start: Expr,
        end: Expr,
        step: Option<Expr>,
        body: Block,
        span: Span,
    },
    ForEach {
        item: Expr,
        array: Expr,
        body: Block,
        span: Span,
    },
    Return {
        value: Option<Expr>,
        span: Span,
    },
    Break {
        span: Span,
    },
    Continue {
        span: Span,
    },
    Stop {
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> &Span {
        match self {
            Stmt::Declare { span, .. } => span,
            Stmt::Assign { span, .. } => span,
            Stmt::Display { span, .. } => span,
            Stmt::Input { span, .. } => span,
            Stmt::Call { span, .. } => span,
            Stmt::If { span, .. } => span,
            Stmt::Select { span, .. } => span,
            Stmt::While { span, .. } => span,
            Stmt::DoLoop { span, .. } => span,
            Stmt::For { span, .. } => span,
            Stmt::ForEach { span, .. } => span,
            Stmt::Return { span, .. } => span,
            Stmt::Break { span } => span,
            Stmt::Continue { span } => span,
            Stmt::Stop { span } => span,
        }
    }

    /// True when this statement, or any nested one, is a `Return`.
    pub fn contains_return(&self) -> bool {
        let any = |block: &Block| block.statements.iter().any(Stmt::contains_return);
        match self {
            Stmt::Return { .. } => true,
            Stmt::If {
                branches,
                else_branch,
                ..
            } => branches.iter().any(|(_, block)| any(block)) || else_branch.as_ref().is_some_and(any),
            Stmt::Select { cases, default, .. } => {
                cases.iter().any(|case| any(&case.body)) || default.as_ref().is_some_and(any)
            }
            Stmt::While { body, .. }
            | Stmt::DoLoop { body, .. }
            | Stmt::For { body, .. }
            | Stmt::ForEach { body, .. } => any(body),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal {
        value: Value,
        span: Span,
    },
    Variable {
        var: VarId,
        name: String,
        span: Span,
    },
    /// `base[i][j]...`; `base` is a variable or field access.
    Index {
        base: Box<Expr>,
        indices: Vec<Expr>,
        span: Span,
    },
    Field {
        object: Box<Expr>,
        name: String,
        span: Span,
    },
    Binary {
        left: Box<Expr>,
        operator: BinaryOp,
        right: Box<Expr>,
        span: Span,
    },
    Logical {
        left: Box<Expr>,
        operator: LogicalOp,
        right: Box<Expr>,
        span: Span,
    },
    Unary {
        operator: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    /// Call of a routine, built-in or host routine by name.
    Call {
        name: String,
        args: Vec<Expr>,
        span: Span,
    },
    MethodCall {
        object: Box<Expr>,
        name: String,
        args: Vec<Expr>,
        span: Span,
    },
    New {
        class: String,
        args: Vec<Expr>,
        span: Span,
    },
    Grouping {
        expr: Box<Expr>,
        span: Span,
    },
    /// Placeholder for an expression that failed to parse or resolve; the
    /// diagnostic has already been recorded.
    Error {
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> &Span {
        match self {
            Expr::Literal { span, .. } => span,
            Expr::Variable { span, .. } => span,
            Expr::Index { span, .. } => span,
            Expr::Field { span, .. } => span,
            Expr::Binary { span, .. } => span,
            Expr::Logical { span, .. } => span,
            Expr::Unary { span, .. } => span,
            Expr::Call { span, .. } => span,
            Expr::MethodCall { span, .. } => span,
            Expr::New { span, .. } => span,
            Expr::Grouping { span, .. } => span,
            Expr::Error { span } => span,
        }
    }

    /// Whether the expression denotes storage that can be written or aliased.
    pub fn is_place(&self) -> bool {
        matches!(self, Expr::Variable { .. } | Expr::Index { .. } | Expr::Field { .. })
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Expr::Call { .. } | Expr::MethodCall { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl BinaryOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::Less
                | BinaryOp::LessEqual
                | BinaryOp::Greater
                | BinaryOp::GreaterEqual
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}
