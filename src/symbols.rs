//! Compile-time symbol and scope model.
//!
//! Every declared name becomes a [`Variable`] in one arena. Offsets are
//! handed out once, in declaration order, and never renumbered:
//!
//! - top-level declarations are statics (next free global index),
//! - parameters get `-(position + 1)` relative to the base pointer,
//! - routine locals get the next free frame slot (`0, 1, 2, ...`),
//! - class fields get the next free slot of the instance layout.

use crate::error::{Diagnostic, Span};
use crate::value::TypeName;

pub type VarId = usize;
pub type ScopeId = usize;
pub type RoutineId = usize;
pub type ClassId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Static,
    Local,
    Argument,
    RefArgument,
    Field,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub ty: TypeName,
    pub storage: Storage,
    pub offset: i64,
    /// Number of dimensions; zero for scalars.
    pub rank: usize,
    pub is_constant: bool,
    pub scope: ScopeId,
    pub routine: Option<RoutineId>,
    pub span: Span,
}

impl Variable {
    pub fn is_array(&self) -> bool {
        self.rank > 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    pub variables: Vec<VarId>,
}

/// What a declaration introduces; decides the storage class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKind {
    Variable,
    Constant,
    Parameter { by_ref: bool },
    Field,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolTable {
    pub variables: Vec<Variable>,
    pub scopes: Vec<Scope>,
    pub static_count: usize,
}

impl SymbolTable {
    pub const GLOBAL_SCOPE: ScopeId = 0;

    pub fn new() -> Self {
        Self {
            variables: Vec::new(),
            scopes: vec![Scope {
                parent: None,
                variables: Vec::new(),
            }],
            static_count: 0,
        }
    }

    pub fn variable(&self, id: VarId) -> &Variable {
        &self.variables[id]
    }

    pub fn statics(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter().filter(|v| v.storage == Storage::Static)
    }

    fn find_in(&self, scope: ScopeId, name: &str) -> Option<VarId> {
        self.scopes[scope]
            .variables
            .iter()
            .copied()
            .find(|id| self.variables[*id].name == name)
    }

    /// Walk outward from `scope` to the global scope.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Option<VarId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            if let Some(var) = self.find_in(id, name) {
                return Some(var);
            }
            current = self.scopes[id].parent;
        }
        None
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-routine counters while its body is being parsed.
#[derive(Debug, Clone)]
struct RoutineState {
    id: RoutineId,
    param_count: usize,
    local_count: usize,
}

/// Per-class counters while its body is being parsed.
#[derive(Debug, Clone)]
struct ClassState {
    id: ClassId,
    scope: ScopeId,
    field_count: usize,
}

/// Parser-side owner of the scope chain. Passed around explicitly instead of
/// living in global state.
#[derive(Debug)]
pub struct CompileContext {
    pub symbols: SymbolTable,
    scope: ScopeId,
    routines: Vec<RoutineState>,
    classes: Vec<ClassState>,
    saved_scopes: Vec<ScopeId>,
}

impl CompileContext {
    pub fn new() -> Self {
        Self {
            symbols: SymbolTable::new(),
            scope: SymbolTable::GLOBAL_SCOPE,
            routines: Vec::new(),
            classes: Vec::new(),
            saved_scopes: Vec::new(),
        }
    }

    pub fn current_scope(&self) -> ScopeId {
        self.scope
    }

    pub fn current_routine(&self) -> Option<RoutineId> {
        self.routines.last().map(|r| r.id)
    }

    pub fn current_class(&self) -> Option<ClassId> {
        self.classes.last().map(|c| c.id)
    }

    pub fn push_scope(&mut self) -> ScopeId {
        self.symbols.scopes.push(Scope {
            parent: Some(self.scope),
            variables: Vec::new(),
        });
        self.scope = self.symbols.scopes.len() - 1;
        self.scope
    }

    pub fn pop_scope(&mut self) {
        if let Some(parent) = self.symbols.scopes[self.scope].parent {
            self.scope = parent;
        }
    }

    /// Open the field scope of a class. Its methods nest inside it.
    pub fn enter_class(&mut self, id: ClassId) -> ScopeId {
        let saved = self.scope;
        self.scope = SymbolTable::GLOBAL_SCOPE;
        let scope = self.push_scope();
        self.classes.push(ClassState {
            id,
            scope,
            field_count: 0,
        });
        self.saved_scopes.push(saved);
        scope
    }

    /// Returns the number of fields declared.
    pub fn exit_class(&mut self) -> usize {
        let field_count = self.classes.pop().map(|c| c.field_count).unwrap_or(0);
        self.scope = self.saved_scopes.pop().unwrap_or(SymbolTable::GLOBAL_SCOPE);
        field_count
    }

    /// Open the scope of a routine body. A routine sees the fields of the
    /// class it is declared in, then the statics.
    pub fn enter_routine(&mut self, id: RoutineId) -> ScopeId {
        let saved = self.scope;
        self.scope = match self.classes.last() {
            Some(class) => class.scope,
            None => SymbolTable::GLOBAL_SCOPE,
        };
        let scope = self.push_scope();
        self.routines.push(RoutineState {
            id,
            param_count: 0,
            local_count: 0,
        });
        self.saved_scopes.push(saved);
        scope
    }

    /// Returns the number of local slots the routine's frame needs.
    pub fn exit_routine(&mut self) -> usize {
        let local_count = self.routines.pop().map(|r| r.local_count).unwrap_or(0);
        self.scope = self.saved_scopes.pop().unwrap_or(SymbolTable::GLOBAL_SCOPE);
        local_count
    }

    pub fn lookup(&self, name: &str) -> Option<VarId> {
        self.symbols.lookup(self.scope, name)
    }

    /// Declare `name` in the current scope.
    ///
    /// A duplicate in the same scope is reported through the returned
    /// diagnostic, but the new variable is still created and gets its own
    /// slot so the tree stays well-formed.
    pub fn declare(
        &mut self,
        name: &str,
        ty: TypeName,
        rank: usize,
        kind: DeclarationKind,
        span: Span,
    ) -> (VarId, Option<Diagnostic>) {
        let duplicate = self.symbols.find_in(self.scope, name).map(|existing| {
            let first_line = self.symbols.variables[existing].span.line;
            Diagnostic::semantic_error_with_help(
                span,
                format!("'{}' is already declared in this scope", name),
                format!("The first declaration is on line {}. Pick a different name.", first_line),
            )
        });

        let (storage, offset) = match kind {
            DeclarationKind::Field => match self.classes.last_mut() {
                Some(class) => {
                    class.field_count += 1;
                    (Storage::Field, (class.field_count - 1) as i64)
                }
                None => self.next_static(),
            },
            DeclarationKind::Parameter { by_ref } => match self.routines.last_mut() {
                Some(routine) => {
                    routine.param_count += 1;
                    let storage = if by_ref { Storage::RefArgument } else { Storage::Argument };
                    (storage, -(routine.param_count as i64))
                }
                None => self.next_static(),
            },
            DeclarationKind::Variable | DeclarationKind::Constant => match self.routines.last_mut() {
                Some(routine) => {
                    routine.local_count += 1;
                    (Storage::Local, (routine.local_count - 1) as i64)
                }
                None => self.next_static(),
            },
        };

        let id = self.symbols.variables.len();
        self.symbols.variables.push(Variable {
            name: name.to_string(),
            ty,
            storage,
            offset,
            rank,
            is_constant: kind == DeclarationKind::Constant,
            scope: self.scope,
            routine: self.current_routine(),
            span,
        });
        self.symbols.scopes[self.scope].variables.push(id);
        (id, duplicate)
    }

    fn next_static(&mut self) -> (Storage, i64) {
        self.symbols.static_count += 1;
        (Storage::Static, (self.symbols.static_count - 1) as i64)
    }

    pub fn into_symbols(self) -> SymbolTable {
        self.symbols
    }
}

impl Default for CompileContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        Span::new(0, 1, 1)
    }

    #[test]
    fn top_level_declarations_are_statics_in_order() {
        let mut ctx = CompileContext::new();
        let (a, _) = ctx.declare("a", TypeName::Integer, 0, DeclarationKind::Variable, span());
        let (b, _) = ctx.declare("b", TypeName::Real, 0, DeclarationKind::Variable, span());
        assert_eq!(ctx.symbols.variable(a).storage, Storage::Static);
        assert_eq!(ctx.symbols.variable(a).offset, 0);
        assert_eq!(ctx.symbols.variable(b).offset, 1);
        assert_eq!(ctx.symbols.static_count, 2);
    }

    #[test]
    fn parameters_go_below_and_locals_above_the_base_pointer() {
        let mut ctx = CompileContext::new();
        ctx.enter_routine(0);
        let (p0, _) = ctx.declare("x", TypeName::Integer, 0, DeclarationKind::Parameter { by_ref: false }, span());
        let (p1, _) = ctx.declare("y", TypeName::Integer, 0, DeclarationKind::Parameter { by_ref: true }, span());
        let (l0, _) = ctx.declare("t", TypeName::Integer, 0, DeclarationKind::Variable, span());
        ctx.push_scope();
        let (l1, _) = ctx.declare("u", TypeName::Integer, 0, DeclarationKind::Variable, span());
        ctx.pop_scope();
        assert_eq!(ctx.exit_routine(), 2);

        let vars = &ctx.symbols;
        assert_eq!((vars.variable(p0).storage, vars.variable(p0).offset), (Storage::Argument, -1));
        assert_eq!((vars.variable(p1).storage, vars.variable(p1).offset), (Storage::RefArgument, -2));
        assert_eq!((vars.variable(l0).storage, vars.variable(l0).offset), (Storage::Local, 0));
        assert_eq!(vars.variable(l1).offset, 1);
        assert_eq!(ctx.current_scope(), SymbolTable::GLOBAL_SCOPE);
    }

    #[test]
    fn duplicate_is_reported_but_still_allocated() {
        let mut ctx = CompileContext::new();
        let (first, none) = ctx.declare("n", TypeName::Integer, 0, DeclarationKind::Variable, span());
        let (second, dup) = ctx.declare("n", TypeName::Integer, 0, DeclarationKind::Variable, span());
        assert!(none.is_none());
        assert!(dup.is_some());
        assert_ne!(first, second);
        assert_ne!(ctx.symbols.variable(first).offset, ctx.symbols.variable(second).offset);
    }

    #[test]
    fn lookup_walks_outward_and_inner_names_shadow() {
        let mut ctx = CompileContext::new();
        let (global, _) = ctx.declare("total", TypeName::Integer, 0, DeclarationKind::Variable, span());
        ctx.enter_routine(0);
        assert_eq!(ctx.lookup("total"), Some(global));
        let (local, _) = ctx.declare("total", TypeName::Integer, 0, DeclarationKind::Variable, span());
        assert_eq!(ctx.lookup("total"), Some(local));
        ctx.exit_routine();
        assert_eq!(ctx.lookup("total"), Some(global));
    }

    #[test]
    fn methods_see_class_fields() {
        let mut ctx = CompileContext::new();
        ctx.enter_class(0);
        let (field, _) = ctx.declare("width", TypeName::Real, 0, DeclarationKind::Field, span());
        ctx.enter_routine(0);
        assert_eq!(ctx.lookup("width"), Some(field));
        ctx.exit_routine();
        assert_eq!(ctx.exit_class(), 1);
        assert_eq!(ctx.lookup("width"), None);
        assert_eq!(ctx.symbols.variable(field).storage, Storage::Field);
    }
}
