use super::{CallRecord, Eval, Flow, Halt, Interpreter};
use crate::ast::Expr;
use crate::builtins;
use crate::error::{Diagnostic, Span};
use crate::native_stack::ensure_sufficient_stack;
use crate::stack::Cell;
use crate::symbols::{RoutineId, Storage};
use crate::value::{Kind, Object, ObjectRef, Value};
use tracing::trace;

impl<'p, 'h> Interpreter<'p, 'h> {
    /// Resolve a bare call: a method of the current object, then a routine
    /// of the program, then a built-in, then whatever the host provides.
    pub(super) fn call_by_name(&mut self, name: &str, args: &[Expr], span: Span) -> Eval<Value> {
        let program = self.program;
        if let Some(this) = self.this() {
            let class = this.borrow().class;
            if let Some(&method) = program.classes[class].methods.get(name) {
                return self.invoke(method, Some(this), args, span);
            }
        }
        if let Some(&id) = program.routine_index.get(name) {
            return self.invoke(id, None, args, span);
        }

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.evaluate_expression(arg)?);
        }

        if let Some(result) = builtins::call(name, &values) {
            return Ok(result.unwrap_or_else(|error| {
                self.diagnostics
                    .push(Diagnostic::conversion_error(span, format!("{}: {}", name, error)));
                builtins::default_result(name)
            }));
        }

        if let Some(value) = self.host.invoke(name, &values) {
            trace!(routine = name, "host routine");
            return Ok(value);
        }

        self.diagnostics.push(Diagnostic::semantic_error(
            span,
            format!("Routine '{}' is not defined by the program or the host", name),
        ));
        Ok(Value::Null)
    }

    pub(super) fn call_method(&mut self, object: &Expr, name: &str, args: &[Expr], span: Span) -> Eval<Value> {
        let program = self.program;
        let object = match self.evaluate_expression(object)? {
            Value::Object(object) => object,
            other => {
                self.diagnostics.push(Diagnostic::conversion_error(
                    span,
                    format!("cannot call method '{}' on {}", name, other.kind()),
                ));
                return Ok(Value::Null);
            }
        };

        let class = &program.classes[object.borrow().class];
        match class.methods.get(name) {
            Some(&method) => self.invoke(method, Some(object), args, span),
            None => {
                self.diagnostics.push(Diagnostic::semantic_error(
                    span,
                    format!("Class '{}' has no method '{}'", class.name, name),
                ));
                Ok(Value::Null)
            }
        }
    }

    /// `New Class(args)`: fresh fields, field initializers, then the constructor.
    pub(super) fn construct(&mut self, class_name: &str, args: &[Expr], span: Span) -> Eval<Value> {
        let program = self.program;
        let Some(&class_id) = program.class_index.get(class_name) else {
            self.diagnostics.push(Diagnostic::semantic_error(
                span,
                format!("Class '{}' is not defined", class_name),
            ));
            return Ok(Value::Null);
        };
        let class = &program.classes[class_id];
        let object = Object {
            class: class_id,
            class_name: class.name.clone(),
            fields: vec![Value::Null; class.fields.len()],
        }
        .into_ref();

        self.calls.push(CallRecord {
            this: Some(object.clone()),
        });
        let initialized = class
            .field_declarations
            .iter()
            .try_for_each(|declaration| self.execute_declaration(declaration));
        self.calls.pop();
        initialized?;

        if let Some(constructor) = class.constructor {
            self.invoke(constructor, Some(object.clone()), args, span)?;
        }
        trace!(class = %class.name, "object created");
        Ok(Value::Object(object))
    }

    /// Bind `args` to the parameters of routine `id` and run it.
    fn invoke(&mut self, id: RoutineId, this: Option<ObjectRef>, args: &[Expr], span: Span) -> Eval<Value> {
        let program = self.program;
        let routine = &program.routines[id];
        if args.len() != routine.params.len() {
            self.diagnostics.push(Diagnostic::semantic_error(
                span,
                format!(
                    "'{}' expects {} argument(s) but {} were given",
                    routine.name,
                    routine.params.len(),
                    args.len()
                ),
            ));
        }

        let mut cells = Vec::with_capacity(routine.params.len());
        for (position, param) in routine.params.iter().enumerate() {
            let var = program.symbols.variable(*param);
            let kind = if var.is_array() { Kind::Array } else { var.ty.kind() };
            let cell = match args.get(position) {
                None => Cell::Direct(Value::default_of_kind(kind)),
                Some(arg) if var.storage == Storage::RefArgument => match self.place(arg)? {
                    Some((place, _)) => Cell::Slot(place),
                    None => {
                        if !arg.is_place() {
                            self.diagnostics.push(Diagnostic::semantic_error(
                                *arg.span(),
                                format!(
                                    "Argument {} of '{}' is passed by value because it is not a variable",
                                    position + 1,
                                    routine.name
                                ),
                            ));
                        }
                        let value = self.evaluate_expression(arg)?;
                        Cell::Direct(self.coerce(value, kind, *arg.span()))
                    }
                },
                Some(arg) => {
                    let value = self.evaluate_expression(arg)?;
                    Cell::Direct(self.coerce(value, kind, *arg.span()))
                }
            };
            cells.push(cell);
        }
        for surplus in args.iter().skip(routine.params.len()) {
            self.evaluate_expression(surplus)?;
        }

        self.run_routine(id, this, cells, span)
    }

    /// Push the argument cells and a frame, run the body and tear the frame
    /// down again whatever signal the body produced.
    pub(super) fn run_routine(
        &mut self,
        id: RoutineId,
        this: Option<ObjectRef>,
        cells: Vec<Cell>,
        span: Span,
    ) -> Eval<Value> {
        let program = self.program;
        let routine = &program.routines[id];
        if self.calls.len() >= self.config.max_call_depth {
            return Err(self.fatal(
                span,
                format!(
                    "Call depth limit of {} exceeded calling '{}'",
                    self.config.max_call_depth, routine.name
                ),
            ));
        }

        // Argument i ends up at offset -(i + 1).
        let arg_count = cells.len();
        for cell in cells.into_iter().rev() {
            self.stack.push(cell);
        }
        self.stack.push_frame(routine.local_count, arg_count);
        self.calls.push(CallRecord { this });
        trace!(routine = %routine.name, depth = self.calls.len(), "enter");

        let flow = ensure_sufficient_stack(|| self.execute_block(&routine.body));

        self.calls.pop();
        if !self.stack.pop_frame() {
            return Err(self.fatal(span, format!("Call frame of '{}' is missing on return", routine.name)));
        }
        trace!(routine = %routine.name, signal = ?flow, "leave");

        match flow {
            Flow::Stop => Err(Halt),
            Flow::Return(value) => Ok(match &routine.return_type {
                Some(ty) => self.coerce(value, ty.kind(), span),
                None => Value::Null,
            }),
            _ => Ok(routine.return_type.as_ref().map_or(Value::Null, Value::default_for)),
        }
    }
}
