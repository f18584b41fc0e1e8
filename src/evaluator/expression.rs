use super::{Eval, Interpreter};
use crate::ast::{BinaryOp, Expr, LogicalOp, UnaryOp};
use crate::error::{Diagnostic, Span};
use crate::native_stack::ensure_sufficient_stack;
use crate::stack::Place;
use crate::value::{Kind, Value, ValueError};
use std::cmp::Ordering;

impl<'p, 'h> Interpreter<'p, 'h> {
    pub(crate) fn evaluate_expression(&mut self, expr: &Expr) -> Eval<Value> {
        ensure_sufficient_stack(|| self.evaluate_expression_inner(expr))
    }

    fn evaluate_expression_inner(&mut self, expr: &Expr) -> Eval<Value> {
        match expr {
            Expr::Literal { value, .. } => Ok(value.clone()),

            Expr::Variable { .. } | Expr::Index { .. } | Expr::Field { .. } => match self.place(expr)? {
                Some((place, _)) => Ok(self.read_place(&place).unwrap_or(Value::Null)),
                None => Ok(Value::Null),
            },

            Expr::Binary {
                left,
                operator,
                right,
                span,
            } => {
                let left = self.evaluate_expression(left)?;
                let right = self.evaluate_expression(right)?;
                Ok(self.evaluate_binary_op(*operator, left, right, *span))
            }

            Expr::Logical {
                left,
                operator,
                right,
                ..
            } => {
                let left = self.test(left)?;
                let result = match operator {
                    LogicalOp::And if !left => false,
                    LogicalOp::Or if left => true,
                    _ => self.test(right)?,
                };
                Ok(Value::Boolean(result))
            }

            Expr::Unary {
                operator,
                operand,
                span,
            } => {
                let value = self.evaluate_expression(operand)?;
                let result = match operator {
                    UnaryOp::Negate => value.negate(),
                    UnaryOp::Not => value.not(),
                };
                Ok(result.unwrap_or_else(|error| {
                    self.diagnostics.push(Diagnostic::conversion_error(*span, error.to_string()));
                    match operator {
                        UnaryOp::Negate => Value::Integer(0),
                        UnaryOp::Not => Value::Boolean(false),
                    }
                }))
            }

            Expr::Call { name, args, span } => self.call_by_name(name, args, *span),
            Expr::MethodCall {
                object,
                name,
                args,
                span,
            } => self.call_method(object, name, args, *span),
            Expr::New { class, args, span } => self.construct(class, args, *span),
            Expr::Grouping { expr, .. } => self.evaluate_expression(expr),

            // Already reported while parsing.
            Expr::Error { .. } => Ok(Value::Null),
        }
    }

    /// Evaluate a loop or branch test. Anything but a Boolean is reported
    /// and counts as false.
    pub(crate) fn test(&mut self, condition: &Expr) -> Eval<bool> {
        let value = self.evaluate_expression(condition)?;
        match value.convert_to_bool() {
            Ok(result) => Ok(result),
            Err(_) => {
                if !matches!(condition, Expr::Error { .. }) {
                    self.diagnostics.push(Diagnostic::conversion_error(
                        *condition.span(),
                        format!("condition must be Boolean, found {}", value.kind()),
                    ));
                }
                Ok(false)
            }
        }
    }

    pub(crate) fn evaluate_binary_op(&mut self, operator: BinaryOp, left: Value, right: Value, span: Span) -> Value {
        let ordered = |accept: fn(Ordering) -> bool| left.compare(&right).map(|order| Value::Boolean(accept(order)));
        let result = match operator {
            BinaryOp::Add => left.add(&right),
            BinaryOp::Subtract => left.sub(&right),
            BinaryOp::Multiply => left.mul(&right),
            BinaryOp::Divide => left.div(&right),
            BinaryOp::Modulo => left.rem(&right),
            BinaryOp::Power => left.pow(&right),
            BinaryOp::Equal => left.equals(&right).map(Value::Boolean),
            BinaryOp::NotEqual => left.equals(&right).map(|equal| Value::Boolean(!equal)),
            BinaryOp::Less => ordered(|order| order == Ordering::Less),
            BinaryOp::LessEqual => ordered(|order| order != Ordering::Greater),
            BinaryOp::Greater => ordered(|order| order == Ordering::Greater),
            BinaryOp::GreaterEqual => ordered(|order| order != Ordering::Less),
        };

        match result {
            Ok(value) => value,
            Err(error) => {
                let diagnostic = match error {
                    ValueError::DivisionByZero => Diagnostic::arithmetic_error(span, error.to_string()),
                    _ => Diagnostic::conversion_error(span, error.to_string()),
                };
                self.diagnostics.push(diagnostic);
                fallback(operator, &left, &right)
            }
        }
    }

    /// Resolve an assignable expression to its storage and the kind values
    /// stored there must have. `None` after a reported problem.
    pub(crate) fn place(&mut self, expr: &Expr) -> Eval<Option<(Place, Kind)>> {
        let program = self.program;
        match expr {
            Expr::Variable { var, .. } => {
                let var = program.symbols.variable(*var);
                let place = self.variable_place(var, *expr.span())?;
                let kind = if var.is_array() { Kind::Array } else { var.ty.kind() };
                Ok(Some((place, kind)))
            }

            Expr::Index { base, indices, span } => {
                let container = self.evaluate_expression(base)?;
                let mut resolved = Vec::with_capacity(indices.len());
                for index in indices {
                    let value = self.evaluate_expression(index)?;
                    match value.as_integer() {
                        Ok(n) => resolved.push(n),
                        Err(error) => {
                            self.diagnostics
                                .push(Diagnostic::conversion_error(*index.span(), error.to_string()));
                            resolved.push(0);
                        }
                    }
                }

                let array = match container {
                    Value::Array(array) => array,
                    other => {
                        self.diagnostics.push(Diagnostic::conversion_error(
                            *span,
                            format!("cannot index a value of kind {}", other.kind()),
                        ));
                        return Ok(None);
                    }
                };

                if array.borrow().is_empty() {
                    self.diagnostics
                        .push(Diagnostic::index_error(*span, "array has no elements".to_string()));
                    return Ok(None);
                }
                let (offset, problems, kind) = {
                    let array = array.borrow();
                    let (offset, problems) = array.locate(&resolved);
                    (offset, problems, array.element.kind())
                };
                for problem in problems {
                    self.diagnostics.push(Diagnostic::index_error(*span, problem.to_string()));
                }
                Ok(Some((Place::Element(array, offset), kind)))
            }

            Expr::Field { object, name, span } => {
                let object = match self.evaluate_expression(object)? {
                    Value::Object(object) => object,
                    other => {
                        self.diagnostics.push(Diagnostic::conversion_error(
                            *span,
                            format!("cannot read field '{}' of {}", name, other.kind()),
                        ));
                        return Ok(None);
                    }
                };
                let class = &program.classes[object.borrow().class];
                match class.field_index.get(name) {
                    Some(&offset) => {
                        let field = program.symbols.variable(class.fields[offset]);
                        let kind = if field.is_array() { Kind::Array } else { field.ty.kind() };
                        Ok(Some((Place::Field(object, offset), kind)))
                    }
                    None => {
                        self.diagnostics.push(Diagnostic::semantic_error(
                            *span,
                            format!("Class '{}' has no field '{}'", class.name, name),
                        ));
                        Ok(None)
                    }
                }
            }

            Expr::Grouping { expr, .. } => ensure_sufficient_stack(|| self.place(expr)),
            _ => Ok(None),
        }
    }
}

/// Result substituted for a failed binary operation.
fn fallback(operator: BinaryOp, left: &Value, right: &Value) -> Value {
    let text = |value: &Value| matches!(value, Value::String(_) | Value::Character(_));
    let real = |value: &Value| matches!(value, Value::Real(_));
    if operator.is_comparison() {
        Value::Boolean(false)
    } else if operator == BinaryOp::Add && (text(left) || text(right)) {
        Value::String(String::new())
    } else if real(left) || real(right) {
        Value::Real(0.0)
    } else {
        Value::Integer(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_operations_fall_back_by_operand_kind() {
        let s = Value::String("a".into());
        assert_eq!(fallback(BinaryOp::Add, &s, &Value::Integer(1)), Value::String(String::new()));
        assert_eq!(fallback(BinaryOp::Divide, &Value::Real(1.0), &Value::Integer(0)), Value::Real(0.0));
        assert_eq!(fallback(BinaryOp::Modulo, &Value::Integer(1), &Value::Integer(0)), Value::Integer(0));
        assert_eq!(fallback(BinaryOp::Less, &s, &Value::Integer(1)), Value::Boolean(false));
    }
}
