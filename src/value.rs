use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Runtime store kind of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Integer,
    Real,
    String,
    Boolean,
    Character,
    Array,
    Object,
    Null,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Kind::Integer => "Integer",
            Kind::Real => "Real",
            Kind::String => "String",
            Kind::Boolean => "Boolean",
            Kind::Character => "Character",
            Kind::Array => "Array",
            Kind::Object => "Object",
            Kind::Null => "Null",
        };
        f.write_str(name)
    }
}

/// Declared type of a variable, parameter, field or array element.
/// Class types are kept by name and resolved against the class table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeName {
    Integer,
    Real,
    String,
    Boolean,
    Character,
    Class(String),
}

impl TypeName {
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "Integer" => Some(TypeName::Integer),
            "Real" => Some(TypeName::Real),
            "String" => Some(TypeName::String),
            "Boolean" => Some(TypeName::Boolean),
            "Character" => Some(TypeName::Character),
            _ => None,
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            TypeName::Integer => Kind::Integer,
            TypeName::Real => Kind::Real,
            TypeName::String => Kind::String,
            TypeName::Boolean => Kind::Boolean,
            TypeName::Character => Kind::Character,
            TypeName::Class(_) => Kind::Object,
        }
    }

    pub fn is_primitive(&self) -> bool {
        !matches!(self, TypeName::Class(_))
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TypeName::Class(name) => f.write_str(name),
            other => write!(f, "{}", other.kind()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    #[error("cannot convert {from} to {to}")]
    Conversion { from: Kind, to: Kind },

    #[error("operator '{op}' cannot be applied to {left} and {right}")]
    Operands {
        op: &'static str,
        left: Kind,
        right: Kind,
    },

    #[error("division by zero")]
    DivisionByZero,
}

impl ValueError {
    fn conversion(from: Kind, to: Kind) -> Self {
        ValueError::Conversion { from, to }
    }
}

pub type ArrayRef = Rc<RefCell<Array>>;
pub type ObjectRef = Rc<RefCell<Object>>;

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    String(String),
    Boolean(bool),
    Character(char),
    Array(ArrayRef),
    Object(ObjectRef),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Integer(l), Value::Integer(r)) => l == r,
            (Value::Real(l), Value::Real(r)) => l == r,
            (Value::String(l), Value::String(r)) => l == r,
            (Value::Boolean(l), Value::Boolean(r)) => l == r,
            (Value::Character(l), Value::Character(r)) => l == r,
            (Value::Array(l), Value::Array(r)) => Rc::ptr_eq(l, r),
            (Value::Object(l), Value::Object(r)) => Rc::ptr_eq(l, r),
            _ => false,
        }
    }
}

impl Value {
    /// Zero value a freshly declared variable of `ty` holds.
    pub fn default_for(ty: &TypeName) -> Value {
        match ty {
            TypeName::Integer => Value::Integer(0),
            TypeName::Real => Value::Real(0.0),
            TypeName::String => Value::String(String::new()),
            TypeName::Boolean => Value::Boolean(false),
            TypeName::Character => Value::Character(' '),
            TypeName::Class(_) => Value::Null,
        }
    }

    /// Zero value used to substitute a failed operation producing `kind`.
    pub fn default_of_kind(kind: Kind) -> Value {
        match kind {
            Kind::Integer => Value::Integer(0),
            Kind::Real => Value::Real(0.0),
            Kind::String => Value::String(String::new()),
            Kind::Boolean => Value::Boolean(false),
            Kind::Character => Value::Character(' '),
            Kind::Array | Kind::Object | Kind::Null => Value::Null,
        }
    }

    pub fn kind(&self) -> Kind {
        match self {
            Value::Null => Kind::Null,
            Value::Integer(_) => Kind::Integer,
            Value::Real(_) => Kind::Real,
            Value::String(_) => Kind::String,
            Value::Boolean(_) => Kind::Boolean,
            Value::Character(_) => Kind::Character,
            Value::Array(_) => Kind::Array,
            Value::Object(_) => Kind::Object,
        }
    }

    /// Boolean operators and loop tests only accept real booleans.
    pub fn convert_to_bool(&self) -> Result<bool, ValueError> {
        match self {
            Value::Boolean(b) => Ok(*b),
            other => Err(ValueError::conversion(other.kind(), Kind::Boolean)),
        }
    }

    pub fn as_integer(&self) -> Result<i64, ValueError> {
        match self.convert_to(Kind::Integer)? {
            Value::Integer(n) => Ok(n),
            other => Err(ValueError::conversion(other.kind(), Kind::Integer)),
        }
    }

    pub fn as_real(&self) -> Result<f64, ValueError> {
        match self {
            Value::Integer(n) => Ok(*n as f64),
            Value::Real(n) => Ok(*n),
            other => Err(ValueError::conversion(other.kind(), Kind::Real)),
        }
    }

    /// Coerce for storage into a slot declared as `target`.
    ///
    /// Numeric kinds convert into each other, text parses into numbers,
    /// booleans and characters (used by `Input`), and every scalar renders
    /// into a String. Arrays and objects only convert to themselves; Null
    /// is a valid object reference.
    pub fn convert_to(&self, target: Kind) -> Result<Value, ValueError> {
        let fail = || ValueError::conversion(self.kind(), target);
        match (self, target) {
            (v, t) if v.kind() == t => Ok(v.clone()),

            (Value::Real(n), Kind::Integer) => Ok(Value::Integer(n.trunc() as i64)),
            (Value::Character(c), Kind::Integer) => Ok(Value::Integer(*c as i64)),
            (Value::String(s), Kind::Integer) => {
                s.trim().parse::<i64>().map(Value::Integer).map_err(|_| fail())
            }

            (Value::Integer(n), Kind::Real) => Ok(Value::Real(*n as f64)),
            (Value::String(s), Kind::Real) => s.trim().parse::<f64>().map(Value::Real).map_err(|_| fail()),

            (Value::String(s), Kind::Boolean) => match s.trim() {
                "True" | "true" => Ok(Value::Boolean(true)),
                "False" | "false" => Ok(Value::Boolean(false)),
                _ => Err(fail()),
            },

            (Value::String(s), Kind::Character) => {
                let mut chars = s.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Value::Character(c)),
                    _ => Err(fail()),
                }
            }

            (Value::Array(_), Kind::String) | (Value::Object(_), Kind::String) => Err(fail()),
            (scalar, Kind::String) => Ok(Value::String(scalar.to_string())),

            (Value::Null, Kind::Object) | (Value::Null, Kind::Array) => Ok(Value::Null),

            _ => Err(fail()),
        }
    }

    pub fn add(&self, other: &Value) -> Result<Value, ValueError> {
        match (self, other) {
            (Value::String(l), Value::String(r)) => Ok(Value::String(format!("{}{}", l, r))),
            (Value::String(l), Value::Character(r)) => Ok(Value::String(format!("{}{}", l, r))),
            (Value::Character(l), Value::String(r)) => Ok(Value::String(format!("{}{}", l, r))),
            _ => self.numeric("+", other, |l, r| l.checked_add(r), |l, r| l + r),
        }
    }

    pub fn sub(&self, other: &Value) -> Result<Value, ValueError> {
        self.numeric("-", other, |l, r| l.checked_sub(r), |l, r| l - r)
    }

    pub fn mul(&self, other: &Value) -> Result<Value, ValueError> {
        self.numeric("*", other, |l, r| l.checked_mul(r), |l, r| l * r)
    }

    pub fn div(&self, other: &Value) -> Result<Value, ValueError> {
        if other.is_zero() {
            return Err(ValueError::DivisionByZero);
        }
        self.numeric("/", other, |l, r| l.checked_div(r), |l, r| l / r)
    }

    pub fn rem(&self, other: &Value) -> Result<Value, ValueError> {
        if other.is_zero() {
            return Err(ValueError::DivisionByZero);
        }
        self.numeric("MOD", other, |l, r| l.checked_rem(r), |l, r| l % r)
    }

    pub fn pow(&self, other: &Value) -> Result<Value, ValueError> {
        match (self, other) {
            (Value::Integer(base), Value::Integer(exp)) if *exp >= 0 => {
                let exp = u32::try_from(*exp).unwrap_or(u32::MAX);
                match base.checked_pow(exp) {
                    Some(n) => Ok(Value::Integer(n)),
                    None => Ok(Value::Real((*base as f64).powf(exp as f64))),
                }
            }
            _ => {
                let base = self.operand_real("^", other)?;
                let exp = other.operand_real("^", self)?;
                Ok(Value::Real(base.powf(exp)))
            }
        }
    }

    pub fn negate(&self) -> Result<Value, ValueError> {
        match self {
            Value::Integer(n) => Ok(Value::Integer(n.wrapping_neg())),
            Value::Real(n) => Ok(Value::Real(-n)),
            other => Err(ValueError::conversion(other.kind(), Kind::Real)),
        }
    }

    pub fn not(&self) -> Result<Value, ValueError> {
        Ok(Value::Boolean(!self.convert_to_bool()?))
    }

    pub fn equals(&self, other: &Value) -> Result<bool, ValueError> {
        match (self, other) {
            (Value::Integer(_) | Value::Real(_), Value::Integer(_) | Value::Real(_)) => {
                Ok(self.compare(other)? == Ordering::Equal)
            }
            (Value::String(_) | Value::Character(_), Value::String(_) | Value::Character(_)) => {
                Ok(self.to_string() == other.to_string())
            }
            (Value::Boolean(l), Value::Boolean(r)) => Ok(l == r),
            (Value::Null | Value::Object(_) | Value::Array(_), Value::Null | Value::Object(_) | Value::Array(_)) => {
                Ok(self == other)
            }
            _ => Err(ValueError::Operands {
                op: "==",
                left: self.kind(),
                right: other.kind(),
            }),
        }
    }

    pub fn compare(&self, other: &Value) -> Result<Ordering, ValueError> {
        let unordered = || ValueError::Operands {
            op: "<",
            left: self.kind(),
            right: other.kind(),
        };
        match (self, other) {
            (Value::Integer(l), Value::Integer(r)) => Ok(l.cmp(r)),
            (Value::Integer(_) | Value::Real(_), Value::Integer(_) | Value::Real(_)) => {
                let l = self.as_real()?;
                let r = other.as_real()?;
                l.partial_cmp(&r).ok_or_else(unordered)
            }
            (Value::Character(l), Value::Character(r)) => Ok(l.cmp(r)),
            (Value::String(_) | Value::Character(_), Value::String(_) | Value::Character(_)) => {
                Ok(self.to_string().cmp(&other.to_string()))
            }
            _ => Err(unordered()),
        }
    }

    fn is_zero(&self) -> bool {
        match self {
            Value::Integer(n) => *n == 0,
            Value::Real(n) => *n == 0.0,
            _ => false,
        }
    }

    fn operand_real(&self, op: &'static str, other: &Value) -> Result<f64, ValueError> {
        self.as_real().map_err(|_| ValueError::Operands {
            op,
            left: self.kind(),
            right: other.kind(),
        })
    }

    /// Integer op Integer stays Integer (falling back to Real on overflow);
    /// any Real operand promotes the whole operation to Real.
    fn numeric(
        &self,
        op: &'static str,
        other: &Value,
        int_op: impl Fn(i64, i64) -> Option<i64>,
        real_op: impl Fn(f64, f64) -> f64,
    ) -> Result<Value, ValueError> {
        match (self, other) {
            (Value::Integer(l), Value::Integer(r)) => match int_op(*l, *r) {
                Some(n) => Ok(Value::Integer(n)),
                None => Ok(Value::Real(real_op(*l as f64, *r as f64))),
            },
            (Value::Integer(_) | Value::Real(_), Value::Integer(_) | Value::Real(_)) => {
                Ok(Value::Real(real_op(self.as_real()?, other.as_real()?)))
            }
            _ => Err(ValueError::Operands {
                op,
                left: self.kind(),
                right: other.kind(),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Integer(n) => write!(f, "{}", n),
            Value::Real(n) => {
                // Always show at least one decimal place for reals
                if n.fract() == 0.0 && n.is_finite() {
                    write!(f, "{:.1}", n)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::String(s) => write!(f, "{}", s),
            Value::Boolean(true) => write!(f, "True"),
            Value::Boolean(false) => write!(f, "False"),
            Value::Character(c) => write!(f, "{}", c),
            Value::Array(array) => {
                let array = array.borrow();
                write!(f, "[")?;
                for (i, item) in array.elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Object(object) => write!(f, "<{} object>", object.borrow().class_name),
        }
    }
}

/// Problem found while folding an index tuple into a flat offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexProblem {
    OutOfRange { dimension: usize, index: i64, extent: usize },
    Rank { expected: usize, found: usize },
}

impl fmt::Display for IndexProblem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            IndexProblem::OutOfRange { dimension, index, extent } => write!(
                f,
                "index {} is out of range for dimension {} (size {}); using 0",
                index,
                dimension + 1,
                extent
            ),
            IndexProblem::Rank { expected, found } => {
                write!(f, "array has {} dimension(s) but {} index(es) were given", expected, found)
            }
        }
    }
}

/// Multi-dimensional array with a flat backing store.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    pub element: TypeName,
    pub dims: Vec<usize>,
    pub elements: Vec<Value>,
}

impl Array {
    /// Callers check the size with [`Array::element_count`] first; extents
    /// whose product overflows give an empty array.
    pub fn new(element: TypeName, dims: Vec<usize>) -> Self {
        let size = Self::element_count(&dims).unwrap_or(0);
        let elements = vec![Value::default_for(&element); size];
        Self {
            element,
            dims,
            elements,
        }
    }

    /// Product of the extents, or `None` when it does not fit in `usize`.
    pub fn element_count(dims: &[usize]) -> Option<usize> {
        dims.iter().try_fold(1usize, |count, extent| count.checked_mul(*extent))
    }

    pub fn into_ref(self) -> ArrayRef {
        Rc::new(RefCell::new(self))
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Fold `indices` into a flat offset: `i1 + d1*(i2 + d2*(i3 + ...))`.
    ///
    /// Bad indices are clamped to 0 and reported back so the caller can
    /// raise one diagnostic per problem and keep going. Missing trailing
    /// indices count as 0; surplus ones are ignored.
    pub fn locate(&self, indices: &[i64]) -> (usize, Vec<IndexProblem>) {
        let mut problems = Vec::new();
        if indices.len() != self.dims.len() {
            problems.push(IndexProblem::Rank {
                expected: self.dims.len(),
                found: indices.len(),
            });
        }

        let mut offset = 0usize;
        for (dimension, extent) in self.dims.iter().enumerate().rev() {
            let index = indices.get(dimension).copied().unwrap_or(0);
            let index = if index < 0 || index as usize >= *extent {
                problems.push(IndexProblem::OutOfRange {
                    dimension,
                    index,
                    extent: *extent,
                });
                0
            } else {
                index as usize
            };
            offset = index + extent * offset;
        }

        // Report in source order.
        problems.sort_by_key(|problem| match problem {
            IndexProblem::Rank { .. } => 0,
            IndexProblem::OutOfRange { dimension, .. } => dimension + 1,
        });
        (offset, problems)
    }
}

/// Instance of a user-defined class; owns its field slots.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub class: usize,
    pub class_name: String,
    pub fields: Vec<Value>,
}

impl Object {
    pub fn into_ref(self) -> ObjectRef {
        Rc::new(RefCell::new(self))
    }
}
