//! Library routines every program can call without defining them.

use crate::value::{Kind, Value, ValueError};

/// Name and arity of every built-in.
pub const BUILTINS: &[(&str, usize)] = &[
    ("length", 1),
    ("toUpper", 1),
    ("toLower", 1),
    ("substring", 3),
    ("contains", 2),
    ("sqrt", 1),
    ("abs", 1),
    ("pow", 2),
    ("round", 1),
    ("toInteger", 1),
    ("toReal", 1),
    ("toString", 1),
    ("stringToInteger", 1),
    ("stringToReal", 1),
    ("isInteger", 1),
    ("isReal", 1),
    ("size", 1),
];

pub fn arity(name: &str) -> Option<usize> {
    BUILTINS.iter().find(|(n, _)| *n == name).map(|(_, arity)| *arity)
}

/// Value substituted when built-in `name` fails.
pub fn default_result(name: &str) -> Value {
    match name {
        "length" | "round" | "toInteger" | "stringToInteger" | "size" => Value::Integer(0),
        "sqrt" | "abs" | "pow" | "toReal" | "stringToReal" => Value::Real(0.0),
        "toUpper" | "toLower" | "substring" | "toString" => Value::String(String::new()),
        "contains" | "isInteger" | "isReal" => Value::Boolean(false),
        _ => Value::Null,
    }
}

fn text(value: &Value) -> Result<String, ValueError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Character(c) => Ok(c.to_string()),
        other => Err(ValueError::Conversion {
            from: other.kind(),
            to: Kind::String,
        }),
    }
}

/// Run built-in `name`, or `None` when no built-in has that name. Missing
/// arguments read as Null; surplus ones are ignored.
pub fn call(name: &str, args: &[Value]) -> Option<Result<Value, ValueError>> {
    arity(name)?;
    Some(run(name, args))
}

fn run(name: &str, args: &[Value]) -> Result<Value, ValueError> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Null);

    match name {
        "length" => Ok(Value::Integer(text(&arg(0))?.chars().count() as i64)),
        "toUpper" => Ok(Value::String(text(&arg(0))?.to_uppercase())),
        "toLower" => Ok(Value::String(text(&arg(0))?.to_lowercase())),
        "substring" => {
            let s: Vec<char> = text(&arg(0))?.chars().collect();
            let start = arg(1).as_integer()?.clamp(0, s.len() as i64) as usize;
            let end = arg(2).as_integer()?.clamp(start as i64, s.len() as i64) as usize;
            Ok(Value::String(s[start..end].iter().collect()))
        }
        "contains" => Ok(Value::Boolean(text(&arg(0))?.contains(&text(&arg(1))?))),
        "sqrt" => Ok(Value::Real(arg(0).as_real()?.sqrt())),
        "abs" => match arg(0) {
            Value::Integer(n) => Ok(Value::Integer(n.wrapping_abs())),
            other => Ok(Value::Real(other.as_real()?.abs())),
        },
        "pow" => Ok(Value::Real(arg(0).as_real()?.powf(arg(1).as_real()?))),
        "round" => match arg(0) {
            Value::Integer(n) => Ok(Value::Integer(n)),
            other => Ok(Value::Integer(other.as_real()?.round() as i64)),
        },
        "toInteger" => arg(0).convert_to(Kind::Integer),
        "toReal" => arg(0).convert_to(Kind::Real),
        "toString" => arg(0).convert_to(Kind::String),
        "stringToInteger" => Value::String(text(&arg(0))?).convert_to(Kind::Integer),
        "stringToReal" => Value::String(text(&arg(0))?).convert_to(Kind::Real),
        "isInteger" => Ok(Value::Boolean(text(&arg(0))?.trim().parse::<i64>().is_ok())),
        "isReal" => Ok(Value::Boolean(text(&arg(0))?.trim().parse::<f64>().is_ok())),
        "size" => match arg(0) {
            Value::Array(array) => Ok(Value::Integer(array.borrow().len() as i64)),
            other => Err(ValueError::Conversion {
                from: other.kind(),
                to: Kind::Array,
            }),
        },
        _ => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call_ok(name: &str, args: &[Value]) -> Result<Value, ValueError> {
        call(name, args).expect("known built-in")
    }

    fn s(text: &str) -> Value {
        Value::String(text.to_string())
    }

    #[test]
    fn text_routines() {
        assert_eq!(call_ok("length", &[s("héllo")]), Ok(Value::Integer(5)));
        assert_eq!(call_ok("toUpper", &[s("abc")]), Ok(s("ABC")));
        assert_eq!(call_ok("substring", &[s("pseudo"), Value::Integer(1), Value::Integer(4)]), Ok(s("seu")));
        assert_eq!(call_ok("substring", &[s("ab"), Value::Integer(-3), Value::Integer(99)]), Ok(s("ab")));
        assert_eq!(call_ok("contains", &[s("reaches"), s("each")]), Ok(Value::Boolean(true)));
    }

    #[test]
    fn numeric_routines() {
        assert_eq!(call_ok("sqrt", &[Value::Integer(9)]), Ok(Value::Real(3.0)));
        assert_eq!(call_ok("abs", &[Value::Integer(-4)]), Ok(Value::Integer(4)));
        assert_eq!(call_ok("round", &[Value::Real(2.6)]), Ok(Value::Integer(3)));
        assert_eq!(call_ok("stringToInteger", &[s("12")]), Ok(Value::Integer(12)));
        assert_eq!(call_ok("isReal", &[s("x1")]), Ok(Value::Boolean(false)));
    }

    #[test]
    fn wrong_kind_is_a_conversion_error() {
        assert!(matches!(call_ok("length", &[Value::Integer(3)]), Err(ValueError::Conversion { .. })));
        assert!(call_ok("sqrt", &[s("nine")]).is_err());
        assert!(call("nope", &[]).is_none());
    }

    #[test]
    fn arity_table() {
        assert_eq!(arity("substring"), Some(3));
        assert_eq!(arity("nope"), None);
    }

    #[test]
    fn failure_defaults_match_result_kind() {
        for (name, _) in BUILTINS {
            let fallback = default_result(name);
            assert_ne!(fallback, Value::Null, "{} has no default", name);
        }
        assert_eq!(default_result("toUpper"), s(""));
    }
}
