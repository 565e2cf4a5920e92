//! Value coercions used by the renderer
//!
//! Render parameters are plain `serde_json::Value`s; these functions give them
//! the loose scalar semantics template authors expect (truthiness, numeric
//! strings, string concatenation).

use std::cmp::Ordering;

use serde_json::{Number, Value};

use crate::render::RenderError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    pub fn into_value(self) -> Result<Value, RenderError> {
        match self {
            Num::Int(i) => Ok(Value::from(i)),
            Num::Float(f) => Number::from_f64(f)
                .map(Value::Number)
                .ok_or_else(|| RenderError::Type(format!("{} is not a finite number", f))),
        }
    }
}

pub fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !(s.is_empty() || s == "0"),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// The text a value prints as. Arrays and objects print as JSON.
pub fn to_output_string(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => String::new(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => v.to_string(),
    }
}

fn parse_numeric(s: &str) -> Option<Num> {
    let t = s.trim();
    if t.is_empty() || !t.bytes().all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E')) {
        return None;
    }
    if let Ok(i) = t.parse::<i64>() {
        return Some(Num::Int(i));
    }
    t.parse::<f64>().ok().filter(|f| f.is_finite()).map(Num::Float)
}

fn json_num(n: &Number) -> Num {
    match n.as_i64() {
        Some(i) => Num::Int(i),
        None => Num::Float(n.as_f64().unwrap_or(0.0)),
    }
}

/// Numeric form of a scalar, or a type error.
pub fn to_number(v: &Value) -> Result<Num, RenderError> {
    match v {
        Value::Null => Ok(Num::Int(0)),
        Value::Bool(b) => Ok(Num::Int(*b as i64)),
        Value::Number(n) => Ok(json_num(n)),
        Value::String(s) => parse_numeric(s)
            .ok_or_else(|| RenderError::Type(format!("non-numeric string \"{}\" used in arithmetic", s))),
        other => Err(RenderError::Type(format!("{} used in arithmetic", type_name(other)))),
    }
}

fn numeric_scalar(v: &Value) -> Option<Num> {
    match v {
        Value::Number(n) => Some(json_num(n)),
        Value::String(s) => parse_numeric(s),
        _ => None,
    }
}

pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Bool(x), other) | (other, Value::Bool(x)) => *x == truthy(other),
        (Value::Null, Value::Null) => true,
        (Value::Null, other) | (other, Value::Null) => !truthy(other),
        (Value::Array(_), _) | (_, Value::Array(_)) | (Value::Object(_), _) | (_, Value::Object(_)) => a == b,
        _ => match (numeric_scalar(a), numeric_scalar(b)) {
            (Some(x), Some(y)) => x.as_f64() == y.as_f64(),
            _ => to_output_string(a) == to_output_string(b),
        },
    }
}

pub fn compare(a: &Value, b: &Value) -> Ordering {
    let as_num = |v: &Value| match v {
        Value::Null => Some(Num::Int(0)),
        Value::Bool(x) => Some(Num::Int(*x as i64)),
        other => numeric_scalar(other),
    };
    match (as_num(a), as_num(b)) {
        (Some(x), Some(y)) => x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal),
        _ => to_output_string(a).cmp(&to_output_string(b)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arith {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

pub fn arithmetic(op: Arith, a: &Value, b: &Value) -> Result<Value, RenderError> {
    let (x, y) = (to_number(a)?, to_number(b)?);
    let result = match (op, x, y) {
        (Arith::Div | Arith::Mod, _, y) if y.as_f64() == 0.0 => return Err(RenderError::DivisionByZero),
        (Arith::Mod, x, y) => {
            let (xi, yi) = (int_part(x), int_part(y));
            if yi == 0 {
                return Err(RenderError::DivisionByZero);
            }
            Num::Int(xi.wrapping_rem(yi))
        }
        (Arith::Add, Num::Int(i), Num::Int(j)) => i.checked_add(j).map_or(Num::Float(i as f64 + j as f64), Num::Int),
        (Arith::Sub, Num::Int(i), Num::Int(j)) => i.checked_sub(j).map_or(Num::Float(i as f64 - j as f64), Num::Int),
        (Arith::Mul, Num::Int(i), Num::Int(j)) => i.checked_mul(j).map_or(Num::Float(i as f64 * j as f64), Num::Int),
        (Arith::Div, Num::Int(i), Num::Int(j)) if i.checked_rem(j) == Some(0) => Num::Int(i / j),
        (Arith::Add, x, y) => Num::Float(x.as_f64() + y.as_f64()),
        (Arith::Sub, x, y) => Num::Float(x.as_f64() - y.as_f64()),
        (Arith::Mul, x, y) => Num::Float(x.as_f64() * y.as_f64()),
        (Arith::Div, x, y) => Num::Float(x.as_f64() / y.as_f64()),
    };
    result.into_value()
}

fn int_part(n: Num) -> i64 {
    match n {
        Num::Int(i) => i,
        Num::Float(f) => f.trunc() as i64,
    }
}

pub fn negate(v: &Value) -> Result<Value, RenderError> {
    match to_number(v)? {
        Num::Int(i) => i.checked_neg().map_or(Num::Float(-(i as f64)), Num::Int),
        Num::Float(f) => Num::Float(-f),
    }
    .into_value()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        for falsy in [json!(null), json!(false), json!(0), json!(0.0), json!(""), json!("0"), json!([]), json!({})] {
            assert!(!truthy(&falsy), "{:?} should be falsy", falsy);
        }
        for t in [json!(true), json!(1), json!("a"), json!("0.0"), json!([0]), json!({"a": 1})] {
            assert!(truthy(&t), "{:?} should be truthy", t);
        }
    }

    #[test]
    fn test_output_strings() {
        assert_eq!(to_output_string(&json!(null)), "");
        assert_eq!(to_output_string(&json!(true)), "1");
        assert_eq!(to_output_string(&json!(false)), "");
        assert_eq!(to_output_string(&json!(42)), "42");
        assert_eq!(to_output_string(&json!(2.0)), "2");
        assert_eq!(to_output_string(&json!(2.5)), "2.5");
        assert_eq!(to_output_string(&json!([1, 2])), "[1,2]");
    }

    #[test]
    fn test_arithmetic_keeps_integers() {
        assert_eq!(arithmetic(Arith::Add, &json!(2), &json!("3")).unwrap(), json!(5));
        assert_eq!(arithmetic(Arith::Div, &json!(6), &json!(3)).unwrap(), json!(2));
        assert_eq!(arithmetic(Arith::Div, &json!(7), &json!(2)).unwrap(), json!(3.5));
        assert_eq!(arithmetic(Arith::Mod, &json!(7), &json!(3)).unwrap(), json!(1));
    }

    #[test]
    fn test_arithmetic_errors() {
        assert!(matches!(arithmetic(Arith::Div, &json!(1), &json!(0)), Err(RenderError::DivisionByZero)));
        assert!(matches!(arithmetic(Arith::Mod, &json!(1), &json!(0.5)), Err(RenderError::DivisionByZero)));
        assert!(matches!(arithmetic(Arith::Add, &json!("abc"), &json!(1)), Err(RenderError::Type(_))));
        assert!(matches!(arithmetic(Arith::Add, &json!([1]), &json!(1)), Err(RenderError::Type(_))));
    }

    #[test]
    fn test_loose_equality() {
        assert!(loose_eq(&json!("1"), &json!(1)));
        assert!(loose_eq(&json!("1.0"), &json!(1)));
        assert!(loose_eq(&json!(null), &json!("")));
        assert!(loose_eq(&json!(true), &json!("yes")));
        assert!(!loose_eq(&json!("abc"), &json!(0)));
        assert!(!loose_eq(&json!("a"), &json!("b")));
    }

    #[test]
    fn test_compare() {
        assert_eq!(compare(&json!("10"), &json!(9)), Ordering::Greater);
        assert_eq!(compare(&json!("apple"), &json!("banana")), Ordering::Less);
        assert_eq!(compare(&json!(null), &json!(0)), Ordering::Equal);
    }
}
