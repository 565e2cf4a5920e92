//! Artifact execution
//!
//! A [`Renderer`] walks an artifact's nodes against an explicit [`Context`].
//! Nothing is written anywhere but the output buffer of the current call, so a
//! failed render hands back only the error.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::expr::{AssignOp, BinaryOp, Expr, ArrayItem, Place, Stmt, UnaryOp};
use crate::helpers::{escape_html, ViewHelpers};
use crate::ir::{Artifact, Node};
use crate::pipeline::ViewError;
use crate::value::{self, arithmetic, to_output_string, truthy, type_name, Arith};

/// Nested includes deeper than this abort the render.
pub const MAX_INCLUDE_DEPTH: usize = 64;

/// Iterations a single `@for` or `@while` loop may run.
pub const MAX_LOOP_ITERATIONS: usize = 1_000_000;

const MAX_RANGE_LEN: u64 = 100_000;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Undefined variable ${0}")]
    UndefinedVariable(String),

    #[error("Undefined index `{0}`")]
    UndefinedIndex(String),

    #[error("Type error: {0}")]
    Type(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Unknown function `{0}`")]
    UnknownFunction(String),

    #[error("{name}() expects {expected} argument(s), {actual} given")]
    Arity { name: String, expected: String, actual: usize },

    #[error("Loop exceeded {0} iterations")]
    LoopLimit(usize),

    #[error("View includes nested deeper than {0} levels")]
    DepthExceeded(usize),

    #[error("View name must be a string, got {0}")]
    InvalidViewName(&'static str),

    #[error("Failed to load included view `{name}`: {source}")]
    Include {
        name: String,
        #[source]
        source: Box<ViewError>,
    },
}

/// Variables visible to one view while it renders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Context {
    vars: Map<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_params(params: Map<String, Value>) -> Self {
        Self { vars: params }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn vars(&self) -> &Map<String, Value> {
        &self.vars
    }
}

/// Supplies the artifacts of views included at runtime.
pub trait IncludeResolver {
    fn resolve_include(&mut self, name: &str) -> Result<Artifact, ViewError>;
}

pub struct Renderer<'a> {
    helpers: &'a dyn ViewHelpers,
    resolver: &'a mut dyn IncludeResolver,
    depth: usize,
}

impl<'a> Renderer<'a> {
    pub fn new(helpers: &'a dyn ViewHelpers, resolver: &'a mut dyn IncludeResolver) -> Self {
        Self { helpers, resolver, depth: 0 }
    }

    pub fn render(&mut self, artifact: &Artifact, mut ctx: Context) -> Result<String, RenderError> {
        let mut out = String::new();
        self.exec(&artifact.nodes, &mut ctx, &mut out)?;
        Ok(out)
    }

    fn exec(&mut self, nodes: &[Node], ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        for node in nodes {
            self.exec_node(node, ctx, out)?;
        }
        Ok(())
    }

    fn exec_node(&mut self, node: &Node, ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        match node {
            Node::Text { text } => out.push_str(text),
            Node::Output { expr, escape } => {
                let text = to_output_string(&self.eval(expr, ctx)?);
                if *escape {
                    out.push_str(&escape_html(&text));
                } else {
                    out.push_str(&text);
                }
            }
            Node::If { branches, otherwise } => {
                for branch in branches {
                    if truthy(&self.eval(&branch.cond, ctx)?) {
                        return self.exec(&branch.body, ctx, out);
                    }
                }
                if let Some(body) = otherwise {
                    self.exec(body, ctx, out)?;
                }
            }
            Node::For { header, body } => {
                for stmt in &header.init {
                    self.exec_stmt(stmt, ctx, out)?;
                }
                let mut iterations = 0;
                loop {
                    if let Some(cond) = &header.cond {
                        if !truthy(&self.eval(cond, ctx)?) {
                            break;
                        }
                    }
                    iterations += 1;
                    if iterations > MAX_LOOP_ITERATIONS {
                        return Err(RenderError::LoopLimit(MAX_LOOP_ITERATIONS));
                    }
                    self.exec(body, ctx, out)?;
                    for stmt in &header.step {
                        self.exec_stmt(stmt, ctx, out)?;
                    }
                }
            }
            Node::Foreach { header, body } => {
                let pairs: Vec<(Value, Value)> = match self.eval(&header.iterable, ctx)? {
                    Value::Array(items) => items
                        .into_iter()
                        .enumerate()
                        .map(|(i, v)| (Value::from(i as u64), v))
                        .collect(),
                    Value::Object(map) => map.into_iter().map(|(k, v)| (Value::String(k), v)).collect(),
                    Value::Null => Vec::new(),
                    other => return Err(RenderError::Type(format!("cannot iterate over {}", type_name(&other)))),
                };
                for (key, item) in pairs {
                    if let Some(name) = &header.key {
                        ctx.set(name.as_str(), key);
                    }
                    ctx.set(header.value.as_str(), item);
                    self.exec(body, ctx, out)?;
                }
            }
            Node::While { cond, body } => {
                let mut iterations = 0;
                while truthy(&self.eval(cond, ctx)?) {
                    iterations += 1;
                    if iterations > MAX_LOOP_ITERATIONS {
                        return Err(RenderError::LoopLimit(MAX_LOOP_ITERATIONS));
                    }
                    self.exec(body, ctx, out)?;
                }
            }
            Node::Code { stmts } => {
                for stmt in stmts {
                    self.exec_stmt(stmt, ctx, out)?;
                }
            }
            Node::Include { target, params } => {
                let name = match self.eval(target, ctx)? {
                    Value::String(name) => name,
                    other => return Err(RenderError::InvalidViewName(type_name(&other))),
                };
                let params = self.eval_params(params.as_ref(), ctx)?;
                let artifact = self.resolver.resolve_include(&name).map_err(|source| RenderError::Include {
                    name: name.clone(),
                    source: Box::new(source),
                })?;
                self.render_nested(&artifact.nodes, params, out)?;
            }
            Node::Inline { params, body, .. } => {
                let params = self.eval_params(params.as_ref(), ctx)?;
                self.render_nested(body, params, out)?;
            }
        }
        Ok(())
    }

    /// Render an included view in a fresh context holding only `params`.
    fn render_nested(&mut self, nodes: &[Node], params: Map<String, Value>, out: &mut String) -> Result<(), RenderError> {
        if self.depth >= MAX_INCLUDE_DEPTH {
            return Err(RenderError::DepthExceeded(MAX_INCLUDE_DEPTH));
        }
        self.depth += 1;
        let mut ctx = Context::from_params(params);
        let result = self.exec(nodes, &mut ctx, out);
        self.depth -= 1;
        result
    }

    fn eval_params(&self, params: Option<&Expr>, ctx: &Context) -> Result<Map<String, Value>, RenderError> {
        let Some(expr) = params else {
            return Ok(Map::new());
        };
        match self.eval(expr, ctx)? {
            Value::Object(map) => Ok(map),
            Value::Null => Ok(Map::new()),
            Value::Array(items) if items.is_empty() => Ok(Map::new()),
            other => Err(RenderError::Type(format!(
                "view parameters must be a keyed array, got {}",
                type_name(&other)
            ))),
        }
    }

    fn exec_stmt(&self, stmt: &Stmt, ctx: &mut Context, out: &mut String) -> Result<(), RenderError> {
        match stmt {
            Stmt::Assign { target, op, value } => {
                let rhs = self.eval(value, ctx)?;
                let new = match op {
                    AssignOp::Set => rhs,
                    AssignOp::Add => arithmetic(Arith::Add, &self.read_place(target, ctx)?, &rhs)?,
                    AssignOp::Sub => arithmetic(Arith::Sub, &self.read_place(target, ctx)?, &rhs)?,
                    AssignOp::Concat => {
                        let current = self.read_place(target, ctx)?;
                        Value::String(to_output_string(&current) + &to_output_string(&rhs))
                    }
                };
                self.write_place(target, new, ctx)
            }
            Stmt::Step { target, delta } => {
                let current = self.read_place(target, ctx)?;
                let new = arithmetic(Arith::Add, &current, &Value::from(*delta))?;
                self.write_place(target, new, ctx)
            }
            Stmt::Echo { expr } => {
                out.push_str(&to_output_string(&self.eval(expr, ctx)?));
                Ok(())
            }
            Stmt::Expr { expr } => self.eval(expr, ctx).map(|_| ()),
        }
    }

    fn read_place(&self, place: &Place, ctx: &Context) -> Result<Value, RenderError> {
        let mut current = ctx
            .get(&place.var)
            .cloned()
            .ok_or_else(|| RenderError::UndefinedVariable(place.var.clone()))?;
        for index in &place.path {
            let key = self.eval(index, ctx)?;
            current = index_strict(&current, &key)?;
        }
        Ok(current)
    }

    fn write_place(&self, place: &Place, value: Value, ctx: &mut Context) -> Result<(), RenderError> {
        if place.path.is_empty() {
            ctx.set(place.var.as_str(), value);
            return Ok(());
        }
        let keys = place
            .path
            .iter()
            .map(|index| self.eval(index, ctx))
            .collect::<Result<Vec<_>, _>>()?;
        let slot = ctx.vars.entry(place.var.clone()).or_insert(Value::Null);
        assign_path(slot, &keys, value)
    }

    fn eval(&self, expr: &Expr, ctx: &Context) -> Result<Value, RenderError> {
        match expr {
            Expr::Literal { value } => Ok(value.clone()),
            Expr::Var { name } => ctx.get(name).cloned().ok_or_else(|| RenderError::UndefinedVariable(name.clone())),
            Expr::Array { items } => self.eval_array(items, ctx),
            Expr::Index { target, index } => {
                let container = self.eval(target, ctx)?;
                let key = self.eval(index, ctx)?;
                index_strict(&container, &key)
            }
            Expr::Prop { target, name } => {
                let container = self.eval(target, ctx)?;
                index_strict(&container, &Value::String(name.clone()))
            }
            Expr::Call { name, args } => self.call(name, args, ctx),
            Expr::Unary { op: UnaryOp::Not, expr } => Ok(Value::Bool(!truthy(&self.eval(expr, ctx)?))),
            Expr::Unary { op: UnaryOp::Neg, expr } => value::negate(&self.eval(expr, ctx)?),
            Expr::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, ctx),
            Expr::Ternary { cond, then, otherwise } => {
                let c = self.eval(cond, ctx)?;
                if truthy(&c) {
                    match then {
                        Some(then) => self.eval(then, ctx),
                        None => Ok(c),
                    }
                } else {
                    self.eval(otherwise, ctx)
                }
            }
        }
    }

    /// Evaluate, treating an undefined variable or missing key as `None`.
    fn eval_opt(&self, expr: &Expr, ctx: &Context) -> Result<Option<Value>, RenderError> {
        match expr {
            Expr::Var { name } => Ok(ctx.get(name).cloned()),
            Expr::Index { target, index } => {
                let Some(container) = self.eval_opt(target, ctx)? else {
                    return Ok(None);
                };
                let key = self.eval(index, ctx)?;
                Ok(lookup(&container, &key))
            }
            Expr::Prop { target, name } => {
                let Some(container) = self.eval_opt(target, ctx)? else {
                    return Ok(None);
                };
                Ok(lookup(&container, &Value::String(name.clone())))
            }
            other => self.eval(other, ctx).map(Some),
        }
    }

    fn eval_array(&self, items: &[ArrayItem], ctx: &Context) -> Result<Value, RenderError> {
        if items.iter().all(|item| item.key.is_none()) {
            let values = items
                .iter()
                .map(|item| self.eval(&item.value, ctx))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(Value::Array(values));
        }
        let mut map = Map::new();
        // wide enough that the key after i64::MAX does not wrap
        let mut next_index = 0i128;
        for item in items {
            let key = match &item.key {
                Some(key) => {
                    let key = self.eval(key, ctx)?;
                    if let Some(i) = key.as_i64() {
                        next_index = next_index.max(i128::from(i) + 1);
                    }
                    to_output_string(&key)
                }
                None => {
                    let key = next_index.to_string();
                    next_index += 1;
                    key
                }
            };
            map.insert(key, self.eval(&item.value, ctx)?);
        }
        Ok(Value::Object(map))
    }

    fn binary(&self, op: BinaryOp, lhs: &Expr, rhs: &Expr, ctx: &Context) -> Result<Value, RenderError> {
        match op {
            BinaryOp::And => {
                let result = truthy(&self.eval(lhs, ctx)?) && truthy(&self.eval(rhs, ctx)?);
                return Ok(Value::Bool(result));
            }
            BinaryOp::Or => {
                let result = truthy(&self.eval(lhs, ctx)?) || truthy(&self.eval(rhs, ctx)?);
                return Ok(Value::Bool(result));
            }
            BinaryOp::Coalesce => {
                return match self.eval_opt(lhs, ctx)? {
                    Some(v) if !v.is_null() => Ok(v),
                    _ => self.eval(rhs, ctx),
                };
            }
            _ => {}
        }
        let (l, r) = (self.eval(lhs, ctx)?, self.eval(rhs, ctx)?);
        let result = match op {
            BinaryOp::Eq => Value::Bool(value::loose_eq(&l, &r)),
            BinaryOp::NotEq => Value::Bool(!value::loose_eq(&l, &r)),
            BinaryOp::Identical => Value::Bool(l == r),
            BinaryOp::NotIdentical => Value::Bool(l != r),
            BinaryOp::Lt => Value::Bool(value::compare(&l, &r).is_lt()),
            BinaryOp::Le => Value::Bool(value::compare(&l, &r).is_le()),
            BinaryOp::Gt => Value::Bool(value::compare(&l, &r).is_gt()),
            BinaryOp::Ge => Value::Bool(value::compare(&l, &r).is_ge()),
            BinaryOp::Add => arithmetic(Arith::Add, &l, &r)?,
            BinaryOp::Sub => arithmetic(Arith::Sub, &l, &r)?,
            BinaryOp::Mul => arithmetic(Arith::Mul, &l, &r)?,
            BinaryOp::Div => arithmetic(Arith::Div, &l, &r)?,
            BinaryOp::Mod => arithmetic(Arith::Mod, &l, &r)?,
            BinaryOp::Concat => Value::String(to_output_string(&l) + &to_output_string(&r)),
            BinaryOp::And | BinaryOp::Or | BinaryOp::Coalesce => unreachable!("short-circuit operators return early"),
        };
        Ok(result)
    }

    fn call(&self, name: &str, args: &[Expr], ctx: &Context) -> Result<Value, RenderError> {
        match name.to_ascii_lowercase().as_str() {
            "isset" => {
                if args.is_empty() {
                    return Err(arity_error(name, "at least 1", 0));
                }
                for arg in args {
                    match self.eval_opt(arg, ctx)? {
                        Some(v) if !v.is_null() => {}
                        _ => return Ok(Value::Bool(false)),
                    }
                }
                Ok(Value::Bool(true))
            }
            "empty" => {
                if args.len() != 1 {
                    return Err(arity_error(name, "1", args.len()));
                }
                let value = self.eval_opt(&args[0], ctx)?;
                Ok(Value::Bool(value.map_or(true, |v| !truthy(&v))))
            }
            lowered => {
                let values = args.iter().map(|arg| self.eval(arg, ctx)).collect::<Result<Vec<_>, _>>()?;
                self.call_builtin(lowered, values)
            }
        }
    }

    fn call_builtin(&self, name: &str, args: Vec<Value>) -> Result<Value, RenderError> {
        let text = |i: usize| to_output_string(&args[i]);
        let value = match name {
            "count" => {
                expect_args(name, &args, 1, 1)?;
                match &args[0] {
                    Value::Array(items) => Value::from(items.len() as u64),
                    Value::Object(map) => Value::from(map.len() as u64),
                    other => return Err(RenderError::Type(format!("count() of {}", type_name(other)))),
                }
            }
            "strtoupper" => {
                expect_args(name, &args, 1, 1)?;
                Value::String(text(0).to_uppercase())
            }
            "strtolower" => {
                expect_args(name, &args, 1, 1)?;
                Value::String(text(0).to_lowercase())
            }
            "ucfirst" => {
                expect_args(name, &args, 1, 1)?;
                let s = text(0);
                let mut chars = s.chars();
                Value::String(match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                })
            }
            "trim" => {
                expect_args(name, &args, 1, 1)?;
                Value::String(text(0).trim().to_string())
            }
            "implode" | "join" => {
                expect_args(name, &args, 2, 2)?;
                let (glue, pieces) = match (&args[0], &args[1]) {
                    (Value::Array(_) | Value::Object(_), glue) => (to_output_string(glue), &args[0]),
                    (glue, pieces) => (to_output_string(glue), pieces),
                };
                let parts: Vec<String> = match pieces {
                    Value::Array(items) => items.iter().map(to_output_string).collect(),
                    Value::Object(map) => map.values().map(to_output_string).collect(),
                    other => return Err(RenderError::Type(format!("{}() of {}", name, type_name(other)))),
                };
                Value::String(parts.join(&glue))
            }
            "htmlspecialchars" | "e" => {
                expect_args(name, &args, 1, 1)?;
                Value::String(escape_html(&text(0)))
            }
            "json_encode" => {
                expect_args(name, &args, 1, 1)?;
                Value::String(args[0].to_string())
            }
            "range" => {
                expect_args(name, &args, 2, 2)?;
                let (start, end) = (int_arg(&args[0])?, int_arg(&args[1])?);
                if end.abs_diff(start) >= MAX_RANGE_LEN {
                    return Err(RenderError::Type(format!("range() longer than {} elements", MAX_RANGE_LEN)));
                }
                let items: Vec<Value> = if start <= end {
                    (start..=end).map(Value::from).collect()
                } else {
                    (end..=start).rev().map(Value::from).collect()
                };
                Value::Array(items)
            }
            "url" => {
                expect_args(name, &args, 1, 1)?;
                Value::String(self.helpers.url(&text(0)))
            }
            "load" => {
                expect_args(name, &args, 1, 1)?;
                Value::String(self.helpers.asset(&text(0)))
            }
            "lang" => {
                expect_args(name, &args, 1, 1)?;
                Value::String(self.helpers.lang(&text(0)))
            }
            "old" => {
                expect_args(name, &args, 1, 2)?;
                match self.helpers.old(&text(0)) {
                    Value::Null => args.get(1).cloned().unwrap_or(Value::Null),
                    found => found,
                }
            }
            "message" => {
                expect_args(name, &args, 1, 1)?;
                Value::String(self.helpers.message(&text(0)))
            }
            _ => return Err(RenderError::UnknownFunction(name.to_string())),
        };
        Ok(value)
    }
}

fn arity_error(name: &str, expected: &str, actual: usize) -> RenderError {
    RenderError::Arity { name: name.to_string(), expected: expected.to_string(), actual }
}

fn expect_args(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), RenderError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max { min.to_string() } else { format!("{} to {}", min, max) };
        return Err(arity_error(name, &expected, args.len()));
    }
    Ok(())
}

fn int_arg(v: &Value) -> Result<i64, RenderError> {
    match value::to_number(v)? {
        value::Num::Int(i) => Ok(i),
        value::Num::Float(f) => Ok(f.trunc() as i64),
    }
}

fn array_index(key: &Value) -> Option<usize> {
    match key {
        Value::Number(n) => n.as_u64().and_then(|i| usize::try_from(i).ok()),
        Value::String(s) => s.parse::<usize>().ok(),
        _ => None,
    }
}

fn lookup(container: &Value, key: &Value) -> Option<Value> {
    match container {
        Value::Array(items) => array_index(key).and_then(|i| items.get(i)).cloned(),
        Value::Object(map) => map.get(&to_output_string(key)).cloned(),
        _ => None,
    }
}

fn index_strict(container: &Value, key: &Value) -> Result<Value, RenderError> {
    match container {
        Value::Array(_) | Value::Object(_) | Value::Null => {
            lookup(container, key).ok_or_else(|| RenderError::UndefinedIndex(to_output_string(key)))
        }
        other => Err(RenderError::Type(format!("cannot index {}", type_name(other)))),
    }
}

fn assign_path(slot: &mut Value, keys: &[Value], value: Value) -> Result<(), RenderError> {
    let Some((key, rest)) = keys.split_first() else {
        *slot = value;
        return Ok(());
    };
    if slot.is_null() {
        *slot = Value::Object(Map::new());
    }
    let child = match slot {
        Value::Object(map) => map.entry(to_output_string(key)).or_insert(Value::Null),
        Value::Array(items) => {
            let index = array_index(key)
                .ok_or_else(|| RenderError::Type(format!("invalid list index `{}`", to_output_string(key))))?;
            if index == items.len() {
                items.push(Value::Null);
            }
            items
                .get_mut(index)
                .ok_or_else(|| RenderError::UndefinedIndex(index.to_string()))?
        }
        other => return Err(RenderError::Type(format!("cannot index {}", type_name(other)))),
    };
    assign_path(child, rest, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile_source;
    use crate::helpers::StaticHelpers;
    use serde_json::json;
    use std::collections::BTreeMap;

    /// Resolves includes from an in-memory table of template sources.
    #[derive(Default)]
    struct Views {
        sources: BTreeMap<String, String>,
        resolved: Vec<String>,
    }

    impl IncludeResolver for Views {
        fn resolve_include(&mut self, name: &str) -> Result<Artifact, ViewError> {
            self.resolved.push(name.to_string());
            let source = self
                .sources
                .get(name)
                .ok_or_else(|| ViewError::TemplateNotFound(name.to_string()))?;
            Ok(compile_source(name, source)?)
        }
    }

    fn render_with(views: &mut Views, src: &str, params: serde_json::Value) -> Result<String, RenderError> {
        let helpers = StaticHelpers { app_url: "https://app.test".into(), ..StaticHelpers::default() };
        let artifact = compile_source("main", src).expect("template compiles");
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Renderer::new(&helpers, views).render(&artifact, Context::from_params(params))
    }

    fn render(src: &str, params: serde_json::Value) -> String {
        render_with(&mut Views::default(), src, params).unwrap()
    }

    #[test]
    fn test_greeting() {
        assert_eq!(render("Hello {{ $name }}!", json!({"name": "Ada"})), "Hello Ada!");
    }

    #[test]
    fn test_escaped_and_raw_output() {
        assert_eq!(render(r#"{{ "<b>x</b>" }}"#, json!({})), "&lt;b&gt;x&lt;/b&gt;");
        assert_eq!(render(r#"{!! "<b>x</b>" !!}"#, json!({})), "<b>x</b>");
    }

    #[test]
    fn test_conditionals() {
        let src = "@if($n > 10)big @elseif($n > 5)mid @else small @endif";
        assert_eq!(render(src, json!({"n": 20})), "big ");
        assert_eq!(render(src, json!({"n": 7})), "mid ");
        assert_eq!(render(src, json!({"n": 1})), " small ");
    }

    #[test]
    fn test_foreach_list_and_map() {
        let src = "@foreach($xs as $x)[{{ $x }}]@endforeach";
        assert_eq!(render(src, json!({"xs": [1, 2, 3]})), "[1][2][3]");
        let src = "@foreach($m as $k => $v){{ $k }}={{ $v }};@endforeach";
        assert_eq!(render(src, json!({"m": {"a": 1, "b": 2}})), "a=1;b=2;");
        assert_eq!(render("@foreach($none as $x)x @endforeach", json!({"none": null})), "");
    }

    #[test]
    fn test_for_and_while() {
        assert_eq!(render("@for($i = 0; $i < 3; $i++){{ $i }}@endfor", json!({})), "012");
        let src = "@php $n = 3; @end\n@while($n > 0){{ $n }}@php $n--; @end;@endwhile";
        assert_eq!(render(src, json!({})), "\n3;2;1;");
    }

    #[test]
    fn test_runaway_loop_is_stopped() {
        let err = render_with(&mut Views::default(), "@while(true) @endwhile", json!({})).unwrap_err();
        assert!(matches!(err, RenderError::LoopLimit(_)));
    }

    #[test]
    fn test_php_block_statements() {
        let src = "@php $total = 0; $row['n'] = 2; $total += $row['n'] * 5; $label = 'x'; $label .= 'y'; @end{{ $total }}{{ $label }}";
        assert_eq!(render(src, json!({})), "10xy");
    }

    #[test]
    fn test_echo_directive_is_raw() {
        assert_eq!(render("@echo('<i>' . $a)", json!({"a": 1})), "<i>1");
    }

    #[test]
    fn test_helper_directives() {
        assert_eq!(render("@url('login')", json!({})), "https://app.test/login");
        assert_eq!(render("@lang('hello')", json!({})), "hello");
        assert_eq!(render("@old('email', 'none')", json!({})), "none");
    }

    #[test]
    fn test_isset_empty_and_coalesce() {
        let src = "{{ isset($a) ? 'y' : 'n' }}{{ isset($a['b']) ? 'y' : 'n' }}{{ empty($c) ? 'e' : 'f' }}{{ $d ?? 'dflt' }}";
        assert_eq!(render(src, json!({"a": {"x": 1}})), "ynedflt");
    }

    #[test]
    fn test_builtins() {
        let src = "{{ count($xs) }} {{ strtoupper('ab') }} {{ ucfirst('hey') }} {{ implode(', ', $xs) }} {{ json_encode($xs) }}";
        assert_eq!(render(src, json!({"xs": [1, 2]})), "2 AB Hey 1, 2 [1,2]");
        assert_eq!(render("@foreach(range(3, 1) as $i){{ $i }}@endforeach", json!({})), "321");
    }

    #[test]
    fn test_range_bounds_at_integer_extremes() {
        let err = render_with(&mut Views::default(), "{{ count(range($a, $b)) }}", json!({"a": i64::MIN, "b": 1}))
            .unwrap_err();
        assert!(matches!(err, RenderError::Type(ref m) if m.contains("range()")));
        let err = render_with(&mut Views::default(), "{{ count(range($a, $b)) }}", json!({"a": i64::MAX, "b": i64::MIN}))
            .unwrap_err();
        assert!(matches!(err, RenderError::Type(_)));
    }

    #[test]
    fn test_array_key_after_largest_integer() {
        let out = render("{!! json_encode([9223372036854775807 => 'a', 'b']) !!}", json!({}));
        assert_eq!(out, r#"{"9223372036854775807":"a","9223372036854775808":"b"}"#);
        assert_eq!(render("{!! json_encode([5 => 'a', 'b', 2 => 'c', 'd']) !!}", json!({})), r#"{"2":"c","5":"a","6":"b","7":"d"}"#);
    }

    #[test]
    fn test_undefined_variable_is_an_error() {
        let err = render_with(&mut Views::default(), "{{ $missing }}", json!({})).unwrap_err();
        assert!(matches!(err, RenderError::UndefinedVariable(ref n) if n == "missing"));
    }

    #[test]
    fn test_unknown_function() {
        let err = render_with(&mut Views::default(), "{{ shell_exec('ls') }}", json!({})).unwrap_err();
        assert!(matches!(err, RenderError::UnknownFunction(_)));
    }

    #[test]
    fn test_include_gets_only_its_params() {
        let mut views = Views::default();
        views.sources.insert("card".into(), "<{{ $title }}{{ isset($secret) ? '!' : '' }}>".into());
        let out = render_with(&mut views, "@view('card', ['title' => $t])", json!({"t": "Hi", "secret": 1})).unwrap();
        assert_eq!(out, "<Hi>");
        assert_eq!(views.resolved, vec!["card".to_string()]);
    }

    #[test]
    fn test_dynamic_include() {
        let mut views = Views::default();
        views.sources.insert("alerts/error".into(), "E".into());
        let out = render_with(&mut views, "@view('alerts/' . $kind)", json!({"kind": "error"})).unwrap();
        assert_eq!(out, "E");
    }

    #[test]
    fn test_missing_include_is_reported() {
        let err = render_with(&mut Views::default(), "before @view('nope')", json!({})).unwrap_err();
        assert!(matches!(err, RenderError::Include { ref name, .. } if name == "nope"));
    }

    #[test]
    fn test_self_include_hits_depth_limit() {
        let mut views = Views::default();
        views.sources.insert("loop".into(), "@view('loop')".into());
        let err = render_with(&mut views, "@view('loop')", json!({})).unwrap_err();
        assert!(matches!(err, RenderError::DepthExceeded(MAX_INCLUDE_DEPTH)));
    }

    #[test]
    fn test_context_accessors() {
        let mut ctx = Context::new();
        ctx.set("a", json!(1));
        assert_eq!(ctx.get("a"), Some(&json!(1)));
        assert_eq!(ctx.vars().len(), 1);
    }
}
