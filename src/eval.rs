use std::borrow::Cow;

use crate::ast::*;
use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::resolver::{Resolve, ResolvedTemplate};
use crate::value::{Value, ValueMap};

use tracing::trace;

/// HTML-escape `& < > " '`.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Walks resolved templates against a context.
///
/// Rendering only reads the templates it is given; the context is mutated
/// while loops run but every pushed layer is popped again before returning.
pub struct Evaluator<'a> {
    templates: &'a dyn Resolve,
    autoescape: bool,
    max_depth: usize,
    includes: Vec<String>,
}

impl<'a> Evaluator<'a> {
    pub fn new(templates: &'a dyn Resolve, config: &EngineConfig) -> Self {
        Self {
            templates,
            autoescape: config.autoescape,
            max_depth: config.max_depth,
            includes: Vec::new(),
        }
    }

    pub fn render(&mut self, template: &ResolvedTemplate, context: &mut Context) -> Result<String> {
        let mut output = String::new();
        self.render_nodes(template.nodes(), context, &mut output)?;
        Ok(output)
    }

    fn render_nodes(&mut self, nodes: &[Node], context: &mut Context, output: &mut String) -> Result<()> {
        for node in nodes {
            match node {
                Node::Text(s) => output.push_str(s),
                Node::Var(expr) => {
                    let val = self.eval(expr, context)?;
                    match &*val {
                        Value::Safe(s) => output.push_str(s),
                        Value::Seq(_) | Value::Map(_) => {
                            return Err(Error::type_error(format!(
                                "cannot render {} '{}' as text",
                                val.kind(),
                                describe(expr)
                            )))
                        }
                        other if self.autoescape => output.push_str(&escape_html(&other.to_string())),
                        other => output.push_str(&other.to_string()),
                    }
                }
                Node::For {
                    target,
                    iterable,
                    body,
                } => {
                    let items = self.eval(iterable, context)?.into_owned();
                    let items = match items {
                        Value::Seq(items) => items,
                        other => {
                            return Err(Error::type_error(format!(
                                "cannot iterate over {} '{}'",
                                other.kind(),
                                describe(iterable)
                            )))
                        }
                    };
                    let len = items.len();
                    for (i, item) in items.into_iter().enumerate() {
                        let mut loop_map = ValueMap::new();
                        loop_map.insert("index".into(), Value::from(i + 1));
                        loop_map.insert("index0".into(), Value::from(i));
                        loop_map.insert("first".into(), Value::Bool(i == 0));
                        loop_map.insert("last".into(), Value::Bool(i + 1 == len));
                        loop_map.insert("length".into(), Value::from(len));

                        let mut scope = ValueMap::new();
                        scope.insert(target.clone(), item);
                        scope.insert("loop".into(), Value::Map(loop_map));

                        context.push(scope);
                        let result = self.render_nodes(body, context, output);
                        context.pop();
                        result?;
                    }
                }
                Node::If { cases, else_body } => {
                    let mut matched = false;
                    for (cond, body) in cases {
                        if self.eval(cond, context)?.is_truthy() {
                            self.render_nodes(body, context, output)?;
                            matched = true;
                            break;
                        }
                    }
                    if !matched {
                        if let Some(body) = else_body {
                            self.render_nodes(body, context, output)?;
                        }
                    }
                }
                Node::Block { body, .. } => self.render_nodes(body, context, output)?,
                Node::Include(name) => self.render_include(name, context, output)?,
                // Consumed by the resolver; a root template has none.
                Node::Extends(_) => {}
            }
        }
        Ok(())
    }

    fn render_include(&mut self, name: &str, context: &mut Context, output: &mut String) -> Result<()> {
        if self.includes.len() >= self.max_depth {
            let mut chain = self.includes.clone();
            chain.push(name.to_string());
            return Err(Error::Cycle { chain });
        }
        let template = self.templates.resolve_template(name)?;
        trace!("Including {} at depth {}", name, self.includes.len() + 1);

        self.includes.push(name.to_string());
        let result = self.render_nodes(template.nodes(), context, output);
        self.includes.pop();
        result
    }

    /// Evaluate `expr`, borrowing from the context where the result is a
    /// bound value or a path into one.
    fn eval<'c>(&self, expr: &Expr, context: &'c Context) -> Result<Cow<'c, Value>> {
        let owned = match expr {
            Expr::StringLit(s) => Value::String(s.clone()),
            Expr::IntLit(i) => Value::Int(*i),
            Expr::FloatLit(f) => Value::Float(*f),
            Expr::BoolLit(b) => Value::Bool(*b),
            Expr::NoneLit => Value::None,
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval(item, context).map(Cow::into_owned))
                .collect::<Result<Vec<_>>>()
                .map(Value::Seq)?,
            Expr::Var(name) => {
                return Ok(context
                    .lookup(name)
                    .map_or(Cow::Owned(Value::Undefined), Cow::Borrowed))
            }
            Expr::Attribute(obj, attr) => {
                let val = self.eval(obj, context)?;
                return descend(val, PathKey::Attr(attr), obj);
            }
            Expr::Index(obj, idx) => {
                let val = self.eval(obj, context)?;
                let key = self.eval(idx, context)?;
                return descend(val, PathKey::Index(&*key), obj);
            }
            Expr::Not(inner) => Value::Bool(!self.eval(inner, context)?.is_truthy()),
            Expr::BinOp(lhs, BinOp::And, rhs) => {
                let l = self.eval(lhs, context)?.is_truthy();
                Value::Bool(l && self.eval(rhs, context)?.is_truthy())
            }
            Expr::BinOp(lhs, BinOp::Or, rhs) => {
                let l = self.eval(lhs, context)?.is_truthy();
                Value::Bool(l || self.eval(rhs, context)?.is_truthy())
            }
            Expr::BinOp(lhs, op, rhs) => {
                let l = self.eval(lhs, context)?;
                let r = self.eval(rhs, context)?;
                match op {
                    BinOp::Eq => Value::Bool(l.loose_eq(&r)),
                    BinOp::NotEq => Value::Bool(!l.loose_eq(&r)),
                    _ => add(l.into_owned(), r.into_owned(), self.autoescape)?,
                }
            }
            Expr::Filter { expr, name, args } => {
                let val = self.eval(expr, context)?.into_owned();
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, context).map(Cow::into_owned))
                    .collect::<Result<Vec<_>>>()?;
                apply_filter(name, val, args)?
            }
        };
        Ok(Cow::Owned(owned))
    }
}

#[derive(Clone, Copy)]
enum PathKey<'k> {
    Attr(&'k str),
    Index(&'k Value),
}

/// Step one segment into `val`, keeping the borrow when there is one.
fn descend<'c>(val: Cow<'c, Value>, key: PathKey<'_>, obj: &Expr) -> Result<Cow<'c, Value>> {
    Ok(match val {
        Cow::Borrowed(v) => lookup(v, key, obj)?.map_or(Cow::Owned(Value::Undefined), Cow::Borrowed),
        Cow::Owned(v) => Cow::Owned(lookup(&v, key, obj)?.cloned().unwrap_or_default()),
    })
}

fn lookup<'v>(val: &'v Value, key: PathKey<'_>, obj: &Expr) -> Result<Option<&'v Value>> {
    match (val, key) {
        (Value::Map(m), PathKey::Attr(attr)) => Ok(m.get(attr)),
        (Value::Seq(items), PathKey::Attr(attr)) => Ok(attr.parse::<usize>().ok().and_then(|i| items.get(i))),
        (other, PathKey::Attr(attr)) => Err(Error::type_error(format!(
            "cannot read attribute '{}' of {} '{}'",
            attr,
            other.kind(),
            describe(obj)
        ))),
        (Value::Map(m), PathKey::Index(Value::String(k) | Value::Safe(k))) => Ok(m.get(k.as_str())),
        (Value::Map(m), PathKey::Index(Value::Int(i))) => Ok(m.get(&i.to_string())),
        (Value::Seq(items), PathKey::Index(Value::Int(i))) => {
            let len = items.len() as i64;
            let i = if *i < 0 { len + i } else { *i };
            Ok(usize::try_from(i).ok().and_then(|i| items.get(i)))
        }
        (Value::Seq(_), PathKey::Index(other)) => Err(Error::type_error(format!(
            "sequence '{}' cannot be indexed by {}",
            describe(obj),
            other.kind()
        ))),
        (Value::Map(_), PathKey::Index(other)) => Err(Error::type_error(format!(
            "mapping '{}' cannot be indexed by {}",
            describe(obj),
            other.kind()
        ))),
        (other, PathKey::Index(_)) => Err(Error::type_error(format!(
            "cannot index {} '{}'",
            other.kind(),
            describe(obj)
        ))),
    }
}

/// `+` on numbers and text. Joining plain text onto safe markup escapes the
/// plain side first, so the result stays safe.
fn add(l: Value, r: Value, autoescape: bool) -> Result<Value> {
    let escape = |s: String| if autoescape { escape_html(&s) } else { s };
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => a
            .checked_add(b)
            .map(Value::Int)
            .ok_or_else(|| Error::type_error("integer overflow in '+'")),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(a as f64 + b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + b as f64)),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        (Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
        (Value::Safe(a), Value::Safe(b)) => Ok(Value::Safe(a + &b)),
        (Value::Safe(a), Value::String(b)) => Ok(Value::Safe(a + &escape(b))),
        (Value::String(a), Value::Safe(b)) => Ok(Value::Safe(escape(a) + &b)),
        (l, r) => Err(Error::type_error(format!(
            "cannot add {} and {}",
            l.kind(),
            r.kind()
        ))),
    }
}

fn filter_arity(name: &str) -> Option<usize> {
    match name {
        "safe" | "escape" | "e" | "upper" | "lower" | "trim" | "length" => Some(0),
        "default" => Some(1),
        _ => None,
    }
}

fn apply_filter(name: &str, val: Value, args: Vec<Value>) -> Result<Value> {
    let Some(expected) = filter_arity(name) else {
        return Err(Error::type_error(format!("unknown filter '{name}'")));
    };
    if args.len() != expected {
        return Err(Error::type_error(format!(
            "filter '{}' takes {} argument(s), got {}",
            name,
            expected,
            args.len()
        )));
    }

    let map_text = |val: Value, f: fn(&str) -> String| match val {
        Value::Safe(s) => Value::Safe(f(&s)),
        other => Value::String(f(&other.to_string())),
    };

    match name {
        "safe" => Ok(match val {
            Value::Safe(s) => Value::Safe(s),
            other => Value::Safe(other.to_string()),
        }),
        "escape" | "e" => Ok(match val {
            Value::Safe(s) => Value::Safe(s),
            other => Value::Safe(escape_html(&other.to_string())),
        }),
        "upper" => Ok(map_text(val, str::to_uppercase)),
        "lower" => Ok(map_text(val, str::to_lowercase)),
        "trim" => Ok(map_text(val, |s| s.trim().to_string())),
        "length" => match val {
            Value::Seq(items) => Ok(Value::from(items.len())),
            Value::Map(map) => Ok(Value::from(map.len())),
            Value::String(s) | Value::Safe(s) => Ok(Value::from(s.chars().count())),
            other => Err(Error::type_error(format!("{} has no length", other.kind()))),
        },
        "default" => Ok(if val.is_undefined() {
            args.into_iter().next().unwrap_or_default()
        } else {
            val
        }),
        _ => Err(Error::type_error(format!("unknown filter '{name}'"))),
    }
}

/// Source-like rendering of a path expression for error messages.
fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Var(name) => name.clone(),
        Expr::Attribute(obj, attr) => format!("{}.{}", describe(obj), attr),
        Expr::Index(obj, idx) => format!("{}[{}]", describe(obj), describe(idx)),
        Expr::StringLit(s) => format!("{s:?}"),
        Expr::IntLit(i) => i.to_string(),
        Expr::Filter { expr, name, .. } => format!("{} | {}", describe(expr), name),
        _ => "expression".to_string(),
    }
}
