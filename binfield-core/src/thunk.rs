//! Expression thunks and the context facade.
//!
//! Field dependencies are an explicit `Expr` AST with symbolic operator
//! nodes rather than closures, which makes thunks introspectable (needed
//! for auto-override: we can ask "is this spec exactly `FieldRef(name)`?"
//! without evaluating it) and keeps them pure — `Expr::eval` never touches
//! anything but the `Facade` it's handed.

use crate::context::ContextHandle;
use crate::error::Result;
use crate::value::Value;
use std::fmt;
use std::rc::Rc;

/// A pure function over a [`Facade`], used for specs too irregular to
/// express as an [`Expr`] (e.g. a user-supplied override closure that needs
/// the field's current value).
pub type ThunkFn = Rc<dyn Fn(&Facade, Option<&Value>) -> Result<Value>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    fn apply(self, lhs: Value, rhs: Value) -> Result<Value> {
        use BinOp::*;
        Ok(match self {
            Add => Value::Int(lhs.as_int()? + rhs.as_int()?),
            Sub => Value::Int(lhs.as_int()? - rhs.as_int()?),
            Mul => Value::Int(lhs.as_int()? * rhs.as_int()?),
            Div => Value::Int(lhs.as_int()? / rhs.as_int()?),
            FloorDiv => Value::Int(lhs.as_int()?.div_euclid(rhs.as_int()?)),
            Mod => Value::Int(lhs.as_int()?.rem_euclid(rhs.as_int()?)),
            Shl => Value::Int(lhs.as_int()? << rhs.as_int()?),
            Shr => Value::Int(lhs.as_int()? >> rhs.as_int()?),
            BitAnd => Value::Int(lhs.as_int()? & rhs.as_int()?),
            BitOr => Value::Int(lhs.as_int()? | rhs.as_int()?),
            BitXor => Value::Int(lhs.as_int()? ^ rhs.as_int()?),
            Eq => Value::Bool(values_eq(&lhs, &rhs)?),
            Ne => Value::Bool(!values_eq(&lhs, &rhs)?),
            Lt => Value::Bool(lhs.as_int()? < rhs.as_int()?),
            Le => Value::Bool(lhs.as_int()? <= rhs.as_int()?),
            Gt => Value::Bool(lhs.as_int()? > rhs.as_int()?),
            Ge => Value::Bool(lhs.as_int()? >= rhs.as_int()?),
            And => Value::Bool(lhs.truthy()? && rhs.truthy()?),
            Or => Value::Bool(lhs.truthy()? || rhs.truthy()?),
        })
    }
}

fn values_eq(lhs: &Value, rhs: &Value) -> Result<bool> {
    Ok(match (lhs, rhs) {
        (Value::Bytes(a), Value::Bytes(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => a == b,
        _ => lhs.as_int()? == rhs.as_int()?,
    })
}

/// A symbolic expression over sibling/ancestor fields, composable with the
/// standard arithmetic, comparison, and bitwise operators.
#[derive(Clone)]
pub enum Expr {
    Const(Value),
    /// `f.name` / `f[name]`.
    Field(String),
    /// `f._<inner>`: evaluate `inner` against the parent context's facade.
    Parent(Box<Expr>),
    /// `f._root<inner>`: evaluate `inner` against the root context's facade.
    Root(Box<Expr>),
    /// `len_(inner)`.
    Len(Box<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    BinOp(BinOp, Box<Expr>, Box<Expr>),
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(v) => write!(f, "{v:?}"),
            Expr::Field(n) => write!(f, "f.{n}"),
            Expr::Parent(e) => write!(f, "parent({e:?})"),
            Expr::Root(e) => write!(f, "root({e:?})"),
            Expr::Len(e) => write!(f, "len_({e:?})"),
            Expr::Not(e) => write!(f, "!({e:?})"),
            Expr::Neg(e) => write!(f, "-({e:?})"),
            Expr::BinOp(op, l, r) => write!(f, "({l:?} {op:?} {r:?})"),
        }
    }
}

/// `f.name` — references a sibling field by name.
pub fn field(name: impl Into<String>) -> Expr {
    Expr::Field(name.into())
}

/// A constant value embedded in an expression.
pub fn val(v: impl Into<Value>) -> Expr {
    Expr::Const(v.into())
}

/// `f._<inner>` — navigate to the parent context before evaluating `inner`.
pub fn parent_(inner: Expr) -> Expr {
    Expr::Parent(Box::new(inner))
}

/// `f._root<inner>` — navigate to the root context before evaluating `inner`.
pub fn root_(inner: Expr) -> Expr {
    Expr::Root(Box::new(inner))
}

/// `len_(inner)` — byte length of the evaluated value.
pub fn len_(inner: Expr) -> Expr {
    Expr::Len(Box::new(inner))
}

macro_rules! binop_trait {
    ($trait:ident, $method:ident, $variant:ident) => {
        impl std::ops::$trait for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::BinOp(BinOp::$variant, Box::new(self), Box::new(rhs))
            }
        }
    };
}

binop_trait!(Add, add, Add);
binop_trait!(Sub, sub, Sub);
binop_trait!(Mul, mul, Mul);
binop_trait!(Div, div, Div);
binop_trait!(Rem, rem, Mod);
binop_trait!(Shl, shl, Shl);
binop_trait!(Shr, shr, Shr);
binop_trait!(BitAnd, bitand, BitAnd);
binop_trait!(BitOr, bitor, BitOr);
binop_trait!(BitXor, bitxor, BitXor);

impl std::ops::Not for Expr {
    type Output = Expr;
    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

impl std::ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::Neg(Box::new(self))
    }
}

impl Expr {
    /// `//` has no Rust operator; exposed as a method instead.
    pub fn floor_div(self, rhs: Expr) -> Expr {
        Expr::BinOp(BinOp::FloorDiv, Box::new(self), Box::new(rhs))
    }

    pub fn eq_(self, rhs: Expr) -> Expr {
        Expr::BinOp(BinOp::Eq, Box::new(self), Box::new(rhs))
    }

    pub fn ne_(self, rhs: Expr) -> Expr {
        Expr::BinOp(BinOp::Ne, Box::new(self), Box::new(rhs))
    }

    pub fn lt(self, rhs: Expr) -> Expr {
        Expr::BinOp(BinOp::Lt, Box::new(self), Box::new(rhs))
    }

    pub fn le(self, rhs: Expr) -> Expr {
        Expr::BinOp(BinOp::Le, Box::new(self), Box::new(rhs))
    }

    pub fn gt(self, rhs: Expr) -> Expr {
        Expr::BinOp(BinOp::Gt, Box::new(self), Box::new(rhs))
    }

    pub fn ge(self, rhs: Expr) -> Expr {
        Expr::BinOp(BinOp::Ge, Box::new(self), Box::new(rhs))
    }

    pub fn and_(self, rhs: Expr) -> Expr {
        Expr::BinOp(BinOp::And, Box::new(self), Box::new(rhs))
    }

    pub fn or_(self, rhs: Expr) -> Expr {
        Expr::BinOp(BinOp::Or, Box::new(self), Box::new(rhs))
    }

    pub fn len_(self) -> Expr {
        Expr::Len(Box::new(self))
    }

    /// If this expression is exactly a bare field reference, return its
    /// name. Used by auto-override inference, which only fires for specs
    /// that are *literally* `FieldRef(name)`, not arbitrary expressions
    /// that happen to mention a field.
    pub fn as_bare_field_ref(&self) -> Option<&str> {
        match self {
            Expr::Field(name) => Some(name),
            _ => None,
        }
    }

    pub fn eval(&self, facade: &Facade) -> Result<Value> {
        match self {
            Expr::Const(v) => Ok(v.clone()),
            Expr::Field(name) => facade.lookup(name),
            Expr::Parent(inner) => inner.eval(&facade.navigate_parent()?),
            Expr::Root(inner) => inner.eval(&facade.navigate_root()?),
            Expr::Len(inner) => {
                let v = inner.eval(facade)?;
                Ok(Value::Int(v.len_()? as i128))
            }
            Expr::Not(inner) => Ok(Value::Bool(!inner.eval(facade)?.truthy()?)),
            Expr::Neg(inner) => Ok(Value::Int(-inner.eval(facade)?.as_int()?)),
            Expr::BinOp(op, l, r) => {
                let lv = l.eval(facade)?;
                let rv = r.eval(facade)?;
                op.apply(lv, rv)
            }
        }
    }
}

/// A dependent attribute: constant, bare field reference, pure expression,
/// or fully custom thunk, with `Expr` filling in for the "introspectable
/// pure function" half of `Thunk`.
#[derive(Clone)]
pub enum Spec {
    Const(Value),
    FieldRef(String),
    Expr(Expr),
    Thunk(ThunkFn),
}

impl fmt::Debug for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Spec::Const(v) => write!(f, "Const({v:?})"),
            Spec::FieldRef(n) => write!(f, "FieldRef({n})"),
            Spec::Expr(e) => write!(f, "Expr({e:?})"),
            Spec::Thunk(_) => write!(f, "Thunk(..)"),
        }
    }
}

impl Spec {
    pub fn field(name: impl Into<String>) -> Spec {
        Spec::FieldRef(name.into())
    }

    pub fn expr(e: Expr) -> Spec {
        Spec::Expr(e)
    }

    pub fn thunk(f: impl Fn(&Facade, Option<&Value>) -> Result<Value> + 'static) -> Spec {
        Spec::Thunk(Rc::new(f))
    }

    pub fn resolve(&self, facade: &Facade, current: Option<&Value>) -> Result<Value> {
        match self {
            Spec::Const(v) => Ok(v.clone()),
            Spec::FieldRef(name) => facade.lookup(name),
            Spec::Expr(e) => e.eval(facade),
            Spec::Thunk(f) => f(facade, current),
        }
    }

    /// The field name this spec implies an auto-override for, if any.
    /// Only a bare `FieldRef` or an `Expr` that is exactly `Field(name)`
    /// qualifies.
    pub fn as_bare_field_ref(&self) -> Option<&str> {
        match self {
            Spec::FieldRef(name) => Some(name),
            Spec::Expr(e) => e.as_bare_field_ref(),
            _ => None,
        }
    }
}

impl From<Value> for Spec {
    fn from(v: Value) -> Self {
        Spec::Const(v)
    }
}

impl From<Expr> for Spec {
    fn from(e: Expr) -> Self {
        Spec::Expr(e)
    }
}

/// A thin facade over a [`ContextHandle`] exposing attribute-style lookup
/// (`f.name`) and navigation (`f._`, `f._root`, `f._context`) without
/// requiring language-level attribute interception. Inputs are validated
/// against the known field set at lookup time, producing `FieldNotFound`
/// rather than a panic.
#[derive(Clone)]
pub struct Facade {
    ctx: ContextHandle,
}

impl Facade {
    pub fn new(ctx: ContextHandle) -> Self {
        Self { ctx }
    }

    pub fn lookup(&self, name: &str) -> Result<Value> {
        crate::context::ParsingContext::lookup(&self.ctx, name)
    }

    pub fn navigate_parent(&self) -> Result<Facade> {
        let parent = self.ctx.borrow().parent.clone();
        match parent {
            Some(p) => Ok(Facade::new(p)),
            None => Err(crate::error::BinFieldError::FieldNotFound(
                "<parent>".to_string(),
            )),
        }
    }

    pub fn navigate_root(&self) -> Result<Facade> {
        Ok(Facade::new(crate::context::ParsingContext::root(&self.ctx)))
    }

    /// `f._context` — escape to the raw context handle.
    pub fn context(&self) -> ContextHandle {
        self.ctx.clone()
    }
}
