/// Callables, call arguments and the evaluation frame
use crate::config::types::{PurityError, Result};
use crate::guards::Guard;
use crate::runtime::namespace::Namespace;
use crate::value::{deep_equal, Snapshotter, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Positional and keyword arguments of one call
#[derive(Clone, Default)]
pub struct Args {
    positional: Vec<Value>,
    keywords: BTreeMap<String, Value>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kwarg(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.keywords.insert(name.to_string(), value.into());
        self
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.positional.push(value.into());
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.keywords.get(name)
    }

    pub fn positional(&self) -> &[Value] {
        &self.positional
    }

    pub fn keywords(&self) -> &BTreeMap<String, Value> {
        &self.keywords
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every argument with its display label: `arg[0]`, `kwarg['name']`
    pub fn labeled(&self) -> Vec<(String, &Value)> {
        let positional = self
            .positional
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("arg[{}]", i), v));
        let keywords = self
            .keywords
            .iter()
            .map(|(name, v)| (format!("kwarg['{}']", name), v));
        positional.chain(keywords).collect()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.positional.iter().chain(self.keywords.values())
    }

    /// Deep copy of all arguments through one memo, so aliasing between
    /// arguments is reproduced in the copy
    pub fn deep_copy(&self) -> Args {
        self.deep_copy_with(&mut Snapshotter::new())
    }

    pub fn deep_copy_with(&self, snapshotter: &mut Snapshotter) -> Args {
        Args {
            positional: self.positional.iter().map(|v| snapshotter.copy(v)).collect(),
            keywords: self
                .keywords
                .iter()
                .map(|(name, v)| (name.clone(), snapshotter.copy(v)))
                .collect(),
        }
    }

    /// Structural equality of two argument lists
    pub fn equivalent(&self, other: &Args) -> bool {
        self.positional.len() == other.positional.len()
            && self.keywords.len() == other.keywords.len()
            && self
                .positional
                .iter()
                .zip(&other.positional)
                .all(|(a, b)| deep_equal(a, b))
            && self.keywords.iter().all(|(name, a)| {
                other
                    .keywords
                    .get(name)
                    .map(|b| deep_equal(a, b))
                    .unwrap_or(false)
            })
    }
}

impl From<Vec<Value>> for Args {
    fn from(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keywords: BTreeMap::new(),
        }
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .positional
            .iter()
            .map(|v| v.to_string())
            .chain(self.keywords.iter().map(|(k, v)| format!("{}={}", k, v)))
            .collect();
        write!(f, "({})", rendered.join(", "))
    }
}

type Invoke = dyn Fn(&Args) -> Result<Value>;

struct FunctionInner {
    name: String,
    namespace: Namespace,
    params: Vec<String>,
    invoke: Box<Invoke>,
}

/// A named callable bound to its defining namespace
///
/// Cloning is cheap and shares the underlying callable.
#[derive(Clone)]
pub struct Function {
    inner: Rc<FunctionInner>,
}

impl Function {
    /// Define a function whose body runs against a fresh [`Frame`] per call.
    /// Arguments are bound to `params` by position, then by keyword.
    pub fn new<F>(name: &str, namespace: &Namespace, params: &[&str], body: F) -> Self
    where
        F: Fn(&mut Frame<'_>) -> Result<Value> + 'static,
    {
        let params: Vec<String> = params.iter().map(|p| p.to_string()).collect();
        let bound = params.clone();
        let fname = name.to_string();
        let ns = namespace.clone();
        let invoke = move |args: &Args| -> Result<Value> {
            let locals = bind(&fname, &bound, args)?;
            let mut frame = Frame {
                function: &fname,
                namespace: &ns,
                args,
                locals,
            };
            body(&mut frame)
        };
        Self {
            inner: Rc::new(FunctionInner {
                name: name.to_string(),
                namespace: namespace.clone(),
                params,
                invoke: Box::new(invoke),
            }),
        }
    }

    /// Wrapper sharing `inner`'s name, parameters and namespace
    pub(crate) fn wrap<F>(inner: &Function, invoke: F) -> Self
    where
        F: Fn(&Args) -> Result<Value> + 'static,
    {
        Self {
            inner: Rc::new(FunctionInner {
                name: inner.inner.name.clone(),
                namespace: inner.inner.namespace.clone(),
                params: inner.inner.params.clone(),
                invoke: Box::new(invoke),
            }),
        }
    }

    pub fn call(&self, args: &Args) -> Result<Value> {
        (self.inner.invoke)(args)
    }

    /// Call with positional arguments only
    pub fn call_with<I, V>(&self, values: I) -> Result<Value>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let args = Args::from(values.into_iter().map(Into::into).collect::<Vec<_>>());
        self.call(&args)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn params(&self) -> &[String] {
        &self.inner.params
    }

    pub fn namespace(&self) -> &Namespace {
        &self.inner.namespace
    }

    /// Apply a guard; chains as `f.guard(&a).guard(&b)`
    pub fn guard<G: Guard + ?Sized>(&self, guard: &G) -> Function {
        guard.apply(self)
    }

    pub fn same_as(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<function {}({}) in {}>",
            self.inner.name,
            self.inner.params.join(", "),
            self.inner.namespace.name()
        )
    }
}

fn bind(function: &str, params: &[String], args: &Args) -> Result<BTreeMap<String, Value>> {
    if args.positional.len() > params.len() {
        return Err(PurityError::type_error(format!(
            "{}() takes {} positional arguments but {} were given",
            function,
            params.len(),
            args.positional.len()
        )));
    }
    let mut locals: BTreeMap<String, Value> = params
        .iter()
        .cloned()
        .zip(args.positional.iter().cloned())
        .collect();
    for (name, value) in &args.keywords {
        if !params.contains(name) {
            return Err(PurityError::type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                function, name
            )));
        }
        if locals.insert(name.clone(), value.clone()).is_some() {
            return Err(PurityError::type_error(format!(
                "{}() got multiple values for argument '{}'",
                function, name
            )));
        }
    }
    if let Some(missing) = params.iter().find(|p| !locals.contains_key(*p)) {
        return Err(PurityError::type_error(format!(
            "{}() missing required argument: '{}'",
            function, missing
        )));
    }
    Ok(locals)
}

/// Evaluation frame of one call
///
/// Names resolve against locals first, then the defining namespace. Only the
/// namespace step can be intercepted.
pub struct Frame<'a> {
    function: &'a str,
    namespace: &'a Namespace,
    args: &'a Args,
    locals: BTreeMap<String, Value>,
}

impl<'a> Frame<'a> {
    pub fn function_name(&self) -> &str {
        self.function
    }

    pub fn namespace(&self) -> &Namespace {
        self.namespace
    }

    /// Arguments exactly as passed by the caller
    pub fn args(&self) -> &Args {
        self.args
    }

    pub fn local(&self, name: &str) -> Option<&Value> {
        self.locals.get(name)
    }

    /// Resolve a name: local, module binding, then built-in
    pub fn load(&self, name: &str) -> Result<Value> {
        match self.locals.get(name) {
            Some(value) => Ok(value.clone()),
            None => self.namespace.lookup(name),
        }
    }

    pub fn store(&mut self, name: &str, value: impl Into<Value>) {
        self.locals.insert(name.to_string(), value.into());
    }

    /// Read a module binding, skipping locals
    pub fn load_global(&self, name: &str) -> Result<Value> {
        self.namespace.lookup(name)
    }

    pub fn store_global(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.namespace.assign(name, value.into())
    }

    pub fn delete_global(&self, name: &str) -> Result<()> {
        self.namespace.delete(name)
    }
}
