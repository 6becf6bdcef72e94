//! Circuit construction: instances, connections and external ports.
//!
//! A circuit is described by named instances of models, a list of
//! connections between instance ports and an ordered table exposing the
//! remaining ports under external names. [`CircuitBuilder`] collects that
//! description, [`validate`] checks it and the result is a [`ReductionPlan`]
//! which [`reduce`] folds into a single composite [`Model`].
//!
//! Port references are written `"instance,port"`.

use std::fmt;
use std::str::FromStr;

use itertools::Itertools;

use crate::analysis::SMatrix;
use crate::model::{Component, Model};
use crate::params::ParamRecord;
use crate::{CircuitError, CircuitResult, EvalError, EvalResult};

pub mod reduce;
pub mod validate;

/// Separator between instance and port in a textual port reference.
pub const PORT_SEPARATOR: char = ',';

/// A port of a named instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRef {
    pub instance: String,
    pub port: String,
}

impl PortRef {
    pub fn new(instance: impl Into<String>, port: impl Into<String>) -> Self {
        Self { instance: instance.into(), port: port.into() }
    }

    /// Parses `"instance,port"`. Both halves must be non-empty.
    pub fn parse(text: &str) -> CircuitResult<Self> {
        match text.split_once(PORT_SEPARATOR) {
            Some((instance, port)) if !instance.is_empty() && !port.is_empty() => Ok(Self::new(instance, port)),
            _ => Err(CircuitError::InvalidPortRef { text: text.to_string() }),
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.instance, PORT_SEPARATOR, self.port)
    }
}

impl FromStr for PortRef {
    type Err = CircuitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<(&str, &str)> for PortRef {
    fn from((instance, port): (&str, &str)) -> Self {
        Self::new(instance, port)
    }
}

/// Conversion into a [`PortRef`], for the builder methods.
pub trait IntoPortRef {
    fn into_port_ref(self) -> CircuitResult<PortRef>;
}

impl IntoPortRef for PortRef {
    fn into_port_ref(self) -> CircuitResult<PortRef> {
        Ok(self)
    }
}

impl IntoPortRef for &str {
    fn into_port_ref(self) -> CircuitResult<PortRef> {
        PortRef::parse(self)
    }
}

impl IntoPortRef for String {
    fn into_port_ref(self) -> CircuitResult<PortRef> {
        PortRef::parse(&self)
    }
}

impl IntoPortRef for (&str, &str) {
    fn into_port_ref(self) -> CircuitResult<PortRef> {
        Ok(self.into())
    }
}

/// An undirected link between two instance ports.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    pub a: PortRef,
    pub b: PortRef,
}

impl Connection {
    pub fn new(a: PortRef, b: PortRef) -> Self {
        Self { a, b }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.a, self.b)
    }
}

/// Collects a circuit description.
///
/// Parse and conversion errors are kept until [`plan`](Self::plan) or
/// [`build`](Self::build), which report the first one.
#[derive(Debug, Clone, Default)]
pub struct CircuitBuilder {
    instances: Vec<(String, Model)>,
    connections: Vec<Connection>,
    ports: Vec<(PortRef, String)>,
    errors: Vec<CircuitError>,
}

impl CircuitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an instance of any [`Component`].
    pub fn instance(self, name: impl Into<String>, component: &impl Component) -> Self {
        match component.to_model() {
            Ok(model) => self.instance_model(name, model),
            Err(err) => self.defer(err),
        }
    }

    pub fn instance_model(mut self, name: impl Into<String>, model: Model) -> Self {
        self.instances.push((name.into(), model));
        self
    }

    pub fn connect(mut self, a: impl IntoPortRef, b: impl IntoPortRef) -> Self {
        match (a.into_port_ref(), b.into_port_ref()) {
            (Ok(a), Ok(b)) => {
                self.connections.push(Connection::new(a, b));
                self
            }
            (Err(err), _) | (_, Err(err)) => self.defer(err),
        }
    }

    /// Exposes `port` as external port `name`. External ports keep the order
    /// in which they are added.
    pub fn port(mut self, port: impl IntoPortRef, name: impl Into<String>) -> Self {
        match port.into_port_ref() {
            Ok(port) => {
                self.ports.push((port, name.into()));
                self
            }
            Err(err) => self.defer(err),
        }
    }

    fn defer(mut self, err: CircuitError) -> Self {
        self.errors.push(err);
        self
    }

    /// Validates the description and returns the plan to fold it.
    pub fn plan(self) -> CircuitResult<ReductionPlan> {
        if let Some(err) = self.errors.into_iter().next() {
            return Err(err);
        }
        validate::validate(&self.instances, &self.connections, &self.ports)?;
        Ok(ReductionPlan { instances: self.instances, connections: self.connections, ports: self.ports })
    }

    /// Validates and folds the circuit into one model.
    pub fn build(self) -> CircuitResult<Model> {
        self.plan()?.reduce()
    }
}

/// Builds a circuit in one call.
///
/// ```
/// use sfold::{circuit, ModelBuilder, Response};
///
/// let through = ModelBuilder::new(["a", "b"])
///     .build(|i, j| (i != j).then(|| Response::constant(1.0)))
///     .unwrap();
/// let model = circuit(
///     [("x", through.clone()), ("y", through)],
///     [("x,b", "y,a")],
///     [("x,a", "in"), ("y,b", "out")],
/// )
/// .unwrap();
/// assert_eq!(model.ports(), &["in".to_string(), "out".to_string()]);
/// ```
pub fn circuit<'a, I, C, P>(instances: I, connections: C, ports: P) -> CircuitResult<Model>
where
    I: IntoIterator<Item = (&'a str, Model)>,
    C: IntoIterator<Item = (&'a str, &'a str)>,
    P: IntoIterator<Item = (&'a str, &'a str)>,
{
    let builder = instances.into_iter().fold(CircuitBuilder::new(), |b, (name, model)| b.instance_model(name, model));
    let builder = connections.into_iter().fold(builder, |b, (x, y)| b.connect(x, y));
    ports.into_iter().fold(builder, |b, (port, name)| b.port(port, name)).build()
}

/// A validated circuit, ready to be folded.
#[derive(Debug, Clone)]
pub struct ReductionPlan {
    instances: Vec<(String, Model)>,
    connections: Vec<Connection>,
    ports: Vec<(PortRef, String)>,
}

impl ReductionPlan {
    pub fn instances(&self) -> impl Iterator<Item = (&str, &Model)> {
        self.instances.iter().map(|(name, model)| (name.as_str(), model))
    }

    /// Connections in the order they will be folded.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn external_ports(&self) -> &[(PortRef, String)] {
        &self.ports
    }

    /// Reorders the folds: connection `order[k]` is folded `k`-th.
    pub fn with_fold_order(mut self, order: &[usize]) -> CircuitResult<Self> {
        let expected = self.connections.len();
        let is_permutation = order.len() == expected && order.iter().copied().sorted().eq(0..expected);
        if !is_permutation {
            return Err(CircuitError::InvalidFoldOrder { expected });
        }
        self.connections = order.iter().map(|&k| self.connections[k].clone()).collect();
        Ok(self)
    }

    /// Folds every connection and renames the survivors to external names.
    pub fn reduce(&self) -> CircuitResult<Model> {
        reduce::reduce(self)
    }

    /// The external S-matrix at `params`, obtained by evaluating every
    /// instance and eliminating all connections at once with dense linear
    /// algebra. Serves as an independent reference for [`reduce`](Self::reduce).
    pub fn evaluate_dense(&self, params: &ParamRecord) -> EvalResult<SMatrix> {
        let mut blocks = Vec::with_capacity(self.instances.len());
        for (name, model) in &self.instances {
            let scope = |source| EvalError::Scoped { instance: name.clone(), source: Box::new(source) };
            let local = params.scope(name).map_err(scope)?;
            let block = model.s_matrix(local).map_err(scope)?;
            let renamed: Vec<(String, String)> =
                block.ports().iter().map(|port| (port.clone(), PortRef::new(name.as_str(), port.as_str()).to_string())).collect();
            blocks.push(block.select(&renamed)?);
        }
        let pairs: Vec<(String, String)> =
            self.connections.iter().map(|c| (c.a.to_string(), c.b.to_string())).collect();
        let external: Vec<(String, String)> =
            self.ports.iter().map(|(port, name)| (port.to_string(), name.clone())).collect();
        SMatrix::block_diagonal(&blocks)?.connect(&pairs)?.select(&external)
    }
}
