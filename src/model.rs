//! Parametric n-port models.
//!
//! A [`Model`] is an ordered list of ports, a sparse table of port-pair
//! responses and a read-only default parameter record. Leaf components and
//! composite circuits share this one type, which is what makes composition
//! recursive: a circuit can be dropped into a bigger circuit as an instance.
//!
//! Responses are lazy. A [`Response`] is a pure function from a parameter
//! record to a [`Value`], so building or combining models does no numeric work
//! at all; evaluation happens only when a caller asks for an entry.
//!
//! # Example
//!
//! ```
//! use num_complex::Complex64;
//! use sfold::{Model, ModelBuilder, ParamRecord, Response, Value};
//!
//! // a lossless 50/50 splitter, with t and r fixed
//! let t = Complex64::new(0.5_f64.sqrt(), 0.0);
//! let r = Complex64::new(0.0, 0.5_f64.sqrt());
//! let model: Model = ModelBuilder::new(["in", "out"])
//!     .build(|i, j| Some(Response::constant(if i == j { r } else { t })))
//!     .unwrap();
//!
//! let s21 = model.evaluate("out", "in", &ParamRecord::new()).unwrap();
//! assert!((s21.as_scalar().unwrap() - t).norm() < 1e-12);
//! ```

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::Index;
use std::sync::Arc;

use itertools::Itertools;

use crate::circuit::PortRef;
use crate::params::ParamRecord;
use crate::value::Value;
use crate::{CircuitError, CircuitResult, EvalError, EvalResult};

/// Anything that can name a port.
///
/// Public models use `String`; the reducer works on [`PortRef`]s so that
/// ports of different instances never clash.
pub trait PortKey: Clone + Eq + Hash + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static {}

impl<T> PortKey for T where T: Clone + Eq + Hash + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static {}

type ResponseFn = dyn Fn(&ParamRecord) -> EvalResult<Value> + Send + Sync;

/// A lazily evaluated scattering entry.
#[derive(Clone)]
pub struct Response(Arc<ResponseFn>);

impl Response {
    /// Wraps a closure over the parameter record.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&ParamRecord) -> EvalResult<Value> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// A response that ignores its parameters.
    pub fn constant(value: impl Into<Value>) -> Self {
        let value = value.into();
        Self::new(move |_| Ok(value.clone()))
    }

    /// The structural zero response.
    pub fn zero() -> Self {
        Self::constant(Value::zero())
    }

    /// Evaluates the response at `params`.
    pub fn call(&self, params: &ParamRecord) -> EvalResult<Value> {
        (self.0)(params)
    }

    /// Wraps the response so that it reads its parameters from
    /// `params[instance]` and reports failures with the instance name. A
    /// missing `params[instance]` reads as an empty record.
    pub fn scoped(&self, instance: &str) -> Response {
        let inner = self.clone();
        let instance: Arc<str> = Arc::from(instance);
        Response::new(move |params| {
            let scope = |source| EvalError::Scoped { instance: instance.to_string(), source: Box::new(source) };
            let local = params.scope(&instance).map_err(scope)?;
            inner.call(local).map_err(scope)
        })
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Response(..)")
    }
}

/// A parametric n-port: ports, sparse responses and default parameters.
///
/// A missing `(output, input)` entry is a structural zero. It still resolves
/// to a (zero) response through [`Model::response`] and indexing.
#[derive(Clone)]
pub struct Model<P: PortKey = String> {
    ports: Vec<P>,
    entries: HashMap<P, HashMap<P, Response>>,
    defaults: Arc<ParamRecord>,
    zero: Response,
}

impl<P: PortKey> Model<P> {
    /// A model with the given ports, no responses and `defaults`.
    pub fn new<I>(ports: I, defaults: ParamRecord) -> CircuitResult<Self>
    where
        I: IntoIterator,
        I::Item: Into<P>,
    {
        let ports: Vec<P> = ports.into_iter().map(Into::into).collect();
        if ports.is_empty() {
            return Err(CircuitError::EmptyModel);
        }
        if let Some(port) = ports.iter().duplicates().next() {
            return Err(CircuitError::DuplicatePort { port: port.to_string() });
        }
        Ok(Self::from_parts(ports, HashMap::new(), Arc::new(defaults)))
    }

    pub(crate) fn from_parts(
        ports: Vec<P>,
        entries: HashMap<P, HashMap<P, Response>>,
        defaults: Arc<ParamRecord>,
    ) -> Self {
        Self { ports, entries, defaults, zero: Response::zero() }
    }

    /// Builder-style [`set_response`](Self::set_response).
    pub fn with_response(mut self, output: impl Into<P>, input: impl Into<P>, response: Response) -> CircuitResult<Self> {
        self.set_response(output.into(), input.into(), response)?;
        Ok(self)
    }

    /// Sets the response from `input` to `output`. Both ports must be declared.
    pub fn set_response(&mut self, output: P, input: P, response: Response) -> CircuitResult<Option<Response>> {
        for port in [&output, &input] {
            if !self.ports.contains(port) {
                return Err(CircuitError::UnknownModelPort { port: port.to_string() });
            }
        }
        Ok(self.entries.entry(output).or_default().insert(input, response))
    }

    /// Ports in declaration order.
    pub fn ports(&self) -> &[P] {
        &self.ports
    }

    /// Number of ports.
    pub fn num_ports(&self) -> usize {
        self.ports.len()
    }

    /// True if `port` is a port of this model.
    pub fn has_port<Q>(&self, port: &Q) -> bool
    where
        P: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        self.ports.iter().any(|p| <P as Borrow<Q>>::borrow(p) == port)
    }

    /// Number of stored (structurally non-zero) entries.
    pub fn num_entries(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    /// The stored response, or `None` for a structural zero.
    pub fn entry<Q>(&self, output: &Q, input: &Q) -> Option<&Response>
    where
        P: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(output)?.get(input)
    }

    /// Every stored entry as `(output, input, response)`.
    pub fn entries(&self) -> impl Iterator<Item = (&P, &P, &Response)> {
        self.entries.iter().flat_map(|(output, row)| row.iter().map(move |(input, r)| (output, input, r)))
    }

    /// The response from `input` to `output`; structural zeros resolve to a
    /// zero response.
    pub fn response<Q>(&self, output: &Q, input: &Q) -> EvalResult<Response>
    where
        P: Borrow<Q>,
        Q: Hash + Eq + fmt::Display + ?Sized,
    {
        self.resolve(output, input).cloned()
    }

    fn resolve<Q>(&self, output: &Q, input: &Q) -> EvalResult<&Response>
    where
        P: Borrow<Q>,
        Q: Hash + Eq + fmt::Display + ?Sized,
    {
        for port in [output, input] {
            if !self.has_port(port) {
                return Err(EvalError::UnknownPort { port: port.to_string() });
            }
        }
        Ok(self.entry(output, input).unwrap_or(&self.zero))
    }

    /// Evaluates the response from `input` to `output` at `params`.
    pub fn evaluate<Q>(&self, output: &Q, input: &Q, params: &ParamRecord) -> EvalResult<Value>
    where
        P: Borrow<Q>,
        Q: Hash + Eq + fmt::Display + ?Sized,
    {
        self.resolve(output, input)?.call(params)
    }

    /// Evaluates at the model's own defaults.
    pub fn evaluate_defaults<Q>(&self, output: &Q, input: &Q) -> EvalResult<Value>
    where
        P: Borrow<Q>,
        Q: Hash + Eq + fmt::Display + ?Sized,
    {
        self.evaluate(output, input, &self.defaults)
    }

    /// The canonical defaults, read-only.
    pub fn defaults(&self) -> &ParamRecord {
        &self.defaults
    }

    pub(crate) fn shared_defaults(&self) -> &Arc<ParamRecord> {
        &self.defaults
    }

    /// An owned deep copy of the defaults, free to mutate.
    pub fn duplicate_defaults(&self) -> ParamRecord {
        self.defaults.duplicate()
    }

    /// The same model with `overrides` applied to its defaults. Keys the model
    /// does not declare are ignored with a warning.
    pub fn with_defaults(&self, overrides: &ParamRecord) -> Self {
        let mut defaults = self.duplicate_defaults();
        for key in defaults.overlay(overrides) {
            log::warn!("ignoring setting `{key}`: not a parameter of this model");
        }
        Self { defaults: Arc::new(defaults), ..self.clone() }
    }

    /// Renames every port. `mapping` must name each port exactly once and its
    /// order becomes the port order of the result.
    pub fn rename_ports<Q: PortKey>(&self, mapping: &[(P, Q)]) -> CircuitResult<Model<Q>> {
        let mut lookup: HashMap<&P, &Q> = HashMap::with_capacity(mapping.len());
        for (from, to) in mapping {
            if !self.ports.contains(from) {
                return Err(CircuitError::UnknownModelPort { port: from.to_string() });
            }
            if lookup.insert(from, to).is_some() {
                return Err(CircuitError::DuplicatePort { port: from.to_string() });
            }
        }
        if let Some(port) = self.ports.iter().find(|p| !lookup.contains_key(p)) {
            return Err(CircuitError::IncompleteRenaming { port: port.to_string() });
        }
        let ports: Vec<Q> = mapping.iter().map(|(_, to)| to.clone()).collect();
        if let Some(port) = ports.iter().duplicates().next() {
            return Err(CircuitError::DuplicatePort { port: port.to_string() });
        }

        let entries: HashMap<Q, HashMap<Q, Response>> = self
            .entries
            .iter()
            .map(|(output, row)| {
                let row: HashMap<Q, Response> =
                    row.iter().map(|(input, r)| (lookup[input].clone(), r.clone())).collect();
                (lookup[output].clone(), row)
            })
            .collect();
        Ok(Model::from_parts(ports, entries, Arc::clone(&self.defaults)))
    }

    /// This model as instance `instance` of a circuit: ports become
    /// [`PortRef`]s, responses read `params[instance]` and the defaults are
    /// nested as `{instance: defaults}`.
    pub fn scoped(&self, instance: &str) -> Model<PortRef> {
        let port = |p: &P| PortRef::new(instance, p.to_string());
        let entries: HashMap<PortRef, HashMap<PortRef, Response>> = self
            .entries
            .iter()
            .map(|(output, row)| {
                let row: HashMap<PortRef, Response> =
                    row.iter().map(|(input, r)| (port(input), r.scoped(instance))).collect();
                (port(output), row)
            })
            .collect();
        let defaults = ParamRecord::new().with(instance, self.defaults.duplicate());
        Model::from_parts(self.ports.iter().map(port).collect(), entries, Arc::new(defaults))
    }
}

impl<P: PortKey> fmt::Debug for Model<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("ports", &self.ports)
            .field("entries", &self.num_entries())
            .field("defaults", &self.defaults)
            .finish()
    }
}

/// `model[("out", "in")]` is the response from `in` to `out`.
///
/// # Panics
///
/// Panics if either port is not a port of the model; use
/// [`Model::response`] for a fallible lookup.
impl Index<(&str, &str)> for Model<String> {
    type Output = Response;

    fn index(&self, (output, input): (&str, &str)) -> &Response {
        match self.resolve(output, input) {
            Ok(response) => response,
            Err(err) => panic!("{err}"),
        }
    }
}

/// Separates a port name from its mode, as in `in@te`.
pub const MODE_SEPARATOR: char = '@';

/// `port@mode`
pub fn mode_port(port: &str, mode: &str) -> String {
    format!("{port}{MODE_SEPARATOR}{mode}")
}

impl Model<String> {
    /// One copy of every port per mode, named `port@mode` and ordered port by
    /// port. Every mode sees the same responses, modes never couple and the
    /// copies share one default record.
    pub fn multimode<S: AsRef<str>>(&self, modes: &[S]) -> CircuitResult<Model> {
        if modes.is_empty() {
            return Err(CircuitError::InvalidModes { modes: Vec::new() });
        }
        let ports: Vec<String> = self
            .ports
            .iter()
            .flat_map(|port| modes.iter().map(move |mode| mode_port(port, mode.as_ref())))
            .collect();
        if let Some(port) = ports.iter().duplicates().next() {
            return Err(CircuitError::DuplicatePort { port: port.clone() });
        }

        let mut entries: HashMap<String, HashMap<String, Response>> = HashMap::new();
        for (output, input, response) in self.entries() {
            for mode in modes {
                entries
                    .entry(mode_port(output, mode.as_ref()))
                    .or_default()
                    .insert(mode_port(input, mode.as_ref()), response.clone());
            }
        }
        Ok(Model::from_parts(ports, entries, Arc::clone(&self.defaults)))
    }
}

/// Builds a model from a generator over port index pairs.
///
/// The generator is called for `i <= j` and its result stored at
/// `(ports[i], ports[j])`. A reciprocal model (the default) mirrors each
/// result to `(ports[j], ports[i])`; otherwise the generator is also called
/// for `(j, i)`. `None` marks a structural zero.
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    ports: Vec<String>,
    defaults: ParamRecord,
    reciprocal: bool,
}

impl ModelBuilder {
    /// A reciprocal builder over `ports` with empty defaults.
    pub fn new<I>(ports: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self { ports: ports.into_iter().map(Into::into).collect(), defaults: ParamRecord::new(), reciprocal: true }
    }

    /// Default parameters of the built model.
    pub fn with_defaults(mut self, defaults: ParamRecord) -> Self {
        self.defaults = defaults;
        self
    }

    /// Whether `(j, i)` mirrors `(i, j)`. Defaults to `true`.
    pub fn reciprocal(mut self, reciprocal: bool) -> Self {
        self.reciprocal = reciprocal;
        self
    }

    /// Calls `generator` for every port pair and collects the model.
    pub fn build<F>(self, mut generator: F) -> CircuitResult<Model>
    where
        F: FnMut(usize, usize) -> Option<Response>,
    {
        let mut model: Model = Model::new(self.ports, self.defaults)?;
        let ports = model.ports.clone();
        for j in 0..ports.len() {
            for i in 0..=j {
                let forward = generator(i, j);
                if let Some(response) = &forward {
                    model.set_response(ports[i].clone(), ports[j].clone(), response.clone())?;
                }
                if i == j {
                    continue;
                }
                let backward = if self.reciprocal { forward } else { generator(j, i) };
                if let Some(response) = backward {
                    model.set_response(ports[j].clone(), ports[i].clone(), response)?;
                }
            }
        }
        Ok(model)
    }
}

/// A component that can take part in a circuit.
///
/// Implementors describe their ports, their non-zero port-pair responses and
/// their default parameters. [`Model`] implements it, so composite circuits
/// are components too.
pub trait Component {
    /// Port names in order.
    fn port_names(&self) -> Vec<String>;

    /// Response from `input` to `output`, or `None` for a structural zero.
    fn port_response(&self, output: &str, input: &str) -> Option<Response>;

    /// Default parameter record.
    fn default_params(&self) -> ParamRecord;

    fn to_model(&self) -> CircuitResult<Model> {
        let ports = self.port_names();
        let mut model: Model = Model::new(ports.clone(), self.default_params())?;
        for output in &ports {
            for input in &ports {
                if let Some(response) = self.port_response(output, input) {
                    model.set_response(output.clone(), input.clone(), response)?;
                }
            }
        }
        Ok(model)
    }
}

impl Component for Model {
    fn port_names(&self) -> Vec<String> {
        self.ports.clone()
    }

    fn port_response(&self, output: &str, input: &str) -> Option<Response> {
        self.entry(output, input).cloned()
    }

    fn default_params(&self) -> ParamRecord {
        self.duplicate_defaults()
    }

    fn to_model(&self) -> CircuitResult<Model> {
        Ok(self.clone())
    }
}
