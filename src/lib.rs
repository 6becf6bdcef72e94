//! # sfold: Scattering-Matrix Circuit Composition
//!
//! Builds the S-parameter response of a circuit out of small parametric
//! component models. Each component is a [`Model`]: a set of named ports, a
//! sparse table of lazily evaluated port-pair responses and a record of default
//! parameters. Wiring components together and folding the connections away
//! yields a new [`Model`] exposing only the external ports, so circuits nest
//! inside bigger circuits without any special casing.
//!
//! Nothing numeric happens while a circuit is built. Every composite entry is a
//! closure over its operands, evaluated on demand for whatever parameter record
//! the caller passes in. Array-valued parameters (a wavelength sweep, say)
//! broadcast through the whole circuit.
//!
//! ## Example
//!
//! ```
//! use num_complex::Complex64;
//! use sfold::{CircuitBuilder, ModelBuilder, ParamRecord, Response, Value};
//!
//! // a waveguide with a length-dependent phase
//! let waveguide = ModelBuilder::new(["in", "out"])
//!     .with_defaults(ParamRecord::new().with("length", 1.0))
//!     .build(|i, j| {
//!         (i != j).then(|| {
//!             Response::new(|p| {
//!                 let length = p.value("length")?;
//!                 Ok(Value::from_array(length.mapv(|l| Complex64::new(0.0, l).exp())))
//!             })
//!         })
//!     })
//!     .unwrap();
//!
//! let model = CircuitBuilder::new()
//!     .instance("wg1", &waveguide)
//!     .instance("wg2", &waveguide)
//!     .connect("wg1,out", "wg2,in")
//!     .port("wg1,in", "in")
//!     .port("wg2,out", "out")
//!     .build()
//!     .unwrap();
//!
//! // the two phases add up
//! let params = model.defaults().broadcast_set("length", 0.25);
//! let s21 = model.evaluate("out", "in", &params).unwrap().as_scalar().unwrap();
//! assert!((s21 - Complex64::new(0.0, 0.5).exp()).norm() < 1e-12);
//!
//! // parameters stay namespaced by instance
//! assert!(model.defaults().lookup(&["wg1", "length"]).is_ok());
//! ```
//!
//! ## Optional Features
//!
//! - **`serde`**: `Serialize`/`Deserialize` for parameter records and netlists

pub mod analysis;
pub mod circuit;
pub mod model;
pub mod netlist;
pub mod params;
pub mod sensitivity;
pub mod value;

pub use analysis::SMatrix;
pub use circuit::{circuit, CircuitBuilder, Connection, PortRef, ReductionPlan};
pub use model::{mode_port, Component, Model, ModelBuilder, PortKey, Response, MODE_SEPARATOR};
pub use netlist::{InstanceSpec, ModelLibrary, Netlist, RecursiveNetlist, DEFAULT_MODE};
pub use params::{ParamError, ParamNode, ParamRecord};
pub use value::Value;

/// Structural errors, raised while models and circuits are put together and
/// before any response is evaluated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CircuitError {
    #[error("a circuit needs at least one instance")]
    EmptyCircuit,

    #[error("a model needs at least one port")]
    EmptyModel,

    #[error("port `{port}` is declared more than once")]
    DuplicatePort { port: String },

    #[error("`{port}` is not a port of this model")]
    UnknownModelPort { port: String },

    #[error("port `{port}` is missing from the renaming")]
    IncompleteRenaming { port: String },

    #[error("instance `{name}` is defined more than once")]
    DuplicateInstance { name: String },

    #[error("invalid instance name `{name}`: names must be non-empty and must not contain ','")]
    InvalidInstanceName { name: String },

    #[error("invalid port reference `{text}`: expected `instance,port`")]
    InvalidPortRef { text: String },

    #[error("`{reference}` refers to unknown instance `{instance}`")]
    UnknownInstance { instance: String, reference: String },

    #[error("instance `{instance}` has no port `{port}` (available: {})", available.join(", "))]
    UnknownPort { instance: String, port: String, available: Vec<String> },

    #[error("port `{port}` is used more than once across connections and external ports")]
    DoubleUse { port: String },

    #[error("ports left neither connected nor exposed: {}", ports.join(", "))]
    Unterminated { ports: Vec<String> },

    #[error("external port name `{name}` is used more than once")]
    DuplicateExternalPort { name: String },

    #[error("a circuit needs at least one external port")]
    NoExternalPorts,

    #[error("port `{port}` cannot be connected to itself")]
    SelfConnection { port: String },

    #[error("invalid mode list [{}]: modes must be distinct, non-empty and free of '@' and ','", modes.join(", "))]
    InvalidModes { modes: Vec<String> },

    #[error("fold order must be a permutation of 0..{expected}")]
    InvalidFoldOrder { expected: usize },

    #[error("malformed default parameters for instance `{instance}`: {source}")]
    MalformedParams {
        instance: String,
        #[source]
        source: ParamError,
    },

    #[error(transparent)]
    Params(#[from] ParamError),

    #[error("no model found for: {}", names.join(", "))]
    MissingModels { names: Vec<String> },

    #[error("expected exactly one top-level netlist, found: {}", names.join(", "))]
    MultipleRoots { names: Vec<String> },

    #[error("no top-level netlist: every netlist is used by another one")]
    NoRoot,

    #[error("netlists depend on each other in a cycle: {}", cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("in netlist `{netlist}`: {source}")]
    InNetlist {
        netlist: String,
        #[source]
        source: Box<CircuitError>,
    },
}

/// Errors raised while evaluating a response.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("missing parameter `{name}`")]
    MissingParameter { name: String },

    #[error("parameter `{name}` is a record, not a value")]
    NotAValue { name: String },

    #[error("parameter `{name}` is a value, not a record")]
    NotARecord { name: String },

    #[error("shapes {lhs:?} and {rhs:?} cannot be broadcast together")]
    ShapeMismatch { lhs: Vec<usize>, rhs: Vec<usize> },

    #[error("unknown port `{port}`")]
    UnknownPort { port: String },

    #[error("port `{port}` appears in more than one connection")]
    RepeatedPort { port: String },

    #[error("in instance `{instance}`: {source}")]
    Scoped {
        instance: String,
        #[source]
        source: Box<EvalError>,
    },

    #[error(transparent)]
    Params(#[from] ParamError),

    #[error("component error: {0}")]
    Component(String),
}

pub type CircuitResult<T> = Result<T, CircuitError>;

pub type EvalResult<T> = Result<T, EvalError>;
