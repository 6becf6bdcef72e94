//! Declarative circuit descriptions.
//!
//! A [`Netlist`] names its instances by component, wires them with a
//! `"instance,port" -> "instance,port"` table and exposes ports with a
//! `"instance,port" -> external name` table. Components are resolved against a
//! [`ModelLibrary`] when the netlist is built.
//!
//! A [`RecursiveNetlist`] holds several named netlists that may use each other
//! as components. They are built children first, and the one netlist nobody
//! uses is the result.
//!
//! Both build single-mode by default. [`Netlist::build_with_modes`] and
//! [`RecursiveNetlist::build_with_modes`] instead give every port one copy per
//! optical mode, named `port@mode`, with modes propagating independently.
//!
//! With the `serde` feature both deserialize from the obvious JSON layout:
//!
//! ```json
//! {
//!   "instances": {
//!     "mirror1": { "component": "mirror", "settings": { "t_amp": 0.9 } },
//!     "gap": "gap"
//!   },
//!   "connections": { "mirror1,out": "gap,in" },
//!   "ports": { "mirror1,in": "in", "gap,out": "out" }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};

use itertools::Itertools;
use log::debug;

use crate::circuit::{CircuitBuilder, PortRef, PORT_SEPARATOR};
use crate::model::{mode_port, Model, MODE_SEPARATOR};
use crate::params::ParamRecord;
use crate::{CircuitError, CircuitResult};

/// Models available to netlists, by component name.
pub type ModelLibrary = BTreeMap<String, Model>;

/// The mode assumed when none is given.
pub const DEFAULT_MODE: &str = "te";

/// Checks a mode list: at least one mode, each non-empty, distinct and free
/// of the port and mode separators.
fn validate_modes<S: AsRef<str>>(modes: &[S]) -> CircuitResult<Vec<String>> {
    let modes: Vec<String> = modes.iter().map(|mode| mode.as_ref().to_string()).collect();
    let malformed = |mode: &String| mode.is_empty() || mode.contains(PORT_SEPARATOR) || mode.contains(MODE_SEPARATOR);
    if modes.is_empty() || modes.iter().any(malformed) || modes.iter().duplicates().next().is_some() {
        return Err(CircuitError::InvalidModes { modes });
    }
    Ok(modes)
}

/// Every library model lifted to `modes`.
fn multimode_library(library: &ModelLibrary, modes: &[String]) -> CircuitResult<ModelLibrary> {
    library.iter().map(|(name, model)| Ok((name.clone(), model.multimode(modes)?))).collect()
}

/// One instance of a netlist: a component name and its parameter settings.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "InstanceRepr"))]
pub struct InstanceSpec {
    pub component: String,
    /// Overrides for the component's defaults. Keys the component does not
    /// declare are ignored.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "ParamRecord::is_empty"))]
    pub settings: ParamRecord,
}

impl InstanceSpec {
    pub fn new(component: impl Into<String>) -> Self {
        Self { component: component.into(), settings: ParamRecord::new() }
    }

    pub fn with_settings(mut self, settings: ParamRecord) -> Self {
        self.settings = settings;
        self
    }
}

/// An instance is written either as a bare component name or in full.
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum InstanceRepr {
    Name(String),
    Full {
        component: String,
        #[serde(default)]
        settings: ParamRecord,
    },
}

#[cfg(feature = "serde")]
impl From<InstanceRepr> for InstanceSpec {
    fn from(repr: InstanceRepr) -> Self {
        match repr {
            InstanceRepr::Name(component) => InstanceSpec::new(component),
            InstanceRepr::Full { component, settings } => InstanceSpec { component, settings },
        }
    }
}

/// A flat circuit description.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Netlist {
    pub instances: BTreeMap<String, InstanceSpec>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub connections: BTreeMap<String, String>,
    pub ports: BTreeMap<String, String>,
}

impl Netlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn instance(mut self, name: impl Into<String>, spec: InstanceSpec) -> Self {
        self.instances.insert(name.into(), spec);
        self
    }

    pub fn connect(mut self, a: impl Into<String>, b: impl Into<String>) -> Self {
        self.connections.insert(a.into(), b.into());
        self
    }

    pub fn port(mut self, port: impl Into<String>, name: impl Into<String>) -> Self {
        self.ports.insert(port.into(), name.into());
        self
    }

    /// Components used by this netlist, each once.
    pub fn components(&self) -> BTreeSet<&str> {
        self.instances.values().map(|spec| spec.component.as_str()).collect()
    }

    /// Builds the circuit with components taken from `library`.
    pub fn build(&self, library: &ModelLibrary) -> CircuitResult<Model> {
        self.build_with(|name| library.get(name))
    }

    /// Builds the circuit once per mode. With a single mode this is
    /// [`build`](Self::build); with several, every library model is lifted to
    /// `port@mode` ports and every connection and external port is repeated
    /// for each mode.
    pub fn build_with_modes<S: AsRef<str>>(&self, library: &ModelLibrary, modes: &[S]) -> CircuitResult<Model> {
        let modes = validate_modes(modes)?;
        if modes.len() == 1 {
            return self.build(library);
        }
        debug!("building netlist for modes {}", modes.join(", "));
        self.expand_modes(&modes).build(&multimode_library(library, &modes)?)
    }

    /// The same netlist with every connection and external port repeated per
    /// mode, each end suffixed with `@mode`.
    pub fn expand_modes(&self, modes: &[String]) -> Netlist {
        let expand = |table: &BTreeMap<String, String>| -> BTreeMap<String, String> {
            table
                .iter()
                .flat_map(|(from, to)| modes.iter().map(move |mode| (mode_port(from, mode), mode_port(to, mode))))
                .collect()
        };
        Netlist { instances: self.instances.clone(), connections: expand(&self.connections), ports: expand(&self.ports) }
    }

    /// Builds the circuit with components resolved by `resolve`. External
    /// ports are ordered by their port reference.
    pub fn build_with<'a, F>(&self, resolve: F) -> CircuitResult<Model>
    where
        F: Fn(&str) -> Option<&'a Model>,
    {
        let missing: Vec<String> =
            self.components().into_iter().filter(|&name| resolve(name).is_none()).map(String::from).collect();
        if !missing.is_empty() {
            return Err(CircuitError::MissingModels { names: missing });
        }

        let mut builder = CircuitBuilder::new();
        for (name, spec) in &self.instances {
            let component = resolve(spec.component.as_str()).ok_or_else(|| CircuitError::MissingModels {
                names: vec![spec.component.clone()],
            })?;
            let model =
                if spec.settings.is_empty() { component.clone() } else { component.with_defaults(&spec.settings) };
            builder = builder.instance_model(name.as_str(), model);
        }
        for (a, b) in &self.connections {
            builder = builder.connect(PortRef::parse(a)?, PortRef::parse(b)?);
        }
        for (port, name) in &self.ports {
            builder = builder.port(PortRef::parse(port)?, name.as_str());
        }
        builder.build()
    }
}

/// Named netlists that may instantiate each other.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct RecursiveNetlist {
    pub netlists: BTreeMap<String, Netlist>,
}

impl RecursiveNetlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn netlist(mut self, name: impl Into<String>, netlist: Netlist) -> Self {
        self.netlists.insert(name.into(), netlist);
        self
    }

    /// Netlists used by `netlist`. Library models shadow netlists of the
    /// same name.
    fn children<'a>(&'a self, netlist: &'a Netlist, library: &ModelLibrary) -> Vec<&'a str> {
        netlist
            .components()
            .into_iter()
            .filter(|c| !library.contains_key(*c) && self.netlists.contains_key(*c))
            .collect()
    }

    /// Netlist names ordered so that every netlist comes after the netlists
    /// it uses.
    pub fn dependency_order(&self, library: &ModelLibrary) -> CircuitResult<Vec<String>> {
        let missing: BTreeSet<&str> = self
            .netlists
            .values()
            .flat_map(Netlist::components)
            .filter(|c| !library.contains_key(*c) && !self.netlists.contains_key(*c))
            .collect();
        if !missing.is_empty() {
            return Err(CircuitError::MissingModels { names: missing.into_iter().map(String::from).collect() });
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut order = Vec::with_capacity(self.netlists.len());
        for root in self.netlists.keys() {
            // iterative depth-first search; the stack holds the current path
            let mut stack: Vec<(&str, Vec<&str>)> = Vec::new();
            if marks.contains_key(root.as_str()) {
                continue;
            }
            marks.insert(root.as_str(), Mark::Visiting);
            stack.push((root.as_str(), self.children(&self.netlists[root], library)));

            while let Some((node, pending)) = stack.last_mut() {
                let node = *node;
                match pending.pop() {
                    Some(child) => match marks.get(child).copied() {
                        Some(Mark::Done) => {}
                        Some(Mark::Visiting) => {
                            let start = stack.iter().position(|(n, _)| *n == child).unwrap_or(0);
                            let mut cycle: Vec<String> = stack[start..].iter().map(|(n, _)| n.to_string()).collect();
                            cycle.push(child.to_string());
                            return Err(CircuitError::DependencyCycle { cycle });
                        }
                        None => {
                            marks.insert(child, Mark::Visiting);
                            stack.push((child, self.children(&self.netlists[child], library)));
                        }
                    },
                    None => {
                        marks.insert(node, Mark::Done);
                        order.push(node.to_string());
                        stack.pop();
                    }
                }
            }
        }
        Ok(order)
    }

    /// The one netlist no other netlist uses.
    pub fn root(&self, library: &ModelLibrary) -> CircuitResult<String> {
        self.dependency_order(library)?;
        let used: BTreeSet<&str> =
            self.netlists.values().flat_map(|netlist| self.children(netlist, library)).collect();
        let roots: Vec<String> =
            self.netlists.keys().filter(|name| !used.contains(name.as_str())).cloned().collect();
        match roots.len() {
            0 => Err(CircuitError::NoRoot),
            1 => Ok(roots.into_iter().next().unwrap_or_default()),
            _ => Err(CircuitError::MultipleRoots { names: roots }),
        }
    }

    /// Builds every netlist and returns the root model together with all
    /// netlist models by name.
    pub fn build(&self, library: &ModelLibrary) -> CircuitResult<(Model, ModelLibrary)> {
        let root = self.root(library)?;
        let order = self.dependency_order(library)?;
        debug!("building netlists in order: {}", order.join(", "));

        let mut built = ModelLibrary::new();
        for name in order {
            let model = self.netlists[&name]
                .build_with(|component| library.get(component).or_else(|| built.get(component)))
                .map_err(|source| CircuitError::InNetlist { netlist: name.clone(), source: Box::new(source) })?;
            built.insert(name, model);
        }
        let model = built.get(&root).cloned().ok_or_else(|| CircuitError::MissingModels { names: vec![root] })?;
        Ok((model, built))
    }

    /// [`build`](Self::build) once per mode. Library models are lifted to
    /// `port@mode` ports; netlist models come out multimode already, so they
    /// are used as they are by the netlists above them.
    pub fn build_with_modes<S: AsRef<str>>(
        &self,
        library: &ModelLibrary,
        modes: &[S],
    ) -> CircuitResult<(Model, ModelLibrary)> {
        let modes = validate_modes(modes)?;
        if modes.len() == 1 {
            return self.build(library);
        }
        let expanded = RecursiveNetlist {
            netlists: self.netlists.iter().map(|(name, netlist)| (name.clone(), netlist.expand_modes(&modes))).collect(),
        };
        expanded.build(&multimode_library(library, &modes)?)
    }
}
