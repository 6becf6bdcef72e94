//! Structural checks run before a circuit is folded.
//!
//! The checks run in a fixed order so that the first error reported is the
//! most fundamental one:
//!
//! 1. instance names and default records are well formed;
//! 2. every port reference resolves to an instance and one of its ports;
//! 3. no port is used twice across connections and external ports;
//! 4. every port of every instance is connected or exposed;
//! 5. external names are unique and there is at least one.

use std::collections::{HashMap, HashSet};

use itertools::Itertools;

use super::{Connection, PortRef, PORT_SEPARATOR};
use crate::model::Model;
use crate::{CircuitError, CircuitResult};

pub fn validate(
    instances: &[(String, Model)],
    connections: &[Connection],
    ports: &[(PortRef, String)],
) -> CircuitResult<()> {
    if instances.is_empty() {
        return Err(CircuitError::EmptyCircuit);
    }
    check_instances(instances)?;

    let lookup: HashMap<&str, &Model> = instances.iter().map(|(name, model)| (name.as_str(), model)).collect();
    let references: Vec<&PortRef> =
        connections.iter().flat_map(|c| [&c.a, &c.b]).chain(ports.iter().map(|(port, _)| port)).collect();

    for reference in &references {
        check_reference(&lookup, reference)?;
    }

    if let Some(port) = references.iter().duplicates().next() {
        return Err(CircuitError::DoubleUse { port: port.to_string() });
    }

    let used: HashSet<&PortRef> = references.iter().copied().collect();
    let dangling: Vec<String> = instances
        .iter()
        .flat_map(|(name, model)| model.ports().iter().map(move |port| PortRef::new(name.as_str(), port.as_str())))
        .filter(|port| !used.contains(port))
        .map(|port| port.to_string())
        .collect();
    if !dangling.is_empty() {
        return Err(CircuitError::Unterminated { ports: dangling });
    }

    if let Some(name) = ports.iter().map(|(_, name)| name).duplicates().next() {
        return Err(CircuitError::DuplicateExternalPort { name: name.clone() });
    }
    if ports.is_empty() {
        return Err(CircuitError::NoExternalPorts);
    }
    Ok(())
}

fn check_instances(instances: &[(String, Model)]) -> CircuitResult<()> {
    let mut seen = HashSet::with_capacity(instances.len());
    for (name, model) in instances {
        if name.is_empty() || name.contains(PORT_SEPARATOR) {
            return Err(CircuitError::InvalidInstanceName { name: name.clone() });
        }
        if !seen.insert(name.as_str()) {
            return Err(CircuitError::DuplicateInstance { name: name.clone() });
        }
        model
            .defaults()
            .validate()
            .map_err(|source| CircuitError::MalformedParams { instance: name.clone(), source })?;
    }
    Ok(())
}

fn check_reference(lookup: &HashMap<&str, &Model>, reference: &PortRef) -> CircuitResult<()> {
    let model = lookup.get(reference.instance.as_str()).ok_or_else(|| CircuitError::UnknownInstance {
        instance: reference.instance.clone(),
        reference: reference.to_string(),
    })?;
    if model.has_port(reference.port.as_str()) {
        Ok(())
    } else {
        Err(CircuitError::UnknownPort {
            instance: reference.instance.clone(),
            port: reference.port.clone(),
            available: model.ports().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelBuilder, Response};
    use crate::params::ParamRecord;

    fn two_port() -> Model {
        ModelBuilder::new(["in", "out"]).build(|i, j| (i != j).then(|| Response::constant(1.0))).unwrap()
    }

    fn port(text: &str) -> PortRef {
        PortRef::parse(text).unwrap()
    }

    fn link(a: &str, b: &str) -> Connection {
        Connection::new(port(a), port(b))
    }

    #[test]
    fn test_valid_chain() {
        let instances = vec![("a".to_string(), two_port()), ("b".to_string(), two_port())];
        let connections = vec![link("a,out", "b,in")];
        let ports = vec![(port("a,in"), "in".to_string()), (port("b,out"), "out".to_string())];

        assert!(validate(&instances, &connections, &ports).is_ok());
    }

    #[test]
    fn test_unterminated_lists_every_dangling_port() {
        let instances = vec![("a".to_string(), two_port()), ("b".to_string(), two_port())];
        let ports = vec![(port("a,in"), "in".to_string())];

        let err = validate(&instances, &[], &ports).unwrap_err();
        assert_eq!(err, CircuitError::Unterminated { ports: vec!["a,out".into(), "b,in".into(), "b,out".into()] });
    }

    #[test]
    fn test_references_checked_before_double_use() {
        let instances = vec![("a".to_string(), two_port())];
        let connections = vec![link("a,in", "a,in"), link("a,out", "c,in")];

        let err = validate(&instances, &connections, &[]).unwrap_err();
        assert!(matches!(err, CircuitError::UnknownInstance { ref instance, .. } if instance == "c"));
    }

    #[test]
    fn test_unknown_port_lists_available() {
        let instances = vec![("a".to_string(), two_port())];
        let ports = vec![(port("a,through"), "x".to_string())];

        match validate(&instances, &[], &ports).unwrap_err() {
            CircuitError::UnknownPort { available, .. } => assert_eq!(available, vec!["in", "out"]),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_malformed_defaults() {
        let bad: Model = Model::new(["p"], ParamRecord::new().with("x", vec![1.0, 2.0]).with("y", vec![1.0, 2.0, 3.0])).unwrap();
        let instances = vec![("bad".to_string(), bad)];
        let ports = vec![(port("bad,p"), "p".to_string())];

        let err = validate(&instances, &[], &ports).unwrap_err();
        assert!(matches!(err, CircuitError::MalformedParams { ref instance, .. } if instance == "bad"));
    }
}
