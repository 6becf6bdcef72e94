//! Folding connections away, one port pair at a time.
//!
//! Three operators build every composite model:
//!
//! - [`combine`] links port `a` of one model to port `b` of another and sums
//!   the resulting reflection series in closed form (the star product);
//! - [`interconnect`] links two ports of the same model, which covers
//!   self-loops and the second and later links between two instances;
//! - [`juxtapose`] places two unconnected models side by side.
//!
//! All three work on the response closures only. No entry is evaluated while
//! a circuit is reduced, and the operands are never modified.
//!
//! Entries that are structurally zero stay absent. A feedback term containing
//! a structural zero is dropped at build time, so sparse models stay sparse
//! and evaluation does not multiply by zeros.
//!
//! # References
//!
//! - R. Redheffer, "On the relation of transmission-line theory to scattering
//!   and transfer", J. Math. Phys. 41 (1962).
//! - K. Filipsson, "A new general computer algorithm for S-matrix calculation
//!   of interconnected multiports", 11th European Microwave Conference (1981).

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, trace};

use super::{PortRef, ReductionPlan};
use crate::model::{Model, PortKey, Response};
use crate::value::Value;
use crate::{CircuitError, CircuitResult};

type Entries<P> = HashMap<P, HashMap<P, Response>>;

/// Links port `a` of `left` with port `b` of `right`.
///
/// The result has the remaining ports of `left` followed by the remaining
/// ports of `right`, and the disjoint union of both default records. When
/// `left` and `right` are the same model this is [`interconnect`].
///
/// With `t = 1 / (1 - S_bb S_aa)`:
///
/// ```text
/// S'[m, m'] = A[m, m'] + A[m, a] S_bb t A[a, m']
/// S'[n, n'] = B[n, n'] + B[n, b] S_aa t B[b, n']
/// S'[m, n]  = A[m, a] t B[b, n]
/// S'[n, m]  = B[n, b] t A[a, m]
/// ```
pub fn combine<P: PortKey>(left: &Model<P>, a: &P, right: &Model<P>, b: &P) -> CircuitResult<Model<P>> {
    if std::ptr::eq(left, right) {
        return interconnect(left, a, b);
    }
    for (model, port) in [(left, a), (right, b)] {
        if !model.has_port(port) {
            return Err(CircuitError::UnknownModelPort { port: port.to_string() });
        }
    }
    if let Some(port) = left.ports().iter().find(|p| right.has_port(*p)) {
        return Err(CircuitError::DuplicatePort { port: port.to_string() });
    }

    let mut defaults = left.duplicate_defaults();
    defaults.merge_disjoint(right.duplicate_defaults())?;

    let m: Vec<&P> = left.ports().iter().filter(|p| *p != a).collect();
    let n: Vec<&P> = right.ports().iter().filter(|p| *p != b).collect();
    let saa = left.entry(a, a).cloned();
    let sbb = right.entry(b, b).cloned();
    let t = match (&saa, &sbb) {
        (Some(saa), Some(sbb)) => Some(loop_gain(saa, sbb)),
        _ => None,
    };

    let mut entries: Entries<P> = HashMap::new();
    let mut put = |output: &P, input: &P, response: Option<Response>| {
        if let Some(response) = response {
            entries.entry(output.clone()).or_default().insert(input.clone(), response);
        }
    };

    // each side keeps its own entries plus the round trip through the other side
    for (model, port, others, far) in [(left, a, &m, &sbb), (right, b, &n, &saa)] {
        for &output in others {
            for &input in others {
                let bounce = far.as_ref().and_then(|far| {
                    let out = model.entry(output, port)?;
                    let back = model.entry(port, input)?;
                    Some(chain([Some(out), Some(far), t.as_ref(), Some(back)]))
                });
                put(output, input, add(model.entry(output, input).cloned(), bounce));
            }
        }
    }

    // crossing from one side to the other
    for (from, from_port, to, to_port, inputs, outputs) in [(left, a, right, b, &m, &n), (right, b, left, a, &n, &m)] {
        for &output in outputs {
            for &input in inputs {
                let through = to.entry(output, to_port).zip(from.entry(from_port, input));
                put(output, input, through.map(|(exit, enter)| chain([Some(exit), t.as_ref(), Some(enter)])));
            }
        }
    }

    let ports: Vec<P> = m.into_iter().chain(n).cloned().collect();
    trace!("combine {a} <-> {b}: {} ports, {} entries", ports.len(), entries.values().map(HashMap::len).sum::<usize>());
    Ok(Model::from_parts(ports, entries, Arc::new(defaults)))
}

/// Links ports `k` and `l` of one model.
///
/// Uses the general two-port elimination, which also holds when `k` and `l`
/// are already coupled inside the model:
///
/// ```text
/// S'ij = Sij + [Skj Sil (1 - Slk) + Slj Sik (1 - Skl) + Skj Sll Sik + Slj Skk Sil]
///              / ((1 - Skl)(1 - Slk) - Skk Sll)
/// ```
pub fn interconnect<P: PortKey>(model: &Model<P>, k: &P, l: &P) -> CircuitResult<Model<P>> {
    if k == l {
        return Err(CircuitError::SelfConnection { port: k.to_string() });
    }
    for port in [k, l] {
        if !model.has_port(port) {
            return Err(CircuitError::UnknownModelPort { port: port.to_string() });
        }
    }

    let s = |output: &P, input: &P| model.entry(output, input);
    let (skk, sll, skl, slk) = (s(k, k), s(l, l), s(k, l), s(l, k));
    let not_skl = complement(skl);
    let not_slk = complement(slk);
    let denominator = {
        let (skk, sll) = (skk.cloned(), sll.cloned());
        let (not_skl, not_slk) = (not_skl.clone(), not_slk.clone());
        Response::new(move |params| {
            let open = not_skl.call(params)?.try_mul(&not_slk.call(params)?)?;
            match (&skk, &sll) {
                (Some(skk), Some(sll)) => open.try_sub(&skk.call(params)?.try_mul(&sll.call(params)?)?),
                _ => Ok(open),
            }
        })
    };

    let remaining: Vec<P> = model.ports().iter().filter(|p| *p != k && *p != l).cloned().collect();
    let mut entries: Entries<P> = HashMap::new();
    for i in &remaining {
        for j in &remaining {
            let terms: Vec<Response> = [
                [s(k, j), s(i, l), Some(&not_slk)],
                [s(l, j), s(i, k), Some(&not_skl)],
                [s(k, j), sll, s(i, k)],
                [s(l, j), skk, s(i, l)],
            ]
            .into_iter()
            .filter_map(|factors| factors.iter().all(Option::is_some).then(|| chain(factors)))
            .collect();

            let direct = s(i, j).cloned();
            let response = if terms.is_empty() { direct } else { Some(feedback(direct, terms, denominator.clone())) };
            if let Some(response) = response {
                entries.entry(i.clone()).or_default().insert(j.clone(), response);
            }
        }
    }

    trace!("interconnect {k} <-> {l}: {} ports left", remaining.len());
    Ok(Model::from_parts(remaining, entries, Arc::clone(model.shared_defaults())))
}

/// Places two models side by side without connecting them.
pub fn juxtapose<P: PortKey>(left: &Model<P>, right: &Model<P>) -> CircuitResult<Model<P>> {
    if let Some(port) = left.ports().iter().find(|p| right.has_port(*p)) {
        return Err(CircuitError::DuplicatePort { port: port.to_string() });
    }
    let mut defaults = left.duplicate_defaults();
    defaults.merge_disjoint(right.duplicate_defaults())?;

    let mut entries: Entries<P> = HashMap::new();
    for (output, input, response) in left.entries().chain(right.entries()) {
        entries.entry(output.clone()).or_default().insert(input.clone(), response.clone());
    }
    let ports: Vec<P> = left.ports().iter().chain(right.ports()).cloned().collect();
    trace!("juxtapose: {} ports", ports.len());
    Ok(Model::from_parts(ports, entries, Arc::new(defaults)))
}

/// Product of the present factors. Absent factors count as one.
fn chain<'a, I>(factors: I) -> Response
where
    I: IntoIterator<Item = Option<&'a Response>>,
{
    let factors: Vec<Response> = factors.into_iter().flatten().cloned().collect();
    Response::new(move |params| {
        let mut product = Value::one();
        for factor in &factors {
            product = product.try_mul(&factor.call(params)?)?;
        }
        Ok(product)
    })
}

/// `direct + bounce`, where either may be absent.
fn add(direct: Option<Response>, bounce: Option<Response>) -> Option<Response> {
    match (direct, bounce) {
        (Some(direct), Some(bounce)) => {
            Some(Response::new(move |params| direct.call(params)?.try_add(&bounce.call(params)?)))
        }
        (direct, None) => direct,
        (None, bounce) => bounce,
    }
}

/// `1 / (1 - sbb * saa)`
fn loop_gain(saa: &Response, sbb: &Response) -> Response {
    let (saa, sbb) = (saa.clone(), sbb.clone());
    Response::new(move |params| Ok(sbb.call(params)?.try_mul(&saa.call(params)?)?.one_minus().recip()))
}

/// `1 - s`, or one when `s` is a structural zero.
fn complement(s: Option<&Response>) -> Response {
    match s.cloned() {
        Some(s) => Response::new(move |params| Ok(s.call(params)?.one_minus())),
        None => Response::constant(1.0),
    }
}

fn feedback(direct: Option<Response>, terms: Vec<Response>, denominator: Response) -> Response {
    Response::new(move |params| {
        let mut numerator = Value::zero();
        for term in &terms {
            numerator = numerator.try_add(&term.call(params)?)?;
        }
        let correction = numerator.try_div(&denominator.call(params)?)?;
        match &direct {
            Some(direct) => direct.call(params)?.try_add(&correction),
            None => Ok(correction),
        }
    })
}

/// A working model and the instances folded into it.
struct Cluster {
    name: String,
    model: Model<PortRef>,
}

/// Folds every connection of `plan`, in plan order.
pub(crate) fn reduce(plan: &ReductionPlan) -> CircuitResult<Model> {
    let mut clusters: Vec<Option<Cluster>> = Vec::new();
    let mut owner: HashMap<&str, usize> = HashMap::new();
    for (index, (name, model)) in plan.instances().enumerate() {
        clusters.push(Some(Cluster { name: name.to_string(), model: model.scoped(name) }));
        owner.insert(name, index);
    }

    for connection in plan.connections() {
        let (ia, ib) = (cluster_of(&owner, &connection.a)?, cluster_of(&owner, &connection.b)?);
        let orphaned = || CircuitError::UnknownInstance {
            instance: connection.a.instance.clone(),
            reference: connection.to_string(),
        };
        if ia == ib {
            let cluster = clusters[ia].as_mut().ok_or_else(orphaned)?;
            cluster.model = interconnect(&cluster.model, &connection.a, &connection.b)?;
            debug!("fold {connection} inside {}: {} ports left", cluster.name, cluster.model.num_ports());
            continue;
        }

        let (left, right) = match (clusters[ia].take(), clusters[ib].take()) {
            (Some(left), Some(right)) => (left, right),
            _ => return Err(orphaned()),
        };
        let model = combine(&left.model, &connection.a, &right.model, &connection.b)?;
        let name = format!("{}+{}", left.name, right.name);
        debug!("fold {connection}: {} and {} into {name}, {} ports left", left.name, right.name, model.num_ports());
        owner.values_mut().filter(|index| **index == ib).for_each(|index| *index = ia);
        clusters[ia] = Some(Cluster { name, model });
    }

    let mut remaining = clusters.into_iter().flatten();
    let first = remaining.next().ok_or(CircuitError::EmptyCircuit)?;
    let mut joined = first.model;
    for cluster in remaining {
        debug!("join disconnected {}", cluster.name);
        joined = juxtapose(&joined, &cluster.model)?;
    }
    joined.rename_ports(plan.external_ports())
}

fn cluster_of(owner: &HashMap<&str, usize>, port: &PortRef) -> CircuitResult<usize> {
    owner.get(port.instance.as_str()).copied().ok_or_else(|| CircuitError::UnknownInstance {
        instance: port.instance.clone(),
        reference: port.to_string(),
    })
}
