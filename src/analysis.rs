//! Dense S-matrix views of a model.
//!
//! [`Model::s_matrix`] evaluates every port pair at one parameter record and
//! lays the result out as one `nalgebra` matrix per sweep point. The dense form
//! is what network checks (reciprocity, passivity, losslessness) and the joint
//! elimination reference in [`SMatrix::connect`] work on.
//!
//! Singular systems are not errors here either: a sweep point whose
//! connection system cannot be solved is filled with NaN.

use std::borrow::Borrow;

use nalgebra::DMatrix;
use ndarray::{ArrayD, IxDyn};
use num_complex::Complex64;

use crate::model::{Model, PortKey};
use crate::params::ParamRecord;
use crate::value::{broadcast_shape, Value};
use crate::{EvalError, EvalResult};

/// Scattering matrices of one model over a parameter sweep.
///
/// `matrices[k]` belongs to the `k`-th point of `shape` in row-major order.
/// Rows are outputs and columns are inputs, both in port order.
#[derive(Debug, Clone, PartialEq)]
pub struct SMatrix {
    ports: Vec<String>,
    shape: Vec<usize>,
    matrices: Vec<DMatrix<Complex64>>,
}

impl<P: PortKey> Model<P> {
    /// Evaluates every entry at `params` into dense matrices.
    pub fn s_matrix(&self, params: &ParamRecord) -> EvalResult<SMatrix> {
        let n = self.num_ports();
        let mut values = Vec::new();
        let mut shape = Vec::new();
        for (i, output) in self.ports().iter().enumerate() {
            for (j, input) in self.ports().iter().enumerate() {
                if let Some(response) = self.entry(output, input) {
                    let value = response.call(params)?;
                    shape = broadcast_shape(&shape, value.shape())
                        .ok_or_else(|| EvalError::ShapeMismatch { lhs: shape.clone(), rhs: value.shape().to_vec() })?;
                    values.push((i, j, value));
                }
            }
        }

        let points = shape.iter().product();
        let mut matrices = vec![DMatrix::<Complex64>::zeros(n, n); points];
        for (i, j, value) in values {
            for (matrix, z) in matrices.iter_mut().zip(value.broadcast_to(&shape)?.iter()) {
                matrix[(i, j)] = *z;
            }
        }
        Ok(SMatrix { ports: self.ports().iter().map(ToString::to_string).collect(), shape, matrices })
    }
}

impl SMatrix {
    pub fn new(ports: Vec<String>, shape: Vec<usize>, matrices: Vec<DMatrix<Complex64>>) -> Self {
        Self { ports, shape, matrices }
    }

    pub fn ports(&self) -> &[String] {
        &self.ports
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of sweep points.
    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    pub fn matrix(&self, point: usize) -> Option<&DMatrix<Complex64>> {
        self.matrices.get(point)
    }

    pub fn matrices(&self) -> &[DMatrix<Complex64>] {
        &self.matrices
    }

    pub fn index_of<Q>(&self, port: &Q) -> Option<usize>
    where
        String: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        self.ports.iter().position(|p| <String as Borrow<Q>>::borrow(p) == port)
    }

    fn require(&self, port: &str) -> EvalResult<usize> {
        self.index_of(port).ok_or_else(|| EvalError::UnknownPort { port: port.to_string() })
    }

    /// The entry from `input` to `output` over the whole sweep.
    pub fn entry(&self, output: &str, input: &str) -> EvalResult<Value> {
        let (i, j) = (self.require(output)?, self.require(input)?);
        let data = self.matrices.iter().map(|m| m[(i, j)]).collect();
        ArrayD::from_shape_vec(IxDyn(&self.shape), data)
            .map(Value::from_array)
            .map_err(|_| EvalError::ShapeMismatch { lhs: self.shape.clone(), rhs: vec![self.matrices.len()] })
    }

    /// `S == S^T` at every point, within `tol` (Frobenius norm).
    pub fn is_reciprocal(&self, tol: f64) -> bool {
        self.matrices.iter().all(|m| (m - m.transpose()).norm() <= tol)
    }

    /// No point amplifies: the largest singular value is at most `1 + tol`.
    pub fn is_passive(&self, tol: f64) -> bool {
        self.matrices.iter().all(|m| m.singular_values().iter().fold(0.0_f64, |acc, &s| acc.max(s)) <= 1.0 + tol)
    }

    /// Power is conserved: `S^H S == I` at every point, within `tol`.
    pub fn is_lossless(&self, tol: f64) -> bool {
        self.matrices.iter().all(|m| {
            let n = m.ncols();
            (m.adjoint() * m - DMatrix::<Complex64>::identity(n, n)).norm() <= tol
        })
    }

    /// Total power leaving all ports for unit power into `input`.
    pub fn power_out(&self, input: &str) -> EvalResult<ArrayD<f64>> {
        let j = self.require(input)?;
        let data = self.matrices.iter().map(|m| m.column(j).iter().map(Complex64::norm_sqr).sum::<f64>()).collect();
        ArrayD::from_shape_vec(IxDyn(&self.shape), data)
            .map_err(|_| EvalError::ShapeMismatch { lhs: self.shape.clone(), rhs: vec![self.matrices.len()] })
    }

    /// Expands the sweep to `shape`.
    pub fn broadcast_to(&self, shape: &[usize]) -> EvalResult<SMatrix> {
        let mismatch = || EvalError::ShapeMismatch { lhs: self.shape.clone(), rhs: shape.to_vec() };
        let index = ArrayD::from_shape_vec(IxDyn(&self.shape), (0..self.matrices.len()).collect())
            .map_err(|_| mismatch())?;
        let view = index.broadcast(shape).ok_or_else(mismatch)?;
        let matrices = view.iter().map(|&k| self.matrices[k].clone()).collect();
        Ok(SMatrix { ports: self.ports.clone(), shape: shape.to_vec(), matrices })
    }

    /// Block-diagonal union of unconnected parts, broadcasting their sweeps.
    pub fn block_diagonal(parts: &[SMatrix]) -> EvalResult<SMatrix> {
        let mut shape = Vec::new();
        for part in parts {
            shape = broadcast_shape(&shape, &part.shape)
                .ok_or_else(|| EvalError::ShapeMismatch { lhs: shape.clone(), rhs: part.shape.clone() })?;
        }
        let parts = parts.iter().map(|part| part.broadcast_to(&shape)).collect::<EvalResult<Vec<_>>>()?;
        let n: usize = parts.iter().map(|part| part.ports.len()).sum();
        let points = shape.iter().product();

        let mut matrices = vec![DMatrix::<Complex64>::zeros(n, n); points];
        let mut offset = 0;
        for part in &parts {
            let size = part.ports.len();
            for (target, source) in matrices.iter_mut().zip(&part.matrices) {
                target.view_mut((offset, offset), (size, size)).copy_from(source);
            }
            offset += size;
        }
        let ports = parts.iter().flat_map(|part| part.ports.iter().cloned()).collect();
        Ok(SMatrix { ports, shape, matrices })
    }

    /// Connects every pair at once:
    /// `S_EE + S_EI (Γ - S_II)^-1 S_IE`, where Γ swaps the two ports of each
    /// pair. The remaining ports keep their order. Each port may appear in
    /// at most one pair, and only once there.
    pub fn connect(&self, pairs: &[(String, String)]) -> EvalResult<SMatrix> {
        let mut internal = Vec::with_capacity(2 * pairs.len());
        for port in pairs.iter().flat_map(|(a, b)| [a, b]) {
            let index = self.require(port)?;
            if internal.contains(&index) {
                return Err(EvalError::RepeatedPort { port: port.clone() });
            }
            internal.push(index);
        }
        let external: Vec<usize> = (0..self.ports.len()).filter(|k| !internal.contains(k)).collect();
        let (ni, ne) = (internal.len(), external.len());

        let mut gamma = DMatrix::<Complex64>::zeros(ni, ni);
        for pair in 0..pairs.len() {
            gamma[(2 * pair, 2 * pair + 1)] = Complex64::new(1.0, 0.0);
            gamma[(2 * pair + 1, 2 * pair)] = Complex64::new(1.0, 0.0);
        }

        let pick = |m: &DMatrix<Complex64>, rows: &[usize], cols: &[usize]| {
            DMatrix::from_fn(rows.len(), cols.len(), |r, c| m[(rows[r], cols[c])])
        };
        let matrices = self
            .matrices
            .iter()
            .map(|m| {
                let see = pick(m, &external, &external);
                let sei = pick(m, &external, &internal);
                let sie = pick(m, &internal, &external);
                let sii = pick(m, &internal, &internal);
                match (&gamma - sii).lu().solve(&sie) {
                    Some(x) => see + sei * x,
                    None => DMatrix::from_element(ne, ne, Complex64::new(f64::NAN, f64::NAN)),
                }
            })
            .collect();

        let ports = external.iter().map(|&k| self.ports[k].clone()).collect();
        Ok(SMatrix { ports, shape: self.shape.clone(), matrices })
    }

    /// Keeps the ports named in `mapping`, renamed and in mapping order.
    pub fn select(&self, mapping: &[(String, String)]) -> EvalResult<SMatrix> {
        let rows = mapping.iter().map(|(from, _)| self.require(from)).collect::<EvalResult<Vec<_>>>()?;
        let matrices = self
            .matrices
            .iter()
            .map(|m| DMatrix::from_fn(rows.len(), rows.len(), |r, c| m[(rows[r], rows[c])]))
            .collect();
        let ports = mapping.iter().map(|(_, to)| to.clone()).collect();
        Ok(SMatrix { ports, shape: self.shape.clone(), matrices })
    }
}
