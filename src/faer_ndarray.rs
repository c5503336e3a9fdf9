use faer::diag::DiagRef;
use faer::linalg::solvers::{self, Solve};
pub use faer::linalg::solvers::{Ldlt as FaerLdlt, Llt as FaerLlt};
use faer::{MatMut, MatRef, Side};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use std::marker::PhantomData;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("Factorization failed")]
    FactorizationFailed,
    #[error("Self-adjoint eigendecomposition failed: {0:?}")]
    SelfAdjointEigen(solvers::EvdError),
    #[error("Cholesky factorization failed: {0:?}")]
    Cholesky(solvers::LltError),
    #[error("LDLT factorization failed: {0:?}")]
    Ldlt(solvers::LdltError),
}

pub enum FaerSymmetricFactor {
    Llt(FaerLlt<f64>),
    Ldlt(FaerLdlt<f64>),
}

impl FaerSymmetricFactor {
    pub fn solve_vec(&self, rhs: &Array1<f64>) -> Array1<f64> {
        let mut rhs = rhs.to_owned();
        let mut rhs_view = array1_to_col_mat_mut(&mut rhs);
        match self {
            FaerSymmetricFactor::Llt(f) => f.solve_in_place(rhs_view.as_mut()),
            FaerSymmetricFactor::Ldlt(f) => f.solve_in_place(rhs_view.as_mut()),
        }
        rhs
    }

    pub fn solve_mat(&self, rhs: &Array2<f64>) -> Array2<f64> {
        let mut rhs = rhs.to_owned();
        let mut rhs_view = array2_to_mat_mut(&mut rhs);
        match self {
            FaerSymmetricFactor::Llt(f) => f.solve_in_place(rhs_view.as_mut()),
            FaerSymmetricFactor::Ldlt(f) => f.solve_in_place(rhs_view.as_mut()),
        }
        rhs
    }

    /// Lower Cholesky factor, available only on the LLT path.
    pub fn lower_triangular(&self) -> Option<Array2<f64>> {
        match self {
            FaerSymmetricFactor::Llt(f) => Some(mat_to_array(f.L())),
            FaerSymmetricFactor::Ldlt(_) => None,
        }
    }
}

/// Factorize a symmetric system with an LLT first attempt and LDLT fallback.
#[inline]
pub fn factorize_symmetric_with_fallback(
    matrix: MatRef<'_, f64>,
    side: Side,
) -> Result<FaerSymmetricFactor, FaerLinalgError> {
    if let Ok(llt) = FaerLlt::new(matrix, side) {
        return Ok(FaerSymmetricFactor::Llt(llt));
    }
    let ldlt = FaerLdlt::new(matrix, side).map_err(FaerLinalgError::Ldlt)?;
    Ok(FaerSymmetricFactor::Ldlt(ldlt))
}

#[inline]
pub fn array2_to_mat_mut(array: &mut Array2<f64>) -> MatMut<'_, f64> {
    let (rows, cols) = array.dim();
    let strides = array.strides();
    let s0 = strides[0];
    let s1 = strides[1];
    // SAFETY: dimensions and strides come straight from the live ndarray.
    unsafe { MatMut::from_raw_parts_mut(array.as_mut_ptr(), rows, cols, s0, s1) }
}

#[inline]
pub fn array1_to_col_mat_mut(array: &mut Array1<f64>) -> MatMut<'_, f64> {
    let len = array.len();
    let stride = array.strides()[0];
    unsafe { MatMut::from_raw_parts_mut(array.as_mut_ptr(), len, 1, stride, 0) }
}

pub fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((mat.nrows(), mat.ncols()));
    for j in 0..mat.ncols() {
        for i in 0..mat.nrows() {
            out[[i, j]] = mat[(i, j)];
        }
    }
    out
}

fn diag_to_array(diag: DiagRef<'_, f64>) -> Array1<f64> {
    let mat = diag.column_vector().as_mat();
    let mut out = Array1::<f64>::zeros(mat.nrows());
    for i in 0..mat.nrows() {
        out[i] = mat[(i, 0)];
    }
    out
}

pub struct FaerArrayView<'a> {
    ptr: *const f64,
    rows: usize,
    cols: usize,
    row_stride: isize,
    col_stride: isize,
    owned: Option<Array2<f64>>,
    _marker: PhantomData<&'a f64>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let (rows, cols) = array.dim();
        let strides = array.strides();
        // Negative or zero strides can reverse memory traversal; materialize a
        // compact owned copy for those layouts.
        if strides[0] <= 0 || strides[1] <= 0 {
            let owned = array.to_owned();
            let owned_strides = owned.strides();
            return Self {
                ptr: owned.as_ptr(),
                rows,
                cols,
                row_stride: owned_strides[0],
                col_stride: owned_strides[1],
                owned: Some(owned),
                _marker: PhantomData,
            };
        }

        Self {
            ptr: array.as_ptr(),
            rows,
            cols,
            row_stride: strides[0],
            col_stride: strides[1],
            owned: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        let (ptr, rows, cols, row_stride, col_stride) = if let Some(owned) = &self.owned {
            let strides = owned.strides();
            (
                owned.as_ptr(),
                owned.nrows(),
                owned.ncols(),
                strides[0],
                strides[1],
            )
        } else {
            (
                self.ptr,
                self.rows,
                self.cols,
                self.row_stride,
                self.col_stride,
            )
        };
        // SAFETY: pointer/shape/strides either come from a live ndarray view
        // with positive strides, or from the owned compact copy held inside
        // this wrapper for the lifetime of the returned view.
        unsafe { MatRef::from_raw_parts(ptr, rows, cols, row_stride, col_stride) }
    }
}

pub struct FaerCholeskyFactor {
    factor: solvers::Llt<f64>,
}

impl FaerCholeskyFactor {
    pub fn solve_vec(&self, rhs: &Array1<f64>) -> Array1<f64> {
        let mut rhs = rhs.to_owned();
        let mut rhs_view = array1_to_col_mat_mut(&mut rhs);
        self.factor.solve_in_place(rhs_view.as_mut());
        rhs
    }

    pub fn solve_mat(&self, rhs: &Array2<f64>) -> Array2<f64> {
        let mut rhs = rhs.to_owned();
        let mut rhs_view = array2_to_mat_mut(&mut rhs);
        self.factor.solve_in_place(rhs_view.as_mut());
        rhs
    }

    pub fn diag(&self) -> Array1<f64> {
        diag_to_array(self.factor.L().diagonal())
    }

    pub fn lower_triangular(&self) -> Array2<f64> {
        mat_to_array(self.factor.L())
    }
}

pub trait FaerCholesky {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerCholesky for ArrayBase<S, Ix2> {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError> {
        let faer_view = FaerArrayView::new(self);
        let factor = faer_view
            .as_ref()
            .llt(side)
            .map_err(FaerLinalgError::Cholesky)?;
        Ok(FaerCholeskyFactor { factor })
    }
}

pub trait FaerEigh {
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerEigh for ArrayBase<S, Ix2> {
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError> {
        let faer_view = FaerArrayView::new(self);
        let eigen = faer_view
            .as_ref()
            .self_adjoint_eigen(side)
            .map_err(FaerLinalgError::SelfAdjointEigen)?;
        let values = diag_to_array(eigen.S());
        let vectors = mat_to_array(eigen.U());
        Ok((values, vectors))
    }
}

/// Forward substitution `L X = B` for lower-triangular `L` with a matrix
/// right-hand side.
pub fn solve_lower_triangular<S: Data<Elem = f64>>(
    l: &Array2<f64>,
    b: &ArrayBase<S, Ix2>,
) -> Array2<f64> {
    let n = l.nrows();
    debug_assert_eq!(l.ncols(), n, "L must be square");
    debug_assert_eq!(b.nrows(), n, "rhs rows must match L");
    let k = b.ncols();
    let mut x = b.to_owned();
    for col in 0..k {
        for i in 0..n {
            let mut acc = x[[i, col]];
            for j in 0..i {
                acc -= l[[i, j]] * x[[j, col]];
            }
            x[[i, col]] = acc / l[[i, i]];
        }
    }
    x
}

/// Symmetric positive-semidefinite square root `S` with `S Sᵀ = A`, via
/// eigendecomposition. Small negative eigenvalues from roundoff are clamped
/// to zero, so the result is valid for nearly-singular covariance matrices
/// that Cholesky rejects.
pub fn symmetric_sqrt(a: &Array2<f64>) -> Result<Array2<f64>, FaerLinalgError> {
    let (values, vectors) = a.eigh(Side::Lower)?;
    let n = values.len();
    let mut scaled = vectors.clone();
    for j in 0..n {
        let root = values[j].max(0.0).sqrt();
        for i in 0..n {
            scaled[[i, j]] *= root;
        }
    }
    Ok(scaled.dot(&vectors.t()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn cholesky_solves_spd_system() {
        let a = array![[4.0, 1.0, 0.2], [1.0, 3.0, 0.5], [0.2, 0.5, 2.0]];
        let b = array![1.0, -2.0, 0.5];
        let factor = a.cholesky(Side::Lower).expect("SPD input should factor");
        let x = factor.solve_vec(&b);
        let residual = &a.dot(&x) - &b;
        assert!(residual.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn symmetric_fallback_handles_indefinite_input() {
        let a = array![[1.0, 2.0], [2.0, 1.0]]; // eigenvalues 3, -1
        let view = FaerArrayView::new(&a);
        let factor = factorize_symmetric_with_fallback(view.as_ref(), Side::Lower)
            .expect("LDLT should handle the indefinite case");
        assert!(factor.lower_triangular().is_none());
        let b = array![1.0, 0.0];
        let x = factor.solve_vec(&b);
        let residual = &a.dot(&x) - &b;
        assert!(residual.iter().all(|v| v.abs() < 1e-10));
    }

    #[test]
    fn lower_triangular_solve_matches_direct_product() {
        let l = array![[2.0, 0.0, 0.0], [0.5, 1.5, 0.0], [0.1, -0.3, 1.0]];
        let x_true = array![[1.0, 2.0], [-1.0, 0.5], [3.0, -2.0]];
        let b = l.dot(&x_true);
        let x = solve_lower_triangular(&l, &b);
        let err = (&x - &x_true).iter().fold(0.0f64, |m, v| m.max(v.abs()));
        assert!(err < 1e-12);
    }

    #[test]
    fn symmetric_sqrt_recovers_matrix() {
        let a = array![[2.0, 0.3, 0.0], [0.3, 1.0, 0.1], [0.0, 0.1, 0.5]];
        let s = symmetric_sqrt(&a).expect("eigh should succeed");
        let rec = s.dot(&s.t());
        let err = (&rec - &a).iter().fold(0.0f64, |m, v| m.max(v.abs()));
        assert!(err < 1e-10);
    }

    #[test]
    fn symmetric_sqrt_clamps_singular_input() {
        // Rank-1 PSD matrix; Cholesky of the exact matrix is borderline,
        // the eigen square root must still reproduce it.
        let v = array![[1.0], [2.0], [3.0]];
        let a = v.dot(&v.t());
        let s = symmetric_sqrt(&a).expect("eigh should succeed");
        let rec = s.dot(&s.t());
        let err = (&rec - &a).iter().fold(0.0f64, |m, v| m.max(v.abs()));
        assert!(err < 1e-8);
    }
}
