//! Operation dispatch.
//!
//! Each operation asks [`backend_for`] which backend to run on, then calls
//! either the native kernels or the generic [`Array`] methods. Both paths
//! produce the same values; the accelerated path tags its output
//! [`Layout::Native`] so downstream operations stay on it.

use super::{backend_for, Backend};
use crate::array::{Array, ArrayMeta, Layout};
use crate::backend::AccelGate;
use crate::error::{Error, Result};

fn matrix_dims(a: &Array) -> Result<(usize, usize)> {
    match a.shape() {
        &[rows, cols] => Ok((rows, cols)),
        other => Err(Error::ShapeMismatch {
            expected: vec![0, 0],
            got: other.to_vec(),
        }),
    }
}

fn add_bias(y: &mut Array, b: &Array) -> Result<()> {
    let (_, cols) = matrix_dims(y)?;
    if b.shape() != [cols] {
        return Err(Error::ShapeMismatch {
            expected: vec![cols],
            got: b.shape().to_vec(),
        });
    }
    if y.device() != b.device() {
        return Err(Error::DeviceMismatch {
            expected: y.device(),
            got: b.device(),
        });
    }
    if cols == 0 {
        return Ok(());
    }
    for row in y.data_mut().chunks_mut(cols) {
        for (o, &bias) in row.iter_mut().zip(b.data().iter()) {
            *o += bias;
        }
    }
    Ok(())
}

/// Fully connected forward: `y = x @ w^T + b`.
///
/// * `x` - `[batch, in]`
/// * `w` - `[out, in]`
/// * `b` - `[out]`
pub fn linear(x: &Array, w: &Array, b: Option<&Array>, gate: Option<&AccelGate>) -> Result<Array> {
    let backend = backend_for(gate, &[x as &dyn ArrayMeta, w])?;
    tracing::trace!(op = "linear", %backend);

    let mut y = match backend {
        #[cfg(feature = "accel")]
        Backend::Accelerated => {
            let (m, k) = matrix_dims(x)?;
            let (n, _) = matrix_dims(w)?;
            let data = dptrain_kernels::cpu_matmul_nt(x.data(), w.data(), m, k, n)?;
            Array::from_parts(data, vec![m, n], x.device(), Layout::Native)
        }
        _ => x.matmul_nt(w)?,
    };
    if let Some(b) = b {
        add_bias(&mut y, b)?;
    }
    Ok(y)
}

/// Weight gradient of [`linear`]: `gw = gy^T @ x`, giving `[out, in]`.
pub fn linear_grad_w(gy: &Array, x: &Array, gate: Option<&AccelGate>) -> Result<Array> {
    let backend = backend_for(gate, &[gy as &dyn ArrayMeta, x])?;
    tracing::trace!(op = "linear_grad_w", %backend);

    match backend {
        #[cfg(feature = "accel")]
        Backend::Accelerated => {
            let (batch, out) = matrix_dims(gy)?;
            let (batch_x, inp) = matrix_dims(x)?;
            if batch != batch_x {
                return Err(Error::ShapeMismatch {
                    expected: vec![batch, inp],
                    got: x.shape().to_vec(),
                });
            }
            let gy_t = dptrain_kernels::cpu_transpose(gy.data(), batch, out)?;
            let data = dptrain_kernels::cpu_matmul(&gy_t, x.data(), out, batch, inp)?;
            Ok(Array::from_parts(data, vec![out, inp], gy.device(), Layout::Native))
        }
        _ => gy.matmul_tn(x),
    }
}

/// Bias gradient of [`linear`]: `gb = sum_rows(gy)`.
pub fn linear_grad_b(gy: &Array) -> Result<Array> {
    gy.sum_rows()
}

/// Gradient accumulation: `dst += src`.
///
/// Shapes and devices must agree.
pub fn acc_add(dst: &mut Array, src: &Array, gate: Option<&AccelGate>) -> Result<()> {
    let backend = backend_for(gate, &[&*dst as &dyn ArrayMeta, src])?;
    tracing::trace!(op = "acc_add", %backend);

    match backend {
        #[cfg(feature = "accel")]
        Backend::Accelerated => {
            if dst.shape() != src.shape() {
                return Err(Error::ShapeMismatch {
                    expected: dst.shape().to_vec(),
                    got: src.shape().to_vec(),
                });
            }
            dptrain_kernels::cpu_acc_sum(dst.data_mut(), src.data())?;
            Ok(())
        }
        _ => dst.add_assign(src),
    }
}
