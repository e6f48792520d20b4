use crate::{KernelElem, KernelError, Result};
use rayon::prelude::*;

fn check_len(len: usize, rows: usize, cols: usize) -> Result<()> {
    if len != rows * cols {
        return Err(KernelError::ShapeMismatch {
            expected: vec![rows, cols],
            got: vec![len],
        });
    }
    Ok(())
}

/// Computes `lhs @ rhs^T` for row-major `lhs: [m, k]` and `rhs: [n, k]`.
///
/// Both operands are walked row by row, so no transpose is needed. This is the
/// layout a fully connected layer stores its weight in (`[out, in]`), which
/// makes it the hot path of the accelerated `linear` forward.
pub fn cpu_matmul_nt<T>(lhs: &[T], rhs: &[T], m: usize, k: usize, n: usize) -> Result<Vec<T>>
where
    T: KernelElem,
{
    check_len(lhs.len(), m, k)?;
    check_len(rhs.len(), n, k)?;

    let mut out = vec![T::zero(); m * n];
    if n == 0 {
        return Ok(out);
    }

    // Parallelize over the rows of the output.
    out.par_chunks_mut(n).enumerate().for_each(|(row, out_row)| {
        let a = &lhs[row * k..(row + 1) * k];
        for (col, out_elem) in out_row.iter_mut().enumerate() {
            let b = &rhs[col * k..(col + 1) * k];
            let mut sum = T::zero();
            for (&x, &y) in a.iter().zip(b.iter()) {
                sum += x * y;
            }
            *out_elem = sum;
        }
    });

    Ok(out)
}

/// Computes `lhs @ rhs` for row-major `lhs: [m, k]` and `rhs: [k, n]`.
///
/// `rhs` is transposed once up front so that the inner loop reads both
/// operands sequentially.
pub fn cpu_matmul<T>(lhs: &[T], rhs: &[T], m: usize, k: usize, n: usize) -> Result<Vec<T>>
where
    T: KernelElem,
{
    check_len(rhs.len(), k, n)?;
    let rhs_t = crate::cpu_transpose(rhs, k, n)?;
    cpu_matmul_nt(lhs, &rhs_t, m, k, n)
}
