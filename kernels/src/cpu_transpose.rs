use crate::{KernelElem, KernelError, Result};
use rayon::prelude::*;

/// Transposes a row-major `[rows, cols]` matrix into `[cols, rows]`.
///
/// Parallelized over the rows of the output.
pub fn cpu_transpose<T>(data: &[T], rows: usize, cols: usize) -> Result<Vec<T>>
where
    T: KernelElem,
{
    if data.len() != rows * cols {
        return Err(KernelError::ShapeMismatch {
            expected: vec![rows, cols],
            got: vec![data.len()],
        });
    }

    let mut out = vec![T::zero(); rows * cols];
    if rows == 0 {
        return Ok(out);
    }

    out.par_chunks_mut(rows)
        .enumerate()
        .for_each(|(col, out_row)| {
            for (r, out_elem) in out_row.iter_mut().enumerate() {
                *out_elem = data[r * cols + col];
            }
        });

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transpose_simple() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]; // 2x3

        let result = cpu_transpose(&data, 2, 3).unwrap();
        // [1, 4]
        // [2, 5]
        // [3, 6]
        assert_eq!(result, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_transpose_mismatch() {
        let data = vec![1.0, 2.0];
        assert!(cpu_transpose(&data, 2, 2).is_err());
    }
}
