use crate::{KernelElem, KernelError, Result};
use rayon::prelude::*;

/// Accumulates `src` into `dst` element-wise (`dst += src`).
///
/// Used for summing per-replica gradients into the main replica.
pub fn cpu_acc_sum<T>(dst: &mut [T], src: &[T]) -> Result<()>
where
    T: KernelElem,
{
    if dst.len() != src.len() {
        return Err(KernelError::ShapeMismatch {
            expected: vec![dst.len()],
            got: vec![src.len()],
        });
    }

    dst.par_iter_mut()
        .zip(src.par_iter())
        .for_each(|(d, &s)| *d += s);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acc_sum() {
        let mut dst = vec![1.0f32, 2.0, 3.0];
        cpu_acc_sum(&mut dst, &[0.5, 0.5, -3.0]).unwrap();
        assert_eq!(dst, vec![1.5, 2.5, 0.0]);
    }

    #[test]
    fn test_acc_sum_len_mismatch() {
        let mut dst = vec![1.0f32; 3];
        let err = cpu_acc_sum(&mut dst, &[1.0]);
        assert!(matches!(err, Err(KernelError::ShapeMismatch { .. })));
    }
}
