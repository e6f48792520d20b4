//! Device-tagged N-dimensional arrays.
//!
//! # What is an `Array` here?
//!
//! The orchestration layer needs just enough of an array type to move data between
//! devices, batch examples together and sum gradients. An [`Array`] is:
//! 1. **Data**: a flat row-major vector of elements.
//! 2. **Shape**: a dynamic list of dimensions (batch sizes vary between shards).
//! 3. **Device**: where the data lives ([`Device::Cpu`] or [`Device::Gpu`]).
//! 4. **Layout**: whether the accelerated backend already owns the buffer.
//!
//! ```rust
//! use dptrain::array::{Array, Device};
//!
//! let a = Array::new(vec![1.0, 2.0, 3.0, 4.0], [2, 2]).unwrap();
//! assert_eq!(a.shape(), &[2, 2]);
//!
//! let on_gpu = a.to_device(Device::Gpu(0));
//! assert_eq!(on_gpu.device(), Device::Gpu(0));
//! assert_eq!(on_gpu.data(), a.data());
//! ```
//!
//! Binary operations require both operands on the same device and fail with
//! [`Error::DeviceMismatch`] otherwise.

use crate::error::{Error, Result};
use num_traits::{Float, NumAssign};
use std::fmt::{self, Debug};

pub mod device;

pub use device::{Device, Layout};

/// Element type tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F64,
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "float32"),
            DType::F64 => write!(f, "float64"),
        }
    }
}

/// Trait bound for elements that can be stored in an [`Array`].
pub trait Element: Float + NumAssign + Debug + Send + Sync + 'static {
    const DTYPE: DType;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;
}

/// Shape, dtype and placement of an array, independent of its element type.
///
/// The capability gate inspects inputs through this trait so that it can
/// reject `f64` arrays without being generic itself.
pub trait ArrayMeta {
    fn shape(&self) -> &[usize];
    fn dtype(&self) -> DType;
    fn device(&self) -> Device;
    fn layout(&self) -> Layout;

    fn ndim(&self) -> usize {
        self.shape().len()
    }
}

/// A dense row-major array.
#[derive(Clone, PartialEq)]
pub struct Array<T: Element = f32> {
    shape: Vec<usize>,
    data: Vec<T>,
    device: Device,
    layout: Layout,
}

impl<T: Element> Debug for Array<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("shape", &self.shape)
            .field("dtype", &T::DTYPE)
            .field("device", &self.device)
            .field("layout", &self.layout)
            .field("data", &self.data)
            .finish()
    }
}

impl<T: Element> ArrayMeta for Array<T> {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn dtype(&self) -> DType {
        T::DTYPE
    }

    fn device(&self) -> Device {
        self.device
    }

    fn layout(&self) -> Layout {
        self.layout
    }
}

fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

impl<T: Element> Array<T> {
    /// Creates a host array from flat data and a shape.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if `data.len()` is not the product of `shape`.
    pub fn new(data: Vec<T>, shape: impl Into<Vec<usize>>) -> Result<Self> {
        let shape = shape.into();
        let size: usize = shape.iter().product();
        if data.len() != size {
            return Err(Error::ShapeMismatch {
                expected: vec![size],
                got: vec![data.len()],
            });
        }
        Ok(Self {
            shape,
            data,
            device: Device::Cpu,
            layout: Layout::Generic,
        })
    }

    /// Creates a host array filled with `value`.
    pub fn full(shape: &[usize], value: T) -> Self {
        let size: usize = shape.iter().product();
        Self {
            shape: shape.to_vec(),
            data: vec![value; size],
            device: Device::Cpu,
            layout: Layout::Generic,
        }
    }

    /// Creates a host array filled with zeros.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, T::zero())
    }

    /// Creates a rank-0 host array.
    pub fn scalar(value: T) -> Self {
        Self::full(&[], value)
    }

    /// Zeros with the same shape, device and layout as `self`.
    pub fn zeros_like(&self) -> Self {
        Self {
            shape: self.shape.clone(),
            data: vec![T::zero(); self.data.len()],
            device: self.device,
            layout: self.layout,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    /// Returns the single element of a size-1 array.
    pub fn item(&self) -> Result<T> {
        match self.data.as_slice() {
            [value] => Ok(*value),
            _ => Err(Error::ShapeMismatch {
                expected: vec![],
                got: self.shape.clone(),
            }),
        }
    }

    /// Copies the array onto `device`.
    ///
    /// Native layout is host-only, so moving to an accelerator resets it to generic.
    pub fn to_device(&self, device: Device) -> Self {
        self.clone().into_device(device)
    }

    /// Moves the array onto `device`, reusing the buffer.
    pub fn into_device(mut self, device: Device) -> Self {
        if !device.is_cpu() {
            self.layout = Layout::Generic;
        }
        self.device = device;
        self
    }

    /// Re-tags the layout. Only host arrays can be native.
    pub fn with_layout(mut self, layout: Layout) -> Self {
        if self.device.is_cpu() {
            self.layout = layout;
        }
        self
    }

    /// Returns the same data with a new shape.
    pub fn reshape(mut self, shape: impl Into<Vec<usize>>) -> Result<Self> {
        let shape = shape.into();
        let size: usize = shape.iter().product();
        if size != self.data.len() {
            return Err(Error::ShapeMismatch {
                expected: shape,
                got: self.shape,
            });
        }
        self.shape = shape;
        Ok(self)
    }

    fn check_device(&self, other: &Self) -> Result<()> {
        if self.device != other.device {
            return Err(Error::DeviceMismatch {
                expected: self.device,
                got: other.device,
            });
        }
        Ok(())
    }

    fn check_same(&self, other: &Self) -> Result<()> {
        self.check_device(other)?;
        if self.shape != other.shape {
            return Err(Error::ShapeMismatch {
                expected: self.shape.clone(),
                got: other.shape.clone(),
            });
        }
        Ok(())
    }

    /// Stacks same-shaped arrays along a new leading axis.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for an empty list.
    /// - [`Error::ShapeMismatch`] / [`Error::DeviceMismatch`] if the arrays disagree.
    pub fn stack(arrays: &[&Self]) -> Result<Self> {
        let first = arrays
            .first()
            .ok_or_else(|| Error::InvalidArgument("cannot stack an empty list of arrays".into()))?;

        let mut data = Vec::with_capacity(first.size() * arrays.len());
        for a in arrays {
            first.check_same(a)?;
            data.extend_from_slice(&a.data);
        }

        let mut shape = Vec::with_capacity(first.ndim() + 1);
        shape.push(arrays.len());
        shape.extend_from_slice(&first.shape);

        Ok(Self {
            shape,
            data,
            device: first.device,
            layout: Layout::Generic,
        })
    }

    /// Stacks arrays of equal rank, padding every one of them up to the
    /// element-wise maximum shape with `padding`.
    pub fn stack_padded(arrays: &[&Self], padding: T) -> Result<Self> {
        let first = arrays
            .first()
            .ok_or_else(|| Error::InvalidArgument("cannot stack an empty list of arrays".into()))?;

        let mut max_shape = first.shape.clone();
        for a in arrays {
            first.check_device(a)?;
            if a.ndim() != first.ndim() {
                return Err(Error::ShapeMismatch {
                    expected: first.shape.clone(),
                    got: a.shape.clone(),
                });
            }
            for (m, &d) in max_shape.iter_mut().zip(a.shape.iter()) {
                *m = (*m).max(d);
            }
        }

        let item_size: usize = max_shape.iter().product();
        let dst_strides = strides(&max_shape);
        let mut data = vec![padding; item_size * arrays.len()];

        for (i, a) in arrays.iter().enumerate() {
            let src_strides = strides(&a.shape);
            let base = i * item_size;
            for (flat, &value) in a.data.iter().enumerate() {
                let mut rem = flat;
                let mut offset = base;
                for (s, d) in src_strides.iter().zip(dst_strides.iter()) {
                    offset += (rem / s) * d;
                    rem %= s;
                }
                data[offset] = value;
            }
        }

        let mut shape = Vec::with_capacity(max_shape.len() + 1);
        shape.push(arrays.len());
        shape.extend_from_slice(&max_shape);

        Ok(Self {
            shape,
            data,
            device: first.device,
            layout: Layout::Generic,
        })
    }

    /// `self += other`, element-wise.
    pub fn add_assign(&mut self, other: &Self) -> Result<()> {
        self.check_same(other)?;
        for (a, &b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
        Ok(())
    }

    /// `self += alpha * x`, element-wise.
    pub fn axpy(&mut self, alpha: T, x: &Self) -> Result<()> {
        self.check_same(x)?;
        for (a, &b) in self.data.iter_mut().zip(x.data.iter()) {
            *a += alpha * b;
        }
        Ok(())
    }

    /// Overwrites the contents with `src`. Shapes and devices must agree.
    pub fn copy_from(&mut self, src: &Self) -> Result<()> {
        self.check_same(src)?;
        self.data.copy_from_slice(&src.data);
        Ok(())
    }

    pub fn fill(&mut self, value: T) {
        self.data.iter_mut().for_each(|x| *x = value);
    }

    pub fn map(&self, f: impl Fn(T) -> T) -> Self {
        Self {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| f(x)).collect(),
            device: self.device,
            layout: self.layout,
        }
    }

    pub fn zip_map(&self, other: &Self, f: impl Fn(T, T) -> T) -> Result<Self> {
        self.check_same(other)?;
        Ok(Self {
            shape: self.shape.clone(),
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
            device: self.device,
            layout: self.layout,
        })
    }

    pub fn sum(&self) -> T {
        self.data.iter().fold(T::zero(), |acc, &x| acc + x)
    }

    /// Mean of all elements. Zero for an empty array.
    pub fn mean(&self) -> T {
        match <T as num_traits::NumCast>::from(self.data.len()) {
            Some(n) if !self.data.is_empty() => self.sum() / n,
            _ => T::zero(),
        }
    }

    fn matrix_dims(&self) -> Result<(usize, usize)> {
        match self.shape.as_slice() {
            &[rows, cols] => Ok((rows, cols)),
            _ => Err(Error::ShapeMismatch {
                expected: vec![0, 0],
                got: self.shape.clone(),
            }),
        }
    }

    /// Sums a `[rows, cols]` matrix over its rows, giving `[cols]`.
    pub fn sum_rows(&self) -> Result<Self> {
        let (_, cols) = self.matrix_dims()?;
        let mut out = vec![T::zero(); cols];
        if cols > 0 {
            for row in self.data.chunks(cols) {
                for (o, &x) in out.iter_mut().zip(row.iter()) {
                    *o += x;
                }
            }
        }
        Ok(Self {
            shape: vec![cols],
            data: out,
            device: self.device,
            layout: Layout::Generic,
        })
    }

    /// Generic `self @ rhs^T` for `self: [m, k]`, `rhs: [n, k]`.
    pub fn matmul_nt(&self, rhs: &Self) -> Result<Self> {
        self.check_device(rhs)?;
        let (m, k) = self.matrix_dims()?;
        let (n, k2) = rhs.matrix_dims()?;
        if k != k2 {
            return Err(Error::ShapeMismatch {
                expected: vec![n, k],
                got: rhs.shape.clone(),
            });
        }

        let mut out = vec![T::zero(); m * n];
        for i in 0..m {
            for j in 0..n {
                let mut sum = T::zero();
                for p in 0..k {
                    sum += self.data[i * k + p] * rhs.data[j * k + p];
                }
                out[i * n + j] = sum;
            }
        }
        Ok(Self {
            shape: vec![m, n],
            data: out,
            device: self.device,
            layout: Layout::Generic,
        })
    }

    /// Generic `self^T @ rhs` for `self: [b, m]`, `rhs: [b, n]`.
    pub fn matmul_tn(&self, rhs: &Self) -> Result<Self> {
        self.check_device(rhs)?;
        let (b, m) = self.matrix_dims()?;
        let (b2, n) = rhs.matrix_dims()?;
        if b != b2 {
            return Err(Error::ShapeMismatch {
                expected: vec![b, n],
                got: rhs.shape.clone(),
            });
        }

        let mut out = vec![T::zero(); m * n];
        for r in 0..b {
            for i in 0..m {
                let a = self.data[r * m + i];
                for j in 0..n {
                    out[i * n + j] += a * rhs.data[r * n + j];
                }
            }
        }
        Ok(Self {
            shape: vec![m, n],
            data: out,
            device: self.device,
            layout: Layout::Generic,
        })
    }

    /// Builds an array on `device`/`layout` from raw parts. Used by dispatch
    /// paths that compute the data themselves.
    pub(crate) fn from_parts(
        data: Vec<T>,
        shape: Vec<usize>,
        device: Device,
        layout: Layout,
    ) -> Self {
        debug_assert_eq!(data.len(), shape.iter().product::<usize>());
        Self {
            shape,
            data,
            device,
            layout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_shape_mismatch() {
        let result = Array::new(vec![1.0f32, 2.0, 3.0], [2, 2]);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_scalar_item() {
        let a = Array::scalar(3.5f32);
        assert_eq!(a.ndim(), 0);
        assert_eq!(a.item().unwrap(), 3.5);

        let b = Array::<f32>::zeros(&[2]);
        assert!(b.item().is_err());
    }

    #[test]
    fn test_to_device_keeps_data() {
        let a = Array::new(vec![1.0f32, 2.0], [2]).unwrap().with_layout(Layout::Native);
        assert_eq!(a.layout(), Layout::Native);

        let g = a.to_device(Device::Gpu(1));
        assert_eq!(g.device(), Device::Gpu(1));
        assert_eq!(g.layout(), Layout::Generic);
        assert_eq!(g.data(), &[1.0, 2.0]);
    }

    #[test]
    fn test_native_layout_is_host_only() {
        let a = Array::<f32>::zeros(&[2]).into_device(Device::Gpu(0));
        let a = a.with_layout(Layout::Native);
        assert_eq!(a.layout(), Layout::Generic);
    }

    #[test]
    fn test_add_assign_device_mismatch() {
        let mut a = Array::<f32>::zeros(&[2]);
        let b = Array::<f32>::zeros(&[2]).into_device(Device::Gpu(0));
        let err = a.add_assign(&b);
        assert!(matches!(err, Err(Error::DeviceMismatch { .. })));
    }

    #[test]
    fn test_axpy() {
        let mut a = Array::new(vec![1.0f32, 2.0], [2]).unwrap();
        let g = Array::new(vec![0.5f32, -0.5], [2]).unwrap();
        a.axpy(-0.1, &g).unwrap();
        assert!((a.data()[0] - 0.95).abs() < 1e-6);
        assert!((a.data()[1] - 2.05).abs() < 1e-6);
    }

    #[test]
    fn test_stack() {
        let a = Array::new(vec![1.0f32, 2.0], [2]).unwrap();
        let b = Array::new(vec![3.0f32, 4.0], [2]).unwrap();
        let s = Array::stack(&[&a, &b]).unwrap();
        assert_eq!(s.shape(), &[2, 2]);
        assert_eq!(s.data(), &[1.0, 2.0, 3.0, 4.0]);

        let c = Array::new(vec![1.0f32], [1]).unwrap();
        assert!(Array::stack(&[&a, &c]).is_err());
        assert!(Array::<f32>::stack(&[]).is_err());
    }

    #[test]
    fn test_stack_padded() {
        let a = Array::new(vec![1.0f32, 2.0, 3.0], [3]).unwrap();
        let b = Array::new(vec![4.0f32], [1]).unwrap();
        let s = Array::stack_padded(&[&a, &b], -1.0).unwrap();
        assert_eq!(s.shape(), &[2, 3]);
        assert_eq!(s.data(), &[1.0, 2.0, 3.0, 4.0, -1.0, -1.0]);
    }

    #[test]
    fn test_stack_padded_matrix() {
        let a = Array::new(vec![1.0f32, 2.0], [1, 2]).unwrap();
        let b = Array::new(vec![3.0f32, 4.0], [2, 1]).unwrap();
        let s = Array::stack_padded(&[&a, &b], 0.0).unwrap();
        assert_eq!(s.shape(), &[2, 2, 2]);
        // a -> [[1, 2], [0, 0]], b -> [[3, 0], [4, 0]]
        assert_eq!(s.data(), &[1.0, 2.0, 0.0, 0.0, 3.0, 0.0, 4.0, 0.0]);
    }

    #[test]
    fn test_matmul_nt_and_tn() {
        let x = Array::new(vec![1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
        let w = Array::new(vec![1.0f32, 0.0, -1.0, 2.0, 1.0, 0.0], [2, 3]).unwrap();
        let y = x.matmul_nt(&w).unwrap();
        assert_eq!(y.shape(), &[2, 2]);
        assert_eq!(y.data(), &[-2.0, 4.0, -2.0, 13.0]);

        let gy = Array::new(vec![1.0f32, 0.0, 0.0, 1.0], [2, 2]).unwrap();
        let gw = gy.matmul_tn(&x).unwrap();
        assert_eq!(gw.shape(), &[2, 3]);
        assert_eq!(gw.data(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_sum_rows_and_mean() {
        let x = Array::new(vec![1.0f32, 2.0, 3.0, 4.0], [2, 2]).unwrap();
        assert_eq!(x.sum_rows().unwrap().data(), &[4.0, 6.0]);
        assert_eq!(x.mean(), 2.5);
        assert_eq!(Array::<f32>::zeros(&[0]).mean(), 0.0);
    }

    #[test]
    fn test_reshape() {
        let x = Array::new(vec![1.0f32, 2.0, 3.0, 4.0], [4]).unwrap();
        let y = x.clone().reshape([2, 2]).unwrap();
        assert_eq!(y.shape(), &[2, 2]);
        assert!(x.reshape([3]).is_err());
    }

    #[test]
    fn test_meta_dtype() {
        let a = Array::<f64>::zeros(&[2, 2]);
        let meta: &dyn ArrayMeta = &a;
        assert_eq!(meta.dtype(), DType::F64);
        assert_eq!(meta.ndim(), 2);
    }
}
