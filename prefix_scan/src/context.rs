//! The device seam: memory, kernel dispatch and synchronization.

use crate::element::Summable;
use crate::error::Result;
use std::fmt;

/// Kernels the harness launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    /// Block-local inclusive scan that also writes each block's total.
    ///
    /// Arguments: data buffer, shift, length, local scratch of one element per
    /// work item.
    ScanPerBlock,

    /// Adds the scanned total of the preceding block to every element.
    ///
    /// Arguments: data buffer, shift, length.
    AddValueFromPrevBlock,

    /// Masked 2D convolution.
    ///
    /// Arguments: input buffer, mask buffer, output buffer, matrix side,
    /// mask side.
    MatrixConv,
}

impl Kernel {
    pub fn name(self) -> &'static str {
        match self {
            Kernel::ScanPerBlock => "scan_per_block",
            Kernel::AddValueFromPrevBlock => "add_value_from_prev_block",
            Kernel::MatrixConv => "matrix_conv",
        }
    }

    /// The device symbol instantiated for element type `T`.
    pub fn symbol<T: Summable>(self) -> String {
        format!("{}_{}", self.name(), T::TYPE_NAME)
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Global and local work sizes of a dispatch, in work items per dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchDims {
    pub global: (usize, usize),
    pub local: (usize, usize),
}

impl LaunchDims {
    pub fn linear(global: usize, local: usize) -> Self {
        Self {
            global: (global, 1),
            local: (local, 1),
        }
    }

    pub fn planar(global: (usize, usize), local: (usize, usize)) -> Self {
        Self { global, local }
    }

    /// Number of work groups per dimension, rounding partial groups up.
    pub fn groups(&self) -> (usize, usize) {
        (
            (self.global.0 + self.local.0 - 1) / self.local.0,
            (self.global.1 + self.local.1 - 1) / self.local.1,
        )
    }
}

/// A positional kernel argument.
#[derive(Debug)]
pub enum KernelArg<'a, B> {
    Buffer(&'a B),
    Int(i32),
    /// Work-group local scratch memory of the given size in bytes.
    Local(usize),
}

/// A compute device that the scan engine drives.
///
/// Dispatches may run asynchronously; callers must `synchronize` before
/// reading anything a dispatch writes.
pub trait ComputeContext {
    /// Device memory holding elements of type `T`.
    type Buffer<T: Summable>;

    fn name(&self) -> &str;

    /// Largest work group a single dispatch may use.
    fn max_block_size(&self) -> usize;

    /// Allocates `len` zeroed elements of device memory.
    fn allocate<T: Summable>(&self, len: usize) -> Result<Self::Buffer<T>>;

    /// Copies `data` into `buffer` starting at element `offset`.
    fn upload<T: Summable>(&self, buffer: &mut Self::Buffer<T>, data: &[T], offset: usize)
        -> Result<()>;

    /// Copies `data.len()` elements of `buffer` starting at `offset` into
    /// `data`.
    fn download<T: Summable>(&self, buffer: &Self::Buffer<T>, data: &mut [T], offset: usize)
        -> Result<()>;

    /// Launches `kernel` instantiated for `T` with positional `args`.
    fn dispatch<T: Summable>(
        &self,
        kernel: Kernel,
        dims: LaunchDims,
        args: &[KernelArg<'_, Self::Buffer<T>>],
    ) -> Result<()>;

    /// Blocks until every previously dispatched kernel has completed.
    fn synchronize(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::{Kernel, LaunchDims};

    #[test]
    fn symbols_carry_the_element_type() {
        assert_eq!(Kernel::ScanPerBlock.symbol::<i32>(), "scan_per_block_i32");
        assert_eq!(
            Kernel::AddValueFromPrevBlock.symbol::<f32>(),
            "add_value_from_prev_block_f32"
        );
        assert_eq!(Kernel::MatrixConv.symbol::<f64>(), "matrix_conv_f64");
    }

    #[test]
    fn groups_round_up() {
        assert_eq!(LaunchDims::linear(36, 9).groups(), (4, 1));
        assert_eq!(LaunchDims::planar((31, 31), (8, 8)).groups(), (4, 4));
    }
}
