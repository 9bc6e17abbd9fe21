//! Error types for scan and convolution dispatches.

use crate::context::Kernel;
use thiserror::Error;

/// Result type for operations that touch a compute context.
pub type Result<T> = std::result::Result<T, ScanError>;

/// Errors raised by the scan engine and the compute contexts it drives.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Block size outside what the engine accepts.
    #[error("invalid block size {0}: must be at least 1")]
    InvalidBlockSize(usize),

    /// Block size larger than one work group of the device.
    #[error("block size {block_size} exceeds the device limit of {max}")]
    BlockSizeExceedsDevice {
        /// Requested block size
        block_size: usize,
        /// Largest work group the device supports
        max: usize,
    },

    /// A device buffer was requested for an empty array.
    #[error("cannot scan an empty array")]
    EmptyInput,

    /// Index arithmetic does not fit the kernels' integer arguments.
    #[error("length {0} does not fit the kernel index range")]
    LengthOverflow(usize),

    /// Matrix or mask dimensions do not match the supplied data.
    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),

    /// Arguments or launch dimensions do not match what the kernel expects.
    #[error("bad launch of {kernel}: {reason}")]
    LaunchMismatch {
        /// Kernel being launched
        kernel: Kernel,
        /// What was wrong with the launch
        reason: String,
    },

    /// A window or copy falls outside its device buffer.
    #[error("range {start}..{end} is outside a buffer of length {len}")]
    OutOfBounds {
        /// First element of the range
        start: usize,
        /// One past the last element of the range
        end: usize,
        /// Length of the buffer
        len: usize,
    },

    /// The same buffer was bound to an input and the output of one dispatch.
    #[error("{0} was given the same buffer as input and output")]
    AliasedBuffers(Kernel),

    /// Host device fault.
    #[error("device failure: {0}")]
    Device(String),

    /// CUDA driver error.
    #[cfg(feature = "cuda")]
    #[error("CUDA error: {0}")]
    Cuda(#[from] cust::error::CudaError),
}
