mod block_scan;
mod buffer;
mod carry;
pub mod context;
pub mod conv;
#[cfg(feature = "cuda")]
pub mod cuda;
mod element;
pub mod error;
pub mod host;
pub mod layout;
pub mod scan;
pub mod validate;

pub use block_scan::BlockScanner;
pub use buffer::ScanBuffer;
pub use carry::CarryPropagator;
pub use context::{ComputeContext, Kernel, KernelArg, LaunchDims};
pub use conv::MatrixConv;
#[cfg(feature = "cuda")]
pub use cuda::CudaContext;
pub use element::{Summable, FLOAT_TOLERANCE};
pub use error::{Result, ScanError};
pub use host::HostContext;
pub use scan::PrefixScan;
