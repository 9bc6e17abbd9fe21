use crate::buffer::ScanBuffer;
use crate::context::{ComputeContext, Kernel, KernelArg, LaunchDims};
use crate::element::Summable;
use crate::error::Result;
use crate::layout::{upper_n, Frame};

/// Turns the per-block scans of a level into a scan of the whole level.
pub struct CarryPropagator<'c, C> {
    ctx: &'c C,
    block_size: usize,
}

impl<'c, C: ComputeContext> CarryPropagator<'c, C> {
    pub fn new(ctx: &'c C, block_size: usize) -> Self {
        Self { ctx, block_size }
    }

    /// Adds `buffer[frame.totals_shift() + b - 1]` to every element of block
    /// `b >= 1`. The totals must already be fully scanned.
    pub fn run<T: Summable>(&self, buffer: &mut ScanBuffer<'_, C, T>, frame: Frame) -> Result<()> {
        let dims = LaunchDims::linear(upper_n(frame.len, self.block_size), self.block_size);
        self.ctx.dispatch::<T>(
            Kernel::AddValueFromPrevBlock,
            dims,
            &[
                KernelArg::Buffer(buffer.device()),
                KernelArg::Int(frame.shift as i32),
                KernelArg::Int(frame.len as i32),
            ],
        )?;
        self.ctx.synchronize()
    }
}
