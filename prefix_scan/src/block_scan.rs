use crate::buffer::ScanBuffer;
use crate::context::{ComputeContext, Kernel, KernelArg, LaunchDims};
use crate::element::Summable;
use crate::error::Result;
use crate::layout::{upper_n, Frame};
use std::mem;

/// Scans every block of a level independently and writes the block totals to
/// the start of the next level.
pub struct BlockScanner<'c, C> {
    ctx: &'c C,
    block_size: usize,
}

impl<'c, C: ComputeContext> BlockScanner<'c, C> {
    pub fn new(ctx: &'c C, block_size: usize) -> Self {
        Self { ctx, block_size }
    }

    /// After this returns, `buffer[frame.shift + i]` holds the inclusive scan
    /// of element `i` within its block and `buffer[frame.totals_shift() + b]`
    /// holds the total of block `b`.
    pub fn run<T: Summable>(&self, buffer: &mut ScanBuffer<'_, C, T>, frame: Frame) -> Result<()> {
        let dims = LaunchDims::linear(upper_n(frame.len, self.block_size), self.block_size);
        self.ctx.dispatch::<T>(
            Kernel::ScanPerBlock,
            dims,
            &[
                KernelArg::Buffer(buffer.device()),
                KernelArg::Int(frame.shift as i32),
                KernelArg::Int(frame.len as i32),
                KernelArg::Local(mem::size_of::<T>() * self.block_size),
            ],
        )?;
        self.ctx.synchronize()
    }
}
