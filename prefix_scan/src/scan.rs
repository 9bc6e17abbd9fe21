use crate::block_scan::BlockScanner;
use crate::buffer::ScanBuffer;
use crate::carry::CarryPropagator;
use crate::context::ComputeContext;
use crate::element::Summable;
use crate::error::{Result, ScanError};
use crate::layout::ScanLayout;
use log::debug;

/// Work-efficient inclusive scan on a compute device.
///
/// Each level is scanned block by block, the block totals are scanned as the
/// next level, and the scanned totals are then carried back into the level.
/// Dispatches follow the post-order of that recursion: block scans from the
/// outermost level inwards, then carries from the innermost level outwards,
/// each one completing before the next is issued.
pub struct PrefixScan<'c, C> {
    ctx: &'c C,
    block_size: usize,
}

impl<'c, C: ComputeContext> PrefixScan<'c, C> {
    pub fn new(ctx: &'c C, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(ScanError::InvalidBlockSize(block_size));
        }
        // Unit blocks are laid out as blocks of 2, so that is what must fit.
        let effective = block_size.max(2);
        if effective > ctx.max_block_size() {
            return Err(ScanError::BlockSizeExceedsDevice {
                block_size: effective,
                max: ctx.max_block_size(),
            });
        }
        Ok(Self { ctx, block_size })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn layout(&self, len: usize) -> Result<ScanLayout> {
        ScanLayout::new(len, self.block_size)
    }

    /// Inclusive scan of `input`. An empty input yields an empty output
    /// without touching the device.
    pub fn scan<T: Summable>(&self, input: &[T]) -> Result<Vec<T>> {
        if input.is_empty() {
            return Ok(vec![]);
        }
        let mut buffer = self.upload(input)?;
        self.scan_buffer(&mut buffer)?;
        buffer.download()
    }

    /// Copies `input` into a scan buffer on this scanner's device.
    pub fn upload<T: Summable>(&self, input: &[T]) -> Result<ScanBuffer<'c, C, T>> {
        ScanBuffer::upload(self.ctx, input, self.block_size)
    }

    /// Scans the front of `buffer` in place using the buffer's own layout.
    /// The buffer must live on this scanner's device.
    ///
    /// The first failing dispatch aborts the scan; the remaining levels are
    /// not attempted and the buffer contents are unspecified.
    pub fn scan_buffer<T: Summable>(&self, buffer: &mut ScanBuffer<'_, C, T>) -> Result<()> {
        let layout = buffer.layout().clone();
        debug!(
            "{}: scanning {} x {} in blocks of {} over {} levels",
            self.ctx.name(),
            layout.len(),
            T::TYPE_NAME,
            layout.block_size(),
            layout.depth()
        );

        let scanner = BlockScanner::new(self.ctx, layout.block_size());
        let propagator = CarryPropagator::new(self.ctx, layout.block_size());

        for (level, &frame) in layout.levels().iter().enumerate() {
            debug!("level {}: block scan of {} at {}", level, frame.len, frame.shift);
            scanner.run(buffer, frame)?;
        }
        for (level, &frame) in layout.levels().iter().enumerate().rev() {
            debug!("level {}: carry into {} at {}", level, frame.len, frame.shift);
            propagator.run(buffer, frame)?;
        }
        Ok(())
    }
}
