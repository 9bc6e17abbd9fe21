use crate::context::ComputeContext;
use crate::element::Summable;
use crate::error::Result;
use crate::layout::ScanLayout;

/// Device memory holding every recursion level of one scan.
///
/// The input occupies the front of the buffer and everything after it starts
/// out zeroed. A scan borrows the buffer mutably for its whole duration, so
/// no two scans can dispatch against the same memory. The device allocation
/// is released when the buffer is dropped.
pub struct ScanBuffer<'c, C, T>
where
    C: ComputeContext,
    T: Summable,
{
    ctx: &'c C,
    device: C::Buffer<T>,
    layout: ScanLayout,
}

impl<'c, C, T> ScanBuffer<'c, C, T>
where
    C: ComputeContext,
    T: Summable,
{
    /// Allocates a buffer for `input` laid out in blocks of `block_size` and
    /// copies `input` to the front of it.
    pub fn upload(ctx: &'c C, input: &[T], block_size: usize) -> Result<Self> {
        let layout = ScanLayout::new(input.len(), block_size)?;
        let mut device = ctx.allocate::<T>(layout.buffer_len())?;
        ctx.upload(&mut device, input, 0)?;
        Ok(Self {
            ctx,
            device,
            layout,
        })
    }

    /// Copies the first `len` elements back to the host.
    pub fn download(&self) -> Result<Vec<T>> {
        let mut output = vec![T::ZERO; self.layout.len()];
        self.ctx.download(&self.device, &mut output, 0)?;
        Ok(output)
    }

    pub fn layout(&self) -> &ScanLayout {
        &self.layout
    }

    pub fn len(&self) -> usize {
        self.layout.len()
    }

    /// Always false: empty arrays are rejected on upload.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub(crate) fn device(&self) -> &C::Buffer<T> {
        &self.device
    }
}
