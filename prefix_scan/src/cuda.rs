use crate::context::{ComputeContext, Kernel, KernelArg, LaunchDims};
use crate::element::Summable;
use crate::error::{Result, ScanError};
use cust::context::Context;
use cust::device::{Device, DeviceAttribute};
use cust::prelude::*;
use log::info;

static PTX: &str = include_str!("../../resources/scan_kernels.ptx");

/// The first CUDA device, with the `scan_kernels` module loaded and one
/// non-blocking stream that every dispatch is queued on.
pub struct CudaContext {
    // Fields drop in order; the module and stream must go before the context.
    stream: Stream,
    module: Module,
    name: String,
    max_block_size: usize,
    _ctx: Context,
}

impl CudaContext {
    pub fn new() -> Result<Self> {
        let ctx = cust::quick_init()?;
        let device = Device::get_device(0)?;
        let name = device.name()?;
        let max_block_size = device.get_attribute(DeviceAttribute::MaxThreadsPerBlock)? as usize;

        let module = Module::from_ptx(PTX, &[])?;
        let stream = Stream::new(StreamFlags::NON_BLOCKING, None)?;
        info!("using CUDA device {} (max {} threads per block)", name, max_block_size);

        Ok(Self {
            stream,
            module,
            name,
            max_block_size,
            _ctx: ctx,
        })
    }
}

impl ComputeContext for CudaContext {
    type Buffer<T: Summable> = DeviceBuffer<T>;

    fn name(&self) -> &str {
        &self.name
    }

    fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    fn allocate<T: Summable>(&self, len: usize) -> Result<DeviceBuffer<T>> {
        Ok(vec![T::ZERO; len].as_slice().as_dbuf()?)
    }

    fn upload<T: Summable>(&self, buffer: &mut DeviceBuffer<T>, data: &[T], offset: usize) -> Result<()> {
        let end = checked_end(buffer.len(), offset, data.len())?;
        let mut window = buffer.index(offset..end);
        window.copy_from(data)?;
        Ok(())
    }

    fn download<T: Summable>(&self, buffer: &DeviceBuffer<T>, data: &mut [T], offset: usize) -> Result<()> {
        let end = checked_end(buffer.len(), offset, data.len())?;
        buffer.index(offset..end).copy_to(data)?;
        Ok(())
    }

    fn dispatch<T: Summable>(
        &self,
        kernel: Kernel,
        dims: LaunchDims,
        args: &[KernelArg<'_, DeviceBuffer<T>>],
    ) -> Result<()> {
        use KernelArg::{Buffer, Int, Local};

        let threads = dims.local.0 * dims.local.1;
        if threads == 0 {
            return Err(ScanError::LaunchMismatch {
                kernel,
                reason: "empty work group".into(),
            });
        }
        if threads > self.max_block_size {
            return Err(ScanError::BlockSizeExceedsDevice {
                block_size: threads,
                max: self.max_block_size,
            });
        }

        let function = self.module.get_function(&kernel.symbol::<T>())?;
        let (groups_x, groups_y) = dims.groups();
        let grid = (groups_x as u32, groups_y as u32);
        let block = (dims.local.0 as u32, dims.local.1 as u32);
        let stream = &self.stream;

        match (kernel, args) {
            (Kernel::ScanPerBlock, [Buffer(data), Int(shift), Int(n), Local(bytes)]) => unsafe {
                launch!(
                    function<<<grid, block, *bytes as u32, stream>>>(
                        data.as_device_ptr(),
                        *shift,
                        *n
                    )
                )?;
            },
            (Kernel::AddValueFromPrevBlock, [Buffer(data), Int(shift), Int(n)]) => unsafe {
                launch!(
                    function<<<grid, block, 0, stream>>>(
                        data.as_device_ptr(),
                        *shift,
                        *n
                    )
                )?;
            },
            (Kernel::MatrixConv, [Buffer(input), Buffer(mask), Buffer(output), Int(n), Int(m)]) => unsafe {
                launch!(
                    function<<<grid, block, 0, stream>>>(
                        input.as_device_ptr(),
                        mask.as_device_ptr(),
                        output.as_device_ptr(),
                        *n,
                        *m
                    )
                )?;
            },
            _ => {
                return Err(ScanError::LaunchMismatch {
                    kernel,
                    reason: "argument list does not match the kernel".into(),
                })
            }
        }
        Ok(())
    }

    fn synchronize(&self) -> Result<()> {
        self.stream.synchronize()?;
        Ok(())
    }
}

fn checked_end(buffer_len: usize, offset: usize, len: usize) -> Result<usize> {
    match offset.checked_add(len) {
        Some(end) if end <= buffer_len => Ok(end),
        _ => Err(ScanError::OutOfBounds {
            start: offset,
            end: offset.saturating_add(len),
            len: buffer_len,
        }),
    }
}
