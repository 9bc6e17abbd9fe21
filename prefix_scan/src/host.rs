//! An in-process compute device.
//!
//! Kernels run one work group per rayon task. Inside a work group the scan
//! is executed step by step exactly as the device kernel does it, with a
//! snapshot of the scratch memory standing in for the barrier between the
//! reads and the writes of each step. Dispatches complete before `dispatch`
//! returns.

use crate::context::{ComputeContext, Kernel, KernelArg, LaunchDims};
use crate::element::Summable;
use crate::error::{Result, ScanError};
use crate::layout::{div_ceil, upper_n};
use log::trace;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::{Mutex, MutexGuard};
use std::{iter, mem, ptr};

/// Largest work group of the host device unless configured otherwise. Same
/// as the CUDA limit on threads per block.
pub const DEFAULT_MAX_BLOCK_SIZE: usize = 1024;

pub struct HostBuffer<T> {
    len: usize,
    data: Mutex<Vec<T>>,
}

impl<T> HostBuffer<T> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<T>>> {
        self.data
            .lock()
            .map_err(|_| ScanError::Device("buffer lock poisoned by a failed dispatch".into()))
    }
}

/// A kernel launch as the host device saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    pub kernel: Kernel,
    pub dims: LaunchDims,
    /// The integer arguments in positional order.
    pub ints: Vec<i32>,
}

pub struct HostContext {
    pool: ThreadPool,
    max_block_size: usize,
    history: Mutex<Vec<DispatchRecord>>,
}

pub struct HostContextBuilder {
    threads: usize,
    max_block_size: usize,
}

impl HostContextBuilder {
    /// Worker threads for the pool. Zero picks rayon's default.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn max_block_size(mut self, max_block_size: usize) -> Self {
        self.max_block_size = max_block_size;
        self
    }

    pub fn build(self) -> Result<HostContext> {
        if self.max_block_size == 0 {
            return Err(ScanError::InvalidBlockSize(0));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|i| format!("host-device-{}", i))
            .build()
            .map_err(|e| ScanError::Device(e.to_string()))?;

        Ok(HostContext {
            pool,
            max_block_size: self.max_block_size,
            history: Mutex::new(vec![]),
        })
    }
}

impl HostContext {
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> HostContextBuilder {
        HostContextBuilder {
            threads: 0,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
        }
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Every dispatch since creation or the last `clear_history`, in launch
    /// order.
    pub fn dispatch_history(&self) -> Vec<DispatchRecord> {
        self.history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    pub fn clear_history(&self) {
        if let Ok(mut history) = self.history.lock() {
            history.clear();
        }
    }

    fn record(&self, kernel: Kernel, dims: LaunchDims, ints: Vec<i32>) -> Result<()> {
        self.history
            .lock()
            .map_err(|_| ScanError::Device("dispatch history poisoned".into()))?
            .push(DispatchRecord { kernel, dims, ints });
        Ok(())
    }

    /// Checks a one-dimensional block launch over a window of `n` elements
    /// and returns the block size.
    fn block_launch(&self, kernel: Kernel, dims: LaunchDims, n: i32) -> Result<usize> {
        let block = dims.local.0;
        if block == 0 || dims.local.1 != 1 || dims.global.1 != 1 {
            return Err(mismatch(kernel, format!("expected a 1D launch, got {:?}", dims)));
        }
        if block > self.max_block_size {
            return Err(ScanError::BlockSizeExceedsDevice {
                block_size: block,
                max: self.max_block_size,
            });
        }
        if n < 1 {
            return Err(mismatch(kernel, format!("window length {} is not positive", n)));
        }
        if dims.global.0 != upper_n(n as usize, block) {
            return Err(mismatch(
                kernel,
                format!(
                    "global size {} does not cover {} elements in blocks of {}",
                    dims.global.0, n, block
                ),
            ));
        }
        Ok(block)
    }

    fn scan_per_block<T: Summable>(
        &self,
        buffer: &HostBuffer<T>,
        shift: usize,
        n: usize,
        block: usize,
    ) -> Result<()> {
        let n_blocks = div_ceil(n, block);
        let mut data = buffer.lock()?;
        let window = window_mut(&mut data, shift, n + n_blocks)?;
        let (values, totals) = window.split_at_mut(n);

        self.pool.install(|| {
            values
                .par_chunks_mut(block)
                .zip(totals.par_iter_mut())
                .for_each(|(values, total)| *total = scan_work_group(values, block));
        });
        Ok(())
    }

    fn add_value_from_prev_block<T: Summable>(
        &self,
        buffer: &HostBuffer<T>,
        shift: usize,
        n: usize,
        block: usize,
    ) -> Result<()> {
        let n_blocks = div_ceil(n, block);
        let mut data = buffer.lock()?;
        let window = window_mut(&mut data, shift, n + n_blocks)?;
        let (values, totals) = window.split_at_mut(n);
        let totals = &*totals;

        self.pool.install(|| {
            values
                .par_chunks_mut(block)
                .enumerate()
                .skip(1)
                .for_each(|(b, values)| {
                    let carry = totals[b - 1];
                    for value in values {
                        *value = value.sum(carry);
                    }
                });
        });
        Ok(())
    }

    fn matrix_conv<T: Summable>(
        &self,
        input: &HostBuffer<T>,
        mask: &HostBuffer<T>,
        output: &HostBuffer<T>,
        n: usize,
        m: usize,
    ) -> Result<()> {
        if ptr::eq(input, output) || ptr::eq(mask, output) {
            return Err(ScanError::AliasedBuffers(Kernel::MatrixConv));
        }
        check_len(input, n * n)?;
        check_len(mask, m * m)?;
        check_len(output, n * n)?;

        let input_data = input.lock()?;
        // Input and mask may be the same buffer; its lock is taken only once.
        let mask_guard;
        let mask_data: &[T] = if ptr::eq(input, mask) {
            &input_data
        } else {
            mask_guard = mask.lock()?;
            &mask_guard
        };
        let mut output_data = output.lock()?;
        // Guards are not Send; the pool only sees the slices.
        let input_data: &[T] = &input_data;
        let out: &mut [T] = &mut output_data[..n * n];

        self.pool.install(|| {
            out.par_chunks_mut(n).enumerate().for_each(|(row, out_row)| {
                for (col, out) in out_row.iter_mut().enumerate() {
                    *out = conv_work_item(input_data, mask_data, n, m, row, col);
                }
            });
        });
        Ok(())
    }
}

impl ComputeContext for HostContext {
    type Buffer<T: Summable> = HostBuffer<T>;

    fn name(&self) -> &str {
        "host"
    }

    fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    fn allocate<T: Summable>(&self, len: usize) -> Result<HostBuffer<T>> {
        Ok(HostBuffer {
            len,
            data: Mutex::new(vec![T::ZERO; len]),
        })
    }

    fn upload<T: Summable>(&self, buffer: &mut HostBuffer<T>, data: &[T], offset: usize) -> Result<()> {
        let mut dst = buffer.lock()?;
        window_mut(&mut dst, offset, data.len())?.copy_from_slice(data);
        Ok(())
    }

    fn download<T: Summable>(&self, buffer: &HostBuffer<T>, data: &mut [T], offset: usize) -> Result<()> {
        let mut src = buffer.lock()?;
        data.copy_from_slice(window_mut(&mut src, offset, data.len())?);
        Ok(())
    }

    fn dispatch<T: Summable>(
        &self,
        kernel: Kernel,
        dims: LaunchDims,
        args: &[KernelArg<'_, HostBuffer<T>>],
    ) -> Result<()> {
        use KernelArg::{Buffer, Int, Local};

        let ints = args
            .iter()
            .filter_map(|arg| match arg {
                Int(i) => Some(*i),
                _ => None,
            })
            .collect::<Vec<_>>();
        trace!("{} {:?} {:?}", kernel.symbol::<T>(), dims, ints);

        match (kernel, args) {
            (Kernel::ScanPerBlock, [Buffer(data), Int(shift), Int(n), Local(bytes)]) => {
                let block = self.block_launch(kernel, dims, *n)?;
                let shift = non_negative(kernel, *shift)?;
                if *bytes < block * mem::size_of::<T>() {
                    return Err(mismatch(
                        kernel,
                        format!("{} bytes of scratch cannot hold {} elements", bytes, block),
                    ));
                }
                self.record(kernel, dims, ints)?;
                self.scan_per_block(data, shift, *n as usize, block)
            }
            (Kernel::AddValueFromPrevBlock, [Buffer(data), Int(shift), Int(n)]) => {
                let block = self.block_launch(kernel, dims, *n)?;
                let shift = non_negative(kernel, *shift)?;
                self.record(kernel, dims, ints)?;
                self.add_value_from_prev_block(data, shift, *n as usize, block)
            }
            (Kernel::MatrixConv, [Buffer(input), Buffer(mask), Buffer(output), Int(n), Int(m)]) => {
                let n = non_negative(kernel, *n)?;
                let m = non_negative(kernel, *m)?;
                if n == 0 || m == 0 {
                    return Err(mismatch(kernel, format!("empty matrix {}x{} or mask {}x{}", n, n, m, m)));
                }
                if dims.local.0 == 0 || dims.local.1 == 0 {
                    return Err(mismatch(kernel, "empty work group".into()));
                }
                if dims.global.0 < n || dims.global.1 < n {
                    return Err(mismatch(
                        kernel,
                        format!("global size {:?} does not cover a {1}x{1} matrix", dims.global, n),
                    ));
                }
                self.record(kernel, dims, ints)?;
                self.matrix_conv(input, mask, output, n, m)
            }
            _ => Err(mismatch(kernel, "argument list does not match the kernel".into())),
        }
    }

    fn synchronize(&self) -> Result<()> {
        Ok(())
    }
}

/// One work group of `scan_per_block`: scans `values` in place, treating the
/// missing tail of a partial block as zero, and returns the block total.
fn scan_work_group<T: Summable>(values: &mut [T], block: usize) -> T {
    let mut scratch = vec![T::ZERO; block];
    scratch[..values.len()].copy_from_slice(values);

    for stride in iter::successors(Some(1), |s| Some(s * 2)).take_while(|&s| s < block) {
        let before = scratch.clone();
        for t in stride..block {
            scratch[t] = before[t].sum(before[t - stride]);
        }
    }

    values.copy_from_slice(&scratch[..values.len()]);
    scratch[block - 1]
}

/// One work item of `matrix_conv`.
fn conv_work_item<T: Summable>(input: &[T], mask: &[T], n: usize, m: usize, row: usize, col: usize) -> T {
    let half = m / 2;
    let mut acc = T::ZERO;
    for mask_i in 0..m {
        let r = row + mask_i;
        if r < half || r - half >= n {
            continue;
        }
        for mask_j in 0..m {
            let c = col + mask_j;
            if c < half || c - half >= n {
                continue;
            }
            acc = acc.sum(input[(r - half) * n + (c - half)].product(mask[mask_i * m + mask_j]));
        }
    }
    acc
}

fn window_mut<T>(data: &mut [T], offset: usize, len: usize) -> Result<&mut [T]> {
    let buffer_len = data.len();
    let end = offset.checked_add(len).unwrap_or(usize::MAX);
    data.get_mut(offset..end).ok_or(ScanError::OutOfBounds {
        start: offset,
        end,
        len: buffer_len,
    })
}

fn check_len<T>(buffer: &HostBuffer<T>, needed: usize) -> Result<()> {
    if buffer.len() < needed {
        return Err(ScanError::OutOfBounds {
            start: 0,
            end: needed,
            len: buffer.len(),
        });
    }
    Ok(())
}

fn non_negative(kernel: Kernel, value: i32) -> Result<usize> {
    usize::try_from(value).map_err(|_| mismatch(kernel, format!("negative argument {}", value)))
}

fn mismatch(kernel: Kernel, reason: String) -> ScanError {
    ScanError::LaunchMismatch { kernel, reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(ctx: &HostContext, values: &[i32], len: usize) -> HostBuffer<i32> {
        let mut buffer = ctx.allocate::<i32>(len).unwrap();
        ctx.upload(&mut buffer, values, 0).unwrap();
        buffer
    }

    fn contents(ctx: &HostContext, buffer: &HostBuffer<i32>) -> Vec<i32> {
        let mut out = vec![0; buffer.len()];
        ctx.download(buffer, &mut out, 0).unwrap();
        out
    }

    #[test]
    fn work_group_scan_pads_partial_blocks() {
        let mut values = [1, 2, 3];
        assert_eq!(scan_work_group(&mut values, 4), 6);
        assert_eq!(values, [1, 3, 6]);

        let mut values = [5];
        assert_eq!(scan_work_group(&mut values, 1), 5);
    }

    #[test]
    fn scans_each_block_and_writes_totals_after_the_window() {
        let ctx = HostContext::new().unwrap();
        let buffer = upload(&ctx, &[1, 1, 1, 1, 1], 8);
        ctx.dispatch::<i32>(
            Kernel::ScanPerBlock,
            LaunchDims::linear(6, 2),
            &[KernelArg::Buffer(&buffer), KernelArg::Int(0), KernelArg::Int(5), KernelArg::Local(8)],
        )
        .unwrap();
        assert_eq!(contents(&ctx, &buffer), vec![1, 2, 1, 2, 1, 2, 2, 1]);
    }

    #[test]
    fn adds_previous_totals_to_later_blocks() {
        let ctx = HostContext::new().unwrap();
        let buffer = upload(&ctx, &[1, 2, 1, 2, 1, 2, 4, 5], 8);
        ctx.dispatch::<i32>(
            Kernel::AddValueFromPrevBlock,
            LaunchDims::linear(6, 2),
            &[KernelArg::Buffer(&buffer), KernelArg::Int(0), KernelArg::Int(5)],
        )
        .unwrap();
        assert_eq!(contents(&ctx, &buffer), vec![1, 2, 3, 4, 5, 2, 4, 5]);
    }

    #[test]
    fn rejects_mismatched_arguments() {
        let ctx = HostContext::new().unwrap();
        let buffer = upload(&ctx, &[1, 2, 3, 4], 8);

        let missing_scratch = ctx.dispatch::<i32>(
            Kernel::ScanPerBlock,
            LaunchDims::linear(4, 4),
            &[KernelArg::Buffer(&buffer), KernelArg::Int(0), KernelArg::Int(4)],
        );
        assert!(matches!(missing_scratch, Err(ScanError::LaunchMismatch { .. })));

        let small_scratch = ctx.dispatch::<i32>(
            Kernel::ScanPerBlock,
            LaunchDims::linear(4, 4),
            &[KernelArg::Buffer(&buffer), KernelArg::Int(0), KernelArg::Int(4), KernelArg::Local(4)],
        );
        assert!(matches!(small_scratch, Err(ScanError::LaunchMismatch { .. })));

        let short_grid = ctx.dispatch::<i32>(
            Kernel::AddValueFromPrevBlock,
            LaunchDims::linear(2, 2),
            &[KernelArg::Buffer(&buffer), KernelArg::Int(0), KernelArg::Int(4)],
        );
        assert!(matches!(short_grid, Err(ScanError::LaunchMismatch { .. })));

        assert!(ctx.dispatch_history().is_empty());
    }

    #[test]
    fn rejects_windows_past_the_buffer() {
        let ctx = HostContext::new().unwrap();
        let buffer = upload(&ctx, &[1, 2, 3, 4], 4);
        let result = ctx.dispatch::<i32>(
            Kernel::ScanPerBlock,
            LaunchDims::linear(4, 2),
            &[KernelArg::Buffer(&buffer), KernelArg::Int(0), KernelArg::Int(4), KernelArg::Local(8)],
        );
        assert!(matches!(result, Err(ScanError::OutOfBounds { end: 6, len: 4, .. })));
    }

    #[test]
    fn enforces_the_block_size_limit() {
        let ctx = HostContext::builder().max_block_size(8).build().unwrap();
        let buffer = upload(&ctx, &[1; 16], 32);
        let result = ctx.dispatch::<i32>(
            Kernel::AddValueFromPrevBlock,
            LaunchDims::linear(16, 16),
            &[KernelArg::Buffer(&buffer), KernelArg::Int(0), KernelArg::Int(16)],
        );
        assert!(matches!(
            result,
            Err(ScanError::BlockSizeExceedsDevice { block_size: 16, max: 8 })
        ));
    }

    #[test]
    fn conv_rejects_output_aliasing() {
        let ctx = HostContext::new().unwrap();
        let buffer = upload(&ctx, &[1; 4], 4);
        let result = ctx.dispatch::<i32>(
            Kernel::MatrixConv,
            LaunchDims::planar((2, 2), (1, 1)),
            &[
                KernelArg::Buffer(&buffer),
                KernelArg::Buffer(&buffer),
                KernelArg::Buffer(&buffer),
                KernelArg::Int(2),
                KernelArg::Int(1),
            ],
        );
        assert!(matches!(result, Err(ScanError::AliasedBuffers(Kernel::MatrixConv))));
    }

    #[test]
    fn conv_runs_rows_across_the_pool() {
        let ctx = HostContext::builder().threads(2).build().unwrap();
        let input = upload(&ctx, &[1; 9], 9);
        let mask = upload(&ctx, &[1; 9], 9);
        let output = ctx.allocate::<i32>(9).unwrap();
        ctx.dispatch::<i32>(
            Kernel::MatrixConv,
            LaunchDims::planar((3, 3), (1, 1)),
            &[
                KernelArg::Buffer(&input),
                KernelArg::Buffer(&mask),
                KernelArg::Buffer(&output),
                KernelArg::Int(3),
                KernelArg::Int(3),
            ],
        )
        .unwrap();
        assert_eq!(contents(&ctx, &output), vec![4, 6, 4, 6, 9, 6, 4, 6, 4]);
    }

    #[test]
    fn upload_and_download_honor_offsets() {
        let ctx = HostContext::builder().threads(2).build().unwrap();
        let mut buffer = ctx.allocate::<i32>(6).unwrap();
        ctx.upload(&mut buffer, &[7, 8], 3).unwrap();
        let mut tail = [0; 3];
        ctx.download(&buffer, &mut tail, 3).unwrap();
        assert_eq!(tail, [7, 8, 0]);
        assert!(ctx.upload(&mut buffer, &[1, 2], 5).is_err());
        assert_eq!(ctx.threads(), 2);
    }
}
