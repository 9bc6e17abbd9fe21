use crate::context::{ComputeContext, Kernel, KernelArg, LaunchDims};
use crate::element::Summable;
use crate::error::{Result, ScanError};
use crate::layout::upper_n;
use log::debug;

/// Masked 2D convolution of a square matrix on a compute device.
pub struct MatrixConv<'c, C> {
    ctx: &'c C,
    local_size: (usize, usize),
}

impl<'c, C: ComputeContext> MatrixConv<'c, C> {
    /// Starts with one work item per work group.
    pub fn new(ctx: &'c C) -> Self {
        Self {
            ctx,
            local_size: (1, 1),
        }
    }

    pub fn local_size(mut self, local_size: (usize, usize)) -> Self {
        self.local_size = local_size;
        self
    }

    /// Convolves the leading `n * n` elements of `input` with the leading
    /// `m * m` elements of `mask`. Mask taps that land outside the matrix are
    /// skipped.
    pub fn convolve<T: Summable>(&self, input: &[T], mask: &[T], n: usize, m: usize) -> Result<Vec<T>> {
        if n == 0 || m == 0 {
            return Err(ScanError::InvalidDimensions(format!(
                "matrix side {} and mask side {} must be positive",
                n, m
            )));
        }
        let (local_x, local_y) = self.local_size;
        if local_x == 0 || local_y == 0 || local_x * local_y > self.ctx.max_block_size() {
            return Err(ScanError::InvalidDimensions(format!(
                "work group {}x{} does not fit the device",
                local_x, local_y
            )));
        }
        let matrix_size = n.checked_mul(n).ok_or(ScanError::LengthOverflow(n))?;
        let mask_size = m.checked_mul(m).ok_or(ScanError::LengthOverflow(m))?;
        if n > i32::MAX as usize || m > i32::MAX as usize {
            return Err(ScanError::LengthOverflow(n.max(m)));
        }
        if input.len() < matrix_size || mask.len() < mask_size {
            return Err(ScanError::InvalidDimensions(format!(
                "need {} input and {} mask elements, got {} and {}",
                matrix_size,
                mask_size,
                input.len(),
                mask.len()
            )));
        }

        debug!("{}: {}x{} convolution with a {}x{} mask", self.ctx.name(), n, n, m, m);

        let mut dev_input = self.ctx.allocate::<T>(matrix_size)?;
        let mut dev_mask = self.ctx.allocate::<T>(mask_size)?;
        let dev_output = self.ctx.allocate::<T>(matrix_size)?;
        self.ctx.upload(&mut dev_input, &input[..matrix_size], 0)?;
        self.ctx.upload(&mut dev_mask, &mask[..mask_size], 0)?;

        let global = (upper_n(n, local_x), upper_n(n, local_y));
        self.ctx.dispatch::<T>(
            Kernel::MatrixConv,
            LaunchDims::planar(global, self.local_size),
            &[
                KernelArg::Buffer(&dev_input),
                KernelArg::Buffer(&dev_mask),
                KernelArg::Buffer(&dev_output),
                KernelArg::Int(n as i32),
                KernelArg::Int(m as i32),
            ],
        )?;
        self.ctx.synchronize()?;

        let mut output = vec![T::ZERO; matrix_size];
        self.ctx.download(&dev_output, &mut output, 0)?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::MatrixConv;
    use crate::error::ScanError;
    use crate::host::HostContext;
    use crate::validate::check_matrix_conv;
    use rand::{Rng, SeedableRng};
    use rand_hc::Hc128Rng;

    const SEED: &[u8; 32] = b"Zr8mWq3LbN5xTc1VhJ7pKd0sYe2FgUa9";

    #[test]
    fn matches_host_reference() {
        let ctx = HostContext::new().unwrap();
        let mut rng = Hc128Rng::from_seed(*SEED);
        for (n, m) in [(1, 1), (5, 3), (17, 5), (31, 9), (8, 9)] {
            let input: Vec<i32> = (0..n * n).map(|_| rng.gen_range(-5..5)).collect();
            let mask: Vec<i32> = (0..m * m).map(|_| rng.gen_range(-2..3)).collect();
            let output = MatrixConv::new(&ctx).convolve(&input, &mask, n, m).unwrap();
            check_matrix_conv(&input, &mask, &output, n, m).unwrap();
        }
    }

    #[test]
    fn lab_table_with_ones() {
        // Only the first N input values and the first M mask values are ones.
        let ctx = HostContext::new().unwrap();
        for (n, m) in [(64, 3), (64, 9), (1, 9), (31, 9), (63, 9)] {
            let mut input = vec![0.0f32; n * n];
            let mut mask = vec![0.0f32; m * m];
            input[..n].fill(1.0);
            mask[..m].fill(1.0);
            let output = MatrixConv::new(&ctx)
                .local_size((8, 8))
                .convolve(&input, &mask, n, m)
                .unwrap();
            check_matrix_conv(&input, &mask, &output, n, m).unwrap();
        }
    }

    #[test]
    fn convolves_every_element_type() {
        let ctx = HostContext::new().unwrap();
        let conv = MatrixConv::new(&ctx);
        assert_eq!(conv.convolve(&[1u32; 4], &[1], 2, 1).unwrap(), vec![1; 4]);
        assert_eq!(conv.convolve(&[2i64; 4], &[3], 2, 1).unwrap(), vec![6; 4]);
        assert_eq!(conv.convolve(&[1u64; 9], &[1; 9], 3, 3).unwrap()[4], 9);
    }

    #[test]
    fn local_size_does_not_change_the_result() {
        let ctx = HostContext::new().unwrap();
        let input: Vec<i32> = (0..100).collect();
        let mask = [0, 1, 0, 1, -4, 1, 0, 1, 0];
        let a = MatrixConv::new(&ctx).convolve(&input, &mask, 10, 3).unwrap();
        let b = MatrixConv::new(&ctx)
            .local_size((4, 2))
            .convolve(&input, &mask, 10, 3)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_short_inputs_and_empty_sides() {
        let ctx = HostContext::new().unwrap();
        let conv = MatrixConv::new(&ctx);
        assert!(matches!(
            conv.convolve(&[1; 3], &[1], 2, 1),
            Err(ScanError::InvalidDimensions(_))
        ));
        assert!(matches!(
            conv.convolve::<i32>(&[], &[1], 0, 1),
            Err(ScanError::InvalidDimensions(_))
        ));
        assert!(matches!(
            MatrixConv::new(&ctx).local_size((64, 64)).convolve(&[1; 4], &[1], 2, 1),
            Err(ScanError::InvalidDimensions(_))
        ));
    }
}
