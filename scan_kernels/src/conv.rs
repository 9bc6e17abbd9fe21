use crate::Summand;
use cuda_std::{kernel, thread};

/// Masked convolution of an `n` x `n` row-major matrix with an `m` x `m`
/// mask centered on each output element. Taps that fall outside the matrix
/// contribute nothing. One thread per output element on a 2D grid.
unsafe fn matrix_conv<T: Summand>(input: *const T, mask: *const T, output: *mut T, n: usize, m: usize) {
    let col = (thread::block_idx_x() * thread::block_dim_x() + thread::thread_idx_x()) as usize;
    let row = (thread::block_idx_y() * thread::block_dim_y() + thread::thread_idx_y()) as usize;
    if row >= n || col >= n {
        return;
    }

    let half = m / 2;
    let mut acc = T::ZERO;
    for mask_i in 0..m {
        // Unsigned form of `0 <= row + mask_i - half < n`.
        let r = row + mask_i;
        if r < half || r - half >= n {
            continue;
        }
        for mask_j in 0..m {
            let c = col + mask_j;
            if c < half || c - half >= n {
                continue;
            }
            let x = *input.add((r - half) * n + (c - half));
            let w = *mask.add(mask_i * m + mask_j);
            acc = acc.sum(x.product(w));
        }
    }

    *(&mut *output.add(row * n + col)) = acc;
}

macro_rules! conv_kernels {
    ($($ty:ty => $name:ident;)*) => {
        $(
            #[kernel]
            #[allow(improper_ctypes_definitions, clippy::missing_safety_doc)]
            pub unsafe fn $name(input: *const $ty, mask: *const $ty, output: *mut $ty, n: i32, m: i32) {
                matrix_conv::<$ty>(input, mask, output, n as usize, m as usize)
            }
        )*
    };
}

conv_kernels! {
    i32 => matrix_conv_i32;
    u32 => matrix_conv_u32;
    i64 => matrix_conv_i64;
    u64 => matrix_conv_u64;
    f32 => matrix_conv_f32;
    f64 => matrix_conv_f64;
}
