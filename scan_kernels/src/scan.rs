use crate::step::mult_step;
use crate::Summand;
use cuda_std::{kernel, shared, thread};

/// Inclusive scan of every block of the window `data[shift..shift + n]`.
///
/// Each thread block scans `block_dim` consecutive elements using the
/// Hillis-Steele (Kogge-Stone) algorithm in dynamic shared memory, which the
/// launch must size to `block_dim` elements. Elements at or past `n` are read
/// as zero and never written back. The total of block `b` is written to
/// `data[shift + n + b]`, which is where the next recursion level starts.
unsafe fn scan_per_block<T: Summand>(data: *mut T, shift: usize, n: usize) {
    let t_idx = thread::thread_idx_x() as usize;
    let b_idx = thread::block_idx_x() as usize;
    let b_dim = thread::block_dim_x() as usize;

    let scratch = shared::dynamic_shared_mem::<T>();

    // Copy this block's slice of the window into shared memory, padding the
    // tail of a partial block with the identity.
    let i = b_idx * b_dim + t_idx;
    *(&mut *scratch.add(t_idx)) = if i < n { *data.add(shift + i) } else { T::ZERO };

    // Every thread reads its addend before any thread overwrites its slot.
    for stride in mult_step(1, 2).take_while(|&s| s < b_dim) {
        thread::sync_threads();
        let addend = if t_idx >= stride {
            *scratch.add(t_idx - stride)
        } else {
            T::ZERO
        };
        thread::sync_threads();
        *(&mut *scratch.add(t_idx)) = (*scratch.add(t_idx)).sum(addend);
    }

    thread::sync_threads();
    if i < n {
        *(&mut *data.add(shift + i)) = *scratch.add(t_idx);
    }
    if t_idx == b_dim - 1 {
        *(&mut *data.add(shift + n + b_idx)) = *scratch.add(t_idx);
    }
}

/// Adds the scanned total of block `b - 1` to every element of block `b`.
///
/// The totals at `data[shift + n..]` must already hold the inclusive scan of
/// the block totals. Block 0 is left untouched.
unsafe fn add_value_from_prev_block<T: Summand>(data: *mut T, shift: usize, n: usize) {
    let t_idx = thread::thread_idx_x() as usize;
    let b_idx = thread::block_idx_x() as usize;
    let b_dim = thread::block_dim_x() as usize;

    if b_idx == 0 {
        return;
    }

    let i = b_idx * b_dim + t_idx;
    if i < n {
        let carry = *data.add(shift + n + b_idx - 1);
        *(&mut *data.add(shift + i)) = (*data.add(shift + i)).sum(carry);
    }
}

macro_rules! scan_kernels {
    ($($ty:ty => $scan:ident, $add:ident;)*) => {
        $(
            #[kernel]
            #[allow(improper_ctypes_definitions, clippy::missing_safety_doc)]
            pub unsafe fn $scan(data: *mut $ty, shift: i32, n: i32) {
                scan_per_block::<$ty>(data, shift as usize, n as usize)
            }

            #[kernel]
            #[allow(improper_ctypes_definitions, clippy::missing_safety_doc)]
            pub unsafe fn $add(data: *mut $ty, shift: i32, n: i32) {
                add_value_from_prev_block::<$ty>(data, shift as usize, n as usize)
            }
        )*
    };
}

scan_kernels! {
    i32 => scan_per_block_i32, add_value_from_prev_block_i32;
    u32 => scan_per_block_u32, add_value_from_prev_block_u32;
    i64 => scan_per_block_i64, add_value_from_prev_block_i64;
    u64 => scan_per_block_u64, add_value_from_prev_block_u64;
    f32 => scan_per_block_f32, add_value_from_prev_block_f32;
    f64 => scan_per_block_f64, add_value_from_prev_block_f64;
}
