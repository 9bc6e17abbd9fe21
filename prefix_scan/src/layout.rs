//! Placement of every recursion level inside one shared scan buffer.
//!
//! Level 0 occupies `[0, n)`. Its block totals start right after it, at
//! `shift_1 = n`, and become the window of level 1, whose totals start at
//! `shift_2 = shift_1 + len_1`, and so on until a level of length 1.

use crate::error::{Result, ScanError};

/// Rounds `n` up to the next multiple of `block_size`.
pub fn upper_n(n: usize, block_size: usize) -> usize {
    div_ceil(n, block_size) * block_size
}

pub fn div_ceil(numerator: usize, denominator: usize) -> usize {
    (numerator + denominator - 1) / denominator
}

/// One recursion level: the window `[shift, shift + len)` of the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub shift: usize,
    pub len: usize,
}

impl Frame {
    /// Where this level writes its block totals, which is also the next
    /// level's shift.
    pub fn totals_shift(&self) -> usize {
        self.shift + self.len
    }

    pub fn n_blocks(&self, block_size: usize) -> usize {
        div_ceil(self.len, block_size)
    }

    /// A single element is already its own prefix sum.
    pub fn is_base(&self) -> bool {
        self.len == 1
    }

    pub fn end(&self) -> usize {
        self.shift + self.len
    }
}

/// The recursion frames of one scan, outermost first, ending with the
/// length-1 base frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanLayout {
    block_size: usize,
    len: usize,
    frames: Vec<Frame>,
    buffer_len: usize,
}

impl ScanLayout {
    /// Lays out a scan of `len` elements in blocks of `block_size`.
    ///
    /// A block size of 1 never shrinks a level, so blocks of 2 are used
    /// instead; the result of the scan is the same.
    pub fn new(len: usize, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(ScanError::InvalidBlockSize(block_size));
        }
        if len == 0 {
            return Err(ScanError::EmptyInput);
        }
        let block_size = block_size.max(2);

        let mut frames = vec![];
        let mut frame = Frame { shift: 0, len };
        while !frame.is_base() {
            frames.push(frame);
            let shift = frame
                .shift
                .checked_add(frame.len)
                .ok_or(ScanError::LengthOverflow(len))?;
            frame = Frame {
                shift,
                len: frame.n_blocks(block_size),
            };
        }
        frames.push(frame);

        // Twice the padded length covers the common case. Rounding up at every
        // level can push the last window past it (10, 5, 3, 2, 1 with blocks
        // of 2), so the allocation always reaches the end of the last frame.
        let doubled = len
            .checked_add(block_size - 1)
            .map(|_| upper_n(len, block_size))
            .and_then(|padded| padded.checked_mul(2))
            .ok_or(ScanError::LengthOverflow(len))?;
        let buffer_len = doubled.max(frame.end());

        // Kernels take the shift and the length as 32-bit integers.
        if buffer_len > i32::MAX as usize {
            return Err(ScanError::LengthOverflow(len));
        }

        Ok(Self {
            block_size,
            len,
            frames,
            buffer_len,
        })
    }

    /// The block size the kernels are launched with.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Logical length of the array being scanned.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    /// All frames including the base frame.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Frames that dispatch work, outermost first.
    pub fn levels(&self) -> &[Frame] {
        &self.frames[..self.frames.len() - 1]
    }

    pub fn depth(&self) -> usize {
        self.levels().len()
    }
}

#[cfg(test)]
mod tests {
    use super::{upper_n, Frame, ScanLayout};
    use crate::error::ScanError;
    use itertools::Itertools;

    #[test]
    fn rounds_up_to_block_multiples() {
        assert_eq!(upper_n(1, 4), 4);
        assert_eq!(upper_n(8, 4), 8);
        assert_eq!(upper_n(31, 9), 36);
    }

    #[test]
    fn frames_are_contiguous_and_disjoint() {
        for len in [1, 2, 5, 10, 31, 1000, 1023, 4097] {
            for block_size in [1, 2, 3, 4, 9, 16, 1024] {
                let layout = ScanLayout::new(len, block_size).unwrap();
                for (a, b) in layout.frames().iter().tuple_windows() {
                    assert_eq!(a.totals_shift(), b.shift);
                    assert!(a.end() <= b.shift, "{:?} overlaps {:?}", a, b);
                    assert!(b.len < a.len);
                }
                let last = layout.frames().last().unwrap();
                assert!(last.is_base());
                assert!(last.end() <= layout.buffer_len());
            }
        }
    }

    #[test]
    fn buffer_grows_past_double_when_levels_round_up() {
        let layout = ScanLayout::new(10, 2).unwrap();
        let lens = layout.frames().iter().map(|f| f.len).collect_vec();
        assert_eq!(lens, vec![10, 5, 3, 2, 1]);
        assert_eq!(layout.buffer_len(), 21);
    }

    #[test]
    fn buffer_is_at_least_double_the_padded_length() {
        let layout = ScanLayout::new(31, 9).unwrap();
        assert_eq!(layout.buffer_len(), 72);
    }

    #[test]
    fn deep_layout_for_small_blocks() {
        let layout = ScanLayout::new(1023, 4).unwrap();
        let lens = layout.levels().iter().map(|f| f.len).collect_vec();
        assert_eq!(lens, vec![1023, 256, 64, 16, 4]);
        assert_eq!(layout.depth(), 5);
        assert_eq!(layout.frames()[1], Frame { shift: 1023, len: 256 });
    }

    #[test]
    fn singleton_has_no_levels() {
        let layout = ScanLayout::new(1, 4).unwrap();
        assert_eq!(layout.depth(), 0);
        assert_eq!(layout.frames(), &[Frame { shift: 0, len: 1 }]);
    }

    #[test]
    fn unit_blocks_terminate() {
        let layout = ScanLayout::new(7, 1).unwrap();
        assert_eq!(layout.block_size(), 2);
        assert_eq!(layout.depth(), 3);
    }

    #[test]
    fn rejects_bad_configuration() {
        assert!(matches!(ScanLayout::new(4, 0), Err(ScanError::InvalidBlockSize(0))));
        assert!(matches!(ScanLayout::new(0, 4), Err(ScanError::EmptyInput)));
        assert!(matches!(
            ScanLayout::new(usize::MAX / 2, 4),
            Err(ScanError::LengthOverflow(_))
        ));
    }
}
