//! Sequential host references for checking device results.

use crate::element::Summable;
use thiserror::Error;

/// How a device result diverged from the host reference.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError<T: Summable> {
    #[error("expected {expected} elements, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("mismatch at index {index}: expected {expected}, got {actual}")]
    Mismatch { index: usize, expected: T, actual: T },
}

/// Inclusive scan.
pub fn cpu_scan<T: Summable>(xs: &[T]) -> Vec<T> {
    let mut ys = Vec::with_capacity(xs.len());
    let mut accumulator = T::ZERO;
    for &x in xs {
        accumulator = accumulator.sum(x);
        ys.push(accumulator);
    }
    ys
}

/// Compares `output` against the inclusive scan of `input`, reporting the
/// first index where they diverge.
pub fn check_scan<T: Summable>(input: &[T], output: &[T]) -> Result<(), ValidationError<T>> {
    check_against(&cpu_scan(input), output)
}

/// Masked convolution of the `n` x `n` matrix `input` with the `m` x `m`
/// `mask`, computed one output element at a time. Fails with
/// `ValidationError::Length` when either slice is shorter than its side
/// implies.
pub fn cpu_matrix_conv<T: Summable>(
    input: &[T],
    mask: &[T],
    n: usize,
    m: usize,
) -> Result<Vec<T>, ValidationError<T>> {
    check_min_len(input, n.saturating_mul(n))?;
    check_min_len(mask, m.saturating_mul(m))?;

    let n = n as isize;
    let m = m as isize;
    let is_index_valid = |row: isize, col: isize| 0 <= row && row < n && 0 <= col && col < n;

    let mut output = Vec::with_capacity((n * n) as usize);
    for row in 0..n {
        for col in 0..n {
            let mut acc = T::ZERO;
            for mask_i in 0..m {
                for mask_j in 0..m {
                    let input_row = row + mask_i - m / 2;
                    let input_col = col + mask_j - m / 2;
                    if is_index_valid(input_row, input_col) {
                        let x = input[(input_row * n + input_col) as usize];
                        let w = mask[(mask_i * m + mask_j) as usize];
                        acc = acc.sum(x.product(w));
                    }
                }
            }
            output.push(acc);
        }
    }
    Ok(output)
}

pub fn check_matrix_conv<T: Summable>(
    input: &[T],
    mask: &[T],
    output: &[T],
    n: usize,
    m: usize,
) -> Result<(), ValidationError<T>> {
    check_against(&cpu_matrix_conv(input, mask, n, m)?, output)
}

fn check_min_len<T: Summable>(values: &[T], needed: usize) -> Result<(), ValidationError<T>> {
    if values.len() < needed {
        return Err(ValidationError::Length {
            expected: needed,
            actual: values.len(),
        });
    }
    Ok(())
}

fn check_against<T: Summable>(expected: &[T], actual: &[T]) -> Result<(), ValidationError<T>> {
    if expected.len() != actual.len() {
        return Err(ValidationError::Length {
            expected: expected.len(),
            actual: actual.len(),
        });
    }
    match expected
        .iter()
        .zip(actual)
        .position(|(&e, &a)| !e.approx_eq(a))
    {
        Some(index) => Err(ValidationError::Mismatch {
            index,
            expected: expected[index],
            actual: actual[index],
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_scan() {
        assert_eq!(cpu_scan(&[1, 2, 3, 4, 5]), vec![1, 3, 6, 10, 15]);
        assert_eq!(cpu_scan::<i32>(&[]), Vec::<i32>::new());
        assert_eq!(cpu_scan(&[u32::MAX, 1]), vec![u32::MAX, 0]);
    }

    #[test]
    fn reports_first_divergence() {
        let input = [1, 1, 1, 1];
        assert_eq!(check_scan(&input, &[1, 2, 3, 4]), Ok(()));
        assert_eq!(
            check_scan(&input, &[1, 2, 4, 5]),
            Err(ValidationError::Mismatch {
                index: 2,
                expected: 3,
                actual: 4
            })
        );
        assert_eq!(
            check_scan(&input, &[1, 2, 3]),
            Err(ValidationError::Length {
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn float_check_is_tolerant() {
        let input = [0.5f64, 0.25];
        assert!(check_scan(&input, &[0.5, 0.75 + 1e-10]).is_ok());
        assert!(check_scan(&input, &[0.5, 0.75 + 1e-6]).is_err());
    }

    #[test]
    fn mismatch_message_names_the_index() {
        let err = check_scan(&[1, 1], &[1, 3]).unwrap_err();
        assert_eq!(err.to_string(), "mismatch at index 1: expected 2, got 3");
    }

    #[test]
    fn conv_skips_taps_outside_the_matrix() {
        // 3x3 of ones with a 3x3 mask of ones counts in-range neighbours.
        let output = cpu_matrix_conv(&[1; 9], &[1; 9], 3, 3).unwrap();
        assert_eq!(output, vec![4, 6, 4, 6, 9, 6, 4, 6, 4]);
    }

    #[test]
    fn conv_with_unit_mask_is_identity() {
        let input = (0..16).collect::<Vec<i32>>();
        assert_eq!(cpu_matrix_conv(&input, &[1], 4, 1).unwrap(), input);
    }

    #[test]
    fn conv_reports_short_slices() {
        assert_eq!(
            cpu_matrix_conv(&[1; 3], &[1], 2, 1),
            Err(ValidationError::Length {
                expected: 4,
                actual: 3
            })
        );
        assert_eq!(
            check_matrix_conv(&[1; 4], &[1; 8], &[0; 4], 2, 3),
            Err(ValidationError::Length {
                expected: 9,
                actual: 8
            })
        );
    }
}
