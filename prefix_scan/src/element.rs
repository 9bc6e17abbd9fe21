use std::fmt::{Debug, Display};

/// Tolerance used when comparing floating point scans against the host
/// reference.
pub const FLOAT_TOLERANCE: f64 = 1e-8;

#[cfg(feature = "cuda")]
pub trait DeviceRepr: cust::memory::DeviceCopy {}
#[cfg(feature = "cuda")]
impl<T: cust::memory::DeviceCopy> DeviceRepr for T {}

#[cfg(not(feature = "cuda"))]
pub trait DeviceRepr {}
#[cfg(not(feature = "cuda"))]
impl<T> DeviceRepr for T {}

/// A numeric type with an associative `+` and an additive identity.
///
/// Sums use the type's native arithmetic: fixed-width integers wrap on
/// overflow and floats round as IEEE 754 does. Nothing saturates or traps.
pub trait Summable:
    Copy + Send + Sync + PartialEq + Debug + Display + DeviceRepr + 'static
{
    const ZERO: Self;

    /// Suffix of the per-type device kernel symbols, e.g. `scan_per_block_i32`.
    const TYPE_NAME: &'static str;

    fn sum(self, rhs: Self) -> Self;

    /// Multiplication with the same overflow rules as `sum`. Only the
    /// convolution stencil uses it.
    fn product(self, rhs: Self) -> Self;

    /// Exact equality for integers, `FLOAT_TOLERANCE` absolute error for floats.
    fn approx_eq(self, other: Self) -> bool;
}

macro_rules! integer_summable {
    ($($ty:ty),*) => {
        $(
            impl Summable for $ty {
                const ZERO: Self = 0;
                const TYPE_NAME: &'static str = stringify!($ty);

                #[inline]
                fn sum(self, rhs: Self) -> Self {
                    self.wrapping_add(rhs)
                }

                #[inline]
                fn product(self, rhs: Self) -> Self {
                    self.wrapping_mul(rhs)
                }

                fn approx_eq(self, other: Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

macro_rules! float_summable {
    ($($ty:ty),*) => {
        $(
            impl Summable for $ty {
                const ZERO: Self = 0.0;
                const TYPE_NAME: &'static str = stringify!($ty);

                #[inline]
                fn sum(self, rhs: Self) -> Self {
                    self + rhs
                }

                #[inline]
                fn product(self, rhs: Self) -> Self {
                    self * rhs
                }

                fn approx_eq(self, other: Self) -> bool {
                    ((self as f64) - (other as f64)).abs() <= FLOAT_TOLERANCE
                }
            }
        )*
    };
}

integer_summable!(i32, u32, i64, u64);
float_summable!(f32, f64);

#[cfg(test)]
mod tests {
    use super::Summable;

    #[test]
    fn integer_sum_wraps() {
        assert_eq!(i32::MAX.sum(1), i32::MIN);
        assert_eq!(u32::MAX.sum(2), 1);
    }

    #[test]
    fn float_comparison_uses_absolute_tolerance() {
        assert!(1.0f64.approx_eq(1.0 + 1e-9));
        assert!(!1.0f64.approx_eq(1.0 + 1e-7));
        assert!(!3i32.approx_eq(4));
    }

    #[test]
    fn type_names_select_kernel_symbols() {
        assert_eq!(<i32 as Summable>::TYPE_NAME, "i32");
        assert_eq!(<f64 as Summable>::TYPE_NAME, "f64");
    }
}
