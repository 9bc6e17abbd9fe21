/// An element type the scan kernels can accumulate.
///
/// Integer sums wrap on overflow so that device results match the host
/// reference bit for bit.
pub trait Summand: Copy {
    const ZERO: Self;

    fn sum(self, rhs: Self) -> Self;

    fn product(self, rhs: Self) -> Self;
}

macro_rules! wrapping_summand {
    ($($ty:ty),*) => {
        $(
            impl Summand for $ty {
                const ZERO: Self = 0;

                #[inline(always)]
                fn sum(self, rhs: Self) -> Self {
                    self.wrapping_add(rhs)
                }

                #[inline(always)]
                fn product(self, rhs: Self) -> Self {
                    self.wrapping_mul(rhs)
                }
            }
        )*
    };
}

macro_rules! float_summand {
    ($($ty:ty),*) => {
        $(
            impl Summand for $ty {
                const ZERO: Self = 0.0;

                #[inline(always)]
                fn sum(self, rhs: Self) -> Self {
                    self + rhs
                }

                #[inline(always)]
                fn product(self, rhs: Self) -> Self {
                    self * rhs
                }
            }
        )*
    };
}

wrapping_summand!(i32, u32, i64, u64);
float_summand!(f32, f64);
