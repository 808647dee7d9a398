//! 17.14 fixed-point arithmetic.
//!
//! The kernel does not use floating point, yet the MLFQS formulas are about
//! fractions. A [`FixedPoint`] stores a real number `x` as the integer
//! `x * 2^14` in an `i32`: 17 bits of integer part (sign included) and 14
//! bits of fraction.
//!
//! Mixed operations with plain integers are provided by the `i32` operator
//! impls, e.g. `fp * 2` or `fp + 1`.
use core::ops::{Add, Div, Mul, Sub};

const FRACTION_BITS: u32 = 14;
const F: i32 = 1 << FRACTION_BITS;

/// A signed 17.14 fixed-point number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct FixedPoint(i32);

impl FixedPoint {
    /// Zero.
    pub const ZERO: FixedPoint = FixedPoint(0);

    /// Converts an integer.
    pub const fn from_int(n: i32) -> Self {
        Self(n * F)
    }

    /// Builds the fraction `numerator / denominator`.
    pub const fn ratio(numerator: i32, denominator: i32) -> Self {
        Self(((numerator as i64 * F as i64) / denominator as i64) as i32)
    }

    /// Converts to an integer, rounding toward zero.
    pub const fn trunc(self) -> i32 {
        self.0 / F
    }

    /// Converts to an integer, rounding to nearest.
    pub const fn round(self) -> i32 {
        if self.0 >= 0 {
            (self.0 + F / 2) / F
        } else {
            (self.0 - F / 2) / F
        }
    }

    /// The raw representation.
    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl Add for FixedPoint {
    type Output = FixedPoint;

    fn add(self, rhs: FixedPoint) -> FixedPoint {
        FixedPoint(self.0 + rhs.0)
    }
}

impl Add<i32> for FixedPoint {
    type Output = FixedPoint;

    fn add(self, rhs: i32) -> FixedPoint {
        FixedPoint(self.0 + rhs * F)
    }
}

impl Sub for FixedPoint {
    type Output = FixedPoint;

    fn sub(self, rhs: FixedPoint) -> FixedPoint {
        FixedPoint(self.0 - rhs.0)
    }
}

impl Sub<i32> for FixedPoint {
    type Output = FixedPoint;

    fn sub(self, rhs: i32) -> FixedPoint {
        FixedPoint(self.0 - rhs * F)
    }
}

impl Mul for FixedPoint {
    type Output = FixedPoint;

    fn mul(self, rhs: FixedPoint) -> FixedPoint {
        FixedPoint(((self.0 as i64 * rhs.0 as i64) / F as i64) as i32)
    }
}

impl Mul<i32> for FixedPoint {
    type Output = FixedPoint;

    fn mul(self, rhs: i32) -> FixedPoint {
        FixedPoint(self.0 * rhs)
    }
}

impl Div for FixedPoint {
    type Output = FixedPoint;

    fn div(self, rhs: FixedPoint) -> FixedPoint {
        FixedPoint(((self.0 as i64 * F as i64) / rhs.0 as i64) as i32)
    }
}

impl Div<i32> for FixedPoint {
    type Output = FixedPoint;

    fn div(self, rhs: i32) -> FixedPoint {
        FixedPoint(self.0 / rhs)
    }
}
