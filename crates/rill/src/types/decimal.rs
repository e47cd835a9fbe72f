//! Arbitrary-precision decimal arithmetic.
//!
//! A decimal is a coefficient and a power-of-ten exponent:
//! `value = coefficient * 10^exponent`. Trailing zeros from literals are
//! preserved (`1.50` stays `1.50`); division carries sixteen fractional
//! digits and strips trailing zeros from the result.

use std::{cmp::Ordering, fmt};

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

/// A decimal number.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub(crate) struct Decimal {
    coefficient: BigInt,
    exponent: i32,
}

/// Fractional digits carried by division before trailing zeros are stripped.
const DIVISION_PRECISION: u32 = 16;

impl Decimal {
    pub fn new(coefficient: BigInt, exponent: i32) -> Self {
        Self { coefficient, exponent }
    }

    /// Parses `[+-]digits[.digits][(e|E)[+-]digits]`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (mantissa, exp_part) = match s.find(['e', 'E']) {
            Some(i) => (&s[..i], Some(&s[i + 1..])),
            None => (s, None),
        };
        let explicit_exp: i32 = match exp_part {
            Some(e) => e.parse().ok()?,
            None => 0,
        };

        let (sign, digits) = match mantissa.strip_prefix('-') {
            Some(rest) => (-1, rest),
            None => (1, mantissa.strip_prefix('+').unwrap_or(mantissa)),
        };
        if digits.is_empty() {
            return None;
        }

        let (int_part, frac_part) = match digits.find('.') {
            Some(i) => (&digits[..i], &digits[i + 1..]),
            None => (digits, ""),
        };
        if int_part.chars().chain(frac_part.chars()).any(|c| !c.is_ascii_digit()) {
            return None;
        }
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }

        let all_digits = format!("{int_part}{frac_part}");
        let coefficient = all_digits.parse::<BigInt>().ok()? * sign;
        let exponent = explicit_exp.checked_sub(i32::try_from(frac_part.len()).ok()?)?;
        Some(Self { coefficient, exponent })
    }

    pub fn from_i64(v: i64) -> Self {
        Self::new(BigInt::from(v), 0)
    }

    pub fn from_u64(v: u64) -> Self {
        Self::new(BigInt::from(v), 0)
    }

    /// Converts through the shortest float rendering, so `decimal(1.5)` is
    /// exactly `1.5`.
    pub fn from_f64(v: f64) -> Option<Self> {
        if !v.is_finite() {
            return None;
        }
        let mut buf = ryu::Buffer::new();
        Self::parse(buf.format(v))
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.coefficient.is_zero()
    }

    pub fn to_f64(&self) -> Option<f64> {
        let c = self.coefficient.to_f64()?;
        Some(c * 10f64.powi(self.exponent))
    }

    /// Rescales both operands to a common exponent.
    fn aligned(&self, other: &Self) -> (BigInt, BigInt, i32) {
        let exp = self.exponent.min(other.exponent);
        let a = &self.coefficient * pow10(u32::try_from(self.exponent - exp).unwrap_or(0));
        let b = &other.coefficient * pow10(u32::try_from(other.exponent - exp).unwrap_or(0));
        (a, b, exp)
    }

    pub fn add(&self, other: &Self) -> Self {
        let (a, b, exp) = self.aligned(other);
        Self::new(a + b, exp)
    }

    pub fn sub(&self, other: &Self) -> Self {
        let (a, b, exp) = self.aligned(other);
        Self::new(a - b, exp)
    }

    pub fn mul(&self, other: &Self) -> Self {
        Self::new(
            &self.coefficient * &other.coefficient,
            self.exponent.saturating_add(other.exponent),
        )
    }

    /// Division with [`DIVISION_PRECISION`] fractional digits, trailing
    /// zeros stripped. The caller must reject a zero divisor.
    pub fn div(&self, other: &Self) -> Self {
        debug_assert!(!other.is_zero(), "division by zero must be rejected by the caller");
        let precision = i32::try_from(DIVISION_PRECISION).unwrap_or(i32::MAX);
        let shift = i64::from(self.exponent) - i64::from(other.exponent) + i64::from(precision);
        let quotient = if shift >= 0 {
            (&self.coefficient * pow10(u32::try_from(shift).unwrap_or(u32::MAX))) / &other.coefficient
        } else {
            &self.coefficient / (&other.coefficient * pow10(u32::try_from(-shift).unwrap_or(u32::MAX)))
        };
        let mut result = Self::new(quotient, -precision);
        result.strip_trailing_zeros();
        result
    }

    /// Remainder with the dividend's sign.
    pub fn rem(&self, other: &Self) -> Self {
        debug_assert!(!other.is_zero(), "division by zero must be rejected by the caller");
        let (a, b, exp) = self.aligned(other);
        Self::new(a % b, exp)
    }

    pub fn neg(&self) -> Self {
        Self::new(-&self.coefficient, self.exponent)
    }

    fn strip_trailing_zeros(&mut self) {
        let ten = BigInt::from(10);
        while self.exponent < 0 && !self.coefficient.is_zero() && (&self.coefficient % &ten).is_zero() {
            self.coefficient /= &ten;
            self.exponent += 1;
        }
    }

    pub fn compare(&self, other: &Self) -> Ordering {
        let (a, b, _) = self.aligned(other);
        a.cmp(&b)
    }
}

fn pow10(n: u32) -> BigInt {
    BigInt::from(10).pow(n)
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl fmt::Display for Decimal {
    /// Canonical plain rendering, never scientific.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.coefficient.magnitude().to_string();
        let sign = if self.coefficient.is_negative() { "-" } else { "" };
        if self.exponent >= 0 {
            let zeros = "0".repeat(usize::try_from(self.exponent).unwrap_or(0));
            return write!(f, "{sign}{digits}{zeros}");
        }
        let frac_len = usize::try_from(-i64::from(self.exponent)).unwrap_or(usize::MAX);
        if frac_len >= digits.len() {
            let pad = "0".repeat(frac_len - digits.len());
            write!(f, "{sign}0.{pad}{digits}")
        } else {
            let split = digits.len() - frac_len;
            write!(f, "{sign}{}.{}", &digits[..split], &digits[split..])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::parse(s).unwrap()
    }

    #[test]
    fn test_parse_and_render() {
        assert_eq!(dec("1.50").to_string(), "1.50");
        assert_eq!(dec("-0.05").to_string(), "-0.05");
        assert_eq!(dec("3").to_string(), "3");
        assert_eq!(dec("1e3").to_string(), "1000");
        assert_eq!(dec("1.5e-2").to_string(), "0.015");
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(dec("1.5").add(&dec("2.25")).to_string(), "3.75");
        assert_eq!(dec("1").sub(&dec("0.1")).to_string(), "0.9");
        assert_eq!(dec("1.5").mul(&dec("2")).to_string(), "3.0");
        assert_eq!(dec("1").div(&dec("8")).to_string(), "0.125");
        assert_eq!(dec("7").rem(&dec("3")).to_string(), "1");
        assert_eq!(dec("-7").rem(&dec("3")).to_string(), "-1");
    }

    #[test]
    fn test_compare_ignores_scale() {
        assert_eq!(dec("1.50"), dec("1.5"));
        assert!(dec("1.4") < dec("1.5"));
    }

    #[test]
    fn test_from_f64_is_shortest() {
        assert_eq!(Decimal::from_f64(1.5).unwrap().to_string(), "1.5");
        assert!(Decimal::from_f64(f64::NAN).is_none());
    }
}
