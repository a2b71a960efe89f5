//! Exact monetary amounts.
//!
//! An [`Amount`] is an arbitrary-precision rational parsed from a decimal
//! literal, so `0.1 + 0.2` is exactly `0.3` and input/output sums compare
//! without rounding. On the wire an amount is a JSON number or a decimal
//! string; it always serializes back as a decimal string.

use num_bigint::{BigInt, BigUint};
use num_rational::BigRational;
use num_traits::{One, Signed, Zero};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub};
use std::str::FromStr;

use crate::error::NodeError;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Amount(BigRational);

impl Amount {
    pub fn zero() -> Amount {
        Amount(BigRational::zero())
    }

    pub fn from_u64(value: u64) -> Amount {
        Amount(BigRational::from_integer(BigInt::from(value)))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_negative()
    }

    /// The reduced (numerator, denominator) pair of this amount. This is the
    /// form committed into transaction ids.
    pub fn as_integer_ratio(&self) -> (BigInt, BigInt) {
        (self.0.numer().clone(), self.0.denom().clone())
    }
}

impl FromStr for Amount {
    type Err = NodeError;

    /// Parses a decimal literal (optional sign, optional fraction, optional
    /// exponent) into an exact rational.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || NodeError::bad_request(format!("invalid amount: {}", text));

        let (mantissa, exponent) = match text.find(['e', 'E']) {
            Some(at) => {
                let exponent: i64 = text[at + 1..].parse().map_err(|_| invalid())?;
                (&text[..at], exponent)
            }
            None => (text, 0),
        };

        let (mantissa, negative) = match mantissa.strip_prefix('-') {
            Some(rest) => (rest, true),
            None => (mantissa.strip_prefix('+').unwrap_or(mantissa), false),
        };

        let (integral, fraction) = match mantissa.find('.') {
            Some(at) => (&mantissa[..at], &mantissa[at + 1..]),
            None => (mantissa, ""),
        };
        if integral.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        let digits: String = [integral, fraction].concat();
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let mut numer: BigInt = digits.parse().map_err(|_| invalid())?;
        if negative {
            numer = -numer;
        }

        // Fraction digits and the exponent shift the decimal point; whatever
        // remains below the point becomes a power-of-ten denominator.
        let scale = fraction.len() as i64 - exponent;
        let rational = if scale > 0 {
            BigRational::new(numer, BigInt::from(10u32).pow(scale as u32))
        } else {
            BigRational::from_integer(numer * BigInt::from(10u32).pow((-scale) as u32))
        };
        Ok(Amount(rational))
    }
}

impl fmt::Display for Amount {
    /// Renders the exact decimal form. Amounts only ever originate from
    /// decimal literals, so the reduced denominator is of the form 2^a * 5^b
    /// and the expansion terminates.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_negative() {
            write!(f, "-")?;
        }
        let numer = self.0.numer().magnitude().clone();
        let denom = self.0.denom().magnitude().clone();

        let mut reduced = denom.clone();
        let (two, five) = (BigUint::from(2u32), BigUint::from(5u32));
        let mut twos = 0u32;
        while (&reduced % &two).is_zero() && !reduced.is_one() {
            reduced /= &two;
            twos += 1;
        }
        let mut fives = 0u32;
        while (&reduced % &five).is_zero() && !reduced.is_one() {
            reduced /= &five;
            fives += 1;
        }
        if !reduced.is_one() {
            // Unreachable for decimal-sourced amounts; keep the value exact.
            return write!(f, "{}/{}", numer, denom);
        }

        let scale = twos.max(fives);
        let scaled = numer * BigUint::from(10u32).pow(scale) / denom;
        let digits = scaled.to_string();
        if scale == 0 {
            return write!(f, "{}", digits);
        }
        let scale = scale as usize;
        if digits.len() <= scale {
            write!(f, "0.{}{}", "0".repeat(scale - digits.len()), digits)
        } else {
            let (whole, frac) = digits.split_at(digits.len() - scale);
            write!(f, "{}.{}", whole, frac)
        }
    }
}

impl Add for Amount {
    type Output = Amount;
    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl Sub for Amount {
    type Output = Amount;
    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0 - rhs.0)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::zero(), Add::add)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl Visitor<'_> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a decimal number or string")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Amount, E> {
                value.parse().map_err(de::Error::custom)
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Amount, E> {
                Ok(Amount::from_u64(value))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<Amount, E> {
                Ok(Amount(BigRational::from_integer(BigInt::from(value))))
            }

            fn visit_f64<E: de::Error>(self, value: f64) -> Result<Amount, E> {
                if !value.is_finite() {
                    return Err(de::Error::custom("non-finite amount"));
                }
                // The shortest round-trip rendering recovers the decimal
                // literal the peer wrote for any reasonable precision.
                value.to_string().parse().map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        for (input, rendered) in [
            ("50", "50"),
            ("20.5", "20.5"),
            ("0.125", "0.125"),
            ("-3.25", "-3.25"),
            ("1e2", "100"),
            ("2.5e-1", "0.25"),
            ("0", "0"),
        ] {
            let amount: Amount = input.parse().expect("Failed to parse amount");
            assert_eq!(amount.to_string(), rendered);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for input in ["", ".", "abc", "1.2.3", "1e", "0x10"] {
            assert!(input.parse::<Amount>().is_err(), "accepted {:?}", input);
        }
    }

    #[test]
    fn test_exact_arithmetic() {
        let a: Amount = "0.1".parse().unwrap();
        let b: Amount = "0.2".parse().unwrap();
        let c: Amount = "0.3".parse().unwrap();
        assert_eq!(a + b, c);

        let total: Amount = ["10.5", "20", "19.5"]
            .iter()
            .map(|s| s.parse::<Amount>().unwrap())
            .sum();
        assert_eq!(total, Amount::from_u64(50));
    }

    #[test]
    fn test_integer_ratio_is_reduced() {
        let amount: Amount = "20.5".parse().unwrap();
        let (numer, denom) = amount.as_integer_ratio();
        assert_eq!(numer, BigInt::from(41));
        assert_eq!(denom, BigInt::from(2));

        let (numer, denom) = Amount::from_u64(50).as_integer_ratio();
        assert_eq!(numer, BigInt::from(50));
        assert_eq!(denom, BigInt::from(1));
    }

    #[test]
    fn test_serde_accepts_numbers_and_strings() {
        let from_int: Amount = serde_json::from_str("50").unwrap();
        let from_float: Amount = serde_json::from_str("20.5").unwrap();
        let from_string: Amount = serde_json::from_str("\"20.5\"").unwrap();
        assert_eq!(from_int, Amount::from_u64(50));
        assert_eq!(from_float, from_string);

        assert_eq!(serde_json::to_string(&from_float).unwrap(), "\"20.5\"");
    }
}
