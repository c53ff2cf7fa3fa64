//! Non-negative numeric quantities carried by event payloads.

use std::fmt;

/// Upper bound on monetary amounts, in pounds.
const MAX_POUNDS: f64 = 1.0e12;
/// Upper bound on hour-denominated durations (about 114 years).
const MAX_HOURS: f64 = 1.0e6;

/// Rejections for numeric payload fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityError {
    /// NaN or infinite input.
    NotFinite,
    /// Negative input where only non-negative values make sense.
    Negative,
    /// Implausibly large input.
    TooLarge,
}

impl fmt::Display for QuantityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFinite => write!(f, "value must be a finite number"),
            Self::Negative => write!(f, "value must not be negative"),
            Self::TooLarge => write!(f, "value is out of range"),
        }
    }
}

impl std::error::Error for QuantityError {}

fn check(value: f64, max: f64) -> Result<f64, QuantityError> {
    if !value.is_finite() {
        return Err(QuantityError::NotFinite);
    }
    if value < 0.0 {
        return Err(QuantityError::Negative);
    }
    if value > max {
        return Err(QuantityError::TooLarge);
    }
    Ok(value)
}

/// Sterling amount stored in whole pence.
///
/// Fractional pence are rounded half away from zero on construction, so every
/// `Money` renders and re-parses to itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money {
    pence: u64,
}

impl Money {
    /// Build from a pound-denominated amount.
    ///
    /// # Examples
    /// ```
    /// use lease_notifier::domain::Money;
    ///
    /// assert_eq!(Money::from_pounds(37.5).expect("valid").pence(), 3750);
    /// assert!(Money::from_pounds(-1.0).is_err());
    /// ```
    pub fn from_pounds(pounds: f64) -> Result<Self, QuantityError> {
        let pounds = check(pounds, MAX_POUNDS)?;
        let pence = (pounds * 100.0).round();
        // Bounded by MAX_POUNDS above, so the cast cannot truncate.
        Ok(Self {
            pence: pence as u64,
        })
    }

    /// Build from whole pence.
    pub const fn from_pence(pence: u64) -> Self {
        Self { pence }
    }

    /// Amount in whole pence.
    pub const fn pence(self) -> u64 {
        self.pence
    }
}

/// Percentage of a budget or duration consumed. May exceed 100.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Percentage(f64);

impl Percentage {
    /// Validate a non-negative, finite percentage.
    pub fn new(value: f64) -> Result<Self, QuantityError> {
        check(value, MAX_POUNDS).map(Self)
    }

    /// Raw value.
    pub fn value(self) -> f64 {
        self.0
    }
}

/// Duration expressed in (possibly fractional) hours.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Hours(f64);

impl Hours {
    /// Validate a non-negative, finite duration.
    pub fn new(value: f64) -> Result<Self, QuantityError> {
        check(value, MAX_HOURS).map(Self)
    }

    /// Raw value.
    pub fn value(self) -> f64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.0, 0)]
    #[case(0.004, 0)]
    #[case(0.005, 1)]
    #[case(37.5, 3750)]
    #[case(1234.567, 123_457)]
    fn rounds_to_whole_pence(#[case] pounds: f64, #[case] pence: u64) {
        assert_eq!(Money::from_pounds(pounds).expect("valid amount").pence(), pence);
    }

    #[rstest]
    #[case(f64::NAN, QuantityError::NotFinite)]
    #[case(f64::INFINITY, QuantityError::NotFinite)]
    #[case(-0.01, QuantityError::Negative)]
    #[case(1.0e13, QuantityError::TooLarge)]
    fn rejects_invalid_amounts(#[case] pounds: f64, #[case] expected: QuantityError) {
        assert_eq!(Money::from_pounds(pounds), Err(expected));
    }

    #[test]
    fn percentages_and_hours_must_be_non_negative() {
        assert!(Percentage::new(120.0).is_ok());
        assert!(Percentage::new(-5.0).is_err());
        assert!(Hours::new(0.0).is_ok());
        assert!(Hours::new(-1.0).is_err());
    }
}
