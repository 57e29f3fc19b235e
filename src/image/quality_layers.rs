use std::fmt::{Display, Formatter};
use std::str::FromStr;
use crate::error::JpipError;

/// A number of quality layers, or 'all of them'. `Unbounded` compares greater than any bounded
///  number.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum QualityLayers {
    Bounded(u32),
    Unbounded,
}
impl QualityLayers {
    pub fn is_met_by(&self, reached: QualityLayers) -> bool {
        *self <= reached
    }
}

impl Display for QualityLayers {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityLayers::Bounded(n) => write!(f, "{}", n),
            QualityLayers::Unbounded => write!(f, "max"),
        }
    }
}

/// Parses a positive number or `max`
impl FromStr for QualityLayers {
    type Err = JpipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "max" {
            return Ok(QualityLayers::Unbounded);
        }
        match s.parse::<u32>() {
            Ok(n) if n > 0 => Ok(QualityLayers::Bounded(n)),
            _ => Err(JpipError::invalid_argument("quality_layers", format!("'{}' is neither a positive number nor 'max'", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use super::QualityLayers::*;

    #[rstest]
    #[case::bounded(Bounded(1), Bounded(2), true)]
    #[case::equal(Bounded(2), Bounded(2), true)]
    #[case::greater(Bounded(3), Bounded(2), false)]
    #[case::unbounded_greater_than_bounded(Bounded(2), Unbounded, true)]
    #[case::unbounded_greater_than_large(Bounded(u32::MAX), Unbounded, true)]
    #[case::both_unbounded(Unbounded, Unbounded, true)]
    #[case::bounded_reached(Unbounded, Bounded(u32::MAX), false)]
    fn test_is_met_by(#[case] required: QualityLayers, #[case] reached: QualityLayers, #[case] expected: bool) {
        assert_eq!(required.is_met_by(reached), expected);
        assert_eq!(required <= reached, expected);
    }

    #[rstest]
    #[case::number("3", Some(Bounded(3)))]
    #[case::max("max", Some(Unbounded))]
    #[case::zero("0", None)]
    #[case::negative("-1", None)]
    #[case::fraction("1.5", None)]
    #[case::text("all", None)]
    fn test_from_str(#[case] s: &str, #[case] expected: Option<QualityLayers>) {
        assert_eq!(s.parse::<QualityLayers>().ok(), expected);
    }

    #[rstest]
    #[case(Bounded(5), "5")]
    #[case(Unbounded, "max")]
    fn test_display(#[case] quality: QualityLayers, #[case] expected: &str) {
        assert_eq!(quality.to_string(), expected);
    }
}
