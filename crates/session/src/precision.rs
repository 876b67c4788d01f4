use crate::Error;

// 2^64 as a double. Anything that rounds to it has no u64 counterpart.
const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

/// Convert a counter value to a double, failing unless the conversion is
/// exact.
///
/// Doubles hold every integer up to 2^53 exactly. Above that, the conversion
/// is only accepted when the double converts back to the very same integer.
pub fn narrow_to_double(value: u64) -> Result<f64, Error> {
    let nearest = value as f64;
    if nearest >= TWO_POW_64 || nearest as u64 != value {
        return Err(Error::PrecisionLoss { value, nearest });
    }
    Ok(nearest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use rstest::rstest;

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(666)]
    #[case(u32::MAX as u64)]
    #[case((1 << 53) - 1)]
    #[case(1 << 53)]
    #[case(1 << 62)]
    #[case(1 << 63)]
    fn test_exact_values(#[case] value: u64) {
        let d = narrow_to_double(value).unwrap();
        assert_eq!(d as u64, value);
        assert_eq!(narrow_to_double(d as u64).unwrap(), d);
    }

    #[rstest]
    #[case((1 << 53) + 1)]
    #[case((1 << 62) - 1)]
    #[case(u64::MAX - 1)]
    #[case(u64::MAX)]
    fn test_lossy_values(#[case] value: u64) {
        let err = narrow_to_double(value).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PrecisionLoss);
        match err {
            Error::PrecisionLoss { value: v, .. } => assert_eq!(v, value),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_every_value_up_to_2_pow_53_sampled() {
        let mut value = 1u64;
        while value <= 1 << 53 {
            assert_eq!(narrow_to_double(value).unwrap(), value as f64);
            assert_eq!(narrow_to_double(value - 1).unwrap(), (value - 1) as f64);
            value = value * 3 + 1;
        }
    }
}
