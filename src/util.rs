use crate::units::{Length, LengthUnit};

/// Arithmetic mean of `lengths`, expressed in `unit`
pub fn mean(lengths: &[Length], unit: LengthUnit) -> Option<Length> {
    if lengths.is_empty() {
        return None;
    }
    let sum: f64 = lengths.iter().map(|l| l.to(unit).value).sum();
    Some(Length::new(sum / lengths.len() as f64, unit))
}

/// Population standard deviation of `lengths`, expressed in `unit`
pub fn std_dev(lengths: &[Length], unit: LengthUnit) -> Option<Length> {
    let center = mean(lengths, unit)?.value;
    let variance = lengths
        .iter()
        .map(|l| (l.to(unit).value - center).powi(2))
        .sum::<f64>()
        / lengths.len() as f64;
    Some(Length::new(variance.sqrt(), unit))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meters(values: &[f64]) -> Vec<Length> {
        values.iter().map(|&v| Length::meters(v)).collect()
    }

    #[test]
    fn test_mean() {
        assert_eq!(
            mean(&meters(&[10., 20., 30., 15., 22.]), LengthUnit::Meters),
            Some(Length::meters(19.4))
        );
        assert_eq!(mean(&[], LengthUnit::Meters), None);
    }

    #[test]
    fn test_mean_converts_to_requested_unit() {
        let lengths = vec![Length::yards(10.0), Length::meters(9.144)];
        let m = mean(&lengths, LengthUnit::Yards).unwrap();
        assert_eq!(m.unit, LengthUnit::Yards);
        assert!((m.value - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_std_dev() {
        assert_eq!(std_dev(&meters(&[4., 6.]), LengthUnit::Meters), Some(Length::meters(1.0)));
        let sd = std_dev(&meters(&[15., 7., 55.]), LengthUnit::Meters).unwrap();
        assert!((sd.value - 20.997354330698162).abs() < 1e-9);
        assert_eq!(std_dev(&meters(&[5., 5., 5.]), LengthUnit::Meters), Some(Length::meters(0.0)));
        assert_eq!(std_dev(&[], LengthUnit::Meters), None);
    }
}
