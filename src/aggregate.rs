use crate::errors::AggregateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    SumOfSquares,
    Average,
    Maximum,
}

/// Apply `op` to `values`. An empty sequence has no result; a missing one is an error.
pub fn aggregate(values: Option<&[i64]>, op: Aggregation) -> Result<Option<f64>, AggregateError> {
    let values = values.ok_or(AggregateError::MissingInput)?;
    if values.is_empty() {
        return Ok(None);
    }

    let result = match op {
        Aggregation::SumOfSquares => {
            values.iter().map(|&v| i128::from(v) * i128::from(v)).sum::<i128>() as f64
        }
        Aggregation::Average => {
            values.iter().map(|&v| i128::from(v)).sum::<i128>() as f64 / values.len() as f64
        }
        Aggregation::Maximum => return Ok(values.iter().max().map(|&max| max as f64)),
    };
    Ok(Some(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_each_operation() {
        let v: [i64; 4] = [1, 2, 3, 4];
        assert_eq!(aggregate(Some(&v), Aggregation::SumOfSquares), Ok(Some(30.0)));
        assert_eq!(aggregate(Some(&v), Aggregation::Average), Ok(Some(2.5)));
        assert_eq!(aggregate(Some(&v), Aggregation::Maximum), Ok(Some(4.0)));
    }

    #[test]
    fn empty_is_absent_and_missing_is_error() {
        assert_eq!(aggregate(Some(&[] as &[i64]), Aggregation::Average), Ok(None));
        assert_eq!(aggregate(None, Aggregation::Maximum), Err(AggregateError::MissingInput));
    }

    #[test]
    fn sum_of_squares_does_not_overflow() {
        let v: [i64; 2] = [i64::MAX, i64::MAX];
        let expected = 2.0 * (i64::MAX as f64) * (i64::MAX as f64);
        let got = aggregate(Some(&v), Aggregation::SumOfSquares).unwrap().unwrap();
        assert!((got - expected).abs() / expected < 1e-9);
    }
}
