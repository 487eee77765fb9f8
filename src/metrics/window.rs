use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WindowError {
    #[error("rolling window size must be at least one step")]
    ZeroWindow,

    #[error("signal of length {length} is shorter than the rolling window of {window}")]
    TooShort { length: usize, window: usize },

    #[error("signal of length {length} with window {window} yields {actual} reporting values, expected {expected}")]
    LengthMismatch {
        length: usize,
        window: usize,
        expected: usize,
        actual: usize,
    },
}

/// Trailing rolling sums of `signal` over `window` steps.
///
/// `signal` covers the seed window followed by the reporting window, so it must
/// hold exactly `window + reporting_len` values. Entry `j` of the result is the
/// sum of `signal[j + 1 ..= j + window]`: the `window` samples ending at
/// reporting step `j`.
pub fn rolling_sum(
    signal: &[f64],
    window: usize,
    reporting_len: usize,
) -> Result<Vec<f64>, WindowError> {
    if window == 0 {
        return Err(WindowError::ZeroWindow);
    }
    let length = signal.len();
    if length < window {
        return Err(WindowError::TooShort { length, window });
    }
    let actual = length - window;
    if actual != reporting_len {
        return Err(WindowError::LengthMismatch {
            length,
            window,
            expected: reporting_len,
            actual,
        });
    }

    let mut prefix = Vec::with_capacity(length + 1);
    prefix.push(0.0);
    let mut running = 0.0;
    for value in signal {
        running += value;
        prefix.push(running);
    }

    Ok((0..reporting_len)
        .map(|j| prefix[j + window + 1] - prefix[j + 1])
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_sum_alignment() {
        // window 2, reporting 3: entries sum [1..=2], [2..=3], [3..=4]
        let signal = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(rolling_sum(&signal, 2, 3).unwrap(), vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn test_window_of_one_is_the_reporting_tail() {
        let signal = [9.0, 1.0, 2.0, 3.0];
        assert_eq!(rolling_sum(&signal, 1, 3).unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_constant_signal_sums_to_window() {
        let signal = vec![1.0; 60 + 10];
        let sums = rolling_sum(&signal, 60, 10).unwrap();
        assert_eq!(sums.len(), 10);
        assert!(sums.iter().all(|s| *s == 60.0));
    }

    #[test]
    fn test_shorter_than_window_fails() {
        assert_eq!(
            rolling_sum(&[1.0, 1.0], 3, 0),
            Err(WindowError::TooShort { length: 2, window: 3 })
        );
    }

    #[test]
    fn test_length_mismatch_fails_instead_of_truncating() {
        let signal = vec![1.0; 10];
        assert_eq!(
            rolling_sum(&signal, 4, 5),
            Err(WindowError::LengthMismatch {
                length: 10,
                window: 4,
                expected: 5,
                actual: 6,
            })
        );
    }

    #[test]
    fn test_zero_window_fails() {
        assert_eq!(rolling_sum(&[1.0], 0, 1), Err(WindowError::ZeroWindow));
    }

    #[test]
    fn test_exact_window_yields_empty_reporting() {
        assert_eq!(rolling_sum(&[1.0, 2.0], 2, 0).unwrap(), Vec::<f64>::new());
    }
}
