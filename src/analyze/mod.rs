//! Offline analysis of collected gauge and radar data.

pub mod alarms;
pub mod ari;
pub mod filter;
pub mod radar;
pub mod report;

/// Formats a float the way report readers expect: whole numbers keep a trailing `.0`.
pub fn display_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

/// Counts occurrences, most frequent first; ties keep first-seen order.
pub fn value_counts<I, S>(values: I) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut counts: Vec<(String, usize)> = Vec::new();
    for value in values {
        let value = value.as_ref();
        match counts.iter_mut().find(|(seen, _)| seen == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value.to_string(), 1)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn should_keep_trailing_zero_on_whole_numbers() {
        assert_eq!(display_float(5.0), "5.0");
        assert_eq!(display_float(0.3), "0.3");
        assert_eq!(display_float(12.25), "12.25");
    }

    #[test]
    fn should_count_most_frequent_first() {
        let counts = value_counts(["b", "a", "a", "c", "b", "a"]);

        assert_eq!(
            counts,
            vec![("a".to_string(), 3), ("b".to_string(), 2), ("c".to_string(), 1)]
        );
    }
}
