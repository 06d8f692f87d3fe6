use strsim::{jaro, jaro_winkler, levenshtein, normalized_levenshtein, sorensen_dice};

use crate::config::SimilarityFunction;
use crate::models::Value;

fn normalize_simple(s: &str) -> String {
    s.trim().to_lowercase().replace('.', "").replace('-', " ")
}

/// Scores two values. `None` when the function does not apply to the value
/// types (e.g. a date difference over text).
pub fn score(function: SimilarityFunction, a: &Value, b: &Value) -> Option<f64> {
    match function {
        SimilarityFunction::Levenshtein => text_pair(a, b).map(|(x, y)| normalized_levenshtein(&x, &y)),
        SimilarityFunction::Jaro => text_pair(a, b).map(|(x, y)| jaro(&x, &y)),
        SimilarityFunction::JaroWinkler => text_pair(a, b).map(|(x, y)| jaro_winkler(&x, &y)),
        SimilarityFunction::SorensenDice => text_pair(a, b).map(|(x, y)| sorensen_dice(&x, &y)),
        SimilarityFunction::EditDistance => text_pair(a, b).map(|(x, y)| levenshtein(&x, &y) as f64),
        SimilarityFunction::NumericDifference => match (a, b) {
            (Value::Number(x), Value::Number(y)) => Some((x - y).abs()),
            _ => None,
        },
        SimilarityFunction::DateDifferenceDays => match (a, b) {
            (Value::Date(x), Value::Date(y)) => Some((*x - *y).num_days().abs() as f64),
            _ => None,
        },
    }
}

fn text_pair(a: &Value, b: &Value) -> Option<(String, String)> {
    match (a, b) {
        (Value::Number(_), _) | (_, Value::Number(_)) => None,
        _ => Some((normalize_simple(&a.render()), normalize_simple(&b.render()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn levenshtein_similarity_for_close_names() {
        let s = score(SimilarityFunction::Levenshtein, &"John Smith".into(), &"Jon Smith".into()).unwrap();
        assert!((s - 0.9).abs() < 1e-9);
    }

    #[test]
    fn functions_are_symmetric() {
        let (a, b): (Value, Value) = ("Martha".into(), "Marhta".into());
        for f in [SimilarityFunction::Levenshtein, SimilarityFunction::Jaro, SimilarityFunction::JaroWinkler, SimilarityFunction::SorensenDice, SimilarityFunction::EditDistance] {
            assert_eq!(score(f, &a, &b), score(f, &b, &a));
        }
    }

    #[test]
    fn distances_over_typed_values() {
        let d1 = Value::Date(NaiveDate::from_ymd_opt(1980, 1, 1).unwrap());
        let d2 = Value::Date(NaiveDate::from_ymd_opt(1980, 1, 11).unwrap());
        assert_eq!(score(SimilarityFunction::DateDifferenceDays, &d1, &d2), Some(10.0));
        assert_eq!(score(SimilarityFunction::NumericDifference, &Value::Number(3.0), &Value::Number(5.5)), Some(2.5));
        assert_eq!(score(SimilarityFunction::NumericDifference, &Value::Number(3.0), &"3".into()), None);
        assert_eq!(score(SimilarityFunction::Jaro, &Value::Number(3.0), &"3".into()), None);
    }
}
