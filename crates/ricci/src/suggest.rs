//! Closest-name suggestions using Levenshtein distance
//!
//! When a document references a name that has not been declared,
//! the error message suggests declared names that are a small number of edits away.
//!
//! ## Implementation notes
//!
//! The distance is computed with the usual dynamic programming recurrence.
//! Let `X[i][j]` be the distance between `a[:i]` and `b[:j]`. Then
//!
//! ```text
//! X[i][j] = X[i-1][j-1]                              if a[i] == b[j]
//!         = 1 + min(X[i-1][j], X[i][j-1], X[i-1][j-1])  otherwise
//! ```
//!
//! Only the distance is needed, not the edit script, so we keep just two rows of `X`.

/// Maximum number of suggestions returned.
const MAX_SUGGESTIONS: usize = 3;

/// Finds names in the dictionary that are close to the search word.
///
/// Names are returned closest first; ties are broken alphabetically.
/// A name is only suggested if its distance is at most a third of the
/// word length (and at least 1).
pub fn close_names<'a, I>(dictionary: I, word: &str) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let threshold = std::cmp::max(1, word.chars().count() / 3);
    let mut candidates: Vec<(usize, &str)> = dictionary
        .into_iter()
        .filter(|candidate| *candidate != word)
        .map(|candidate| (levenshtein_distance(word, candidate), candidate))
        .filter(|(distance, _)| *distance <= threshold)
        .collect();
    candidates.sort();
    candidates.dedup();
    candidates
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(_, candidate)| candidate.to_string())
        .collect()
}

fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, a_i) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, b_j) in b.iter().enumerate() {
            current[j + 1] = if a_i == b_j {
                previous[j]
            } else {
                1 + previous[j].min(previous[j + 1]).min(current[j])
            };
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! distance_tests {
        ( $( ($name: ident, $a: expr, $b: expr, $want: expr), )+ ) => {
            $(
            #[test]
            fn $name() {
                assert_eq!(levenshtein_distance($a, $b), $want);
                assert_eq!(levenshtein_distance($b, $a), $want);
            }
            )+
        };
    }

    distance_tests!(
        (same, "vU", "vU", 0),
        (empty, "", "gDD", 3),
        (one_modify, "gUU", "gDD", 2),
        (one_add, "RUU", "RUUD", 1),
        (kitten, "kitten", "sitting", 3),
    );

    #[test]
    fn suggests_closest_first() {
        let dictionary = ["vU", "wU", "vD", "gDD"];
        assert_eq!(
            close_names(dictionary, "vUU"),
            vec!["vU".to_string()]
        );
    }

    #[test]
    fn no_suggestions_for_distant_words() {
        let dictionary = ["epsilonDDD", "deltaUU"];
        assert!(close_names(dictionary, "vU").is_empty());
    }
}
