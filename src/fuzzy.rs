//! String similarity scores on a 0-100 scale.
//!
//! `ratio` is the indel similarity of two strings: twice the longest common
//! subsequence over the combined length. `partial_ratio` slides the shorter
//! string over the longer one and keeps the best window score.

fn lcs_len(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }

    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];

    for a_char in a {
        for (j, b_char) in b.iter().enumerate() {
            curr[j + 1] = if a_char == b_char {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

fn ratio_chars(a: &[char], b: &[char]) -> u8 {
    let total = a.len() + b.len();
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let score = (200.0 * lcs_len(a, b) as f64 / total as f64).round();
    score.min(100.0) as u8
}

/// similarity of the two whole strings
pub fn ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    ratio_chars(&a, &b)
}

/// best similarity of the shorter string against any same-length window of the longer one
pub fn partial_ratio(a: &str, b: &str) -> u8 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (shorter, longer) = if a.len() <= b.len() { (a, b) } else { (b, a) };

    if shorter.is_empty() {
        return 0;
    }
    if shorter.len() == longer.len() {
        return ratio_chars(&shorter, &longer);
    }

    let mut best = 0;
    for window in longer.windows(shorter.len()) {
        let score = ratio_chars(&shorter, window);
        if score > best {
            best = score;
            if best == 100 {
                break;
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio_identical_and_disjoint() {
        assert_eq!(ratio("matrix", "matrix"), 100);
        assert_eq!(ratio("abc", "xyz"), 0);
        assert_eq!(ratio("", "abc"), 0);
    }

    #[test]
    fn test_ratio_similar_titles() {
        // lcs("inception", "inceptoin") = 8, 2*8/18
        assert_eq!(ratio("inception", "inceptoin"), 89);
        assert!(ratio("the batman", "the batman returns") >= 70);
        assert!(ratio("avatar", "titanic") < 50);
    }

    #[test]
    fn test_partial_ratio_substring() {
        assert_eq!(partial_ratio("matrix", "the matrix reloaded"), 100);
        assert_eq!(partial_ratio("the matrix reloaded", "matrix"), 100);
    }

    #[test]
    fn test_partial_ratio_typo() {
        let score = partial_ratio("interstelar", "interstellar 2014");
        assert!(score >= 68, "score was {}", score);
        assert!(partial_ratio("godfather", "finding nemo") < 68);
    }

    #[test]
    fn test_unicode_titles() {
        assert_eq!(partial_ratio("амели", "амели 2001"), 100);
        assert_eq!(ratio("café", "cafe"), 75);
    }
}
