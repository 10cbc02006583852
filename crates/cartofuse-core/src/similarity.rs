//! Jaro-Winkler string similarity for fuzzy name matching.
//!
//! Implemented directly over `char`s; names are short and compared
//! pairwise only after the cheaper spatial checks pass.

/// Prefix scaling factor from Winkler's paper.
const PREFIX_SCALE: f64 = 0.1;

/// Longest common prefix that earns a bonus.
const MAX_PREFIX: usize = 4;

/// Jaro similarity in `[0, 1]`.
///
/// Two empty strings are identical (1.0); an empty string against a
/// non-empty one shares nothing (0.0).
#[must_use]
pub fn jaro(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let window = (a.len().max(b.len()) / 2).saturating_sub(1);

    let mut a_matched = vec![false; a.len()];
    let mut b_matched = vec![false; b.len()];
    let mut matches = 0_usize;

    for (i, &ca) in a.iter().enumerate() {
        let lo = i.saturating_sub(window);
        let hi = (i + window + 1).min(b.len());
        for j in lo..hi {
            if !b_matched[j] && b[j] == ca {
                a_matched[i] = true;
                b_matched[j] = true;
                matches += 1;
                break;
            }
        }
    }

    if matches == 0 {
        return 0.0;
    }

    let mut transpositions = 0_usize;
    let mut k = 0;
    for (i, &ca) in a.iter().enumerate() {
        if !a_matched[i] {
            continue;
        }
        while !b_matched[k] {
            k += 1;
        }
        if ca != b[k] {
            transpositions += 1;
        }
        k += 1;
    }

    #[allow(clippy::cast_precision_loss)]
    let (m, t, la, lb) = (
        matches as f64,
        (transpositions / 2) as f64,
        a.len() as f64,
        b.len() as f64,
    );
    (m / la + m / lb + (m - t) / m) / 3.0
}

/// Jaro-Winkler similarity in `[0, 1]`: Jaro boosted by the length of
/// the shared prefix (up to four characters).
#[must_use]
pub fn jaro_winkler(a: &str, b: &str) -> f64 {
    let base = jaro(a, b);
    let prefix = a
        .chars()
        .zip(b.chars())
        .take(MAX_PREFIX)
        .take_while(|(x, y)| x == y)
        .count();
    #[allow(clippy::cast_precision_loss)]
    let bonus = prefix as f64 * PREFIX_SCALE;
    bonus.mul_add(1.0 - base, base)
}
