//! Feature name canonicalization.
//!
//! Independently authored archetype texts describe the same base feature in
//! slightly different ways ("Armor Training (Ex) II", "armor training").
//! Everything that compares feature names for "same slot" purposes goes
//! through [`normalize`].

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static PARENTHETICAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)").expect("parenthetical pattern is valid"));

// Roman numerals up to XXXIX; feature ranks never go higher. Matched after
// case folding, so a trailing lone "x", "v" or "i" counts as a rank too.
static ROMAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^x{0,3}(?:ix|iv|v?i{0,3})$").expect("roman numeral pattern is valid")
});

static ORDINAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(?:st|nd|rd|th)?$").expect("ordinal pattern is valid"));

/// Canonicalize a feature name.
///
/// Lowercases, drops `(...)` segments, drops one trailing standalone roman
/// numeral or ordinal token, collapses whitespace and trims. A name that
/// consists of a single rank token is kept as-is.
#[must_use]
pub fn normalize(name: &str) -> String {
    let folded: String = name.nfkc().collect::<String>().to_lowercase();
    let stripped = PARENTHETICAL.replace_all(&folded, " ");

    let mut tokens: Vec<&str> = stripped.split_whitespace().collect();
    if tokens.len() > 1 {
        if let Some(last) = tokens.last() {
            if is_rank_token(last) {
                tokens.pop();
            }
        }
    }
    tokens.join(" ")
}

/// True when both names normalize to the same canonical form.
#[must_use]
pub fn same_feature(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

fn is_rank_token(token: &str) -> bool {
    !token.is_empty() && (ROMAN.is_match(token) || ORDINAL.is_match(token))
}
