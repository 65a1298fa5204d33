//! Version string ordering.
//!
//! The default ordering is the GNU/Debian version comparison used by
//! `sort -V` and `dpkg`: runs of digits compare numerically, everything else
//! compares character by character with letters before punctuation, and `~`
//! sorts before anything (including the end of the string), so pre-releases
//! like `1.0~rc1` come before `1.0`.

use std::cmp::Ordering;

/// Comparison scheme a recipe can select for its versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// GNU version ordering (see [`compare`]).
    #[default]
    Gnu,
    /// Plain byte-wise string ordering.
    Lexical,
}

impl Scheme {
    /// Compare two versions under this scheme.
    pub fn compare(self, a: &str, b: &str) -> Ordering {
        match self {
            Self::Gnu => compare(a, b),
            Self::Lexical => a.cmp(b),
        }
    }
}

/// Compare two version strings using the GNU ordering.
///
/// ```
/// use std::cmp::Ordering;
/// use cpm_schema::version::compare;
///
/// assert_eq!(compare("1.9", "1.10"), Ordering::Less);
/// assert_eq!(compare("1.0~rc1", "1.0"), Ordering::Less);
/// assert_eq!(compare("v2.0", "v2.0"), Ordering::Equal);
/// ```
pub fn compare(a: &str, b: &str) -> Ordering {
    let a = a.as_bytes();
    let b = b.as_bytes();
    let (mut i, mut j) = (0, 0);

    while i < a.len() || j < b.len() {
        // Non-digit prefix.
        while (i < a.len() && !a[i].is_ascii_digit()) || (j < b.len() && !b[j].is_ascii_digit())
        {
            let ac = order(a.get(i).copied());
            let bc = order(b.get(j).copied());
            if ac != bc {
                return ac.cmp(&bc);
            }
            i += 1;
            j += 1;
        }

        // Numeric run: skip leading zeros, then the longer run wins, then the
        // first differing digit.
        while a.get(i) == Some(&b'0') {
            i += 1;
        }
        while b.get(j) == Some(&b'0') {
            j += 1;
        }
        let mut first_diff = Ordering::Equal;
        while i < a.len() && j < b.len() && a[i].is_ascii_digit() && b[j].is_ascii_digit() {
            if first_diff == Ordering::Equal {
                first_diff = a[i].cmp(&b[j]);
            }
            i += 1;
            j += 1;
        }
        if a.get(i).is_some_and(u8::is_ascii_digit) {
            return Ordering::Greater;
        }
        if b.get(j).is_some_and(u8::is_ascii_digit) {
            return Ordering::Less;
        }
        if first_diff != Ordering::Equal {
            return first_diff;
        }
    }
    Ordering::Equal
}

/// Weight of a single non-digit character.
fn order(c: Option<u8>) -> i32 {
    match c {
        None => 0,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) if c.is_ascii_alphabetic() => i32::from(c),
        Some(b'~') => -1,
        Some(c) => i32::from(c) + 256,
    }
}

/// Returns the greatest version in `versions` under the GNU ordering.
pub fn latest<'a, I>(versions: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    versions
        .into_iter()
        .max_by(|a, b| compare(a, b).then_with(|| a.cmp(b)))
}
