//! Roman numeral conversion for volume tokens

use lazy_static::lazy_static;
use regex::Regex;

const VALUES: [(u32, &str); 7] = [
    (1000, "m"),
    (500, "d"),
    (100, "c"),
    (50, "l"),
    (10, "x"),
    (5, "v"),
    (1, "i"),
];

lazy_static! {
    static ref RE_DIGITS: Regex = Regex::new(r"\d+").unwrap();
}

/// Integer to Roman, lowercase. Subtractive notation is used for runs of
/// four of a symbol (4 -> "iv", 40 -> "xl").
pub fn int_to_roman(mut n: u32) -> String {
    let mut out = String::new();
    for (idx, (value, symbol)) in VALUES.iter().enumerate() {
        let q = n / value;
        let r = n % value;
        if q == 4 && *symbol != "m" {
            out.push_str(symbol);
            out.push_str(VALUES[idx - 1].1);
        } else {
            for _ in 0..q {
                out.push_str(symbol);
            }
        }
        n = r;
    }
    out
}

/// Roman to integer, accepting subtractive notation. Characters outside the
/// numeral alphabet contribute nothing.
pub fn roman_to_int(roman: &str) -> u32 {
    let mut total: i64 = 0;
    let mut prev: i64 = 10_000;
    for c in roman.chars() {
        let Some(value) = VALUES
            .iter()
            .find(|(_, s)| s.chars().next() == Some(c))
            .map(|(v, _)| *v as i64)
        else {
            continue;
        };
        if value > prev {
            total = total - 2 * prev + value;
        } else {
            total += value;
        }
        prev = value;
    }
    total.max(0) as u32
}

/// Replace every digit run in `text` with its Roman form and uppercase the
/// result: "03" -> "III", "vol. 4" -> "VOL. IV".
pub fn romanize(text: &str) -> String {
    RE_DIGITS
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let n: u32 = caps[0].parse().unwrap_or(0);
            int_to_roman(n)
        })
        .to_uppercase()
}
