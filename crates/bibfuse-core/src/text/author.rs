//! Contributor name parsing
//!
//! Splits "Last, First and First2 Last2" contributor strings into persons.
//! Parsing is an ordered list of pattern-matchers tried in sequence, first
//! match wins; explicit commas are preferred over positional heuristics.
//! Unparseable names are logged and skipped so a bad name never fails the
//! whole pipeline.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::warn;

use super::strip_diacritics;

/// One parsed contributor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Person {
    pub surname: String,
    pub given: Option<String>,
    /// Honorific suffix ("Jr.", "III", ...)
    pub suffix: Option<String>,
}

lazy_static! {
    /// Tried in order; the comma patterns come first.
    static ref NAME_PATTERNS: Vec<Regex> = [
        r"^(?P<last>[^,]+),\s((?P<jr>[JS]r\.|[I]+),\s)?(?P<first>[^,]+)$",
        r"^(?P<first>[^{]\S+(\s[A-Z]\S+)*)\s(?P<last>([a-z]+\s)*[A-Z\\]\S+)(?P<jr>,\s[JS]r\.|[I]+)?$",
        r"^(?P<first>\{\S+\}\S+(\s[A-Z]\S+)*)\s(?P<last>([a-z]+\s)*[A-Z\\]\S+)(?P<jr>,\s[JS]r\.|[I]+)?$",
        r"^(?P<first>[\s\S]+?)\s\{(?P<last>[\s\S]+)\}(?P<jr>,\s[JS]r\.|[I]+)?$",
        r"^\{(?P<first>[\s\S]+)\}\s(?P<last>[\s\S]+?)(?P<jr>,\s[JS]r\.|[I]+)?$",
        r"^(?P<last>[A-Z]\S+)$",
        r"^\{(?P<last>[\s\S]+)\}$",
        r"^(?P<last>[aA]nonymous)$",
        r"^(?P<last>\?)$",
        r"^(?P<last>[\s\S]+)$",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();

    static ref RE_CAP_START: Regex = Regex::new(r"^\[?[A-Z]").unwrap();
}

/// Parse a single name; `None` only for empty input (the catch-all pattern
/// accepts anything else).
pub fn parse_person(name: &str) -> Option<Person> {
    for pattern in NAME_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(name) {
            let person = Person {
                surname: caps.name("last").map(|m| m.as_str().to_string())?,
                given: caps.name("first").map(|m| m.as_str().to_string()),
                suffix: caps
                    .name("jr")
                    .map(|m| m.as_str().trim_start_matches(", ").to_string()),
            };
            return Some(move_von_particles(person));
        }
    }
    if !name.is_empty() {
        warn!(name, "couldn't parse name");
    }
    None
}

/// Parse a full "A and B and C" contributor string. Names that fail to parse
/// are logged and dropped; the caller sees only the successes.
pub fn parse_person_list(contributors: &str) -> Vec<Person> {
    let names: Vec<&str> = contributors.split(" and ").collect();
    let parsed: Vec<Person> = names.iter().filter_map(|n| parse_person(n)).collect();
    if parsed.len() != names.len() {
        warn!(contributors, "unparsed name in contributor string");
    }
    parsed
}

/// Split a name part into (lowercase-leading, capitalized-tail) runs.
/// "de la Cruz" -> (["de", "la"], ["Cruz"]); the capitalization test is
/// applied to the diacritic-stripped form.
fn lower_upper(s: &str) -> (Vec<String>, Vec<String>) {
    let parts = split_name_parts(s);
    let mut lower = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        if RE_CAP_START.is_match(&strip_diacritics(part)) {
            return (lower, parts[i..].to_vec());
        }
        lower.push(part.clone());
    }
    (lower, Vec::new())
}

/// Split on whitespace, additionally detaching a `d'` prefix glued to a
/// capitalized name ("d'Arc" -> "d'", "Arc").
fn split_name_parts(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for chunk in s.split_whitespace() {
        if let Some(rest) = chunk.strip_prefix("d'") {
            if rest.starts_with(|c: char| c.is_ascii_uppercase()) {
                parts.push("d'".to_string());
                parts.push(rest.to_string());
                continue;
            }
        }
        parts.push(chunk.to_string());
    }
    parts
}

/// Move von particles ("van", "de la", "d'") from the given name into the
/// surname: "Wilhelm von Humboldt" parses as given "Wilhelm",
/// surname "von Humboldt".
fn move_von_particles(person: Person) -> Person {
    let Person {
        surname,
        given,
        suffix,
    } = person;
    let Some(given) = given else {
        return Person {
            surname,
            given: None,
            suffix,
        };
    };
    let (lower, upper) = lower_upper(&given);
    let surname = format!("{} {}", lower.join(" "), surname).trim().to_string();
    let given = upper.join(" ");
    Person {
        surname,
        given: if given.is_empty() { None } else { Some(given) },
        suffix,
    }
}

/// The part of a surname that keys sorting and fingerprints: the
/// lexicographically greatest capitalized run ("de la Cruz" -> "Cruz").
pub fn surname_key(surname: &str) -> String {
    let (_, upper) = lower_upper(surname);
    upper.into_iter().max().unwrap_or_default()
}

/// Re-serialize one person as "Last, Suffix, First"
pub fn format_person(person: &Person) -> String {
    let mut result = person.surname.clone();
    if let Some(suffix) = &person.suffix {
        result.push_str(", ");
        result.push_str(suffix);
    }
    if let Some(given) = &person.given {
        if !given.is_empty() {
            result.push_str(", ");
            result.push_str(given);
        }
    }
    result
}

/// Normalize a whole contributor string to "Last, First and Last2, First2"
pub fn standardize_contributors(contributors: &str) -> String {
    parse_person_list(contributors)
        .iter()
        .map(format_person)
        .collect::<Vec<_>>()
        .join(" and ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_comma_first() {
        let p = parse_person("Fourie, David J.").unwrap();
        assert_eq!(p.surname, "Fourie");
        assert_eq!(p.given.as_deref(), Some("David J."));
        assert_eq!(p.suffix, None);
    }

    #[test]
    fn test_comma_with_suffix() {
        let p = parse_person("Griffith, Jr., John").unwrap();
        assert_eq!(p.surname, "Griffith");
        assert_eq!(p.suffix.as_deref(), Some("Jr."));
        assert_eq!(p.given.as_deref(), Some("John"));
    }

    #[test]
    fn test_first_last() {
        let p = parse_person("David Fourie").unwrap();
        assert_eq!(p.surname, "Fourie");
        assert_eq!(p.given.as_deref(), Some("David"));
    }

    #[test]
    fn test_von_particles_move_to_surname() {
        let p = parse_person("Wilhelm von Humboldt").unwrap();
        assert_eq!(p.surname, "von Humboldt");
        assert_eq!(p.given.as_deref(), Some("Wilhelm"));

        let p = parse_person("Juan de la Cruz").unwrap();
        assert_eq!(p.surname, "de la Cruz");
        assert_eq!(p.given.as_deref(), Some("Juan"));
    }

    #[test]
    fn test_single_and_anonymous() {
        assert_eq!(parse_person("Anonymous").unwrap().surname, "Anonymous");
        assert_eq!(parse_person("?").unwrap().surname, "?");
        assert_eq!(parse_person("Mbalanhu").unwrap().surname, "Mbalanhu");
    }

    #[test]
    fn test_parse_person_list() {
        let people = parse_person_list("Smith, A. and Jones, B.");
        assert_eq!(people.len(), 2);
        assert_eq!(people[0].surname, "Smith");
        assert_eq!(people[1].surname, "Jones");
    }

    #[test]
    fn test_surname_key() {
        assert_eq!(surname_key("de la Cruz"), "Cruz");
        assert_eq!(surname_key("Fourie"), "Fourie");
        assert_eq!(surname_key("van der Berg"), "Berg");
    }

    #[test]
    fn test_standardize_contributors() {
        assert_eq!(
            standardize_contributors("David Fourie and Smith, Anna"),
            "Fourie, David and Smith, Anna"
        );
    }
}
