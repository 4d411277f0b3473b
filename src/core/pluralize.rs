//! English pluralization for resource names
//!
//! Resource schemas derive their collection name (the envelope root key and
//! the route segment) from the singular name unless one is given explicitly.

/// Converts singular resource names to plural collection names
pub struct Pluralizer;

impl Pluralizer {
    /// Convert a singular noun to its plural form
    ///
    /// # Examples
    ///
    /// ```
    /// use dynrest::core::pluralize::Pluralizer;
    ///
    /// assert_eq!(Pluralizer::pluralize("dog"), "dogs");
    /// assert_eq!(Pluralizer::pluralize("category"), "categories");
    /// assert_eq!(Pluralizer::pluralize("address"), "addresses");
    /// assert_eq!(Pluralizer::pluralize("person"), "people");
    /// ```
    pub fn pluralize(singular: &str) -> String {
        if singular.is_empty() {
            return String::new();
        }

        if let Some(plural) = Self::irregular(singular) {
            return plural.to_string();
        }

        let len = singular.len();
        match singular {
            s if s.ends_with('y') && len > 1 && !Self::vowel_before(s, 1) => {
                format!("{}ies", &s[..len - 1])
            }
            s if ["s", "sh", "ch", "x", "z"].iter().any(|end| s.ends_with(end)) => {
                format!("{}es", s)
            }
            s if s.ends_with("fe") && len > 2 => format!("{}ves", &s[..len - 2]),
            s if s.ends_with('f') && len > 1 => format!("{}ves", &s[..len - 1]),
            s if s.ends_with('o') && len > 1 && !Self::vowel_before(s, 1) => match s {
                "photo" | "piano" | "halo" | "logo" | "memo" => format!("{}s", s),
                _ => format!("{}es", s),
            },
            s => format!("{}s", s),
        }
    }

    fn irregular(word: &str) -> Option<&'static str> {
        match word {
            "person" => Some("people"),
            "child" => Some("children"),
            "mouse" => Some("mice"),
            "goose" => Some("geese"),
            "data" => Some("data"),
            "series" => Some("series"),
            _ => None,
        }
    }

    /// Whether the character `offset` places before the end is a vowel
    fn vowel_before(word: &str, offset: usize) -> bool {
        word.chars()
            .rev()
            .nth(offset)
            .is_some_and(|c| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u'))
    }
}
