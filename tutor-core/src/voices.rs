//! Voice selection for a target Spanish dialect

use serde::{Deserialize, Serialize};

use crate::types::Dialect;

/// Base language every tutor voice must speak
pub const SPANISH: &str = "es";

/// Name fragments that mark a voice as masculine
const MASCULINE_KEYWORDS: &[&str] = &[
    "male", "jorge", "diego", "juan", "carlos", "miguel", "hombre", "masculino",
];

/// An installed synthesis voice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub name: String,
    /// BCP 47 locale, e.g. `es-MX`
    pub lang: String,
}

impl Voice {
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
        }
    }

    fn matches_locale(&self, locale: &str) -> bool {
        normalize_locale(&self.lang).starts_with(&locale.to_ascii_lowercase())
    }

    fn is_masculine(&self) -> bool {
        let name = self.name.to_lowercase().replace("female", "");
        MASCULINE_KEYWORDS.iter().any(|keyword| name.contains(keyword))
    }
}

/// Engines report `es_MX`, `es-mx` and `es-MX` interchangeably
fn normalize_locale(lang: &str) -> String {
    lang.to_ascii_lowercase().replace('_', "-")
}

/// Locales to try for a dialect, most preferred first
pub fn preferred_locales(dialect: Dialect) -> &'static [&'static str] {
    match dialect {
        Dialect::Spain => &["es-ES"],
        Dialect::Mexico => &["es-MX", "es-US"],
        Dialect::Neutral => &["es-ES", "es-MX", "es-US", SPANISH],
    }
}

/// Pick the voice to speak with for `dialect`
///
/// Within each preferred locale a masculine voice wins over any other; if no
/// preferred locale is installed the first Spanish voice is used.
pub fn select_voice(voices: &[Voice], dialect: Dialect) -> Option<&Voice> {
    for locale in preferred_locales(dialect) {
        let mut candidates = voices.iter().filter(|voice| voice.matches_locale(locale));
        let first = candidates.clone().next();
        if let Some(voice) = candidates.find(|voice| voice.is_masculine()).or(first) {
            return Some(voice);
        }
    }

    voices.iter().find(|voice| voice.matches_locale(SPANISH))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn installed() -> Vec<Voice> {
        vec![
            Voice::new("Samantha", "en-US"),
            Voice::new("Paulina", "es-MX"),
            Voice::new("Juan", "es_MX"),
            Voice::new("Monica", "es-ES"),
            Voice::new("Google español de Estados Unidos", "es-US"),
        ]
    }

    #[test]
    fn test_masculine_preferred_within_locale() {
        let voices = installed();
        assert_eq!(select_voice(&voices, Dialect::Mexico).unwrap().name, "Juan");
    }

    #[test]
    fn test_locale_order_beats_masculinity() {
        let voices = installed();
        // es-ES comes first for neutral, even though only es-MX has a masculine voice
        assert_eq!(select_voice(&voices, Dialect::Neutral).unwrap().name, "Monica");
        assert_eq!(select_voice(&voices, Dialect::Spain).unwrap().name, "Monica");
    }

    #[test]
    fn test_second_locale_used_when_first_missing() {
        let voices = vec![
            Voice::new("Samantha", "en-US"),
            Voice::new("Google español de Estados Unidos", "es-US"),
        ];
        assert_eq!(
            select_voice(&voices, Dialect::Mexico).unwrap().lang,
            "es-US"
        );
    }

    #[test]
    fn test_female_is_not_masculine() {
        let voices = vec![
            Voice::new("Microsoft Helena Female", "es-ES"),
            Voice::new("Microsoft Pablo Male", "es-ES"),
        ];
        assert_eq!(
            select_voice(&voices, Dialect::Spain).unwrap().name,
            "Microsoft Pablo Male"
        );
        assert!(!voices[0].is_masculine());
    }

    #[test]
    fn test_fallback_to_any_spanish_voice() {
        let voices = vec![
            Voice::new("Samantha", "en-US"),
            Voice::new("Soledad", "es-AR"),
        ];
        assert_eq!(select_voice(&voices, Dialect::Spain).unwrap().name, "Soledad");
    }

    #[test]
    fn test_no_spanish_voice() {
        let voices = vec![Voice::new("Samantha", "en-US")];
        assert!(select_voice(&voices, Dialect::Neutral).is_none());
        assert!(select_voice(&[], Dialect::Mexico).is_none());
    }
}
