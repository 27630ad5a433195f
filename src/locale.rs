//! Language/region tags used to key voice models and system voices.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

lazy_static! {
    // "ja", "en-US", "en_US", "pt_BR.UTF-8", "de_DE@euro", "es-419"
    static ref LOCALE_TAG: Regex =
        Regex::new(r"^([A-Za-z]{2,3})(?:[-_]([A-Za-z]{2}|[0-9]{3}))?(?:\.[^@]*)?(?:@.*)?$")
            .expect("locale pattern is valid");
}

/// Environment variables consulted for the system locale, highest priority first.
const LOCALE_VARS: [&str; 3] = ["LC_ALL", "LC_MESSAGES", "LANG"];

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locale {
    language: String,
    region: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{0}' is not a valid locale tag")]
pub struct InvalidLocale(pub String);

impl Locale {
    pub fn new(language: &str, region: Option<&str>) -> Self {
        Self {
            language: language.to_ascii_lowercase(),
            region: region.map(|r| r.to_ascii_uppercase()),
        }
    }

    pub fn japanese() -> Self {
        Self::new("ja", None)
    }

    pub fn us_english() -> Self {
        Self::new("en", Some("US"))
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn same_language(&self, other: &Locale) -> bool {
        self.language == other.language
    }

    /// The host locale from `LC_ALL`, `LC_MESSAGES` or `LANG`. The POSIX
    /// "C" locale and anything unparsable count as US English.
    pub fn system_default() -> Self {
        LOCALE_VARS
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|value| !value.is_empty())
            .and_then(|value| match value.as_str() {
                "C" | "POSIX" | "C.UTF-8" => None,
                tag => tag.parse().ok(),
            })
            .unwrap_or_else(Self::us_english)
    }
}

impl FromStr for Locale {
    type Err = InvalidLocale;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = LOCALE_TAG
            .captures(s.trim())
            .ok_or_else(|| InvalidLocale(s.to_string()))?;
        let language = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let region = caps.get(2).map(|m| m.as_str());
        Ok(Self::new(language, region))
    }
}

impl TryFrom<String> for Locale {
    type Error = InvalidLocale;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Locale> for String {
    fn from(locale: Locale) -> Self {
        locale.to_string()
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region {
            Some(region) => write!(f, "{}-{}", self.language, region),
            None => f.write_str(&self.language),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_bcp47_and_posix_forms() {
        assert_eq!("ja".parse::<Locale>().unwrap(), Locale::japanese());
        assert_eq!("en-US".parse::<Locale>().unwrap(), Locale::us_english());
        assert_eq!("en_us".parse::<Locale>().unwrap(), Locale::us_english());

        let pt: Locale = "pt_BR.UTF-8".parse().unwrap();
        assert_eq!(pt.language(), "pt");
        assert_eq!(pt.region(), Some("BR"));

        let de: Locale = "de_DE@euro".parse().unwrap();
        assert_eq!(de.to_string(), "de-DE");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("".parse::<Locale>().is_err());
        assert!("english".parse::<Locale>().is_err());
        assert!("123".parse::<Locale>().is_err());
    }

    #[test]
    fn test_serde_uses_tag_string() {
        let json = serde_json::to_string(&Locale::us_english()).unwrap();
        assert_eq!(json, "\"en-US\"");
        let back: Locale = serde_json::from_str("\"ja\"").unwrap();
        assert_eq!(back, Locale::japanese());
    }

    #[test]
    #[serial]
    fn test_system_default_reads_lang() {
        std::env::remove_var("LC_ALL");
        std::env::remove_var("LC_MESSAGES");
        std::env::set_var("LANG", "ja_JP.UTF-8");
        assert_eq!(Locale::system_default().to_string(), "ja-JP");

        std::env::set_var("LC_ALL", "fr_FR.UTF-8");
        assert_eq!(Locale::system_default().to_string(), "fr-FR");
        std::env::remove_var("LC_ALL");
    }

    #[test]
    #[serial]
    fn test_system_default_posix_is_us_english() {
        std::env::remove_var("LC_ALL");
        std::env::remove_var("LC_MESSAGES");
        std::env::set_var("LANG", "C");
        assert_eq!(Locale::system_default(), Locale::us_english());
    }
}
