//! Well, formation and property extraction
//!
//! Provides:
//! - The `EntityExtractor` seam consumed by normalization and routing
//! - A dictionary/regex extractor for Volve-style well reports
//! - Well name normalization helpers used for cache and index lookups

use regex_lite::Regex;

/// Pulls domain identifiers out of free text
pub trait EntityExtractor: Send + Sync {
    /// Canonical well name (e.g. `15/9-F-5`)
    fn extract_well(&self, text: &str) -> Option<String>;

    /// Canonical formation name (e.g. `Hugin`)
    fn extract_formation(&self, text: &str) -> Option<String>;

    /// Canonical property key (e.g. `porosity`)
    fn extract_property(&self, _text: &str) -> Option<String> {
        None
    }
}

/// Formations found in the Volve field reports
pub const DEFAULT_FORMATIONS: &[&str] = &[
    "Hugin",
    "Sleipner",
    "Skagerak",
    "Heather",
    "Draupne",
    "Smith Bank",
    "Shetland",
    "Utsira",
    "Ty",
    "Hordaland",
    "Nordland",
];

/// Canonical property keys and the surface forms that name them
pub const PROPERTY_TERMS: &[(&str, &[&str])] = &[
    ("porosity", &["porosity", "phif", "phi", "poro"]),
    ("permeability", &["permeability", "klogh", "perm"]),
    ("water_saturation", &["water saturation", "sw"]),
    ("net_to_gross", &["net to gross", "net-to-gross", "netgros", "ntg", "n/g"]),
    ("matrix_density", &["matrix density", "rhoma"]),
    ("fluid_density", &["fluid density", "rhofl"]),
    ("shale_volume", &["shale volume", "vsh"]),
];

/// Surface forms for a canonical property key
pub fn property_synonyms(property: &str) -> &'static [&'static str] {
    PROPERTY_TERMS
        .iter()
        .find(|(key, _)| *key == property)
        .map(|(_, forms)| *forms)
        .unwrap_or(&[])
}

const WELL_PATTERN: &str =
    r"\b(\d{1,2})\s*[_/\-]\s*(\d{1,2})\s*[_\-]\s*(?:([Ff])\s*[_\-]?\s*)?(\d{1,2})(?:\s*[_\-]?\s*([A-C])\b)?";

/// Regex and dictionary based extractor
pub struct VolveEntityExtractor {
    well_pattern: Option<Regex>,
    formations: Vec<(Regex, String)>,
    properties: Vec<(Regex, String)>,
}

impl VolveEntityExtractor {
    /// Extractor recognizing the given formation names
    pub fn with_formations<S: AsRef<str>>(formations: &[S]) -> Self {
        let formations = formations
            .iter()
            .filter_map(|name| {
                word_regex(name.as_ref()).map(|re| (re, name.as_ref().to_string()))
            })
            .collect();

        let properties = PROPERTY_TERMS
            .iter()
            .flat_map(|(key, forms)| forms.iter().map(move |form| (key, form)))
            .filter_map(|(key, form)| word_regex(form).map(|re| (re, key.to_string())))
            .collect();

        Self {
            well_pattern: Regex::new(WELL_PATTERN).ok(),
            formations,
            properties,
        }
    }

    /// Earliest dictionary match in `text`
    fn first_match(entries: &[(Regex, String)], text: &str) -> Option<String> {
        entries
            .iter()
            .filter_map(|(re, name)| re.find(text).map(|m| (m.start(), name)))
            .min_by_key(|(start, _)| *start)
            .map(|(_, name)| name.clone())
    }
}

impl Default for VolveEntityExtractor {
    fn default() -> Self {
        Self::with_formations(DEFAULT_FORMATIONS)
    }
}

impl EntityExtractor for VolveEntityExtractor {
    fn extract_well(&self, text: &str) -> Option<String> {
        let caps = self.well_pattern.as_ref()?.captures(text)?;

        let quadrant = caps.get(1)?.as_str();
        let block = caps.get(2)?.as_str();
        let number = caps.get(4)?.as_str();

        let mut well = match caps.get(3) {
            Some(_) => format!("{}/{}-F-{}", quadrant, block, number),
            None => format!("{}/{}-{}", quadrant, block, number),
        };
        if let Some(suffix) = caps.get(5) {
            well.push(' ');
            well.push_str(suffix.as_str());
        }
        Some(well)
    }

    fn extract_formation(&self, text: &str) -> Option<String> {
        Self::first_match(&self.formations, text)
    }

    fn extract_property(&self, text: &str) -> Option<String> {
        Self::first_match(&self.properties, text)
    }
}

/// Case-insensitive whole-word matcher for a dictionary term
fn word_regex(term: &str) -> Option<Regex> {
    Regex::new(&format!(r"(?i)(?:^|[^A-Za-z0-9]){}(?:$|[^A-Za-z0-9])", regex_lite::escape(term))).ok()
}

/// Normalize a well name for matching: uppercase alphanumerics only
///
/// `15/9-F-5` becomes `159F5`.
pub fn normalize_well(well: &str) -> String {
    well.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Canonical display form (`15/9-F-5`), or the trimmed input when unrecognized
pub fn canonicalize_well(well: &str) -> String {
    VolveEntityExtractor::default()
        .extract_well(well)
        .unwrap_or_else(|| well.trim().to_uppercase())
}

/// Strip the first matching report suffix (PETROPHYSICAL, FORMATION, REPORT)
pub fn strip_well_suffixes(well: &str) -> &str {
    ["PETROPHYSICAL", "FORMATION", "REPORT"]
        .iter()
        .find_map(|suffix| well.strip_suffix(suffix))
        .unwrap_or(well)
}
