//! Query normalization - derives a structured view of the latest question
//!
//! Provides:
//! - Intent classification (fact, list, section)
//! - Entity extraction via an injected [`EntityExtractor`]
//! - Tool query expansion with canonical entities and property synonyms

use crate::wells::{property_synonyms, EntityExtractor, VolveEntityExtractor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Immutable view of one user question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedQuery {
    /// Question text as received
    pub raw: String,

    /// Canonical well name
    pub well: Option<String>,

    /// Canonical formation name
    pub formation: Option<String>,

    /// Canonical property key
    pub property: Option<String>,

    /// Detected intent
    pub intent: QueryIntent,

    /// Query string suggested for tool calls
    pub tool_query: String,
}

impl NormalizedQuery {
    /// Bare view with no entities, used when nothing could be extracted
    pub fn raw(question: &str) -> Self {
        Self {
            raw: question.to_string(),
            well: None,
            formation: None,
            property: None,
            intent: QueryIntent::Unknown,
            tool_query: question.trim().to_string(),
        }
    }
}

/// Query intent classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    /// Single value or fact
    Fact,
    /// Enumeration of items
    List,
    /// A named document section
    Section,
    /// Unknown/general
    Unknown,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::Fact => "fact",
            QueryIntent::List => "list",
            QueryIntent::Section => "section",
            QueryIntent::Unknown => "unknown",
        }
    }
}

/// Pure, network-free normalization of a question
pub trait QueryNormalizer: Send + Sync {
    fn normalize(&self, question: &str) -> NormalizedQuery;
}

/// Normalizer configuration
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Enable tool query expansion
    pub enable_expansion: bool,

    /// Maximum synonyms appended to the tool query
    pub max_expansions: usize,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            enable_expansion: true,
            max_expansions: 3,
        }
    }
}

const LIST_CUES: &[&str] = &["list", "which", "all", "enumerate"];
const SECTION_CUES: &[&str] = &[
    "summary",
    "introduction",
    "conclusion",
    "results",
    "discussion",
    "abstract",
];
const FACT_CUES: &[&str] = &[
    "what",
    "how much",
    "how deep",
    "value",
    "depth",
    "tvd",
    "md",
    "average",
];

/// Keyword and dictionary based normalizer
pub struct HeuristicNormalizer {
    config: NormalizerConfig,
    extractor: Arc<dyn EntityExtractor>,
}

impl HeuristicNormalizer {
    /// Create a new normalizer
    pub fn new(config: NormalizerConfig, extractor: Arc<dyn EntityExtractor>) -> Self {
        Self { config, extractor }
    }

    /// Detect query intent using heuristics
    fn detect_intent(&self, question_lower: &str) -> QueryIntent {
        if LIST_CUES.iter().any(|cue| contains_term(question_lower, cue)) {
            return QueryIntent::List;
        }

        if SECTION_CUES.iter().any(|cue| contains_term(question_lower, cue)) {
            return QueryIntent::Section;
        }

        if FACT_CUES.iter().any(|cue| contains_term(question_lower, cue)) {
            return QueryIntent::Fact;
        }

        QueryIntent::Unknown
    }

    /// Append canonical entities and property synonyms missing from the question
    fn expand_query(
        &self,
        question: &str,
        well: Option<&str>,
        formation: Option<&str>,
        property: Option<&str>,
    ) -> String {
        let mut query = question.trim().to_string();
        if !self.config.enable_expansion {
            return query;
        }

        let mut lower = query.to_lowercase();

        if let Some(well) = well {
            if !lower.contains(&well.to_lowercase()) {
                query.push(' ');
                query.push_str(well);
                lower = query.to_lowercase();
            }
        }

        if let Some(formation) = formation {
            if !contains_term(&lower, &formation.to_lowercase()) {
                query.push(' ');
                query.push_str(formation);
                lower = query.to_lowercase();
            }
        }

        if let Some(property) = property {
            let missing = property_synonyms(property)
                .iter()
                .filter(|syn| !contains_term(&lower, syn))
                .take(self.config.max_expansions);
            for syn in missing {
                query.push(' ');
                query.push_str(syn);
            }
        }

        query
    }
}

impl Default for HeuristicNormalizer {
    fn default() -> Self {
        Self::new(
            NormalizerConfig::default(),
            Arc::new(VolveEntityExtractor::default()),
        )
    }
}

impl QueryNormalizer for HeuristicNormalizer {
    fn normalize(&self, question: &str) -> NormalizedQuery {
        let lower = question.to_lowercase();

        let well = self.extractor.extract_well(question);
        let formation = self.extractor.extract_formation(question);
        let property = self.extractor.extract_property(question);
        let intent = self.detect_intent(&lower);
        let tool_query = self.expand_query(
            question,
            well.as_deref(),
            formation.as_deref(),
            property.as_deref(),
        );

        NormalizedQuery {
            raw: question.to_string(),
            well,
            formation,
            property,
            intent,
            tool_query,
        }
    }
}

/// Whole-word (or whole-phrase) containment; `haystack` and `term` should
/// already share case
pub fn contains_term(haystack: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }

    let is_word = |c: char| c.is_alphanumeric();
    haystack.match_indices(term).any(|(start, _)| {
        let end = start + term.len();
        let before_ok = haystack[..start].chars().next_back().map_or(true, |c| !is_word(c));
        let after_ok = haystack[end..].chars().next().map_or(true, |c| !is_word(c));
        before_ok && after_ok
    })
}
