//! Built-in routing strategies for well report questions
//!
//! Each strategy decides applicability from the question text and the
//! normalized query alone; none of them share state.

use super::{RouteInput, RoutingDecision, RoutingStrategy};
use petrorag_common::query::contains_term;
use tracing::debug;

/// Depth lookups (MD/TVD/TVDSS)
pub const DEPTH_PRIORITY: u32 = 1;
/// Petrophysical parameter table
pub const PETRO_PARAMS_PRIORITY: u32 = 2;
/// Evaluation parameter table
pub const EVAL_PARAMS_PRIORITY: u32 = 3;
/// Named report sections
pub const SECTION_PRIORITY: u32 = 4;

/// Keyword sets of the built-in strategies
///
/// Matching is case-insensitive and whole-word.
#[derive(Debug, Clone)]
pub struct RouteKeywords {
    pub depth: Vec<String>,
    pub petro_params: Vec<String>,
    pub eval_params: Vec<String>,
    pub section: Vec<String>,
    /// Synonym groups appended to the fallback retrieval query of
    /// evaluation parameter questions; the first matching trigger wins
    pub eval_synonyms: Vec<(String, Vec<String>)>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for RouteKeywords {
    fn default() -> Self {
        Self {
            depth: strings(&[
                "depth",
                "depths",
                "md",
                "tvd",
                "tvdss",
                "measured depth",
                "true vertical depth",
            ]),
            petro_params: strings(&[
                "petrophysical parameters",
                "petrophysical parameter",
                "net to gross",
                "net-to-gross",
                "netgros",
                "net/gross",
                "ntg",
                "n/g",
                "phif",
                "phi",
                "poro",
                "porosity",
                "water saturation",
                "sw",
                "klogh",
                "permeability",
                "permeabilities",
                "permeable",
                "perm",
                "k",
            ]),
            eval_params: strings(&[
                "evaluation parameter",
                "evaluation parameters",
                "grmax",
                "grmin",
                "rhoma",
                "rhofl",
                "archie a",
                "archie m",
                "archie n",
                "tortuosity factor",
                "cementation exponent",
                "saturation exponent",
                "matrix density",
                "fluid density",
                "ρma",
                "ρfl",
            ]),
            section: strings(&[
                "summary",
                "introduction",
                "conclusion",
                "results",
                "discussion",
                "abstract",
            ]),
            eval_synonyms: vec![
                (
                    "matrix density".to_string(),
                    strings(&["rhoma", "ρma", "matrix density", "evaluation parameters", "density matrix"]),
                ),
                (
                    "fluid density".to_string(),
                    strings(&["rhofl", "ρfl", "fluid density", "evaluation parameters", "density fluid"]),
                ),
                (
                    "density".to_string(),
                    strings(&[
                        "rhoma",
                        "rhofl",
                        "ρma",
                        "ρfl",
                        "matrix density",
                        "fluid density",
                        "evaluation parameters",
                    ]),
                ),
                (
                    "grmax".to_string(),
                    strings(&["gr max", "gamma ray max", "gr maximum", "evaluation parameters"]),
                ),
                (
                    "grmin".to_string(),
                    strings(&["gr min", "gamma ray min", "gr minimum", "evaluation parameters"]),
                ),
                (
                    "archie".to_string(),
                    strings(&[
                        "archie a",
                        "archie m",
                        "archie n",
                        "tortuosity",
                        "cementation",
                        "saturation exponent",
                        "evaluation parameters",
                    ]),
                ),
            ],
        }
    }
}

fn any_term(text_lower: &str, terms: &[String]) -> bool {
    terms.iter().any(|term| contains_term(text_lower, term))
}

fn has_well(input: &RouteInput<'_>) -> bool {
    input.query.well.is_some()
}

/// The built-in strategies, in declaration order
pub fn defaults(keywords: &RouteKeywords) -> Vec<RoutingStrategy> {
    vec![
        depth(keywords.depth.clone()),
        petro_params(keywords.petro_params.clone()),
        eval_params(keywords.eval_params.clone(), keywords.eval_synonyms.clone()),
        section(keywords.section.clone()),
    ]
}

/// Depth keyword with a resolved well and formation context
pub fn depth(keywords: Vec<String>) -> RoutingStrategy {
    RoutingStrategy::new(
        "depth",
        DEPTH_PRIORITY,
        move |input| {
            let has_formation =
                input.query.formation.is_some() || contains_term(input.question_lower, "formation");
            any_term(input.question_lower, &keywords) && has_well(input) && has_formation
        },
        |input| RoutingDecision::new("depth", "lookup_well_picks", &input.query.tool_query),
    )
}

/// Parameter keyword with a resolved well or a structured cache on disk
pub fn petro_params(keywords: Vec<String>) -> RoutingStrategy {
    RoutingStrategy::new(
        "petro_params",
        PETRO_PARAMS_PRIORITY,
        move |input| {
            let has_keyword = any_term(input.question_lower, &keywords);
            let matched = has_keyword && (has_well(input) || input.structured_cache_hint);
            if has_keyword && !matched {
                debug!(
                    structured_cache_hint = input.structured_cache_hint,
                    "Parameter keyword without well or structured cache"
                );
            }
            matched
        },
        |input| {
            RoutingDecision::new(
                "petro_params",
                "lookup_petrophysical_params",
                &input.query.tool_query,
            )
        },
    )
}

/// Evaluation parameter term with a resolved well
///
/// Also issues a generic retrieval call whose query carries parameter
/// synonyms, so prose mentions are found when the table lacks the value.
pub fn eval_params(keywords: Vec<String>, synonyms: Vec<(String, Vec<String>)>) -> RoutingStrategy {
    RoutingStrategy::new(
        "eval_params",
        EVAL_PARAMS_PRIORITY,
        move |input| has_well(input) && any_term(input.question_lower, &keywords),
        move |input| {
            let tool_query = &input.query.tool_query;
            let retriever_query = synonyms
                .iter()
                .find(|(trigger, _)| input.question_lower.contains(trigger.as_str()))
                .map(|(_, extra)| format!("{} {}", tool_query, extra.join(" ")))
                .unwrap_or_else(|| tool_query.clone());

            RoutingDecision::new("eval_params", "lookup_evaluation_parameters", tool_query)?
                .with_fallback(input.generic_tool, &retriever_query)
        },
    )
}

/// Section keyword with a resolved well
pub fn section(keywords: Vec<String>) -> RoutingStrategy {
    RoutingStrategy::new(
        "section",
        SECTION_PRIORITY,
        move |input| has_well(input) && any_term(input.question_lower, &keywords),
        |input| RoutingDecision::new("section", "lookup_section", &input.query.tool_query),
    )
}
