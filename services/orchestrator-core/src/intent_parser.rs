//! C9 — Intent Parser: normalizes inbound WhatsApp text (or a pre-extracted
//! item list from the external image/OCR pipeline) into a structured
//! intent. Deterministic by design — no model inference here, that's the
//! external LLM collaborator's job; this module only tokenizes, matches,
//! and scores confidence with compiled regexes.

use orchestrator_common::ids::ProductId;
use rustc_hash::FxHashMap;
use std::sync::OnceLock;

use crate::types::{Product, Unit};

const CLARIFY_THRESHOLD: u8 = 50;
const FUZZY_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, PartialEq)]
pub enum IntentResult {
    OrderIntent { items: Vec<ParsedItem> },
    OrderNeedsClarification { partial_items: Vec<ParsedItem>, questions: Vec<ClarificationQuestion> },
    StatusQuery { order_number: String },
    Greeting { is_returning: bool },
    Help,
    Unknown { raw_text: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedItem {
    pub product_id: Option<ProductId>,
    pub raw_product_token: String,
    pub quantity: Option<i64>,
    pub unit: Option<Unit>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClarificationQuestion {
    InvalidUnit { token: String },
    AmbiguousProduct { token: String, candidates: Vec<String> },
    MissingQuantity { token: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum IntentCategory {
    Greeting,
    Help,
    Unknown,
    OrderIntent,
    StatusQuery,
}

impl IntentCategory {
    /// Tie-break priority when two categories tie on confidence: higher wins.
    const fn priority(self) -> u8 {
        match self {
            Self::StatusQuery => 4,
            Self::OrderIntent => 3,
            Self::Greeting => 2,
            Self::Help => 1,
            Self::Unknown => 0,
        }
    }
}

struct Patterns {
    status_query: regex::Regex,
    greeting: regex::Regex,
    returning_greeting: regex::Regex,
    help: regex::Regex,
    order_line: regex::Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        status_query: regex::Regex::new(r"(?i)\b(where|status|track)\b.*\b(ord[-_ ]?\d+|#\d+)\b|\b(ord[-_ ]?\d+)\b").unwrap(),
        greeting: regex::Regex::new(r"(?i)^\s*(hi|hello|hey|namaste|good (morning|afternoon|evening))\b").unwrap(),
        returning_greeting: regex::Regex::new(r"(?i)\b(again|back|usual|same as last time)\b").unwrap(),
        help: regex::Regex::new(r"(?i)\b(help|how (do|does)|what can you do|commands?)\b").unwrap(),
        order_line: regex::Regex::new(
            r"(?i)^\s*(?:(?P<qty1>\d+(?:\.\d+)?)\s*(?P<unit1>[a-zA-Z]+)?\s+(?P<name1>[a-zA-Z][a-zA-Z ]*)|(?P<name2>[a-zA-Z][a-zA-Z ]*?)\s+(?P<qty2>\d+(?:\.\d+)?)\s*(?P<unit2>[a-zA-Z]+)?|(?P<qty3>\d+)\s*[xX]\s*(?P<name3>[a-zA-Z][a-zA-Z ]*))\s*$",
        )
        .unwrap(),
    })
}

fn unit_aliases() -> &'static FxHashMap<&'static str, Unit> {
    static ALIASES: OnceLock<FxHashMap<&'static str, Unit>> = OnceLock::new();
    ALIASES.get_or_init(|| {
        let mut m = FxHashMap::default();
        m.insert("kg", Unit::Kg);
        m.insert("kgs", Unit::Kg);
        m.insert("kilo", Unit::Kg);
        m.insert("kilos", Unit::Kg);
        m.insert("g", Unit::G);
        m.insert("gm", Unit::G);
        m.insert("gram", Unit::G);
        m.insert("grams", Unit::G);
        m.insert("l", Unit::L);
        m.insert("ltr", Unit::L);
        m.insert("litre", Unit::L);
        m.insert("liter", Unit::L);
        m.insert("ml", Unit::Ml);
        m.insert("piece", Unit::Piece);
        m.insert("pieces", Unit::Piece);
        m.insert("pc", Unit::Piece);
        m.insert("pcs", Unit::Piece);
        m.insert("dozen", Unit::Dozen);
        m.insert("dz", Unit::Dozen);
        m.insert("packet", Unit::Packet);
        m.insert("packets", Unit::Packet);
        m.insert("pkt", Unit::Packet);
        m.insert("carton", Unit::Carton);
        m.insert("cartons", Unit::Carton);
        m
    })
}

pub struct IntentParser<'c> {
    catalog: &'c [Product],
}

impl<'c> IntentParser<'c> {
    #[must_use]
    pub const fn new(catalog: &'c [Product]) -> Self {
        Self { catalog }
    }

    #[must_use]
    pub fn parse(&self, input: &str) -> IntentResult {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return IntentResult::Unknown { raw_text: input.to_string() };
        }

        let p = patterns();
        let mut scored: Vec<(IntentCategory, u8)> = Vec::new();

        if let Some(caps) = p.status_query.captures(trimmed) {
            scored.push((IntentCategory::StatusQuery, 90));
            if let Some(order_number) = extract_order_number(&caps) {
                return IntentResult::StatusQuery { order_number };
            }
        }
        if p.greeting.is_match(trimmed) {
            scored.push((IntentCategory::Greeting, 85));
        }
        if p.help.is_match(trimmed) {
            scored.push((IntentCategory::Help, 80));
        }

        let lines: Vec<&str> = trimmed.lines().filter(|l| !l.trim().is_empty()).collect();
        let order_line_matches = lines.iter().filter(|l| p.order_line.is_match(l)).count();
        if !lines.is_empty() {
            let ratio = order_line_matches as f64 / lines.len() as f64;
            let confidence = (ratio * 100.0) as u8;
            if confidence > 0 {
                scored.push((IntentCategory::OrderIntent, confidence));
            }
        }

        scored.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.priority().cmp(&a.0.priority())));

        let Some(&(winner, confidence)) = scored.first() else {
            return IntentResult::Unknown { raw_text: input.to_string() };
        };
        if confidence < CLARIFY_THRESHOLD {
            return IntentResult::Unknown { raw_text: input.to_string() };
        }

        match winner {
            IntentCategory::Greeting => IntentResult::Greeting { is_returning: p.returning_greeting.is_match(trimmed) },
            IntentCategory::Help => IntentResult::Help,
            IntentCategory::OrderIntent => self.parse_order(&lines),
            IntentCategory::StatusQuery | IntentCategory::Unknown => IntentResult::Unknown { raw_text: input.to_string() },
        }
    }

    /// Parses a pre-extracted item list from the image/OCR pipeline, which
    /// has already done tokenization — this still runs unit canonicalization
    /// and product matching, the parts that are not model-specific.
    #[must_use]
    pub fn parse_extracted_items(&self, raw_items: &[(String, Option<i64>, Option<String>)]) -> IntentResult {
        let mut items = Vec::new();
        let mut questions = Vec::new();
        for (name, quantity, unit_token) in raw_items {
            let parsed = self.resolve_item(name, *quantity, unit_token.as_deref(), &mut questions);
            items.push(parsed);
        }
        if questions.is_empty() {
            IntentResult::OrderIntent { items }
        } else {
            IntentResult::OrderNeedsClarification { partial_items: items, questions }
        }
    }

    fn parse_order(&self, lines: &[&str]) -> IntentResult {
        let p = patterns();
        let mut items = Vec::new();
        let mut questions = Vec::new();

        for line in lines {
            let Some(caps) = p.order_line.captures(line) else { continue };
            let (qty_str, unit_str, name) = if let Some(name) = caps.name("name1") {
                (caps.name("qty1").map(|m| m.as_str()), caps.name("unit1").map(|m| m.as_str()), name.as_str())
            } else if let Some(name) = caps.name("name2") {
                (caps.name("qty2").map(|m| m.as_str()), caps.name("unit2").map(|m| m.as_str()), name.as_str())
            } else if let Some(name) = caps.name("name3") {
                (caps.name("qty3").map(|m| m.as_str()), None, name.as_str())
            } else {
                continue;
            };

            let quantity: Option<i64> = qty_str.and_then(|q| q.parse::<f64>().ok()).map(|q| q.round() as i64);
            items.push(self.resolve_item(name.trim(), quantity, unit_str, &mut questions));
        }

        if questions.is_empty() {
            IntentResult::OrderIntent { items }
        } else {
            IntentResult::OrderNeedsClarification { partial_items: items, questions }
        }
    }

    fn resolve_item(&self, raw_name: &str, quantity: Option<i64>, unit_token: Option<&str>, questions: &mut Vec<ClarificationQuestion>) -> ParsedItem {
        let unit = unit_token.and_then(|t| canonicalize_unit(t));
        if let Some(token) = unit_token {
            if unit.is_none() {
                questions.push(ClarificationQuestion::InvalidUnit { token: token.to_string() });
            }
        }
        if quantity.is_none() {
            questions.push(ClarificationQuestion::MissingQuantity { token: raw_name.to_string() });
        }

        let product_id = match self.match_product(raw_name) {
            ProductMatch::Exact(id) | ProductMatch::Alias(id) => Some(id),
            ProductMatch::Ambiguous(candidates) => {
                questions.push(ClarificationQuestion::AmbiguousProduct { token: raw_name.to_string(), candidates });
                None
            }
            ProductMatch::None => None,
        };

        ParsedItem { product_id, raw_product_token: raw_name.to_string(), quantity, unit }
    }

    fn match_product(&self, raw_name: &str) -> ProductMatch {
        let folded = fold(raw_name);

        if let Some(product) = self.catalog.iter().find(|p| fold(&p.canonical_name) == folded) {
            return ProductMatch::Exact(product.id);
        }
        if let Some(product) = self.catalog.iter().find(|p| p.aliases.iter().any(|a| fold(a) == folded)) {
            return ProductMatch::Alias(product.id);
        }

        let tokens = token_set(&folded);
        let mut best: Vec<(ProductId, f64)> = self
            .catalog
            .iter()
            .map(|p| (p.id, jaccard_similarity(&tokens, &token_set(&fold(&p.canonical_name)))))
            .filter(|(_, sim)| *sim >= FUZZY_THRESHOLD)
            .collect();
        best.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        match best.len() {
            0 => ProductMatch::None,
            1 => ProductMatch::Alias(best[0].0),
            _ if (best[0].1 - best[1].1).abs() < f64::EPSILON => {
                let names = best.iter().filter(|(_, sim)| (*sim - best[0].1).abs() < f64::EPSILON).filter_map(|(id, _)| self.catalog.iter().find(|p| p.id == *id).map(|p| p.canonical_name.clone())).collect();
                ProductMatch::Ambiguous(names)
            }
            _ => ProductMatch::Alias(best[0].0),
        }
    }
}

enum ProductMatch {
    Exact(ProductId),
    Alias(ProductId),
    Ambiguous(Vec<String>),
    None,
}

fn canonicalize_unit(token: &str) -> Option<Unit> {
    unit_aliases().get(fold(token).as_str()).copied()
}

fn fold(s: &str) -> String {
    s.trim().to_lowercase()
}

fn token_set(s: &str) -> std::collections::HashSet<String> {
    s.split_whitespace().map(ToString::to_string).collect()
}

/// Jaccard similarity of two token sets: `|A ∩ B| / |A ∪ B|`.
fn jaccard_similarity(a: &std::collections::HashSet<String>, b: &std::collections::HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn extract_order_number(caps: &regex::Captures) -> Option<String> {
    caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_common::ids::ProductId;

    fn catalog() -> Vec<Product> {
        vec![
            Product { id: ProductId::new(), canonical_name: "basmati rice".to_string(), aliases: vec!["rice".to_string()], unit: Unit::Kg },
            Product { id: ProductId::new(), canonical_name: "toor dal".to_string(), aliases: vec!["arhar dal".to_string()], unit: Unit::Kg },
        ]
    }

    #[test]
    fn greeting_detected() {
        let catalog = catalog();
        let parser = IntentParser::new(&catalog);
        assert!(matches!(parser.parse("Hello there"), IntentResult::Greeting { .. }));
    }

    #[test]
    fn help_detected() {
        let catalog = catalog();
        let parser = IntentParser::new(&catalog);
        assert!(matches!(parser.parse("help, what can you do?"), IntentResult::Help));
    }

    #[test]
    fn status_query_extracts_order_number() {
        let catalog = catalog();
        let parser = IntentParser::new(&catalog);
        let result = parser.parse("where is my order ORD-1234");
        match result {
            IntentResult::StatusQuery { order_number } => assert_eq!(order_number, "ORD-1234"),
            other => panic!("expected StatusQuery, got {other:?}"),
        }
    }

    #[test]
    fn order_line_resolves_exact_product() {
        let catalog = catalog();
        let parser = IntentParser::new(&catalog);
        let result = parser.parse("10kg rice\n5kg toor dal");
        match result {
            IntentResult::OrderIntent { items } => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].quantity, Some(10));
                assert_eq!(items[0].unit, Some(Unit::Kg));
                assert!(items[0].product_id.is_some());
            }
            other => panic!("expected OrderIntent, got {other:?}"),
        }
    }

    #[test]
    fn unknown_unit_yields_clarification() {
        let catalog = catalog();
        let parser = IntentParser::new(&catalog);
        let result = parser.parse("10zzz rice");
        assert!(matches!(result, IntentResult::OrderNeedsClarification { .. } | IntentResult::Unknown { .. }));
    }

    #[test]
    fn jaccard_similarity_identical_sets_is_one() {
        let a = token_set("basmati rice");
        let b = token_set("basmati rice");
        assert!((jaccard_similarity(&a, &b) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn jaccard_similarity_disjoint_sets_is_zero() {
        let a = token_set("basmati rice");
        let b = token_set("toor dal");
        assert_eq!(jaccard_similarity(&a, &b), 0.0);
    }
}
