//! Typed generation artifacts and their contracts.
//!
//! Each generative action has a JSON shape the model must produce.
//! Deserialization gives structure; [`GeneratedArtifact::validate`]
//! enforces the semantic contract (minimum counts, length caps,
//! identifier patterns, parent references that form a forest).

use crate::types::ActionType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

const MAX_TITLE_LEN: usize = 500;
const MAX_SUMMARY_LEN: usize = 1000;
const MAX_KEYWORD_LEN: usize = 200;
const MAX_BODY_LEN: usize = 2000;

// ---------------------------------------------------------------------------
// Checklist

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistArtifact {
    pub title: String,
    pub sections: Vec<ChecklistSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistSection {
    pub name: String,
    pub items: Vec<ChecklistItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: ChecklistItemKind,
    #[serde(default)]
    pub minutes: Option<u32>,
    #[serde(default)]
    pub success_criteria: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecklistItemKind {
    Read,
    Extract,
    Reflect,
    Apply,
}

impl ChecklistItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecklistItemKind::Read => "read",
            ChecklistItemKind::Extract => "extract",
            ChecklistItemKind::Reflect => "reflect",
            ChecklistItemKind::Apply => "apply",
        }
    }
}

// ---------------------------------------------------------------------------
// Tree

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeArtifact {
    pub title: String,
    pub nodes: Vec<TreeNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub node_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub name: String,
    pub summary: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

// ---------------------------------------------------------------------------
// Pages

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagesArtifact {
    pub title: String,
    pub pages: Vec<PageSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSpec {
    pub title: String,
    #[serde(default)]
    pub template: PageTemplate,
    pub sections: Vec<PageSection>,
    #[serde(default)]
    pub review_questions: Vec<String>,
    #[serde(default)]
    pub related: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageTemplate {
    #[default]
    StudyGuide,
    Concept,
    Summary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageSection {
    pub heading: String,
    pub body: String,
}

// ---------------------------------------------------------------------------
// Flashcards

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashcardsArtifact {
    pub title: String,
    pub decks: Vec<FlashcardDeck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashcardDeck {
    pub name: String,
    pub cards: Vec<Flashcard>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flashcard {
    pub front: String,
    pub back: String,
    #[serde(rename = "type", default)]
    pub kind: FlashcardKind,
    /// 1 (easy) through 5 (hard).
    pub difficulty: u8,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashcardKind {
    #[default]
    Basic,
    Cloze,
}

// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GeneratedArtifact {
    Checklist(ChecklistArtifact),
    Tree(TreeArtifact),
    Pages(PagesArtifact),
    Flashcards(FlashcardsArtifact),
}

impl GeneratedArtifact {
    /// Deserialize `value` into the artifact shape for `action`.
    pub fn from_json(action: ActionType, value: &Value) -> Result<Self, String> {
        let artifact = match action {
            ActionType::Checklist => serde_json::from_value(value.clone())
                .map(GeneratedArtifact::Checklist)
                .map_err(|e| format!("checklist shape mismatch: {e}"))?,
            ActionType::Tree => serde_json::from_value(value.clone())
                .map(GeneratedArtifact::Tree)
                .map_err(|e| format!("tree shape mismatch: {e}"))?,
            ActionType::Pages => serde_json::from_value(value.clone())
                .map(GeneratedArtifact::Pages)
                .map_err(|e| format!("pages shape mismatch: {e}"))?,
            ActionType::Flashcards => serde_json::from_value(value.clone())
                .map(GeneratedArtifact::Flashcards)
                .map_err(|e| format!("flashcards shape mismatch: {e}"))?,
            ActionType::Approve => {
                return Err("approve does not produce a generated artifact".to_string())
            }
        };
        Ok(artifact)
    }

    pub fn title(&self) -> &str {
        match self {
            GeneratedArtifact::Checklist(a) => &a.title,
            GeneratedArtifact::Tree(a) => &a.title,
            GeneratedArtifact::Pages(a) => &a.title,
            GeneratedArtifact::Flashcards(a) => &a.title,
        }
    }

    /// Check the semantic contract. Returns a list of human-readable
    /// violations, empty when the artifact is acceptable.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        check_len(&mut errors, "title", self.title(), MAX_TITLE_LEN);
        if self.title().trim().is_empty() {
            errors.push("title must not be empty".to_string());
        }
        match self {
            GeneratedArtifact::Checklist(a) => validate_checklist(a, &mut errors),
            GeneratedArtifact::Tree(a) => validate_tree(a, &mut errors),
            GeneratedArtifact::Pages(a) => validate_pages(a, &mut errors),
            GeneratedArtifact::Flashcards(a) => validate_flashcards(a, &mut errors),
        }
        errors
    }
}

fn check_len(errors: &mut Vec<String>, field: &str, value: &str, max: usize) {
    if value.chars().count() > max {
        errors.push(format!("{field} exceeds {max} characters"));
    }
}

fn validate_checklist(a: &ChecklistArtifact, errors: &mut Vec<String>) {
    if a.sections.is_empty() {
        errors.push("checklist needs at least one section".to_string());
    }
    for (si, section) in a.sections.iter().enumerate() {
        check_len(errors, &format!("sections[{si}].name"), &section.name, MAX_TITLE_LEN);
        if section.items.is_empty() {
            errors.push(format!("sections[{si}] has no items"));
        }
        for (ii, item) in section.items.iter().enumerate() {
            check_len(
                errors,
                &format!("sections[{si}].items[{ii}].text"),
                &item.text,
                MAX_BODY_LEN,
            );
            if item.text.trim().is_empty() {
                errors.push(format!("sections[{si}].items[{ii}].text is empty"));
            }
        }
    }
}

fn valid_node_id(id: &str) -> bool {
    id.strip_prefix("node_")
        .map(|rest| {
            !rest.is_empty()
                && rest
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        })
        .unwrap_or(false)
}

fn validate_tree(a: &TreeArtifact, errors: &mut Vec<String>) {
    if a.nodes.is_empty() {
        errors.push("tree needs at least one node".to_string());
    }
    let mut seen = HashSet::new();
    for (ni, node) in a.nodes.iter().enumerate() {
        if !valid_node_id(&node.node_id) {
            errors.push(format!(
                "nodes[{ni}].node_id {:?} must match node_<lowercase/digits/underscores>",
                node.node_id
            ));
        }
        if !seen.insert(node.node_id.as_str()) {
            errors.push(format!("duplicate node_id {:?}", node.node_id));
        }
        check_len(errors, &format!("nodes[{ni}].name"), &node.name, MAX_TITLE_LEN);
        check_len(errors, &format!("nodes[{ni}].summary"), &node.summary, MAX_SUMMARY_LEN);
        for keyword in &node.keywords {
            check_len(errors, &format!("nodes[{ni}].keywords"), keyword, MAX_KEYWORD_LEN);
        }
    }

    let parents: HashMap<&str, Option<&str>> = a
        .nodes
        .iter()
        .map(|n| (n.node_id.as_str(), n.parent_id.as_deref()))
        .collect();
    for node in &a.nodes {
        let Some(parent) = node.parent_id.as_deref() else {
            continue;
        };
        if !parents.contains_key(parent) {
            errors.push(format!(
                "nodes {:?} references unknown parent {:?}",
                node.node_id, parent
            ));
            continue;
        }
        // Walk up; a visited set bounded by node count catches cycles.
        let mut visited = HashSet::new();
        let mut current = node.node_id.as_str();
        visited.insert(current);
        while let Some(&Some(next)) = parents.get(current) {
            if !visited.insert(next) {
                errors.push(format!("parent chain from {:?} forms a cycle", node.node_id));
                break;
            }
            if visited.len() > a.nodes.len() {
                break;
            }
            current = next;
        }
    }
}

fn validate_pages(a: &PagesArtifact, errors: &mut Vec<String>) {
    if a.pages.is_empty() {
        errors.push("pages needs at least one page".to_string());
    }
    for (pi, page) in a.pages.iter().enumerate() {
        check_len(errors, &format!("pages[{pi}].title"), &page.title, MAX_TITLE_LEN);
        if page.sections.is_empty() {
            errors.push(format!("pages[{pi}] has no sections"));
        }
        for (si, section) in page.sections.iter().enumerate() {
            check_len(
                errors,
                &format!("pages[{pi}].sections[{si}].heading"),
                &section.heading,
                MAX_TITLE_LEN,
            );
            if section.body.trim().is_empty() {
                errors.push(format!("pages[{pi}].sections[{si}].body is empty"));
            }
        }
    }
}

fn validate_flashcards(a: &FlashcardsArtifact, errors: &mut Vec<String>) {
    if a.decks.is_empty() {
        errors.push("flashcards needs at least one deck".to_string());
    }
    for (di, deck) in a.decks.iter().enumerate() {
        if deck.cards.is_empty() {
            errors.push(format!("decks[{di}] has no cards"));
        }
        for (ci, card) in deck.cards.iter().enumerate() {
            check_len(errors, &format!("decks[{di}].cards[{ci}].front"), &card.front, MAX_BODY_LEN);
            check_len(errors, &format!("decks[{di}].cards[{ci}].back"), &card.back, MAX_BODY_LEN);
            if card.front.trim().is_empty() || card.back.trim().is_empty() {
                errors.push(format!("decks[{di}].cards[{ci}] has an empty side"));
            }
            if !(1..=5).contains(&card.difficulty) {
                errors.push(format!(
                    "decks[{di}].cards[{ci}].difficulty {} is outside 1..=5",
                    card.difficulty
                ));
            }
        }
    }
}
