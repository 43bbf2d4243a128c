//! Artifact rendering.
//!
//! Turns validated artifacts into block trees for write-back. Rendering
//! is pure; batching and segment-length limits are applied by the
//! writer afterwards.

use crate::docstore::block::{
    bullet, code, divider, heading1, heading2, heading3, numbered, paragraph, paragraph_colored,
    todo,
};
use crate::docstore::{Block, BlockKind, RichText};
use crate::generate::artifact::{
    ChecklistArtifact, ChecklistItemKind, Flashcard, FlashcardKind, FlashcardsArtifact, PageSpec,
    TreeArtifact, TreeNode,
};
use std::collections::HashMap;

fn item_color(kind: ChecklistItemKind) -> &'static str {
    match kind {
        ChecklistItemKind::Read => "default",
        ChecklistItemKind::Extract => "blue",
        ChecklistItemKind::Reflect => "purple",
        ChecklistItemKind::Apply => "green",
    }
}

pub fn render_checklist(artifact: &ChecklistArtifact) -> Vec<Block> {
    let mut blocks = Vec::new();
    for section in &artifact.sections {
        blocks.push(heading2(&section.name));
        for item in &section.items {
            let mut text = item.text.clone();
            if let Some(minutes) = item.minutes {
                text.push_str(&format!(" ({minutes}min)"));
            }
            if let Some(criteria) = &item.success_criteria {
                text.push_str(&format!(" → {criteria}"));
            }
            blocks.push(todo(&text, item_color(item.kind)));
        }
    }
    blocks
}

fn node_heading(name: &str, depth: usize) -> Block {
    match depth {
        0 => heading1(name),
        1 => heading2(name),
        2 => heading3(name),
        _ => Block::new(BlockKind::BulletedListItem {
            text: vec![RichText {
                text: name.to_string(),
                bold: true,
                italic: false,
                code: false,
                strikethrough: false,
                color: None,
                href: None,
            }],
        }),
    }
}

pub fn render_tree(artifact: &TreeArtifact) -> Vec<Block> {
    let mut children: HashMap<Option<&str>, Vec<&TreeNode>> = HashMap::new();
    for node in &artifact.nodes {
        children
            .entry(node.parent_id.as_deref())
            .or_default()
            .push(node);
    }

    let mut blocks = Vec::new();
    // depth-first from the roots, in artifact order
    let mut stack: Vec<(&TreeNode, usize)> = children
        .get(&None)
        .map(|roots| roots.iter().rev().map(|n| (*n, 0)).collect())
        .unwrap_or_default();
    while let Some((node, depth)) = stack.pop() {
        blocks.push(node_heading(&node.name, depth));
        blocks.push(paragraph(&node.summary));
        if !node.keywords.is_empty() {
            blocks.push(paragraph_colored(
                &format!("Keywords: {}", node.keywords.join(", ")),
                "gray",
            ));
        }
        if let Some(kids) = children.get(&Some(node.node_id.as_str())) {
            stack.extend(kids.iter().rev().map(|n| (*n, depth + 1)));
        }
    }
    blocks
}

pub fn render_page(page: &PageSpec) -> Vec<Block> {
    let mut blocks = Vec::new();
    for section in &page.sections {
        blocks.push(heading2(&section.heading));
        blocks.extend(markdown_to_blocks(&section.body));
    }
    if !page.review_questions.is_empty() {
        blocks.push(heading3("Review Questions"));
        for question in &page.review_questions {
            blocks.push(numbered(question));
        }
    }
    if !page.related.is_empty() {
        blocks.push(paragraph_colored(
            &format!("Related: {}", page.related.join(", ")),
            "gray",
        ));
    }
    blocks
}

fn difficulty_emoji(difficulty: u8) -> &'static str {
    match difficulty {
        1 => "🟢",
        2 => "🟡",
        3 => "🟠",
        4 => "🔴",
        _ => "⚫",
    }
}

fn card_front(card: &Flashcard) -> String {
    let prefix = match card.kind {
        FlashcardKind::Basic => "",
        FlashcardKind::Cloze => "Cloze: ",
    };
    format!("{} {prefix}{}", difficulty_emoji(card.difficulty), card.front)
}

pub fn render_flashcards(artifact: &FlashcardsArtifact) -> Vec<Block> {
    let total: usize = artifact.decks.iter().map(|d| d.cards.len()).sum();
    let mut blocks = vec![
        paragraph(&format!(
            "{} cards across {} decks.",
            total,
            artifact.decks.len()
        )),
        divider(),
    ];
    for deck in &artifact.decks {
        blocks.push(heading2(&format!("🎴 {}", deck.name)));
        for card in &deck.cards {
            blocks.push(heading3(&card_front(card)));
            blocks.push(paragraph(&card.back));
            let mut extras = Vec::new();
            if let Some(context) = &card.context {
                extras.push(context.clone());
            }
            if !card.tags.is_empty() {
                extras.push(format!("Tags: {}", card.tags.join(", ")));
            }
            if !extras.is_empty() {
                blocks.push(paragraph_colored(&extras.join(" | "), "gray"));
            }
        }
    }
    blocks
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Importable CSV rendition of a flashcard artifact.
pub fn flashcards_csv(artifact: &FlashcardsArtifact) -> String {
    let mut out = String::from("Front,Back,Tags,Deck,Type,Difficulty\n");
    for deck in &artifact.decks {
        for card in &deck.cards {
            let kind = match card.kind {
                FlashcardKind::Basic => "basic",
                FlashcardKind::Cloze => "cloze",
            };
            out.push_str(&format!(
                "{},{},{},{},{},{}\n",
                csv_escape(&card.front),
                csv_escape(&card.back),
                csv_escape(&card.tags.join(";")),
                csv_escape(&deck.name),
                kind,
                card.difficulty
            ));
        }
    }
    out
}

/// Line-oriented markdown to blocks: headings, quotes, lists, fenced
/// code, paragraphs. Unrecognized lines fall through as paragraphs.
pub fn markdown_to_blocks(markdown: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut paragraph_lines: Vec<&str> = Vec::new();
    let mut code_lines: Vec<&str> = Vec::new();
    let mut code_language: Option<String> = None;

    let flush_paragraph = |lines: &mut Vec<&str>, blocks: &mut Vec<Block>| {
        if !lines.is_empty() {
            blocks.push(paragraph(&lines.join(" ")));
            lines.clear();
        }
    };

    for line in markdown.lines() {
        if let Some(language) = code_language.as_deref() {
            if line.trim_start() == "```" {
                blocks.push(code(&code_lines.join("\n"), language));
                code_lines.clear();
                code_language = None;
            } else {
                code_lines.push(line);
            }
            continue;
        }
        let trimmed = line.trim();
        if let Some(language) = trimmed.strip_prefix("```") {
            flush_paragraph(&mut paragraph_lines, &mut blocks);
            code_language = Some(language.trim().to_string());
        } else if let Some(rest) = trimmed.strip_prefix("### ") {
            flush_paragraph(&mut paragraph_lines, &mut blocks);
            blocks.push(heading3(rest));
        } else if let Some(rest) = trimmed.strip_prefix("## ") {
            flush_paragraph(&mut paragraph_lines, &mut blocks);
            blocks.push(heading2(rest));
        } else if let Some(rest) = trimmed.strip_prefix("# ") {
            flush_paragraph(&mut paragraph_lines, &mut blocks);
            blocks.push(heading1(rest));
        } else if let Some(rest) = trimmed.strip_prefix("> ") {
            flush_paragraph(&mut paragraph_lines, &mut blocks);
            blocks.push(Block::new(BlockKind::Quote {
                text: vec![RichText::plain(rest)],
            }));
        } else if let Some(rest) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
        {
            flush_paragraph(&mut paragraph_lines, &mut blocks);
            blocks.push(bullet(rest));
        } else if let Some(rest) = numbered_item(trimmed) {
            flush_paragraph(&mut paragraph_lines, &mut blocks);
            blocks.push(numbered(rest));
        } else if trimmed.is_empty() {
            flush_paragraph(&mut paragraph_lines, &mut blocks);
        } else {
            paragraph_lines.push(trimmed);
        }
    }
    // unterminated fence renders as code rather than silently dropping
    if let Some(language) = code_language.as_deref() {
        blocks.push(code(&code_lines.join("\n"), language));
    }
    flush_paragraph(&mut paragraph_lines, &mut blocks);
    blocks
}

fn numbered_item(line: &str) -> Option<&str> {
    let dot = line.find(". ")?;
    if dot > 0 && line[..dot].chars().all(|c| c.is_ascii_digit()) {
        Some(&line[dot + 2..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::artifact::{
        ChecklistItem, ChecklistSection, FlashcardDeck, PageSection, PageTemplate,
    };

    fn sample_checklist() -> ChecklistArtifact {
        ChecklistArtifact {
            title: "Plan".to_string(),
            sections: vec![ChecklistSection {
                name: "Core".to_string(),
                items: vec![ChecklistItem {
                    text: "Skim chapter".to_string(),
                    kind: ChecklistItemKind::Read,
                    minutes: Some(20),
                    success_criteria: Some("notes taken".to_string()),
                }],
            }],
        }
    }

    #[test]
    fn checklist_items_carry_minutes_and_criteria() {
        let blocks = render_checklist(&sample_checklist());
        assert_eq!(blocks.len(), 2);
        let text = blocks[1].kind.text().unwrap();
        assert_eq!(text[0].text, "Skim chapter (20min) → notes taken");
        assert_eq!(text[0].color.as_deref(), Some("default"));
    }

    #[test]
    fn tree_renders_depth_as_heading_level() {
        let artifact = TreeArtifact {
            title: "Map".to_string(),
            nodes: vec![
                TreeNode {
                    node_id: "node_root".to_string(),
                    parent_id: None,
                    name: "Root".to_string(),
                    summary: "top".to_string(),
                    keywords: vec!["k".to_string()],
                },
                TreeNode {
                    node_id: "node_child".to_string(),
                    parent_id: Some("node_root".to_string()),
                    name: "Child".to_string(),
                    summary: "below".to_string(),
                    keywords: vec![],
                },
            ],
        };
        let blocks = render_tree(&artifact);
        assert!(matches!(blocks[0].kind, BlockKind::Heading1 { .. }));
        assert!(matches!(blocks[3].kind, BlockKind::Heading2 { .. }));
        let keywords = blocks[2].kind.text().unwrap();
        assert_eq!(keywords[0].text, "Keywords: k");
    }

    #[test]
    fn page_renders_sections_questions_and_related() {
        let page = PageSpec {
            title: "Guide".to_string(),
            template: PageTemplate::StudyGuide,
            sections: vec![PageSection {
                heading: "Intro".to_string(),
                body: "First line.\n\n- point one".to_string(),
            }],
            review_questions: vec!["Why?".to_string()],
            related: vec!["Other topic".to_string()],
        };
        let blocks = render_page(&page);
        assert!(matches!(blocks[0].kind, BlockKind::Heading2 { .. }));
        assert!(matches!(blocks[2].kind, BlockKind::BulletedListItem { .. }));
        assert!(matches!(blocks[3].kind, BlockKind::Heading3 { .. }));
        assert!(matches!(blocks[4].kind, BlockKind::NumberedListItem { .. }));
    }

    #[test]
    fn markdown_code_fences_and_lists() {
        let blocks = markdown_to_blocks("# Title\n\ntext\n\n```rust\nlet x = 1;\n```\n1. first");
        assert!(matches!(blocks[0].kind, BlockKind::Heading1 { .. }));
        assert!(matches!(blocks[1].kind, BlockKind::Paragraph { .. }));
        match &blocks[2].kind {
            BlockKind::Code { language, text } => {
                assert_eq!(language, "rust");
                assert_eq!(text[0].text, "let x = 1;");
            }
            other => panic!("expected code block, got {other:?}"),
        }
        assert!(matches!(blocks[3].kind, BlockKind::NumberedListItem { .. }));
    }

    #[test]
    fn csv_escapes_embedded_commas_and_quotes() {
        let artifact = FlashcardsArtifact {
            title: "Deck".to_string(),
            decks: vec![FlashcardDeck {
                name: "Basics".to_string(),
                cards: vec![Flashcard {
                    front: "What is \"x\", roughly?".to_string(),
                    back: "A variable".to_string(),
                    kind: FlashcardKind::Basic,
                    difficulty: 2,
                    context: None,
                    tags: vec!["intro".to_string()],
                }],
            }],
        };
        let csv = flashcards_csv(&artifact);
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("Front,Back,Tags,Deck,Type,Difficulty"));
        assert_eq!(
            lines.next(),
            Some("\"What is \"\"x\"\", roughly?\",A variable,intro,Basics,basic,2")
        );
    }

    #[test]
    fn flashcards_render_summary_and_difficulty() {
        let artifact = FlashcardsArtifact {
            title: "Deck".to_string(),
            decks: vec![FlashcardDeck {
                name: "Basics".to_string(),
                cards: vec![Flashcard {
                    front: "Q".to_string(),
                    back: "A".to_string(),
                    kind: FlashcardKind::Cloze,
                    difficulty: 4,
                    context: Some("ch. 2".to_string()),
                    tags: vec![],
                }],
            }],
        };
        let blocks = render_flashcards(&artifact);
        assert_eq!(blocks[0].kind.text().unwrap()[0].text, "1 cards across 1 decks.");
        let front = blocks[3].kind.text().unwrap();
        assert_eq!(front[0].text, "🔴 Cloze: Q");
        assert_eq!(blocks[5].kind.text().unwrap()[0].text, "ch. 2");
    }
}
