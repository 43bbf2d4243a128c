//! Block tree to plain-text normalization.
//!
//! Generation prompts take a flat markdown rendition of the resource
//! page. The walk is iterative with an explicit stack, so arbitrarily
//! deep trees normalize without recursion depth limits. Unsupported
//! block kinds become a typed placeholder in their original position
//! rather than being dropped.

use crate::docstore::notes::NoteEntry;
use crate::docstore::{Block, BlockKind, ResourceMeta, RichText};

/// Flatten a rich-text run into markdown-ish inline text.
fn flatten_rich_text(segments: &[RichText]) -> String {
    let mut out = String::new();
    for segment in segments {
        let mut text = segment.text.clone();
        if segment.code {
            text = format!("`{text}`");
        }
        if segment.bold {
            text = format!("**{text}**");
        }
        if segment.italic {
            text = format!("*{text}*");
        }
        if segment.strikethrough {
            text = format!("~~{text}~~");
        }
        if let Some(href) = &segment.href {
            text = format!("[{text}]({href})");
        }
        out.push_str(&text);
    }
    out
}

fn line_for(block: &Block, number: usize) -> String {
    let text = block
        .kind
        .text()
        .map(flatten_rich_text)
        .unwrap_or_default();
    match &block.kind {
        BlockKind::Heading1 { .. } => format!("# {text}"),
        BlockKind::Heading2 { .. } => format!("## {text}"),
        BlockKind::Heading3 { .. } => format!("### {text}"),
        BlockKind::Paragraph { .. } => text,
        BlockKind::BulletedListItem { .. } => format!("- {text}"),
        BlockKind::NumberedListItem { .. } => format!("{number}. {text}"),
        BlockKind::ToDo { checked, .. } => {
            let mark = if *checked { "x" } else { " " };
            format!("- [{mark}] {text}")
        }
        BlockKind::Quote { .. } => text
            .lines()
            .map(|line| format!("> {line}"))
            .collect::<Vec<_>>()
            .join("\n"),
        BlockKind::Code { language, .. } => {
            format!("```{language}\n{text}\n```")
        }
        BlockKind::Callout { icon, .. } => match icon {
            Some(icon) => format!("> {icon} {text}"),
            None => format!("> {text}"),
        },
        BlockKind::Toggle { .. } => format!("## {text} (collapsed)"),
        BlockKind::Divider => "---".to_string(),
        BlockKind::Image { caption, url } => {
            let label = if caption.is_empty() {
                url.clone()
            } else {
                flatten_rich_text(caption)
            };
            format!("[image: {label}]")
        }
        BlockKind::FileRef { url } => format!("[file: {url}]"),
        BlockKind::Embed { url } => format!("[embed: {url}]"),
        BlockKind::ChildPage { title } => format!("[subpage: {title}]"),
        BlockKind::ChildDatabase { title } => format!("[database: {title}]"),
        BlockKind::Unsupported { kind } => format!("[unsupported: {kind}]"),
    }
}

/// Normalize a block tree into indented markdown, pre-order.
pub fn normalize_blocks(blocks: &[Block]) -> String {
    // (block, depth, 1-based position among numbered siblings)
    let mut stack: Vec<(&Block, usize, usize)> = Vec::new();
    push_level(&mut stack, blocks, 0);

    let mut lines: Vec<String> = Vec::new();
    while let Some((block, depth, number)) = stack.pop() {
        let indent = "  ".repeat(depth);
        let line = line_for(block, number);
        for part in line.lines() {
            lines.push(format!("{indent}{part}"));
        }
        if !block.children.is_empty() {
            push_level(&mut stack, &block.children, depth + 1);
        }
    }
    lines.join("\n")
}

/// Push one sibling level in reverse so the stack pops in document order.
fn push_level<'a>(stack: &mut Vec<(&'a Block, usize, usize)>, level: &'a [Block], depth: usize) {
    let mut numbered = 0usize;
    let mut entries: Vec<(&Block, usize, usize)> = Vec::with_capacity(level.len());
    for block in level {
        let number = if matches!(block.kind, BlockKind::NumberedListItem { .. }) {
            numbered += 1;
            numbered
        } else {
            numbered = 0;
            0
        };
        entries.push((block, depth, number));
    }
    stack.extend(entries.into_iter().rev());
}

/// Assemble the full prompt input: metadata header, normalized content,
/// then any linked notes.
pub fn build_prompt_input(content: &str, meta: &ResourceMeta, notes: &[NoteEntry]) -> String {
    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(&format!("title: {}\n", meta.title));
    if let Some(status) = &meta.status {
        out.push_str(&format!("status: {status}\n"));
    }
    if let Some(name) = &meta.source_name {
        out.push_str(&format!("source: {name}\n"));
    }
    if let Some(kind) = &meta.source_kind {
        out.push_str(&format!("source_type: {kind}\n"));
    }
    if let Some(url) = &meta.source_url {
        out.push_str(&format!("source_url: {url}\n"));
    }
    if let Some(citation) = &meta.source_citation {
        out.push_str(&format!("citation: {citation}\n"));
    }
    out.push_str("---\n\n");
    out.push_str(content);

    if !notes.is_empty() {
        out.push_str(&format!("\n\n## Linked Notes ({} entries)\n", notes.len()));
        for note in notes {
            out.push_str(&format!("\n### {}", note.title));
            if let Some(kind) = &note.kind {
                out.push_str(&format!(" ({kind})"));
            }
            out.push('\n');
            if let Some(location) = &note.location {
                out.push_str(&format!("Location: {location}\n"));
            }
            if !note.tags.is_empty() {
                out.push_str(&format!("Tags: {}\n", note.tags.join(", ")));
            }
            if !note.content.is_empty() {
                out.push_str(&note.content);
                out.push('\n');
            }
        }
    }
    out
}
