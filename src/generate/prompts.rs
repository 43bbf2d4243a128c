//! Prompt templates.
//!
//! Each generative action pairs an instruction template with the JSON
//! contract the validator enforces. The contract text is embedded in
//! the system prompt so the model sees exactly the shape it is graded
//! against.

use crate::types::ActionType;

const CHECKLIST_TEMPLATE: &str = "You are a study coach. Read the provided material and \
produce an actionable study checklist. Group items into sections. Each item is one of \
four kinds: read (consume a span of the material), extract (pull out facts or structure), \
reflect (connect to prior knowledge), apply (practice or produce something). Give realistic \
minute estimates and, where useful, a concrete success criterion.";

const TREE_TEMPLATE: &str = "You are a knowledge cartographer. Read the provided material \
and produce a concept tree: the major concepts as nodes, each with a one-paragraph summary \
and a few keywords, linked to a parent node where one exists. Node ids are stable handles, \
lowercase with underscores, prefixed node_. The parent references must form a forest with \
no cycles.";

const PAGES_TEMPLATE: &str = "You are a technical writer. Read the provided material and \
produce a small set of study pages. Each page has a title, ordered sections with headings \
and markdown bodies, optional review questions, and optional related-topic pointers. Prefer \
depth on the few ideas that matter over breadth.";

const FLASHCARDS_TEMPLATE: &str = "You are a spaced-repetition author. Read the provided \
material and produce flashcard decks. Cards are basic (front question, back answer) or \
cloze (front contains a {{...}} deletion). Rate difficulty 1 (easy) to 5 (hard). Keep each \
side self-contained and under a couple of sentences.";

const CHECKLIST_CONTRACT: &str = r#"{
  "title": "string",
  "sections": [{
    "name": "string",
    "items": [{
      "text": "string",
      "type": "read | extract | reflect | apply",
      "minutes": 20,
      "success_criteria": "string (optional)"
    }]
  }]
}"#;

const TREE_CONTRACT: &str = r#"{
  "title": "string",
  "nodes": [{
    "node_id": "node_<lowercase_underscores>",
    "parent_id": "node_... or null for roots",
    "name": "string",
    "summary": "string",
    "keywords": ["string"]
  }]
}"#;

const PAGES_CONTRACT: &str = r#"{
  "title": "string",
  "pages": [{
    "title": "string",
    "template": "study_guide | concept | summary",
    "sections": [{ "heading": "string", "body": "markdown string" }],
    "review_questions": ["string"],
    "related": ["string"]
  }]
}"#;

const FLASHCARDS_CONTRACT: &str = r#"{
  "title": "string",
  "decks": [{
    "name": "string",
    "cards": [{
      "front": "string",
      "back": "string",
      "type": "basic | cloze",
      "difficulty": 3,
      "context": "string (optional)",
      "tags": ["string"]
    }]
  }]
}"#;

fn template(action: ActionType) -> &'static str {
    match action {
        ActionType::Checklist => CHECKLIST_TEMPLATE,
        ActionType::Tree => TREE_TEMPLATE,
        ActionType::Pages => PAGES_TEMPLATE,
        ActionType::Flashcards => FLASHCARDS_TEMPLATE,
        ActionType::Approve => "",
    }
}

pub fn contract(action: ActionType) -> &'static str {
    match action {
        ActionType::Checklist => CHECKLIST_CONTRACT,
        ActionType::Tree => TREE_CONTRACT,
        ActionType::Pages => PAGES_CONTRACT,
        ActionType::Flashcards => FLASHCARDS_CONTRACT,
        ActionType::Approve => "",
    }
}

/// Full system prompt for a generative action.
pub fn system_prompt(action: ActionType) -> String {
    format!(
        "{}\n\nOUTPUT INSTRUCTIONS\nRespond with a single JSON object and nothing else. \
         No prose, no code fences. The object must match this shape exactly:\n\n{}",
        template(action),
        contract(action)
    )
}

/// Reprompt after a contract violation: original input, the rejected
/// output, and the specific violations to fix.
pub fn repair_prompt(input: &str, rejected: &str, errors: &[String]) -> String {
    let mut out = String::new();
    out.push_str(input);
    out.push_str("\n\nYour previous response was rejected:\n");
    for error in errors {
        out.push_str(&format!("- {error}\n"));
    }
    out.push_str("\nPrevious response:\n");
    out.push_str(rejected);
    out.push_str("\n\nProduce a corrected JSON object that fixes every listed problem.");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_embeds_contract() {
        for action in ActionType::GENERATIVE {
            let prompt = system_prompt(action);
            assert!(prompt.contains("OUTPUT INSTRUCTIONS"));
            assert!(prompt.contains("\"title\": \"string\""));
        }
    }

    #[test]
    fn repair_prompt_lists_errors() {
        let prompt = repair_prompt(
            "material",
            "{}",
            &["title must not be empty".to_string()],
        );
        assert!(prompt.contains("- title must not be empty"));
        assert!(prompt.contains("Previous response:\n{}"));
    }
}
