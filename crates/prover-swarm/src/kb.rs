//! In-memory knowledge base shared by all agents in a run.
//!
//! The store is id-keyed and last-write-wins. It is owned by the runtime and
//! lives exactly as long as one run; role policies read it and return deltas,
//! only the scheduler writes.

use std::collections::BTreeMap;

use crate::schemas::KbEntry;
use crate::text::{clip, normalize_text_block, DEFAULT_MAX_TEXT_CHARS};

/// Per-entry content cap when rendering the KB into a prompt.
pub const KB_PROMPT_MAX_CONTENT_CHARS: usize = 320;

/// Id-keyed fact store. Backed by a `BTreeMap` so every read order is sorted
/// by id without a sort-on-read step.
#[derive(Debug, Default)]
pub struct KnowledgeBase {
    entries: BTreeMap<String, KbEntry>,
}

impl KnowledgeBase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry by id. Content is whitespace-normalized
    /// and length-capped on the way in.
    pub fn add(&mut self, entry: KbEntry) {
        let normalized = KbEntry {
            id: entry.id.trim().to_string(),
            kind: entry.kind,
            title: entry.title.trim().to_string(),
            content_md: normalize_text_block(&entry.content_md, DEFAULT_MAX_TEXT_CHARS),
            tags: entry.tags.iter().map(|tag| tag.trim().to_string()).collect(),
            sources: entry
                .sources
                .iter()
                .map(|source| source.trim().to_string())
                .collect(),
        };
        self.entries.insert(normalized.id.clone(), normalized);
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = KbEntry>) {
        for entry in entries {
            self.add(entry);
        }
    }

    pub fn get(&self, id: &str) -> Option<&KbEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries sorted by id, the only externally visible read order.
    pub fn snapshot(&self) -> Vec<&KbEntry> {
        self.entries.values().collect()
    }

    /// Compact bullet rendering used as prompt context.
    pub fn render_prompt_md(&self) -> String {
        if self.entries.is_empty() {
            return "None.".to_string();
        }

        let mut lines: Vec<String> = Vec::new();
        for entry in self.entries.values() {
            let content = clip(
                &entry.content_md.replace('\n', " "),
                KB_PROMPT_MAX_CONTENT_CHARS,
            );
            lines.push(format!("- [{}] {}: {}", entry.kind, entry.id, entry.title));
            if !content.is_empty() && content != entry.title.trim() {
                lines.push(format!("  {content}"));
            }
        }
        lines.join("\n")
    }

    /// Formatted appendix lines for the final Markdown report.
    pub fn render_appendix_lines(&self) -> Vec<String> {
        self.entries
            .values()
            .map(|entry| format!("- **{} ({})**: {}", entry.id, entry.kind, entry.content_md))
            .collect()
    }
}
