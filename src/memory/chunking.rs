//! Document ingestion: split a text file into chunks ready for `add_bulk`.

use std::path::Path;

use tracing::{info, warn};

use super::record::{KnowledgeType, MemoryMetadata, MemoryTier};
use crate::error::{HlcsError, HlcsResult};

/// Chunks shorter than this (after trimming) are dropped.
const MIN_CHUNK_CHARS: usize = 20;
/// Paragraphs must be longer than this to be kept.
const MIN_PARAGRAPH_CHARS: usize = 50;
/// Confidence assigned to loaded document chunks.
const DOCUMENT_CONFIDENCE: f32 = 0.8;

const DEFINITION_PREFIXES: &[&str] = &[
    "def ", "class ", "async def ", "fn ", "pub fn ", "async fn ", "pub async fn ", "struct ",
    "pub struct ", "enum ", "pub enum ", "impl ", "impl<", "trait ", "pub trait ",
];

/// How to split a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    /// One chunk per top-level definition block (by indentation).
    Function,
    /// Blank-line separated paragraphs.
    Paragraph,
    /// Fixed-size character windows with 25% overlap.
    Fixed { size: usize },
}

/// A chunk paired with the metadata it should be stored with.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    pub content: String,
    pub metadata: MemoryMetadata,
}

/// Read `path` and split it. Chunks are long-term, confidence 0.8, and
/// carry the file name as their source.
pub async fn load_document(
    path: &Path,
    strategy: ChunkStrategy,
    knowledge_type: KnowledgeType,
) -> HlcsResult<Vec<DocumentChunk>> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        HlcsError::Storage(format!("Failed to read {}: {}", path.display(), e))
    })?;

    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    let chunks: Vec<DocumentChunk> = chunk_text(&text, strategy)?
        .into_iter()
        .filter(|chunk| chunk.trim().chars().count() >= MIN_CHUNK_CHARS)
        .map(|content| DocumentChunk {
            content,
            metadata: MemoryMetadata::new(knowledge_type)
                .with_tier(MemoryTier::LongTerm)
                .with_confidence(DOCUMENT_CONFIDENCE)
                .with_source(source.clone()),
        })
        .collect();

    if chunks.is_empty() {
        warn!(path = %path.display(), "Document produced no chunks");
    } else {
        info!(path = %path.display(), chunks = chunks.len(), "Document chunked");
    }
    Ok(chunks)
}

/// Split `text` according to `strategy`, without the minimum-size filter.
pub fn chunk_text(text: &str, strategy: ChunkStrategy) -> HlcsResult<Vec<String>> {
    match strategy {
        ChunkStrategy::Function => Ok(chunk_by_definition(text)),
        ChunkStrategy::Paragraph => Ok(chunk_by_paragraph(text)),
        ChunkStrategy::Fixed { size: 0 } => Err(HlcsError::invalid("chunk size must be positive")),
        ChunkStrategy::Fixed { size } => Ok(chunk_fixed(text, size)),
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start().len()
}

fn is_definition(trimmed: &str) -> bool {
    DEFINITION_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

fn is_closing(trimmed: &str) -> bool {
    trimmed.starts_with(['}', ')', ']'])
}

fn chunk_by_definition(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.lines().collect();
    let mut chunks = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if !is_definition(line.trim_start()) {
            i += 1;
            continue;
        }

        let base = indent_of(line);
        let mut block = vec![line];
        i += 1;

        while i < lines.len() {
            let next = lines[i];
            let trimmed = next.trim();
            if trimmed.is_empty() || indent_of(next) > base {
                block.push(next);
                i += 1;
                continue;
            }
            // closing delimiter of a braced block at the definition's indent
            if indent_of(next) == base && is_closing(trimmed) {
                block.push(next);
                i += 1;
            }
            break;
        }

        while block.last().is_some_and(|l| l.trim().is_empty()) {
            block.pop();
        }
        chunks.push(block.join("\n"));
    }
    chunks
}

fn chunk_by_paragraph(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| p.chars().count() > MIN_PARAGRAPH_CHARS)
        .map(String::from)
        .collect()
}

fn chunk_fixed(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let overlap = size / 4;
    let step = (size - overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + size).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        if !chunk.trim().is_empty() {
            chunks.push(chunk);
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}
