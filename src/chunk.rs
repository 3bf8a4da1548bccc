//! Fixed-length content chunker and batched block publishing.
//!
//! Generated text is split into fragments of at most `max_fragment_len`
//! characters so that each fits a store text field (2000 characters, with
//! margin). Fragments become paragraph [`Block`]s, which are appended to a
//! document in request batches of at most `max_batch_size` blocks.
//!
//! Splitting is size-bound only: a fragment may end mid-word, and
//! concatenating the fragments reproduces the input exactly.

use std::future::Future;

use anyhow::{Context, Result};

use crate::models::Block;

/// Default fragment length, in characters.
pub const MAX_FRAGMENT_LEN: usize = 1900;

/// Default number of blocks per append request.
pub const MAX_BATCH_SIZE: usize = 100;

/// Split text into fragments of at most `max_len` characters (not bytes).
/// Returns no fragments for empty text.
pub fn chunk_text(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let mut fragments = Vec::new();
    let mut start = 0;
    let mut count = 0;

    for (pos, _) in text.char_indices() {
        if count == max_len {
            fragments.push(text[start..pos].to_string());
            start = pos;
            count = 0;
        }
        count += 1;
    }

    if start < text.len() {
        fragments.push(text[start..].to_string());
    }

    fragments
}

/// Wrap each fragment as a paragraph, preceded by a divider and heading
/// when `heading` is set.
pub fn to_blocks(fragments: Vec<String>, heading: Option<&str>) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(fragments.len() + 2);
    if let Some(heading) = heading.filter(|h| !h.trim().is_empty()) {
        blocks.push(Block::Divider);
        blocks.push(Block::Heading(heading.to_string()));
    }
    blocks.extend(fragments.into_iter().map(Block::Paragraph));
    blocks
}

/// Send `blocks` through `append` in order, at most `max_batch_size` at a
/// time. Returns the number of append calls made.
///
/// The first failing call aborts the publish; batches already sent stay in
/// the document.
pub async fn publish_blocks<'a, F, Fut>(
    blocks: &'a [Block],
    max_batch_size: usize,
    mut append: F,
) -> Result<usize>
where
    F: FnMut(&'a [Block]) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let batches: Vec<&'a [Block]> = blocks.chunks(max_batch_size.max(1)).collect();
    let total = batches.len();

    for (i, batch) in batches.into_iter().enumerate() {
        append(batch)
            .await
            .with_context(|| format!("append batch {} of {} failed", i + 1, total))?;
    }

    Ok(total)
}
