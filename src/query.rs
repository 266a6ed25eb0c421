//! The RAG query engine: embed the question, retrieve scoped context,
//! prompt the LLM, persist the answered query.
//!
//! ```text
//! question ─▶ embed ─▶ index.search(space, K) ─▶ hydrate ─▶ assemble
//!                                                              │
//!        Query{answer, sources} ◀─ persist ◀─ LLM ◀─ grounded prompt
//! ```
//!
//! Context assembly walks the hits in score order, appending labeled
//! `[source i]` blocks of snippet text until the character budget would be
//! exceeded; exactly the hits that made it into the prompt become the
//! query's source list. The source list is determined by retrieval; the
//! model's answer text is never parsed back into citations.
//!
//! Retrieval is deterministic up to ANN approximation for a fixed store and
//! index state; the LLM step is not, and callers must treat answer text as
//! non-reproducible. The per-question deadline is enforced at every await
//! point; once it expires the call fails without persisting anything.

use chrono::Utc;
use uuid::Uuid;

use crate::context::UserContext;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::models::{Item, Query, QuerySource};
use crate::search;

const MAX_QUESTION_CHARS: usize = 2000;
/// Display truncation for persisted source snippets.
const SOURCE_SNIPPET_CHARS: usize = 240;

const SYSTEM_PROMPT: &str = "You answer questions based on the user's saved content. \
Be accurate, helpful, and cite your sources.";

const GROUNDED_INSTRUCTION: &str = "Answer using ONLY the provided sources. \
If they do not contain enough information, say so clearly. \
Be concise and cite source indices like [source 2] where appropriate.";

/// Ask a question against one space and persist the resulting query record.
pub async fn ask(
    ctx: &UserContext,
    space_id: &str,
    question: &str,
    k: Option<usize>,
    deadline: &Deadline,
) -> Result<Query> {
    let question = question.trim();
    if question.is_empty() {
        return Err(Error::InvalidInput("question cannot be empty".to_string()));
    }
    if question.chars().count() > MAX_QUESTION_CHARS {
        return Err(Error::InvalidInput(format!(
            "question exceeds {} characters",
            MAX_QUESTION_CHARS
        )));
    }

    ctx.store.get_space(space_id).await?;
    if ctx.store.count_ready_items(space_id).await? == 0 {
        return Err(Error::EmptySpace);
    }

    let k = search::effective_k(ctx, k);

    deadline.check()?;
    let q_vec = ctx.embedder.embed(question, deadline).await?;
    let hits = ctx.index.search(&q_vec, space_id, k)?;

    // Hydrate; anything deleted between search and hydrate drops out here.
    let ids: Vec<String> = hits.iter().map(|h| h.item_id.clone()).collect();
    let items = ctx.store.hydrate(&ids).await?;
    let scored: Vec<(Item, f32)> = hits
        .into_iter()
        .filter_map(|hit| {
            items
                .iter()
                .find(|i| i.id == hit.item_id)
                .cloned()
                .map(|item| (item, hit.score))
        })
        .collect();

    let assembled = assemble_context(
        &scored,
        ctx.config.retrieval.snippet_chars,
        ctx.config.retrieval.context_budget_chars,
    );

    let prompt = format!(
        "{}\n\nContext:\n{}\n\nQuestion: {}",
        GROUNDED_INSTRUCTION, assembled.context, question
    );

    deadline.check()?;
    let answer = deadline
        .bound(ctx.llm.complete(SYSTEM_PROMPT, &prompt, deadline))
        .await?;

    let sources = assembled
        .used
        .into_iter()
        .map(|(item, score)| QuerySource {
            snippet: truncate_chars(item.body_text(), SOURCE_SNIPPET_CHARS),
            item_id: item.id,
            kind: item.kind,
            score,
        })
        .collect();

    let query = Query {
        id: Uuid::new_v4().to_string(),
        space_id: space_id.to_string(),
        question: question.to_string(),
        answer,
        sources,
        created_at: Utc::now(),
    };

    ctx.store.insert_query(&query).await?;
    Ok(query)
}

/// Paged query history for a space, newest first.
pub async fn list_queries(
    ctx: &UserContext,
    space_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<Query>> {
    ctx.store.get_space(space_id).await?;
    ctx.store.list_queries(space_id, limit.max(0), offset.max(0)).await
}

struct AssembledContext {
    context: String,
    /// The hits that actually made it into the prompt, in order.
    used: Vec<(Item, f32)>,
}

/// Walk hits best-first, appending `[source i]` blocks until the character
/// budget would be exceeded.
fn assemble_context(
    scored: &[(Item, f32)],
    snippet_chars: usize,
    budget_chars: usize,
) -> AssembledContext {
    let mut context = String::new();
    let mut used = Vec::new();
    let mut spent = 0usize;

    for (item, score) in scored.iter() {
        let snippet = snippet_at_whitespace(item.body_text(), snippet_chars);
        if snippet.is_empty() {
            continue;
        }

        // Labels are 1-based positions in the kept list, so they line up
        // with the persisted source order.
        let index = used.len() + 1;
        let label = match &item.details {
            crate::models::ItemDetails::File { original_name, .. } => {
                format!("[source {}] (file: {}) ", index, original_name)
            }
            _ => format!("[source {}] ", index),
        };

        let block_len = label.chars().count() + snippet.chars().count() + 2;
        if spent + block_len > budget_chars && !used.is_empty() {
            break;
        }

        if !context.is_empty() {
            context.push_str("\n\n");
        }
        context.push_str(&label);
        context.push_str(&snippet);
        spent += block_len;
        used.push((item.clone(), *score));
    }

    AssembledContext { context, used }
}

/// First `max_chars` characters of `text`, backed off to a whitespace
/// boundary so words are not cut mid-way.
fn snippet_at_whitespace(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let cut: String = text.chars().take(max_chars).collect();
    match cut.rfind(char::is_whitespace) {
        Some(pos) if pos > 0 => cut[..pos].trim_end().to_string(),
        _ => cut,
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
