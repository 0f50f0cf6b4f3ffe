//! Prompt templates for answer generation.

use askcorpus_core::models::RetrievalResult;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant answering questions about a \
private document corpus.\n\n\
**Guidelines:**\n\
1. For greetings (hello, hi, etc.): respond warmly and introduce yourself\n\
2. For questions about the corpus: use the provided context to answer accurately\n\
3. Do not mention source numbers or citations in your response\n\
4. If no relevant context is found, say so and suggest rephrasing the question\n\
5. Be conversational, concise, and helpful";

/// Format retrieved chunks into the context block of the prompt.
///
/// Each chunk gets a numbered source header with its title and author.
pub fn format_context(results: &[RetrievalResult]) -> String {
    if results.is_empty() {
        return "No relevant context found.".to_string();
    }

    let parts: Vec<String> = results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let title = if r.metadata.title.is_empty() {
                "Unknown"
            } else {
                &r.metadata.title
            };
            let author = if r.metadata.author.is_empty() {
                "Unknown"
            } else {
                &r.metadata.author
            };
            format!("[Source {}: \"{}\" by {}]\n{}\n", i + 1, title, author, r.text)
        })
        .collect();

    parts.join("\n---\n")
}

/// Build the full generation prompt: context block plus the question.
pub fn build_rag_prompt(question: &str, results: &[RetrievalResult]) -> String {
    format!(
        "Based on the following context from the document corpus, please answer the user's question.\n\n\
        CONTEXT:\n{}\n\n\
        USER QUESTION: {}\n\n\
        Please provide a helpful and accurate response based on the context above. \
        Do not mention source numbers or citations in your response.",
        format_context(results),
        question
    )
}
