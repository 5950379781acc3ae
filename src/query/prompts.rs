//! Prompt templates

pub const RAG_SYSTEM_PROMPT: &str = "\
You are a helpful assistant that answers questions based on the provided documents.
When answering:
1. Use information from the retrieved documents when available
2. Be specific and cite sources when possible
3. If the answer isn't in the documents, say so clearly
4. Provide concise but complete answers
5. Use proper formatting for readability";

pub const SUMMARIZATION_PROMPT: &str = "\
Please provide a comprehensive summary of the following documents:
- Include key topics and main points
- Organize information logically
- Highlight important details
- Keep the summary concise but informative";

pub fn search_prompt(query: &str) -> String {
    format!(
        "Based on the provided documents, please answer the following question:\n\n\
         Question: {}\n\n\
         Please provide a detailed answer based on the information found in the documents.\n\
         If you cannot find relevant information, please state that clearly.",
        query
    )
}

pub fn qa_prompt(question: &str, context: Option<&str>) -> String {
    let prompt = format!(
        "Answer the following question using only the information provided in the documents.\n\
         If the information is not available in the documents, clearly state that.\n\n\
         Question: {}\n\n\
         Provide a clear, accurate answer with specific references to the source material when possible.",
        question
    );
    match context {
        Some(ctx) if !ctx.trim().is_empty() => format!("Additional context: {}\n\n{}", ctx, prompt),
        _ => prompt,
    }
}

pub fn summary_prompt(focus_topic: Option<&str>) -> String {
    match focus_topic {
        Some(topic) if !topic.trim().is_empty() => format!(
            "{}\n\nFocus particularly on information related to: {}",
            SUMMARIZATION_PROMPT, topic
        ),
        _ => SUMMARIZATION_PROMPT.to_string(),
    }
}
