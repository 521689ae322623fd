pub const SYSTEM_PROMPT: &str = "You are a helpful assistant that analyzes text to identify key entities and their relationships. \
For each relationship, explain the connection between entities in a clear and concise way. \
Focus on the most important and meaningful relationships. \
Keep entity names concise and relationship descriptions brief but clear. \
Only include relationships that are explicitly stated or strongly implied in the text.";

pub const SUMMARY_SYSTEM_PROMPT: &str = "You condense documents. Keep every named entity and every stated relationship between entities; drop everything else.";

/// `index` is zero-based.
pub fn chunk_prompt(chunk: &str, index: usize, total: usize) -> String {
    format!(
        "Analyze this text chunk ({} of {}) and identify key relationships between entities.
Express each relationship using this format: [First Entity] to [Second Entity] (Description of relationship)

Format rules:
1. Each line should be: Entity1 to Entity2 (Description)
2. Keep entity names clear but concise
3. Place the relationship description in parentheses
4. Make descriptions brief and specific
5. Only include relationships that are clear and meaningful

Examples:
Google to Chrome Browser (develops and maintains the browser)
Chrome to Web Extensions (provides platform and APIs)
Microsoft to Windows (develops and distributes operating system)

Only output the relationships, no additional text or explanation.
Each relationship should be on its own line.

Text chunk to analyze: {chunk}",
        index + 1,
        total
    )
}

pub fn summary_prompt(text: &str) -> String {
    format!(
        "Summarize the following text as a list of short factual statements about who or what relates to whom.\n\n{text}"
    )
}
