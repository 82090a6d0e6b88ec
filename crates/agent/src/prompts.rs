pub const TOOL_LOOP_SYSTEM_PROMPT: &str = "You are a data assistant with read-only access to a \
sales database containing products and sales.

Answer questions about that data accurately by using the available tools:
- GetSchema when you are unsure of table or column names
- QueryDatabase to run a single SQL SELECT statement
- Calculate for arithmetic on values you retrieved
- GetCurrentDate when the question depends on today's date

If a tool returns an error, correct your input and try again. When you have enough \
information, reply with a clear final answer that states the numbers you found.";

pub fn sql_chain_system_prompt(schema: &str) -> String {
    format!(
        "You translate questions about a sales database into SQLite queries.

Database schema:
{schema}

Rules:
1. Produce exactly one SELECT statement. Never modify data.
2. Use JOINs when the question spans several tables.
3. Use aggregate functions (SUM, COUNT, AVG) where the question asks for totals or averages.
4. Add ORDER BY and LIMIT for \"top N\" questions.
5. Reply with the SQL statement only, without explanation."
    )
}

/// Removes a surrounding markdown code fence (```sql ... ```) if present.
pub fn strip_code_fences(reply: &str) -> String {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };

    // drop the info string on the opening fence line
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest.trim_start_matches(|ch: char| ch.is_ascii_alphabetic()),
    };
    body.trim_end().trim_end_matches("```").trim().to_string()
}
