// Output-format fragments shared by every stage that talks to the model.
// Stage-specific prompts live in `pipeline::prompts`.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Plain-text answer format accepted from endpoints that cannot do JSON mode.
pub const SCORE_TEXT_FORMAT: &str = "If you cannot produce JSON, answer in exactly this form:\n\
    SCORE: <integer 1-10>\n\
    REASONING: <two or three sentences>";
