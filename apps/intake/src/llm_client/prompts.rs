// Shared prompt fragments. Feature modules keep their own prompts.rs next to
// the code that uses them.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Instruction against inventing data that is not in the source document.
pub const NO_INVENTION_INSTRUCTION: &str = "\
    Only extract information that is literally present in the document. \
    Never infer, guess or invent values. \
    Use null for any field that is not present.";
