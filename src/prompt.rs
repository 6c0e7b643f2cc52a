/// Fixed instruction text sent ahead of the file excerpts.
pub fn preamble(repo: &str) -> String {
    format!(
        "You are an AI that crafts high-quality, comprehensive README.md files for GitHub repositories.\n\
         Write a professional README in GitHub-flavored Markdown for the repository {repo}.\n\
         Cover: a concise overview, key features, tech stack, setup instructions, usage examples, \
         an architecture summary, contribution guidelines and a license placeholder.\n\
         Infer missing context cautiously and mark assumptions. Prefer facts from the provided files; \
         if something is unknown, say that it is unknown. Use Bun in command examples when bun.lock \
         or bunfig appears."
    )
}

pub const EXCERPTS_HEADING: &str = "Repository files (excerpts):";

/// Take at most `max_chars` chars from the start of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

/// Preamble + heading + packed excerpts, the excerpt section clamped to `max_chars`.
pub fn assemble_prompt(repo: &str, packed_text: &str, max_chars: usize) -> String {
    let excerpts = truncate_chars(packed_text, max_chars);
    let mut out = preamble(repo);
    out.reserve(EXCERPTS_HEADING.len() + excerpts.len() + 2);
    out.push_str("\n\n");
    out.push_str(EXCERPTS_HEADING);
    out.push_str(excerpts);
    out
}
