//! Prompt amplification: controlled repetition of a prompt to bias the
//! generation model toward the repeated content.

/// Separator inserted between repeated copies of the prompt. The full-width
/// comma survives the provider's tokenizer for both CJK and Latin prompts.
pub const SEPARATOR: &str = "，";

pub const DEFAULT_REPEAT_COUNT: usize = 3;
pub const SMART_MIN_LENGTH: usize = 10;
pub const SMART_MAX_LENGTH: usize = 500;

/// Outcome of one amplification pass. Produced fresh per call, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Amplification {
    pub enhanced: String,
    pub original: String,
    pub repeat_count: usize,
    pub was_enhanced: bool,
}

impl Amplification {
    fn unchanged(trimmed: &str) -> Self {
        Self {
            enhanced: trimmed.to_string(),
            original: trimmed.to_string(),
            repeat_count: 1,
            was_enhanced: false,
        }
    }
}

/// Repeat `prompt` `repeat_count` times joined with [`SEPARATOR`].
///
/// The prompt is trimmed first; trimmed prompts shorter than two characters
/// are returned unchanged with `repeat_count = 1`. A `repeat_count` of zero
/// is treated as one.
pub fn amplify(prompt: &str, repeat_count: usize) -> Amplification {
    let trimmed = prompt.trim();
    if trimmed.chars().count() < 2 {
        return Amplification::unchanged(trimmed);
    }

    let repeat_count = repeat_count.max(1);
    let enhanced = vec![trimmed; repeat_count].join(SEPARATOR);

    Amplification {
        enhanced,
        original: trimmed.to_string(),
        repeat_count,
        was_enhanced: true,
    }
}

/// Amplify only when the trimmed prompt length falls within
/// `[min_length, max_length]`. Very short prompts gain little from
/// repetition and very long ones would inflate the request for no benefit;
/// outside the band this is a no-op with the same shape as the short-prompt
/// case of [`amplify`].
pub fn smart_amplify(
    prompt: &str,
    min_length: usize,
    max_length: usize,
    repeat_count: usize,
) -> Amplification {
    let trimmed = prompt.trim();
    let len = trimmed.chars().count();

    if len < min_length || len > max_length {
        return Amplification::unchanged(trimmed);
    }

    amplify(trimmed, repeat_count)
}

/// [`smart_amplify`] with the documented defaults.
pub fn smart_amplify_default(prompt: &str) -> Amplification {
    smart_amplify(
        prompt,
        SMART_MIN_LENGTH,
        SMART_MAX_LENGTH,
        DEFAULT_REPEAT_COUNT,
    )
}
