//! Per-response quality scoring: a pure function over the response content
//! and the original prompt. Deterministic and side-effect free, so the
//! voting engine and the synthesis quality loop can both call it freely.

/// Composite quality score with its four additive components.
///
/// Component caps: length 0.25, structure 0.25, relevance 0.30,
/// specificity 0.20; the composite is their sum, clamped to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QualityScore {
    pub composite: f64,
    pub length_component: f64,
    pub structure_component: f64,
    pub relevance_component: f64,
    pub specificity_component: f64,
}

const LENGTH_CAP: f64 = 0.25;
const STRUCTURE_CAP: f64 = 0.25;
const RELEVANCE_CAP: f64 = 0.30;
const SPECIFICITY_CAP: f64 = 0.20;

/// Preferred content length band in characters.
const MIN_LEN: usize = 100;
const MAX_LEN: usize = 4_000;

/// Words ignored when computing prompt relevance.
const STOP_WORDS: [&str; 32] = [
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "her", "was", "one",
    "our", "out", "day", "get", "has", "him", "his", "how", "its", "new", "now", "old", "see",
    "two", "way", "who", "did", "that", "with",
];

/// Reasoning connectives counted as specificity markers.
const REASONING_MARKERS: [&str; 8] = [
    "because", "therefore", "for example", "for instance", "such as", "this means", "as a result",
    "in contrast",
];

/// Raw prompt-relevance ratio in [0, 1]: the share of substantive prompt
/// tokens that reappear in the content. Used directly by final validation;
/// [`score`] applies the same ratio under [`RELEVANCE_CAP`].
pub fn relevance_ratio(prompt: &str, content: &str) -> f64 {
    relevance_score(prompt, content) / RELEVANCE_CAP
}

/// Score `content` against the `prompt` it answers.
pub fn score(prompt: &str, content: &str) -> QualityScore {
    let length_component = length_score(content);
    let structure_component = structure_score(content);
    let relevance_component = relevance_score(prompt, content);
    let specificity_component = specificity_score(content);

    let composite = (length_component + structure_component + relevance_component
        + specificity_component)
        .clamp(0.0, 1.0);

    QualityScore {
        composite,
        length_component,
        structure_component,
        relevance_component,
        specificity_component,
    }
}

/// Full credit inside the `[MIN_LEN, MAX_LEN]` band; linear ramp below it,
/// gentle penalty above it.
fn length_score(content: &str) -> f64 {
    let len = content.chars().count();
    if len == 0 {
        return 0.0;
    }
    if len < MIN_LEN {
        LENGTH_CAP * (len as f64 / MIN_LEN as f64)
    } else if len <= MAX_LEN {
        LENGTH_CAP
    } else {
        // Oversized answers lose up to half the cap.
        let overshoot = ((len - MAX_LEN) as f64 / MAX_LEN as f64).min(1.0);
        LENGTH_CAP * (1.0 - 0.5 * overshoot)
    }
}

/// Markdown structure markers: headings, bullets, numbered lists, bold
/// spans, paragraph breaks.
fn structure_score(content: &str) -> f64 {
    let mut markers = 0usize;
    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            markers += 2;
        } else if trimmed.starts_with("- ")
            || trimmed.starts_with("* ")
            || trimmed
                .split_once('.')
                .map(|(head, _)| head.chars().all(|c| c.is_ascii_digit()) && !head.is_empty())
                .unwrap_or(false)
        {
            markers += 1;
        }
    }
    markers += content.matches("**").count() / 2;
    markers += content.matches("\n\n").count().min(4);

    STRUCTURE_CAP * (markers as f64 / 8.0).min(1.0)
}

/// Ratio of substantive prompt tokens (length > 3, stop words removed) that
/// reappear in the content.
fn relevance_score(prompt: &str, content: &str) -> f64 {
    let content_lower = content.to_lowercase();
    let prompt_tokens: Vec<String> = prompt
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 3 && !STOP_WORDS.contains(t))
        .map(|t| t.to_string())
        .collect();
    if prompt_tokens.is_empty() {
        // Nothing substantive to match against; give half credit.
        return RELEVANCE_CAP * 0.5;
    }
    let matched = prompt_tokens
        .iter()
        .filter(|t| content_lower.contains(t.as_str()))
        .count();
    RELEVANCE_CAP * (matched as f64 / prompt_tokens.len() as f64)
}

/// Numbers, examples, and reasoning connectives.
fn specificity_score(content: &str) -> f64 {
    let lower = content.to_lowercase();
    let mut markers = 0usize;

    markers += REASONING_MARKERS
        .iter()
        .map(|m| lower.matches(m).count())
        .sum::<usize>();

    let digit_tokens = content
        .split_whitespace()
        .filter(|t| t.chars().any(|c| c.is_ascii_digit()))
        .count();
    markers += digit_tokens.min(5);

    if lower.contains("e.g.") || lower.contains("i.e.") {
        markers += 1;
    }

    SPECIFICITY_CAP * (markers as f64 / 6.0).min(1.0)
}
