//! Keyword-rule prompt classification shared by the router, the calibration
//! module, and the synthesis strategy selector. Pure functions, no I/O.

/// The kind of answer a prompt is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptClass {
    Analytical,
    Creative,
    Technical,
    Explanatory,
    Factual,
    Conversational,
}

impl std::fmt::Display for PromptClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Analytical => write!(f, "analytical"),
            Self::Creative => write!(f, "creative"),
            Self::Technical => write!(f, "technical"),
            Self::Explanatory => write!(f, "explanatory"),
            Self::Factual => write!(f, "factual"),
            Self::Conversational => write!(f, "conversational"),
        }
    }
}

const ANALYTICAL_KEYWORDS: [&str; 8] = [
    "analyze", "analyse", "compare", "evaluate", "assess", "pros and cons", "trade-off",
    "tradeoff",
];
const CREATIVE_KEYWORDS: [&str; 7] = [
    "write a story",
    "poem",
    "creative",
    "imagine",
    "fiction",
    "brainstorm",
    "invent",
];
const TECHNICAL_KEYWORDS: [&str; 10] = [
    "code", "function", "algorithm", "debug", "implement", "api", "compile", "error", "sql",
    "regex",
];
const EXPLANATORY_KEYWORDS: [&str; 6] = [
    "explain",
    "how does",
    "how do",
    "why does",
    "describe",
    "walk me through",
];
const FACTUAL_KEYWORDS: [&str; 7] = [
    "what is", "who is", "when did", "where is", "define", "list the", "how many",
];

/// Match a keyword against lowercased text. Phrases match as substrings;
/// single words match at word starts only, so `"api"` does not fire inside
/// `"capital"`.
fn contains_keyword(lower: &str, keyword: &str) -> bool {
    if keyword.contains(' ') || keyword.contains('-') {
        lower.contains(keyword)
    } else {
        lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| word.starts_with(keyword) && !word.is_empty())
    }
}

impl PromptClass {
    /// Classify a prompt by keyword rules, first match in priority order;
    /// anything that matches nothing is conversational.
    pub fn classify(prompt: &str) -> Self {
        let lower = prompt.to_lowercase();
        let hit = |keywords: &[&str]| keywords.iter().any(|k| contains_keyword(&lower, k));

        if hit(&TECHNICAL_KEYWORDS) {
            Self::Technical
        } else if hit(&ANALYTICAL_KEYWORDS) {
            Self::Analytical
        } else if hit(&CREATIVE_KEYWORDS) {
            Self::Creative
        } else if hit(&EXPLANATORY_KEYWORDS) {
            Self::Explanatory
        } else if hit(&FACTUAL_KEYWORDS) {
            Self::Factual
        } else {
            Self::Conversational
        }
    }
}

/// Prompt complexity, from length plus signal keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

const HIGH_COMPLEXITY_KEYWORDS: [&str; 8] = [
    "architecture",
    "distributed",
    "scalab",
    "in depth",
    "comprehensive",
    "detailed analysis",
    "step by step",
    "end-to-end",
];

impl Complexity {
    /// Assess a prompt: long prompts or high-signal keywords raise the
    /// grade, very short prompts lower it.
    pub fn assess(prompt: &str) -> Self {
        let lower = prompt.to_lowercase();
        let keyword_hits = HIGH_COMPLEXITY_KEYWORDS
            .iter()
            .filter(|k| contains_keyword(&lower, k))
            .count();
        let words = prompt.split_whitespace().count();

        if keyword_hits >= 2 || (keyword_hits >= 1 && words > 30) || words > 120 {
            Self::High
        } else if words < 8 && keyword_hits == 0 {
            Self::Low
        } else {
            Self::Medium
        }
    }
}

/// Reference category used for per-category reference embeddings in the
/// calibration module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceCategory {
    General,
    Technical,
    Analytical,
    Creative,
    Explanatory,
}

impl std::fmt::Display for ReferenceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::General => write!(f, "general"),
            Self::Technical => write!(f, "technical"),
            Self::Analytical => write!(f, "analytical"),
            Self::Creative => write!(f, "creative"),
            Self::Explanatory => write!(f, "explanatory"),
        }
    }
}

impl ReferenceCategory {
    pub const ALL: [Self; 5] = [
        Self::General,
        Self::Technical,
        Self::Analytical,
        Self::Creative,
        Self::Explanatory,
    ];

    /// Pick the category whose keywords best match the content; ties and
    /// no-matches fall back to `General`.
    pub fn for_content(content: &str) -> Self {
        let lower = content.to_lowercase();
        let score =
            |keywords: &[&str]| keywords.iter().filter(|k| contains_keyword(&lower, k)).count();

        let candidates = [
            (Self::Technical, score(&TECHNICAL_KEYWORDS)),
            (Self::Analytical, score(&ANALYTICAL_KEYWORDS)),
            (Self::Creative, score(&CREATIVE_KEYWORDS)),
            (Self::Explanatory, score(&EXPLANATORY_KEYWORDS)),
        ];
        candidates
            .into_iter()
            .filter(|(_, n)| *n > 0)
            .max_by_key(|(_, n)| *n)
            .map(|(c, _)| c)
            .unwrap_or(Self::General)
    }

    /// Short reference passage embedded once per category and compared
    /// against response embeddings.
    pub fn reference_text(&self) -> &'static str {
        match self {
            Self::General => {
                "A clear, well-organized answer that addresses the question directly, \
                 provides relevant context, and ends with a concise summary."
            }
            Self::Technical => {
                "A precise technical explanation with correct terminology, a worked \
                 code example, notes on edge cases, and guidance on trade-offs."
            }
            Self::Analytical => {
                "A structured analysis that lays out the evaluation criteria, compares \
                 the alternatives against each criterion, and draws a justified conclusion."
            }
            Self::Creative => {
                "An original, vivid piece of writing with a consistent voice, concrete \
                 imagery, and a satisfying narrative arc."
            }
            Self::Explanatory => {
                "A step-by-step explanation that starts from first principles, builds \
                 up gradually, and illustrates each step with a simple example."
            }
        }
    }
}

impl From<PromptClass> for ReferenceCategory {
    fn from(class: PromptClass) -> Self {
        match class {
            PromptClass::Technical => Self::Technical,
            PromptClass::Analytical => Self::Analytical,
            PromptClass::Creative => Self::Creative,
            PromptClass::Explanatory => Self::Explanatory,
            PromptClass::Factual | PromptClass::Conversational => Self::General,
        }
    }
}
