//! Lexical urgency classification
//!
//! A coarse, recall-favoring heuristic: a message is urgent when any vocabulary
//! term occurs anywhere in it, case-insensitively. Over-triggering is accepted
//! (e.g. "icu" inside an unrelated word); missing a real emergency is not.

/// Default urgency vocabulary
pub const DEFAULT_URGENCY_TERMS: &[&str] = &[
    "emergency",
    "urgent",
    "critical",
    "critical bleeding",
    "icu",
    "bleeding heavily",
    "dying",
    "immediate",
    "unconscious",
];

/// Stateless urgency classifier over a fixed vocabulary
#[derive(Debug, Clone)]
pub struct UrgencyClassifier {
    terms: Vec<String>,
}

impl UrgencyClassifier {
    /// Create a classifier from a custom vocabulary
    ///
    /// Terms are lowercased; blank terms are dropped.
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let terms = terms
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();
        Self { terms }
    }

    /// Returns true if any vocabulary term occurs in `text`
    pub fn classify(&self, text: &str) -> bool {
        let haystack = text.to_lowercase();
        self.terms.iter().any(|term| haystack.contains(term.as_str()))
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }
}

impl Default for UrgencyClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_URGENCY_TERMS)
    }
}

/// Classify with the default vocabulary
pub fn classify(text: &str) -> bool {
    UrgencyClassifier::default().classify(text)
}
