//! Score accumulation shared by the rule scorers.

/// A running rule score with the ordered reasons that produced it.
///
/// Scores are unbounded in both directions internally; negative values are
/// meaningful as penalties but are clamped to zero for display.
#[derive(Debug, Clone, Default)]
pub struct ScoreBreakdown {
    pub score: f64,
    pub reasons: Vec<String>,
}

impl ScoreBreakdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a contribution and record why.
    pub fn add(&mut self, delta: f64, reason: impl Into<String>) {
        self.score += delta;
        self.reasons.push(reason.into());
    }

    /// Apply a contribution without a reason entry.
    pub fn adjust(&mut self, delta: f64) {
        self.score += delta;
    }

    pub fn merge(&mut self, other: ScoreBreakdown) {
        self.score += other.score;
        self.reasons.extend(other.reasons);
    }

    /// Score rounded to one decimal, as used for threshold comparison.
    pub fn rounded(&self) -> f64 {
        (self.score * 10.0).round() / 10.0
    }

    /// Externally visible score: never negative.
    pub fn displayed(&self) -> f64 {
        self.rounded().max(0.0)
    }
}

/// Unicode ranges treated as emoji for density heuristics.
const EMOJI_RANGES: &[(u32, u32)] = &[
    (0x1F600, 0x1F64F), // emoticons
    (0x1F300, 0x1F5FF), // symbols and pictographs
    (0x1F680, 0x1F6FF), // transport
    (0x1F700, 0x1F77F),
    (0x1F780, 0x1F7FF),
    (0x1F800, 0x1F8FF),
    (0x1F900, 0x1F9FF),
    (0x1FA00, 0x1FA6F),
    (0x1FA70, 0x1FAFF),
    (0x2600, 0x26FF), // miscellaneous symbols
    (0x2700, 0x27BF), // dingbats
];

/// Count emoji codepoints in a text sample.
pub fn count_emoji(text: &str) -> usize {
    text.chars()
        .filter(|c| {
            let cp = *c as u32;
            EMOJI_RANGES.iter().any(|&(start, end)| cp >= start && cp <= end)
        })
        .count()
}

/// Ratio of visible text to total markup length, in [0, 1].
///
/// Tag-stripping approximation; design-heavy promotional mail sits near the
/// bottom of the range, plain-text mail near the top.
pub fn text_to_html_ratio(html: &str) -> f64 {
    if html.is_empty() {
        return 0.0;
    }

    let mut text_len = 0usize;
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag && !c.is_whitespace() => text_len += 1,
            _ => {}
        }
    }

    (text_len as f64 / html.chars().count() as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_and_rounds() {
        let mut breakdown = ScoreBreakdown::new();
        breakdown.add(3.5, "Critical keywords in subject");
        breakdown.add(2.0, "Reply/Forward subject");
        breakdown.adjust(-0.05);
        assert_eq!(breakdown.rounded(), 5.5);
        assert_eq!(breakdown.reasons.len(), 2);
    }

    #[test]
    fn displayed_score_clamps_negative() {
        let mut breakdown = ScoreBreakdown::new();
        breakdown.add(-4.0, "Promotional indicators detected");
        assert_eq!(breakdown.rounded(), -4.0);
        assert_eq!(breakdown.displayed(), 0.0);
    }

    #[test]
    fn counts_emoji() {
        assert_eq!(count_emoji("no emoji here"), 0);
        assert_eq!(count_emoji("sale! 🔥🔥🎉"), 3);
        assert_eq!(count_emoji("sun ☀ and scissors ✂"), 2);
    }

    #[test]
    fn text_ratio_bounds() {
        assert_eq!(text_to_html_ratio(""), 0.0);
        let mostly_text = "Hello, this is a plain message with one <b>tag</b>.";
        assert!(text_to_html_ratio(mostly_text) > 0.7);
        let mostly_markup = "<table><tr><td><img src=\"x\"/></td></tr></table>a";
        assert!(text_to_html_ratio(mostly_markup) < 0.3);
    }
}
