use log::debug;

/// One ranked candidate from the gesture recognizer: the name of a stored
/// template and how closely the drawn stroke resembled it.
#[derive(Debug, Clone, PartialEq)]
pub struct GestureMatch {
    pub name: String,
    pub score: f64,
}

impl GestureMatch {
    pub fn new(name: impl Into<String>, score: f64) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

/// Return the strongest candidate whose score is strictly above `threshold`.
///
/// The recognizer does not guarantee any ordering, so every candidate is
/// scanned. A score exactly equal to the threshold does not qualify. Several
/// candidates over the threshold still produce a single decision; the best
/// one is returned so the caller can show which template fired.
pub fn best_match<'a>(matches: &'a [GestureMatch], threshold: f64) -> Option<&'a GestureMatch> {
    matches
        .iter()
        .filter(|m| m.score > threshold)
        .max_by(|a, b| a.score.total_cmp(&b.score))
}

/// Boolean form of the capture decision.
pub fn should_capture(matches: &[GestureMatch], threshold: f64) -> bool {
    best_match(matches, threshold).is_some()
}

/// Parse one recognition event from the recognizer feed.
///
/// A line is whitespace-separated `name=score` tokens, e.g.
/// `circle=3.52 square=1.20`. Malformed tokens are skipped.
pub fn parse_matches(line: &str) -> Vec<GestureMatch> {
    line.split_whitespace()
        .filter_map(|token| {
            let (name, score) = token.split_once('=')?;
            if name.is_empty() {
                debug!("Skipping recognizer token with empty name: '{}'", token);
                return None;
            }
            match score.parse::<f64>() {
                Ok(score) => Some(GestureMatch::new(name, score)),
                Err(_) => {
                    debug!("Skipping malformed recognizer token: '{}'", token);
                    None
                }
            }
        })
        .collect()
}
