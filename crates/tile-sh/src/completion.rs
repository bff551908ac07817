/// Remembers the candidates of the last completion request so repeated Tab
/// presses on the same input walk through them.
#[derive(Debug, Default, Clone)]
pub struct CompletionCycle {
    key: Option<(String, String)>,
    candidates: Vec<String>,
    cursor: usize,
}

impl CompletionCycle {
    pub fn is_cached(&self, buffer: &str, token: &str) -> bool {
        self.key
            .as_ref()
            .is_some_and(|(cached_buffer, cached_token)| cached_buffer == buffer && cached_token == token)
    }

    pub fn fill(&mut self, buffer: &str, token: &str, candidates: Vec<String>) {
        self.key = Some((buffer.to_string(), token.to_string()));
        self.candidates = candidates;
        self.cursor = 0;
    }

    pub fn reset(&mut self) {
        self.key = None;
        self.candidates.clear();
        self.cursor = 0;
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// Next candidate, wrapping to the first after the last.
    pub fn next(&mut self) -> Option<&str> {
        if self.candidates.is_empty() {
            return None;
        }
        let index = self.cursor % self.candidates.len();
        self.cursor = index + 1;
        self.candidates.get(index).map(String::as_str)
    }
}

/// The word being completed: everything after the last space.
pub fn current_token(buffer: &str) -> &str {
    buffer.rsplit(' ').next().unwrap_or(buffer)
}
