// Memoizes a syntax highlighter's per-line tokenizer across edits.
//
// A line is re-tokenized only when its text or the state flowing into it
// changed; rows at or below an edit are invalidated explicitly.

/// Output of tokenizing one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineTokens<T, S> {
    pub tokens: Vec<T>,
    pub end_state: S,
}

#[derive(Debug, Clone)]
struct CachedLine<T, S> {
    text: String,
    start_state: S,
    output: LineTokens<T, S>,
}

#[derive(Debug, Clone)]
pub struct TokenStateCache<T, S> {
    rows: Vec<Option<CachedLine<T, S>>>,
    hits: usize,
    misses: usize,
}

impl<T, S> Default for TokenStateCache<T, S> {
    fn default() -> Self {
        Self { rows: Vec::new(), hits: 0, misses: 0 }
    }
}

impl<T: Clone, S: Clone + PartialEq> TokenStateCache<T, S> {
    /// Wraps `tokenize`: returns the cached output for `row` when the line
    /// text and incoming state are unchanged.
    pub fn tokenize_line<F>(&mut self, row: usize, line: &str, start_state: &S, tokenize: F) -> LineTokens<T, S>
    where
        F: FnOnce(&str, &S) -> LineTokens<T, S>,
    {
        if let Some(Some(cached)) = self.rows.get(row) {
            if cached.text == line && cached.start_state == *start_state {
                self.hits += 1;
                return cached.output.clone();
            }
        }

        self.misses += 1;
        let output = tokenize(line, start_state);
        if self.rows.len() <= row {
            self.rows.resize_with(row + 1, || None);
        }
        self.rows[row] = Some(CachedLine {
            text: line.to_owned(),
            start_state: start_state.clone(),
            output: output.clone(),
        });
        output
    }

    /// Tokenizes every line, threading end states through.
    pub fn tokenize_all<F>(&mut self, lines: &[String], initial: S, mut tokenize: F) -> Vec<Vec<T>>
    where
        F: FnMut(&str, &S) -> LineTokens<T, S>,
    {
        let mut state = initial;
        let mut out = Vec::with_capacity(lines.len());
        for (row, line) in lines.iter().enumerate() {
            let result = self.tokenize_line(row, line, &state, &mut tokenize);
            state = result.end_state;
            out.push(result.tokens);
        }
        self.rows.truncate(lines.len());
        out
    }

    /// Drops cached rows from `row` onward.
    pub fn invalidate_from(&mut self, row: usize) {
        self.rows.truncate(row);
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }
}
