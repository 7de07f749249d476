use std::collections::HashSet;

use super::{CodeMetricsError, FileReadings, StaticAnalyzer};

const DECISION_KEYWORDS: &[&str] = &[
    "if", "elif", "for", "while", "except", "and", "or", "assert", "case",
];

/// Line-based analyzer for indentation-scoped (Python-style) source.
///
/// Per-function complexity is 1 + decision keywords inside the function
/// body. Maintainability uses the classic index
/// `(171 - 5.2 ln V - 0.23 G - 16.2 ln L) * 100 / 171`, with the Halstead
/// volume `V` approximated from token counts, `G` the file's total
/// complexity and `L` its logical line count.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAnalyzer;

struct OpenFunction {
    indent: usize,
    complexity: f64,
}

impl StaticAnalyzer for HeuristicAnalyzer {
    fn analyze(&self, source: &str) -> Result<FileReadings, CodeMetricsError> {
        let mut open: Vec<OpenFunction> = Vec::new();
        let mut complexities = Vec::new();
        let mut decisions_total = 0usize;
        let mut logical_lines = 0u64;
        let mut tokens_total = 0usize;
        let mut vocabulary: HashSet<String> = HashSet::new();
        let mut literals = LiteralStripper::default();

        for raw in source.lines() {
            let continues_string = literals.in_string();
            let code = literals.strip(raw);
            let trimmed = code.trim();
            // blank, comment-only, or wholly inside a multi-line string
            if trimmed.is_empty() {
                continue;
            }
            logical_lines += 1;

            let tokens = tokenize(trimmed);
            let decisions = tokens
                .iter()
                .filter(|t| DECISION_KEYWORDS.contains(&t.as_str()))
                .count();
            decisions_total += decisions;
            tokens_total += tokens.len();

            let indent = raw.len() - raw.trim_start().len();
            // indentation of a string continuation line says nothing about scope
            if !continues_string {
                while open.last().is_some_and(|f| indent <= f.indent) {
                    if let Some(done) = open.pop() {
                        complexities.push(done.complexity);
                    }
                }
            }

            if let Some(current) = open.last_mut() {
                current.complexity += decisions as f64;
            }
            if !continues_string && starts_function(&tokens) {
                open.push(OpenFunction {
                    indent,
                    complexity: 1.0,
                });
            }
            vocabulary.extend(tokens);
        }
        complexities.extend(open.into_iter().rev().map(|f| f.complexity));

        if logical_lines == 0 {
            return Err(CodeMetricsError::Analysis("source has no logical lines".into()));
        }

        let distinct = vocabulary.len().max(2) as f64;
        let volume = (tokens_total.max(1) as f64 * distinct.log2()).max(1.0);
        let total_complexity = 1.0 + decisions_total as f64;
        let raw_index = 171.0
            - 5.2 * volume.ln()
            - 0.23 * total_complexity
            - 16.2 * (logical_lines as f64).ln();
        let maintainability_index = (raw_index * 100.0 / 171.0).clamp(0.0, 100.0);

        Ok(FileReadings {
            function_complexities: complexities,
            maintainability_index,
            lines_of_code: logical_lines,
        })
    }
}

fn starts_function(tokens: &[String]) -> bool {
    match tokens {
        [first, ..] if first == "def" => true,
        [first, second, ..] => first == "async" && second == "def",
        _ => false,
    }
}

/// Removes string contents and trailing comments so keywords inside them
/// are not counted. Each literal leaves a single `"` token behind. A
/// triple-quoted string left open at the end of a line stays open for the
/// following lines.
#[derive(Debug, Default)]
struct LiteralStripper {
    open_triple: Option<char>,
}

impl LiteralStripper {
    fn in_string(&self) -> bool {
        self.open_triple.is_some()
    }

    fn strip(&mut self, line: &str) -> String {
        let chars: Vec<char> = line.chars().collect();
        let mut out = String::with_capacity(line.len());
        let mut single: Option<char> = None;
        let mut i = 0;

        while i < chars.len() {
            let ch = chars[i];
            if let Some(quote) = self.open_triple {
                if ch == '\\' {
                    i += 2;
                } else if is_triple(&chars, i, quote) {
                    self.open_triple = None;
                    i += 3;
                } else {
                    i += 1;
                }
                continue;
            }
            if let Some(quote) = single {
                if ch == '\\' {
                    i += 2;
                    continue;
                }
                if ch == quote {
                    single = None;
                }
                i += 1;
                continue;
            }

            match ch {
                '#' => break,
                '"' | '\'' if is_triple(&chars, i, ch) => {
                    self.open_triple = Some(ch);
                    out.push('"');
                    i += 3;
                }
                '"' | '\'' => {
                    single = Some(ch);
                    out.push('"');
                    i += 1;
                }
                _ => {
                    out.push(ch);
                    i += 1;
                }
            }
        }
        out
    }
}

fn is_triple(chars: &[char], at: usize, quote: char) -> bool {
    chars
        .get(at..at + 3)
        .is_some_and(|run| run.iter().all(|&c| c == quote))
}

/// Identifier/number runs and operator runs, whitespace dropped.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_is_word = false;

    for ch in line.chars() {
        if ch.is_whitespace() {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            continue;
        }
        let is_word = ch.is_alphanumeric() || ch == '_';
        if !current.is_empty() && is_word != current_is_word {
            tokens.push(std::mem::take(&mut current));
        }
        current_is_word = is_word;
        current.push(ch);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
