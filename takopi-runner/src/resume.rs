// ABOUTME: Textual resume-instruction syntax shared by all engines.
// ABOUTME: Formats greppable resume lines and extracts tokens back out of free text.

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::model::{EngineId, ResumeToken};

/// Resume-line syntax for one engine: `` `program flag value` ``.
///
/// The formatted line is what a human could copy-paste to resume the
/// conversation; extraction accepts the same line embedded anywhere in
/// free text, with or without backticks. Values containing whitespace are
/// double-quoted on format and unwrapped on extract.
pub struct ResumeSyntax {
    engine: EngineId,
    program: &'static str,
    flag: &'static str,
    alt_flag: Option<&'static str>,
    re: OnceCell<Regex>,
}

impl ResumeSyntax {
    pub const fn new(
        engine: EngineId,
        program: &'static str,
        flag: &'static str,
        alt_flag: Option<&'static str>,
    ) -> Self {
        Self {
            engine,
            program,
            flag,
            alt_flag,
            re: OnceCell::new(),
        }
    }

    /// Render `value` as the copy-pasteable resume line.
    pub fn format(&self, value: &str) -> String {
        if value.chars().any(char::is_whitespace) {
            format!("`{} {} \"{}\"`", self.program, self.flag, value)
        } else {
            format!("`{} {} {}`", self.program, self.flag, value)
        }
    }

    /// Extract a resume token from arbitrary text; `None` when the text
    /// contains no resume line for this engine.
    pub fn extract(&self, text: &str) -> Option<ResumeToken> {
        let caps = self.regex().captures(text)?;
        let value = caps.name("quoted").or_else(|| caps.name("bare"))?;
        Some(ResumeToken::new(self.engine, value.as_str()))
    }

    fn regex(&self) -> &Regex {
        self.re.get_or_init(|| {
            let mut flags = regex::escape(self.flag);
            if let Some(alt) = self.alt_flag {
                flags.push('|');
                flags.push_str(&regex::escape(alt));
            }
            let pattern = format!(
                r#"(?im)^\s*`?{program}\s+(?:{flags})\s+(?:"(?P<quoted>[^"`]+)"|(?P<bare>[^`\s"]+))`?\s*$"#,
                program = regex::escape(self.program),
            );
            // assembled from escaped literals; always a valid pattern
            Regex::new(&pattern).expect("resume pattern")
        })
    }
}
