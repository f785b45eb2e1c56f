use super::ast::Span;

/// A single positioned error. `code` is a stable machine-readable tag,
/// `help` an optional trailing suggestion line.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub message: String,
    pub span: Option<Span>,
    pub code: Option<&'static str>,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn new(message: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            message: message.into(),
            span,
            code: None,
            help: None,
        }
    }

    pub fn code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

#[derive(Default)]
pub struct Diagnostics {
    pub items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn push(&mut self, message: impl Into<String>, span: Option<Span>) {
        self.items.push(Diagnostic::new(message, span));
    }

    pub fn push_diag(&mut self, diag: Diagnostic) {
        self.items.push(diag);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Drop all but the first diagnostic carrying the same message at the
    /// same position. Checking revisits shared nodes; only one report per
    /// site survives.
    pub fn dedup_multiples(&mut self) {
        let mut seen: Vec<(Option<(usize, usize)>, String)> = Vec::new();
        self.items.retain(|d| {
            let key = (
                d.span.as_ref().map(|s| (s.line, s.column)),
                d.message.clone(),
            );
            if seen.contains(&key) {
                false
            } else {
                seen.push(key);
                true
            }
        });
    }
}

pub fn format_diagnostic(diag: &Diagnostic, source: &str) -> String {
    let mut out = if let Some(span) = &diag.span {
        let line_text = source.lines().nth(span.line.saturating_sub(1)).unwrap_or("");
        format!(
            "error:{}:{}: {}\n  {}\n  {}^",
            span.line,
            span.column,
            diag.message,
            line_text,
            " ".repeat(span.column.saturating_sub(1))
        )
    } else {
        format!("error: {}", diag.message)
    };
    if let Some(help) = &diag.help {
        out.push_str("\n  help: ");
        out.push_str(help);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_keeps_first_of_equal_reports() {
        let span = Span {
            start: 0,
            end: 1,
            line: 3,
            column: 7,
        };
        let mut diags = Diagnostics::default();
        diags.push("cannot dereference non-pointer", Some(span.clone()));
        diags.push("cannot dereference non-pointer", Some(span.clone()));
        diags.push("cannot dereference non-pointer", None);
        diags.dedup_multiples();
        assert_eq!(diags.len(), 2);
    }

    #[test]
    fn format_points_at_column() {
        let diag = Diagnostic::new(
            "undefined: y",
            Some(Span {
                start: 8,
                end: 9,
                line: 1,
                column: 9,
            }),
        )
        .help("did you mean `x`?");
        let rendered = format_diagnostic(&diag, "var z = y");
        assert!(rendered.starts_with("error:1:9: undefined: y"));
        assert!(rendered.contains("help: did you mean `x`?"));
    }
}
