//! Errors and warnings raised when compiling a document.

use std::ops::Range;

/// Kind of error encountered when compiling a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A character or LaTeX macro that is not part of the notation.
    Lex {
        token: String,
        suggestions: Vec<String>,
    },

    /// An equation does not follow the grammar of the notation.
    Syntax { expected: String },

    /// An index group is malformed.
    ///
    /// For example, a derivative operator with no index, or a component index
    /// that is out of range for the tensor.
    MalformedIndexing { reason: String },

    /// A tensor or scalar is used without being declared.
    UndeclaredSymbol {
        name: String,
        suggestions: Vec<String>,
    },

    /// An index appears at the same height twice, or more than twice, in one term.
    IllegalIndexRepetition { index: String, occurrences: usize },

    /// Two occurrences of the same index have different ranges.
    DimensionMismatch {
        index: String,
        first: usize,
        second: usize,
    },

    /// A covariant derivative was requested but no metric is declared in the
    /// connection's namespace.
    NoConnectionAvailable { metric: String },

    /// The free indices of the two sides of an equation differ.
    IllFormedEquation { lhs: Vec<String>, rhs: Vec<String> },

    /// A `%` directive is malformed.
    Directive { reason: String },
}

/// Error encountered when compiling a document.
///
/// The span refers to byte offsets in the document that was being compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    span: Range<usize>,
    fragment: Option<String>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, span: Range<usize>) -> Error {
        Error {
            kind,
            span,
            fragment: None,
        }
    }

    pub(crate) fn syntax(expected: impl Into<String>, span: Range<usize>) -> Error {
        Error::new(
            ErrorKind::Syntax {
                expected: expected.into(),
            },
            span,
        )
    }

    pub(crate) fn malformed(reason: impl Into<String>, span: Range<usize>) -> Error {
        Error::new(
            ErrorKind::MalformedIndexing {
                reason: reason.into(),
            },
            span,
        )
    }

    pub(crate) fn directive(reason: impl Into<String>, span: Range<usize>) -> Error {
        Error::new(
            ErrorKind::Directive {
                reason: reason.into(),
            },
            span,
        )
    }

    /// Attaches the offending fragment of the document to the error.
    pub(crate) fn with_source(mut self, source: &str) -> Error {
        if self.fragment.is_none() {
            self.fragment = source.get(self.span.clone()).map(str::to_string);
        }
        self
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn span(&self) -> Range<usize> {
        self.span.clone()
    }

    /// The text of the document at the error's span.
    pub fn fragment(&self) -> Option<&str> {
        self.fragment.as_deref()
    }

    pub fn message(&self) -> String {
        use ErrorKind::*;
        match &self.kind {
            Lex { token, .. } => format!["Unrecognized token `{token}`"],
            Syntax { expected } => format!["Expected {expected}"],
            MalformedIndexing { reason } => format!["Malformed indexing: {reason}"],
            UndeclaredSymbol { name, .. } => format!["The symbol `{name}` has not been declared"],
            IllegalIndexRepetition { index, .. } => {
                format!["The index `{index}` is repeated illegally"]
            }
            DimensionMismatch { index, .. } => {
                format!["The index `{index}` ranges over different dimensions"]
            }
            NoConnectionAvailable { metric } => {
                format!["Covariant derivative requested but the metric `{metric}` is not declared"]
            }
            IllFormedEquation { .. } => {
                "The two sides of the equation have different free indices".into()
            }
            Directive { reason } => format!["Invalid directive: {reason}"],
        }
    }

    pub fn labels(&self) -> Vec<ErrorLabel> {
        use ErrorKind::*;
        let text = match &self.kind {
            Lex { .. } => "this token is not part of the notation".to_string(),
            Syntax { .. } => "unexpected input here".to_string(),
            MalformedIndexing { .. } => "the index group appears here".to_string(),
            UndeclaredSymbol { .. } => "the symbol is used here".to_string(),
            IllegalIndexRepetition { occurrences, .. } => {
                format!["the index appears {occurrences} times in this term"]
            }
            DimensionMismatch { first, second, .. } => {
                format!["the index ranges over {first} values here and {second} values elsewhere"]
            }
            NoConnectionAvailable { .. } => "the covariant derivative appears here".to_string(),
            IllFormedEquation { lhs, rhs } => format![
                "the left-hand side has free indices [{}] and the right-hand side has [{}]",
                lhs.join(", "),
                rhs.join(", ")
            ],
            Directive { .. } => "the directive appears here".to_string(),
        };
        vec![ErrorLabel {
            span: self.span(),
            text,
        }]
    }

    pub fn notes(&self) -> Vec<String> {
        use ErrorKind::*;
        match &self.kind {
            Lex { suggestions, .. } | UndeclaredSymbol { suggestions, .. } => suggestions
                .iter()
                .map(|s| format!["did you mean `{s}`?"])
                .collect(),
            IllegalIndexRepetition { .. } => vec![
                "a summed index must appear exactly twice in a term, once upper and once lower"
                    .to_string(),
            ],
            NoConnectionAvailable { metric } => {
                vec![format!["declare the metric using `% def metric {metric} (n)`"]]
            }
            Syntax { .. }
            | MalformedIndexing { .. }
            | DimensionMismatch { .. }
            | IllFormedEquation { .. }
            | Directive { .. } => vec![],
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())?;
        if let Some(fragment) = &self.fragment {
            write!(f, " (in `{fragment}`)")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Label on an error message.
///
/// A label identifies a particular piece of source code and some
/// information about it.
pub struct ErrorLabel {
    pub span: Range<usize>,
    pub text: String,
}

impl Error {
    #[cfg(feature = "ariadne")]
    pub fn ariadne_report<'a>(
        &self,
        file_name: &'a str,
    ) -> ariadne::Report<'static, (&'a str, Range<usize>)> {
        let mut report =
            ariadne::Report::build(ariadne::ReportKind::Error, (file_name, self.span()))
                .with_message(self.message());
        let mut color = ariadne::Color::BrightRed;
        for label in self.labels() {
            report = report.with_label(
                ariadne::Label::new((file_name, label.span))
                    .with_message(label.text)
                    .with_color(color),
            );
            color = ariadne::Color::BrightYellow;
        }
        for note in self.notes() {
            report = report.with_note(note);
        }
        report.finish()
    }
}

/// Non-fatal problem encountered when compiling a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// A name that was already declared has been declared again with `def`.
    ///
    /// The new declaration replaces the old one.
    Override { name: String, span: Range<usize> },
}

impl Warning {
    pub fn message(&self) -> String {
        match self {
            Warning::Override { name, .. } => {
                format!["The declaration of `{name}` overrides an existing declaration"]
            }
        }
    }

    pub fn span(&self) -> Range<usize> {
        match self {
            Warning::Override { span, .. } => span.clone(),
        }
    }

    #[cfg(feature = "ariadne")]
    pub fn ariadne_report<'a>(
        &self,
        file_name: &'a str,
    ) -> ariadne::Report<'static, (&'a str, Range<usize>)> {
        ariadne::Report::build(ariadne::ReportKind::Warning, (file_name, self.span()))
            .with_message(self.message())
            .with_label(
                ariadne::Label::new((file_name, self.span()))
                    .with_message("the name is declared again here")
                    .with_color(ariadne::Color::BrightYellow),
            )
            .with_note("use `% redef` to re-declare a name without this warning")
            .finish()
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}
