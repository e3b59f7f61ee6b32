//! Pre-compiled `{name}` templates.
//!
//! A template string is split once, at descriptor-build time, into literal
//! chunks and placeholder lookups. Expansion is then a single pass over the
//! chunks with no re-parsing.

use std::collections::HashMap;

/// Values bound to placeholder names for one invocation.
pub type Substitutions = HashMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Chunk {
    Literal(String),
    Placeholder(String),
}

/// How substituted values are written into the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Values are written verbatim (header values)
    None,
    /// Values are percent-encoded (path and query values)
    Uri,
}

/// A template compiled into literal and placeholder chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    chunks: Vec<Chunk>,
}

impl Template {
    /// Compile a template string.
    ///
    /// `{name}` is a placeholder; an unmatched `{` or an empty `{}` is kept as
    /// literal text.
    #[must_use]
    pub fn compile(source: &str) -> Self {
        let mut chunks = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(open) = rest.find('{') {
            let after = &rest[open + 1..];
            match after.find(['{', '}']) {
                Some(close) if after.as_bytes()[close] == b'}' && close > 0 => {
                    literal.push_str(&rest[..open]);
                    if !literal.is_empty() {
                        chunks.push(Chunk::Literal(std::mem::take(&mut literal)));
                    }
                    chunks.push(Chunk::Placeholder(after[..close].trim().to_owned()));
                    rest = &after[close + 1..];
                }
                _ => {
                    literal.push_str(&rest[..=open]);
                    rest = after;
                }
            }
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            chunks.push(Chunk::Literal(literal));
        }

        Self {
            source: source.to_owned(),
            chunks,
        }
    }

    /// The original template text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names in declaration order.
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.chunks.iter().filter_map(|c| match c {
            Chunk::Placeholder(name) => Some(name.as_str()),
            Chunk::Literal(_) => None,
        })
    }

    /// True if the template has no placeholders.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.placeholders().next().is_none()
    }

    /// Expand against the substitution map.
    ///
    /// A placeholder with no entry is written back as `{name}`. Multi-valued
    /// entries are joined with `,`.
    #[must_use]
    pub fn expand(&self, vars: &Substitutions, encoding: Encoding) -> String {
        let mut out = String::with_capacity(self.source.len());
        for chunk in &self.chunks {
            match chunk {
                Chunk::Literal(text) => out.push_str(text),
                Chunk::Placeholder(name) => match vars.get(name) {
                    Some(values) => {
                        for (i, value) in values.iter().enumerate() {
                            if i > 0 {
                                out.push(',');
                            }
                            push_encoded(&mut out, value, encoding);
                        }
                    }
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                },
            }
        }
        out
    }

    /// Expand into one output per value.
    ///
    /// A template that is exactly one placeholder bound to several values
    /// (`{tags}` with `["a", "b"]`) yields one string per value, so a query
    /// parameter repeats instead of joining. Any other shape yields a single
    /// string as [`Template::expand`] would.
    #[must_use]
    pub fn expand_values(&self, vars: &Substitutions, encoding: Encoding) -> Vec<String> {
        if let [Chunk::Placeholder(name)] = self.chunks.as_slice()
            && let Some(values) = vars.get(name)
        {
            return values
                .iter()
                .map(|value| {
                    let mut out = String::with_capacity(value.len());
                    push_encoded(&mut out, value, encoding);
                    out
                })
                .collect();
        }
        vec![self.expand(vars, encoding)]
    }
}

fn push_encoded(out: &mut String, value: &str, encoding: Encoding) {
    match encoding {
        Encoding::None => out.push_str(value),
        Encoding::Uri => out.push_str(&urlencoding::encode(value)),
    }
}
