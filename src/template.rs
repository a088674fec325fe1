//! `${{ expr }}` scalar templates.
//!
//! A recipe scalar either is a plain literal or contains one or more
//! expressions. Splitting happens once at load time so that unterminated
//! expressions are reported with their field path before any rendering.

use serde::Serialize;

const OPEN: &str = "${{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Segment {
    Text(String),
    Expr(String),
}

/// A scalar made of literal text and expressions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalarTemplate {
    segments: Vec<Segment>,
}

impl ScalarTemplate {
    /// Splits `source` into text and expression segments.
    ///
    /// Returns `Ok(None)` when the string holds no expression at all.
    ///
    /// # Errors
    /// * A message describing an unterminated or empty expression
    pub fn parse(source: &str) -> Result<Option<Self>, String> {
        if !source.contains(OPEN) {
            return Ok(None);
        }

        let mut segments = Vec::new();
        let mut rest = source;
        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let body = &rest[start + OPEN.len()..];
            let end = find_close(body)
                .ok_or_else(|| format!("unterminated expression in '{source}'"))?;
            let expr = body[..end].trim();
            if expr.is_empty() {
                return Err(format!("empty expression in '{source}'"));
            }
            segments.push(Segment::Expr(expr.to_string()));
            rest = &body[end + CLOSE.len()..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Some(Self { segments }))
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The expression when the scalar is exactly one `${{ expr }}`.
    ///
    /// Such scalars evaluate to the expression's own value; everything else is
    /// interpolated into a string.
    pub fn single_expression(&self) -> Option<&str> {
        match self.segments.as_slice() {
            [Segment::Expr(expr)] => Some(expr),
            _ => None,
        }
    }

    pub fn expressions(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Expr(expr) => Some(expr.as_str()),
            Segment::Text(_) => None,
        })
    }
}

/// Finds the closing `}}` of an expression, skipping quoted strings.
fn find_close(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match quote {
            Some(q) => {
                if c == b'\\' {
                    i += 1;
                } else if c == q {
                    quote = None;
                }
            }
            None => {
                if c == b'\'' || c == b'"' {
                    quote = Some(c);
                } else if bytes[i..].starts_with(CLOSE.as_bytes()) {
                    return Some(i);
                }
            }
        }
        i += 1;
    }
    None
}
