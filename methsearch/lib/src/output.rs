//! Output formatting: printf-like templates with `$`-substitutions drawn
//! from a method's properties, plus the XML and counting sinks.

use std::fmt::{Display, Formatter};
use std::io::Write;

use crate::expression::ERROR_STRING;
use crate::properties::MethodProperties;

/// One piece of a parsed format string.
#[derive(Debug, Clone)]
enum Part {
    Literal(String),
    /// `$<num><name>`, e.g. `$p` or `$4P`
    Var { num: usize, name: String },
}

/// A parsed `-R`-style format template.  The default output format is
/// `"$p\t$n"`.
#[derive(Debug, Clone)]
pub struct FormatString {
    parts: Vec<Part>,
}

impl FormatString {
    pub fn parse(s: &str) -> Result<Self, FormatError> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut chars = s.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some('n') => literal.push('\n'),
                    Some('t') => literal.push('\t'),
                    Some('\\') => literal.push('\\'),
                    Some('$') => literal.push('$'),
                    other => return Err(FormatError::BadEscape(other)),
                },
                '$' => {
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    let mut num = String::new();
                    while let Some(&d) = chars.peek() {
                        if d.is_ascii_digit() {
                            num.push(d);
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    let name = match chars.next() {
                        Some(c) if c.is_ascii_alphabetic() || c == '#' => c.to_string(),
                        other => return Err(FormatError::BadVariable(other)),
                    };
                    parts.push(Part::Var {
                        num: num.parse().unwrap_or(0),
                        name,
                    });
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }
        Ok(FormatString { parts })
    }

    /// Formats one method.  Unknown or failing properties substitute the
    /// `<ERROR>` sentinel rather than failing the run.
    pub fn format(&self, props: &MethodProperties) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::Var { num, name } => match props.get_property(*num, name) {
                    Ok(v) => out.push_str(&v),
                    Err(_) => out.push_str(ERROR_STRING),
                },
            }
        }
        out
    }
}

impl Default for FormatString {
    fn default() -> Self {
        Self::parse("$p\\t$n").expect("the default format is valid")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    BadEscape(Option<char>),
    BadVariable(Option<char>),
}

impl Display for FormatError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatError::BadEscape(Some(c)) => write!(f, "unknown escape '\\{}'", c),
            FormatError::BadEscape(None) => write!(f, "'\\' at end of format string"),
            FormatError::BadVariable(Some(c)) => write!(f, "'{}' cannot follow '$'", c),
            FormatError::BadVariable(None) => write!(f, "'$' at end of format string"),
        }
    }
}

impl std::error::Error for FormatError {}

/// Writes methods as an XML `<methods>` document.
pub struct XmlWriter<W: Write> {
    out: W,
    open: bool,
}

impl<W: Write> XmlWriter<W> {
    pub fn new(out: W) -> Self {
        XmlWriter { out, open: false }
    }

    pub fn write_method(&mut self, props: &MethodProperties) -> std::io::Result<()> {
        if !self.open {
            writeln!(self.out, "<methods>")?;
            self.open = true;
        }
        let get = |name: &str| {
            props
                .get_property(0, name)
                .unwrap_or_else(|_| ERROR_STRING.to_owned())
        };
        writeln!(self.out, "  <method>")?;
        if !props.payload().is_empty() {
            writeln!(self.out, "    <name>{}</name>", xml_escape(props.payload()))?;
        }
        writeln!(self.out, "    <stage>{}</stage>", get("b"))?;
        writeln!(
            self.out,
            "    <notation>{}</notation>",
            xml_escape(&get("p"))
        )?;
        writeln!(self.out, "    <leadhead>{}</leadhead>", get("l"))?;
        writeln!(self.out, "    <classification>{}</classification>", get("C"))?;
        writeln!(self.out, "  </method>")
    }

    /// Closes the document.  Must be called even when no methods were
    /// written.
    pub fn finish(&mut self) -> std::io::Result<()> {
        if !self.open {
            writeln!(self.out, "<methods>")?;
            self.open = true;
        }
        writeln!(self.out, "</methods>")?;
        self.out.flush()
    }

    /// Recovers the underlying writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SearchParams;
    use rowframe::{Method, Stage};

    #[test]
    fn parse_and_format() {
        let mut params = SearchParams::new(Stage::MINOR);
        params.validate().unwrap();
        let m = Method::parse("&x16x16x16,12", Stage::MINOR).unwrap();
        let props = MethodProperties::new(&m, "Plain Bob".to_owned(), &params);

        let fmt = FormatString::parse("$p\\t$n (lh $l)").unwrap();
        assert_eq!(fmt.format(&props), "-16-16-16-16-16-12\tPlain Bob (lh 135264)");

        let fmt = FormatString::default();
        assert_eq!(fmt.format(&props), "-16-16-16-16-16-12\tPlain Bob");
    }

    #[test]
    fn errors_substitute_the_sentinel() {
        let mut params = SearchParams::new(Stage::MINOR);
        params.validate().unwrap();
        let m = Method::parse("&x16x16x16,12", Stage::MINOR).unwrap();
        let props = MethodProperties::new(&m, String::new(), &params);
        let fmt = FormatString::parse("$Z").unwrap();
        assert_eq!(fmt.format(&props), ERROR_STRING);
    }

    #[test]
    fn bad_templates() {
        assert!(FormatString::parse("$").is_err());
        assert!(FormatString::parse("\\q").is_err());
        assert!(FormatString::parse("100% $p").is_ok());
    }

    #[test]
    fn xml_output() {
        let mut params = SearchParams::new(Stage::MINOR);
        params.validate().unwrap();
        let m = Method::parse("&x16x16x16,12", Stage::MINOR).unwrap();
        let props = MethodProperties::new(&m, "A & B".to_owned(), &params);

        let mut buf = Vec::new();
        let mut xml = XmlWriter::new(&mut buf);
        xml.write_method(&props).unwrap();
        xml.finish().unwrap();
        let s = String::from_utf8(buf).unwrap();
        assert!(s.starts_with("<methods>"));
        assert!(s.contains("<name>A &amp; B</name>"));
        assert!(s.contains("<leadhead>135264</leadhead>"));
        assert!(s.trim_end().ends_with("</methods>"));
    }
}
