//! Request records and parsed response documents.

use crate::error::{Error, Result};

/// Serialize one self-closing request record.
///
/// Attribute order is preserved as given. The simulator expects every
/// request on its own line.
pub fn request(tag: &str, attrs: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(16 + tag.len());
    out.push('<');
    out.push_str(tag);
    for (key, value) in attrs {
        out.push(' ');
        out.push_str(key);
        out.push_str("='");
        out.push_str(&escape_attr(value));
        out.push('\'');
    }
    out.push_str(" />\n");
    out
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('\'', "&apos;")
}

/// One parsed top-level response document: an element tree with attributes
/// and character data.
///
/// Typed accessors carry the schema errors so message types stay free of
/// ad hoc attribute poking.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Document>,
    pub text: String,
}

impl Document {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn req_attr(&self, tag: &'static str, name: &'static str) -> Result<&str> {
        self.attr(name)
            .ok_or(Error::MissingAttribute { tag, attr: name })
    }

    /// Required integer attribute.
    pub fn int_attr<T: std::str::FromStr>(&self, tag: &'static str, name: &'static str) -> Result<T> {
        let raw = self.req_attr(tag, name)?;
        raw.parse().map_err(|_| Error::InvalidValue {
            tag,
            attr: name,
            value: raw.to_string(),
        })
    }

    /// Optional integer attribute; absent or empty yields `None`, an
    /// unparseable value is an error.
    pub fn opt_int_attr<T: std::str::FromStr>(
        &self,
        tag: &'static str,
        name: &'static str,
    ) -> Result<Option<T>> {
        match self.attr(name) {
            None | Some("") => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| Error::InvalidValue {
                tag,
                attr: name,
                value: raw.to_string(),
            }),
        }
    }

    /// Boolean attribute in the simulator's spelling ("true"/"false",
    /// case-insensitive). Anything else is false.
    pub fn bool_attr(&self, name: &str) -> bool {
        self.attr(name)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn children<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Document> {
        self.children.iter().filter(move |child| child.tag == tag)
    }

    pub fn expect_tag(&self, expected: &'static str) -> Result<&Self> {
        if self.tag == expected {
            Ok(self)
        } else {
            Err(Error::UnexpectedTag {
                expected,
                got: self.tag.clone(),
            })
        }
    }
}
