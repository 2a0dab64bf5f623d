use std::fmt::{self, Display};

use crate::{FramingError, HttpError};

/// Ordered header collection, preserving duplicates in the order they were added.
///
/// Lookups are case-insensitive, names keep the casing they were added with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    fields: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field after all existing fields, keeping any previous fields with the same name.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.push((name.into(), value.into()));
    }

    /// Set a field, replacing the first field with the same name in place and removing others.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        let Some(index) = self.position(&name) else {
            self.fields.push((name, value));
            return;
        };

        self.fields[index].1 = value;

        let mut position = 0;
        self.fields.retain(|(field, _)| {
            let keep = position <= index || !field.eq_ignore_ascii_case(&name);
            position += 1;
            keep
        });
    }

    /// Get the value of the first field with the given name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|index| self.fields[index].1.as_str())
    }

    /// Get the values of every field with the given name, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Remove every field with the given name, returning true if any was removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.fields.len();
        self.fields
            .retain(|(field, _)| !field.eq_ignore_ascii_case(name));
        self.fields.len() != before
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parse a `name: value` header line and append it.
    pub fn push_line(&mut self, line: &str) -> Result<(), HttpError> {
        let (name, value) = parse_header_line(line)?;
        self.append(name, value);
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|(field, _)| field.eq_ignore_ascii_case(name))
    }
}

impl Display for Headers {
    /// Formats the fields as they appear on the wire, each terminated by CRLF.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.fields {
            write!(f, "{}: {}\r\n", name, value)?;
        }

        Ok(())
    }
}

/// Split a header line on its first colon, trimming the name and value.
pub fn parse_header_line(line: &str) -> Result<(&str, &str), HttpError> {
    let Some(split) = line.find(':') else {
        return Err(FramingError::BadHeaderLine.into());
    };

    // Neither side of the colon may be missing
    if split == 0 || split == line.len() - 1 {
        return Err(FramingError::BadHeaderLine.into());
    }

    let name = line[..split].trim();
    let value = line[split + 1..].trim();

    if name.is_empty() {
        return Err(FramingError::BadHeaderLine.into());
    }

    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_kept_in_order() {
        let mut headers = Headers::new();
        headers.push_line("Set-Cookie: a=1").unwrap();
        headers.push_line("Host: example.com").unwrap();
        headers.push_line("set-cookie: b=2").unwrap();

        let cookies: Vec<_> = headers.get_all("SET-COOKIE").collect();
        assert_eq!(cookies, ["a=1", "b=2"]);
        assert_eq!(
            headers.to_string(),
            "Set-Cookie: a=1\r\nHost: example.com\r\nset-cookie: b=2\r\n"
        );
    }

    #[test]
    fn set_replaces_in_place() {
        let mut headers = Headers::new();
        headers.append("A", "1");
        headers.append("B", "2");
        headers.append("a", "3");

        headers.set("A", "4");

        let fields: Vec<_> = headers.iter().collect();
        assert_eq!(fields, [("A", "4"), ("B", "2")]);
    }

    #[test]
    fn header_line_trimmed() {
        assert_eq!(
            parse_header_line("  Content-Length :  42 ").unwrap(),
            ("Content-Length", "42")
        );
        assert_eq!(parse_header_line("X:y").unwrap(), ("X", "y"));
    }

    #[test]
    fn malformed_header_lines_rejected() {
        for line in ["no colon", ":value", "name:", "   : value"] {
            let error = parse_header_line(line).unwrap_err();
            assert!(
                matches!(error, HttpError::Framing(FramingError::BadHeaderLine)),
                "line {:?}",
                line
            );
        }
    }

    #[test]
    fn remove_all_matching() {
        let mut headers = Headers::new();
        headers.append("Via", "a");
        headers.append("via", "b");

        assert!(headers.remove("VIA"));
        assert!(headers.is_empty());
        assert!(!headers.remove("Via"));
    }
}
