use std::fmt;

use thiserror::Error;

/// Longest command line the RACF server accepts, in bytes
pub const MAX_REQUEST_LEN: usize = 255;

/// Errors validating a command line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("command is empty")]
    Empty,
    #[error("command is {len} bytes long, the limit is {MAX_REQUEST_LEN}")]
    TooLong { len: usize },
}

/// The single RACF command sent at the first prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request(String);

impl Request {
    /// Capture a command line. Anything after the first line feed is ignored.
    pub fn new(text: &str) -> Result<Self, RequestError> {
        let line = text.split('\n').next().unwrap_or_default();
        if line.is_empty() {
            return Err(RequestError::Empty);
        }
        if line.len() > MAX_REQUEST_LEN {
            return Err(RequestError::TooLong { len: line.len() });
        }
        Ok(Self(line.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_first_line_only() {
        let req = Request::new("LISTUSER TESTUSR\ntrailing").unwrap();
        assert_eq!(req.as_str(), "LISTUSER TESTUSR");
    }

    #[test]
    fn enforces_length_limit() {
        let at_limit = "A".repeat(MAX_REQUEST_LEN);
        assert!(Request::new(&at_limit).is_ok());

        let over = "A".repeat(MAX_REQUEST_LEN + 1);
        assert_eq!(
            Request::new(&over),
            Err(RequestError::TooLong {
                len: MAX_REQUEST_LEN + 1
            })
        );
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(Request::new(""), Err(RequestError::Empty));
        assert_eq!(Request::new("\nLU"), Err(RequestError::Empty));
    }
}
