//! SMTP reply parsing and representation.

use std::fmt::{self, Display, Formatter};

use crate::error::ClientError;

/// A complete, possibly multi-line, SMTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub lines: Vec<String>,
}

impl Reply {
    #[must_use]
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            lines: vec![message.into()],
        }
    }

    /// The message lines joined with a space.
    #[must_use]
    pub fn message(&self) -> String {
        self.lines.join(" ")
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code >= 200 && self.code < 300
    }

    #[must_use]
    pub const fn is_intermediate(&self) -> bool {
        self.code >= 300 && self.code < 400
    }

    #[must_use]
    pub const fn is_temporary_error(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    #[must_use]
    pub const fn is_permanent_error(&self) -> bool {
        self.code >= 500 && self.code < 600
    }

    /// Parse one complete reply from the front of `buffer`.
    ///
    /// Returns the reply and the number of bytes consumed, or `None` if the
    /// buffer does not yet hold a final line.
    ///
    /// # Errors
    /// If a line is not of the form `NNN[ -]text`, or the codes of a
    /// multi-line reply disagree.
    pub fn parse(buffer: &[u8]) -> Result<Option<(Self, usize)>, ClientError> {
        let mut consumed = 0;
        let mut code = None;
        let mut lines = Vec::new();

        while let Some(end) = buffer[consumed..].windows(2).position(|w| w == b"\r\n") {
            let raw = &buffer[consumed..consumed + end];
            consumed += end + 2;

            let line = std::str::from_utf8(raw)
                .map_err(|_| ClientError::Parse("reply is not valid UTF-8".to_string()))?;
            let (line_code, last, text) = Self::parse_line(line)?;

            if *code.get_or_insert(line_code) != line_code {
                return Err(ClientError::Parse(format!(
                    "Inconsistent reply codes in multi-line reply: '{line}'"
                )));
            }
            lines.push(text.to_string());

            if last {
                return Ok(code.map(|code| (Self { code, lines }, consumed)));
            }
        }

        Ok(None)
    }

    fn parse_line(line: &str) -> Result<(u16, bool, &str), ClientError> {
        let code = line
            .get(..3)
            .and_then(|code| code.parse::<u16>().ok())
            .filter(|code| (200..600).contains(code))
            .ok_or_else(|| ClientError::Parse(format!("Invalid reply line: '{line}'")))?;

        match line.as_bytes().get(3) {
            None => Ok((code, true, "")),
            Some(b' ') => Ok((code, true, &line[4..])),
            Some(b'-') => Ok((code, false, &line[4..])),
            Some(_) => Err(ClientError::Parse(format!("Invalid reply separator: '{line}'"))),
        }
    }
}

impl Display for Reply {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.message())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_single_line() {
        let (reply, consumed) = Reply::parse(b"250 OK\r\nextra")
            .expect("valid")
            .expect("complete");
        assert_eq!(reply, Reply::new(250, "OK"));
        assert_eq!(consumed, 8);
        assert!(reply.is_success());
    }

    #[test]
    fn test_multi_line() {
        let input = b"250-mail.example.com\r\n250-SIZE 1000\r\n250 STARTTLS\r\n";
        let (reply, consumed) = Reply::parse(input).expect("valid").expect("complete");
        assert_eq!(reply.lines, vec!["mail.example.com", "SIZE 1000", "STARTTLS"]);
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_incomplete() {
        assert_eq!(Reply::parse(b"250-first\r\n250 sec").expect("valid"), None);
        assert_eq!(Reply::parse(b"").expect("valid"), None);
    }

    #[test]
    fn test_bare_code() {
        let (reply, _) = Reply::parse(b"354\r\n").expect("valid").expect("complete");
        assert!(reply.is_intermediate());
        assert_eq!(reply.message(), "");
    }

    #[test]
    fn test_malformed() {
        assert!(Reply::parse(b"abc hello\r\n").is_err());
        assert!(Reply::parse(b"250+oops\r\n").is_err());
        assert!(Reply::parse(b"250-a\r\n251 b\r\n").is_err());
    }

    #[test]
    fn test_classification() {
        assert!(Reply::new(451, "later").is_temporary_error());
        assert!(Reply::new(550, "no").is_permanent_error());
        assert_eq!(Reply::new(550, "no such user").to_string(), "550 no such user");
    }
}
