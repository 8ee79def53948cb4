use core::fmt::{self, Display, Formatter};

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum HeloVariant {
    Ehlo(String),
    Helo(String),
}

#[derive(PartialEq, Eq, Debug, Clone)]
pub enum Command {
    Helo(HeloVariant),
    /// An empty sender is the null reverse-path.
    MailFrom {
        sender: String,
        size: Option<usize>,
    },
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Quit,
    StartTls,
    Auth {
        mechanism: String,
        initial: Option<String>,
    },
    Invalid(String),
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(HeloVariant::Ehlo(id)) => write!(fmt, "EHLO {id}"),
            Self::Helo(HeloVariant::Helo(id)) => write!(fmt, "HELO {id}"),
            Self::MailFrom { sender, size: None } => write!(fmt, "MAIL FROM:<{sender}>"),
            Self::MailFrom {
                sender,
                size: Some(size),
            } => write!(fmt, "MAIL FROM:<{sender}> SIZE={size}"),
            Self::RcptTo(rcpt) => write!(fmt, "RCPT TO:<{rcpt}>"),
            Self::Data => fmt.write_str("DATA"),
            Self::Rset => fmt.write_str("RSET"),
            Self::Noop => fmt.write_str("NOOP"),
            Self::Quit => fmt.write_str("QUIT"),
            Self::StartTls => fmt.write_str("STARTTLS"),
            // Never echo credentials.
            Self::Auth { mechanism, .. } => write!(fmt, "AUTH {mechanism}"),
            Self::Invalid(s) => fmt.write_str(s),
        }
    }
}

/// The address inside a `MAIL FROM:` / `RCPT TO:` path, brackets removed.
fn path(value: &str) -> Option<&str> {
    let value = value.trim();
    match (value.strip_prefix('<'), value.ends_with('>')) {
        (Some(inner), true) => Some(&inner[..inner.len() - 1]),
        (None, false) if !value.contains(['<', '>']) => Some(value),
        _ => None,
    }
}

/// Case-insensitively strip `prefix` from the start of `s`.
fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

impl TryFrom<&str> for Command {
    type Error = Self;

    fn try_from(command: &str) -> Result<Self, Self::Error> {
        let trimmed = command.trim();
        let invalid = || Self::Invalid(trimmed.to_owned());

        if let Some(rest) = strip_prefix_ignore_case(trimmed, "MAIL FROM:") {
            let mut parts = rest.trim().split_whitespace();
            let sender = parts.next().and_then(path).ok_or_else(invalid)?;

            let mut size = None;
            for param in parts {
                if let Some(value) = strip_prefix_ignore_case(param, "SIZE=") {
                    size = Some(
                        value
                            .parse::<usize>()
                            .ok()
                            .filter(|size| *size > 0)
                            .ok_or_else(invalid)?,
                    );
                }
            }

            return Ok(Self::MailFrom {
                sender: sender.to_string(),
                size,
            });
        }

        if let Some(rest) = strip_prefix_ignore_case(trimmed, "RCPT TO:") {
            let recipient = rest
                .split_whitespace()
                .next()
                .and_then(path)
                .filter(|recipient| !recipient.is_empty())
                .ok_or_else(invalid)?;
            return Ok(Self::RcptTo(recipient.to_string()));
        }

        let (verb, argument) = trimmed
            .split_once(' ')
            .map_or((trimmed, ""), |(verb, argument)| (verb, argument.trim()));

        match verb.to_ascii_uppercase().as_str() {
            "EHLO" | "HELO" if argument.is_empty() => Err(Self::Invalid(format!(
                "Expected hostname in {trimmed}"
            ))),
            "EHLO" => Ok(Self::Helo(HeloVariant::Ehlo(argument.to_string()))),
            "HELO" => Ok(Self::Helo(HeloVariant::Helo(argument.to_string()))),
            "DATA" => Ok(Self::Data),
            "RSET" => Ok(Self::Rset),
            "NOOP" => Ok(Self::Noop),
            "QUIT" => Ok(Self::Quit),
            "STARTTLS" => Ok(Self::StartTls),
            "AUTH" if !argument.is_empty() => {
                let (mechanism, initial) = argument
                    .split_once(' ')
                    .map_or((argument, None), |(m, i)| (m, Some(i.trim().to_string())));
                Ok(Self::Auth {
                    mechanism: mechanism.to_ascii_uppercase(),
                    initial,
                })
            }
            _ => Err(invalid()),
        }
    }
}
