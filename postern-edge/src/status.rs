use core::fmt::{self, Display, Formatter};

/// Reply codes the edge sends.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug)]
pub enum Status {
    ServiceReady = 220,
    GoodBye = 221,
    AuthSuccess = 235,
    Ok = 250,
    AuthContinue = 334,
    StartMailInput = 354,
    Unavailable = 421,
    ActionUnavailable = 451,
    SyntaxError = 500,
    ParameterError = 501,
    NotImplemented = 502,
    InvalidCommandSequence = 503,
    ParameterNotImplemented = 504,
    AuthRequired = 530,
    AuthFailed = 535,
    Error = 550,
    ExceededStorage = 552,
    TransactionFailed = 554,
}

impl Status {
    /// Checks if the status is a permanent rejection
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        self as u16 >= 500
    }

    /// Checks if the status is a temporary rejection
    #[must_use]
    pub const fn is_temporary(self) -> bool {
        let code = self as u16;
        code >= 400 && code < 500
    }

    #[must_use]
    pub const fn code(self) -> u16 {
        self as u16
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.code())
    }
}
