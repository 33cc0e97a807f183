use thiserror::Error;

/// Errors that can occur while reading the wire grammar
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerdeErr {
    /// Ran off the end of the buffer mid-value
    #[error("unexpected end of buffer")]
    UnexpectedEof,

    /// A string payload was not valid UTF-8
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,

    /// A byte that no value encoding can legally start with
    #[error("byte `{lead:#04x}` cannot begin a value")]
    InvalidLeadByte { lead: u8 },

    /// A boolean byte other than 0 or 1
    #[error("invalid boolean byte `{byte:#04x}`")]
    InvalidBool { byte: u8 },
}
