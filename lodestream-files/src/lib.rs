use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Unexpected end of data at offset {offset}")]
    UnexpectedEndOfData { offset: usize },

    #[error("Unsupported container version {version}")]
    UnsupportedVersion { version: u32 },

    /// An effect container whose header table has zero entries. Such files
    /// come out of aborted exports and carry no pass data at all.
    #[error("Effect header is empty")]
    EmptyHeader,

    #[error("Unknown vertex channel encoding {code:#04x}")]
    UnknownVertexEncoding { code: u8 },

    #[error("The file is violating the expected format, because: {reason}")]
    FormatError { reason: &'static str },

    #[error(transparent)]
    UTF8ConversationError(#[from] std::string::FromUtf8Error),
}

pub mod cursor;
pub mod effect;
pub mod geometry;
#[cfg(test)]
pub(crate) mod test_util;
