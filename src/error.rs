use core::str::Utf8Error;

/// Error type shared by every decoding, registration and RPC entry point of
/// this crate.
///
/// Numeric out-of-range inputs are never errors: they clamp or narrow at the
/// boundaries documented on each serializer.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Hit the end of the buffer, expected more data.
    #[error("unexpected end of input")]
    UnexpectedEnd,
    /// The wire byte at the cursor cannot begin a value of the expected kind.
    #[error("unexpected wire byte {wire} while decoding {decoding}")]
    UnexpectedWire {
        /// The offending wire byte.
        wire: u8,
        /// What the decoder was trying to read.
        decoding: &'static str,
    },
    /// An encoded string held invalid UTF-8.
    #[error("invalid UTF-8 in encoded string")]
    InvalidUtf8(#[from] Utf8Error),
    /// A JSON `bytes` value held invalid base64.
    #[error("invalid base64 in bytes value")]
    InvalidBase64(#[from] base64::DecodeError),
    /// A JSON `bytes` value with the `hex:` prefix held invalid base16.
    #[error("invalid hex in bytes value")]
    InvalidHex(#[from] hex::FromHexError),
    /// A JSON value whose shape does not match the declared type.
    #[error("expected {expected}, got: {actual}")]
    UnexpectedJson {
        /// The shape the serializer wanted.
        expected: &'static str,
        /// A short rendering of the offending value.
        actual: String,
    },
    /// An enum number resolved to the wrong kind of variant: a payload was
    /// present for a constant, or absent for a value variant.
    #[error("number {number} of '{record}' does not identify a {expected} variant")]
    WrongVariantKind {
        /// Record identity, `<module_path>:<name>`.
        record: String,
        /// The offending variant number.
        number: u64,
        /// `"constant"` or `"value"`.
        expected: &'static str,
    },
    /// A record identity was registered twice.
    #[error("record '{0}' is already registered")]
    DuplicateRecord(String),
    /// Two fields of one record share a number.
    #[error("duplicate field number {number} in record '{record}'")]
    DuplicateFieldNumber {
        /// Record identity.
        record: String,
        /// The shared number.
        number: u32,
    },
    /// An active field uses a number listed as removed.
    #[error("field number {number} of record '{record}' is marked removed")]
    RemovedFieldNumber {
        /// Record identity.
        record: String,
        /// The offending number.
        number: u32,
    },
    /// A key-extractor string failed lexical validation.
    #[error("invalid key extractor '{0}'")]
    InvalidKeyExtractor(String),
    /// A type-descriptor JSON referenced a record absent from its `records`.
    #[error("unknown record reference '{0}' in type descriptor")]
    UnknownRecordReference(String),
    /// A type-descriptor JSON was structurally invalid.
    #[error("invalid type descriptor: {0}")]
    InvalidTypeDescriptor(String),
    /// Two methods of one service share a number.
    #[error("method number {0} is already registered")]
    DuplicateMethodNumber(i32),
    /// The request body did not parse as `name:number:format:payload`.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// The request named a method number the service does not expose.
    #[error("unknown method number {0}")]
    UnknownMethod(i32),
    /// A service endpoint URL carried a query string.
    #[error("service endpoint must not carry a query string: {0}")]
    EndpointHasQuery(String),
    /// A service endpoint URL failed to parse.
    #[error("invalid service endpoint")]
    InvalidEndpoint(#[from] url::ParseError),
    /// The remote returned a non-2xx status.
    #[error("RPC failed with status {status}: {message}")]
    RpcStatus {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },
    /// The HTTP transport failed before a response was received.
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    /// JSON text failed to parse.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Shorthand for results produced by this crate.
pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    pub(crate) fn unexpected_json(expected: &'static str, actual: &serde_json::Value) -> Self {
        let mut actual = actual.to_string();
        if actual.len() > 80 {
            actual.truncate(77);
            actual.push_str("...");
        }
        Error::UnexpectedJson { expected, actual }
    }
}
