use thiserror::Error;

/// All the ways loading an object or transferring a database can fail.
///
/// "Not an ELF file" and "no dynamic section" are not errors; the loader
/// reports those as `Ok(None)`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid ELF class: {0}")]
    InvalidClass(u8),
    #[error("Invalid ELF byte order: {0}")]
    InvalidByteOrder(u8),
    #[error("Invalid ELF version: {0}")]
    InvalidElfVersion(u8),
    #[error("Unexpected end of file at offset {0:#x} while reading {1}")]
    UnexpectedEof(u64, &'static str),
    #[error("Invalid entry size for the dynamic section: {0}")]
    InvalidDynamicEntrySize(u64),
    #[error("Dynamic section has no DT_STRTAB entry")]
    MissingStringTable,
    #[error("Dynamic section has no DT_STRSZ entry")]
    MissingStringTableSize,
    #[error("No string table section at address {0:#x}")]
    NoMatchingStringTable(u64),
    #[error("String offset {0:#x} is past the end of the string table")]
    StringOutOfRange(u64),
    #[error("Unterminated string in the string table at offset {0:#x}")]
    UnterminatedString(u64),
    #[error("Not a package dependency database")]
    BadMagic,
    #[error("Refusing to load into a non-empty database")]
    NotEmpty,
    #[error("Unsupported database version {0} (known up to {1})")]
    UnsupportedVersion(u16, u16),
    #[error("Corrupt database: {0}")]
    Corrupt(&'static str),
    #[error("Corrupt database: object reference {0} out of range")]
    DanglingObjectRef(u64),
    #[error("Corrupt database: package reference {0} out of range")]
    DanglingPackageRef(u64),
    #[error("Corrupt database: invalid reference tag {0}")]
    InvalidRefTag(u8),
    #[cfg(feature = "regex")]
    #[cfg_attr(docsrs, doc(cfg(feature = "regex")))]
    #[error("Invalid regular expression: {0}")]
    Regex(#[from] regex::Error),
    #[error("Input/output error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<std::io::ErrorKind> for Error {
    fn from(other: std::io::ErrorKind) -> Self {
        Self::Io(other.into())
    }
}
