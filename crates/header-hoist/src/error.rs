use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input layout, e.g. a file where a directory is required.
    Input,
    /// Corrupted copy or a caller precondition broken mid-scan. Never downgraded.
    Integrity,
    Io,
    Config,
    /// A spawned tool (compiler, sw_vers) failed.
    External,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Input => "input",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Io => "io",
            ErrorKind::Config => "config",
            ErrorKind::External => "external",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn new<M: Into<String>>(kind: ErrorKind, msg: M) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn input<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Input, msg)
    }

    pub fn integrity<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Integrity, msg)
    }

    pub fn config<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Config, msg)
    }

    pub fn external<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::External, msg)
    }

    /// Wraps an I/O failure with the operation and path that produced it.
    pub fn io(what: &str, path: &Path, err: std::io::Error) -> Self {
        Self::new(
            ErrorKind::Io,
            format!("failed to {what} {}: {err}", path.display()),
        )
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<walkdir::Error> for Error {
    fn from(err: walkdir::Error) -> Self {
        Self::new(ErrorKind::Io, format!("walkdir error: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
