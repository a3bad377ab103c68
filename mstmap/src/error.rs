//! Crate-wide error type. Library code returns these instead of panicking so the builder can
//! report which stage failed.

use std::fmt;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Csv(csv::Error),
    Yaml(serde_yaml::Error),
    Json(serde_json::Error),
    Pattern(glob::PatternError),
    Parse(String),
    InvalidArgument(String),
    NotStored,
    NotIndexed,
    Format(&'static str),
    LabelNotFound(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "io error: {}", e),
            Error::Csv(e) => write!(f, "csv error: {}", e),
            Error::Yaml(e) => write!(f, "yaml error: {}", e),
            Error::Json(e) => write!(f, "json error: {}", e),
            Error::Pattern(e) => write!(f, "bad glob pattern: {}", e),
            Error::Parse(s) => write!(f, "parse error: {}", s),
            Error::InvalidArgument(s) => write!(f, "invalid argument: {}", s),
            Error::NotStored => write!(f, "LSH forest was not created with store = true"),
            Error::NotIndexed => write!(f, "LSH forest must be indexed before querying"),
            Error::Format(s) => write!(f, "malformed file: {}", s),
            Error::LabelNotFound(s) => write!(f, "label not found: {}", s),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::Io(e)
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Error {
        Error::Csv(e)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Error {
        Error::Yaml(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        Error::Json(e)
    }
}

impl From<glob::PatternError> for Error {
    fn from(e: glob::PatternError) -> Error {
        Error::Pattern(e)
    }
}

impl From<std::num::ParseFloatError> for Error {
    fn from(e: std::num::ParseFloatError) -> Error {
        Error::Parse(e.to_string())
    }
}
