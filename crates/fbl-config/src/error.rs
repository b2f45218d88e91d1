use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A template delimiter cannot form a `<d` / `d>` tag pair.
    #[error("invalid {pass} template delimiter '{delimiter}': {reason}")]
    InvalidDelimiter {
        pass: &'static str,
        delimiter: char,
        reason: String,
    },
}
