//! Common error types

use thiserror::Error;

/// Common error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_names_the_offending_setting() {
        let err = Error::Config("batch_size must be greater than 0".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: batch_size must be greater than 0"
        );
    }

    #[test]
    fn io_and_toml_errors_convert_with_question_mark() {
        fn read() -> Result<String> {
            Ok(std::fs::read_to_string("/nonexistent/key-rotation/test")?)
        }
        fn parse() -> Result<toml::Table> {
            Ok(toml::from_str::<toml::Table>("not = valid = toml")?)
        }

        assert!(read().unwrap_err().to_string().starts_with("I/O error:"));
        assert!(
            parse()
                .unwrap_err()
                .to_string()
                .starts_with("TOML parse error:")
        );
    }
}
