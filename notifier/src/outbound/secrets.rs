//! Secret sources backed by the process environment or a secrets directory.
//!
//! Both adapters return values wrapped in [`Zeroizing`] and never log them.

use std::io;
use std::path::{Component, Path};

use async_trait::async_trait;
use cap_std::{ambient_authority, fs::Dir};
use zeroize::Zeroizing;

use crate::domain::ports::{SecretSource, SecretSourceError};

/// Reads a secret from the environment variable of the same name.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretSource;

#[async_trait]
impl SecretSource for EnvSecretSource {
    async fn fetch(&self, name: &str) -> Result<Zeroizing<String>, SecretSourceError> {
        match std::env::var(name) {
            Ok(value) => Ok(Zeroizing::new(value)),
            Err(std::env::VarError::NotPresent) => Err(SecretSourceError::not_found(name)),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretSourceError::invalid(format!(
                "{name} is not valid UTF-8"
            ))),
        }
    }
}

/// Reads a secret from a file named after it inside one directory.
///
/// This is the layout produced by mounted secret volumes. Access goes through
/// a `cap_std` directory handle, so names cannot escape the directory.
pub struct FileSecretSource {
    directory: Dir,
}

impl FileSecretSource {
    /// Open the secrets directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be opened.
    pub fn open(path: &Path) -> io::Result<Self> {
        let directory = Dir::open_ambient_dir(path, ambient_authority())?;
        Ok(Self { directory })
    }
}

#[async_trait]
impl SecretSource for FileSecretSource {
    async fn fetch(&self, name: &str) -> Result<Zeroizing<String>, SecretSourceError> {
        let mut components = Path::new(name).components();
        let single_file = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single_file {
            return Err(SecretSourceError::invalid(format!(
                "{name} is not a plain file name"
            )));
        }
        match self.directory.read_to_string(name) {
            Ok(value) => Ok(Zeroizing::new(value)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                Err(SecretSourceError::not_found(name))
            }
            Err(error) if error.kind() == io::ErrorKind::InvalidData => Err(
                SecretSourceError::invalid(format!("{name} is not valid UTF-8")),
            ),
            Err(error) => Err(SecretSourceError::unavailable(format!("{name}: {error}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use env_lock::lock_env;
    use rstest::rstest;

    use super::*;

    const KEY_VAR: &str = "NOTIFIER_TEST_PROVIDER_KEY";

    #[tokio::test]
    async fn env_source_reads_the_named_variable() {
        let value = {
            let _guard = lock_env([(KEY_VAR, Some("key-from-env".to_owned()))]);
            EnvSecretSource.fetch(KEY_VAR).await
        };
        assert_eq!(value.expect("secret").as_str(), "key-from-env");
    }

    #[tokio::test]
    async fn env_source_reports_missing_variables() {
        let result = {
            let _guard = lock_env([(KEY_VAR, None::<String>)]);
            EnvSecretSource.fetch(KEY_VAR).await
        };
        assert_eq!(
            result.expect_err("missing"),
            SecretSourceError::not_found(KEY_VAR)
        );
    }

    #[tokio::test]
    async fn file_source_reads_files_in_its_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let secrets = Dir::open_ambient_dir(dir.path(), ambient_authority()).expect("open dir");
        secrets
            .write("notify-api-key", "key-from-file\n")
            .expect("write secret");

        let source = FileSecretSource::open(dir.path()).expect("source");
        let value = source.fetch("notify-api-key").await.expect("secret");
        assert_eq!(value.as_str(), "key-from-file\n");
    }

    #[tokio::test]
    async fn file_source_reports_missing_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = FileSecretSource::open(dir.path()).expect("source");
        let error = source.fetch("absent").await.expect_err("missing");
        assert_eq!(error, SecretSourceError::not_found("absent"));
    }

    #[rstest]
    #[case::parent("../etc/passwd")]
    #[case::nested("nested/key")]
    #[case::absolute("/etc/passwd")]
    #[case::empty("")]
    #[tokio::test]
    async fn file_source_rejects_paths(#[case] name: &str) {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = FileSecretSource::open(dir.path()).expect("source");
        let error = source.fetch(name).await.expect_err("path rejected");
        assert!(matches!(error, SecretSourceError::Invalid { .. }));
    }
}
