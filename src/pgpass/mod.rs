// pst/src/pgpass/mod.rs
//! Append-only merging into a libpq password file.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::errors::{Result, SyncError};

/// Port used for every cloud-resolved role.
pub const DEFAULT_PORT: u16 = 5432;
/// Database selector matching any database.
pub const ANY_DATABASE: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialEntry {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl CredentialEntry {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Renders `host:port:database:username:password`, escaping `:` and `\`.
impl fmt::Display for CredentialEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            escape_field(&self.host),
            self.port,
            escape_field(&self.database),
            escape_field(&self.username),
            escape_field(&self.password)
        )
    }
}

fn escape_field(field: &str) -> String {
    let mut escaped = String::with_capacity(field.len());
    for c in field.chars() {
        if c == ':' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn contains_line(content: &[u8], line: &[u8]) -> bool {
    content
        .split(|&b| b == b'\n')
        .map(|existing| existing.strip_suffix(b"\r").unwrap_or(existing))
        .any(|existing| existing == line)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Appended,
    AlreadyPresent,
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `entry` unless an identical line is already in the file.
    /// Existing lines are never edited or removed.
    pub fn upsert(&self, entry: &CredentialEntry) -> Result<UpsertOutcome> {
        self.ensure_exists()?;

        let line = entry.to_string();
        // Compared as bytes: hand-edited lines need not be valid UTF-8.
        let content = fs::read(&self.path).map_err(|e| self.error(e))?;
        if contains_line(&content, line.as_bytes()) {
            debug!(host = %entry.host, "credential already present");
            return Ok(UpsertOutcome::AlreadyPresent);
        }

        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| self.error(e))?;
        // Keep the new entry on its own line if the file was hand-edited without a trailing newline.
        let separator = if content.is_empty() || content.ends_with(b"\n") {
            ""
        } else {
            "\n"
        };
        writeln!(file, "{}{}", separator, line).map_err(|e| self.error(e))?;
        Ok(UpsertOutcome::Appended)
    }

    /// Creates the file with owner-only permissions if it does not exist.
    fn ensure_exists(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.error(e))?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        match options.open(&self.path) {
            Ok(_) => {
                // mode() is filtered by the umask; set it explicitly.
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))
                        .map_err(|e| self.error(e))?;
                }
                debug!(path = %self.path.display(), "created credential file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(self.error(e)),
        }
    }

    fn error(&self, source: std::io::Error) -> SyncError {
        SyncError::CredentialStore {
            path: self.path.clone(),
            source,
        }
    }
}
