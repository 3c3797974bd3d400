use std::io::Write;
use std::path::{Path, PathBuf};

use ronydb_crypto::Passphrase;
use ronydb_rotation::PassphraseSink;

use crate::ConfigError;

pub const PASSPHRASE_VAR: &str = "RONYDB_PASSPHRASE";
pub const NEW_PASSPHRASE_VAR: &str = "RONYDB_NEW_PASSPHRASE";

/// The env file holding the active passphrase.
#[derive(Debug, Clone)]
pub struct PassphraseFile {
    path: PathBuf,
}

impl PassphraseFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Active passphrase: the process environment wins over the file.
    pub fn load(&self) -> Result<Passphrase, ConfigError> {
        self.load_with(std::env::var(PASSPHRASE_VAR).ok())
    }

    /// Like [`load`](Self::load) with the environment value passed in.
    pub fn load_with(&self, env_value: Option<String>) -> Result<Passphrase, ConfigError> {
        let value = match env_value {
            Some(v) => v,
            None => self
                .read_from_file()?
                .ok_or_else(|| ConfigError::MissingPassphrase(PASSPHRASE_VAR.to_string()))?,
        };
        non_empty(PASSPHRASE_VAR, value)
    }

    fn read_from_file(&self) -> Result<Option<String>, ConfigError> {
        let iter = match dotenvy::from_path_iter(&self.path) {
            Ok(iter) => iter,
            Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None)
            }
            Err(source) => {
                return Err(ConfigError::EnvFile {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let mut found = None;
        for item in iter {
            let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                path: self.path.clone(),
                source,
            })?;
            if key == PASSPHRASE_VAR {
                found = Some(value);
            }
        }
        Ok(found)
    }

    /// Replace the passphrase line (or append one), keeping every other
    /// line as it was. The file is swapped in with a rename.
    pub fn save(&self, passphrase: &Passphrase) -> Result<(), ConfigError> {
        let existing = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let assignment = format!("{}={}", PASSPHRASE_VAR, quote(passphrase.expose()));
        let mut lines: Vec<&str> = Vec::new();
        let mut replaced = false;
        for line in existing.lines() {
            if assigns_passphrase(line) {
                if !replaced {
                    lines.push(&assignment);
                    replaced = true;
                }
            } else {
                lines.push(line);
            }
        }
        if !replaced {
            lines.push(&assignment);
        }
        let mut contents = lines.join("\n");
        contents.push('\n');

        let write_err = |source| ConfigError::Write {
            path: self.path.clone(),
            source,
        };
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(contents.as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&self.path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}

impl PassphraseSink for PassphraseFile {
    fn persist(&self, passphrase: &Passphrase) -> Result<(), String> {
        self.save(passphrase).map_err(|e| e.to_string())
    }
}

/// Read a passphrase from the named environment variable.
pub fn read_passphrase_var(name: &str) -> Result<Passphrase, ConfigError> {
    let value =
        std::env::var(name).map_err(|_| ConfigError::MissingPassphrase(name.to_string()))?;
    non_empty(name, value)
}

fn non_empty(name: &str, value: String) -> Result<Passphrase, ConfigError> {
    let passphrase = Passphrase::new(value);
    if passphrase.is_empty() {
        return Err(ConfigError::EmptyPassphrase(name.to_string()));
    }
    Ok(passphrase)
}

fn assigns_passphrase(line: &str) -> bool {
    let line = line.trim_start();
    let line = line.strip_prefix("export ").unwrap_or(line).trim_start();
    line.strip_prefix(PASSPHRASE_VAR)
        .map(|rest| rest.trim_start().starts_with('='))
        .unwrap_or(false)
}

// Single quotes are literal in dotenv files; fall back to double quotes with
// escapes when the value itself contains one.
fn quote(value: &str) -> String {
    if !value.contains('\'') && !value.contains('\n') {
        return format!("'{}'", value);
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '$' => out.push_str("\\$"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_file(contents: &str) -> (tempfile::TempDir, PassphraseFile) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, contents).unwrap();
        (dir, PassphraseFile::new(path))
    }

    #[test]
    fn loads_from_file_and_env_wins() {
        let (_dir, f) = env_file("OTHER=1\nRONYDB_PASSPHRASE=from-file\n");
        assert_eq!(f.load_with(None).unwrap().expose(), "from-file");
        assert_eq!(
            f.load_with(Some("from-env".into())).unwrap().expose(),
            "from-env"
        );
    }

    #[test]
    fn missing_and_empty() {
        let (_dir, f) = env_file("OTHER=1\n");
        assert!(matches!(
            f.load_with(None),
            Err(ConfigError::MissingPassphrase(_))
        ));

        let (_dir, f) = env_file("RONYDB_PASSPHRASE=\n");
        assert!(matches!(
            f.load_with(None),
            Err(ConfigError::EmptyPassphrase(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        let absent = PassphraseFile::new(dir.path().join("none.env"));
        assert!(matches!(
            absent.load_with(None),
            Err(ConfigError::MissingPassphrase(_))
        ));
    }

    #[test]
    fn save_rewrites_only_the_passphrase_line() {
        let (_dir, f) = env_file(
            "# secrets\nDATABASE_URL=sqlite://cv.db\nexport RONYDB_PASSPHRASE=old\nTRAILER=x\n",
        );
        f.save(&Passphrase::new("n3w$ecret #1")).unwrap();

        let contents = std::fs::read_to_string(f.path()).unwrap();
        assert_eq!(
            contents,
            "# secrets\nDATABASE_URL=sqlite://cv.db\nRONYDB_PASSPHRASE='n3w$ecret #1'\nTRAILER=x\n"
        );
        assert_eq!(f.load_with(None).unwrap().expose(), "n3w$ecret #1");
    }

    #[test]
    fn save_appends_and_creates() {
        let (_dir, f) = env_file("A=1");
        f.save(&Passphrase::new("p")).unwrap();
        assert_eq!(
            std::fs::read_to_string(f.path()).unwrap(),
            "A=1\nRONYDB_PASSPHRASE='p'\n"
        );

        let dir = tempfile::tempdir().unwrap();
        let fresh = PassphraseFile::new(dir.path().join(".env"));
        fresh.save(&Passphrase::new("it's")).unwrap();
        assert_eq!(fresh.load_with(None).unwrap().expose(), "it's");
    }

    #[test]
    fn sink_persists() {
        let (_dir, f) = env_file("RONYDB_PASSPHRASE=old\n");
        let sink: &dyn PassphraseSink = &f;
        sink.persist(&Passphrase::new("new")).unwrap();
        assert_eq!(f.load_with(None).unwrap().expose(), "new");
    }

    #[test]
    fn recognises_assignment_lines() {
        assert!(assigns_passphrase("RONYDB_PASSPHRASE=x"));
        assert!(assigns_passphrase("  export RONYDB_PASSPHRASE = x"));
        assert!(!assigns_passphrase("RONYDB_PASSPHRASE_OLD=x"));
        assert!(!assigns_passphrase("# RONYDB_PASSPHRASE=x"));
    }
}
