use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    lectern_vault::{Encryptor, IdentityProvider},
    tracing::{debug, warn},
};

use super::{TokenStore, validate_instance_name};
use crate::{Error, Result, types::OAuthToken};

const TOKEN_EXTENSION: &str = ".token.enc";

/// Stores each token as `<dir>/<instance>.token.enc`, sealed with a key bound
/// to this machine and OS user.
pub struct FileTokenStore {
    dir: PathBuf,
    encryptor: Encryptor,
}

impl FileTokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_encryptor(dir, Encryptor::new())
    }

    /// Derive keys from `identity` instead of the real machine and user.
    pub fn with_identity(dir: impl Into<PathBuf>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self::with_encryptor(dir, Encryptor::with_identity(identity))
    }

    pub fn with_encryptor(dir: impl Into<PathBuf>, encryptor: Encryptor) -> Self {
        Self {
            dir: dir.into(),
            encryptor,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, instance: &str) -> Result<PathBuf> {
        validate_instance_name(instance)?;
        Ok(self.dir.join(format!("{instance}{TOKEN_EXTENSION}")))
    }

    /// Instance names with a stored token, sorted. A missing directory is empty.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            if let Some(name) = file_name
                .to_str()
                .and_then(|n| n.strip_suffix(TOKEN_EXTENSION))
                .filter(|n| validate_instance_name(n).is_ok())
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.dir, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(())
    }
}

impl TokenStore for FileTokenStore {
    fn save(&self, instance: &str, token: &OAuthToken) -> Result<()> {
        let path = self.path_for(instance)?;
        let json = serde_json::to_vec(token)?;
        let sealed = self.encryptor.encrypt(&json)?;

        self.ensure_dir()?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        tmp.write_all(&sealed)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| Error::from(e.error))?;

        debug!(instance, path = %path.display(), "token saved");
        Ok(())
    }

    fn load(&self, instance: &str) -> Result<OAuthToken> {
        let path = self.path_for(instance)?;
        let sealed = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(instance.to_string()));
            },
            Err(e) => return Err(e.into()),
        };

        let json = self.encryptor.decrypt(&sealed).inspect_err(|e| {
            warn!(instance, path = %path.display(), error = %e, "stored token could not be decrypted");
        })?;
        Ok(serde_json::from_slice(&json)?)
    }

    fn delete(&self, instance: &str) -> Result<()> {
        let path = self.path_for(instance)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(instance, path = %path.display(), "token deleted");
                Ok(())
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, instance: &str) -> bool {
        self.path_for(instance).is_ok_and(|p| p.is_file())
    }
}
