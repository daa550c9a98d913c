//! Session persistence between messages.
//!
//! Sessions are kept as CBOR so both stores exercise the same encoding a
//! restart would read back.

use crate::error::{ServerError, ServerResult};
use crate::key::SessionKey;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use syncml_engine::SyncSession;
use tracing::debug;

/// Storage for sessions that span several messages.
pub trait SessionStore: Send {
    /// Loads a session, or `None` if the key is unknown.
    fn load(&mut self, key: &SessionKey) -> ServerResult<Option<SyncSession>>;

    /// Stores a session, replacing a previous one.
    fn save(&mut self, key: &SessionKey, session: &SyncSession) -> ServerResult<()>;

    /// Forgets a session. Unknown keys are not an error.
    fn remove(&mut self, key: &SessionKey) -> ServerResult<()>;

    /// Number of stored sessions.
    fn len(&self) -> ServerResult<usize>;

    /// Returns true if no session is stored.
    fn is_empty(&self) -> ServerResult<bool> {
        Ok(self.len()? == 0)
    }
}

fn encode(session: &SyncSession) -> ServerResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(session, &mut bytes).map_err(|e| ServerError::Store(e.to_string()))?;
    Ok(bytes)
}

fn decode(bytes: &[u8]) -> ServerResult<SyncSession> {
    ciborium::from_reader(bytes).map_err(|e| ServerError::Store(e.to_string()))
}

/// Sessions held in memory.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: HashMap<SessionKey, Vec<u8>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&mut self, key: &SessionKey) -> ServerResult<Option<SyncSession>> {
        self.sessions.get(key).map(|bytes| decode(bytes)).transpose()
    }

    fn save(&mut self, key: &SessionKey, session: &SyncSession) -> ServerResult<()> {
        self.sessions.insert(key.clone(), encode(session)?);
        Ok(())
    }

    fn remove(&mut self, key: &SessionKey) -> ServerResult<()> {
        self.sessions.remove(key);
        Ok(())
    }

    fn len(&self) -> ServerResult<usize> {
        Ok(self.sessions.len())
    }
}

/// Sessions stored as one `<key>.cbor` file each in a directory.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    /// Extension of session files.
    pub const EXTENSION: &'static str = "cbor";

    /// Opens a store in `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> ServerResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory holding the session files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &SessionKey) -> PathBuf {
        self.dir.join(format!("{key}.{}", Self::EXTENSION))
    }
}

impl SessionStore for FileSessionStore {
    fn load(&mut self, key: &SessionKey) -> ServerResult<Option<SyncSession>> {
        match fs::read(self.path(key)) {
            Ok(bytes) => decode(&bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&mut self, key: &SessionKey, session: &SyncSession) -> ServerResult<()> {
        let bytes = encode(session)?;
        let path = self.path(key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &path)?;
        debug!(key = %key, bytes = bytes.len(), "session saved");
        Ok(())
    }

    fn remove(&mut self, key: &SessionKey) -> ServerResult<()> {
        match fs::remove_file(self.path(key)) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn len(&self) -> ServerResult<usize> {
        let mut count = 0;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == Self::EXTENSION) {
                count += 1;
            }
        }
        Ok(count)
    }
}
