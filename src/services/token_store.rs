// src/services/token_store.rs
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::{
    errors::{RiderError, RiderResult},
    models::user::{AuthTokens, User},
};

pub const ACCESS_KEY: &str = "hfc_access";
pub const REFRESH_KEY: &str = "hfc_refresh";
pub const USER_KEY: &str = "hfc_user";

const SESSION_FILE: &str = "session.json";
const LOGGED_IN_FLAG: &str = "hfc_logged_in";

/// Where the session lives between runs.
///
/// `is_authenticated` reads a separate flag so that callers which only
/// gate on "logged in or not" never touch the tokens themselves.
pub trait TokenStore: Send + Sync {
    fn save_tokens(&self, tokens: &AuthTokens) -> RiderResult<()>;
    fn save_user(&self, user: &User) -> RiderResult<()>;
    fn access_token(&self) -> Option<String>;
    fn refresh_token(&self) -> Option<String>;
    fn stored_user(&self) -> Option<User>;
    fn clear(&self) -> RiderResult<()>;
    fn is_authenticated(&self) -> bool;
}

#[derive(Default)]
struct Session {
    values: BTreeMap<String, String>,
    logged_in: bool,
}

impl Session {
    fn put_tokens(&mut self, tokens: &AuthTokens) {
        self.values.insert(ACCESS_KEY.to_string(), tokens.access.clone());
        self.values.insert(REFRESH_KEY.to_string(), tokens.refresh.clone());
        self.logged_in = true;
    }

    fn user(&self) -> Option<User> {
        // A corrupt cached profile is treated as absent.
        self.values
            .get(USER_KEY)
            .and_then(|raw| serde_json::from_str(raw).ok())
    }
}

/// In-process store for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryTokenStore {
    session: Mutex<Session>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(access: &str, refresh: &str) -> Self {
        let store = Self::new();
        store.lock().put_tokens(&AuthTokens {
            access: access.to_string(),
            refresh: refresh.to_string(),
        });
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TokenStore for MemoryTokenStore {
    fn save_tokens(&self, tokens: &AuthTokens) -> RiderResult<()> {
        self.lock().put_tokens(tokens);
        Ok(())
    }

    fn save_user(&self, user: &User) -> RiderResult<()> {
        let raw = serde_json::to_string(user)?;
        self.lock().values.insert(USER_KEY.to_string(), raw);
        Ok(())
    }

    fn access_token(&self) -> Option<String> {
        self.lock().values.get(ACCESS_KEY).cloned()
    }

    fn refresh_token(&self) -> Option<String> {
        self.lock().values.get(REFRESH_KEY).cloned()
    }

    fn stored_user(&self) -> Option<User> {
        self.lock().user()
    }

    fn clear(&self) -> RiderResult<()> {
        *self.lock() = Session::default();
        Ok(())
    }

    fn is_authenticated(&self) -> bool {
        self.lock().logged_in
    }
}

/// Session persisted under a state directory: `session.json` holds the
/// key/value pairs and `hfc_logged_in` is the bare flag.
pub struct FileTokenStore {
    dir: PathBuf,
    // Serializes read-modify-write cycles within this process.
    guard: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), guard: Mutex::new(()) }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }

    fn flag_path(&self) -> PathBuf {
        self.dir.join(LOGGED_IN_FLAG)
    }

    fn read_values(&self) -> BTreeMap<String, String> {
        match fs::read_to_string(self.session_path()) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                tracing::warn!("Ignoring unreadable session file: {}", err);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        }
    }

    fn write_values(&self, values: &BTreeMap<String, String>) -> RiderResult<()> {
        fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!("{}.tmp", SESSION_FILE));
        // A leftover temp file would keep its old mode.
        Self::remove_if_present(&tmp)?;
        write_owner_only(&tmp, &serde_json::to_vec_pretty(values)?)?;
        fs::rename(&tmp, self.session_path())?;
        Ok(())
    }

    fn update<F>(&self, change: F) -> RiderResult<()>
    where
        F: FnOnce(&mut BTreeMap<String, String>),
    {
        let _held = self.guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut values = self.read_values();
        change(&mut values);
        self.write_values(&values)
    }

    fn remove_if_present(path: &Path) -> RiderResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(RiderError::from(err)),
        }
    }
}

/// Creates `path` readable by the owner only, since it holds the tokens.
fn write_owner_only(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

impl TokenStore for FileTokenStore {
    fn save_tokens(&self, tokens: &AuthTokens) -> RiderResult<()> {
        self.update(|values| {
            values.insert(ACCESS_KEY.to_string(), tokens.access.clone());
            values.insert(REFRESH_KEY.to_string(), tokens.refresh.clone());
        })?;
        fs::write(self.flag_path(), "true")?;
        Ok(())
    }

    fn save_user(&self, user: &User) -> RiderResult<()> {
        let raw = serde_json::to_string(user)?;
        self.update(|values| {
            values.insert(USER_KEY.to_string(), raw);
        })
    }

    fn access_token(&self) -> Option<String> {
        self.read_values().remove(ACCESS_KEY)
    }

    fn refresh_token(&self) -> Option<String> {
        self.read_values().remove(REFRESH_KEY)
    }

    fn stored_user(&self) -> Option<User> {
        Session { values: self.read_values(), logged_in: false }.user()
    }

    fn clear(&self) -> RiderResult<()> {
        let _held = self.guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Self::remove_if_present(&self.session_path())?;
        Self::remove_if_present(&self.flag_path())
    }

    fn is_authenticated(&self) -> bool {
        fs::read_to_string(self.flag_path())
            .map(|flag| flag.trim() == "true")
            .unwrap_or(false)
    }
}
