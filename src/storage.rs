use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Longest key the backend accepts, same limit as ESP-IDF NVS.
pub const MAX_KEY_NAME_LEN: usize = 15;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("invalid key {0:?}")]
    InvalidKey(String),
    #[error("i/o error on key {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
}

/// Non-volatile key/value storage for small blobs.
pub trait KvStore: Send {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;
    fn save(&mut self, key: &str, data: &[u8]) -> Result<(), KvError>;
    /// Removing an absent key is not an error.
    fn remove(&mut self, key: &str) -> Result<(), KvError>;
}

fn check_key(key: &str) -> Result<(), KvError> {
    let valid = !key.is_empty()
        && key.len() <= MAX_KEY_NAME_LEN
        && key
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(KvError::InvalidKey(key.to_string()))
    }
}

/// One file per key inside a namespace directory.
pub struct FileKv {
    dir: PathBuf,
}

impl FileKv {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, KvError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| KvError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> Result<PathBuf, KvError> {
        check_key(key)?;
        Ok(self.dir.join(key))
    }
}

impl KvStore for FileKv {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        let path = self.path(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(KvError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn save(&mut self, key: &str, data: &[u8]) -> Result<(), KvError> {
        let path = self.path(key)?;
        let tmp = path.with_extension("tmp");
        let io_err = |source| KvError::Io {
            key: key.to_string(),
            source,
        };
        fs::write(&tmp, data).map_err(io_err)?;
        fs::rename(&tmp, &path).map_err(io_err)
    }

    fn remove(&mut self, key: &str) -> Result<(), KvError> {
        let path = self.path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(KvError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

/// In-memory backend whose writes can be made to fail. Clones share state.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MemoryKv {
    inner: std::sync::Arc<std::sync::Mutex<MemoryInner>>,
}

#[cfg(test)]
#[derive(Default)]
struct MemoryInner {
    map: std::collections::HashMap<String, Vec<u8>>,
    saves_left: Option<usize>,
}

#[cfg(test)]
impl MemoryKv {
    /// Let `n` more saves succeed, then fail every save after that.
    pub fn fail_after(&self, n: usize) {
        self.inner.lock().unwrap().saves_left = Some(n);
    }

    pub fn heal(&self) {
        self.inner.lock().unwrap().saves_left = None;
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().map.get(key).cloned()
    }

    pub fn put(&self, key: &str, data: &[u8]) {
        self.inner
            .lock()
            .unwrap()
            .map
            .insert(key.to_string(), data.to_vec());
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.inner.lock().unwrap().map.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
impl KvStore for MemoryKv {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
        check_key(key)?;
        Ok(self.get(key))
    }

    fn save(&mut self, key: &str, data: &[u8]) -> Result<(), KvError> {
        check_key(key)?;
        let mut inner = self.inner.lock().unwrap();
        if let Some(left) = inner.saves_left.as_mut() {
            if *left == 0 {
                return Err(KvError::Io {
                    key: key.to_string(),
                    source: io::Error::new(io::ErrorKind::Other, "injected write failure"),
                });
            }
            *left -= 1;
        }
        inner.map.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), KvError> {
        check_key(key)?;
        self.inner.lock().unwrap().map.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_kv_round_trips_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let mut kv = FileKv::open(dir.path().join("totp")).unwrap();

        assert_eq!(kv.load("svc_0").unwrap(), None);
        kv.save("svc_0", b"first").unwrap();
        kv.save("svc_0", b"second").unwrap();
        assert_eq!(kv.load("svc_0").unwrap().as_deref(), Some(&b"second"[..]));
        assert!(!kv.dir().join("svc_0.tmp").exists());

        kv.remove("svc_0").unwrap();
        assert_eq!(kv.load("svc_0").unwrap(), None);
        kv.remove("svc_0").unwrap();
    }

    #[test]
    fn file_kv_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut kv = FileKv::open(dir.path()).unwrap();
            kv.save("svc_count", &[3, 0, 0, 0]).unwrap();
        }
        let kv = FileKv::open(dir.path()).unwrap();
        assert_eq!(kv.load("svc_count").unwrap(), Some(vec![3, 0, 0, 0]));
    }

    #[test]
    fn rejects_invalid_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut kv = FileKv::open(dir.path()).unwrap();
        for key in ["", "../escape", "UPPER", "a_key_that_is_too_long", "svc.0"] {
            assert!(matches!(kv.save(key, b"x"), Err(KvError::InvalidKey(_))), "{key}");
        }
    }

    #[test]
    fn memory_kv_injects_failures() {
        let mut kv = MemoryKv::default();
        kv.fail_after(1);
        kv.save("a", b"1").unwrap();
        assert!(kv.save("b", b"2").is_err());
        kv.heal();
        kv.save("b", b"2").unwrap();
        assert_eq!(kv.keys(), vec!["a".to_string(), "b".to_string()]);
    }
}
