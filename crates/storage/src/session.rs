//! Encrypted persistence of browser session records.
//!
//! One record per platform identifier, stored under the sessions directory.
//! With a passphrase configured the record is sealed with AES-256-GCM and
//! written as `<platform>.enc`; without one it is written as plaintext
//! `<platform>.json` and a warning is emitted. Records are never expired or
//! deleted automatically.

use std::path::Path;

use tracing::{debug, warn};

use atelier_core::{Error, Paths, Result};
use atelier_crypto::{decrypt_with_key, derive_key, encrypt_with_key, KEY_LEN};

use crate::record::SessionRecord;

/// A saved session as seen in the store directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub platform: String,
    pub encrypted: bool,
}

pub struct SessionStore {
    paths: Paths,
    /// Derived once per store so bulk save/load does not repeat the KDF.
    key: Option<[u8; KEY_LEN]>,
}

impl SessionStore {
    pub fn new(paths: Paths, passphrase: Option<&str>) -> Result<Self> {
        let key = match passphrase {
            Some(p) => Some(derive_key(p)?),
            None => None,
        };
        Ok(Self { paths, key })
    }

    /// Build a store using the passphrase from the environment
    /// (`ATELIER_SESSION_KEY`); absent means plaintext mode.
    pub fn from_env(paths: Paths) -> Result<Self> {
        let passphrase = atelier_core::Config::session_passphrase();
        Self::new(paths, passphrase.as_deref())
    }

    pub fn encryption_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Persist a record, overwriting any prior one for the same platform.
    pub fn save(&self, platform: &str, record: &SessionRecord) -> Result<()> {
        let json = record.to_canonical_json()?;

        match &self.key {
            Some(key) => {
                let blob = encrypt_with_key(&json, key)?;
                let path = self.paths.encrypted_session_file(platform);
                write_atomic(&path, blob.as_bytes())?;
                debug!(platform = platform, path = %path.display(), "Session saved (encrypted)");
            }
            None => {
                warn!(
                    platform = platform,
                    "session persisted without encryption; set {} to enable",
                    atelier_core::SESSION_KEY_ENV
                );
                let path = self.paths.plaintext_session_file(platform);
                write_atomic(&path, json.as_bytes())?;
                debug!(platform = platform, path = %path.display(), "Session saved (plaintext)");
            }
        }
        Ok(())
    }

    /// Load the record for a platform, or `None` when nothing was saved.
    ///
    /// An encrypted record is only consulted when a passphrase is
    /// configured; crypto failures (corrupt blob, wrong passphrase) are
    /// propagated, never reported as "no session".
    pub fn load(&self, platform: &str) -> Result<Option<SessionRecord>> {
        if let Some(key) = &self.key {
            let enc_path = self.paths.encrypted_session_file(platform);
            if enc_path.exists() {
                let blob = std::fs::read_to_string(&enc_path)?;
                let json = decrypt_with_key(&blob, key)?;
                return Ok(Some(SessionRecord::from_json(&json)?));
            }
        }

        let plain_path = self.paths.plaintext_session_file(platform);
        if plain_path.exists() {
            warn!(
                platform = platform,
                "loading plaintext session; set {} to enable encryption",
                atelier_core::SESSION_KEY_ENV
            );
            let json = std::fs::read_to_string(&plain_path)?;
            return Ok(Some(SessionRecord::from_json(&json)?));
        }

        Ok(None)
    }

    /// Enumerate saved sessions. Encrypted and plaintext records for the
    /// same platform show up as separate entries.
    pub fn list(&self) -> Result<Vec<SessionEntry>> {
        let dir = self.paths.sessions_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            let (Some(stem), Some(ext)) = (
                path.file_stem().and_then(|s| s.to_str()),
                path.extension().and_then(|e| e.to_str()),
            ) else {
                continue;
            };
            let encrypted = match ext {
                "enc" => true,
                "json" => false,
                _ => continue,
            };
            entries.push(SessionEntry {
                platform: stem.to_string(),
                encrypted,
            });
        }
        entries.sort_by(|a, b| a.platform.cmp(&b.platform));
        Ok(entries)
    }

    /// Remove any saved record (encrypted or plaintext) for a platform.
    /// Returns whether something was deleted.
    pub fn delete(&self, platform: &str) -> Result<bool> {
        let mut removed = false;
        for path in [
            self.paths.encrypted_session_file(platform),
            self.paths.plaintext_session_file(platform),
        ] {
            if path.exists() {
                std::fs::remove_file(&path)?;
                removed = true;
            }
        }
        Ok(removed)
    }
}

/// Write through a sibling temp file and rename so a failed write never
/// clobbers a previously good record.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Session(format!("invalid session path: {}", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        Error::Io(e)
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Cookie, SessionRecord};

    fn sample_record(marker: &str) -> SessionRecord {
        SessionRecord {
            cookies: vec![Cookie {
                name: "sid".to_string(),
                value: marker.to_string(),
                domain: ".example.com".to_string(),
                path: "/".to_string(),
                expires: None,
                http_only: true,
                secure: true,
                same_site: None,
            }],
            origins: vec![],
            extra: serde_json::Map::new(),
        }
    }

    fn store(dir: &tempfile::TempDir, passphrase: Option<&str>) -> SessionStore {
        let paths = Paths::with_base(dir.path().to_path_buf());
        SessionStore::new(paths, passphrase).unwrap()
    }

    #[test]
    fn test_encrypted_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, Some("passphrase"));
        let record = sample_record("v1");
        store.save("facebook", &record).unwrap();

        assert!(dir.path().join("sessions/facebook.enc").exists());
        assert!(!dir.path().join("sessions/facebook.json").exists());

        let loaded = store.load("facebook").unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_encrypted_file_is_not_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, Some("passphrase"));
        store.save("facebook", &sample_record("supersecret")).unwrap();
        let on_disk =
            std::fs::read_to_string(dir.path().join("sessions/facebook.enc")).unwrap();
        assert!(!on_disk.contains("supersecret"));
        assert_eq!(on_disk.split(':').count(), 3);
    }

    #[test]
    fn test_plaintext_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, None);
        let record = sample_record("v1");
        store.save("instagram", &record).unwrap();

        assert!(dir.path().join("sessions/instagram.json").exists());
        let loaded = store.load("instagram").unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_absent_platform_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(&dir, Some("k")).load("never-saved").unwrap().is_none());
        assert!(store(&dir, None).load("never-saved").unwrap().is_none());
    }

    #[test]
    fn test_save_overwrites_prior_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir, Some("k"));
        store.save("facebook", &sample_record("old")).unwrap();
        store.save("facebook", &sample_record("new")).unwrap();
        let loaded = store.load("facebook").unwrap().unwrap();
        assert_eq!(loaded.cookies[0].value, "new");
    }

    #[test]
    fn test_encrypted_wins_when_passphrase_configured() {
        let dir = tempfile::tempdir().unwrap();
        let plain = store(&dir, None);
        plain.save("facebook", &sample_record("plain")).unwrap();
        let enc = store(&dir, Some("k"));
        enc.save("facebook", &sample_record("encrypted")).unwrap();

        let loaded = enc.load("facebook").unwrap().unwrap();
        assert_eq!(loaded.cookies[0].value, "encrypted");
    }

    #[test]
    fn test_without_passphrase_encrypted_record_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let enc = store(&dir, Some("k"));
        enc.save("facebook", &sample_record("encrypted")).unwrap();
        let plain = store(&dir, None);
        plain.save("facebook", &sample_record("plain")).unwrap();

        // The unreadable .enc file must not crash the load.
        let loaded = plain.load("facebook").unwrap().unwrap();
        assert_eq!(loaded.cookies[0].value, "plain");
    }

    #[test]
    fn test_without_passphrase_only_encrypted_present_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let enc = store(&dir, Some("k"));
        enc.save("facebook", &sample_record("encrypted")).unwrap();
        assert!(store(&dir, None).load("facebook").unwrap().is_none());
    }

    #[test]
    fn test_wrong_passphrase_propagates_auth_error() {
        let dir = tempfile::tempdir().unwrap();
        store(&dir, Some("right")).save("facebook", &sample_record("v")).unwrap();
        match store(&dir, Some("wrong")).load("facebook") {
            Err(Error::CryptoAuth(_)) => {}
            other => panic!("expected CryptoAuth, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupted_blob_propagates_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir, Some("k"));
        s.save("facebook", &sample_record("v")).unwrap();
        std::fs::write(dir.path().join("sessions/facebook.enc"), "not-a-blob").unwrap();
        match s.load("facebook") {
            Err(Error::CryptoFormat(_)) => {}
            other => panic!("expected CryptoFormat, got {:?}", other),
        }
    }

    #[test]
    fn test_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let enc = store(&dir, Some("k"));
        enc.save("facebook", &sample_record("v")).unwrap();
        let plain = store(&dir, None);
        plain.save("instagram", &sample_record("v")).unwrap();

        let entries = enc.list().unwrap();
        assert_eq!(
            entries,
            vec![
                SessionEntry { platform: "facebook".to_string(), encrypted: true },
                SessionEntry { platform: "instagram".to_string(), encrypted: false },
            ]
        );

        assert!(enc.delete("facebook").unwrap());
        assert!(!enc.delete("facebook").unwrap());
        assert_eq!(enc.list().unwrap().len(), 1);
    }

    #[test]
    fn test_list_on_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store(&dir, None).list().unwrap().is_empty());
    }

    #[test]
    fn test_platform_id_is_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir, None);
        s.save("work/profile", &sample_record("v")).unwrap();
        assert!(dir.path().join("sessions/work_profile.json").exists());
        assert!(s.load("work/profile").unwrap().is_some());
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir, Some("k"));
        s.save("facebook", &sample_record("v")).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("sessions"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
