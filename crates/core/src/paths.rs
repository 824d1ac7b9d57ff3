use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".atelier"))
            .unwrap_or_else(|| PathBuf::from(".atelier"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.base.join("sessions")
    }

    /// File for an encrypted session record.
    pub fn encrypted_session_file(&self, platform: &str) -> PathBuf {
        self.sessions_dir()
            .join(format!("{}.enc", sanitize_platform(platform)))
    }

    /// File for a plaintext session record.
    pub fn plaintext_session_file(&self, platform: &str) -> PathBuf {
        self.sessions_dir()
            .join(format!("{}.json", sanitize_platform(platform)))
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

/// Platform identifiers land in file names, so path separators and
/// drive-colon characters are mapped away.
pub fn sanitize_platform(platform: &str) -> String {
    platform.replace([':', '/', '\\'], "_")
}
