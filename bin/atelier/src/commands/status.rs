use atelier_core::{Config, Paths, SESSION_KEY_ENV};
use atelier_storage::SessionStore;

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!("atelier status");
    println!("==============");
    println!();

    let config_path = paths.config_file();
    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_path.exists() { "✓" } else { "✗ (defaults)" }
    );

    let config = Config::load(&paths)?;
    println!("Relay:     ws://{}/ws", config.relay_addr());

    let sessions_dir = paths.sessions_dir();
    println!(
        "Sessions:  {} {}",
        sessions_dir.display(),
        if sessions_dir.exists() { "✓" } else { "✗ (none saved)" }
    );

    let encryption = if Config::session_passphrase().is_some() {
        "enabled".to_string()
    } else {
        format!("DISABLED (set {} to enable)", SESSION_KEY_ENV)
    };
    println!("Encryption: {}", encryption);

    let store = SessionStore::from_env(paths)?;
    let entries = store.list()?;
    println!();
    println!("Saved sessions: {}", entries.len());
    for entry in entries {
        let marker = if entry.encrypted {
            "encrypted"
        } else {
            "plaintext"
        };
        println!("  {:<24} {}", entry.platform, marker);
    }

    Ok(())
}
