use atelier_core::Paths;
use atelier_storage::SessionStore;

fn open_store() -> anyhow::Result<SessionStore> {
    Ok(SessionStore::from_env(Paths::new())?)
}

pub async fn list() -> anyhow::Result<()> {
    let store = open_store()?;
    let entries = store.list()?;
    if entries.is_empty() {
        println!("No saved sessions.");
        return Ok(());
    }
    for entry in entries {
        let marker = if entry.encrypted {
            "encrypted"
        } else {
            "plaintext"
        };
        println!("{:<24} {}", entry.platform, marker);
    }
    Ok(())
}

pub async fn show(platform: &str) -> anyhow::Result<()> {
    let store = open_store()?;
    match store.load(platform)? {
        Some(record) => {
            println!("{}", record.to_canonical_json()?);
        }
        None => {
            println!("No saved session for '{}'.", platform);
        }
    }
    Ok(())
}

pub async fn delete(platform: &str) -> anyhow::Result<()> {
    let store = open_store()?;
    if store.delete(platform)? {
        println!("Deleted session for '{}'.", platform);
    } else {
        println!("No saved session for '{}'.", platform);
    }
    Ok(())
}
