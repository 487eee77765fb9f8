use crate::config::generate::generate_starter_config;
use crate::config::{SYSTEM_CONFIG_PATH, USER_CONFIG_PATH};
use std::fs;
use std::path::{Path, PathBuf};

pub fn init(stdout: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_content = generate_starter_config();

    if stdout {
        print!("{}", config_content);
        return Ok(());
    }

    let config_path = default_config_path();
    write_config(&config_content, &config_path)?;
    println!("Config file written to {}", config_path.display());
    Ok(())
}

/// `~/.config/oee/config.yml` when its directory can be created, else `/etc/oee/config.yml`.
fn default_config_path() -> PathBuf {
    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(USER_CONFIG_PATH);
        match user_config.parent().map(fs::create_dir_all) {
            Some(Ok(())) => return user_config,
            Some(Err(e)) => {
                eprintln!("Warning: could not create {}: {}", home_dir.join(".config/oee").display(), e);
                eprintln!("Falling back to {}", SYSTEM_CONFIG_PATH);
            }
            None => {}
        }
    }
    PathBuf::from(SYSTEM_CONFIG_PATH)
}

/// Write `config_content` to `path`, refusing to replace an existing file.
pub fn write_config(config_content: &str, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        return Err(format!(
            "config file already exists at {}; remove it first or use --stdout to print the config",
            path.display()
        )
        .into());
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, config_content)?;
    Ok(())
}

pub fn validate(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path.ok_or("no config file found; use --config to specify a path")?;

    println!("Validating config file: {}", path.display());
    let config = crate::config::load_config(&path)?;
    println!(
        "Config is valid: {} site(s), {} minute look-back",
        config.job.sites.len(),
        config.job.lookback_minutes
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_config_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/oee/config.yml");

        write_config(&generate_starter_config(), &path).unwrap();
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.contains("data_set_id"));
    }

    #[test]
    fn test_write_config_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(&path, "job:\n  sites: [Keep]\n").unwrap();

        let err = write_config(&generate_starter_config(), &path).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(fs::read_to_string(&path).unwrap(), "job:\n  sites: [Keep]\n");
    }

    #[test]
    fn test_validate_reports_invalid_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yml");
        fs::write(&path, "job:\n  sites: []\n").unwrap();

        assert!(validate(Some(path)).is_err());
        assert!(validate(None).is_err());
    }
}
