use std::path::Path;

use clap::{Args, Subcommand, ValueEnum};

use hoodie_store::RemoteConfig;

use crate::config::Config;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Write a config file with the current values
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!(
                            "database_path: {}",
                            config.database_path.value.display()
                        );
                        println!("  source: {}", config.database_path.source);
                        println!();

                        println!("identity: {}", config.identity.value);
                        println!("  source: {}", config.identity.source);
                        println!();

                        println!("base_url: {}", config.base_url.value);
                        println!("  source: {}", config.base_url.source);
                        println!();

                        println!("sync_interval_secs: {}", config.sync_interval_secs.value);
                        println!("  source: {}", config.sync_interval_secs.source);
                        println!();

                        let remote = RemoteConfig::new(
                            config.base_url.value.clone(),
                            config.identity.value.clone(),
                        );
                        println!("Remote URL: {}", remote.remote_url());
                    }
                }
                Ok(())
            }
            ConfigSubcommand::Init { force } => {
                let path = config
                    .config_file
                    .clone()
                    .unwrap_or_else(Config::default_config_path);
                init_config(config, &path, *force)?;
                println!("Wrote {}", path.display());
                Ok(())
            }
        }
    }
}

/// Writes `config` to `path`, refusing to replace an existing file unless
/// `force` is set.
fn init_config(config: &Config, path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() && !force {
        return Err(format!(
            "Config file '{}' already exists (use --force to overwrite)",
            path.display()
        )
        .into());
    }
    config.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn load_from(dir: &Path, contents: &str) -> (Config, std::path::PathBuf) {
        let config_path = dir.join("config.yaml");
        std::fs::write(&config_path, contents).unwrap();
        (Config::load(Some(config_path.clone())).unwrap(), config_path)
    }

    #[test]
    fn test_init_writes_loadable_file() {
        let temp_dir = tempdir().unwrap();
        let (config, _) = load_from(
            temp_dir.path(),
            "database_path: data/store.db\nidentity: \"a: b #2\"\n",
        );

        let target = temp_dir.path().join("fresh").join("config.yaml");
        init_config(&config, &target, false).unwrap();

        let reloaded = Config::load(Some(target)).unwrap();
        assert_eq!(reloaded.identity.value, "a: b #2");
        assert_eq!(reloaded.database_path.value, config.database_path.value);
        assert_eq!(reloaded.base_url.value, config.base_url.value);
    }

    #[test]
    fn test_init_refuses_existing_file_without_force() {
        let temp_dir = tempdir().unwrap();
        let (config, config_path) = load_from(
            temp_dir.path(),
            "database_path: data/store.db\nidentity: kept\n",
        );
        let before = std::fs::read_to_string(&config_path).unwrap();

        let err = init_config(&config, &config_path, false).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(std::fs::read_to_string(&config_path).unwrap(), before);

        init_config(&config, &config_path, true).unwrap();
        let reloaded = Config::load(Some(config_path)).unwrap();
        assert_eq!(reloaded.identity.value, "kept");
        assert_eq!(reloaded.sync_interval_secs.value, config.sync_interval_secs.value);
    }
}
