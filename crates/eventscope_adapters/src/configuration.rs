use std::path::PathBuf;

use config::{Config, Environment, File};
use directories::ProjectDirs;
use eventscope_core::config::Settings;

pub fn get_configuration_with_paths(
    current_dir_path: Option<PathBuf>,
    system_config_dir_path: Option<PathBuf>,
) -> Result<Settings, config::ConfigError> {
    let config_directory = current_dir_path.unwrap_or_else(|| {
        std::env::current_dir()
            .map(|p| p.join("config"))
            .unwrap_or_else(|_| PathBuf::from("config"))
    });

    let system_config_dir = if let Some(path) = system_config_dir_path {
        path
    } else {
        ProjectDirs::from("com", "eventscope", "eventscope")
            .map(|d| d.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("config"))
    };

    let defaults = Settings::default();

    let settings = Config::builder()
        // Upstream endpoint and login page
        .set_default("upstream.api_url", defaults.upstream.api_url)?
        .set_default("upstream.login_url", defaults.upstream.login_url)?
        .set_default("upstream.partition", defaults.upstream.partition)?
        .set_default("upstream.user_agent", defaults.upstream.user_agent)?
        .set_default("upstream.timeout_secs", defaults.upstream.timeout_secs as i64)?
        // Forwarder (target_url stays unset unless configured)
        .set_default("proxy.bind", defaults.proxy.bind)?
        .set_default("proxy.route", defaults.proxy.route)?
        .set_default("log_level", defaults.log_level)?
        .add_source(File::from(system_config_dir.join("config.toml")).required(false))
        .add_source(File::from(config_directory.join("config.toml")).required(false))
        .add_source(Environment::with_prefix("EVENTSCOPE").separator("__"))
        .build()?;

    settings.try_deserialize::<Settings>()
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    get_configuration_with_paths(None, None)
}
