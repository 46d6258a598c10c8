use camino::{Utf8Path, Utf8PathBuf};
use dirs::home_dir;

pub const DEFAULT_DIRSYNC_HOME: &str = ".dirsyncd";
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

pub fn default_home_dir() -> Utf8PathBuf {
    if let Some(home) = home_dir() {
        let home = Utf8Path::from_path(&home).expect("invalid home directory");
        return home.join(DEFAULT_DIRSYNC_HOME);
    }

    Utf8PathBuf::default()
}

pub fn default_config_path() -> Utf8PathBuf {
    default_home_dir().join(DEFAULT_CONFIG_FILE)
}
