use color_eyre::eyre::bail;
use std::path::{Path, PathBuf};

pub const DEV_INCLUDE_FILE: &str = "../etc/serverdemon/include";
pub const SYSTEM_INCLUDE_FILE: &str = "/etc/serverdemon/include";
pub const INCLUDE_ENV_VAR: &str = "SERVERDEMON_INCLUDE";

#[derive(Debug, Clone)]
pub struct Paths {
    include_file: PathBuf,
}

impl Paths {
    /// Resolve the include file: an explicit path wins, then the development
    /// path if present, then the system path.
    pub fn new(explicit: Option<PathBuf>) -> color_eyre::Result<Self> {
        Self::resolve(explicit, Path::new(DEV_INCLUDE_FILE), Path::new(SYSTEM_INCLUDE_FILE))
    }

    fn resolve(explicit: Option<PathBuf>, dev: &Path, system: &Path) -> color_eyre::Result<Self> {
        let include_file = match explicit {
            Some(path) => path,
            None if dev.exists() => dev.to_path_buf(),
            None => system.to_path_buf(),
        };
        if !include_file.is_file() {
            bail!("cannot find include file: {}", include_file.display());
        }
        Ok(Self { include_file })
    }

    pub fn include_file(&self) -> &Path {
        &self.include_file
    }
}
