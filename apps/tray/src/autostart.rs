use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use aicap_sync::AutostartControl;

const ENTRY_NAME: &str = "aicap-tray.desktop";

/// Launch-at-login through an XDG autostart entry.
#[derive(Debug, Clone)]
pub struct XdgAutostart {
    dir: PathBuf,
    exec: PathBuf,
}

impl XdgAutostart {
    pub fn new(dir: impl Into<PathBuf>, exec: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            exec: exec.into(),
        }
    }

    /// `~/.config/autostart`, launching the running binary.
    pub fn for_current_exe() -> Self {
        let dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("autostart");
        let exec = env::current_exe().unwrap_or_else(|_| PathBuf::from("aicap-tray"));
        Self::new(dir, exec)
    }

    fn entry_path(&self) -> PathBuf {
        self.dir.join(ENTRY_NAME)
    }

    fn entry_contents(exec: &Path) -> String {
        format!(
            "[Desktop Entry]\n\
             Type=Application\n\
             Name=AICap\n\
             Comment=AI usage tray\n\
             Exec=\"{}\"\n\
             X-GNOME-Autostart-enabled=true\n",
            exec.display()
        )
    }
}

impl AutostartControl for XdgAutostart {
    fn is_enabled(&self) -> Result<bool, String> {
        Ok(self.entry_path().is_file())
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), String> {
        let path = self.entry_path();
        if enabled {
            fs::create_dir_all(&self.dir)
                .map_err(|err| format!("unable to create {}: {err}", self.dir.display()))?;
            fs::write(&path, Self::entry_contents(&self.exec))
                .map_err(|err| format!("unable to write {}: {err}", path.display()))?;
            info!(path = %path.display(), "autostart entry installed");
        } else if path.exists() {
            fs::remove_file(&path)
                .map_err(|err| format!("unable to remove {}: {err}", path.display()))?;
            info!(path = %path.display(), "autostart entry removed");
        } else {
            debug!("autostart already disabled");
        }
        Ok(())
    }
}
