/// Launch-at-login integration provided by the host platform.
pub trait AutostartControl: Send + Sync {
    fn is_enabled(&self) -> Result<bool, String>;

    fn set_enabled(&self, enabled: bool) -> Result<(), String>;
}

/// For hosts without a launch-at-login mechanism.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAutostart;

impl AutostartControl for NoAutostart {
    fn is_enabled(&self) -> Result<bool, String> {
        Ok(false)
    }

    fn set_enabled(&self, _enabled: bool) -> Result<(), String> {
        Err("autostart is not supported on this platform".to_string())
    }
}
