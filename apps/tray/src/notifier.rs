use async_trait::async_trait;
use tracing::info;

use aicap_sync::DesktopNotifier;

/// Delivers usage notifications to the log and the terminal bell.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl DesktopNotifier for LogNotifier {
    fn permission_granted(&self) -> bool {
        true
    }

    async fn request_permission(&self) -> bool {
        true
    }

    fn notify(&self, title: &str, body: &str) -> Result<(), String> {
        info!(target: "aicap_tray::notification", title, body, "usage notification");
        eprint!("\x07");
        Ok(())
    }
}
