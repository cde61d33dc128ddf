use crate::ota::bootloader::SystemControl;

/// Host restart: the process exits and the supervisor starts it again, which
/// runs the bootloader step and boot-time recovery.
pub struct ProcessControl;

impl SystemControl for ProcessControl {
    fn reboot(&self) {
        log::warn!("Restarting: exiting the agent process");
        log::logger().flush();
        std::process::exit(0);
    }
}
