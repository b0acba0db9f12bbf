//! First-boot user-data for preview instances.
//!
//! The script installs and starts a container runtime, lets the remote user
//! drive it, schedules a daily prune of images unused for 96 hours, creates the
//! application directory and finally writes the readiness marker. Steps are
//! chained with `&&` so the marker only appears when every earlier step
//! succeeded.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use shell_escape::unix::escape;

use crate::readiness::DEFAULT_READY_MARKER;

/// Default remote working root.
pub const DEFAULT_SCRIPT_DIR: &str = "/etc/prbranch";

/// Default remote application directory.
pub const DEFAULT_APP_DIR: &str = "/etc/prbranch/app";

/// Default package installation for the stock Ubuntu images.
pub const DEFAULT_INSTALL_COMMAND: &str = "apt-get update -y && apt-get install -y docker.io";

const PRUNE_CRON_PATH: &str = "/etc/cron.daily/docker-prune";
const PRUNE_UNUSED_FOR_HOURS: u32 = 96;

/// Parameters of the bootstrap script.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootstrapScript {
    /// Command that installs the container runtime.
    pub install_command: String,
    /// User added to the runtime's group and owning the working root.
    pub remote_user: String,
    /// Working root that receives the startup script.
    pub script_dir: String,
    /// Directory receiving the artifact.
    pub app_dir: String,
    /// Marker written last.
    pub ready_marker: String,
}

impl BootstrapScript {
    /// Script with default paths for `remote_user`.
    #[must_use]
    pub fn for_user(remote_user: impl Into<String>) -> Self {
        Self {
            install_command: DEFAULT_INSTALL_COMMAND.to_owned(),
            remote_user: remote_user.into(),
            script_dir: DEFAULT_SCRIPT_DIR.to_owned(),
            app_dir: DEFAULT_APP_DIR.to_owned(),
            ready_marker: DEFAULT_READY_MARKER.to_owned(),
        }
    }

    /// Renders the script text.
    #[must_use]
    pub fn render(&self) -> String {
        let user = escape(self.remote_user.as_str().into());
        let script_dir = escape(self.script_dir.as_str().into());
        let app_dir = escape(self.app_dir.as_str().into());
        let marker = escape(self.ready_marker.as_str().into());
        let prune = format!(
            "docker image prune -a --filter \"until={PRUNE_UNUSED_FOR_HOURS}h\" --force"
        );
        let cron = escape(prune.into());

        let steps = [
            self.install_command.clone(),
            format!("usermod -aG docker {user}"),
            String::from("service docker start"),
            format!(
                "printf '#!/bin/sh\\n%s\\n' {cron} > {PRUNE_CRON_PATH} && chmod a+x {PRUNE_CRON_PATH}"
            ),
            format!("mkdir -p {app_dir}"),
            format!("touch {marker}"),
            format!("chown -R {user}:{user} {script_dir}"),
        ];
        format!("#!/bin/bash\n{}\n", steps.join(" && "))
    }

    /// Renders the script and encodes it as base64 user-data.
    #[must_use]
    pub fn encode(&self) -> String {
        STANDARD.encode(self.render())
    }
}

/// Decodes base64 user-data back into script text.
///
/// # Errors
///
/// Returns a message when the payload is not valid base64 or not UTF-8.
pub fn decode_user_data(encoded: &str) -> Result<String, String> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|err| err.to_string())?;
    String::from_utf8(bytes).map_err(|err| err.to_string())
}
