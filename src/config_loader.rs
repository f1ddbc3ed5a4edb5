/// Configuration loading for the arm driver.
///
/// Single source of truth: arm_driver.yaml, keyed by hostname with an
/// optional "default" block, so one checkout can drive several arm stations.
/// Protocol timings (settle delay, backoff, poll intervals) are fixed by the
/// firmware's behavior and deliberately not configurable here.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use gethostname::gethostname;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BAUD: u32 = 9600;
pub const DEFAULT_OPS_FILE: &str = "operations.txt";
pub const DEFAULT_STEP_DELAY_US: u16 = 3000;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArmSettings {
    /// Serial port path, e.g. /dev/ttyUSB0 or COM6. None means the operator
    /// picks a port at runtime.
    pub port: Option<String>,
    #[serde(default = "default_baud")]
    pub baud: u32,
    /// Append-only operations file.
    #[serde(default = "default_ops_file")]
    pub ops_file: String,
    /// Initial stepper delay sent to the firmware (microseconds).
    #[serde(default = "default_step_delay_us")]
    pub step_delay_us: u16,
}

fn default_baud() -> u32 {
    DEFAULT_BAUD
}

fn default_ops_file() -> String {
    DEFAULT_OPS_FILE.to_string()
}

fn default_step_delay_us() -> u16 {
    DEFAULT_STEP_DELAY_US
}

impl Default for ArmSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud: DEFAULT_BAUD,
            ops_file: DEFAULT_OPS_FILE.to_string(),
            step_delay_us: DEFAULT_STEP_DELAY_US,
        }
    }
}

/// Load settings for the current hostname from a YAML mapping of
/// hostname -> settings, falling back to the "default" block.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<ArmSettings> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file {:?}", path))?;
    let hosts: BTreeMap<String, ArmSettings> = serde_yaml::from_str(&text)
        .with_context(|| format!("invalid settings file {:?}", path))?;

    let hostname = gethostname().to_string_lossy().to_string();
    hosts
        .get(&hostname)
        .or_else(|| hosts.get("default"))
        .cloned()
        .ok_or_else(|| {
            anyhow!(
                "no settings for host '{}' and no 'default' block in {:?}",
                hostname,
                path
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_yaml(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("armdriver_{}_{}.yaml", name, std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_default_block_fallback() {
        let path = temp_yaml(
            "cfg_default",
            "default:\n  port: /dev/ttyUSB0\n  baud: 115200\n",
        );
        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(settings.baud, 115200);
        assert_eq!(settings.ops_file, DEFAULT_OPS_FILE);
        assert_eq!(settings.step_delay_us, DEFAULT_STEP_DELAY_US);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_hostname_block_wins_over_default() {
        let hostname = gethostname().to_string_lossy().to_string();
        let path = temp_yaml(
            "cfg_host",
            &format!(
                "default:\n  baud: 9600\n{}:\n  baud: 57600\n  ops_file: arm_ops.txt\n",
                hostname
            ),
        );
        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.baud, 57600);
        assert_eq!(settings.ops_file, "arm_ops.txt");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_settings("/nonexistent/arm_driver.yaml").is_err());
    }
}
