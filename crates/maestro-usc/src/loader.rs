//! Settings snapshots, session configuration and compiled program artifacts on disk.

use crate::config::SessionConfig;
use crate::types::{CompiledProgram, UscSettings};
use anyhow::Context;
use std::fs;
use std::path::Path;

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml" | "yaml")
    )
}

fn read(path: &Path, what: &str) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {what}: {}", path.display()))
}

pub fn load_session_config(path: impl AsRef<Path>) -> anyhow::Result<SessionConfig> {
    let path = path.as_ref();
    let raw = read(path, "session config")?;
    let cfg = if is_yaml(path) {
        serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))?
    } else {
        serde_json::from_str(&raw).with_context(|| format!("parsing json: {}", path.display()))?
    };
    Ok(cfg)
}

/// Load a settings snapshot (YAML for `.yml`/`.yaml`, JSON otherwise).
pub fn load_settings_file(path: impl AsRef<Path>) -> anyhow::Result<UscSettings> {
    let path = path.as_ref();
    let raw = read(path, "settings")?;
    let settings = if is_yaml(path) {
        serde_yaml::from_str(&raw)
            .with_context(|| format!("decoding settings: {}", path.display()))?
    } else {
        serde_json::from_str(&raw)
            .with_context(|| format!("decoding settings: {}", path.display()))?
    };
    Ok(settings)
}

pub fn save_settings_file(path: impl AsRef<Path>, settings: &UscSettings) -> anyhow::Result<()> {
    let path = path.as_ref();
    let text = if is_yaml(path) {
        serde_yaml::to_string(settings).context("encoding settings as yaml")?
    } else {
        serde_json::to_string_pretty(settings).context("encoding settings as json")?
    };
    fs::write(path, text).with_context(|| format!("writing settings: {}", path.display()))
}

/// Load a compiled program artifact (JSON).
pub fn load_program_file(path: impl AsRef<Path>) -> anyhow::Result<CompiledProgram> {
    let path = path.as_ref();
    let raw = read(path, "program")?;
    serde_json::from_str(&raw).with_context(|| format!("decoding program: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChannelMode, ChannelSetting, SubroutineCommand};

    fn scratch(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("maestro-usc-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn sample() -> UscSettings {
        let mut output = ChannelSetting {
            name: "led".into(),
            ..ChannelSetting::default()
        };
        output.mode = ChannelMode::Output;
        UscSettings {
            serial_device_number: 3,
            channels: vec![ChannelSetting::default(), output],
            ..UscSettings::default()
        }
    }

    #[test]
    fn settings_survive_yaml_and_json() -> anyhow::Result<()> {
        for name in ["settings.yaml", "settings.json"] {
            let path = scratch(name);
            save_settings_file(&path, &sample())?;
            assert_eq!(load_settings_file(&path)?, sample());
        }
        Ok(())
    }

    #[test]
    fn program_artifact_parses() -> anyhow::Result<()> {
        let path = scratch("program.json");
        fs::write(
            &path,
            r#"{"byte_code":[1,2,0],"subroutine_addresses":{"blink":2},
               "subroutine_commands":{"blink":{"opcode":128}},"checksum":77}"#,
        )?;
        let p = load_program_file(&path)?;
        assert_eq!(p.byte_code, vec![1, 2, 0]);
        assert_eq!(p.subroutine_commands["blink"], SubroutineCommand::Opcode(128));
        assert_eq!(p.checksum, 77);
        Ok(())
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_settings_file("/nonexistent/maestro.yaml").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/maestro.yaml"));
    }

    #[test]
    fn session_config_from_json() -> anyhow::Result<()> {
        let path = scratch("session.json");
        fs::write(&path, r#"{"timeout_ms": 1000}"#)?;
        let cfg = load_session_config(&path)?;
        assert_eq!(cfg.timeout_ms, 1000);
        assert_eq!(cfg.settle.script_upload_ms, 100);
        Ok(())
    }
}
