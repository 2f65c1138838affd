use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::management::comm::{ProcessControl, ProcessStartInfo};
use crate::utils::fs as fs_utils;
use gsm_protocol::management::instance::{InstallerConfig, InstanceConfig};

lazy_static! {
    static ref BUILD_ID_PATTERN: Regex =
        Regex::new(r#""buildid"\s+"(\S*)""#).expect("Failed to compile BUILD_ID_PATTERN regex");
}

const STEAMCMD_ZIP_URL: &str = "https://steamcdn-a.akamaihd.net/client/installer/steamcmd.zip";

/// App id whose dedicated server needs the update step repeated before it sticks.
const HLDS_APP_ID: &str = "90";
const HLDS_UPDATE_PASSES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Success,
    /// The tool finished but the manifest reports a different build than requested.
    VersionMismatch(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallPhase {
    Install,
    Update,
}

/// Supplies one-time login codes for accounts protected by a shared secret.
#[async_trait]
pub trait GuardCodeProvider: Send + Sync {
    async fn code(&self, secret: &str) -> Result<String>;
}

pub struct SteamCmd {
    path: PathBuf,
    guard: Option<Arc<dyn GuardCodeProvider>>,
}

impl SteamCmd {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            guard: None,
        }
    }

    pub fn with_guard_provider(mut self, guard: Arc<dyn GuardCodeProvider>) -> Self {
        self.guard = Some(guard);
        self
    }

    pub async fn parameters(
        &self,
        config: &InstanceConfig,
        phase: InstallPhase,
    ) -> Result<Vec<String>> {
        let installer = installer_of(config)?;
        let mut args = vec![
            "+force_install_dir".to_owned(),
            config.basic.directory.to_string_lossy().into_owned(),
            "+login".to_owned(),
        ];

        if installer.is_anonymous() {
            args.push("anonymous".to_owned());
        } else {
            args.push(installer.username.clone());
            args.push(installer.password.clone());
            if !installer.secret.trim().is_empty() {
                match &self.guard {
                    Some(guard) => args.push(guard.code(&installer.secret).await?),
                    None => warn!(
                        "[{}] login secret configured but no code provider installed",
                        config.basic.name
                    ),
                }
            }
        }

        if installer.app_id == HLDS_APP_ID {
            args.extend([
                "+app_set_config".to_owned(),
                installer.app_id.clone(),
                "mod".to_owned(),
                installer.game.clone(),
            ]);
        }

        let validate = match phase {
            InstallPhase::Install => installer.validate_on_install,
            InstallPhase::Update => installer.validate_on_update,
        };
        let passes = if installer.app_id == HLDS_APP_ID {
            HLDS_UPDATE_PASSES
        } else {
            1
        };
        for _ in 0..passes {
            args.push("+app_update".to_owned());
            args.push(installer.app_id.clone());
            if let Some(branch) = installer.branch() {
                args.push("-beta".to_owned());
                args.push(branch.to_owned());
                if !installer.beta_password.trim().is_empty() {
                    args.push("-betapassword".to_owned());
                    args.push(installer.beta_password.clone());
                }
            }
            if validate {
                args.push("validate".to_owned());
            }
        }

        args.push("+quit".to_owned());
        Ok(args)
    }

    /// Runs the tool to completion and reconciles the installed build with `version`.
    pub async fn run(
        &self,
        process: &ProcessControl,
        config: &InstanceConfig,
        phase: InstallPhase,
        version: &str,
    ) -> Result<InstallOutcome> {
        let installer = installer_of(config)?;
        self.ensure_installed().await?;

        let working_dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let args = self.parameters(config, phase).await?;
        let info = ProcessStartInfo::new(&self.path, working_dir).args(args);

        process.start(installer.console_mode, info).await?;
        process.wait_for_exit(None).await;

        let code = process.exit_code().unwrap_or(-1);
        if code != 0 && code != 7 {
            bail!("SteamCMD error: exit code {}", code);
        }

        let build_id = Self::local_build_id(&config.basic.directory, &installer.app_id).await?;
        if build_id == version {
            Ok(InstallOutcome::Success)
        } else {
            Ok(InstallOutcome::VersionMismatch(build_id))
        }
    }

    /// Reads the installed build id from `steamapps/appmanifest_<app>.acf`.
    pub async fn local_build_id(directory: &Path, app_id: &str) -> Result<String> {
        let manifest = directory
            .join("steamapps")
            .join(format!("appmanifest_{}.acf", app_id));
        let content = tokio::fs::read_to_string(&manifest)
            .await
            .with_context(|| format!("could not read {}", manifest.display()))?;
        Self::parse_build_id(&content).ok_or_else(|| anyhow!("Could not find the local build id"))
    }

    pub fn parse_build_id(manifest: &str) -> Option<String> {
        BUILD_ID_PATTERN
            .captures(manifest)
            .map(|caps| caps[1].to_string())
    }

    async fn ensure_installed(&self) -> Result<()> {
        if tokio::fs::try_exists(&self.path).await? {
            return Ok(());
        }
        if !cfg!(windows) {
            bail!("SteamCMD not found at {}", self.path.display());
        }

        let directory = self
            .path
            .parent()
            .ok_or_else(|| anyhow!("invalid SteamCMD path: {}", self.path.display()))?;
        tokio::fs::create_dir_all(directory).await?;

        info!("downloading SteamCMD into {}", directory.display());
        let archive = reqwest::get(STEAMCMD_ZIP_URL)
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        fs_utils::extract_zip(archive.to_vec(), directory.to_path_buf()).await
    }
}

fn installer_of(config: &InstanceConfig) -> Result<&InstallerConfig> {
    config
        .installer
        .as_ref()
        .ok_or_else(|| anyhow!("{} has no installer settings", config.class_name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gsm_protocol::management::instance::{BasicConfig, ConsoleMode, StartConfig};
    use uuid::Uuid;

    fn config(app_id: &str, directory: &Path) -> InstanceConfig {
        let mut config = InstanceConfig::new(
            Uuid::new_v4(),
            "Test",
            BasicConfig {
                name: "test".into(),
                directory: directory.to_path_buf(),
            },
            StartConfig {
                start_path: "srcds".into(),
                start_parameter: String::new(),
                console_mode: ConsoleMode::Redirect,
                stop: Default::default(),
            },
        );
        let mut installer = InstallerConfig::anonymous(app_id);
        installer.game = "cstrike".into();
        config.installer = Some(installer);
        config
    }

    struct FixedCode;

    #[async_trait]
    impl GuardCodeProvider for FixedCode {
        async fn code(&self, secret: &str) -> Result<String> {
            assert_eq!(secret, "c2VjcmV0");
            Ok("7K2QX".to_owned())
        }
    }

    #[tokio::test]
    async fn anonymous_install_parameters() {
        let config = config("740", Path::new("/srv/csgo"));
        let args = SteamCmd::new("steamcmd")
            .parameters(&config, InstallPhase::Install)
            .await
            .unwrap();
        assert_eq!(
            args,
            vec![
                "+force_install_dir",
                "/srv/csgo",
                "+login",
                "anonymous",
                "+app_update",
                "740",
                "validate",
                "+quit"
            ]
        );
    }

    #[tokio::test]
    async fn update_skips_validate_unless_enabled() {
        let mut config = config("740", Path::new("/srv/csgo"));
        let steamcmd = SteamCmd::new("steamcmd");
        let args = steamcmd.parameters(&config, InstallPhase::Update).await.unwrap();
        assert!(!args.contains(&"validate".to_owned()));

        config.installer.as_mut().unwrap().validate_on_update = true;
        let args = steamcmd.parameters(&config, InstallPhase::Update).await.unwrap();
        assert!(args.contains(&"validate".to_owned()));
    }

    #[tokio::test]
    async fn account_login_with_code_and_beta() {
        let mut config = config("740", Path::new("/srv/csgo"));
        let installer = config.installer.as_mut().unwrap();
        installer.username = "player".into();
        installer.password = "hunter2".into();
        installer.secret = "c2VjcmV0".into();
        installer.beta_name = "1.38".into();
        installer.beta_password = "pw".into();
        installer.validate_on_install = false;

        let args = SteamCmd::new("steamcmd")
            .with_guard_provider(Arc::new(FixedCode))
            .parameters(&config, InstallPhase::Install)
            .await
            .unwrap();
        assert_eq!(
            args[2..],
            [
                "+login",
                "player",
                "hunter2",
                "7K2QX",
                "+app_update",
                "740",
                "-beta",
                "1.38",
                "-betapassword",
                "pw",
                "+quit"
            ]
        );
    }

    #[tokio::test]
    async fn anonymous_login_never_asks_for_code() {
        let mut config = config("740", Path::new("/srv/csgo"));
        config.installer.as_mut().unwrap().secret = "c2VjcmV0".into();
        let args = SteamCmd::new("steamcmd")
            .with_guard_provider(Arc::new(FixedCode))
            .parameters(&config, InstallPhase::Update)
            .await
            .unwrap();
        assert!(!args.contains(&"7K2QX".to_owned()));
    }

    #[tokio::test]
    async fn hlds_repeats_update_four_times() {
        let config = config("90", Path::new("/srv/hlds"));
        let args = SteamCmd::new("steamcmd")
            .parameters(&config, InstallPhase::Install)
            .await
            .unwrap();
        assert_eq!(
            args[4..8],
            ["+app_set_config", "90", "mod", "cstrike"]
        );
        assert_eq!(args.iter().filter(|a| *a == "+app_update").count(), 4);
        assert_eq!(args.iter().filter(|a| *a == "validate").count(), 4);
        assert_eq!(args.last().unwrap(), "+quit");
    }

    #[test]
    fn parses_build_id() {
        let manifest = "\"AppState\"\n{\n\t\"appid\"\t\t\"740\"\n\t\"buildid\"\t\t\"8410311\"\n}\n";
        assert_eq!(SteamCmd::parse_build_id(manifest).as_deref(), Some("8410311"));
        assert_eq!(SteamCmd::parse_build_id("\"AppState\" {}"), None);
    }

    #[tokio::test]
    async fn missing_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SteamCmd::local_build_id(dir.path(), "740").await.is_err());
    }

    #[cfg(unix)]
    fn fake_steamcmd(dir: &Path, build_id: &str, exit_code: i32) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("steamcmd.sh");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\nmkdir -p \"$2/steamapps\"\nprintf '\"AppState\"\\n{{\\n\\t\"buildid\"\\t\\t\"{}\"\\n}}\\n' > \"$2/steamapps/appmanifest_740.acf\"\nexit {}\n",
                build_id, exit_code
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_code_seven_is_success() {
        let tools = tempfile::tempdir().unwrap();
        let install = tempfile::tempdir().unwrap();
        let steamcmd = SteamCmd::new(fake_steamcmd(tools.path(), "100", 7));
        let outcome = steamcmd
            .run(
                &ProcessControl::new(),
                &config("740", install.path()),
                InstallPhase::Install,
                "100",
            )
            .await
            .unwrap();
        assert_eq!(outcome, InstallOutcome::Success);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn different_build_is_a_mismatch() {
        let tools = tempfile::tempdir().unwrap();
        let install = tempfile::tempdir().unwrap();
        let steamcmd = SteamCmd::new(fake_steamcmd(tools.path(), "101", 0));
        let outcome = steamcmd
            .run(
                &ProcessControl::new(),
                &config("740", install.path()),
                InstallPhase::Update,
                "100",
            )
            .await
            .unwrap();
        assert_eq!(outcome, InstallOutcome::VersionMismatch("101".into()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn other_exit_codes_fail() {
        let tools = tempfile::tempdir().unwrap();
        let install = tempfile::tempdir().unwrap();
        let steamcmd = SteamCmd::new(fake_steamcmd(tools.path(), "100", 8));
        let err = steamcmd
            .run(
                &ProcessControl::new(),
                &config("740", install.path()),
                InstallPhase::Install,
                "100",
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exit code 8"));
    }
}
