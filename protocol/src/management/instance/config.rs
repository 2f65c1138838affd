use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleMode {
    /// 伪终端(pty), 输出以文本块形式推送
    PseudoConsole,

    /// 重定向标准输入/输出
    #[default]
    Redirect,

    /// 共享内存控制通道, 仅用于支持该协议的专用服务端
    SharedMemory,

    /// 独立窗口, 通过模拟按键输入, 不捕获输出
    Windowed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessPriority {
    Realtime,
    High,
    AboveNormal,
    #[default]
    Normal,
    BelowNormal,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopMethod {
    /// Type this line into the server console, then wait for the process to exit.
    Command(String),
    /// Terminate the process outright.
    Kill,
}

impl Default for StopMethod {
    fn default() -> Self {
        StopMethod::Command("quit".to_owned())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BasicConfig {
    pub name: String,
    pub directory: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AdvancedConfig {
    #[serde(default)]
    pub process_priority: ProcessPriority,
    /// Bit mask of allowed processors, 0 leaves the affinity untouched.
    #[serde(default)]
    pub processor_affinity: u64,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default)]
    pub restart_on_crash: bool,
    #[serde(default)]
    pub auto_update_and_restart: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BackupConfig {
    #[serde(default)]
    pub entries: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StartConfig {
    /// Relative to the install directory unless absolute.
    pub start_path: PathBuf,
    #[serde(default)]
    pub start_parameter: String,
    #[serde(default)]
    pub console_mode: ConsoleMode,
    #[serde(default)]
    pub stop: StopMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallerConfig {
    pub app_id: String,
    #[serde(default)]
    pub game: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Shared secret for one-time login codes, empty when the account has none.
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub beta_name: String,
    #[serde(default)]
    pub beta_password: String,
    #[serde(default = "default_true")]
    pub validate_on_install: bool,
    #[serde(default)]
    pub validate_on_update: bool,
    #[serde(default)]
    pub console_mode: ConsoleMode,
}

impl InstallerConfig {
    pub fn anonymous<S: Into<String>>(app_id: S) -> Self {
        Self {
            app_id: app_id.into(),
            game: String::new(),
            username: default_username(),
            password: String::new(),
            secret: String::new(),
            beta_name: String::new(),
            beta_password: String::new(),
            validate_on_install: true,
            validate_on_update: false,
            console_mode: ConsoleMode::default(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty() || self.username == "anonymous"
    }

    /// The beta branch this instance tracks, `None` for the default branch.
    pub fn branch(&self) -> Option<&str> {
        let name = self.beta_name.trim();
        (!name.is_empty()).then_some(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtocolConfig {
    #[serde(default = "default_ip_address")]
    pub ip_address: String,
    pub query_port: u16,
}

impl ProtocolConfig {
    pub fn new(query_port: u16) -> Self {
        Self {
            ip_address: default_ip_address(),
            query_port,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ModConfig {
    #[serde(default)]
    pub local_version: String,
    /// Overrides the mod's default install path inside the game folder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceConfig {
    guid: Uuid,
    class_name: String,

    #[serde(default)]
    pub local_version: String,
    pub basic: BasicConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    pub start: StartConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installer: Option<InstallerConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<ProtocolConfig>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mods: BTreeMap<String, ModConfig>,
}

impl InstanceConfig {
    pub fn new<S: Into<String>>(
        guid: Uuid,
        class_name: S,
        basic: BasicConfig,
        start: StartConfig,
    ) -> Self {
        Self {
            guid,
            class_name: class_name.into(),
            local_version: String::new(),
            basic,
            advanced: AdvancedConfig::default(),
            backup: BackupConfig::default(),
            start,
            installer: None,
            protocol: None,
            mods: BTreeMap::new(),
        }
    }

    pub fn guid(&self) -> Uuid {
        self.guid
    }

    /// Discriminator naming the game variant that owns this config.
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn is_installed(&self) -> bool {
        !self.local_version.is_empty()
    }

    pub fn mod_version(&self, name: &str) -> Option<&str> {
        self.mods
            .get(name)
            .map(|m| m.local_version.as_str())
            .filter(|v| !v.is_empty())
    }
}

fn default_username() -> String {
    "anonymous".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_ip_address() -> String {
    "127.0.0.1".to_owned()
}
