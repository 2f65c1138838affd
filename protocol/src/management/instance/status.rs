use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    NotInstalled,
    Stopped,
    Started,
    Starting,
    Stopping,
    Restarting,
    Killing,
    Installing,
    Updating,
    Deleting,
    Backuping,
    Restoring,
    InstallingMod,
    UpdatingMod,
    DeletingMod,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Start,
    Stop,
    Restart,
    Kill,
    Install,
    Update,
    Delete,
    Backup,
    Restore,
    InstallMod,
    UpdateMod,
    DeleteMod,
}

impl InstanceStatus {
    pub const ALL: [InstanceStatus; 15] = [
        InstanceStatus::NotInstalled,
        InstanceStatus::Stopped,
        InstanceStatus::Started,
        InstanceStatus::Starting,
        InstanceStatus::Stopping,
        InstanceStatus::Restarting,
        InstanceStatus::Killing,
        InstanceStatus::Installing,
        InstanceStatus::Updating,
        InstanceStatus::Deleting,
        InstanceStatus::Backuping,
        InstanceStatus::Restoring,
        InstanceStatus::InstallingMod,
        InstanceStatus::UpdatingMod,
        InstanceStatus::DeletingMod,
    ];

    /// Stable statuses are the only ones an instance may rest in between operations.
    pub fn is_stable(&self) -> bool {
        matches!(
            self,
            InstanceStatus::NotInstalled | InstanceStatus::Stopped | InstanceStatus::Started
        )
    }

    /// True while some operation is in flight.
    pub fn is_busy(&self) -> bool {
        !self.is_stable()
    }

    /// Guard predicate: whether `operation` may begin from this status.
    pub fn permits(&self, operation: Operation) -> bool {
        use InstanceStatus::*;
        match operation {
            Operation::Start => *self == Stopped,
            Operation::Stop | Operation::Restart | Operation::Kill => *self == Started,
            Operation::Install => *self == NotInstalled,
            Operation::Update
            | Operation::Backup
            | Operation::Restore
            | Operation::InstallMod
            | Operation::UpdateMod
            | Operation::DeleteMod => *self == Stopped,
            Operation::Delete => matches!(self, NotInstalled | Stopped),
        }
    }
}

impl Operation {
    pub const ALL: [Operation; 12] = [
        Operation::Start,
        Operation::Stop,
        Operation::Restart,
        Operation::Kill,
        Operation::Install,
        Operation::Update,
        Operation::Delete,
        Operation::Backup,
        Operation::Restore,
        Operation::InstallMod,
        Operation::UpdateMod,
        Operation::DeleteMod,
    ];

    /// The transient status an instance shows while this operation runs.
    pub fn transient_status(&self) -> InstanceStatus {
        match self {
            Operation::Start => InstanceStatus::Starting,
            Operation::Stop => InstanceStatus::Stopping,
            Operation::Restart => InstanceStatus::Restarting,
            Operation::Kill => InstanceStatus::Killing,
            Operation::Install => InstanceStatus::Installing,
            Operation::Update => InstanceStatus::Updating,
            Operation::Delete => InstanceStatus::Deleting,
            Operation::Backup => InstanceStatus::Backuping,
            Operation::Restore => InstanceStatus::Restoring,
            Operation::InstallMod => InstanceStatus::InstallingMod,
            Operation::UpdateMod => InstanceStatus::UpdatingMod,
            Operation::DeleteMod => InstanceStatus::DeletingMod,
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            InstanceStatus::NotInstalled => "Not Installed",
            InstanceStatus::Stopped => "Stopped",
            InstanceStatus::Started => "Started",
            InstanceStatus::Starting => "Starting",
            InstanceStatus::Stopping => "Stopping",
            InstanceStatus::Restarting => "Restarting",
            InstanceStatus::Killing => "Killing",
            InstanceStatus::Installing => "Installing",
            InstanceStatus::Updating => "Updating",
            InstanceStatus::Deleting => "Deleting",
            InstanceStatus::Backuping => "Backuping",
            InstanceStatus::Restoring => "Restoring",
            InstanceStatus::InstallingMod => "Installing Mod",
            InstanceStatus::UpdatingMod => "Updating Mod",
            InstanceStatus::DeletingMod => "Deleting Mod",
        };
        f.write_str(text)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown operation: {0}")]
pub struct ParseOperationError(String);

impl FromStr for Operation {
    type Err = ParseOperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .into_iter()
            .find(|op| op.to_string().eq_ignore_ascii_case(s.replace(['_', '-'], "").as_str()))
            .ok_or_else(|| ParseOperationError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected(status: InstanceStatus, operation: Operation) -> bool {
        use InstanceStatus::*;
        let required: &[InstanceStatus] = match operation {
            Operation::Start => &[Stopped],
            Operation::Stop | Operation::Restart | Operation::Kill => &[Started],
            Operation::Install => &[NotInstalled],
            Operation::Delete => &[NotInstalled, Stopped],
            _ => &[Stopped],
        };
        required.contains(&status)
    }

    #[test]
    fn guard_matches_table_for_every_pair() {
        for status in InstanceStatus::ALL {
            for operation in Operation::ALL {
                assert_eq!(
                    status.permits(operation),
                    expected(status, operation),
                    "{status:?} / {operation:?}"
                );
            }
        }
    }

    #[test]
    fn transient_statuses_never_permit_anything() {
        for status in InstanceStatus::ALL.into_iter().filter(|s| s.is_busy()) {
            assert!(Operation::ALL.iter().all(|op| !status.permits(*op)));
        }
    }

    #[test]
    fn transient_status_is_busy() {
        for operation in Operation::ALL {
            assert!(operation.transient_status().is_busy());
        }
    }

    #[test]
    fn operation_from_str() {
        assert_eq!("start".parse::<Operation>(), Ok(Operation::Start));
        assert_eq!("install_mod".parse::<Operation>(), Ok(Operation::InstallMod));
        assert_eq!("Update-Mod".parse::<Operation>(), Ok(Operation::UpdateMod));
        assert!("explode".parse::<Operation>().is_err());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&InstanceStatus::InstallingMod).unwrap(),
            "\"installing_mod\""
        );
    }
}
