// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Model migration phases and status.

use std::fmt;
use std::str::FromStr;

/// A phase of a model migration, in lifecycle order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MigrationPhase {
    /// No migration is in progress.
    None,
    /// The model is being quiesced ahead of export.
    Quiesce,
    /// Pre-migration checks are running on both controllers.
    Precheck,
    /// The serialized model is being imported into the target.
    Import,
    /// The imported model is being validated on the target.
    Validation,
    /// The target has accepted the model.
    Success,
    /// Logs are being transferred to the target.
    LogTransfer,
    /// The source copy of the model is being removed.
    Reap,
    /// Removing the source copy failed; manual cleanup is required.
    ReapFailed,
    /// The migration is being rolled back.
    Abort,
    /// The rollback completed.
    AbortDone,
    /// The migration completed.
    Done,
}

impl MigrationPhase {
    /// The canonical wire spelling of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationPhase::None => "NONE",
            MigrationPhase::Quiesce => "QUIESCE",
            MigrationPhase::Precheck => "PRECHECK",
            MigrationPhase::Import => "IMPORT",
            MigrationPhase::Validation => "VALIDATION",
            MigrationPhase::Success => "SUCCESS",
            MigrationPhase::LogTransfer => "LOGTRANSFER",
            MigrationPhase::Reap => "REAP",
            MigrationPhase::ReapFailed => "REAPFAILED",
            MigrationPhase::Abort => "ABORT",
            MigrationPhase::AbortDone => "ABORTDONE",
            MigrationPhase::Done => "DONE",
        }
    }

    /// Reports whether the migration has reached a phase it cannot leave.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationPhase::ReapFailed | MigrationPhase::AbortDone | MigrationPhase::Done
        )
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error indicating a phase string this client does not recognize.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown migration phase {0:?}")]
pub struct UnknownPhase(pub String);

impl FromStr for MigrationPhase {
    type Err = UnknownPhase;

    fn from_str(s: &str) -> Result<MigrationPhase, UnknownPhase> {
        match s {
            "NONE" => Ok(MigrationPhase::None),
            "QUIESCE" => Ok(MigrationPhase::Quiesce),
            "PRECHECK" => Ok(MigrationPhase::Precheck),
            "IMPORT" => Ok(MigrationPhase::Import),
            "VALIDATION" => Ok(MigrationPhase::Validation),
            "SUCCESS" => Ok(MigrationPhase::Success),
            "LOGTRANSFER" => Ok(MigrationPhase::LogTransfer),
            "REAP" => Ok(MigrationPhase::Reap),
            "REAPFAILED" => Ok(MigrationPhase::ReapFailed),
            "ABORT" => Ok(MigrationPhase::Abort),
            "ABORTDONE" => Ok(MigrationPhase::AbortDone),
            "DONE" => Ok(MigrationPhase::Done),
            other => Err(UnknownPhase(other.into())),
        }
    }
}

/// The decoded status of a model migration, as delivered by a
/// [`MigrationStatusWatcher`](crate::watch::MigrationStatusWatcher).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationStatus {
    pub migration_id: String,
    pub attempt: i32,
    pub phase: MigrationPhase,
    pub source_api_addrs: Vec<String>,
    pub source_ca_cert: String,
    pub target_api_addrs: Vec<String>,
    pub target_ca_cert: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_round_trips() {
        for phase in [
            MigrationPhase::None,
            MigrationPhase::Quiesce,
            MigrationPhase::Precheck,
            MigrationPhase::Import,
            MigrationPhase::Validation,
            MigrationPhase::Success,
            MigrationPhase::LogTransfer,
            MigrationPhase::Reap,
            MigrationPhase::ReapFailed,
            MigrationPhase::Abort,
            MigrationPhase::AbortDone,
            MigrationPhase::Done,
        ] {
            assert_eq!(phase.as_str().parse::<MigrationPhase>(), Ok(phase));
        }
    }

    #[test]
    fn unknown_phase_is_an_error() {
        assert_eq!(
            "FLORP".parse::<MigrationPhase>(),
            Err(UnknownPhase("FLORP".into()))
        );
        // Parsing is case sensitive, matching the server's spelling.
        assert!("import".parse::<MigrationPhase>().is_err());
    }

    #[test]
    fn terminal_phases() {
        assert!(MigrationPhase::Done.is_terminal());
        assert!(MigrationPhase::ReapFailed.is_terminal());
        assert!(MigrationPhase::AbortDone.is_terminal());
        assert!(!MigrationPhase::Import.is_terminal());
        assert!(!MigrationPhase::Abort.is_terminal());
    }
}
