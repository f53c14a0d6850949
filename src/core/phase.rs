use std::fmt;

use serde::Serialize;

/// Stage of an import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum ImportPhase {
    #[default]
    FileSelection,
    Importing,
    PasswordInput,
    Complete,
    Cancelled,
}

impl ImportPhase {
    pub const ALL: [ImportPhase; 5] = [
        ImportPhase::FileSelection,
        ImportPhase::Importing,
        ImportPhase::PasswordInput,
        ImportPhase::Complete,
        ImportPhase::Cancelled,
    ];

    /// Whether `self -> to` is a legal transition. Self-transitions are always legal.
    pub fn can_transition_to(self, to: ImportPhase) -> bool {
        use ImportPhase::*;

        if self == to {
            return true;
        }

        matches!(
            (self, to),
            (FileSelection, Importing | Cancelled)
                | (Importing, PasswordInput | Complete | Cancelled)
                | (PasswordInput, Importing | Complete | Cancelled)
                | (Complete, FileSelection | Cancelled)
                | (Cancelled, FileSelection)
        )
    }

    /// A batch is in flight: the worker may still produce progress or requests.
    pub fn is_active(self) -> bool {
        matches!(self, ImportPhase::Importing | ImportPhase::PasswordInput)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileSelection => "file selection",
            Self::Importing => "importing",
            Self::PasswordInput => "password input",
            Self::Complete => "complete",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
