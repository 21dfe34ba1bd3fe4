//! Caller credentials resolved over the IPC bus (§4.3).

/// The result of resolving a peer's identity and confinement label.
///
/// `label` is `"unconfined"` when the OS confinement subsystem (AppArmor) is
/// disabled, matching `examples/original_source/src/service/credentialscache.cpp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub valid: bool,
    pub uid: u32,
    pub label: String,
}

impl Credentials {
    #[must_use]
    pub fn invalid() -> Self {
        Self {
            valid: false,
            uid: 0,
            label: String::new(),
        }
    }

    #[must_use]
    pub fn unconfined(uid: u32) -> Self {
        Self {
            valid: true,
            uid,
            label: "unconfined".to_string(),
        }
    }

    #[must_use]
    pub fn confined(uid: u32, label: String) -> Self {
        Self {
            valid: true,
            uid,
            label,
        }
    }
}
