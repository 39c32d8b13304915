use serde::Serialize;

/// Phase of the QR login challenge for one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QrPhase {
    #[default]
    NoQr,
    Issued,
    Expired,
    Authenticated,
}

/// Externally visible QR condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QrState {
    /// No payload was ever issued, or the last one expired.
    #[serde(rename = "Undefined")]
    Undefined,
    /// A payload is waiting to be scanned.
    #[serde(rename = "Present")]
    Present,
    /// Login consumed the QR.
    #[serde(rename = "Cleared (logged in)")]
    Cleared,
}

impl QrState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undefined => "Undefined",
            Self::Present => "Present",
            Self::Cleared => "Cleared (logged in)",
        }
    }
}

/// QR login state machine: `NoQr -> Issued -> (Authenticated | Expired -> Issued)`.
///
/// Payloads come from the protocol client; this type only tracks them.
/// `Authenticated` is terminal for the handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QrFlow {
    phase: QrPhase,
    payload: Option<String>,
    issued: u32,
}

impl QrFlow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a freshly issued payload. Returns `false` once authenticated.
    pub fn issue(&mut self, payload: String) -> bool {
        if self.phase == QrPhase::Authenticated {
            return false;
        }

        self.phase = QrPhase::Issued;
        self.payload = Some(payload);
        self.issued = self.issued.saturating_add(1);
        true
    }

    /// Drops the stale payload until the next one is issued.
    pub fn expire(&mut self) -> bool {
        if self.phase != QrPhase::Issued {
            return false;
        }

        self.phase = QrPhase::Expired;
        self.payload = None;
        true
    }

    pub fn authenticate(&mut self) {
        self.phase = QrPhase::Authenticated;
        self.payload = None;
    }

    pub fn phase(&self) -> QrPhase {
        self.phase
    }

    pub fn payload(&self) -> Option<&str> {
        self.payload.as_deref()
    }

    /// Number of payloads issued on this handle.
    pub fn issued(&self) -> u32 {
        self.issued
    }

    pub fn state(&self) -> QrState {
        match self.phase {
            QrPhase::NoQr | QrPhase::Expired => QrState::Undefined,
            QrPhase::Issued => QrState::Present,
            QrPhase::Authenticated => QrState::Cleared,
        }
    }
}
