//! Device event definitions
//!
//! The telescope pushes one JSON object per line on its event socket. Only
//! the envelope (kind, lifecycle, route, error/code, timestamp) is typed;
//! every other field is carried opaquely.

use std::fmt;

use serde_json::{Map, Value};

// ─────────────────────────────────────────────────────────
// Event kinds
// ─────────────────────────────────────────────────────────

macro_rules! event_kinds {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Event kind tag.
        ///
        /// Firmware updates add kinds over time, so anything not listed here
        /// is kept as [`EventKind::Unknown`] instead of being rejected.
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum EventKind {
            $($variant,)+
            Unknown(String),
        }

        impl EventKind {
            /// Kinds this client has seen documented on real devices
            pub const KNOWN: &'static [&'static str] = &[$($name),+];

            pub fn from_name(name: &str) -> Self {
                match name {
                    $($name => EventKind::$variant,)+
                    other => EventKind::Unknown(other.to_string()),
                }
            }

            /// Wire name, also used as the state tree key
            pub fn as_str(&self) -> &str {
                match self {
                    $(EventKind::$variant => $name,)+
                    EventKind::Unknown(name) => name,
                }
            }
        }
    };
}

event_kinds! {
    ThreePointPolarAlign => "3PPA",
    AiProcess => "AIProcess",
    Alert => "Alert",
    Annotate => "Annotate",
    AutoFocus => "AutoFocus",
    AutoGoto => "AutoGoto",
    AutoGotoStep => "AutoGotoStep",
    BalanceSensor => "BalanceSensor",
    ContinuousExposure => "ContinuousExposure",
    DarkLibrary => "DarkLibrary",
    DiskSpace => "DiskSpace",
    Exposure => "Exposure",
    FocuserMove => "FocuserMove",
    GSensorMove => "GSensorMove",
    Initialise => "Initialise",
    MountMode => "MountMode",
    MoveByAngle => "MoveByAngle",
    PiStatus => "PiStatus",
    PlateSolve => "PlateSolve",
    SaveImage => "SaveImage",
    ScopeGoto => "ScopeGoto",
    ScopeHome => "ScopeHome",
    ScopeMoveToHorizon => "ScopeMoveToHorizon",
    ScopeTrack => "ScopeTrack",
    Stack => "Stack",
    View => "View",
    WheelMove => "WheelMove",
}

impl EventKind {
    pub fn is_known(&self) -> bool {
        !matches!(self, EventKind::Unknown(_))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────

/// Value of an event's `state` field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Start,
    Working,
    Complete,
    Cancel,
    Fail,
    /// Device-specific literals: "on", "off", "frame_complete", "moving", ...
    Other(String),
}

impl Lifecycle {
    pub fn parse(value: &str) -> Self {
        match value {
            "start" => Lifecycle::Start,
            "working" => Lifecycle::Working,
            "complete" => Lifecycle::Complete,
            "cancel" => Lifecycle::Cancel,
            "fail" => Lifecycle::Fail,
            other => Lifecycle::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Lifecycle::Start => "start",
            Lifecycle::Working => "working",
            Lifecycle::Complete => "complete",
            Lifecycle::Cancel => "cancel",
            Lifecycle::Fail => "fail",
            Lifecycle::Other(s) => s,
        }
    }

    /// start/working
    pub fn is_active(&self) -> bool {
        matches!(self, Lifecycle::Start | Lifecycle::Working)
    }

    /// complete/cancel/fail
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Lifecycle::Complete | Lifecycle::Cancel | Lifecycle::Fail
        )
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────
// Envelope
// ─────────────────────────────────────────────────────────

/// One parsed event line
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub kind: EventKind,
    /// Seconds since device boot
    pub timestamp: Option<f64>,
    pub state: Option<Lifecycle>,
    /// Ancestor kinds from the root down to (excluding) this kind
    pub route: Vec<String>,
    pub error: Option<String>,
    pub code: Option<i64>,
    /// Every field except the kind tag and `route`, as received
    pub fields: Map<String, Value>,
}

impl EventEnvelope {
    /// Minimal envelope, mostly useful for building fixtures
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            timestamp: None,
            state: None,
            route: Vec::new(),
            error: None,
            code: None,
            fields: Map::new(),
        }
    }

    pub fn with_route<I, S>(mut self, route: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.route = route.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_state(mut self, state: Lifecycle) -> Self {
        self.fields
            .insert("state".to_string(), Value::String(state.as_str().to_string()));
        self.state = Some(state);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn is_root_level(&self) -> bool {
        self.route.is_empty()
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some() || matches!(self.state, Some(Lifecycle::Fail))
    }

    /// One-line description for logs
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for step in &self.route {
            out.push_str(step);
            out.push('/');
        }
        out.push_str(self.kind.as_str());
        if let Some(state) = &self.state {
            out.push_str(&format!(" [{}]", state));
        }
        if let Some(error) = &self.error {
            out.push_str(&format!(" error: {}", error));
        }
        out
    }
}

// ─────────────────────────────────────────────────────────
// Command replies and the DeviceMessage wrapper
// ─────────────────────────────────────────────────────────

/// JSON-RPC reply to one of our requests
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    pub id: Option<Value>,
    pub method: Option<String>,
    pub result: Option<Value>,
    pub error: Option<Value>,
    pub code: Option<i64>,
}

impl CommandResponse {
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.code.unwrap_or(0) == 0
    }
}

/// Anything the device writes on a JSON line
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage {
    Event(EventEnvelope),
    Response(CommandResponse),
}
