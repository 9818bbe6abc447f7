use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer, ser::SerializeStruct};

use crate::{
    kparams::{Kparam, Kparams},
    ktypes::{Category, Ktype},
    ps::{Pid, ProcessInfo},
};

/// Kernel event as handed over by the decoder.
///
/// The kernel event type is fixed at decoding time; interceptors can only
/// enrich the parameters and the process context.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Kevent {
    pub seq: u64,
    pub pid: Pid,
    pub tid: u32,
    #[serde(default)]
    pub cpu: u8,
    #[serde(flatten)]
    ktype: Ktype,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub kparams: Kparams,
    /// Process context attached by the process interceptor.
    #[serde(default)]
    pub ps: Option<ProcessInfo>,
}

impl Kevent {
    pub fn new(seq: u64, pid: Pid, tid: u32, ktype: Ktype) -> Self {
        Self {
            seq,
            pid,
            tid,
            cpu: 0,
            ktype,
            timestamp: Utc::now(),
            kparams: Kparams::new(),
            ps: None,
        }
    }

    pub fn with_param(mut self, name: &str, value: impl Into<Kparam>) -> Self {
        self.kparams.insert(name, value);
        self
    }

    pub fn ktype(&self) -> Ktype {
        self.ktype
    }

    pub fn name(&self) -> String {
        self.ktype.name().into_owned()
    }

    pub fn category(&self) -> Category {
        self.ktype.category()
    }
}

impl Serialize for Kevent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Kevent", 11)?;
        state.serialize_field("seq", &self.seq)?;
        state.serialize_field("pid", &self.pid)?;
        state.serialize_field("tid", &self.tid)?;
        state.serialize_field("cpu", &self.cpu)?;
        state.serialize_field("name", &self.ktype.name())?;
        state.serialize_field("category", &self.ktype.category())?;
        state.serialize_field("provider", &self.ktype.provider())?;
        state.serialize_field("opcode", &self.ktype.opcode())?;
        state.serialize_field("timestamp", &self.timestamp)?;
        state.serialize_field("kparams", &self.kparams)?;
        state.serialize_field("ps", &self.ps)?;
        state.end()
    }
}

impl fmt::Display for Kevent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = self.timestamp.format("%Y-%m-%dT%TZ");
        let name = self.ktype.name();
        let process_info = match &self.ps {
            Some(ps) => format!("{} ({})", ps.name, self.pid),
            None => format!("<unknown> ({})", self.pid),
        };
        if f.alternate() {
            write!(
                f,
                "[{time} \x1b[1;30;46m{name}\x1b[0m {process_info}] {}",
                self.kparams
            )
        } else {
            write!(f, "[{time} {name} {process_info}] {}", self.kparams)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{kparams, ktypes};

    const CREATE_FILE_JSON: &str = r#"{
        "seq": 7,
        "pid": 4321,
        "tid": 4400,
        "cpu": 2,
        "provider": "90cbdc39-4a3e-11d1-84f4-0000f80464e3",
        "opcode": 64,
        "timestamp": "2024-03-01T10:00:00Z",
        "kparams": {"file_name": "\\Device\\HarddiskVolume2\\Windows\\notepad.exe", "file_object": 18446708889337462784}
    }"#;

    #[test]
    fn decode_json_line() {
        let kevent: Kevent = serde_json::from_str(CREATE_FILE_JSON).unwrap();
        assert_eq!(kevent.ktype(), ktypes::CREATE_FILE);
        assert_eq!(kevent.seq, 7);
        assert_eq!(kevent.cpu, 2);
        assert_eq!(kevent.name(), "CreateFile");
        assert_eq!(kevent.category(), Category::File);
        assert_eq!(
            kevent.kparams.get_u64(kparams::FILE_OBJECT),
            Ok(18446708889337462784)
        );
        assert!(kevent.ps.is_none());
    }

    #[test]
    fn encoded_kevent_decodes_back() {
        let kevent: Kevent = serde_json::from_str(CREATE_FILE_JSON).unwrap();
        let json = serde_json::to_value(&kevent).unwrap();
        assert_eq!(json["name"], "CreateFile");
        assert_eq!(json["category"], "file");

        let decoded: Kevent = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, kevent);
    }

    #[test]
    fn display() {
        let mut kevent = Kevent::new(1, 4, 8, ktypes::TERMINATE_PROCESS)
            .with_param(kparams::PID, 4u32)
            .with_param(kparams::EXE, "System");
        kevent.timestamp = "2024-03-01T10:00:00Z".parse().unwrap();
        assert_eq!(
            kevent.to_string(),
            "[2024-03-01T10:00:00Z TerminateProcess <unknown> (4)] exe=System, pid=4"
        );
    }
}
