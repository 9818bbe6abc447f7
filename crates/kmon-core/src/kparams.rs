//! Parameters carried by a kernel event.

use std::{
    collections::{BTreeMap, btree_map::Iter},
    fmt,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const PID: &str = "pid";
pub const PPID: &str = "ppid";
pub const PROCESS_NAME: &str = "process_name";
pub const EXE: &str = "exe";
pub const COMM: &str = "comm";
pub const SESSION_ID: &str = "session_id";
pub const SID: &str = "sid";
pub const TID: &str = "tid";

pub const FILE_OBJECT: &str = "file_object";
pub const FILE_NAME: &str = "file_name";
pub const FILE_OPTIONS: &str = "file_options";
pub const OPERATION: &str = "operation";

pub const KEY_HANDLE: &str = "key_handle";
pub const KEY_NAME: &str = "key_name";
pub const STATUS: &str = "status";

pub const IMAGE_BASE: &str = "base_address";
pub const IMAGE_SIZE: &str = "image_size";

pub const SIP: &str = "sip";
pub const DIP: &str = "dip";
pub const SPORT: &str = "sport";
pub const DPORT: &str = "dport";
pub const NET_SIZE: &str = "size";
pub const L4_PROTO: &str = "l4_proto";
pub const IP_VERSION: &str = "ip_version";
pub const NET_OP: &str = "net_op";

pub const HANDLE_ID: &str = "handle_id";
pub const HANDLE_OBJECT: &str = "handle_object";
pub const HANDLE_NAME: &str = "handle_name";
pub const TYPE_ID: &str = "type_id";
pub const TYPE_NAME: &str = "type_name";

pub const YARA_MATCHES: &str = "yara_matches";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KparamsError {
    #[error("kparam {0} not found")]
    NotFound(String),
    #[error("kparam {name} is {found}, expected {expected}")]
    Mismatch {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("kparam {name} value {value} overflows {target}")]
    Overflow {
        name: String,
        value: String,
        target: &'static str,
    },
}

/// Value of a single event parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Kparam {
    Uint(u64),
    Int(i64),
    Bool(bool),
    Str(String),
    List(Vec<String>),
}

impl Kparam {
    fn kind(&self) -> &'static str {
        match self {
            Kparam::Uint(_) => "uint",
            Kparam::Int(_) => "int",
            Kparam::Bool(_) => "bool",
            Kparam::Str(_) => "string",
            Kparam::List(_) => "list",
        }
    }
}

impl fmt::Display for Kparam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kparam::Uint(v) => write!(f, "{v}"),
            Kparam::Int(v) => write!(f, "{v}"),
            Kparam::Bool(v) => write!(f, "{v}"),
            Kparam::Str(v) => write!(f, "{v}"),
            Kparam::List(v) => write!(f, "[{}]", v.join(", ")),
        }
    }
}

impl From<u64> for Kparam {
    fn from(v: u64) -> Self {
        Kparam::Uint(v)
    }
}

impl From<u32> for Kparam {
    fn from(v: u32) -> Self {
        Kparam::Uint(v.into())
    }
}

impl From<u16> for Kparam {
    fn from(v: u16) -> Self {
        Kparam::Uint(v.into())
    }
}

impl From<i64> for Kparam {
    fn from(v: i64) -> Self {
        Kparam::Int(v)
    }
}

impl From<bool> for Kparam {
    fn from(v: bool) -> Self {
        Kparam::Bool(v)
    }
}

impl From<String> for Kparam {
    fn from(v: String) -> Self {
        Kparam::Str(v)
    }
}

impl From<&str> for Kparam {
    fn from(v: &str) -> Self {
        Kparam::Str(v.to_string())
    }
}

impl From<Vec<String>> for Kparam {
    fn from(v: Vec<String>) -> Self {
        Kparam::List(v)
    }
}

/// Ordered set of event parameters indexed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kparams(BTreeMap<String, Kparam>);

impl Kparams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter, replacing the previous value if present.
    pub fn insert(&mut self, name: &str, value: impl Into<Kparam>) -> Option<Kparam> {
        self.0.insert(name.to_string(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&Kparam> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Kparam> {
        self.0.remove(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, String, Kparam> {
        self.0.iter()
    }

    fn lookup(&self, name: &str) -> Result<&Kparam, KparamsError> {
        self.0
            .get(name)
            .ok_or_else(|| KparamsError::NotFound(name.to_string()))
    }

    pub fn get_u64(&self, name: &str) -> Result<u64, KparamsError> {
        match self.lookup(name)? {
            Kparam::Uint(v) => Ok(*v),
            Kparam::Int(v) => u64::try_from(*v).map_err(|_| KparamsError::Overflow {
                name: name.to_string(),
                value: v.to_string(),
                target: "u64",
            }),
            other => Err(mismatch(name, "uint", other)),
        }
    }

    pub fn get_u32(&self, name: &str) -> Result<u32, KparamsError> {
        let value = self.get_u64(name)?;
        u32::try_from(value).map_err(|_| KparamsError::Overflow {
            name: name.to_string(),
            value: value.to_string(),
            target: "u32",
        })
    }

    pub fn get_u16(&self, name: &str) -> Result<u16, KparamsError> {
        let value = self.get_u64(name)?;
        u16::try_from(value).map_err(|_| KparamsError::Overflow {
            name: name.to_string(),
            value: value.to_string(),
            target: "u16",
        })
    }

    pub fn get_i64(&self, name: &str) -> Result<i64, KparamsError> {
        match self.lookup(name)? {
            Kparam::Int(v) => Ok(*v),
            Kparam::Uint(v) => i64::try_from(*v).map_err(|_| KparamsError::Overflow {
                name: name.to_string(),
                value: v.to_string(),
                target: "i64",
            }),
            other => Err(mismatch(name, "int", other)),
        }
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, KparamsError> {
        match self.lookup(name)? {
            Kparam::Bool(v) => Ok(*v),
            other => Err(mismatch(name, "bool", other)),
        }
    }

    pub fn get_str(&self, name: &str) -> Result<&str, KparamsError> {
        match self.lookup(name)? {
            Kparam::Str(v) => Ok(v.as_str()),
            other => Err(mismatch(name, "string", other)),
        }
    }

    pub fn get_string(&self, name: &str) -> Result<String, KparamsError> {
        self.get_str(name).map(str::to_string)
    }

    pub fn get_list(&self, name: &str) -> Result<&[String], KparamsError> {
        match self.lookup(name)? {
            Kparam::List(v) => Ok(v.as_slice()),
            other => Err(mismatch(name, "list", other)),
        }
    }
}

impl<'a> IntoIterator for &'a Kparams {
    type Item = (&'a String, &'a Kparam);
    type IntoIter = Iter<'a, String, Kparam>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for Kparams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in &self.0 {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

fn mismatch(name: &str, expected: &'static str, found: &Kparam) -> KparamsError {
    KparamsError::Mismatch {
        name: name.to_string(),
        expected,
        found: found.kind(),
    }
}
