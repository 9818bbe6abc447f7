//! Kernel event type identities.
//!
//! A [`Ktype`] is the provider GUID of the kernel event plus one opcode byte.
//! The 16 GUID bytes are laid out exactly like the platform packs the
//! `Data1`/`Data2`/`Data3`/`Data4` fields, big-endian, so a type decoded from
//! a tracing buffer compares byte-for-byte with the named constants below.
//!
//! Two families of names live here:
//!
//! - wire types, emitted by the kernel providers (the master table),
//! - composite types (`ACCEPT`, `SEND`, ...) that are never emitted and only
//!   group the per-protocol network wire types under a single logical name.

use std::{
    borrow::Cow,
    collections::HashMap,
    fmt::{self, Display},
};

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display as StrumDisplay, EnumIter, EnumString};
pub use uuid::Uuid;

/// Identifies a kernel event type: 16 bytes of provider GUID + 1 opcode byte.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(from = "RawKtype", into = "RawKtype")]
pub struct Ktype([u8; 17]);

/// Wire representation of a [`Ktype`] as produced by the event decoder.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawKtype {
    provider: Uuid,
    opcode: u8,
}

impl From<RawKtype> for Ktype {
    fn from(raw: RawKtype) -> Self {
        Ktype::pack(raw.provider, raw.opcode)
    }
}

impl From<Ktype> for RawKtype {
    fn from(ktype: Ktype) -> Self {
        RawKtype {
            provider: ktype.provider(),
            opcode: ktype.opcode(),
        }
    }
}

/// Kernel event categories.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    StrumDisplay,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Category {
    Process,
    Thread,
    File,
    Registry,
    Image,
    Net,
    Handle,
    Unknown,
}

/// Static metadata describing a named kernel event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KtypeInfo {
    pub name: &'static str,
    pub category: Category,
    pub description: &'static str,
}

const fn info(name: &'static str, category: Category, description: &'static str) -> KtypeInfo {
    KtypeInfo {
        name,
        category,
        description,
    }
}

const PROCESS_PROVIDER: Uuid = Uuid::from_u128(0x3d6fa8d0_fe05_11d0_9dda_00c04fd7ba7c);
const THREAD_PROVIDER: Uuid = Uuid::from_u128(0x3d6fa8d1_fe05_11d0_9dda_00c04fd7ba7c);
const FILEIO_PROVIDER: Uuid = Uuid::from_u128(0x90cbdc39_4a3e_11d1_84f4_0000f80464e3);
const REGISTRY_PROVIDER: Uuid = Uuid::from_u128(0xae53722e_c863_11d2_8659_00c04fa321a1);
const IMAGE_PROVIDER: Uuid = Uuid::from_u128(0x2cb15d1d_5fc1_11d2_abe1_00a0c911f518);
const TCPIP_PROVIDER: Uuid = Uuid::from_u128(0x9a280ac0_c8e0_11d1_84e2_00c04fb998a2);
const UDPIP_PROVIDER: Uuid = Uuid::from_u128(0xbf3a50c5_a9c9_4988_a005_2dc0b7c80f80);
const HANDLE_PROVIDER: Uuid = Uuid::from_u128(0x89497f50_effe_4440_8cf2_ce6b1cdcaca7);
// artificial providers of the composite Send/Recv types
const SEND_PROVIDER: Uuid = Uuid::from_u128(0x9a280ac0_a9c9_11d1_84e2_00c04fb998a2);
const RECV_PROVIDER: Uuid = Uuid::from_u128(0xbf3a50c5_c8e0_4988_a005_2dc0b7c80f80);

pub const CREATE_PROCESS: Ktype = Ktype::pack(PROCESS_PROVIDER, 1);
pub const TERMINATE_PROCESS: Ktype = Ktype::pack(PROCESS_PROVIDER, 2);
pub const ENUM_PROCESS: Ktype = Ktype::pack(PROCESS_PROVIDER, 3);

pub const CREATE_THREAD: Ktype = Ktype::pack(THREAD_PROVIDER, 1);
pub const TERMINATE_THREAD: Ktype = Ktype::pack(THREAD_PROVIDER, 2);
pub const ENUM_THREAD: Ktype = Ktype::pack(THREAD_PROVIDER, 3);

pub const FILE_RUNDOWN: Ktype = Ktype::pack(FILEIO_PROVIDER, 36);
pub const CREATE_FILE: Ktype = Ktype::pack(FILEIO_PROVIDER, 64);
pub const RELEASE_FILE: Ktype = Ktype::pack(FILEIO_PROVIDER, 65);
pub const CLOSE_FILE: Ktype = Ktype::pack(FILEIO_PROVIDER, 66);
pub const READ_FILE: Ktype = Ktype::pack(FILEIO_PROVIDER, 67);
pub const WRITE_FILE: Ktype = Ktype::pack(FILEIO_PROVIDER, 68);
pub const SET_FILE_INFORMATION: Ktype = Ktype::pack(FILEIO_PROVIDER, 69);
pub const DELETE_FILE: Ktype = Ktype::pack(FILEIO_PROVIDER, 70);
pub const RENAME_FILE: Ktype = Ktype::pack(FILEIO_PROVIDER, 71);
pub const ENUM_DIRECTORY: Ktype = Ktype::pack(FILEIO_PROVIDER, 72);
pub const FILE_OP_END: Ktype = Ktype::pack(FILEIO_PROVIDER, 76);

pub const REG_CREATE_KEY: Ktype = Ktype::pack(REGISTRY_PROVIDER, 10);
pub const REG_OPEN_KEY: Ktype = Ktype::pack(REGISTRY_PROVIDER, 11);
pub const REG_DELETE_KEY: Ktype = Ktype::pack(REGISTRY_PROVIDER, 12);
pub const REG_QUERY_KEY: Ktype = Ktype::pack(REGISTRY_PROVIDER, 13);
pub const REG_SET_VALUE: Ktype = Ktype::pack(REGISTRY_PROVIDER, 14);
pub const REG_DELETE_VALUE: Ktype = Ktype::pack(REGISTRY_PROVIDER, 15);
pub const REG_QUERY_VALUE: Ktype = Ktype::pack(REGISTRY_PROVIDER, 16);
pub const REG_CREATE_KCB: Ktype = Ktype::pack(REGISTRY_PROVIDER, 22);
pub const REG_DELETE_KCB: Ktype = Ktype::pack(REGISTRY_PROVIDER, 23);
pub const REG_KCB_RUNDOWN: Ktype = Ktype::pack(REGISTRY_PROVIDER, 25);
/// Same operation as [`REG_OPEN_KEY`], emitted by older kernels under its own opcode.
pub const REG_OPEN_KEY_V1: Ktype = Ktype::pack(REGISTRY_PROVIDER, 27);

pub const UNLOAD_IMAGE: Ktype = Ktype::pack(IMAGE_PROVIDER, 2);
pub const ENUM_IMAGE: Ktype = Ktype::pack(IMAGE_PROVIDER, 3);
pub const LOAD_IMAGE: Ktype = Ktype::pack(IMAGE_PROVIDER, 10);

pub const SEND_TCPV4: Ktype = Ktype::pack(TCPIP_PROVIDER, 10);
pub const RECV_TCPV4: Ktype = Ktype::pack(TCPIP_PROVIDER, 11);
pub const CONNECT_TCPV4: Ktype = Ktype::pack(TCPIP_PROVIDER, 12);
pub const DISCONNECT_TCPV4: Ktype = Ktype::pack(TCPIP_PROVIDER, 13);
pub const RETRANSMIT_TCPV4: Ktype = Ktype::pack(TCPIP_PROVIDER, 14);
pub const ACCEPT_TCPV4: Ktype = Ktype::pack(TCPIP_PROVIDER, 15);
pub const RECONNECT_TCPV4: Ktype = Ktype::pack(TCPIP_PROVIDER, 16);
pub const SEND_TCPV6: Ktype = Ktype::pack(TCPIP_PROVIDER, 26);
pub const RECV_TCPV6: Ktype = Ktype::pack(TCPIP_PROVIDER, 27);
pub const CONNECT_TCPV6: Ktype = Ktype::pack(TCPIP_PROVIDER, 28);
pub const DISCONNECT_TCPV6: Ktype = Ktype::pack(TCPIP_PROVIDER, 29);
pub const RETRANSMIT_TCPV6: Ktype = Ktype::pack(TCPIP_PROVIDER, 30);
pub const ACCEPT_TCPV6: Ktype = Ktype::pack(TCPIP_PROVIDER, 31);
pub const RECONNECT_TCPV6: Ktype = Ktype::pack(TCPIP_PROVIDER, 32);

pub const SEND_UDPV4: Ktype = Ktype::pack(UDPIP_PROVIDER, 10);
pub const RECV_UDPV4: Ktype = Ktype::pack(UDPIP_PROVIDER, 11);
pub const SEND_UDPV6: Ktype = Ktype::pack(UDPIP_PROVIDER, 26);
pub const RECV_UDPV6: Ktype = Ktype::pack(UDPIP_PROVIDER, 27);

pub const CREATE_HANDLE: Ktype = Ktype::pack(HANDLE_PROVIDER, 32);
pub const CLOSE_HANDLE: Ktype = Ktype::pack(HANDLE_PROVIDER, 33);

// Composite types. They are never published by the providers.
pub const ACCEPT: Ktype = Ktype::pack(TCPIP_PROVIDER, 46);
pub const SEND: Ktype = Ktype::pack(SEND_PROVIDER, 72);
pub const RECV: Ktype = Ktype::pack(RECV_PROVIDER, 75);
pub const CONNECT: Ktype = Ktype::pack(TCPIP_PROVIDER, 40);
pub const RECONNECT: Ktype = Ktype::pack(TCPIP_PROVIDER, 47);
pub const DISCONNECT: Ktype = Ktype::pack(TCPIP_PROVIDER, 42);
pub const RETRANSMIT: Ktype = Ktype::pack(TCPIP_PROVIDER, 44);

/// Designates an unknown kernel event type.
pub const UNKNOWN: Ktype = Ktype::pack(Uuid::nil(), 0);

/// Events emitted once at session start to seed the state of the snapshotters.
const RUNDOWN: [Ktype; 8] = [
    ENUM_PROCESS,
    ENUM_THREAD,
    FILE_RUNDOWN,
    FILE_OP_END,
    RELEASE_FILE,
    ENUM_IMAGE,
    REG_CREATE_KCB,
    REG_KCB_RUNDOWN,
];

const COMPOSITES: [(Ktype, &[Ktype]); 7] = [
    (ACCEPT, &[ACCEPT_TCPV4, ACCEPT_TCPV6]),
    (SEND, &[SEND_TCPV4, SEND_TCPV6, SEND_UDPV4, SEND_UDPV6]),
    (RECV, &[RECV_TCPV4, RECV_TCPV6, RECV_UDPV4, RECV_UDPV6]),
    (CONNECT, &[CONNECT_TCPV4, CONNECT_TCPV6]),
    (RECONNECT, &[RECONNECT_TCPV4, RECONNECT_TCPV6]),
    (DISCONNECT, &[DISCONNECT_TCPV4, DISCONNECT_TCPV6]),
    (RETRANSMIT, &[RETRANSMIT_TCPV4, RETRANSMIT_TCPV6]),
];

use Category::*;

const WIRE_TYPES: &[(Ktype, KtypeInfo)] = &[
    (
        CREATE_PROCESS,
        info(
            "CreateProcess",
            Process,
            "Creates a new process and its primary thread",
        ),
    ),
    (
        TERMINATE_PROCESS,
        info(
            "TerminateProcess",
            Process,
            "Terminates the process and all of its threads",
        ),
    ),
    (
        ENUM_PROCESS,
        info(
            "EnumProcess",
            Process,
            "Enumerates processes running at the time the session starts",
        ),
    ),
    (
        CREATE_THREAD,
        info(
            "CreateThread",
            Thread,
            "Creates a thread to execute within the virtual address space of the calling process",
        ),
    ),
    (
        TERMINATE_THREAD,
        info(
            "TerminateThread",
            Thread,
            "Terminates a thread within the process",
        ),
    ),
    (
        ENUM_THREAD,
        info(
            "EnumThread",
            Thread,
            "Enumerates threads running at the time the session starts",
        ),
    ),
    (
        FILE_RUNDOWN,
        info(
            "FileRundown",
            File,
            "Enumerates files open at the time the session starts",
        ),
    ),
    (
        CREATE_FILE,
        info("CreateFile", File, "Creates or opens a file or I/O device"),
    ),
    (
        RELEASE_FILE,
        info(
            "ReleaseFile",
            File,
            "Releases the last handle of the file object",
        ),
    ),
    (
        CLOSE_FILE,
        info("CloseFile", File, "Closes the file object"),
    ),
    (
        READ_FILE,
        info("ReadFile", File, "Reads data from the file or I/O device"),
    ),
    (
        WRITE_FILE,
        info("WriteFile", File, "Writes data to the file or I/O device"),
    ),
    (
        SET_FILE_INFORMATION,
        info("SetFileInformation", File, "Sets the file information"),
    ),
    (
        DELETE_FILE,
        info("DeleteFile", File, "Removes the file from the file system"),
    ),
    (
        RENAME_FILE,
        info("RenameFile", File, "Changes the file name"),
    ),
    (
        ENUM_DIRECTORY,
        info(
            "EnumDirectory",
            File,
            "Enumerates a directory or dispatches a directory change notification",
        ),
    ),
    (
        FILE_OP_END,
        info(
            "FileOpEnd",
            File,
            "Signals the finalization of the file operation",
        ),
    ),
    (
        REG_CREATE_KEY,
        info(
            "RegCreateKey",
            Registry,
            "Creates a registry key or opens it if the key already exists",
        ),
    ),
    (
        REG_OPEN_KEY,
        info("RegOpenKey", Registry, "Opens the registry key"),
    ),
    (
        REG_OPEN_KEY_V1,
        info("RegOpenKey", Registry, "Opens the registry key"),
    ),
    (
        REG_DELETE_KEY,
        info("RegDeleteKey", Registry, "Removes the registry key"),
    ),
    (
        REG_QUERY_KEY,
        info(
            "RegQueryKey",
            Registry,
            "Enumerates subkeys of the parent key",
        ),
    ),
    (
        REG_SET_VALUE,
        info(
            "RegSetValue",
            Registry,
            "Sets the value of the registry key",
        ),
    ),
    (
        REG_DELETE_VALUE,
        info("RegDeleteValue", Registry, "Removes the registry value"),
    ),
    (
        REG_QUERY_VALUE,
        info(
            "RegQueryValue",
            Registry,
            "Reads the value of the registry key",
        ),
    ),
    (
        REG_CREATE_KCB,
        info(
            "RegCreateKCB",
            Registry,
            "Creates the key control block for an open registry key",
        ),
    ),
    (
        REG_DELETE_KCB,
        info(
            "RegDeleteKCB",
            Registry,
            "Disposes the key control block of a closed registry key",
        ),
    ),
    (
        REG_KCB_RUNDOWN,
        info(
            "RegKCBRundown",
            Registry,
            "Enumerates registry keys open at the time the session starts",
        ),
    ),
    (
        LOAD_IMAGE,
        info(
            "LoadImage",
            Image,
            "Loads the module into the address space of the calling process",
        ),
    ),
    (
        UNLOAD_IMAGE,
        info(
            "UnloadImage",
            Image,
            "Unloads the module from the address space of the calling process",
        ),
    ),
    (
        ENUM_IMAGE,
        info(
            "EnumImage",
            Image,
            "Enumerates modules loaded at the time the session starts",
        ),
    ),
    (
        ACCEPT_TCPV4,
        info(
            "AcceptTCPv4",
            Net,
            "Accepts a TCP v4 connection request from the socket queue",
        ),
    ),
    (
        ACCEPT_TCPV6,
        info(
            "AcceptTCPv6",
            Net,
            "Accepts a TCP v6 connection request from the socket queue",
        ),
    ),
    (
        SEND_TCPV4,
        info("SendTCPv4", Net, "Sends data over a TCP v4 socket"),
    ),
    (
        SEND_TCPV6,
        info("SendTCPv6", Net, "Sends data over a TCP v6 socket"),
    ),
    (
        SEND_UDPV4,
        info("SendUDPv4", Net, "Sends a datagram over a UDP v4 socket"),
    ),
    (
        SEND_UDPV6,
        info("SendUDPv6", Net, "Sends a datagram over a UDP v6 socket"),
    ),
    (
        RECV_TCPV4,
        info("RecvTCPv4", Net, "Receives data from a TCP v4 socket"),
    ),
    (
        RECV_TCPV6,
        info("RecvTCPv6", Net, "Receives data from a TCP v6 socket"),
    ),
    (
        RECV_UDPV4,
        info("RecvUDPv4", Net, "Receives a datagram from a UDP v4 socket"),
    ),
    (
        RECV_UDPV6,
        info("RecvUDPv6", Net, "Receives a datagram from a UDP v6 socket"),
    ),
    (
        CONNECT_TCPV4,
        info("ConnectTCPv4", Net, "Connects to a TCP v4 endpoint"),
    ),
    (
        CONNECT_TCPV6,
        info("ConnectTCPv6", Net, "Connects to a TCP v6 endpoint"),
    ),
    (
        RECONNECT_TCPV4,
        info("ReconnectTCPv4", Net, "Reconnects to a TCP v4 endpoint"),
    ),
    (
        RECONNECT_TCPV6,
        info("ReconnectTCPv6", Net, "Reconnects to a TCP v6 endpoint"),
    ),
    (
        DISCONNECT_TCPV4,
        info("DisconnectTCPv4", Net, "Terminates a TCP v4 connection"),
    ),
    (
        DISCONNECT_TCPV6,
        info("DisconnectTCPv6", Net, "Terminates a TCP v6 connection"),
    ),
    (
        RETRANSMIT_TCPV4,
        info("RetransmitTCPv4", Net, "Retransmits a TCP v4 segment"),
    ),
    (
        RETRANSMIT_TCPV6,
        info("RetransmitTCPv6", Net, "Retransmits a TCP v6 segment"),
    ),
    (
        CREATE_HANDLE,
        info(
            "CreateHandle",
            Handle,
            "Creates a handle to a kernel object",
        ),
    ),
    (
        CLOSE_HANDLE,
        info(
            "CloseHandle",
            Handle,
            "Closes the handle to a kernel object",
        ),
    ),
];

const COMPOSITE_TYPES: &[(Ktype, KtypeInfo)] = &[
    (
        ACCEPT,
        info(
            "Accept",
            Net,
            "Accepts the connection request from the socket queue",
        ),
    ),
    (SEND, info("Send", Net, "Sends data over the wire")),
    (RECV, info("Recv", Net, "Receives data from the socket")),
    (
        CONNECT,
        info(
            "Connect",
            Net,
            "Connects establishes a connection to the socket",
        ),
    ),
    (
        RECONNECT,
        info("Reconnect", Net, "Reconnects to the socket"),
    ),
    (
        DISCONNECT,
        info("Disconnect", Net, "Terminates data reception on the socket"),
    ),
    (
        RETRANSMIT,
        info("Retransmit", Net, "Retransmits unacknowledged TCP segments"),
    ),
];

lazy_static! {
    /// Master table of the wire types.
    static ref KTYPES: HashMap<Ktype, KtypeInfo> = WIRE_TYPES.iter().copied().collect();
    static ref COMPOSITE_KTYPES: HashMap<Ktype, KtypeInfo> =
        COMPOSITE_TYPES.iter().copied().collect();
    /// Reverse lookup. When two identities share a name the first one wins.
    static ref KTYPES_BY_NAME: HashMap<&'static str, Ktype> = {
        let mut names = HashMap::new();
        for (ktype, info) in WIRE_TYPES.iter().chain(COMPOSITE_TYPES) {
            names.entry(info.name).or_insert(*ktype);
        }
        names
    };
}

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1 hash.
fn fnv1(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(FNV_OFFSET_BASIS, |h, b| h.wrapping_mul(FNV_PRIME) ^ u32::from(*b))
}

impl Ktype {
    /// Packs the provider GUID and the opcode into a kernel event type.
    pub const fn pack(provider: Uuid, opcode: u8) -> Ktype {
        let guid = provider.as_bytes();
        let mut bytes = [0u8; 17];
        let mut i = 0;
        while i < 16 {
            bytes[i] = guid[i];
            i += 1;
        }
        bytes[16] = opcode;
        Ktype(bytes)
    }

    /// Packs the GUID from the `Data1`..`Data4` fields the way the platform lays them out.
    pub const fn from_guid_fields(
        data1: u32,
        data2: u16,
        data3: u16,
        data4: [u8; 8],
        opcode: u8,
    ) -> Ktype {
        Ktype::pack(Uuid::from_fields(data1, data2, data3, &data4), opcode)
    }

    pub fn provider(&self) -> Uuid {
        let mut guid = [0u8; 16];
        guid.copy_from_slice(&self.0[..16]);
        Uuid::from_bytes(guid)
    }

    pub fn opcode(&self) -> u8 {
        self.0[16]
    }

    pub fn as_bytes(&self) -> &[u8; 17] {
        &self.0
    }

    /// Returns the metadata of wire and composite types.
    pub fn info(&self) -> Option<&'static KtypeInfo> {
        KTYPES.get(self).or_else(|| COMPOSITE_KTYPES.get(self))
    }

    /// Returns the canonical name of the kernel event type. Unknown types are
    /// represented by their raw bytes.
    pub fn name(&self) -> Cow<'static, str> {
        match self.info() {
            Some(info) => Cow::Borrowed(info.name),
            None => Cow::Owned(String::from_utf8_lossy(&self.0).into_owned()),
        }
    }

    /// Hashes the canonical name of the kernel event type.
    pub fn name_hash(&self) -> u32 {
        fnv1(self.name().as_bytes())
    }

    pub fn category(&self) -> Category {
        self.info()
            .map(|info| info.category)
            .unwrap_or(Category::Unknown)
    }

    pub fn description(&self) -> &'static str {
        self.info().map(|info| info.description).unwrap_or_default()
    }

    /// Determines whether the kernel event type is known to the registry.
    pub fn exists(&self) -> bool {
        KTYPES.contains_key(self)
    }

    /// Determines whether the events responsible for building the internal state
    /// are dropped before they hit the output. They are only retained when
    /// writing a capture, so replaying it can rebuild the snapshotters.
    pub fn is_output_dropped(&self, capture: bool) -> bool {
        self.is_rundown() && !capture
    }

    pub fn is_rundown(&self) -> bool {
        RUNDOWN.contains(self)
    }

    pub fn is_composite(&self) -> bool {
        COMPOSITE_KTYPES.contains_key(self)
    }

    /// Returns the composite type grouping this per-protocol network type.
    pub fn composite(&self) -> Option<Ktype> {
        COMPOSITES
            .iter()
            .find(|(_, variants)| variants.contains(self))
            .map(|(composite, _)| *composite)
    }

    /// Looks up the kernel event type by its canonical name.
    pub fn from_name(name: &str) -> Option<Ktype> {
        KTYPES_BY_NAME.get(name).copied()
    }
}

/// Iterates over the master table of wire types.
pub fn all() -> impl Iterator<Item = (Ktype, &'static KtypeInfo)> {
    WIRE_TYPES.iter().map(|(ktype, info)| (*ktype, info))
}

/// Iterates over the composite types.
pub fn composites() -> impl Iterator<Item = (Ktype, &'static KtypeInfo)> {
    COMPOSITE_TYPES.iter().map(|(ktype, info)| (*ktype, info))
}

impl Default for Ktype {
    fn default() -> Self {
        UNKNOWN
    }
}

impl Display for Ktype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl fmt::Debug for Ktype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.info() {
            Some(info) => write!(f, "{}", info.name),
            None => write!(f, "{{{}}}/{}", self.provider(), self.opcode()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn named() -> impl Iterator<Item = Ktype> {
        all().chain(composites()).map(|(ktype, _)| ktype)
    }

    #[test]
    fn named_types_are_unique() {
        let mut seen = HashSet::new();
        for ktype in named() {
            assert!(seen.insert(*ktype.as_bytes()), "{ktype:?} collides");
        }
        assert!(!seen.contains(UNKNOWN.as_bytes()));
    }

    #[test]
    fn pack_layout() {
        let ktype = Ktype::from_guid_fields(
            0x3d6fa8d0,
            0xfe05,
            0x11d0,
            [0x9d, 0xda, 0x00, 0xc0, 0x4f, 0xd7, 0xba, 0x7c],
            1,
        );
        assert_eq!(ktype, CREATE_PROCESS);
        assert_eq!(
            ktype.as_bytes(),
            &[
                0x3d, 0x6f, 0xa8, 0xd0, 0xfe, 0x05, 0x11, 0xd0, 0x9d, 0xda, 0x00, 0xc0, 0x4f, 0xd7,
                0xba, 0x7c, 0x01
            ]
        );
        assert_eq!(ktype.opcode(), 1);
        assert_eq!(
            ktype.provider().to_string(),
            "3d6fa8d0-fe05-11d0-9dda-00c04fd7ba7c"
        );
    }

    #[test]
    fn names() {
        assert_eq!(CREATE_PROCESS.name(), "CreateProcess");
        assert_eq!(REG_SET_VALUE.name(), "RegSetValue");
        assert_eq!(REG_OPEN_KEY_V1.name(), "RegOpenKey");
        assert_eq!(SEND.name(), "Send");
        assert_eq!(SEND_UDPV6.name(), "SendUDPv6");
        assert_eq!(CREATE_HANDLE.to_string(), "CreateHandle");
        for ktype in named() {
            assert!(!ktype.name().is_empty());
        }
    }

    #[test]
    fn unknown_types_are_named_by_raw_bytes() {
        assert_eq!(UNKNOWN.name(), "\0".repeat(17));
        let garbage = Ktype::pack(Uuid::from_u128(u128::MAX), 0xff);
        assert!(!garbage.name().is_empty());
        assert!(garbage.info().is_none());
        assert_eq!(garbage.category(), Category::Unknown);
    }

    #[test]
    fn name_hash_is_fnv1_of_the_name() {
        assert_eq!(CREATE_PROCESS.name_hash(), 0xdf5b_f77c);
        assert_eq!(SEND.name_hash(), 0x926b_34e3);
        assert_eq!(REG_OPEN_KEY.name_hash(), 0x35b6_25f2);
        assert_eq!(REG_OPEN_KEY_V1.name_hash(), REG_OPEN_KEY.name_hash());
    }

    #[test]
    fn existence() {
        for (ktype, _) in all() {
            assert!(ktype.exists(), "{ktype:?} should exist");
        }
        for ktype in RUNDOWN {
            assert!(ktype.exists());
        }
        for (_, variants) in COMPOSITES {
            assert!(variants.iter().all(Ktype::exists));
        }
        assert!(!UNKNOWN.exists());
        assert!(!Ktype::pack(Uuid::from_u128(0x1234_5678), 99).exists());
        assert!(!Ktype::pack(TCPIP_PROVIDER, 200).exists());
    }

    #[test]
    fn rundown_events_are_only_kept_in_captures() {
        for ktype in RUNDOWN {
            assert!(ktype.is_output_dropped(false));
            assert!(!ktype.is_output_dropped(true));
        }
        for ktype in [CREATE_PROCESS, CREATE_FILE, SEND, SEND_TCPV4, UNKNOWN] {
            assert!(!ktype.is_output_dropped(false));
            assert!(!ktype.is_output_dropped(true));
        }
    }

    #[test]
    fn composite_families() {
        assert_eq!(ACCEPT_TCPV6.composite(), Some(ACCEPT));
        assert_eq!(RECV_UDPV4.composite(), Some(RECV));
        assert_eq!(SEND_UDPV6.composite(), Some(SEND));
        assert_eq!(CREATE_FILE.composite(), None);
        assert!(DISCONNECT.is_composite());
        assert!(!DISCONNECT_TCPV4.is_composite());
    }

    #[test]
    fn reverse_lookup() {
        assert_eq!(Ktype::from_name("CreateFile"), Some(CREATE_FILE));
        assert_eq!(Ktype::from_name("RegOpenKey"), Some(REG_OPEN_KEY));
        assert_eq!(Ktype::from_name("Retransmit"), Some(RETRANSMIT));
        assert_eq!(Ktype::from_name("Nope"), None);
    }

    #[test]
    fn categories() {
        assert_eq!(ENUM_THREAD.category(), Category::Thread);
        assert_eq!(REG_KCB_RUNDOWN.category(), Category::Registry);
        assert_eq!(CONNECT.category(), Category::Net);
        assert_eq!(Category::Handle.to_string(), "handle");
        assert_eq!("image".parse::<Category>(), Ok(Category::Image));
    }

    #[test]
    fn serde_uses_provider_and_opcode() {
        let json = serde_json::to_value(LOAD_IMAGE).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"provider": "2cb15d1d-5fc1-11d2-abe1-00a0c911f518", "opcode": 10})
        );
        let ktype: Ktype = serde_json::from_value(json).unwrap();
        assert_eq!(ktype, LOAD_IMAGE);
    }
}
