use std::net::Ipv4Addr;

use kmon_core::{
    Kevent, Kparam, Ktype, kparams,
    ktypes::{
        ACCEPT_TCPV6, CONNECT_TCPV6, DISCONNECT_TCPV6, RECONNECT_TCPV6, RECV_TCPV6, RECV_UDPV4,
        RECV_UDPV6, RETRANSMIT_TCPV6, SEND_TCPV6, SEND_UDPV4, SEND_UDPV6,
    },
};

use crate::{Intercept, Intercepted, fail, proceed};

const V6_TYPES: [Ktype; 9] = [
    ACCEPT_TCPV6,
    SEND_TCPV6,
    RECV_TCPV6,
    CONNECT_TCPV6,
    RECONNECT_TCPV6,
    DISCONNECT_TCPV6,
    RETRANSMIT_TCPV6,
    SEND_UDPV6,
    RECV_UDPV6,
];

/// Classifies the per-protocol network events.
#[derive(Debug, Default)]
pub struct NetInterceptor;

impl NetInterceptor {
    pub fn new() -> Self {
        Self
    }
}

/// Renders an IPv4 address the kernel reported as an integer in network
/// byte order.
fn ipv4(addr: u32) -> Ipv4Addr {
    Ipv4Addr::from(addr.to_le_bytes())
}

impl Intercept for NetInterceptor {
    fn name(&self) -> &'static str {
        "net"
    }

    fn intercept(&self, kevt: &mut Kevent) -> Intercepted {
        let ktype = kevt.ktype();
        let Some(composite) = ktype.composite() else {
            return proceed();
        };
        let udp = matches!(ktype, SEND_UDPV4 | RECV_UDPV4 | SEND_UDPV6 | RECV_UDPV6);
        let v6 = V6_TYPES.contains(&ktype);

        kevt.kparams
            .insert(kparams::L4_PROTO, if udp { "UDP" } else { "TCP" });
        kevt.kparams
            .insert(kparams::IP_VERSION, if v6 { "IPv6" } else { "IPv4" });
        kevt.kparams
            .insert(kparams::NET_OP, composite.name().into_owned());

        if !v6 {
            for param in [kparams::SIP, kparams::DIP] {
                if !matches!(kevt.kparams.get(param), Some(Kparam::Uint(_))) {
                    continue;
                }
                match kevt.kparams.get_u32(param) {
                    Ok(addr) => {
                        kevt.kparams.insert(param, ipv4(addr).to_string());
                    }
                    Err(err) => return fail(err),
                }
            }
        }
        proceed()
    }
}
