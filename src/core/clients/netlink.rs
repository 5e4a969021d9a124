// src/core/clients/netlink.rs

//! A raw `AF_NETLINK`/`NETLINK_ROUTE` client. Kept as hand-built byte
//! framing rather than a higher-level netlink crate, per the design notes:
//! attribute builders are small byte-returning helpers, and the kernel's
//! rtnetlink wire contract is documented inline at the point of use.
//!
//! Message layout (all fields host-byte-order on Linux, struct fields
//! aligned to 4 bytes, `NLA`/`rtattr` payloads padded to 4-byte boundaries):
//!
//! ```text
//! struct nlmsghdr {
//!     u32 nlmsg_len;    // length of message including header
//!     u16 nlmsg_type;   // e.g. RTM_GETLINK
//!     u16 nlmsg_flags;  // NLM_F_REQUEST | NLM_F_DUMP | ...
//!     u32 nlmsg_seq;
//!     u32 nlmsg_pid;
//! }
//! ```

use crate::core::DPlaneError;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::collections::HashMap;
use std::mem::size_of;
use std::net::Ipv4Addr;
use std::time::Duration;

// --- netlink / rtnetlink constants (linux/rtnetlink.h, linux/if_link.h) ---
const NETLINK_ROUTE: i32 = 0;

const NLMSG_ERROR: u16 = 2;
const NLMSG_DONE: u16 = 3;

const RTM_NEWLINK: u16 = 16;
const RTM_DELLINK: u16 = 17;
const RTM_GETLINK: u16 = 18;
const RTM_NEWADDR: u16 = 20;
const RTM_DELADDR: u16 = 21;
const RTM_GETADDR: u16 = 22;
const RTM_NEWROUTE: u16 = 24;

const NLM_F_REQUEST: u16 = 0x01;
const NLM_F_ACK: u16 = 0x04;
const NLM_F_DUMP: u16 = 0x100 | 0x200; // NLM_F_ROOT | NLM_F_MATCH
const NLM_F_CREATE: u16 = 0x400;
const NLM_F_EXCL: u16 = 0x200;
const NLM_F_REPLACE: u16 = 0x100;

const AF_INET: u8 = 2;
const AF_UNSPEC: u8 = 0;

const IFLA_ADDRESS: u16 = 1;
const IFLA_IFNAME: u16 = 3;
const IFLA_MASTER: u16 = 10;
const IFLA_LINKINFO: u16 = 18;
const IFLA_INFO_KIND: u16 = 1;
const IFLA_INFO_DATA: u16 = 2;
const IFLA_VLAN_ID: u16 = 1;
const IFLA_BOND_MODE: u16 = 1;

const IFA_ADDRESS: u16 = 1;
const IFA_LOCAL: u16 = 2;
const IFA_LABEL: u16 = 3;

const RTA_DST: u16 = 1;
const RTA_OIF: u16 = 4;
const RTA_GATEWAY: u16 = 5;

const IFF_UP: u32 = 0x1;

const RT_TABLE_MAIN: u8 = 254;
const RTPROT_STATIC: u8 = 4;
const RT_SCOPE_UNIVERSE: u8 = 0;
const RTN_UNICAST: u8 = 1;

/// A single link reported by the kernel.
#[derive(Debug, Clone)]
pub struct Link {
    pub index: i32,
    pub name: String,
    pub flags: u32,
    pub master: Option<i32>,
}

impl Link {
    pub fn is_up(&self) -> bool {
        self.flags & IFF_UP != 0
    }
}

/// A single address reported by the kernel.
#[derive(Debug, Clone)]
pub struct Address {
    pub index: i32,
    pub addr: Ipv4Addr,
    pub prefix_len: u8,
    pub label: Option<String>,
}

/// Bonding mode, mapped to the kernel's numeric bonding mode.
#[derive(Debug, Clone, Copy)]
pub enum BondMode {
    ActiveBackup,
    Lacp8023ad,
    BalanceRr,
}

impl BondMode {
    fn kernel_value(self) -> u8 {
        match self {
            BondMode::BalanceRr => 0,
            BondMode::ActiveBackup => 1,
            BondMode::Lacp8023ad => 4,
        }
    }
}

/// A raw `AF_NETLINK` client bound to `NETLINK_ROUTE`.
pub struct NetlinkClient {
    socket: Socket,
    seq: std::sync::atomic::AtomicU32,
}

impl NetlinkClient {
    pub fn connect() -> Result<Self, DPlaneError> {
        let socket = Socket::new(
            Domain::from(libc::AF_NETLINK),
            Type::RAW,
            Some(Protocol::from(NETLINK_ROUTE)),
        )
        .map_err(|e| DPlaneError::DependencyUnavailable(format!("netlink socket: {e}")))?;

        let addr = unsafe {
            let mut storage: libc::sockaddr_nl = std::mem::zeroed();
            storage.nl_family = libc::AF_NETLINK as u16;
            storage.nl_pid = 0; // let the kernel assign our port id
            storage.nl_groups = 0;
            SockAddr::new(
                std::mem::transmute_copy(&storage),
                size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        socket
            .bind(&addr)
            .map_err(|e| DPlaneError::DependencyUnavailable(format!("netlink bind: {e}")))?;
        socket
            .set_read_timeout(Some(Duration::from_secs(5)))
            .map_err(|e| DPlaneError::DependencyUnavailable(format!("netlink socket opts: {e}")))?;

        Ok(Self {
            socket,
            seq: std::sync::atomic::AtomicU32::new(1),
        })
    }

    fn next_seq(&self) -> u32 {
        self.seq
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    /// Sends `payload` (a complete message body after the `nlmsghdr`) and
    /// collects every reply datagram until `NLMSG_DONE`/a single-reply ack.
    fn request(
        &self,
        msg_type: u16,
        flags: u16,
        payload: &[u8],
    ) -> Result<Vec<Vec<u8>>, DPlaneError> {
        let seq = self.next_seq();
        let header = build_nlmsghdr(msg_type, flags | NLM_F_REQUEST, seq, payload.len());
        let mut msg = header;
        msg.extend_from_slice(payload);

        self.socket
            .send(&msg)
            .map_err(|e| DPlaneError::DependencyUnavailable(format!("netlink send: {e}")))?;

        let mut replies = Vec::new();
        let is_dump = flags & NLM_F_DUMP == NLM_F_DUMP;
        loop {
            let mut buf = vec![0u8; 64 * 1024];
            let n = {
                let spare = unsafe {
                    std::slice::from_raw_parts_mut(
                        buf.as_mut_ptr() as *mut std::mem::MaybeUninit<u8>,
                        buf.len(),
                    )
                };
                self.socket
                    .recv(spare)
                    .map_err(|e| DPlaneError::DependencyUnavailable(format!("netlink recv: {e}")))?
            };
            buf.truncate(n);

            let mut offset = 0;
            let mut done = false;
            while offset + size_of::<RawNlmsghdr>() <= buf.len() {
                let hdr = RawNlmsghdr::parse(&buf[offset..]);
                let msg_len = hdr.nlmsg_len as usize;
                if msg_len < size_of::<RawNlmsghdr>() || offset + msg_len > buf.len() {
                    break;
                }
                let body = &buf[offset + size_of::<RawNlmsghdr>()..offset + msg_len];

                match hdr.nlmsg_type {
                    NLMSG_ERROR => {
                        let errno = i32::from_ne_bytes(body[0..4].try_into().unwrap());
                        if errno != 0 {
                            return Err(DPlaneError::DependencyUnavailable(format!(
                                "netlink operation failed with errno {}",
                                -errno
                            )));
                        }
                        done = true;
                    }
                    NLMSG_DONE => {
                        done = true;
                    }
                    _ => {
                        replies.push(body.to_vec());
                    }
                }
                offset += align4(msg_len);
            }
            if done || !is_dump {
                break;
            }
        }
        Ok(replies)
    }

    /// `RTM_GETLINK` with `NLM_F_DUMP`: every interface known to the kernel.
    pub fn list_links(&self) -> Result<Vec<Link>, DPlaneError> {
        let ifi = build_ifinfomsg(AF_UNSPEC, 0, 0, 0);
        let bodies = self.request(RTM_GETLINK, NLM_F_DUMP, &ifi)?;
        Ok(bodies.iter().filter_map(|b| parse_link(b)).collect())
    }

    pub fn find_link(&self, name: &str) -> Result<Option<Link>, DPlaneError> {
        Ok(self.list_links()?.into_iter().find(|l| l.name == name))
    }

    /// Brings a link up or down (`ip link set <name> up|down`).
    pub fn set_link_updown(&self, index: i32, up: bool) -> Result<(), DPlaneError> {
        let flags = if up { IFF_UP } else { 0 };
        let ifi = build_ifinfomsg(AF_UNSPEC, index, flags, IFF_UP);
        self.request(RTM_NEWLINK, NLM_F_ACK, &ifi)?;
        Ok(())
    }

    /// Enslaves `index` under bond/bridge master `master_index`.
    pub fn set_master(&self, index: i32, master_index: i32) -> Result<(), DPlaneError> {
        let mut msg = build_ifinfomsg(AF_UNSPEC, index, 0, 0);
        msg.extend(attr_u32(IFLA_MASTER, master_index as u32));
        self.request(RTM_NEWLINK, NLM_F_ACK, &msg)?;
        Ok(())
    }

    /// Creates a bond device with the given mode.
    pub fn add_bond(&self, name: &str, mode: BondMode) -> Result<(), DPlaneError> {
        let mut data = Vec::new();
        data.extend(attr_u8(IFLA_BOND_MODE, mode.kernel_value()));

        let mut linkinfo = Vec::new();
        linkinfo.extend(attr_bytes(IFLA_INFO_KIND, b"bond\0"));
        linkinfo.extend(nested_attr(IFLA_INFO_DATA, &data));

        let mut msg = build_ifinfomsg(AF_UNSPEC, 0, 0, 0);
        msg.extend(attr_bytes(IFLA_IFNAME, format!("{name}\0").as_bytes()));
        msg.extend(nested_attr(IFLA_LINKINFO, &linkinfo));
        self.request(RTM_NEWLINK, NLM_F_CREATE | NLM_F_EXCL | NLM_F_ACK, &msg)?;
        Ok(())
    }

    /// Creates a VLAN device `name` on `parent_index` with 802.1Q tag `vlan_id`.
    pub fn add_vlan(&self, name: &str, parent_index: i32, vlan_id: u16) -> Result<(), DPlaneError> {
        let mut data = Vec::new();
        data.extend(attr_u16(IFLA_VLAN_ID, vlan_id));

        let mut linkinfo = Vec::new();
        linkinfo.extend(attr_bytes(IFLA_INFO_KIND, b"vlan\0"));
        linkinfo.extend(nested_attr(IFLA_INFO_DATA, &data));

        let mut msg = build_ifinfomsg(AF_UNSPEC, 0, 0, 0);
        msg.extend(attr_bytes(IFLA_IFNAME, format!("{name}\0").as_bytes()));
        msg.extend(attr_u32(IFLA_LINK_KEY, parent_index as u32));
        msg.extend(nested_attr(IFLA_LINKINFO, &linkinfo));
        self.request(RTM_NEWLINK, NLM_F_CREATE | NLM_F_EXCL | NLM_F_ACK, &msg)?;
        Ok(())
    }

    pub fn del_link(&self, index: i32) -> Result<(), DPlaneError> {
        let ifi = build_ifinfomsg(AF_UNSPEC, index, 0, 0);
        self.request(RTM_DELLINK, NLM_F_ACK, &ifi)?;
        Ok(())
    }

    /// `RTM_GETADDR` dump, filtered to IPv4.
    pub fn list_addresses(&self) -> Result<Vec<Address>, DPlaneError> {
        let ifa = build_ifaddrmsg(AF_INET, 0, 0, 0);
        let bodies = self.request(RTM_GETADDR, NLM_F_DUMP, &ifa)?;
        Ok(bodies.iter().filter_map(|b| parse_address(b)).collect())
    }

    /// Adds an IPv4 address. `replace` first deletes any existing IPv4
    /// addresses on the interface before adding the new one.
    pub fn add_address(
        &self,
        index: i32,
        addr: Ipv4Addr,
        prefix_len: u8,
        replace: bool,
    ) -> Result<(), DPlaneError> {
        if replace {
            for existing in self.list_addresses()?.into_iter().filter(|a| a.index == index) {
                self.del_address(index, existing.addr, existing.prefix_len)?;
            }
        }

        let mut msg = build_ifaddrmsg(AF_INET, prefix_len, 0, index);
        msg.extend(attr_bytes(IFA_LOCAL, &addr.octets()));
        msg.extend(attr_bytes(IFA_ADDRESS, &addr.octets()));
        self.request(RTM_NEWADDR, NLM_F_CREATE | NLM_F_ACK, &msg)?;
        Ok(())
    }

    pub fn del_address(&self, index: i32, addr: Ipv4Addr, prefix_len: u8) -> Result<(), DPlaneError> {
        let mut msg = build_ifaddrmsg(AF_INET, prefix_len, 0, index);
        msg.extend(attr_bytes(IFA_LOCAL, &addr.octets()));
        self.request(RTM_DELADDR, NLM_F_ACK, &msg)?;
        Ok(())
    }

    /// Replaces the default IPv4 route via `gateway` out `index`.
    pub fn replace_default_route(&self, gateway: Ipv4Addr, index: i32) -> Result<(), DPlaneError> {
        let mut msg = build_rtmsg(0);
        msg.extend(attr_bytes(RTA_GATEWAY, &gateway.octets()));
        msg.extend(attr_u32(RTA_OIF, index as u32));
        self.request(
            RTM_NEWROUTE,
            NLM_F_CREATE | NLM_F_REPLACE | NLM_F_ACK,
            &msg,
        )?;
        Ok(())
    }
}

// IFLA_LINK, i.e. the parent ifindex attribute for VLAN devices.
const IFLA_LINK_KEY: u16 = 5;

fn align4(len: usize) -> usize {
    (len + 3) & !3
}

fn build_nlmsghdr(msg_type: u16, flags: u16, seq: u32, payload_len: usize) -> Vec<u8> {
    let total_len = (size_of::<RawNlmsghdr>() + payload_len) as u32;
    let mut buf = Vec::with_capacity(size_of::<RawNlmsghdr>());
    buf.extend_from_slice(&total_len.to_ne_bytes());
    buf.extend_from_slice(&msg_type.to_ne_bytes());
    buf.extend_from_slice(&flags.to_ne_bytes());
    buf.extend_from_slice(&seq.to_ne_bytes());
    buf.extend_from_slice(&0u32.to_ne_bytes()); // nlmsg_pid, kernel ignores on request
    buf
}

struct RawNlmsghdr {
    nlmsg_len: u32,
    nlmsg_type: u16,
}

impl RawNlmsghdr {
    fn parse(buf: &[u8]) -> Self {
        Self {
            nlmsg_len: u32::from_ne_bytes(buf[0..4].try_into().unwrap()),
            nlmsg_type: u16::from_ne_bytes(buf[4..6].try_into().unwrap()),
        }
    }
}

/// `struct ifinfomsg { u8 family; u8 pad; u16 type; i32 index; u32 flags; u32 change; }`
fn build_ifinfomsg(family: u8, index: i32, flags: u32, change: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.push(family);
    buf.push(0);
    buf.extend_from_slice(&0u16.to_ne_bytes());
    buf.extend_from_slice(&index.to_ne_bytes());
    buf.extend_from_slice(&flags.to_ne_bytes());
    buf.extend_from_slice(&change.to_ne_bytes());
    buf
}

/// `struct ifaddrmsg { u8 family; u8 prefixlen; u8 flags; u8 scope; i32 index; }`
fn build_ifaddrmsg(family: u8, prefixlen: u8, flags: u8, index: i32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    buf.push(family);
    buf.push(prefixlen);
    buf.push(flags);
    buf.push(0); // scope
    buf.extend_from_slice(&index.to_ne_bytes());
    buf
}

/// `struct rtmsg { u8 family; u8 dst_len; u8 src_len; u8 tos; u8 table; u8 protocol; u8 scope; u8 type; u32 flags; }`
fn build_rtmsg(dst_len: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12);
    buf.push(AF_INET);
    buf.push(dst_len);
    buf.push(0);
    buf.push(0);
    buf.push(RT_TABLE_MAIN);
    buf.push(RTPROT_STATIC);
    buf.push(RT_SCOPE_UNIVERSE);
    buf.push(RTN_UNICAST);
    buf.extend_from_slice(&0u32.to_ne_bytes());
    buf
}

fn attr_header(attr_type: u16, payload_len: usize) -> Vec<u8> {
    let len = (4 + payload_len) as u16;
    let mut buf = Vec::with_capacity(4);
    buf.extend_from_slice(&len.to_ne_bytes());
    buf.extend_from_slice(&attr_type.to_ne_bytes());
    buf
}

fn attr_bytes(attr_type: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = attr_header(attr_type, payload.len());
    buf.extend_from_slice(payload);
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
    buf
}

fn attr_u8(attr_type: u16, value: u8) -> Vec<u8> {
    attr_bytes(attr_type, &[value])
}

fn attr_u16(attr_type: u16, value: u16) -> Vec<u8> {
    attr_bytes(attr_type, &value.to_ne_bytes())
}

fn attr_u32(attr_type: u16, value: u32) -> Vec<u8> {
    attr_bytes(attr_type, &value.to_ne_bytes())
}

/// A nested attribute (e.g. `IFLA_LINKINFO`) whose payload is itself a
/// sequence of TLV attributes.
fn nested_attr(attr_type: u16, nested_payload: &[u8]) -> Vec<u8> {
    attr_bytes(attr_type, nested_payload)
}

/// Walks a TLV attribute stream, returning type -> raw payload bytes.
fn parse_attrs(mut buf: &[u8]) -> HashMap<u16, Vec<u8>> {
    let mut out = HashMap::new();
    while buf.len() >= 4 {
        let len = u16::from_ne_bytes(buf[0..2].try_into().unwrap()) as usize;
        let attr_type = u16::from_ne_bytes(buf[2..4].try_into().unwrap());
        if len < 4 || len > buf.len() {
            break;
        }
        out.insert(attr_type, buf[4..len].to_vec());
        let padded = align4(len);
        if padded > buf.len() {
            break;
        }
        buf = &buf[padded..];
    }
    out
}

fn parse_link(body: &[u8]) -> Option<Link> {
    if body.len() < 16 {
        return None;
    }
    let index = i32::from_ne_bytes(body[4..8].try_into().ok()?);
    let flags = u32::from_ne_bytes(body[8..12].try_into().ok()?);
    let attrs = parse_attrs(&body[16..]);
    let name = attrs
        .get(&IFLA_IFNAME)
        .map(|b| cstr_to_string(b))
        .unwrap_or_default();
    let master = attrs
        .get(&IFLA_MASTER)
        .and_then(|b| b.get(0..4))
        .map(|b| i32::from_ne_bytes(b.try_into().unwrap()));
    Some(Link {
        index,
        name,
        flags,
        master,
    })
}

fn parse_address(body: &[u8]) -> Option<Address> {
    if body.len() < 8 {
        return None;
    }
    let family = body[0];
    if family != AF_INET {
        return None;
    }
    let prefix_len = body[1];
    let index = i32::from_ne_bytes(body[4..8].try_into().ok()?);
    let attrs = parse_attrs(&body[8..]);
    let raw = attrs.get(&IFA_LOCAL).or_else(|| attrs.get(&IFA_ADDRESS))?;
    if raw.len() < 4 {
        return None;
    }
    let addr = Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3]);
    let label = attrs.get(&IFA_LABEL).map(|b| cstr_to_string(b));
    Some(Address {
        index,
        addr,
        prefix_len,
        label,
    })
}

fn cstr_to_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_padding_rounds_up_to_four_bytes() {
        let a = attr_bytes(IFLA_IFNAME, b"eth0\0"); // 4 header + 5 payload = 9 -> 12
        assert_eq!(a.len(), 12);
    }

    #[test]
    fn roundtrip_parse_attrs() {
        let mut buf = Vec::new();
        buf.extend(attr_u32(IFLA_MASTER, 7));
        buf.extend(attr_bytes(IFLA_IFNAME, b"bond0\0"));
        let attrs = parse_attrs(&buf);
        assert_eq!(
            i32::from_ne_bytes(attrs[&IFLA_MASTER][0..4].try_into().unwrap()),
            7
        );
        assert_eq!(cstr_to_string(&attrs[&IFLA_IFNAME]), "bond0");
    }

    #[test]
    fn align4_rounds_correctly() {
        assert_eq!(align4(0), 0);
        assert_eq!(align4(1), 4);
        assert_eq!(align4(4), 4);
        assert_eq!(align4(5), 8);
    }
}
