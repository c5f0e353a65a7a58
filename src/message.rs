//! DNS wire codec (RFC 1035)
//!
//! Implements just enough of the DNS protocol for a one-shot client:
//! - Build queries (random transaction id, RD set, FQDN question)
//! - Pack/unpack messages, honouring compression pointers on read
//! - EDNS(0) OPT handling including the Client Subnet rewrite

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{BufMut, BytesMut};
use data_encoding::HEXUPPER;
use ipnet::IpNet;

use crate::error::DnsError;

/// Largest message a 16-bit length prefix (TCP/DoT/DoQ framing) can carry.
pub const MAX_MESSAGE_SIZE: usize = 0xFFFF;

/// EDNS(0) UDP payload size advertised when an OPT record is synthesized.
pub const EDNS_UDP_SIZE: u16 = 1232;

/// EDNS(0) option code for Client Subnet (RFC 7871).
pub const EDNS_OPTION_SUBNET: u16 = 8;

/// DO bit in the OPT record TTL field.
const EDNS_DO: u32 = 0x8000;

const MAX_POINTER_HOPS: usize = 32;
const MAX_NAME_LEN: usize = 255;
const MAX_LABEL_LEN: usize = 63;

pub const TYPE_A: u16 = 1;
pub const TYPE_NS: u16 = 2;
pub const TYPE_CNAME: u16 = 5;
pub const TYPE_SOA: u16 = 6;
pub const TYPE_PTR: u16 = 12;
pub const TYPE_MX: u16 = 15;
pub const TYPE_TXT: u16 = 16;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_SRV: u16 = 33;
pub const TYPE_OPT: u16 = 41;

pub const CLASS_IN: u16 = 1;

/// Map a textual record type mnemonic to its IANA code.
///
/// Accepts the `TYPE123` form from RFC 3597 for anything not in the table.
pub fn type_from_str(text: &str) -> Result<u16, DnsError> {
    let code = match text.to_ascii_uppercase().as_str() {
        "A" => TYPE_A,
        "NS" => TYPE_NS,
        "CNAME" => TYPE_CNAME,
        "SOA" => TYPE_SOA,
        "PTR" => TYPE_PTR,
        "MX" => TYPE_MX,
        "TXT" => TYPE_TXT,
        "AAAA" => TYPE_AAAA,
        "SRV" => TYPE_SRV,
        "NAPTR" => 35,
        "DS" => 43,
        "RRSIG" => 46,
        "NSEC" => 47,
        "DNSKEY" => 48,
        "TLSA" => 52,
        "SVCB" => 64,
        "HTTPS" => 65,
        "CAA" => 257,
        "ANY" => 255,
        other => {
            if let Some(rest) = other.strip_prefix("TYPE") {
                rest.parse::<u16>()
                    .map_err(|_| DnsError::UnknownType(text.to_string()))?
            } else {
                return Err(DnsError::UnknownType(text.to_string()));
            }
        }
    };
    Ok(code)
}

pub fn type_to_str(code: u16) -> String {
    match code {
        TYPE_A => "A".into(),
        TYPE_NS => "NS".into(),
        TYPE_CNAME => "CNAME".into(),
        TYPE_SOA => "SOA".into(),
        TYPE_PTR => "PTR".into(),
        TYPE_MX => "MX".into(),
        TYPE_TXT => "TXT".into(),
        TYPE_AAAA => "AAAA".into(),
        TYPE_SRV => "SRV".into(),
        TYPE_OPT => "OPT".into(),
        35 => "NAPTR".into(),
        43 => "DS".into(),
        46 => "RRSIG".into(),
        47 => "NSEC".into(),
        48 => "DNSKEY".into(),
        52 => "TLSA".into(),
        64 => "SVCB".into(),
        65 => "HTTPS".into(),
        257 => "CAA".into(),
        255 => "ANY".into(),
        other => format!("TYPE{other}"),
    }
}

pub fn class_from_str(text: &str) -> Result<u16, DnsError> {
    let code = match text.to_ascii_uppercase().as_str() {
        "IN" => CLASS_IN,
        "CH" => 3,
        "HS" => 4,
        "NONE" => 254,
        "ANY" => 255,
        other => {
            if let Some(rest) = other.strip_prefix("CLASS") {
                rest.parse::<u16>()
                    .map_err(|_| DnsError::UnknownClass(text.to_string()))?
            } else {
                return Err(DnsError::UnknownClass(text.to_string()));
            }
        }
    };
    Ok(code)
}

pub fn class_to_str(code: u16) -> String {
    match code {
        CLASS_IN => "IN".into(),
        3 => "CH".into(),
        4 => "HS".into(),
        254 => "NONE".into(),
        255 => "ANY".into(),
        other => format!("CLASS{other}"),
    }
}

/// Append the trailing dot if the name is not already fully qualified.
pub fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    }
}

/// Message header: transaction id plus the full flag set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub id: u16,
    pub response: bool,
    pub opcode: u8,
    pub authoritative: bool,
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    pub zero: bool,
    pub authenticated_data: bool,
    pub checking_disabled: bool,
    pub rcode: u8,
}

impl Header {
    fn flags(&self) -> u16 {
        let mut flags = 0u16;
        if self.response {
            flags |= 0x8000;
        }
        flags |= ((self.opcode as u16) & 0x0F) << 11;
        if self.authoritative {
            flags |= 0x0400;
        }
        if self.truncated {
            flags |= 0x0200;
        }
        if self.recursion_desired {
            flags |= 0x0100;
        }
        if self.recursion_available {
            flags |= 0x0080;
        }
        if self.zero {
            flags |= 0x0040;
        }
        if self.authenticated_data {
            flags |= 0x0020;
        }
        if self.checking_disabled {
            flags |= 0x0010;
        }
        flags |= (self.rcode as u16) & 0x000F;
        flags
    }

    fn from_flags(id: u16, flags: u16) -> Self {
        Self {
            id,
            response: flags & 0x8000 != 0,
            opcode: ((flags >> 11) & 0x0F) as u8,
            authoritative: flags & 0x0400 != 0,
            truncated: flags & 0x0200 != 0,
            recursion_desired: flags & 0x0100 != 0,
            recursion_available: flags & 0x0080 != 0,
            zero: flags & 0x0040 != 0,
            authenticated_data: flags & 0x0020 != 0,
            checking_disabled: flags & 0x0010 != 0,
            rcode: (flags & 0x000F) as u8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
}

/// A raw EDNS(0) option: code plus opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdnsOption {
    pub code: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rdata {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Cname(String),
    Ns(String),
    Ptr(String),
    Mx {
        preference: u16,
        exchange: String,
    },
    Txt(Vec<Vec<u8>>),
    Soa {
        mname: String,
        rname: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    Opt(Vec<EdnsOption>),
    /// Anything else, kept as opaque RDATA bytes.
    Other(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    pub rtype: u16,
    pub rclass: u16,
    pub ttl: u32,
    pub rdata: Rdata,
}

impl Record {
    /// Transport-friendly rendering: plain address or target for the common
    /// lookup types, full presentation for everything else.
    pub fn result_text(&self) -> String {
        match &self.rdata {
            Rdata::A(ip) => ip.to_string(),
            Rdata::Aaaa(ip) => ip.to_string(),
            Rdata::Cname(target) => target.clone(),
            _ => self.presentation(),
        }
    }

    /// Canonical zone-file style presentation: `name ttl class type rdata`.
    pub fn presentation(&self) -> String {
        format!(
            "{}\t{}\t{}\t{}\t{}",
            self.name,
            self.ttl,
            class_to_str(self.rclass),
            type_to_str(self.rtype),
            self.rdata_text()
        )
    }

    fn rdata_text(&self) -> String {
        match &self.rdata {
            Rdata::A(ip) => ip.to_string(),
            Rdata::Aaaa(ip) => ip.to_string(),
            Rdata::Cname(t) | Rdata::Ns(t) | Rdata::Ptr(t) => t.clone(),
            Rdata::Mx {
                preference,
                exchange,
            } => format!("{preference} {exchange}"),
            Rdata::Txt(strings) => strings
                .iter()
                .map(|s| format!("\"{}\"", String::from_utf8_lossy(s)))
                .collect::<Vec<_>>()
                .join(" "),
            Rdata::Soa {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => format!("{mname} {rname} {serial} {refresh} {retry} {expire} {minimum}"),
            Rdata::Srv {
                priority,
                weight,
                port,
                target,
            } => format!("{priority} {weight} {port} {target}"),
            Rdata::Opt(_) => String::new(),
            // RFC 3597 unknown-type presentation
            Rdata::Other(bytes) => {
                format!("\\# {} {}", bytes.len(), HEXUPPER.encode(bytes))
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
}

impl Message {
    /// Build a query message: random transaction id, RD set, one question
    /// with the name in fully-qualified form and textual type/class mapped to
    /// their IANA codes.
    pub fn query(qname: &str, qtype: &str, qclass: &str) -> Result<Self, DnsError> {
        if qname.is_empty() {
            return Err(DnsError::Build("empty question name".into()));
        }
        let qtype = type_from_str(if qtype.is_empty() { "A" } else { qtype })?;
        let qclass = class_from_str(if qclass.is_empty() { "IN" } else { qclass })?;
        Ok(Self {
            header: Header {
                id: rand::random(),
                recursion_desired: true,
                ..Header::default()
            },
            questions: vec![Question {
                name: fqdn(qname),
                qtype,
                qclass,
            }],
            ..Self::default()
        })
    }

    /// Serialize to wire format. Names are written uncompressed.
    pub fn pack(&self) -> Result<Vec<u8>, DnsError> {
        let mut buf = BytesMut::with_capacity(512);
        buf.put_u16(self.header.id);
        buf.put_u16(self.header.flags());
        buf.put_u16(self.questions.len() as u16);
        buf.put_u16(self.answers.len() as u16);
        buf.put_u16(self.authorities.len() as u16);
        buf.put_u16(self.additionals.len() as u16);

        for q in &self.questions {
            write_name(&mut buf, &q.name)?;
            buf.put_u16(q.qtype);
            buf.put_u16(q.qclass);
        }
        for section in [&self.answers, &self.authorities, &self.additionals] {
            for record in section {
                write_record(&mut buf, record)?;
            }
        }
        Ok(buf.to_vec())
    }

    /// Parse a message from wire format, following compression pointers.
    pub fn unpack(data: &[u8]) -> Result<Self, DnsError> {
        if data.len() < 12 {
            return Err(DnsError::Unpack(format!(
                "message too short: {} bytes",
                data.len()
            )));
        }
        let id = u16::from_be_bytes([data[0], data[1]]);
        let flags = u16::from_be_bytes([data[2], data[3]]);
        let qdcount = u16::from_be_bytes([data[4], data[5]]) as usize;
        let ancount = u16::from_be_bytes([data[6], data[7]]) as usize;
        let nscount = u16::from_be_bytes([data[8], data[9]]) as usize;
        let arcount = u16::from_be_bytes([data[10], data[11]]) as usize;

        let mut pos = 12usize;
        let mut questions = Vec::with_capacity(qdcount);
        for _ in 0..qdcount {
            let (name, next) = read_name(data, pos)?;
            let qtype = read_u16(data, next)?;
            let qclass = read_u16(data, next + 2)?;
            pos = next + 4;
            questions.push(Question {
                name,
                qtype,
                qclass,
            });
        }

        let read_section = |count: usize, pos: &mut usize| -> Result<Vec<Record>, DnsError> {
            let mut records = Vec::with_capacity(count);
            for _ in 0..count {
                let (record, next) = read_record(data, *pos)?;
                *pos = next;
                records.push(record);
            }
            Ok(records)
        };

        let answers = read_section(ancount, &mut pos)?;
        let authorities = read_section(nscount, &mut pos)?;
        let additionals = read_section(arcount, &mut pos)?;

        Ok(Self {
            header: Header::from_flags(id, flags),
            questions,
            answers,
            authorities,
            additionals,
        })
    }

    /// The OPT pseudo-record, if present.
    pub fn edns(&self) -> Option<&Record> {
        self.additionals.iter().find(|r| r.rtype == TYPE_OPT)
    }

    fn edns_mut(&mut self) -> Option<&mut Record> {
        self.additionals.iter_mut().find(|r| r.rtype == TYPE_OPT)
    }

    /// Append an OPT record advertising `udp_size` if none exists yet.
    pub fn set_edns(&mut self, udp_size: u16, dnssec_ok: bool) {
        if self.edns().is_some() {
            return;
        }
        self.additionals.push(Record {
            name: ".".into(),
            rtype: TYPE_OPT,
            rclass: udp_size,
            ttl: if dnssec_ok { EDNS_DO } else { 0 },
            rdata: Rdata::Opt(Vec::new()),
        });
    }

    /// Guarantee exactly one EDNS(0) Client Subnet option carrying `subnet`.
    ///
    /// Appends an OPT record (UDP size 1232, DO set) when the message has
    /// none, drops any existing subnet options and adds one with
    /// `source netmask = prefix length`, `scope = 0` and the address encoded
    /// at its family's full width. Applying this twice is a no-op.
    pub fn ensure_ecs(&mut self, subnet: &IpNet) {
        self.set_edns(EDNS_UDP_SIZE, true);
        let prefix_len = subnet.prefix_len();
        let (family, addr_bytes): (u16, Vec<u8>) = match subnet.addr() {
            IpAddr::V4(v4) => (1, v4.octets().to_vec()),
            IpAddr::V6(v6) => (2, v6.octets().to_vec()),
        };
        let mut data = Vec::with_capacity(4 + addr_bytes.len());
        data.extend_from_slice(&family.to_be_bytes());
        data.push(prefix_len);
        data.push(0);
        data.extend_from_slice(&addr_bytes);

        if let Some(opt) = self.edns_mut() {
            if let Rdata::Opt(options) = &mut opt.rdata {
                options.retain(|o| o.code != EDNS_OPTION_SUBNET);
                options.push(EdnsOption {
                    code: EDNS_OPTION_SUBNET,
                    data,
                });
            }
        }
    }
}

fn write_name(buf: &mut BytesMut, name: &str) -> Result<(), DnsError> {
    if name.len() > MAX_NAME_LEN {
        return Err(DnsError::Pack(format!("name too long: {name}")));
    }
    for label in name.split('.') {
        if label.is_empty() {
            continue;
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(DnsError::Pack(format!("label too long: {label}")));
        }
        buf.put_u8(label.len() as u8);
        buf.put_slice(label.as_bytes());
    }
    buf.put_u8(0);
    Ok(())
}

fn write_record(buf: &mut BytesMut, record: &Record) -> Result<(), DnsError> {
    write_name(buf, &record.name)?;
    buf.put_u16(record.rtype);
    buf.put_u16(record.rclass);
    buf.put_u32(record.ttl);

    let mut rdata = BytesMut::new();
    match &record.rdata {
        Rdata::A(ip) => rdata.put_slice(&ip.octets()),
        Rdata::Aaaa(ip) => rdata.put_slice(&ip.octets()),
        Rdata::Cname(t) | Rdata::Ns(t) | Rdata::Ptr(t) => write_name(&mut rdata, t)?,
        Rdata::Mx {
            preference,
            exchange,
        } => {
            rdata.put_u16(*preference);
            write_name(&mut rdata, exchange)?;
        }
        Rdata::Txt(strings) => {
            for s in strings {
                if s.len() > 255 {
                    return Err(DnsError::Pack("txt string too long".into()));
                }
                rdata.put_u8(s.len() as u8);
                rdata.put_slice(s);
            }
        }
        Rdata::Soa {
            mname,
            rname,
            serial,
            refresh,
            retry,
            expire,
            minimum,
        } => {
            write_name(&mut rdata, mname)?;
            write_name(&mut rdata, rname)?;
            rdata.put_u32(*serial);
            rdata.put_u32(*refresh);
            rdata.put_u32(*retry);
            rdata.put_u32(*expire);
            rdata.put_u32(*minimum);
        }
        Rdata::Srv {
            priority,
            weight,
            port,
            target,
        } => {
            rdata.put_u16(*priority);
            rdata.put_u16(*weight);
            rdata.put_u16(*port);
            write_name(&mut rdata, target)?;
        }
        Rdata::Opt(options) => {
            for option in options {
                rdata.put_u16(option.code);
                rdata.put_u16(option.data.len() as u16);
                rdata.put_slice(&option.data);
            }
        }
        Rdata::Other(bytes) => rdata.put_slice(bytes),
    }

    if rdata.len() > MAX_MESSAGE_SIZE {
        return Err(DnsError::Pack("rdata too long".into()));
    }
    buf.put_u16(rdata.len() as u16);
    buf.put_slice(&rdata);
    Ok(())
}

fn read_u16(data: &[u8], pos: usize) -> Result<u16, DnsError> {
    let bytes = data
        .get(pos..pos + 2)
        .ok_or_else(|| DnsError::Unpack("truncated message".into()))?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_u32(data: &[u8], pos: usize) -> Result<u32, DnsError> {
    let bytes = data
        .get(pos..pos + 4)
        .ok_or_else(|| DnsError::Unpack("truncated message".into()))?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read a possibly-compressed name starting at `start`.
///
/// Returns the dotted name and the position just past the name as it appears
/// in the record stream (i.e. past the first pointer when one is used).
fn read_name(data: &[u8], start: usize) -> Result<(String, usize), DnsError> {
    let mut name = String::new();
    let mut pos = start;
    let mut after = None;
    let mut hops = 0;

    loop {
        let len = *data
            .get(pos)
            .ok_or_else(|| DnsError::Unpack("truncated name".into()))? as usize;
        if len & 0xC0 == 0xC0 {
            let low = *data
                .get(pos + 1)
                .ok_or_else(|| DnsError::Unpack("truncated pointer".into()))?
                as usize;
            if after.is_none() {
                after = Some(pos + 2);
            }
            pos = ((len & 0x3F) << 8) | low;
            hops += 1;
            if hops > MAX_POINTER_HOPS {
                return Err(DnsError::Unpack("too many compression pointers".into()));
            }
            continue;
        }
        if len & 0xC0 != 0 {
            return Err(DnsError::Unpack(format!("bad label length {len:#x}")));
        }
        pos += 1;
        if len == 0 {
            break;
        }
        let label = data
            .get(pos..pos + len)
            .ok_or_else(|| DnsError::Unpack("truncated label".into()))?;
        name.push_str(&String::from_utf8_lossy(label));
        name.push('.');
        pos += len;
        if name.len() > MAX_NAME_LEN + 1 {
            return Err(DnsError::Unpack("name too long".into()));
        }
    }

    if name.is_empty() {
        name.push('.');
    }
    Ok((name, after.unwrap_or(pos)))
}

fn read_record(data: &[u8], start: usize) -> Result<(Record, usize), DnsError> {
    let (name, pos) = read_name(data, start)?;
    let rtype = read_u16(data, pos)?;
    let rclass = read_u16(data, pos + 2)?;
    let ttl = read_u32(data, pos + 4)?;
    let rdlen = read_u16(data, pos + 8)? as usize;
    let rdata_start = pos + 10;
    let rdata_end = rdata_start + rdlen;
    if data.len() < rdata_end {
        return Err(DnsError::Unpack("truncated rdata".into()));
    }

    let rdata = read_rdata(data, rdata_start, rdlen, rtype)?;
    Ok((
        Record {
            name,
            rtype,
            rclass,
            ttl,
            rdata,
        },
        rdata_end,
    ))
}

fn read_rdata(data: &[u8], start: usize, rdlen: usize, rtype: u16) -> Result<Rdata, DnsError> {
    let raw = &data[start..start + rdlen];
    let rdata = match rtype {
        TYPE_A if rdlen == 4 => Rdata::A(Ipv4Addr::new(raw[0], raw[1], raw[2], raw[3])),
        TYPE_AAAA if rdlen == 16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(raw);
            Rdata::Aaaa(Ipv6Addr::from(octets))
        }
        TYPE_CNAME => Rdata::Cname(read_name(data, start)?.0),
        TYPE_NS => Rdata::Ns(read_name(data, start)?.0),
        TYPE_PTR => Rdata::Ptr(read_name(data, start)?.0),
        TYPE_MX if rdlen >= 2 => Rdata::Mx {
            preference: read_u16(data, start)?,
            exchange: read_name(data, start + 2)?.0,
        },
        TYPE_TXT => {
            let mut strings = Vec::new();
            let mut pos = 0usize;
            while pos < rdlen {
                let len = raw[pos] as usize;
                pos += 1;
                let string = raw
                    .get(pos..pos + len)
                    .ok_or_else(|| DnsError::Unpack("truncated txt string".into()))?;
                strings.push(string.to_vec());
                pos += len;
            }
            Rdata::Txt(strings)
        }
        TYPE_SOA => {
            let (mname, pos) = read_name(data, start)?;
            let (rname, pos) = read_name(data, pos)?;
            if pos + 20 > start + rdlen {
                return Err(DnsError::Unpack("truncated soa".into()));
            }
            Rdata::Soa {
                mname,
                rname,
                serial: read_u32(data, pos)?,
                refresh: read_u32(data, pos + 4)?,
                retry: read_u32(data, pos + 8)?,
                expire: read_u32(data, pos + 12)?,
                minimum: read_u32(data, pos + 16)?,
            }
        }
        TYPE_SRV if rdlen >= 6 => Rdata::Srv {
            priority: read_u16(data, start)?,
            weight: read_u16(data, start + 2)?,
            port: read_u16(data, start + 4)?,
            target: read_name(data, start + 6)?.0,
        },
        TYPE_OPT => {
            let mut options = Vec::new();
            let mut pos = 0usize;
            while pos + 4 <= rdlen {
                let code = u16::from_be_bytes([raw[pos], raw[pos + 1]]);
                let len = u16::from_be_bytes([raw[pos + 2], raw[pos + 3]]) as usize;
                pos += 4;
                let payload = raw
                    .get(pos..pos + len)
                    .ok_or_else(|| DnsError::Unpack("truncated edns option".into()))?;
                options.push(EdnsOption {
                    code,
                    data: payload.to_vec(),
                });
                pos += len;
            }
            Rdata::Opt(options)
        }
        _ => Rdata::Other(raw.to_vec()),
    };
    Ok(rdata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_sets_question_and_rd() {
        let msg = Message::query("example.com", "A", "IN").unwrap();
        assert!(msg.header.recursion_desired);
        assert!(!msg.header.response);
        assert_eq!(msg.questions.len(), 1);
        assert_eq!(msg.questions[0].name, "example.com.");
        assert_eq!(msg.questions[0].qtype, TYPE_A);
        assert_eq!(msg.questions[0].qclass, CLASS_IN);
    }

    #[test]
    fn build_defaults_to_a_in() {
        let msg = Message::query("example.com", "", "").unwrap();
        assert_eq!(msg.questions[0].qtype, TYPE_A);
        assert_eq!(msg.questions[0].qclass, CLASS_IN);
    }

    #[test]
    fn build_rejects_unknown_type() {
        assert!(matches!(
            Message::query("example.com", "BOGUS", "IN"),
            Err(DnsError::UnknownType(_))
        ));
    }

    #[test]
    fn pack_unpack_round_trip() {
        let msg = Message::query("example.com", "AAAA", "IN").unwrap();
        let wire = msg.pack().unwrap();
        let parsed = Message::unpack(&wire).unwrap();
        assert_eq!(parsed.header.id, msg.header.id);
        assert!(parsed.header.recursion_desired);
        assert_eq!(parsed.questions, msg.questions);
    }

    #[test]
    fn answer_round_trip_with_records() {
        let mut msg = Message::query("example.com", "A", "IN").unwrap();
        msg.header.response = true;
        msg.answers.push(Record {
            name: "example.com.".into(),
            rtype: TYPE_A,
            rclass: CLASS_IN,
            ttl: 300,
            rdata: Rdata::A(Ipv4Addr::new(93, 184, 216, 34)),
        });
        msg.answers.push(Record {
            name: "example.com.".into(),
            rtype: TYPE_TXT,
            rclass: CLASS_IN,
            ttl: 60,
            rdata: Rdata::Txt(vec![b"v=spf1 -all".to_vec()]),
        });
        let parsed = Message::unpack(&msg.pack().unwrap()).unwrap();
        assert_eq!(parsed.answers, msg.answers);
        assert_eq!(parsed.answers[0].result_text(), "93.184.216.34");
        assert!(parsed.answers[1].presentation().contains("\"v=spf1 -all\""));
    }

    #[test]
    fn unpack_follows_compression_pointers() {
        // Hand-packed response: question "a.example.com." + answer whose name
        // is a pointer to offset 12 and whose CNAME target points into the
        // question name.
        let mut wire: Vec<u8> = vec![
            0x12, 0x34, 0x81, 0x80, 0, 1, 0, 1, 0, 0, 0, 0, // header
        ];
        wire.extend_from_slice(&[1, b'a', 7]);
        wire.extend_from_slice(b"example");
        wire.extend_from_slice(&[3, b'c', b'o', b'm', 0]);
        wire.extend_from_slice(&[0, 1, 0, 1]); // qtype/qclass
        wire.extend_from_slice(&[0xC0, 0x0C]); // answer name -> offset 12
        wire.extend_from_slice(&[0, 5, 0, 1, 0, 0, 0, 60]); // CNAME IN ttl=60
        wire.extend_from_slice(&[0, 2, 0xC0, 0x0E]); // rdlen=2, pointer to "example.com."
        let parsed = Message::unpack(&wire).unwrap();
        assert_eq!(parsed.questions[0].name, "a.example.com.");
        assert_eq!(parsed.answers[0].name, "a.example.com.");
        assert_eq!(parsed.answers[0].rdata, Rdata::Cname("example.com.".into()));
    }

    #[test]
    fn ensure_ecs_is_idempotent_and_single() {
        let mut msg = Message::query("example.com", "A", "IN").unwrap();
        let subnet: IpNet = "1.2.3.0/24".parse().unwrap();
        msg.ensure_ecs(&subnet);
        let once = msg.clone();
        msg.ensure_ecs(&subnet);
        assert_eq!(msg, once);

        let opt = msg.edns().expect("opt record");
        assert_eq!(opt.rclass, EDNS_UDP_SIZE);
        assert_eq!(opt.ttl & 0x8000, 0x8000);
        let Rdata::Opt(options) = &opt.rdata else {
            panic!("opt rdata");
        };
        let subnet_options: Vec<_> = options
            .iter()
            .filter(|o| o.code == EDNS_OPTION_SUBNET)
            .collect();
        assert_eq!(subnet_options.len(), 1);
        assert_eq!(
            subnet_options[0].data,
            vec![0, 1, 24, 0, 1, 2, 3, 0] // family=1, netmask=24, scope=0, addr
        );
    }

    #[test]
    fn ensure_ecs_v6_uses_family_two() {
        let mut msg = Message::query("example.com", "A", "IN").unwrap();
        let subnet: IpNet = "2001:db8::/32".parse().unwrap();
        msg.ensure_ecs(&subnet);
        let Rdata::Opt(options) = &msg.edns().unwrap().rdata else {
            panic!("opt rdata");
        };
        assert_eq!(options[0].data[0..2], [0, 2]);
        assert_eq!(options[0].data[2], 32);
        assert_eq!(options[0].data.len(), 4 + 16);
    }

    #[test]
    fn ensure_ecs_replaces_existing_subnet_options() {
        let mut msg = Message::query("example.com", "A", "IN").unwrap();
        msg.ensure_ecs(&"10.0.0.0/8".parse().unwrap());
        msg.ensure_ecs(&"1.2.3.0/24".parse().unwrap());
        let Rdata::Opt(options) = &msg.edns().unwrap().rdata else {
            panic!("opt rdata");
        };
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].data[2], 24);
    }

    #[test]
    fn ecs_survives_pack_unpack() {
        let mut msg = Message::query("example.com", "A", "IN").unwrap();
        msg.ensure_ecs(&"1.2.3.0/24".parse().unwrap());
        let parsed = Message::unpack(&msg.pack().unwrap()).unwrap();
        let opt = parsed.edns().expect("opt record survived");
        let Rdata::Opt(options) = &opt.rdata else {
            panic!("opt rdata");
        };
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].code, EDNS_OPTION_SUBNET);
    }

    #[test]
    fn unknown_rdata_presents_rfc3597() {
        let record = Record {
            name: "example.com.".into(),
            rtype: 99,
            rclass: CLASS_IN,
            ttl: 0,
            rdata: Rdata::Other(vec![0xDE, 0xAD]),
        };
        assert!(record.presentation().ends_with("\\# 2 DEAD"));
    }
}
