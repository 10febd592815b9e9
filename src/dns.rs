//! DNS message parsing and construction.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

pub const HEADER_LEN: usize = 12;

pub const TYPE_A: u16 = 1;
pub const TYPE_AAAA: u16 = 28;
pub const CLASS_IN: u16 = 1;

const FLAG_QR: u16 = 0x8000;
const FLAG_TC: u16 = 0x0200;
const RCODE_SERVFAIL: u16 = 2;

/// TTL carried by answers synthesized from hosts entries.
pub const HOSTS_TTL: u32 = 10;

/// A parsed DNS query.
#[derive(Debug, Clone)]
pub struct DnsQuery {
    pub id: u16,
    pub flags: u16,
    pub domain: String,
    pub qtype: u16,
    pub qclass: u16,
}

impl DnsQuery {
    /// Parse a DNS query from raw bytes.
    ///
    /// The domain is lowercased and never carries a trailing dot.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN + 1 {
            return None;
        }

        let id = u16::from_be_bytes([data[0], data[1]]);
        let flags = u16::from_be_bytes([data[2], data[3]]);
        let qdcount = u16::from_be_bytes([data[4], data[5]]);
        if qdcount == 0 {
            return None;
        }

        // Parse domain name
        let mut pos = HEADER_LEN;
        let mut domain_parts = Vec::new();

        loop {
            let label_len = *data.get(pos)? as usize;
            pos += 1;
            if label_len == 0 {
                break;
            }
            // Compression is not valid in the first question
            if label_len >= 0x40 {
                return None;
            }
            if pos + label_len > data.len() {
                return None;
            }
            let label = std::str::from_utf8(&data[pos..pos + label_len]).ok()?;
            domain_parts.push(label);
            pos += label_len;
        }

        // Parse QTYPE and QCLASS
        if pos + 4 > data.len() {
            return None;
        }
        let qtype = u16::from_be_bytes([data[pos], data[pos + 1]]);
        let qclass = u16::from_be_bytes([data[pos + 2], data[pos + 3]]);

        Some(Self {
            id,
            flags,
            domain: domain_parts.join(".").to_lowercase(),
            qtype,
            qclass,
        })
    }

    /// Create a SERVFAIL response for this query.
    pub fn servfail_response(&self) -> Vec<u8> {
        DnsResponse::servfail(self).to_bytes()
    }

    /// Create a response answering this query with a static address.
    pub fn hosts_response(&self, addr: IpAddr) -> Vec<u8> {
        DnsResponse::from_hosts(self, addr).to_bytes()
    }

    /// Copy a response, rewriting its transaction ID to this query's.
    pub fn response_from_cache(&self, cached: &[u8]) -> Option<Vec<u8>> {
        if cached.len() < 2 {
            return None;
        }
        let mut response = cached.to_vec();
        set_id(&mut response, self.id);
        Some(response)
    }
}

/// Overwrite the transaction ID of a wire-format message in place.
pub fn set_id(message: &mut [u8], id: u16) {
    if message.len() >= 2 {
        message[..2].copy_from_slice(&id.to_be_bytes());
    }
}

/// Read the transaction ID of a wire-format message.
pub fn message_id(message: &[u8]) -> Option<u16> {
    Some(u16::from_be_bytes([*message.first()?, *message.get(1)?]))
}

/// Whether the message has the QR (response) bit set.
pub fn is_response(message: &[u8]) -> bool {
    message.len() >= HEADER_LEN && u16::from_be_bytes([message[2], message[3]]) & FLAG_QR != 0
}

/// Whether the message has the TC (truncated) bit set.
pub fn is_truncated(message: &[u8]) -> bool {
    message.len() >= HEADER_LEN && u16::from_be_bytes([message[2], message[3]]) & FLAG_TC != 0
}

/// A DNS response.
#[derive(Debug, Clone)]
pub struct DnsResponse {
    pub id: u16,
    pub flags: u16,
    pub questions: Vec<DnsQuestion>,
    pub answers: Vec<DnsRecord>,
}

/// A DNS question section entry.
#[derive(Debug, Clone)]
pub struct DnsQuestion {
    pub domain: String,
    pub qtype: u16,
    pub qclass: u16,
}

/// A DNS resource record.
#[derive(Debug, Clone)]
pub struct DnsRecord {
    pub name: String,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl DnsResponse {
    fn reply_to(query: &DnsQuery, rcode: u16) -> Self {
        // QR, RA, and the client's RD bit
        let flags = FLAG_QR | 0x0080 | (query.flags & 0x0100) | rcode;
        Self {
            id: query.id,
            flags,
            questions: vec![DnsQuestion {
                domain: query.domain.clone(),
                qtype: query.qtype,
                qclass: query.qclass,
            }],
            answers: Vec::new(),
        }
    }

    /// Create a SERVFAIL response for a query.
    pub fn servfail(query: &DnsQuery) -> Self {
        Self::reply_to(query, RCODE_SERVFAIL)
    }

    /// Create a response carrying a single static address record.
    pub fn from_hosts(query: &DnsQuery, addr: IpAddr) -> Self {
        let mut response = Self::reply_to(query, 0);
        let (rtype, rdata) = match addr {
            IpAddr::V4(v4) => (TYPE_A, v4.octets().to_vec()),
            IpAddr::V6(v6) => (TYPE_AAAA, v6.octets().to_vec()),
        };
        response.answers.push(DnsRecord {
            name: query.domain.clone(),
            rtype,
            class: CLASS_IN,
            ttl: HOSTS_TTL,
            rdata,
        });
        response
    }

    /// Encode the response to wire format bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(512);

        // Header
        data.extend_from_slice(&self.id.to_be_bytes());
        data.extend_from_slice(&self.flags.to_be_bytes());
        data.extend_from_slice(&(self.questions.len() as u16).to_be_bytes());
        data.extend_from_slice(&(self.answers.len() as u16).to_be_bytes());
        data.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
        data.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

        // Questions
        for q in &self.questions {
            Self::encode_domain(&mut data, &q.domain);
            data.extend_from_slice(&q.qtype.to_be_bytes());
            data.extend_from_slice(&q.qclass.to_be_bytes());
        }

        // Answers
        for a in &self.answers {
            // Use compression pointer if this is the first question's domain
            if !self.questions.is_empty() && a.name == self.questions[0].domain {
                data.extend_from_slice(&[0xC0, 0x0C]); // Pointer to offset 12
            } else {
                Self::encode_domain(&mut data, &a.name);
            }
            data.extend_from_slice(&a.rtype.to_be_bytes());
            data.extend_from_slice(&a.class.to_be_bytes());
            data.extend_from_slice(&a.ttl.to_be_bytes());
            data.extend_from_slice(&(a.rdata.len() as u16).to_be_bytes());
            data.extend_from_slice(&a.rdata);
        }

        data
    }

    fn encode_domain(buf: &mut Vec<u8>, domain: &str) {
        for label in domain.split('.').filter(|l| !l.is_empty()) {
            buf.push(label.len() as u8);
            buf.extend_from_slice(label.as_bytes());
        }
        buf.push(0);
    }

    /// Minimum TTL across the answer section, or `default` when there is none.
    pub fn answer_min_ttl(response: &[u8], default: Duration) -> Duration {
        let min_ttl = AnswerIter::new(response).map(|rr| rr.ttl).min();

        match min_ttl {
            Some(ttl) => Duration::from_secs(u64::from(ttl)),
            None => default,
        }
    }

    /// Every IPv4 address carried by an A record in the answer section.
    pub fn ipv4_answers(response: &[u8]) -> Vec<Ipv4Addr> {
        AnswerIter::new(response)
            .filter(|rr| rr.rtype == TYPE_A && rr.rdata.len() == 4)
            .map(|rr| Ipv4Addr::new(rr.rdata[0], rr.rdata[1], rr.rdata[2], rr.rdata[3]))
            .collect()
    }
}

/// Borrowed view of one answer record.
struct RawRecord<'a> {
    rtype: u16,
    ttl: u32,
    rdata: &'a [u8],
}

/// Walks the answer section of a wire-format response.
///
/// Stops silently at the first truncated record.
struct AnswerIter<'a> {
    data: &'a [u8],
    pos: usize,
    remaining: usize,
}

impl<'a> AnswerIter<'a> {
    fn new(data: &'a [u8]) -> Self {
        if data.len() < HEADER_LEN {
            return Self {
                data,
                pos: 0,
                remaining: 0,
            };
        }

        let qdcount = u16::from_be_bytes([data[4], data[5]]) as usize;
        let ancount = u16::from_be_bytes([data[6], data[7]]) as usize;

        // Skip question section
        let mut pos = HEADER_LEN;
        for _ in 0..qdcount {
            pos = skip_name(data, pos) + 4; // QTYPE + QCLASS
        }

        Self {
            data,
            pos,
            remaining: ancount,
        }
    }
}

impl<'a> Iterator for AnswerIter<'a> {
    type Item = RawRecord<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let data = self.data;
        let pos = skip_name(data, self.pos);
        if pos + 10 > data.len() {
            self.remaining = 0;
            return None;
        }

        let rtype = u16::from_be_bytes([data[pos], data[pos + 1]]);
        let ttl = u32::from_be_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]]);
        let rdlength = u16::from_be_bytes([data[pos + 8], data[pos + 9]]) as usize;
        let start = pos + 10;
        if start + rdlength > data.len() {
            self.remaining = 0;
            return None;
        }

        self.pos = start + rdlength;
        Some(RawRecord {
            rtype,
            ttl,
            rdata: &data[start..start + rdlength],
        })
    }
}

/// Skip a (possibly compressed) name starting at `pos`.
fn skip_name(data: &[u8], mut pos: usize) -> usize {
    while pos < data.len() {
        let b = data[pos];
        if b == 0 {
            return pos + 1;
        }
        if b >= 0xC0 {
            return pos + 2;
        }
        pos += 1 + b as usize;
    }
    pos
}
