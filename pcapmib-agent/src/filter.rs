//! Capture filter expressions
//!
//! A compact subset of the usual capture filter language, evaluated in
//! userspace against the head of each Ethernet frame:
//!
//! - protocols: `ip`, `ip6`, `arp`, `tcp`, `udp`, `icmp`
//! - addresses and ports: `[src|dst] host <addr>`, `[src|dst] port <n>`
//! - operators: `not` / `!`, `and` / `&&`, `or` / `||`, parentheses
//!
//! Juxtaposed primitives are joined with `and` (`tcp port 80`). `and` and
//! `or` have the same precedence and associate to the left, so
//! `tcp or udp and port 53` reads as `(tcp or udp) and port 53`.

use std::iter::Peekable;
use std::net::IpAddr;
use std::vec::IntoIter;
use thiserror::Error;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_ARP: u16 = 0x0806;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_IPV6: u16 = 0x86dd;

const IPPROTO_ICMP: u8 = 1;
const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;
const IPPROTO_ICMPV6: u8 = 58;

/// Bytes of a frame the filter may look at
pub const FILTER_SNAP_LENGTH: usize = 96;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("empty filter expression")]
    Empty,

    #[error("unexpected end of filter expression")]
    UnexpectedEnd,

    #[error("unexpected token '{0}' in filter expression")]
    UnexpectedToken(String),

    #[error("invalid host address '{0}'")]
    InvalidHost(String),

    #[error("invalid port '{0}'")]
    InvalidPort(String),
}

/// A compiled filter expression
#[derive(Debug, Clone)]
pub struct Filter {
    source: String,
    expr: Expr,
}

impl Filter {
    /// Compile a filter expression
    pub fn compile(source: &str) -> Result<Self, FilterError> {
        let tokens = tokenize(source);
        if tokens.is_empty() {
            return Err(FilterError::Empty);
        }

        let mut parser = Parser {
            tokens: tokens.into_iter().peekable(),
        };
        let expr = parser.expr()?;
        if let Some(extra) = parser.tokens.next() {
            return Err(FilterError::UnexpectedToken(extra.to_string()));
        }

        Ok(Self {
            source: source.trim().to_string(),
            expr,
        })
    }

    /// Expression text as configured
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether a captured frame (link-layer header included) passes the filter
    pub fn matches(&self, frame: &[u8]) -> bool {
        self.expr.eval(&Packet::parse(frame))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Src,
    Dst,
    Either,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Primitive {
    Ip,
    Ip6,
    Arp,
    Tcp,
    Udp,
    Icmp,
    Host(Direction, IpAddr),
    Port(Direction, u16),
}

#[derive(Debug, Clone)]
enum Expr {
    Primitive(Primitive),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self, packet: &Packet) -> bool {
        match self {
            Expr::Primitive(p) => packet.satisfies(p),
            Expr::Not(inner) => !inner.eval(packet),
            Expr::And(lhs, rhs) => lhs.eval(packet) && rhs.eval(packet),
            Expr::Or(lhs, rhs) => lhs.eval(packet) || rhs.eval(packet),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Not,
    And,
    Or,
    Open,
    Close,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Word(w) => f.write_str(w),
            Token::Not => f.write_str("not"),
            Token::And => f.write_str("and"),
            Token::Or => f.write_str("or"),
            Token::Open => f.write_str("("),
            Token::Close => f.write_str(")"),
        }
    }
}

fn tokenize(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut chars = source.chars().peekable();

    let flush = |word: &mut String, tokens: &mut Vec<Token>| {
        if word.is_empty() {
            return;
        }
        let token = match word.to_ascii_lowercase().as_str() {
            "not" => Token::Not,
            "and" => Token::And,
            "or" => Token::Or,
            _ => Token::Word(word.clone()),
        };
        tokens.push(token);
        word.clear();
    };

    while let Some(c) = chars.next() {
        match c {
            '(' | ')' | '!' => {
                flush(&mut word, &mut tokens);
                tokens.push(match c {
                    '(' => Token::Open,
                    ')' => Token::Close,
                    _ => Token::Not,
                });
            }
            '&' | '|' if chars.peek() == Some(&c) => {
                chars.next();
                flush(&mut word, &mut tokens);
                tokens.push(if c == '&' { Token::And } else { Token::Or });
            }
            c if c.is_whitespace() => flush(&mut word, &mut tokens),
            c => word.push(c),
        }
    }
    flush(&mut word, &mut tokens);

    tokens
}

struct Parser {
    tokens: Peekable<IntoIter<Token>>,
}

impl Parser {
    fn expr(&mut self) -> Result<Expr, FilterError> {
        let mut lhs = self.unary()?;
        loop {
            match self.tokens.peek() {
                Some(Token::And) => {
                    self.tokens.next();
                    lhs = Expr::And(Box::new(lhs), Box::new(self.unary()?));
                }
                Some(Token::Or) => {
                    self.tokens.next();
                    lhs = Expr::Or(Box::new(lhs), Box::new(self.unary()?));
                }
                Some(Token::Word(_) | Token::Not | Token::Open) => {
                    lhs = Expr::And(Box::new(lhs), Box::new(self.unary()?));
                }
                _ => return Ok(lhs),
            }
        }
    }

    fn unary(&mut self) -> Result<Expr, FilterError> {
        if self.tokens.peek() == Some(&Token::Not) {
            self.tokens.next();
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, FilterError> {
        match self.tokens.next().ok_or(FilterError::UnexpectedEnd)? {
            Token::Open => {
                let inner = self.expr()?;
                match self.tokens.next() {
                    Some(Token::Close) => Ok(inner),
                    Some(other) => Err(FilterError::UnexpectedToken(other.to_string())),
                    None => Err(FilterError::UnexpectedEnd),
                }
            }
            Token::Word(word) => self.primitive(&word).map(Expr::Primitive),
            other => Err(FilterError::UnexpectedToken(other.to_string())),
        }
    }

    fn primitive(&mut self, word: &str) -> Result<Primitive, FilterError> {
        let primitive = match word.to_ascii_lowercase().as_str() {
            "ip" => Primitive::Ip,
            "ip6" => Primitive::Ip6,
            "arp" => Primitive::Arp,
            "tcp" => Primitive::Tcp,
            "udp" => Primitive::Udp,
            "icmp" => Primitive::Icmp,
            "src" => self.qualified(Direction::Src)?,
            "dst" => self.qualified(Direction::Dst)?,
            "host" => self.host(Direction::Either)?,
            "port" => self.port(Direction::Either)?,
            _ => return Err(FilterError::UnexpectedToken(word.to_string())),
        };
        Ok(primitive)
    }

    fn qualified(&mut self, direction: Direction) -> Result<Primitive, FilterError> {
        match self.word()?.to_ascii_lowercase().as_str() {
            "host" => self.host(direction),
            "port" => self.port(direction),
            other => Err(FilterError::UnexpectedToken(other.to_string())),
        }
    }

    fn host(&mut self, direction: Direction) -> Result<Primitive, FilterError> {
        let word = self.word()?;
        word.parse::<IpAddr>()
            .map(|addr| Primitive::Host(direction, addr))
            .map_err(|_| FilterError::InvalidHost(word))
    }

    fn port(&mut self, direction: Direction) -> Result<Primitive, FilterError> {
        let word = self.word()?;
        word.parse::<u16>()
            .map(|port| Primitive::Port(direction, port))
            .map_err(|_| FilterError::InvalidPort(word))
    }

    fn word(&mut self) -> Result<String, FilterError> {
        match self.tokens.next() {
            Some(Token::Word(word)) => Ok(word),
            Some(other) => Err(FilterError::UnexpectedToken(other.to_string())),
            None => Err(FilterError::UnexpectedEnd),
        }
    }
}

/// Header fields of one frame, as far as the captured bytes reach
#[derive(Debug, Default)]
struct Packet {
    ethertype: Option<u16>,
    protocol: Option<u8>,
    src: Option<IpAddr>,
    dst: Option<IpAddr>,
    ports: Option<(u16, u16)>,
}

fn be16(bytes: &[u8], at: usize) -> Option<u16> {
    bytes
        .get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn addr<const N: usize>(bytes: &[u8], at: usize) -> Option<[u8; N]> {
    bytes.get(at..at + N).and_then(|b| b.try_into().ok())
}

impl Packet {
    fn parse(frame: &[u8]) -> Self {
        let mut packet = Packet::default();

        let Some(mut ethertype) = be16(frame, 12) else {
            return packet;
        };
        let mut l3_offset = 14;
        if ethertype == ETHERTYPE_VLAN {
            match be16(frame, 16) {
                Some(inner) => ethertype = inner,
                None => return packet,
            }
            l3_offset = 18;
        }
        packet.ethertype = Some(ethertype);

        let l3 = frame.get(l3_offset..).unwrap_or_default();
        let l4 = match ethertype {
            ETHERTYPE_IPV4 => {
                let Some(&version_ihl) = l3.first() else {
                    return packet;
                };
                packet.protocol = l3.get(9).copied();
                packet.src = addr::<4>(l3, 12).map(IpAddr::from);
                packet.dst = addr::<4>(l3, 16).map(IpAddr::from);

                // only the first fragment carries the transport header
                let fragment_offset = be16(l3, 6).map(|v| v & 0x1fff).unwrap_or(0);
                if fragment_offset != 0 {
                    return packet;
                }
                l3.get(usize::from(version_ihl & 0x0f) * 4..)
            }
            ETHERTYPE_IPV6 => {
                packet.protocol = l3.get(6).copied();
                packet.src = addr::<16>(l3, 8).map(IpAddr::from);
                packet.dst = addr::<16>(l3, 24).map(IpAddr::from);
                l3.get(40..)
            }
            _ => None,
        };

        if matches!(packet.protocol, Some(IPPROTO_TCP | IPPROTO_UDP)) {
            if let Some(l4) = l4 {
                packet.ports = be16(l4, 0).zip(be16(l4, 2));
            }
        }

        packet
    }

    fn satisfies(&self, primitive: &Primitive) -> bool {
        match primitive {
            Primitive::Ip => self.ethertype == Some(ETHERTYPE_IPV4),
            Primitive::Ip6 => self.ethertype == Some(ETHERTYPE_IPV6),
            Primitive::Arp => self.ethertype == Some(ETHERTYPE_ARP),
            Primitive::Tcp => self.protocol == Some(IPPROTO_TCP),
            Primitive::Udp => self.protocol == Some(IPPROTO_UDP),
            Primitive::Icmp => matches!(
                (self.ethertype, self.protocol),
                (Some(ETHERTYPE_IPV4), Some(IPPROTO_ICMP))
                    | (Some(ETHERTYPE_IPV6), Some(IPPROTO_ICMPV6))
            ),
            Primitive::Host(direction, host) => {
                let src = self.src.as_ref() == Some(host);
                let dst = self.dst.as_ref() == Some(host);
                pick(*direction, src, dst)
            }
            Primitive::Port(direction, port) => match self.ports {
                Some((src, dst)) => pick(*direction, src == *port, dst == *port),
                None => false,
            },
        }
    }
}

fn pick(direction: Direction, src: bool, dst: bool) -> bool {
    match direction {
        Direction::Src => src,
        Direction::Dst => dst,
        Direction::Either => src || dst,
    }
}
