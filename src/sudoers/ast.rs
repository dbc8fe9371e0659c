//! The parse tree of a sudoers policy, as handed to us by a front-end (or read from JSON).
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use serde::Deserialize;

/// Where in the original sudoers source an item came from.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// One entry in a user, host, runas or command list.
///
/// A `Word` is interpreted according to the list it appears in: a user name (or `#uid`) in a
/// user list, a host name or wildcard pattern in a host list, a group name (or `#gid`) in a
/// runas group list.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Member {
    All,
    Word(String),
    Alias(String),
    Negated(Box<Member>),
    #[serde(rename = "group")]
    UserGroup(String),
    #[serde(rename = "netgroup")]
    NetGroup(String),
    Network(NetworkAddress),
    Command(Command),
}

impl Member {
    pub fn word(text: &str) -> Member {
        Member::Word(text.to_string())
    }

    pub fn negate(self) -> Member {
        Member::Negated(Box::new(self))
    }
}

/// A command with its argument restriction and optional digests.
///
/// `args` of `None` allows any arguments; a single empty string (`""` in sudoers) allows no
/// arguments at all; anything else must equal the requested arguments exactly.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Command {
    pub path: String,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub digests: Vec<Digest>,
}

impl Command {
    pub fn new(path: &str) -> Command {
        Command {
            path: path.to_string(),
            args: None,
            digests: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: &[&str]) -> Command {
        self.args = Some(args.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_digest(mut self, algorithm: DigestAlgorithm, value: &str) -> Command {
        self.digests.push(Digest {
            algorithm,
            value: value.to_string(),
        });
        self
    }

    pub(super) fn args_match(&self, arguments: &[String]) -> bool {
        match self.args.as_deref() {
            None => true,
            Some([empty]) if empty.is_empty() => arguments.is_empty(),
            Some(expected) => expected == arguments,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    pub fn output_len(self) -> usize {
        match self {
            DigestAlgorithm::Sha224 => 28,
            DigestAlgorithm::Sha256 => 32,
            DigestAlgorithm::Sha384 => 48,
            DigestAlgorithm::Sha512 => 64,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DigestAlgorithm::Sha224 => "sha224",
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha384 => "sha384",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }
}

/// A digest as written in sudoers: either hex or base64.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Digest {
    pub algorithm: DigestAlgorithm,
    pub value: String,
}

impl Digest {
    /// The raw digest bytes, or `None` if the text is neither hex nor base64 of the right length.
    pub fn decode(&self) -> Option<Vec<u8>> {
        let len = self.algorithm.output_len();
        let text = self.value.as_bytes();

        if text.len() == 2 * len && text.iter().all(u8::is_ascii_hexdigit) {
            return text
                .chunks(2)
                .map(|pair| u8::from_str_radix(std::str::from_utf8(pair).ok()?, 16).ok())
                .collect();
        }

        STANDARD
            .decode(text)
            .or_else(|_| STANDARD_NO_PAD.decode(text))
            .ok()
            .filter(|bytes| bytes.len() == len)
    }
}

/// An IP address with an optional network prefix: `10.0.0.1`, `10.0.0.0/8`,
/// `10.0.0.0/255.0.0.0` or `fe80::/10`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct NetworkAddress {
    pub addr: IpAddr,
    pub prefix: Option<u8>,
}

impl NetworkAddress {
    pub fn contains(&self, candidate: &IpAddr) -> bool {
        let Some(prefix) = self.prefix else {
            return self.addr == *candidate;
        };

        match (self.addr, candidate) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX.checked_shl(32 - u32::from(prefix)).unwrap_or(0);
                u32::from(net) & mask == u32::from(*addr) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX.checked_shl(128 - u32::from(prefix)).unwrap_or(0);
                u128::from(net) & mask == u128::from(*addr) & mask
            }
            _ => false,
        }
    }
}

impl FromStr for NetworkAddress {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("invalid network address '{text}'");

        let (addr, mask) = match text.split_once('/') {
            Some((addr, mask)) => (addr, Some(mask)),
            None => (text, None),
        };
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let max = if addr.is_ipv4() { 32 } else { 128 };

        let prefix = match mask {
            None => None,
            Some(bits) if bits.bytes().all(|b| b.is_ascii_digit()) => {
                let bits: u8 = bits.parse().map_err(|_| invalid())?;
                if bits > max {
                    return Err(invalid());
                }
                Some(bits)
            }
            Some(netmask) => {
                // a dotted netmask has to be contiguous
                let IpAddr::V4(netmask) = netmask.parse().map_err(|_| invalid())? else {
                    return Err(invalid());
                };
                let mask = u32::from(netmask);
                if mask.leading_ones() + mask.trailing_zeros() != 32 || !addr.is_ipv4() {
                    return Err(invalid());
                }
                Some(mask.leading_ones() as u8)
            }
        };

        Ok(NetworkAddress { addr, prefix })
    }
}

impl TryFrom<String> for NetworkAddress {
    type Error = String;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        text.parse()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasKind {
    Host,
    User,
    #[serde(rename = "runas")]
    RunAs,
    #[serde(rename = "cmnd")]
    Command,
}

impl fmt::Display for AliasKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AliasKind::Host => "Host_Alias",
            AliasKind::User => "User_Alias",
            AliasKind::RunAs => "Runas_Alias",
            AliasKind::Command => "Cmnd_Alias",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Alias {
    pub name: String,
    pub kind: AliasKind,
    pub members: Vec<Member>,
    #[serde(default)]
    pub location: Option<Location>,
}

/// Commands in sudoers can carry tags such as `NOPASSWD:` or `NOEXEC:`; `None` means "not
/// mentioned", in which case the value of the previous command in the same privilege applies.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CmndTag {
    pub nopasswd: Option<bool>,
    pub noexec: Option<bool>,
    pub setenv: Option<bool>,
    pub log_input: Option<bool>,
    pub log_output: Option<bool>,
    pub send_mail: Option<bool>,
    pub follow: Option<bool>,
    pub intercept: Option<bool>,
}

impl CmndTag {
    pub fn inherit(self, previous: &CmndTag) -> CmndTag {
        CmndTag {
            nopasswd: self.nopasswd.or(previous.nopasswd),
            noexec: self.noexec.or(previous.noexec),
            setenv: self.setenv.or(previous.setenv),
            log_input: self.log_input.or(previous.log_input),
            log_output: self.log_output.or(previous.log_output),
            send_mail: self.send_mail.or(previous.send_mail),
            follow: self.follow.or(previous.follow),
            intercept: self.intercept.or(previous.intercept),
        }
    }
}

/// A command with the attributes that apply to it.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct CmndSpec {
    #[serde(default)]
    pub runas_users: Option<Vec<Member>>,
    #[serde(default)]
    pub runas_groups: Option<Vec<Member>>,
    pub command: Member,
    #[serde(default)]
    pub tags: CmndTag,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, rename = "type")]
    pub selinux_type: Option<String>,
    #[serde(default)]
    pub privs: Option<String>,
    #[serde(default)]
    pub limitprivs: Option<String>,
    #[serde(default)]
    pub runchroot: Option<String>,
    #[serde(default)]
    pub runcwd: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Seconds since the epoch.
    #[serde(default)]
    pub notbefore: Option<i64>,
    #[serde(default)]
    pub notafter: Option<i64>,
}

impl CmndSpec {
    pub fn new(command: Member) -> CmndSpec {
        CmndSpec {
            runas_users: None,
            runas_groups: None,
            command,
            tags: CmndTag::default(),
            role: None,
            selinux_type: None,
            privs: None,
            limitprivs: None,
            runchroot: None,
            runcwd: None,
            timeout: None,
            notbefore: None,
            notafter: None,
        }
    }

    pub(super) fn in_window(&self, now: i64) -> bool {
        self.notbefore.map_or(true, |start| now >= start)
            && self.notafter.map_or(true, |end| now <= end)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Privilege {
    pub hosts: Vec<Member>,
    pub commands: Vec<CmndSpec>,
    /// Settings that apply when a command of this privilege is the one that matched;
    /// their binding is ignored.
    #[serde(default)]
    pub defaults: Vec<Defaults>,
}

/// The main object for one sudoers permission line.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct UserSpec {
    pub users: Vec<Member>,
    pub privileges: Vec<Privilege>,
    #[serde(default)]
    pub location: Option<Location>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultsOp {
    /// `name`, `!name` or `name=value`
    Set(bool),
    /// `name+=value`
    Add,
    /// `name-=value`
    Remove,
}

impl Default for DefaultsOp {
    fn default() -> Self {
        DefaultsOp::Set(true)
    }
}

/// The 'context' (host, user, runas, cmnd) a Defaults line is bound to.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Binding {
    #[default]
    Global,
    Host(Vec<Member>),
    User(Vec<Member>),
    #[serde(rename = "runas")]
    RunAs(Vec<Member>),
    #[serde(rename = "cmnd")]
    Command(Vec<Member>),
}

impl Binding {
    // "Defaults entries are parsed in the following order:
    // generic, host and user Defaults first, then runas Defaults and finally command defaults."
    pub(super) fn tier(&self) -> u8 {
        match self {
            Binding::Global => 0,
            Binding::Host(_) => 1,
            Binding::User(_) => 2,
            Binding::RunAs(_) => 3,
            Binding::Command(_) => 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Defaults {
    pub var: String,
    #[serde(default)]
    pub val: Option<String>,
    #[serde(default)]
    pub op: DefaultsOp,
    #[serde(default)]
    pub binding: Binding,
    #[serde(default)]
    pub location: Option<Location>,
}
