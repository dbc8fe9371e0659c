use std::{fmt::Display, net::IpAddr, num::ParseIntError, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(libc::gid_t);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(libc::uid_t);

impl GroupId {
    pub const fn new(id: libc::gid_t) -> Self {
        Self(id)
    }

    pub fn get(&self) -> libc::gid_t {
        self.0
    }
}

impl UserId {
    pub const ROOT: Self = Self(0);

    pub const fn new(id: libc::uid_t) -> Self {
        Self(id)
    }

    pub fn get(&self) -> libc::uid_t {
        self.0
    }
}

impl Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GroupId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<libc::gid_t>().map(GroupId::new)
    }
}

impl FromStr for UserId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<libc::uid_t>().map(UserId::new)
    }
}

/// This trait is here to keep the policy engine independent of the idiosyncracies of user
/// representation details, as well as to make explicit what functionality a
/// user-representation must have.
pub trait UnixUser {
    fn try_as_name(&self) -> Option<&str> {
        None
    }
    fn has_name(&self, _name: &str) -> bool {
        false
    }
    fn has_uid(&self, _uid: UserId) -> bool {
        false
    }
    fn is_root(&self) -> bool {
        false
    }
    fn in_group_by_name(&self, _name: &str) -> bool {
        false
    }
    fn in_group_by_gid(&self, _gid: GroupId) -> bool {
        false
    }
}

pub trait UnixGroup {
    fn as_gid(&self) -> GroupId;
    fn try_as_name(&self) -> Option<&str>;
}

impl UnixUser for super::User {
    fn try_as_name(&self) -> Option<&str> {
        Some(&self.name)
    }
    fn has_name(&self, name: &str) -> bool {
        self.name == name
    }
    fn has_uid(&self, uid: UserId) -> bool {
        self.uid == uid
    }
    fn is_root(&self) -> bool {
        self.has_uid(UserId::ROOT)
    }
    fn in_group_by_name(&self, name: &str) -> bool {
        if let Ok(Some(group)) = super::Group::from_name(name) {
            self.in_group_by_gid(group.gid)
        } else {
            false
        }
    }
    fn in_group_by_gid(&self, gid: GroupId) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }
}

impl UnixGroup for super::Group {
    fn as_gid(&self) -> GroupId {
        self.gid
    }
    fn try_as_name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

/// Netgroup membership (`+netgroup` in a user or host list) is answered by the embedding
/// application, typically through `innetgr(3)`.
pub trait Netgroups {
    fn innetgr(&self, netgroup: &str, host: Option<&str>, user: Option<&str>) -> bool;
}

/// The addresses configured on the local network interfaces, used to match network and
/// CIDR entries in a host list.
pub trait NetworkInterfaces {
    fn local_addresses(&self) -> Vec<IpAddr>;
}

/// A system with no netgroups and no network interfaces.
impl Netgroups for () {
    fn innetgr(&self, _netgroup: &str, _host: Option<&str>, _user: Option<&str>) -> bool {
        false
    }
}

impl NetworkInterfaces for () {
    fn local_addresses(&self) -> Vec<IpAddr> {
        Vec::new()
    }
}
