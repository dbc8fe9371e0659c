#![forbid(unsafe_code)]

//! Code that checks permissions against a sudoers policy

pub mod alias;
pub mod ast;
mod digest;
mod json;
mod policy;

use std::cell::Cell;
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::path::Path;
use std::slice;

use crate::defaults::{self, ListMode, SettingKind, SettingsModifier};
use crate::log::auth_warn;
use crate::system::interface::{GroupId, Netgroups, NetworkInterfaces, UnixGroup, UnixUser, UserId};
use crate::system::time::TimeSpec;
use crate::system::Hostname;
use alias::{AliasError, AliasTable};
use ast::*;

pub use digest::compute as compute_digest;
pub use policy::{Authentication, Authorization, Restrictions};

pub type Settings = defaults::Settings;

#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    Syntax(String),
    DuplicateAlias(String),
    CyclicAlias(String),
    UnknownAlias(String),
    MalformedDigest(String),
    InvalidPattern(String),
    UnknownDefault(String),
    InvalidDefault { var: String, reason: &'static str },
}

/// A problem found while loading a policy; loading fails if there is at least one.
#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    pub location: Option<Location>,
    pub kind: ErrorKind,
}

impl Error {
    fn new(location: &Option<Location>, kind: ErrorKind) -> Self {
        Error {
            location: location.clone(),
            kind,
        }
    }
}

impl From<AliasError> for ErrorKind {
    fn from(err: AliasError) -> Self {
        match err {
            AliasError::Duplicate(name) => ErrorKind::DuplicateAlias(name),
            AliasError::Cyclic(name) => ErrorKind::CyclicAlias(name),
            AliasError::Unknown(name) => ErrorKind::UnknownAlias(name),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Syntax(msg) => write!(f, "{msg}"),
            ErrorKind::DuplicateAlias(name) => write!(f, "multiple occurrences of '{name}'"),
            ErrorKind::CyclicAlias(name) => write!(f, "recursive alias: '{name}'"),
            ErrorKind::UnknownAlias(name) => write!(f, "undefined alias: '{name}'"),
            ErrorKind::MalformedDigest(digest) => write!(f, "malformed digest '{digest}'"),
            ErrorKind::InvalidPattern(pattern) => write!(f, "invalid pattern '{pattern}'"),
            ErrorKind::UnknownDefault(var) => write!(f, "unknown setting: '{var}'"),
            ErrorKind::InvalidDefault { var, reason } => write!(f, "'{var}' {reason}"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{location}: {}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl From<Error> for crate::common::Error {
    fn from(err: Error) -> Self {
        crate::common::Error::Configuration(err.to_string())
    }
}

/// A loaded policy. It is immutable after loading and can be shared between threads.
pub struct Sudoers {
    user_specs: Vec<UserSpec>,
    defaults: Vec<Defaults>,
    aliases: AliasTable,
}

/// A structure that represents what the user wants to do
pub struct Request<'a, User: UnixUser, Group: UnixGroup> {
    pub user: &'a User,
    pub host: &'a Hostname,
    /// When only a group was asked for, this is the invoking user.
    pub runas_user: &'a User,
    pub runas_group: Option<&'a Group>,
    pub command: &'a Path,
    pub arguments: &'a [String],
}

/// The parts of the surrounding system that the matcher consults.
pub struct Site<'a> {
    pub netgroups: &'a dyn Netgroups,
    pub interfaces: &'a dyn NetworkInterfaces,
    /// Seconds since the epoch, for `notbefore`/`notafter`.
    pub now: i64,
}

impl Site<'static> {
    /// A system without netgroups or network entries, at the current time.
    pub fn standalone() -> Self {
        Site {
            netgroups: &(),
            interfaces: &(),
            now: TimeSpec::now().map(|now| now.secs()).unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
    Unspec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupFlags {
    /// No user spec matched the invoking user.
    pub no_user: bool,
    /// No privilege of a matching user spec matched the host.
    pub no_host: bool,
    /// The deciding command was denied because its digest did not match.
    pub digest_mismatch: bool,
}

#[derive(Debug, Clone)]
pub struct Evaluation<'a> {
    pub verdict: Verdict,
    pub tags: CmndTag,
    pub cmnd_info: Option<&'a CmndSpec>,
    pub flags: LookupFlags,
    privilege: Option<&'a Privilege>,
}

pub struct Judgement<'a> {
    pub evaluation: Evaluation<'a>,
    pub settings: Settings,
}

impl Sudoers {
    pub fn new(
        aliases: Vec<Alias>,
        defaults: Vec<Defaults>,
        user_specs: Vec<UserSpec>,
    ) -> Result<Sudoers, Vec<Error>> {
        let mut diagnostics = Vec::new();

        let mut table = AliasTable::default();
        for alias in aliases {
            let location = alias.location.clone();
            if let Err(err) = table.define(alias) {
                diagnostics.push(Error::new(&location, err.into()));
            }
        }
        for (alias, err) in table.sanitize() {
            diagnostics.push(Error::new(&alias.location, err.into()));
        }

        let mut checker = Checker {
            aliases: &table,
            diagnostics: &mut diagnostics,
        };
        for alias in table.iter() {
            checker.list(&alias.members, alias.kind, &alias.location, false);
        }
        for entry in &defaults {
            checker.defaults(entry);
        }
        for spec in &user_specs {
            checker.user_spec(spec);
        }

        if diagnostics.is_empty() {
            Ok(Sudoers {
                user_specs,
                defaults,
                aliases: table,
            })
        } else {
            Err(diagnostics)
        }
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Decide whether a request is allowed and compute the settings that apply to it.
    pub fn check<User, Group>(
        &self,
        request: &Request<'_, User, Group>,
        site: &Site<'_>,
    ) -> Judgement<'_>
    where
        User: UnixUser + PartialEq<User>,
        Group: UnixGroup,
    {
        let matcher = Matcher::new(&self.aliases, request, site);

        let mut settings = Settings::default();
        self.apply_defaults(&mut settings, &matcher, Tier::GLOBAL..=Tier::USER);
        let runas_default = settings.runas_default.clone().unwrap_or_default();

        let evaluation = self.lookup(&matcher, &runas_default);

        self.apply_defaults(&mut settings, &matcher, Tier::RUNAS..=Tier::COMMAND);
        if let Some(privilege) = evaluation.privilege {
            apply_tier(&mut settings, privilege.defaults.iter());
        }

        Judgement {
            evaluation,
            settings,
        }
    }

    pub fn evaluate<User, Group>(
        &self,
        request: &Request<'_, User, Group>,
        site: &Site<'_>,
    ) -> Evaluation<'_>
    where
        User: UnixUser + PartialEq<User>,
        Group: UnixGroup,
    {
        self.check(request, site).evaluation
    }

    /// Only the Defaults resolution of [Sudoers::check].
    pub fn settings<User, Group>(&self, request: &Request<'_, User, Group>, site: &Site<'_>) -> Settings
    where
        User: UnixUser + PartialEq<User>,
        Group: UnixGroup,
    {
        self.check(request, site).settings
    }

    /// Note that in sudoers, later permissions override earlier restrictions: every level is
    /// scanned front to back and a later match replaces an earlier one.
    fn lookup<'s, User, Group>(
        &'s self,
        matcher: &Matcher<'_, User, Group>,
        runas_default: &str,
    ) -> Evaluation<'s>
    where
        User: UnixUser + PartialEq<User>,
        Group: UnixGroup,
    {
        let mut evaluation = Evaluation {
            verdict: Verdict::Unspec,
            tags: CmndTag::default(),
            cmnd_info: None,
            flags: LookupFlags {
                no_user: true,
                no_host: true,
                digest_mismatch: false,
            },
            privilege: None,
        };

        for spec in &self.user_specs {
            if matcher.users(&spec.users) != Some(true) {
                continue;
            }
            evaluation.flags.no_user = false;

            for privilege in &spec.privileges {
                // an explicitly excluded host skips the privilege just like an unlisted one
                if matcher.hosts(&privilege.hosts) != Some(true) {
                    continue;
                }
                evaluation.flags.no_host = false;

                for (tags, cmnd) in distribute_tags(&privilege.commands) {
                    if !cmnd.in_window(matcher.site.now) {
                        continue;
                    }
                    if matcher.runas(cmnd, runas_default) != Some(true) {
                        continue;
                    }

                    let (found, digest_mismatch) = matcher.commands(slice::from_ref(&cmnd.command));
                    let Some(allowed) = found else {
                        continue;
                    };

                    evaluation = Evaluation {
                        verdict: if allowed { Verdict::Allow } else { Verdict::Deny },
                        tags,
                        cmnd_info: Some(cmnd),
                        flags: LookupFlags {
                            digest_mismatch,
                            ..evaluation.flags
                        },
                        privilege: Some(privilege),
                    };
                }
            }
        }

        evaluation
    }

    fn apply_defaults<User, Group>(
        &self,
        settings: &mut Settings,
        matcher: &Matcher<'_, User, Group>,
        tiers: RangeInclusive<u8>,
    ) where
        User: UnixUser + PartialEq<User>,
        Group: UnixGroup,
    {
        for tier in tiers {
            let applicable = self
                .defaults
                .iter()
                .filter(|entry| entry.binding.tier() == tier && matcher.binding(&entry.binding));
            apply_tier(settings, applicable);
        }
    }

    /// Aliases that no evaluation has looked at so far.
    pub fn unused_aliases(&self) -> impl Iterator<Item = &Alias> {
        self.aliases.unused()
    }
}

struct Tier;

impl Tier {
    const GLOBAL: u8 = 0;
    const USER: u8 = 2;
    const RUNAS: u8 = 3;
    const COMMAND: u8 = 4;
}

/// Within one tier Defaults lines accumulate in order; the first line of a tier that touches a
/// setting starts over from its built-in value, so a tier replaces what earlier tiers did.
fn apply_tier<'a>(settings: &mut Settings, entries: impl Iterator<Item = &'a Defaults>) {
    let mut touched = HashSet::new();
    for entry in entries {
        if touched.insert(entry.var.as_str()) {
            if let Some(reset) = defaults::reset(&entry.var) {
                reset(settings);
            }
        }
        if let Ok(modify) = modifier(entry) {
            modify(settings);
        }
    }
}

/// Translate a Defaults line into a change to the settings.
fn modifier(entry: &Defaults) -> Result<SettingsModifier, ErrorKind> {
    let invalid = |reason| ErrorKind::InvalidDefault {
        var: entry.var.clone(),
        reason,
    };
    let words = |text: &str| text.split_whitespace().map(str::to_string).collect();

    let kind =
        defaults::set(&entry.var).ok_or_else(|| ErrorKind::UnknownDefault(entry.var.clone()))?;

    match (entry.op, kind, entry.val.as_deref()) {
        (DefaultsOp::Set(false), _, None) => {
            defaults::negate(&entry.var).ok_or_else(|| invalid("cannot be negated"))
        }
        (DefaultsOp::Set(true), SettingKind::Flag(set), None) => Ok(set),
        (DefaultsOp::Set(true), SettingKind::Integer(set) | SettingKind::Text(set), Some(value)) => {
            set(value).ok_or_else(|| invalid("has an invalid value"))
        }
        (DefaultsOp::Set(true), SettingKind::List(set), Some(value)) => {
            set(ListMode::Set, words(value)).ok_or_else(|| invalid("has an invalid value"))
        }
        (DefaultsOp::Add, SettingKind::List(set), Some(value)) => {
            set(ListMode::Add, words(value)).ok_or_else(|| invalid("has an invalid value"))
        }
        (DefaultsOp::Remove, SettingKind::List(set), Some(value)) => {
            set(ListMode::Del, words(value)).ok_or_else(|| invalid("has an invalid value"))
        }
        (_, _, None) => Err(invalid("requires a value")),
        (_, _, Some(_)) => Err(invalid("does not support this operation")),
    }
}

/// Process the commands of one privilege: tags accumulate over the entire line
fn distribute_tags(commands: &[CmndSpec]) -> impl Iterator<Item = (CmndTag, &CmndSpec)> {
    commands.iter().scan(CmndTag::default(), |tag, cmnd| {
        *tag = cmnd.tags.inherit(tag);

        let mut this_tag = *tag;
        if cmnd.command == Member::All && this_tag.setenv.is_none() {
            // "ALL" has an implicit "SETENV" that doesn't distribute
            this_tag.setenv = Some(true);
        }

        Some((this_tag, cmnd))
    })
}

/// Load-time validation of everything that evaluation relies on.
struct Checker<'a> {
    aliases: &'a AliasTable,
    diagnostics: &'a mut Vec<Error>,
}

impl Checker<'_> {
    fn list(&mut self, list: &[Member], kind: AliasKind, location: &Option<Location>, refs: bool) {
        for member in list {
            let (_, member) = alias::strip_negations(member, false);
            match member {
                Member::Alias(name) if refs && !self.aliases.contains(name, kind) => self
                    .diagnostics
                    .push(Error::new(location, ErrorKind::UnknownAlias(name.clone()))),
                Member::Command(command) => {
                    if glob::Pattern::new(&command.path).is_err() {
                        self.diagnostics.push(Error::new(
                            location,
                            ErrorKind::InvalidPattern(command.path.clone()),
                        ));
                    }
                    for digest in &command.digests {
                        if digest.decode().is_none() {
                            self.diagnostics.push(Error::new(
                                location,
                                ErrorKind::MalformedDigest(format!(
                                    "{}:{}",
                                    digest.algorithm.name(),
                                    digest.value
                                )),
                            ));
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn defaults(&mut self, entry: &Defaults) {
        if let Err(kind) = modifier(entry) {
            self.diagnostics.push(Error::new(&entry.location, kind));
        }

        let (list, kind) = match &entry.binding {
            Binding::Global => return,
            Binding::Host(list) => (list, AliasKind::Host),
            Binding::User(list) => (list, AliasKind::User),
            Binding::RunAs(list) => (list, AliasKind::RunAs),
            Binding::Command(list) => (list, AliasKind::Command),
        };
        self.list(list, kind, &entry.location, true);
    }

    fn user_spec(&mut self, spec: &UserSpec) {
        let location = &spec.location;
        self.list(&spec.users, AliasKind::User, location, true);

        for privilege in &spec.privileges {
            self.list(&privilege.hosts, AliasKind::Host, location, true);
            for cmnd in &privilege.commands {
                for runas in [&cmnd.runas_users, &cmnd.runas_groups].into_iter().flatten() {
                    self.list(runas, AliasKind::RunAs, location, true);
                }
                self.list(slice::from_ref(&cmnd.command), AliasKind::Command, location, true);
            }
            for entry in &privilege.defaults {
                if let Err(kind) = modifier(entry) {
                    let location = entry.location.as_ref().or(location.as_ref()).cloned();
                    self.diagnostics.push(Error { location, kind });
                }
            }
        }
    }
}

/// Everything needed to decide whether a member of a list applies to a request.
struct Matcher<'a, User: UnixUser, Group: UnixGroup> {
    aliases: &'a AliasTable,
    request: &'a Request<'a, User, Group>,
    site: &'a Site<'a>,
    addresses: Vec<IpAddr>,
}

impl<'a, User, Group> Matcher<'a, User, Group>
where
    User: UnixUser + PartialEq<User>,
    Group: UnixGroup,
{
    fn new(aliases: &'a AliasTable, request: &'a Request<'a, User, Group>, site: &'a Site<'a>) -> Self {
        Matcher {
            aliases,
            request,
            site,
            addresses: site.interfaces.local_addresses(),
        }
    }

    /// Find the last member of a list that says something about the request; `Some(true)` if
    /// it affirms, `Some(false)` if it denies, `None` if no member applies. Negation inverts one
    /// member, and an alias evaluates to the verdict of its own members.
    fn find_member(
        &self,
        list: &[Member],
        kind: AliasKind,
        matches: &dyn Fn(&Member) -> bool,
    ) -> Option<bool> {
        let mut result = None;
        for member in list {
            let (negated, member) = alias::strip_negations(member, false);
            let found = match member {
                Member::All => Some(true),
                Member::Alias(name) => self
                    .aliases
                    .resolve(name, kind)
                    .and_then(|alias| self.find_member(&alias.members, kind, matches)),
                member => matches(member).then_some(true),
            };
            if let Some(judgement) = found {
                result = Some(judgement != negated);
            }
        }

        result
    }

    fn users(&self, list: &[Member]) -> Option<bool> {
        self.find_member(list, AliasKind::User, &|member| {
            self.match_user(self.request.user, member)
        })
    }

    fn hosts(&self, list: &[Member]) -> Option<bool> {
        self.find_member(list, AliasKind::Host, &|member| self.match_host(member))
    }

    fn runas_users(&self, list: &[Member]) -> Option<bool> {
        self.find_member(list, AliasKind::RunAs, &|member| {
            self.match_user(self.request.runas_user, member)
        })
    }

    /// Also reports whether a command was rejected because of its digest; such a command
    /// counts as an explicit denial.
    fn commands(&self, list: &[Member]) -> (Option<bool>, bool) {
        let digest_mismatch = Cell::new(false);
        let found = self.find_member(list, AliasKind::Command, &|member| {
            self.match_command(member, &digest_mismatch)
        });

        if digest_mismatch.get() {
            (Some(false), true)
        } else {
            (found, false)
        }
    }

    /// The runas user and group are matched independently: an absent user list only allows
    /// the default runas user, an absent group list only allows no group or one the runas
    /// user is a member of.
    fn runas(&self, cmnd: &CmndSpec, runas_default: &str) -> Option<bool> {
        let request = self.request;

        let mut user_matched = match (&cmnd.runas_users, &cmnd.runas_groups) {
            (Some(users), _) => self.runas_users(users),
            (None, None) => request.runas_user.has_name(runas_default).then_some(true),
            (None, Some(_)) => None,
        };

        let Some(group) = request.runas_group else {
            return user_matched;
        };

        // only changing the group
        if user_matched.is_none() && request.runas_user == request.user {
            user_matched = Some(true);
        }

        let mut group_matched = cmnd.runas_groups.as_deref().and_then(|groups| {
            self.find_member(groups, AliasKind::RunAs, &|member| match_group(group, member))
        });
        if group_matched.is_none() && request.runas_user.in_group_by_gid(group.as_gid()) {
            group_matched = Some(true);
        }

        match (user_matched, group_matched) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (user, group) if user == group => user,
            _ => None,
        }
    }

    fn binding(&self, binding: &Binding) -> bool {
        let found = match binding {
            Binding::Global => Some(true),
            Binding::Host(list) => self.hosts(list),
            Binding::User(list) => self.users(list),
            Binding::RunAs(list) => self.runas_users(list),
            Binding::Command(list) => self.commands(list).0,
        };

        found == Some(true)
    }

    fn match_user(&self, user: &User, member: &Member) -> bool {
        match member {
            Member::Word(name) => match_identifier(user, name),
            Member::UserGroup(group) => match group.strip_prefix('#') {
                Some(gid) => gid
                    .parse::<GroupId>()
                    .is_ok_and(|gid| user.in_group_by_gid(gid)),
                None => user.in_group_by_name(group),
            },
            Member::NetGroup(netgroup) => user
                .try_as_name()
                .is_some_and(|name| self.site.netgroups.innetgr(netgroup, None, Some(name))),
            _ => false,
        }
    }

    fn match_host(&self, member: &Member) -> bool {
        let host = self.request.host;
        match member {
            Member::Word(pattern) => match_hostname(host, pattern),
            Member::NetGroup(netgroup) => {
                let netgroups = self.site.netgroups;
                netgroups.innetgr(netgroup, Some(&**host), None)
                    || netgroups.innetgr(netgroup, Some(host.short()), None)
            }
            Member::Network(network) => self.addresses.iter().any(|addr| network.contains(addr)),
            _ => false,
        }
    }

    fn match_command(&self, member: &Member, digest_mismatch: &Cell<bool>) -> bool {
        let Member::Command(command) = member else {
            return false;
        };
        let path = self.request.command;

        if !path.is_absolute()
            || !match_command_path(&command.path, path)
            || !command.args_match(self.request.arguments)
        {
            return false;
        }

        if command.digests.is_empty() || digest::file_matches(path, &command.digests) {
            true
        } else {
            auth_warn!("digest for {} does not match", path.display());
            digest_mismatch.set(true);
            false
        }
    }
}

/// A user is identified by name, or by `#uid`
fn match_identifier(user: &impl UnixUser, ident: &str) -> bool {
    match ident.strip_prefix('#') {
        Some(uid) => uid.parse::<UserId>().is_ok_and(|uid| user.has_uid(uid)),
        None => user.has_name(ident),
    }
}

fn match_group(group: &impl UnixGroup, member: &Member) -> bool {
    let Member::Word(ident) = member else {
        return false;
    };
    match ident.strip_prefix('#') {
        Some(gid) => gid.parse::<GroupId>().is_ok_and(|gid| group.as_gid() == gid),
        None => group.try_as_name() == Some(ident.as_str()),
    }
}

/// Host names are compared without regard to case; a pattern containing a dot is compared
/// against the fully qualified name, otherwise against the short name.
fn match_hostname(host: &Hostname, pattern: &str) -> bool {
    let name = if pattern.contains('.') {
        &**host
    } else {
        host.short()
    };

    if pattern.contains(['*', '?', '[']) {
        let opts = glob::MatchOptions {
            case_sensitive: false,
            ..glob::MatchOptions::new()
        };
        glob::Pattern::new(pattern).is_ok_and(|pattern| pattern.matches_with(name, opts))
    } else {
        name.eq_ignore_ascii_case(pattern)
    }
}

/// A pattern ending in `/` allows every command directly inside that directory.
fn match_command_path(pattern: &str, path: &Path) -> bool {
    if pattern.ends_with('/') {
        return path.parent().is_some_and(|dir| dir == Path::new(pattern));
    }

    let opts = glob::MatchOptions {
        require_literal_separator: true,
        ..glob::MatchOptions::new()
    };
    glob::Pattern::new(pattern).is_ok_and(|pattern| pattern.matches_path_with(path, opts))
}

#[cfg(test)]
mod test;
