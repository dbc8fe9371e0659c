use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;

use super::*;
use pretty_assertions::assert_eq;

#[derive(PartialEq)]
struct Named(&'static str);

fn dummy_cksum(name: &str) -> u32 {
    if name == "root" {
        0
    } else {
        1000 + name.chars().fold(0, |x, y| (x * 97 + y as u32) % 1361)
    }
}

impl UnixUser for Named {
    fn try_as_name(&self) -> Option<&str> {
        Some(self.0)
    }

    fn has_name(&self, name: &str) -> bool {
        self.0 == name
    }

    fn has_uid(&self, uid: UserId) -> bool {
        UserId::new(dummy_cksum(self.0)) == uid
    }

    fn in_group_by_name(&self, name: &str) -> bool {
        self.has_name(name)
    }

    fn in_group_by_gid(&self, gid: GroupId) -> bool {
        GroupId::new(dummy_cksum(self.0)) == gid
    }

    fn is_root(&self) -> bool {
        self.0 == "root"
    }
}

impl UnixGroup for Named {
    fn as_gid(&self) -> GroupId {
        GroupId::new(dummy_cksum(self.0))
    }
    fn try_as_name(&self) -> Option<&str> {
        Some(self.0)
    }
}

struct FakeSite;

impl Netgroups for FakeSite {
    fn innetgr(&self, netgroup: &str, host: Option<&str>, user: Option<&str>) -> bool {
        match netgroup {
            "admins" => user == Some("user"),
            "servers" => host == Some("server"),
            _ => false,
        }
    }
}

impl NetworkInterfaces for FakeSite {
    fn local_addresses(&self) -> Vec<IpAddr> {
        vec!["192.168.1.10".parse().unwrap(), "fe80::1".parse().unwrap()]
    }
}

const NOW: i64 = 1_700_000_000;

fn site() -> Site<'static> {
    Site {
        netgroups: &FakeSite,
        interfaces: &FakeSite,
        now: NOW,
    }
}

/// Split a list at commas that are not inside parentheses.
fn split_list(text: &str) -> Vec<&str> {
    let mut items = Vec::new();
    let mut depth = 0;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                items.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    items.push(text[start..].trim());
    items.retain(|item| !item.is_empty());

    items
}

/// A shorthand for the members a sudoers front-end would produce.
fn member(item: &str) -> Member {
    if let Some(rest) = item.strip_prefix('!') {
        return member(rest.trim_start()).negate();
    }
    if item == "ALL" {
        return Member::All;
    }
    if let Some(group) = item.strip_prefix('%') {
        return Member::UserGroup(group.to_string());
    }
    if let Some(netgroup) = item.strip_prefix('+') {
        return Member::NetGroup(netgroup.to_string());
    }
    if item.starts_with('/') {
        let mut words = item.split_whitespace();
        let command = Command::new(words.next().unwrap());
        let args: Vec<&str> = words.map(|w| if w == "\"\"" { "" } else { w }).collect();
        return Member::Command(if args.is_empty() {
            command
        } else {
            command.with_args(&args)
        });
    }
    if let Ok(network) = item.parse() {
        return Member::Network(network);
    }
    if item.starts_with(|c: char| c.is_ascii_uppercase())
        && item
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    {
        return Member::Alias(item.to_string());
    }

    Member::word(item)
}

fn members(text: &str) -> Vec<Member> {
    split_list(text).into_iter().map(member).collect()
}

fn runas(text: &str) -> (Option<Vec<Member>>, Option<Vec<Member>>) {
    let list = |text: &str| Some(members(text)).filter(|list| !list.is_empty());
    match text.split_once(':') {
        Some((users, groups)) => (list(users), list(groups)),
        None => (list(text), None),
    }
}

fn tag(tags: &mut CmndTag, name: &str) {
    match name {
        "NOPASSWD" => tags.nopasswd = Some(true),
        "PASSWD" => tags.nopasswd = Some(false),
        "NOEXEC" => tags.noexec = Some(true),
        "EXEC" => tags.noexec = Some(false),
        "SETENV" => tags.setenv = Some(true),
        "NOSETENV" => tags.setenv = Some(false),
        "LOG_INPUT" => tags.log_input = Some(true),
        "LOG_OUTPUT" => tags.log_output = Some(true),
        "NOLOG_OUTPUT" => tags.log_output = Some(false),
        "MAIL" => tags.send_mail = Some(true),
        _ => panic!("unknown tag {name}"),
    }
}

/// `users hosts = (runas) TAG: command, ...`
fn user_spec(line: &str) -> UserSpec {
    let (who, what) = line.split_once('=').unwrap();
    let mut who = who.split_whitespace();
    let users = members(who.next().unwrap());
    let hosts = members(who.next().unwrap());

    let mut current_runas = (None, None);
    let mut commands = Vec::new();
    for item in split_list(what) {
        let mut rest = item;
        if rest.starts_with('(') {
            let end = rest.find(')').unwrap();
            current_runas = runas(&rest[1..end]);
            rest = rest[end + 1..].trim_start();
        }

        let mut tags = CmndTag::default();
        while let Some((word, tail)) = rest.split_once(char::is_whitespace) {
            let Some(name) = word.strip_suffix(':') else {
                break;
            };
            tag(&mut tags, name);
            rest = tail.trim_start();
        }

        commands.push(CmndSpec {
            runas_users: current_runas.0.clone(),
            runas_groups: current_runas.1.clone(),
            tags,
            ..CmndSpec::new(member(rest))
        });
    }

    UserSpec {
        users,
        privileges: vec![Privilege {
            hosts,
            commands,
            defaults: Vec::new(),
        }],
        location: None,
    }
}

/// `Defaults[@:>!list] setting`
fn defaults_line(line: &str) -> Defaults {
    let rest = line.strip_prefix("Defaults").unwrap();
    let (binding, setting) = match rest.chars().next() {
        Some(c @ ('@' | ':' | '>' | '!')) => {
            let (list, setting) = rest[1..].split_once(' ').unwrap();
            let list = members(list);
            let binding = match c {
                '@' => Binding::Host(list),
                ':' => Binding::User(list),
                '>' => Binding::RunAs(list),
                _ => Binding::Command(list),
            };
            (binding, setting.trim())
        }
        _ => (Binding::Global, rest.trim()),
    };

    let value = |text: &str| Some(text.trim_matches('"').to_string());
    let (var, val, op) = if let Some(var) = setting.strip_prefix('!') {
        (var, None, DefaultsOp::Set(false))
    } else if let Some((var, val)) = setting.split_once("+=") {
        (var, value(val), DefaultsOp::Add)
    } else if let Some((var, val)) = setting.split_once("-=") {
        (var, value(val), DefaultsOp::Remove)
    } else if let Some((var, val)) = setting.split_once('=') {
        (var, value(val), DefaultsOp::Set(true))
    } else {
        (setting, None, DefaultsOp::Set(true))
    };

    Defaults {
        var: var.to_string(),
        val,
        op,
        binding,
        location: None,
    }
}

fn try_policy(lines: &[&str]) -> Result<Sudoers, Vec<Error>> {
    let mut aliases = Vec::new();
    let mut defaults = Vec::new();
    let mut specs = Vec::new();

    for line in lines {
        let kind = [
            ("User_Alias ", AliasKind::User),
            ("Host_Alias ", AliasKind::Host),
            ("Runas_Alias ", AliasKind::RunAs),
            ("Cmnd_Alias ", AliasKind::Command),
        ]
        .into_iter()
        .find_map(|(prefix, kind)| Some((line.strip_prefix(prefix)?, kind)));

        if let Some((definition, kind)) = kind {
            let (name, list) = definition.split_once('=').unwrap();
            aliases.push(Alias {
                name: name.trim().to_string(),
                kind,
                members: members(list),
                location: None,
            });
        } else if line.starts_with("Defaults") {
            defaults.push(defaults_line(line));
        } else {
            specs.push(user_spec(line));
        }
    }

    Sudoers::new(aliases, defaults, specs)
}

fn policy(lines: &[&str]) -> Sudoers {
    try_policy(lines).unwrap()
}

fn judge<'a>(
    sudoers: &'a Sudoers,
    user: &'static str,
    (runas_user, runas_group): (&'static str, Option<&'static str>),
    host: &str,
    cmdline: &str,
) -> Judgement<'a> {
    let mut words = cmdline.split_whitespace().map(String::from);
    let command = PathBuf::from(words.next().unwrap());
    let arguments: Vec<String> = words.collect();
    let runas_group = runas_group.map(Named);

    let request = Request {
        user: &Named(user),
        host: &Hostname::new(host),
        runas_user: &Named(runas_user),
        runas_group: runas_group.as_ref(),
        command: &command,
        arguments: &arguments,
    };

    sudoers.check(&request, &site())
}

fn root() -> (&'static str, Option<&'static str>) {
    ("root", None)
}

macro_rules! request {
    ($user:ident) => {
        (stringify!($user), None)
    };
    ($user:ident, $group:ident) => {
        (stringify!($user), Some(stringify!($group)))
    };
}

macro_rules! pass {
    ([$($line:expr),*], $user:expr => $req:expr, $server:expr; $command:expr $(=> [$($key:ident : $val:expr),*])?) => {
        let sudoers = policy(&[$($line),*]);
        let judgement = judge(&sudoers, $user, $req, $server, $command);
        assert_eq!(judgement.evaluation.verdict, Verdict::Allow, "{:?}", [$($line),*]);
        $($(assert_eq!(judgement.evaluation.tags.$key, $val);)*)?
    };
}

macro_rules! FAIL {
    ([$($line:expr),*], $user:expr => $req:expr, $server:expr; $command:expr) => {
        let sudoers = policy(&[$($line),*]);
        let judgement = judge(&sudoers, $user, $req, $server, $command);
        assert_ne!(judgement.evaluation.verdict, Verdict::Allow, "{:?}", [$($line),*]);
    };
}

#[test]
fn permission_test() {
    FAIL!(["user ALL=(ALL:ALL) ALL"], "nobody"    => root(), "server"; "/bin/hello");
    pass!(["user ALL=(ALL:ALL) ALL"], "user"      => root(), "server"; "/bin/hello");
    pass!(["user ALL=(ALL:ALL) /bin/foo"], "user" => root(), "server"; "/bin/foo" => [nopasswd: None]);
    FAIL!(["user ALL=(ALL:ALL) /bin/foo"], "user" => root(), "server"; "/bin/hello");
    pass!(["user ALL=(ALL:ALL) PASSWD: /bin/foo"], "user" => root(), "server"; "/bin/foo" => [nopasswd: Some(false)]);
    pass!(["user ALL=(ALL:ALL) NOPASSWD: PASSWD: /bin/foo"], "user" => root(), "server"; "/bin/foo" => [nopasswd: Some(false)]);
    pass!(["user ALL=(ALL:ALL) PASSWD: NOPASSWD: /bin/foo"], "user" => root(), "server"; "/bin/foo" => [nopasswd: Some(true)]);
    pass!(["user ALL=(ALL:ALL) /bin/foo, NOPASSWD: /bin/bar"], "user" => root(), "server"; "/bin/foo" => [nopasswd: None]);
    pass!(["user ALL=(ALL:ALL) /bin/foo, NOPASSWD: /bin/bar"], "user" => root(), "server"; "/bin/bar" => [nopasswd: Some(true)]);
    pass!(["user ALL=(ALL:ALL) NOPASSWD: /bin/foo, /bin/bar"], "user" => root(), "server"; "/bin/bar" => [nopasswd: Some(true)]);

    pass!(["user server=(ALL:ALL) ALL"], "user" => root(), "server"; "/bin/hello");
    FAIL!(["user laptop=(ALL:ALL) ALL"], "user" => root(), "server"; "/bin/hello");

    pass!(["user ALL=!/bin/hello", "user ALL=/bin/hello"], "user" => root(), "server"; "/bin/hello");
    FAIL!(["user ALL=/bin/hello", "user ALL=!/bin/hello"], "user" => root(), "server"; "/bin/hello");

    for alias in [
        "User_Alias GROUP=user1, user2",
        "User_Alias GROUP=ALL,!user3",
    ] {
        pass!([alias,"GROUP ALL=/bin/hello"], "user1" => root(), "server"; "/bin/hello");
        pass!([alias,"GROUP ALL=/bin/hello"], "user2" => root(), "server"; "/bin/hello");
        FAIL!([alias,"GROUP ALL=/bin/hello"], "user3" => root(), "server"; "/bin/hello");
    }

    pass!(["user ALL=/bin/hello arg"], "user" => root(), "server"; "/bin/hello arg");
    FAIL!(["user ALL=/bin/hello arg"], "user" => root(), "server"; "/bin/hello boo");
    FAIL!(["user ALL=/bin/hello arg"], "user" => root(), "server"; "/bin/hello");
    pass!(["user ALL=/bin/hello"], "user" => root(), "server"; "/bin/hello boo");
    FAIL!(["user ALL=/bin/hello \"\""], "user" => root(), "server"; "/bin/hello boo");
    pass!(["user ALL=/bin/hello \"\""], "user" => root(), "server"; "/bin/hello");
    pass!(["user ALL=/bin/hel*"], "user" => root(), "server"; "/bin/hello");
    pass!(["user ALL=/bin/hel*"], "user" => root(), "server"; "/bin/help me");
    FAIL!(["user ALL=/bin/hel* me"], "user" => root(), "server"; "/bin/help");
    pass!(["user ALL=/bin/hel* me"], "user" => root(), "server"; "/bin/help me");
    FAIL!(["user ALL=/bin/hel* me"], "user" => root(), "server"; "/bin/help me please");
    FAIL!(["user ALL=/bin/*"], "user" => root(), "server"; "/bin/sub/ls");
    FAIL!(["user ALL=/bin/ls"], "user" => root(), "server"; "ls");

    pass!(["user ALL=/usr/bin/"], "user" => root(), "server"; "/usr/bin/id -u");
    FAIL!(["user ALL=/usr/bin/"], "user" => root(), "server"; "/usr/bin/x/id");
    FAIL!(["user ALL=/usr/bin/"], "user" => root(), "server"; "/usr/sbin/id");

    assert_eq!(Named("user").as_gid(), GroupId::new(1466));
    pass!(["#1466 server=(ALL:ALL) ALL"], "user" => root(), "server"; "/bin/hello");
    pass!(["%#1466 server=(ALL:ALL) ALL"], "user" => root(), "server"; "/bin/hello");
    pass!(["%user server=(ALL:ALL) ALL"], "user" => root(), "server"; "/bin/hello");
    FAIL!(["#1466 server=(ALL:ALL) ALL"], "root" => root(), "server"; "/bin/hello");
    FAIL!(["%#1466 server=(ALL:ALL) ALL"], "root" => root(), "server"; "/bin/hello");
    pass!(["#1466,#1234,foo server=(ALL:ALL) ALL"], "user" => root(), "server"; "/bin/hello");
    pass!(["foo,#1234,#1466 server=(ALL:ALL) ALL"], "user" => root(), "server"; "/bin/hello");
    FAIL!(["foo,#1234,#1366 server=(ALL:ALL) ALL"], "user" => root(), "server"; "/bin/hello");
    pass!(["+admins ALL=ALL"], "user" => root(), "server"; "/bin/hello");
    FAIL!(["+admins ALL=ALL"], "other" => root(), "server"; "/bin/hello");
}

#[test]
fn runas_test() {
    pass!(["user ALL=(ALL:#1466) /bin/foo"], "user" => request! { root, root }, "server"; "/bin/foo");
    FAIL!(["user ALL=(ALL:#1466) /bin/foo"], "user" => request! { root, other }, "server"; "/bin/foo");
    pass!(["user ALL=(ALL:#1466) /bin/foo"], "user" => request! { root, user }, "server"; "/bin/foo");
    pass!(["user ALL=(root,user:ALL) /bin/foo"], "user" => request! { root, wheel }, "server"; "/bin/foo");
    pass!(["user ALL=(root,user:ALL) /bin/foo"], "user" => request! { user, wheel }, "server"; "/bin/foo");
    FAIL!(["user ALL=(root,user:ALL) /bin/foo"], "user" => request! { sudo, wheel }, "server"; "/bin/foo");
    FAIL!(["user ALL=(#0:wheel) /bin/foo"], "user" => request! { sudo, wheel }, "server"; "/bin/foo");
    pass!(["user ALL=(#0:wheel) /bin/foo"], "user" => request! { root, root }, "server"; "/bin/foo");
    FAIL!(["user ALL=(%#1466:wheel) /bin/foo"], "user" => request! { root, root }, "server"; "/bin/foo");
    pass!(["user ALL=(%#1466:wheel) /bin/foo"], "user" => request! { user, user }, "server"; "/bin/foo");

    // tests with a 'singular' runas spec
    FAIL!(["user ALL=(ALL) /bin/foo"], "user" => request! { sudo, wheel }, "server"; "/bin/foo");
    pass!(["user ALL=(ALL) /bin/foo"], "user" => request! { sudo, sudo }, "server"; "/bin/foo");
    pass!(["user ALL=(ALL) /bin/foo"], "user" => request! { sudo }, "server"; "/bin/foo");

    // tests without a runas spec: only the default runas user
    FAIL!(["user ALL=/bin/foo"], "user" => request! { sudo }, "server"; "/bin/foo");
    FAIL!(["user ALL=/bin/foo"], "user" => request! { sudo, sudo }, "server"; "/bin/foo");
    FAIL!(["user ALL=/bin/foo"], "user" => request! { root, sudo }, "server"; "/bin/foo");
    pass!(["user ALL=/bin/foo"], "user" => request! { root, root }, "server"; "/bin/foo");
    pass!(["Defaults runas_default=operator", "user ALL=/bin/foo"], "user" => request! { operator }, "server"; "/bin/foo");
    FAIL!(["Defaults runas_default=operator", "user ALL=/bin/foo"], "user" => request! { root }, "server"; "/bin/foo");

    // only -g being passed
    pass!(["user ALL=(sudo:sudo) /bin/foo"], "user" => request! { user, sudo }, "server"; "/bin/foo");

    // tests with multiple runas specs
    pass!(["user ALL=(root) /bin/ls, (sudo) /bin/true"], "user" => request! { root }, "server"; "/bin/ls");
    pass!(["user ALL=(root) NOPASSWD: /bin/ls, (sudo) /bin/true"], "user" => request! { sudo }, "server"; "/bin/true" => [nopasswd: Some(true)]);
    FAIL!(["user ALL=(root) /bin/ls, (sudo) /bin/true"], "user" => request! { sudo }, "server"; "/bin/ls");
    FAIL!(["user ALL=(root) /bin/ls, (sudo) /bin/true"], "user" => request! { root }, "server"; "/bin/true");

    FAIL!(["Runas_Alias TIME=%wheel,!!sudo","user ALL=() ALL"], "user" => request!{ sudo, sudo }, "vm"; "/bin/ls");
    pass!(["Runas_Alias TIME=%wheel,!!sudo","user ALL=(TIME) ALL"], "user" => request! { sudo, sudo }, "vm"; "/bin/ls");
    FAIL!(["Runas_Alias TIME=%wheel,!!sudo","user ALL=(:TIME) ALL"], "user" => request! { sudo, sudo }, "vm"; "/bin/ls");
    pass!(["Runas_Alias TIME=%wheel,!!sudo","user ALL=(:TIME) ALL"], "user" => request! { user, sudo }, "vm"; "/bin/ls");
    pass!(["Runas_Alias TIME=%wheel,!!sudo","user ALL=(TIME) ALL"], "user" => request! { wheel, wheel }, "vm"; "/bin/ls");
}

#[test]
fn alias_test() {
    pass!(["User_Alias FULLTIME=ALL,!marc","FULLTIME ALL=ALL"], "user" => root(), "server"; "/bin/bash");
    FAIL!(["User_Alias FULLTIME=ALL,!marc","FULLTIME ALL=ALL"], "marc" => root(), "server"; "/bin/bash");
    FAIL!(["User_Alias FULLTIME=ALL,!marc","ALL,!FULLTIME ALL=ALL"], "user" => root(), "server"; "/bin/bash");
    pass!(["User_Alias FULLTIME=ALL,!!!marc","ALL,!FULLTIME ALL=ALL"], "marc" => root(), "server"; "/bin/bash");
    pass!(["Host_Alias MACHINE=laptop,server","user MACHINE=ALL"], "user" => root(), "server"; "/bin/bash");
    pass!(["Host_Alias MACHINE=laptop,server","user MACHINE=ALL"], "user" => root(), "laptop"; "/bin/bash");
    FAIL!(["Host_Alias MACHINE=laptop,server","user MACHINE=ALL"], "user" => root(), "desktop"; "/bin/bash");
    pass!(["Cmnd_Alias WHAT=/bin/dd, /bin/rm","user ALL=WHAT"], "user" => root(), "server"; "/bin/rm");
    FAIL!(["Cmnd_Alias WHAT=/bin/dd,/bin/rm","user ALL=WHAT"], "user" => root(), "desktop"; "/bin/bash");

    pass!(["User_Alias A=B","User_Alias B=user","A ALL=ALL"], "user" => root(), "vm"; "/bin/ls");
    pass!(["Host_Alias A=B","Host_Alias B=vm","ALL A=ALL"], "user" => root(), "vm"; "/bin/ls");
    pass!(["Cmnd_Alias A=B","Cmnd_Alias B=/bin/ls","ALL ALL=A"], "user" => root(), "vm"; "/bin/ls");

    // the less-intuitive "substitution-like" alias mechanism
    FAIL!(["User_Alias FOO=!user", "ALL,FOO ALL=ALL"], "user" => root(), "vm"; "/bin/ls");
    pass!(["User_Alias FOO=!user", "!FOO ALL=ALL"], "user" => root(), "vm"; "/bin/ls");

    // aliases of another kind with the same name do not interfere
    pass!(["User_Alias X=user", "Host_Alias X=vm", "X X=ALL"], "user" => root(), "vm"; "/bin/ls");

    let sudoers = policy(&["User_Alias USED=user", "Host_Alias IDLE=vm", "USED ALL=ALL"]);
    let _ = judge(&sudoers, "user", root(), "vm", "/bin/ls");
    let unused: Vec<_> = sudoers.unused_aliases().map(|alias| alias.name.as_str()).collect();
    assert_eq!(unused, vec!["IDLE"]);
}

#[test]
fn host_test() {
    pass!(["user server=ALL"], "user" => root(), "server.example.com"; "/bin/ls");
    pass!(["user Server=ALL"], "user" => root(), "server"; "/bin/ls");
    pass!(["user server.example.com=ALL"], "user" => root(), "server.example.com"; "/bin/ls");
    FAIL!(["user server.example.org=ALL"], "user" => root(), "server.example.com"; "/bin/ls");
    pass!(["user *.example.com=ALL"], "user" => root(), "web1.example.com"; "/bin/ls");
    FAIL!(["user *.example.com=ALL"], "user" => root(), "web1.example.org"; "/bin/ls");
    pass!(["user web?=ALL"], "user" => root(), "web1.example.org"; "/bin/ls");
    pass!(["user +servers=ALL"], "user" => root(), "server.example.com"; "/bin/ls");
    FAIL!(["user +servers=ALL"], "user" => root(), "laptop"; "/bin/ls");
    pass!(["user 192.168.1.0/24=ALL"], "user" => root(), "anything"; "/bin/ls");
    pass!(["user 192.168.1.0/255.255.255.0=ALL"], "user" => root(), "anything"; "/bin/ls");
    pass!(["user 192.168.1.10=ALL"], "user" => root(), "anything"; "/bin/ls");
    FAIL!(["user 10.0.0.0/8=ALL"], "user" => root(), "anything"; "/bin/ls");
    pass!(["user fe80::/10=ALL"], "user" => root(), "anything"; "/bin/ls");

    // an explicitly excluded host skips the privilege
    FAIL!(["user ALL,!server=ALL"], "user" => root(), "server"; "/bin/ls");
    pass!(["user ALL,!server=ALL", "user server=/bin/ls"], "user" => root(), "server"; "/bin/ls");
}

#[test]
fn last_match_wins() {
    // scenario: a later negation wins
    let sudoers = policy(&["user ALL = (ALL) /bin/ls, !/bin/ls"]);
    let judgement = judge(&sudoers, "user", root(), "server", "/bin/ls");
    assert_eq!(judgement.evaluation.verdict, Verdict::Deny);

    let sudoers = policy(&["user ALL = (ALL) !/bin/ls, NOPASSWD: /bin/ls"]);
    let judgement = judge(&sudoers, "user", root(), "server", "/bin/ls");
    assert_eq!(judgement.evaluation.verdict, Verdict::Allow);
    assert_eq!(judgement.evaluation.tags.nopasswd, Some(true));

    // the deciding command spec is reported
    let sudoers = policy(&["user ALL = (ALL) /bin/l*, NOEXEC: /bin/ls, EXEC: /bin/cat"]);
    let judgement = judge(&sudoers, "user", root(), "server", "/bin/ls");
    let cmnd = judgement.evaluation.cmnd_info.unwrap();
    assert_eq!(cmnd.command, member("/bin/ls"));
    assert_eq!(judgement.evaluation.tags.noexec, Some(true));

    // nothing matched at all
    let sudoers = policy(&["user ALL = /bin/cat"]);
    let judgement = judge(&sudoers, "user", root(), "server", "/bin/ls");
    assert_eq!(judgement.evaluation.verdict, Verdict::Unspec);
    assert!(judgement.evaluation.cmnd_info.is_none());
}

#[test]
fn double_negation_cancels() {
    for word in ["user", "!!user", "!!!!user"] {
        let line = format!("{word} ALL=ALL");
        let sudoers = policy(&[&line]);
        let judgement = judge(&sudoers, "user", root(), "server", "/bin/ls");
        assert_eq!(judgement.evaluation.verdict, Verdict::Allow, "{line}");
    }
}

#[test]
fn lookup_flags() {
    let sudoers = policy(&["user laptop=ALL"]);

    let judgement = judge(&sudoers, "other", root(), "server", "/bin/ls");
    assert!(judgement.evaluation.flags.no_user);
    assert!(judgement.evaluation.flags.no_host);

    let judgement = judge(&sudoers, "user", root(), "server", "/bin/ls");
    assert!(!judgement.evaluation.flags.no_user);
    assert!(judgement.evaluation.flags.no_host);

    let judgement = judge(&sudoers, "user", root(), "laptop", "/bin/ls");
    assert!(!judgement.evaluation.flags.no_user);
    assert!(!judgement.evaluation.flags.no_host);
    assert_eq!(judgement.evaluation.verdict, Verdict::Allow);
}

#[test]
fn tags_are_sticky_within_a_privilege() {
    let sudoers = policy(&["user ALL=NOPASSWD: /bin/foo, NOEXEC: /bin/bar, PASSWD: /bin/baz"]);
    let tags = |cmd| judge(&sudoers, "user", root(), "server", cmd).evaluation.tags;

    assert_eq!(tags("/bin/foo").nopasswd, Some(true));
    assert_eq!(tags("/bin/foo").noexec, None);
    assert_eq!(tags("/bin/bar").nopasswd, Some(true));
    assert_eq!(tags("/bin/bar").noexec, Some(true));
    assert_eq!(tags("/bin/baz").nopasswd, Some(false));
    assert_eq!(tags("/bin/baz").noexec, Some(true));

    // "ALL" has an implicit "SETENV" that does not carry over
    let sudoers = policy(&["user ALL=ALL, /bin/foo"]);
    let judgement = judge(&sudoers, "user", root(), "server", "/bin/bar");
    assert_eq!(judgement.evaluation.tags.setenv, Some(true));
    let judgement = judge(&sudoers, "user", root(), "server", "/bin/foo");
    assert_eq!(judgement.evaluation.tags.setenv, None);
    let sudoers = policy(&["user ALL=NOSETENV: ALL"]);
    let judgement = judge(&sudoers, "user", root(), "server", "/bin/bar");
    assert_eq!(judgement.evaluation.tags.setenv, Some(false));
}

#[test]
fn validity_window() {
    let spec = |notbefore, notafter| {
        let mut spec = user_spec("user ALL=/bin/ls");
        let cmnd = &mut spec.privileges[0].commands[0];
        cmnd.notbefore = notbefore;
        cmnd.notafter = notafter;
        Sudoers::new(vec![], vec![], vec![spec]).unwrap()
    };
    let verdict = |sudoers: &Sudoers| judge(sudoers, "user", root(), "server", "/bin/ls").evaluation.verdict;

    assert_eq!(verdict(&spec(Some(NOW - 10), Some(NOW + 10))), Verdict::Allow);
    assert_eq!(verdict(&spec(Some(NOW), None)), Verdict::Allow);
    assert_eq!(verdict(&spec(Some(NOW + 1), None)), Verdict::Unspec);
    assert_eq!(verdict(&spec(None, Some(NOW - 1))), Verdict::Unspec);
}

#[test]
fn digests_are_checked() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"abc").unwrap();
    let path = file.path().to_str().unwrap();

    let sudoers = |digest: &str| {
        let command = Command::new(path).with_digest(DigestAlgorithm::Sha256, digest);
        let mut spec = user_spec("user ALL=ALL");
        spec.privileges[0].commands = vec![CmndSpec::new(Member::Command(command))];
        Sudoers::new(vec![], vec![], vec![spec]).unwrap()
    };

    let good = sudoers("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    let judgement = judge(&good, "user", root(), "server", path);
    assert_eq!(judgement.evaluation.verdict, Verdict::Allow);
    assert!(!judgement.evaluation.flags.digest_mismatch);

    let base64 = sudoers("ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0=");
    let judgement = judge(&base64, "user", root(), "server", path);
    assert_eq!(judgement.evaluation.verdict, Verdict::Allow);

    let bad = sudoers(&"00".repeat(32));
    let judgement = judge(&bad, "user", root(), "server", path);
    assert_eq!(judgement.evaluation.verdict, Verdict::Deny);
    assert!(judgement.evaluation.flags.digest_mismatch);

    let errors = Sudoers::new(vec![], vec![], vec![{
        let command = Command::new(path).with_digest(DigestAlgorithm::Sha256, "not a digest");
        let mut spec = user_spec("user ALL=ALL");
        spec.privileges[0].commands = vec![CmndSpec::new(Member::Command(command))];
        spec
    }])
    .err()
    .unwrap();
    assert!(matches!(errors[0].kind, ErrorKind::MalformedDigest(_)));
}

#[test]
fn load_errors() {
    // scenario: a self-referencing alias
    let errors = try_policy(&["Cmnd_Alias A=A", "ALL ALL=A"]).err().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::CyclicAlias("A".to_string()));

    let errors = try_policy(&["User_Alias A=x", "User_Alias A=y"]).err().unwrap();
    assert_eq!(errors[0].kind, ErrorKind::DuplicateAlias("A".to_string()));

    let errors = try_policy(&["ALL ALL=(OPERATORS) ALL"]).err().unwrap();
    assert_eq!(errors[0].kind, ErrorKind::UnknownAlias("OPERATORS".to_string()));

    // a Host_Alias cannot be used as a Cmnd_Alias
    let errors = try_policy(&["Host_Alias A=vm", "ALL ALL=A"]).err().unwrap();
    assert_eq!(errors[0].kind, ErrorKind::UnknownAlias("A".to_string()));

    for (line, expected) in [
        ("Defaults nosuchthing", ErrorKind::UnknownDefault("nosuchthing".to_string())),
        (
            "Defaults !passwd_tries",
            ErrorKind::InvalidDefault { var: "passwd_tries".to_string(), reason: "cannot be negated" },
        ),
        (
            "Defaults passwd_tries",
            ErrorKind::InvalidDefault { var: "passwd_tries".to_string(), reason: "requires a value" },
        ),
        (
            "Defaults authenticate=yes",
            ErrorKind::InvalidDefault { var: "authenticate".to_string(), reason: "does not support this operation" },
        ),
        (
            "Defaults passwd_tries+=3",
            ErrorKind::InvalidDefault { var: "passwd_tries".to_string(), reason: "does not support this operation" },
        ),
        (
            "Defaults log_format=xml",
            ErrorKind::InvalidDefault { var: "log_format".to_string(), reason: "has an invalid value" },
        ),
        ("Defaults:NOBODY env_reset", ErrorKind::UnknownAlias("NOBODY".to_string())),
    ] {
        let errors = try_policy(&[line]).err().unwrap();
        assert_eq!(errors[0].kind, expected, "{line}");
    }

    let error = Error {
        location: Some(Location {
            file: "/etc/sudoers".to_string(),
            line: 3,
            column: 7,
        }),
        kind: ErrorKind::CyclicAlias("A".to_string()),
    };
    assert_eq!(error.to_string(), "/etc/sudoers:3:7: recursive alias: 'A'");
}

#[test]
fn default_test() {
    let settings = |lines: &[&str], user, runas, host, cmd| {
        let sudoers = policy(lines);
        judge(&sudoers, user, runas, host, cmd).settings
    };

    let def = settings(&["Defaults !env_reset", "Defaults passwd_tries=5"], "user", root(), "server", "/bin/ls");
    assert!(!def.env_reset);
    assert_eq!(def.passwd_tries, 5);

    let lines = [
        "Defaults passwd_tries=5",
        "Defaults@server passwd_tries=7",
        "Defaults:admin passwd_tries=9",
        "Defaults>operator !authenticate",
        "Defaults!/usr/bin/less log_output",
    ];
    let def = settings(&lines, "user", root(), "laptop", "/bin/ls");
    assert_eq!(def.passwd_tries, 5);
    assert!(def.authenticate);
    assert!(!def.log_output);
    let def = settings(&lines, "user", root(), "server", "/bin/ls");
    assert_eq!(def.passwd_tries, 7);
    let def = settings(&lines, "admin", root(), "server", "/bin/ls");
    assert_eq!(def.passwd_tries, 9);
    let def = settings(&lines, "admin", request! { operator }, "server", "/usr/bin/less");
    assert!(!def.authenticate);
    assert!(def.log_output);

    // accumulation within one tier
    let def = settings(
        &["Defaults env_keep=A", "Defaults env_keep+=B", "Defaults env_keep-=A", "Defaults env_keep+=C"],
        "user",
        root(),
        "server",
        "/bin/ls",
    );
    assert_eq!(def.env_keep, vec!["B".to_string(), "C".to_string()]);
}

#[test]
fn later_tiers_replace_earlier_ones() {
    let lines = [
        "Defaults:user env_keep=ONLY",
        "Defaults env_keep+=\"EXTRA ADDED\"",
        "Defaults env_check-=TZ",
    ];

    let sudoers = policy(&lines);
    let def = judge(&sudoers, "user", root(), "server", "/bin/ls").settings;
    assert_eq!(def.env_keep, vec!["ONLY".to_string()]);
    assert!(!def.env_check.contains(&"TZ".to_string()));

    let def = judge(&sudoers, "other", root(), "server", "/bin/ls").settings;
    assert!(def.env_keep.contains(&"EXTRA".to_string()));
    assert!(def.env_keep.contains(&"ADDED".to_string()));
    assert!(def.env_keep.contains(&"PATH".to_string()));

    // a later tier starts from the built-in value, not from what earlier tiers did
    let sudoers = policy(&["Defaults env_keep+=EXTRA", "Defaults:user env_keep+=MORE"]);
    let def = judge(&sudoers, "user", root(), "server", "/bin/ls").settings;
    assert!(def.env_keep.contains(&"MORE".to_string()));
    assert!(def.env_keep.contains(&"PATH".to_string()));
    assert!(!def.env_keep.contains(&"EXTRA".to_string()));
}

#[test]
fn privilege_defaults_apply_to_the_deciding_command() {
    let mut spec = user_spec("user ALL=/bin/ls");
    spec.privileges[0].defaults = vec![defaults_line("Defaults log_input")];
    let mut other = user_spec("user ALL=/bin/cat");
    other.privileges[0].defaults = vec![defaults_line("Defaults !authenticate")];
    let sudoers = Sudoers::new(vec![], vec![defaults_line("Defaults !log_input")], vec![spec, other]).unwrap();

    let def = judge(&sudoers, "user", root(), "server", "/bin/ls").settings;
    assert!(def.log_input);
    assert!(def.authenticate);

    let def = judge(&sudoers, "user", root(), "server", "/bin/cat").settings;
    assert!(!def.log_input);
    assert!(!def.authenticate);
}

#[test]
fn authorization_combines_tags_and_defaults() {
    let sudoers = policy(&["Defaults !authenticate", "Defaults!/bin/ls noexec", "user ALL=/bin/ls, PASSWD: /bin/cat"]);

    let judgement = judge(&sudoers, "user", root(), "server", "/bin/ls");
    let Authorization::Allowed(auth, restrictions) = judgement.authorization() else {
        panic!();
    };
    assert!(!auth.must_authenticate);
    assert!(restrictions.noexec);

    let judgement = judge(&sudoers, "user", root(), "server", "/bin/cat");
    let Authorization::Allowed(auth, restrictions) = judgement.authorization() else {
        panic!();
    };
    assert!(auth.must_authenticate);
    assert!(!restrictions.noexec);

    let judgement = judge(&sudoers, "user", root(), "server", "/bin/sh");
    assert_eq!(judgement.authorization(), Authorization::Forbidden);
}

#[test]
fn policy_is_shareable() {
    fn is_sync<T: Sync + Send>() {}
    is_sync::<Sudoers>();
}
