//! Reading a policy's parse tree from a JSON document:
//!
//! ```json
//! {
//!   "aliases": [{ "name": "ADMINS", "kind": "user", "members": [{ "word": "alice" }] }],
//!   "defaults": [{ "var": "env_reset", "op": { "set": false } }],
//!   "user_specs": [{
//!     "users": [{ "alias": "ADMINS" }],
//!     "privileges": [{ "hosts": ["all"], "commands": [{ "command": "all" }] }]
//!   }]
//! }
//! ```
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;

use serde::Deserialize;

use super::ast::{Alias, Defaults, Location, UserSpec};
use super::{Error, ErrorKind, Sudoers};

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Document {
    #[serde(default)]
    aliases: Vec<Alias>,
    #[serde(default)]
    defaults: Vec<Defaults>,
    #[serde(default)]
    user_specs: Vec<UserSpec>,
}

impl Sudoers {
    pub fn open(path: impl AsRef<Path>) -> Result<Sudoers, Vec<Error>> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|err| {
            vec![Error {
                location: None,
                kind: ErrorKind::Syntax(format!("{}: {err}", path.display())),
            }]
        })?;

        Sudoers::read(BufReader::new(file), path)
    }

    pub fn read<R: io::Read>(reader: R, path: impl AsRef<Path>) -> Result<Sudoers, Vec<Error>> {
        let document: Document = serde_json::from_reader(reader).map_err(|err| {
            vec![Error {
                location: Some(Location {
                    file: path.as_ref().display().to_string(),
                    line: err.line(),
                    column: err.column(),
                }),
                kind: ErrorKind::Syntax(err.to_string()),
            }]
        })?;

        Sudoers::new(document.aliases, document.defaults, document.user_specs)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sudoers::ast::*;
    use pretty_assertions::assert_eq;

    fn load(text: &str) -> Result<Sudoers, Vec<Error>> {
        Sudoers::read(text.as_bytes(), "sudoers.json")
    }

    #[test]
    fn parse_tree_shape() {
        let document: Document = serde_json::from_str(
            r#"{
                "aliases": [
                    { "name": "WEB", "kind": "host", "members": [{ "word": "www*" }, { "network": "10.0.0.0/8" }] }
                ],
                "defaults": [
                    { "var": "env_keep", "val": "HOME", "op": "add", "binding": { "user": [{ "group": "wheel" }] } }
                ],
                "user_specs": [{
                    "users": [{ "negated": { "word": "mallory" } }, { "netgroup": "staff" }],
                    "privileges": [{
                        "hosts": [{ "alias": "WEB" }],
                        "commands": [{
                            "runas_users": [{ "word": "www-data" }],
                            "command": { "command": { "path": "/usr/bin/systemctl", "args": ["reload", "nginx"] } },
                            "tags": { "nopasswd": true },
                            "type": "sysadm_t"
                        }]
                    }],
                    "location": { "file": "/etc/sudoers", "line": 12, "column": 1 }
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(
            document.aliases[0].members[1],
            Member::Network("10.0.0.0/8".parse().unwrap())
        );
        assert_eq!(document.defaults[0].op, DefaultsOp::Add);
        assert_eq!(
            document.defaults[0].binding,
            Binding::User(vec![Member::UserGroup("wheel".into())])
        );

        let spec = &document.user_specs[0];
        assert_eq!(spec.users[0], Member::word("mallory").negate());
        assert_eq!(spec.location.as_ref().unwrap().line, 12);

        let cmnd = &spec.privileges[0].commands[0];
        assert_eq!(
            cmnd.command,
            Member::Command(Command::new("/usr/bin/systemctl").with_args(&["reload", "nginx"]))
        );
        assert_eq!(cmnd.tags.nopasswd, Some(true));
        assert_eq!(cmnd.tags.noexec, None);
        assert_eq!(cmnd.selinux_type.as_deref(), Some("sysadm_t"));
        assert_eq!(cmnd.runas_groups, None);
    }

    #[test]
    fn syntax_errors_have_a_location() {
        let errors = load("{\n  \"user_specs\": [ 42 ]\n}").err().unwrap();
        assert_eq!(errors.len(), 1);
        let location = errors[0].location.as_ref().unwrap();
        assert_eq!(location.file, "sudoers.json");
        assert_eq!(location.line, 2);

        assert!(load(r#"{ "user_spec": [] }"#).is_err());
        assert!(load(r#"{ "aliases": [{ "name": "X", "kind": "host", "members": [{ "network": "10.0.0.0/40" }] }] }"#).is_err());
    }

    #[test]
    fn semantic_errors_are_collected() {
        let errors = load(
            r#"{
                "aliases": [
                    { "name": "A", "kind": "cmnd", "members": [{ "alias": "A" }],
                      "location": { "file": "sudoers", "line": 1, "column": 1 } }
                ],
                "defaults": [
                    { "var": "no_such_setting" },
                    { "var": "passwd_tries", "val": "many" }
                ],
                "user_specs": [{
                    "users": ["all"],
                    "privileges": [{
                        "hosts": [{ "alias": "NOWHERE" }],
                        "commands": [{
                            "command": { "command": { "path": "/bin/ls", "digests": [{ "algorithm": "sha256", "value": "abc" }] } }
                        }]
                    }]
                }]
            }"#,
        )
        .err()
        .unwrap();

        let kinds: Vec<_> = errors.into_iter().map(|err| err.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ErrorKind::CyclicAlias("A".to_string()),
                ErrorKind::UnknownDefault("no_such_setting".to_string()),
                ErrorKind::InvalidDefault {
                    var: "passwd_tries".to_string(),
                    reason: "has an invalid value"
                },
                ErrorKind::UnknownAlias("NOWHERE".to_string()),
                ErrorKind::MalformedDigest("sha256:abc".to_string()),
            ]
        );
    }

    #[test]
    fn missing_file() {
        let errors = Sudoers::open("/nonexistent/sudoers.json").err().unwrap();
        assert!(matches!(errors[0].kind, ErrorKind::Syntax(_)));
    }
}
