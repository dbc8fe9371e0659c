//! Data types that represent what the "terms and conditions" are after a successful
//! permission check.
use std::time::Duration;

use super::{Judgement, Verdict};
use crate::common::{HARDENED_ENUM_VALUE_0, HARDENED_ENUM_VALUE_1};

#[must_use]
#[cfg_attr(test, derive(Debug, PartialEq))]
#[repr(u32)]
pub enum Authorization<T = ()> {
    Allowed(Authentication, T) = HARDENED_ENUM_VALUE_0,
    Forbidden = HARDENED_ENUM_VALUE_1,
}

#[cfg_attr(test, derive(Debug, PartialEq))]
#[must_use]
pub struct Authentication {
    pub must_authenticate: bool,
    pub allowed_attempts: u16,
}

#[must_use]
#[cfg_attr(test, derive(Debug, PartialEq))]
pub struct Restrictions<'a> {
    pub noexec: bool,
    pub trust_environment: bool,
    pub log_input: bool,
    pub log_output: bool,
    pub send_mail: bool,
    pub chroot: Option<&'a str>,
    pub cwd: Option<&'a str>,
    pub timeout: Option<Duration>,
    pub path: Option<&'a str>,
    pub env_keep: &'a [String],
    pub env_check: &'a [String],
}

impl Judgement<'_> {
    /// Anything but an explicit allow is forbidden.
    pub fn authorization(&self) -> Authorization<Restrictions<'_>> {
        let evaluation = &self.evaluation;
        let settings = &self.settings;

        if evaluation.verdict != Verdict::Allow {
            return Authorization::Forbidden;
        }
        let tags = &evaluation.tags;
        let cmnd = evaluation.cmnd_info;

        Authorization::Allowed(
            Authentication {
                must_authenticate: match tags.nopasswd {
                    Some(nopasswd) => !nopasswd,
                    None => settings.authenticate,
                },
                allowed_attempts: settings.passwd_tries.try_into().unwrap_or(u16::MAX),
            },
            Restrictions {
                noexec: tags.noexec.unwrap_or(settings.noexec),
                trust_environment: tags.setenv.unwrap_or(settings.setenv),
                log_input: tags.log_input.unwrap_or(settings.log_input),
                log_output: tags.log_output.unwrap_or(settings.log_output),
                send_mail: tags.send_mail.unwrap_or(false),
                chroot: cmnd.and_then(|cmnd| cmnd.runchroot.as_deref()),
                cwd: cmnd.and_then(|cmnd| cmnd.runcwd.as_deref()),
                timeout: cmnd
                    .and_then(|cmnd| cmnd.timeout)
                    .or_else(|| u64::try_from(settings.command_timeout).ok().filter(|&t| t > 0))
                    .map(Duration::from_secs),
                path: settings.secure_path.as_deref(),
                env_keep: &settings.env_keep,
                env_check: &settings.env_check,
            },
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sudoers::ast::{CmndSpec, CmndTag, Member};
    use crate::sudoers::{Evaluation, LookupFlags, Settings};

    fn judgement(verdict: Verdict, tags: CmndTag, cmnd: Option<&CmndSpec>) -> Judgement<'_> {
        Judgement {
            evaluation: Evaluation {
                verdict,
                tags,
                cmnd_info: cmnd,
                flags: LookupFlags {
                    no_user: false,
                    no_host: false,
                    digest_mismatch: false,
                },
                privilege: None,
            },
            settings: Settings::default(),
        }
    }

    #[test]
    fn only_allow_is_allowed() {
        let judge = judgement(Verdict::Unspec, CmndTag::default(), None);
        assert_eq!(judge.authorization(), Authorization::Forbidden);
        let judge = judgement(Verdict::Deny, CmndTag::default(), None);
        assert_eq!(judge.authorization(), Authorization::Forbidden);
    }

    #[test]
    fn authority_xlat_test() {
        let judge = judgement(Verdict::Allow, CmndTag::default(), None);
        let Authorization::Allowed(auth, restrictions) = judge.authorization() else {
            panic!();
        };
        assert_eq!(
            auth,
            Authentication {
                must_authenticate: true,
                allowed_attempts: 3,
            }
        );
        assert!(!restrictions.noexec);
        assert!(!restrictions.trust_environment);
        assert_eq!(restrictions.timeout, None);
        assert_eq!(restrictions.path, None);

        let tags = CmndTag {
            nopasswd: Some(true),
            noexec: Some(true),
            setenv: Some(true),
            log_output: Some(true),
            ..Default::default()
        };
        let judge = judgement(Verdict::Allow, tags, None);
        let Authorization::Allowed(auth, restrictions) = judge.authorization() else {
            panic!();
        };
        assert!(!auth.must_authenticate);
        assert!(restrictions.noexec);
        assert!(restrictions.trust_environment);
        assert!(restrictions.log_output);
        assert!(!restrictions.log_input);
    }

    #[test]
    fn command_restrictions() {
        let mut cmnd = CmndSpec::new(Member::All);
        cmnd.runchroot = Some("/srv/jail".to_string());
        cmnd.runcwd = Some("*".to_string());
        cmnd.timeout = Some(90);

        let mut judge = judgement(Verdict::Allow, CmndTag::default(), Some(&cmnd));
        judge.settings.command_timeout = 30;
        let Authorization::Allowed(_, restrictions) = judge.authorization() else {
            panic!();
        };
        assert_eq!(restrictions.chroot, Some("/srv/jail"));
        assert_eq!(restrictions.cwd, Some("*"));
        assert_eq!(restrictions.timeout, Some(Duration::from_secs(90)));

        let mut judge = judgement(Verdict::Allow, CmndTag::default(), None);
        judge.settings.command_timeout = 30;
        let Authorization::Allowed(_, restrictions) = judge.authorization() else {
            panic!();
        };
        assert_eq!(restrictions.timeout, Some(Duration::from_secs(30)));
    }
}
