use std::path::PathBuf;

use crate::system::time::TimeSpec;

#[derive(Debug, PartialEq)]
pub(crate) struct SendlogOptions {
    pub(crate) host: String,
    pub(crate) port: Option<u16>,
    pub(crate) iolog_id: Option<String>,
    pub(crate) restart: Option<TimeSpec>,
    pub(crate) reject: Option<String>,
    pub(crate) accept_only: bool,
    pub(crate) ca_bundle: Option<PathBuf>,
    pub(crate) cert: Option<PathBuf>,
    pub(crate) key: Option<PathBuf>,
    pub(crate) verify: bool,
    pub(crate) tests: usize,
    pub(crate) iolog_dir: Option<PathBuf>,
    pub(crate) action: SendlogAction,
}

impl Default for SendlogOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            iolog_id: None,
            restart: None,
            reject: None,
            accept_only: false,
            ca_bundle: None,
            cert: None,
            key: None,
            verify: true,
            tests: 1,
            iolog_dir: None,
            action: SendlogAction::Run,
        }
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum SendlogAction {
    Help,
    Version,
    Run,
}

type OptionSetter = fn(&mut SendlogOptions, Option<String>) -> Result<(), String>;

struct SendlogOption {
    short: char,
    long: &'static str,
    takes_argument: bool,
    set: OptionSetter,
}

/// Parse a restart point written as `seconds[.fraction]`.
fn parse_restart_point(text: &str) -> Result<TimeSpec, String> {
    let invalid = || format!("invalid restart point: {text}");
    let (secs, fraction) = text.split_once('.').unwrap_or((text, ""));
    let secs: i64 = secs.parse().map_err(|_| invalid())?;
    if secs < 0 || fraction.len() > 9 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let nsecs = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<9}").parse().map_err(|_| invalid())?
    };
    Ok(TimeSpec::new(secs, nsecs))
}

impl SendlogOptions {
    const SENDLOG_OPTIONS: &[SendlogOption] = &[
        SendlogOption {
            short: 'A',
            long: "accept",
            takes_argument: false,
            set: |options, _| {
                options.accept_only = true;
                Ok(())
            },
        },
        SendlogOption {
            short: 'b',
            long: "ca-bundle",
            takes_argument: true,
            set: |options, argument| {
                options.ca_bundle = Some(argument.ok_or("option requires an argument -- 'b'")?.into());
                Ok(())
            },
        },
        SendlogOption {
            short: 'c',
            long: "cert",
            takes_argument: true,
            set: |options, argument| {
                options.cert = Some(argument.ok_or("option requires an argument -- 'c'")?.into());
                Ok(())
            },
        },
        SendlogOption {
            short: 'h',
            long: "host",
            takes_argument: true,
            set: |options, argument| {
                options.host = argument.ok_or("option requires an argument -- 'h'")?;
                Ok(())
            },
        },
        SendlogOption {
            short: '\0',
            long: "help",
            takes_argument: false,
            set: |options, _| {
                options.action = SendlogAction::Help;
                Ok(())
            },
        },
        SendlogOption {
            short: 'i',
            long: "iolog-id",
            takes_argument: true,
            set: |options, argument| {
                options.iolog_id = Some(argument.ok_or("option requires an argument -- 'i'")?);
                Ok(())
            },
        },
        SendlogOption {
            short: 'k',
            long: "key",
            takes_argument: true,
            set: |options, argument| {
                options.key = Some(argument.ok_or("option requires an argument -- 'k'")?.into());
                Ok(())
            },
        },
        SendlogOption {
            short: 'n',
            long: "no-verify",
            takes_argument: false,
            set: |options, _| {
                options.verify = false;
                Ok(())
            },
        },
        SendlogOption {
            short: 'p',
            long: "port",
            takes_argument: true,
            set: |options, argument| {
                let argument = argument.ok_or("option requires an argument -- 'p'")?;
                let port = argument
                    .parse()
                    .map_err(|_| format!("invalid port: {argument}"))?;
                options.port = Some(port);
                Ok(())
            },
        },
        SendlogOption {
            short: 'r',
            long: "restart",
            takes_argument: true,
            set: |options, argument| {
                let argument = argument.ok_or("option requires an argument -- 'r'")?;
                options.restart = Some(parse_restart_point(&argument)?);
                Ok(())
            },
        },
        SendlogOption {
            short: 'R',
            long: "reject",
            takes_argument: true,
            set: |options, argument| {
                options.reject = Some(argument.ok_or("option requires an argument -- 'R'")?);
                Ok(())
            },
        },
        SendlogOption {
            short: 't',
            long: "test",
            takes_argument: true,
            set: |options, argument| {
                let argument = argument.ok_or("option requires an argument -- 't'")?;
                options.tests = match argument.parse() {
                    Ok(count) if count > 0 => count,
                    _ => Err(format!("invalid number of tests: {argument}"))?,
                };
                Ok(())
            },
        },
        SendlogOption {
            short: 'V',
            long: "version",
            takes_argument: false,
            set: |options, _| {
                options.action = SendlogAction::Version;
                Ok(())
            },
        },
    ];

    pub(crate) fn from_env() -> Result<SendlogOptions, String> {
        let args = std::env::args().collect();

        Self::parse_arguments(args)
    }

    fn find_long(name: &str) -> Option<&'static SendlogOption> {
        Self::SENDLOG_OPTIONS.iter().find(|o| o.long == name)
    }

    /// parse sendlog arguments into SendlogOptions struct
    pub(crate) fn parse_arguments(arguments: Vec<String>) -> Result<SendlogOptions, String> {
        let mut options: SendlogOptions = SendlogOptions::default();
        let mut arg_iter = arguments.into_iter().skip(1);

        while let Some(arg) = arg_iter.next() {
            if let Some(long) = arg.strip_prefix("--") {
                // '--port=30344' carries its argument
                if let Some((key, value)) = long.split_once('=') {
                    match Self::find_long(key) {
                        Some(option) if option.takes_argument => {
                            (option.set)(&mut options, Some(value.to_string()))?;
                        }
                        Some(option) => {
                            Err(format!("'--{}' does not take any arguments", option.long))?;
                        }
                        None => Err(format!("unrecognized option '{}'", arg))?,
                    }
                } else if let Some(option) = Self::find_long(long) {
                    if option.takes_argument {
                        let next_arg = arg_iter.next();
                        (option.set)(&mut options, next_arg)?;
                    } else {
                        (option.set)(&mut options, None)?;
                    }
                } else {
                    Err(format!("unrecognized option '{}'", arg))?;
                }
            } else if arg.starts_with('-') && arg.len() > 1 {
                // flags can be grouped, so we loop over the characters
                for (n, char) in arg.char_indices().skip(1) {
                    let Some(option) = Self::SENDLOG_OPTIONS
                        .iter()
                        .find(|o| o.short == char && char != '\0')
                    else {
                        return Err(format!("invalid option -- '{}'", char));
                    };
                    if option.takes_argument {
                        // either the rest of the current flag group or the next argument
                        let rest = &arg[n + char.len_utf8()..];
                        let next_arg = if rest.is_empty() {
                            arg_iter.next()
                        } else {
                            Some(rest.to_string())
                        };
                        (option.set)(&mut options, next_arg)?;
                        break;
                    } else {
                        (option.set)(&mut options, None)?;
                    }
                }
            } else if options.iolog_dir.is_none() {
                options.iolog_dir = Some(arg.into());
            } else {
                Err(format!("unexpected argument '{}'", arg))?;
            }
        }

        if options.action == SendlogAction::Run {
            options.validate()?;
        }
        Ok(options)
    }

    fn validate(&self) -> Result<(), String> {
        if self.iolog_dir.is_none() {
            Err("the I/O log directory is required")?;
        }
        if self.restart.is_some() != self.iolog_id.is_some() {
            Err("both a restart point and an iolog ID must be specified")?;
        }
        if self.restart.is_some() && (self.reject.is_some() || self.accept_only) {
            Err("a restarted session cannot be rejected or accepted")?;
        }
        if self.reject.is_some() && self.accept_only {
            Err("reject and accept are mutually exclusive")?;
        }
        Ok(())
    }

    /// Connect with TLS when any certificate material is given.
    pub(crate) fn use_tls(&self) -> bool {
        self.ca_bundle.is_some() || self.cert.is_some() || self.key.is_some()
    }
}
