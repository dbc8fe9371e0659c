#![forbid(unsafe_code)]

pub type SettingsModifier = Box<dyn FnOnce(&mut Settings)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMode {
    Set,
    Add,
    Del,
}

pub enum SettingKind {
    Flag(SettingsModifier),
    Integer(fn(&str) -> Option<SettingsModifier>),
    Text(fn(&str) -> Option<SettingsModifier>),
    List(fn(ListMode, Vec<String>) -> Option<SettingsModifier>),
}

mod settings_dsl;
use settings_dsl::*;

defaults! {
    flags {
        authenticate              = true
        env_reset                 = true
        setenv                    = false
        noexec                    = false
        log_input                 = false
        log_output                = false
        iolog_flush               = false
        ignore_iolog_errors       = false
        log_server_verify         = true
        log_server_keepalive      = true
        mail_badpass              = true
    }
    integers {
        passwd_tries              = 3 [0..=1000]
        log_server_timeout        = 30 (!= 0) [0..=86400]
        syslog_maxlen             = 980 [64..=65536]
        command_timeout           = 0 (!= 0) [0..=2147483647]
    }
    texts {
        runas_default             = "root"
        iolog_dir                 = (env!("PATH_IOLOG_DIR")) (!= None)
        iolog_file                = "%{seq}" (!= None)
        log_server_cabundle       = None (!= None)
        log_server_peer_cert      = None (!= None)
        log_server_peer_key       = None (!= None)
        logfile                   = None (!= None)
        secure_path               = None (!= None)
    }
    enums {
        log_format                = sudo [sudo, json]
    }
    lists {
        log_servers               = []

        env_keep                  = ["COLORS", "DISPLAY", "HOSTNAME", "KRB5CCNAME", "LS_COLORS", "PATH",
                                     "PS1", "PS2", "XAUTHORITY", "XAUTHORIZATION", "XDG_CURRENT_DESKTOP"]

        env_check                 = ["COLORTERM", "LANG", "LANGUAGE", "LC_*", "LINGUAS", "TERM", "TZ"]

        env_delete                = ["IFS", "CDPATH", "LOCALDOMAIN", "RES_OPTIONS", "HOSTALIASES",
                                     "NLSPATH", "PATH_LOCALE", "LD_*", "_RLD*", "TERMINFO", "TERMINFO_DIRS",
                                     "TERMPATH", "TERMCAP", "ENV", "BASH_ENV", "PS4", "GLOBIGNORE",
                                     "BASHOPTS", "SHELLOPTS", "JAVA_TOOL_OPTIONS", "PERLIO_DEBUG",
                                     "PERLLIB", "PERL5LIB", "PERL5OPT", "PERL5DB", "FPATH", "NULLCMD",
                                     "READNULLCMD", "ZDOTDIR", "TMPPREFIX", "PYTHONHOME", "PYTHONPATH",
                                     "PYTHONINSPECT", "PYTHONUSERBASE", "RUBYLIB", "RUBYOPT", "*=()*"]
    }
}

/// Lists keep their first-seen order and never hold the same word twice.
fn modify_list(list: &mut Vec<String>, mode: ListMode, items: Vec<String>) {
    match mode {
        ListMode::Set => {
            list.clear();
            modify_list(list, ListMode::Add, items);
        }
        ListMode::Add => {
            for item in items {
                if !list.contains(&item) {
                    list.push(item);
                }
            }
        }
        ListMode::Del => list.retain(|word| !items.contains(word)),
    }
}
