use std::fmt;

use super::{Level, Log};
use crate::system::syslog;

/// Longest message handed to syslog(3) in a single call.
pub(crate) const MAX_MSG_LEN: usize = 960;

pub struct Syslog {
    facility: libc::c_int,
}

impl Syslog {
    pub fn new(facility: libc::c_int) -> Self {
        Syslog { facility }
    }
}

/// Cut a message into pieces of at most `max_len` bytes (plus the continuation
/// markers), preferring to break after whitespace.
pub(crate) fn split_message(message: &str, max_len: usize) -> Vec<String> {
    if message.len() <= max_len {
        return vec![message.to_string()];
    }

    let mut pieces = Vec::new();
    let mut rest = message;
    while !rest.is_empty() {
        let mut end = max_len.min(rest.len());
        // floor_char_boundary is currently unstable
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            end = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        if end < rest.len() {
            // end index of last whitespace before byte cutoff
            if let Some(pos) = rest[..end].rfind(char::is_whitespace) {
                end = pos + 1;
            }
        }

        let mut piece = String::with_capacity(end + 11);
        if !pieces.is_empty() {
            piece.push_str("[...] ");
        }
        piece.push_str(&rest[..end]);
        rest = &rest[end..];
        if !rest.is_empty() {
            piece.push_str("[...]");
        }
        pieces.push(piece);
    }

    pieces
}

impl Log for Syslog {
    fn log(&self, level: Level, args: &fmt::Arguments<'_>) {
        let priority = match level {
            Level::Error => libc::LOG_ERR,
            Level::Warn => libc::LOG_WARNING,
            Level::Info => libc::LOG_INFO,
            Level::Debug => libc::LOG_DEBUG,
            Level::Trace => libc::LOG_DEBUG,
        };

        let message = args.to_string();
        for piece in split_message(&message, MAX_MSG_LEN) {
            syslog(priority, self.facility, &piece);
        }
    }

    fn flush(&self) {
        // pass
    }
}
