//! FTP directory listings
//!
//! Handles `LIST` output in Unix (`ls -l`) and DOS formats plus RFC 3659 `MLSD` facts.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use super::is_dot_entry;
use crate::entry::{RawEntry, RawKind};

/// Parse one `LIST` line, trying Unix format first
pub fn parse_list_line(line: &str) -> Option<RawEntry> {
    parse_unix_line(line).or_else(|| parse_dos_line(line))
}

/// `drwxr-xr-x  2 owner group  4096 Jan 23 10:30 name`
fn parse_unix_line(line: &str) -> Option<RawEntry> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 9 {
        return None;
    }
    let permissions = parts[0];
    let type_char = permissions.chars().next()?;
    if !matches!(type_char, 'd' | 'l' | '-') || permissions.len() < 10 {
        return None;
    }

    let name = after_fields(line, 8)?.to_string();
    let (name, kind) = match type_char {
        'd' => (name, RawKind::Directory),
        'l' => match name.split_once(" -> ") {
            Some((link, target)) => (
                link.to_string(),
                RawKind::Symlink {
                    target: Some(target.to_string()),
                },
            ),
            None => (name, RawKind::Symlink { target: None }),
        },
        _ => (name, RawKind::File),
    };
    if is_dot_entry(&name) {
        return None;
    }

    let bytes = permissions.as_bytes();
    Some(RawEntry {
        name,
        kind,
        size: parts[4].parse().unwrap_or(0),
        modified: unix_timestamp(parts[5], parts[6], parts[7]).unwrap_or(0),
        can_read: bytes[1] == b'r',
        can_write: bytes[2] == b'w',
    })
}

/// Rest of `line` after `count` whitespace-separated fields, inner spacing kept
fn after_fields(line: &str, count: usize) -> Option<&str> {
    let mut rest = line.trim_end_matches(['\r', '\n']).trim_start();
    for _ in 0..count {
        let end = rest.find(char::is_whitespace)?;
        rest = rest[end..].trim_start();
    }
    (!rest.is_empty()).then_some(rest)
}

/// `ls` prints `HH:MM` for the last six months and the year otherwise
fn unix_timestamp(month: &str, day: &str, time_or_year: &str) -> Option<i64> {
    let now = Utc::now().naive_utc();
    let (year, time) = if time_or_year.contains(':') {
        (now.year(), NaiveTime::parse_from_str(time_or_year, "%H:%M").ok()?)
    } else {
        (time_or_year.parse().ok()?, NaiveTime::MIN)
    };
    let date = NaiveDate::parse_from_str(&format!("{} {} {}", month, day, year), "%b %d %Y").ok()?;
    let mut stamp = NaiveDateTime::new(date, time);
    // a date in the future belongs to last year
    if time_or_year.contains(':') && stamp > now + chrono::Duration::days(1) {
        let previous = NaiveDate::from_ymd_opt(year - 1, date.month(), date.day())?;
        stamp = NaiveDateTime::new(previous, time);
    }
    Some(stamp.and_utc().timestamp_millis())
}

/// `01-23-24  10:30AM  <DIR>  name` or `01-23-24  10:30AM  12345  name`
fn parse_dos_line(line: &str) -> Option<RawEntry> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 4 {
        return None;
    }
    let stamp = NaiveDateTime::parse_from_str(&format!("{} {}", parts[0], parts[1]), "%m-%d-%y %I:%M%p").ok()?;
    let is_dir = parts[2] == "<DIR>";
    let size = if is_dir { 0 } else { parts[2].parse().ok()? };
    let name = after_fields(line, 3)?.to_string();
    if is_dot_entry(&name) {
        return None;
    }
    let modified = stamp.and_utc().timestamp_millis();
    Some(if is_dir {
        RawEntry::directory(name, modified)
    } else {
        RawEntry::file(name, size, modified)
    })
}

/// Parse one `MLSD` line: `type=file;size=12;modify=20240123103000; name`
pub fn parse_mlsd_line(line: &str) -> Option<RawEntry> {
    let (facts, name) = line.split_once(' ')?;
    if is_dot_entry(name) {
        return None;
    }

    let mut kind = RawKind::File;
    let mut size = 0;
    let mut modified = 0;
    let mut mode = None;
    for fact in facts.split(';') {
        let Some((key, value)) = fact.trim().split_once('=') else {
            continue;
        };
        match key.to_lowercase().as_str() {
            "type" => match value.to_lowercase().as_str() {
                "cdir" | "pdir" => return None,
                "dir" => kind = RawKind::Directory,
                "os.unix=symlink" | "os.unix=slink" => kind = RawKind::Symlink { target: None },
                _ => {}
            },
            "size" | "sizd" => size = value.parse().unwrap_or(0),
            "modify" => modified = mlsd_timestamp(value).unwrap_or(0),
            "unix.mode" => mode = u32::from_str_radix(value, 8).ok(),
            _ => {}
        }
    }

    let raw = RawEntry {
        name: name.to_string(),
        kind,
        size,
        modified,
        can_read: true,
        can_write: true,
    };
    Some(raw.with_mode(mode))
}

/// `YYYYMMDDHHMMSS[.sss]`, always UTC
fn mlsd_timestamp(value: &str) -> Option<i64> {
    let digits = value.get(..14)?;
    let stamp = NaiveDateTime::parse_from_str(digits, "%Y%m%d%H%M%S").ok()?;
    Some(stamp.and_utc().timestamp_millis())
}
