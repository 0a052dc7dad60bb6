//! Mountpoint detection via the kernel mount table.

use std::path::Path;

/// The kernel octal-escapes the characters that would break the
/// whitespace-separated mount table: space, tab, newline, and the
/// backslash itself.
const MOUNT_ESCAPES: [(&str, char); 4] = [
    ("040", ' '),
    ("011", '\t'),
    ("012", '\n'),
    ("134", '\\'),
];

/// Check whether a filesystem is currently mounted exactly at `path`.
///
/// Reads `/proc/self/mounts`; a true result means the kernel lists a mount
/// whose target equals `path`.
pub fn is_mountpoint(path: &Path) -> bool {
    let Ok(table) = std::fs::read_to_string("/proc/self/mounts") else {
        return false;
    };
    table
        .lines()
        .filter_map(mount_target)
        .any(|target| Path::new(&target) == path)
}

/// Second whitespace-separated field of a mount table line, unescaped.
fn mount_target(line: &str) -> Option<String> {
    let field = line.split_ascii_whitespace().nth(1)?;
    if !field.contains('\\') {
        return Some(field.to_string());
    }

    // every '\\' opens one escape; anything not in the table stays literal
    let mut pieces = field.split('\\');
    let mut target = pieces.next().unwrap_or_default().to_string();
    for piece in pieces {
        match MOUNT_ESCAPES.iter().find(|(code, _)| piece.starts_with(code)) {
            Some((code, unescaped)) => {
                target.push(*unescaped);
                target.push_str(&piece[code.len()..]);
            }
            None => {
                target.push('\\');
                target.push_str(piece);
            }
        }
    }
    Some(target)
}
