//! Case-insensitive path hashing and comparison, and symlink target
//! normalization.
//!
//! Entry names are slash-separated UTF-8 with no leading slash. Lookup is
//! case-insensitive: the hash and the equality below fold characters the same
//! way, which is what keeps bucket placement and chain comparison in
//! agreement.

fn folded(s: &str) -> impl Iterator<Item = char> + '_ {
    s.chars().flat_map(char::to_lowercase)
}

/// Stable hash of a case-folded path.
pub(crate) fn hash_ci(s: &str) -> u32 {
    // djb2 over the folded characters
    folded(s).fold(5381u32, |h, c| {
        h.wrapping_mul(33).wrapping_add(c as u32)
    })
}

pub(crate) fn eq_ci(a: &str, b: &str) -> bool {
    folded(a).eq(folded(b))
}

/// The segment after the last `/`, or the whole path.
pub(crate) fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

/// Resolves a symlink target against the directory containing the link.
///
/// `.` segments and empty segments are dropped, `..` pops the previous
/// segment, and a leading slash restarts from the archive root. Backslash
/// separators are converted first when the entry was produced on a DOS-family
/// host. Returns `None` when `..` would climb past the archive root.
pub(crate) fn resolve_link_target(
    link_path: &str,
    target: &str,
    dos_separators: bool,
) -> Option<String> {
    let converted;
    let target = if dos_separators && target.contains('\\') {
        converted = target.replace('\\', "/");
        converted.as_str()
    } else {
        target
    };

    let mut segments: Vec<&str> = match link_path.rfind('/') {
        Some(pos) => link_path[..pos].split('/').collect(),
        None => Vec::new(),
    };

    let target = if let Some(absolute) = target.strip_prefix('/') {
        segments.clear();
        absolute
    } else {
        target
    };

    for segment in target.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop()?;
            }
            _ => segments.push(segment),
        }
    }

    Some(segments.join("/"))
}
