use valgsync_core::RemoteEntry;

/// Publishers suffix re-uploaded files with `-YYYYMMDDHHMM` before the
/// extension, so the group is fixed-width and sorts lexicographically in
/// temporal order.
const TIMESTAMP_LEN: usize = 12;

/// Splits a file name into stem and extension (with leading dot). Names
/// without an extension, and dotfiles, keep everything in the stem.
fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

fn is_timestamp(value: &str) -> bool {
    value.len() == TIMESTAMP_LEN && value.bytes().all(|b| b.is_ascii_digit())
}

/// Extracts the timestamp group if `name` is exactly `<stem>-<12 digits><ext>`
/// for the given logical name. Partial matches never count.
fn version_timestamp<'a>(name: &'a str, logical: &str) -> Option<&'a str> {
    let (stem, ext) = split_name(logical);
    let rest = name.strip_prefix(stem)?.strip_prefix('-')?;
    let timestamp = rest.strip_suffix(ext)?;
    is_timestamp(timestamp).then_some(timestamp)
}

/// Picks the entry carrying the greatest timestamp for `logical`, or `None`
/// when no timestamped version exists. The latter is not an error: it means
/// no newer remote version is currently obtainable.
pub fn latest_version<'a>(entries: &'a [RemoteEntry], logical: &str) -> Option<&'a RemoteEntry> {
    entries
        .iter()
        .filter_map(|entry| version_timestamp(&entry.name, logical).map(|ts| (ts, entry)))
        .max_by(|a, b| a.0.cmp(b.0))
        .map(|(_, entry)| entry)
}

/// Timestamp group of `name` itself, if it carries one.
pub fn own_timestamp(name: &str) -> Option<&str> {
    let (stem, _) = split_name(name);
    let (_, candidate) = stem.rsplit_once('-')?;
    is_timestamp(candidate).then_some(candidate)
}

/// Strips a `-<12 digits>` suffix to form the logical (local) name. Names
/// without a timestamp suffix map to themselves.
pub fn logical_name(name: &str) -> String {
    let (stem, ext) = split_name(name);
    if let Some((base, candidate)) = stem.rsplit_once('-')
        && is_timestamp(candidate)
        && !base.is_empty()
    {
        return format!("{base}{ext}");
    }
    name.to_string()
}
