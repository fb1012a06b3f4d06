//! API level to release-name mapping.

/// Release names indexed by API level, starting at level 1.
const RELEASES: &[&str] = &[
    "1.0", "1.1", "1.5", "1.6", "2.0", "2.0.1", "2.1", "2.2", "2.3", "2.3.3", // 1-10
    "3.0", "3.1", "3.2", "4.0", "4.0.3", "4.1", "4.2", "4.3", "4.4", "4.4W", // 11-20
    "5.0", "5.1", "6.0", "7.0", "7.1", "8.0", "8.1", "9", "10", "11", // 21-30
    "12", "12L", "13", "14", "15", "16", // 31-36
];

/// Returns the release number for `api_level`, if known.
pub fn release_for_api_level(api_level: u32) -> Option<&'static str> {
    let index = usize::try_from(api_level).ok()?.checked_sub(1)?;
    RELEASES.get(index).copied()
}

/// Human-readable version label for a device.
///
/// Known levels render as `"Android <release>"`; anything else falls back to
/// `"API <level>"` so newer devices still get a useful label.
pub fn version_label(api_level: u32) -> String {
    match release_for_api_level(api_level) {
        Some(release) => format!("Android {release}"),
        None => format!("API {api_level}"),
    }
}
