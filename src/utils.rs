use std::path::PathBuf;

use chrono::{DateTime, Utc};

/// Date, `%Y-%m-%d`
pub const TOKEN_DATE: &str = "_D_";
/// Time of day, `%H-%M-%S`
pub const TOKEN_TIME: &str = "_H_";
/// Date and time, `%Y-%m-%d@%H-%M-%S`
pub const TOKEN_TIMESTAMP: &str = "_T_";
/// Current filter name, when the device reports one
pub const TOKEN_FILTER: &str = "_F_";

/// Substitute the record file tokens in `template`.
///
/// Times are UTC. A filter name is made path-safe before substitution; when
/// there is no filter the `_F_` token is left as is.
pub fn expand_pattern(template: &str, now: DateTime<Utc>, filter: Option<&str>) -> String {
    let mut result = template
        .replace(TOKEN_TIMESTAMP, &now.format("%Y-%m-%d@%H-%M-%S").to_string())
        .replace(TOKEN_DATE, &now.format("%Y-%m-%d").to_string())
        .replace(TOKEN_TIME, &now.format("%H-%M-%S").to_string());

    if let Some(filter) = filter {
        let safe: String = filter
            .chars()
            .map(|c| if c == '/' || c == '\\' { '-' } else { c })
            .collect();
        result = result.replace(TOKEN_FILTER, &safe);
    }
    result
}

/// Directory and full file path of a new recording.
///
/// The recorder extension is appended to the file name when missing; `:` is
/// replaced with `-` so the name stays valid on every platform.
pub fn record_path(
    dir_template: &str,
    name_template: &str,
    extension: &str,
    filter: Option<&str>,
    now: DateTime<Utc>,
) -> (PathBuf, PathBuf) {
    let dir = PathBuf::from(expand_pattern(dir_template, now, filter));

    let mut name = expand_pattern(name_template, now, filter).replace(':', "-");
    if !name.ends_with(extension) {
        name.push_str(extension);
    }

    let file = dir.join(name);
    (dir, file)
}

/// `<videos>/framestream__D_`, falling back to `$HOME/Videos`
pub fn default_record_dir() -> String {
    dirs::video_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Videos")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join(format!("framestream{TOKEN_DATE}"))
        .to_string_lossy()
        .into_owned()
}
