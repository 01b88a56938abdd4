use anyhow::{Context, Result, bail};
use ini::{Ini, ParseOption};
use serde_json::Value as JsonValue;
use std::fs;
use std::path::{Path, PathBuf};

pub const SETTINGS_FILE: &str = "settings.ini";
pub const TOKEN_FILE: &str = "token";
pub const DEFAULT_API_URL: &str = "https://api.github.com";
const DEFAULT_SECTION: &str = "DEFAULT";
const LABEL_GROUPS_KEY: &str = "label_groups";

const DEFAULT_LABEL_GROUPS: [(&str, &str); 3] = [
    ("breaking", "Breaking Changes"),
    ("enhancement", "New Features"),
    ("bug", "Bugs Squashed"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelGroup {
    pub label: String,
    pub heading: String,
}

/// Issue labels mapped to changelog headings, in section order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelGroups(Vec<LabelGroup>);

impl LabelGroups {
    pub fn new(groups: Vec<LabelGroup>) -> Result<Self> {
        if groups.is_empty() {
            bail!("At least one label group is required.");
        }
        Ok(Self(groups))
    }

    pub fn from_json(key: &str, raw: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(raw).with_context(|| {
            format!("Key `{key}` in {SETTINGS_FILE} is not a valid JSON string.")
        })?;
        let JsonValue::Object(entries) = value else {
            bail!("Key `{key}` in {SETTINGS_FILE} must be a JSON object of label to heading.");
        };

        let mut groups = Vec::with_capacity(entries.len());
        for (label, heading) in entries {
            let JsonValue::String(heading) = heading else {
                bail!("Key `{key}` in {SETTINGS_FILE}: heading for label `{label}` must be a string.");
            };
            groups.push(LabelGroup { label, heading });
        }

        Self::new(groups)
            .with_context(|| format!("Key `{key}` in {SETTINGS_FILE} has no label groups."))
    }

    pub fn iter(&self) -> impl Iterator<Item = &LabelGroup> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl Default for LabelGroups {
    fn default() -> Self {
        Self(
            DEFAULT_LABEL_GROUPS
                .iter()
                .map(|(label, heading)| LabelGroup {
                    label: label.to_string(),
                    heading: heading.to_string(),
                })
                .collect(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub owner: String,
    pub repo: String,
    pub version: String,
    pub label_groups: LabelGroups,
    pub api_url: String,
    /// Directory holding the settings file. All project files resolve against it.
    pub root: PathBuf,
}

pub fn find_settings(start: &Path, file_name: &str) -> Result<PathBuf> {
    for dir in start.ancestors() {
        if dir.join(file_name).is_file() {
            return Ok(dir.to_path_buf());
        }
    }

    bail!(
        "Could not find `{file_name}` in `{}` or any parent directory.",
        start.display()
    )
}

pub fn load(cwd: &Path) -> Result<Settings> {
    let root = find_settings(cwd, SETTINGS_FILE)?;
    let path = root.join(SETTINGS_FILE);
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read settings file `{}`.", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded settings");

    parse(&contents, root)
        .with_context(|| format!("Invalid settings file `{}`.", path.display()))
}

fn parse(contents: &str, root: PathBuf) -> Result<Settings> {
    // JSON values carry quotes and backslashes that must reach serde_json untouched.
    let options = ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        ..ParseOption::default()
    };
    let ini = Ini::load_from_str_opt(contents, options).context("File is not valid INI.")?;
    let Some(section) = ini.section(Some(DEFAULT_SECTION)) else {
        bail!("Missing `[{DEFAULT_SECTION}]` section.");
    };

    let required = |key: &str| -> Result<String> {
        match section.get(key).map(str::trim) {
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            _ => bail!("Missing required key `{key}` in `[{DEFAULT_SECTION}]`."),
        }
    };

    let label_groups = match section.get(LABEL_GROUPS_KEY) {
        Some(raw) => LabelGroups::from_json(LABEL_GROUPS_KEY, raw)?,
        None => LabelGroups::default(),
    };

    let api_url = section
        .get("api_url")
        .map(|value| value.trim().trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());

    Ok(Settings {
        owner: required("user")?,
        repo: required("lib_name")?,
        version: required("version")?,
        label_groups,
        api_url,
        root,
    })
}

pub fn read_token(root: &Path) -> Result<String> {
    let path = root.join(TOKEN_FILE);
    let contents = fs::read_to_string(&path).with_context(|| {
        format!(
            "Failed to find token file `{}`. Store a GitHub access token there.",
            path.display()
        )
    })?;

    let token = contents.lines().next().unwrap_or_default().trim_end();
    if token.is_empty() {
        bail!("Token file `{}` is empty.", path.display());
    }
    Ok(token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const BASIC: &str = "[DEFAULT]\nuser = octo\nlib_name = widgets\nversion = 1.2.0\n";

    #[test]
    fn finds_settings_in_parent_directory() {
        let temp_dir = tempdir().unwrap();
        let nested = temp_dir.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();
        fs::write(temp_dir.path().join(SETTINGS_FILE), BASIC).unwrap();

        let settings = load(&nested).unwrap();
        assert_eq!(settings.root, temp_dir.path());
        assert_eq!(settings.owner, "octo");
        assert_eq!(settings.repo, "widgets");
        assert_eq!(settings.version, "1.2.0");
        assert_eq!(settings.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn closest_settings_file_wins() {
        let temp_dir = tempdir().unwrap();
        let nested = temp_dir.path().join("inner");
        fs::create_dir_all(&nested).unwrap();
        fs::write(temp_dir.path().join(SETTINGS_FILE), BASIC).unwrap();
        fs::write(
            nested.join(SETTINGS_FILE),
            "[DEFAULT]\nuser = other\nlib_name = inner\nversion = 0.0.1\n",
        )
        .unwrap();

        let settings = load(&nested).unwrap();
        assert_eq!(settings.root, nested);
        assert_eq!(settings.repo, "inner");
    }

    #[test]
    fn missing_settings_file_is_an_error() {
        let temp_dir = tempdir().unwrap();
        let err = find_settings(temp_dir.path(), "definitely-not-here.ini").unwrap_err();
        assert!(err.to_string().contains("Could not find `definitely-not-here.ini`"));
    }

    #[test]
    fn default_label_groups_apply_when_key_missing() {
        let settings = parse(BASIC, PathBuf::from("/repo")).unwrap();
        let labels: Vec<_> = settings
            .label_groups
            .iter()
            .map(|group| group.label.as_str())
            .collect();
        assert_eq!(labels, ["breaking", "enhancement", "bug"]);
    }

    #[test]
    fn label_groups_keep_declared_order() {
        let contents = format!(
            "{BASIC}label_groups = {{\"zeta\": \"Last Letter\", \"alpha\": \"First Letter\"}}\n"
        );
        let settings = parse(&contents, PathBuf::from("/repo")).unwrap();
        let groups: Vec<_> = settings.label_groups.iter().cloned().collect();
        assert_eq!(
            groups,
            vec![
                LabelGroup {
                    label: "zeta".to_string(),
                    heading: "Last Letter".to_string(),
                },
                LabelGroup {
                    label: "alpha".to_string(),
                    heading: "First Letter".to_string(),
                },
            ]
        );
    }

    #[test]
    fn malformed_label_groups_names_the_key() {
        let contents = format!("{BASIC}label_groups = {{bug: Bugs}}\n");
        let err = parse(&contents, PathBuf::from("/repo")).unwrap_err();
        assert!(err.to_string().contains("Key `label_groups`"));
        assert!(format!("{err:#}").contains("not a valid JSON string"));
    }

    #[test]
    fn non_string_heading_is_rejected() {
        let err = LabelGroups::from_json("label_groups", r#"{"bug": 3}"#).unwrap_err();
        assert!(err.to_string().contains("heading for label `bug`"));
    }

    #[test]
    fn empty_label_groups_are_rejected() {
        assert!(LabelGroups::from_json("label_groups", "{}").is_err());
    }

    #[test]
    fn missing_required_key_is_named() {
        let err = parse("[DEFAULT]\nuser = octo\nversion = 1.0\n", PathBuf::new()).unwrap_err();
        assert!(err.to_string().contains("`lib_name`"));
    }

    #[test]
    fn api_url_override_drops_trailing_slash() {
        let contents = format!("{BASIC}api_url = https://ghe.example.com/api/v3/\n");
        let settings = parse(&contents, PathBuf::new()).unwrap();
        assert_eq!(settings.api_url, "https://ghe.example.com/api/v3");
    }

    #[test]
    fn token_is_first_line_without_trailing_whitespace() {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join(TOKEN_FILE), "ghp_secret  \nignored\n").unwrap();
        assert_eq!(read_token(temp_dir.path()).unwrap(), "ghp_secret");
    }

    #[test]
    fn missing_token_file_is_an_error() {
        let temp_dir = tempdir().unwrap();
        let err = read_token(temp_dir.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to find token file"));
    }
}
