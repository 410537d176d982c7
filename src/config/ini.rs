use crate::utils::error::{MonitError, Result};
use indexmap::IndexMap;
use ini::{Ini, ParseOption};
use regex::{Captures, Regex};
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

/// Section whose options every other section inherits on lookup.
pub const DEFAULT_SECTION: &str = "DEFAULT";

static ENV_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

/// Parsed INI file: section -> option -> value, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: IndexMap<String, IndexMap<String, String>>,
}

impl IniDocument {
    /// 從 INI 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MonitError::config(format!("cannot read config file '{}': {}", path.display(), e))
        })?;
        let content = substitute_env_vars_with(&content, |name| std::env::var(name).ok());
        Self::parse(&content).map_err(|e| match e {
            MonitError::ConfigError { message } => {
                MonitError::config(format!("{}: {}", path.display(), message))
            }
            other => other,
        })
    }

    /// 從 INI 字串解析配置
    ///
    /// Quotes and backslashes are kept verbatim so JSON values survive;
    /// indented lines continue the previous value.
    pub fn parse(content: &str) -> Result<Self> {
        reject_indented_headers(content)?;

        let option = ParseOption {
            enabled_quote: false,
            enabled_escape: false,
            enabled_indented_mutiline_value: true,
            ..ParseOption::default()
        };
        let parsed = Ini::load_from_str_opt(content, option).map_err(|e| {
            MonitError::config(format!("line {}, column {}: {}", e.line, e.col, e.msg))
        })?;

        let mut document = Self::default();
        for (section, properties) in parsed.iter() {
            let Some(section) = section else {
                if let Some((key, _)) = properties.iter().next() {
                    return Err(MonitError::config(format!(
                        "option '{}' appears before any [section] header",
                        key
                    )));
                }
                continue;
            };
            if section.trim().is_empty() {
                return Err(MonitError::config("section name is empty"));
            }
            if document.sections.contains_key(section) {
                return Err(MonitError::config(format!("duplicate section [{}]", section)));
            }

            let mut options = IndexMap::new();
            for (key, value) in properties.iter() {
                if key.is_empty() {
                    return Err(MonitError::config(format!(
                        "option name is empty in [{}]",
                        section
                    )));
                }
                if key.contains('\n') {
                    return Err(MonitError::config(format!(
                        "expected 'key = value' in [{}], found '{}'",
                        section,
                        key.lines().next().unwrap_or_default().trim()
                    )));
                }
                if options
                    .insert(key.to_string(), join_continuations(value))
                    .is_some()
                {
                    return Err(MonitError::config(format!(
                        "duplicate option '{}' in [{}]",
                        key, section
                    )));
                }
            }
            document.sections.insert(section.to_string(), options);
        }

        Ok(document)
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    /// Section names in file order, `DEFAULT` included when present.
    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(String::as_str)
    }

    /// Options written directly in `name`, without `DEFAULT` fallback.
    pub fn section(&self, name: &str) -> Option<&IndexMap<String, String>> {
        self.sections.get(name)
    }

    /// Option lookup with `DEFAULT` fallback.
    pub fn get(&self, section: &str, option: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|options| options.get(option))
            .or_else(|| {
                self.sections
                    .get(DEFAULT_SECTION)
                    .and_then(|defaults| defaults.get(option))
            })
            .map(String::as_str)
    }

    /// Every (section, option, value) triple as written in the file.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.sections.iter().flat_map(|(section, options)| {
            options
                .iter()
                .map(move |(key, value)| (section.as_str(), key.as_str(), value.as_str()))
        })
    }

    pub fn set(&mut self, section: &str, option: &str, value: impl Into<String>) {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(option.to_string(), value.into());
    }
}

impl fmt::Display for IniDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (section, options)) in self.sections.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            writeln!(f, "[{}]", section)?;
            for (key, value) in options {
                let mut lines = value.split('\n');
                writeln!(f, "{} = {}", key, lines.next().unwrap_or_default())?;
                for continuation in lines {
                    writeln!(f, "    {}", continuation)?;
                }
            }
        }
        Ok(())
    }
}

/// `[name]` indented under an option would otherwise be read as part of its value.
fn reject_indented_headers(content: &str) -> Result<()> {
    for (index, raw_line) in content.lines().enumerate() {
        let trimmed = raw_line.trim();
        let is_header = trimmed.len() > 2
            && trimmed.starts_with('[')
            && trimmed.ends_with(']')
            && !trimmed.contains(['"', ',', '{']);
        if is_header && raw_line.starts_with(char::is_whitespace) {
            return Err(MonitError::config(format!(
                "line {}: indented section header {}",
                index + 1,
                trimmed
            )));
        }
    }
    Ok(())
}

fn join_continuations(value: &str) -> String {
    value
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// 替換環境變數 (例如 ${CMS_SITE})，找不到的變數保留原樣
pub fn substitute_env_vars_with<F>(content: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ENV_VAR
        .replace_all(content, |caps: &Captures| {
            let var_name = &caps[1];
            lookup(var_name).unwrap_or_else(|| format!("${{{}}}", var_name))
        })
        .into_owned()
}
