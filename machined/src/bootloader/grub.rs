//! Minimal grub.cfg reader: enough to find the default entry's kernel,
//! initrd and command line for kexec.

use machined_shared::{MachinedError, MachinedResult};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootEntry {
    pub title: String,
    pub linux: String,
    pub initrd: String,
    pub cmdline: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrubConfig {
    /// Value of `set default=`, either an entry title or an index.
    pub default: String,
    pub entries: Vec<BootEntry>,
}

impl GrubConfig {
    /// Read the config at `path`; `Ok(None)` if there is none.
    pub fn read(path: &Path) -> MachinedResult<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::parse(&raw).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn parse(raw: &str) -> MachinedResult<Self> {
        let mut config = GrubConfig::default();
        let mut current: Option<BootEntry> = None;

        for (lineno, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix("menuentry ") {
                if current.is_some() {
                    return Err(MachinedError::Config(format!(
                        "grub.cfg:{}: nested menuentry",
                        lineno + 1
                    )));
                }
                let title = rest.trim_end_matches('{').trim();
                current = Some(BootEntry {
                    title: unquote(title).to_string(),
                    ..Default::default()
                });
                continue;
            }

            if line == "}" {
                match current.take() {
                    Some(entry) => config.entries.push(entry),
                    None => {
                        return Err(MachinedError::Config(format!(
                            "grub.cfg:{}: unexpected closing brace",
                            lineno + 1
                        )));
                    }
                }
                continue;
            }

            match current.as_mut() {
                Some(entry) => {
                    if let Some(rest) = line.strip_prefix("linux ") {
                        let rest = rest.trim();
                        let (image, cmdline) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                        entry.linux = image.to_string();
                        entry.cmdline = cmdline.trim().to_string();
                    } else if let Some(rest) = line.strip_prefix("initrd ") {
                        entry.initrd = rest.trim().to_string();
                    }
                }
                None => {
                    if let Some(value) = line.strip_prefix("set default=") {
                        config.default = unquote(value.trim()).to_string();
                    }
                }
            }
        }

        if current.is_some() {
            return Err(MachinedError::Config("grub.cfg: unterminated menuentry".into()));
        }

        Ok(config)
    }

    pub fn default_entry(&self) -> Option<&BootEntry> {
        if let Some(entry) = self.entries.iter().find(|e| e.title == self.default) {
            return Some(entry);
        }
        self.default
            .parse::<usize>()
            .ok()
            .and_then(|index| self.entries.get(index))
    }
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}
