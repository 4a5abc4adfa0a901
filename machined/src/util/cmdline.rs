//! Kernel command line lookup.

use machined_shared::MachinedResult;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct KernelCmdline {
    params: Vec<(String, Option<String>)>,
}

impl KernelCmdline {
    pub fn read(path: &Path) -> MachinedResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::parse(&raw))
    }

    pub fn parse(raw: &str) -> Self {
        let params = raw
            .split_whitespace()
            .map(|param| match param.split_once('=') {
                Some((key, value)) => (key.to_string(), Some(value.to_string())),
                None => (param.to_string(), None),
            })
            .collect();
        Self { params }
    }

    /// First value given for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_deref())
    }
}
