use std::path::Path;

use rustc_hash::FxHashMap;
use tracing::{debug, info};

/// Reflector names (e.g. `XRF012`) and their numeric IP addresses, loaded from a host list with
///  one `name ip` pair per line.
#[derive(Debug, Clone, Default)]
pub struct Reflectors {
    hosts: FxHashMap<String, String>,
}

impl Reflectors {
    pub fn load(path: &Path) -> anyhow::Result<Reflectors> {
        let text = std::fs::read_to_string(path)?;
        let result = Reflectors::parse(&text);
        info!("{} reflectors loaded from {:?}", result.len(), path);
        Ok(result)
    }

    /// Lines that are not exactly two whitespace separated fields are skipped.
    pub fn parse(text: &str) -> Reflectors {
        let mut hosts = FxHashMap::default();
        for line in text.lines() {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next(), fields.next()) {
                (Some(name), Some(ip), None) => {
                    hosts.insert(name.to_string(), ip.to_string());
                }
                _ => {
                    if !line.trim().is_empty() {
                        debug!("skipping malformed host list line {:?}", line);
                    }
                }
            }
        }
        Reflectors { hosts }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.hosts.get(name)
            .map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Reflectors {
    fn from(value: [(&str, &str); N]) -> Self {
        Reflectors {
            hosts: value.into_iter()
                .map(|(name, ip)| (name.to_string(), ip.to_string()))
                .collect(),
        }
    }
}
