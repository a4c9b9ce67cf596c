//! Guard rails applied after loading, before anything starts.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use sluice_model::Library;

use crate::error::{ConfigError, ConfigErrors};
use crate::models::{LibraryDefinition, SluiceConfig};

fn check_pattern(def: &LibraryDefinition, label: &str, pattern: Option<&str>) -> Option<ConfigError> {
    let pattern = pattern.map(str::trim).filter(|p| !p.is_empty())?;
    Regex::new(pattern).err().map(|err| ConfigError::Library {
        name: def.name.clone(),
        reason: format!("invalid {label} `{pattern}`: {err}"),
    })
}

/// Validate `config` and convert its libraries. Collects every problem
/// instead of stopping at the first.
pub fn validate(config: &SluiceConfig) -> Result<Vec<Library>, ConfigErrors> {
    let mut errors = Vec::new();
    let mut libraries = Vec::with_capacity(config.libraries.len());
    let mut seen: HashMap<String, String> = HashMap::new();

    if config.server.port == 0 {
        errors.push(ConfigError::Server("port must be non-zero".into()));
    }

    for def in &config.libraries {
        if def.name.trim().is_empty() {
            errors.push(ConfigError::Library {
                name: def.path.display().to_string(),
                reason: "name is empty".into(),
            });
            continue;
        }
        if def.path.as_os_str().is_empty() {
            errors.push(ConfigError::Library {
                name: def.name.clone(),
                reason: "path is empty".into(),
            });
        }
        errors.extend(check_pattern(def, "filter", def.filter.as_deref()));
        errors.extend(check_pattern(
            def,
            "exclusion filter",
            def.exclusion_filter.as_deref(),
        ));

        let id = def.resolved_id().to_string();
        if let Some(first) = seen.insert(id.clone(), def.name.clone()) {
            errors.push(ConfigError::DuplicateLibraryId {
                id,
                first,
                second: def.name.clone(),
            });
        }

        match def.to_library() {
            Ok(library) => libraries.push(library),
            Err(err) if !def.path.as_os_str().is_empty() => errors.push(err),
            Err(_) => {}
        }
    }

    let mut nodes = HashSet::new();
    for node in &config.nodes {
        if !nodes.insert(node.id) {
            errors.push(ConfigError::DuplicateNodeId {
                id: node.id.to_string(),
            });
        }
    }

    if errors.is_empty() {
        Ok(libraries)
    } else {
        Err(ConfigErrors(errors))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeDefinition;
    use sluice_model::NodeId;

    fn library(name: &str, path: &str) -> LibraryDefinition {
        LibraryDefinition {
            name: name.into(),
            path: path.into(),
            ..LibraryDefinition::default()
        }
    }

    #[test]
    fn converts_valid_libraries() {
        let config = SluiceConfig {
            libraries: vec![library("Movies", "/media/movies"), library("TV", "/media/tv")],
            ..SluiceConfig::default()
        };
        let libraries = validate(&config).unwrap();
        assert_eq!(libraries.len(), 2);
        assert_eq!(libraries[0].name, "Movies");
        assert!(libraries[0].schedule.is_always());
    }

    #[test]
    fn collects_every_problem() {
        let mut bad_regex = library("Regex", "/media/regex");
        bad_regex.filter = Some("(".into());
        let mut bad_schedule = library("Schedule", "/media/schedule");
        bad_schedule.schedule = "01".into();
        let node = NodeDefinition {
            id: NodeId::new(),
            name: "n".into(),
        };
        let config = SluiceConfig {
            libraries: vec![
                bad_regex,
                bad_schedule,
                library("Dup", "/a"),
                library("Dup", "/b"),
                library("NoPath", ""),
            ],
            nodes: vec![node.clone(), node],
            ..SluiceConfig::default()
        };
        let ConfigErrors(errors) = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ConfigError::DuplicateLibraryId { .. })));
        assert!(errors.iter().any(|e| matches!(e, ConfigError::DuplicateNodeId { .. })));
        assert!(errors.iter().any(|e| e.to_string().contains("invalid filter")));
        assert!(errors.iter().any(|e| e.to_string().contains("quarters")));
        assert!(errors.iter().any(|e| e.to_string().contains("path is empty")));
    }

    #[test]
    fn explicit_ids_avoid_name_collisions() {
        let mut a = library("Dup", "/a");
        a.id = Some(sluice_model::LibraryId::new());
        let config = SluiceConfig {
            libraries: vec![a, library("Dup", "/b")],
            ..SluiceConfig::default()
        };
        assert!(validate(&config).is_ok());
    }
}
