use std::collections::{BTreeMap, HashSet};

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::config::model::{parse_publish_spec, ConvoyConfig};

// ---------------------------------------------------------------------------
// ConfigDiagnostic — miette-powered validation error
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigDiagnostic {
    #[error("unknown dependency `{dependency}`")]
    #[diagnostic(code(convoy::missing_dependency))]
    MissingDependency {
        #[source_code]
        src: NamedSource<String>,
        #[label("`{service}` depends on `{dependency}`, which does not exist")]
        span: SourceSpan,
        #[help]
        advice: String,
        service: String,
        dependency: String,
    },

    #[error("dependency cycle detected involving `{node}`")]
    #[diagnostic(code(convoy::dependency_cycle))]
    DependencyCycle {
        #[source_code]
        src: NamedSource<String>,
        #[label("cycle involves this service")]
        span: SourceSpan,
        node: String,
    },

    #[error("service name `{name}` is declared as both a process and a container")]
    #[diagnostic(code(convoy::duplicate_service_name))]
    DuplicateServiceName {
        #[source_code]
        src: NamedSource<String>,
        #[label("second declaration")]
        span: SourceSpan,
        name: String,
    },

    #[error("port {port} is claimed by multiple services: {services:?}")]
    #[diagnostic(code(convoy::duplicate_port))]
    DuplicatePort {
        #[source_code]
        src: NamedSource<String>,
        #[label("duplicate port")]
        span: SourceSpan,
        port: u16,
        services: Vec<String>,
    },

    #[error("process `{service}` has an empty command")]
    #[diagnostic(code(convoy::empty_command))]
    EmptyCommand {
        #[source_code]
        src: NamedSource<String>,
        #[label("command is empty")]
        span: SourceSpan,
        service: String,
    },

    #[error("container `{service}` has an empty image")]
    #[diagnostic(code(convoy::empty_image))]
    EmptyImage {
        #[source_code]
        src: NamedSource<String>,
        #[label("image is empty")]
        span: SourceSpan,
        service: String,
    },

    #[error("container `{service}` has an invalid publish spec `{spec}`")]
    #[diagnostic(
        code(convoy::invalid_publish_spec),
        help("use \"host:container\" or a bare port number")
    )]
    InvalidPublishSpec {
        #[source_code]
        src: NamedSource<String>,
        #[label("invalid publish spec")]
        span: SourceSpan,
        service: String,
        spec: String,
    },
}

// ---------------------------------------------------------------------------
// Source span helpers
// ---------------------------------------------------------------------------

/// Find the byte offset of a TOML table header like `[process.databroker]`.
fn find_table_span(source: &str, section: &str, name: &str) -> SourceSpan {
    let patterns = [
        format!("[{}.{}]", section, name),
        format!("[{}.{}", section, name),
    ];

    for pat in &patterns {
        if let Some(pos) = source.find(pat) {
            let name_start = pos + 1 + section.len() + 1; // skip '[', section, '.'
            return (name_start, name.len()).into();
        }
    }

    if let Some(pos) = source.find(name) {
        return (pos, name.len()).into();
    }

    (0, 0).into()
}

/// Find the byte offset of a value in a depends_on array for a given service.
fn find_depends_on_value(source: &str, section: &str, service: &str, dep: &str) -> SourceSpan {
    let table_header = format!("[{}.{}]", section, service);
    let search_start = source.find(&table_header).unwrap_or(0);
    let after_header = &source[search_start..];

    let quoted = format!("\"{}\"", dep);
    if let Some(rel_pos) = after_header.find(&quoted) {
        let abs_pos = search_start + rel_pos + 1; // skip the opening quote
        return (abs_pos, dep.len()).into();
    }

    if let Some(rel_pos) = after_header.find(dep) {
        return (search_start + rel_pos, dep.len()).into();
    }

    find_table_span(source, section, service)
}

/// Find the byte offset of a specific field value in a TOML section.
fn find_field_span(source: &str, section: &str, name: &str, field: &str) -> SourceSpan {
    let table_header = format!("[{}.{}]", section, name);
    let search_start = source.find(&table_header).unwrap_or(0);
    let after_header = &source[search_start..];

    for prefix in [format!("{} =", field), format!("{}=", field)] {
        if let Some(rel_pos) = after_header.find(&prefix) {
            let abs_pos = search_start + rel_pos;
            let eq_pos = source[abs_pos..].find('=').map(|p| abs_pos + p + 1);
            if let Some(val_start) = eq_pos {
                let val_trimmed = source[val_start..].trim_start();
                let trim_offset = val_start + (source[val_start..].len() - val_trimmed.len());
                let val_end = val_trimmed.find('\n').unwrap_or(val_trimmed.len());
                return (trim_offset, val_end).into();
            }
        }
    }

    find_table_span(source, section, name)
}

fn find_closest_match<'a>(name: &str, candidates: &'a [String]) -> Option<&'a str> {
    let mut best: Option<(&str, f64)> = None;
    for candidate in candidates {
        let score = strsim::jaro_winkler(name, candidate);
        if score >= 0.8 && best.is_none_or(|(_, s)| score > s) {
            best = Some((candidate.as_str(), score));
        }
    }
    best.map(|(name, _)| name)
}

// ---------------------------------------------------------------------------
// Main validation function
// ---------------------------------------------------------------------------

/// The TOML section a service name lives in; used for span lookups.
fn section_of(config: &ConvoyConfig, name: &str) -> &'static str {
    if config.process.contains_key(name) {
        "process"
    } else {
        "container"
    }
}

pub fn validate(
    config: &ConvoyConfig,
    source: &str,
    filename: &str,
) -> Result<(), Vec<ConfigDiagnostic>> {
    let mut errors = Vec::new();
    let src = NamedSource::new(filename, source.to_string());

    let mut available: Vec<String> = config.process.keys().cloned().collect();
    available.extend(config.container.keys().cloned());

    // A name declared as both process and container is ambiguous everywhere
    // it is referenced.
    for name in config.container.keys() {
        if config.process.contains_key(name) {
            errors.push(ConfigDiagnostic::DuplicateServiceName {
                src: src.clone(),
                span: find_table_span(source, "container", name),
                name: name.clone(),
            });
        }
    }

    // Collect the dependency edges of every service for reference and cycle
    // checks, regardless of which table it came from.
    let mut deps: BTreeMap<&str, &[String]> = BTreeMap::new();
    for (name, p) in &config.process {
        deps.insert(name, &p.depends_on);
    }
    for (name, c) in &config.container {
        deps.insert(name, &c.depends_on);
    }

    for (name, service_deps) in &deps {
        let section = section_of(config, name);
        for dep in *service_deps {
            if !available.contains(dep) {
                let advice = match find_closest_match(dep, &available) {
                    Some(close) => format!("did you mean `{}`?", close),
                    None => format!("declared services: {}", available.join(", ")),
                };
                errors.push(ConfigDiagnostic::MissingDependency {
                    src: src.clone(),
                    span: find_depends_on_value(source, section, name, dep),
                    advice,
                    service: name.to_string(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    // Cycle detection via iterative DFS with a visiting set.
    if errors.iter().all(|e| !matches!(e, ConfigDiagnostic::MissingDependency { .. })) {
        if let Some(node) = find_cycle(&deps) {
            errors.push(ConfigDiagnostic::DependencyCycle {
                src: src.clone(),
                span: find_table_span(source, section_of(config, &node), &node),
                node,
            });
        }
    }

    for (name, p) in &config.process {
        if p.command.trim().is_empty() {
            errors.push(ConfigDiagnostic::EmptyCommand {
                src: src.clone(),
                span: find_field_span(source, "process", name, "command"),
                service: name.clone(),
            });
        }
    }

    for (name, c) in &config.container {
        if c.image.trim().is_empty() {
            errors.push(ConfigDiagnostic::EmptyImage {
                src: src.clone(),
                span: find_field_span(source, "container", name, "image"),
                service: name.clone(),
            });
        }
        for spec in &c.publish {
            if parse_publish_spec(spec).is_none() {
                errors.push(ConfigDiagnostic::InvalidPublishSpec {
                    src: src.clone(),
                    span: find_field_span(source, "container", name, "publish"),
                    service: name.clone(),
                    spec: spec.clone(),
                });
            }
        }
    }

    // Every fixed port may be claimed by at most one service.
    let mut port_claims: BTreeMap<u16, Vec<String>> = BTreeMap::new();
    for (name, p) in &config.process {
        if let Some(port) = p.port {
            port_claims.entry(port).or_default().push(name.clone());
        }
    }
    for (name, c) in &config.container {
        if let Some(port) = c.port {
            port_claims.entry(port).or_default().push(name.clone());
        }
        for spec in &c.publish {
            if let Some((host_port, _)) = parse_publish_spec(spec) {
                port_claims.entry(host_port).or_default().push(name.clone());
            }
        }
    }
    for (port, services) in port_claims {
        let distinct: HashSet<&String> = services.iter().collect();
        if distinct.len() > 1 {
            let first = &services[0];
            errors.push(ConfigDiagnostic::DuplicatePort {
                src: src.clone(),
                span: find_field_span(source, section_of(config, first), first, "port"),
                port,
                services,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn find_cycle(deps: &BTreeMap<&str, &[String]>) -> Option<String> {
    fn visit<'a>(
        node: &'a str,
        deps: &BTreeMap<&'a str, &'a [String]>,
        visiting: &mut HashSet<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Option<String> {
        if done.contains(node) {
            return None;
        }
        if !visiting.insert(node) {
            return Some(node.to_string());
        }
        if let Some(node_deps) = deps.get(node) {
            for dep in node_deps.iter() {
                if let Some((&key, _)) = deps.get_key_value(dep.as_str()) {
                    if let Some(cycle) = visit(key, deps, visiting, done) {
                        return Some(cycle);
                    }
                }
            }
        }
        visiting.remove(node);
        done.insert(node);
        None
    }

    let mut done = HashSet::new();
    for &node in deps.keys() {
        let mut visiting = HashSet::new();
        if let Some(cycle) = visit(node, deps, &mut visiting, &mut done) {
            return Some(cycle);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> ConvoyConfig {
        toml::from_str(toml_src).unwrap()
    }

    fn validate_src(toml_src: &str) -> Result<(), Vec<ConfigDiagnostic>> {
        let config = parse(toml_src);
        validate(&config, toml_src, "convoy.toml")
    }

    #[test]
    fn valid_config_passes() {
        let src = r#"
[deployment]
name = "telemetry"

[container.broker]
image = "eclipse-mosquitto:2"
port = 1883

[process.exporter]
command = "mqtt-exporter"
depends_on = ["broker"]
"#;
        assert!(validate_src(src).is_ok());
    }

    #[test]
    fn unknown_dependency_flagged_with_suggestion() {
        let src = r#"
[deployment]
name = "t"

[container.broker]
image = "eclipse-mosquitto:2"

[process.exporter]
command = "mqtt-exporter"
depends_on = ["borker"]
"#;
        let errors = validate_src(src).unwrap_err();
        assert_eq!(errors.len(), 1);
        match &errors[0] {
            ConfigDiagnostic::MissingDependency {
                service,
                dependency,
                advice,
                ..
            } => {
                assert_eq!(service, "exporter");
                assert_eq!(dependency, "borker");
                assert!(advice.contains("broker"), "advice was: {advice}");
            }
            other => panic!("unexpected diagnostic: {other:?}"),
        }
    }

    #[test]
    fn cycle_flagged() {
        let src = r#"
[deployment]
name = "t"

[process.a]
command = "a"
depends_on = ["b"]

[process.b]
command = "b"
depends_on = ["a"]
"#;
        let errors = validate_src(src).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigDiagnostic::DependencyCycle { .. })));
    }

    #[test]
    fn self_loop_flagged() {
        let src = r#"
[deployment]
name = "t"

[process.a]
command = "a"
depends_on = ["a"]
"#;
        let errors = validate_src(src).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigDiagnostic::DependencyCycle { node, .. } if node == "a")));
    }

    #[test]
    fn duplicate_name_across_tables_flagged() {
        let src = r#"
[deployment]
name = "t"

[process.broker]
command = "broker"

[container.broker]
image = "eclipse-mosquitto:2"
"#;
        let errors = validate_src(src).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigDiagnostic::DuplicateServiceName { name, .. } if name == "broker")));
    }

    #[test]
    fn duplicate_port_flagged() {
        let src = r#"
[deployment]
name = "t"

[process.a]
command = "a"
port = 9000

[container.b]
image = "img"
port = 9000
"#;
        let errors = validate_src(src).unwrap_err();
        match &errors[0] {
            ConfigDiagnostic::DuplicatePort { port, services, .. } => {
                assert_eq!(*port, 9000);
                assert_eq!(services.len(), 2);
            }
            other => panic!("unexpected diagnostic: {other:?}"),
        }
    }

    #[test]
    fn empty_command_and_image_flagged() {
        let src = r#"
[deployment]
name = "t"

[process.a]
command = "  "

[container.b]
image = ""
"#;
        let errors = validate_src(src).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigDiagnostic::EmptyCommand { .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigDiagnostic::EmptyImage { .. })));
    }

    #[test]
    fn invalid_publish_spec_flagged() {
        let src = r#"
[deployment]
name = "t"

[container.b]
image = "img"
publish = ["abc:def"]
"#;
        let errors = validate_src(src).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigDiagnostic::InvalidPublishSpec { spec, .. } if spec == "abc:def")));
    }

    #[test]
    fn closest_match_respects_threshold() {
        let candidates = vec!["broker".to_string(), "databroker".to_string()];
        assert_eq!(find_closest_match("borker", &candidates), Some("broker"));
        assert_eq!(find_closest_match("zzz", &candidates), None);
    }
}
