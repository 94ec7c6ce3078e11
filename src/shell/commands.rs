//! Command text for the Keel products, and parsers for what they print

use super::runner::quote;
use crate::config::{ClusterSpec, Component, Flags};
use crate::error::{KeelError, Result};
use crate::host::Role;
use crate::version::Version;
use std::collections::{BTreeMap, HashMap};

/// OS identifiers the product installers support
const SUPPORTED_OS: &[&str] = &[
    "ubuntu",
    "debian",
    "centos",
    "rhel",
    "rocky",
    "almalinux",
    "sles",
    "amzn",
];

pub const OS_RELEASE: &str = "/etc/os-release";
pub const ENVIRONMENT_FILE: &str = "/etc/environment";
pub const RESTART_MARKER: &str = "/var/run/keel/restart-required";

const RUNTIME_SOCKET: &str = "/var/run/keel-runtime.sock";

/// Where each product is fetched from
#[derive(Debug, Clone)]
pub struct Products {
    pub runtime_repo_url: String,
    pub runtime_channel: String,
    pub control_plane_repo: String,
    pub control_plane_version: Version,
    pub registry_repo: String,
}

impl Products {
    pub fn from_spec(spec: &ClusterSpec) -> Self {
        Self {
            runtime_repo_url: spec.runtime.repo_url.clone(),
            runtime_channel: spec.runtime.channel.clone(),
            control_plane_repo: spec.control_plane.image_repo.clone(),
            control_plane_version: spec.control_plane.version.clone(),
            registry_repo: spec
                .registry
                .as_ref()
                .map(|r| r.image_repo.clone())
                .unwrap_or_else(|| spec.control_plane.image_repo.clone()),
        }
    }

    fn bootstrap(&self, component: Component, version: &Version) -> String {
        let (repo, image) = match component {
            Component::Registry => (&self.registry_repo, "keel-registry-bootstrap"),
            _ => (&self.control_plane_repo, "keel-bootstrap"),
        };
        format!(
            "keel-runtime run --rm --privileged -i -v {sock}:{sock} {}/{}:{}",
            repo,
            image,
            version,
            sock = RUNTIME_SOCKET
        )
    }

    /// Install or upgrade `component`; `upgrade` picks the bootstrap verb
    pub fn apply(&self, component: Component, version: &Version, flags: &Flags, upgrade: bool) -> String {
        let extra = flags
            .to_vec()
            .iter()
            .map(|f| quote(f))
            .collect::<Vec<_>>()
            .join(" ");
        let cmd = match component {
            Component::Runtime => format!(
                "curl -fsSL {}/install.sh | sh -s -- --channel {} --version {}",
                self.runtime_repo_url,
                quote(&self.runtime_channel),
                version
            ),
            _ => format!(
                "{} {}",
                self.bootstrap(component, version),
                if upgrade { "upgrade" } else { "install" }
            ),
        };
        if extra.is_empty() {
            cmd
        } else {
            format!("{} {}", cmd, extra)
        }
    }

    pub fn uninstall(&self, component: Component, installed: &Version) -> String {
        match component {
            Component::Runtime => format!(
                "curl -fsSL {}/install.sh | sh -s -- --uninstall",
                self.runtime_repo_url
            ),
            _ => format!("{} uninstall --force", self.bootstrap(component, installed)),
        }
    }

    /// Join command; the token is read from stdin
    pub fn join(&self, role: Role, leader: &str) -> String {
        format!(
            "{} join --role {} --leader {} --token-stdin",
            self.bootstrap(Component::ControlPlane, &self.control_plane_version),
            role,
            quote(leader)
        )
    }
}

fn binary(component: Component) -> &'static str {
    match component {
        Component::Runtime => "keel-runtime",
        Component::ControlPlane => "keel-agent",
        Component::Registry => "keel-registry",
    }
}

/// Prints the short version, or nothing when the binary is absent
pub fn version(component: Component) -> String {
    let bin = binary(component);
    format!(
        "command -v {bin} >/dev/null 2>&1 && {bin} version --short || true",
        bin = bin
    )
}

pub fn restart(component: Component) -> String {
    format!("systemctl restart {}", binary(component))
}

/// Local endpoint each component answers health checks on; the runtime has
/// none and is checked through its CLI
pub fn health_url(component: Component) -> Option<&'static str> {
    match component {
        Component::Runtime => None,
        Component::ControlPlane => Some("https://127.0.0.1:12376/_ping"),
        Component::Registry => Some("https://127.0.0.1:5443/health"),
    }
}

pub const RUNTIME_INFO: &str = "keel-runtime info >/dev/null 2>&1 && echo yes || true";

pub fn join_token(role: Role) -> String {
    let kind = match role {
        Role::ControlPlane => "manager",
        _ => "worker",
    };
    format!("keel-agent join-token {} --quiet", kind)
}

pub const CLUSTER_ID: &str = "keel-agent info --cluster-id";

pub fn pull(image: &str) -> String {
    format!("keel-runtime pull {}", quote(image))
}

pub fn http_status(url: &str) -> String {
    format!("curl -sk -o /dev/null -w '%{{http_code}}' {} || true", quote(url))
}

pub fn file_exists(path: &str) -> String {
    format!("test -e {} && echo yes || true", quote(path))
}

pub fn write_file(path: &str) -> String {
    let path = quote(path);
    format!("mkdir -p \"$(dirname {p})\" && cat > {p}", p = path)
}

pub const HOSTNAME: &str = "hostname";
pub const INTERNAL_ADDRESS: &str = "hostname -I";
pub const CONTAINERIZED: &str =
    "test -f /.dockerenv -o -f /run/.containerenv && echo yes || true";

/// Output of a `... && echo yes || true` probe
pub fn affirmative(output: &str) -> bool {
    output.trim() == "yes"
}

/// OS identifier from an os-release file, `UnsupportedHost` when unknown
pub fn parse_os_release(content: &str) -> Result<String> {
    let fields: HashMap<&str, &str> = content
        .lines()
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim().trim_matches('"')))
        .collect();

    let id = fields.get("ID").copied().unwrap_or_default();
    if id.is_empty() {
        return Err(KeelError::UnsupportedHost("unknown OS".to_string()));
    }
    if !SUPPORTED_OS.contains(&id) {
        return Err(KeelError::UnsupportedHost(format!("OS '{}' is not supported", id)));
    }
    Ok(match fields.get("VERSION_ID") {
        Some(v) if !v.is_empty() => format!("{}-{}", id, v),
        _ => id.to_string(),
    })
}

/// First version-looking token of a `version --short` output
pub fn parse_version(output: &str) -> Result<Option<Version>> {
    let output = output.trim();
    if output.is_empty() {
        return Ok(None);
    }
    output
        .split_whitespace()
        .map(|t| t.trim_start_matches('v'))
        .find_map(|t| Version::parse(t).ok())
        .map(Some)
        .ok_or_else(|| KeelError::InvalidVersion(output.to_string()))
}

pub fn parse_environment(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().trim_matches('"').to_string()))
        .collect()
}

/// `current` with every entry of `wanted` set, rendered as an environment file
pub fn render_environment(
    current: &BTreeMap<String, String>,
    wanted: &BTreeMap<String, String>,
) -> String {
    let mut merged = current.clone();
    merged.extend(wanted.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"\n", k, v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterParser;

    const DOCUMENT: &str = r#"
name: prod
hosts:
  - role: control-plane
    ssh:
      address: 10.0.0.1
control_plane:
  version: 3.7.0
  image_repo: mirror.local/keel
runtime:
  version: 23.0.7
"#;

    fn products() -> Products {
        Products::from_spec(&ClusterParser::parse_str(DOCUMENT).unwrap())
    }

    #[test]
    fn test_os_release() {
        let ubuntu = "NAME=\"Ubuntu\"\nID=ubuntu\nVERSION_ID=\"22.04\"\n";
        assert_eq!(parse_os_release(ubuntu).unwrap(), "ubuntu-22.04");

        let err = parse_os_release("ID=plan9\n").unwrap_err();
        assert!(matches!(err, KeelError::UnsupportedHost(_)));
        assert!(parse_os_release("").is_err());
    }

    #[test]
    fn test_version_output() {
        assert_eq!(parse_version("").unwrap(), None);
        assert_eq!(
            parse_version("keel-agent v3.7.0\n").unwrap(),
            Some(Version::new(3, 7, 0))
        );
        assert!(parse_version("garbage").is_err());
    }

    #[test]
    fn test_environment_merge() {
        let current = parse_environment("# comment\nPATH=\"/usr/bin\"\nLANG=C\n");
        assert_eq!(current.len(), 2);

        let wanted = BTreeMap::from([("LANG".to_string(), "en_US.UTF-8".to_string())]);
        let rendered = render_environment(&current, &wanted);
        assert_eq!(rendered, "LANG=\"en_US.UTF-8\"\nPATH=\"/usr/bin\"\n");
    }

    #[test]
    fn test_apply_commands() {
        let p = products();
        let mut flags = Flags::new();
        flags.add("--san=10.0.0.1");

        let install = p.apply(Component::ControlPlane, &Version::new(3, 7, 0), &flags, false);
        assert!(install.contains("mirror.local/keel/keel-bootstrap:3.7.0 install"));
        assert!(install.ends_with("--san=10.0.0.1"));

        let upgrade = p.apply(Component::ControlPlane, &Version::new(3, 7, 0), &Flags::new(), true);
        assert!(upgrade.ends_with("upgrade"));

        let runtime = p.apply(Component::Runtime, &Version::new(23, 0, 7), &Flags::new(), false);
        assert!(runtime.contains("--channel stable --version 23.0.7"));
    }

    #[test]
    fn test_join_reads_token_from_stdin() {
        let cmd = products().join(Role::Worker, "10.0.0.1");
        assert!(cmd.ends_with("join --role worker --leader 10.0.0.1 --token-stdin"));
        assert_eq!(join_token(Role::ControlPlane), "keel-agent join-token manager --quiet");
    }
}
