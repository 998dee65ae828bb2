//! Renders the resource-agent descriptor printed by `meta-data`.
//!
//! Parameter defaults are taken from the current configuration, so an
//! operator inspecting a node sees the values the agent would actually use.

use crate::config::InstanceConfig;

/// Agent name advertised to the cluster manager.
pub const AGENT_NAME: &str = "pgsql";

/// Descriptor schema version.
pub const AGENT_VERSION: &str = "1.0";

struct Parameter<'a> {
    name: &'static str,
    shortdesc: &'static str,
    longdesc: &'static str,
    default: &'a str,
}

/// Renders the descriptor document for `config`.
#[must_use]
pub fn render(config: &InstanceConfig) -> String {
    let port = config.port.to_string();
    let parameters = [
        Parameter {
            name: "pgctlcluster",
            shortdesc: "pg_ctlcluster",
            longdesc: "Path to pg_ctlcluster command.",
            default: config.pgctlcluster.as_str(),
        },
        Parameter {
            name: "version",
            shortdesc: "version",
            longdesc: "Postgresql version of this cluster.",
            default: &config.version,
        },
        Parameter {
            name: "clustername",
            shortdesc: "clustername",
            longdesc: "Name of cluster.",
            default: &config.cluster_name,
        },
        Parameter {
            name: "port",
            shortdesc: "port",
            longdesc: "Port number used by cluster.",
            default: &port,
        },
        Parameter {
            name: "user",
            shortdesc: "user",
            longdesc: "User name running the cluster.",
            default: &config.user,
        },
        Parameter {
            name: "primary",
            shortdesc: "primary_conninfo",
            longdesc: "Connection details to primary server.",
            default: &config.primary_conninfo,
        },
        Parameter {
            name: "restorecommand",
            shortdesc: "restorecommand",
            longdesc: "Command to restore WAL archive.",
            default: config.restore_command.as_deref().unwrap_or_default(),
        },
        Parameter {
            name: "database",
            shortdesc: "database",
            longdesc: "Name of database for monitoring connections.",
            default: &config.database,
        },
        Parameter {
            name: "datadir",
            shortdesc: "datadir",
            longdesc: "Directory where data for this cluster is stored.",
            default: config.data_dir.as_str(),
        },
        Parameter {
            name: "sbindir",
            shortdesc: "sbindir",
            longdesc: "Directory where cluster utilities are stored.",
            default: config.sbin_dir.as_str(),
        },
        Parameter {
            name: "rundir",
            shortdesc: "rundir",
            longdesc: "Directory holding the cluster pid file and Unix socket.",
            default: config.run_dir.as_str(),
        },
    ];

    let mut params = String::new();
    for parameter in &parameters {
        params.push_str(&format!(
            "        <parameter name=\"{name}\" unique=\"0\" required=\"0\">\n\
             \x20           <longdesc lang=\"en\">{longdesc}</longdesc>\n\
             \x20           <shortdesc lang=\"en\">{shortdesc}</shortdesc>\n\
             \x20           <content type=\"string\" default=\"{default}\" />\n\
             \x20       </parameter>\n",
            name = parameter.name,
            longdesc = parameter.longdesc,
            shortdesc = parameter.shortdesc,
            default = escape_xml(parameter.default),
        ));
    }

    format!(
        r#"<?xml version="1.0"?>
<!DOCTYPE resource-agent SYSTEM "ra-api-1.dtd">
<resource-agent name="{AGENT_NAME}">
    <version>{AGENT_VERSION}</version>

    <longdesc lang="en">
    Resource agent to manage PostgreSQL as an HA resource in binary streaming
    replication mode.
    </longdesc>
    <shortdesc lang="en">Manages a PostgreSQL database cluster</shortdesc>

    <parameters>
{params}    </parameters>

    <actions>
        <action name="start" timeout="30" />
        <action name="stop" timeout="30" />
        <action name="status" timeout="10" />
        <action name="monitor" depth="0" timeout="10" interval="30" />
        <action name="monitor" depth="0" timeout="10" interval="29" role="Master" />
        <action name="promote" timeout="60" />
        <action name="demote" timeout="90" />
        <action name="notify" timeout="45" />
        <action name="meta-data" timeout="5" />
        <action name="methods" timeout="5" />
    </actions>
</resource-agent>
"#
    )
}

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}
