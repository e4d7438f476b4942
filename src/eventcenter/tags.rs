//! Placeholder substitution in event text
//!
//! Event text may contain `{machine}`, `{app}`, `{daemon}` and `{subnet}`.
//! Each is replaced with a tag describing the related entity, and the
//! entity's id is recorded in the event relations.

use crate::model::{App, AppType, Daemon, EventLevel, Machine, NewEvent, Relations, Subnet};

/// An entity an event refers to
#[derive(Debug, Clone, Copy)]
pub enum Related<'a> {
    Machine(&'a Machine),
    App(&'a App),
    /// Daemons carry the type of the app they belong to for their tag
    Daemon {
        daemon: &'a Daemon,
        app_type: AppType,
    },
    Subnet(&'a Subnet),
}

/// Escape a value for use inside a double-quoted tag attribute
fn escape_attr(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            c => escaped.push(c),
        }
    }
    escaped
}

pub fn machine_tag(machine: &Machine) -> String {
    format!(
        "<machine id=\"{}\" address=\"{}\" hostname=\"{}\">",
        machine.id,
        escape_attr(&machine.address),
        escape_attr(machine.hostname.as_deref().unwrap_or_default())
    )
}

pub fn app_tag(app: &App) -> String {
    format!(
        "<app id=\"{}\" type=\"{}\" version=\"{}\">",
        app.id,
        app.app_type,
        escape_attr(app.version.as_deref().unwrap_or_default())
    )
}

pub fn daemon_tag(daemon: &Daemon, app_type: AppType) -> String {
    format!(
        "<daemon id=\"{}\" name=\"{}\" appId=\"{}\" appType=\"{}\">",
        daemon.id,
        escape_attr(&daemon.name),
        daemon.app_id,
        app_type
    )
}

pub fn subnet_tag(subnet: &Subnet) -> String {
    format!(
        "<subnet id=\"{}\" prefix=\"{}\">",
        subnet.id,
        escape_attr(&subnet.prefix)
    )
}

/// Replace every known placeholder of `text` in a single pass
///
/// Inserted tags are never scanned again, so placeholders appearing in
/// entity attributes stay as they are. Unknown or unresolved placeholders
/// are kept verbatim.
fn resolve_placeholders(text: &str, tag: impl Fn(&str) -> Option<String>) -> String {
    let mut resolved = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('{') {
        resolved.push_str(&rest[..start]);
        let tail = &rest[start..];

        let replacement = tail
            .find('}')
            .and_then(|end| tag(&tail[1..end]).map(|tag| (tag, end)));
        match replacement {
            Some((tag, end)) => {
                resolved.push_str(&tag);
                rest = &tail[end + 1..];
            }
            None => {
                resolved.push('{');
                rest = &tail[1..];
            }
        }
    }

    resolved.push_str(rest);
    resolved
}

/// Build an event without submitting it
///
/// When several entities of one kind are given, the last of them is used
/// for both the text and the relations.
pub fn create_event(level: EventLevel, text: &str, objects: &[Related<'_>]) -> NewEvent {
    let mut machine = None;
    let mut app = None;
    let mut daemon = None;
    let mut subnet = None;

    for object in objects {
        match *object {
            Related::Machine(m) => machine = Some(m),
            Related::App(a) => app = Some(a),
            Related::Daemon { daemon: d, app_type } => daemon = Some((d, app_type)),
            Related::Subnet(s) => subnet = Some(s),
        }
    }

    let relations = Relations {
        machine: machine.map(|m| m.id),
        app: app.map(|a| a.id),
        daemon: daemon.map(|(d, _)| d.id),
        subnet: subnet.map(|s| s.id),
    };

    let text = resolve_placeholders(text, |name| match name {
        "machine" => machine.map(machine_tag),
        "app" => app.map(app_tag),
        "daemon" => daemon.map(|(d, app_type)| daemon_tag(d, app_type)),
        "subnet" => subnet.map(subnet_tag),
        _ => None,
    });

    NewEvent {
        level,
        text,
        relations,
    }
}
