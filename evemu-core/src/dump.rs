//! Human readable rendering of value trees for diagnostics.

use std::fmt::Write;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace};

use crate::codec::DecodeLimits;
use crate::value::WireValue;

const INDENT: &str = "  ";

/// Verbosity gate for tree dumps. `Off` turns every dump call site into a
/// no-op without touching the call sites themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpLevel {
    #[default]
    Off,
    Error,
    Info,
    Debug,
    Trace,
}

impl DumpLevel {
    /// Whether a dump at this level would reach the log.
    pub fn is_enabled(self) -> bool {
        match self {
            DumpLevel::Off => false,
            DumpLevel::Error => tracing::enabled!(target: "evemu::dump", tracing::Level::ERROR),
            DumpLevel::Info => tracing::enabled!(target: "evemu::dump", tracing::Level::INFO),
            DumpLevel::Debug => tracing::enabled!(target: "evemu::dump", tracing::Level::DEBUG),
            DumpLevel::Trace => tracing::enabled!(target: "evemu::dump", tracing::Level::TRACE),
        }
    }
}

/// Render `value` as an indented tree, one node per line.
///
/// Nodes nested more than [`DecodeLimits::max_depth`] levels below the root,
/// counting through embedded sub-streams, are summarised by an elision line
/// instead of being walked.
pub fn render(value: &WireValue) -> String {
    render_with_limits(value, DecodeLimits::default())
}

pub fn render_with_limits(value: &WireValue, limits: DecodeLimits) -> String {
    let mut out = String::new();
    render_into(value, 0, limits.max_depth, &mut out);
    // drop the final newline
    out.pop();
    out
}

fn indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn render_into(value: &WireValue, depth: usize, max_depth: usize, out: &mut String) {
    indent(depth, out);

    // writing to a String cannot fail
    let _ = match value {
        WireValue::None => writeln!(out, "[None]"),
        WireValue::Int(v) => writeln!(out, "[Int {}]", v),
        WireValue::Long(v) => writeln!(out, "[Long {}]", v),
        WireValue::Bool(v) => writeln!(out, "[Bool {}]", if *v { "True" } else { "False" }),
        WireValue::Str(s) => writeln!(out, "[Str {:?}]", s),
        WireValue::List(items) => writeln!(out, "[List {} items]", items.len()),
        WireValue::Tuple(items) => writeln!(out, "[Tuple {} items]", items.len()),
        WireValue::Dict(pairs) => writeln!(out, "[Dict {} kvp]", pairs.len()),
        WireValue::SubStream(sub) => writeln!(out, "[SubStream {} bytes]", sub.raw().len()),
        WireValue::Object { type_tag, .. } => writeln!(out, "[Object {}]", type_tag),
    };

    if depth >= max_depth {
        let has_children = match value {
            WireValue::List(items) | WireValue::Tuple(items) => !items.is_empty(),
            WireValue::Dict(pairs) => !pairs.is_empty(),
            WireValue::Object { .. } => true,
            _ => false,
        };
        if has_children {
            indent(depth + 1, out);
            out.push_str("...\n");
        }
        return;
    }

    match value {
        WireValue::List(items) | WireValue::Tuple(items) => {
            for item in items {
                render_into(item, depth + 1, max_depth, out);
            }
        }
        WireValue::Dict(pairs) => {
            for (key, val) in pairs {
                render_into(key, depth + 1, max_depth, out);
                render_into(val, depth + 1, max_depth, out);
            }
        }
        WireValue::Object { payload, .. } => render_into(payload, depth + 1, max_depth, out),
        WireValue::SubStream(sub) => {
            // the inner root sits at depth + 1, so only the rest of the budget is left
            let remaining = DecodeLimits {
                max_depth: max_depth - depth - 1,
            };
            match sub.value_with_limits(remaining) {
                Ok(inner) => render_into(inner, depth + 1, max_depth, out),
                Err(e) => {
                    indent(depth + 1, out);
                    let _ = writeln!(out, "<undecodable: {}>", e);
                }
            }
        }
        _ => {}
    }
}

/// Emit `value` through the log at `level`, prefixed by `label`. Nothing is
/// rendered when the gate is off or the subscriber filters the level out.
pub fn dump(level: DumpLevel, label: &str, value: &WireValue) {
    if !level.is_enabled() {
        return;
    }

    let rendered = render(value);
    match level {
        DumpLevel::Off => {}
        DumpLevel::Error => error!(target: "evemu::dump", "{}\n{}", label, rendered),
        DumpLevel::Info => info!(target: "evemu::dump", "{}\n{}", label, rendered),
        DumpLevel::Debug => debug!(target: "evemu::dump", "{}\n{}", label, rendered),
        DumpLevel::Trace => trace!(target: "evemu::dump", "{}\n{}", label, rendered),
    }
}
