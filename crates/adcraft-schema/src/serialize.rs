//! Manifest emission: the inverse of [`parse_manifest_str`](crate::parse_manifest_str).
//!
//! Output is a compact object literal: bare keys where the key is a plain
//! ASCII identifier, double-quoted strings, integers without a fraction, and
//! the shortest round-tripping representation for everything else.

use crate::manifest::Manifest;
use crate::value::{Object, Value};
use std::fmt::Write as _;

/// Emit the full manifest statement: the original assignment prefix, the
/// object literal, and any trailing script text.
pub fn serialize_manifest(manifest: &Manifest) -> String {
    let mut out = String::with_capacity(manifest.prefix().len() + 1024);
    out.push_str(manifest.prefix());
    write_object(&mut out, manifest.root());
    out.push_str(manifest.suffix());
    out
}

/// Emit a single value as an object-literal fragment.
pub fn to_literal(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

pub(crate) fn format_number(n: f64) -> String {
    if !n.is_finite() {
        // Not representable as a literal; the runtime treats these as absent.
        return "null".to_owned();
    }
    if n.fract() == 0.0 && n.abs() < 1e15 {
        return format!("{}", n as i64);
    }
    format!("{n}")
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&format_number(*n)),
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(obj) => write_object(out, obj),
    }
}

fn write_object(out: &mut String, obj: &Object) {
    out.push('{');
    for (i, (key, value)) in obj.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        if is_bare_key(key) {
            out.push_str(key);
        } else {
            write_string(out, key);
        }
        out.push(':');
        write_value(out, value);
    }
    out.push('}');
}

fn is_bare_key(key: &str) -> bool {
    let mut chars = key.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        && !matches!(key, "true" | "false" | "null")
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            // Script line terminators are not allowed raw inside older runtimes' string literals.
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
