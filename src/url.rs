//! Value addressing: parsing and resolving
//! `<nodeID>/<field>(\.<field>|\[<key>\])*` URLs against a [`Value`] tree.

use crate::error::{Error, Result};
use crate::value::Value;
use std::fmt;

/// One step of a field path: either a descent into a named field, or an
/// index into a repeated field by the key of one of its elements.
#[derive(Clone, Debug, PartialEq)]
pub enum Segment {
    Field(String),
    Index(String),
}

/// A parsed `nodeID/field.path[key]` address.
#[derive(Clone, Debug, PartialEq)]
pub struct Url {
    pub node_id: String,
    pub segments: Vec<Segment>,
}

impl fmt::Display for Url {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.node_id)?;
        for seg in &self.segments {
            match seg {
                Segment::Field(name) => write!(f, "/{}", name)?,
                Segment::Index(key) => write!(f, "[{}]", key)?,
            }
        }
        Ok(())
    }
}

impl Url {
    /// Parses `"[/"]<nodeID>/<field>(\.<field>|\[<key>\])*"`. A bare node id
    /// with no field path (just `"n1"`) is valid and yields an empty segment
    /// list — used by whole-node operations like `Read`/`Delete`.
    pub fn parse(raw: &str) -> Result<Url> {
        let trimmed = raw.strip_prefix('/').unwrap_or(raw);
        if trimmed.is_empty() {
            return Err(Error::InvalidArgument("empty url".to_string()));
        }

        let (node_id, field_path) = match trimmed.split_once('/') {
            Some((id, rest)) => (id, rest),
            None => (trimmed, ""),
        };
        if node_id.is_empty() {
            return Err(Error::InvalidArgument(format!("missing node id in '{}'", raw)));
        }

        let segments = parse_field_path(field_path)
            .map_err(|msg| Error::InvalidArgument(format!("invalid url '{}': {}", raw, msg)))?;

        Ok(Url {
            node_id: node_id.to_string(),
            segments,
        })
    }

    /// The synthetic whole-node url (`nodeID`, no field path), used for the
    /// `/` change published alongside Create/Delete.
    pub fn whole_node(node_id: &str) -> Url {
        Url {
            node_id: node_id.to_string(),
            segments: Vec::new(),
        }
    }
}

fn parse_field_path(path: &str) -> std::result::Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    if path.is_empty() {
        return Ok(segments);
    }

    let mut buf = String::new();
    let mut chars = path.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if buf.is_empty() {
                    return Err("empty field segment before '.'".to_string());
                }
                segments.push(Segment::Field(std::mem::take(&mut buf)));
            }
            '[' => {
                if !buf.is_empty() {
                    segments.push(Segment::Field(std::mem::take(&mut buf)));
                }
                let mut key = String::new();
                let mut closed = false;
                for c2 in chars.by_ref() {
                    if c2 == ']' {
                        closed = true;
                        break;
                    }
                    key.push(c2);
                }
                if !closed {
                    return Err("unterminated '[' index".to_string());
                }
                if key.is_empty() {
                    return Err("empty index key".to_string());
                }
                segments.push(Segment::Index(key));
            }
            ']' => return Err("unexpected ']'".to_string()),
            _ => buf.push(c),
        }
    }
    if !buf.is_empty() {
        segments.push(Segment::Field(buf));
    }
    if segments.is_empty() {
        return Err("empty field path".to_string());
    }
    Ok(segments)
}

/// Default key field name used to address elements of a repeated field by
/// `field[key]`. Kraken uses a single convention (`"id"`) across all
/// repeated fields rather than a per-schema table, since the data model has
/// no static schema to hang per-type metadata off of.
pub const LIST_KEY_FIELD: &str = "id";

/// Resolves `segments` against `root`, returning the addressed value or
/// `NotFound`.
pub fn get_value<'a>(root: &'a Value, segments: &[Segment]) -> Result<&'a Value> {
    let mut current = root;
    for seg in segments {
        current = match (current, seg) {
            (Value::Record(fields), Segment::Field(name)) => fields
                .get(name)
                .ok_or_else(|| Error::NotFound(format!("field '{}'", name)))?,
            (Value::List(items), Segment::Index(key)) => find_by_key(items, key)
                .ok_or_else(|| Error::NotFound(format!("index '{}'", key)))?,
            _ => return Err(Error::NotFound("path does not resolve against value shape".to_string())),
        };
    }
    Ok(current)
}

fn find_by_key<'a>(items: &'a [Value], key: &str) -> Option<&'a Value> {
    items.iter().find(|item| match item {
        Value::Record(fields) => fields
            .get(LIST_KEY_FIELD)
            .map(|v| v.to_wire_string() == key)
            .unwrap_or(false),
        _ => false,
    })
}

fn find_by_key_mut<'a>(items: &'a mut [Value], key: &str) -> Option<&'a mut Value> {
    items.iter_mut().find(|item| match item {
        Value::Record(fields) => fields
            .get(LIST_KEY_FIELD)
            .map(|v| v.to_wire_string() == key)
            .unwrap_or(false),
        _ => false,
    })
}

/// Sets the value addressed by `segments` inside `root`, creating
/// intermediate `Record`s as needed. Fails with `TypeMismatch` if a value
/// already exists at the leaf with a different kind.
pub fn set_value(root: &mut Value, segments: &[Segment], new_value: Value) -> Result<()> {
    let Some((last, prefix)) = segments.split_last() else {
        return Err(Error::InvalidArgument("cannot set the whole node in one call".to_string()));
    };

    let mut current = root;
    for seg in prefix {
        current = match (current, seg) {
            (Value::Record(fields), Segment::Field(name)) => fields
                .entry(name.clone())
                .or_insert_with(|| Value::Record(Default::default())),
            (Value::List(items), Segment::Index(key)) => {
                find_by_key_mut(items, key).ok_or_else(|| Error::NotFound(format!("index '{}'", key)))?
            }
            _ => return Err(Error::NotFound("path does not resolve against value shape".to_string())),
        };
    }

    match (current, last) {
        (Value::Record(fields), Segment::Field(name)) => {
            if let Some(existing) = fields.get(name) {
                if !existing.same_kind(&new_value) {
                    return Err(Error::TypeMismatch {
                        url: name.clone(),
                        expected: existing.kind_name(),
                    });
                }
            }
            fields.insert(name.clone(), new_value);
            Ok(())
        }
        (Value::List(items), Segment::Index(key)) => {
            let slot = find_by_key_mut(items, key).ok_or_else(|| Error::NotFound(format!("index '{}'", key)))?;
            if !slot.same_kind(&new_value) {
                return Err(Error::TypeMismatch {
                    url: key.clone(),
                    expected: slot.kind_name(),
                });
            }
            *slot = new_value;
            Ok(())
        }
        _ => Err(Error::NotFound("path does not resolve against value shape".to_string())),
    }
}
