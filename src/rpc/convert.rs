//! Domain ↔ wire conversions. Kept separate from `service.rs` so the RPC
//! handlers read as plain dispatch and the marshalling stays in one place.

use crate::error::Error;
use crate::event::{Event, MutationKind};
use crate::graph::{GraphEdge, GraphNode, MutationPath};
use crate::node::{Node, NodeId};
use crate::store::View;
use crate::value::Value;
use std::collections::BTreeMap;

use super::pb;

pub fn value_to_pb(value: &Value) -> pb::Value {
    use pb::value::Kind;
    let kind = match value {
        Value::Bool(b) => Kind::BoolValue(*b),
        Value::Int(i) => Kind::IntValue(*i),
        Value::Str(s) => Kind::StrValue(s.clone()),
        Value::Bytes(b) => Kind::BytesValue(b.clone()),
        Value::Enum(e) => Kind::EnumValue(e.clone()),
        Value::Record(fields) => Kind::RecordValue(pb::Record {
            fields: fields.iter().map(|(k, v)| (k.clone(), value_to_pb(v))).collect(),
        }),
        Value::List(items) => Kind::ListValue(pb::ValueList {
            items: items.iter().map(value_to_pb).collect(),
        }),
    };
    pb::Value { kind: Some(kind) }
}

pub fn pb_to_value(value: pb::Value) -> Result<Value, Error> {
    use pb::value::Kind;
    let kind = value
        .kind
        .ok_or_else(|| Error::InvalidArgument("value missing kind".to_string()))?;
    Ok(match kind {
        Kind::BoolValue(b) => Value::Bool(b),
        Kind::IntValue(i) => Value::Int(i),
        Kind::StrValue(s) => Value::Str(s),
        Kind::BytesValue(b) => Value::Bytes(b),
        Kind::EnumValue(e) => Value::Enum(e),
        Kind::RecordValue(r) => {
            let mut fields = BTreeMap::new();
            for (k, v) in r.fields {
                fields.insert(k, pb_to_value(v)?);
            }
            Value::Record(fields)
        }
        Kind::ListValue(l) => {
            let mut items = Vec::with_capacity(l.items.len());
            for v in l.items {
                items.push(pb_to_value(v)?);
            }
            Value::List(items)
        }
    })
}

pub fn node_to_pb(node: &Node) -> pb::Node {
    pb::Node {
        id: node.id.to_string(),
        fields: node.fields.iter().map(|(k, v)| (k.clone(), value_to_pb(v))).collect(),
    }
}

pub fn pb_to_node(node: pb::Node) -> Result<Node, Error> {
    let mut n = Node::new(NodeId::new(node.id));
    for (k, v) in node.fields {
        n.set_field(k, pb_to_value(v)?);
    }
    Ok(n)
}

pub fn graph_node_to_pb(n: &GraphNode) -> pb::MutationGraphNode {
    pb::MutationGraphNode {
        url: n.url.clone(),
        value: Some(value_to_pb(&n.value)),
    }
}

pub fn graph_edge_to_pb(e: &GraphEdge) -> pb::MutationGraphEdge {
    pb::MutationGraphEdge {
        module: e.module.clone(),
        id: e.id.clone(),
        from: e.from.clone(),
        to: e.to.clone(),
        requires: e.requires.clone(),
        excludes: e.excludes.clone(),
    }
}

pub fn mutation_path_to_pb(p: &MutationPath) -> pb::MutationPath {
    pb::MutationPath {
        edges: p.edges.iter().map(graph_edge_to_pb).collect(),
    }
}

pub fn view_to_pb(view: View) -> i32 {
    match view {
        View::Cfg => pb::View::Cfg as i32,
        View::Dsc => pb::View::Dsc as i32,
    }
}

pub fn mutation_kind_to_pb(kind: MutationKind) -> i32 {
    match kind {
        MutationKind::Add => pb::MutationKind::Add as i32,
        MutationKind::Remove => pb::MutationKind::Remove as i32,
    }
}

/// Re-tags a domain `Event` into the wire union by concrete type, for
/// `EventInit` to send as-is. There's no "unknown" case today since `Event`
/// is a closed enum, but a future variant would fall through to `None` here
/// and be logged-and-skipped by the caller rather than panicking.
pub fn event_to_pb(event: &Event) -> Option<pb::EventControl> {
    match event {
        Event::Mutation {
            module_id,
            mutation_id,
            kind,
            node_cfg,
            node_dsc,
        } => Some(pb::EventControl {
            r#type: pb::event_control::Type::Mutation as i32,
            event: Some(pb::event_control::Event::MutationControl(pb::MutationControl {
                module: module_id.clone(),
                id: mutation_id.clone(),
                r#type: mutation_kind_to_pb(*kind),
                cfg: Some(node_to_pb(node_cfg)),
                dsc: Some(node_to_pb(node_dsc)),
            })),
        }),
        Event::StateChange { view, url, value } => Some(pb::EventControl {
            r#type: pb::event_control::Type::StateChange as i32,
            event: Some(pb::event_control::Event::StateChangeControl(pb::StateChangeControl {
                view: view_to_pb(*view),
                url: url.clone(),
                value: value.to_wire_string(),
            })),
        }),
        Event::Discovery { service_id, url, value_id } => Some(pb::EventControl {
            r#type: pb::event_control::Type::Discovery as i32,
            event: Some(pb::event_control::Event::DiscoveryControl(pb::DiscoveryControl {
                id: service_id.clone(),
                url: url.clone(),
                value_id: value_id.clone(),
            })),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    #[test]
    fn value_round_trips_through_pb_for_each_kind() {
        let values = vec![
            Value::Bool(true),
            Value::Int(-42),
            Value::Str("hi".to_string()),
            Value::Bytes(vec![1, 2, 3]),
            Value::Enum("POWER_ON".to_string()),
            Value::List(vec![Value::Int(1), Value::Int(2)]),
        ];
        for v in values {
            let wire = value_to_pb(&v);
            assert_eq!(pb_to_value(wire).unwrap(), v);
        }
    }

    #[test]
    fn record_round_trips_through_pb() {
        let mut fields = Map::new();
        fields.insert("physState".to_string(), Value::Enum("POWER_ON".to_string()));
        let v = Value::Record(fields);
        let wire = value_to_pb(&v);
        assert_eq!(pb_to_value(wire).unwrap(), v);
    }

    #[test]
    fn node_round_trips_through_pb() {
        let mut node = Node::new(NodeId::new("n1"));
        node.set_field("physState", Value::Enum("POWER_ON".to_string()));
        let wire = node_to_pb(&node);
        assert_eq!(pb_to_node(wire).unwrap(), node);
    }
}
