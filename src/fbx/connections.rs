use super::ObjectId;
use super::record::Record;
use std::collections::HashMap;

/// One edge of the object graph, seen from one of its endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub id: ObjectId,
    /// Property name for `OP` connections, e.g. `DiffuseColor` or `d|X`.
    pub relationship: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connections {
    pub parents: Vec<Link>,
    pub children: Vec<Link>,
}

/// Bidirectional id -> {parents, children} map built from the `Connections` section.
/// Dangling ids are kept, they simply never match an object downstream.
#[derive(Debug, Clone, Default)]
pub struct ConnectionsGraph {
    map: HashMap<ObjectId, Connections>,
}

impl ConnectionsGraph {
    /// Builds the graph from the `Connections` record, whose `C` children are
    /// `(kind, child, parent, relationship?)`.
    pub fn build(connections: &Record) -> Self {
        let mut out = Self::default();
        for c in connections.children_named("C") {
            let (Some(child), Some(parent)) = (c.prop_i64(1), c.prop_i64(2)) else {
                log::debug!("skipping connection with missing ids: {:?}", c.props);
                continue;
            };
            let relationship = c.prop_str(3).map(str::to_string);
            out.connect(child, parent, relationship);
        }
        out
    }

    pub fn connect(&mut self, child: ObjectId, parent: ObjectId, relationship: Option<String>) {
        self.map.entry(child).or_default().parents.push(Link {
            id: parent,
            relationship: relationship.clone(),
        });
        self.map.entry(parent).or_default().children.push(Link {
            id: child,
            relationship,
        });
    }

    pub fn get(&self, id: ObjectId) -> Option<&Connections> {
        self.map.get(&id)
    }

    pub fn parents(&self, id: ObjectId) -> &[Link] {
        self.map.get(&id).map(|c| c.parents.as_slice()).unwrap_or(&[])
    }

    pub fn children(&self, id: ObjectId) -> &[Link] {
        self.map.get(&id).map(|c| c.children.as_slice()).unwrap_or(&[])
    }

    /// Children attached through a specific relationship label.
    pub fn children_labeled<'a>(
        &'a self,
        id: ObjectId,
        label: &'a str,
    ) -> impl Iterator<Item = ObjectId> + 'a {
        self.children(id)
            .iter()
            .filter(move |l| l.relationship.as_deref() == Some(label))
            .map(|l| l.id)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
use crate::fbx::record::Data;

#[cfg(test)]
fn c(kind: &str, child: i64, parent: i64, rel: Option<&str>) -> Record {
    let mut props = vec![Data::str(kind), Data::I64(child), Data::I64(parent)];
    props.extend(rel.map(Data::str));
    Record::new("C", props, vec![])
}

#[test]
fn test_bidirectional_edges() {
    let conns = Record::new(
        "Connections",
        vec![],
        vec![
            c("OO", 10, 0, None),
            c("OP", 20, 30, Some("DiffuseColor")),
            // a bone is both child of a cluster and parent of another bone
            c("OO", 40, 50, None),
            c("OO", 60, 40, None),
        ],
    );
    let g = ConnectionsGraph::build(&conns);
    assert_eq!(g.parents(10)[0].id, 0);
    assert_eq!(g.children(0)[0].id, 10);
    assert_eq!(
        g.parents(20)[0].relationship.as_deref(),
        Some("DiffuseColor")
    );
    assert_eq!(g.children_labeled(30, "DiffuseColor").collect::<Vec<_>>(), [20]);
    assert_eq!(g.parents(40).len(), 1);
    assert_eq!(g.children(40).len(), 1);
    // dangling ids are tolerated
    assert!(g.parents(999).is_empty());
}
