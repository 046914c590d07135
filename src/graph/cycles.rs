//! Cycle detection over capability dependency edges
//!
//! Edges point from a declaring capability to a capability its module
//! depends on. Strongly-connected components are found with Tarjan's
//! algorithm; a concrete path through one component is then recovered by a
//! breadth-first search over the reversed edges for error messages.

use indexmap::{IndexMap, IndexSet};
use std::collections::{HashMap, VecDeque};

/// Directed edge `declarer -> dependency`
pub type Edge = (String, String);

/// Adjacency list keyed by node, in discovery order
pub type Adjacency = IndexMap<String, Vec<String>>;

/// Build an adjacency list from edges, keeping first-seen node order
pub fn adjacency_from_edges(edges: &[Edge]) -> Adjacency {
    let mut adjacency: Adjacency = IndexMap::new();
    for (from, to) in edges {
        adjacency.entry(from.clone()).or_default().push(to.clone());
        adjacency.entry(to.clone()).or_default();
    }
    adjacency
}

struct Tarjan<'a> {
    adjacency: &'a Adjacency,
    index: usize,
    indices: HashMap<&'a str, usize>,
    lowlinks: HashMap<&'a str, usize>,
    stack: Vec<&'a str>,
    on_stack: IndexSet<&'a str>,
    groups: Vec<Vec<String>>,
}

impl<'a> Tarjan<'a> {
    fn new(adjacency: &'a Adjacency) -> Self {
        Self {
            adjacency,
            index: 0,
            indices: HashMap::new(),
            lowlinks: HashMap::new(),
            stack: Vec::new(),
            on_stack: IndexSet::new(),
            groups: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Vec<String>> {
        for node in self.adjacency.keys() {
            if !self.indices.contains_key(node.as_str()) {
                self.strong_connect(node.as_str());
            }
        }
        self.groups
    }

    fn strong_connect(&mut self, node: &'a str) {
        self.indices.insert(node, self.index);
        self.lowlinks.insert(node, self.index);
        self.index += 1;
        self.stack.push(node);
        self.on_stack.insert(node);

        let adjacency = self.adjacency;
        if let Some(neighbours) = adjacency.get(node) {
            for next in neighbours {
                let next = next.as_str();
                if !self.indices.contains_key(next) {
                    self.strong_connect(next);
                    let low = self.lowlinks[node].min(self.lowlinks[next]);
                    self.lowlinks.insert(node, low);
                } else if self.on_stack.contains(next) {
                    let low = self.lowlinks[node].min(self.indices[next]);
                    self.lowlinks.insert(node, low);
                }
            }
        }

        if self.lowlinks[node] == self.indices[node] {
            let mut group = Vec::new();
            while let Some(member) = self.stack.pop() {
                self.on_stack.shift_remove(member);
                group.push(member.to_string());
                if member == node {
                    break;
                }
            }
            group.reverse();
            self.groups.push(group);
        }
    }
}

/// Strongly-connected components with more than one node
///
/// Self-loops form single-node components and are not reported.
pub fn detect_cycles(edges: &[Edge]) -> Vec<Vec<String>> {
    let adjacency = adjacency_from_edges(edges);
    Tarjan::new(&adjacency)
        .run()
        .into_iter()
        .filter(|group| group.len() > 1)
        .collect()
}

/// One concrete cycle, as a node list that starts and ends on the same node
///
/// Searches breadth-first over reversed edges from `start`, or from each
/// node in turn when no start is given.
pub fn find_cycle_path(adjacency: &Adjacency, start: Option<&str>) -> Option<Vec<String>> {
    let mut reversed: IndexMap<&str, Vec<&str>> = IndexMap::new();
    for (from, targets) in adjacency {
        for to in targets.iter().filter(|to| *to != from) {
            reversed.entry(to.as_str()).or_default().push(from.as_str());
        }
    }

    let candidates: Vec<&str> = match start {
        Some(node) => vec![node],
        None => adjacency.keys().map(String::as_str).collect(),
    };

    candidates
        .into_iter()
        .find_map(|origin| reversed_search(&reversed, origin))
}

fn reversed_search(reversed: &IndexMap<&str, Vec<&str>>, origin: &str) -> Option<Vec<String>> {
    let mut parents: HashMap<&str, &str> = HashMap::new();
    let mut queue: VecDeque<&str> = VecDeque::from([origin]);

    while let Some(current) = queue.pop_front() {
        for &declarer in reversed.get(current).map(Vec::as_slice).unwrap_or(&[]) {
            if declarer == origin {
                // parents[x] = y means x -> y, so the walk is already forward
                let mut path = vec![origin.to_string()];
                let mut node = current;
                while node != origin {
                    path.push(node.to_string());
                    node = parents[node];
                }
                path.push(origin.to_string());
                return Some(path);
            }
            if declarer != origin && !parents.contains_key(declarer) {
                parents.insert(declarer, current);
                queue.push_back(declarer);
            }
        }
    }
    None
}

/// Human-readable description of the first cycle found, if any
pub fn describe_first_cycle(edges: &[Edge]) -> Option<String> {
    let group = detect_cycles(edges).into_iter().next()?;
    let members: IndexSet<&str> = group.iter().map(String::as_str).collect();

    let mut adjacency: Adjacency = IndexMap::new();
    for (from, to) in edges {
        if members.contains(from.as_str()) && members.contains(to.as_str()) {
            adjacency.entry(from.clone()).or_default().push(to.clone());
        }
    }

    let path = find_cycle_path(&adjacency, group.first().map(String::as_str))
        .unwrap_or_else(|| group.clone());
    Some(path.join(" -> "))
}
