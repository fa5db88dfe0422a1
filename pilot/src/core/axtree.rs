//! Accessibility tree snapshot and its flattened text form.

use serde::{Deserialize, Serialize};

/// One node of the accessibility tree sent by the environment backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxNode {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub name: String,
    /// Element id usable in actions; absent for non-interactive nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AxNode>,
}

impl AxNode {
    pub fn new(role: &str, name: &str) -> Self {
        Self {
            role: role.to_string(),
            name: name.to_string(),
            bid: None,
            children: Vec::new(),
        }
    }

    pub fn with_bid(mut self, bid: &str) -> Self {
        self.bid = Some(bid.to_string());
        self
    }

    pub fn with_children(mut self, children: Vec<AxNode>) -> Self {
        self.children = children;
        self
    }

    /// Flatten the tree into one line per node, indented two spaces per depth.
    ///
    /// Nodes with neither role nor name are not printed; their children are printed at
    /// the depth the node would have occupied.
    pub fn flatten(&self) -> String {
        let mut lines = Vec::new();
        flatten_inner(self, 0, &mut lines);
        lines.join("\n")
    }
}

fn flatten_inner(node: &AxNode, depth: usize, lines: &mut Vec<String>) {
    let visible = !node.role.is_empty() || !node.name.is_empty();
    let child_depth = if visible {
        lines.push(render_line(node, depth));
        depth + 1
    } else {
        depth
    };
    for child in &node.children {
        flatten_inner(child, child_depth, lines);
    }
}

fn render_line(node: &AxNode, depth: usize) -> String {
    let mut line = "  ".repeat(depth);
    if let Some(bid) = &node.bid {
        line.push_str(&format!("[{bid}] "));
    }
    line.push_str(&node.role);
    if !node.name.is_empty() {
        line.push_str(&format!(" '{}'", node.name));
    }
    line
}
