//! Node groups and pattern-based membership.
//!
//! A [`NodeGroup`] classifies nodes by name. Each include/exclude pattern may
//! hold `|`-separated keywords; a keyword is tried as a case-insensitive
//! regular expression and falls back to substring containment when it does
//! not compile. Exclusion always wins over inclusion, and the catch-all group
//! contains every node regardless of its patterns.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::node::Node;

/// Reserved name of the group that contains every node.
pub const CATCH_ALL_GROUP: &str = "全部节点";

/// How a group picks its active member.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupMode {
    /// Manual choice.
    #[default]
    Select,
    /// Latency-probed choice.
    Auto,
}

impl GroupMode {
    /// Returns the stored name.
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupMode::Select => "select",
            GroupMode::Auto => "auto",
        }
    }

    /// Parses a stored name, defaulting to [`GroupMode::Select`].
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("auto") {
            GroupMode::Auto
        } else {
            GroupMode::Select
        }
    }
}

/// A named node classifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeGroup {
    /// Storage id. Part of every generated per-node outbound tag.
    pub id: i64,
    /// Display name, also the selector outbound tag.
    pub name: String,
    /// Selection mode.
    #[serde(default)]
    pub mode: GroupMode,
    /// A node must match one of these (empty means all nodes).
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// A node matching any of these is rejected.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Inactive groups are skipped during assembly.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl NodeGroup {
    /// Creates an active select-mode group with no patterns.
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            mode: GroupMode::Select,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            active: true,
        }
    }

    /// Builder: sets the include patterns.
    pub fn with_include(mut self, patterns: &[&str]) -> Self {
        self.include_patterns = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Builder: sets the exclude patterns.
    pub fn with_exclude(mut self, patterns: &[&str]) -> Self {
        self.exclude_patterns = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Builder: sets the mode.
    pub fn with_mode(mut self, mode: GroupMode) -> Self {
        self.mode = mode;
        self
    }

    /// Returns true for the reserved catch-all group.
    pub fn is_catch_all(&self) -> bool {
        self.name == CATCH_ALL_GROUP
    }

    /// Returns true if `node` belongs to this group.
    ///
    /// Compiles the patterns on every call; use [`GroupMatcher`] when
    /// matching many nodes.
    pub fn matches(&self, node: &Node) -> bool {
        GroupMatcher::new(self).matches(node)
    }
}

/// One `|`-separated keyword of a pattern.
#[derive(Debug, Clone)]
enum Keyword {
    Regex(Regex),
    /// Lowercased literal used when the keyword is not a valid regex.
    Substring(String),
}

impl Keyword {
    fn compile(keyword: &str) -> Self {
        match RegexBuilder::new(keyword).case_insensitive(true).build() {
            Ok(re) => Keyword::Regex(re),
            Err(_) => Keyword::Substring(keyword.to_lowercase()),
        }
    }

    fn is_match(&self, name: &str, lowered: &str) -> bool {
        match self {
            Keyword::Regex(re) => re.is_match(name),
            Keyword::Substring(s) => lowered.contains(s.as_str()),
        }
    }
}

/// Splits patterns into keywords. Empty keywords are dropped.
fn compile_patterns(patterns: &[String]) -> Vec<Keyword> {
    patterns
        .iter()
        .flat_map(|p| p.split('|'))
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(Keyword::compile)
        .collect()
}

/// A group with its patterns compiled once.
#[derive(Debug, Clone)]
pub struct GroupMatcher {
    catch_all: bool,
    include: Vec<Keyword>,
    exclude: Vec<Keyword>,
}

impl GroupMatcher {
    /// Compiles the patterns of `group`.
    pub fn new(group: &NodeGroup) -> Self {
        Self {
            catch_all: group.is_catch_all(),
            include: compile_patterns(&group.include_patterns),
            exclude: compile_patterns(&group.exclude_patterns),
        }
    }

    /// Returns true if `node` belongs to the group.
    pub fn matches(&self, node: &Node) -> bool {
        if self.catch_all {
            return true;
        }
        let lowered = node.name.to_lowercase();
        let included = self.include.is_empty()
            || self.include.iter().any(|k| k.is_match(&node.name, &lowered));
        included && !self.exclude.iter().any(|k| k.is_match(&node.name, &lowered))
    }
}

/// A group together with its derived members, in node order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedGroup {
    /// The group definition.
    pub group: NodeGroup,
    /// Member nodes.
    pub nodes: Vec<Node>,
}

/// Recomputes membership of every group from the full node set.
///
/// Group order and node order are preserved, so the result is deterministic
/// for a given snapshot.
pub fn build_memberships(groups: &[NodeGroup], nodes: &[Node]) -> Vec<MatchedGroup> {
    groups
        .iter()
        .map(|group| {
            let matcher = GroupMatcher::new(group);
            MatchedGroup {
                group: group.clone(),
                nodes: nodes.iter().filter(|n| matcher.matches(n)).cloned().collect(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Protocol;

    fn node(name: &str) -> Node {
        let mut n = Node::new(Protocol::Trojan, name, "a.com", 443);
        n.password = "p".into();
        n.with_generated_id()
    }

    #[test]
    fn exclude_overrides_include() {
        let group = NodeGroup::new(1, "香港")
            .with_include(&["hk|hongkong"])
            .with_exclude(&["01"]);
        assert!(!group.matches(&node("香港 HK-01")));
        assert!(group.matches(&node("香港 HK-02")));
        assert!(group.matches(&node("HongKong Premium")));
        assert!(!group.matches(&node("日本 JP-03")));
    }

    #[test]
    fn catch_all_ignores_patterns() {
        let group = NodeGroup::new(9, CATCH_ALL_GROUP)
            .with_include(&["nothing"])
            .with_exclude(&[".*"]);
        assert!(group.matches(&node("香港 HK-01")));
        assert!(group.matches(&node("anything")));
    }

    #[test]
    fn empty_include_matches_everything_not_excluded() {
        let group = NodeGroup::new(2, "no-ads").with_exclude(&["剩余流量|到期"]);
        assert!(group.matches(&node("US-01")));
        assert!(!group.matches(&node("剩余流量：10GB")));
    }

    #[test]
    fn invalid_regex_falls_back_to_substring() {
        let group = NodeGroup::new(3, "weird").with_include(&["[vip"]);
        assert!(group.matches(&node("SG [VIP] 01")));
        assert!(!group.matches(&node("SG 01")));
    }

    #[test]
    fn regex_keywords_are_case_insensitive() {
        let group = NodeGroup::new(4, "us").with_include(&["^us-\\d+$"]);
        assert!(group.matches(&node("US-12")));
        assert!(!group.matches(&node("RU-US-12 x")));
    }

    #[test]
    fn empty_keywords_are_ignored() {
        let group = NodeGroup::new(5, "jp").with_include(&["jp||"]).with_exclude(&["|"]);
        assert!(group.matches(&node("JP-1")));
        assert!(!group.matches(&node("KR-1")));
    }

    #[test]
    fn memberships_are_deterministic() {
        let groups = vec![
            NodeGroup::new(1, CATCH_ALL_GROUP),
            NodeGroup::new(2, "香港").with_include(&["hk|hongkong"]).with_exclude(&["01"]),
        ];
        let nodes = vec![node("香港 HK-01"), node("香港 HK-02"), node("JP-01")];

        let first = build_memberships(&groups, &nodes);
        let second = build_memberships(&groups, &nodes);
        assert_eq!(first, second);
        assert_eq!(first[0].nodes.len(), 3);
        assert_eq!(first[1].nodes.len(), 1);
        assert_eq!(first[1].nodes[0].name, "香港 HK-02");
    }

    #[test]
    fn group_json_defaults() {
        let group: NodeGroup = serde_json::from_str(r#"{"id": 7, "name": "g"}"#).unwrap();
        assert!(group.active);
        assert_eq!(group.mode, GroupMode::Select);
        assert!(group.include_patterns.is_empty());
        assert_eq!(GroupMode::parse("AUTO"), GroupMode::Auto);
    }
}
