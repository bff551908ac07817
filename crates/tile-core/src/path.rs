use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Node types addressable through the command tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Root,
    Bar,
    Group,
    Layout,
    Screen,
    Widget,
    Window,
}

impl NodeKind {
    /// Every tag that may appear in a path segment, in listing order.
    pub const TAGS: [NodeKind; 6] = [
        NodeKind::Bar,
        NodeKind::Group,
        NodeKind::Layout,
        NodeKind::Screen,
        NodeKind::Widget,
        NodeKind::Window,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeKind::Root => "root",
            NodeKind::Bar => "bar",
            NodeKind::Group => "group",
            NodeKind::Layout => "layout",
            NodeKind::Screen => "screen",
            NodeKind::Widget => "widget",
            NodeKind::Window => "window",
        }
    }

    /// Parses a segment tag. `root` is synthetic and never a tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::TAGS.into_iter().find(|kind| kind.as_str() == tag)
    }

    /// Child tags reachable from a node of this kind, in listing order.
    pub fn children(self) -> &'static [NodeKind] {
        match self {
            NodeKind::Root => &Self::TAGS,
            NodeKind::Bar => &[NodeKind::Screen],
            NodeKind::Group => &[NodeKind::Layout, NodeKind::Window, NodeKind::Screen],
            NodeKind::Layout => &[NodeKind::Group, NodeKind::Window, NodeKind::Screen],
            NodeKind::Screen => &[NodeKind::Layout, NodeKind::Window, NodeKind::Bar],
            NodeKind::Widget => &[NodeKind::Bar, NodeKind::Screen],
            NodeKind::Window => &[NodeKind::Group, NodeKind::Screen, NodeKind::Layout],
        }
    }

    pub fn has_child(self, tag: NodeKind) -> bool {
        self.children().contains(&tag)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picks one instance among a node's children of a given tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Selector {
    Index(i64),
    Name(String),
}

impl Selector {
    /// Integers become indices, anything else a name.
    pub fn parse(token: &str) -> Self {
        match token.parse::<i64>() {
            Ok(index) => Selector::Index(index),
            Err(_) => Selector::Name(token.to_string()),
        }
    }

    /// Textual comparison, so a group named `1` matches `Index(1)`.
    pub fn matches(&self, other: &Selector) -> bool {
        match (self, other) {
            (Selector::Index(a), Selector::Index(b)) => a == b,
            (Selector::Name(a), Selector::Name(b)) => a == b,
            _ => self.to_string() == other.to_string(),
        }
    }

    pub fn as_index(&self) -> Option<i64> {
        match self {
            Selector::Index(index) => Some(*index),
            Selector::Name(name) => name.parse().ok(),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Index(index) => write!(f, "{index}"),
            Selector::Name(name) => f.write_str(name),
        }
    }
}

impl From<i64> for Selector {
    fn from(value: i64) -> Self {
        Selector::Index(value)
    }
}

impl From<&str> for Selector {
    fn from(value: &str) -> Self {
        Selector::Name(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathSegment {
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<Selector>,
}

impl PathSegment {
    pub fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            selector: None,
        }
    }

    pub fn selected(kind: NodeKind, selector: impl Into<Selector>) -> Self {
        Self {
            kind,
            selector: Some(selector.into()),
        }
    }

    /// Parses `tag` or `tag[selector]`.
    pub fn parse(token: &str) -> Option<Self> {
        if let Some(open) = token.find('[') {
            let inner = token[open + 1..].strip_suffix(']')?;
            if inner.is_empty() {
                return None;
            }
            let kind = NodeKind::from_tag(&token[..open])?;
            return Some(Self::selected(kind, Selector::parse(inner)));
        }
        NodeKind::from_tag(token).map(Self::new)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.selector {
            Some(selector) => write!(f, "{}[{}]", self.kind, selector),
            None => write!(f, "{}", self.kind),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("invalid path component '{component}' below {at}")]
    InvalidComponent { component: String, at: String },
}

/// Ordered segments from the root to a node. The empty path is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<PathSegment>);

impl Path {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.0.last()
    }

    /// Kind of the node this path ends at.
    pub fn kind(&self) -> NodeKind {
        self.0.last().map_or(NodeKind::Root, |segment| segment.kind)
    }

    pub fn push(&mut self, segment: PathSegment) {
        self.0.push(segment);
    }

    pub fn child(&self, segment: PathSegment) -> Self {
        let mut next = self.clone();
        next.push(segment);
        next
    }

    /// Parent path; the root is its own parent.
    pub fn parent(&self) -> Self {
        let mut parent = self.clone();
        parent.0.pop();
        parent
    }

    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Applies a `/`-separated shell path to this one.
    ///
    /// A leading `/` restarts from the root, `..` pops a segment (a no-op at
    /// the root), a child tag or `tag[selector]` descends, and any other token
    /// becomes the selector of a trailing segment that has none yet.
    pub fn navigate(&self, input: &str) -> Result<Path, PathError> {
        let mut path = if input.starts_with('/') {
            Path::root()
        } else {
            self.clone()
        };

        for component in input.split('/').filter(|part| !part.is_empty()) {
            match component {
                "." => {}
                ".." => {
                    path.0.pop();
                }
                _ => {
                    if let Some(segment) = PathSegment::parse(component) {
                        if path.kind().has_child(segment.kind) {
                            path.push(segment);
                            continue;
                        }
                    } else if let Some(last) = path.0.last_mut() {
                        if last.selector.is_none() {
                            last.selector = Some(Selector::parse(component));
                            continue;
                        }
                    }
                    return Err(PathError::InvalidComponent {
                        component: component.to_string(),
                        at: path.to_string(),
                    });
                }
            }
        }
        Ok(path)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for (idx, segment) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromIterator<PathSegment> for Path {
    fn from_iter<I: IntoIterator<Item = PathSegment>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
