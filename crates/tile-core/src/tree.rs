use crate::command::{CommandDescriptor, CommandTable};
use crate::path::{NodeKind, Path, PathSegment, Selector};
use std::fmt::Debug;
use thiserror::Error;

/// Focused/active instances captured once per request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionContext {
    pub screen: Option<Selector>,
    pub group: Option<Selector>,
    pub layout: Option<Selector>,
    pub window: Option<Selector>,
}

/// Instances reachable from a node through one child tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildItems {
    /// Whether the bare tag resolves to a default instance.
    pub has_default: bool,
    pub items: Vec<Selector>,
}

impl ChildItems {
    pub fn new(has_default: bool, items: Vec<Selector>) -> Self {
        Self { has_default, items }
    }

    /// Single-valued relation: no selectable items, only the default.
    pub fn default_only(has_default: bool) -> Self {
        Self {
            has_default,
            items: Vec::new(),
        }
    }

    pub fn contains(&self, selector: &Selector) -> bool {
        self.items.iter().any(|item| item.matches(selector))
    }
}

/// Object graph exposed for remote control.
pub trait CommandTree: Sized + Send + 'static {
    type Node: Clone + Debug + Send;

    fn root(&self) -> Self::Node;

    fn kind_of(node: &Self::Node) -> NodeKind;

    fn context(&self) -> ResolutionContext;

    /// `None` when `tag` is not a relation of `node`.
    fn items(&self, node: &Self::Node, tag: NodeKind, ctx: &ResolutionContext)
        -> Option<ChildItems>;

    /// Follows `tag` from `node`. A missing selector asks for the default.
    fn select(
        &self,
        node: &Self::Node,
        tag: NodeKind,
        selector: Option<&Selector>,
        ctx: &ResolutionContext,
    ) -> Option<Self::Node>;

    fn command_table() -> CommandTable<Self>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("'{tag}' is not reachable from {at}")]
    NotAChild { tag: NodeKind, at: String },
    #[error("no {segment} below {at}")]
    NoSuchItem { segment: String, at: String },
    #[error("no default {tag} below {at}")]
    NoDefault { tag: NodeKind, at: String },
}

/// Walks `path` from the root, left to right.
pub fn resolve<T: CommandTree>(tree: &T, path: &Path) -> Result<T::Node, ResolveError> {
    let ctx = tree.context();
    let mut node = tree.root();
    let mut walked = Path::root();

    for segment in path.segments() {
        node = step(tree, &node, segment, &ctx, &walked)?;
        walked.push(segment.clone());
    }
    Ok(node)
}

fn step<T: CommandTree>(
    tree: &T,
    node: &T::Node,
    segment: &PathSegment,
    ctx: &ResolutionContext,
    walked: &Path,
) -> Result<T::Node, ResolveError> {
    let kind = T::kind_of(node);
    if !kind.has_child(segment.kind) {
        return Err(ResolveError::NotAChild {
            tag: segment.kind,
            at: walked.to_string(),
        });
    }

    match &segment.selector {
        Some(selector) => {
            let found = tree
                .items(node, segment.kind, ctx)
                .filter(|items| items.contains(selector))
                .and_then(|_| tree.select(node, segment.kind, Some(selector), ctx));
            found.ok_or_else(|| ResolveError::NoSuchItem {
                segment: segment.to_string(),
                at: walked.to_string(),
            })
        }
        None => tree
            .select(node, segment.kind, None, ctx)
            .ok_or_else(|| ResolveError::NoDefault {
                tag: segment.kind,
                at: walked.to_string(),
            }),
    }
}

/// Every `(tag, selector)` pair below `node`; `None` stands for the default.
pub fn children<T: CommandTree>(tree: &T, node: &T::Node) -> Vec<(NodeKind, Option<Selector>)> {
    let ctx = tree.context();
    let mut out = Vec::new();
    for &tag in T::kind_of(node).children() {
        let Some(items) = tree.items(node, tag, &ctx) else {
            continue;
        };
        if items.has_default {
            out.push((tag, None));
        }
        out.extend(items.items.into_iter().map(|item| (tag, Some(item))));
    }
    out
}

pub fn descriptor<'t, T: CommandTree>(
    table: &'t CommandTable<T>,
    node: &T::Node,
) -> Option<&'t CommandDescriptor<T>> {
    table.descriptor(T::kind_of(node))
}


#[cfg(test)]
mod tests {
    use super::fake::{Desk, DeskNode};
    use super::*;

    fn path(text: &str) -> Path {
        Path::root().navigate(text).expect("path")
    }

    #[test]
    fn empty_path_is_root() {
        let desk = Desk::sample();
        assert_eq!(resolve(&desk, &Path::root()), Ok(DeskNode::Root));
    }

    #[test]
    fn bare_tag_uses_context_default() {
        let mut desk = Desk::sample();
        assert_eq!(resolve(&desk, &path("group")), Ok(DeskNode::Group("a".into())));
        assert_eq!(resolve(&desk, &path("window")), Ok(DeskNode::Window(1)));

        desk.current = 1;
        assert_eq!(resolve(&desk, &path("group")), Ok(DeskNode::Group("b".into())));
        assert_eq!(resolve(&desk, &path("window")), Ok(DeskNode::Window(3)));
    }

    #[test]
    fn selector_must_name_an_existing_item() {
        let desk = Desk::sample();
        assert_eq!(resolve(&desk, &path("group[b]/window[3]")), Ok(DeskNode::Window(3)));
        assert_eq!(
            resolve(&desk, &path("group[zzz]")),
            Err(ResolveError::NoSuchItem {
                segment: "group[zzz]".to_string(),
                at: "/".to_string(),
            })
        );
        assert!(resolve(&desk, &path("group[a]/window[3]")).is_err());
    }

    #[test]
    fn single_valued_relation_rejects_explicit_selector() {
        let desk = Desk::sample();
        assert_eq!(resolve(&desk, &path("window[2]/group")), Ok(DeskNode::Group("a".into())));
        assert!(resolve(&desk, &path("window[2]/group[a]")).is_err());
    }

    #[test]
    fn missing_default_and_foreign_tags_fail() {
        let desk = Desk::sample();
        assert_eq!(
            resolve(&desk, &path("group[empty]/window")),
            Err(ResolveError::NoDefault {
                tag: NodeKind::Window,
                at: "group[empty]".to_string(),
            })
        );

        let foreign = Path::from_segments(vec![
            PathSegment::new(NodeKind::Window),
            PathSegment::new(NodeKind::Window),
        ]);
        assert!(matches!(
            resolve(&desk, &foreign),
            Err(ResolveError::NotAChild { tag: NodeKind::Window, .. })
        ));
        assert!(resolve(&desk, &path("bar")).is_err());
    }

    #[test]
    fn resolution_is_repeatable() {
        let desk = Desk::sample();
        let target = path("group[a]/window");
        assert_eq!(resolve(&desk, &target), resolve(&desk, &target));
    }

    #[test]
    fn children_lists_default_before_items() {
        let desk = Desk::sample();
        let listed = children(&desk, &DeskNode::Group("a".into()));
        assert_eq!(
            listed,
            vec![
                (NodeKind::Window, None),
                (NodeKind::Window, Some(Selector::Index(1))),
                (NodeKind::Window, Some(Selector::Index(2))),
            ]
        );
        assert_eq!(children(&desk, &DeskNode::Window(1)), vec![(NodeKind::Group, None)]);
    }

    #[test]
    fn descriptor_follows_node_kind() {
        let table = Desk::command_table();
        let root = descriptor(&table, &DeskNode::Root).expect("root");
        assert!(root.get("ping").is_some());
        let group = descriptor(&table, &DeskNode::Group("a".into())).expect("group");
        assert_eq!(group.names().collect::<Vec<_>>(), vec!["name"]);
    }
}
