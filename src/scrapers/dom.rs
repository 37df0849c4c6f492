use scraper::ElementRef;

/// Minimal view of an element in a parsed document tree
pub trait TreeNode: Copy {
    fn tag_name(&self) -> &str;
    fn class_names(&self) -> Vec<&str>;
    fn parent_element(&self) -> Option<Self>;
}

impl<'a> TreeNode for ElementRef<'a> {
    fn tag_name(&self) -> &str {
        self.value().name()
    }

    fn class_names(&self) -> Vec<&str> {
        self.value().classes().collect()
    }

    fn parent_element(&self) -> Option<Self> {
        self.parent().and_then(ElementRef::wrap)
    }
}

/// Element ancestors, nearest first, excluding `node` itself
pub fn ancestors<N: TreeNode>(node: N) -> impl Iterator<Item = N> {
    std::iter::successors(node.parent_element(), |n| n.parent_element())
}

/// True when some ancestor with tag `tag` carries a class containing
/// `marker`, compared case-insensitively.
pub fn has_marked_ancestor<N: TreeNode>(node: N, tag: &str, marker: &str) -> bool {
    let marker = marker.to_lowercase();
    ancestors(node).any(|ancestor| {
        ancestor.tag_name().eq_ignore_ascii_case(tag)
            && ancestor
                .class_names()
                .iter()
                .any(|class| class.to_lowercase().contains(&marker))
    })
}
