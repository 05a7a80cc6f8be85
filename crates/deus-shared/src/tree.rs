//! Page tree built from the flat, parent-referenced page list.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::PageRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageNode {
    pub page: PageRecord,
    pub children: Vec<PageNode>,
}

/// Lookup key for a page: the sidebar knows ids, URLs carry slugs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKey<'a> {
    Id(Uuid),
    Slug(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("Page not found")]
    NotFound,
    #[error("\"{title}\" still has {count} page(s) inside; move or delete them first")]
    HasChildren { title: String, count: usize },
}

#[derive(Debug, Clone)]
struct IndexEntry {
    /// Parent as placed in the forest; `None` for roots, including promoted ones.
    parent: Option<Uuid>,
    child_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PageTree {
    pub roots: Vec<PageNode>,
    index: HashMap<Uuid, IndexEntry>,
    slugs: HashMap<String, Uuid>,
}

/// Lowest-id member of the cycle `start` leads into.
fn cycle_root<'a>(start: &'a PageRecord, by_id: &HashMap<Uuid, &'a PageRecord>) -> &'a PageRecord {
    let mut path: Vec<&PageRecord> = Vec::new();
    let mut current = start;
    loop {
        if let Some(pos) = path.iter().position(|r| r.id == current.id) {
            return path[pos..]
                .iter()
                .min_by_key(|r| r.id)
                .copied()
                .unwrap_or(current);
        }
        path.push(current);
        match current.parent_id.and_then(|p| by_id.get(&p).copied()) {
            Some(parent) => current = parent,
            None => return current,
        }
    }
}

/// Build the sorted forest. Never fails: parents missing from `records` make
/// the child a root, and the lowest id of each parent cycle is promoted to
/// root so the rest of the cycle hangs below it.
pub fn build_tree(records: &[PageRecord]) -> PageTree {
    let ids: HashSet<Uuid> = records.iter().map(|r| r.id).collect();

    let mut children: HashMap<Uuid, Vec<&PageRecord>> = HashMap::new();
    let mut root_records: Vec<&PageRecord> = Vec::new();
    for record in records {
        match record.parent_id.filter(|p| *p != record.id && ids.contains(p)) {
            Some(parent) => children.entry(parent).or_default().push(record),
            None => root_records.push(record),
        }
    }

    let mut placed = HashSet::with_capacity(records.len());
    let mut roots = Vec::with_capacity(root_records.len());
    for record in root_records {
        if !placed.contains(&record.id) {
            roots.push(attach(record, &children, &mut placed));
        }
    }
    // Whatever is left sits in or hangs below a cycle; the lowest id in each
    // cycle becomes its root.
    let mut stranded: Vec<&PageRecord> = records
        .iter()
        .filter(|r| !placed.contains(&r.id))
        .collect();
    stranded.sort_by_key(|r| r.id);
    let by_id: HashMap<Uuid, &PageRecord> = records.iter().map(|r| (r.id, r)).collect();
    for record in stranded {
        if !placed.contains(&record.id) {
            let root = cycle_root(record, &by_id);
            roots.push(attach(root, &children, &mut placed));
        }
    }

    sort_nodes(&mut roots);

    let mut tree = PageTree {
        roots,
        index: HashMap::with_capacity(records.len()),
        slugs: HashMap::with_capacity(records.len()),
    };
    let roots = std::mem::take(&mut tree.roots);
    for root in &roots {
        tree.index_node(root, None);
    }
    tree.roots = roots;
    tree
}

fn attach(
    record: &PageRecord,
    children: &HashMap<Uuid, Vec<&PageRecord>>,
    placed: &mut HashSet<Uuid>,
) -> PageNode {
    placed.insert(record.id);

    let mut nodes = Vec::new();
    if let Some(kids) = children.get(&record.id) {
        for kid in kids {
            if !placed.contains(&kid.id) {
                nodes.push(attach(kid, children, placed));
            }
        }
    }

    PageNode {
        page: record.clone(),
        children: nodes,
    }
}

fn compare_nodes(a: &PageNode, b: &PageNode) -> Ordering {
    b.page
        .is_folder()
        .cmp(&a.page.is_folder())
        .then_with(|| a.page.title.to_lowercase().cmp(&b.page.title.to_lowercase()))
        .then_with(|| a.page.title.cmp(&b.page.title))
        .then_with(|| a.page.id.cmp(&b.page.id))
}

fn sort_nodes(nodes: &mut [PageNode]) {
    nodes.sort_by(compare_nodes);
    for node in nodes.iter_mut() {
        sort_nodes(&mut node.children);
    }
}

impl PageTree {
    fn index_node(&mut self, node: &PageNode, parent: Option<Uuid>) {
        self.index.insert(
            node.page.id,
            IndexEntry {
                parent,
                child_count: node.children.len(),
            },
        );
        self.slugs.entry(node.page.slug.clone()).or_insert(node.page.id);
        for child in &node.children {
            self.index_node(child, Some(node.page.id));
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.index.contains_key(&id)
    }

    pub fn resolve(&self, key: PageKey<'_>) -> Option<Uuid> {
        match key {
            PageKey::Id(id) => self.contains(id).then_some(id),
            PageKey::Slug(slug) => self.slugs.get(slug).copied(),
        }
    }

    pub fn parent_of(&self, id: Uuid) -> Option<Uuid> {
        self.index.get(&id).and_then(|entry| entry.parent)
    }

    pub fn child_count(&self, id: Uuid) -> usize {
        self.index.get(&id).map_or(0, |entry| entry.child_count)
    }

    /// Ids from `key` up to its root, leaf first. Empty when the page is not
    /// in the tree (not loaded yet, or filtered out).
    pub fn find_ancestor_chain(&self, key: PageKey<'_>) -> Vec<Uuid> {
        let Some(mut current) = self.resolve(key) else {
            return Vec::new();
        };

        let mut chain = vec![current];
        while let Some(parent) = self.parent_of(current) {
            if chain.len() > self.index.len() {
                break;
            }
            chain.push(parent);
            current = parent;
        }
        chain
    }

    pub fn node(&self, id: Uuid) -> Option<&PageNode> {
        let mut path = self.find_ancestor_chain(PageKey::Id(id));
        let root_id = path.pop()?;

        let mut node = self.roots.iter().find(|n| n.page.id == root_id)?;
        while let Some(next) = path.pop() {
            node = node.children.iter().find(|n| n.page.id == next)?;
        }
        Some(node)
    }

    pub fn record(&self, id: Uuid) -> Option<&PageRecord> {
        self.node(id).map(|n| &n.page)
    }

    pub fn find_by_slug(&self, slug: &str) -> Option<&PageRecord> {
        self.resolve(PageKey::Slug(slug)).and_then(|id| self.record(id))
    }

    /// Pages with children cannot be deleted.
    pub fn check_deletable(&self, id: Uuid) -> Result<(), TreeError> {
        let node = self.node(id).ok_or(TreeError::NotFound)?;
        if node.children.is_empty() {
            Ok(())
        } else {
            Err(TreeError::HasChildren {
                title: node.page.title.clone(),
                count: node.children.len(),
            })
        }
    }

    /// Forest of nodes whose title contains `query` (case-insensitive), kept
    /// together with the ancestors leading to them.
    pub fn filter(&self, query: &str) -> Vec<PageNode> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return self.roots.clone();
        }
        self.roots
            .iter()
            .filter_map(|node| filter_node(node, &query))
            .collect()
    }
}

fn filter_node(node: &PageNode, query: &str) -> Option<PageNode> {
    let children: Vec<PageNode> = node
        .children
        .iter()
        .filter_map(|child| filter_node(child, query))
        .collect();

    if node.page.title.to_lowercase().contains(query) || !children.is_empty() {
        Some(PageNode {
            page: node.page.clone(),
            children,
        })
    } else {
        None
    }
}

/// Pre-order list of every id in the forest.
pub fn flatten_ids(roots: &[PageNode]) -> Vec<Uuid> {
    fn walk(nodes: &[PageNode], out: &mut Vec<Uuid>) {
        for node in nodes {
            out.push(node.page.id);
            walk(&node.children, out);
        }
    }

    let mut ids = Vec::new();
    walk(roots, &mut ids);
    ids
}

/// Session-scoped expand/collapse state of the sidebar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpandedSet {
    state: HashMap<Uuid, bool>,
}

impl ExpandedSet {
    pub fn is_expanded(&self, id: Uuid) -> bool {
        self.state.get(&id).copied().unwrap_or(false)
    }

    pub fn set(&mut self, id: Uuid, expanded: bool) {
        self.state.insert(id, expanded);
    }

    pub fn toggle(&mut self, id: Uuid) -> bool {
        let expanded = !self.is_expanded(id);
        self.set(id, expanded);
        expanded
    }

    pub fn expand_all<I: IntoIterator<Item = Uuid>>(&mut self, ids: I) {
        for id in ids {
            self.set(id, true);
        }
    }

    /// Force open every page on the path to `key`, the page itself included.
    /// Returns the chain that was opened (empty when the page is unknown).
    pub fn reveal(&mut self, tree: &PageTree, key: PageKey<'_>) -> Vec<Uuid> {
        let chain = tree.find_ancestor_chain(key);
        self.expand_all(chain.iter().copied());
        chain
    }
}

/// One visible line of the rendered tree.
#[derive(Debug, Clone, Copy)]
pub struct TreeRow<'a> {
    pub depth: usize,
    pub node: &'a PageNode,
    pub expanded: bool,
}

impl TreeRow<'_> {
    pub fn has_children(&self) -> bool {
        !self.node.children.is_empty()
    }
}

/// Flatten the forest into the rows currently visible. With `force_open`
/// every node is drawn open, which is how search results are shown.
pub fn visible_rows<'a>(
    roots: &'a [PageNode],
    expanded: &ExpandedSet,
    force_open: bool,
) -> Vec<TreeRow<'a>> {
    fn walk<'a>(
        nodes: &'a [PageNode],
        depth: usize,
        expanded: &ExpandedSet,
        force_open: bool,
        out: &mut Vec<TreeRow<'a>>,
    ) {
        for node in nodes {
            let open = force_open || expanded.is_expanded(node.page.id);
            out.push(TreeRow {
                depth,
                node,
                expanded: open,
            });
            if open {
                walk(&node.children, depth + 1, expanded, force_open, out);
            }
        }
    }

    let mut rows = Vec::new();
    walk(roots, 0, expanded, force_open, &mut rows);
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PageKind, PageStatus};
    use chrono::Utc;

    fn page(title: &str, kind: PageKind, parent: Option<Uuid>) -> PageRecord {
        PageRecord {
            id: Uuid::new_v4(),
            parent_id: parent,
            title: title.to_string(),
            slug: crate::slug::slugify(title),
            kind,
            icon: None,
            status: PageStatus::Published,
            content_html: None,
            external_url: None,
            created_by: None,
            updated_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Handbook/                (folder)
    ///   Policies/              (folder)
    ///     leave policy         (sop)
    ///   Benefits               (doc)
    /// Roadmap                  (report)
    /// archive/                 (folder, empty)
    fn sample() -> Vec<PageRecord> {
        let handbook = page("Handbook", PageKind::Folder, None);
        let policies = page("Policies", PageKind::Folder, Some(handbook.id));
        let leave = page("leave policy", PageKind::Sop, Some(policies.id));
        let benefits = page("Benefits", PageKind::Doc, Some(handbook.id));
        let roadmap = page("Roadmap", PageKind::Report, None);
        let archive = page("archive", PageKind::Folder, None);
        vec![roadmap, leave, benefits, archive, policies, handbook]
    }

    fn titles(nodes: &[PageNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.page.title.as_str()).collect()
    }

    fn assert_sibling_order(nodes: &[PageNode]) {
        for pair in nodes.windows(2) {
            let (a, b) = (&pair[0].page, &pair[1].page);
            assert!(
                a.is_folder() >= b.is_folder(),
                "folder after non-folder: {} / {}",
                a.title,
                b.title
            );
            if a.is_folder() == b.is_folder() {
                assert!(a.title.to_lowercase() <= b.title.to_lowercase());
            }
        }
        for node in nodes {
            assert_sibling_order(&node.children);
        }
    }

    #[test]
    fn every_record_appears_exactly_once() {
        let records = sample();
        let tree = build_tree(&records);

        let mut ids = flatten_ids(&tree.roots);
        assert_eq!(ids.len(), records.len());
        ids.sort();
        let mut expected: Vec<Uuid> = records.iter().map(|r| r.id).collect();
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn folders_first_then_case_insensitive_title() {
        let tree = build_tree(&sample());
        assert_eq!(titles(&tree.roots), vec!["archive", "Handbook", "Roadmap"]);
        assert_eq!(titles(&tree.roots[1].children), vec!["Policies", "Benefits"]);
        assert_sibling_order(&tree.roots);
    }

    #[test]
    fn order_does_not_depend_on_input_order() {
        let mut records = sample();
        let forward = flatten_ids(&build_tree(&records).roots);
        records.reverse();
        let backward = flatten_ids(&build_tree(&records).roots);
        assert_eq!(forward, backward);
    }

    #[test]
    fn dangling_parent_is_promoted_to_root() {
        let orphan = page("Orphan", PageKind::Doc, Some(Uuid::new_v4()));
        let tree = build_tree(&[orphan.clone()]);
        assert_eq!(titles(&tree.roots), vec!["Orphan"]);
        assert_eq!(tree.parent_of(orphan.id), None);
    }

    #[test]
    fn parent_cycle_loses_no_record() {
        let mut a = page("A", PageKind::Folder, None);
        let mut b = page("B", PageKind::Folder, None);
        a.parent_id = Some(b.id);
        b.parent_id = Some(a.id);
        let mut selfish = page("Self", PageKind::Doc, None);
        selfish.parent_id = Some(selfish.id);

        let tree = build_tree(&[a.clone(), b.clone(), selfish.clone()]);
        assert_eq!(flatten_ids(&tree.roots).len(), 3);
        assert_eq!(tree.len(), 3);
        // Chains still terminate, at the lower id of the pair.
        let (top, below) = if a.id < b.id { (a.id, b.id) } else { (b.id, a.id) };
        assert_eq!(tree.find_ancestor_chain(PageKey::Id(below)), vec![below, top]);
        assert_eq!(tree.find_ancestor_chain(PageKey::Id(selfish.id)), vec![selfish.id]);
    }

    #[test]
    fn cycle_root_does_not_depend_on_input_order() {
        let mut a = page("A", PageKind::Folder, None);
        let mut b = page("B", PageKind::Folder, None);
        let mut c = page("C", PageKind::Folder, None);
        a.parent_id = Some(c.id);
        b.parent_id = Some(a.id);
        c.parent_id = Some(b.id);

        let forward = build_tree(&[a.clone(), b.clone(), c.clone()]);
        let backward = build_tree(&[c.clone(), b.clone(), a.clone()]);
        assert_eq!(flatten_ids(&forward.roots), flatten_ids(&backward.roots));

        let lowest = [a.id, b.id, c.id].into_iter().min().unwrap();
        assert_eq!(forward.roots.len(), 1);
        assert_eq!(forward.roots[0].page.id, lowest);
    }

    #[test]
    fn pages_below_a_cycle_stay_below_it() {
        let mut a = page("A", PageKind::Folder, None);
        let mut b = page("B", PageKind::Folder, None);
        a.parent_id = Some(b.id);
        b.parent_id = Some(a.id);
        let mut tail = page("Tail", PageKind::Doc, None);
        tail.id = Uuid::nil();
        tail.parent_id = Some(a.id);

        let tree = build_tree(&[tail.clone(), a.clone(), b.clone()]);
        assert_eq!(tree.roots.len(), 1);
        assert_ne!(tree.roots[0].page.id, tail.id);
        assert_eq!(tree.parent_of(tail.id), Some(a.id));
    }

    #[test]
    fn ancestor_chain_runs_leaf_to_root() {
        let records = sample();
        let tree = build_tree(&records);
        let leave = records.iter().find(|r| r.title == "leave policy").unwrap();

        let chain = tree.find_ancestor_chain(PageKey::Slug("leave-policy"));
        assert_eq!(chain.first(), Some(&leave.id));
        assert_eq!(tree.parent_of(*chain.last().unwrap()), None);
        for pair in chain.windows(2) {
            assert_eq!(tree.parent_of(pair[0]), Some(pair[1]));
        }
        assert_eq!(chain.len(), 3);
        assert_eq!(tree.find_ancestor_chain(PageKey::Id(leave.id)), chain);
    }

    #[test]
    fn ancestor_chain_of_unknown_page_is_empty() {
        let tree = build_tree(&sample());
        assert!(tree.find_ancestor_chain(PageKey::Slug("missing")).is_empty());
        assert!(tree.find_ancestor_chain(PageKey::Id(Uuid::new_v4())).is_empty());
    }

    #[test]
    fn node_lookup_finds_nested_pages() {
        let records = sample();
        let tree = build_tree(&records);
        for record in &records {
            assert_eq!(tree.record(record.id).map(|r| r.id), Some(record.id));
        }
        assert_eq!(tree.find_by_slug("benefits").map(|r| r.title.as_str()), Some("Benefits"));
        assert!(tree.node(Uuid::new_v4()).is_none());
    }

    #[test]
    fn folders_with_children_are_not_deletable() {
        let records = sample();
        let tree = build_tree(&records);
        let id_of = |t: &str| records.iter().find(|r| r.title == t).unwrap().id;

        assert_eq!(
            tree.check_deletable(id_of("Handbook")),
            Err(TreeError::HasChildren {
                title: "Handbook".to_string(),
                count: 2
            })
        );
        assert_eq!(tree.check_deletable(id_of("archive")), Ok(()));
        assert_eq!(tree.check_deletable(id_of("Benefits")), Ok(()));
        assert_eq!(tree.check_deletable(Uuid::new_v4()), Err(TreeError::NotFound));
    }

    #[test]
    fn filter_keeps_matching_paths() {
        let tree = build_tree(&sample());
        let filtered = tree.filter("LEAVE");
        assert_eq!(titles(&filtered), vec!["Handbook"]);
        assert_eq!(titles(&filtered[0].children), vec!["Policies"]);
        assert_eq!(titles(&filtered[0].children[0].children), vec!["leave policy"]);

        assert!(tree.filter("nothing matches").is_empty());
        assert_eq!(tree.filter("  ").len(), tree.roots.len());
    }

    #[test]
    fn reveal_opens_the_path_to_the_active_page() {
        let tree = build_tree(&sample());
        let mut expanded = ExpandedSet::default();

        let collapsed = visible_rows(&tree.roots, &expanded, false);
        assert_eq!(collapsed.len(), 3);

        let chain = expanded.reveal(&tree, PageKey::Slug("leave-policy"));
        assert_eq!(chain.len(), 3);
        let rows = visible_rows(&tree.roots, &expanded, false);
        let visible: Vec<&str> = rows.iter().map(|r| r.node.page.title.as_str()).collect();
        assert_eq!(
            visible,
            vec!["archive", "Handbook", "Policies", "leave policy", "Benefits", "Roadmap"]
        );
        assert_eq!(rows[3].depth, 2);

        assert!(expanded.reveal(&tree, PageKey::Slug("missing")).is_empty());
    }

    #[test]
    fn toggle_flips_and_force_open_shows_everything() {
        let tree = build_tree(&sample());
        let handbook = tree.roots[1].page.id;
        let mut expanded = ExpandedSet::default();

        assert!(expanded.toggle(handbook));
        assert_eq!(visible_rows(&tree.roots, &expanded, false).len(), 5);
        assert!(!expanded.toggle(handbook));
        assert_eq!(visible_rows(&tree.roots, &expanded, false).len(), 3);
        assert_eq!(visible_rows(&tree.roots, &expanded, true).len(), 6);
    }
}
