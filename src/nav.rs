// src/nav.rs
//!
//! Per-version navigation tree plus its thread-safe cache. A `NavTree` is
//! built once per version and is immutable from then on; a page's active-trail state never mutates the cached
//! tree — it lives in a transient `NavTreeContext`/`NavNodeProxy` overlay
//! instead, ported from
//! `original_source/bengal/core/nav_tree.py`. `NavTreeCache` and the
//! scaffold cache both add a per-key render lock on top of the main lock,
//! grounded on `original_source/bengal/utils/concurrent_locks.py`'s
//! `PerKeyLockManager`.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use crate::content::{ContentGraph, Page};

#[derive(Debug, Clone)]
pub(crate) struct NavNode {
    pub id: String,
    pub title: String,
    /// Internal, baseurl-free URL (`_path`). Canonical key in `flat_nodes`.
    pub url: String,
    pub icon: Option<String>,
    pub weight: i64,
    pub children: Vec<Arc<NavNode>>,
    pub depth: usize,
    pub page_source: Option<PathBuf>,
    pub section_path: Option<String>,
    pub is_index: bool,
}

impl NavNode {
    pub(crate) fn has_children(&self) -> bool {
        !self.children.is_empty()
    }
}

/// Pre-order walk of a node and all its descendants.
fn walk(node: &Arc<NavNode>, out: &mut Vec<Arc<NavNode>>) {
    out.push(node.clone());
    for child in &node.children {
        walk(child, out);
    }
}

/// A root node plus an O(1) `url -> NavNode` index.
/// Once built, every field is read-only; share it via `Arc<NavTree>`.
#[derive(Debug, Clone)]
pub(crate) struct NavTree {
    pub root: Arc<NavNode>,
    pub version_id: String,
    pub versions: Vec<String>,
    flat_nodes: Arc<HashMap<String, Arc<NavNode>>>,
}

impl NavTree {
    pub(crate) fn build(root: NavNode, version_id: impl Into<String>, versions: Vec<String>) -> NavTree {
        let root = Arc::new(root);
        let mut nodes = Vec::new();
        walk(&root, &mut nodes);
        let mut flat_nodes = HashMap::with_capacity(nodes.len());
        for node in nodes {
            flat_nodes.insert(node.url.clone(), node);
        }
        NavTree {
            root,
            version_id: version_id.into(),
            versions,
            flat_nodes: Arc::new(flat_nodes),
        }
    }

    pub(crate) fn find(&self, url: &str) -> Option<&Arc<NavNode>> {
        self.flat_nodes.get(url)
    }

    pub(crate) fn urls(&self) -> HashSet<&str> {
        self.flat_nodes.keys().map(String::as_str).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.flat_nodes.len()
    }

    /// Builds the per-page overlay used to render this tree for `active_url`.
    pub(crate) fn context(self: &Arc<Self>, active_url: &str) -> NavTreeContext {
        let trail = active_trail(active_url);
        NavTreeContext {
            tree: self.clone(),
            active_url: active_url.to_string(),
            trail,
        }
    }
}

/// Builds a `NavTree` from a discovered content graph, starting at the
/// root section and recursing through subsections and pages, sorted by
/// `(weight, title)`.
pub(crate) fn build_from_content(graph: &ContentGraph, version_id: &str, versions: Vec<String>) -> NavTree {
    NavTree::build(build_node(graph, "/"), version_id, versions)
}

fn build_node(graph: &ContentGraph, section_path: &str) -> NavNode {
    let section = graph.section(section_path);
    let mut children: Vec<Arc<NavNode>> = Vec::new();

    if let Some(section) = section {
        for sub in &section.subsections {
            children.push(Arc::new(build_node(graph, sub)));
        }
        for page_path in &section.pages {
            if let Some(page) = graph.pages.get(page_path) {
                children.push(Arc::new(page_to_node(page)));
            }
        }
    }
    children.sort_by(|a, b| a.weight.cmp(&b.weight).then_with(|| a.title.cmp(&b.title)));

    let depth = depth_of(section_path);
    let title = section
        .and_then(|s| s.metadata.get("nav_title").or_else(|| s.metadata.get("title")))
        .and_then(|v| v.as_str())
        .map(String::from)
        .or_else(|| section.map(|s| s.name.clone()))
        .unwrap_or_else(|| section_path.to_string());

    NavNode {
        id: section_path.to_string(),
        title,
        url: section_path.to_string(),
        icon: section
            .and_then(|s| s.metadata.get("icon"))
            .and_then(|v| v.as_str())
            .map(String::from),
        weight: section
            .and_then(|s| s.metadata.get("weight"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0),
        children,
        depth,
        page_source: section.and_then(|s| s.index_page.clone()),
        section_path: Some(section_path.to_string()),
        is_index: true,
    }
}

fn page_to_node(page: &Page) -> NavNode {
    let title = page
        .metadata
        .get("nav_title")
        .or_else(|| page.metadata.get("title"))
        .and_then(|v| v.as_str())
        .unwrap_or("Untitled")
        .to_string();
    NavNode {
        id: page._path.clone(),
        title,
        url: page._path.clone(),
        icon: page.metadata.get("icon").and_then(|v| v.as_str()).map(String::from),
        weight: page.weight,
        children: Vec::new(),
        depth: depth_of(&page._path),
        page_source: Some(page.source_path.clone()),
        section_path: None,
        is_index: false,
    }
}

fn depth_of(url: &str) -> usize {
    url.trim_matches('/').split('/').filter(|s| !s.is_empty()).count()
}

fn parent_url(url: &str) -> Option<String> {
    if url == "/" {
        return None;
    }
    let trimmed = url.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, _)) if parent.is_empty() => Some("/".to_string()),
        Some((parent, _)) => Some(format!("{parent}/")),
        None => Some("/".to_string()),
    }
}

fn active_trail(active_url: &str) -> HashSet<String> {
    let mut trail = HashSet::new();
    let mut current = active_url.to_string();
    trail.insert(current.clone());
    while let Some(parent) = parent_url(&current) {
        trail.insert(parent.clone());
        if parent == "/" {
            break;
        }
        current = parent;
    }
    trail
}

/// Per-page active-trail state layered over an immutable, shared `NavTree`.
/// Never written back into the tree.
#[derive(Debug, Clone)]
pub(crate) struct NavTreeContext {
    tree: Arc<NavTree>,
    active_url: String,
    trail: HashSet<String>,
}

impl NavTreeContext {
    pub(crate) fn root(&self) -> NavNodeProxy<'_> {
        NavNodeProxy { node: &self.tree.root, ctx: self }
    }

    pub(crate) fn is_current(&self, url: &str) -> bool {
        url == self.active_url
    }

    pub(crate) fn is_in_trail(&self, url: &str) -> bool {
        self.trail.contains(url)
    }

    /// A section is "expanded" iff it sits on the active trail but is not
    /// itself the active page.
    pub(crate) fn is_expanded(&self, url: &str) -> bool {
        self.is_in_trail(url) && !self.is_current(url)
    }
}

/// Read-only view of a `NavNode` that computes active-trail-dependent
/// fields from its `NavTreeContext` without ever mutating the underlying
/// node.
#[derive(Clone, Copy)]
pub(crate) struct NavNodeProxy<'a> {
    node: &'a Arc<NavNode>,
    ctx: &'a NavTreeContext,
}

impl<'a> NavNodeProxy<'a> {
    pub(crate) fn title(&self) -> &str {
        &self.node.title
    }

    /// Internal `_path`, baseurl-free.
    pub(crate) fn path(&self) -> &str {
        &self.node.url
    }

    /// Public `href`; apply `baseurl` via `Config::href_for`.
    pub(crate) fn href(&self, baseurl_fn: impl Fn(&str) -> String) -> String {
        baseurl_fn(&self.node.url)
    }

    pub(crate) fn icon(&self) -> Option<&str> {
        self.node.icon.as_deref()
    }

    pub(crate) fn is_section(&self) -> bool {
        self.node.is_index
    }

    pub(crate) fn is_current(&self) -> bool {
        self.ctx.is_current(&self.node.url)
    }

    pub(crate) fn is_in_trail(&self) -> bool {
        self.ctx.is_in_trail(&self.node.url)
    }

    pub(crate) fn is_expanded(&self) -> bool {
        self.ctx.is_expanded(&self.node.url)
    }

    pub(crate) fn children(&self) -> Vec<NavNodeProxy<'a>> {
        self.node
            .children
            .iter()
            .map(|c| NavNodeProxy { node: c, ctx: self.ctx })
            .collect()
    }
}

/// Lazily creates and hands out one lock per key, guarded by a small meta
/// lock — the pattern used by both `NavTreeCache` and the scaffold cache
/// to avoid serializing unrelated keys' builds behind a single mutex.
pub(crate) struct PerKeyLockManager<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> PerKeyLockManager<K> {
    pub(crate) fn new() -> Self {
        Self { locks: Mutex::new(HashMap::new()) }
    }

    pub(crate) fn get_lock(&self, key: &K) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(key.clone()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Session-boundary reset only — unsafe to call while another thread
    /// might still be waiting on a lock handed out by `get_lock`.
    pub(crate) fn clear(&self) {
        self.locks.lock().unwrap().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

impl<K> Default for PerKeyLockManager<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe cache of one `NavTree` per version, each built at most once
/// even under concurrent first-access from multiple render workers.
pub(crate) struct NavTreeCache {
    trees: RwLock<HashMap<String, Arc<NavTree>>>,
    per_key_locks: PerKeyLockManager<String>,
}

impl NavTreeCache {
    pub(crate) fn new() -> Self {
        Self {
            trees: RwLock::new(HashMap::new()),
            per_key_locks: PerKeyLockManager::new(),
        }
    }

    pub(crate) fn get_or_build(&self, version_id: &str, build: impl FnOnce() -> NavTree) -> Arc<NavTree> {
        if let Some(tree) = self.trees.read().unwrap().get(version_id) {
            return tree.clone();
        }
        let key_lock = self.per_key_locks.get_lock(&version_id.to_string());
        let _guard = key_lock.lock().unwrap();
        // Re-check: another thread may have built it while we waited on the lock.
        if let Some(tree) = self.trees.read().unwrap().get(version_id) {
            return tree.clone();
        }
        let tree = Arc::new(build());
        self.trees.write().unwrap().insert(version_id.to_string(), tree.clone());
        tree
    }

    pub(crate) fn invalidate(&self, version_id: &str) {
        self.trees.write().unwrap().remove(version_id);
    }

    pub(crate) fn invalidate_all(&self) {
        self.trees.write().unwrap().clear();
        self.per_key_locks.clear();
    }
}

impl Default for NavTreeCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Caches the active-trail-independent HTML of a navigation subtree,
/// keyed on `(version_id, root_section_url)` — reused across every page
/// under that root regardless of which one is currently active.
pub(crate) struct ScaffoldCache {
    entries: RwLock<HashMap<(String, String), Arc<str>>>,
    per_key_locks: PerKeyLockManager<(String, String)>,
}

impl ScaffoldCache {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            per_key_locks: PerKeyLockManager::new(),
        }
    }

    pub(crate) fn get_or_render(
        &self,
        version_id: &str,
        root_section_url: &str,
        render: impl FnOnce() -> String,
    ) -> Arc<str> {
        let key = (version_id.to_string(), root_section_url.to_string());
        if let Some(html) = self.entries.read().unwrap().get(&key) {
            return html.clone();
        }
        let lock = self.per_key_locks.get_lock(&key);
        let _guard = lock.lock().unwrap();
        if let Some(html) = self.entries.read().unwrap().get(&key) {
            return html.clone();
        }
        let html: Arc<str> = Arc::from(render());
        self.entries.write().unwrap().insert(key, html.clone());
        html
    }

    pub(crate) fn invalidate_all(&self) {
        self.entries.write().unwrap().clear();
        self.per_key_locks.clear();
    }
}

impl Default for ScaffoldCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders `tree`'s full structure into the scaffold HTML `ScaffoldCache`
/// stores: every node's id and url but no active-trail state, so the
/// fragment is identical for every page under the same root and safe to
/// reuse as-is. Callers mark the current/expanded nodes client-side off
/// `data-nav-url`.
pub(crate) fn render_tree_scaffold(tree: &NavTree) -> String {
    format!("<ul>{}</ul>", render_scaffold_node(&tree.root))
}

fn render_scaffold_node(node: &NavNode) -> String {
    let mut out = String::new();
    out.push_str("<li data-nav-url=\"");
    out.push_str(&html_escape(&node.url));
    out.push_str("\">");
    out.push_str(&html_escape(&node.title));
    if !node.children.is_empty() {
        out.push_str("<ul>");
        for child in &node.children {
            out.push_str(&render_scaffold_node(child));
        }
        out.push_str("</ul>");
    }
    out.push_str("</li>");
    out
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

/// Detects a cycle in a menu graph (`id -> child ids`) with backtracking
/// DFS, tracking only the current recursion stack rather than cloning a
/// path set per call. Returns the id where
/// the cycle closes, if any.
pub(crate) fn detect_menu_cycle(edges: &HashMap<String, Vec<String>>) -> Option<String> {
    #[derive(PartialEq)]
    enum State {
        Visiting,
        Done,
    }

    fn visit<'a>(node: &'a str, edges: &'a HashMap<String, Vec<String>>, state: &mut HashMap<&'a str, State>) -> Option<String> {
        match state.get(node) {
            Some(State::Visiting) => return Some(node.to_string()),
            Some(State::Done) => return None,
            None => {}
        }
        state.insert(node, State::Visiting);
        if let Some(children) = edges.get(node) {
            for child in children {
                if let Some(cycle_at) = visit(child, edges, state) {
                    return Some(cycle_at);
                }
            }
        }
        state.insert(node, State::Done);
        None
    }

    let mut state = HashMap::new();
    for node in edges.keys() {
        if let Some(cycle_at) = visit(node, edges, &mut state) {
            return Some(cycle_at);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(url: &str, weight: i64) -> NavNode {
        NavNode {
            id: url.to_string(),
            title: url.to_string(),
            url: url.to_string(),
            icon: None,
            weight,
            children: Vec::new(),
            depth: depth_of(url),
            page_source: None,
            section_path: None,
            is_index: false,
        }
    }

    fn sample_tree() -> NavTree {
        let child_a = leaf("/blog/a/", 1);
        let child_b = leaf("/blog/b/", 2);
        let blog = NavNode {
            id: "/blog/".into(),
            title: "Blog".into(),
            url: "/blog/".into(),
            icon: None,
            weight: 0,
            children: vec![Arc::new(child_a), Arc::new(child_b)],
            depth: 1,
            page_source: None,
            section_path: Some("/blog/".into()),
            is_index: true,
        };
        let root = NavNode {
            id: "/".into(),
            title: "Home".into(),
            url: "/".into(),
            icon: None,
            weight: 0,
            children: vec![Arc::new(blog)],
            depth: 0,
            page_source: None,
            section_path: Some("/".into()),
            is_index: true,
        };
        NavTree::build(root, "default", vec!["default".to_string()])
    }

    #[test]
    fn completeness_urls_match_flat_nodes_with_no_duplicates() {
        let tree = sample_tree();
        let expected: HashSet<&str> = ["/", "/blog/", "/blog/a/", "/blog/b/"].into_iter().collect();
        assert_eq!(tree.urls(), expected);
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn find_is_o1_lookup_by_url() {
        let tree = sample_tree();
        assert_eq!(tree.find("/blog/a/").unwrap().title, "/blog/a/");
        assert!(tree.find("/missing/").is_none());
    }

    #[test]
    fn context_marks_active_trail_without_mutating_tree() {
        let tree = Arc::new(sample_tree());
        let ctx = tree.context("/blog/a/");
        assert!(ctx.is_current("/blog/a/"));
        assert!(ctx.is_in_trail("/blog/"));
        assert!(ctx.is_in_trail("/"));
        assert!(!ctx.is_current("/blog/"));
        assert!(ctx.is_expanded("/blog/"));
        assert!(!ctx.is_expanded("/blog/a/"));

        // A second, unrelated context over the same Arc<NavTree> must not
        // see any state from the first.
        let other = tree.context("/blog/b/");
        assert!(!other.is_in_trail("/blog/a/"));
        assert!(tree.find("/blog/a/").is_some());
    }

    #[test]
    fn nav_tree_cache_builds_once_per_version() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let cache = NavTreeCache::new();
        let builds = AtomicUsize::new(0);

        for _ in 0..3 {
            cache.get_or_build("default", || {
                builds.fetch_add(1, Ordering::SeqCst);
                sample_tree()
            });
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        cache.invalidate("default");
        cache.get_or_build("default", || {
            builds.fetch_add(1, Ordering::SeqCst);
            sample_tree()
        });
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn render_tree_scaffold_carries_urls_but_no_active_state() {
        let tree = sample_tree();
        let html = render_tree_scaffold(&tree);
        assert!(html.contains(r#"data-nav-url="/blog/""#));
        assert!(html.contains(r#"data-nav-url="/blog/a/""#));
        assert!(!html.contains("is-active"));
    }

    #[test]
    fn scaffold_cache_keys_on_version_and_root_section() {
        let cache = ScaffoldCache::new();
        let a = cache.get_or_render("default", "/blog/", || "<nav>blog</nav>".to_string());
        let b = cache.get_or_render("default", "/blog/", || panic!("should reuse cached entry"));
        assert_eq!(a, b);

        let c = cache.get_or_render("v2", "/blog/", || "<nav>v2 blog</nav>".to_string());
        assert_ne!(a, c);
    }

    #[test]
    fn detect_menu_cycle_finds_a_cycle() {
        let mut edges = HashMap::new();
        edges.insert("a".to_string(), vec!["b".to_string()]);
        edges.insert("b".to_string(), vec!["c".to_string()]);
        edges.insert("c".to_string(), vec!["a".to_string()]);
        assert!(detect_menu_cycle(&edges).is_some());
    }

    #[test]
    fn detect_menu_cycle_accepts_acyclic_graphs() {
        let mut edges = HashMap::new();
        edges.insert("a".to_string(), vec!["b".to_string(), "c".to_string()]);
        edges.insert("b".to_string(), vec![]);
        edges.insert("c".to_string(), vec![]);
        assert!(detect_menu_cycle(&edges).is_none());
    }
}
