//! Accessibility Snapshot engine (C3, §4.3).
//!
//! Parses an ARIA-snapshot text into a tree, renders it to a numbered
//! textual view the model can cite by integer `ref`, and computes a
//! semantic diff between successive observations so the agent only pays
//! for the page delta instead of re-reading the whole tree every turn.

use crate::error::{CoreError, CoreResult};
use crate::page::{Page, RoleLocator};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Roles that carry no semantic information of their own; dropped if they
/// have no children once flattened, otherwise spliced out in favor of
/// their children (§4.3 ARIA-snapshot parse).
const DECORATIVE_ROLES: &[&str] = &[
    "none",
    "presentation",
    "generic",
    "paragraph",
    "LineBreak",
    "InlineTextBox",
];

/// Roles that receive a `[N]` ref and participate in locator resolution
/// (§4.3 Rendering).
const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "textbox",
    "combobox",
    "checkbox",
    "radio",
    "link",
    "menuitem",
    "tab",
    "slider",
    "switch",
    "option",
    "searchbox",
    "spinbutton",
    "menuitemcheckbox",
    "menuitemradio",
    "treeitem",
];

fn is_decorative(role: &str) -> bool {
    DECORATIVE_ROLES.contains(&role)
}

fn is_interactive(role: &str) -> bool {
    INTERACTIVE_ROLES.contains(&role)
}

/// A parsed accessibility node (§3 Accessibility node).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    pub role: String,
    pub name: String,
    pub value: Option<String>,
    pub level: Option<u32>,
    pub checked: Option<bool>,
    pub expanded: Option<bool>,
    pub selected: Option<bool>,
    pub pressed: Option<bool>,
    pub disabled: Option<bool>,
    pub children: Vec<Node>,
}

/// One entry in the dense ref table (§3 Ref table).
#[derive(Debug, Clone)]
pub struct RefEntry {
    pub ref_id: u32,
    pub role: String,
    pub name: String,
    pub nth: usize,
}

/// Full snapshot, diff-then-snapshot, or "no change" (§3 Observation).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    FullSnapshot(String),
    DiffAndSnapshot(String),
    Unchanged,
}

impl Observation {
    pub fn text(&self) -> &str {
        match self {
            Observation::FullSnapshot(s) | Observation::DiffAndSnapshot(s) => s,
            Observation::Unchanged => "[页面无变化]",
        }
    }
}

const BLANK_PAGE: &str = "(空白页面)";

// --- Parsing ------------------------------------------------------------

struct RawNode {
    indent: usize,
    node: Node,
}

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\w[\w-]*)(?:=([^\]]*))?\]").unwrap())
}

fn line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^(?P<role>[A-Za-z_][A-Za-z0-9_]*)(?:\s+"(?P<name>(?:[^"\\]|\\.)*)")?(?P<attrs>(?:\s*\[[^\]]+\])*)\s*(?P<colon>:)?\s*$"#).unwrap()
    })
}

fn parse_bool_attr(value: &str) -> bool {
    !matches!(value.to_lowercase().as_str(), "false" | "no" | "0")
}

fn parse_line(content: &str) -> Option<Node> {
    let content = content.trim_end();
    if let Some(stripped) = content.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return Some(Node {
            role: "text".to_string(),
            name: stripped.to_string(),
            ..Default::default()
        });
    }
    if let Some(stripped) = content.strip_prefix('/').and_then(|s| s.strip_suffix('/')) {
        return Some(Node {
            role: "text".to_string(),
            name: stripped.to_string(),
            ..Default::default()
        });
    }

    let caps = line_regex().captures(content)?;
    let role = caps.name("role")?.as_str().to_string();
    let name = caps.name("name").map(|m| m.as_str().to_string()).unwrap_or_default();
    let attrs_str = caps.name("attrs").map(|m| m.as_str()).unwrap_or("");

    let mut node = Node {
        role,
        name,
        ..Default::default()
    };
    for attr_caps in attr_regex().captures_iter(attrs_str) {
        let key = &attr_caps[1];
        // Playwright emits bare boolean flags (`[checked]`, `[expanded]`, ...)
        // with no `=value`; a missing group defaults to "true" (§4.3;
        // `lib/snapshot.py`'s `val = m.group(2) or "true"`).
        let raw_val = attr_caps.get(2).map_or("true", |m| m.as_str());
        let val = raw_val.trim().trim_matches('"');
        match key {
            "level" => node.level = val.parse().ok(),
            "checked" => node.checked = Some(parse_bool_attr(val)),
            "expanded" => node.expanded = Some(parse_bool_attr(val)),
            "selected" => node.selected = Some(parse_bool_attr(val)),
            "pressed" => node.pressed = Some(parse_bool_attr(val)),
            "disabled" => node.disabled = Some(parse_bool_attr(val)),
            "value" => node.value = Some(val.to_string()),
            _ => {}
        }
    }
    Some(node)
}

fn indent_of(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ').count()
}

/// Parse an ARIA-snapshot document into a forest of [`Node`]s, flattening
/// decorative containers and dropping empty decorative leaves as
/// described in §4.3. Returns an empty forest for blank/unreadable input
/// rather than an error (the engine renders that as `(空白页面)`).
pub fn parse(text: &str) -> Vec<Node> {
    let mut stack: Vec<RawBuilder> = Vec::new();
    let mut roots: Vec<RawBuilder> = Vec::new();

    for raw_line in text.lines() {
        if raw_line.trim().is_empty() {
            continue;
        }
        let indent = indent_of(raw_line);
        let trimmed = raw_line.trim_start();
        let Some(rest) = trimmed.strip_prefix("- ") else {
            continue;
        };
        let Some(node) = parse_line(rest) else {
            continue;
        };

        while let Some(top) = stack.last() {
            if top.indent >= indent {
                let popped = stack.pop().unwrap();
                attach(&mut stack, &mut roots, popped);
            } else {
                break;
            }
        }
        stack.push(RawBuilder {
            indent,
            node,
            children: Vec::new(),
        });
    }
    while let Some(popped) = stack.pop() {
        attach(&mut stack, &mut roots, popped);
    }

    roots.into_iter().flat_map(|b| flatten_decorative(b.finish())).collect()
}

struct RawBuilder {
    indent: usize,
    node: Node,
    children: Vec<RawBuilder>,
}

impl RawBuilder {
    fn finish(self) -> RawFinished {
        RawFinished {
            node: self.node,
            children: self.children.into_iter().map(RawBuilder::finish).collect(),
        }
    }
}

struct RawFinished {
    node: Node,
    children: Vec<RawFinished>,
}

fn attach(stack: &mut [RawBuilder], roots: &mut Vec<RawBuilder>, child: RawBuilder) {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(child);
    } else {
        roots.push(child);
    }
}

/// Drop empty decorative leaves, splice decorative containers' children
/// into their parent's child list in place (§4.3).
fn flatten_decorative(raw: RawFinished) -> Vec<Node> {
    let children: Vec<Node> = raw.children.into_iter().flat_map(flatten_decorative).collect();
    if is_decorative(&raw.node.role) {
        children
    } else {
        let mut node = raw.node;
        node.children = children;
        vec![node]
    }
}

// --- Rendering ------------------------------------------------------------

/// Render a parsed forest into the fixed-order textual form of §4.3,
/// assigning a dense `[N]` ref to every interactive node in pre-order and
/// returning the ref table used for locator resolution.
pub fn render(forest: &[Node]) -> (String, Vec<RefEntry>) {
    let mut out = String::new();
    let mut ref_counter: u32 = 0;
    let mut nth_counter: HashMap<(String, String), usize> = HashMap::new();
    let mut ref_table = Vec::new();
    render_level(forest, 0, &mut out, &mut ref_counter, &mut nth_counter, &mut ref_table);
    if out.is_empty() {
        out.push_str(BLANK_PAGE);
    }
    (out, ref_table)
}

fn render_level(
    nodes: &[Node],
    indent: usize,
    out: &mut String,
    ref_counter: &mut u32,
    nth_counter: &mut HashMap<(String, String), usize>,
    ref_table: &mut Vec<RefEntry>,
) {
    for n in nodes {
        let interactive = is_interactive(&n.role);
        let mut line = String::new();
        if interactive {
            *ref_counter += 1;
            line.push_str(&format!("[{}] ", ref_counter));
        }
        line.push_str(&n.role);
        if !n.name.is_empty() {
            line.push_str(&format!(" \"{}\"", n.name));
        }
        if let Some(level) = n.level {
            line.push_str(&format!(" level={level}"));
        }
        if let Some(value) = &n.value {
            if !value.is_empty() {
                line.push_str(&format!(" value=\"{value}\""));
            }
        }
        if let Some(checked) = n.checked {
            line.push_str(&format!(" checked={}", if checked { "yes" } else { "no" }));
        }
        if let Some(expanded) = n.expanded {
            line.push_str(&format!(" expanded={}", if expanded { "yes" } else { "no" }));
        }
        if n.selected == Some(true) {
            line.push_str(" (selected)");
        }

        out.push_str(&"  ".repeat(indent));
        out.push_str(&line);
        out.push('\n');

        if interactive {
            let key = (n.role.clone(), n.name.clone());
            let nth = nth_counter.entry(key).or_insert(0);
            ref_table.push(RefEntry {
                ref_id: *ref_counter,
                role: n.role.clone(),
                name: n.name.clone(),
                nth: *nth,
            });
            *nth += 1;
        }

        render_level(&n.children, indent + 1, out, ref_counter, nth_counter, ref_table);
    }
}

// --- Flatten + diff --------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatValue {
    pub value: Option<String>,
    pub checked: Option<bool>,
    pub expanded: Option<bool>,
    pub selected: Option<bool>,
}

/// Ordered `(role, name)` (or `(role, name, k)` on collision) -> attribute
/// snapshot, preserving first-appearance order (§4.3 Semantic diff).
pub type FlatMap = Vec<(String, FlatValue)>;

/// Flatten a forest for diffing. Keys collide on identical `(role, name)`;
/// the second and later occurrences get a `#k` suffix starting at `k=2`.
pub fn flatten(forest: &[Node]) -> FlatMap {
    let mut seen: HashMap<(String, String), usize> = HashMap::new();
    let mut out = Vec::new();
    flatten_into(forest, &mut seen, &mut out);
    out
}

fn flatten_into(nodes: &[Node], seen: &mut HashMap<(String, String), usize>, out: &mut FlatMap) {
    for n in nodes {
        if !is_decorative(&n.role) {
            let raw_key = (n.role.clone(), n.name.clone());
            let count = seen.entry(raw_key.clone()).or_insert(0);
            *count += 1;
            let key = if *count == 1 {
                format!("{}\u{0}{}", n.role, n.name)
            } else {
                format!("{}\u{0}{}#{}", n.role, n.name, *count)
            };
            out.push((
                key,
                FlatValue {
                    value: n.value.clone(),
                    checked: n.checked,
                    expanded: n.expanded,
                    selected: n.selected,
                },
            ));
        }
        flatten_into(&n.children, seen, out);
    }
}

#[derive(Debug, Clone, Default)]
pub struct FieldChange {
    pub field: &'static str,
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    pub added: Vec<(String, FlatValue)>,
    pub removed: Vec<(String, FlatValue)>,
    pub modified: Vec<(String, Vec<FieldChange>)>,
    pub unchanged: usize,
}

fn fmt_bool_opt(v: Option<bool>) -> String {
    match v {
        Some(true) => "yes".to_string(),
        Some(false) => "no".to_string(),
        None => "-".to_string(),
    }
}

fn fmt_value_opt(v: &Option<String>) -> String {
    v.clone().unwrap_or_default()
}

/// Compare two flattened observations (§4.3 Semantic diff). `(added ∪
/// removed ∪ modified)` keys are disjoint by construction; `modified` only
/// contains keys present on both sides with at least one differing field.
pub fn diff(old: &FlatMap, new: &FlatMap) -> DiffResult {
    let old_map: HashMap<&str, &FlatValue> = old.iter().map(|(k, v)| (k.as_str(), v)).collect();
    let new_map: HashMap<&str, &FlatValue> = new.iter().map(|(k, v)| (k.as_str(), v)).collect();

    let mut result = DiffResult::default();

    for (key, new_val) in new {
        match old_map.get(key.as_str()) {
            None => result.added.push((key.clone(), new_val.clone())),
            Some(old_val) => {
                let mut changes = Vec::new();
                if old_val.value != new_val.value {
                    changes.push(FieldChange {
                        field: "value",
                        old: fmt_value_opt(&old_val.value),
                        new: fmt_value_opt(&new_val.value),
                    });
                }
                if old_val.checked != new_val.checked {
                    changes.push(FieldChange {
                        field: "checked",
                        old: fmt_bool_opt(old_val.checked),
                        new: fmt_bool_opt(new_val.checked),
                    });
                }
                if old_val.expanded != new_val.expanded {
                    changes.push(FieldChange {
                        field: "expanded",
                        old: fmt_bool_opt(old_val.expanded),
                        new: fmt_bool_opt(new_val.expanded),
                    });
                }
                if old_val.selected != new_val.selected {
                    changes.push(FieldChange {
                        field: "selected",
                        old: fmt_bool_opt(old_val.selected),
                        new: fmt_bool_opt(new_val.selected),
                    });
                }
                if changes.is_empty() {
                    result.unchanged += 1;
                } else {
                    result.modified.push((key.clone(), changes));
                }
            }
        }
    }
    for (key, old_val) in old {
        if !new_map.contains_key(key.as_str()) {
            result.removed.push((key.clone(), old_val.clone()));
        }
    }
    result
}

fn display_key(key: &str) -> (&str, &str) {
    let without_suffix = key.split('#').next().unwrap_or(key);
    let mut parts = without_suffix.splitn(2, '\u{0}');
    (parts.next().unwrap_or(""), parts.next().unwrap_or(""))
}

fn render_diff(d: &DiffResult) -> String {
    let mut out = String::new();
    for (key, changes) in &d.modified {
        let (role, name) = display_key(key);
        let fields: Vec<String> = changes
            .iter()
            .map(|c| format!("{}: \"{}\" -> \"{}\"", c.field, c.old, c.new))
            .collect();
        out.push_str(&format!("[修改] {role} \"{name}\": {}\n", fields.join("; ")));
    }
    if !d.added.is_empty() {
        out.push_str(&format!("[新增] {} 个元素:\n", d.added.len()));
        for (key, val) in &d.added {
            let (role, name) = display_key(key);
            out.push_str(&format!("  {role} \"{name}\""));
            if let Some(v) = &val.value {
                if !v.is_empty() {
                    out.push_str(&format!(" value=\"{v}\""));
                }
            }
            out.push('\n');
        }
    }
    if !d.removed.is_empty() {
        out.push_str(&format!("[移除] {} 个元素:\n", d.removed.len()));
        for (key, val) in &d.removed {
            let (role, name) = display_key(key);
            out.push_str(&format!("  {role} \"{name}\""));
            if let Some(v) = &val.value {
                if !v.is_empty() {
                    out.push_str(&format!(" value=\"{v}\""));
                }
            }
            out.push('\n');
        }
    }
    out.push_str(&format!("[未变] {} 个元素", d.unchanged));
    out
}

// --- Engine ----------------------------------------------------------------

/// Owns the observation lifecycle across turns: the last flattened
/// observation (for diffing) and the last ref table (for locator
/// resolution). Invalidated wholesale on every new observation or explicit
/// `reset()` (§5 Shared resources).
#[derive(Default)]
pub struct SnapshotEngine {
    last_flat: Option<FlatMap>,
    ref_table: Vec<RefEntry>,
}

impl SnapshotEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Navigation invalidates refs (§4.3 Edge cases); call on every `goto`.
    pub fn reset(&mut self) {
        self.last_flat = None;
        self.ref_table.clear();
    }

    pub async fn observe(
        &mut self,
        page: &dyn Page,
        root_selector: &str,
        diff_threshold: f64,
    ) -> CoreResult<Observation> {
        let raw = page.aria_snapshot(root_selector).await?;
        let forest = match raw {
            Some(s) if !s.trim().is_empty() => parse(&s),
            _ => Vec::new(),
        };
        self.observe_forest(&forest, diff_threshold)
    }

    /// Pure variant of [`observe`] for unit tests and offline replay: takes
    /// an already-parsed forest instead of pulling one from a live page.
    pub fn observe_forest(&mut self, forest: &[Node], diff_threshold: f64) -> CoreResult<Observation> {
        let (rendered, ref_table) = render(forest);
        let flat = flatten(forest);

        let observation = match &self.last_flat {
            None => Observation::FullSnapshot(format!("[页面快照]\n{rendered}")),
            Some(old_flat) => {
                let d = diff(old_flat, &flat);
                let changes = d.added.len() + d.removed.len() + d.modified.len();
                if changes == 0 {
                    Observation::Unchanged
                } else {
                    let total = (changes + d.unchanged).max(1);
                    let ratio = changes as f64 / total as f64;
                    if ratio >= diff_threshold {
                        Observation::FullSnapshot(format!("[页面快照]\n{rendered}"))
                    } else {
                        Observation::DiffAndSnapshot(format!(
                            "[页面变化]\n{}\n[当前快照]\n{rendered}",
                            render_diff(&d)
                        ))
                    }
                }
            }
        };

        self.last_flat = Some(flat);
        self.ref_table = ref_table;
        Ok(observation)
    }

    /// Resolve a `ref` assigned by the most recent observation into
    /// `(role, name, nth)`; the caller combines this with
    /// [`crate::page::resolve_locator`] to get a concrete [`RoleLocator`]
    /// (§4.3 Ref resolution).
    pub fn ref_lookup(&self, ref_id: u32) -> CoreResult<(&str, &str, usize)> {
        self.ref_table
            .iter()
            .find(|e| e.ref_id == ref_id)
            .map(|e| (e.role.as_str(), e.name.as_str(), e.nth))
            .ok_or(CoreError::RefNotFound(ref_id))
    }

    pub async fn resolve_ref<'a>(&'a self, page: &dyn Page, ref_id: u32) -> CoreResult<RoleLocator<'a>> {
        let (role, name, nth) = self.ref_lookup(ref_id)?;
        crate::page::resolve_locator(page, role, name, nth).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(role: &str, name: &str) -> Node {
        Node {
            role: role.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn parse_line_reads_role_name_and_attrs() {
        let node = parse_line(r#"textbox "User" [value="abc"] [disabled]"#).unwrap();
        assert_eq!(node.role, "textbox");
        assert_eq!(node.name, "User");
        assert_eq!(node.value.as_deref(), Some("abc"));
    }

    #[test]
    fn parse_line_bool_attrs_default_true_unless_falsy() {
        let n1 = parse_line(r#"checkbox "a" [checked=true]"#).unwrap();
        assert_eq!(n1.checked, Some(true));
        let n2 = parse_line(r#"checkbox "b" [checked=false]"#).unwrap();
        assert_eq!(n2.checked, Some(false));
        // Playwright emits bare boolean flags with no `=value`; a missing
        // value defaults to "true", same as a value of "true".
        let n3 = parse_line(r#"checkbox "c" [checked]"#).unwrap();
        assert_eq!(n3.checked, Some(true));
    }

    #[test]
    fn parse_line_bare_flag_attrs_all_default_true() {
        let node = parse_line(r#"button "b" [expanded] [selected] [pressed] [disabled]"#).unwrap();
        assert_eq!(node.expanded, Some(true));
        assert_eq!(node.selected, Some(true));
        assert_eq!(node.pressed, Some(true));
        assert_eq!(node.disabled, Some(true));
    }

    #[test]
    fn decorative_leaf_with_no_name_no_children_is_dropped() {
        let text = "- generic\n- button \"OK\"\n";
        let forest = parse(text);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].role, "button");
    }

    #[test]
    fn decorative_container_splices_children_in_place() {
        let text = "- generic:\n  - button \"OK\"\n  - button \"Cancel\"\n";
        let forest = parse(text);
        assert_eq!(forest.len(), 2);
        assert_eq!(forest[0].name, "OK");
        assert_eq!(forest[1].name, "Cancel");
    }

    #[test]
    fn nested_indentation_builds_parent_child() {
        let text = "- list:\n  - listitem \"a\":\n    - text \"a\"\n  - listitem \"b\"\n";
        let forest = parse(text);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].role, "list");
        assert_eq!(forest[0].children.len(), 2);
    }

    #[test]
    fn empty_body_renders_blank_page_placeholder() {
        let (rendered, refs) = render(&[]);
        assert_eq!(rendered, BLANK_PAGE);
        assert!(refs.is_empty());
    }

    #[test]
    fn ref_stability_duplicate_role_name() {
        let forest = vec![n("button", "OK"), n("textbox", "User"), n("button", "OK")];
        let (rendered, refs) = render(&forest);
        assert!(rendered.contains("[1] button \"OK\""));
        assert!(rendered.contains("[2] textbox \"User\""));
        assert!(rendered.contains("[3] button \"OK\""));
        assert_eq!(refs[0].nth, 0);
        assert_eq!(refs[2].nth, 1);
    }

    #[test]
    fn refs_form_dense_sequence() {
        let forest = vec![n("button", "A"), n("button", "B"), n("link", "C")];
        let (_, refs) = render(&forest);
        let ids: Vec<u32> = refs.iter().map(|r| r.ref_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn diff_keys_are_disjoint() {
        let old = vec![
            ("button\u{0}OK".to_string(), FlatValue::default()),
            ("button\u{0}Gone".to_string(), FlatValue::default()),
        ];
        let new = vec![
            (
                "button\u{0}OK".to_string(),
                FlatValue {
                    checked: Some(true),
                    ..Default::default()
                },
            ),
            ("button\u{0}New".to_string(), FlatValue::default()),
        ];
        let d = diff(&old, &new);
        assert_eq!(d.added.len(), 1);
        assert_eq!(d.removed.len(), 1);
        assert_eq!(d.modified.len(), 1);
        assert_eq!(d.unchanged, 0);
    }

    #[test]
    fn diff_below_threshold_yields_diff_then_snapshot() {
        let mut engine = SnapshotEngine::new();
        let mut forest: Vec<Node> = (0..100).map(|i| n("button", &format!("b{i}"))).collect();
        engine.observe_forest(&forest, 0.6).unwrap();

        forest[0].checked = Some(true);
        let obs = engine.observe_forest(&forest, 0.6).unwrap();
        match obs {
            Observation::DiffAndSnapshot(text) => {
                assert!(text.starts_with("[页面变化]"));
                assert!(text.contains("[修改]"));
                assert!(text.contains("[当前快照]"));
            }
            other => panic!("expected diff, got {other:?}"),
        }
    }

    #[test]
    fn diff_above_threshold_yields_full_snapshot() {
        let mut engine = SnapshotEngine::new();
        let mut forest: Vec<Node> = (0..100).map(|i| n("button", &format!("b{i}"))).collect();
        engine.observe_forest(&forest, 0.6).unwrap();

        for item in forest.iter_mut().take(70) {
            item.checked = Some(true);
        }
        let obs = engine.observe_forest(&forest, 0.6).unwrap();
        match obs {
            Observation::FullSnapshot(text) => assert!(text.starts_with("[页面快照]")),
            other => panic!("expected full snapshot, got {other:?}"),
        }
    }

    #[test]
    fn exactly_at_threshold_emits_full_snapshot() {
        let mut engine = SnapshotEngine::new();
        // 10 elements, 6 changed -> ratio exactly 0.6
        let mut forest: Vec<Node> = (0..10).map(|i| n("button", &format!("b{i}"))).collect();
        engine.observe_forest(&forest, 0.6).unwrap();
        for item in forest.iter_mut().take(6) {
            item.checked = Some(true);
        }
        let obs = engine.observe_forest(&forest, 0.6).unwrap();
        assert!(matches!(obs, Observation::FullSnapshot(_)));
    }

    #[test]
    fn zero_changes_is_literal_unchanged() {
        let mut engine = SnapshotEngine::new();
        let forest = vec![n("button", "OK")];
        engine.observe_forest(&forest, 0.6).unwrap();
        let obs = engine.observe_forest(&forest, 0.6).unwrap();
        assert_eq!(obs, Observation::Unchanged);
        assert_eq!(obs.text(), "[页面无变化]");
    }

    #[test]
    fn unknown_ref_is_ref_not_found() {
        let engine = SnapshotEngine::new();
        let err = engine.ref_lookup(99).unwrap_err();
        assert!(matches!(err, CoreError::RefNotFound(99)));
    }

    #[test]
    fn reset_invalidates_last_observation_so_next_call_is_full() {
        let mut engine = SnapshotEngine::new();
        let forest = vec![n("button", "OK")];
        engine.observe_forest(&forest, 0.6).unwrap();
        engine.reset();
        let obs = engine.observe_forest(&forest, 0.6).unwrap();
        assert!(matches!(obs, Observation::FullSnapshot(_)));
    }
}
