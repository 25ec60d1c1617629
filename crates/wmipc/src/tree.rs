//! Searching the layout tree returned by GET_TREE

use regex::Regex;

use crate::replies::Node;

/// Name of the hidden workspace that holds scratchpad windows
pub const SCRATCHPAD_WORKSPACE: &str = "__i3_scratch";

impl Node {
    /// Every container below this one, depth first, floating containers
    /// after the tiled children of their parent
    pub fn descendants(&self) -> Vec<&Node> {
        let mut found = Vec::new();
        self.visit(&mut |node, _| found.push(node));
        found
    }

    /// Containers holding a window: childless `con` or `floating_con`
    /// nodes outside of dock areas
    pub fn leaves(&self) -> Vec<&Node> {
        let mut found = Vec::new();
        self.visit(&mut |node, parent| {
            if node.nodes.is_empty()
                && matches!(node.node_type.as_str(), "con" | "floating_con")
                && parent.node_type != "dockarea"
            {
                found.push(node);
            }
        });
        found
    }

    /// Regular workspaces, without internal ones such as the scratchpad
    pub fn workspaces(&self) -> Vec<&Node> {
        self.find_all(|node| {
            node.node_type == "workspace"
                && !node.name.as_deref().unwrap_or_default().starts_with("__")
        })
    }

    /// The scratchpad workspace
    pub fn scratchpad(&self) -> Option<&Node> {
        self.find(|node| {
            node.node_type == "workspace" && node.name.as_deref() == Some(SCRATCHPAD_WORKSPACE)
        })
    }

    /// The workspace that contains the container `id`
    pub fn workspace_of(&self, id: i64) -> Option<&Node> {
        self.find(|node| {
            node.node_type == "workspace" && (node.id == id || node.find_by_id(id).is_some())
        })
    }

    /// Whether the container floats (i3 `floating` state or a sway
    /// `floating_con`)
    pub fn is_floating(&self) -> bool {
        self.node_type == "floating_con"
            || matches!(self.floating.as_deref(), Some("auto_on" | "user_on"))
    }

    /// The window title: `window_properties.title` on X11, the name otherwise
    pub fn window_title(&self) -> Option<&str> {
        self.window_properties
            .as_ref()
            .and_then(|props| props.get("title"))
            .and_then(|title| title.as_str())
            .or(self.name.as_deref())
    }

    pub fn find_focused(&self) -> Option<&Node> {
        self.find(|node| node.focused)
    }

    pub fn find_by_id(&self, id: i64) -> Option<&Node> {
        self.find(|node| node.id == id)
    }

    /// The container of an X11 window
    pub fn find_by_window(&self, window: i64) -> Option<&Node> {
        self.find(|node| node.window == Some(window))
    }

    pub fn find_by_pid(&self, pid: i64) -> Option<&Node> {
        self.find(|node| node.pid == Some(pid))
    }

    /// Containers of Wayland clients with the given app id (sway)
    pub fn find_by_app_id(&self, app_id: &str) -> Vec<&Node> {
        self.find_all(|node| node.app_id.as_deref() == Some(app_id))
    }

    /// Containers with a mark matching `pattern`
    pub fn find_marked(&self, pattern: &Regex) -> Vec<&Node> {
        self.find_all(|node| node.marks.iter().any(|mark| pattern.is_match(mark)))
    }

    /// Containers whose name matches `pattern`
    pub fn find_named(&self, pattern: &Regex) -> Vec<&Node> {
        self.find_all(|node| node.name.as_deref().is_some_and(|name| pattern.is_match(name)))
    }

    /// Leaves whose window title matches `pattern`
    pub fn find_titled(&self, pattern: &Regex) -> Vec<&Node> {
        self.leaves()
            .into_iter()
            .filter(|node| node.window_title().is_some_and(|title| pattern.is_match(title)))
            .collect()
    }

    fn find(&self, matches: impl Fn(&Node) -> bool) -> Option<&Node> {
        self.descendants().into_iter().find(|node| matches(node))
    }

    fn find_all(&self, matches: impl Fn(&Node) -> bool) -> Vec<&Node> {
        self.descendants()
            .into_iter()
            .filter(|node| matches(node))
            .collect()
    }

    fn visit<'a, F>(&'a self, f: &mut F)
    where
        F: FnMut(&'a Node, &'a Node),
    {
        for child in self.nodes.iter().chain(&self.floating_nodes) {
            f(child, self);
            child.visit(f);
        }
    }
}
