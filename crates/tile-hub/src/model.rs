use crate::config::{BarPosition, WmConfig};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;
use tile_core::{ChildItems, CommandTable, CommandTree, NodeKind, ResolutionContext, Selector};
use tracing::{debug, info};

/// Applies a log level to the running subscriber.
pub type LogLevelHook = Box<dyn Fn(&str) -> Result<(), String> + Send>;

pub const LOG_LEVELS: [&str; 5] = ["critical", "error", "warning", "info", "debug"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WmNode {
    Root,
    Bar { screen: usize, position: BarPosition },
    Group(String),
    Layout { group: String, index: usize },
    Screen(usize),
    Widget(String),
    Window(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("no such group: {0}")]
    NoSuchGroup(String),
    #[error("group already exists: {0}")]
    GroupExists(String),
    #[error("no such window: {0}")]
    NoSuchWindow(u64),
    #[error("no such screen: {0}")]
    NoSuchScreen(i64),
    #[error("no such layout: {0}")]
    NoSuchLayout(String),
    #[error("no such widget: {0}")]
    NoSuchWidget(String),
    #[error("cannot delete group {0}: every other group is on a screen")]
    GroupInUse(String),
    #[error("unknown log level: {0}")]
    UnknownLogLevel(String),
    #[error("log level change failed: {0}")]
    LogLevel(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct Window {
    pub id: u64,
    pub name: String,
    pub group: String,
    pub floating: bool,
    pub fullscreen: bool,
}

#[derive(Debug, Clone)]
pub struct Group {
    pub name: String,
    pub label: String,
    pub layouts: Vec<String>,
    pub current_layout: usize,
    pub windows: Vec<u64>,
    pub focus: Option<u64>,
    pub previous_focus: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Bar {
    pub position: BarPosition,
    pub size: u32,
    pub widgets: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Screen {
    pub index: usize,
    pub x: u32,
    pub width: u32,
    pub height: u32,
    pub group: String,
    pub previous_group: Option<String>,
    pub bars: Vec<Bar>,
}

#[derive(Debug, Clone)]
pub struct Widget {
    pub name: String,
    pub kind: String,
    pub screen: usize,
    pub bar: BarPosition,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WmEvent {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub kind: String,
    pub target: String,
}

/// In-memory window-manager state behind the command tree.
pub struct WmModel {
    groups: Vec<Group>,
    screens: Vec<Screen>,
    current_screen: usize,
    windows: BTreeMap<u64, Window>,
    widgets: Vec<Widget>,
    layout_names: Vec<String>,
    next_window_id: u64,
    events: VecDeque<WmEvent>,
    event_capacity: usize,
    event_seq: u64,
    log_level: String,
    log_hook: Option<LogLevelHook>,
    started_at: DateTime<Utc>,
    socket_path: Option<String>,
}

impl WmModel {
    /// Builds the initial state. `config` must already be validated.
    pub fn new(config: &WmConfig) -> Self {
        let groups = config
            .groups
            .iter()
            .map(|name| Group {
                name: name.clone(),
                label: name.clone(),
                layouts: config.layouts.clone(),
                current_layout: 0,
                windows: Vec::new(),
                focus: None,
                previous_focus: None,
            })
            .collect::<Vec<_>>();

        let mut widgets: Vec<Widget> = Vec::new();
        let mut screens = Vec::with_capacity(config.screens.len());
        let mut x = 0;
        for (index, screen) in config.screens.iter().enumerate() {
            let mut bars = Vec::with_capacity(screen.bars.len());
            for bar in &screen.bars {
                let mut names = Vec::with_capacity(bar.widgets.len());
                for kind in &bar.widgets {
                    let name = unique_widget_name(&widgets, kind);
                    names.push(name.clone());
                    widgets.push(Widget {
                        name,
                        kind: kind.clone(),
                        screen: index,
                        bar: bar.position,
                        text: String::new(),
                    });
                }
                bars.push(Bar {
                    position: bar.position,
                    size: bar.size,
                    widgets: names,
                });
            }
            screens.push(Screen {
                index,
                x,
                width: screen.width,
                height: screen.height,
                group: groups
                    .get(index)
                    .map(|group| group.name.clone())
                    .unwrap_or_default(),
                previous_group: None,
                bars,
            });
            x += screen.width;
        }

        Self {
            groups,
            screens,
            current_screen: 0,
            windows: BTreeMap::new(),
            widgets,
            layout_names: config.layouts.clone(),
            next_window_id: 1,
            events: VecDeque::new(),
            event_capacity: config.event_log_capacity.max(1),
            event_seq: 0,
            log_level: "info".to_string(),
            log_hook: None,
            started_at: Utc::now(),
            socket_path: None,
        }
    }

    pub fn set_socket_path(&mut self, path: impl Into<String>) {
        self.socket_path = Some(path.into());
    }

    pub fn set_log_level_hook(&mut self, initial: &str, hook: LogLevelHook) {
        self.log_level = initial.to_string();
        self.log_hook = Some(hook);
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn screens(&self) -> &[Screen] {
        &self.screens
    }

    pub fn current_screen(&self) -> usize {
        self.current_screen
    }

    pub fn window(&self, id: u64) -> Option<&Window> {
        self.windows.get(&id)
    }

    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|group| group.name == name)
    }

    pub fn widget(&self, name: &str) -> Option<&Widget> {
        self.widgets.iter().find(|widget| widget.name == name)
    }

    pub fn current_group(&self) -> &str {
        &self.screens[self.current_screen].group
    }

    pub fn focused_window(&self) -> Option<u64> {
        self.group(self.current_group()).and_then(|group| group.focus)
    }

    pub fn screen_of_group(&self, name: &str) -> Option<usize> {
        self.screens.iter().position(|screen| screen.group == name)
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn events(&self) -> impl DoubleEndedIterator<Item = &WmEvent> + ExactSizeIterator {
        self.events.iter()
    }

    fn group_mut(&mut self, name: &str) -> Result<&mut Group, ModelError> {
        self.groups
            .iter_mut()
            .find(|group| group.name == name)
            .ok_or_else(|| ModelError::NoSuchGroup(name.to_string()))
    }

    fn window_mut(&mut self, id: u64) -> Result<&mut Window, ModelError> {
        self.windows.get_mut(&id).ok_or(ModelError::NoSuchWindow(id))
    }

    fn screen_index(&self, index: i64) -> Result<usize, ModelError> {
        usize::try_from(index)
            .ok()
            .filter(|idx| *idx < self.screens.len())
            .ok_or(ModelError::NoSuchScreen(index))
    }

    fn record(&mut self, kind: &str, target: impl Into<String>) {
        self.event_seq += 1;
        let event = WmEvent {
            seq: self.event_seq,
            at: Utc::now(),
            kind: kind.to_string(),
            target: target.into(),
        };
        debug!(event = "wm_event", kind = %event.kind, target = %event.target, seq = event.seq);
        if self.events.len() == self.event_capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn add_window(
        &mut self,
        name: &str,
        group: Option<&str>,
        floating: bool,
    ) -> Result<u64, ModelError> {
        let group_name = group.unwrap_or(self.current_group()).to_string();
        self.group_mut(&group_name)?;

        let id = self.next_window_id;
        self.next_window_id += 1;
        self.windows.insert(
            id,
            Window {
                id,
                name: name.to_string(),
                group: group_name.clone(),
                floating,
                fullscreen: false,
            },
        );
        let group = self.group_mut(&group_name)?;
        group.windows.push(id);
        group.previous_focus = group.focus;
        group.focus = Some(id);
        self.record("window_add", format!("window[{id}]"));
        Ok(id)
    }

    pub fn kill_window(&mut self, id: u64) -> Result<(), ModelError> {
        let window = self.windows.remove(&id).ok_or(ModelError::NoSuchWindow(id))?;
        let group = self.group_mut(&window.group)?;
        detach(group, id);
        self.record("window_kill", format!("window[{id}]"));
        Ok(())
    }

    /// Focuses `id`, bringing its screen forward when the group is visible.
    /// Focusing the already focused window still records an event.
    pub fn focus_window(&mut self, id: u64) -> Result<(), ModelError> {
        let group_name = self
            .windows
            .get(&id)
            .map(|window| window.group.clone())
            .ok_or(ModelError::NoSuchWindow(id))?;
        let group = self.group_mut(&group_name)?;
        if group.focus != Some(id) {
            group.previous_focus = group.focus;
            group.focus = Some(id);
        }
        if let Some(screen) = self.screen_of_group(&group_name) {
            self.current_screen = screen;
        }
        self.record("window_focus", format!("window[{id}]"));
        Ok(())
    }

    pub fn window_to_group(&mut self, id: u64, target: &str) -> Result<(), ModelError> {
        self.group_mut(target)?;
        let window = self.window_mut(id)?;
        let source = std::mem::replace(&mut window.group, target.to_string());
        if source == target {
            self.record("window_togroup", format!("window[{id}]"));
            return Ok(());
        }
        detach(self.group_mut(&source)?, id);
        let group = self.group_mut(target)?;
        group.windows.push(id);
        group.previous_focus = group.focus;
        group.focus = Some(id);
        self.record("window_togroup", format!("window[{id}]"));
        Ok(())
    }

    pub fn toggle_floating(&mut self, id: u64) -> Result<bool, ModelError> {
        let window = self.window_mut(id)?;
        window.floating = !window.floating;
        Ok(window.floating)
    }

    pub fn toggle_fullscreen(&mut self, id: u64) -> Result<bool, ModelError> {
        let window = self.window_mut(id)?;
        window.fullscreen = !window.fullscreen;
        Ok(window.fullscreen)
    }

    pub fn add_group(&mut self, name: &str) -> Result<(), ModelError> {
        if self.group(name).is_some() {
            return Err(ModelError::GroupExists(name.to_string()));
        }
        self.groups.push(Group {
            name: name.to_string(),
            label: name.to_string(),
            layouts: self.layout_names.clone(),
            current_layout: 0,
            windows: Vec::new(),
            focus: None,
            previous_focus: None,
        });
        info!(event = "wm_group_added", group = %name);
        Ok(())
    }

    /// Removes `name`, moving its windows to the group that replaces it.
    pub fn delete_group(&mut self, name: &str) -> Result<(), ModelError> {
        if self.group(name).is_none() {
            return Err(ModelError::NoSuchGroup(name.to_string()));
        }
        let visible_on = self.screen_of_group(name);
        let target = match visible_on {
            Some(_) => self
                .groups
                .iter()
                .find(|group| group.name != name && self.screen_of_group(&group.name).is_none())
                .map(|group| group.name.clone())
                .ok_or_else(|| ModelError::GroupInUse(name.to_string()))?,
            None => self.current_group().to_string(),
        };

        if let Some(screen) = visible_on {
            self.screens[screen].group = target.clone();
        }
        for screen in &mut self.screens {
            if screen.previous_group.as_deref() == Some(name) {
                screen.previous_group = None;
            }
        }

        let removed = self
            .groups
            .iter()
            .position(|group| group.name == name)
            .map(|idx| self.groups.remove(idx))
            .ok_or_else(|| ModelError::NoSuchGroup(name.to_string()))?;
        for id in &removed.windows {
            if let Some(window) = self.windows.get_mut(id) {
                window.group = target.clone();
            }
        }
        let group = self.group_mut(&target)?;
        group.windows.extend(removed.windows.iter().copied());
        if group.focus.is_none() {
            group.focus = group.windows.last().copied();
        }
        info!(event = "wm_group_deleted", group = %name, windows_to = %target);
        Ok(())
    }

    /// Makes `index` the current screen; re-selecting it still records an event.
    pub fn focus_screen(&mut self, index: i64) -> Result<(), ModelError> {
        self.current_screen = self.screen_index(index)?;
        self.record("screen_focus", format!("screen[{}]", self.current_screen));
        Ok(())
    }

    pub fn cycle_screen(&mut self, forward: bool) -> Result<usize, ModelError> {
        let count = self.screens.len();
        let next = if forward {
            (self.current_screen + 1) % count
        } else {
            (self.current_screen + count - 1) % count
        };
        self.focus_screen(next as i64)?;
        Ok(next)
    }

    /// Shows `group` on `screen`, swapping with the screen that already shows it.
    pub fn show_group(&mut self, group: &str, screen: usize) -> Result<(), ModelError> {
        if self.group(group).is_none() {
            return Err(ModelError::NoSuchGroup(group.to_string()));
        }
        if screen >= self.screens.len() {
            return Err(ModelError::NoSuchScreen(screen as i64));
        }
        let displaced = self.screens[screen].group.clone();
        if displaced != group {
            if let Some(other) = self.screen_of_group(group) {
                self.screens[other].group = displaced.clone();
            }
            self.screens[screen].previous_group = Some(displaced);
            self.screens[screen].group = group.to_string();
        }
        self.current_screen = screen;
        self.record("group_show", format!("group[{group}]"));
        Ok(())
    }

    /// Next or previous group in configuration order that no other screen shows.
    pub fn cycle_group(&mut self, screen: usize, forward: bool) -> Result<String, ModelError> {
        let current = self
            .screens
            .get(screen)
            .map(|s| s.group.clone())
            .ok_or(ModelError::NoSuchScreen(screen as i64))?;
        let count = self.groups.len();
        let start = self
            .groups
            .iter()
            .position(|group| group.name == current)
            .unwrap_or(0);
        for step in 1..=count {
            let idx = if forward {
                (start + step) % count
            } else {
                (start + count * step - step) % count
            };
            let candidate = self.groups[idx].name.clone();
            let shown_elsewhere = self
                .screen_of_group(&candidate)
                .is_some_and(|other| other != screen);
            if !shown_elsewhere {
                self.show_group(&candidate, screen)?;
                return Ok(candidate);
            }
        }
        Ok(current)
    }

    /// Switches `screen` to `group`, or back to its previous group when
    /// `group` is already shown or not given.
    pub fn toggle_group(&mut self, screen: usize, group: Option<&str>) -> Result<String, ModelError> {
        let state = self
            .screens
            .get(screen)
            .ok_or(ModelError::NoSuchScreen(screen as i64))?;
        let target = match group {
            Some(name) if name != state.group => Some(name.to_string()),
            _ => state.previous_group.clone(),
        };
        let target = target.unwrap_or_else(|| state.group.clone());
        self.show_group(&target, screen)?;
        Ok(target)
    }

    pub fn set_layout(&mut self, group: &str, layout: &str) -> Result<(), ModelError> {
        let state = self.group_mut(group)?;
        let index = state
            .layouts
            .iter()
            .position(|name| name == layout)
            .ok_or_else(|| ModelError::NoSuchLayout(layout.to_string()))?;
        state.current_layout = index;
        self.record("layout_set", format!("group[{group}]/layout[{index}]"));
        Ok(())
    }

    pub fn cycle_layout(&mut self, group: &str, forward: bool) -> Result<String, ModelError> {
        let state = self.group_mut(group)?;
        let count = state.layouts.len();
        state.current_layout = if forward {
            (state.current_layout + 1) % count
        } else {
            (state.current_layout + count - 1) % count
        };
        let name = state.layouts[state.current_layout].clone();
        let index = state.current_layout;
        self.record("layout_set", format!("group[{group}]/layout[{index}]"));
        Ok(name)
    }

    pub fn cycle_window(&mut self, group: &str, forward: bool) -> Result<Option<u64>, ModelError> {
        let state = self.group_mut(group)?;
        let count = state.windows.len();
        if count == 0 {
            return Ok(None);
        }
        let current = state
            .focus
            .and_then(|id| state.windows.iter().position(|w| *w == id))
            .unwrap_or(0);
        let next = if forward {
            (current + 1) % count
        } else {
            (current + count - 1) % count
        };
        let id = state.windows[next];
        self.focus_window(id)?;
        Ok(Some(id))
    }

    pub fn focus_back(&mut self, group: &str) -> Result<Option<u64>, ModelError> {
        let state = self.group_mut(group)?;
        let previous = state
            .previous_focus
            .filter(|id| state.windows.contains(id));
        if let Some(id) = previous {
            self.focus_window(id)?;
        }
        Ok(previous)
    }

    pub fn set_label(&mut self, group: &str, label: &str) -> Result<(), ModelError> {
        self.group_mut(group)?.label = label.to_string();
        Ok(())
    }

    pub fn update_widget(&mut self, name: &str, text: &str) -> Result<(), ModelError> {
        let widget = self
            .widgets
            .iter_mut()
            .find(|widget| widget.name == name)
            .ok_or_else(|| ModelError::NoSuchWidget(name.to_string()))?;
        widget.text = text.to_string();
        Ok(())
    }

    /// `critical`, `error`, `warning`, `info` or `debug`.
    pub fn set_log_level(&mut self, level: &str) -> Result<(), ModelError> {
        let directive = match level {
            "critical" | "error" => "error",
            "warning" => "warn",
            "info" => "info",
            "debug" => "debug",
            other => return Err(ModelError::UnknownLogLevel(other.to_string())),
        };
        if let Some(hook) = &self.log_hook {
            hook(directive).map_err(ModelError::LogLevel)?;
        }
        self.log_level = level.to_string();
        info!(event = "wm_log_level", level = %level);
        Ok(())
    }

    pub fn group_info(&self, name: &str) -> Result<Value, ModelError> {
        let group = self
            .group(name)
            .ok_or_else(|| ModelError::NoSuchGroup(name.to_string()))?;
        Ok(json!({
            "name": group.name,
            "label": group.label,
            "layout": group.layouts.get(group.current_layout),
            "layouts": group.layouts,
            "windows": group.windows,
            "focus": group.focus,
            "screen": self.screen_of_group(&group.name),
        }))
    }

    pub fn screen_info(&self, index: usize) -> Result<Value, ModelError> {
        let screen = self
            .screens
            .get(index)
            .ok_or(ModelError::NoSuchScreen(index as i64))?;
        let bars: Vec<&str> = screen.bars.iter().map(|bar| bar.position.as_str()).collect();
        Ok(json!({
            "index": screen.index,
            "x": screen.x,
            "y": 0,
            "width": screen.width,
            "height": screen.height,
            "group": screen.group,
            "bars": bars,
        }))
    }

    pub fn window_info(&self, id: u64) -> Result<Value, ModelError> {
        let window = self.window(id).ok_or(ModelError::NoSuchWindow(id))?;
        let focused = self
            .group(&window.group)
            .is_some_and(|group| group.focus == Some(id));
        Ok(json!({
            "id": window.id,
            "name": window.name,
            "group": window.group,
            "floating": window.floating,
            "fullscreen": window.fullscreen,
            "focused": focused,
        }))
    }

    pub fn layout_info(&self, group: &str, index: usize) -> Result<Value, ModelError> {
        let state = self
            .group(group)
            .ok_or_else(|| ModelError::NoSuchGroup(group.to_string()))?;
        let name = state
            .layouts
            .get(index)
            .ok_or_else(|| ModelError::NoSuchLayout(index.to_string()))?;
        Ok(json!({
            "name": name,
            "group": group,
            "index": index,
            "current": state.current_layout == index,
            "clients": state.windows,
        }))
    }

    pub fn bar_info(&self, screen: usize, position: BarPosition) -> Result<Value, ModelError> {
        let bar = self
            .screens
            .get(screen)
            .and_then(|s| s.bars.iter().find(|bar| bar.position == position))
            .ok_or(ModelError::NoSuchScreen(screen as i64))?;
        Ok(json!({
            "screen": screen,
            "position": position,
            "size": bar.size,
            "widgets": bar.widgets,
        }))
    }

    pub fn widget_info(&self, name: &str) -> Result<Value, ModelError> {
        let widget = self
            .widget(name)
            .ok_or_else(|| ModelError::NoSuchWidget(name.to_string()))?;
        Ok(json!({
            "name": widget.name,
            "kind": widget.kind,
            "screen": widget.screen,
            "bar": widget.bar,
            "text": widget.text,
        }))
    }

    pub fn hub_info(&self) -> Value {
        let uptime = Utc::now().signed_duration_since(self.started_at);
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "socket": self.socket_path,
            "started_at": self.started_at.to_rfc3339(),
            "uptime_seconds": uptime.num_seconds(),
            "log_level": self.log_level,
        })
    }

    pub fn bar_widgets(&self, screen: usize, position: BarPosition) -> Vec<String> {
        self.screens
            .get(screen)
            .and_then(|s| s.bars.iter().find(|bar| bar.position == position))
            .map(|bar| bar.widgets.clone())
            .unwrap_or_default()
    }

    fn relation(&self, node: &WmNode, tag: NodeKind, ctx: &ResolutionContext) -> Option<Relation> {
        let relation = match (node, tag) {
            (WmNode::Root, NodeKind::Bar) => self.bars_of(self.current_screen),
            (WmNode::Root, NodeKind::Group) => Relation::global(
                self.groups.iter().map(|g| Selector::Name(g.name.clone())).collect(),
                ctx.group.clone(),
            ),
            (WmNode::Root, NodeKind::Layout) => {
                let group = self.group(self.current_group())?;
                Relation {
                    items: layout_items(group),
                    default: ctx.layout.clone(),
                    owner: Owner::Group(group.name.clone()),
                }
            }
            (WmNode::Root, NodeKind::Screen) => Relation::global(
                (0..self.screens.len()).map(|idx| Selector::Index(idx as i64)).collect(),
                ctx.screen.clone(),
            ),
            (WmNode::Root, NodeKind::Widget) => Relation::global(
                self.widgets.iter().map(|w| Selector::Name(w.name.clone())).collect(),
                None,
            ),
            (WmNode::Root, NodeKind::Window) => Relation::global(
                self.windows.keys().map(|id| Selector::Index(*id as i64)).collect(),
                ctx.window.clone(),
            ),
            (WmNode::Group(name), NodeKind::Layout) => self.layouts_of(name)?,
            (WmNode::Group(name), NodeKind::Window) => self.windows_of(name)?,
            (WmNode::Group(name), NodeKind::Screen) => {
                self.group(name)?;
                Relation::single(self.screen_of_group(name).map(index_selector))
            }
            (WmNode::Layout { group, .. }, NodeKind::Group) => {
                self.group(group)?;
                Relation::single(Some(Selector::Name(group.clone())))
            }
            (WmNode::Layout { group, .. }, NodeKind::Window) => self.windows_of(group)?,
            (WmNode::Layout { group, .. }, NodeKind::Screen) => {
                self.group(group)?;
                Relation::single(self.screen_of_group(group).map(index_selector))
            }
            (WmNode::Screen(index), NodeKind::Layout) => {
                self.layouts_of(&self.screens.get(*index)?.group)?
            }
            (WmNode::Screen(index), NodeKind::Window) => {
                self.windows_of(&self.screens.get(*index)?.group)?
            }
            (WmNode::Screen(index), NodeKind::Bar) => {
                self.screens.get(*index)?;
                self.bars_of(*index)
            }
            (WmNode::Window(id), NodeKind::Group) => {
                Relation::single(Some(Selector::Name(self.window(*id)?.group.clone())))
            }
            (WmNode::Window(id), NodeKind::Screen) => {
                let group = &self.window(*id)?.group;
                Relation::single(self.screen_of_group(group).map(index_selector))
            }
            (WmNode::Window(id), NodeKind::Layout) => {
                let group = self.group(&self.window(*id)?.group)?;
                Relation {
                    items: Vec::new(),
                    default: Some(index_selector(group.current_layout)),
                    owner: Owner::Group(group.name.clone()),
                }
            }
            (WmNode::Bar { screen, .. }, NodeKind::Screen) => {
                Relation::single(Some(index_selector(*screen)))
            }
            (WmNode::Widget(name), NodeKind::Bar) => {
                let widget = self.widget(name)?;
                Relation {
                    items: Vec::new(),
                    default: Some(Selector::Name(widget.bar.as_str().to_string())),
                    owner: Owner::Screen(widget.screen),
                }
            }
            (WmNode::Widget(name), NodeKind::Screen) => {
                Relation::single(Some(index_selector(self.widget(name)?.screen)))
            }
            _ => return None,
        };
        Some(relation)
    }

    fn layouts_of(&self, group: &str) -> Option<Relation> {
        let group = self.group(group)?;
        Some(Relation {
            items: layout_items(group),
            default: Some(index_selector(group.current_layout)),
            owner: Owner::Group(group.name.clone()),
        })
    }

    fn windows_of(&self, group: &str) -> Option<Relation> {
        let group = self.group(group)?;
        Some(Relation::global(
            group.windows.iter().map(|id| Selector::Index(*id as i64)).collect(),
            group.focus.map(|id| Selector::Index(id as i64)),
        ))
    }

    fn bars_of(&self, screen: usize) -> Relation {
        Relation {
            items: self
                .screens
                .get(screen)
                .map(|s| {
                    s.bars
                        .iter()
                        .map(|bar| Selector::Name(bar.position.as_str().to_string()))
                        .collect()
                })
                .unwrap_or_default(),
            default: None,
            owner: Owner::Screen(screen),
        }
    }

    fn build(&self, tag: NodeKind, chosen: &Selector, owner: &Owner) -> Option<WmNode> {
        match tag {
            NodeKind::Group => {
                let name = chosen.to_string();
                self.group(&name).map(|_| WmNode::Group(name))
            }
            NodeKind::Layout => {
                let Owner::Group(group) = owner else {
                    return None;
                };
                let index = usize::try_from(chosen.as_index()?).ok()?;
                (index < self.group(group)?.layouts.len()).then(|| WmNode::Layout {
                    group: group.clone(),
                    index,
                })
            }
            NodeKind::Screen => {
                let index = usize::try_from(chosen.as_index()?).ok()?;
                (index < self.screens.len()).then_some(WmNode::Screen(index))
            }
            NodeKind::Window => {
                let id = u64::try_from(chosen.as_index()?).ok()?;
                self.windows.contains_key(&id).then_some(WmNode::Window(id))
            }
            NodeKind::Bar => {
                let Owner::Screen(screen) = owner else {
                    return None;
                };
                let position = BarPosition::parse(&chosen.to_string())?;
                self.screens
                    .get(*screen)?
                    .bars
                    .iter()
                    .any(|bar| bar.position == position)
                    .then_some(WmNode::Bar {
                        screen: *screen,
                        position,
                    })
            }
            NodeKind::Widget => {
                let name = chosen.to_string();
                self.widget(&name).map(|_| WmNode::Widget(name))
            }
            NodeKind::Root => None,
        }
    }
}

enum Owner {
    Global,
    Group(String),
    Screen(usize),
}

struct Relation {
    items: Vec<Selector>,
    default: Option<Selector>,
    owner: Owner,
}

impl Relation {
    fn global(items: Vec<Selector>, default: Option<Selector>) -> Self {
        Self {
            items,
            default,
            owner: Owner::Global,
        }
    }

    fn single(default: Option<Selector>) -> Self {
        Self::global(Vec::new(), default)
    }
}

fn index_selector(index: usize) -> Selector {
    Selector::Index(index as i64)
}

fn layout_items(group: &Group) -> Vec<Selector> {
    (0..group.layouts.len()).map(index_selector).collect()
}

fn detach(group: &mut Group, id: u64) {
    group.windows.retain(|window| *window != id);
    if group.previous_focus == Some(id) {
        group.previous_focus = None;
    }
    if group.focus == Some(id) {
        group.focus = group.previous_focus.take().or_else(|| group.windows.last().copied());
    }
}

fn unique_widget_name(existing: &[Widget], kind: &str) -> String {
    let taken = |name: &str| existing.iter().any(|widget| widget.name == name);
    if !taken(kind) {
        return kind.to_string();
    }
    (1..)
        .map(|n| format!("{kind}_{n}"))
        .find(|name| !taken(name))
        .unwrap_or_else(|| kind.to_string())
}

impl CommandTree for WmModel {
    type Node = WmNode;

    fn root(&self) -> WmNode {
        WmNode::Root
    }

    fn kind_of(node: &WmNode) -> NodeKind {
        match node {
            WmNode::Root => NodeKind::Root,
            WmNode::Bar { .. } => NodeKind::Bar,
            WmNode::Group(_) => NodeKind::Group,
            WmNode::Layout { .. } => NodeKind::Layout,
            WmNode::Screen(_) => NodeKind::Screen,
            WmNode::Widget(_) => NodeKind::Widget,
            WmNode::Window(_) => NodeKind::Window,
        }
    }

    fn context(&self) -> ResolutionContext {
        let group = self.group(self.current_group());
        ResolutionContext {
            screen: Some(index_selector(self.current_screen)),
            group: group.map(|g| Selector::Name(g.name.clone())),
            layout: group.map(|g| index_selector(g.current_layout)),
            window: group.and_then(|g| g.focus).map(|id| Selector::Index(id as i64)),
        }
    }

    fn items(&self, node: &WmNode, tag: NodeKind, ctx: &ResolutionContext) -> Option<ChildItems> {
        let relation = self.relation(node, tag, ctx)?;
        Some(ChildItems::new(relation.default.is_some(), relation.items))
    }

    fn select(
        &self,
        node: &WmNode,
        tag: NodeKind,
        selector: Option<&Selector>,
        ctx: &ResolutionContext,
    ) -> Option<WmNode> {
        let relation = self.relation(node, tag, ctx)?;
        let chosen = match selector {
            Some(selector) if relation.items.iter().any(|item| item.matches(selector)) => {
                selector.clone()
            }
            Some(_) => return None,
            None => relation.default?,
        };
        self.build(tag, &chosen, &relation.owner)
    }

    fn command_table() -> CommandTable<Self> {
        crate::commands::table()
    }
}
