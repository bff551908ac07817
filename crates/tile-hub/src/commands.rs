use crate::config::BarPosition;
use crate::model::{ModelError, WmModel, WmNode};
use serde_json::{json, Map, Value};
use tile_core::{BoundArgs, CommandDescriptor, CommandFailure, CommandSpec, CommandTable, NodeKind, Param};

type Outcome = Result<Value, CommandFailure>;
type Descriptor = CommandDescriptor<WmModel>;
type Spec = CommandSpec<WmModel>;

impl From<ModelError> for CommandFailure {
    fn from(err: ModelError) -> Self {
        CommandFailure::Failed(err.to_string())
    }
}

pub fn table() -> CommandTable<WmModel> {
    CommandTable::new()
        .register(root())
        .register(group())
        .register(layout())
        .register(screen())
        .register(window())
        .register(bar())
        .register(widget())
}

fn root() -> Descriptor {
    Descriptor::new(NodeKind::Root)
        .command(Spec::new("status", status).doc("Return \"OK\" while the hub is serving."))
        .command(Spec::new("hub_info", hub_info).doc("Version, socket and uptime of the hub."))
        .command(Spec::new("groups", groups).doc("Info for every group, keyed by name."))
        .command(Spec::new("screens", screens).doc("Info for every screen."))
        .command(Spec::new("windows", windows).doc("Info for every managed window."))
        .command(
            Spec::new("add_window", add_window)
                .param(Param::required("name"))
                .param(Param::optional("group", Value::Null))
                .param(Param::optional("floating", json!(false)))
                .doc("Manage a new window and focus it. Returns its id."),
        )
        .command(
            Spec::new("add_group", add_group)
                .param(Param::required("name"))
                .doc("Create an empty group."),
        )
        .command(
            Spec::new("delete_group", delete_group)
                .param(Param::required("name"))
                .doc("Delete a group, moving its windows elsewhere."),
        )
        .command(
            Spec::new("to_screen", to_screen)
                .param(Param::required("index"))
                .doc("Focus the screen at index."),
        )
        .command(Spec::new("next_screen", next_screen).doc("Focus the next screen."))
        .command(Spec::new("prev_screen", prev_screen).doc("Focus the previous screen."))
        .command(Spec::new("critical", critical).doc("Set log level to CRITICAL."))
        .command(Spec::new("error", error).doc("Set log level to ERROR."))
        .command(Spec::new("warning", warning).doc("Set log level to WARNING."))
        .command(Spec::new("info", info).doc("Set log level to INFO."))
        .command(Spec::new("debug", debug).doc("Set log level to DEBUG."))
        .command(Spec::new("loglevel", loglevel).doc("Current log level name."))
        .command(
            Spec::new("events", events)
                .param(Param::optional("limit", Value::Null))
                .doc("Recent focus and selection events, oldest first."),
        )
}

fn group() -> Descriptor {
    Descriptor::new(NodeKind::Group)
        .command(Spec::new("info", group_info).doc("Name, label, layouts and windows of the group."))
        .command(
            Spec::new("toscreen", group_toscreen)
                .param(Param::optional("screen", Value::Null))
                .doc("Show the group on a screen, the current one by default."),
        )
        .command(
            Spec::new("setlayout", group_setlayout)
                .param(Param::required("layout"))
                .doc("Switch to the named layout."),
        )
        .command(Spec::new("next_layout", group_next_layout))
        .command(Spec::new("prev_layout", group_prev_layout))
        .command(Spec::new("focus_back", group_focus_back).doc("Focus the previously focused window."))
        .command(Spec::new("next_window", group_next_window))
        .command(Spec::new("prev_window", group_prev_window))
        .command(
            Spec::new("set_label", group_set_label)
                .param(Param::required("label"))
                .doc("Set the display label of the group."),
        )
}

fn layout() -> Descriptor {
    Descriptor::new(NodeKind::Layout)
        .command(Spec::new("info", layout_info))
        .command(Spec::new("next", layout_next).doc("Focus the next window in the layout."))
        .command(Spec::new("previous", layout_previous).doc("Focus the previous window in the layout."))
}

fn screen() -> Descriptor {
    Descriptor::new(NodeKind::Screen)
        .command(Spec::new("info", screen_info).doc("Geometry, group and bars of the screen."))
        .command(Spec::new("next_group", screen_next_group))
        .command(Spec::new("prev_group", screen_prev_group))
        .command(
            Spec::new("toggle_group", screen_toggle_group)
                .param(Param::optional("group_name", Value::Null))
                .doc("Switch to a group, or back to the previous one."),
        )
}

fn window() -> Descriptor {
    Descriptor::new(NodeKind::Window)
        .command(Spec::new("info", window_info))
        .command(Spec::new("focus", window_focus))
        .command(Spec::new("kill", window_kill).doc("Close the window."))
        .command(
            Spec::new("togroup", window_togroup)
                .param(Param::required("group_name"))
                .doc("Move the window to a group."),
        )
        .command(Spec::new("toggle_floating", window_toggle_floating))
        .command(Spec::new("toggle_fullscreen", window_toggle_fullscreen))
}

fn bar() -> Descriptor {
    Descriptor::new(NodeKind::Bar)
        .command(Spec::new("info", bar_info))
        .command(Spec::new("widgets", bar_widgets).doc("Names of the widgets on the bar."))
}

fn widget() -> Descriptor {
    Descriptor::new(NodeKind::Widget)
        .command(Spec::new("info", widget_info))
        .command(Spec::new("get", widget_get).doc("Current text of the widget."))
        .command(
            Spec::new("update", widget_update)
                .param(Param::required("text"))
                .doc("Replace the text of the widget."),
        )
}

fn wrong_node(node: &WmNode) -> CommandFailure {
    CommandFailure::failed(format!("command not applicable to {node:?}"))
}

fn group_of(node: &WmNode) -> Result<&str, CommandFailure> {
    match node {
        WmNode::Group(name) => Ok(name),
        other => Err(wrong_node(other)),
    }
}

fn screen_of(node: &WmNode) -> Result<usize, CommandFailure> {
    match node {
        WmNode::Screen(index) => Ok(*index),
        other => Err(wrong_node(other)),
    }
}

fn window_of(node: &WmNode) -> Result<u64, CommandFailure> {
    match node {
        WmNode::Window(id) => Ok(*id),
        other => Err(wrong_node(other)),
    }
}

fn layout_of(node: &WmNode) -> Result<(&str, usize), CommandFailure> {
    match node {
        WmNode::Layout { group, index } => Ok((group, *index)),
        other => Err(wrong_node(other)),
    }
}

fn bar_of(node: &WmNode) -> Result<(usize, BarPosition), CommandFailure> {
    match node {
        WmNode::Bar { screen, position } => Ok((*screen, *position)),
        other => Err(wrong_node(other)),
    }
}

fn widget_of(node: &WmNode) -> Result<&str, CommandFailure> {
    match node {
        WmNode::Widget(name) => Ok(name),
        other => Err(wrong_node(other)),
    }
}

fn status(_: &mut WmModel, _: &WmNode, _: &BoundArgs) -> Outcome {
    Ok(json!("OK"))
}

fn hub_info(model: &mut WmModel, _: &WmNode, _: &BoundArgs) -> Outcome {
    Ok(model.hub_info())
}

fn groups(model: &mut WmModel, _: &WmNode, _: &BoundArgs) -> Outcome {
    let mut out = Map::new();
    for group in model.groups() {
        out.insert(group.name.clone(), model.group_info(&group.name)?);
    }
    Ok(Value::Object(out))
}

fn screens(model: &mut WmModel, _: &WmNode, _: &BoundArgs) -> Outcome {
    let infos = (0..model.screens().len())
        .map(|index| model.screen_info(index))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Array(infos))
}

fn windows(model: &mut WmModel, _: &WmNode, _: &BoundArgs) -> Outcome {
    let ids: Vec<u64> = model
        .groups()
        .iter()
        .flat_map(|group| group.windows.iter().copied())
        .collect();
    let infos = ids
        .into_iter()
        .map(|id| model.window_info(id))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::Array(infos))
}

fn add_window(model: &mut WmModel, _: &WmNode, args: &BoundArgs) -> Outcome {
    let id = model.add_window(args.str("name")?, args.opt_str("group")?, args.bool("floating")?)?;
    Ok(json!(id))
}

fn add_group(model: &mut WmModel, _: &WmNode, args: &BoundArgs) -> Outcome {
    model.add_group(args.str("name")?)?;
    Ok(json!(true))
}

fn delete_group(model: &mut WmModel, _: &WmNode, args: &BoundArgs) -> Outcome {
    model.delete_group(args.str("name")?)?;
    Ok(Value::Null)
}

fn to_screen(model: &mut WmModel, _: &WmNode, args: &BoundArgs) -> Outcome {
    model.focus_screen(args.i64("index")?)?;
    Ok(Value::Null)
}

fn next_screen(model: &mut WmModel, _: &WmNode, _: &BoundArgs) -> Outcome {
    Ok(json!(model.cycle_screen(true)?))
}

fn prev_screen(model: &mut WmModel, _: &WmNode, _: &BoundArgs) -> Outcome {
    Ok(json!(model.cycle_screen(false)?))
}

fn critical(model: &mut WmModel, _: &WmNode, _: &BoundArgs) -> Outcome {
    model.set_log_level("critical")?;
    Ok(Value::Null)
}

fn error(model: &mut WmModel, _: &WmNode, _: &BoundArgs) -> Outcome {
    model.set_log_level("error")?;
    Ok(Value::Null)
}

fn warning(model: &mut WmModel, _: &WmNode, _: &BoundArgs) -> Outcome {
    model.set_log_level("warning")?;
    Ok(Value::Null)
}

fn info(model: &mut WmModel, _: &WmNode, _: &BoundArgs) -> Outcome {
    model.set_log_level("info")?;
    Ok(Value::Null)
}

fn debug(model: &mut WmModel, _: &WmNode, _: &BoundArgs) -> Outcome {
    model.set_log_level("debug")?;
    Ok(Value::Null)
}

fn loglevel(model: &mut WmModel, _: &WmNode, _: &BoundArgs) -> Outcome {
    Ok(json!(model.log_level()))
}

fn events(model: &mut WmModel, _: &WmNode, args: &BoundArgs) -> Outcome {
    let total = model.events().len();
    let skip = match args.opt_i64("limit")? {
        Some(limit) if limit < 0 => {
            return Err(CommandFailure::invalid("limit must not be negative"));
        }
        Some(limit) => total.saturating_sub(limit as usize),
        None => 0,
    };
    let events: Vec<Value> = model
        .events()
        .skip(skip)
        .map(|event| json!(event))
        .collect();
    Ok(Value::Array(events))
}

fn group_info(model: &mut WmModel, node: &WmNode, _: &BoundArgs) -> Outcome {
    Ok(model.group_info(group_of(node)?)?)
}

fn group_toscreen(model: &mut WmModel, node: &WmNode, args: &BoundArgs) -> Outcome {
    let screen = match args.opt_i64("screen")? {
        Some(index) => usize::try_from(index)
            .map_err(|_| CommandFailure::from(ModelError::NoSuchScreen(index)))?,
        None => model.current_screen(),
    };
    model.show_group(group_of(node)?, screen)?;
    Ok(Value::Null)
}

fn group_setlayout(model: &mut WmModel, node: &WmNode, args: &BoundArgs) -> Outcome {
    model.set_layout(group_of(node)?, args.str("layout")?)?;
    Ok(Value::Null)
}

fn group_next_layout(model: &mut WmModel, node: &WmNode, _: &BoundArgs) -> Outcome {
    Ok(json!(model.cycle_layout(group_of(node)?, true)?))
}

fn group_prev_layout(model: &mut WmModel, node: &WmNode, _: &BoundArgs) -> Outcome {
    Ok(json!(model.cycle_layout(group_of(node)?, false)?))
}

fn group_focus_back(model: &mut WmModel, node: &WmNode, _: &BoundArgs) -> Outcome {
    Ok(json!(model.focus_back(group_of(node)?)?))
}

fn group_next_window(model: &mut WmModel, node: &WmNode, _: &BoundArgs) -> Outcome {
    Ok(json!(model.cycle_window(group_of(node)?, true)?))
}

fn group_prev_window(model: &mut WmModel, node: &WmNode, _: &BoundArgs) -> Outcome {
    Ok(json!(model.cycle_window(group_of(node)?, false)?))
}

fn group_set_label(model: &mut WmModel, node: &WmNode, args: &BoundArgs) -> Outcome {
    model.set_label(group_of(node)?, args.str("label")?)?;
    Ok(Value::Null)
}

fn layout_info(model: &mut WmModel, node: &WmNode, _: &BoundArgs) -> Outcome {
    let (group, index) = layout_of(node)?;
    Ok(model.layout_info(group, index)?)
}

fn layout_next(model: &mut WmModel, node: &WmNode, _: &BoundArgs) -> Outcome {
    Ok(json!(model.cycle_window(layout_of(node)?.0, true)?))
}

fn layout_previous(model: &mut WmModel, node: &WmNode, _: &BoundArgs) -> Outcome {
    Ok(json!(model.cycle_window(layout_of(node)?.0, false)?))
}

fn screen_info(model: &mut WmModel, node: &WmNode, _: &BoundArgs) -> Outcome {
    Ok(model.screen_info(screen_of(node)?)?)
}

fn screen_next_group(model: &mut WmModel, node: &WmNode, _: &BoundArgs) -> Outcome {
    Ok(json!(model.cycle_group(screen_of(node)?, true)?))
}

fn screen_prev_group(model: &mut WmModel, node: &WmNode, _: &BoundArgs) -> Outcome {
    Ok(json!(model.cycle_group(screen_of(node)?, false)?))
}

fn screen_toggle_group(model: &mut WmModel, node: &WmNode, args: &BoundArgs) -> Outcome {
    Ok(json!(model.toggle_group(screen_of(node)?, args.opt_str("group_name")?)?))
}

fn window_info(model: &mut WmModel, node: &WmNode, _: &BoundArgs) -> Outcome {
    Ok(model.window_info(window_of(node)?)?)
}

fn window_focus(model: &mut WmModel, node: &WmNode, _: &BoundArgs) -> Outcome {
    model.focus_window(window_of(node)?)?;
    Ok(Value::Null)
}

fn window_kill(model: &mut WmModel, node: &WmNode, _: &BoundArgs) -> Outcome {
    model.kill_window(window_of(node)?)?;
    Ok(Value::Null)
}

fn window_togroup(model: &mut WmModel, node: &WmNode, args: &BoundArgs) -> Outcome {
    model.window_to_group(window_of(node)?, args.str("group_name")?)?;
    Ok(Value::Null)
}

fn window_toggle_floating(model: &mut WmModel, node: &WmNode, _: &BoundArgs) -> Outcome {
    Ok(json!(model.toggle_floating(window_of(node)?)?))
}

fn window_toggle_fullscreen(model: &mut WmModel, node: &WmNode, _: &BoundArgs) -> Outcome {
    Ok(json!(model.toggle_fullscreen(window_of(node)?)?))
}

fn bar_info(model: &mut WmModel, node: &WmNode, _: &BoundArgs) -> Outcome {
    let (screen, position) = bar_of(node)?;
    Ok(model.bar_info(screen, position)?)
}

fn bar_widgets(model: &mut WmModel, node: &WmNode, _: &BoundArgs) -> Outcome {
    let (screen, position) = bar_of(node)?;
    Ok(json!(model.bar_widgets(screen, position)))
}

fn widget_info(model: &mut WmModel, node: &WmNode, _: &BoundArgs) -> Outcome {
    Ok(model.widget_info(widget_of(node)?)?)
}

fn widget_get(model: &mut WmModel, node: &WmNode, _: &BoundArgs) -> Outcome {
    let name = widget_of(node)?;
    let widget = model
        .widget(name)
        .ok_or_else(|| ModelError::NoSuchWidget(name.to_string()))?;
    Ok(json!(widget.text))
}

fn widget_update(model: &mut WmModel, node: &WmNode, args: &BoundArgs) -> Outcome {
    model.update_widget(widget_of(node)?, args.str("text")?)?;
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use crate::config::WmConfig;
    use crate::model::WmModel;
    use serde_json::{json, Value};
    use tile_core::{CommandRequest, CommandResponse, Dispatcher, ErrorKind, Path};

    fn call(dispatcher: &mut Dispatcher<WmModel>, path: &str, command: &str, args: Vec<Value>) -> CommandResponse {
        let path = Path::root().navigate(path).expect("path");
        dispatcher.dispatch(&CommandRequest::new(path, command).with_args(args))
    }

    fn value(response: CommandResponse) -> Value {
        response.into_result().expect("success")
    }

    fn dispatcher() -> Dispatcher<WmModel> {
        Dispatcher::new(WmModel::new(&WmConfig::default()))
    }

    #[test]
    fn root_commands_starting_with_c() {
        let mut dispatcher = dispatcher();
        let names = value(call(&mut dispatcher, "", "commands", vec![]));
        let names: Vec<String> = serde_json::from_value(names).expect("names");
        let c: Vec<&str> = names
            .iter()
            .map(String::as_str)
            .filter(|name| name.starts_with('c'))
            .collect();
        assert_eq!(c, vec!["commands", "critical"]);
    }

    #[test]
    fn status_and_argument_errors() {
        let mut dispatcher = dispatcher();
        assert_eq!(value(call(&mut dispatcher, "", "status", vec![])), json!("OK"));
        let response = call(&mut dispatcher, "", "status", vec![json!(1)]);
        assert!(matches!(
            response,
            CommandResponse::Error { kind: ErrorKind::InvalidArguments, .. }
        ));
        let response = call(&mut dispatcher, "", "to_screen", vec![json!("first")]);
        assert!(matches!(
            response,
            CommandResponse::Error { kind: ErrorKind::InvalidArguments, .. }
        ));
    }

    #[test]
    fn window_lifecycle_through_commands() {
        let mut dispatcher = dispatcher();
        let id = value(call(&mut dispatcher, "", "add_window", vec![json!("term")]));
        let info = value(call(&mut dispatcher, "window", "info", vec![]));
        assert_eq!(info["id"], id);
        assert_eq!(info["group"], json!("a"));
        assert_eq!(info["focused"], json!(true));

        assert_eq!(
            value(call(&mut dispatcher, "window", "toggle_floating", vec![])),
            json!(true)
        );
        value(call(&mut dispatcher, "window", "togroup", vec![json!("b")]));
        let groups = value(call(&mut dispatcher, "", "groups", vec![]));
        assert_eq!(groups["b"]["windows"], json!([id]));
        assert_eq!(groups["a"]["windows"], json!([]));

        value(call(&mut dispatcher, &format!("window[{id}]"), "kill", vec![]));
        assert_eq!(value(call(&mut dispatcher, "", "windows", vec![])), json!([]));
    }

    #[test]
    fn failures_become_command_exceptions() {
        let mut dispatcher = dispatcher();
        let response = call(&mut dispatcher, "", "delete_group", vec![json!("zzz")]);
        assert_eq!(
            response,
            CommandResponse::error(ErrorKind::CommandException, "no such group: zzz")
        );
        let response = call(&mut dispatcher, "", "to_screen", vec![json!(5)]);
        assert!(matches!(
            response,
            CommandResponse::Error { kind: ErrorKind::CommandException, .. }
        ));
    }

    #[test]
    fn group_and_screen_commands() {
        let mut dispatcher = dispatcher();
        value(call(&mut dispatcher, "group[b]", "toscreen", vec![]));
        let screen = value(call(&mut dispatcher, "screen", "info", vec![]));
        assert_eq!(screen["group"], json!("b"));

        assert_eq!(
            value(call(&mut dispatcher, "screen", "toggle_group", vec![])),
            json!("a")
        );
        assert_eq!(value(call(&mut dispatcher, "screen", "next_group", vec![])), json!("b"));
        value(call(&mut dispatcher, "group", "set_label", vec![json!("web")]));
        assert_eq!(value(call(&mut dispatcher, "group[b]", "info", vec![]))["label"], json!("web"));
    }

    #[test]
    fn events_respect_limit() {
        let mut dispatcher = dispatcher();
        for _ in 0..3 {
            value(call(&mut dispatcher, "", "next_screen", vec![]));
        }
        let all = value(call(&mut dispatcher, "", "events", vec![]));
        assert_eq!(all.as_array().map(Vec::len), Some(3));
        let last = value(call(&mut dispatcher, "", "events", vec![json!(1)]));
        assert_eq!(last[0]["seq"], json!(3));
        assert_eq!(last[0]["kind"], json!("screen_focus"));
    }

    #[test]
    fn loglevel_tracks_level_commands() {
        let mut dispatcher = dispatcher();
        assert_eq!(value(call(&mut dispatcher, "", "loglevel", vec![])), json!("info"));
        value(call(&mut dispatcher, "", "warning", vec![]));
        assert_eq!(value(call(&mut dispatcher, "", "loglevel", vec![])), json!("warning"));
    }
}
