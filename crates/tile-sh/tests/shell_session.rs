use std::io;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tile_hub::{Server, ServerConfig, WmConfig, WmModel};
use tile_sh::{Shell, NO_SUCH_PATH};
use tokio::sync::watch;
use tokio::task::JoinHandle;

fn test_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    std::env::temp_dir()
        .join(format!("tile-sh-test-{name}-{}-{nanos}", std::process::id()))
        .join("hub.sock")
}

struct TestHub {
    path: PathBuf,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<io::Result<WmModel>>,
}

impl TestHub {
    fn launch(name: &str) -> Self {
        let path = test_path(name);
        let server = Server::bind(ServerConfig::new(&path)).expect("bind");
        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(server.run(WmModel::new(&WmConfig::default()), rx));
        Self {
            path,
            shutdown,
            task,
        }
    }

    async fn shell(&self) -> Shell {
        Shell::connect(&self.path).await.expect("connect")
    }

    async fn stop(self) -> WmModel {
        let _ = self.shutdown.send(true);
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("hub stops in time")
            .expect("hub task")
            .expect("hub result")
    }
}

#[tokio::test]
async fn ls_lists_tags_and_items() {
    let hub = TestHub::launch("ls");
    let mut sh = hub.shell().await;

    assert_eq!(
        sh.do_ls("").await,
        "bar/     group/   layout/  screen/  widget/  window/"
    );
    assert_eq!(sh.do_ls("layout").await, "group/   window/  screen/  0/     ");
    assert_eq!(sh.do_cd("layout").await, "layout");
    assert_eq!(sh.do_ls("screen").await, "layout/  window/  bar/   ");
    assert_eq!(sh.do_ls("wibble").await, NO_SUCH_PATH);
    assert_eq!(sh.do_ls("group/nope").await, NO_SUCH_PATH);

    hub.stop().await;
}

#[tokio::test]
async fn cd_moves_through_the_tree() {
    let hub = TestHub::launch("cd");
    let mut sh = hub.shell().await;

    assert_eq!(sh.do_cd("layout").await, "layout");
    assert_eq!(sh.do_cd("0").await, "layout[0]");
    assert_eq!(sh.do_cd("..").await, "/");
    assert_eq!(sh.do_cd("..").await, "/");
    assert_eq!(sh.do_cd("0/wibble").await, NO_SUCH_PATH);
    assert_eq!(sh.do_cd("group[zzz]").await, NO_SUCH_PATH);
    assert_eq!(sh.pwd(), "/");

    assert_eq!(sh.do_cd("group[b]/layout").await, "group[b]/layout");
    assert_eq!(sh.prompt(), "group[b]/layout > ");
    assert_eq!(sh.do_cd("/screen").await, "screen");
    assert_eq!(sh.do_cd("").await, "/");

    hub.stop().await;
}

#[tokio::test]
async fn cd_enters_every_listed_container() {
    let hub = TestHub::launch("containers");
    let mut sh = hub.shell().await;

    assert_eq!(sh.do_ls("window").await, "");
    assert_eq!(sh.do_cd("window").await, "window");
    assert_eq!(sh.do_ls("").await, "");
    assert_eq!(sh.do_cd("/bar").await, "bar");
    assert_eq!(sh.do_cd("/widget").await, "widget");
    assert_eq!(sh.do_ls("").await, "");
    assert_eq!(sh.do_cd("/group[zzz]").await, NO_SUCH_PATH);
    assert_eq!(sh.pwd(), "widget");

    sh.do_cd("/").await;
    assert_eq!(sh.process_line("add_window('term')").await, "1");
    assert_eq!(sh.do_cd("window").await, "window");
    assert_eq!(sh.do_ls("").await, "group/   screen/  layout/  1/     ");

    hub.stop().await;
}

#[tokio::test]
async fn call_lines_render_results_and_errors() {
    let hub = TestHub::launch("call");
    let mut sh = hub.shell().await;

    assert_eq!(sh.process_line("status()").await, "OK");
    assert_eq!(sh.process_line("add_window('term')").await, "1");
    assert_eq!(sh.process_line("window[1]/focus()").await, "Invalid command: window[1]/focus()");
    assert_eq!(sh.process_line("wibble()").await, "Command does not exist: wibble");
    assert_eq!(sh.process_line("status(").await, "Invalid command: status(");
    assert!(sh
        .process_line("delete_group('nope')")
        .await
        .starts_with("Command exception"));
    assert!(sh
        .process_line("add_group()")
        .await
        .starts_with("Command exception"));

    sh.do_cd("window").await;
    let info = sh.process_line("info()").await;
    assert!(info.contains("\"name\": \"term\""), "{info}");
    assert_eq!(sh.process_line("kill()").await, "");
    assert_eq!(sh.process_line("info()").await, NO_SUCH_PATH);

    let model = hub.stop().await;
    assert!(model.window(1).is_none());
}

#[tokio::test]
async fn help_covers_builtins_and_commands() {
    let hub = TestHub::launch("help");
    let mut sh = hub.shell().await;

    let listing = sh.process_line("help").await;
    assert!(listing.contains("Builtins"));
    assert!(listing.contains("status"));
    assert_eq!(
        sh.process_line("help cd").await,
        "Change to an object, or back to a parent using '..'."
    );
    assert_eq!(
        sh.process_line("help add_group").await,
        "add_group(name)\n\nCreate an empty group."
    );
    assert!(sh.process_line("help nonexistent").await.starts_with("No such command"));

    assert_eq!(sh.process_line("pwd").await, "/");
    assert!(!sh.exit_requested());
    assert_eq!(sh.process_line("q").await, "");
    assert!(sh.exit_requested());

    hub.stop().await;
}

#[tokio::test]
async fn completion_offers_commands_and_paths() {
    let hub = TestHub::launch("complete");
    let mut sh = hub.shell().await;

    assert_eq!(sh.complete("c", "c").await, vec!["cd", "commands", "critical"]);
    assert_eq!(sh.complete("cd l", "l").await, vec!["layout/"]);
    assert_eq!(
        sh.complete("cd layout/", "layout/").await,
        vec!["layout/group", "layout/window", "layout/screen", "layout/0"]
    );
    assert_eq!(sh.complete("cd layout/g", "layout/g").await, vec!["layout/group/"]);
    assert!(sh.complete("status(", "status(").await.is_empty());

    assert_eq!(sh.complete_next("c").await.as_deref(), Some("cd"));
    assert_eq!(sh.complete_next("c").await.as_deref(), Some("commands"));
    assert_eq!(sh.complete_next("c").await.as_deref(), Some("critical"));
    assert_eq!(sh.complete_next("c").await.as_deref(), Some("cd"));
    assert_eq!(sh.complete_next("ls gr").await.as_deref(), Some("ls group/"));

    hub.stop().await;
}

#[tokio::test]
async fn shell_reconnects_after_the_hub_restarts() {
    let hub = TestHub::launch("reconnect");
    let path = hub.path.clone();
    let mut sh = hub.shell().await;
    assert_eq!(sh.process_line("status()").await, "OK");
    hub.stop().await;

    assert!(sh
        .process_line("status()")
        .await
        .starts_with("Connection error"));

    let server = Server::bind(ServerConfig::new(&path)).expect("rebind");
    let (shutdown, rx) = watch::channel(false);
    let task = tokio::spawn(server.run(WmModel::new(&WmConfig::default()), rx));
    assert_eq!(sh.process_line("status()").await, "OK");

    let _ = shutdown.send(true);
    task.await.expect("join").expect("run");
}
