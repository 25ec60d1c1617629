//! In-process fake compositor for tests
//!
//! Listens on a socket in a temporary directory, answers every request kind
//! with canned JSON and records each frame it receives. Connections that
//! sent SUBSCRIBE receive events pushed with [`FakeCompositor::emit`].

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::{encode_frame, EventType, MessageType, HEADER_SIZE};

/// A frame received by the fake
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    /// 1-based number of the connection it arrived on
    pub conn: usize,
    pub kind: u32,
    pub payload: String,
}

struct Subscriber {
    conn: usize,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    events: BTreeSet<EventType>,
}

#[derive(Default)]
struct State {
    frames: Mutex<Vec<Frame>>,
    connections: AtomicUsize,
    violations: AtomicUsize,
    subscribers: Mutex<Vec<Subscriber>>,
    tasks: Mutex<Vec<(usize, JoinHandle<()>)>>,
    reply_tag_override: Mutex<Option<u32>>,
    reply_delay: Mutex<Duration>,
}

pub(crate) struct FakeCompositor {
    _dir: tempfile::TempDir,
    path: PathBuf,
    state: Arc<State>,
    accept: JoinHandle<()>,
}

impl FakeCompositor {
    pub(crate) async fn start() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("ipc.sock");
        let listener = UnixListener::bind(&path).expect("Failed to bind fake socket");
        let state = Arc::new(State::default());

        let accept_state = state.clone();
        let accept = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn = accept_state.connections.fetch_add(1, Ordering::SeqCst) + 1;
                serve(accept_state.clone(), conn, stream);
            }
        });

        Self {
            _dir: dir,
            path,
            state,
            accept,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Number of connections accepted so far
    pub(crate) fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Requests that arrived while an earlier request on the same connection
    /// was still unanswered
    pub(crate) fn violations(&self) -> usize {
        self.state.violations.load(Ordering::SeqCst)
    }

    pub(crate) fn frames(&self) -> Vec<Frame> {
        self.state.frames.lock().unwrap().clone()
    }

    pub(crate) fn subscribe_frames(&self) -> Vec<Frame> {
        self.frames()
            .into_iter()
            .filter(|f| f.kind == MessageType::Subscribe.code())
            .collect()
    }

    pub(crate) fn set_reply_tag_override(&self, tag: Option<u32>) {
        *self.state.reply_tag_override.lock().unwrap() = tag;
    }

    pub(crate) fn set_reply_delay(&self, delay: Duration) {
        *self.state.reply_delay.lock().unwrap() = delay;
    }

    /// Wait until at least `n` SUBSCRIBE frames arrived
    pub(crate) async fn wait_for_subscribes(&self, n: usize) {
        self.wait_until(|fake| fake.subscribe_frames().len() >= n)
            .await;
    }

    /// Wait until a SUBSCRIBE arrives on a connection numbered above `conn`
    pub(crate) async fn wait_until_subscribed_after(&self, conn: usize) {
        self.wait_until(|fake| fake.subscribe_frames().iter().any(|f| f.conn > conn))
            .await;
    }

    /// Wait until at least `n` connections were accepted
    pub(crate) async fn wait_for_connections(&self, n: usize) {
        self.wait_until(|fake| fake.connection_count() >= n).await;
    }

    async fn wait_until(&self, done: impl Fn(&Self) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !done(self) {
            assert!(
                tokio::time::Instant::now() < deadline,
                "Timed out waiting on fake compositor, frames: {:?}",
                self.frames()
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Push an event to every connection subscribed to its category
    pub(crate) async fn emit(&self, event: EventType, payload: &str) {
        let frame = encode_frame(event.tag(), payload.as_bytes());
        for subscriber in self.state.subscribers.lock().unwrap().iter() {
            if subscriber.events.contains(&event) {
                let _ = subscriber.tx.send(frame.clone());
            }
        }
    }

    /// Push a frame with an arbitrary tag to every subscribed connection
    pub(crate) async fn emit_raw(&self, tag: u32, payload: &str) {
        self.broadcast(encode_frame(tag, payload.as_bytes()));
    }

    /// Push a frame with a broken magic to every subscribed connection
    pub(crate) async fn emit_corrupt(&self) {
        let mut frame = encode_frame(EventType::Tick.tag(), b"{}");
        frame[..6].copy_from_slice(b"xx-ipc");
        self.broadcast(frame);
    }

    fn broadcast(&self, frame: Vec<u8>) {
        for subscriber in self.state.subscribers.lock().unwrap().iter() {
            let _ = subscriber.tx.send(frame.clone());
        }
    }

    /// Close every open connection, as a restarting compositor would
    pub(crate) async fn drop_connections(&self) {
        // Let connections the client already opened be accepted first.
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.state.subscribers.lock().unwrap().clear();
        let tasks: Vec<JoinHandle<()>> = self
            .state
            .tasks
            .lock()
            .unwrap()
            .drain(..)
            .map(|(_, task)| task)
            .collect();
        close_all(tasks).await;
    }

    /// Close a single connection, leaving the others open
    pub(crate) async fn drop_connection(&self, conn: usize) {
        self.wait_for_connections(conn).await;
        self.state
            .subscribers
            .lock()
            .unwrap()
            .retain(|s| s.conn != conn);

        let tasks: Vec<JoinHandle<()>> = {
            let mut all = self.state.tasks.lock().unwrap();
            let (closing, open): (Vec<_>, Vec<_>) = all.drain(..).partition(|(c, _)| *c == conn);
            *all = open;
            closing.into_iter().map(|(_, task)| task).collect()
        };
        close_all(tasks).await;
    }
}

impl Drop for FakeCompositor {
    fn drop(&mut self) {
        self.accept.abort();
        for (_, task) in self.state.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

async fn close_all(tasks: Vec<JoinHandle<()>>) {
    for task in &tasks {
        task.abort();
    }
    for task in tasks {
        let _ = task.await;
    }
}

fn serve(state: Arc<State>, conn: usize, stream: UnixStream) {
    let (mut read, mut write) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if write.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let reader_state = state.clone();
    let reader = tokio::spawn(async move {
        let state = reader_state;
        let mut buf = Vec::new();

        while let Some((kind, payload)) = next_frame(&mut read, &mut buf).await {
            let frame = Frame {
                conn,
                kind,
                payload: payload.clone(),
            };

            // Recorded only once the subscriber is registered, so tests that
            // wait for the frame can emit right away.
            if kind == MessageType::Subscribe.code() {
                subscribe(&state, conn, &tx, &payload);
                state.frames.lock().unwrap().push(frame);
                continue;
            }
            state.frames.lock().unwrap().push(frame);

            // A well-behaved client waits for our reply before sending more.
            tokio::time::sleep(Duration::from_millis(2)).await;
            let mut pending = [0u8; 4096];
            if let Ok(n) = read.try_read(&mut pending) {
                buf.extend_from_slice(&pending[..n]);
            }
            if !buf.is_empty() {
                state.violations.fetch_add(1, Ordering::SeqCst);
            }

            let delay = *state.reply_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let tag = state.reply_tag_override.lock().unwrap().unwrap_or(kind);
            let reply = reply_for(kind, &payload);
            let _ = tx.send(encode_frame(tag, reply.as_bytes()));

            if kind == MessageType::SendTick.code() {
                let tick = serde_json::json!({ "first": false, "payload": payload }).to_string();
                let frame = encode_frame(EventType::Tick.tag(), tick.as_bytes());
                for subscriber in state.subscribers.lock().unwrap().iter() {
                    if subscriber.events.contains(&EventType::Tick) {
                        let _ = subscriber.tx.send(frame.clone());
                    }
                }
            }
        }
    });

    let mut tasks = state.tasks.lock().unwrap();
    tasks.push((conn, reader));
    tasks.push((conn, writer));
}

fn subscribe(state: &State, conn: usize, tx: &mpsc::UnboundedSender<Vec<u8>>, payload: &str) {
    let names: Vec<String> = serde_json::from_str(payload).unwrap_or_default();
    let events: BTreeSet<EventType> = names.iter().filter_map(|n| n.parse().ok()).collect();

    let _ = tx.send(encode_frame(
        MessageType::Subscribe.code(),
        br#"{"success":true}"#,
    ));
    if events.contains(&EventType::Tick) {
        let _ = tx.send(encode_frame(
            EventType::Tick.tag(),
            br#"{"first":true,"payload":""}"#,
        ));
    }

    let mut subscribers = state.subscribers.lock().unwrap();
    match subscribers.iter_mut().find(|s| s.conn == conn) {
        Some(existing) => existing.events.extend(events),
        None => subscribers.push(Subscriber {
            conn,
            tx: tx.clone(),
            events,
        }),
    }
}

async fn next_frame(read: &mut OwnedReadHalf, buf: &mut Vec<u8>) -> Option<(u32, String)> {
    loop {
        if buf.len() >= HEADER_SIZE {
            let length = u32::from_ne_bytes(buf[6..10].try_into().unwrap()) as usize;
            if buf.len() >= HEADER_SIZE + length {
                let kind = u32::from_ne_bytes(buf[10..14].try_into().unwrap());
                let payload =
                    String::from_utf8_lossy(&buf[HEADER_SIZE..HEADER_SIZE + length]).into_owned();
                buf.drain(..HEADER_SIZE + length);
                return Some((kind, payload));
            }
        }

        let mut chunk = [0u8; 4096];
        match read.read(&mut chunk).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

/// Layout tree served for GET_TREE
///
/// Two workspaces on `eDP-1` (one with a floating window), a dock area with
/// a bar and the scratchpad holding one window.
pub(crate) const TREE: &str = r#"{
  "id": 1, "type": "root", "name": "root", "layout": "splith",
  "nodes": [
    {"id": 2, "type": "output", "name": "eDP-1", "nodes": [
      {"id": 10, "type": "workspace", "name": "1", "num": 1, "nodes": [
        {"id": 20, "type": "con", "name": "term", "app_id": "foot", "pid": 4242,
         "focused": true, "marks": ["mark1"]},
        {"id": 21, "type": "con", "name": "Mozilla Firefox", "window": 4194305,
         "window_properties": {"class": "firefox", "title": "Mozilla Firefox"}}
      ], "floating_nodes": [
        {"id": 22, "type": "floating_con", "name": "calculator", "app_id": "qalculate"}
      ]},
      {"id": 11, "type": "workspace", "name": "2:www", "num": 2, "nodes": [
        {"id": 23, "type": "con", "name": "editor", "marks": ["mark2"]}
      ]},
      {"id": 8, "type": "dockarea", "name": "topdock", "nodes": [
        {"id": 9, "type": "con", "name": "i3bar for output eDP-1"}
      ]}
    ]},
    {"id": 3, "type": "output", "name": "__i3", "nodes": [
      {"id": 4, "type": "con", "name": "content", "nodes": [
        {"id": 5, "type": "workspace", "name": "__i3_scratch", "num": -1, "floating_nodes": [
          {"id": 6, "type": "floating_con", "floating": "user_on", "nodes": [
            {"id": 7, "type": "con", "name": "scratch term", "scratchpad_state": "fresh"}
          ]}
        ]}
      ]}
    ]}
  ]
}"#;

fn reply_for(kind: u32, payload: &str) -> String {
    let Some(kind) = MessageType::from_code(kind) else {
        return r#"{"success":false}"#.to_string();
    };

    match kind {
        MessageType::RunCommand => {
            let results: Vec<serde_json::Value> = payload
                .split(|c| c == ';' || c == ',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(|command| {
                    if command.starts_with("fail") {
                        serde_json::json!({
                            "success": false,
                            "parse_error": true,
                            "error": format!("Unknown command '{}'", command),
                            "input": command,
                            "errorposition": "^".repeat(command.len()),
                        })
                    } else {
                        serde_json::json!({ "success": true })
                    }
                })
                .collect();
            serde_json::to_string(&results).unwrap()
        }
        MessageType::GetWorkspaces => r#"[{"id":10,"num":1,"name":"1","visible":true,"focused":true,"urgent":false,"rect":{"x":0,"y":0,"width":1920,"height":1080},"output":"eDP-1"},{"id":11,"num":2,"name":"2:www","visible":false,"focused":false,"urgent":false,"rect":{"x":0,"y":0,"width":1920,"height":1080},"output":"eDP-1"}]"#.to_string(),
        MessageType::GetOutputs => r#"[{"name":"eDP-1","active":true,"primary":false,"current_workspace":"1","rect":{"x":0,"y":0,"width":1920,"height":1080},"make":"Fake","model":"Panel","scale":1.0}]"#.to_string(),
        MessageType::GetTree => TREE.to_string(),
        MessageType::GetMarks => r#"["mark1","mark2"]"#.to_string(),
        MessageType::GetBarConfig if payload.is_empty() => r#"["bar-0"]"#.to_string(),
        MessageType::GetBarConfig => serde_json::json!({
            "id": payload,
            "mode": "dock",
            "position": "bottom",
            "status_command": "i3status",
            "font": "monospace 10",
            "workspace_buttons": true,
            "binding_mode_indicator": true,
            "verbose": false,
            "colors": { "background": "#000000", "statusline": "#ffffff" }
        })
        .to_string(),
        MessageType::GetVersion => r#"{"major":1,"minor":9,"patch":0,"human_readable":"fake 1.9","loaded_config_file_name":"/etc/fake/config"}"#.to_string(),
        MessageType::GetBindingModes => r#"["default","resize"]"#.to_string(),
        MessageType::GetConfig => r#"{"config":"set $mod Mod4\n"}"#.to_string(),
        MessageType::SendTick => r#"{"success":true}"#.to_string(),
        MessageType::GetInputs => r#"[{"identifier":"1:1:Fake_Keyboard","name":"Fake Keyboard","vendor":1,"product":1,"type":"keyboard","xkb_active_layout_name":"English (US)","xkb_layout_names":["English (US)"],"xkb_active_layout_index":0}]"#.to_string(),
        MessageType::GetSeats => r#"[{"name":"seat0","capabilities":3,"focus":20,"devices":[{"identifier":"1:1:Fake_Keyboard","name":"Fake Keyboard","type":"keyboard"}]}]"#.to_string(),
        MessageType::Subscribe => r#"{"success":true}"#.to_string(),
    }
}
