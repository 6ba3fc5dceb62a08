#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use modpilot::browser::{
    ElementRef, MouseButton, NodeQuery, NodeSnapshot, PageDriver, ShotOptions, WaitPolicy,
};
use modpilot::core::config::TimingSettings;
use modpilot::features::pacing::ManualClock;
use modpilot::AccessibilityNode;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Navigate(String),
    Count(String),
    Texts(String),
    ReadNodes,
    ScrollIntoView(String),
    Hover(String),
    Click(String, usize, MouseButton),
    ClickAt(f64, f64),
    ScrollBy(String, f64),
    TypeText(String),
    PressKey(String),
    Screenshot,
    Accessibility,
}

impl Call {
    pub fn selector(&self) -> Option<&str> {
        match self {
            Call::Count(s)
            | Call::Texts(s)
            | Call::ScrollIntoView(s)
            | Call::Hover(s)
            | Call::Click(s, _, _)
            | Call::ScrollBy(s, _) => Some(s),
            _ => None,
        }
    }
}

#[derive(Default)]
struct State {
    url: String,
    counts: HashMap<String, usize>,
    texts: HashMap<String, Vec<String>>,
    nodes: Vec<NodeSnapshot>,
    poisoned: HashSet<String>,
    ax: Option<AccessibilityNode>,
    on_click: HashMap<String, Vec<(String, usize)>>,
    on_type: Vec<(String, usize)>,
    on_key: HashMap<String, Vec<(String, usize)>>,
    screenshot_fails: bool,
    read_fails: bool,
    type_clock: Option<(ManualClock, Duration)>,
    calls: Vec<Call>,
}

/// Scripted page: fixed selector counts and texts, optional click effects,
/// and a full call log.
#[derive(Default)]
pub struct FakeDriver {
    state: Mutex<State>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_count(&self, selector: &str, n: usize) -> &Self {
        self.state.lock().unwrap().counts.insert(selector.to_string(), n);
        self
    }

    pub fn set_texts(&self, selector: &str, texts: &[&str]) -> &Self {
        self.state.lock().unwrap().texts.insert(
            selector.to_string(),
            texts.iter().map(|t| t.to_string()).collect(),
        );
        self
    }

    pub fn set_nodes(&self, nodes: Vec<NodeSnapshot>) -> &Self {
        self.state.lock().unwrap().nodes = nodes;
        self
    }

    pub fn set_accessibility(&self, tree: Option<AccessibilityNode>) -> &Self {
        self.state.lock().unwrap().ax = tree;
        self
    }

    /// Any query touching `selector` fails.
    pub fn poison(&self, selector: &str) -> &Self {
        self.state.lock().unwrap().poisoned.insert(selector.to_string());
        self
    }

    /// After a click on `clicked`, `selector` matches `n` elements.
    pub fn when_clicked(&self, clicked: &str, selector: &str, n: usize) -> &Self {
        self.state
            .lock()
            .unwrap()
            .on_click
            .entry(clicked.to_string())
            .or_default()
            .push((selector.to_string(), n));
        self
    }

    /// After any `type_text`, `selector` matches `n` elements.
    pub fn when_typed(&self, selector: &str, n: usize) -> &Self {
        self.state
            .lock()
            .unwrap()
            .on_type
            .push((selector.to_string(), n));
        self
    }

    /// After pressing `key`, `selector` matches `n` elements.
    pub fn when_pressed(&self, key: &str, selector: &str, n: usize) -> &Self {
        self.state
            .lock()
            .unwrap()
            .on_key
            .entry(key.to_string())
            .or_default()
            .push((selector.to_string(), n));
        self
    }

    /// A composer that shows the draft once typed and empties on Enter.
    pub fn live_composer(&self) -> &Self {
        self.set_count(modpilot::locator::COMPOSER, 1)
            .when_typed(modpilot::locator::COMPOSER_TEXT, 1)
            .when_pressed("Enter", modpilot::locator::COMPOSER_TEXT, 0)
    }

    /// Each `type_text` moves `clock` forward by `by`, standing in for a slow send.
    pub fn advance_on_type(&self, clock: ManualClock, by: Duration) -> &Self {
        self.state.lock().unwrap().type_clock = Some((clock, by));
        self
    }

    pub fn fail_reads(&self) -> &Self {
        self.state.lock().unwrap().read_fails = true;
        self
    }

    pub fn fail_screenshots(&self) -> &Self {
        self.state.lock().unwrap().screenshot_fails = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn touched(&self, selector: &str) -> bool {
        self.calls().iter().any(|c| c.selector() == Some(selector))
    }

    pub fn typed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::TypeText(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::PressKey(k) => Some(k),
                _ => None,
            })
            .collect()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Navigate(u) => Some(u),
                _ => None,
            })
            .collect()
    }

    fn log(&self, call: Call) -> Result<()> {
        let mut st = self.state.lock().unwrap();
        let poisoned = call
            .selector()
            .map(|s| st.poisoned.contains(s))
            .unwrap_or(false);
        st.calls.push(call);
        if poisoned {
            Err(anyhow!("poisoned selector touched"))
        } else {
            Ok(())
        }
    }

    fn count_of(&self, selector: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .counts
            .get(selector)
            .copied()
            .unwrap_or(0)
    }

    fn require(&self, target: &ElementRef) -> Result<()> {
        if self.count_of(&target.selector) > target.index {
            Ok(())
        } else {
            Err(anyhow!("no element for {}", target.selector))
        }
    }
}

#[async_trait]
impl PageDriver for FakeDriver {
    async fn navigate(&self, url: &str, _wait: WaitPolicy) -> Result<()> {
        self.log(Call::Navigate(url.to_string()))?;
        self.state.lock().unwrap().url = url.to_string();
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.state.lock().unwrap().url.clone())
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        self.log(Call::Count(selector.to_string()))?;
        Ok(self.count_of(selector))
    }

    async fn texts(&self, selector: &str) -> Result<Vec<String>> {
        self.log(Call::Texts(selector.to_string()))?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .texts
            .get(selector)
            .cloned()
            .unwrap_or_default())
    }

    async fn read_nodes(&self, _query: &NodeQuery) -> Result<Vec<NodeSnapshot>> {
        self.log(Call::ReadNodes)?;
        let st = self.state.lock().unwrap();
        if st.read_fails {
            return Err(anyhow!("evaluate failed: target closed"));
        }
        Ok(st.nodes.clone())
    }

    async fn scroll_into_view(&self, target: &ElementRef) -> Result<()> {
        self.log(Call::ScrollIntoView(target.selector.clone()))?;
        self.require(target)
    }

    async fn hover(&self, target: &ElementRef) -> Result<()> {
        self.log(Call::Hover(target.selector.clone()))?;
        self.require(target)
    }

    async fn click(&self, target: &ElementRef, button: MouseButton) -> Result<()> {
        self.log(Call::Click(target.selector.clone(), target.index, button))?;
        self.require(target)?;
        let mut st = self.state.lock().unwrap();
        if let Some(effects) = st.on_click.get(&target.selector).cloned() {
            for (sel, n) in effects {
                st.counts.insert(sel, n);
            }
        }
        Ok(())
    }

    async fn click_at(&self, x: f64, y: f64) -> Result<()> {
        self.log(Call::ClickAt(x, y))
    }

    async fn scroll_by(&self, target: &ElementRef, delta_y: f64) -> Result<()> {
        self.log(Call::ScrollBy(target.selector.clone(), delta_y))
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.log(Call::TypeText(text.to_string()))?;
        let mut st = self.state.lock().unwrap();
        if let Some((clock, by)) = &st.type_clock {
            clock.advance(*by);
        }
        for (sel, n) in st.on_type.clone() {
            st.counts.insert(sel, n);
        }
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.log(Call::PressKey(key.to_string()))?;
        let mut st = self.state.lock().unwrap();
        if let Some(effects) = st.on_key.get(key).cloned() {
            for (sel, n) in effects {
                st.counts.insert(sel, n);
            }
        }
        Ok(())
    }

    async fn screenshot(&self, _opts: &ShotOptions) -> Result<Vec<u8>> {
        self.log(Call::Screenshot)?;
        if self.state.lock().unwrap().screenshot_fails {
            return Err(anyhow!("capture unavailable"));
        }
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn accessibility_snapshot(&self) -> Result<Option<AccessibilityNode>> {
        self.log(Call::Accessibility)?;
        Ok(self.state.lock().unwrap().ax.clone())
    }
}

pub fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Tight budgets so negative paths resolve quickly.
pub fn fast_timing() -> TimingSettings {
    TimingSettings {
        attach_timeout_ms: Some(200),
        strategy_budget_ms: Some(60),
        confirm_timeout_ms: Some(150),
        verify_timeout_ms: Some(200),
        settle_ms: Some(0),
        login_wait_secs: Some(1),
    }
}

pub fn message_node(channel: &str, id: &str, author: &str, text: &str) -> NodeSnapshot {
    let mut n = NodeSnapshot {
        id: format!("chat-messages-{}-{}", channel, id),
        ..Default::default()
    };
    n.fields.insert("author_span".into(), author.into());
    n.fields.insert("content".into(), text.into());
    n
}

/// Serve exactly one HTTP response, after reading the full request.
pub async fn serve_once(status: &'static str, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let Ok((mut sock, _)) = listener.accept().await else {
            return;
        };
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = match sock.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let content_length = text[..head_end]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + content_length {
                    break;
                }
            }
        }
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let _ = sock.write_all(response.as_bytes()).await;
        let _ = sock.shutdown().await;
    });
    format!("http://{}", addr)
}
